use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const CHUNK_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 200,
        }
    }
}

/// A window of the input measured in characters, `start..end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(config: ChunkConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        Self {
            chunk_size,
            overlap: config.chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        if chars.iter().all(|c| c.is_whitespace()) {
            return Vec::new();
        }
        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let hard_end = (start + self.chunk_size).min(chars.len());
            let end = if hard_end == chars.len() {
                hard_end
            } else {
                self.soft_boundary(&chars, start, hard_end)
            };
            chunks.push(TextChunk {
                index: chunks.len(),
                start,
                end,
                text: chars[start..end].iter().collect(),
            });
            if end == chars.len() {
                break;
            }
            start = end.saturating_sub(self.overlap).max(start + 1);
        }
        chunks
    }

    /// Latest paragraph break, then line break, then space in the back half
    /// of the window; the hard limit when none is present.
    fn soft_boundary(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = start + self.chunk_size / 2;
        for separator in [&['\n', '\n'][..], &['\n'][..], &[' '][..]] {
            let width = separator.len();
            let mut idx = hard_end;
            while idx >= floor + width && idx > start + width {
                if &chars[idx - width..idx] == separator {
                    return idx;
                }
                idx -= 1;
            }
        }
        hard_end
    }
}

pub fn stable_chunk_id(source: &str, page: u32, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(CHUNK_VERSION.to_be_bytes());
    hasher.update(page.to_be_bytes());
    hasher.update(chunk_index.to_be_bytes());
    hex::encode(hasher.finalize())
}
