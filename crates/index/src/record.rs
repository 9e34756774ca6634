use serde::{Deserialize, Serialize};

/// Metadata stored next to every chunk. Uploads carry `session_id`;
/// standards carry `standard_name` and `source_type`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    pub source_file: String,
    #[serde(default)]
    pub page: u32,
}

impl ChunkMetadata {
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "session_id" => self.session_id.as_deref(),
            "standard_name" => self.standard_name.as_deref(),
            "source_type" => self.source_type.as_deref(),
            "source_file" => Some(self.source_file.as_str()),
            _ => None,
        }
    }
}

/// Exact-match (`term`) filter on one metadata field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub field: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self::term("session_id", session_id)
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        metadata.field(&self.field) == Some(self.value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ChunkInsert {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone)]
pub(crate) struct EmbeddedChunk {
    pub chunk: ChunkInsert,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}
