use std::path::{Path, PathBuf};

use bytemuck::{cast_slice, pod_collect_to_vec};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{IndexError, Result};
use crate::record::{ChunkMetadata, EmbeddedChunk, MetadataFilter, SearchHit};

/// Brute-force cosine index in a SQLite file. Stands in for OpenSearch in
/// development and tests; every search scans the whole collection.
#[derive(Debug, Clone)]
pub struct LocalIndex {
    path: PathBuf,
}

impl LocalIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let index = Self {
            path: path.as_ref().to_path_buf(),
        };
        index.init()?;
        Ok(index)
    }

    fn connection(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_id INTEGER NOT NULL,
                chunk_id TEXT NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(collection_id, chunk_id),
                FOREIGN KEY(collection_id) REFERENCES collections(id)
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ping(&self) -> bool {
        self.connection()
            .and_then(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
            .is_ok()
    }

    pub fn collection_exists(&self, name: &str) -> Result<bool> {
        let conn = self.connection()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM collections WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn ensure_collection(conn: &Connection, name: &str) -> Result<i64> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM collections WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.execute("INSERT INTO collections (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    pub(crate) fn insert(&self, collection: &str, chunks: &[EmbeddedChunk]) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let collection_id = Self::ensure_collection(&tx, collection)?;
        for item in chunks {
            let metadata = serde_json::to_string(&item.chunk.metadata)?;
            tx.execute(
                "INSERT OR REPLACE INTO chunks (collection_id, chunk_id, text, metadata, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    collection_id,
                    item.chunk.id,
                    item.chunk.text,
                    metadata,
                    cast_slice::<f32, u8>(&item.embedding)
                ],
            )?;
        }
        tx.commit()?;
        Ok(chunks.len())
    }

    pub fn search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT chunks.chunk_id, chunks.text, chunks.metadata, chunks.embedding
            FROM chunks
            JOIN collections ON chunks.collection_id = collections.id
            WHERE collections.name = ?1
              AND (?2 IS NULL OR json_extract(chunks.metadata, ?2) = ?3)
            "#,
        )?;
        let path = filter.map(|f| format!("$.{}", f.field));
        let value = filter.map(|f| f.value.clone());
        let mut rows = stmt.query(params![collection, path, value])?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let metadata: String = row.get(2)?;
            let metadata: ChunkMetadata = serde_json::from_str(&metadata)?;
            let blob: Vec<u8> = row.get(3)?;
            if blob.len() % std::mem::size_of::<f32>() != 0 {
                return Err(IndexError::InvalidEmbedding);
            }
            let embedding: Vec<f32> = pod_collect_to_vec(&blob);
            hits.push(SearchHit {
                id: row.get(0)?,
                text: row.get(1)?,
                metadata,
                score: cosine_similarity(query_embedding, &embedding),
            });
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks JOIN collections ON chunks.collection_id = collections.id WHERE collections.name = ?1",
            [collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}
