//! SQLite-backed ticket embedding store.
//!
//! Embeddings are stored as little-endian `f32` blobs keyed by ticket UUID
//! and searched with brute-force cosine similarity. At the scale this engine
//! targets (tens of thousands of tickets) a linear scan under a prepared
//! statement is well inside budget and keeps the store dependency-free.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::vector::types::{
    CategoryConfidence, MatchFilter, SearchMatch, VectorRecord, VectorStoreStats,
};

/// Weight multiplier for matches whose classification was later corrected.
const INCORRECT_MATCH_DISCOUNT: f64 = 0.5;

/// SQLite-backed vector store.
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
    dimension: usize,
}

impl VectorStore {
    /// Open a store at the given path and provision the collection.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::vector(e.to_string()))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        };
        store.create_collection(false)?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory(dimension: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::vector(e.to_string()))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        };
        store.create_collection(false)?;
        Ok(store)
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::vector(e.to_string()))
    }

    /// Embedding dimension this collection was provisioned for.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    // ==================== Collection Management ====================

    /// Provision the collection schema, optionally dropping existing data.
    ///
    /// Tolerates re-creation: calling this on an existing collection without
    /// `drop_existing` is a no-op.
    pub fn create_collection(&self, drop_existing: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            if drop_existing {
                conn.execute("DROP TABLE IF EXISTS ticket_vectors", [])?;
            }
            conn.execute(
                "CREATE TABLE IF NOT EXISTS ticket_vectors (
                    ticket_id TEXT PRIMARY KEY,
                    embedding BLOB NOT NULL,
                    title TEXT NOT NULL,
                    description_snippet TEXT NOT NULL,
                    level1 TEXT NOT NULL,
                    level2 TEXT NOT NULL,
                    level3 TEXT NOT NULL,
                    was_correct INTEGER NOT NULL DEFAULT 1,
                    confidence REAL NOT NULL,
                    created_at TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_vectors_path
                 ON ticket_vectors(level1, level2, level3)",
                [],
            )?;
            Ok(())
        })
    }

    // ==================== Insert ====================

    /// Upsert one record keyed by ticket id.
    pub fn insert(&self, record: &VectorRecord) -> Result<()> {
        if record.embedding.len() != self.dimension {
            return Err(Error::vector(format!(
                "embedding dimension {} does not match collection dimension {}",
                record.embedding.len(),
                self.dimension
            )));
        }

        let blob = encode_embedding(&record.embedding);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO ticket_vectors
                     (ticket_id, embedding, title, description_snippet,
                      level1, level2, level3, was_correct, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.ticket_id.to_string(),
                    blob,
                    record.title,
                    record.description_snippet,
                    record.level1,
                    record.level2,
                    record.level3,
                    record.was_correct as i64,
                    record.confidence,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Upsert a batch of records. Returns the number written.
    pub fn insert_batch(&self, records: &[VectorRecord]) -> Result<usize> {
        for record in records {
            self.insert(record)?;
        }
        tracing::debug!("Inserted batch of {} ticket vectors", records.len());
        Ok(records.len())
    }

    /// Fetch one record by ticket id.
    pub fn get(&self, ticket_id: Uuid) -> Result<Option<VectorRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT ticket_id, embedding, title, description_snippet,
                        level1, level2, level3, was_correct, confidence, created_at
                 FROM ticket_vectors WHERE ticket_id = ?1",
                params![ticket_id.to_string()],
                row_to_record,
            )
            .optional()
        })
    }

    // ==================== Search ====================

    /// Search for the `limit` most similar tickets.
    ///
    /// Results are sorted by descending similarity; `min_score` and the
    /// optional equality `filter` prune matches. Similarity is cosine,
    /// clamped to [0, 1].
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        min_score: f64,
        filter: Option<&MatchFilter>,
    ) -> Result<Vec<SearchMatch>> {
        if query.len() != self.dimension {
            return Err(Error::vector(format!(
                "query dimension {} does not match collection dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let records = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ticket_id, embedding, title, description_snippet,
                        level1, level2, level3, was_correct, confidence, created_at
                 FROM ticket_vectors",
            )?;
            let records = stmt
                .query_map([], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })?;

        let mut matches: Vec<SearchMatch> = records
            .into_iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .filter_map(|r| {
                let similarity = cosine_similarity(query, &r.embedding).clamp(0.0, 1.0);
                if similarity < min_score {
                    return None;
                }
                Some(SearchMatch {
                    ticket_id: r.ticket_id,
                    title: r.title,
                    description_snippet: r.description_snippet,
                    level1: r.level1,
                    level2: r.level2,
                    level3: r.level3,
                    was_correct: r.was_correct,
                    confidence: r.confidence,
                    similarity,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(limit);
        Ok(matches)
    }

    /// Derive a classification vote from the nearest neighbours.
    ///
    /// Each match contributes its similarity to its category bucket at every
    /// level, halved when the match was later marked incorrect. Votes are
    /// normalized per level; a level's confidence is its winner's share, and
    /// the overall confidence is the mean of the three.
    pub fn category_confidence(&self, query: &[f32], limit: usize) -> Result<CategoryConfidence> {
        let matches = self.search(query, limit, 0.0, None)?;

        if matches.is_empty() {
            return Ok(CategoryConfidence::default());
        }

        let mut level1_votes: HashMap<String, f64> = HashMap::new();
        let mut level2_votes: HashMap<String, f64> = HashMap::new();
        let mut level3_votes: HashMap<String, f64> = HashMap::new();

        for m in &matches {
            let mut weight = m.similarity;
            if !m.was_correct {
                weight *= INCORRECT_MATCH_DISCOUNT;
            }
            *level1_votes.entry(m.level1.clone()).or_insert(0.0) += weight;
            *level2_votes.entry(m.level2.clone()).or_insert(0.0) += weight;
            *level3_votes.entry(m.level3.clone()).or_insert(0.0) += weight;
        }

        normalize_votes(&mut level1_votes);
        normalize_votes(&mut level2_votes);
        normalize_votes(&mut level3_votes);

        let top1 = top_vote(&level1_votes);
        let top2 = top_vote(&level2_votes);
        let top3 = top_vote(&level3_votes);

        let confidence = (top1.1 + top2.1 + top3.1) / 3.0;

        Ok(CategoryConfidence {
            level1: top1.0,
            level2: top2.0,
            level3: top3.0,
            confidence,
            level1_confidence: top1.1,
            level2_confidence: top2.1,
            level3_confidence: top3.1,
            match_count: matches.len(),
            level1_votes,
            level2_votes,
            level3_votes,
        })
    }

    // ==================== Updates ====================

    /// Flip the correctness flag after a HITL review.
    ///
    /// The store lock serializes this against concurrent inserts for the
    /// same ticket id, so the flip cannot lose a racing write.
    pub fn update_correctness(&self, ticket_id: Uuid, was_correct: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE ticket_vectors SET was_correct = ?1 WHERE ticket_id = ?2",
                params![was_correct as i64, ticket_id.to_string()],
            )?;
            Ok(updated > 0)
        })
    }

    /// Delete a record by ticket id.
    pub fn delete(&self, ticket_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM ticket_vectors WHERE ticket_id = ?1",
                params![ticket_id.to_string()],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Collection statistics.
    pub fn stats(&self) -> Result<VectorStoreStats> {
        let records: i64 =
            self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM ticket_vectors", [], |row| row.get(0)))?;
        Ok(VectorStoreStats {
            records: records.max(0) as u64,
            dimension: self.dimension,
        })
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}

/// Cosine similarity; 0.0 when either vector is zero or lengths differ.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += *x as f64 * *y as f64;
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn normalize_votes(votes: &mut HashMap<String, f64>) {
    let total: f64 = votes.values().sum();
    if total > 0.0 {
        for value in votes.values_mut() {
            *value /= total;
        }
    }
}

fn top_vote(votes: &HashMap<String, f64>) -> (Option<String>, f64) {
    votes
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(name, share)| (Some(name.clone()), *share))
        .unwrap_or((None, 0.0))
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<VectorRecord> {
    let id_str: String = row.get(0)?;
    let blob: Vec<u8> = row.get(1)?;
    let created_at: String = row.get(9)?;

    Ok(VectorRecord {
        ticket_id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        embedding: decode_embedding(&blob),
        title: row.get(2)?,
        description_snippet: row.get(3)?,
        level1: row.get(4)?,
        level2: row.get(5)?,
        level3: row.get(6)?,
        was_correct: row.get::<_, i64>(7)? != 0,
        confidence: row.get(8)?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
