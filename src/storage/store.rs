//! SQLite-backed record store for tickets, reviewers, HITL tasks,
//! corrections, and classification metrics.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::graph::CategoryPath;
use crate::storage::schema::{initialize_schema, is_initialized};
use crate::storage::types::{
    HitlCorrection, HitlPriority, HitlStatus, HitlTask, MetricRecord, Reviewer, SimilarTicketRef,
    TicketPriority, TicketRecord, TicketStatus,
};

/// SQLite-backed record store.
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    /// Open or create a record store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::records(e.to_string()))?;
        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::records(e.to_string()))?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::records(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::records(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::records(e.to_string()))
    }

    // ==================== Tickets ====================

    /// Insert or replace a ticket row.
    pub fn upsert_ticket(&self, ticket: &TicketRecord) -> Result<()> {
        let metadata = serde_json::to_string(&ticket.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tickets
                    (id, title, description, priority, status, source, customer_id, metadata,
                     level1, level2, level3, classification_confidence,
                     created_at, updated_at, classified_at, resolved_at, processing_time_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    ticket.id.to_string(),
                    ticket.title,
                    ticket.description,
                    ticket.priority.as_str(),
                    ticket.status.as_str(),
                    ticket.source,
                    ticket.customer_id,
                    metadata,
                    ticket.level1,
                    ticket.level2,
                    ticket.level3,
                    ticket.classification_confidence,
                    ticket.created_at.to_rfc3339(),
                    ticket.updated_at.to_rfc3339(),
                    ticket.classified_at.map(|t| t.to_rfc3339()),
                    ticket.resolved_at.map(|t| t.to_rfc3339()),
                    ticket.processing_time_ms.map(|ms| ms as i64),
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch a ticket by id.
    pub fn get_ticket(&self, id: Uuid) -> Result<Option<TicketRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, description, priority, status, source, customer_id, metadata,
                        level1, level2, level3, classification_confidence,
                        created_at, updated_at, classified_at, resolved_at, processing_time_ms
                 FROM tickets WHERE id = ?1",
                params![id.to_string()],
                row_to_ticket,
            )
            .optional()
        })
    }

    /// Record the classification outcome on a ticket row.
    pub fn update_ticket_classification(
        &self,
        id: Uuid,
        path: &CategoryPath,
        confidence: f64,
        status: TicketStatus,
        processing_time_ms: u64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE tickets SET
                    level1 = ?1, level2 = ?2, level3 = ?3,
                    classification_confidence = ?4, status = ?5,
                    classified_at = ?6, updated_at = ?6, processing_time_ms = ?7
                 WHERE id = ?8",
                params![
                    path.level1,
                    path.level2,
                    path.level3,
                    confidence,
                    status.as_str(),
                    now,
                    processing_time_ms as i64,
                    id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    /// Apply a corrected path to a ticket and mark it resolved.
    pub fn apply_ticket_correction(&self, id: Uuid, corrected: &CategoryPath) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE tickets SET
                    level1 = ?1, level2 = ?2, level3 = ?3,
                    status = 'resolved', resolved_at = ?4, updated_at = ?4
                 WHERE id = ?5",
                params![
                    corrected.level1,
                    corrected.level2,
                    corrected.level3,
                    now,
                    id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    // ==================== Reviewers ====================

    /// Create a reviewer with zeroed counters.
    pub fn create_reviewer(&self, name: &str) -> Result<Reviewer> {
        let reviewer = Reviewer {
            id: Uuid::new_v4(),
            name: name.to_string(),
            reviews_completed: 0,
            corrections_made: 0,
            created_at: Utc::now(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reviewers (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![
                    reviewer.id.to_string(),
                    reviewer.name,
                    reviewer.created_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })?;
        Ok(reviewer)
    }

    /// Fetch a reviewer by id.
    pub fn get_reviewer(&self, id: Uuid) -> Result<Option<Reviewer>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, reviews_completed, corrections_made, created_at
                 FROM reviewers WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(Reviewer {
                        id: parse_uuid(row.get::<_, String>(0)?),
                        name: row.get(1)?,
                        reviews_completed: row.get::<_, i64>(2)?.max(0) as u64,
                        corrections_made: row.get::<_, i64>(3)?.max(0) as u64,
                        created_at: parse_datetime(&row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()
        })
    }

    /// Increment a reviewer's review counter, and the correction counter
    /// when the review changed the classification.
    pub fn increment_reviewer_counts(&self, id: Uuid, made_correction: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE reviewers SET
                    reviews_completed = reviews_completed + 1,
                    corrections_made = corrections_made + ?1
                 WHERE id = ?2",
                params![made_correction as i64, id.to_string()],
            )?;
            Ok(())
        })
    }

    // ==================== HITL Tasks ====================

    /// Persist a new review task.
    pub fn create_task(&self, task: &HitlTask) -> Result<()> {
        let details = serde_json::to_string(&task.confidence_details)?;
        let similar = serde_json::to_string(&task.similar_tickets)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO hitl_tasks
                    (id, ticket_id, ticket_title, ticket_description, ticket_source,
                     ai_level1, ai_level2, ai_level3, ai_confidence,
                     routing_reason, confidence_details, status, priority, created_at,
                     assigned_to, assigned_at, completed_by, completed_at,
                     review_time_seconds, similar_tickets)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19, ?20)",
                params![
                    task.id.to_string(),
                    task.ticket_id.to_string(),
                    task.ticket_title,
                    task.ticket_description,
                    task.ticket_source,
                    task.ai_level1,
                    task.ai_level2,
                    task.ai_level3,
                    task.ai_confidence,
                    task.routing_reason,
                    details,
                    task.status.as_str(),
                    task.priority.as_str(),
                    task.created_at.to_rfc3339(),
                    task.assigned_to.map(|u| u.to_string()),
                    task.assigned_at.map(|t| t.to_rfc3339()),
                    task.completed_by.map(|u| u.to_string()),
                    task.completed_at.map(|t| t.to_rfc3339()),
                    task.review_time_seconds.map(|s| s as i64),
                    similar,
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch a task by id.
    pub fn get_task(&self, id: Uuid) -> Result<Option<HitlTask>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, ticket_id, ticket_title, ticket_description, ticket_source,
                        ai_level1, ai_level2, ai_level3, ai_confidence,
                        routing_reason, confidence_details, status, priority, created_at,
                        assigned_to, assigned_at, completed_by, completed_at,
                        review_time_seconds, similar_tickets
                 FROM hitl_tasks WHERE id = ?1",
                params![id.to_string()],
                row_to_task,
            )
            .optional()
        })
    }

    /// List tasks, optionally filtered by status, newest first.
    pub fn list_tasks(&self, status: Option<HitlStatus>, limit: usize) -> Result<Vec<HitlTask>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, ticket_id, ticket_title, ticket_description, ticket_source,
                        ai_level1, ai_level2, ai_level3, ai_confidence,
                        routing_reason, confidence_details, status, priority, created_at,
                        assigned_to, assigned_at, completed_by, completed_at,
                        review_time_seconds, similar_tickets
                 FROM hitl_tasks",
            );
            if status.is_some() {
                sql.push_str(" WHERE status = ?1");
            }
            sql.push_str(" ORDER BY created_at DESC");
            sql.push_str(&format!(" LIMIT {}", limit));

            let mut stmt = conn.prepare(&sql)?;
            let tasks = match status {
                Some(s) => stmt
                    .query_map(params![s.as_str()], row_to_task)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
                None => stmt
                    .query_map([], row_to_task)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
            };
            Ok(tasks)
        })
    }

    /// Assign a task to a reviewer and mark it in progress.
    pub fn assign_task(&self, task_id: Uuid, reviewer_id: Uuid) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE hitl_tasks SET
                    assigned_to = ?1, assigned_at = ?2, status = 'in_progress'
                 WHERE id = ?3",
                params![reviewer_id.to_string(), now, task_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Mark a task completed with its review duration.
    pub fn complete_task(
        &self,
        task_id: Uuid,
        completed_by: Uuid,
        review_time_seconds: u64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE hitl_tasks SET
                    status = 'completed', completed_by = ?1, completed_at = ?2,
                    review_time_seconds = ?3
                 WHERE id = ?4",
                params![
                    completed_by.to_string(),
                    now,
                    review_time_seconds as i64,
                    task_id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    // ==================== Corrections ====================

    /// Persist a correction row.
    pub fn insert_correction(&self, correction: &HitlCorrection) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO hitl_corrections
                    (id, task_id, ticket_id, reviewer_id,
                     original_level1, original_level2, original_level3, original_confidence,
                     corrected_level1, corrected_level2, corrected_level3,
                     is_correct, notes, submitted_at, review_time_seconds,
                     should_update_graph, should_retrain_model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17)",
                params![
                    correction.id.to_string(),
                    correction.task_id.to_string(),
                    correction.ticket_id.to_string(),
                    correction.reviewer_id.to_string(),
                    correction.original_level1,
                    correction.original_level2,
                    correction.original_level3,
                    correction.original_confidence,
                    correction.corrected_level1,
                    correction.corrected_level2,
                    correction.corrected_level3,
                    correction.is_correct as i64,
                    correction.notes,
                    correction.submitted_at.to_rfc3339(),
                    correction.review_time_seconds as i64,
                    correction.should_update_graph as i64,
                    correction.should_retrain_model as i64,
                ],
            )?;
            Ok(())
        })
    }

    /// The correction for a task, if one was submitted.
    pub fn correction_for_task(&self, task_id: Uuid) -> Result<Option<HitlCorrection>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, task_id, ticket_id, reviewer_id,
                        original_level1, original_level2, original_level3, original_confidence,
                        corrected_level1, corrected_level2, corrected_level3,
                        is_correct, notes, submitted_at, review_time_seconds,
                        should_update_graph, should_retrain_model
                 FROM hitl_corrections WHERE task_id = ?1",
                params![task_id.to_string()],
                row_to_correction,
            )
            .optional()
        })
    }

    /// Fraction of corrections where the AI was exactly right; 0.0 when no
    /// corrections exist.
    pub fn accuracy_rate(&self) -> Result<f64> {
        self.with_conn(|conn| {
            let (correct, total): (i64, i64) = conn.query_row(
                "SELECT COALESCE(SUM(is_correct), 0), COUNT(*) FROM hitl_corrections",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            if total == 0 {
                Ok(0.0)
            } else {
                Ok(correct as f64 / total as f64)
            }
        })
    }

    /// Mean review duration in seconds; 0.0 when no corrections exist.
    pub fn average_review_time(&self) -> Result<f64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(AVG(review_time_seconds), 0.0) FROM hitl_corrections",
                [],
                |row| row.get(0),
            )
        })
    }

    // ==================== Metrics ====================

    /// Append a classification metric row.
    pub fn record_metric(&self, metric: &MetricRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO classification_metrics
                    (id, ticket_id, timestamp, level1, level2, level3,
                     graph_confidence, vector_confidence, llm_confidence,
                     final_confidence, component_agreement,
                     auto_resolved, requires_hitl, processing_time_ms, was_correct)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    metric.id.to_string(),
                    metric.ticket_id.to_string(),
                    metric.timestamp.to_rfc3339(),
                    metric.level1,
                    metric.level2,
                    metric.level3,
                    metric.graph_confidence,
                    metric.vector_confidence,
                    metric.llm_confidence,
                    metric.final_confidence,
                    metric.component_agreement,
                    metric.auto_resolved as i64,
                    metric.requires_hitl as i64,
                    metric.processing_time_ms as i64,
                    metric.was_correct.map(|b| b as i64),
                ],
            )?;
            Ok(())
        })
    }

    /// Back-fill `was_correct` on a ticket's metric rows after HITL review.
    pub fn set_metric_correctness(&self, ticket_id: Uuid, was_correct: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE classification_metrics SET was_correct = ?1 WHERE ticket_id = ?2",
                params![was_correct as i64, ticket_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// The metric row for a ticket, if recorded.
    pub fn metric_for_ticket(&self, ticket_id: Uuid) -> Result<Option<MetricRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, ticket_id, timestamp, level1, level2, level3,
                        graph_confidence, vector_confidence, llm_confidence,
                        final_confidence, component_agreement,
                        auto_resolved, requires_hitl, processing_time_ms, was_correct
                 FROM classification_metrics WHERE ticket_id = ?1
                 ORDER BY timestamp DESC LIMIT 1",
                params![ticket_id.to_string()],
                row_to_metric,
            )
            .optional()
        })
    }
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|v| parse_datetime(&v))
}

fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<TicketRecord> {
    let metadata: HashMap<String, serde_json::Value> = row
        .get::<_, String>(7)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    Ok(TicketRecord {
        id: parse_uuid(row.get::<_, String>(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        priority: TicketPriority::parse(&row.get::<_, String>(3)?)
            .unwrap_or(TicketPriority::Medium),
        status: TicketStatus::parse(&row.get::<_, String>(4)?).unwrap_or(TicketStatus::New),
        source: row.get(5)?,
        customer_id: row.get(6)?,
        metadata,
        level1: row.get(8)?,
        level2: row.get(9)?,
        level3: row.get(10)?,
        classification_confidence: row.get(11)?,
        created_at: parse_datetime(&row.get::<_, String>(12)?),
        updated_at: parse_datetime(&row.get::<_, String>(13)?),
        classified_at: parse_optional_datetime(row.get(14)?),
        resolved_at: parse_optional_datetime(row.get(15)?),
        processing_time_ms: row.get::<_, Option<i64>>(16)?.map(|ms| ms.max(0) as u64),
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<HitlTask> {
    let details: HashMap<String, f64> = row
        .get::<_, String>(10)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    let similar: Vec<SimilarTicketRef> = row
        .get::<_, String>(19)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    Ok(HitlTask {
        id: parse_uuid(row.get::<_, String>(0)?),
        ticket_id: parse_uuid(row.get::<_, String>(1)?),
        ticket_title: row.get(2)?,
        ticket_description: row.get(3)?,
        ticket_source: row.get(4)?,
        ai_level1: row.get(5)?,
        ai_level2: row.get(6)?,
        ai_level3: row.get(7)?,
        ai_confidence: row.get(8)?,
        routing_reason: row.get(9)?,
        confidence_details: details,
        status: HitlStatus::parse(&row.get::<_, String>(11)?).unwrap_or(HitlStatus::Pending),
        priority: HitlPriority::parse(&row.get::<_, String>(12)?).unwrap_or(HitlPriority::Normal),
        created_at: parse_datetime(&row.get::<_, String>(13)?),
        assigned_to: row.get::<_, Option<String>>(14)?.map(parse_uuid),
        assigned_at: parse_optional_datetime(row.get(15)?),
        completed_by: row.get::<_, Option<String>>(16)?.map(parse_uuid),
        completed_at: parse_optional_datetime(row.get(17)?),
        review_time_seconds: row.get::<_, Option<i64>>(18)?.map(|s| s.max(0) as u64),
        similar_tickets: similar,
    })
}

fn row_to_correction(row: &rusqlite::Row) -> rusqlite::Result<HitlCorrection> {
    Ok(HitlCorrection {
        id: parse_uuid(row.get::<_, String>(0)?),
        task_id: parse_uuid(row.get::<_, String>(1)?),
        ticket_id: parse_uuid(row.get::<_, String>(2)?),
        reviewer_id: parse_uuid(row.get::<_, String>(3)?),
        original_level1: row.get(4)?,
        original_level2: row.get(5)?,
        original_level3: row.get(6)?,
        original_confidence: row.get(7)?,
        corrected_level1: row.get(8)?,
        corrected_level2: row.get(9)?,
        corrected_level3: row.get(10)?,
        is_correct: row.get::<_, i64>(11)? != 0,
        notes: row.get(12)?,
        submitted_at: parse_datetime(&row.get::<_, String>(13)?),
        review_time_seconds: row.get::<_, i64>(14)?.max(0) as u64,
        should_update_graph: row.get::<_, i64>(15)? != 0,
        should_retrain_model: row.get::<_, i64>(16)? != 0,
    })
}

fn row_to_metric(row: &rusqlite::Row) -> rusqlite::Result<MetricRecord> {
    Ok(MetricRecord {
        id: parse_uuid(row.get::<_, String>(0)?),
        ticket_id: parse_uuid(row.get::<_, String>(1)?),
        timestamp: parse_datetime(&row.get::<_, String>(2)?),
        level1: row.get(3)?,
        level2: row.get(4)?,
        level3: row.get(5)?,
        graph_confidence: row.get(6)?,
        vector_confidence: row.get(7)?,
        llm_confidence: row.get(8)?,
        final_confidence: row.get(9)?,
        component_agreement: row.get(10)?,
        auto_resolved: row.get::<_, i64>(11)? != 0,
        requires_hitl: row.get::<_, i64>(12)? != 0,
        processing_time_ms: row.get::<_, i64>(13)?.max(0) as u64,
        was_correct: row.get::<_, Option<i64>>(14)?.map(|v| v != 0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_ticket() -> TicketRecord {
        let mut ticket = TicketRecord::new(
            Uuid::new_v4(),
            "Cannot access email",
            "User cannot log in after password reset",
        );
        ticket.priority = TicketPriority::High;
        ticket.source = Some("email".to_string());
        ticket
            .metadata
            .insert("region".to_string(), serde_json::json!("eu-west"));
        ticket
    }

    #[test]
    fn test_ticket_roundtrip() {
        let store = RecordStore::in_memory().unwrap();
        let ticket = sample_ticket();
        store.upsert_ticket(&ticket).unwrap();

        let loaded = store.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(loaded.title, ticket.title);
        assert_eq!(loaded.priority, TicketPriority::High);
        assert_eq!(loaded.status, TicketStatus::New);
        assert_eq!(loaded.metadata["region"], serde_json::json!("eu-west"));
        assert!(loaded.level1.is_none());
    }

    #[test]
    fn test_ticket_classification_update() {
        let store = RecordStore::in_memory().unwrap();
        let ticket = sample_ticket();
        store.upsert_ticket(&ticket).unwrap();

        let path = CategoryPath::new("Technical Support", "Authentication", "Password Reset Issues");
        store
            .update_ticket_classification(ticket.id, &path, 0.91, TicketStatus::Classified, 420)
            .unwrap();

        let loaded = store.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(loaded.status, TicketStatus::Classified);
        assert_eq!(loaded.category_path(), Some(path));
        assert_eq!(loaded.classification_confidence, Some(0.91));
        assert_eq!(loaded.processing_time_ms, Some(420));
        assert!(loaded.classified_at.is_some());
    }

    #[test]
    fn test_ticket_correction_resolves() {
        let store = RecordStore::in_memory().unwrap();
        let ticket = sample_ticket();
        store.upsert_ticket(&ticket).unwrap();

        let corrected = CategoryPath::new("Billing", "Payments", "Failed Transactions");
        store.apply_ticket_correction(ticket.id, &corrected).unwrap();

        let loaded = store.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(loaded.status, TicketStatus::Resolved);
        assert_eq!(loaded.category_path(), Some(corrected));
        assert!(loaded.resolved_at.is_some());
    }

    #[test]
    fn test_task_lifecycle() {
        let store = RecordStore::in_memory().unwrap();
        let reviewer = store.create_reviewer("ana").unwrap();
        let path = CategoryPath::new("A", "B", "C");
        let task = HitlTask::new(Uuid::new_v4(), "t", "d", &path, 0.55, "Low confidence")
            .with_priority(HitlPriority::High)
            .with_similar_tickets(vec![SimilarTicketRef {
                ticket_id: Uuid::new_v4(),
                category: "A > B > C".to_string(),
                similarity: 0.83,
            }]);

        store.create_task(&task).unwrap();

        let pending = store.list_tasks(Some(HitlStatus::Pending), 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].similar_tickets.len(), 1);

        store.assign_task(task.id, reviewer.id).unwrap();
        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.status, HitlStatus::InProgress);
        assert_eq!(loaded.assigned_to, Some(reviewer.id));

        store.complete_task(task.id, reviewer.id, 45).unwrap();
        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.status, HitlStatus::Completed);
        assert_eq!(loaded.review_time_seconds, Some(45));

        assert!(store.list_tasks(Some(HitlStatus::Pending), 10).unwrap().is_empty());
    }

    #[test]
    fn test_correction_stats() {
        let store = RecordStore::in_memory().unwrap();
        let reviewer = store.create_reviewer("bo").unwrap();

        for (i, is_correct) in [true, false, false].iter().enumerate() {
            let correction = HitlCorrection {
                id: Uuid::new_v4(),
                task_id: Uuid::new_v4(),
                ticket_id: Uuid::new_v4(),
                reviewer_id: reviewer.id,
                original_level1: "A".into(),
                original_level2: "B".into(),
                original_level3: "C".into(),
                original_confidence: 0.6,
                corrected_level1: "A".into(),
                corrected_level2: "B".into(),
                corrected_level3: if *is_correct { "C".into() } else { "D".into() },
                is_correct: *is_correct,
                notes: None,
                submitted_at: Utc::now(),
                review_time_seconds: 30 + i as u64 * 30,
                should_update_graph: true,
                should_retrain_model: false,
            };
            store.insert_correction(&correction).unwrap();
        }

        let rate = store.accuracy_rate().unwrap();
        assert!((rate - 1.0 / 3.0).abs() < 1e-9);
        let avg = store.average_review_time().unwrap();
        assert!((avg - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_reviewer_counters() {
        let store = RecordStore::in_memory().unwrap();
        let reviewer = store.create_reviewer("cy").unwrap();

        store.increment_reviewer_counts(reviewer.id, true).unwrap();
        store.increment_reviewer_counts(reviewer.id, false).unwrap();

        let loaded = store.get_reviewer(reviewer.id).unwrap().unwrap();
        assert_eq!(loaded.reviews_completed, 2);
        assert_eq!(loaded.corrections_made, 1);
    }

    #[test]
    fn test_metric_roundtrip_and_backfill() {
        let store = RecordStore::in_memory().unwrap();
        let ticket_id = Uuid::new_v4();

        let metric = MetricRecord {
            id: Uuid::new_v4(),
            ticket_id,
            timestamp: Utc::now(),
            level1: "A".into(),
            level2: "B".into(),
            level3: "C".into(),
            graph_confidence: 0.8,
            vector_confidence: 0.7,
            llm_confidence: 0.9,
            final_confidence: 0.82,
            component_agreement: 1.0,
            auto_resolved: true,
            requires_hitl: false,
            processing_time_ms: 321,
            was_correct: None,
        };
        store.record_metric(&metric).unwrap();

        let loaded = store.metric_for_ticket(ticket_id).unwrap().unwrap();
        assert_eq!(loaded.was_correct, None);
        assert!(loaded.auto_resolved);

        store.set_metric_correctness(ticket_id, false).unwrap();
        let loaded = store.metric_for_ticket(ticket_id).unwrap().unwrap();
        assert_eq!(loaded.was_correct, Some(false));
        // The rest of the row is untouched.
        assert_eq!(loaded.final_confidence, 0.82);
    }
}
