use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The scheduling record, one per backup job. The entry, not the job,
/// is what the dispatcher claims, retries, and fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub backup_job_id: String,
    pub status: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub priority: i64,
    pub scheduled_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
}

fn row_to_entry(row: &Row) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        id: row.get("id")?,
        backup_job_id: row.get("backup_job_id")?,
        status: row.get("status")?,
        attempts: row.get("attempts")?,
        max_attempts: row.get("max_attempts")?,
        priority: row.get("priority")?,
        scheduled_at: row.get("scheduled_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create(
    conn: &Connection,
    backup_job_id: &str,
    priority: i64,
    max_attempts: i64,
) -> anyhow::Result<QueueEntry> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO backup_queue (id, backup_job_id, priority, max_attempts, scheduled_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, backup_job_id, priority, max_attempts, now, now],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created queue entry"))
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<QueueEntry>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_queue WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_entry)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

pub fn find_by_job_id(conn: &Connection, backup_job_id: &str) -> anyhow::Result<Option<QueueEntry>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_queue WHERE backup_job_id = ? ORDER BY created_at DESC",
    )?;
    let mut rows = stmt.query_map(params![backup_job_id], row_to_entry)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

/// Entries eligible for dispatch: pending or retry, due now or earlier,
/// highest priority first, oldest schedule first.
pub fn find_eligible(conn: &Connection, limit: usize) -> anyhow::Result<Vec<QueueEntry>> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_queue
         WHERE status IN ('pending', 'retry') AND scheduled_at <= ?
         ORDER BY priority DESC, scheduled_at ASC
         LIMIT ?",
    )?;
    let rows = stmt.query_map(params![now, limit as i64], row_to_entry)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Atomically claim an entry for processing. The status guard makes the
/// transition conditional: a second dispatcher racing on the same entry
/// updates zero rows and gets `false`.
pub fn claim(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let now = chrono::Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE backup_queue
         SET status = 'processing', started_at = ?, attempts = attempts + 1
         WHERE id = ? AND status IN ('pending', 'retry')",
        params![now, id],
    )?;
    Ok(changed == 1)
}

pub fn mark_completed(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_queue SET status = 'completed', completed_at = ? WHERE id = ?",
        params![chrono::Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_queue SET status = 'failed', error_message = ?, completed_at = ? WHERE id = ?",
        params![error, chrono::Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

pub fn schedule_retry(
    conn: &Connection,
    id: &str,
    error: &str,
    scheduled_at: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_queue SET status = 'retry', error_message = ?, scheduled_at = ? WHERE id = ?",
        params![error, scheduled_at, id],
    )?;
    Ok(())
}

/// Reset entries stuck in `processing` since before `cutoff` back to
/// retryable. Attempts are deliberately left untouched: a crashed worker
/// is not the job's fault.
pub fn reset_stuck(conn: &Connection, cutoff: &str) -> anyhow::Result<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE backup_queue
         SET status = 'retry', error_message = 'Timeout - reset for retry', scheduled_at = ?
         WHERE status = 'processing' AND started_at < ?",
        params![now, cutoff],
    )?;
    Ok(changed)
}
