use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: String,
    pub tour_id: String,
    pub owner_id: String,
    pub job_kind: String,
    pub status: String,
    pub total_items: i64,
    pub processed_items: i64,
    pub progress_percentage: i64,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub metadata: String, // JSON stored as text
    pub storage_path: Option<String>,
    pub file_url: Option<String>,
    pub file_size: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

/// Multipart progress carried in the `metadata` JSON column. The cursor
/// (`current_part`) is persisted before the next chunk is scheduled, which
/// is what makes a crashed job resumable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub multipart: bool,
    #[serde(default)]
    pub current_part: i64,
    #[serde(default)]
    pub total_parts: i64,
    #[serde(default)]
    pub items_per_part: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_part_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl BackupJob {
    pub fn parsed_metadata(&self) -> JobMetadata {
        serde_json::from_str(&self.metadata).unwrap_or_default()
    }
}

fn row_to_job(row: &Row) -> rusqlite::Result<BackupJob> {
    Ok(BackupJob {
        id: row.get("id")?,
        tour_id: row.get("tour_id")?,
        owner_id: row.get("owner_id")?,
        job_kind: row.get("job_kind")?,
        status: row.get("status")?,
        total_items: row.get("total_items")?,
        processed_items: row.get("processed_items")?,
        progress_percentage: row.get("progress_percentage")?,
        retry_count: row.get("retry_count")?,
        last_error: row.get("last_error")?,
        metadata: row.get("metadata")?,
        storage_path: row.get("storage_path")?,
        file_url: row.get("file_url")?,
        file_size: row.get("file_size")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

pub fn find_all(conn: &Connection) -> anyhow::Result<Vec<BackupJob>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_jobs ORDER BY created_at DESC")?;
    let rows = stmt.query_map([], row_to_job)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<BackupJob>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_jobs WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_job)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

pub struct CreateBackupJobData {
    pub tour_id: String,
    pub owner_id: String,
    pub job_kind: String,
    pub total_items: i64,
}

pub fn create(conn: &Connection, data: &CreateBackupJobData) -> anyhow::Result<BackupJob> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO backup_jobs (id, tour_id, owner_id, job_kind, total_items, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, '{}', ?6, ?7)",
        params![id, data.tour_id, data.owner_id, data.job_kind, data.total_items, now, now],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created job"))
}

pub fn update_status(conn: &Connection, id: &str, status: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_jobs SET status = ?, updated_at = ? WHERE id = ?",
        params![status, chrono::Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

pub fn update_metadata(conn: &Connection, id: &str, metadata: &JobMetadata) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_jobs SET metadata = ?, updated_at = ? WHERE id = ?",
        params![serde_json::to_string(metadata)?, chrono::Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

pub fn update_progress(
    conn: &Connection,
    id: &str,
    processed_items: i64,
    progress_percentage: i64,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_jobs SET processed_items = ?, progress_percentage = ?, updated_at = ? WHERE id = ?",
        params![processed_items, progress_percentage, chrono::Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

pub struct CompletionData {
    pub storage_path: String,
    pub file_url: String,
    pub file_size: i64,
    pub processed_items: i64,
}

pub fn mark_completed(
    conn: &Connection,
    id: &str,
    data: &CompletionData,
    metadata: &JobMetadata,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE backup_jobs
         SET status = 'completed', progress_percentage = 100, processed_items = ?,
             storage_path = ?, file_url = ?, file_size = ?, metadata = ?,
             completed_at = ?, updated_at = ?
         WHERE id = ?",
        params![
            data.processed_items,
            data.storage_path,
            data.file_url,
            data.file_size,
            serde_json::to_string(metadata)?,
            now,
            now,
            id,
        ],
    )?;
    Ok(())
}

pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> anyhow::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE backup_jobs
         SET status = 'failed', last_error = ?, retry_count = retry_count + 1,
             completed_at = ?, updated_at = ?
         WHERE id = ?",
        params![error, now, now, id],
    )?;
    Ok(())
}
