use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPart {
    pub id: String,
    pub backup_job_id: String,
    pub part_number: i64,
    pub storage_path: Option<String>,
    pub file_url: Option<String>,
    pub file_size: i64,
    pub file_hash: Option<String>,
    pub items_count: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

fn row_to_part(row: &Row) -> rusqlite::Result<BackupPart> {
    Ok(BackupPart {
        id: row.get("id")?,
        backup_job_id: row.get("backup_job_id")?,
        part_number: row.get("part_number")?,
        storage_path: row.get("storage_path")?,
        file_url: row.get("file_url")?,
        file_size: row.get("file_size")?,
        file_hash: row.get("file_hash")?,
        items_count: row.get("items_count")?,
        status: row.get("status")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
    })
}

pub struct RecordPartData {
    pub part_number: i64,
    pub storage_path: String,
    pub file_url: String,
    pub file_size: i64,
    pub file_hash: String,
    pub items_count: i64,
}

/// Record a completed part. Upsert on (job, part_number): re-processing a
/// chunk after a crash overwrites the earlier record instead of growing a
/// duplicate row, so completion counting stays exact.
pub fn record_completed(
    conn: &Connection,
    backup_job_id: &str,
    data: &RecordPartData,
) -> anyhow::Result<BackupPart> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO backup_parts
           (id, backup_job_id, part_number, storage_path, file_url, file_size, file_hash,
            items_count, status, created_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'completed', ?9, ?9)
         ON CONFLICT(backup_job_id, part_number) DO UPDATE SET
           storage_path = excluded.storage_path,
           file_url = excluded.file_url,
           file_size = excluded.file_size,
           file_hash = excluded.file_hash,
           items_count = excluded.items_count,
           status = 'completed',
           error_message = NULL,
           completed_at = excluded.completed_at",
        params![
            Uuid::new_v4().to_string(),
            backup_job_id,
            data.part_number,
            data.storage_path,
            data.file_url,
            data.file_size,
            data.file_hash,
            data.items_count,
            now,
        ],
    )?;
    find_by_part_number(conn, backup_job_id, data.part_number)?
        .ok_or_else(|| anyhow::anyhow!("Failed to retrieve recorded part"))
}

pub fn find_by_part_number(
    conn: &Connection,
    backup_job_id: &str,
    part_number: i64,
) -> anyhow::Result<Option<BackupPart>> {
    let mut stmt =
        conn.prepare("SELECT * FROM backup_parts WHERE backup_job_id = ? AND part_number = ?")?;
    let mut rows = stmt.query_map(params![backup_job_id, part_number], row_to_part)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

pub fn find_by_job_id(conn: &Connection, backup_job_id: &str) -> anyhow::Result<Vec<BackupPart>> {
    let mut stmt =
        conn.prepare("SELECT * FROM backup_parts WHERE backup_job_id = ? ORDER BY part_number")?;
    let rows = stmt.query_map(params![backup_job_id], row_to_part)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub struct PartAggregate {
    pub completed_parts: i64,
    pub total_size: i64,
    pub total_items: i64,
}

pub fn aggregate_completed(conn: &Connection, backup_job_id: &str) -> anyhow::Result<PartAggregate> {
    let (completed_parts, total_size, total_items) = conn.query_row(
        "SELECT COUNT(DISTINCT part_number),
                COALESCE(SUM(file_size), 0),
                COALESCE(SUM(items_count), 0)
         FROM backup_parts
         WHERE backup_job_id = ? AND status = 'completed'",
        params![backup_job_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(PartAggregate {
        completed_parts,
        total_size,
        total_items,
    })
}
