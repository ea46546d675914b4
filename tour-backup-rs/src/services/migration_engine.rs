//! Safe schema migration against a target SQLite database.
//!
//! The sequence is snapshot, validate, execute, verify, and on failure a
//! best-effort restore from the in-memory snapshot. Everything here is
//! synchronous; callers run it on a blocking task. A process-wide lock
//! per target path keeps two migrations from interleaving on one file.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Core tables snapshotted before execution and verified after.
pub const SNAPSHOT_TABLES: &[&str] = &[
    "tours",
    "floors",
    "points",
    "photos",
    "backup_jobs",
    "backup_queue",
    "backup_parts",
];

const CHECKPOINT_INTERVAL: usize = 100;
/// Abort once more than this share of statements has failed.
const MAX_ERROR_RATIO: f64 = 0.10;
const MAX_REPORTED_ERRORS: usize = 10;
const MAX_ERROR_DETAIL_CHARS: usize = 100;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationRequest {
    pub target_db_path: String,
    pub sql: String,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct MigrationStats {
    pub total_statements: usize,
    pub successful: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RollbackReport {
    pub performed: bool,
    pub tables_restored: usize,
    pub records_restored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MigrationReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: MigrationStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackReport>,
    pub log: Vec<String>,
    pub critical_failure: bool,
}

pub struct TableSnapshot {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub struct TargetSnapshot {
    pub taken_at: String,
    pub total_records: usize,
    pub tables: Vec<TableSnapshot>,
}

/// One lock per target path, process wide. Created on first use and kept
/// for the process lifetime; the set of target paths is small.
fn target_lock(path: &str) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = locks.lock().unwrap_or_else(|e| e.into_inner());
    map.entry(path.to_string()).or_default().clone()
}

fn log_line(log: &mut Vec<String>, message: String) {
    tracing::info!("[MIGRATION] {}", message);
    log.push(message);
}

/// Split raw migration SQL into executable statements: one per `;`,
/// comment-only lines stripped, empties dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn run_safe_migration(req: &MigrationRequest) -> MigrationReport {
    let lock = target_lock(&req.target_db_path);
    let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

    let mut log = Vec::new();
    let mut stats = MigrationStats::default();
    log_line(
        &mut log,
        format!("Starting safe migration against {}", req.target_db_path),
    );

    let statements = split_statements(&req.sql);
    stats.total_statements = statements.len();
    if statements.is_empty() {
        return MigrationReport {
            success: false,
            message: "Migration contains no executable statements".into(),
            error: Some("Empty migration SQL".into()),
            stats,
            rollback: None,
            log,
            critical_failure: false,
        };
    }
    log_line(&mut log, format!("Parsed {} statements", statements.len()));

    let conn = match Connection::open(&req.target_db_path) {
        Ok(conn) => conn,
        Err(e) => {
            return MigrationReport {
                success: false,
                message: "Could not open target database".into(),
                error: Some(e.to_string()),
                stats,
                rollback: None,
                log,
                critical_failure: false,
            };
        }
    };

    if let Err(e) = validate_target(&conn) {
        return MigrationReport {
            success: false,
            message: "Target database failed pre-migration validation".into(),
            error: Some(format!("{:#}", e)),
            stats,
            rollback: None,
            log,
            critical_failure: false,
        };
    }
    log_line(&mut log, "Target database validated".into());

    let snapshot = if req.create_backup {
        match take_snapshot(&conn, &mut log) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                // Nothing has been changed yet, so failing here is safe.
                return MigrationReport {
                    success: false,
                    message: "Snapshot failed, aborting before any changes".into(),
                    error: Some(format!("{:#}", e)),
                    stats,
                    rollback: None,
                    log,
                    critical_failure: false,
                };
            }
        }
    } else {
        log_line(&mut log, "Snapshot skipped by request".into());
        None
    };

    let executed = execute_statements(&conn, &statements, &mut stats, &mut log);
    let verified = executed.and_then(|_| verify_target(&conn, snapshot.as_ref(), &mut log));

    match verified {
        Ok(()) => MigrationReport {
            success: true,
            message: format!(
                "Migration completed: {} of {} statements succeeded ({} errors)",
                stats.successful, stats.total_statements, stats.errors
            ),
            error: None,
            stats,
            rollback: None,
            log,
            critical_failure: false,
        },
        Err(e) => {
            let error = format!("{:#}", e);
            log_line(&mut log, format!("Migration failed: {}", error));
            let (rollback, rollback_clean) = match &snapshot {
                Some(snapshot) => perform_rollback(&conn, snapshot, &mut log),
                None => (
                    RollbackReport {
                        performed: false,
                        tables_restored: 0,
                        records_restored: 0,
                        reason: Some("No snapshot was taken".into()),
                    },
                    false,
                ),
            };

            let critical_failure = !rollback.performed || !rollback_clean;
            let message = if rollback.performed && rollback_clean {
                "Migration failed and was rolled back".into()
            } else if rollback.performed {
                "Migration failed and rollback was only partial".into()
            } else {
                "Migration failed and could not be rolled back".into()
            };
            MigrationReport {
                success: false,
                message,
                error: Some(error),
                stats,
                rollback: Some(rollback),
                log,
                critical_failure,
            }
        }
    }
}

fn validate_target(conn: &Connection) -> anyhow::Result<()> {
    let ok: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
    anyhow::ensure!(ok == 1, "Target database did not answer a trivial query");
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn take_snapshot(conn: &Connection, log: &mut Vec<String>) -> anyhow::Result<TargetSnapshot> {
    let mut tables = Vec::new();
    let mut total_records = 0;

    for name in SNAPSHOT_TABLES {
        if !table_exists(conn, name)? {
            continue;
        }
        let mut stmt = conn.prepare(&format!("SELECT * FROM {}", name))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let rows: Vec<Vec<Value>> = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        total_records += rows.len();
        tables.push(TableSnapshot {
            name: name.to_string(),
            columns,
            rows,
        });
    }

    log_line(
        log,
        format!(
            "Snapshot taken: {} tables, {} records",
            tables.len(),
            total_records
        ),
    );
    Ok(TargetSnapshot {
        taken_at: chrono::Utc::now().to_rfc3339(),
        total_records,
        tables,
    })
}

fn execute_statements(
    conn: &Connection,
    statements: &[String],
    stats: &mut MigrationStats,
    log: &mut Vec<String>,
) -> anyhow::Result<()> {
    let total = statements.len();
    for (i, statement) in statements.iter().enumerate() {
        match conn.execute_batch(statement) {
            Ok(()) => stats.successful += 1,
            Err(e) => {
                stats.errors += 1;
                if stats.error_details.len() < MAX_REPORTED_ERRORS {
                    let detail: String = format!("Statement {}: {}", i + 1, e)
                        .chars()
                        .take(MAX_ERROR_DETAIL_CHARS)
                        .collect();
                    stats.error_details.push(detail);
                }
                if stats.errors as f64 > total as f64 * MAX_ERROR_RATIO {
                    anyhow::bail!(
                        "Error rate exceeded {:.0}%: {} of {} statements failed",
                        MAX_ERROR_RATIO * 100.0,
                        stats.errors,
                        total
                    );
                }
            }
        }
        if (i + 1) % CHECKPOINT_INTERVAL == 0 {
            log_line(log, format!("Checkpoint: {} of {} statements executed", i + 1, total));
        }
    }
    log_line(
        log,
        format!("Executed {} statements, {} errors", stats.successful, stats.errors),
    );
    Ok(())
}

/// Post-migration sanity check: every snapshotted table must still be
/// queryable. Counts are logged but not compared, since a legitimate
/// migration may add or delete rows.
fn verify_target(
    conn: &Connection,
    snapshot: Option<&TargetSnapshot>,
    log: &mut Vec<String>,
) -> anyhow::Result<()> {
    let names: Vec<String> = match snapshot {
        Some(snapshot) => snapshot.tables.iter().map(|t| t.name.clone()).collect(),
        None => {
            let mut existing = Vec::new();
            for name in SNAPSHOT_TABLES {
                if table_exists(conn, name)? {
                    existing.push(name.to_string());
                }
            }
            existing
        }
    };

    for name in &names {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", name), [], |row| row.get(0))
            .map_err(|e| anyhow::anyhow!("Table {} failed verification: {}", name, e))?;
        log_line(log, format!("Verified table {}: {} records", name, count));
    }
    Ok(())
}

/// Restore every snapshotted table, continuing past individual failures
/// so one broken table does not block restoring the rest. The boolean is
/// true only when every table came back.
fn perform_rollback(
    conn: &Connection,
    snapshot: &TargetSnapshot,
    log: &mut Vec<String>,
) -> (RollbackReport, bool) {
    log_line(
        log,
        format!("Rolling back from snapshot taken at {}", snapshot.taken_at),
    );

    let mut tables_restored = 0;
    let mut records_restored = 0;
    let mut first_error: Option<String> = None;

    for table in &snapshot.tables {
        match restore_table(conn, table) {
            Ok(records) => {
                tables_restored += 1;
                records_restored += records;
                log_line(log, format!("Restored table {}: {} records", table.name, records));
            }
            Err(e) => {
                tracing::error!(table = %table.name, error = %e, "Rollback failed for table");
                log_line(log, format!("Failed to restore table {}: {}", table.name, e));
                if first_error.is_none() {
                    first_error = Some(format!("Table {}: {}", table.name, e));
                }
            }
        }
    }

    let clean = first_error.is_none();
    (
        RollbackReport {
            performed: tables_restored > 0,
            tables_restored,
            records_restored,
            reason: first_error,
        },
        clean,
    )
}

fn restore_table(conn: &Connection, table: &TableSnapshot) -> anyhow::Result<usize> {
    conn.execute(&format!("DELETE FROM {}", table.name), [])?;
    if table.rows.is_empty() {
        return Ok(0);
    }

    let placeholders = vec!["?"; table.columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        table.columns.join(", "),
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    for row in &table.rows {
        stmt.execute(params_from_iter(row.iter()))?;
    }
    Ok(table.rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch_db() -> (TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.db").to_string_lossy().into_owned();
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE tours (id TEXT PRIMARY KEY, title TEXT NOT NULL);
             INSERT INTO tours VALUES ('t1', 'Alpha'), ('t2', 'Beta');",
        )
        .unwrap();
        (dir, path)
    }

    fn tour_titles(path: &str) -> Vec<String> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn.prepare("SELECT title FROM tours ORDER BY id").unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn split_drops_comments_and_empties() {
        let sql = "-- header comment\nCREATE TABLE a (x);\n\n-- another\nINSERT INTO a VALUES (1);\n;;";
        let statements = split_statements(sql);
        assert_eq!(statements, vec!["CREATE TABLE a (x)", "INSERT INTO a VALUES (1)"]);
    }

    #[test]
    fn successful_migration_reports_stats() {
        let (_dir, path) = scratch_db();
        let report = run_safe_migration(&MigrationRequest {
            target_db_path: path.clone(),
            sql: "ALTER TABLE tours ADD COLUMN notes TEXT;
                  UPDATE tours SET notes = 'migrated';"
                .into(),
            create_backup: true,
        });

        assert!(report.success);
        assert!(!report.critical_failure);
        assert!(report.rollback.is_none());
        assert_eq!(report.stats.total_statements, 2);
        assert_eq!(report.stats.successful, 2);
        assert_eq!(report.stats.errors, 0);
        assert!(!report.log.is_empty());
    }

    #[test]
    fn tolerates_errors_under_threshold() {
        let (_dir, path) = scratch_db();
        // 20 statements, 2 failures: exactly the 10% threshold, allowed
        let mut sql = String::new();
        for i in 0..18 {
            sql.push_str(&format!("UPDATE tours SET title = 'v{}' WHERE id = 't1';\n", i));
        }
        sql.push_str("THIS IS NOT SQL;\nNEITHER IS THIS;\n");

        let report = run_safe_migration(&MigrationRequest {
            target_db_path: path,
            sql,
            create_backup: true,
        });

        assert!(report.success);
        assert_eq!(report.stats.total_statements, 20);
        assert_eq!(report.stats.successful, 18);
        assert_eq!(report.stats.errors, 2);
        assert_eq!(report.stats.error_details.len(), 2);
    }

    #[test]
    fn excessive_errors_trigger_rollback() {
        let (_dir, path) = scratch_db();
        let report = run_safe_migration(&MigrationRequest {
            target_db_path: path.clone(),
            sql: "UPDATE tours SET title = 'wrecked';\nTHIS IS NOT SQL;".into(),
            create_backup: true,
        });

        assert!(!report.success);
        assert!(!report.critical_failure);
        let rollback = report.rollback.unwrap();
        assert!(rollback.performed);
        assert_eq!(rollback.tables_restored, 1);
        assert_eq!(rollback.records_restored, 2);

        // Pre-migration contents are back.
        assert_eq!(tour_titles(&path), vec!["Alpha", "Beta"]);
    }

    #[test]
    fn failure_without_snapshot_is_critical() {
        let (_dir, path) = scratch_db();
        let report = run_safe_migration(&MigrationRequest {
            target_db_path: path.clone(),
            sql: "UPDATE tours SET title = 'wrecked';\nTHIS IS NOT SQL;".into(),
            create_backup: false,
        });

        assert!(!report.success);
        assert!(report.critical_failure);
        let rollback = report.rollback.unwrap();
        assert!(!rollback.performed);
        assert!(rollback.reason.is_some());

        // Without a snapshot the partial write sticks.
        assert_eq!(tour_titles(&path), vec!["wrecked", "wrecked"]);
    }

    #[test]
    fn empty_sql_is_rejected_before_touching_the_target() {
        let (_dir, path) = scratch_db();
        let report = run_safe_migration(&MigrationRequest {
            target_db_path: path,
            sql: "-- nothing but comments\n;".into(),
            create_backup: true,
        });
        assert!(!report.success);
        assert!(!report.critical_failure);
        assert_eq!(report.stats.total_statements, 0);
    }

    #[test]
    fn snapshot_restores_exact_rows() {
        let (_dir, path) = scratch_db();
        let conn = Connection::open(&path).unwrap();
        let mut log = Vec::new();
        let snapshot = take_snapshot(&conn, &mut log).unwrap();
        assert_eq!(snapshot.total_records, 2);

        conn.execute("DELETE FROM tours", []).unwrap();
        let (report, clean) = perform_rollback(&conn, &snapshot, &mut log);
        assert!(clean);
        assert!(report.performed);
        assert_eq!(report.records_restored, 2);
        drop(conn);
        assert_eq!(tour_titles(&path), vec!["Alpha", "Beta"]);
    }
}
