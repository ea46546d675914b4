use crate::db::connection::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tours (
  id TEXT PRIMARY KEY,
  owner_id TEXT NOT NULL,
  title TEXT NOT NULL,
  description TEXT,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS floors (
  id TEXT PRIMARY KEY,
  tour_id TEXT NOT NULL REFERENCES tours(id) ON DELETE CASCADE,
  name TEXT NOT NULL,
  display_order INTEGER NOT NULL DEFAULT 0,
  image_path TEXT,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS points (
  id TEXT PRIMARY KEY,
  floor_id TEXT NOT NULL REFERENCES floors(id) ON DELETE CASCADE,
  title TEXT NOT NULL,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS photos (
  id TEXT PRIMARY KEY,
  point_id TEXT NOT NULL REFERENCES points(id) ON DELETE CASCADE,
  image_path TEXT NOT NULL,
  capture_date TEXT,
  display_order INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS backup_jobs (
  id TEXT PRIMARY KEY,
  tour_id TEXT NOT NULL REFERENCES tours(id) ON DELETE CASCADE,
  owner_id TEXT NOT NULL,
  job_kind TEXT NOT NULL DEFAULT 'full' CHECK(job_kind IN ('full','media_only')),
  status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','processing','completed','failed')),
  total_items INTEGER NOT NULL DEFAULT 0,
  processed_items INTEGER NOT NULL DEFAULT 0,
  progress_percentage INTEGER NOT NULL DEFAULT 0,
  retry_count INTEGER NOT NULL DEFAULT 0,
  last_error TEXT,
  metadata TEXT NOT NULL DEFAULT '{}',
  storage_path TEXT,
  file_url TEXT,
  file_size INTEGER,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now')),
  completed_at TEXT
);

CREATE TABLE IF NOT EXISTS backup_queue (
  id TEXT PRIMARY KEY,
  backup_job_id TEXT NOT NULL REFERENCES backup_jobs(id) ON DELETE CASCADE,
  status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','processing','retry','completed','failed')),
  attempts INTEGER NOT NULL DEFAULT 0,
  max_attempts INTEGER NOT NULL DEFAULT 3,
  priority INTEGER NOT NULL DEFAULT 5,
  scheduled_at TEXT NOT NULL,
  started_at TEXT,
  completed_at TEXT,
  error_message TEXT,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS backup_parts (
  id TEXT PRIMARY KEY,
  backup_job_id TEXT NOT NULL REFERENCES backup_jobs(id) ON DELETE CASCADE,
  part_number INTEGER NOT NULL,
  storage_path TEXT,
  file_url TEXT,
  file_size INTEGER NOT NULL DEFAULT 0,
  file_hash TEXT,
  items_count INTEGER NOT NULL DEFAULT 0,
  status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','completed','failed')),
  error_message TEXT,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  completed_at TEXT,
  UNIQUE(backup_job_id, part_number)
);

CREATE INDEX IF NOT EXISTS idx_backup_queue_status ON backup_queue(status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_backup_parts_job_id ON backup_parts(backup_job_id);
CREATE INDEX IF NOT EXISTS idx_floors_tour_id ON floors(tour_id);
CREATE INDEX IF NOT EXISTS idx_photos_point_id ON photos(point_id);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    // Idempotent migrations for existing databases
    let has_column = |table: &str, column: &str| -> bool {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        columns.contains(&column.to_string())
    };

    // photos migrations
    if !has_column("photos", "display_order") {
        conn.execute_batch("ALTER TABLE photos ADD COLUMN display_order INTEGER NOT NULL DEFAULT 0")?;
    }

    // backup_jobs migrations
    if !has_column("backup_jobs", "file_size") {
        conn.execute_batch("ALTER TABLE backup_jobs ADD COLUMN file_size INTEGER")?;
    }
    if !has_column("backup_jobs", "job_kind") {
        conn.execute_batch(
            "ALTER TABLE backup_jobs ADD COLUMN job_kind TEXT NOT NULL DEFAULT 'full'",
        )?;
    }

    // backup_queue migrations
    if !has_column("backup_queue", "priority") {
        conn.execute_batch("ALTER TABLE backup_queue ADD COLUMN priority INTEGER NOT NULL DEFAULT 5")?;
    }

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
