//! Shared fixtures for service tests: a fully migrated on-disk database
//! and an [`AppState`] rooted in a temp directory.

use crate::config::AppConfig;
use crate::db::{connection, migrate};
use crate::models::{backup_job, backup_queue, tour};
use crate::state::AppState;
use std::sync::Arc;
use tempfile::TempDir;

pub fn test_config(dir: &TempDir) -> AppConfig {
    AppConfig {
        port: 0,
        data_dir: dir.path().to_path_buf(),
        db_path: dir.path().join("test.db"),
        storage_dir: dir.path().join("storage"),
        public_base_url: "http://localhost:3000".into(),
        url_signing_secret: "test-secret".into(),
        signed_url_ttl_secs: 3600,
        items_per_part: 5,
        dispatch_batch: 1,
        default_max_attempts: 3,
        retry_base_secs: 300,
        retry_cap_secs: 3600,
        stuck_timeout_secs: 1800,
        reaper_interval_secs: 300,
        cloud_sync_url: None,
    }
}

/// Keep the returned `TempDir` alive for the duration of the test.
pub fn test_state() -> (Arc<AppState>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    std::fs::create_dir_all(&config.storage_dir).unwrap();
    let pool = connection::create_pool(&config.db_path);
    migrate::migrate(&pool).unwrap();
    (Arc::new(AppState::new(pool, config)), dir)
}

/// Seed a tour with a single floor (no floorplan image) holding one point
/// with `photo_count` photos, and write a blob for each photo so archive
/// builds find their sources.
pub fn seed_tour(state: &AppState, photo_count: usize) -> tour::Tour {
    let photos = (0..photo_count)
        .map(|i| tour::CreatePhotoRequest {
            image_path: format!("img/photo_{:03}.jpg", i),
            capture_date: None,
            display_order: i as i64,
        })
        .collect();

    let request = tour::CreateTourRequest {
        owner_id: "owner-1".into(),
        title: "Test Tour".into(),
        description: None,
        floors: vec![tour::CreateFloorRequest {
            name: "Main Floor".into(),
            display_order: 0,
            image_path: None,
            points: vec![tour::CreatePointRequest {
                title: "Entrance".into(),
                photos,
            }],
        }],
    };

    for i in 0..photo_count {
        state
            .blob
            .put(&format!("img/photo_{:03}.jpg", i), b"jpeg-bytes")
            .unwrap();
    }

    let conn = state.db.get().unwrap();
    tour::create(&conn, &request).unwrap()
}

/// Create a queued backup job for `tour` sized from its current tree.
pub fn seed_job(
    state: &AppState,
    tour: &tour::Tour,
    job_kind: &str,
) -> (backup_job::BackupJob, backup_queue::QueueEntry) {
    let conn = state.db.get().unwrap();
    let tree = tour::find_tree(&conn, &tour.id).unwrap().unwrap();
    let total_items = crate::services::part_builder::plan_items(&tree, job_kind).len() as i64;
    let job = backup_job::create(
        &conn,
        &backup_job::CreateBackupJobData {
            tour_id: tour.id.clone(),
            owner_id: tour.owner_id.clone(),
            job_kind: job_kind.into(),
            total_items,
        },
    )
    .unwrap();
    let entry = backup_queue::create(&conn, &job.id, 0, state.config.default_max_attempts).unwrap();
    (job, entry)
}
