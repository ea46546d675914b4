//! Assembles one archive part from a slice of a tour's media items.
//!
//! The archive is laid out for humans: one folder per floor (zero-padded
//! order prefix), one subfolder per point of interest, photos named by
//! capture date so a plain directory listing reads chronologically.

use crate::models::tour::TourTree;
use crate::storage::BlobStore;
use crate::utils::sanitize_name;
use serde_json::json;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::ops::Range;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const JOB_KIND_FULL: &str = "full";
pub const JOB_KIND_MEDIA_ONLY: &str = "media_only";

/// One archivable item, placed in the deterministic whole-job order that
/// chunk slicing indexes into.
#[derive(Debug, Clone)]
pub struct PlannedItem {
    pub archive_path: String,
    pub blob_path: String,
    floor_idx: usize,
    floor_dir: String,
    point_idx: Option<usize>,
    point_dir: Option<String>,
}

/// Flatten the tree into the canonical item order: per floor (as given),
/// the floor image first (full backups only), then each point's photos.
/// Points are pre-sorted by title and photos chronologically by the tree
/// loader; this function must stay stable across invocations of the same
/// job, since the cursor is just an index into this list.
pub fn plan_items(tree: &TourTree, job_kind: &str) -> Vec<PlannedItem> {
    let mut items = Vec::new();

    for (fi, fnode) in tree.floors.iter().enumerate() {
        let floor_dir = format!("{:02}_{}", fi + 1, sanitize_name(&fnode.floor.name));

        if job_kind != JOB_KIND_MEDIA_ONLY {
            if let Some(image_path) = &fnode.floor.image_path {
                items.push(PlannedItem {
                    archive_path: format!("{}/floorplan.jpg", floor_dir),
                    blob_path: image_path.clone(),
                    floor_idx: fi,
                    floor_dir: floor_dir.clone(),
                    point_idx: None,
                    point_dir: None,
                });
            }
        }

        for (pi, pnode) in fnode.points.iter().enumerate() {
            let point_dir = format!("{}/{}", floor_dir, sanitize_name(&pnode.point.title));
            for (seq, photo) in pnode.photos.iter().enumerate() {
                let date = photo
                    .capture_date
                    .as_deref()
                    .map(|d| sanitize_name(&d.chars().take(10).collect::<String>()))
                    .unwrap_or_else(|| "no-date".into());
                items.push(PlannedItem {
                    archive_path: format!("{}/{}_{:02}.jpg", point_dir, date, seq + 1),
                    blob_path: photo.image_path.clone(),
                    floor_idx: fi,
                    floor_dir: floor_dir.clone(),
                    point_idx: Some(pi),
                    point_dir: Some(point_dir.clone()),
                });
            }
        }
    }

    items
}

pub struct BuiltPart {
    pub bytes: Vec<u8>,
    pub items_count: i64,
}

/// Build the compressed archive for the items in `range`. Unfetchable
/// source images are logged and skipped, and `items_count` reports what
/// actually landed in the archive.
pub fn build_part(
    tree: &TourTree,
    job_kind: &str,
    part_number: i64,
    total_parts: i64,
    range: Range<usize>,
    store: &dyn BlobStore,
) -> anyhow::Result<BuiltPart> {
    let plan = plan_items(tree, job_kind);
    let total_points: usize = tree.floors.iter().map(|f| f.points.len()).sum();
    let total_photos: usize = tree
        .floors
        .iter()
        .flat_map(|f| &f.points)
        .map(|p| p.photos.len())
        .sum();
    let items_in_part = plan
        .iter()
        .enumerate()
        .filter(|(i, _)| range.contains(i))
        .count();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let now = chrono::Utc::now().to_rfc3339();

    let manifest = json!({
        "tour_id": tree.tour.id,
        "tour_title": tree.tour.title,
        "job_kind": job_kind,
        "part_number": part_number,
        "total_parts": total_parts,
        "floors": tree.floors.len(),
        "points": total_points,
        "photos": total_photos,
        "items_total": plan.len(),
        "items_in_part": items_in_part,
        "generated_at": now,
    });
    zip.start_file("manifest.json", options)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;

    let readme = format!(
        "BACKUP PART {} of {}\nTour: {}\nGenerated: {}\n\nItems in this part: {}\n",
        part_number, total_parts, tree.tour.title, now, items_in_part,
    );
    zip.start_file("README.txt", options)?;
    zip.write_all(readme.as_bytes())?;

    let mut floor_manifests: HashSet<usize> = HashSet::new();
    let mut point_manifests: HashSet<(usize, usize)> = HashSet::new();
    let mut embedded: i64 = 0;

    for (i, item) in plan.iter().enumerate() {
        if !range.contains(&i) {
            continue;
        }

        let bytes = match store.get(&item.blob_path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(
                    tour_id = %tree.tour.id,
                    path = %item.blob_path,
                    error = %e,
                    "Skipping unfetchable image"
                );
                continue;
            }
        };

        if floor_manifests.insert(item.floor_idx) {
            let fnode = &tree.floors[item.floor_idx];
            let floor_json = json!({
                "name": fnode.floor.name,
                "display_order": fnode.floor.display_order,
                "points": fnode.points.len(),
            });
            zip.start_file(format!("{}/floor.json", item.floor_dir), options)?;
            zip.write_all(&serde_json::to_vec_pretty(&floor_json)?)?;
        }

        if let (Some(pi), Some(point_dir)) = (item.point_idx, &item.point_dir) {
            if point_manifests.insert((item.floor_idx, pi)) {
                let pnode = &tree.floors[item.floor_idx].points[pi];
                let point_json = json!({
                    "title": pnode.point.title,
                    "photos": pnode.photos.len(),
                });
                zip.start_file(format!("{}/point.json", point_dir), options)?;
                zip.write_all(&serde_json::to_vec_pretty(&point_json)?)?;
            }
        }

        zip.start_file(item.archive_path.as_str(), options)?;
        zip.write_all(&bytes)?;
        embedded += 1;
    }

    let cursor = zip.finish()?;
    Ok(BuiltPart {
        bytes: cursor.into_inner(),
        items_count: embedded,
    })
}
