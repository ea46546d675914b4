//! Persists built archive parts to blob storage and issues download links.

use crate::models::backup_job::BackupJob;
use crate::storage::{content_fingerprint, BlobStore, UrlSigner};
use crate::utils::sanitize_name;

pub struct UploadedPart {
    pub storage_path: String,
    pub file_url: String,
    pub file_size: i64,
    pub file_hash: String,
}

/// Write one part under `{owner}/{job}/` with a zero-padded 3-digit part
/// suffix so parts sort lexicographically. The object name carries an
/// upload timestamp: re-uploading the same part after a crash writes a
/// fresh object rather than failing, at the cost of a leaked blob that
/// retention sweeps later.
pub fn upload_part(
    store: &dyn BlobStore,
    signer: &UrlSigner,
    job: &BackupJob,
    tour_title: &str,
    part_number: i64,
    url_ttl_secs: i64,
    bytes: &[u8],
) -> anyhow::Result<UploadedPart> {
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
    let safe_title = sanitize_name(tour_title);
    let filename = format!("{}_backup_{}.zip.{:03}", safe_title, timestamp, part_number);
    let storage_path = format!("{}/{}/{}", job.owner_id, job.id, filename);

    store.put(&storage_path, bytes)?;

    let file_hash = content_fingerprint(bytes);
    let file_url = signer.signed_download_url(&storage_path, &filename, url_ttl_secs);

    tracing::info!(
        job_id = %job.id,
        part_number,
        size = bytes.len(),
        path = %storage_path,
        "Uploaded backup part"
    );

    if part_number == 1 {
        write_merge_companions(store, job, &safe_title)?;
    }

    Ok(UploadedPart {
        storage_path,
        file_url,
        file_size: bytes.len() as i64,
        file_hash,
    })
}

/// Helper scripts for reassembling a multipart backup, written once per
/// job next to the parts. Usability aid only.
fn write_merge_companions(
    store: &dyn BlobStore,
    job: &BackupJob,
    safe_title: &str,
) -> anyhow::Result<()> {
    let prefix = format!("{}/{}", job.owner_id, job.id);
    let merged = format!("{}_backup_full.zip", safe_title);

    let sh = format!(
        "#!/bin/sh\n\
         # Concatenate all downloaded parts back into a single archive.\n\
         # Run from the directory containing the .zip.NNN files.\n\
         cat {}_backup_*.zip.* > {}\n\
         echo \"Merged into {}\"\n",
        safe_title, merged, merged,
    );
    store.put(&format!("{}/merge_backup.sh", prefix), sh.as_bytes())?;

    let bat = format!(
        "@echo off\r\n\
         rem Concatenate all downloaded parts back into a single archive.\r\n\
         copy /b {}_backup_*.zip.* {}\r\n\
         echo Merged into {}\r\n",
        safe_title, merged, merged,
    );
    store.put(&format!("{}/merge_backup.bat", prefix), bat.as_bytes())?;

    let instructions = format!(
        "This backup was produced in multiple parts.\n\n\
         1. Download every file ending in .zip.001, .zip.002, ...\n\
         2. Put them in one directory together with merge_backup.sh (Linux/macOS)\n\
            or merge_backup.bat (Windows).\n\
         3. Run the merge script. It produces {}.\n\
         4. Extract {} with any ZIP tool.\n",
        merged, merged,
    );
    store.put(
        &format!("{}/INSTRUCTIONS.txt", prefix),
        instructions.as_bytes(),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalBlobStore, UrlSigner};

    fn test_job() -> BackupJob {
        BackupJob {
            id: "job-1".into(),
            tour_id: "tour-1".into(),
            owner_id: "owner-1".into(),
            job_kind: "full".into(),
            status: "processing".into(),
            total_items: 10,
            processed_items: 0,
            progress_percentage: 0,
            retry_count: 0,
            last_error: None,
            metadata: "{}".into(),
            storage_path: None,
            file_url: None,
            file_size: None,
            created_at: String::new(),
            updated_at: String::new(),
            completed_at: None,
        }
    }

    #[test]
    fn writes_part_under_padded_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let signer = UrlSigner::new("http://localhost:3000", "secret");

        let uploaded =
            upload_part(&store, &signer, &test_job(), "My Tour", 7, 3600, b"zip-bytes").unwrap();

        assert!(uploaded.storage_path.starts_with("owner-1/job-1/My_Tour_backup_"));
        assert!(uploaded.storage_path.ends_with(".zip.007"));
        assert_eq!(uploaded.file_size, 9);
        assert_eq!(uploaded.file_hash, content_fingerprint(b"zip-bytes"));
        assert_eq!(store.get(&uploaded.storage_path).unwrap(), b"zip-bytes");
    }

    #[test]
    fn merge_companions_written_only_for_first_part() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let signer = UrlSigner::new("http://localhost:3000", "secret");
        let job = test_job();

        upload_part(&store, &signer, &job, "My Tour", 2, 3600, b"two").unwrap();
        assert!(store.get("owner-1/job-1/merge_backup.sh").is_err());

        upload_part(&store, &signer, &job, "My Tour", 1, 3600, b"one").unwrap();
        assert!(store.get("owner-1/job-1/merge_backup.sh").is_ok());
        assert!(store.get("owner-1/job-1/merge_backup.bat").is_ok());
        assert!(store.get("owner-1/job-1/INSTRUCTIONS.txt").is_ok());
    }
}
