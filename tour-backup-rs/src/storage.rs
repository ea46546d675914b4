//! Blob storage for archive parts and their companion files.
//!
//! Parts are written under `{owner_id}/{job_id}/...` relative to the
//! configured storage root. Download links are signed with a short
//! non-cryptographic signature: good enough to keep casual URL guessing
//! out, and explicitly not an integrity mechanism.

use std::fs;
use std::path::{Component, Path, PathBuf};

pub trait BlobStore: Send + Sync {
    fn put(&self, path: &str, bytes: &[u8]) -> anyhow::Result<()>;
    fn get(&self, path: &str) -> anyhow::Result<Vec<u8>>;
}

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            anyhow::bail!("Invalid storage path: {}", path);
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, path: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, bytes)?;
        Ok(())
    }

    fn get(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let full = self.resolve(path)?;
        Ok(fs::read(&full)?)
    }
}

// ── Fingerprinting ──

/// FNV-1a 64-bit. Fast, non-cryptographic; used for drift detection on
/// uploaded parts and for download-link signatures.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

pub fn content_fingerprint(bytes: &[u8]) -> String {
    format!("{:016x}", fnv1a64(bytes))
}

// ── Signed URLs ──

#[derive(Clone)]
pub struct UrlSigner {
    base_url: String,
    secret: String,
}

impl UrlSigner {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            secret: secret.into(),
        }
    }

    fn signature(&self, path: &str, expires: i64) -> String {
        let material = format!("{}|{}|{}", path, expires, self.secret);
        format!("{:016x}", fnv1a64(material.as_bytes()))
    }

    /// Time-limited download URL with the human-facing filename embedded so
    /// the served attachment is not misnamed.
    pub fn signed_download_url(&self, path: &str, filename: &str, ttl_secs: i64) -> String {
        let expires = chrono::Utc::now().timestamp() + ttl_secs;
        let sig = self.signature(path, expires);
        format!(
            "{}/api/storage/download/{}?expires={}&sig={}&filename={}",
            self.base_url, path, expires, sig, filename
        )
    }

    pub fn verify(&self, path: &str, expires: i64, sig: &str) -> bool {
        if expires < chrono::Utc::now().timestamp() {
            return false;
        }
        self.signature(path, expires) == sig
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        store.put("u1/j1/part.zip.001", b"hello").unwrap();
        assert_eq!(store.get("u1/j1/part.zip.001").unwrap(), b"hello");
    }

    #[test]
    fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(store.put("../escape", b"x").is_err());
        assert!(store.get("/etc/passwd").is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_discriminating() {
        assert_eq!(content_fingerprint(b"abc"), content_fingerprint(b"abc"));
        assert_ne!(content_fingerprint(b"abc"), content_fingerprint(b"abd"));
        assert_eq!(content_fingerprint(b"abc").len(), 16);
    }

    #[test]
    fn signed_url_verifies_within_ttl() {
        let signer = UrlSigner::new("http://localhost:3000", "secret");
        let url = signer.signed_download_url("u1/j1/part.zip.001", "part.zip.001", 60);
        assert!(url.contains("expires="));

        let expires = chrono::Utc::now().timestamp() + 60;
        let sig = signer.signature("u1/j1/part.zip.001", expires);
        assert!(signer.verify("u1/j1/part.zip.001", expires, &sig));
    }

    #[test]
    fn expired_or_tampered_signature_fails() {
        let signer = UrlSigner::new("http://localhost:3000", "secret");
        let past = chrono::Utc::now().timestamp() - 10;
        let sig = signer.signature("a/b", past);
        assert!(!signer.verify("a/b", past, &sig));

        let future = chrono::Utc::now().timestamp() + 60;
        let sig = signer.signature("a/b", future);
        assert!(!signer.verify("a/c", future, &sig));
        assert!(!signer.verify("a/b", future, "0000000000000000"));
    }
}
