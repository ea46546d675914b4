use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::storage::{BlobStore, LocalBlobStore, UrlSigner};
use std::sync::Arc;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub blob: Arc<dyn BlobStore>,
    pub signer: UrlSigner,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let blob: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(config.storage_dir.clone()));
        let signer = UrlSigner::new(
            config.public_base_url.clone(),
            config.url_signing_secret.clone(),
        );
        Self {
            db,
            config,
            blob,
            signer,
            http: reqwest::Client::new(),
        }
    }
}
