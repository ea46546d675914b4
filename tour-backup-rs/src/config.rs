use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub public_base_url: String,
    pub url_signing_secret: String,
    pub signed_url_ttl_secs: i64,
    pub items_per_part: usize,
    pub dispatch_batch: usize,
    pub default_max_attempts: i64,
    pub retry_base_secs: i64,
    pub retry_cap_secs: i64,
    pub stuck_timeout_secs: i64,
    pub reaper_interval_secs: u64,
    pub cloud_sync_url: Option<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(
            std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()),
        );
        let port: u16 = env_parse("PORT", 3000);

        Self {
            db_path: data_dir.join("tour-backup.db"),
            storage_dir: PathBuf::from(
                std::env::var("STORAGE_DIR")
                    .unwrap_or_else(|_| data_dir.join("storage").to_string_lossy().into_owned()),
            ),
            data_dir,
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            url_signing_secret: std::env::var("URL_SIGNING_SECRET")
                .unwrap_or_else(|_| "dev-signing-secret".into()),
            // 7 days, matching the retention of part download links
            signed_url_ttl_secs: env_parse("SIGNED_URL_TTL_SECS", 7 * 24 * 3600),
            items_per_part: env_parse("ITEMS_PER_PART", 5),
            dispatch_batch: env_parse("DISPATCH_BATCH", 1),
            default_max_attempts: env_parse("MAX_ATTEMPTS", 3),
            retry_base_secs: env_parse("RETRY_BASE_SECS", 300),
            retry_cap_secs: env_parse("RETRY_CAP_SECS", 3600),
            stuck_timeout_secs: env_parse("STUCK_TIMEOUT_SECS", 30 * 60),
            reaper_interval_secs: env_parse("REAPER_INTERVAL_SECS", 300),
            cloud_sync_url: std::env::var("CLOUD_SYNC_URL").ok().filter(|v| !v.is_empty()),
            port,
        }
    }
}
