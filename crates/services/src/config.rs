use std::path::PathBuf;
use std::time::Duration;

use crate::collaborators::ZoomConfig;
use crate::jobs::{DEFAULT_RECORDING_CLEANUP, RetryPolicy};

pub const DEFAULT_DB_URL: &str = "sqlite://lms.db";
pub const DEFAULT_ZOOM_API_BASE_URL: &str = "https://api.zoom.us/v2";

/// Runtime settings for the service layer, assembled by the binary.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub db_url: String,
    pub media_root: PathBuf,
    pub media_base_url: String,
    pub zoom_api_base_url: String,
    pub zoom_api_token: Option<String>,
    pub webhook_secret: Option<String>,
    pub recording_cleanup_delay: Duration,
    pub ingest_retry: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_url: DEFAULT_DB_URL.to_owned(),
            media_root: PathBuf::from("media"),
            media_base_url: "http://localhost:8080/media".to_owned(),
            zoom_api_base_url: DEFAULT_ZOOM_API_BASE_URL.to_owned(),
            zoom_api_token: None,
            webhook_secret: None,
            recording_cleanup_delay: DEFAULT_RECORDING_CLEANUP,
            ingest_retry: RetryPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Zoom API settings, present only when a non-blank token is configured.
    #[must_use]
    pub fn zoom(&self) -> Option<ZoomConfig> {
        let token = self.zoom_api_token.as_deref()?.trim();
        if token.is_empty() {
            return None;
        }
        Some(ZoomConfig {
            api_base_url: self.zoom_api_base_url.clone(),
            api_token: token.to_owned(),
        })
    }

    /// Cleanup delay from a whole number of hours.
    #[must_use]
    pub fn cleanup_delay_from_hours(hours: u64) -> Duration {
        Duration::from_secs(hours.saturating_mul(60 * 60))
    }
}
