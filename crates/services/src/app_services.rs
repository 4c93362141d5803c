use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use storage::repository::Storage;

use crate::Clock;
use crate::attendance_service::AttendanceService;
use crate::collaborators::{FileSystemUploader, MediaUploader, MeetingProvider, ZoomClient};
use crate::config::ServiceConfig;
use crate::error::AppServicesError;
use crate::jobs::{JobScheduler, TokioScheduler};
use crate::progress_service::ProgressService;
use crate::recording_service::RecordingService;
use crate::webhook::WebhookService;

const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Assembles app-facing services over one `Storage`.
#[derive(Clone)]
pub struct AppServices {
    storage: Storage,
    progress: Arc<ProgressService>,
    recordings: Arc<RecordingService>,
    attendance: Arc<AttendanceService>,
    webhooks: Arc<WebhookService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization or the HTTP
    /// client setup fails.
    pub async fn new_sqlite(config: &ServiceConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(&config.db_url).await?;
        Self::from_storage(storage, config, clock)
    }

    /// Wire services with the production collaborators.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::HttpClient` if the HTTP client cannot be
    /// built.
    pub fn from_storage(
        storage: Storage,
        config: &ServiceConfig,
        clock: Clock,
    ) -> Result<Self, AppServicesError> {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let uploader: Arc<dyn MediaUploader> = Arc::new(FileSystemUploader::new(
            client.clone(),
            config.media_root.clone(),
            &config.media_base_url,
        ));
        let zoom = ZoomClient::new(client, config.zoom());
        if !zoom.enabled() {
            tracing::warn!("zoom api token not set; remote recordings will not be deleted");
        }
        let provider: Arc<dyn MeetingProvider> = Arc::new(zoom);
        let jobs: Arc<dyn JobScheduler> = Arc::new(TokioScheduler::new(provider));

        Ok(Self::with_collaborators(storage, config, clock, uploader, jobs))
    }

    /// Wire services with caller-supplied collaborators.
    #[must_use]
    pub fn with_collaborators(
        storage: Storage,
        config: &ServiceConfig,
        clock: Clock,
        uploader: Arc<dyn MediaUploader>,
        jobs: Arc<dyn JobScheduler>,
    ) -> Self {
        let progress = Arc::new(ProgressService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.lessons),
            Arc::clone(&storage.enrollments),
            Arc::clone(&storage.watch_history),
            Arc::clone(&storage.progress),
        ));
        let recordings = Arc::new(
            RecordingService::new(
                clock,
                Arc::clone(&storage.meetings),
                Arc::clone(&storage.lessons),
                Arc::clone(&storage.lesson_changes),
                uploader,
                jobs,
            )
            .with_cleanup_delay(config.recording_cleanup_delay),
        );
        let attendance = Arc::new(AttendanceService::new(
            clock,
            Arc::clone(&storage.meetings),
            Arc::clone(&storage.lessons),
            Arc::clone(&storage.users),
            Arc::clone(&storage.attendance),
        ));
        let webhooks = WebhookService::new(
            config.webhook_secret.clone(),
            clock,
            Arc::clone(&recordings),
            Arc::clone(&attendance),
        )
        .with_retry(config.ingest_retry);
        if !webhooks.verifies_signatures() {
            tracing::warn!("webhook secret not set; signatures are not verified");
        }

        Self {
            storage,
            progress,
            recordings,
            attendance,
            webhooks: Arc::new(webhooks),
        }
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn recordings(&self) -> Arc<RecordingService> {
        Arc::clone(&self.recordings)
    }

    #[must_use]
    pub fn attendance(&self) -> Arc<AttendanceService> {
        Arc::clone(&self.attendance)
    }

    #[must_use]
    pub fn webhooks(&self) -> Arc<WebhookService> {
        Arc::clone(&self.webhooks)
    }
}
