#![forbid(unsafe_code)]

pub mod app_services;
pub mod attendance_service;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod jobs;
pub mod outcome;
pub mod progress_service;
pub mod recording_service;
pub mod slug_service;
pub mod webhook;

pub use lms_core::Clock;

pub use app_services::AppServices;
pub use attendance_service::{AttendanceOutcome, AttendanceService, ParticipantJoined, ParticipantLeft};
pub use config::ServiceConfig;
pub use error::{
    AppServicesError, AttendanceError, ErrorKind, IngestionError, ProgressError, WebhookError,
};
pub use outcome::SkipReason;
pub use progress_service::{ProgressService, ProgressSummary, WatchHistoryResult};
pub use recording_service::{IngestOutcome, RecordingCompleted, RecordingService};
pub use slug_service::SlugService;
pub use webhook::{WebhookEvent, WebhookReply, WebhookService};
