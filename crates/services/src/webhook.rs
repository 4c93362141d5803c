//! Zoom webhook payloads, request authentication and routing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::Sha256;

use lms_core::model::{RecordingFile, RecordingFileType};
use lms_core::time::Clock;

use crate::attendance_service::{
    AttendanceOutcome, AttendanceService, ParticipantJoined, ParticipantLeft,
};
use crate::error::WebhookError;
use crate::jobs::RetryPolicy;
use crate::recording_service::{IngestOutcome, RecordingCompleted, RecordingService};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-zm-signature";
pub const TIMESTAMP_HEADER: &str = "x-zm-request-timestamp";
const SIGNATURE_VERSION: &str = "v0";
/// Signed requests older (or newer) than this are refused as replays.
pub const MAX_REQUEST_AGE_SECS: i64 = 300;

//
// ─── PAYLOADS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum WebhookEvent {
    #[serde(rename = "recording.completed")]
    RecordingCompleted {
        #[serde(default)]
        download_token: Option<String>,
        payload: ObjectPayload<RecordingObject>,
    },
    #[serde(rename = "meeting.participant_joined")]
    ParticipantJoined {
        payload: ObjectPayload<ParticipantObject>,
    },
    #[serde(rename = "meeting.participant_left")]
    ParticipantLeft {
        payload: ObjectPayload<ParticipantObject>,
    },
    #[serde(rename = "endpoint.url_validation")]
    UrlValidation { payload: UrlValidationPayload },
    #[serde(other)]
    Unsupported,
}

impl WebhookEvent {
    /// Events whose handling involves downloads and should not hold the
    /// HTTP response.
    #[must_use]
    pub fn runs_in_background(&self) -> bool {
        matches!(self, WebhookEvent::RecordingCompleted { .. })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectPayload<T> {
    pub object: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingObject {
    #[serde(default, deserialize_with = "meeting_number")]
    pub id: u64,
    #[serde(default)]
    pub recording_files: Vec<RecordingFileDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingFileDto {
    pub file_type: String,
    pub download_url: String,
    #[serde(default)]
    pub file_size: u64,
    pub recording_start: Option<DateTime<Utc>>,
}

impl From<RecordingFileDto> for RecordingFile {
    fn from(dto: RecordingFileDto) -> Self {
        RecordingFile {
            file_type: RecordingFileType::from_label(&dto.file_type),
            download_url: dto.download_url,
            file_size: dto.file_size,
            // Files without a start time sort first.
            recording_start: dto.recording_start.unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantObject {
    #[serde(default, deserialize_with = "meeting_number")]
    pub id: u64,
    pub start_time: DateTime<Utc>,
    pub participant: Participant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    #[serde(default)]
    pub customer_key: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    pub join_time: Option<DateTime<Utc>>,
    pub leave_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlValidationPayload {
    #[serde(rename = "plainToken")]
    pub plain_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlValidationResponse {
    #[serde(rename = "plainToken")]
    pub plain_token: String,
    #[serde(rename = "encryptedToken")]
    pub encrypted_token: String,
}

/// Zoom sends meeting ids as numbers in recording events and as strings in
/// participant events.
fn meeting_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if s.trim().is_empty() => Ok(0),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

//
// ─── SIGNATURES ────────────────────────────────────────────────────────────────
//

/// Hex-encoded HMAC-SHA256 of `message` keyed with `secret`.
///
/// # Errors
///
/// Returns `WebhookError::InvalidSecret` if `secret` is rejected as a key.
pub fn sign(secret: &str, message: &[u8]) -> Result<String, WebhookError> {
    let mut mac = keyed_mac(secret)?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn keyed_mac(secret: &str) -> Result<HmacSha256, WebhookError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidSecret)
}

/// The `x-zm-signature` value Zoom sends for `body` at `timestamp`.
///
/// # Errors
///
/// Returns `WebhookError::InvalidSecret` if `secret` is rejected as a key.
pub fn request_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, WebhookError> {
    let mut message = format!("{SIGNATURE_VERSION}:{timestamp}:").into_bytes();
    message.extend_from_slice(body);
    Ok(format!("{SIGNATURE_VERSION}={}", sign(secret, &message)?))
}

/// Checks an `x-zm-signature` header in constant time.
///
/// # Errors
///
/// Returns `WebhookError::InvalidSignature` if the header is malformed or
/// does not match.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
) -> Result<(), WebhookError> {
    let provided = signature
        .strip_prefix(SIGNATURE_VERSION)
        .and_then(|rest| rest.strip_prefix('='))
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(WebhookError::InvalidSignature)?;

    let mut mac = keyed_mac(secret)?;
    mac.update(format!("{SIGNATURE_VERSION}:{timestamp}:").as_bytes());
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// Rejects an `x-zm-request-timestamp` (epoch seconds) outside
/// [`MAX_REQUEST_AGE_SECS`] of `now`.
///
/// # Errors
///
/// Returns `WebhookError::StaleTimestamp` for stale, future or non-numeric
/// timestamps.
pub fn check_request_age(timestamp: &str, now: DateTime<Utc>) -> Result<(), WebhookError> {
    let sent = timestamp
        .trim()
        .parse::<i64>()
        .map_err(|_| WebhookError::StaleTimestamp)?;
    if (now.timestamp() - sent).abs() > MAX_REQUEST_AGE_SECS {
        return Err(WebhookError::StaleTimestamp);
    }
    Ok(())
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WebhookReply {
    Validation(UrlValidationResponse),
    Recording(IngestOutcome),
    Attendance(AttendanceOutcome),
    Ignored { ignored: bool },
}

/// Authenticates provider callbacks and routes them to the workflows.
#[derive(Clone)]
pub struct WebhookService {
    secret: Option<String>,
    clock: Clock,
    recordings: Arc<RecordingService>,
    attendance: Arc<AttendanceService>,
    retry: RetryPolicy,
}

impl WebhookService {
    #[must_use]
    pub fn new(
        secret: Option<String>,
        clock: Clock,
        recordings: Arc<RecordingService>,
        attendance: Arc<AttendanceService>,
    ) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
            clock,
            recordings,
            attendance,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn verifies_signatures(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify the request signature headers against the raw body and
    /// refuse signed requests replayed outside the accepted window.
    ///
    /// Without a configured secret every request is accepted.
    ///
    /// # Errors
    ///
    /// Returns `MissingSignature`, `InvalidSignature` or `StaleTimestamp`
    /// when verification fails.
    pub fn authenticate(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), WebhookError> {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(());
        };
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(WebhookError::MissingSignature);
        };
        verify_signature(secret, timestamp, body, signature)?;
        check_request_age(timestamp, self.clock.now())
    }

    /// # Errors
    ///
    /// Returns `WebhookError::Payload` for bodies that are not a webhook
    /// event.
    pub fn decode(&self, body: &[u8]) -> Result<WebhookEvent, WebhookError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Run the workflow matching `event` to completion.
    ///
    /// Recording ingestion is retried with the configured policy.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError` if the workflow fails, or
    /// `SecretNotConfigured` for URL validation without a secret.
    pub async fn dispatch(&self, event: WebhookEvent) -> Result<WebhookReply, WebhookError> {
        match event {
            WebhookEvent::UrlValidation { payload } => {
                let secret = self
                    .secret
                    .as_deref()
                    .ok_or(WebhookError::SecretNotConfigured)?;
                Ok(WebhookReply::Validation(UrlValidationResponse {
                    encrypted_token: sign(secret, payload.plain_token.as_bytes())?,
                    plain_token: payload.plain_token,
                }))
            }
            WebhookEvent::RecordingCompleted {
                download_token,
                payload,
            } => {
                let event = RecordingCompleted {
                    meeting_number: payload.object.id,
                    download_token,
                    recording_files: payload
                        .object
                        .recording_files
                        .into_iter()
                        .map(RecordingFile::from)
                        .collect(),
                };
                let outcome = self
                    .retry
                    .run("recording ingestion", || {
                        self.recordings.ingest_recording(event.clone())
                    })
                    .await?;
                Ok(WebhookReply::Recording(outcome))
            }
            WebhookEvent::ParticipantJoined { payload } => {
                let object = payload.object;
                let event = ParticipantJoined {
                    meeting_number: object.id,
                    external_user_id: object.participant.customer_key.unwrap_or_default(),
                    join_time: object.participant.join_time.unwrap_or(object.start_time),
                    start_time: object.start_time,
                };
                Ok(WebhookReply::Attendance(self.attendance.on_join(event).await?))
            }
            WebhookEvent::ParticipantLeft { payload } => {
                let object = payload.object;
                let Some(leave_time) = object.participant.leave_time else {
                    return Err(WebhookError::Payload(serde::de::Error::missing_field(
                        "leave_time",
                    )));
                };
                let event = ParticipantLeft {
                    meeting_number: object.id,
                    external_user_id: object.participant.customer_key.unwrap_or_default(),
                    leave_time,
                    start_time: object.start_time,
                };
                Ok(WebhookReply::Attendance(self.attendance.on_leave(event).await?))
            }
            WebhookEvent::Unsupported => {
                tracing::debug!("ignoring unsupported webhook event");
                Ok(WebhookReply::Ignored { ignored: true })
            }
        }
    }
}
