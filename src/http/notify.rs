use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::http::body::BodyError;
use crate::http::http_core::{HttpResponse, HttpStatus};

pub const NOTIFICATION_PATH: &str = "/receive_notification";

/// Notifications are small JSON documents; anything bigger is refused.
pub const MAX_NOTIFICATION_BODY: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("{0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Body(#[from] BodyError),
}

pub fn parse_notification(body: &[u8]) -> Result<Value, NotificationError> {
    Ok(serde_json::from_slice(body)?)
}

/// Turns the outcome of reading a notification into the reply. Failures are
/// reported to the caller as `{"error": ...}` and never escape further.
pub fn acknowledge(result: Result<Value, NotificationError>) -> HttpResponse {
    match result {
        Ok(data) => {
            info!("Received JSON data: {}", data);
            HttpResponse::json(
                HttpStatus::OK,
                &json!({ "message": "Notification received successfully" }),
            )
        }
        Err(e) => {
            warn!(error = %e, "rejected notification");
            let status = match e {
                NotificationError::Body(BodyError::TooLarge(_)) => HttpStatus::PayloadTooLarge,
                _ => HttpStatus::BadRequest,
            };
            HttpResponse::json(status, &json!({ "error": e.to_string() }))
        }
    }
}
