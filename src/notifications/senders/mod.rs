use async_trait::async_trait;
use thiserror::Error;

use super::models::NotificationPayload;

pub mod webhook;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// A trait for delivering incident notifications to one channel type.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, payload: &NotificationPayload) -> Result<(), SenderError>;
}
