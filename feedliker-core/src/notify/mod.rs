mod smtp;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::config::NotifySection;

pub use smtp::{build_message, CurlTransport, MailTransport, SmtpNotifier};

pub const LOGIN_SUBJECT: &str = "Login state update";
pub const LOGIN_BODY: &str =
    "Scan the attached QR code to log in again (it must be scanned from another device).";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("mail transport failed with status {status:?}: {stderr}")]
    Transport { status: Option<i32>, stderr: String },
    #[error("incomplete smtp settings")]
    Incomplete,
}

/// Out-of-band operator alert. Best effort: callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> Result<(), NotifyError>;
}

/// Used when mail delivery is disabled; the alert only reaches the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> Result<(), NotifyError> {
        warn!(
            subject,
            body,
            attachment = attachment.map(|path| path.display().to_string()),
            "operator action required"
        );
        Ok(())
    }
}

pub fn notifier_from_config(config: &NotifySection) -> Arc<dyn Notifier> {
    if config.enabled {
        Arc::new(SmtpNotifier::new(config.smtp.clone()))
    } else {
        Arc::new(LogNotifier)
    }
}
