use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::notify::{Notifier, LOGIN_BODY, LOGIN_SUBJECT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    pub poll_budget: u32,
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_budget: 128,
            poll_interval: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Notified,
    BudgetExhausted,
    Cancelled,
}

/// Polls the QR artifact and alerts the operator once a fresh code replaces
/// the first one it saw.
pub struct CredentialWatcher {
    path: PathBuf,
    notifier: Arc<dyn Notifier>,
    config: WatchConfig,
}

impl CredentialWatcher {
    pub fn new(path: impl Into<PathBuf>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            path: path.into(),
            notifier,
            config: WatchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<WatchOutcome> {
        tokio::spawn(self.watch(cancel))
    }

    pub async fn watch(self, cancel: CancellationToken) -> WatchOutcome {
        info!(path = %self.path.display(), "watching login qr code");
        let mut baseline: Option<SystemTime> = None;

        for poll in 0..self.config.poll_budget {
            if poll > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return WatchOutcome::Cancelled,
                    _ = sleep(self.config.poll_interval) => {}
                }
            } else if cancel.is_cancelled() {
                return WatchOutcome::Cancelled;
            }

            let current = match std::fs::metadata(&self.path).and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    error!(path = %self.path.display(), error = %err, "failed to read qr code metadata");
                    continue;
                }
            };

            match baseline {
                None => baseline = Some(current),
                Some(previous) if previous != current => {
                    info!("login qr code refreshed, notifying operator");
                    return self.notify(&cancel).await;
                }
                Some(_) => {}
            }
        }

        error!(
            polls = self.config.poll_budget,
            "max polls reached, stop watching login qr code"
        );
        WatchOutcome::BudgetExhausted
    }

    async fn notify(&self, cancel: &CancellationToken) -> WatchOutcome {
        let send = self
            .notifier
            .notify(LOGIN_SUBJECT, LOGIN_BODY, Some(self.path.as_path()));
        tokio::select! {
            _ = cancel.cancelled() => WatchOutcome::Cancelled,
            result = send => {
                if let Err(err) = result {
                    error!(error = %err, "failed to send login notification");
                }
                WatchOutcome::Notified
            }
        }
    }
}
