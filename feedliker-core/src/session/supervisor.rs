use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::browser::{LikerMetrics, SessionLauncher};
use crate::config::LikerConfig;
use crate::error::ConfigError;
use crate::notify::Notifier;
use crate::qr::QrCodec;

use super::feed_loop::{FeedLoop, LoopExit};
use super::machine::{SessionError, SessionMachine, Validation};
use super::watcher::{CredentialWatcher, WatchConfig, WatchOutcome};
use super::Session;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Shutdown,
    Disconnected,
}

struct WatcherTask {
    cancel: CancellationToken,
    handle: JoinHandle<WatchOutcome>,
}

/// Owns the live session and the credential watcher, and runs
/// establish -> like loop -> recover until shutdown or a fatal error.
pub struct Supervisor {
    config: Arc<LikerConfig>,
    machine: SessionMachine,
    feed: FeedLoop,
    notifier: Arc<dyn Notifier>,
    watch_config: WatchConfig,
    session: Option<Session>,
    watcher: Option<WatcherTask>,
    watch_outcome: Option<WatchOutcome>,
    first_run: bool,
    recoveries: u64,
}

impl Supervisor {
    pub fn new(
        config: Arc<LikerConfig>,
        launcher: Arc<dyn SessionLauncher>,
        qr: Arc<dyn QrCodec>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, SupervisorError> {
        let machine = SessionMachine::new(config.clone(), launcher, qr)?;
        let feed = FeedLoop::new(config.clone())?;
        Ok(Self {
            config,
            machine,
            feed,
            notifier,
            watch_config: WatchConfig::default(),
            session: None,
            watcher: None,
            watch_outcome: None,
            first_run: true,
            recoveries: 0,
        })
    }

    pub fn with_watch_config(mut self, watch_config: WatchConfig) -> Self {
        self.watch_config = watch_config;
        self
    }

    pub fn metrics(&self) -> &LikerMetrics {
        self.feed.metrics()
    }

    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    /// How the watcher still running at teardown ended.
    pub fn watch_outcome(&self) -> Option<WatchOutcome> {
        self.watch_outcome
    }

    /// Runs until `shutdown` fires, the browser disconnects, or
    /// reauthentication fails. The session and watcher are released on every
    /// path out.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<ExitReason, SupervisorError> {
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("shutdown requested");
                Ok(ExitReason::Shutdown)
            }
            result = self.drive(&shutdown) => result,
        };
        if let Err(err) = &result {
            error!(state = %self.machine.state(), error = %err, "supervisor stopped");
        }
        self.teardown().await;
        result
    }

    async fn drive(&mut self, shutdown: &CancellationToken) -> Result<ExitReason, SupervisorError> {
        loop {
            match self.machine.establish(self.first_run).await? {
                Validation::Active(session) => {
                    if !self.first_run {
                        self.feed.record_reauthentication();
                    }
                    self.first_run = false;
                    self.stop_watcher();
                    let session = self.session.insert(session);
                    match self.feed.run(session).await {
                        LoopExit::Expired => self.recover(shutdown).await,
                        LoopExit::Disconnected => return Ok(ExitReason::Disconnected),
                    }
                }
                Validation::Expired(session) => {
                    self.session = Some(session);
                    self.recover(shutdown).await;
                }
            }
        }
    }

    async fn recover(&mut self, shutdown: &CancellationToken) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.close().await {
                warn!(error = %err, "failed to close expired session");
            }
        }
        self.first_run = false;
        self.recoveries += 1;
        error!(recoveries = self.recoveries, "login state expired, reauthenticating");

        self.stop_watcher();
        let cancel = shutdown.child_token();
        let handle = CredentialWatcher::new(self.config.paths.qrcode.clone(), self.notifier.clone())
            .with_config(self.watch_config)
            .spawn(cancel.clone());
        self.watcher = Some(WatcherTask { cancel, handle });
    }

    fn stop_watcher(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.cancel.cancel();
        }
    }

    async fn teardown(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.cancel.cancel();
            match watcher.handle.await {
                Ok(outcome) => self.watch_outcome = Some(outcome),
                Err(err) => warn!(error = %err, "credential watcher task failed"),
            }
        }
        self.machine.release().await;
        if let Some(session) = self.session.take() {
            if let Err(err) = session.close().await {
                warn!(error = %err, "failed to close session");
            }
        }
        info!(
            cycles = self.metrics().cycles,
            likes = self.metrics().likes,
            "session released"
        );
    }
}
