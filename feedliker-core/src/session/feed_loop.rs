use std::sync::Arc;

use regex::Regex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::browser::{execute_with_retry, LikeRoutine, LikerMetrics, RetryError, RetryPolicy};
use crate::config::LikerConfig;
use crate::error::ConfigError;

use super::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Liked(u64),
    /// The cycle was abandoned before the like pass; nothing was liked.
    Skipped,
    Expired,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Expired,
    Disconnected,
}

/// Reload and like cycle over an authenticated session.
pub struct FeedLoop {
    config: Arc<LikerConfig>,
    policy: RetryPolicy,
    logged_in: Regex,
    routine: LikeRoutine,
    metrics: LikerMetrics,
}

impl FeedLoop {
    pub fn new(config: Arc<LikerConfig>) -> Result<Self, ConfigError> {
        let logged_in = Regex::new(&config.browser.logged_in_pattern)
            .map_err(|err| ConfigError::Invalid(format!("browser.logged_in_pattern: {err}")))?;
        let policy = RetryPolicy::new(&config.retry);
        let routine = LikeRoutine::new(config.blocklist.clone(), config.like_spacing_ms);
        Ok(Self {
            config,
            policy,
            logged_in,
            routine,
            metrics: LikerMetrics::default(),
        })
    }

    pub fn metrics(&self) -> &LikerMetrics {
        &self.metrics
    }

    pub fn record_reauthentication(&mut self) {
        self.metrics.record_reauthentication();
    }

    /// Cycles until the session expires or the browser goes away.
    pub async fn run(&mut self, session: &mut Session) -> LoopExit {
        loop {
            match self.cycle(session).await {
                CycleOutcome::Liked(_) | CycleOutcome::Skipped => {
                    sleep(self.config.refresh_interval()).await;
                }
                CycleOutcome::Expired => return LoopExit::Expired,
                CycleOutcome::Disconnected => return LoopExit::Disconnected,
            }
        }
    }

    pub async fn cycle(&mut self, session: &mut Session) -> CycleOutcome {
        self.metrics.record_cycle();
        if session.is_disconnected() {
            error!("browser disconnected");
            return CycleOutcome::Disconnected;
        }

        let reload = {
            let page = session.page();
            execute_with_retry(&self.policy, "reload", |_| page.reload()).await
        };
        match reload {
            Ok(outcome) => self.metrics.record_reload(outcome.attempts),
            Err(RetryError::SessionExpired(err)) => {
                warn!(error = %err, "reload reported an expired session");
                return self.expire();
            }
            Err(RetryError::Exhausted { .. }) => {
                self.metrics.record_reload_failure();
                if session.is_disconnected() {
                    error!("browser disconnected");
                    return CycleOutcome::Disconnected;
                }
                warn!("reload failed, skipping this cycle");
                return CycleOutcome::Skipped;
            }
        }

        if let Err(err) = session.page().scroll_to_top().await {
            warn!(error = %err, "scroll to top failed, abandoning cycle");
            return self.abandon(session);
        }
        // state must be on disk before anything is liked
        if let Err(err) = session.persist(&self.config.paths.session).await {
            warn!(error = %err, "failed to persist session state, abandoning cycle");
            return self.abandon(session);
        }

        let url = match session.page().current_url().await {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "failed to read current url, abandoning cycle");
                return self.abandon(session);
            }
        };
        if !self.logged_in.is_match(&url) {
            error!(url = %url, "login state expired");
            return self.expire();
        }

        sleep(self.config.settle_delay()).await;
        match session.page().run_like_routine(&self.routine).await {
            Ok(count) => {
                self.metrics.record_likes(count);
                info!(count, total = self.metrics.likes, "like pass finished");
                CycleOutcome::Liked(count)
            }
            Err(_) if session.is_disconnected() => {
                error!("browser disconnected");
                CycleOutcome::Disconnected
            }
            Err(err) => {
                warn!(error = %err, "like pass failed");
                CycleOutcome::Liked(0)
            }
        }
    }

    fn abandon(&self, session: &Session) -> CycleOutcome {
        if session.is_disconnected() {
            error!("browser disconnected");
            CycleOutcome::Disconnected
        } else {
            CycleOutcome::Skipped
        }
    }

    fn expire(&mut self) -> CycleOutcome {
        self.metrics.record_expiry();
        CycleOutcome::Expired
    }
}
