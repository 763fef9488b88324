mod feed_loop;
mod machine;
mod supervisor;
mod watcher;

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::browser::{BrowserResult, FeedPage};

pub use feed_loop::{CycleOutcome, FeedLoop, LoopExit};
pub use machine::{SessionError, SessionMachine, Validation};
pub use supervisor::{ExitReason, Supervisor, SupervisorError};
pub use watcher::{CredentialWatcher, WatchConfig, WatchOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Validating,
    Active,
    Reauthenticating,
    Fatal,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Fresh => "fresh",
            SessionState::Validating => "validating",
            SessionState::Active => "active",
            SessionState::Reauthenticating => "reauthenticating",
            SessionState::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

/// The one live browser session of the process.
pub struct Session {
    page: Box<dyn FeedPage>,
    authenticated: bool,
    last_persisted_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(page: Box<dyn FeedPage>) -> Self {
        Self {
            page,
            authenticated: false,
            last_persisted_at: None,
        }
    }

    pub fn page(&self) -> &dyn FeedPage {
        self.page.as_ref()
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    pub fn last_persisted_at(&self) -> Option<DateTime<Utc>> {
        self.last_persisted_at
    }

    pub fn is_disconnected(&self) -> bool {
        self.page.is_disconnected()
    }

    pub async fn persist(&mut self, path: &Path) -> BrowserResult<()> {
        self.page.persist_state(path).await?;
        self.last_persisted_at = Some(Utc::now());
        Ok(())
    }

    pub async fn close(self) -> BrowserResult<()> {
        self.page.close().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.authenticated)
            .field("last_persisted_at", &self.last_persisted_at)
            .finish()
    }
}
