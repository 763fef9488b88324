use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::browser::{
    execute_with_retry, BrowserError, FeedPage, LaunchRequest, RetryError, RetryPolicy,
    SessionLauncher,
};
use crate::config::LikerConfig;
use crate::error::ConfigError;
use crate::qr::{render_artifact, QrCodec};

use super::{Session, SessionState};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("automation backend unavailable: {0}")]
    Backend(#[source] BrowserError),
    #[error("login was not completed within {0} seconds")]
    LoginTimeout(u64),
    #[error("login qr code unavailable: {0}")]
    QrUnavailable(String),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result of checking a freshly opened page against the logged-in pattern.
/// Both arms hand over the session so the caller decides who closes it.
#[derive(Debug)]
pub enum Validation {
    Active(Session),
    Expired(Session),
}

pub struct SessionMachine {
    config: Arc<LikerConfig>,
    launcher: Arc<dyn SessionLauncher>,
    qr: Arc<dyn QrCodec>,
    policy: RetryPolicy,
    logged_in: Regex,
    target_url: String,
    state: SessionState,
    login_page: Option<Box<dyn FeedPage>>,
}

impl SessionMachine {
    pub fn new(
        config: Arc<LikerConfig>,
        launcher: Arc<dyn SessionLauncher>,
        qr: Arc<dyn QrCodec>,
    ) -> Result<Self, SessionError> {
        let target_url = config.target_url()?;
        let logged_in = Regex::new(&config.browser.logged_in_pattern)
            .map_err(|err| ConfigError::Invalid(format!("browser.logged_in_pattern: {err}")))?;
        let policy = RetryPolicy::new(&config.retry);
        Ok(Self {
            config,
            launcher,
            qr,
            policy,
            logged_in,
            target_url,
            state: SessionState::Fresh,
            login_page: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn is_logged_in(&self, url: &str) -> bool {
        self.logged_in.is_match(url)
    }

    /// Opens a page and resolves it to Active or Expired. On the first run an
    /// unauthenticated page is handed back; later runs log in inline.
    pub async fn establish(&mut self, first_run: bool) -> Result<Validation, SessionError> {
        let session = match self.validate().await? {
            Validation::Active(session) => return Ok(Validation::Active(session)),
            Validation::Expired(session) => session,
        };
        if first_run {
            info!("no authenticated session on first run");
            return Ok(Validation::Expired(session));
        }

        warn!("not logged in, starting qr code login");
        if let Err(err) = session.close().await {
            warn!(error = %err, "failed to close unauthenticated session");
        }
        self.reauthenticate().await?;
        self.validate().await
    }

    pub async fn validate(&mut self) -> Result<Validation, SessionError> {
        self.state = SessionState::Validating;
        let session_path = &self.config.paths.session;
        let storage = session_path.exists().then(|| session_path.clone());
        if storage.is_some() {
            info!(path = %session_path.display(), "resuming persisted session");
        } else {
            info!("no persisted session, login required");
        }

        let page = self.open(LaunchRequest::resume(storage)).await?;
        let mut session = Session::new(page);
        let url = match self.navigate(session.page()).await {
            Ok(url) => url,
            Err(err) => {
                if let Err(close_err) = session.close().await {
                    warn!(error = %close_err, "failed to close session after navigation error");
                }
                return Err(err);
            }
        };

        if self.is_logged_in(&url) {
            session.set_authenticated(true);
            self.state = SessionState::Active;
            info!(url = %url, "session active");
            Ok(Validation::Active(session))
        } else {
            self.state = SessionState::Reauthenticating;
            info!(url = %url, "session not authenticated");
            Ok(Validation::Expired(session))
        }
    }

    async fn reauthenticate(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Reauthenticating;
        let result = self.login().await;
        if result.is_err() {
            self.state = SessionState::Fatal;
        }
        result
    }

    async fn login(&mut self) -> Result<(), SessionError> {
        let qr_path = self.config.paths.qrcode.clone();
        remove_stale_artifact(&qr_path).await?;

        info!("loading login qr code");
        let page = self.open(LaunchRequest::login(qr_path.clone())).await?;
        // parked so an interrupted login can still be released
        self.login_page = Some(page);
        let result = match self.login_page.as_deref() {
            Some(page) => self.await_scan(page, &qr_path).await,
            None => Err(SessionError::Browser(BrowserError::Unexpected(
                "login page missing".into(),
            ))),
        };
        self.release().await;
        result
    }

    /// Closes the login browser left behind by an interrupted login.
    pub async fn release(&mut self) {
        if let Some(page) = self.login_page.take() {
            if let Err(err) = page.close().await {
                warn!(error = %err, "failed to close login browser");
            }
        }
    }

    async fn await_scan(&self, page: &dyn FeedPage, qr_path: &Path) -> Result<(), SessionError> {
        self.navigate(page).await?;
        sleep(self.config.browser.qr_capture_wait()).await;

        if !qr_path.exists() {
            error!("login qr code was not captured, check the network or page load");
            return Err(SessionError::QrUnavailable("no qr image captured".into()));
        }
        match render_artifact(self.qr.as_ref(), qr_path) {
            Ok(Some(rendered)) => println!("{rendered}"),
            Ok(None) => {
                error!("failed to decode login qr code");
                return Err(SessionError::QrUnavailable("qr image holds no code".into()));
            }
            Err(err) => return Err(SessionError::QrUnavailable(err.to_string())),
        }

        let timeout = self.config.browser.login_timeout();
        info!(
            timeout_secs = timeout.as_secs(),
            path = %qr_path.display(),
            "scan the qr code to log in"
        );
        match page.wait_for_url(&self.logged_in, timeout).await {
            Ok(url) => info!(url = %url, "login succeeded, saving session"),
            Err(BrowserError::Timeout(_)) => {
                error!("login timed out, restart the program to try again");
                return Err(SessionError::LoginTimeout(timeout.as_secs()));
            }
            Err(err) => return Err(SessionError::Browser(err)),
        }
        page.persist_state(&self.config.paths.session).await?;
        Ok(())
    }

    async fn open(&self, request: LaunchRequest) -> Result<Box<dyn FeedPage>, SessionError> {
        self.launcher.open(request).await.map_err(|err| match err {
            BrowserError::Launch(_) => SessionError::Backend(err),
            other => SessionError::Browser(other),
        })
    }

    /// Navigates to the target and reports where the page ended up. Failed
    /// navigation is not fatal: the resulting location decides.
    async fn navigate(&self, page: &dyn FeedPage) -> Result<String, SessionError> {
        let target = self.target_url.as_str();
        match execute_with_retry(&self.policy, "goto", |_| page.goto(target)).await {
            Ok(_) | Err(RetryError::Exhausted { .. }) => {}
            Err(RetryError::SessionExpired(err)) => {
                warn!(error = %err, "navigation reported an expired session");
            }
        }
        Ok(page.current_url().await?)
    }
}

async fn remove_stale_artifact(path: &Path) -> Result<(), SessionError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SessionError::Browser(BrowserError::Io(err))),
    }
}
