use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("profile error: {0}")]
    Profile(String),
    #[error("network capture error: {0}")]
    Network(String),
    #[error("session state error: {0}")]
    State(String),
    #[error("qr code error: {0}")]
    Qr(String),
    #[error("session no longer authenticated: {0}")]
    SessionExpired(String),
    #[error("browser disconnected")]
    Disconnected,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    /// Expiry is never transient; the retry executor hands it straight back.
    pub fn is_session_expiry(&self) -> bool {
        matches!(self, BrowserError::SessionExpired(_))
    }
}

impl From<tokio::task::JoinError> for BrowserError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrowserError::Unexpected(err.to_string())
    }
}

impl From<serde_json::Error> for BrowserError {
    fn from(err: serde_json::Error) -> Self {
        BrowserError::State(err.to_string())
    }
}
