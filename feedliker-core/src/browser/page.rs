use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::error::BrowserResult;
use super::script::LikeRoutine;

/// What a fresh browser should be seeded with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Persisted cookies restored before the first navigation.
    pub storage_state: Option<PathBuf>,
    /// Where to write login QR images served to this page.
    pub capture_qr: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn resume(storage_state: Option<PathBuf>) -> Self {
        Self {
            storage_state,
            capture_qr: None,
        }
    }

    pub fn login(capture_qr: PathBuf) -> Self {
        Self {
            storage_state: None,
            capture_qr: Some(capture_qr),
        }
    }
}

/// A single controlled tab on the target site, owning its browser process.
#[async_trait(?Send)]
pub trait FeedPage {
    async fn goto(&self, url: &str) -> BrowserResult<()>;
    async fn reload(&self) -> BrowserResult<()>;
    async fn current_url(&self) -> BrowserResult<String>;
    async fn scroll_to_top(&self) -> BrowserResult<()>;
    async fn run_like_routine(&self, routine: &LikeRoutine) -> BrowserResult<u64>;
    async fn wait_for_url(&self, pattern: &Regex, timeout: Duration) -> BrowserResult<String>;
    async fn persist_state(&self, path: &Path) -> BrowserResult<()>;
    fn is_disconnected(&self) -> bool;
    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait SessionLauncher {
    async fn open(&self, request: LaunchRequest) -> BrowserResult<Box<dyn FeedPage>>;
}
