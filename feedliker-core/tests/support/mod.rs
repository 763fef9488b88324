#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use feedliker_core::browser::LikeRoutine;
use feedliker_core::{
    BrowserError, BrowserResult, FeedPage, LaunchRequest, LikerConfig, Notifier, NotifyError,
    QrCodec, SessionLauncher,
};
use regex::Regex;
use tempfile::TempDir;

pub const ACCOUNT: u64 = 10086;
pub const FEED_URL: &str = "https://user.qzone.qq.com/10086/infocenter";
pub const LOGIN_URL: &str = "https://i.qq.com/";

/// Shared state of the fake site and every page opened against it.
#[derive(Debug)]
pub struct World {
    pub authenticated: bool,
    pub launch_fails: bool,
    pub disconnected: bool,
    pub failing_reloads: usize,
    /// The next successful reload lands on the login page, once.
    pub expire_on_reload: bool,
    pub scroll_fails: bool,
    pub persist_fails: bool,
    pub url_fails: bool,
    pub serve_qr: bool,
    pub scan_succeeds: bool,
    pub posts: Vec<u64>,
    pub opened: usize,
    pub closed: usize,
    pub events: Vec<&'static str>,
}

impl Default for World {
    fn default() -> Self {
        Self {
            authenticated: false,
            launch_fails: false,
            disconnected: false,
            failing_reloads: 0,
            expire_on_reload: false,
            scroll_fails: false,
            persist_fails: false,
            url_fails: false,
            serve_qr: true,
            scan_succeeds: true,
            posts: Vec::new(),
            opened: 0,
            closed: 0,
            events: Vec::new(),
        }
    }
}

pub type SharedWorld = Rc<RefCell<World>>;

pub fn world() -> SharedWorld {
    Rc::new(RefCell::new(World::default()))
}

pub fn set_mtime(path: &Path, secs: u64) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

pub fn write_qr(path: &Path, secs: u64) {
    std::fs::write(path, b"qr").unwrap();
    set_mtime(path, secs);
}

pub struct FakePage {
    world: SharedWorld,
    capture_qr: Option<PathBuf>,
    url: RefCell<String>,
}

impl FakePage {
    pub fn new(world: SharedWorld, capture_qr: Option<PathBuf>) -> Self {
        let url = if world.borrow().authenticated {
            FEED_URL
        } else {
            LOGIN_URL
        };
        world.borrow_mut().opened += 1;
        Self {
            world,
            capture_qr,
            url: RefCell::new(url.to_string()),
        }
    }

    fn landing(&self) -> &'static str {
        if self.world.borrow().authenticated {
            FEED_URL
        } else {
            LOGIN_URL
        }
    }
}

#[async_trait(?Send)]
impl FeedPage for FakePage {
    async fn goto(&self, _url: &str) -> BrowserResult<()> {
        self.world.borrow_mut().events.push("goto");
        *self.url.borrow_mut() = self.landing().to_string();
        if let Some(path) = &self.capture_qr {
            if self.world.borrow().serve_qr {
                write_qr(path, 1_000);
            }
        }
        Ok(())
    }

    async fn reload(&self) -> BrowserResult<()> {
        let mut world = self.world.borrow_mut();
        world.events.push("reload");
        if world.failing_reloads > 0 {
            world.failing_reloads -= 1;
            return Err(BrowserError::Network("reload refused".into()));
        }
        if world.expire_on_reload {
            world.expire_on_reload = false;
            world.authenticated = false;
        }
        drop(world);
        *self.url.borrow_mut() = self.landing().to_string();
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        self.world.borrow_mut().events.push("url");
        if self.world.borrow().url_fails {
            return Err(BrowserError::Network("transient cdp error".into()));
        }
        Ok(self.url.borrow().clone())
    }

    async fn scroll_to_top(&self) -> BrowserResult<()> {
        if self.world.borrow().scroll_fails {
            return Err(BrowserError::Unexpected("scroll rejected".into()));
        }
        Ok(())
    }

    async fn run_like_routine(&self, routine: &LikeRoutine) -> BrowserResult<u64> {
        let mut world = self.world.borrow_mut();
        world.events.push("like");
        let count = world
            .posts
            .iter()
            .filter(|author| !routine.excludes(**author))
            .count();
        Ok(count as u64)
    }

    async fn wait_for_url(&self, _pattern: &Regex, timeout: Duration) -> BrowserResult<String> {
        self.world.borrow_mut().events.push("wait");
        if !self.world.borrow().scan_succeeds {
            tokio::time::sleep(timeout).await;
            return Err(BrowserError::Timeout("login".into()));
        }
        // the site swaps in a fresh code once the first one has been seen,
        // then the operator scans it
        tokio::time::sleep(Duration::from_secs(4)).await;
        if let Some(path) = &self.capture_qr {
            set_mtime(path, 2_000);
        }
        tokio::time::sleep(Duration::from_secs(6)).await;
        self.world.borrow_mut().authenticated = true;
        *self.url.borrow_mut() = FEED_URL.to_string();
        Ok(FEED_URL.to_string())
    }

    async fn persist_state(&self, path: &Path) -> BrowserResult<()> {
        self.world.borrow_mut().events.push("persist");
        if self.world.borrow().persist_fails {
            return Err(BrowserError::State("disk full".into()));
        }
        std::fs::write(path, br#"{"saved_at":"2024-01-01T00:00:00Z","cookies":[]}"#)?;
        Ok(())
    }

    fn is_disconnected(&self) -> bool {
        self.world.borrow().disconnected
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.world.borrow_mut().closed += 1;
        Ok(())
    }
}

pub struct FakeLauncher {
    world: SharedWorld,
}

impl FakeLauncher {
    pub fn new(world: SharedWorld) -> Self {
        Self { world }
    }
}

#[async_trait(?Send)]
impl SessionLauncher for FakeLauncher {
    async fn open(&self, request: LaunchRequest) -> BrowserResult<Box<dyn FeedPage>> {
        if self.world.borrow().launch_fails {
            return Err(BrowserError::Launch("no chromium found".into()));
        }
        Ok(Box::new(FakePage::new(self.world.clone(), request.capture_qr)))
    }
}

/// Accepts any file that exists and renders a placeholder.
pub struct FakeQr;

impl QrCodec for FakeQr {
    fn decode(&self, path: &Path) -> BrowserResult<Option<String>> {
        Ok(path.exists().then(|| "https://ptlogin.example/qr".to_string()))
    }

    fn render(&self, payload: &str) -> BrowserResult<String> {
        Ok(format!("[qr {payload}]"))
    }
}

#[derive(Default)]
pub struct CountingNotifier {
    pub calls: AtomicUsize,
}

impl CountingNotifier {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(
        &self,
        _subject: &str,
        _body: &str,
        _attachment: Option<&Path>,
    ) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn config(dir: &TempDir) -> Arc<LikerConfig> {
    let mut config = LikerConfig::default();
    config.account = Some(ACCOUNT);
    config.blocklist = [10000, 10010].into_iter().collect();
    config.refresh_interval_secs = 60;
    config.settle_delay_secs = 3;
    config.browser.qr_capture_wait_secs = 3;
    config.browser.login_timeout_secs = 300;
    config.paths.session = dir.path().join("session.json");
    config.paths.qrcode = dir.path().join("qrcode.png");
    Arc::new(config)
}
