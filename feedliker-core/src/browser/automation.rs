use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, EnableParams, EventLoadingFinished, EventResponseReceived,
    GetResponseBodyParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::{NavigateParams, ReloadParams};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::handler::Handler;
use chromiumoxide::page::Page;
use futures::StreamExt;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::BrowserSection;

use super::error::{BrowserError, BrowserResult};
use super::page::{FeedPage, LaunchRequest, SessionLauncher};
use super::profile::{BrowserProfile, ProfileManager};
use super::script::{LikeRoutine, SCROLL_TO_TOP};
use super::state::{PersistedSessionState, StoredCookie};

const URL_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: Arc<BrowserSection>,
    profiles: ProfileManager,
    headless: bool,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserSection) -> BrowserResult<Self> {
        let profiles = ProfileManager::from_config(&config)?;
        let headless = config.headless;
        Ok(Self {
            config: Arc::new(config),
            profiles,
            headless,
        })
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn config(&self) -> &BrowserSection {
        &self.config
    }

    async fn launch_browser(&self, profile: &BrowserProfile) -> BrowserResult<(Browser, Handler)> {
        let configured = self.config.executable_path.as_deref();
        let first_error = match self.try_launch(profile, configured).await {
            Ok(pair) => return Ok(pair),
            Err(err) => err,
        };
        let Some(bundled) = find_bundled_chromium() else {
            return Err(BrowserError::Launch(format!(
                "chromium not found, check that it is installed: {first_error}"
            )));
        };
        warn!(
            error = %first_error,
            executable = %bundled.display(),
            "default chromium launch failed, trying bundled executable"
        );
        self.try_launch(profile, Some(&bundled)).await
    }

    async fn try_launch(
        &self,
        profile: &BrowserProfile,
        executable: Option<&Path>,
    ) -> BrowserResult<(Browser, Handler)> {
        let config = self.build_chromium_config(profile, executable)?;
        Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))
    }

    fn build_chromium_config(
        &self,
        profile: &BrowserProfile,
        executable: Option<&Path>,
    ) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(profile.path())
            .with_head()
            .viewport(ChromiumViewport {
                width: 1366,
                height: 768,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            });
        if let Some(executable) = executable {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            "--no-proxy-server".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-setuid-sandbox".to_string(),
            "--disable-infobars".to_string(),
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".into());
        }
        builder = builder.args(args);

        builder
            .build()
            .map_err(|err| BrowserError::Launch(format!("invalid chromium config: {err}")))
    }
}

fn find_bundled_chromium() -> Option<PathBuf> {
    let pattern = if cfg!(windows) {
        "./chrom*/chrome.exe"
    } else {
        "./chrom*/chrome"
    };
    glob::glob(pattern).ok()?.flatten().next()
}

#[async_trait(?Send)]
impl SessionLauncher for ChromiumLauncher {
    async fn open(&self, request: LaunchRequest) -> BrowserResult<Box<dyn FeedPage>> {
        if let Err(err) = self.profiles.cleanup_expired() {
            warn!(error = %err, "failed to clean up expired profiles");
        }
        let profile = self.profiles.allocate()?;
        info!(
            profile = %profile.id(),
            headless = self.headless,
            resume = request.storage_state.is_some(),
            capture_qr = request.capture_qr.is_some(),
            "launching chromium"
        );

        let (browser, mut handler) = match self.launch_browser(&profile).await {
            Ok(pair) => pair,
            Err(err) => {
                let _ = profile.remove().await;
                return Err(err);
            }
        };

        let disconnected = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&disconnected);
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
            flag.store(true, Ordering::SeqCst);
        });
        profile.touch().await?;

        let mut page = ChromiumPage {
            browser,
            page: None,
            profile,
            handler_task: Some(handler_task),
            capture_task: None,
            disconnected,
        };
        if let Err(err) = page.prepare(&self.config, request).await {
            let _ = Box::new(page).close().await;
            return Err(err);
        }
        Ok(Box::new(page))
    }
}

#[derive(Debug)]
pub struct ChromiumPage {
    browser: Browser,
    page: Option<Page>,
    profile: BrowserProfile,
    handler_task: Option<JoinHandle<()>>,
    capture_task: Option<JoinHandle<()>>,
    disconnected: Arc<AtomicBool>,
}

impl ChromiumPage {
    async fn prepare(&mut self, config: &BrowserSection, request: LaunchRequest) -> BrowserResult<()> {
        let page = self
            .browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        page.execute(EnableParams::default()).await?;

        if let Some(path) = request.storage_state.as_deref() {
            let state = PersistedSessionState::load(path).await?;
            let cookies = state
                .cookies
                .iter()
                .map(cookie_param)
                .collect::<BrowserResult<Vec<_>>>()?;
            if !cookies.is_empty() {
                page.set_cookies(cookies).await?;
            }
            debug!(cookies = state.cookies.len(), saved_at = %state.saved_at, "restored session cookies");
        }

        if let Some(target) = request.capture_qr {
            let marker = config.qr_response_marker.to_lowercase();
            let capture_page = page.clone();
            self.capture_task = Some(tokio::spawn(async move {
                if let Err(err) = capture_qr_images(capture_page, marker, target).await {
                    warn!(error = %err, "qr capture stopped");
                }
            }));
        }

        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> BrowserResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Unexpected("page not initialised".into()))
    }
}

#[async_trait(?Send)]
impl FeedPage for ChromiumPage {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        let page = self.page()?;
        page.goto(params).await?;
        page.wait_for_navigation().await?;
        Ok(())
    }

    async fn reload(&self) -> BrowserResult<()> {
        let page = self.page()?;
        page.execute(ReloadParams::default()).await?;
        page.wait_for_navigation().await?;
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.page()?.url().await?.unwrap_or_default())
    }

    async fn scroll_to_top(&self) -> BrowserResult<()> {
        self.page()?.evaluate(SCROLL_TO_TOP).await?;
        Ok(())
    }

    async fn run_like_routine(&self, routine: &LikeRoutine) -> BrowserResult<u64> {
        let params = EvaluateParams::builder()
            .expression(routine.script())
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::Configuration)?;
        let count = self
            .page()?
            .evaluate_expression(params)
            .await?
            .into_value::<f64>()
            .map_err(|err| {
                BrowserError::Unexpected(format!("like routine returned no count: {err}"))
            })?;
        Ok(count.max(0.0) as u64)
    }

    async fn wait_for_url(&self, pattern: &Regex, timeout: Duration) -> BrowserResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let url = self.current_url().await?;
            if pattern.is_match(&url) {
                return Ok(url);
            }
            if self.is_disconnected() {
                return Err(BrowserError::Disconnected);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!("url matching {pattern}")));
            }
            sleep(URL_POLL_INTERVAL).await;
        }
    }

    async fn persist_state(&self, path: &Path) -> BrowserResult<()> {
        let cookies = self
            .page()?
            .get_cookies()
            .await?
            .into_iter()
            .map(stored_cookie)
            .collect::<Vec<_>>();
        PersistedSessionState::new(cookies).save(path).await
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    async fn close(mut self: Box<Self>) -> BrowserResult<()> {
        info!(profile = %self.profile.id(), "closing chromium");
        if let Some(task) = self.capture_task.take() {
            task.abort();
        }
        if !self.is_disconnected() {
            if let Err(err) = self.browser.close().await {
                warn!(error = %err, "failed to close browser gracefully");
            }
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        if let Err(err) = self.profile.remove().await {
            warn!(error = %err, "failed to remove browser profile");
        }
        Ok(())
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!(
                    profile = %self.profile.id(),
                    "ChromiumPage dropped without explicit close"
                );
            }
        }
    }
}

/// Writes every response whose URL contains `marker` to `target`, replacing
/// the previous image so its mtime moves forward.
async fn capture_qr_images(page: Page, marker: String, target: PathBuf) -> BrowserResult<()> {
    let mut responses = page.event_listener::<EventResponseReceived>().await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    let mut pending = HashMap::new();
    loop {
        tokio::select! {
            Some(event) = responses.next() => {
                if event.response.url.to_lowercase().contains(&marker) {
                    pending.insert(event.request_id.inner().clone(), event.request_id.clone());
                }
            }
            Some(event) = finished.next() => {
                let Some(request_id) = pending.remove(event.request_id.inner()) else {
                    continue;
                };
                let body = page.execute(GetResponseBodyParams::new(request_id)).await?;
                let bytes = if body.result.base64_encoded {
                    base64::engine::general_purpose::STANDARD
                        .decode(body.result.body.as_bytes())
                        .map_err(|err| BrowserError::Network(format!("invalid qr payload: {err}")))?
                } else {
                    body.result.body.clone().into_bytes()
                };
                tokio::fs::write(&target, &bytes).await?;
                debug!(path = %target.display(), bytes = bytes.len(), "captured login qr code");
            }
            else => break,
        }
    }
    Ok(())
}

fn stored_cookie(cookie: Cookie) -> StoredCookie {
    StoredCookie {
        expires: (!cookie.session && cookie.expires > 0.0).then_some(cookie.expires),
        name: cookie.name,
        value: cookie.value,
        domain: cookie.domain,
        path: cookie.path,
        http_only: cookie.http_only,
        secure: cookie.secure,
    }
}

fn cookie_param(cookie: &StoredCookie) -> BrowserResult<CookieParam> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .http_only(cookie.http_only)
        .secure(cookie.secure);
    if let Some(expires) = cookie.expires {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    builder
        .build()
        .map_err(|err| BrowserError::State(format!("invalid cookie {}: {err}", cookie.name)))
}
