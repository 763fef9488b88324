use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

pub const DEFAULT_CONFIG: &str = r#"# Account whose feed is liked (the same account must scan the login QR code)
account: 10086
# Authors whose posts are never liked
blocklist: [10000, 10010]
# Seconds between two feed reloads
refresh_interval_secs: 60
# Milliseconds between two like clicks
like_spacing_ms: 3000

retry:
  max_attempts: 3       # attempts per network operation
  timeout_secs: 30      # timeout of a single attempt
  base_backoff_secs: 2
  cap_backoff_secs: 10

logging:
  level: INFO
  path: logs/run.log
  size_mb: 10           # accepted but ignored, files rotate daily
  count: 5

# Mail the login QR code when the session expires
notify:
  enabled: false
  smtp:
    sender: ''
    password: ''
    receiver: ''
    server: ''
    port: 587

browser:
  headless: true
  login_timeout_secs: 300
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawConfig")]
pub struct LikerConfig {
    pub account: Option<u64>,
    pub blocklist: BTreeSet<u64>,
    pub refresh_interval_secs: u64,
    pub like_spacing_ms: u64,
    pub settle_delay_secs: u64,
    pub retry: RetrySection,
    pub logging: LoggingSection,
    pub notify: NotifySection,
    pub browser: BrowserSection,
    pub paths: PathsSection,
}

impl Default for LikerConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

impl LikerConfig {
    pub fn from_yaml_str(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.is_none() {
            return Err(ConfigError::Missing("account"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_backoff_secs > self.retry.cap_backoff_secs {
            return Err(ConfigError::Invalid(format!(
                "retry.base_backoff_secs ({}) exceeds retry.cap_backoff_secs ({})",
                self.retry.base_backoff_secs, self.retry.cap_backoff_secs
            )));
        }
        if !self.browser.target_url_template.contains("{account}") {
            return Err(ConfigError::Invalid(
                "browser.target_url_template must contain {account}".into(),
            ));
        }
        regex::Regex::new(&self.browser.logged_in_pattern).map_err(|err| {
            ConfigError::Invalid(format!("browser.logged_in_pattern: {err}"))
        })?;
        if self.notify.enabled && !self.notify.smtp.is_complete() {
            return Err(ConfigError::Invalid(
                "notify.enabled requires smtp sender, password, receiver and server".into(),
            ));
        }
        Ok(())
    }

    pub fn account(&self) -> Result<u64> {
        self.account.ok_or(ConfigError::Missing("account"))
    }

    pub fn target_url(&self) -> Result<String> {
        let account = self.account()?;
        Ok(self
            .browser
            .target_url_template
            .replace("{account}", &account.to_string()))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub timeout_secs: u64,
    pub base_backoff_secs: u64,
    pub cap_backoff_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_secs: 30,
            base_backoff_secs: 2,
            cap_backoff_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub path: Option<PathBuf>,
    pub size_mb: u64,
    pub count: usize,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "INFO".into(),
            path: Some(PathBuf::from("logs/run.log")),
            size_mb: 10,
            count: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    pub enabled: bool,
    pub smtp: SmtpSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSection {
    #[serde(alias = "SENDER")]
    pub sender: String,
    #[serde(alias = "PASSWORD", skip_serializing)]
    pub password: String,
    #[serde(alias = "RECEIVER")]
    pub receiver: String,
    #[serde(alias = "SERVER")]
    pub server: String,
    #[serde(alias = "PORT")]
    pub port: u16,
}

impl Default for SmtpSection {
    fn default() -> Self {
        Self {
            sender: String::new(),
            password: String::new(),
            receiver: String::new(),
            server: String::new(),
            port: 587,
        }
    }
}

impl SmtpSection {
    pub fn is_complete(&self) -> bool {
        [&self.sender, &self.password, &self.receiver, &self.server]
            .iter()
            .all(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub executable_path: Option<PathBuf>,
    pub headless: bool,
    pub sandbox: bool,
    pub profile_dir: PathBuf,
    pub profile_ttl_hours: u64,
    pub target_url_template: String,
    pub logged_in_pattern: String,
    pub qr_response_marker: String,
    pub qr_capture_wait_secs: u64,
    pub login_timeout_secs: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: false,
            profile_dir: PathBuf::from("profiles"),
            profile_ttl_hours: 24,
            target_url_template: "https://user.qzone.qq.com/{account}/infocenter".into(),
            logged_in_pattern: r".*/infocenter([?#].*)?$".into(),
            qr_response_marker: "https://xui.ptlogin2.qq.com/ssl/ptqrshow".into(),
            qr_capture_wait_secs: 3,
            login_timeout_secs: 300,
        }
    }
}

impl BrowserSection {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn qr_capture_wait(&self) -> Duration {
        Duration::from_secs(self.qr_capture_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub session: PathBuf,
    pub qrcode: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            session: PathBuf::from("session.json"),
            qrcode: PathBuf::from("qrcode.png"),
        }
    }
}

/// On-disk shape. Accepts both the sectioned layout and the flat upper-case
/// keys used by older config files.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    #[serde(alias = "QID")]
    account: Option<u64>,
    #[serde(alias = "BLACKLIST")]
    blocklist: Vec<u64>,
    #[serde(alias = "REFRESH_INTERVAL")]
    refresh_interval_secs: Option<u64>,
    like_spacing_ms: Option<u64>,
    settle_delay_secs: Option<u64>,
    retry: RetrySection,
    logging: LoggingSection,
    notify: NotifySection,
    browser: BrowserSection,
    paths: PathsSection,
    #[serde(flatten)]
    legacy: LegacyKeys,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyKeys {
    #[serde(rename = "LIKE_INTERVAL")]
    like_interval_secs: Option<u64>,
    #[serde(rename = "RETRY_TIMES")]
    retry_times: Option<usize>,
    #[serde(rename = "TIMEOUT")]
    timeout_secs: Option<u64>,
    #[serde(rename = "LEVEL")]
    level: Option<String>,
    #[serde(rename = "LOG_PATH")]
    log_path: Option<PathBuf>,
    #[serde(rename = "LOG_SIZE")]
    log_size_mb: Option<u64>,
    #[serde(rename = "LOG_COUNT")]
    log_count: Option<usize>,
    #[serde(rename = "USE_SMTP")]
    use_smtp: Option<bool>,
    #[serde(rename = "SMTP")]
    smtp: Option<SmtpSection>,
}

impl From<RawConfig> for LikerConfig {
    fn from(raw: RawConfig) -> Self {
        let RawConfig {
            account,
            blocklist,
            refresh_interval_secs,
            like_spacing_ms,
            settle_delay_secs,
            mut retry,
            mut logging,
            mut notify,
            browser,
            paths,
            legacy,
        } = raw;

        if let Some(attempts) = legacy.retry_times {
            retry.max_attempts = attempts;
        }
        if let Some(timeout) = legacy.timeout_secs {
            retry.timeout_secs = timeout;
        }
        if let Some(level) = legacy.level {
            logging.level = level;
        }
        if let Some(path) = legacy.log_path {
            logging.path = Some(path);
        }
        if let Some(size) = legacy.log_size_mb {
            logging.size_mb = size;
        }
        if let Some(count) = legacy.log_count {
            logging.count = count;
        }
        if let Some(enabled) = legacy.use_smtp {
            notify.enabled = enabled;
        }
        if let Some(smtp) = legacy.smtp {
            notify.smtp = smtp;
        }

        let like_spacing_ms = like_spacing_ms
            .or(legacy.like_interval_secs.map(|secs| secs.saturating_mul(1000)))
            .unwrap_or(3000);

        Self {
            account: account.filter(|value| *value != 0),
            blocklist: blocklist.into_iter().collect(),
            refresh_interval_secs: refresh_interval_secs.unwrap_or(60),
            like_spacing_ms,
            settle_delay_secs: settle_delay_secs.unwrap_or(3),
            retry,
            logging,
            notify,
            browser,
            paths,
        }
    }
}

pub fn load_liker_config<P: AsRef<Path>>(path: P) -> Result<LikerConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    LikerConfig::from_yaml_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

pub fn write_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
    }
    std::fs::write(path, DEFAULT_CONFIG).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })
}
