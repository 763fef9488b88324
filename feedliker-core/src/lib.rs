pub mod browser;
pub mod config;
pub mod error;
pub mod notify;
pub mod qr;
pub mod session;

pub use browser::{
    BrowserError, BrowserResult, ChromiumLauncher, FeedPage, LaunchRequest, LikerMetrics,
    SessionLauncher,
};
pub use config::{
    load_liker_config, write_default_config, LikerConfig, DEFAULT_CONFIG, DEFAULT_CONFIG_PATH,
};
pub use error::{ConfigError, Result};
pub use notify::{notifier_from_config, LogNotifier, Notifier, NotifyError, SmtpNotifier};
pub use qr::{render_artifact, QrCodec, TerminalQrCodec};
pub use session::{
    CredentialWatcher, ExitReason, FeedLoop, Session, SessionError, SessionMachine, SessionState,
    Supervisor, SupervisorError, WatchConfig,
};
