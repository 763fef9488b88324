use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use feedliker_core::config::LoggingSection;
use feedliker_core::{
    load_liker_config, notifier_from_config, render_artifact, write_default_config, BrowserError,
    ChromiumLauncher, ConfigError, ExitReason, LikerConfig, Supervisor, SupervisorError,
    TerminalQrCodec, DEFAULT_CONFIG_PATH,
};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as log_fmt, EnvFilter};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("{0} already exists, pass --force to overwrite it")]
    AlreadyExists(PathBuf),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Keeps a feed session logged in and likes new posts", long_about = None)]
pub struct Cli {
    /// Path of the YAML config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Output format for inspection commands
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the liker until interrupted
    Run(RunArgs),
    /// Write the commented default config
    InitConfig(InitConfigArgs),
    /// Parse and validate the config, then print the effective values
    CheckConfig,
    /// Print the current login QR code in the terminal
    ShowQr,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Force a headless browser
    #[arg(long, conflicts_with = "headed")]
    pub headless: bool,
    /// Force a visible browser window
    #[arg(long)]
    pub headed: bool,
}

impl RunArgs {
    fn headless_override(&self) -> Option<bool> {
        match (self.headless, self.headed) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct InitConfigArgs {
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    ConfigCreated(PathBuf),
    Stopped(ExitReason),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed | Outcome::ConfigCreated(_) => 0,
            Outcome::Stopped(ExitReason::Shutdown) => 0,
            Outcome::Stopped(ExitReason::Disconnected) => 1,
        }
    }
}

pub async fn run(cli: Cli) -> Result<Outcome> {
    match &cli.command {
        Commands::Run(args) => run_liker(&cli.config, args).await,
        Commands::InitConfig(args) => {
            init_config(&cli.config, args.force)?;
            println!("wrote {}", cli.config.display());
            Ok(Outcome::ConfigCreated(cli.config.clone()))
        }
        Commands::CheckConfig => {
            let config = load_checked(&cli.config)?;
            render(&ConfigReport::new(&cli.config, &config), cli.format)?;
            Ok(Outcome::Completed)
        }
        Commands::ShowQr => {
            let config = load_liker_config(&cli.config)?;
            println!("{}", show_qr(&config.paths.qrcode)?);
            Ok(Outcome::Completed)
        }
    }
}

async fn run_liker(path: &Path, args: &RunArgs) -> Result<Outcome> {
    if !path.exists() {
        write_default_config(path)?;
        eprintln!(
            "no config found, wrote a default one to {}; edit it and run again",
            path.display()
        );
        return Ok(Outcome::ConfigCreated(path.to_path_buf()));
    }
    let config = load_checked(path)?;
    let _guard = init_logging(&config.logging)?;
    info!(config = %path.display(), account = ?config.account, "starting feedliker");

    let mut launcher = ChromiumLauncher::new(config.browser.clone())?;
    if let Some(headless) = args.headless_override() {
        launcher = launcher.with_headless(headless);
    }
    let notifier = notifier_from_config(&config.notify);
    let config = Arc::new(config);
    let mut supervisor = Supervisor::new(
        config,
        Arc::new(launcher),
        Arc::new(TerminalQrCodec),
        notifier,
    )?;

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(shutdown.clone()));
    let result = supervisor.run(shutdown).await;
    signals.abort();

    let metrics = supervisor.metrics();
    info!(
        cycles = metrics.cycles,
        likes = metrics.likes,
        reload_success_rate = metrics.reload_success_rate(),
        recoveries = supervisor.recoveries(),
        "feedliker stopped"
    );
    Ok(Outcome::Stopped(result?))
}

fn load_checked(path: &Path) -> Result<LikerConfig> {
    let config = load_liker_config(path)?;
    config.validate()?;
    Ok(config)
}

pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(AppError::AlreadyExists(path.to_path_buf()));
    }
    write_default_config(path)?;
    Ok(())
}

pub fn show_qr(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(AppError::MissingResource(format!(
            "no qr code at {}",
            path.display()
        )));
    }
    render_artifact(&TerminalQrCodec, path)?.ok_or_else(|| {
        AppError::MissingResource(format!("{} holds no readable qr code", path.display()))
    })
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    wait_for_signal().await;
    info!("signal received, shutting down");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Installs the stderr layer and, when a log path is configured, a
/// non-blocking daily file layer keeping `count` files. `RUST_LOG` wins over
/// the configured level.
pub fn init_logging(logging: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&logging.level)));

    let (file_layer, guard) = match &logging.path {
        Some(path) => {
            let (dir, prefix) = split_log_path(path);
            std::fs::create_dir_all(&dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(prefix)
                .max_log_files(logging.count.max(1))
                .build(&dir)
                .map_err(|err| AppError::Logging(err.to_string()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = log_fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(log_fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|err| AppError::Logging(err.to_string()))?;
    Ok(guard)
}

/// Maps a configured level name, including the `WARNING`/`CRITICAL`
/// spellings, to a filter directive. Unknown names fall back to `info`.
fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" | "notset" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        "off" => "off",
        _ => "info",
    }
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let prefix = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "run.log".to_string());
    (dir, prefix)
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub path: PathBuf,
    pub target_url: String,
    pub config: LikerConfig,
}

impl ConfigReport {
    fn new(path: &Path, config: &LikerConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            target_url: config.target_url().unwrap_or_default(),
            config: config.clone(),
        }
    }
}

impl DisplayFallback for ConfigReport {
    fn display(&self) -> String {
        let config = &self.config;
        let blocklist = config
            .blocklist
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let mut lines = vec![
            format!("config: {}", self.path.display()),
            format!("target: {}", self.target_url),
            format!("blocklist: [{blocklist}]"),
            format!(
                "refresh every {}s, like spacing {}ms",
                config.refresh_interval_secs, config.like_spacing_ms
            ),
            format!(
                "retry: {} attempts, {}s timeout, backoff {}s..{}s",
                config.retry.max_attempts,
                config.retry.timeout_secs,
                config.retry.base_backoff_secs,
                config.retry.cap_backoff_secs
            ),
            format!("notifications: {}", Toggle(config.notify.enabled)),
            format!("headless: {}", Toggle(config.browser.headless)),
        ];
        if let Some(path) = &config.logging.path {
            lines.push(format!(
                "log: {} ({} files, level {})",
                path.display(),
                config.logging.count,
                config.logging.level
            ));
        }
        lines.join("\n")
    }
}

struct Toggle(bool);

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0 { "on" } else { "off" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from(["feedliker", "run", "--headed", "--config", "x.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("x.yaml"));
        match cli.command {
            Commands::Run(args) => assert_eq!(args.headless_override(), Some(false)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn headless_and_headed_conflict() {
        assert!(Cli::try_parse_from(["feedliker", "run", "--headless", "--headed"]).is_err());
    }

    #[test]
    fn run_defaults_to_configured_headless_mode() {
        assert_eq!(RunArgs::default().headless_override(), None);
    }

    #[tokio::test]
    async fn missing_config_is_created_and_exits_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let cli = Cli::try_parse_from([
            "feedliker",
            "run",
            "--config",
            path.to_str().unwrap(),
        ])
        .unwrap();

        let outcome = run(cli).await.unwrap();

        assert_eq!(outcome, Outcome::ConfigCreated(path.clone()));
        assert_eq!(outcome.exit_code(), 0);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("account"));
    }

    #[test]
    fn init_config_refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "account: 1\n");

        assert!(matches!(
            init_config(&path, false),
            Err(AppError::AlreadyExists(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "account: 1\n");

        init_config(&path, true).unwrap();
        assert!(load_liker_config(&path).is_ok());
    }

    #[test]
    fn check_config_reports_effective_values() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "QID: 12345\nBLACKLIST: [7, 3]\n");
        let config = load_checked(&path).unwrap();
        let report = ConfigReport::new(&path, &config);

        assert_eq!(report.target_url, "https://user.qzone.qq.com/12345/infocenter");
        let text = report.display();
        assert!(text.contains("blocklist: [3, 7]"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["config"]["account"], 12345);
        assert!(json["config"]["notify"]["smtp"].get("password").is_none());
    }

    #[test]
    fn check_config_rejects_missing_account() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "blocklist: []\n");
        assert!(matches!(
            load_checked(&path),
            Err(AppError::Config(ConfigError::Missing("account")))
        ));
    }

    #[test]
    fn show_qr_without_artifact_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            show_qr(&dir.path().join("qrcode.png")),
            Err(AppError::MissingResource(_))
        ));
    }

    #[test]
    fn log_path_splits_into_directory_and_prefix() {
        assert_eq!(
            split_log_path(Path::new("logs/run.log")),
            (PathBuf::from("logs"), "run.log".to_string())
        );
        assert_eq!(
            split_log_path(Path::new("run.log")),
            (PathBuf::from("."), "run.log".to_string())
        );
    }

    #[test]
    fn level_names_map_to_filter_directives() {
        assert_eq!(level_directive("INFO"), "info");
        assert_eq!(level_directive("DEBUG"), "debug");
        assert_eq!(level_directive("WARNING"), "warn");
        assert_eq!(level_directive("warn"), "warn");
        assert_eq!(level_directive("CRITICAL"), "error");
        assert_eq!(level_directive("Error"), "error");
        assert_eq!(level_directive("verbose"), "info");
        assert_eq!(level_directive(""), "info");
    }

    #[test]
    fn level_directives_parse_as_global_levels() {
        for level in ["WARNING", "CRITICAL", "bogus"] {
            let filter = EnvFilter::try_new(level_directive(level)).unwrap();
            assert!(filter.max_level_hint().unwrap() <= tracing::level_filters::LevelFilter::INFO);
        }
    }

    #[test]
    fn disconnect_exits_nonzero() {
        assert_eq!(Outcome::Stopped(ExitReason::Shutdown).exit_code(), 0);
        assert_eq!(Outcome::Stopped(ExitReason::Disconnected).exit_code(), 1);
    }
}
