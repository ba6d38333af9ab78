use clap::Parser;
use std::env;
use std::time::Duration;
use tether_frames::FrameConfig;
use tether_logs::LogConfig;
use tether_session::SessionConfig;
use url::Url;

pub const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:7420/ws";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "tether-console", about = "Terminal client for a remote coding agent")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub url: String,
    #[arg(long, default_value = "")]
    pub project: String,
    #[arg(long, default_value = "")]
    pub session: String,
    /// Container whose logs are tailed alongside the session.
    #[arg(long, default_value = "")]
    pub container: String,
    #[arg(long, default_value_t = false)]
    pub browser_mode: bool,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value = "")]
    pub log_level: String,
    /// Working indicator delay in milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub indicator_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub hub_url: Url,
    pub project_id: Option<String>,
    pub session_id: String,
    pub container_id: Option<String>,
    pub browser_mode: bool,
    pub log_dir: String,
    pub log_level: String,
    pub log_stdout: bool,
    pub indicator_delay: Duration,
}

impl ConsoleConfig {
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            project_id: self.project_id.clone(),
            session_id: self.session_id.clone(),
            browser_mode: self.browser_mode,
            indicator_delay: self.indicator_delay,
            ..SessionConfig::default()
        }
    }

    pub fn frames(&self) -> FrameConfig {
        FrameConfig::default()
    }

    pub fn logs(&self) -> LogConfig {
        LogConfig::default()
    }
}

pub fn load_config(args: Args) -> anyhow::Result<ConsoleConfig> {
    let raw_url = resolve_value(&args.url, "TETHER_HUB_URL")
        .unwrap_or_else(|| DEFAULT_HUB_URL.to_string());
    let hub_url = Url::parse(&raw_url)
        .map_err(|err| anyhow::anyhow!("invalid hub url {raw_url:?}: {err}"))?;
    if !matches!(hub_url.scheme(), "ws" | "wss") {
        anyhow::bail!("hub url must use ws:// or wss://, got {raw_url:?}");
    }

    Ok(ConsoleConfig {
        hub_url,
        project_id: resolve_value(&args.project, "TETHER_PROJECT_ID"),
        session_id: resolve_value(&args.session, "TETHER_SESSION_ID")
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        container_id: resolve_value(&args.container, "TETHER_CONTAINER_ID"),
        browser_mode: args.browser_mode || resolve_bool("TETHER_BROWSER_MODE").unwrap_or(false),
        log_dir: resolve_value(&args.log_dir, "TETHER_LOG_DIR").unwrap_or_default(),
        log_level: pick(&args.log_level, None).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        log_stdout: resolve_bool("TETHER_LOG_STDOUT").unwrap_or(false),
        indicator_delay: Duration::from_millis(args.indicator_delay_ms),
    })
}

fn resolve_value(flag: &str, key: &str) -> Option<String> {
    pick(flag, env::var(key).ok())
}

fn resolve_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|value| parse_bool_env(&value))
}

/// Flag wins when non-blank, then the environment value when non-blank.
fn pick(flag: &str, env_value: Option<String>) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    env_value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
