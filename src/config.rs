//! Environment-driven configuration.
//!
//! Every knob has a default; a value that is present but unparseable is a
//! hard startup error rather than a silent fallback.

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Browser host for discovery and launch.
    pub debug_host: String,
    /// Browser remote-debugging port.
    pub debug_port: u16,
    /// Launch the browser on demand when discovery fails.
    pub auto_launch: bool,
    /// Override executable path.
    pub browser_path: Option<String>,
    /// URL opened on auto-launch.
    pub launch_url: Option<String>,
    /// Direct WebSocket override: bypass discovery and auto-launch entirely.
    pub ws_url: Option<String>,
    /// Console ring-buffer capacity.
    pub console_buffer: usize,
    /// Network ring-buffer capacity.
    pub network_buffer: usize,
    /// Per-managed-process log capacity.
    pub server_log_buffer: usize,
    /// Annotation service base port; the next three are tried on conflict.
    pub annotation_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug_host: "localhost".to_string(),
            debug_port: 9222,
            auto_launch: true,
            browser_path: None,
            launch_url: None,
            ws_url: None,
            console_buffer: 500,
            network_buffer: 200,
            server_log_buffer: 1000,
            annotation_port: 9223,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        Ok(Self {
            debug_host: env_string("PAGELENS_DEBUG_HOST").unwrap_or(defaults.debug_host),
            debug_port: env_parsed("PAGELENS_DEBUG_PORT")?.unwrap_or(defaults.debug_port),
            auto_launch: env_bool("PAGELENS_AUTO_LAUNCH")?.unwrap_or(defaults.auto_launch),
            browser_path: env_string("PAGELENS_BROWSER_PATH"),
            launch_url: env_string("PAGELENS_LAUNCH_URL"),
            ws_url: env_string("PAGELENS_WS_URL"),
            console_buffer: env_parsed("PAGELENS_CONSOLE_BUFFER")?
                .unwrap_or(defaults.console_buffer),
            network_buffer: env_parsed("PAGELENS_NETWORK_BUFFER")?
                .unwrap_or(defaults.network_buffer),
            server_log_buffer: env_parsed("PAGELENS_SERVER_LOG_BUFFER")?
                .unwrap_or(defaults.server_log_buffer),
            annotation_port: env_parsed("PAGELENS_ANNOTATION_PORT")?
                .unwrap_or(defaults.annotation_port),
        })
    }

    /// Root of the browser's HTTP inspection endpoint.
    pub fn inspection_base(&self) -> String {
        format!("http://{}:{}", self.debug_host, self.debug_port)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            BridgeError::Config(format!("{name} has invalid value {raw:?}"))
        }),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => match parse_bool(&raw) {
            Some(b) => Ok(Some(b)),
            None => Err(BridgeError::Config(format!(
                "{name} has invalid value {raw:?} (expected true/false)"
            ))),
        },
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
