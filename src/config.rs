use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "contact-relay")]
#[command(about = "Rate limited contact form relay for Telegram bots")]
pub struct Args {
    // Path to the YAML config file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "/config.yaml")]
    pub config: PathBuf,

    // Overrides server.port from the config file
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Whole config document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Default rate limit for routes that don't set one, e.g. "1/m".
    #[serde(default = "default_rate_limit")]
    pub rate_limit: String,

    /// "*" or a comma-separated list of origins.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: String,

    /// Use X-Forwarded-For / X-Real-IP when resolving the client.
    #[serde(default = "default_true")]
    pub trust_proxy: bool,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Minimum age before a limiter entry may be swept. Raised to the
    /// longest route window at startup.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,

    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,
}

#[derive(Clone, Deserialize)]
pub struct RouteConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub rate_limit: Option<String>,
}

// Keeps bot tokens out of debug output
impl std::fmt::Debug for RouteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteConfig")
            .field("path", &self.path)
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

fn default_port() -> u16 {
    8080
}

fn default_rate_limit() -> String {
    "1/m".to_string()
}

fn default_allowed_origins() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_retention() -> u64 {
    3600
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_notify_timeout() -> u64 {
    10
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            rate_limit: default_rate_limit(),
            allowed_origins: default_allowed_origins(),
            trust_proxy: default_true(),
            sweep_interval_secs: default_sweep_interval(),
            retention_secs: default_retention(),
            shutdown_grace_secs: default_shutdown_grace(),
            notify_timeout_secs: default_notify_timeout(),
            telegram_api_base: default_telegram_api_base(),
        }
    }
}

// Paths the server registers itself
const RESERVED_PATHS: &[&str] = &["/health", "/metrics"];

impl Config {
    /// Reads, expands and validates the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parses a config document, substituting `${NAME}` from the process
    /// environment first.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let expanded = expand_vars(raw, |name| std::env::var(name).ok());
        let mut config: Config = serde_yaml::from_str(&expanded)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        if self.server.rate_limit.trim().is_empty() {
            self.server.rate_limit = default_rate_limit();
        }
        if self.server.allowed_origins.trim().is_empty() {
            self.server.allowed_origins = default_allowed_origins();
        }
        if self.server.port == 0 {
            self.server.port = default_port();
        }
        for route in &mut self.routes {
            let inherit = route
                .rate_limit
                .as_deref()
                .is_none_or(|rl| rl.trim().is_empty());
            if inherit {
                route.rate_limit = Some(self.server.rate_limit.clone());
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.routes.is_empty() {
            return Err(ConfigError::NoRoutes);
        }

        parse_rate_limit(&self.server.rate_limit)?;

        if self.server.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidServer(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for (index, route) in self.routes.iter().enumerate() {
            let invalid = |reason: &str| ConfigError::InvalidRoute {
                index,
                path: route.path.clone(),
                reason: reason.to_string(),
            };

            if route.path.is_empty() {
                return Err(invalid("path is required"));
            }
            if !route.path.starts_with('/') {
                return Err(invalid("path must start with '/'"));
            }
            if route.path.contains(['{', '}', '*'])
                || route.path.split('/').any(|segment| segment.starts_with(':'))
            {
                return Err(invalid("path must be a literal path"));
            }
            if RESERVED_PATHS.contains(&route.path.as_str()) {
                return Err(invalid("path is reserved by the server"));
            }
            if route.bot_token.is_empty() {
                return Err(invalid("bot_token is required"));
            }
            if route.chat_id.is_empty() {
                return Err(invalid("chat_id is required"));
            }
            if !seen.insert(route.path.as_str()) {
                return Err(invalid("path is configured more than once"));
            }
            if let Some(rl) = &route.rate_limit {
                parse_rate_limit(rl).map_err(|e| invalid(&e.to_string()))?;
            }
        }

        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.server.sweep_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.server.retention_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.server.notify_timeout_secs)
    }
}

/// Parses "N/m" or "N/h" into the minimum spacing between two requests.
pub fn parse_rate_limit(spec: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidRateLimit {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };

    let (count, unit) = spec
        .split_once('/')
        .ok_or_else(|| invalid("expected N/m or N/h"))?;

    let count: u32 = count
        .parse()
        .map_err(|_| invalid("count must be a positive integer"))?;
    if count == 0 {
        return Err(invalid("count must be a positive integer"));
    }

    let unit = match unit {
        "m" => Duration::from_secs(60),
        "h" => Duration::from_secs(60 * 60),
        _ => return Err(invalid("unit must be m or h")),
    };

    Ok(unit / count)
}

/// Replaces every `${NAME}` with `lookup(NAME)`, or nothing when unset.
/// An unterminated `${` is copied through as-is.
pub fn expand_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 2..start + 2 + len];
        if let Some(value) = lookup(name) {
            out.push_str(&value);
        }
        rest = &rest[start + 2 + len + 1..];
    }

    out.push_str(rest);
    out
}
