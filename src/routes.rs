use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, parse_rate_limit};
use crate::error::ConfigError;

/// One inbound path bound to a chat destination. Immutable once built.
#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub bot_token: String,
    pub chat_id: String,
    pub window: Duration,
}

impl Route {
    /// Short SHA-256 of the bot token, safe to log.
    pub fn token_fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bot_token.as_bytes());
        format!("{:x}", digest)[..12].to_string()
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("bot", &self.token_fingerprint())
            .field("chat_id", &self.chat_id)
            .field("window", &self.window)
            .finish()
    }
}

// Route table, built once at startup
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let routes = config
            .routes
            .iter()
            .map(|rc| {
                let spec = rc.rate_limit.as_deref().unwrap_or(config.server.rate_limit.as_str());
                let window = parse_rate_limit(spec)?;
                Ok(Route {
                    path: rc.path.clone(),
                    bot_token: rc.bot_token.clone(),
                    chat_id: rc.chat_id.clone(),
                    window,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let table = Self::new(routes);
        if table.is_empty() {
            return Err(ConfigError::NoRoutes);
        }

        Ok(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn longest_window(&self) -> Duration {
        self.routes
            .iter()
            .map(|r| r.window)
            .max()
            .unwrap_or_default()
    }

    /// Sweep horizon: the configured retention, stretched so no entry is
    /// dropped while its cooldown is still running.
    pub fn retention(&self, configured: Duration) -> Duration {
        configured.max(self.longest_window())
    }
}
