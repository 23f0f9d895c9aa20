use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};

use crate::metrics::LIMITER_ENTRIES;

// Rate limit key - one entry per client per route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub identity: String,
    pub route: String,
}

impl RateKey {
    pub fn new(identity: &str, route: &str) -> Self {
        Self {
            identity: identity.to_string(),
            route: route.to_string(),
        }
    }
}

/// Minimum-interval limiter keyed by (client, route).
///
/// Each key remembers when its last request was admitted. A request is
/// admitted when the key is new or its window has fully elapsed. Clones
/// share the same table.
#[derive(Clone)]
pub struct RateLimiter {
    entries: Arc<DashMap<RateKey, Instant>>,
    retention: Duration,
}

impl RateLimiter {
    /// `retention` is how long an entry must sit untouched before the sweep
    /// may drop it. Keep it at least as long as the longest window.
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            retention,
        }
    }

    pub fn allow(&self, identity: &str, route: &str, window: Duration) -> bool {
        self.allow_at(identity, route, window, Instant::now())
    }

    // The entry guard holds the shard write lock, so the check and the
    // update below cannot interleave with another caller on the same key.
    fn allow_at(&self, identity: &str, route: &str, window: Duration, now: Instant) -> bool {
        match self.entries.entry(RateKey::new(identity, route)) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                if now.saturating_duration_since(*slot.get()) >= window {
                    slot.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Drops entries older than the retention horizon. Returns how many went.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, last| now.saturating_duration_since(*last) < self.retention);
        let removed = before.saturating_sub(self.entries.len());
        LIMITER_ENTRIES.set(self.entries.len() as i64);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts the periodic sweep on the current tokio runtime.
    pub fn spawn_sweeper(&self, every: Duration) -> SweepTask {
        let limiter = self.clone();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticker = interval_at(start, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval = ?every, retention = ?limiter.retention, "rate limit sweeper started");

            loop {
                ticker.tick().await;
                let removed = limiter.sweep();
                tracing::debug!(removed, remaining = limiter.len(), "rate limit sweep finished");
            }
        });

        SweepTask { handle }
    }
}

/// Handle to the background sweep. Stopping or dropping it ends the task.
pub struct SweepTask {
    handle: JoinHandle<()>,
}

impl SweepTask {
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
