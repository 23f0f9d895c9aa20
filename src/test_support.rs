//! Shared fixtures for router tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::NotifyError;
use crate::models::ContactSubmission;
use crate::notifier::Notifier;
use crate::rate_limit::RateLimiter;
use crate::routes::{Route, RouteTable};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub bot_token: String,
    pub chat_id: String,
    pub submission: ContactSubmission,
}

/// Notifier that records deliveries instead of making HTTP calls.
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    attempts: Mutex<usize>,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingNotifier {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        bot_token: &str,
        chat_id: &str,
        submission: &ContactSubmission,
    ) -> Result<(), NotifyError> {
        *self.attempts.lock().unwrap() += 1;
        if self.fail {
            return Err(NotifyError::Api("chat not found".to_string()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            submission: submission.clone(),
        });
        Ok(())
    }
}

/// Two routes, `/contact` and `/support`, both using `window`.
pub fn test_state(notifier: Arc<RecordingNotifier>, window: Duration) -> AppState {
    let route = |path: &str, token: &str, chat: &str| Route {
        path: path.to_string(),
        bot_token: token.to_string(),
        chat_id: chat.to_string(),
        window,
    };

    let routes = RouteTable::new(vec![
        route("/contact", "token-contact", "100"),
        route("/support", "token-support", "200"),
    ]);

    AppState {
        limiter: RateLimiter::new(Duration::from_secs(3600)),
        notifier,
        routes: Arc::new(routes),
        trust_proxy: true,
    }
}
