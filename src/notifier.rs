//! Outbound delivery of contact submissions.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::NotifyError;
use crate::models::ContactSubmission;

/// Delivers a submission to one chat destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        bot_token: &str,
        chat_id: &str,
        submission: &ContactSubmission,
    ) -> Result<(), NotifyError>;
}

// Telegram Bot API reply, only the parts we look at
#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends messages through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotifyError::transport)?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(
        &self,
        bot_token: &str,
        chat_id: &str,
        submission: &ContactSubmission,
    ) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, bot_token);
        let text = format_message(submission);

        let res = self
            .client
            .post(url)
            .form(&[("chat_id", chat_id), ("text", text.as_str()), ("parse_mode", "HTML")])
            .send()
            .await
            .map_err(NotifyError::transport)?;

        // Telegram answers errors with a JSON body too, so decode regardless of status
        let body: ApiResponse = res.json().await.map_err(NotifyError::decode)?;

        if !body.ok {
            let reason = body.description.unwrap_or_else(|| "unknown error".to_string());
            return Err(NotifyError::Api(reason));
        }

        Ok(())
    }
}

/// Renders a submission as Telegram HTML.
pub fn format_message(submission: &ContactSubmission) -> String {
    let mut text = format!(
        "📩 <b>New Contact Message</b>\n\n\
         <b>Name:</b> {}\n\
         <b>Email:</b> {}\n\n\
         <b>Message:</b>\n{}",
        escape_html(&submission.name),
        escape_html(&submission.email),
        escape_html(&submission.message),
    );

    if let Some(source) = submission.source() {
        text.push_str(&format!("\n\n🌐 <b>Source:</b> {}", escape_html(source)));
    }

    text
}

// Telegram's HTML mode only needs these three escaped
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
