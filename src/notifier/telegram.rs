use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Secret;
use crate::error::NotifyError;
use crate::notifier::Notifier;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";
const SEND_TIMEOUT_SECS: u64 = 10;

/// Sends notifications through the Telegram Bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    token: Secret,
}

impl TelegramNotifier {
    pub fn new(token: Secret) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
        }
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), Report<NotifyError>> {
        // The URL embeds the bot token; never log it.
        let url = format!(
            "{TELEGRAM_API_URL}/bot{}/sendMessage",
            self.token.expose()
        );

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .json(&SendMessage { chat_id, text })
            .send()
            .await
            .map_err(|e| e.without_url())
            .change_context(NotifyError::Request {
                service: "telegram".into(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let description = response
                .json::<ApiError>()
                .await
                .map(|e| e.description)
                .unwrap_or_default();
            return Err(Report::new(NotifyError::Status {
                service: "telegram".into(),
                status: status.as_u16(),
            })
            .attach(format!("description: {description}")));
        }

        debug!(chat = chat_id, "telegram message sent");
        Ok(())
    }
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn send(&self, chat_target: &str, text: &str) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        let chat_target = chat_target.to_owned();
        let text = text.to_owned();
        Box::pin(async move { self.send_message(&chat_target, &text).await })
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    description: String,
}
