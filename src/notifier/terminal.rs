use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::notifier::Notifier;

/// Writes notifications to the log instead of a chat.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn send(&self, chat_target: &str, text: &str) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        tracing::warn!(chat = chat_target, "ALERT: {}", text);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminal_notifier_always_succeeds() {
        let notifier = TerminalNotifier;
        notifier
            .send("terminal", "Buy JPY ⇄ USDT\nPrice: 139.5 JPY/USDT")
            .await
            .expect("terminal send");
    }
}
