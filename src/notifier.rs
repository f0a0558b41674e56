pub mod telegram;
pub mod terminal;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;

/// Sink for match notifications.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver `text` to `chat_target`.
    fn send(&self, chat_target: &str, text: &str) -> BoxFuture<'_, Result<(), Report<NotifyError>>>;
}
