//! The notifier slot: human-facing notifications.

use async_trait::async_trait;

use foreman_models::NotifyEvent;

use crate::error::Result;

/// Delivers notifications to humans (chat, log, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Registry name of this notifier.
    fn name(&self) -> &str;

    async fn notify(&self, event: &NotifyEvent) -> Result<()>;
}
