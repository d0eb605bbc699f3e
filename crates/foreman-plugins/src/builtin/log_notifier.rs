//! Notifier that writes to the coordinator's own log.

use async_trait::async_trait;

use foreman_models::{NotifyEvent, Priority};

use crate::error::Result;
use crate::notifier::Notifier;

/// Fallback notifier: every event lands in the tracing log at a level
/// matching its priority band.
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &NotifyEvent) -> Result<()> {
        let session = event.session_id.as_deref().unwrap_or("-");
        match event.priority {
            Priority::Urgent => {
                tracing::error!(kind = %event.kind, session = %session, "{}", event.message)
            }
            Priority::Action | Priority::Warning => {
                tracing::warn!(kind = %event.kind, session = %session, "{}", event.message)
            }
            Priority::Info => {
                tracing::info!(kind = %event.kind, session = %session, "{}", event.message)
            }
        }
        Ok(())
    }
}
