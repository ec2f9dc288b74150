//! Notification channels.
//!
//! The poll cycle only talks to the [`Notifier`] trait. New channels only
//! need to implement it.

pub mod discord;

use async_trait::async_trait;

pub use discord::DiscordNotifier;

/// Delivers notice text to a channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Stable channel identifier (e.g. `discord`).
    fn id(&self) -> &'static str;

    /// Send one message. Failures are reported, never retried here.
    async fn send(&self, text: &str) -> crate::Result<()>;
}

/// Writes notices to the log instead of a chat channel (dry runs).
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn id(&self) -> &'static str {
        "log"
    }

    async fn send(&self, text: &str) -> crate::Result<()> {
        tracing::info!(target: "override_watch::notice", "{text}");
        Ok(())
    }
}
