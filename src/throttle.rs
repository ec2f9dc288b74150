//! Cooldown for "nothing changed" notices.
//!
//! Only the no-change branch consults the throttle. Real change notices are
//! always sent and merely re-arm the cooldown via [`NoChangeThrottle::record_activity`].

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default minimum spacing between two no-change notices.
pub const DEFAULT_NO_CHANGE_COOLDOWN: Duration = Duration::from_secs(120);

/// Throttle state: the cooldown and when the last notice went out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoChangeThrottle {
    cooldown: Duration,
    last_sent: Option<DateTime<Utc>>,
}

impl Default for NoChangeThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_NO_CHANGE_COOLDOWN)
    }
}

impl NoChangeThrottle {
    /// Create a throttle that has never sent a notice.
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: None,
        }
    }

    /// Restore the last-sent timestamp from persisted state.
    #[must_use]
    pub fn with_last_sent(mut self, last_sent: Option<DateTime<Utc>>) -> Self {
        self.last_sent = last_sent;
        self
    }

    /// Decide whether a no-change notice may be sent at `now`.
    ///
    /// Accepting records `now` as the new last-sent time. A `now` earlier
    /// than the stored timestamp (clock step backwards) is rejected.
    pub fn should_notify_no_change(&mut self, now: DateTime<Utc>) -> bool {
        let allowed = match self.last_sent {
            None => true,
            Some(last) => now
                .signed_duration_since(last)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.cooldown),
        };
        if allowed {
            self.last_sent = Some(now);
        }
        allowed
    }

    /// A real change notice went out; restart the cooldown from `now`.
    pub fn record_activity(&mut self, now: DateTime<Utc>) {
        self.last_sent = Some(now);
    }

    /// When the cooldown was last armed.
    #[must_use]
    pub fn last_sent(&self) -> Option<DateTime<Utc>> {
        self.last_sent
    }

    /// Configured cooldown.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
