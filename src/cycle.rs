//! One fetch → compare → notify → persist cycle.
//!
//! [`PollCycle::run_cycle`] takes the current [`WatchState`] and returns the
//! next one. It never fails: transport and payload errors leave the state
//! untouched and are reported through [`CycleOutcome::Failed`].

use crate::auth::CredentialProvider;
use crate::changes::{ChangeSet, RenderOptions, diff, normalize, render};
use crate::config::WatchConfig;
use crate::notify::Notifier;
use crate::store::{StateStore, WatchState};
use crate::throttle::{DEFAULT_NO_CHANGE_COOLDOWN, NoChangeThrottle};
use crate::transport::{FetchOutcome, Transport, fetch_overrides};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default text of the "nothing changed" notice.
pub const DEFAULT_NO_CHANGE_MESSAGE: &str = "Nothing changed.";

/// Default bound on continuation pages per cycle.
const DEFAULT_MAX_PAGES: usize = 50;

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No credentials were available; nothing was fetched.
    Skipped,
    /// The origin answered "not modified".
    NotModified { notified: bool },
    /// New data arrived but no tracked field changed.
    Unchanged { notified: bool },
    /// Tracked fields changed. When `delivered` is false nothing was
    /// persisted, so the same change is detected again next cycle.
    Changed { changes: ChangeSet, delivered: bool },
    /// Fetch or parse failed; state was left untouched.
    Failed(String),
}

impl CycleOutcome {
    /// Short label for status output.
    pub fn label(&self) -> String {
        match self {
            Self::Skipped => "skipped (no credentials)".to_owned(),
            Self::NotModified { notified } => format!("not modified (notice sent: {notified})"),
            Self::Unchanged { notified } => format!("unchanged (notice sent: {notified})"),
            Self::Changed { changes, delivered } => {
                format!("changed {} (delivered: {delivered})", changes.summary())
            }
            Self::Failed(reason) => format!("failed: {reason}"),
        }
    }
}

/// Poll cycle controller for one monitored course.
pub struct PollCycle {
    entity: String,
    endpoint: String,
    max_pages: usize,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn StateStore>,
    credentials: Arc<dyn CredentialProvider>,
    render_options: RenderOptions,
    cooldown: Duration,
    no_change_message: String,
}

impl PollCycle {
    /// Create a controller for `entity`, polling `endpoint`.
    pub fn new(
        entity: impl Into<String>,
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn StateStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let entity = entity.into();
        Self {
            render_options: RenderOptions {
                target_label: entity.clone(),
                ..RenderOptions::default()
            },
            entity,
            endpoint: endpoint.into(),
            max_pages: DEFAULT_MAX_PAGES,
            transport,
            notifier,
            store,
            credentials,
            cooldown: DEFAULT_NO_CHANGE_COOLDOWN,
            no_change_message: DEFAULT_NO_CHANGE_MESSAGE.to_owned(),
        }
    }

    /// Build a controller from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WatchError::Config`] if the endpoint URL is invalid.
    pub fn from_config(
        config: &WatchConfig,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn StateStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> crate::Result<Self> {
        Ok(Self::new(
            config.canvas.course_id.trim(),
            config.canvas.endpoint_url()?,
            transport,
            notifier,
            store,
            credentials,
        )
        .with_render_options(config.render_options())
        .with_cooldown(config.poll.no_change_cooldown())
        .with_max_pages(config.canvas.max_pages)
        .with_no_change_message(config.poll.no_change_message.clone()))
    }

    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        self.render_options = options;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_no_change_message(mut self, message: impl Into<String>) -> Self {
        self.no_change_message = message.into();
        self
    }

    /// Monitored entity (course id).
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Credential source used by this cycle.
    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    /// Load this entity's persisted state.
    ///
    /// # Errors
    ///
    /// Returns store read errors.
    pub fn load_state(&self) -> crate::Result<WatchState> {
        WatchState::load(self.store.as_ref(), &self.entity)
    }

    /// Run one cycle starting from `state` and return the next state.
    pub async fn run_cycle(&self, state: WatchState, now: DateTime<Utc>) -> (WatchState, CycleOutcome) {
        let Some(headers) = self.credentials.headers() else {
            warn!(course = %self.entity, "no credentials configured; skipping cycle");
            return (state, CycleOutcome::Skipped);
        };

        let fetched = fetch_overrides(
            self.transport.as_ref(),
            &self.endpoint,
            &headers,
            state.validator.as_deref(),
            self.max_pages,
        )
        .await;

        let mut throttle = NoChangeThrottle::new(self.cooldown).with_last_sent(state.last_notice_at);
        let mut next = state.clone();

        let outcome = match fetched {
            Err(e) => {
                error!(course = %self.entity, error = %e, "poll cycle aborted");
                return (state, CycleOutcome::Failed(e.to_string()));
            }
            Ok(FetchOutcome::NotModified) => {
                debug!(course = %self.entity, "overrides not modified");
                let notified = self.notify_no_change(&mut throttle, now).await;
                CycleOutcome::NotModified { notified }
            }
            Ok(FetchOutcome::Data { payload, validator }) => {
                let current = normalize(&payload);
                let changes = diff(&state.snapshot, &current);

                if changes.is_empty() {
                    debug!(
                        course = %self.entity,
                        quizzes = current.len(),
                        "payload changed but tracked fields did not"
                    );
                    if validator.is_some() {
                        next.validator = validator;
                    }
                    let notified = self.notify_no_change(&mut throttle, now).await;
                    CycleOutcome::Unchanged { notified }
                } else {
                    let text = render(&changes, &self.render_options);
                    match self.notifier.send(&text).await {
                        Ok(()) => {
                            info!(
                                course = %self.entity,
                                summary = %changes.summary(),
                                channel = self.notifier.id(),
                                "change notice sent"
                            );
                            next.snapshot = current;
                            if validator.is_some() {
                                next.validator = validator;
                            }
                            throttle.record_activity(now);
                            CycleOutcome::Changed {
                                changes,
                                delivered: true,
                            }
                        }
                        Err(e) => {
                            warn!(
                                course = %self.entity,
                                error = %e,
                                "change notice failed; will retry next cycle"
                            );
                            return (
                                state,
                                CycleOutcome::Changed {
                                    changes,
                                    delivered: false,
                                },
                            );
                        }
                    }
                }
            }
        };

        next.last_notice_at = throttle.last_sent();
        match next.persist_changes(&state, self.store.as_ref(), &self.entity) {
            Ok(written) if !written.is_empty() => {
                debug!(course = %self.entity, slots = ?written, "persisted state");
            }
            Ok(_) => {}
            Err(e) => error!(course = %self.entity, error = %e, "failed to persist state"),
        }

        (next, outcome)
    }

    async fn notify_no_change(&self, throttle: &mut NoChangeThrottle, now: DateTime<Utc>) -> bool {
        if !throttle.should_notify_no_change(now) {
            debug!(course = %self.entity, "no-change notice suppressed by cooldown");
            return false;
        }
        match self.notifier.send(&self.no_change_message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(course = %self.entity, error = %e, "no-change notice failed");
                false
            }
        }
    }
}
