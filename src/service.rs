//! Watch service: a self-renewing schedule around [`PollCycle`].
//!
//! The next tick is armed only after the current cycle finishes. Every cycle,
//! scheduled or not, runs under one gate and loads state inside it, so cycles
//! for one course never overlap even across stop/start. Stopping disarms the
//! schedule; a cycle that is already running completes and is simply not
//! followed by another.

use crate::auth::{Credentials, SharedCredentials};
use crate::cycle::{CycleOutcome, PollCycle};
use crate::error::{Result, WatchError};
use crate::store::WatchState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Snapshot reported by [`WatchService::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchStatus {
    /// Course being watched.
    pub course_id: String,
    /// Whether the schedule is armed.
    pub running: bool,
    /// Whether credentials are configured.
    pub credentials_present: bool,
    /// Masked credential description.
    pub credential_preview: Option<String>,
    /// When the next cycle is due, if armed.
    pub next_run_at: Option<DateTime<Utc>>,
    /// When the last cycle started.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Outcome of the last cycle.
    pub last_outcome: Option<String>,
}

#[derive(Debug, Default)]
struct ScheduleState {
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    last_outcome: Option<String>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Start/stop/status surface for one monitored course.
pub struct WatchService {
    cycle: Arc<PollCycle>,
    credentials: SharedCredentials,
    interval: Duration,
    schedule: Arc<Mutex<ScheduleState>>,
    running: Mutex<Option<Running>>,
    /// Held for the whole of each cycle, including the state load.
    cycle_gate: Arc<AsyncMutex<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl WatchService {
    /// Wrap a cycle. `credentials` must be the provider the cycle reads from,
    /// so that [`start`](Self::start) can replace them.
    pub fn new(cycle: PollCycle, credentials: SharedCredentials, interval: Duration) -> Self {
        Self {
            cycle: Arc::new(cycle),
            credentials,
            interval,
            schedule: Arc::new(Mutex::new(ScheduleState::default())),
            running: Mutex::new(None),
            cycle_gate: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Supply credentials (when given) and arm the schedule. The first cycle
    /// runs immediately.
    ///
    /// Starting an already running service only replaces the credentials.
    /// After a [`stop`](Self::stop) the first new cycle waits for the previous
    /// schedule's in-flight cycle and starts from the state it persisted.
    pub fn start(&self, credentials: Option<Credentials>) {
        if credentials.is_some() {
            self.credentials.set(credentials);
        }

        let mut running = lock(&self.running);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            info!(course = %self.cycle.entity(), "watcher already running");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_schedule(
            Arc::clone(&self.cycle),
            Arc::clone(&self.cycle_gate),
            self.interval,
            Arc::clone(&self.schedule),
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });
        info!(
            course = %self.cycle.entity(),
            interval_secs = self.interval.as_secs(),
            "watcher started"
        );
    }

    /// Disarm the schedule. Returns `false` if it was not armed.
    pub fn stop(&self) -> bool {
        let Some(running) = lock(&self.running).take() else {
            return false;
        };
        running.cancel.cancel();
        lock(&self.schedule).next_run_at = None;
        info!(course = %self.cycle.entity(), "watcher stopped");
        true
    }

    /// Disarm the schedule and wait for an in-flight cycle to finish.
    pub async fn stop_and_wait(&self) {
        let running = lock(&self.running).take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                warn!(error = %e, "watcher task ended abnormally");
            }
            lock(&self.schedule).next_run_at = None;
            info!(course = %self.cycle.entity(), "watcher stopped");
        }
    }

    /// Current status.
    pub fn status(&self) -> WatchStatus {
        let running = lock(&self.running)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished());
        let schedule = lock(&self.schedule);
        WatchStatus {
            course_id: self.cycle.entity().to_owned(),
            running,
            credentials_present: self.credentials.is_present(),
            credential_preview: self.cycle.credentials().preview(),
            next_run_at: if running { schedule.next_run_at } else { None },
            last_run_at: schedule.last_run_at,
            last_outcome: schedule.last_outcome.clone(),
        }
    }

    /// Run a single cycle outside the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] while the schedule is armed, and store
    /// errors from loading state. A cycle still finishing after a plain
    /// [`stop`](Self::stop) is waited for.
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        if lock(&self.running)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
        {
            return Err(WatchError::Config(
                "watcher is running; stop it before running a single cycle".into(),
            ));
        }
        let _gate = self.cycle_gate.lock().await;
        let state = self.cycle.load_state()?;
        let now = Utc::now();
        let (_, outcome) = self.cycle.run_cycle(state, now).await;
        record(&self.schedule, now, &outcome);
        Ok(outcome)
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        if let Some(running) = lock(&self.running).take() {
            running.cancel.cancel();
        }
    }
}

fn record(schedule: &Mutex<ScheduleState>, started: DateTime<Utc>, outcome: &CycleOutcome) {
    let mut schedule = lock(schedule);
    schedule.last_run_at = Some(started);
    schedule.last_outcome = Some(outcome.label());
}

async fn run_schedule(
    cycle: Arc<PollCycle>,
    gate: Arc<AsyncMutex<()>>,
    interval: Duration,
    schedule: Arc<Mutex<ScheduleState>>,
    cancel: CancellationToken,
) {
    // `None` until loaded, and again after a panicked cycle, so the next
    // cycle reads what was last persisted.
    let mut state: Option<WatchState> = None;

    loop {
        let gate_guard = tokio::select! {
            _ = cancel.cancelled() => break,
            guard = gate.lock() => guard,
        };
        let started = Utc::now();

        let loaded = match state.take() {
            Some(current) => Ok(current),
            None => cycle.load_state(),
        };
        let outcome = match loaded {
            Ok(current) => {
                // Each cycle runs in its own task so a panic cannot end the schedule.
                let task = tokio::spawn({
                    let cycle = Arc::clone(&cycle);
                    async move { cycle.run_cycle(current, started).await }
                });
                match task.await {
                    Ok((next, outcome)) => {
                        state = Some(next);
                        outcome
                    }
                    Err(e) => {
                        error!(course = %cycle.entity(), error = %e, "poll cycle panicked");
                        CycleOutcome::Failed(e.to_string())
                    }
                }
            }
            Err(e) => {
                error!(course = %cycle.entity(), error = %e, "cannot load watch state");
                CycleOutcome::Failed(e.to_string())
            }
        };
        drop(gate_guard);
        record(&schedule, started, &outcome);

        if cancel.is_cancelled() {
            break;
        }
        let next_at = Utc::now()
            + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
        lock(&schedule).next_run_at = Some(next_at);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    lock(&schedule).next_run_at = None;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::auth::CredentialHeaders;
    use crate::changes::OverridePayload;
    use crate::notify::Notifier;
    use crate::store::MemoryStateStore;
    use crate::transport::{FetchResponse, Transport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        calls: AtomicUsize,
        panic_on_first: bool,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn fetch(
            &self,
            _url: &str,
            _headers: &CredentialHeaders,
            _validator: Option<&str>,
        ) -> crate::Result<FetchResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_first && n == 0 {
                panic!("transport blew up");
            }
            if n == 0 {
                return Ok(FetchResponse::Ok {
                    payload: OverridePayload::Bare(vec![]),
                    validator: None,
                    continuation: None,
                });
            }
            Ok(FetchResponse::NotModified)
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        fn id(&self) -> &'static str {
            "null"
        }

        async fn send(&self, _text: &str) -> crate::Result<()> {
            Ok(())
        }
    }

    fn service(
        credentials: Option<Credentials>,
        panic_on_first: bool,
        interval: Duration,
    ) -> (WatchService, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
            panic_on_first,
        });
        let shared = SharedCredentials::new(credentials);
        let cycle = PollCycle::new(
            "42",
            "https://canvas.test/overrides",
            transport.clone(),
            Arc::new(NullNotifier),
            Arc::new(MemoryStateStore::new()),
            Arc::new(shared.clone()),
        );
        (WatchService::new(cycle, shared, interval), transport)
    }

    async fn wait_for_calls(transport: &CountingTransport, at_least: usize) {
        for _ in 0..200 {
            if transport.calls.load(Ordering::SeqCst) >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transport was called fewer than {at_least} times");
    }

    #[tokio::test]
    async fn status_before_start_reports_idle() {
        let (service, _) = service(None, false, Duration::from_secs(60));
        let status = service.status();
        assert!(!status.running);
        assert!(!status.credentials_present);
        assert!(status.credential_preview.is_none());
        assert!(status.next_run_at.is_none());
        assert_eq!(status.course_id, "42");
    }

    #[tokio::test]
    async fn start_supplies_credentials_and_arms_schedule() {
        let (service, transport) = service(None, false, Duration::from_millis(20));
        service
            .start(Some(Credentials::Token("1234567890abcdef".to_owned())));
        wait_for_calls(&transport, 2).await;

        let status = service.status();
        assert!(status.running);
        assert!(status.credentials_present);
        assert_eq!(status.credential_preview.as_deref(), Some("token 1234…cdef"));
        assert!(status.last_outcome.is_some());

        assert!(service.stop());
        assert!(!service.stop());
        assert!(!service.status().running);
        assert!(service.status().next_run_at.is_none());
    }

    #[tokio::test]
    async fn stopped_schedule_does_not_tick_again() {
        let (service, transport) = service(
            Some(Credentials::Token("t".to_owned())),
            false,
            Duration::from_millis(20),
        );
        service.start(None);
        wait_for_calls(&transport, 1).await;
        service.stop_and_wait().await;

        let after_stop = transport.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn panicking_cycle_does_not_stop_schedule() {
        let (service, transport) = service(
            Some(Credentials::Token("t".to_owned())),
            true,
            Duration::from_millis(10),
        );
        service.start(None);
        wait_for_calls(&transport, 3).await;
        assert!(service.status().running);
        service.stop_and_wait().await;
    }

    #[tokio::test]
    async fn run_once_is_refused_while_running() {
        let (service, _) = service(
            Some(Credentials::Token("t".to_owned())),
            false,
            Duration::from_secs(60),
        );
        service.start(None);
        assert!(matches!(service.run_once().await, Err(WatchError::Config(_))));
        service.stop_and_wait().await;

        let outcome = service.run_once().await.unwrap();
        assert!(!matches!(outcome, CycleOutcome::Failed(_) | CycleOutcome::Skipped));
    }

    #[tokio::test]
    async fn missing_credentials_keep_schedule_alive() {
        let (service, transport) = service(None, false, Duration::from_millis(10));
        service.start(None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = service.status();
        assert!(status.running);
        assert_eq!(status.last_outcome.as_deref(), Some("skipped (no credentials)"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        service.stop_and_wait().await;
    }

    /// Slow transport that records how many fetches overlap and which
    /// validator each fetch carried.
    #[derive(Default)]
    struct SlowTransport {
        active: AtomicUsize,
        max_active: AtomicUsize,
        validators: std::sync::Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        async fn fetch(
            &self,
            _url: &str,
            _headers: &CredentialHeaders,
            validator: Option<&str>,
        ) -> crate::Result<FetchResponse> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            let call = {
                let mut seen = self.validators.lock().unwrap();
                seen.push(validator.map(str::to_owned));
                seen.len()
            };
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if call == 1 {
                return Ok(FetchResponse::Ok {
                    payload: OverridePayload::Bare(vec![
                        serde_json::json!({"quiz_id": 7, "due_dates": []}),
                    ]),
                    validator: Some("\"e1\"".to_owned()),
                    continuation: None,
                });
            }
            Ok(FetchResponse::NotModified)
        }
    }

    fn slow_service() -> (WatchService, Arc<SlowTransport>) {
        let transport = Arc::new(SlowTransport::default());
        let shared = SharedCredentials::new(Some(Credentials::Token("t".to_owned())));
        let cycle = PollCycle::new(
            "42",
            "https://canvas.test/overrides",
            transport.clone(),
            Arc::new(NullNotifier),
            Arc::new(MemoryStateStore::new()),
            Arc::new(shared.clone()),
        );
        (
            WatchService::new(cycle, shared, Duration::from_secs(60)),
            transport,
        )
    }

    async fn wait_for_fetches(transport: &SlowTransport, at_least: usize) {
        for _ in 0..300 {
            if transport.validators.lock().unwrap().len() >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transport was called fewer than {at_least} times");
    }

    #[tokio::test]
    async fn restart_waits_for_in_flight_cycle() {
        let (service, transport) = slow_service();
        service.start(None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(service.stop());
        service.start(None);
        wait_for_fetches(&transport, 2).await;
        service.stop_and_wait().await;

        assert_eq!(transport.max_active.load(Ordering::SeqCst), 1);
        let validators = transport.validators.lock().unwrap();
        assert_eq!(validators[0], None);
        assert_eq!(validators[1].as_deref(), Some("\"e1\""));
    }

    #[tokio::test]
    async fn run_once_after_stop_waits_for_in_flight_cycle() {
        let (service, transport) = slow_service();
        service.start(None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(service.stop());
        let outcome = service.run_once().await.unwrap();

        // The notice time persisted by the first cycle still holds the cooldown.
        assert_eq!(outcome, CycleOutcome::NotModified { notified: false });
        assert_eq!(transport.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(
            transport.validators.lock().unwrap()[1].as_deref(),
            Some("\"e1\"")
        );
    }
}
