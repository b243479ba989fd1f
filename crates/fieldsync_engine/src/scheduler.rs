//! Single-flight scheduling of sync passes.
//!
//! Triggers come from connectivity changes, a periodic timer, the user, or
//! app start. At most one pass runs at a time; a trigger that arrives while a
//! pass is running is folded into exactly one follow-up pass.

use crate::engine::{SyncEngine, SyncOutcome};
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteApi;
use fieldsync_core::Clock;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// The device came back online.
    ConnectivityRestored,
    /// The periodic timer fired.
    Periodic,
    /// The user asked for a sync.
    UserRequested,
    /// The app started.
    AppStart,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerReason::ConnectivityRestored => "connectivity_restored",
            TriggerReason::Periodic => "periodic",
            TriggerReason::UserRequested => "user_requested",
            TriggerReason::AppStart => "app_start",
        })
    }
}

/// Run token of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No pass is running.
    #[default]
    Idle,
    /// A pass is running.
    Running,
    /// A pass is running and another trigger arrived meanwhile.
    RunRequested,
}

impl SyncState {
    /// Registers a trigger. Returns true if the caller must run the pass.
    pub fn request(&mut self) -> bool {
        match self {
            SyncState::Idle => {
                *self = SyncState::Running;
                true
            }
            SyncState::Running | SyncState::RunRequested => {
                *self = SyncState::RunRequested;
                false
            }
        }
    }

    /// Registers the end of a pass. Returns true if another pass must run.
    pub fn finish(&mut self) -> bool {
        match self {
            SyncState::RunRequested => {
                *self = SyncState::Running;
                true
            }
            SyncState::Running | SyncState::Idle => {
                *self = SyncState::Idle;
                false
            }
        }
    }

    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }
}

/// Coalesces sync triggers into single-flight passes.
pub struct SyncScheduler<R: RemoteApi, C: Clock> {
    engine: Arc<SyncEngine<R, C>>,
    state: Mutex<SyncState>,
}

impl<R: RemoteApi, C: Clock> SyncScheduler<R, C> {
    /// Creates a scheduler driving `engine`.
    pub fn new(engine: Arc<SyncEngine<R, C>>) -> Self {
        Self {
            engine,
            state: Mutex::new(SyncState::Idle),
        }
    }

    /// The engine being driven.
    pub fn engine(&self) -> &Arc<SyncEngine<R, C>> {
        &self.engine
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Requests a sync.
    ///
    /// If no pass is running the caller runs passes until no further trigger
    /// is pending and gets the outcome of the last one. Otherwise the trigger
    /// is coalesced into the running pass's follow-up and `None` is returned.
    ///
    /// # Errors
    ///
    /// A pass error; the scheduler returns to idle.
    pub fn trigger(&self, reason: TriggerReason) -> SyncResult<Option<SyncOutcome>> {
        if !self.state.lock().request() {
            debug!(%reason, "sync already running, trigger coalesced");
            return Ok(None);
        }
        info!(%reason, "sync triggered");

        loop {
            let outcome = match self.engine.run_pass() {
                Ok(outcome) => outcome,
                Err(e) => {
                    *self.state.lock() = SyncState::Idle;
                    return Err(e);
                }
            };
            if !self.state.lock().finish() {
                return Ok(Some(outcome));
            }
            debug!("running follow-up pass for coalesced trigger");
        }
    }
}

/// Conditions a platform scheduler must satisfy before running a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobConstraints {
    /// Only run with network connectivity.
    pub requires_network: bool,
    /// Keep the job scheduled across app and device restarts.
    pub persisted: bool,
}

/// What a job run asks of its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    /// Finished; wait for the next trigger.
    Done,
    /// Run again after the delay.
    Retry(Duration),
}

/// A unit of background work handed to a platform job scheduler.
pub trait BackgroundJob: Send + Sync {
    /// Run conditions.
    fn constraints(&self) -> JobConstraints;

    /// Runs the job once, blocking.
    fn run(&self) -> JobResult;
}

/// Background job that triggers a sync and backs off while entries wait for
/// a retry.
pub struct SyncJob<R: RemoteApi, C: Clock> {
    scheduler: Arc<SyncScheduler<R, C>>,
    attempt: AtomicU32,
}

impl<R: RemoteApi, C: Clock> SyncJob<R, C> {
    /// Creates a job over `scheduler`.
    pub fn new(scheduler: Arc<SyncScheduler<R, C>>) -> Self {
        Self {
            scheduler,
            attempt: AtomicU32::new(0),
        }
    }

    /// Consecutive runs that ended wanting a retry.
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    fn back_off(&self) -> JobResult {
        let retry = &self.scheduler.engine().config().retry;
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= retry.max_attempts {
            self.attempt.store(0, Ordering::SeqCst);
            warn!(attempt, "sync retries exhausted until next trigger");
            return JobResult::Done;
        }
        let delay = retry.delay_for_attempt(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "sync retry scheduled");
        JobResult::Retry(delay)
    }
}

impl<R: RemoteApi, C: Clock> BackgroundJob for SyncJob<R, C> {
    fn constraints(&self) -> JobConstraints {
        JobConstraints {
            requires_network: true,
            persisted: true,
        }
    }

    fn run(&self) -> JobResult {
        match self.scheduler.trigger(TriggerReason::Periodic) {
            Ok(Some(outcome)) if outcome.needs_retry() => self.back_off(),
            Ok(_) | Err(SyncError::Cancelled) => {
                self.attempt.store(0, Ordering::SeqCst);
                JobResult::Done
            }
            Err(e) => {
                warn!(error = %e, "background sync failed");
                self.back_off()
            }
        }
    }
}

/// Runs `job` on a tokio interval, honoring its retry requests.
///
/// Each run happens on the blocking pool. Must be called from within a tokio
/// runtime.
pub fn spawn_periodic<J>(job: Arc<J>, period: Duration) -> JoinHandle<()>
where
    J: BackgroundJob + 'static,
{
    tokio::spawn(async move {
        info!(period_ms = period.as_millis() as u64, "periodic sync started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            loop {
                let runner = Arc::clone(&job);
                match tokio::task::spawn_blocking(move || runner.run()).await {
                    Ok(JobResult::Done) => break,
                    Ok(JobResult::Retry(after)) => tokio::time::sleep(after).await,
                    Err(e) => {
                        warn!(error = %e, "background job panicked");
                        break;
                    }
                }
            }
        }
    })
}

/// Starts periodic background sync if `sync_interval` is configured.
///
/// Returns `None` when no interval is set. Must be called from within a
/// tokio runtime.
pub fn spawn_background_sync<R, C>(scheduler: Arc<SyncScheduler<R, C>>) -> Option<JoinHandle<()>>
where
    R: RemoteApi + 'static,
    C: Clock + 'static,
{
    let period = scheduler.engine().config().sync_interval?;
    Some(spawn_periodic(Arc::new(SyncJob::new(scheduler)), period))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, SyncConfig};
    use crate::remote::{MockRemote, RemoteOperation};
    use fieldsync_core::{LocalStore, Mutation, NewDailyLog, SystemClock};

    #[test]
    fn request_from_idle_runs() {
        let mut state = SyncState::Idle;
        assert!(state.request());
        assert_eq!(state, SyncState::Running);
    }

    #[test]
    fn requests_while_running_coalesce_into_one() {
        let mut state = SyncState::Idle;
        assert!(state.request());
        assert!(!state.request());
        assert!(!state.request());
        assert_eq!(state, SyncState::RunRequested);

        assert!(state.finish());
        assert_eq!(state, SyncState::Running);
        assert!(!state.finish());
        assert_eq!(state, SyncState::Idle);
        assert!(!state.is_active());
    }

    fn scheduler(config: SyncConfig) -> Arc<SyncScheduler<MockRemote, SystemClock>> {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let engine = SyncEngine::new(store, Arc::new(MockRemote::new()), config);
        Arc::new(SyncScheduler::new(Arc::new(engine)))
    }

    #[test]
    fn trigger_runs_pass_and_returns_to_idle() {
        let scheduler = scheduler(SyncConfig::default());
        let outcome = scheduler.trigger(TriggerReason::UserRequested).unwrap();
        assert!(outcome.unwrap().is_success());
        assert_eq!(scheduler.state(), SyncState::Idle);
    }

    #[test]
    fn job_backs_off_then_gives_up() {
        let config = SyncConfig::default()
            .with_max_retry(10)
            .with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(100))
                    .without_jitter(),
            );
        let scheduler = scheduler(config);
        let engine = scheduler.engine();
        engine
            .enqueue_mutation(Mutation::CreateDailyLog(NewDailyLog::new("prj_1", "2025-01-10")))
            .unwrap();
        engine.remote().set_connected(false);

        let job = SyncJob::new(Arc::clone(&scheduler));
        assert!(job.constraints().requires_network);
        assert_eq!(job.run(), JobResult::Retry(Duration::from_millis(100)));
        assert_eq!(job.run(), JobResult::Retry(Duration::from_millis(200)));
        assert_eq!(job.run(), JobResult::Done);
        assert_eq!(job.attempt(), 0);

        engine.remote().set_connected(true);
        assert_eq!(job.run(), JobResult::Done);
        assert_eq!(engine.remote().call_count(RemoteOperation::CreateDailyLog), 4);
        assert!(engine.counts().is_idle());
    }

    #[tokio::test]
    async fn periodic_driver_runs_job() {
        let scheduler = scheduler(SyncConfig::default());
        scheduler
            .engine()
            .enqueue_mutation(Mutation::CreateDailyLog(NewDailyLog::new("prj_1", "2025-01-10")))
            .unwrap();

        let job = Arc::new(SyncJob::new(Arc::clone(&scheduler)));
        let handle = spawn_periodic(job, Duration::from_millis(10));

        for _ in 0..200 {
            if scheduler.engine().counts().is_idle() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();
        assert!(scheduler.engine().counts().is_idle());
    }

    #[tokio::test]
    async fn background_sync_needs_an_interval() {
        assert!(spawn_background_sync(scheduler(SyncConfig::default())).is_none());

        let configured = scheduler(SyncConfig::default().with_sync_interval(Duration::from_secs(60)));
        let handle = spawn_background_sync(configured).unwrap();
        handle.abort();
    }
}
