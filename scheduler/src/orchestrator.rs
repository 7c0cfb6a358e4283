use crate::cadence::{self, Cadence};
use crate::errors::{IngestionError, OrchestratorError, StatusStoreError};
use crate::ingestion::{IngestionStats, IngestionTask};
use crate::metrics_defs::{
    STATUS_STORE_ERRORS, SYNC_OVERLAP_SKIPS, SYNC_RETRIES_SCHEDULED, SYNC_RUN_DURATION, SYNC_RUNS,
};
use crate::status::{SyncJobMetadata, SyncStatusStore};
use chrono::Utc;
use notifier::Dispatcher;
use parking_lot::Mutex;
use shared::{counter, histogram};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    Scheduled,
    Manual,
    Retry,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Manual => "manual",
            TriggerKind::Retry => "retry",
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum RunOutcome {
    /// The job was already running; nothing was started.
    AlreadyRunning,
    Succeeded(IngestionStats),
    Failed { error: String, retry_scheduled: bool },
}

struct Inner {
    tasks: HashMap<String, Arc<dyn IngestionTask>>,
    status: Arc<dyn SyncStatusStore>,
    dispatcher: Arc<Dispatcher>,
    retry_cooldown: Duration,
    running: Mutex<HashSet<String>>,
    retries: Mutex<Vec<JoinHandle<()>>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

/// Marks a job as running for as long as it is alive.
struct RunGuard {
    inner: Arc<Inner>,
    job: String,
}

impl RunGuard {
    fn acquire(inner: &Arc<Inner>, job: &str) -> Option<Self> {
        if !inner.running.lock().insert(job.to_string()) {
            return None;
        }
        Some(RunGuard {
            inner: inner.clone(),
            job: job.to_string(),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.running.lock().remove(&self.job);
    }
}

/// Runs ingestion jobs on their schedules.
///
/// At most one run per job is in flight; triggers that arrive while a job is
/// running are dropped. A failed run gets exactly one retry after the
/// cooldown, unless the failed run was itself the retry.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        tasks: HashMap<String, Arc<dyn IngestionTask>>,
        status: Arc<dyn SyncStatusStore>,
        dispatcher: Arc<Dispatcher>,
        retry_cooldown: Duration,
    ) -> Self {
        Orchestrator {
            inner: Arc::new(Inner {
                tasks,
                status,
                dispatcher,
                retry_cooldown,
                running: Mutex::new(HashSet::new()),
                retries: Mutex::new(Vec::new()),
                timers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registered job ids, sorted.
    pub fn jobs(&self) -> Vec<String> {
        let mut jobs: Vec<_> = self.inner.tasks.keys().cloned().collect();
        jobs.sort();
        jobs
    }

    pub fn has_job(&self, job: &str) -> bool {
        self.inner.tasks.contains_key(job)
    }

    pub fn is_running(&self, job: &str) -> bool {
        self.inner.running.lock().contains(job)
    }

    pub fn status_store(&self) -> &Arc<dyn SyncStatusStore> {
        &self.inner.status
    }

    /// Runs `job` now and waits for it to finish.
    pub async fn trigger(
        &self,
        job: &str,
        kind: TriggerKind,
    ) -> Result<RunOutcome, OrchestratorError> {
        let task = self
            .inner
            .tasks
            .get(job)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownJob(job.to_string()))?;

        let Some(guard) = RunGuard::acquire(&self.inner, job) else {
            counter!(SYNC_OVERLAP_SKIPS, "job" => job.to_string()).increment(1);
            tracing::info!(job, trigger = kind.as_str(), "job already running, skipping");
            return Ok(RunOutcome::AlreadyRunning);
        };

        // The spawned run owns the guard. A caller that stops waiting
        // detaches from the run; the job stays marked running until it ends.
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run(task, guard, kind).await })
            .await
            .map_err(|join_error| OrchestratorError::RunAborted {
                job: job.to_string(),
                reason: join_error.to_string(),
            })
    }

    async fn run(
        self,
        task: Arc<dyn IngestionTask>,
        guard: RunGuard,
        kind: TriggerKind,
    ) -> RunOutcome {
        let job_id = guard.job.clone();
        let job = job_id.as_str();

        tracing::info!(job, trigger = kind.as_str(), "sync run starting");
        let started_at = Utc::now();
        let started = Instant::now();

        // A panicking task surfaces as a JoinError instead of unwinding into the scheduler.
        let result = match tokio::spawn(async move { task.run().await }).await {
            Ok(result) => result,
            Err(join_error) => Err(IngestionError::Aborted(join_error.to_string())),
        };

        histogram!(SYNC_RUN_DURATION, "job" => job.to_string())
            .record(started.elapsed().as_secs_f64());

        let mut metadata = self.load_metadata(job);
        match &result {
            Ok(_) => metadata.record_success(started_at, Utc::now()),
            Err(err) => metadata.record_failure(started_at, &err.to_string()),
        }
        self.save_metadata(&metadata);
        drop(guard);

        match result {
            Ok(stats) => {
                counter!(SYNC_RUNS, "job" => job.to_string(), "trigger" => kind.as_str(), "outcome" => "success")
                    .increment(1);
                self.inner.dispatcher.record_success(job, &stats.to_string());
                RunOutcome::Succeeded(stats)
            }
            Err(err) => {
                counter!(SYNC_RUNS, "job" => job.to_string(), "trigger" => kind.as_str(), "outcome" => "failure")
                    .increment(1);
                let error = err.to_string();
                self.inner
                    .dispatcher
                    .record_failure(
                        job,
                        &format!("{} sync run failed", kind.as_str()),
                        Some(&error),
                    )
                    .await;

                let retry_scheduled = kind != TriggerKind::Retry;
                if retry_scheduled {
                    self.schedule_retry(job);
                } else {
                    tracing::warn!(job, "retry failed, waiting for the next scheduled run");
                }
                RunOutcome::Failed {
                    error,
                    retry_scheduled,
                }
            }
        }
    }

    /// Spawns one timer loop per schedule. Each fire spawns its own trigger,
    /// so a long run never delays the cadence.
    pub fn start(&self, schedules: Vec<(String, Cadence)>) -> Result<(), OrchestratorError> {
        if let Some((job, _)) = schedules.iter().find(|(job, _)| !self.has_job(job)) {
            return Err(OrchestratorError::UnknownJob(job.clone()));
        }

        let mut timers = self.inner.timers.lock();
        for (job, cadence) in schedules {
            let orchestrator = self.clone();
            timers.push(tokio::spawn(orchestrator.run_schedule(job, cadence)));
        }
        Ok(())
    }

    /// Waits for every pending retry, including retries scheduled meanwhile.
    pub async fn drain_retries(&self) {
        loop {
            let pending = std::mem::take(&mut *self.inner.retries.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                let _ = handle.await;
            }
        }
    }

    /// Stops the timer loops and cancels retries still waiting out their
    /// cooldown. Runs in progress finish and record their outcome.
    pub fn shutdown(&self) {
        for handle in self.inner.timers.lock().drain(..) {
            handle.abort();
        }
        for handle in self.inner.retries.lock().drain(..) {
            handle.abort();
        }
        tracing::info!("scheduler stopped");
    }

    async fn run_schedule(self, job: String, cadence: Cadence) {
        tracing::info!(job, cron = cadence.expression(), "schedule started");

        let mut after = Utc::now();
        while let Some(next) = cadence.next_after(after) {
            tokio::time::sleep(cadence::until(next, Utc::now())).await;
            after = next;

            let orchestrator = self.clone();
            let job = job.clone();
            tokio::spawn(async move {
                if let Err(err) = orchestrator.trigger(&job, TriggerKind::Scheduled).await {
                    tracing::error!(job, error = %err, "scheduled trigger failed");
                }
            });
        }

        tracing::warn!(job, "schedule has no further fire times");
    }

    fn schedule_retry(&self, job: &str) {
        counter!(SYNC_RETRIES_SCHEDULED, "job" => job.to_string()).increment(1);
        tracing::info!(
            job,
            cooldown_secs = self.inner.retry_cooldown.as_secs(),
            "retry scheduled"
        );

        let orchestrator = self.clone();
        let job = job.to_string();
        let cooldown = self.inner.retry_cooldown;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            match orchestrator.trigger(&job, TriggerKind::Retry).await {
                Ok(RunOutcome::AlreadyRunning) => {
                    tracing::warn!(job, "retry dropped, job already running");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(job, error = %err, "retry did not complete"),
            }
        });

        let mut retries = self.inner.retries.lock();
        retries.retain(|handle| !handle.is_finished());
        retries.push(handle);
    }

    fn load_metadata(&self, job: &str) -> SyncJobMetadata {
        match self.inner.status.load(job) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => SyncJobMetadata::new(job),
            Err(err) => {
                self.status_store_error(job, &err);
                SyncJobMetadata::new(job)
            }
        }
    }

    fn save_metadata(&self, metadata: &SyncJobMetadata) {
        if let Err(err) = self.inner.status.save(metadata) {
            self.status_store_error(&metadata.job_id, &err);
        }
    }

    fn status_store_error(&self, job: &str, err: &StatusStoreError) {
        counter!(STATUS_STORE_ERRORS).increment(1);
        tracing::error!(job, error = %err, "sync status store error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MemorySyncStatusStore;
    use dsc_client::ClientError;
    use notifier::config::AuditLogConfig;
    use notifier::{AuditLog, NotificationEvent, Notifier, NotifyError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Step {
        Succeed,
        Fail,
        Panic,
    }

    /// Plays `steps` in order, then keeps succeeding.
    struct FakeTask {
        steps: parking_lot::Mutex<VecDeque<Step>>,
        runs: AtomicUsize,
        duration: Duration,
    }

    impl FakeTask {
        fn new(steps: &[Step], duration: Duration) -> Arc<Self> {
            Arc::new(FakeTask {
                steps: parking_lot::Mutex::new(steps.iter().copied().collect()),
                runs: AtomicUsize::new(0),
                duration,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl IngestionTask for FakeTask {
        async fn run(&self) -> Result<IngestionStats, IngestionError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            let step = self.steps.lock().pop_front().unwrap_or(Step::Succeed);
            match step {
                Step::Succeed => Ok(IngestionStats {
                    fetched: 3,
                    inserted: 1,
                    pages: 1,
                }),
                Step::Fail => Err(IngestionError::Upstream(ClientError::AllCredentialsExhausted)),
                Step::Panic => panic!("ingestion bug"),
            }
        }
    }

    /// A notification channel that is always down.
    #[derive(Default)]
    struct DownChannel {
        sends: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Notifier for DownChannel {
        async fn send(&self, _event: &NotificationEvent) -> Result<(), NotifyError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Io(std::io::Error::other("webhook unreachable")))
        }

        fn channel_name(&self) -> &str {
            "down"
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        status: Arc<MemorySyncStatusStore>,
        dispatcher: Arc<Dispatcher>,
        _dir: tempfile::TempDir,
    }

    fn harness(task: Arc<FakeTask>) -> Harness {
        harness_with_channel(task, None)
    }

    fn harness_with_channel(task: Arc<FakeTask>, channel: Option<Arc<dyn Notifier>>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(AuditLog::new(&AuditLogConfig {
            path: dir.path().join("audit.log"),
            max_bytes: 1024 * 1024,
            max_files: 2,
        }));
        if let Some(channel) = channel {
            dispatcher = dispatcher.with_channel(channel, 3, Duration::from_secs(1));
        }
        let dispatcher = Arc::new(dispatcher);
        let status = Arc::new(MemorySyncStatusStore::new());
        let tasks = HashMap::from([("dsc".to_string(), task as Arc<dyn IngestionTask>)]);
        let orchestrator = Orchestrator::new(
            tasks,
            status.clone(),
            dispatcher.clone(),
            Duration::from_secs(300),
        );
        Harness {
            orchestrator,
            status,
            dispatcher,
            _dir: dir,
        }
    }

    impl Harness {
        fn metadata(&self) -> SyncJobMetadata {
            self.status.load("dsc").unwrap().unwrap()
        }

        fn audited_failures(&self) -> usize {
            self.dispatcher.audit_log().read_events().unwrap().len()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_updates_metadata() {
        let task = FakeTask::new(&[], Duration::from_secs(1));
        let h = harness(task.clone());

        let outcome = h.orchestrator.trigger("dsc", TriggerKind::Manual).await.unwrap();

        assert!(matches!(outcome, RunOutcome::Succeeded(ref stats) if stats.fetched == 3));
        let metadata = h.metadata();
        assert_eq!(metadata.consecutive_failures, 0);
        assert!(metadata.last_success_at.is_some());
        assert!(metadata.last_error.is_none());
        assert_eq!(h.audited_failures(), 0);
        assert!(!h.orchestrator.is_running("dsc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_job() {
        let h = harness(FakeTask::new(&[], Duration::ZERO));
        assert_eq!(
            h.orchestrator.trigger("nope", TriggerKind::Manual).await,
            Err(OrchestratorError::UnknownJob("nope".into()))
        );
        assert!(h.status.all().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_triggers_run_once() {
        let task = FakeTask::new(&[], Duration::from_secs(10));
        let h = harness(task.clone());

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let orchestrator = h.orchestrator.clone();
                tokio::spawn(async move { orchestrator.trigger("dsc", TriggerKind::Scheduled).await })
            })
            .collect();

        let mut skipped = 0;
        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                RunOutcome::AlreadyRunning => skipped += 1,
                RunOutcome::Succeeded(_) => succeeded += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(task.runs(), 1);
        assert_eq!(succeeded, 1);
        assert_eq!(skipped, 4);

        // The guard is released once the run finishes.
        h.orchestrator.trigger("dsc", TriggerKind::Manual).await.unwrap();
        assert_eq!(task.runs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retries_once_and_recovers() {
        let task = FakeTask::new(&[Step::Fail], Duration::from_secs(1));
        let h = harness(task.clone());

        let outcome = h.orchestrator.trigger("dsc", TriggerKind::Scheduled).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                retry_scheduled: true,
                ..
            }
        ));
        assert_eq!(h.metadata().consecutive_failures, 1);

        let before = tokio::time::Instant::now();
        h.orchestrator.drain_retries().await;
        assert!(before.elapsed() >= Duration::from_secs(300));

        assert_eq!(task.runs(), 2);
        let metadata = h.metadata();
        assert_eq!(metadata.consecutive_failures, 0);
        assert!(metadata.last_success_at.is_some());
        assert_eq!(h.audited_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_retry_schedules_nothing() {
        let task = FakeTask::new(&[Step::Fail, Step::Fail], Duration::from_secs(1));
        let channel = Arc::new(DownChannel::default());
        let h = harness_with_channel(task.clone(), Some(channel.clone() as Arc<dyn Notifier>));

        h.orchestrator.trigger("dsc", TriggerKind::Scheduled).await.unwrap();
        assert_eq!(channel.sends.load(Ordering::SeqCst), 3);
        h.orchestrator.drain_retries().await;

        assert_eq!(task.runs(), 2);
        let metadata = h.metadata();
        assert_eq!(metadata.consecutive_failures, 2);
        assert!(metadata.last_success_at.is_none());
        assert!(metadata.last_error.is_some());

        // A full delivery attempt sequence per failed run, each ending in an
        // undeliverable record next to the failure itself.
        assert_eq!(channel.sends.load(Ordering::SeqCst), 6);
        let messages: Vec<_> = h
            .dispatcher
            .audit_log()
            .read_events()
            .unwrap()
            .into_iter()
            .map(|event| event.message)
            .collect();
        assert_eq!(
            messages,
            [
                "scheduled sync run failed",
                "failure notification could not be delivered",
                "retry sync run failed",
                "failure notification could not be delivered",
            ]
        );

        // Nothing else is pending.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(task.runs(), 2);
        assert_eq!(channel.sends.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_last_success() {
        let task = FakeTask::new(&[Step::Succeed, Step::Fail, Step::Fail], Duration::from_secs(1));
        let h = harness(task.clone());

        h.orchestrator.trigger("dsc", TriggerKind::Manual).await.unwrap();
        let last_success = h.metadata().last_success_at;
        assert!(last_success.is_some());

        h.orchestrator.trigger("dsc", TriggerKind::Manual).await.unwrap();
        h.orchestrator.drain_retries().await;

        let metadata = h.metadata();
        assert_eq!(metadata.consecutive_failures, 2);
        assert_eq!(metadata.last_success_at, last_success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_outcome_is_not_retried() {
        let task = FakeTask::new(&[Step::Fail], Duration::ZERO);
        let h = harness(task.clone());

        let outcome = h.orchestrator.trigger("dsc", TriggerKind::Retry).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                retry_scheduled: false,
                ..
            }
        ));
        h.orchestrator.drain_retries().await;
        assert_eq!(task.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_is_a_failure() {
        let task = FakeTask::new(&[Step::Panic], Duration::ZERO);
        let h = harness(task.clone());

        let outcome = h.orchestrator.trigger("dsc", TriggerKind::Manual).await.unwrap();
        let RunOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert!(error.contains("aborted"));
        assert!(!h.orchestrator.is_running("dsc"));
        assert_eq!(h.metadata().consecutive_failures, 1);

        // The retry runs the task again and succeeds.
        h.orchestrator.drain_retries().await;
        assert_eq!(task.runs(), 2);
        assert_eq!(h.metadata().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_retry() {
        let task = FakeTask::new(&[Step::Fail], Duration::ZERO);
        let h = harness(task.clone());

        h.orchestrator.trigger("dsc", TriggerKind::Scheduled).await.unwrap();
        h.orchestrator.shutdown();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(task.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_keeps_run_guarded() {
        let task = FakeTask::new(&[], Duration::from_secs(10));
        let h = harness(task.clone());

        let first = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.trigger("dsc", TriggerKind::Manual).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        assert!(h.orchestrator.is_running("dsc"));
        assert_eq!(
            h.orchestrator.trigger("dsc", TriggerKind::Manual).await,
            Ok(RunOutcome::AlreadyRunning)
        );
        assert_eq!(task.runs(), 1);

        // The detached run still finishes and records its outcome.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!h.orchestrator.is_running("dsc"));
        assert!(h.metadata().last_success_at.is_some());
        assert_eq!(task.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_running_retry_finish() {
        let task = FakeTask::new(&[Step::Fail], Duration::from_secs(10));
        let h = harness(task.clone());

        h.orchestrator.trigger("dsc", TriggerKind::Scheduled).await.unwrap();
        // Past the cooldown, the retry is mid-run.
        tokio::time::sleep(Duration::from_secs(305)).await;
        assert_eq!(task.runs(), 2);
        assert!(h.orchestrator.is_running("dsc"));

        h.orchestrator.shutdown();
        assert_eq!(
            h.orchestrator.trigger("dsc", TriggerKind::Manual).await,
            Ok(RunOutcome::AlreadyRunning)
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!h.orchestrator.is_running("dsc"));
        assert_eq!(h.metadata().consecutive_failures, 0);
        assert_eq!(task.runs(), 2);
    }

    #[tokio::test]
    async fn test_start_runs_on_cadence() {
        let task = FakeTask::new(&[], Duration::ZERO);
        let h = harness(task.clone());

        assert_eq!(
            h.orchestrator
                .start(vec![("dpd".into(), Cadence::parse("* * * * * *").unwrap())]),
            Err(OrchestratorError::UnknownJob("dpd".into()))
        );

        h.orchestrator
            .start(vec![("dsc".into(), Cadence::parse("* * * * * *").unwrap())])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        h.orchestrator.shutdown();
        // Let triggers spawned just before the shutdown finish.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let runs = task.runs();
        assert!(runs >= 1, "expected at least one scheduled run, got {runs}");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(task.runs(), runs);
    }
}
