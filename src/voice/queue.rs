//! Learning queue: batches edits per user, rate-limits aggregation and runs
//! jobs on a bounded worker pool.
//!
//! One dispatcher task owns the `BatchScheduler`. It wakes on new commands,
//! worker completions and the scheduler's next deadline, and hands due jobs
//! to workers gated by a semaphore. Delivery is at-least-once: anything still
//! pending in the store when the process stops is re-enqueued by `recover`.

use super::aggregator::{JobOutcome, ProfileAggregator};
use super::scheduler::BatchScheduler;
use super::store::VoiceStore;
use super::types::{EditStatus, LearningJob};
use crate::config::VoiceConfig;
use crate::error::{Error, Result};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use std::sync::Arc;
use std::time::Duration;

/// Upper bound for a single retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);
/// How long shutdown waits for running jobs before giving up on them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub batch_window: Duration,
    pub rate_limit: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
}

impl QueueSettings {
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            concurrency: config.learning_queue_concurrency.max(1),
            batch_window: config.batch_window(),
            rate_limit: config.rate_limit(),
            max_attempts: config.learning_max_attempts.max(1),
            retry_base: config.retry_base(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum QueueCommand {
    Enqueue(LearningJob),
    Discard {
        user_id: String,
        edit_ids: Vec<String>,
    },
    Shutdown,
}

/// Cloneable, non-blocking handle to the dispatcher.
#[derive(Debug, Clone)]
pub struct LearningQueueHandle {
    commands: mpsc::UnboundedSender<QueueCommand>,
}

impl LearningQueueHandle {
    /// Handle whose commands go to the returned receiver instead of a
    /// dispatcher.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<QueueCommand>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        (Self { commands }, receiver)
    }

    /// Hand a job to the dispatcher. Never waits.
    pub fn enqueue(&self, job: LearningJob) {
        let user_id = job.user_id.clone();
        if self.commands.send(QueueCommand::Enqueue(job)).is_err() {
            // Edits stay pending in the store and are recovered on restart.
            tracing::warn!(%user_id, "learning queue stopped, job left for recovery");
        }
    }

    /// Drop the given edits from the user's batch if they have not been
    /// dispatched yet. Edits enqueued under other ids stay scheduled.
    pub fn discard(&self, user_id: &str, edit_ids: Vec<String>) {
        let _ = self.commands.send(QueueCommand::Discard {
            user_id: user_id.to_string(),
            edit_ids,
        });
    }

    /// Stop dispatching. Undispatched edits remain pending in the store.
    pub fn shutdown(&self) {
        let _ = self.commands.send(QueueCommand::Shutdown);
    }

    /// Re-enqueue every pending edit, grouped per user.
    pub async fn recover(&self, store: &VoiceStore) -> Result<usize> {
        let jobs = store.pending_jobs().await?;
        let count = jobs.len();
        for job in jobs {
            self.enqueue(job);
        }
        if count > 0 {
            tracing::info!(users = count, "re-enqueued pending edits");
        }
        Ok(count)
    }

    /// Re-enqueue dead-lettered jobs whose edits are still pending. Returns
    /// how many were replayed.
    pub async fn replay_dead_letters(&self, store: &VoiceStore) -> Result<usize> {
        let mut replayed = 0;
        for letter in store.open_dead_letters().await? {
            let pending: Vec<String> = store
                .edits_by_ids(&letter.user_id, &letter.edit_ids)
                .await?
                .into_iter()
                .filter(|(_, status)| *status == EditStatus::Pending)
                .map(|(record, _)| record.id)
                .collect();

            if !pending.is_empty() {
                self.enqueue(LearningJob {
                    user_id: letter.user_id.clone(),
                    edit_ids: pending,
                });
                replayed += 1;
            }
            store.mark_dead_letter_replayed(&letter.id).await?;
        }
        if replayed > 0 {
            tracing::info!(replayed, "replayed dead-lettered learning jobs");
        }
        Ok(replayed)
    }
}

/// Running queue: the handle plus the dispatcher task.
#[derive(Debug)]
pub struct LearningQueue {
    pub handle: LearningQueueHandle,
    pub task: JoinHandle<()>,
}

impl LearningQueue {
    pub fn spawn(
        aggregator: Arc<ProfileAggregator>,
        store: Arc<VoiceStore>,
        settings: QueueSettings,
    ) -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            scheduler: BatchScheduler::new(settings.batch_window, settings.rate_limit),
            permits: Arc::new(Semaphore::new(settings.concurrency)),
            concurrency: settings.concurrency,
            worker: Arc::new(Worker {
                aggregator,
                store,
                max_attempts: settings.max_attempts,
                retry_base: settings.retry_base,
            }),
            commands,
            completions_tx,
            completions,
        };

        tracing::info!(
            concurrency = settings.concurrency,
            batch_window_secs = settings.batch_window.as_secs(),
            rate_limit_secs = settings.rate_limit.as_secs(),
            "learning queue started"
        );

        Self {
            handle: LearningQueueHandle {
                commands: commands_tx,
            },
            task: tokio::spawn(dispatcher.run()),
        }
    }
}

struct Dispatcher {
    scheduler: BatchScheduler,
    permits: Arc<Semaphore>,
    concurrency: usize,
    worker: Arc<Worker>,
    commands: mpsc::UnboundedReceiver<QueueCommand>,
    completions_tx: mpsc::UnboundedSender<String>,
    completions: mpsc::UnboundedReceiver<String>,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            let deadline = self.scheduler.next_deadline();
            let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(QueueCommand::Enqueue(job)) => {
                        self.scheduler.record(&job.user_id, &job.edit_ids, Instant::now());
                    }
                    Some(QueueCommand::Discard { user_id, edit_ids }) => {
                        let dropped = self.scheduler.discard(&user_id, &edit_ids);
                        tracing::debug!(%user_id, dropped, "discarded pending learning batch");
                    }
                    Some(QueueCommand::Shutdown) | None => break,
                },
                Some(user_id) = self.completions.recv() => {
                    self.scheduler.complete(&user_id, Instant::now());
                }
                _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {}
            }

            self.dispatch_due();
        }

        // Holding every permit means no worker is mid-job.
        let drained = tokio::time::timeout(
            SHUTDOWN_GRACE,
            self.permits.acquire_many(self.concurrency as u32),
        )
        .await;
        if drained.is_err() {
            tracing::warn!("learning jobs still running at shutdown; their edits stay pending");
        }
        tracing::info!("learning queue stopped");
    }

    fn dispatch_due(&mut self) {
        for job in self.scheduler.take_due(Instant::now()) {
            let permits = self.permits.clone();
            let worker = self.worker.clone();
            let completions = self.completions_tx.clone();

            tokio::spawn(async move {
                let user_id = job.user_id.clone();
                match permits.acquire_owned().await {
                    Ok(_permit) => worker.run(job).await,
                    Err(error) => tracing::warn!(%error, %user_id, "worker pool closed"),
                }
                let _ = completions.send(user_id);
            });
        }
    }
}

struct Worker {
    aggregator: Arc<ProfileAggregator>,
    store: Arc<VoiceStore>,
    max_attempts: u32,
    retry_base: Duration,
}

impl Worker {
    /// Run a job until it applies, skips or is dead-lettered.
    async fn run(&self, job: LearningJob) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.aggregator.process_job(&job).await {
                Ok(JobOutcome::Applied(_)) | Ok(JobOutcome::Skipped) => return,
                Err(error) if error.is_transient() && attempt < self.max_attempts => {
                    let delay = retry_delay(self.retry_base, attempt);
                    tracing::warn!(
                        %error,
                        user_id = %job.user_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "learning job failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    self.dead_letter(&job, attempt, error).await;
                    return;
                }
            }
        }
    }

    async fn dead_letter(&self, job: &LearningJob, attempts: u32, error: Error) {
        let exhausted = Error::ExhaustedRetries {
            attempts,
            last_error: error.to_string(),
        };
        tracing::error!(
            error = %exhausted,
            user_id = %job.user_id,
            edits = job.edit_ids.len(),
            "learning job dead-lettered"
        );

        match self.store.dead_letter(job, attempts, &error.to_string()).await {
            Ok(id) => {
                if let Err(error) = self
                    .store
                    .log_event(&job.user_id, "dead_letter", &exhausted.to_string(), None)
                    .await
                {
                    tracing::warn!(%error, dead_letter_id = %id, "failed to record dead letter event");
                }
            }
            Err(error) => {
                // Edits are still pending and come back through recovery.
                tracing::error!(%error, user_id = %job.user_id, "failed to persist dead letter");
            }
        }
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::cache::ProfileCache;
    use crate::voice::store::tests::{new_edit, setup};

    const DRAFT: &str = "We are incredibly proud to share that our team shipped a brand new \
        incremental parser after many long months of careful work on the project.";
    const EDIT: &str = "New parser shipped. It is incremental. Try it.";

    fn settings(window_ms: u64, rate_limit_ms: u64) -> QueueSettings {
        QueueSettings {
            concurrency: 2,
            batch_window: Duration::from_millis(window_ms),
            rate_limit: Duration::from_millis(rate_limit_ms),
            max_attempts: 3,
            retry_base: Duration::from_millis(5),
        }
    }

    fn spawn_queue(store: &Arc<VoiceStore>, settings: QueueSettings) -> LearningQueue {
        let config = VoiceConfig::default();
        let cache = ProfileCache::new(store.clone(), &config);
        let aggregator = Arc::new(ProfileAggregator::new(store.clone(), cache, Arc::new(config)));
        LearningQueue::spawn(aggregator, store.clone(), settings)
    }

    async fn submit(store: &VoiceStore, handle: &LearningQueueHandle, user_id: &str) -> String {
        let records = store
            .insert_edits(&[new_edit(user_id, DRAFT, EDIT)], 100)
            .await
            .unwrap();
        handle.enqueue(LearningJob {
            user_id: user_id.into(),
            edit_ids: vec![records[0].id.clone()],
        });
        records[0].id.clone()
    }

    async fn iterations(store: &VoiceStore, user_id: &str) -> u32 {
        store
            .load_profile(user_id)
            .await
            .unwrap()
            .map(|(profile, _)| profile.learning_iterations)
            .unwrap_or(0)
    }

    async fn wait_for_iterations(store: &VoiceStore, user_id: &str, expected: u32) {
        for _ in 0..300 {
            if iterations(store, user_id).await >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{user_id} never reached {expected} iterations");
    }

    #[tokio::test]
    async fn burst_of_edits_yields_one_iteration() {
        let (store, _dir) = setup().await;
        let queue = spawn_queue(&store, settings(200, 60_000));

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(submit(&store, &queue.handle, "u1").await);
        }
        wait_for_iterations(&store, "u1", 1).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(iterations(&store, "u1").await, 1);
        let statuses = store.edits_by_ids("u1", &ids).await.unwrap();
        assert!(statuses.iter().all(|(_, status)| *status == EditStatus::Learned));
        queue.handle.shutdown();
    }

    #[tokio::test]
    async fn edits_after_a_pass_wait_for_the_rate_limit_slot() {
        let (store, _dir) = setup().await;
        let queue = spawn_queue(&store, settings(10, 500));

        submit(&store, &queue.handle, "u1").await;
        wait_for_iterations(&store, "u1", 1).await;

        submit(&store, &queue.handle, "u1").await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(iterations(&store, "u1").await, 1, "deferred, not dropped");

        wait_for_iterations(&store, "u1", 2).await;
        queue.handle.shutdown();
    }

    #[tokio::test]
    async fn different_users_are_processed_independently() {
        let (store, _dir) = setup().await;
        let queue = spawn_queue(&store, settings(10, 60_000));
        for user_id in ["u1", "u2", "u3"] {
            submit(&store, &queue.handle, user_id).await;
        }
        for user_id in ["u1", "u2", "u3"] {
            wait_for_iterations(&store, user_id, 1).await;
        }
        queue.handle.shutdown();
    }

    #[tokio::test]
    async fn discarded_batch_is_never_learned() {
        let (store, _dir) = setup().await;
        let queue = spawn_queue(&store, settings(100, 0));
        submit(&store, &queue.handle, "u1").await;
        let discarded = store.discard_pending_edits("u1").await.unwrap();
        queue.handle.discard("u1", discarded);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(iterations(&store, "u1").await, 0);
        queue.handle.shutdown();
    }

    #[tokio::test]
    async fn edit_submitted_during_a_discard_is_still_learned() {
        let (store, _dir) = setup().await;
        let queue = spawn_queue(&store, settings(100, 0));
        let first = submit(&store, &queue.handle, "u1").await;

        let discarded = store.discard_pending_edits("u1").await.unwrap();
        assert_eq!(discarded, vec![first.clone()]);
        // Arrives after the store discard but before the queue hears of it.
        let second = submit(&store, &queue.handle, "u1").await;
        queue.handle.discard("u1", discarded);

        wait_for_iterations(&store, "u1", 1).await;
        let statuses = store
            .edits_by_ids("u1", &[first.clone(), second.clone()])
            .await
            .unwrap();
        for (record, status) in statuses {
            if record.id == first {
                assert_eq!(status, EditStatus::Discarded);
            } else {
                assert_eq!(record.id, second);
                assert_eq!(status, EditStatus::Learned);
            }
        }
        queue.handle.shutdown();
    }

    #[tokio::test]
    async fn recover_picks_up_edits_left_pending() {
        let (store, _dir) = setup().await;
        store
            .insert_edits(&[new_edit("u1", DRAFT, EDIT), new_edit("u2", DRAFT, EDIT)], 100)
            .await
            .unwrap();

        let queue = spawn_queue(&store, settings(10, 0));
        assert_eq!(queue.handle.recover(&store).await.unwrap(), 2);
        wait_for_iterations(&store, "u1", 1).await;
        wait_for_iterations(&store, "u2", 1).await;
        queue.handle.shutdown();
    }

    #[tokio::test]
    async fn failing_job_is_dead_lettered_and_replayable() {
        let (store, _dir) = setup().await;
        // An unreadable profile document fails every attempt.
        sqlx::query(
            "INSERT INTO style_profiles (user_id, version, document, ledger, updated_at) \
             VALUES ('u1', 1, 'not json', '{}', CURRENT_TIMESTAMP)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let queue = spawn_queue(&store, settings(10, 0));
        let edit_id = submit(&store, &queue.handle, "u1").await;

        let mut letters = Vec::new();
        for _ in 0..300 {
            letters = store.open_dead_letters().await.unwrap();
            if !letters.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].edit_ids, vec![edit_id.clone()]);
        let statuses = store.edits_by_ids("u1", &[edit_id]).await.unwrap();
        assert_eq!(statuses[0].1, EditStatus::Pending, "edits are retained");

        sqlx::query("DELETE FROM style_profiles WHERE user_id = 'u1'")
            .execute(store.pool())
            .await
            .unwrap();
        assert_eq!(queue.handle.replay_dead_letters(&store).await.unwrap(), 1);
        wait_for_iterations(&store, "u1", 1).await;
        assert!(store.open_dead_letters().await.unwrap().is_empty());
        queue.handle.shutdown();
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let base = Duration::from_millis(2000);
        assert_eq!(retry_delay(base, 1), Duration::from_millis(2000));
        assert_eq!(retry_delay(base, 2), Duration::from_millis(4000));
        assert_eq!(retry_delay(base, 4), Duration::from_millis(16_000));
        assert_eq!(retry_delay(base, 40), MAX_RETRY_DELAY);
    }

    #[test]
    fn settings_follow_config() {
        let settings = QueueSettings::from_config(&VoiceConfig::default());
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.batch_window, Duration::from_secs(120));
        assert_eq!(settings.rate_limit, Duration::from_secs(300));
        assert_eq!(settings.max_attempts, 5);
    }
}
