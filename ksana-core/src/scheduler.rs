use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::clock::Clock;
use crate::error::CoreResult;
use crate::executor::Executor;
use crate::model::{Job, JobStatus, ScheduleKind};
use crate::store::JobStore;

/// The unit of work the scheduler hands off once a job's run time arrives.
/// `Executor` is the only production implementation; the trait boundary
/// exists so the coordinator loop can be driven in tests without issuing
/// real HTTP calls.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: Job, cancel: &CancellationToken);
}

#[async_trait]
impl JobRunner for Executor {
    async fn run(&self, job: Job, cancel: &CancellationToken) {
        self.execute(job, cancel).await
    }
}

struct HeapEntry {
    job_id: String,
    run_at: DateTime<Utc>,
}

/// Index-tracked binary min-heap ordered by `run_at`. `std::collections::
/// BinaryHeap` has no way to remove or re-key an arbitrary element, which
/// the scheduler needs on every update/delete/cancel, so entries carry
/// their own position and a side table maps job id to that position.
struct JobHeap {
    entries: Vec<HeapEntry>,
    index: HashMap<String, usize>,
}

impl JobHeap {
    fn new() -> Self {
        JobHeap {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn peek_run_at(&self) -> Option<DateTime<Utc>> {
        self.entries.first().map(|e| e.run_at)
    }

    fn push(&mut self, job_id: String, run_at: DateTime<Utc>) {
        self.remove(&job_id);
        let idx = self.entries.len();
        self.index.insert(job_id.clone(), idx);
        self.entries.push(HeapEntry { job_id, run_at });
        self.sift_up(idx);
    }

    fn remove(&mut self, job_id: &str) -> Option<HeapEntry> {
        let idx = *self.index.get(job_id)?;
        Some(self.remove_at(idx))
    }

    fn pop_min(&mut self) -> Option<HeapEntry> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.remove_at(0))
    }

    fn remove_at(&mut self, idx: usize) -> HeapEntry {
        let last = self.entries.len() - 1;
        if idx != last {
            self.swap_entries(idx, last);
        }
        let removed = self.entries.pop().expect("idx was in bounds");
        self.index.remove(&removed.job_id);
        if idx < self.entries.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        removed
    }

    fn swap_entries(&mut self, i: usize, j: usize) {
        self.entries.swap(i, j);
        self.index.insert(self.entries[i].job_id.clone(), i);
        self.index.insert(self.entries[j].job_id.clone(), j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.entries[i].run_at < self.entries[parent].run_at {
                self.swap_entries(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.entries.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < n && self.entries[left].run_at < self.entries[smallest].run_at {
                smallest = left;
            }
            if right < n && self.entries[right].run_at < self.entries[smallest].run_at {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap_entries(i, smallest);
            i = smallest;
        }
    }
}

/// Upper bound on how long the coordinator ever sleeps between heap checks,
/// even with an empty heap or a wake signal it somehow missed.
const SAFETY_NET_INTERVAL: StdDuration = StdDuration::from_secs(5);

/// Coordinates job run times: a min-heap of pending fires, a single
/// long-lived loop that sleeps until the next one is due (or the safety
/// net interval, whichever is sooner), and a short-lived task per
/// execution. Add/update/remove mutate the heap under a short-held lock
/// and then wake the loop; the loop never holds that lock across a
/// `Store` call.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn JobRunner>,
    clock: Arc<dyn Clock>,
    heap: Mutex<JobHeap>,
    wake: Notify,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<dyn JobRunner>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Scheduler {
            store,
            runner,
            clock,
            heap: Mutex::new(JobHeap::new()),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Loads every job from the store, computes initial `next_run_at` for
    /// the enabled ones, seeds the heap, and spawns the coordinator loop.
    pub async fn start(self: &Arc<Self>) -> CoreResult<()> {
        let doc = self.store.load().await?;
        let now = self.clock.now();

        let mut heap = self.heap.lock().await;
        for mut job in doc.jobs {
            if !job.enabled {
                continue;
            }
            let became_missed = match Self::calculate_next_run(&mut job, now) {
                Ok(missed) => missed,
                Err(err) => {
                    warn!(job_id = %job.id, error = %err, "failed to calculate next run at startup");
                    continue;
                }
            };

            if let Some(next) = job.next_run_at {
                heap.push(job.id.clone(), next);
            }
            if became_missed {
                let job_id = job.id.clone();
                if let Err(err) = self.store.put(job).await {
                    warn!(job_id = %job_id, error = %err, "failed to persist missed status at startup");
                }
            }
        }
        drop(heap);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_loop().await });
        Ok(())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Seeds (or re-seeds) the heap for a single job right after it is
    /// created, without waiting for the next coordinator tick.
    pub async fn add_job(&self, mut job: Job) -> CoreResult<()> {
        if !job.enabled {
            return Ok(());
        }
        let now = self.clock.now();
        let became_missed = Self::calculate_next_run(&mut job, now)?;

        if let Some(next) = job.next_run_at {
            let mut heap = self.heap.lock().await;
            heap.push(job.id.clone(), next);
        }
        self.wake.notify_one();

        if became_missed {
            self.store.put(job).await?;
        }
        Ok(())
    }

    /// Drops any existing heap entry for the job and recomputes its next
    /// fire time from scratch, as PATCH always does for `ksana`: there is
    /// no partial reschedule, only replace-and-recompute.
    pub async fn update_job(&self, mut job: Job) -> CoreResult<()> {
        {
            let mut heap = self.heap.lock().await;
            heap.remove(&job.id);
        }

        if !job.enabled {
            self.wake.notify_one();
            return Ok(());
        }

        let now = self.clock.now();
        let became_missed = Self::calculate_next_run(&mut job, now)?;

        if let Some(next) = job.next_run_at {
            let mut heap = self.heap.lock().await;
            heap.push(job.id.clone(), next);
        }
        self.wake.notify_one();

        if became_missed {
            self.store.put(job).await?;
        }
        Ok(())
    }

    pub async fn remove_job(&self, job_id: &str) {
        let mut heap = self.heap.lock().await;
        heap.remove(job_id);
        drop(heap);
        self.wake.notify_one();
    }

    /// Fires a job immediately, bypassing the heap entirely. Does not
    /// affect the job's regular schedule or its heap entry.
    pub async fn run_now(&self, job_id: &str) -> CoreResult<()> {
        let job = self.store.get(job_id).await?;
        let runner = Arc::clone(&self.runner);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            runner.run(job, &cancel).await;
        });
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            let wait = self.next_wait().await;
            tokio::select! {
                _ = self.clock.sleep(wait) => {}
                _ = self.wake.notified() => {}
                _ = self.cancel.cancelled() => return,
            }
            if self.cancel.is_cancelled() {
                return;
            }
            self.process_ready_jobs().await;
        }
    }

    async fn next_wait(&self) -> StdDuration {
        let heap = self.heap.lock().await;
        match heap.peek_run_at() {
            None => SAFETY_NET_INTERVAL,
            Some(next) => {
                let now = self.clock.now();
                let delay = (next - now)
                    .to_std()
                    .unwrap_or(StdDuration::from_millis(1));
                delay.min(SAFETY_NET_INTERVAL)
            }
        }
    }

    async fn process_ready_jobs(self: &Arc<Self>) {
        let now = self.clock.now();
        let mut ready_ids = Vec::new();
        {
            let mut heap = self.heap.lock().await;
            while heap.peek_run_at().is_some_and(|run_at| run_at <= now) {
                if let Some(entry) = heap.pop_min() {
                    ready_ids.push(entry.job_id);
                } else {
                    break;
                }
            }
        }

        for job_id in ready_ids {
            match self.store.get(&job_id).await {
                Ok(job) => self.execute_and_reschedule(job, now),
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "job disappeared before firing");
                }
            }
        }
    }

    fn execute_and_reschedule(self: &Arc<Self>, job: Job, scheduled_time: DateTime<Utc>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            this.runner.run(job.clone(), &cancel).await;
            if job.schedule.kind == ScheduleKind::Every {
                this.schedule_next_run(&job, scheduled_time).await;
            }
        });
    }

    async fn schedule_next_run(&self, job: &Job, last_scheduled: DateTime<Utc>) {
        let now = self.clock.now();
        let every = Self::every_duration(job);
        let next_run = Self::apply_jitter(
            Self::advance_to_boundary(last_scheduled + every, every, now),
            job,
        );

        let mut updated = job.clone();
        updated.next_run_at = Some(next_run);

        {
            let mut heap = self.heap.lock().await;
            heap.push(updated.id.clone(), next_run);
        }
        self.wake.notify_one();

        if let Err(err) = self.store.put(updated).await {
            warn!(job_id = %job.id, error = %err, "failed to persist next run time");
        }
    }

    fn every_duration(job: &Job) -> chrono::Duration {
        chrono::Duration::from_std(job.schedule.every.as_std())
            .unwrap_or_else(|_| chrono::Duration::seconds(0))
    }

    /// Advances `next_run` by `every` until it is strictly after `now`,
    /// collapsing any number of fully-elapsed periods into a single step
    /// rather than backfilling each missed tick.
    fn advance_to_boundary(
        mut next_run: DateTime<Utc>,
        every: chrono::Duration,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        while next_run <= now {
            next_run += every;
        }
        next_run
    }

    fn apply_jitter(run_at: DateTime<Utc>, job: &Job) -> DateTime<Utc> {
        if job.schedule.jitter.is_zero() {
            return run_at;
        }
        let jitter_nanos = job.schedule.jitter.as_std().as_nanos().min(i64::MAX as u128) as i64;
        if jitter_nanos <= 0 {
            return run_at;
        }
        let offset = rand::thread_rng().gen_range(0..jitter_nanos);
        run_at + chrono::Duration::nanoseconds(offset)
    }

    /// Computes `next_run_at` (and, for a lapsed one-shot, flips
    /// `last_status` to `missed`) for a job being considered for the first
    /// time. Returns whether the job was just marked missed, so the caller
    /// knows to persist that change.
    fn calculate_next_run(job: &mut Job, now: DateTime<Utc>) -> CoreResult<bool> {
        match job.schedule.kind {
            ScheduleKind::Once => {
                let run_at = job.schedule.run_at.ok_or_else(|| {
                    crate::error::CoreError::Validation("run_at is required for once schedule".into())
                })?;
                if run_at < now {
                    job.last_status = JobStatus::Missed;
                    job.next_run_at = None;
                    return Ok(true);
                }
                job.next_run_at = Some(run_at);
                Ok(false)
            }
            ScheduleKind::Every => {
                if job.next_run_at.is_none() {
                    let start_at = job.schedule.start_at.unwrap_or(now);
                    let every = Self::every_duration(job);
                    let next_run =
                        Self::apply_jitter(Self::advance_to_boundary(start_at, every, now), job);
                    job.next_run_at = Some(next_run);
                }
                Ok(false)
            }
        }
    }
}
