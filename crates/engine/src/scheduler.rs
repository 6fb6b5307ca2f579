// SPDX-License-Identifier: MIT

//! Cooperative job scheduler.
//!
//! One background task wakes at the configured cadence and fires every due
//! job sequentially; a job's closure returns before the next fires, so
//! firing is never re-entrant. Jobs are closures owning their captured
//! state.

use aiq_core::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A scheduled closure.
pub type Task = Box<dyn FnMut() + Send>;

struct Job {
    /// Taken out while the job is firing so the lock is not held across
    /// the closure call.
    task: Option<Task>,
    /// `None` marks a one-shot job, removed after firing.
    interval: Option<Duration>,
    next_fire_at: Instant,
    forced: bool,
}

struct SchedulerState {
    jobs: HashMap<String, Job>,
    paused: bool,
}

/// Handle to the scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler<C: Clock> {
    clock: C,
    tick: Duration,
    cancel: CancellationToken,
    state: Arc<Mutex<SchedulerState>>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(clock: C, tick: Duration, cancel: CancellationToken) -> Self {
        Self {
            clock,
            tick,
            cancel,
            state: Arc::new(Mutex::new(SchedulerState { jobs: HashMap::new(), paused: false })),
        }
    }

    /// Spawn the polling task. Runs until the cancellation token fires.
    pub fn start(&self) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scheduler.cancel.cancelled() => break,
                    _ = tokio::time::sleep(scheduler.tick) => {}
                }
                scheduler.tick_now();
            }
            tracing::debug!("scheduler stopped");
        });
    }

    /// Register a periodic job. `immediate` fires it on the first tick.
    pub fn schedule(&self, id: impl Into<String>, interval: Duration, immediate: bool, task: Task) {
        let now = self.clock.now();
        let next_fire_at = if immediate { now } else { now + interval };
        let job = Job { task: Some(task), interval: Some(interval), next_fire_at, forced: false };
        self.state.lock().jobs.insert(id.into(), job);
    }

    /// Register a one-shot job fired once `delay` elapses, then removed.
    pub fn schedule_once(&self, id: impl Into<String>, delay: Duration, task: Task) {
        let job = Job {
            task: Some(task),
            interval: None,
            next_fire_at: self.clock.now() + delay,
            forced: false,
        };
        self.state.lock().jobs.insert(id.into(), job);
    }

    /// Fire a job on the next tick regardless of its deadline.
    pub fn force(&self, id: &str) {
        if let Some(job) = self.state.lock().jobs.get_mut(id) {
            job.forced = true;
        }
    }

    pub fn unschedule(&self, id: &str) {
        self.state.lock().jobs.remove(id);
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.state.lock().jobs.contains_key(id)
    }

    /// Stop firing jobs without losing them.
    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
    }

    /// Run one tick synchronously: fire every due job, one at a time.
    ///
    /// Exposed so tests can steer the scheduler with a fake clock instead
    /// of sleeping.
    pub fn tick_now(&self) {
        let now = self.clock.now();
        let due: Vec<String> = {
            let state = self.state.lock();
            if state.paused {
                return;
            }
            let mut due: Vec<String> = state
                .jobs
                .iter()
                .filter(|(_, job)| job.forced || job.next_fire_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            due.sort();
            due
        };

        for id in due {
            // take the closure out so the lock is released while it runs
            let Some(mut task) = self.state.lock().jobs.get_mut(&id).and_then(|j| j.task.take())
            else {
                continue;
            };
            task();
            let mut state = self.state.lock();
            match state.jobs.get_mut(&id) {
                // unscheduled (or replaced) while firing: drop the closure
                None => {}
                Some(job) if job.task.is_some() => {}
                Some(job) => match job.interval {
                    Some(interval) => {
                        job.task = Some(task);
                        job.forced = false;
                        job.next_fire_at = now + interval;
                    }
                    None => {
                        state.jobs.remove(&id);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
