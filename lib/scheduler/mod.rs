//! A timer-driven interval job runner.
//!
//! Periodic orchestrator work (the recycle and pre-allocation sweeps) runs on
//! fixed intervals, independent of the interactive request path. Each job is
//! one tokio task looping on an interval; removing a job aborts its task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A runner for named interval jobs.
#[derive(Debug, Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Scheduler {
    /// Creates a scheduler with no jobs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interval job under the given id. The job first runs one
    /// full period after registration. A job already registered under the same
    /// id is replaced.
    pub fn add_interval<F, Fut>(&self, job_id: &str, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                job().await;
            }
        });

        debug!("scheduled interval job '{}' every {:?}", job_id, period);
        let mut jobs = self.jobs.lock().expect("scheduler jobs lock poisoned");
        if let Some(old) = jobs.insert(job_id.to_string(), handle) {
            old.abort();
        }
    }

    /// Returns true if a job is registered under the given id.
    pub fn has_job(&self, job_id: &str) -> bool {
        let jobs = self.jobs.lock().expect("scheduler jobs lock poisoned");
        jobs.contains_key(job_id)
    }

    /// Removes a job, aborting its task. Returns true if the job existed.
    pub fn remove_job(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock().expect("scheduler jobs lock poisoned");
        match jobs.remove(job_id) {
            Some(handle) => {
                handle.abort();
                debug!("removed interval job '{}'", job_id);
                true
            }
            None => false,
        }
    }

    /// Aborts every registered job.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().expect("scheduler jobs lock poisoned");
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
