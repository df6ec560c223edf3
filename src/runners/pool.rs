// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Runner pool
//!
//! All runner state sits behind one mutex, so acquiring is a single
//! read-then-write critical section and a runner is never handed to two
//! jobs. Every release wakes schedulers waiting for capacity.

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use super::{Runner, RunnerStatus};
use crate::errors::{PipewrightError, PipewrightResult};
use crate::ids::{JobId, RunnerId};

/// Shared pool of runners
#[derive(Debug, Default)]
pub struct RunnerPool {
    runners: Mutex<Vec<Runner>>,
    released: Notify,
}

impl RunnerPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Runner>> {
        self.runners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a runner; it starts Online and idle
    pub fn register(
        &self,
        id: impl Into<RunnerId>,
        name: impl Into<String>,
        tags: Vec<String>,
    ) -> PipewrightResult<Runner> {
        let id = id.into();
        let mut runners = self.lock();
        if runners.iter().any(|r| r.id == id) {
            return Err(PipewrightError::RunnerAlreadyRegistered {
                runner: id.to_string(),
            });
        }

        let runner = Runner::new(id, name, tags);
        tracing::info!(runner = %runner.id, tags = ?runner.tags, "Runner registered");
        runners.push(runner.clone());
        drop(runners);

        self.released.notify_waiters();
        Ok(runner)
    }

    /// Claim the first idle Online runner (registration order) whose tags
    /// cover `tags`
    ///
    /// Returns `None` when no runner is free; the caller defers and tries
    /// again later.
    pub fn acquire(self: &Arc<Self>, tags: &[String], job: JobId) -> Option<RunnerLease> {
        let mut runners = self.lock();
        let runner = runners.iter_mut().find(|r| r.is_available_for(tags))?;
        runner.current_job = Some(job);
        let id = runner.id.clone();
        drop(runners);

        tracing::debug!(runner = %id, job = %job, "Runner acquired");
        Some(RunnerLease {
            pool: Arc::clone(self),
            runner: id,
            released: false,
        })
    }

    /// Return a runner to the pool
    pub fn release(&self, id: &RunnerId) -> PipewrightResult<()> {
        let mut runners = self.lock();
        let runner = runners
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| PipewrightError::RunnerNotFound {
                runner: id.to_string(),
            })?;

        let Some(job) = runner.current_job.take() else {
            return Err(PipewrightError::RunnerNotBusy {
                runner: id.to_string(),
            });
        };
        runner.jobs_run += 1;
        drop(runners);

        tracing::debug!(runner = %id, job = %job, "Runner released");
        self.released.notify_waiters();
        Ok(())
    }

    /// Record liveness and status reported by a runner
    pub fn heartbeat(&self, id: &RunnerId, status: RunnerStatus) -> PipewrightResult<()> {
        let mut runners = self.lock();
        let runner = runners
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| PipewrightError::RunnerNotFound {
                runner: id.to_string(),
            })?;

        let previous = runner.status;
        runner.status = status;
        runner.last_heartbeat_at = Utc::now();
        drop(runners);

        if previous != status {
            tracing::info!(runner = %id, from = %previous, to = %status, "Runner status changed");
            if status == RunnerStatus::Online {
                self.released.notify_waiters();
            }
        } else {
            tracing::trace!(runner = %id, "Heartbeat");
        }
        Ok(())
    }

    /// Snapshot of one runner
    pub fn get(&self, id: &RunnerId) -> Option<Runner> {
        self.lock().iter().find(|r| &r.id == id).cloned()
    }

    /// Snapshot of every runner in registration order
    pub fn list(&self) -> Vec<Runner> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runners currently free to take a job with no tag requirement
    pub fn idle_count(&self) -> usize {
        self.lock().iter().filter(|r| r.is_available_for(&[])).count()
    }

    /// Whether any registered runner could ever run a job with `tags`
    pub fn has_capable_runner(&self, tags: &[String]) -> bool {
        self.lock().iter().any(|r| r.supports(tags))
    }

    /// Future that resolves on the next release or status change
    ///
    /// Create it before checking for capacity, then await it, so a release
    /// in between is not missed.
    pub fn released(&self) -> Notified<'_> {
        self.released.notified()
    }
}

/// Scoped claim on a runner; releases it on drop
#[derive(Debug)]
pub struct RunnerLease {
    pool: Arc<RunnerPool>,
    runner: RunnerId,
    released: bool,
}

impl RunnerLease {
    pub fn runner_id(&self) -> &RunnerId {
        &self.runner
    }

    /// Release explicitly and surface pool errors
    pub fn release(mut self) -> PipewrightResult<()> {
        self.released = true;
        self.pool.release(&self.runner)
    }
}

impl Drop for RunnerLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.pool.release(&self.runner) {
            tracing::warn!(runner = %self.runner, error = %e, "Failed to release runner lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(runners: &[(&str, &[&str])]) -> Arc<RunnerPool> {
        let pool = Arc::new(RunnerPool::new());
        for (id, tags) in runners {
            pool.register(*id, *id, tags.iter().map(|t| t.to_string()).collect())
                .unwrap();
        }
        pool
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let pool = pool_with(&[("r1", &[])]);
        assert!(matches!(
            pool.register("r1", "again", vec![]),
            Err(PipewrightError::RunnerAlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_acquire_picks_first_matching_runner() {
        let pool = pool_with(&[("plain", &[]), ("docker", &["docker"]), ("docker2", &["docker"])]);

        let lease = pool.acquire(&["docker".into()], JobId::new()).unwrap();
        assert_eq!(lease.runner_id().as_str(), "docker");

        let second = pool.acquire(&["docker".into()], JobId::new()).unwrap();
        assert_eq!(second.runner_id().as_str(), "docker2");

        assert!(pool.acquire(&["docker".into()], JobId::new()).is_none());
        assert!(pool.acquire(&["gpu".into()], JobId::new()).is_none());
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let pool = pool_with(&[("r1", &[])]);
        let id = RunnerId::from("r1");

        {
            let _lease = pool.acquire(&[], JobId::new()).unwrap();
            assert!(pool.get(&id).unwrap().is_busy());
            assert!(pool.acquire(&[], JobId::new()).is_none());
        }

        let runner = pool.get(&id).unwrap();
        assert!(!runner.is_busy());
        assert_eq!(runner.jobs_run, 1);
    }

    #[test]
    fn test_explicit_release_then_double_release_errors() {
        let pool = pool_with(&[("r1", &[])]);
        let lease = pool.acquire(&[], JobId::new()).unwrap();
        lease.release().unwrap();

        assert!(matches!(
            pool.release(&RunnerId::from("r1")),
            Err(PipewrightError::RunnerNotBusy { .. })
        ));
        assert!(matches!(
            pool.release(&RunnerId::from("ghost")),
            Err(PipewrightError::RunnerNotFound { .. })
        ));
    }

    #[test]
    fn test_heartbeat_status_controls_availability() {
        let pool = pool_with(&[("r1", &[])]);
        let id = RunnerId::from("r1");

        pool.heartbeat(&id, RunnerStatus::Paused).unwrap();
        assert!(pool.acquire(&[], JobId::new()).is_none());
        assert!(pool.has_capable_runner(&[]));

        pool.heartbeat(&id, RunnerStatus::Online).unwrap();
        assert!(pool.acquire(&[], JobId::new()).is_some());
    }

    #[test]
    fn test_has_capable_runner() {
        let pool = pool_with(&[("r1", &["linux"])]);
        assert!(pool.has_capable_runner(&["linux".into()]));
        assert!(!pool.has_capable_runner(&["windows".into()]));
    }

    #[tokio::test]
    async fn test_release_wakes_waiters() {
        let pool = pool_with(&[("r1", &[])]);
        let lease = pool.acquire(&[], JobId::new()).unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let notified = pool.released();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if pool.acquire(&[], JobId::new()).is_none() {
                    notified.await;
                }
                pool.acquire(&[], JobId::new()).is_some()
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(lease);

        assert!(waiter.await.unwrap());
    }
}
