// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic node lifecycle jobs.
//!
//! Each job is a typed struct registered by name in a [`JobRegistry`]. The
//! [`JobScheduler`] gives every job its own timer loop and hands it the same
//! [`JobDeps`] on every tick.
//!
//! Exclusive jobs run inside their loop and the timer restarts when a run
//! ends, so ticks that fall inside a run are skipped. Other jobs are spawned
//! per tick and may overlap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controlplane::ControlPlaneConnector;
use crate::error::Result;
use crate::session::SessionManager;
use crate::store::Store;

mod health_check;
mod node_info;
mod status_update;

pub use health_check::HealthCheckJob;
pub use node_info::NodeInfoJob;
pub use status_update::StatusUpdateJob;

/// Everything a job may use.
#[derive(Clone)]
pub struct JobDeps {
    /// Node and cluster storage
    pub store: Arc<dyn Store>,
    /// Control-plane access to nodes
    pub connector: Arc<dyn ControlPlaneConnector>,
    /// Connected clients, for broadcasts
    pub sessions: SessionManager,
}

/// A periodic job.
#[async_trait]
pub trait Job: Send + Sync {
    /// Registry key and log name.
    fn name(&self) -> &'static str;

    /// Time between runs.
    fn interval(&self) -> Duration;

    /// Whether a run must finish before the next one starts.
    fn exclusive(&self) -> bool {
        false
    }

    /// Upper bound for one run.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run once.
    async fn run(&self, deps: &JobDeps) -> Result<()>;
}

/// Jobs keyed by name.
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: BTreeMap<&'static str, Arc<dyn Job>>,
}

impl JobRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Health check, status update and node info reconciliation.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HealthCheckJob));
        registry.register(Arc::new(StatusUpdateJob));
        registry.register(Arc::new(NodeInfoJob));
        registry
    }

    /// Add `job`, replacing any job with the same name.
    pub fn register(&mut self, job: Arc<dyn Job>) -> &mut Self {
        self.jobs.insert(job.name(), job);
        self
    }

    /// Job by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).cloned()
    }

    /// Registered names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.jobs.keys().copied().collect()
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job is registered.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Delay before the first run of every job.
    pub initial_delay: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10), // let the server come up first
        }
    }
}

/// Runs registered jobs on their intervals until shutdown.
pub struct JobScheduler {
    registry: JobRegistry,
    deps: JobDeps,
    config: JobSchedulerConfig,
    shutdown: Arc<Notify>,
}

impl JobScheduler {
    /// Create a scheduler.
    pub fn new(registry: JobRegistry, deps: JobDeps, config: JobSchedulerConfig) -> Self {
        Self {
            registry,
            deps,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run every job loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(jobs = ?self.registry.names(), "Job scheduler started");

        let cancel = CancellationToken::new();
        let mut loops = JoinSet::new();
        for name in self.registry.names() {
            let Some(job) = self.registry.get(name) else {
                continue;
            };
            loops.spawn(job_loop(
                job,
                self.deps.clone(),
                self.config.initial_delay,
                cancel.clone(),
            ));
        }

        self.shutdown.notified().await;
        info!("Job scheduler received shutdown signal");
        cancel.cancel();
        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Job loop panicked");
            }
        }

        info!("Job scheduler stopped");
    }
}

async fn job_loop(
    job: Arc<dyn Job>,
    deps: JobDeps,
    initial_delay: Duration,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now() + initial_delay;
    let mut ticker = tokio::time::interval_at(start, job.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut spawned = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                if job.exclusive() {
                    run_once(job.as_ref(), &deps, &cancel).await;
                    ticker.reset();
                } else {
                    let job = job.clone();
                    let deps = deps.clone();
                    let cancel = cancel.clone();
                    spawned.spawn(async move { run_once(job.as_ref(), &deps, &cancel).await });
                }
                // Reap finished overlapping runs.
                while spawned.try_join_next().is_some() {}
            }
        }
    }

    spawned.shutdown().await;
}

/// Run `job` once under its timeout; cancellation abandons the run.
pub async fn run_once(job: &dyn Job, deps: &JobDeps, cancel: &CancellationToken) {
    debug!(job = job.name(), "Job run started");
    let run = async {
        match job.timeout() {
            Some(limit) => match tokio::time::timeout(limit, job.run(deps)).await {
                Ok(result) => result.map(|()| true),
                Err(_) => Ok(false),
            },
            None => job.run(deps).await.map(|()| true),
        }
    };

    tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            debug!(job = job.name(), "Job run cancelled");
        }

        result = run => match result {
            Ok(true) => debug!(job = job.name(), "Job run finished"),
            Ok(false) => warn!(job = job.name(), "Job run timed out"),
            Err(e) => error!(job = job.name(), error = %e, "Job run failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::MockControlPlane;
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        exclusive: bool,
        work: Duration,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn exclusive(&self) -> bool {
            self.exclusive
        }

        async fn run(&self, _deps: &JobDeps) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn deps() -> JobDeps {
        JobDeps {
            store: Arc::new(InMemoryStore::new()),
            connector: Arc::new(MockControlPlane::new()),
            sessions: SessionManager::new(),
        }
    }

    fn counting(exclusive: bool) -> (CountingJob, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let job = CountingJob {
            runs: runs.clone(),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: max_active.clone(),
            exclusive,
            work: Duration::from_millis(2500),
        };
        (job, runs, max_active)
    }

    async fn run_scheduler_for(job: CountingJob, duration: Duration) {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(job));
        let scheduler = Arc::new(JobScheduler::new(
            registry,
            deps(),
            JobSchedulerConfig {
                initial_delay: Duration::ZERO,
            },
        ));
        let shutdown = scheduler.shutdown_handle();
        let task = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        tokio::time::sleep(duration).await;
        shutdown.notify_one();
        task.await.unwrap();
    }

    #[test]
    fn test_default_registry() {
        let registry = JobRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["health_check", "node_info", "status_update"]);
        assert!(registry.get("health_check").unwrap().exclusive());
        assert!(!registry.get("status_update").unwrap().exclusive());
        assert_eq!(
            registry.get("node_info").unwrap().timeout(),
            Some(Duration::from_secs(90))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusive_job_never_overlaps() {
        let (job, runs, max_active) = counting(true);
        run_scheduler_for(job, Duration::from_millis(10_100)).await;

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_exclusive_job_overlaps() {
        let (job, runs, max_active) = counting(false);
        run_scheduler_for(job, Duration::from_millis(10_100)).await;

        assert!(max_active.load(Ordering::SeqCst) > 1);
        assert!(runs.load(Ordering::SeqCst) >= 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_a_run() {
        struct Hanging;

        #[async_trait]
        impl Job for Hanging {
            fn name(&self) -> &'static str {
                "hanging"
            }
            fn interval(&self) -> Duration {
                Duration::from_secs(60)
            }
            fn timeout(&self) -> Option<Duration> {
                Some(Duration::from_secs(5))
            }
            async fn run(&self, _deps: &JobDeps) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let started = tokio::time::Instant::now();
        run_once(&Hanging, &deps(), &CancellationToken::new()).await;
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
