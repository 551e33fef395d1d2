//! The cycle loop.
//!
//! Every interval the scheduler rebuilds the task list, launches cloud
//! tasks at once and probe tasks one pacing step apart. Launches never wait
//! for a query to finish. A semaphore bounds how many run at the same time;
//! a task finding no free slot is skipped for that cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{cloud_tasks, probe_tasks, ProbeCatalog, QueryTask};
use crate::config::SchedulerConfig;
use crate::discovery::DimensionSet;
use crate::executor::TaskRunner;
use crate::export::health::HealthMetrics;

/// Where inside a cycle each task is launched.
#[derive(Debug, Clone, Copy)]
pub struct PacingPolicy {
    pacing: Duration,
}

impl PacingPolicy {
    pub fn new(pacing: Duration) -> Self {
        Self { pacing }
    }

    /// Cloud tasks start at the cycle start; probe `i` starts
    /// `(i + 1) * pacing` later.
    pub fn plan_cycle(
        &self,
        cloud: Vec<QueryTask>,
        probes: Vec<QueryTask>,
    ) -> Vec<(Duration, QueryTask)> {
        let mut plan = Vec::with_capacity(cloud.len() + probes.len());

        plan.extend(cloud.into_iter().map(|t| (Duration::ZERO, t)));
        plan.extend(
            probes
                .into_iter()
                .enumerate()
                .map(|(i, t)| (self.pacing * (i as u32 + 1), t)),
        );

        plan
    }
}

pub struct Scheduler<R> {
    runner: Arc<R>,
    dims: Arc<DimensionSet>,
    sandbox: String,
    catalog: ProbeCatalog,
    policy: PacingPolicy,
    interval: Duration,
    permits: Arc<Semaphore>,
    health: Option<Arc<HealthMetrics>>,
}

impl<R: TaskRunner> Scheduler<R> {
    pub fn new(
        runner: Arc<R>,
        dims: Arc<DimensionSet>,
        catalog: ProbeCatalog,
        sandbox: impl Into<String>,
        cfg: &SchedulerConfig,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            runner,
            dims,
            sandbox: sandbox.into(),
            catalog,
            policy: PacingPolicy::new(cfg.pacing),
            interval: cfg.interval,
            permits: Arc::new(Semaphore::new(cfg.max_in_flight)),
            health,
        }
    }

    /// Runs cycles until `cancel` fires. In-flight queries are left to
    /// finish on their own.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs(),
            probes = self.catalog.len(),
            groups = self.dims.found_groups(),
            instances = self.dims.found_instances(),
            "scheduler started",
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.run_cycle(&cancel).await {
                break;
            }
        }

        info!("scheduler stopped");
    }

    /// Launches one cycle. Returns false if cancelled part way.
    async fn run_cycle(&self, cancel: &CancellationToken) -> bool {
        if let Some(h) = &self.health {
            h.cycles_total.inc();
        }

        let plan = self.policy.plan_cycle(
            cloud_tasks(&self.dims, &self.sandbox),
            probe_tasks(&self.catalog, &self.sandbox),
        );
        debug!(tasks = plan.len(), "cycle planned");

        let start = Instant::now();
        for (offset, task) in plan {
            if !offset.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep_until(start + offset) => {}
                }
            }
            self.launch(task);
        }

        true
    }

    fn launch(&self, task: QueryTask) {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            warn!(
                task = %task.reporting_name,
                "every in-flight slot is taken, skipping task this cycle",
            );
            if let Some(h) = &self.health {
                h.tasks_skipped.inc();
            }
            return;
        };

        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            let _permit = permit;
            runner.run(task).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::executor::Dialect;

    #[derive(Default)]
    struct RecordingRunner {
        started: Mutex<Vec<(String, Instant)>>,
    }

    impl TaskRunner for RecordingRunner {
        async fn run(&self, task: QueryTask) {
            self.started
                .lock()
                .unwrap()
                .push((task.reporting_name, Instant::now()));
        }
    }

    /// Never finishes a task.
    #[derive(Default)]
    struct StuckRunner {
        entered: Mutex<usize>,
    }

    impl TaskRunner for StuckRunner {
        async fn run(&self, _task: QueryTask) {
            *self.entered.lock().unwrap() += 1;
            std::future::pending::<()>().await;
        }
    }

    fn dims() -> Arc<DimensionSet> {
        let mut dims = DimensionSet::with_capacity(1, 1);
        dims.group_names = vec!["asg-a".to_string()];
        dims.instance_ids = vec!["i-1".to_string()];
        Arc::new(dims)
    }

    fn cfg(max_in_flight: usize) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(60),
            pacing: Duration::from_secs(2),
            max_in_flight,
        }
    }

    #[test]
    fn test_plan_offsets() {
        let catalog = ProbeCatalog::build(Dialect::Caql, false);
        let policy = PacingPolicy::new(Duration::from_secs(2));
        let plan = policy.plan_cycle(cloud_tasks(&dims(), "sbx"), probe_tasks(&catalog, "sbx"));

        assert_eq!(plan.len(), 14 + 11);
        assert!(plan[..14].iter().all(|(o, t)| o.is_zero() && !t.is_probe()));

        let probe_offsets: Vec<u64> = plan[14..].iter().map(|(o, _)| o.as_secs()).collect();
        assert_eq!(probe_offsets, (1..=11).map(|i| i * 2).collect::<Vec<u64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_launch_on_schedule() {
        let runner = Arc::new(RecordingRunner::default());
        let health = Arc::new(HealthMetrics::new(":0").unwrap());
        let scheduler = Scheduler::new(
            Arc::clone(&runner),
            dims(),
            ProbeCatalog::build(Dialect::Caql, false),
            "sbx",
            &cfg(512),
            Some(Arc::clone(&health)),
        );

        let origin = Instant::now();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(90)).await;
        cancel.cancel();
        task.await.unwrap();

        let started = runner.started.lock().unwrap();
        assert_eq!(started.len(), 2 * (14 + 11));
        assert_eq!(health.cycles_total.get(), 2.0);

        let offset = |name: &str, nth: usize| {
            started
                .iter()
                .filter(|(n, _)| n == name)
                .nth(nth)
                .map(|(_, at)| at.duration_since(origin).as_secs())
                .unwrap()
        };

        assert_eq!(offset("sbx.infra.tsdb-asg-1.cpu.utilization.avg", 0), 0);
        assert_eq!(offset("sbx.query.metrics-count", 0), 2);
        assert_eq!(offset("sbx.query.400-ts-mean-1-week-range", 0), 22);
        assert_eq!(offset("sbx.infra.tsdb-node-1.network.in.bytes", 1), 60);
        assert_eq!(offset("sbx.query.metrics-count", 1), 62);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_pool_does_not_stall_cycles() {
        let runner = Arc::new(StuckRunner::default());
        let health = Arc::new(HealthMetrics::new(":0").unwrap());
        let scheduler = Scheduler::new(
            Arc::clone(&runner),
            dims(),
            ProbeCatalog::build(Dialect::Caql, false),
            "sbx",
            &cfg(1),
            Some(Arc::clone(&health)),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(health.cycles_total.get(), 3.0);
        assert_eq!(*runner.entered.lock().unwrap(), 1);
        // Everything after the stuck task is skipped rather than parked.
        assert_eq!(health.tasks_skipped.get(), (3 * (14 + 11) - 1) as f64);
        assert_eq!(Arc::strong_count(&runner), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pacing_stops_launches() {
        let runner = Arc::new(RecordingRunner::default());
        let scheduler = Scheduler::new(
            Arc::clone(&runner),
            dims(),
            ProbeCatalog::build(Dialect::Caql, false),
            "sbx",
            &cfg(512),
            None,
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        // 14 cloud tasks plus the probes at 2s and 4s.
        assert_eq!(runner.started.lock().unwrap().len(), 16);
    }
}
