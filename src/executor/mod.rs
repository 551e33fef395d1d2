pub mod cloud;
pub mod dialect;
pub mod probe;

use std::future::Future;

use crate::catalog::{QueryTask, TaskKind};
use crate::cloud::MetricSource;

pub use cloud::CloudMetricExecutor;
pub use dialect::Dialect;
pub use probe::ProbeExecutor;

/// Runs one scheduled task to completion. Failures end up as "nan"
/// measurements, never as errors to the caller.
pub trait TaskRunner: Send + Sync + 'static {
    fn run(&self, task: QueryTask) -> impl Future<Output = ()> + Send;
}

/// Dispatches tasks to the executor matching their kind.
pub struct Executors<M> {
    pub cloud: CloudMetricExecutor<M>,
    pub probe: ProbeExecutor,
}

impl<M: MetricSource + 'static> TaskRunner for Executors<M> {
    async fn run(&self, task: QueryTask) {
        match task.kind {
            TaskKind::Cloud {
                metric,
                dimension,
                value,
            } => {
                self.cloud
                    .execute(&task.reporting_name, metric, dimension, &value)
                    .await
            }
            TaskKind::Probe(probe) => self.probe.execute(&task.reporting_name, &probe).await,
        }
    }
}
