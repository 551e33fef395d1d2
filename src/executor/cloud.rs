use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tracing::{error, trace, warn};

use crate::catalog::{CloudMetric, DimensionKind};
use crate::cloud::{MetricPoint, MetricRequest, MetricSource};
use crate::export::health::HealthMetrics;
use crate::result::{Measurement, ResultQueue, NAN};

/// Statistics period and lookback.
pub const METRIC_PERIOD: Duration = Duration::from_secs(60);

/// The window ends this far in the past so the latest period is complete.
pub const SKEW_GUARD: Duration = Duration::from_secs(1);

const BACKEND: &str = "cloudwatch";

/// Fetches one cloud metric for one dimension and emits one measurement.
pub struct CloudMetricExecutor<M> {
    source: M,
    namespace: String,
    queue: ResultQueue,
    health: Option<Arc<HealthMetrics>>,
}

impl<M: MetricSource> CloudMetricExecutor<M> {
    pub fn new(
        source: M,
        namespace: impl Into<String>,
        queue: ResultQueue,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            source,
            namespace: namespace.into(),
            queue,
            health,
        }
    }

    /// Emits the latest datapoint formatted with two decimals, or "nan" on
    /// error or when the window is empty.
    pub async fn execute(
        &self,
        reporting_name: &str,
        metric: &CloudMetric,
        dimension: DimensionKind,
        value: &str,
    ) {
        let end = SystemTime::now() - SKEW_GUARD;
        let req = MetricRequest {
            namespace: self.namespace.clone(),
            metric_name: metric.cloud_name.to_string(),
            dimension_name: dimension.cloud_name(),
            dimension_value: value.to_string(),
            statistic: metric.statistic,
            period_secs: METRIC_PERIOD.as_secs() as i32,
            start: end - METRIC_PERIOD,
            end,
        };

        let started = Instant::now();
        let outcome = self.source.fetch(&req).await;
        if let Some(h) = &self.health {
            h.record_query(BACKEND, outcome.is_ok(), started.elapsed().as_secs_f64());
        }

        let reported = match outcome {
            Ok(points) => match latest(&points) {
                Some(point) => format!("{:.2}", point.value),
                None => {
                    if !metric.sparse {
                        warn!(
                            namespace = %req.namespace,
                            metric = metric.cloud_name,
                            dimension = req.dimension_name,
                            value = %req.dimension_value,
                            statistic = metric.statistic,
                            "no datapoints returned for cloud metric",
                        );
                    }
                    NAN.to_string()
                }
            },
            Err(e) => {
                error!(
                    metric = metric.cloud_name,
                    dimension = req.dimension_name,
                    value = %req.dimension_value,
                    error = %e,
                    "fetching cloud metric",
                );
                NAN.to_string()
            }
        };

        trace!(name = reporting_name, value = %reported, "cloud metric sampled");

        self.queue.enqueue(Measurement::now(reporting_name, reported));
    }
}

fn latest(points: &[MetricPoint]) -> Option<&MetricPoint> {
    points.iter().max_by_key(|p| p.timestamp)
}
