//! What gets queried each cycle.
//!
//! Cloud tasks are derived from the discovered [`DimensionSet`]; probe
//! tasks come from the frozen [`ProbeCatalog`].

pub mod probes;

use crate::discovery::DimensionSet;

pub use probes::{ProbeCatalog, ProbeSpec, ProbeWindow, PROBE_COUNT};

/// A cloud metric sampled for every discovered group and instance.
#[derive(Debug, PartialEq, Eq)]
pub struct CloudMetric {
    /// Provider-side metric name.
    pub cloud_name: &'static str,
    /// Suffix of the reported series name.
    pub reporting_name: &'static str,
    pub statistic: &'static str,
    /// Legitimately absent most of the time; an empty answer is not worth
    /// a warning.
    pub sparse: bool,
}

pub static CLOUD_METRICS: [CloudMetric; 7] = [
    CloudMetric {
        cloud_name: "CPUUtilization",
        reporting_name: "cpu.utilization.avg",
        statistic: "Average",
        sparse: false,
    },
    CloudMetric {
        cloud_name: "NetworkIn",
        reporting_name: "network.in.bytes",
        statistic: "Sum",
        sparse: false,
    },
    CloudMetric {
        cloud_name: "NetworkOut",
        reporting_name: "network.out.bytes",
        statistic: "Sum",
        sparse: false,
    },
    CloudMetric {
        cloud_name: "DiskReadBytes",
        reporting_name: "disk.read.bytes",
        statistic: "Sum",
        sparse: true,
    },
    CloudMetric {
        cloud_name: "DiskWriteBytes",
        reporting_name: "disk.write.bytes",
        statistic: "Sum",
        sparse: true,
    },
    CloudMetric {
        cloud_name: "EBSReadBytes",
        reporting_name: "ebs.read.bytes",
        statistic: "Sum",
        sparse: true,
    },
    CloudMetric {
        cloud_name: "EBSWriteBytes",
        reporting_name: "ebs.write.bytes",
        statistic: "Sum",
        sparse: true,
    },
];

/// Which dimension a cloud metric is scoped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionKind {
    Group,
    Instance,
}

impl DimensionKind {
    pub const ALL: [DimensionKind; 2] = [DimensionKind::Group, DimensionKind::Instance];

    /// Provider-side dimension name.
    pub fn cloud_name(self) -> &'static str {
        match self {
            Self::Group => "AutoScalingGroupName",
            Self::Instance => "InstanceId",
        }
    }

    fn reporting_prefix(self) -> &'static str {
        match self {
            Self::Group => "tsdb-asg",
            Self::Instance => "tsdb-node",
        }
    }

    fn values(self, dims: &DimensionSet) -> &[String] {
        match self {
            Self::Group => &dims.group_names,
            Self::Instance => &dims.instance_ids,
        }
    }
}

/// How a task is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Cloud {
        metric: &'static CloudMetric,
        dimension: DimensionKind,
        value: String,
    },
    Probe(ProbeSpec),
}

/// One unit of scheduled work, rebuilt every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTask {
    /// Result name; probes append `.duration` and `.value`.
    pub reporting_name: String,
    pub kind: TaskKind,
}

impl QueryTask {
    pub fn is_probe(&self) -> bool {
        matches!(self.kind, TaskKind::Probe(_))
    }
}

/// Every metric for every populated dimension slot. Slot `n` (1-based)
/// reports as `<sandbox>.infra.tsdb-asg-<n>.<metric>` or
/// `<sandbox>.infra.tsdb-node-<n>.<metric>`.
pub fn cloud_tasks(dims: &DimensionSet, sandbox: &str) -> Vec<QueryTask> {
    let mut tasks = Vec::new();

    for metric in &CLOUD_METRICS {
        for kind in DimensionKind::ALL {
            for (slot, value) in kind.values(dims).iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                tasks.push(QueryTask {
                    reporting_name: format!(
                        "{sandbox}.infra.{}-{}.{}",
                        kind.reporting_prefix(),
                        slot + 1,
                        metric.reporting_name,
                    ),
                    kind: TaskKind::Cloud {
                        metric,
                        dimension: kind,
                        value: value.clone(),
                    },
                });
            }
        }
    }

    tasks
}

/// One task per probe, named `<sandbox>.query.<probe>`.
pub fn probe_tasks(catalog: &ProbeCatalog, sandbox: &str) -> Vec<QueryTask> {
    catalog
        .probes()
        .iter()
        .map(|probe| QueryTask {
            reporting_name: format!("{sandbox}.query.{}", probe.name),
            kind: TaskKind::Probe(probe.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::dialect::Dialect;

    fn dims() -> DimensionSet {
        let mut dims = DimensionSet::with_capacity(2, 2);
        dims.group_names = vec!["asg-a".to_string(), String::new()];
        dims.instance_ids = vec![
            "i-1".to_string(),
            "i-2".to_string(),
            String::new(),
            String::new(),
        ];
        dims
    }

    #[test]
    fn test_cloud_tasks_skip_empty_slots() {
        let tasks = cloud_tasks(&dims(), "sbx");
        // 7 metrics x (1 group + 2 instances).
        assert_eq!(tasks.len(), 21);
        assert!(tasks.iter().all(|t| !t.is_probe()));
    }

    #[test]
    fn test_cloud_task_names_use_slot_index() {
        let tasks = cloud_tasks(&dims(), "sbx");
        let names: Vec<&str> = tasks[..3].iter().map(|t| t.reporting_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "sbx.infra.tsdb-asg-1.cpu.utilization.avg",
                "sbx.infra.tsdb-node-1.cpu.utilization.avg",
                "sbx.infra.tsdb-node-2.cpu.utilization.avg",
            ]
        );

        match &tasks[2].kind {
            TaskKind::Cloud {
                metric,
                dimension,
                value,
            } => {
                assert_eq!(metric.cloud_name, "CPUUtilization");
                assert_eq!(*dimension, DimensionKind::Instance);
                assert_eq!(value, "i-2");
            }
            other => panic!("unexpected task {other:?}"),
        }
    }

    #[test]
    fn test_sparse_metrics() {
        let sparse: Vec<&str> = CLOUD_METRICS
            .iter()
            .filter(|m| m.sparse)
            .map(|m| m.cloud_name)
            .collect();
        assert_eq!(
            sparse,
            vec!["DiskReadBytes", "DiskWriteBytes", "EBSReadBytes", "EBSWriteBytes"]
        );
    }

    #[test]
    fn test_probe_task_names() {
        let catalog = ProbeCatalog::build(Dialect::Caql, false);
        let tasks = probe_tasks(&catalog, "sbx");
        assert_eq!(tasks.len(), PROBE_COUNT);
        assert_eq!(tasks[0].reporting_name, "sbx.query.metrics-count");
        assert!(tasks.iter().all(QueryTask::is_probe));
    }
}
