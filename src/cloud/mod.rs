pub mod aws;

use std::future::Future;
use std::time::SystemTime;

use anyhow::Result;
use thiserror::Error;

pub use aws::AwsClients;

/// Group listing failures. Every kind is fatal to discovery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("group listing rejected the pagination token")]
    InvalidNextToken,

    #[error("group listing hit a resource contention fault")]
    ResourceContention,

    #[error("group listing failed: {0}")]
    Provider(String),
}

/// One auto-scaling group as listed by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSummary {
    pub name: String,
    pub instance_ids: Vec<String>,
}

/// One page of the group listing.
#[derive(Debug, Clone, Default)]
pub struct GroupPage {
    pub groups: Vec<GroupSummary>,
    /// Continuation token; `None` on the last page.
    pub next_token: Option<String>,
}

/// Paginated listing of auto-scaling groups.
pub trait GroupDirectory: Send + Sync {
    fn list_groups(
        &self,
        next_token: Option<String>,
    ) -> impl Future<Output = Result<GroupPage, DirectoryError>> + Send;
}

/// A single-dimension statistics request.
#[derive(Debug, Clone)]
pub struct MetricRequest {
    pub namespace: String,
    pub metric_name: String,
    pub dimension_name: &'static str,
    pub dimension_value: String,
    pub statistic: &'static str,
    pub period_secs: i32,
    pub start: SystemTime,
    pub end: SystemTime,
}

/// A returned datapoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricPoint {
    /// Seconds since the epoch.
    pub timestamp: i64,
    pub value: f64,
}

/// Point-in-time metric statistics.
pub trait MetricSource: Send + Sync {
    /// Returns every datapoint in the requested window, in any order.
    fn fetch(
        &self,
        req: &MetricRequest,
    ) -> impl Future<Output = Result<Vec<MetricPoint>>> + Send;
}
