use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_autoscaling::operation::describe_auto_scaling_groups::DescribeAutoScalingGroupsError;
use aws_sdk_cloudwatch::primitives::DateTime;
use aws_sdk_cloudwatch::types::{Dimension, Metric, MetricDataQuery, MetricStat};
use tracing::{debug, info};

use super::{DirectoryError, GroupDirectory, GroupPage, GroupSummary, MetricPoint, MetricRequest, MetricSource};
use crate::config::AwsConfig;

type GroupListingError = aws_sdk_autoscaling::error::SdkError<DescribeAutoScalingGroupsError>;

/// Auto-scaling and CloudWatch clients sharing one credential chain.
#[derive(Clone)]
pub struct AwsClients {
    autoscaling: aws_sdk_autoscaling::Client,
    cloudwatch: aws_sdk_cloudwatch::Client,
}

impl AwsClients {
    /// Loads the shared config for the configured profile and region and
    /// checks that credentials resolve.
    pub async fn connect(cfg: &AwsConfig) -> Result<Self> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(cfg.region.clone()));
        if let Some(profile) = &cfg.profile {
            loader = loader.profile_name(profile);
        }
        let shared = loader.load().await;

        validate_credentials(&shared).await?;

        info!(
            region = %cfg.region,
            profile = cfg.profile.as_deref().unwrap_or("default"),
            "cloud credentials validated",
        );

        let autoscaling = aws_sdk_autoscaling::Client::new(&shared);

        let cloudwatch =
            aws_sdk_cloudwatch::Client::from_conf(cloudwatch_config(&shared, cfg.metric_timeout));

        Ok(Self {
            autoscaling,
            cloudwatch,
        })
    }
}

/// Metric fetches get one attempt within `metric_timeout`; a failure
/// becomes "nan" for that cycle instead of an SDK retry.
fn cloudwatch_config(shared: &SdkConfig, metric_timeout: Duration) -> aws_sdk_cloudwatch::Config {
    aws_sdk_cloudwatch::config::Builder::from(shared)
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(metric_timeout)
                .build(),
        )
        .retry_config(RetryConfig::disabled())
        .build()
}

async fn validate_credentials(shared: &SdkConfig) -> Result<()> {
    let provider = shared
        .credentials_provider()
        .context("no cloud credentials provider configured")?;

    provider
        .provide_credentials()
        .await
        .context("loading cloud credentials")?;

    Ok(())
}

fn classify_listing_error(err: GroupListingError) -> DirectoryError {
    match err.as_service_error() {
        Some(e) if e.is_invalid_next_token() => DirectoryError::InvalidNextToken,
        Some(e) if e.is_resource_contention_fault() => DirectoryError::ResourceContention,
        _ => DirectoryError::Provider(
            aws_sdk_autoscaling::error::DisplayErrorContext(&err).to_string(),
        ),
    }
}

impl GroupDirectory for AwsClients {
    async fn list_groups(&self, next_token: Option<String>) -> Result<GroupPage, DirectoryError> {
        let out = self
            .autoscaling
            .describe_auto_scaling_groups()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(classify_listing_error)?;

        let groups = out
            .auto_scaling_groups()
            .iter()
            .filter_map(|g| {
                let name: Option<&str> = g.auto_scaling_group_name().into();
                let instance_ids = g
                    .instances()
                    .iter()
                    .filter_map(|inst| {
                        let id: Option<&str> = inst.instance_id().into();
                        id.map(str::to_string)
                    })
                    .collect();

                name.map(|name| GroupSummary {
                    name: name.to_string(),
                    instance_ids,
                })
            })
            .collect::<Vec<_>>();

        debug!(groups = groups.len(), "listed auto-scaling groups page");

        Ok(GroupPage {
            groups,
            next_token: out.next_token().map(str::to_string),
        })
    }
}

impl MetricSource for AwsClients {
    async fn fetch(&self, req: &MetricRequest) -> Result<Vec<MetricPoint>> {
        let dimension = Dimension::builder()
            .name(req.dimension_name)
            .value(&req.dimension_value)
            .build();

        let metric = Metric::builder()
            .namespace(&req.namespace)
            .metric_name(&req.metric_name)
            .dimensions(dimension)
            .build();

        let stat = MetricStat::builder()
            .metric(metric)
            .period(req.period_secs)
            .stat(req.statistic)
            .build();

        let query = MetricDataQuery::builder()
            .id("q0")
            .metric_stat(stat)
            .build();

        let out = self
            .cloudwatch
            .get_metric_data()
            .start_time(DateTime::from(req.start))
            .end_time(DateTime::from(req.end))
            .metric_data_queries(query)
            .send()
            .await
            .map_err(|e| anyhow!(aws_sdk_cloudwatch::error::DisplayErrorContext(&e).to_string()))?;

        let points = out
            .metric_data_results()
            .iter()
            .flat_map(|r| {
                r.timestamps()
                    .iter()
                    .zip(r.values())
                    .map(|(ts, value)| MetricPoint {
                        timestamp: ts.secs(),
                        value: *value,
                    })
            })
            .collect();

        Ok(points)
    }
}
