use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::catalog::probes::PROBE_COUNT;

/// Top-level configuration for the evaluator.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Identifier of the sandbox under test. Prefixes every result name.
    #[serde(default)]
    pub sandbox_id: String,

    /// Which TSDB is deployed in the sandbox. Default: irondb.
    #[serde(default)]
    pub tsdb_system: TsdbSystem,

    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Dashboard proxy configuration.
    #[serde(default)]
    pub grafana: GrafanaConfig,

    /// Cloud provider configuration.
    #[serde(default)]
    pub aws: AwsConfig,

    /// Metrics collection sink configuration.
    #[serde(default)]
    pub circonus: CirconusConfig,

    /// Result queue configuration.
    #[serde(default)]
    pub results: ResultsConfig,

    /// Cycle scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// The TSDB flavour under test. Selects the probe dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TsdbSystem {
    #[default]
    Irondb,
    Influxdb,
    Timescale,
}

impl TsdbSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Irondb => "irondb",
            Self::Influxdb => "influxdb",
            Self::Timescale => "timescale",
        }
    }
}

impl fmt::Display for TsdbSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TsdbSystem {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "irondb" => Ok(Self::Irondb),
            "influxdb" => Ok(Self::Influxdb),
            "timescale" => Ok(Self::Timescale),
            other => bail!("unknown tsdb system: {other} (expected irondb, influxdb or timescale)"),
        }
    }
}

/// Dashboard proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GrafanaConfig {
    /// Base URL of the dashboard (e.g., "http://grafana:3000").
    #[serde(default)]
    pub url: String,

    /// Login user. Default: "admin".
    #[serde(default = "default_grafana_user")]
    pub user: String,

    /// Login password.
    #[serde(default)]
    pub password: String,

    /// Datasource id the probes are proxied through. Default: 1.
    #[serde(default = "default_datasource_id")]
    pub datasource_id: u32,

    /// Timeout of the login exchange. Default: 20s.
    #[serde(default = "default_login_timeout", with = "humantime_serde")]
    pub login_timeout: Duration,

    /// Timeout of each proxied probe. Default: 25s.
    #[serde(default = "default_query_timeout", with = "humantime_serde")]
    pub query_timeout: Duration,

    /// Use tag-filter CAQL probes instead of namespace patterns.
    #[serde(default)]
    pub caql_use_tags: bool,

    /// InfluxDB database name. Default: "mydb".
    #[serde(default = "default_influx_database")]
    pub influx_database: String,

    /// InfluxDB timestamp precision. Default: "ms".
    #[serde(default = "default_influx_epoch")]
    pub influx_epoch: String,

    /// Account id sent with CAQL requests. Default: "1".
    #[serde(default = "default_circonus_account")]
    pub circonus_account: String,
}

/// Cloud provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// Shared-config profile to load credentials from.
    #[serde(default)]
    pub profile: Option<String>,

    /// Region. Default: "us-east-1".
    #[serde(default = "default_aws_region")]
    pub region: String,

    /// Metric namespace. Default: "AWS/EC2".
    #[serde(default = "default_aws_namespace")]
    pub namespace: String,

    /// Auto-scaling groups expected in the sandbox. Default: 2.
    #[serde(default = "default_expected_groups")]
    pub expected_groups: usize,

    /// Instances expected in each group. Default: 3.
    #[serde(default = "default_expected_instances_per_group")]
    pub expected_instances_per_group: usize,

    /// Per-call timeout of metric statistics requests. Default: 900ms.
    #[serde(default = "default_metric_timeout", with = "humantime_serde")]
    pub metric_timeout: Duration,

    /// Maximum group listing pages read during discovery. Default: 50.
    #[serde(default = "default_group_page_cap")]
    pub group_page_cap: usize,
}

/// Metrics collection sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CirconusConfig {
    /// HTTPTrap submission URL.
    #[serde(default)]
    pub submission_url: String,

    /// API token sent with every submission.
    #[serde(default)]
    pub api_token: String,

    /// Application name header. Default: "tsdb-eval".
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Per-submission timeout. Default: 1s.
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Result queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsConfig {
    /// Queue capacity. Default: 10000.
    #[serde(default = "default_results_capacity")]
    pub capacity: usize,

    /// Append-only audit log of every dequeued result.
    #[serde(default = "default_audit_log")]
    pub audit_log: String,
}

/// Cycle scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Period between cycles. Default: 60s.
    #[serde(default = "default_scheduler_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Delay between probe launches. Default: 2s.
    #[serde(default = "default_scheduler_pacing", with = "humantime_serde")]
    pub pacing: Duration,

    /// Queries allowed in flight at once. Default: 512.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

/// Values taken from the environment or the command line.
///
/// Every field that is `Some` replaces the corresponding file value.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub sandbox_id: Option<String>,
    pub tsdb_system: Option<String>,
    pub log_level: Option<String>,
    pub circonus_api_token: Option<String>,
    pub grafana_url: Option<String>,
    pub grafana_user: Option<String>,
    pub grafana_password: Option<String>,
    pub aws_profile: Option<String>,
    pub aws_region: Option<String>,
    pub aws_expected_groups: Option<usize>,
    pub aws_expected_instances_per_group: Option<usize>,
    pub caql_use_tags: Option<bool>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_grafana_user() -> String {
    "admin".to_string()
}

fn default_datasource_id() -> u32 {
    1
}

fn default_login_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(25)
}

fn default_influx_database() -> String {
    "mydb".to_string()
}

fn default_influx_epoch() -> String {
    "ms".to_string()
}

fn default_circonus_account() -> String {
    "1".to_string()
}

fn default_aws_region() -> String {
    "us-east-1".to_string()
}

fn default_aws_namespace() -> String {
    "AWS/EC2".to_string()
}

fn default_expected_groups() -> usize {
    2
}

fn default_expected_instances_per_group() -> usize {
    3
}

fn default_metric_timeout() -> Duration {
    Duration::from_millis(900)
}

fn default_group_page_cap() -> usize {
    50
}

fn default_app_name() -> String {
    "tsdb-eval".to_string()
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_results_capacity() -> usize {
    10_000
}

fn default_audit_log() -> String {
    "/tmp/result.log".to_string()
}

fn default_scheduler_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_scheduler_pacing() -> Duration {
    Duration::from_secs(2)
}

fn default_max_in_flight() -> usize {
    512
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            sandbox_id: String::new(),
            tsdb_system: TsdbSystem::default(),
            log_level: default_log_level(),
            grafana: GrafanaConfig::default(),
            aws: AwsConfig::default(),
            circonus: CirconusConfig::default(),
            results: ResultsConfig::default(),
            scheduler: SchedulerConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for GrafanaConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: default_grafana_user(),
            password: String::new(),
            datasource_id: default_datasource_id(),
            login_timeout: default_login_timeout(),
            query_timeout: default_query_timeout(),
            caql_use_tags: false,
            influx_database: default_influx_database(),
            influx_epoch: default_influx_epoch(),
            circonus_account: default_circonus_account(),
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            profile: None,
            region: default_aws_region(),
            namespace: default_aws_namespace(),
            expected_groups: default_expected_groups(),
            expected_instances_per_group: default_expected_instances_per_group(),
            metric_timeout: default_metric_timeout(),
            group_page_cap: default_group_page_cap(),
        }
    }
}

impl Default for CirconusConfig {
    fn default() -> Self {
        Self {
            submission_url: String::new(),
            api_token: String::new(),
            app_name: default_app_name(),
            timeout: default_sink_timeout(),
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            capacity: default_results_capacity(),
            audit_log: default_audit_log(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: default_scheduler_interval(),
            pacing: default_scheduler_pacing(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        Ok(cfg)
    }

    /// Builds the effective configuration: defaults, then the optional
    /// file, then overrides. The result is validated.
    pub fn resolve(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        cfg.apply_overrides(overrides)?;
        cfg.validate()?;

        Ok(cfg)
    }

    /// Replaces file values with every override that is set.
    pub fn apply_overrides(&mut self, o: &ConfigOverrides) -> Result<()> {
        if let Some(v) = &o.sandbox_id {
            self.sandbox_id = v.clone();
        }
        if let Some(v) = &o.tsdb_system {
            self.tsdb_system = v.parse()?;
        }
        if let Some(v) = &o.log_level {
            self.log_level = v.clone();
        }
        if let Some(v) = &o.circonus_api_token {
            self.circonus.api_token = v.clone();
        }
        if let Some(v) = &o.grafana_url {
            self.grafana.url = v.clone();
        }
        if let Some(v) = &o.grafana_user {
            self.grafana.user = v.clone();
        }
        if let Some(v) = &o.grafana_password {
            self.grafana.password = v.clone();
        }
        if let Some(v) = &o.aws_profile {
            self.aws.profile = Some(v.clone());
        }
        if let Some(v) = &o.aws_region {
            self.aws.region = v.clone();
        }
        if let Some(v) = o.aws_expected_groups {
            self.aws.expected_groups = v;
        }
        if let Some(v) = o.aws_expected_instances_per_group {
            self.aws.expected_instances_per_group = v;
        }
        if let Some(v) = o.caql_use_tags {
            self.grafana.caql_use_tags = v;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sandbox_id.trim().is_empty() {
            bail!("sandbox_id is required");
        }

        if tracing_subscriber::EnvFilter::try_new(&self.log_level).is_err() {
            bail!("invalid log_level: {}", self.log_level);
        }

        if self.grafana.url.is_empty() {
            bail!("grafana.url is required");
        }

        if self.grafana.password.is_empty() {
            bail!("grafana.password is required");
        }

        if self.grafana.query_timeout.is_zero() || self.grafana.login_timeout.is_zero() {
            bail!("grafana timeouts must be positive");
        }

        if self.aws.region.is_empty() {
            bail!("aws.region is required");
        }

        if self.aws.expected_groups == 0 {
            bail!("aws.expected_groups must be positive");
        }

        if self.aws.expected_instances_per_group == 0 {
            bail!("aws.expected_instances_per_group must be positive");
        }

        if self.aws.group_page_cap == 0 {
            bail!("aws.group_page_cap must be positive");
        }

        if self.circonus.submission_url.is_empty() {
            bail!("circonus.submission_url is required");
        }

        if self.circonus.api_token.is_empty() {
            bail!("circonus.api_token is required");
        }

        if self.results.capacity == 0 {
            bail!("results.capacity must be positive");
        }

        if self.scheduler.interval.is_zero() {
            bail!("scheduler.interval must be positive");
        }

        if self.scheduler.max_in_flight == 0 {
            bail!("scheduler.max_in_flight must be positive");
        }

        // Probe i launches at (i + 1) * pacing, so the last one must still
        // fall inside the cycle.
        let last_launch = self
            .scheduler
            .pacing
            .saturating_mul(PROBE_COUNT as u32);
        if last_launch >= self.scheduler.interval {
            bail!(
                "scheduler.pacing {:?} x {} probes does not fit in scheduler.interval {:?}",
                self.scheduler.pacing,
                PROBE_COUNT,
                self.scheduler.interval,
            );
        }

        Ok(())
    }

    /// The substring an auto-scaling group name must contain to belong to
    /// this sandbox.
    pub fn group_prefix(&self) -> String {
        format!("{}_{}-nodes", self.sandbox_id, self.tsdb_system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            sandbox_id: "sbx-42".to_string(),
            grafana: GrafanaConfig {
                url: "http://grafana:3000".to_string(),
                password: "secret".to_string(),
                ..Default::default()
            },
            circonus: CirconusConfig {
                submission_url: "https://trap.example.com/module/httptrap/abc/xyz".to_string(),
                api_token: "token".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.tsdb_system, TsdbSystem::Irondb);
        assert_eq!(cfg.grafana.user, "admin");
        assert_eq!(cfg.grafana.query_timeout, Duration::from_secs(25));
        assert_eq!(cfg.aws.metric_timeout, Duration::from_millis(900));
        assert_eq!(cfg.aws.group_page_cap, 50);
        assert_eq!(cfg.results.capacity, 10_000);
        assert_eq!(cfg.scheduler.interval, Duration::from_secs(60));
        assert_eq!(cfg.scheduler.pacing, Duration::from_secs(2));
        assert_eq!(cfg.health.addr, ":9090");
    }

    #[test]
    fn test_valid_config_passes() {
        valid_config().validate().expect("valid config");
    }

    #[test]
    fn test_validation_missing_sandbox() {
        let cfg = Config {
            sandbox_id: String::new(),
            ..valid_config()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("sandbox_id"));
    }

    #[test]
    fn test_validation_missing_grafana_password() {
        let mut cfg = valid_config();
        cfg.grafana.password.clear();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("grafana.password"));
    }

    #[test]
    fn test_validation_zero_expected_instances() {
        let mut cfg = valid_config();
        cfg.aws.expected_instances_per_group = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("expected_instances_per_group"));
    }

    #[test]
    fn test_validation_pacing_exceeds_interval() {
        let mut cfg = valid_config();
        cfg.scheduler.pacing = Duration::from_secs(6);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("scheduler.pacing"));
    }

    #[test]
    fn test_validation_bad_log_level() {
        let mut cfg = valid_config();
        cfg.log_level = "tsdb_eval=loud".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_yaml_with_durations() {
        let yaml = r#"
sandbox_id: sbx-1
tsdb_system: timescale
grafana:
  url: http://grafana:3000
  password: pw
  query_timeout: 10s
aws:
  region: eu-west-1
  metric_timeout: 500ms
circonus:
  submission_url: https://trap.example.com/x
  api_token: t
scheduler:
  interval: 2m
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(cfg.tsdb_system, TsdbSystem::Timescale);
        assert_eq!(cfg.grafana.query_timeout, Duration::from_secs(10));
        assert_eq!(cfg.grafana.user, "admin");
        assert_eq!(cfg.aws.metric_timeout, Duration::from_millis(500));
        assert_eq!(cfg.scheduler.interval, Duration::from_secs(120));
        cfg.validate().expect("valid");
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut cfg = valid_config();
        let overrides = ConfigOverrides {
            sandbox_id: Some("sbx-override".to_string()),
            tsdb_system: Some("InfluxDB".to_string()),
            aws_expected_groups: Some(4),
            caql_use_tags: Some(true),
            ..Default::default()
        };
        cfg.apply_overrides(&overrides).expect("apply");

        assert_eq!(cfg.sandbox_id, "sbx-override");
        assert_eq!(cfg.tsdb_system, TsdbSystem::Influxdb);
        assert_eq!(cfg.aws.expected_groups, 4);
        assert!(cfg.grafana.caql_use_tags);
        assert_eq!(cfg.grafana.url, "http://grafana:3000");
    }

    #[test]
    fn test_unknown_tsdb_system_override() {
        let mut cfg = valid_config();
        let overrides = ConfigOverrides {
            tsdb_system: Some("cassandra".to_string()),
            ..Default::default()
        };
        assert!(cfg.apply_overrides(&overrides).is_err());
    }

    #[test]
    fn test_group_prefix() {
        let mut cfg = valid_config();
        cfg.tsdb_system = TsdbSystem::Influxdb;
        assert_eq!(cfg.group_prefix(), "sbx-42_influxdb-nodes");
    }
}
