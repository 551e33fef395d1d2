use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use tsdb_eval::agent::Agent;
use tsdb_eval::config::{Config, ConfigOverrides};

/// Periodic query-performance and infrastructure-cost evaluator for a
/// time-series database sandbox.
#[derive(Parser)]
#[command(name = "tsdb-eval", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Identifier of the sandbox under test.
    #[arg(long, env = "SANDBOX_ID")]
    sandbox_id: Option<String>,

    /// TSDB behind the dashboard (irondb, influxdb, timescale).
    #[arg(long, env = "TSDB_SYSTEM")]
    tsdb_system: Option<String>,

    /// Logging filter (trace, debug, info, warn, error or a directive list).
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[arg(long, env = "CIRCONUS_API_TOKEN", hide_env_values = true)]
    circonus_api_token: Option<String>,

    #[arg(long, env = "GRAFANA_URL")]
    grafana_url: Option<String>,

    #[arg(long, env = "GRAFANA_USER")]
    grafana_user: Option<String>,

    #[arg(long, env = "GRAFANA_PASSWORD", hide_env_values = true)]
    grafana_password: Option<String>,

    #[arg(long, env = "AWS_PROFILE")]
    aws_profile: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    aws_region: Option<String>,

    /// Number of auto-scaling groups the sandbox runs.
    #[arg(long, env = "AWS_EXPECTED_ASGS")]
    aws_expected_groups: Option<usize>,

    /// Number of instances in each auto-scaling group.
    #[arg(long, env = "AWS_EXPECTED_INSTANCE_COUNT_PER_ASG")]
    aws_expected_instances_per_group: Option<usize>,

    /// Use tag filters instead of namespace patterns in CAQL probes.
    #[arg(long, env = "CAQL_USE_TAGS")]
    caql_use_tags: Option<bool>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            sandbox_id: self.sandbox_id.clone(),
            tsdb_system: self.tsdb_system.clone(),
            log_level: self.log_level.clone(),
            circonus_api_token: self.circonus_api_token.clone(),
            grafana_url: self.grafana_url.clone(),
            grafana_user: self.grafana_user.clone(),
            grafana_password: self.grafana_password.clone(),
            aws_profile: self.aws_profile.clone(),
            aws_region: self.aws_region.clone(),
            aws_expected_groups: self.aws_expected_groups,
            aws_expected_instances_per_group: self.aws_expected_instances_per_group,
            caql_use_tags: self.caql_use_tags,
        }
    }
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("tsdb-eval {}", version::full());
        return Ok(());
    }

    let cfg = Config::resolve(cli.config.as_deref(), &cli.overrides())
        .context("loading configuration")?;

    let filter = EnvFilter::try_new(&cfg.log_level)
        .with_context(|| format!("invalid log level: {}", cfg.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        sandbox = %cfg.sandbox_id,
        tsdb = %cfg.tsdb_system,
        "starting tsdb-eval",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    let mut agent = Agent::new(cfg)?;
    if let Err(e) = agent.start().await {
        let _ = agent.stop().await;
        return Err(e);
    }

    let _ = shutdown_rx.await;

    agent.stop().await?;

    tracing::info!("tsdb-eval stopped");

    Ok(())
}
