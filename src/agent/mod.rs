use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::catalog::ProbeCatalog;
use crate::cloud::AwsClients;
use crate::config::Config;
use crate::discovery::{self, DiscoveryParams};
use crate::executor::{CloudMetricExecutor, Dialect, Executors, ProbeExecutor};
use crate::export::health::HealthMetrics;
use crate::result::{AuditLog, Consumer, ResultQueue};
use crate::scheduler::Scheduler;
use crate::session::{GrafanaLogin, SessionManager};
use crate::sink::{HttpTrapSink, Sink};

/// Agent wires the pipeline together: health server, result queue and
/// consumer, discovery, session refresh and the cycle scheduler.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    session: Option<SessionManager<GrafanaLogin>>,
    consumer: Option<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            session: None,
            consumer: None,
            scheduler: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Starts every component in dependency order. Any failure here is
    /// fatal.
    pub async fn start(&mut self) -> Result<()> {
        // 1. Health server first so probes of the evaluator itself respond.
        self.health
            .start()
            .await
            .context("starting health metrics server")?;

        // 2. Result queue and its consumer.
        let audit = AuditLog::open(Path::new(&self.cfg.results.audit_log))
            .with_context(|| format!("opening audit log {}", self.cfg.results.audit_log))?;
        let (queue, rx) =
            ResultQueue::new(self.cfg.results.capacity, Some(Arc::clone(&self.health)))
                .context("creating result queue")?;

        // 3. Metrics sink.
        let sink = HttpTrapSink::new(&self.cfg.circonus).context("creating metrics sink")?;
        info!(sink = sink.name(), url = %self.cfg.circonus.submission_url, "metrics sink configured");

        let consumer = Consumer::new(rx, sink, audit, Some(Arc::clone(&self.health)));
        self.consumer = Some(tokio::spawn(consumer.run(self.cancel.child_token())));

        // 4. Cloud credentials.
        let aws = AwsClients::connect(&self.cfg.aws)
            .await
            .context("connecting to cloud provider")?;

        // 5. Discovery.
        let params = DiscoveryParams {
            group_prefix: self.cfg.group_prefix(),
            expected_groups: self.cfg.aws.expected_groups,
            instances_per_group: self.cfg.aws.expected_instances_per_group,
            page_cap: self.cfg.aws.group_page_cap,
        };
        let dims = discovery::discover(&aws, &params)
            .await
            .context("discovering auto-scaling groups")?;

        self.health.discovered_groups.set(dims.found_groups() as f64);
        self.health
            .discovered_instances
            .set(dims.found_instances() as f64);

        // 6. First login is fatal; later refreshes are not.
        let login = GrafanaLogin::new(&self.cfg.grafana).context("creating dashboard login")?;
        let mut session = SessionManager::new(login, Some(Arc::clone(&self.health)));
        let ttl = session
            .login()
            .await
            .context("logging in to the dashboard")?;
        info!(ttl_secs = ttl.as_secs(), "dashboard session established");

        session.start_refresh(ttl, &self.cancel);
        let handle = session.handle();
        self.session = Some(session);

        // 7. Catalog is fixed from here on.
        let dialect = Dialect::for_system(self.cfg.tsdb_system);
        let catalog = ProbeCatalog::build(dialect, self.cfg.grafana.caql_use_tags);
        info!(
            tsdb = %self.cfg.tsdb_system,
            dialect = dialect.as_str(),
            caql_tags = self.cfg.grafana.caql_use_tags,
            probes = catalog.len(),
            "probe catalog frozen",
        );

        // 8. Executors and scheduler.
        let executors = Executors {
            cloud: CloudMetricExecutor::new(
                aws,
                self.cfg.aws.namespace.clone(),
                queue.clone(),
                Some(Arc::clone(&self.health)),
            ),
            probe: ProbeExecutor::new(
                &self.cfg.grafana,
                handle,
                queue,
                Some(Arc::clone(&self.health)),
            )
            .context("creating probe executor")?,
        };

        let scheduler = Scheduler::new(
            Arc::new(executors),
            Arc::new(dims),
            catalog,
            self.cfg.sandbox_id.clone(),
            &self.cfg.scheduler,
            Some(Arc::clone(&self.health)),
        );
        self.scheduler = Some(tokio::spawn(scheduler.run(self.cancel.child_token())));

        info!(sandbox = %self.cfg.sandbox_id, "agent fully started");

        Ok(())
    }

    /// Stops the scheduler, the session refresh task, the consumer and the
    /// health server. Queries already in flight are not waited for.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(task) = self.scheduler.take() {
            if let Err(e) = task.await {
                error!(error = %e, "scheduler task failed");
            }
        }

        if let Some(session) = &mut self.session {
            session.stop().await;
        }

        if let Some(task) = self.consumer.take() {
            if let Err(e) = task.await {
                error!(error = %e, "result consumer task failed");
            }
        }

        self.health.stop().await?;

        Ok(())
    }
}
