use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use reqwest::header::COOKIE;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::dialect::Dialect;
use crate::catalog::probes::RANGE_PLACEHOLDER;
use crate::catalog::ProbeSpec;
use crate::config::GrafanaConfig;
use crate::export::health::HealthMetrics;
use crate::result::{unix_now, Measurement, ResultQueue, NAN};
use crate::session::SessionHandle;

const CAQL_ACCOUNT_HEADER: &str = "x-circonus-account";

/// Why a probe produced no scalar. Never leaves the executor.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("probe returned HTTP status {0}")]
    Status(u16),

    #[error("reading probe response: {0}")]
    Body(reqwest::Error),

    #[error("no scalar found in probe response")]
    NoMatch,
}

/// Runs TSDB probes through the dashboard's datasource proxy.
pub struct ProbeExecutor {
    http: reqwest::Client,
    proxy_base: String,
    caql_account: String,
    influx_database: String,
    influx_epoch: String,
    session: SessionHandle,
    queue: ResultQueue,
    health: Option<Arc<HealthMetrics>>,
}

impl ProbeExecutor {
    pub fn new(
        cfg: &GrafanaConfig,
        session: SessionHandle,
        queue: ResultQueue,
        health: Option<Arc<HealthMetrics>>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.query_timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            proxy_base: format!(
                "{}/api/datasources/proxy/{}",
                cfg.url.trim_end_matches('/'),
                cfg.datasource_id,
            ),
            caql_account: cfg.circonus_account.clone(),
            influx_database: cfg.influx_database.clone(),
            influx_epoch: cfg.influx_epoch.clone(),
            session,
            queue,
            health,
        })
    }

    /// Issues the probe once and emits `<reporting_name>.duration` (elapsed
    /// milliseconds) and `<reporting_name>.value`.
    ///
    /// Both are "nan" when the request fails; only the value is when the
    /// response held no scalar.
    pub async fn execute(&self, reporting_name: &str, probe: &ProbeSpec) {
        let started = Instant::now();

        let outcome = self.query(probe, unix_now()).await;
        let elapsed = started.elapsed();
        let timestamp = unix_now();

        if let Some(h) = &self.health {
            h.record_query(probe.dialect.as_str(), outcome.is_ok(), elapsed.as_secs_f64());
        }

        let elapsed_ms = format!("{:.2}", elapsed.as_secs_f64() * 1000.0);
        let (duration, value) = match outcome {
            Ok(scalar) => (elapsed_ms, scalar),
            Err(ProbeError::NoMatch) => {
                warn!(probe = probe.name, "probe response carried no scalar");
                (elapsed_ms, NAN.to_string())
            }
            Err(e) => {
                error!(probe = probe.name, error = %e, "probe failed");
                (NAN.to_string(), NAN.to_string())
            }
        };

        debug!(probe = probe.name, duration_ms = %duration, value = %value, "probe finished");

        self.queue.enqueue(Measurement::at(
            timestamp,
            format!("{reporting_name}.duration"),
            duration,
        ));
        self.queue.enqueue(Measurement::at(
            timestamp,
            format!("{reporting_name}.value"),
            value,
        ));
    }

    async fn query(&self, probe: &ProbeSpec, now: i64) -> Result<String, ProbeError> {
        let end = now;
        let start = now - probe.window.span.as_secs() as i64;

        let mut req = match probe.dialect {
            Dialect::Caql => self
                .http
                .get(format!("{}/extension/lua/caql_v1", self.proxy_base))
                .header(CAQL_ACCOUNT_HEADER, &self.caql_account)
                .query(&[
                    ("format", "DF4".to_string()),
                    ("start", start.to_string()),
                    ("end", end.to_string()),
                    ("period", "60".to_string()),
                    ("q", probe.query.to_string()),
                ]),
            Dialect::InfluxQl => {
                let q = probe.query.replace(RANGE_PLACEHOLDER, probe.window.literal);
                self.http
                    .get(format!("{}/query", self.proxy_base))
                    .query(&[
                        ("db", self.influx_database.as_str()),
                        ("q", q.as_str()),
                        ("epoch", self.influx_epoch.as_str()),
                    ])
            }
            Dialect::Sql => self
                .http
                .get(format!("{}/query", self.proxy_base))
                .query(&[
                    ("from", (start * 1000).to_string()),
                    ("to", (end * 1000).to_string()),
                    ("q", probe.query.to_string()),
                ]),
        };

        match self.session.current() {
            Some(cred) => req = req.header(COOKIE, cred.cookie()),
            None => warn!(probe = probe.name, "no session credential, sending probe without cookie"),
        }

        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body = resp.text().await.map_err(ProbeError::Body)?;

        probe.dialect.extract(&body).ok_or(ProbeError::NoMatch)
    }
}
