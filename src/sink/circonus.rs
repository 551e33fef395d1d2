use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tracing::debug;

use super::Sink;
use crate::config::CirconusConfig;
use crate::result::Measurement;

const AUTH_HEADER: &str = "X-Circonus-Auth-Token";
const APP_HEADER: &str = "X-Circonus-App-Name";

/// Pushes measurements one at a time to an HTTPTrap check.
pub struct HttpTrapSink {
    http: reqwest::Client,
    url: String,
    token: String,
    app_name: String,
}

impl HttpTrapSink {
    pub fn new(cfg: &CirconusConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            url: cfg.submission_url.clone(),
            token: cfg.api_token.clone(),
            app_name: cfg.app_name.clone(),
        })
    }
}

/// Builds `{"_ts": <ms>, "<name>": "<value>", "_type": "<datatype>"}`.
pub fn trap_payload(m: &Measurement) -> Value {
    let mut body = Map::with_capacity(3);
    body.insert("_ts".to_string(), Value::from(m.timestamp * 1000));
    body.insert(m.name.clone(), Value::from(m.value.clone()));
    body.insert(
        "_type".to_string(),
        Value::from(m.datatype_or_default().to_string()),
    );
    Value::Object(body)
}

impl Sink for HttpTrapSink {
    fn name(&self) -> &str {
        "circonus"
    }

    async fn push(&self, m: &Measurement) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .header(AUTH_HEADER, &self.token)
            .header(APP_HEADER, &self.app_name)
            .json(&trap_payload(m))
            .send()
            .await
            .context("sending trap submission")?;

        let status = resp.status();
        // Drain body for connection reuse.
        let _ = resp.bytes().await;

        if !status.is_success() {
            bail!("trap submission unexpected status: {status}");
        }

        debug!(name = %m.name, "submitted result");

        Ok(())
    }
}
