use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tsdb_eval::catalog::ProbeCatalog;
use tsdb_eval::cloud::{MetricPoint, MetricRequest, MetricSource};
use tsdb_eval::config::{CirconusConfig, GrafanaConfig, SchedulerConfig};
use tsdb_eval::discovery::DimensionSet;
use tsdb_eval::executor::{CloudMetricExecutor, Dialect, Executors, ProbeExecutor};
use tsdb_eval::result::{AuditLog, Consumer, Measurement, ResultQueue};
use tsdb_eval::scheduler::Scheduler;
use tsdb_eval::session::SessionHandle;
use tsdb_eval::sink::HttpTrapSink;

/// Reports 42.0 for every request.
struct ConstantSource;

impl MetricSource for ConstantSource {
    async fn fetch(&self, _req: &MetricRequest) -> Result<Vec<MetricPoint>> {
        Ok(vec![MetricPoint {
            timestamp: 1_600_000_000,
            value: 42.0,
        }])
    }
}

#[tokio::test]
async fn queue_consumer_forwards_data_and_audits_everything() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/trap"))
        .and(header("X-Circonus-Auth-Token", "tok"))
        .and(body_json(serde_json::json!({
            "_ts": 1_600_000_000_000i64,
            "sbx.query.metrics-count.value": "400",
            "_type": "n",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sink = HttpTrapSink::new(&CirconusConfig {
        submission_url: format!("{}/trap", server.uri()),
        api_token: "tok".to_string(),
        ..Default::default()
    })
    .unwrap();

    let audit_file = tempfile::NamedTempFile::new().unwrap();
    let audit = AuditLog::open(audit_file.path()).unwrap();

    let (queue, rx) = ResultQueue::new(8, None).unwrap();
    assert!(queue.enqueue(Measurement::at(
        1_600_000_000,
        "sbx.query.metrics-count.value",
        "400"
    )));
    assert!(queue.enqueue(Measurement::nan(
        1_600_000_000,
        "sbx.query.metrics-count.duration"
    )));
    drop(queue);

    // Ends by itself once the last producer is gone.
    Consumer::new(rx, sink, audit, None)
        .run(CancellationToken::new())
        .await;

    let audit = std::fs::read_to_string(audit_file.path()).unwrap();
    let lines: Vec<&str> = audit.lines().collect();
    assert_eq!(
        lines,
        vec![
            "[1600000000] sbx.query.metrics-count.value=400",
            "[1600000000] sbx.query.metrics-count.duration=nan",
        ]
    );
}

#[tokio::test]
async fn one_cycle_emits_every_cloud_and_probe_result() {
    let dashboard = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/datasources/proxy/1/extension/lua/caql_v1"))
        .and(header("cookie", "grafana_session=tok"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":[[3,5]],"meta":[]}"#))
        .mount(&dashboard)
        .await;

    let (queue, mut rx) = ResultQueue::new(1024, None).unwrap();

    let grafana = GrafanaConfig {
        url: dashboard.uri(),
        password: "pw".to_string(),
        ..Default::default()
    };
    let executors = Executors {
        cloud: CloudMetricExecutor::new(ConstantSource, "AWS/EC2", queue.clone(), None),
        probe: ProbeExecutor::new(
            &grafana,
            SessionHandle::fixed("grafana_session=tok"),
            queue,
            None,
        )
        .unwrap(),
    };

    let mut dims = DimensionSet::with_capacity(2, 1);
    dims.group_names = vec!["sbx_irondb-nodes-a".to_string(), String::new()];
    dims.instance_ids = vec!["i-1".to_string(), String::new()];

    let cfg = SchedulerConfig {
        interval: Duration::from_secs(60),
        pacing: Duration::from_millis(10),
        max_in_flight: 64,
    };
    let scheduler = Scheduler::new(
        Arc::new(executors),
        Arc::new(dims),
        ProbeCatalog::build(Dialect::Caql, false),
        "sbx",
        &cfg,
        None,
    );

    let cancel = CancellationToken::new();
    let task = tokio::spawn(scheduler.run(cancel.clone()));

    // 7 metrics x 2 populated slots, plus two results per probe.
    let expected = 7 * 2 + 2 * 11;
    let mut results = Vec::new();
    while results.len() < expected {
        let m = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("results arrive within the cycle")
            .expect("queue open");
        results.push(m);
    }
    cancel.cancel();
    task.await.unwrap();

    let value = |name: &str| {
        results
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.value.clone())
            .unwrap_or_else(|| panic!("missing {name}"))
    };

    assert_eq!(value("sbx.infra.tsdb-asg-1.cpu.utilization.avg"), "42.00");
    assert_eq!(value("sbx.infra.tsdb-node-1.ebs.write.bytes"), "42.00");
    assert_eq!(value("sbx.query.metrics-count.value"), "5");
    assert_eq!(value("sbx.query.400-ts-mean-1-week-range.value"), "5");
    assert_ne!(value("sbx.query.metrics-count.duration"), "nan");
    assert!(results.iter().all(|m| !m.name.contains("-2.")));
}
