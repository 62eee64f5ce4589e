//! End-to-end dispatch tests against in-process peer metrics endpoints.

use async_trait::async_trait;
use axum::{Router, http::StatusCode, routing::get};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use txn_dispatch::{
    DispatchConfig, Dispatcher, ErrorKind, ExecutionUnit, MetricsClient, MetricsConfig,
    MetricsError, PeerEndpoint, StaticTopology, UnitError, Worker, WorkerError, WorkerInvocation,
    WorkloadDescriptor,
};

fn peer_metrics(height: u64, transactions: u64) -> String {
    format!(
        "# HELP ledger_blockchain_height Height of the chain in blocks.\n\
         # TYPE ledger_blockchain_height gauge\n\
         ledger_blockchain_height{{channel=\"mychannel\"}} {height}\n\
         # TYPE ledger_transaction_count counter\n\
         ledger_transaction_count{{chaincode=\"samplecc:v1\",channel=\"mychannel\",transaction_type=\"ENDORSER_TRANSACTION\",validation_code=\"VALID\"}} {transactions}\n\
         ledger_transaction_count{{chaincode=\"samplecc:v1\",channel=\"mychannel\",transaction_type=\"ENDORSER_TRANSACTION\",validation_code=\"MVCC_READ_CONFLICT\"}} 3\n"
    )
}

/// Serve `body` on `GET /metrics` and return the base URL.
async fn serve_metrics(body: String) -> String {
    serve(Router::new().route("/metrics", get(move || async move { body }))).await
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Sleeps a per-index latency and records when each unit finished.
struct LatencyWorker {
    latencies_ms: Vec<u64>,
    fail_index: Option<usize>,
    finished: Mutex<Vec<Instant>>,
}

impl LatencyWorker {
    fn new(latencies_ms: Vec<u64>) -> Self {
        Self {
            latencies_ms,
            fail_index: None,
            finished: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Worker for LatencyWorker {
    async fn run(&self, invocation: &WorkerInvocation) -> Result<(), WorkerError> {
        let latency = self.latencies_ms.get(invocation.index).copied().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(latency)).await;
        self.finished.lock().unwrap().push(Instant::now());
        if Some(invocation.index) == self.fail_index {
            return Err(WorkerError::Exit {
                status: "exit status: 1".into(),
                stderr: "endorsement failure".into(),
            });
        }
        Ok(())
    }
}

fn metrics_client() -> MetricsClient {
    MetricsClient::new(&MetricsConfig {
        request_timeout: Duration::from_secs(5),
        ..MetricsConfig::default()
    })
    .unwrap()
}

fn descriptors(n: usize, orgs: &[&str]) -> Vec<WorkloadDescriptor> {
    (0..n)
        .map(|_| {
            WorkloadDescriptor::new(
                "mychannel",
                "samplecc",
                orgs.iter().map(|o| o.to_string()).collect(),
                "/profiles",
            )
        })
        .collect()
}

async fn two_org_topology(bodies: [String; 3]) -> StaticTopology {
    let [a, b, c] = bodies;
    StaticTopology::default()
        .with_peer(
            "org1",
            "mychannel",
            PeerEndpoint::new("peer0-org1", serve_metrics(a).await),
        )
        .with_peer(
            "org1",
            "mychannel",
            PeerEndpoint::new("peer1-org1", serve_metrics(b).await),
        )
        .with_peer(
            "org2",
            "mychannel",
            PeerEndpoint::new("peer0-org2", serve_metrics(c).await),
        )
}

#[tokio::test]
async fn barrier_waits_for_slowest_unit() {
    let latencies: Vec<u64> = {
        let mut rng = rand::thread_rng();
        (0..10).map(|_| rng.gen_range(0..150)).collect()
    };
    let worker = Arc::new(LatencyWorker::new(latencies));
    let topology = two_org_topology([
        peer_metrics(100, 50),
        peer_metrics(100, 50),
        peer_metrics(100, 50),
    ])
    .await;

    let dispatcher = Dispatcher::new(ExecutionUnit::new(
        worker.clone(),
        Arc::new(topology),
        metrics_client(),
    ));
    let outcome = dispatcher.run(descriptors(10, &["org1", "org2"])).await;
    let returned_at = Instant::now();

    assert_eq!(outcome.results.len(), 10);
    assert!(outcome.all_succeeded(), "{:?}", outcome.summary());

    let finished = worker.finished.lock().unwrap();
    assert_eq!(finished.len(), 10);
    assert!(finished.iter().all(|t| *t <= returned_at));

    for result in &outcome.results {
        let report = result.outcome.as_ref().unwrap();
        assert_eq!(report.channel(), "mychannel");
        assert_eq!(report.peers_checked(), 3);
        assert_eq!(report.reference_peer(), Some("peer0-org1"));
    }
}

#[tokio::test]
async fn worker_failure_is_isolated() {
    let mut worker = LatencyWorker::new(vec![30, 0, 10, 20]);
    worker.fail_index = Some(1);
    let topology = two_org_topology([
        peer_metrics(7, 5),
        peer_metrics(7, 5),
        peer_metrics(7, 5),
    ])
    .await;

    let dispatcher = Dispatcher::new(ExecutionUnit::new(
        Arc::new(worker),
        Arc::new(topology),
        metrics_client(),
    ));
    let outcome = dispatcher.run(descriptors(4, &["org1", "org2"])).await;

    assert_eq!(outcome.results.len(), 4);
    let failed: Vec<_> = outcome.failed().map(|r| r.index).collect();
    assert_eq!(failed, vec![1]);
    assert_eq!(
        outcome.results[1].error().map(UnitError::kind),
        Some(ErrorKind::WorkerLaunch)
    );
    assert_eq!(outcome.succeeded().count(), 3);
}

#[tokio::test]
async fn divergent_peer_fails_unit_with_details() {
    let topology = two_org_topology([
        peer_metrics(100, 50),
        peer_metrics(101, 50),
        peer_metrics(100, 50),
    ])
    .await;

    let dispatcher = Dispatcher::new(ExecutionUnit::new(
        Arc::new(LatencyWorker::new(Vec::new())),
        Arc::new(topology),
        metrics_client(),
    ));
    let outcome = dispatcher.run(descriptors(2, &["org1", "org2"])).await;

    assert_eq!(outcome.failed().count(), 2);
    for result in &outcome.results {
        match result.error() {
            Some(UnitError::Mismatch {
                channel,
                mismatches,
            }) => {
                assert_eq!(channel, "mychannel");
                assert_eq!(mismatches.len(), 1);
                assert_eq!(mismatches[0].peer, "peer1-org1");
                assert_eq!(mismatches[0].reference_peer, "peer0-org1");
                assert_eq!(mismatches[0].expected.blockchain_height, 100);
                assert_eq!(mismatches[0].observed.blockchain_height, 101);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn missing_channel_metric_is_parse_error() {
    let no_channel = "ledger_blockchain_height{channel=\"otherchannel\"} 42\n".to_string();
    let topology = StaticTopology::default().with_peer(
        "org1",
        "mychannel",
        PeerEndpoint::new("peer0-org1", serve_metrics(no_channel).await),
    );

    let unit = ExecutionUnit::new(
        Arc::new(LatencyWorker::new(Vec::new())),
        Arc::new(topology),
        metrics_client(),
    );
    let err = unit
        .execute(0, &descriptors(1, &["org1"])[0])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MetricsParse);
}

#[tokio::test]
async fn non_ok_status_is_transport_error() {
    let down = serve(Router::new().route(
        "/metrics",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "draining") }),
    ))
    .await;
    let topology = StaticTopology::default()
        .with_peer(
            "org1",
            "mychannel",
            PeerEndpoint::new("peer0-org1", serve_metrics(peer_metrics(5, 5)).await),
        )
        .with_peer("org1", "mychannel", PeerEndpoint::new("peer1-org1", down));

    let unit = ExecutionUnit::new(
        Arc::new(LatencyWorker::new(Vec::new())),
        Arc::new(topology),
        metrics_client(),
    );
    let err = unit
        .execute(0, &descriptors(1, &["org1"])[0])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    match err {
        UnitError::Metrics { peer, .. } => assert_eq!(peer, "peer1-org1"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn slow_peer_times_out_as_transport_error() {
    let slow = serve(Router::new().route(
        "/metrics",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            peer_metrics(5, 5)
        }),
    ))
    .await;
    let topology = StaticTopology::default()
        .with_peer(
            "org1",
            "mychannel",
            PeerEndpoint::new("peer0-org1", serve_metrics(peer_metrics(5, 5)).await),
        )
        .with_peer("org1", "mychannel", PeerEndpoint::new("peer1-org1", slow));

    let unit = ExecutionUnit::new(
        Arc::new(LatencyWorker::new(Vec::new())),
        Arc::new(topology),
        MetricsClient::new(&MetricsConfig {
            request_timeout: Duration::from_millis(100),
            ..MetricsConfig::default()
        })
        .unwrap(),
    );
    let started = Instant::now();
    let err = unit
        .execute(0, &descriptors(1, &["org1"])[0])
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(err.kind(), ErrorKind::Transport);
    match err {
        UnitError::Metrics { peer, source } => {
            assert_eq!(peer, "peer1-org1");
            assert!(matches!(source, MetricsError::Transport { .. }), "{source:?}");
            assert!(source.is_timeout());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn process_workers_from_config() {
    use std::io::Write;

    let mut script = tempfile::NamedTempFile::new().unwrap();
    // Unit 2 fails; everyone else succeeds.
    writeln!(script, "[ \"$1\" = \"2\" ] && exit 3\nexit 0").unwrap();

    let peer0 = serve_metrics(peer_metrics(12, 9)).await;
    let peer1 = serve_metrics(peer_metrics(12, 9)).await;
    let yaml = format!(
        r#"
worker:
  program: sh
  entry: {entry}
  timeout: 10s
metrics:
  request_timeout: 5s
topology:
  organizations:
    org1:
      peers:
        peer0-org1: {{ metrics_url: "{peer0}" }}
        peer1-org1: {{ metrics_url: "{peer1}" }}
      channels:
        mychannel: [peer0-org1, peer1-org1]
"#,
        entry = script.path().display(),
    );
    let config = DispatchConfig::from_yaml(&yaml).unwrap();

    let dispatcher = Dispatcher::new(ExecutionUnit::from_config(&config).unwrap());
    let outcome = dispatcher.run(descriptors(4, &["org1"])).await;

    let failed: Vec<_> = outcome.failed().map(|r| r.index).collect();
    assert_eq!(failed, vec![2]);
    assert!(matches!(
        outcome.results[2].error(),
        Some(UnitError::Worker(WorkerError::Exit { .. }))
    ));
    for index in [0, 1, 3] {
        let report = outcome.results[index].outcome.as_ref().unwrap();
        assert_eq!(report.peers_checked(), 2);
    }
}
