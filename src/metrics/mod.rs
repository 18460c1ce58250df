use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;


lazy_static! {
    pub static ref VOTE_RESULT_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("vote_result_total", "Vote decisions by result"),
        &["node", "result"]
    )
    .expect("metric can not be created");

    pub static ref ELECTION_ROUND_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("election_round_total", "Vote rounds by outcome"),
        &["node", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref ROLE_TRANSITION_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("role_transition_total", "Role transitions by target role"),
        &["node", "role"]
    )
    .expect("metric can not be created");

    pub static ref PUSH_FAILURE_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("push_failure_total", "Rejected or failed pushes by follower and code"),
        &["node", "peer", "code"]
    )
    .expect("metric can not be created");

    pub static ref COMMITTED_INDEX_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("committed_index", "Committed index per node"),
        &["node"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

/// Adds the ledger collectors to [`REGISTRY`]; later calls are no-ops.
pub fn register_custom_metrics() {
    REGISTER.call_once(|| register_into(&REGISTRY));
}

fn register_into(registry: &Registry) {
    registry
        .register(Box::new(VOTE_RESULT_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ELECTION_ROUND_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ROLE_TRANSITION_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(PUSH_FAILURE_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(COMMITTED_INDEX_METRIC.clone()))
        .expect("collector can be registered");
}

/// Text exposition of everything in `registry`.
pub fn render_metrics(registry: &Registry) -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("custom metrics could not be from_utf8'd: {}", e);
        String::default()
    })
}

/// Serves `GET /metrics` until `shutdown_signal` fires.
pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics();

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);
    info!("metrics endpoint listening on 0.0.0.0:{}", port);
    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(render_metrics(&REGISTRY))
}
