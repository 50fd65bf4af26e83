use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bench_core::{
    aggregate, Config, HttpClient, RequestExecutor, RetryPolicy, RetryingTransport, RunSettings,
    Scheduler, TestType,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct StubState {
    score: f64,
    /// Respond 503 to this many requests before answering normally
    fail_first: usize,
    calls: Arc<AtomicUsize>,
}

async fn infer(State(state): State<StubState>, Json(req): Json<Value>) -> (StatusCode, Json<Value>) {
    let call = state.calls.fetch_add(1, Ordering::SeqCst);
    if call < state.fail_first {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "warming up"})),
        );
    }

    let input = &req["inputs"][0];
    let valid = input["name"] == "float_input"
        && input["datatype"] == "FP32"
        && input["shape"] == json!([1, 15])
        && input["data"][0].as_array().map(|row| row.len()) == Some(15);
    if !valid {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "bad input tensor"})),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "model_name": "fraud_detector",
            "outputs": [{"name": "probabilities", "shape": [1, 1], "datatype": "FP32", "data": [state.score]}]
        })),
    )
}

async fn start_stub(score: f64, fail_first: usize) -> (String, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = StubState {
        score,
        fail_first,
        calls: calls.clone(),
    };
    let app = Router::new()
        .route("/v2/models/fraud_detector/infer", post(infer))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), calls)
}

fn scheduler_for(endpoint: &str) -> Scheduler {
    let mut config = Config::default();
    config.target.endpoint = endpoint.to_string();
    config.target.timeout_ms = 5_000;
    config.retry.backoff_base_ms = 10;
    config.run.concurrency = 8;
    config.validate().unwrap();

    let client = HttpClient::from_config(&config).unwrap();
    let transport = RetryingTransport::new(Arc::new(client), RetryPolicy::from_config(&config));
    Scheduler::new(RequestExecutor::new(transport), 7)
}

#[tokio::test]
async fn test_high_score_classified_as_fraud() {
    let (endpoint, calls) = start_stub(0.9, 0).await;
    let collected = scheduler_for(&endpoint).run_concurrent(60, 8).await;

    assert_eq!(collected.outcomes.len(), 60);
    assert!(collected.outcomes.iter().all(|o| o.is_success() && o.is_fraud()));
    assert_eq!(calls.load(Ordering::SeqCst), 60);

    let run = aggregate(
        &collected.outcomes,
        collected.duration,
        RunSettings {
            test_type: TestType::Throughput,
            requests: 60,
            concurrency: 8,
        },
    );
    assert_eq!(run.success_rate, 1.0);
    assert_eq!(run.predicted_fraud, 60);
    assert!(run.throughput_rps.unwrap() > 0.0);
    assert!(run.latency.p50_ms.unwrap() <= run.latency.p99_ms.unwrap());
}

#[tokio::test]
async fn test_low_score_classified_as_legit() {
    let (endpoint, _) = start_stub(0.2, 0).await;
    let collected = scheduler_for(&endpoint).run_sequential(20).await;

    assert_eq!(collected.outcomes.len(), 20);
    assert!(collected.outcomes.iter().all(|o| o.is_success() && !o.is_fraud()));
}

#[tokio::test]
async fn test_service_unavailable_is_retried_over_http() {
    let (endpoint, calls) = start_stub(0.9, 2).await;
    let collected = scheduler_for(&endpoint).run_sequential(1).await;

    let outcome = &collected.outcomes[0];
    assert!(outcome.is_success(), "{:?}", outcome.status);
    assert_eq!(outcome.attempts, 3);
    // 10ms + 20ms of backoff
    assert!(outcome.inference_time >= Duration::from_millis(30));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unreachable_endpoint_reports_failures() {
    // Bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let collected = scheduler_for(&format!("http://{}", addr))
        .run_concurrent(5, 5)
        .await;
    assert_eq!(collected.outcomes.len(), 5);

    let run = aggregate(
        &collected.outcomes,
        collected.duration,
        RunSettings {
            test_type: TestType::Throughput,
            requests: 5,
            concurrency: 5,
        },
    );
    assert!(run.is_degenerate());
    assert_eq!(run.success_rate, 0.0);
    assert!(run.latency.p50_ms.is_none());
    assert!(collected
        .outcomes
        .iter()
        .all(|o| o.inference_time == Duration::ZERO));
}
