/// End-to-end tests for the prediction API.
///
/// Run with: cargo test --test api_tests -- --nocapture

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use ride_predictor::{
    config::CorsOrigins,
    request::PassengerPolicy,
    server::{build_router, AppState},
    sink::{SimulationRecord, SimulationSink, SinkOutcome},
    types::PredictionOut,
    DatasetHandle, MatchMode, Predictor, ReferenceRow, Weights,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

fn row(distance_km: f64, hour: i64, day: i64, pax: i64, dur: f64, fare: f64) -> ReferenceRow {
    ReferenceRow {
        distance_km,
        hour_of_day: hour,
        day_of_week: day,
        passenger_count: pax,
        predicted_duration_min: dur,
        predicted_fare_usd: fare,
    }
}

fn sample_rows() -> Vec<ReferenceRow> {
    vec![
        row(5.0, 10, 2, 1, 12.0, 15.0),
        row(5.1, 10, 2, 1, 13.0, 15.5),
        row(12.4, 18, 4, 2, 38.0, 41.75),
    ]
}

fn app(dataset: DatasetHandle) -> Router {
    build_router(AppState::new(dataset, Predictor::default()), &CorsOrigins::Any)
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

struct ChannelSink(mpsc::UnboundedSender<SimulationRecord>);

#[async_trait]
impl SimulationSink for ChannelSink {
    async fn record(&self, rec: &SimulationRecord) -> SinkOutcome {
        match self.0.send(rec.clone()) {
            Ok(()) => SinkOutcome::Written,
            Err(e) => SinkOutcome::Failed(e.to_string()),
        }
    }
}

struct FailingSink;

#[async_trait]
impl SimulationSink for FailingSink {
    async fn record(&self, _rec: &SimulationRecord) -> SinkOutcome {
        SinkOutcome::Failed("relation \"simulations\" does not exist".into())
    }
}

#[tokio::test]
async fn test_predict_returns_nearest_row() {
    println!("\n=== Test: Predict Returns Nearest Row ===");
    let (status, body) = post_json(
        app(DatasetHandle::from_rows(sample_rows())),
        "/predict",
        json!({ "trip_distance": 5.0, "pickup_hour": 10, "pickup_day_of_week": 2, "passenger_count": 1 }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let out: PredictionOut = serde_json::from_value(body).unwrap();
    assert_eq!(out.duracao_prevista_min, 12.0);
    assert_eq!(out.valor_previsto_usd, 15.0);
    println!("✓ {:?}", out);
}

#[tokio::test]
async fn test_legacy_route_and_closer_row() {
    println!("\n=== Test: Legacy Route ===");
    let (status, body) = post_json(
        app(DatasetHandle::from_rows(sample_rows())),
        "/prever",
        json!({ "trip_distance": 5.08, "pickup_hour": 10, "pickup_day_of_week": 2, "passenger_count": 1 }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "duracao_prevista_min": 13.0, "valor_previsto_usd": 15.5 }));
    println!("✓ /prever answered {}", body);
}

#[tokio::test]
async fn test_missing_field_is_client_error() {
    println!("\n=== Test: Missing Field ===");
    let (status, body) = post_json(
        app(DatasetHandle::from_rows(sample_rows())),
        "/predict",
        json!({ "trip_distance": 5.0, "pickup_hour": 10 }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let msg = body["error"].as_str().unwrap();
    assert!(msg.contains("pickup_day_of_week"), "unexpected error: {msg}");
    assert!(msg.contains("passenger_count"), "unexpected error: {msg}");
    println!("✓ 400: {}", msg);
}

#[tokio::test]
async fn test_malformed_json_is_client_error() {
    let resp = app(DatasetHandle::from_rows(sample_rows()))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/predict")
                .body(Body::from("{\"trip_distance\": "))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_passenger_default_policy() {
    println!("\n=== Test: Passenger Default Policy ===");
    let state = AppState::new(DatasetHandle::from_rows(sample_rows()), Predictor::default())
        .with_passenger_policy(PassengerPolicy::Default(1));
    let router = build_router(state, &CorsOrigins::Any);

    let (status, body) = post_json(
        router,
        "/predict",
        json!({ "trip_distance": 12.0, "pickup_hour": 18, "pickup_day_of_week": 4 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valor_previsto_usd"], json!(41.75));
    println!("✓ defaulted passenger count accepted");
}

#[tokio::test]
async fn test_unavailable_dataset_is_503() {
    println!("\n=== Test: Unavailable Dataset ===");
    let handle = DatasetHandle::load("/no/such/dir/dados.parquet");
    let (status, body) = post_json(
        app(handle.clone()),
        "/predict",
        json!({ "trip_distance": 5.0, "pickup_hour": 10, "pickup_day_of_week": 2, "passenger_count": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("not loaded"));

    // not-ready wins over bad input
    let (status, _) = post_json(app(handle), "/predict", json!({})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    println!("✓ 503 with {}", body);
}

#[tokio::test]
async fn test_empty_dataset_is_404() {
    println!("\n=== Test: Empty Dataset ===");
    let (status, body) = post_json(
        app(DatasetHandle::from_rows(vec![])),
        "/predict",
        json!({ "trip_distance": 5.0, "pickup_hour": 10, "pickup_day_of_week": 2, "passenger_count": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    println!("✓ 404 with {}", body);
}

#[tokio::test]
async fn test_exact_mode_misses_with_404() {
    let state = AppState::new(
        DatasetHandle::from_rows(sample_rows()),
        Predictor::new(Weights::default(), MatchMode::Exact),
    );
    let router = build_router(state, &CorsOrigins::Any);
    let (status, _) = post_json(
        router,
        "/predict",
        json!({ "trip_distance": 5.05, "pickup_hour": 10, "pickup_day_of_week": 2, "passenger_count": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_readiness() {
    println!("\n=== Test: Health ===");
    let (status, body) = get(app(DatasetHandle::from_rows(sample_rows())), "/health").await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["rows"], 3);
    assert_eq!(body["mode"], "nearest");

    let (status, body) = get(app(DatasetHandle::unavailable("snapshot missing")), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "unavailable");
    assert_eq!(body["error"], "snapshot missing");

    let (status, banner) = get(app(DatasetHandle::unavailable("x")), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!banner.is_empty());
    println!("✓ health endpoints behave");
}

#[tokio::test]
async fn test_prediction_is_logged_to_sink() {
    println!("\n=== Test: Simulation Log ===");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let state = AppState::new(DatasetHandle::from_rows(sample_rows()), Predictor::default())
        .with_sink(Arc::new(ChannelSink(tx)));
    let router = build_router(state, &CorsOrigins::Any);

    let (status, _) = post_json(
        router,
        "/predict",
        json!({
            "trip_distance": 12.0, "pickup_hour": 18, "pickup_day_of_week": 4,
            "passenger_count": 2, "nome": "Rita", "fonte": "instagram"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let rec = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("sink was never called")
        .unwrap();
    assert_eq!(rec.distance_km, 12.0);
    assert_eq!(rec.hour_of_day, 18);
    assert_eq!(rec.day_of_week, 4);
    assert_eq!(rec.user_name.as_deref(), Some("Rita"));
    assert_eq!(rec.source_label, "instagram");
    assert_eq!(rec.predicted_duration_min, 38.0);
    assert_eq!(rec.predicted_fare_usd, 41.75);
    println!("✓ stored {:?}", rec);
}

#[tokio::test]
async fn test_sink_failure_does_not_fail_response() {
    let state = AppState::new(DatasetHandle::from_rows(sample_rows()), Predictor::default())
        .with_sink(Arc::new(FailingSink));
    let router = build_router(state, &CorsOrigins::Any);
    let (status, body) = post_json(
        router,
        "/predict",
        json!({ "trip_distance": 5.0, "pickup_hour": 10, "pickup_day_of_week": 2, "passenger_count": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duracao_prevista_min"], json!(12.0));
}

#[tokio::test]
async fn test_cors_preflight_allowed() {
    let resp = app(DatasetHandle::from_rows(sample_rows()))
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/prever")
                .header("origin", "https://frontend.example")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_snapshot_file_end_to_end() {
    println!("\n=== Test: Snapshot File End To End ===");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dados.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "distance_km,hour_of_day,day_of_week,passenger_count,predicted_duration_min,predicted_fare_usd").unwrap();
    writeln!(f, "2.0,14,1,1,9.5,11.0").unwrap();
    writeln!(f, "2.4,16,1,1,14.0,13.5").unwrap();
    drop(f);

    let handle = DatasetHandle::load(&path);
    assert!(handle.is_ready());
    let query = json!({ "trip_distance": 2.0, "pickup_hour": 16, "pickup_day_of_week": 1, "passenger_count": 1 });

    // default weights: 2 hours off (2) beats 0.4 km off (4)
    let state = AppState::new(handle.clone(), Predictor::default());
    let (status, body) = post_json(build_router(state, &CorsOrigins::Any), "/predict", query.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duracao_prevista_min"], json!(9.5));

    // rush-hour hour weight: the same 2 hours now cost 6
    let state = AppState::new(handle, Predictor::new(Weights::default().with_hour(3.0), MatchMode::Nearest));
    let (status, body) = post_json(build_router(state, &CorsOrigins::Any), "/predict", query).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duracao_prevista_min"], json!(14.0));
    println!("✓ {}", body);
}
