use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::CorsOrigins;
use crate::dataset::DatasetHandle;
use crate::error::ApiError;
use crate::predictor::{PredictError, Predictor};
use crate::request::{PassengerPolicy, PredictRequest};
use crate::sink::{record_detached, SimulationRecord, SimulationSink};
use crate::types::PredictionOut;

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub dataset: DatasetHandle,
    pub predictor: Predictor,
    pub passenger_policy: PassengerPolicy,
    pub sink: Option<Arc<dyn SimulationSink>>,
    pub log_predictions: bool,
}

impl AppState {
    pub fn new(dataset: DatasetHandle, predictor: Predictor) -> Self {
        Self {
            dataset,
            predictor,
            passenger_policy: PassengerPolicy::Required,
            sink: None,
            log_predictions: false,
        }
    }

    pub fn with_passenger_policy(mut self, policy: PassengerPolicy) -> Self {
        self.passenger_policy = policy;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SimulationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_prediction_logging(mut self, on: bool) -> Self {
        self.log_predictions = on;
        self
    }
}

// ---------- Handlers ----------

async fn index() -> &'static str {
    "Ride duration and fare prediction API is running"
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match &state.dataset {
        DatasetHandle::Loaded(ds) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "rows": ds.len(),
                "mode": state.predictor.mode,
            })),
        ),
        DatasetHandle::Unavailable(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "error": reason.as_ref() })),
        ),
    }
}

async fn predict(State(state): State<AppState>, body: Bytes) -> Result<Json<PredictionOut>, ApiError> {
    // not ready beats bad input
    if let DatasetHandle::Unavailable(reason) = &state.dataset {
        return Err(PredictError::DatasetUnavailable(reason.to_string()).into());
    }

    let req = PredictRequest::from_json(&body, state.passenger_policy)?;
    let (out, hit) = state.predictor.predict_match(&state.dataset, &req.query)?;

    if state.log_predictions {
        let q = &req.query;
        tracing::info!(
            "predict distance={:.3} hour={} day={} pax={} -> row={} score={:.3} duration={:.2} fare={:.2}",
            q.distance_km, q.hour_of_day, q.day_of_week, q.passenger_count,
            hit.index, hit.score, out.predicted_duration_min, out.predicted_fare_usd
        );
    }

    if let Some(sink) = &state.sink {
        // best-effort; the outcome is logged inside the task and dropped here
        drop(record_detached(sink.clone(), SimulationRecord::new(&req, &out)));
    }

    Ok(Json(out.into()))
}

// ---------- Router ----------

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);
    match origins {
        CorsOrigins::Any => layer.allow_origin(Any),
        CorsOrigins::List(list) => {
            let parsed: Vec<HeaderValue> = list
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!(origin = %o, "ignoring unparsable CORS origin");
                        None
                    }
                })
                .collect();
            layer.allow_origin(AllowOrigin::list(parsed))
        }
    }
}

pub fn build_router(state: AppState, origins: &CorsOrigins) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/prever", post(predict))
        .with_state(state)
        .layer(cors_layer(origins))
        .layer(TraceLayer::new_for_http())
}
