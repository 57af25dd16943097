use serde::{Deserialize, Serialize};

/// One historical trip from the reference snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRow {
    pub distance_km: f64,
    pub hour_of_day: i64,        // conventionally 0..=23, not enforced
    pub day_of_week: i64,        // conventionally 0..=6, not enforced
    pub passenger_count: i64,
    pub predicted_duration_min: f64,
    pub predicted_fare_usd: f64,
}

/// Attributes of the ride being simulated. Lives for one prediction call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Query {
    pub distance_km: f64,
    pub hour_of_day: i64,
    pub day_of_week: i64,
    pub passenger_count: i64,
}

/// Targets copied from exactly one reference row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionResult {
    pub predicted_duration_min: f64,
    pub predicted_fare_usd: f64,
}

impl From<&ReferenceRow> for PredictionResult {
    fn from(row: &ReferenceRow) -> Self {
        Self {
            predicted_duration_min: row.predicted_duration_min,
            predicted_fare_usd: row.predicted_fare_usd,
        }
    }
}

// Wire shape kept from the public API the frontend already speaks.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictionOut {
    pub duracao_prevista_min: f64,
    pub valor_previsto_usd: f64,
}

impl From<PredictionResult> for PredictionOut {
    fn from(p: PredictionResult) -> Self {
        Self {
            duracao_prevista_min: p.predicted_duration_min,
            valor_previsto_usd: p.predicted_fare_usd,
        }
    }
}
