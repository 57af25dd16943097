use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::Query;

pub const FIELD_DISTANCE: &str = "trip_distance";
pub const FIELD_HOUR: &str = "pickup_hour";
pub const FIELD_DAY: &str = "pickup_day_of_week";
pub const FIELD_PASSENGERS: &str = "passenger_count";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request body is not valid JSON: {0}")]
    MalformedBody(String),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("missing required input fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("field `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Whether `passenger_count` may be omitted by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassengerPolicy {
    #[default]
    Required,
    Default(i64),
}

/// A validated prediction request: the query plus the optional labels that
/// go to the simulation log.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictRequest {
    pub query: Query,
    pub user_name: Option<String>,
    pub source: Option<String>,
}

impl PredictRequest {
    pub fn from_json(body: &[u8], policy: PassengerPolicy) -> Result<Self, RequestError> {
        let v: Value =
            serde_json::from_slice(body).map_err(|e| RequestError::MalformedBody(e.to_string()))?;
        Self::from_value(&v, policy)
    }

    pub fn from_value(v: &Value, policy: PassengerPolicy) -> Result<Self, RequestError> {
        let obj = v.as_object().ok_or(RequestError::NotAnObject)?;

        // report every absent field at once, before looking at types
        let mut missing = Vec::new();
        for field in [FIELD_DISTANCE, FIELD_HOUR, FIELD_DAY] {
            if present(obj, field).is_none() {
                missing.push(field);
            }
        }
        if policy == PassengerPolicy::Required && present(obj, FIELD_PASSENGERS).is_none() {
            missing.push(FIELD_PASSENGERS);
        }
        if !missing.is_empty() {
            return Err(RequestError::MissingFields(missing));
        }

        let distance_km = number(obj, FIELD_DISTANCE)?;
        if distance_km < 0.0 {
            return Err(RequestError::InvalidField {
                field: FIELD_DISTANCE,
                expected: "a non-negative number",
            });
        }
        let hour_of_day = integer(obj, FIELD_HOUR)?;
        let day_of_week = integer(obj, FIELD_DAY)?;
        let passenger_count = match (present(obj, FIELD_PASSENGERS), policy) {
            (Some(_), _) => integer(obj, FIELD_PASSENGERS)?,
            (None, PassengerPolicy::Default(n)) => n,
            (None, PassengerPolicy::Required) => {
                return Err(RequestError::MissingFields(vec![FIELD_PASSENGERS]))
            }
        };
        if passenger_count < 1 {
            return Err(RequestError::InvalidField {
                field: FIELD_PASSENGERS,
                expected: "a positive integer",
            });
        }

        Ok(Self {
            query: Query {
                distance_km,
                hour_of_day,
                day_of_week,
                passenger_count,
            },
            user_name: text(obj, &["nome", "user_name"]),
            source: text(obj, &["fonte", "source"]),
        })
    }
}

// null counts as absent
fn present<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    obj.get(field).filter(|v| !v.is_null())
}

fn number(obj: &Map<String, Value>, field: &'static str) -> Result<f64, RequestError> {
    let invalid = RequestError::InvalidField {
        field,
        expected: "a number",
    };
    let parsed = match present(obj, field) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).ok_or(invalid)
}

fn integer(obj: &Map<String, Value>, field: &'static str) -> Result<i64, RequestError> {
    let invalid = RequestError::InvalidField {
        field,
        expected: "an integer",
    };
    // i64::MAX is not representable in f64; 2^63 is the first value out of range
    let from_float = |f: f64| {
        (f.fract() == 0.0 && f >= i64::MIN as f64 && f < -(i64::MIN as f64)).then_some(f as i64)
    };
    let parsed = match present(obj, field) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(from_float)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_float))
        }
        _ => None,
    };
    parsed.ok_or(invalid)
}

fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
