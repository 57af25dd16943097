use std::{net::IpAddr, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Context, Result};

use crate::predictor::{MatchMode, Weights};
use crate::request::PassengerPolicy;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SNAPSHOT_PATH: &str = "dados.parquet";

#[derive(Debug, Clone, PartialEq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub snapshot_path: PathBuf,
    pub database_url: Option<String>,
    pub match_mode: MatchMode,
    pub weights: Weights,
    pub passenger_policy: PassengerPolicy,
    pub cors_origins: CorsOrigins,
    pub log_predictions: bool,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Builds the config from any key lookup. Unset or blank keys fall back
    /// to defaults; set but unparsable values are errors.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let defaults = Weights::default();
        let weights = Weights {
            distance: parse_or(&var, "WEIGHT_DISTANCE", defaults.distance)?,
            hour: parse_or(&var, "WEIGHT_HOUR", defaults.hour)?,
            day: parse_or(&var, "WEIGHT_DAY", defaults.day)?,
            passengers: parse_or(&var, "WEIGHT_PASSENGERS", defaults.passengers)?,
        };
        for (name, w) in [
            ("WEIGHT_DISTANCE", weights.distance),
            ("WEIGHT_HOUR", weights.hour),
            ("WEIGHT_DAY", weights.day),
            ("WEIGHT_PASSENGERS", weights.passengers),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(anyhow!("{name} must be a finite non-negative number, got {w}"));
            }
        }

        let passenger_policy = match var("DEFAULT_PASSENGER_COUNT") {
            None => PassengerPolicy::Required,
            Some(v) => {
                let n: i64 = v
                    .parse()
                    .with_context(|| format!("invalid DEFAULT_PASSENGER_COUNT `{v}`"))?;
                if n < 1 {
                    return Err(anyhow!("DEFAULT_PASSENGER_COUNT must be positive, got {n}"));
                }
                PassengerPolicy::Default(n)
            }
        };

        let match_mode = match var("MATCH_MODE") {
            None => MatchMode::default(),
            Some(v) => v.parse().map_err(|e: String| anyhow!(e))?,
        };

        let cors_origins = match var("CORS_ORIGINS") {
            None => CorsOrigins::Any,
            Some(v) if v.split(',').any(|o| o.trim() == "*") => CorsOrigins::Any,
            Some(v) => CorsOrigins::List(
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect(),
            ),
        };

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("pretty") | Some("text") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(anyhow!("unknown LOG_FORMAT `{other}` (expected pretty|json)")),
        };

        Ok(Self {
            bind_addr: parse_or(&var, "BIND_ADDR", IpAddr::from([0, 0, 0, 0]))?,
            port: parse_or(&var, "PORT", DEFAULT_PORT)?,
            snapshot_path: var("SNAPSHOT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
            database_url: var("DATABASE_URL"),
            match_mode,
            weights,
            passenger_policy,
            cors_origins,
            log_predictions: var("LOG_PREDICTIONS").as_deref() == Some("1"),
            log_format,
        })
    }
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .with_context(|| format!("invalid value for {key}: `{v}`")),
    }
}
