use std::{net::SocketAddr, sync::Arc};

use ride_predictor::{
    config::{Config, LogFormat},
    server::{build_router, AppState},
    sink::{PgSimulationLog, SimulationSink},
    DatasetHandle, Predictor,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenv::dotenv();

    let cfg = Config::from_env()?;
    init_tracing(cfg.log_format);

    // Loaded before the listener is bound; a bad snapshot leaves the
    // service up but answering 503.
    let dataset = DatasetHandle::load(&cfg.snapshot_path);

    let predictor = Predictor::new(cfg.weights, cfg.match_mode);
    tracing::info!(
        "predictor mode={:?} weights distance={} hour={} day={} passengers={} passenger_policy={:?}",
        predictor.mode,
        predictor.weights.distance,
        predictor.weights.hour,
        predictor.weights.day,
        predictor.weights.passengers,
        cfg.passenger_policy
    );

    let mut state = AppState::new(dataset, predictor)
        .with_passenger_policy(cfg.passenger_policy)
        .with_prediction_logging(cfg.log_predictions);

    match cfg.database_url.as_deref() {
        Some(url) => match PgSimulationLog::connect(url).await {
            Ok(log) => {
                let sink: Arc<dyn SimulationSink> = Arc::new(log);
                state = state.with_sink(sink);
            }
            Err(e) => tracing::warn!("simulation log disabled, database unreachable: {:#}", e),
        },
        None => tracing::info!("DATABASE_URL not set; simulations will not be stored"),
    }

    let app = build_router(state, &cfg.cors_origins);

    let addr = SocketAddr::new(cfg.bind_addr, cfg.port);
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
