//! Scanbox operator service.
//!
//! Serves `/health` and `/metrics` next to the scan controller.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use scanbox_core::observability::init_logging;
use scanbox_operator::config::OperatorConfig;
use scanbox_operator::startup::{Operator, StartupError};

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

async fn serve(port: u16, handle: PrometheusHandle) {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "failed to bind health server");
            return;
        }
    };
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "health server stopped");
    }
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = OperatorConfig::from_env().map_err(StartupError::Config)?;
    init_logging(config.log_format);

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(StartupError::Metrics)?;

    let port = config.port;
    let operator = Operator::bootstrap(config).await.inspect_err(|err| {
        tracing::error!(error = %err, "operator startup failed");
    })?;

    tokio::spawn(serve(port, handle));
    operator.run().await;
    Ok(())
}
