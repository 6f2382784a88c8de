pub mod error;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use error::Error;
use ethers::types::U256;
use hyper::header::CONTENT_TYPE;
use hyper::StatusCode;
use prometheus::{Encoder, TextEncoder};
use tracing::info;

use crate::app::App;
use crate::config::ServerConfig;
use crate::shutdown::Shutdown;

mod custom_middleware;
pub mod data;

use self::data::{AddPaymentRequest, AddPaymentResponse, SendoutResponse, StatusResponse};

async fn add_payment(
    State(app): State<Arc<App>>,
    Json(req): Json<AddPaymentRequest>,
) -> Result<(StatusCode, Json<AddPaymentResponse>), Error> {
    let value = U256::from_dec_str(&req.value)
        .map_err(|e| Error::Other(anyhow::anyhow!("invalid payment value: {e}")))?;

    let processed_ts = app.add_payment(&req.subtask_id, req.payee, value).await?;

    Ok((
        StatusCode::CREATED,
        Json(AddPaymentResponse { processed_ts }),
    ))
}

/// Triggers an opportunistic `sendout` right away rather than waiting for the
/// periodic driver. Mainly useful for tests and manual operation.
async fn trigger_sendout(State(app): State<Arc<App>>) -> Result<Json<SendoutResponse>, Error> {
    let sent = app.sendout().await?;
    Ok(Json(SendoutResponse { sent }))
}

async fn status(State(app): State<Arc<App>>) -> Json<StatusResponse> {
    let (reserved_amount, recipients_count) = app.status().await;
    Json(StatusResponse {
        reserved_amount: reserved_amount.to_string(),
        recipients_count,
    })
}

async fn health() -> Result<(), Error> {
    Ok(())
}

async fn metrics() -> Result<Response<Body>, Error> {
    let encoder = TextEncoder::new();

    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Other(e.into()))?;

    let response = Response::builder()
        .status(200)
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))?;

    Ok(response)
}

/// # Errors
///
/// Will return `Err` if `config.address` cannot be bound.
pub async fn run(
    app: Arc<App>,
    config: ServerConfig,
    shutdown: Arc<Shutdown>,
) -> anyhow::Result<()> {
    info!("Will listen on {}", config.address);
    let listener = TcpListener::bind(config.address)?;

    bind_from_listener(app, config.serve_timeout, listener, shutdown).await?;

    Ok(())
}

/// # Errors
///
/// Will return `Err` if the provided `listener` address cannot be accessed or
/// if the server fails while serving.
pub async fn bind_from_listener(
    app: Arc<App>,
    serve_timeout: Duration,
    listener: TcpListener,
    shutdown: Arc<Shutdown>,
) -> anyhow::Result<()> {
    let router = Router::new()
        .route("/payments", post(add_payment))
        .route("/sendout", post(trigger_sendout))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(
            serve_timeout,
            custom_middleware::timeout_layer::middleware,
        ))
        .layer(middleware::from_fn(
            custom_middleware::logging_layer::middleware,
        ))
        .with_state(app.clone());

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown.await_shutdown());

    server.await?;

    Ok(())
}
