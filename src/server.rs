//! HTTP boundary for scan control.
//!
//! A small axum router over the [`ScanSupervisor`]: start and cancel scans,
//! read the position accumulators, and pulse the sprayer output. Every
//! endpoint is a GET so it can be driven from a browser address bar in the
//! field; mutating state over GET is a deliberate concession to that
//! workflow.
//!
//! Failures map to status codes through the error taxonomy: bad parameters
//! are 400, precondition failures (an existing session directory) are 409,
//! device connectivity problems are 502, anything else is 500.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{AppResult, RoverError};
use crate::hardware::sprayer::{Sprayer, DEFAULT_PULSE_SECS};
use crate::scan::{ScanParams, ScanStatus, ScanSupervisor};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<ScanSupervisor>,
    pub sprayer: Arc<dyn Sprayer>,
}

/// An application error carried out through an axum response.
struct ApiError(RoverError);

impl From<RoverError> for ApiError {
    fn from(err: RoverError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RoverError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            RoverError::SessionExists(_) => StatusCode::CONFLICT,
            RoverError::Connect { .. }
            | RoverError::Io(_)
            | RoverError::InstrumentUnavailable => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": {
                "message": self.0.to_string(),
                "status": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SprayerParams {
    /// Pulse length in seconds.
    time: Option<f64>,
}

#[derive(Debug, Serialize)]
struct SprayerResponse {
    success: bool,
}

async fn status(State(state): State<AppState>) -> Json<ScanStatus> {
    Json(state.supervisor.status().await)
}

async fn start(
    State(state): State<AppState>,
    Query(params): Query<ScanParams>,
) -> Result<Json<ScanStatus>, ApiError> {
    let id = state.supervisor.start(params).await?;
    info!(scan_id = %id, "scan started over http");
    Ok(Json(state.supervisor.status().await))
}

async fn cancel(State(state): State<AppState>) -> Result<Json<ScanStatus>, ApiError> {
    state.supervisor.cancel().await?;
    Ok(Json(state.supervisor.status().await))
}

async fn sprayer(
    State(state): State<AppState>,
    Query(params): Query<SprayerParams>,
) -> Result<Json<SprayerResponse>, ApiError> {
    let secs = params.time.unwrap_or(DEFAULT_PULSE_SECS);
    // try_from rejects negatives, NaN, and values past Duration's range
    let pulse = Duration::try_from_secs_f64(secs).map_err(|_| {
        RoverError::InvalidParameter(format!(
            "sprayer time must be a representable non-negative number of seconds, got {}",
            secs
        ))
    })?;
    state.sprayer.pulse(pulse).await?;
    Ok(Json(SprayerResponse { success: true }))
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/start", get(start))
        .route("/cancel", get(cancel))
        .route("/sprayer", get(sprayer))
        .with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(bind: SocketAddr, state: AppState, shutdown: CancellationToken) -> AppResult<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "control server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
