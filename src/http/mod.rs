//! Batch HTTP API (C8): upload-driven transcription, text-to-speech, and a
//! static model catalog, served over `axum` the way the teacher serves its
//! own REST surface in `aes67-rs-vsc-management-agent::run_rest_api`.

mod models;
mod speech;
mod transcription;

use crate::{
    config::{ApiConfig, SttConfig},
    enrichment::EnrichmentApi,
    error::{ApiError, ApiResult},
    persistence::PersistenceApi,
};
use axum::{
    Router,
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_server::Handle;
use std::time::Duration;
use tokio::select;
use tokio_graceful_shutdown::SubsystemHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub api: ApiConfig,
    pub stt: SttConfig,
    pub persistence: PersistenceApi,
    pub enrichment: EnrichmentApi,
    pub http: reqwest::Client,
}

fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/get_transcription", post(transcription::get_transcription))
        .route("/api/get_speech", post(speech::get_speech))
        .route("/api/get_models", get(models::get_models))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_token))
        .layer(TraceLayer::new_for_http());

    protected.with_state(state)
}

/// Bearer/`X-Api-Token` check against `API_TOKEN`; a no-op when it is unset.
async fn require_api_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api.api_token.as_ref() else {
        return next.run(request).await;
    };
    let expected = expected.expose();

    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let alt = request
        .headers()
        .get("X-Api-Token")
        .and_then(|v| v.to_str().ok());

    if bearer == Some(expected) || alt == Some(expected) {
        return next.run(request).await;
    }

    ApiError::Unauthorized.into_response()
}

/// Binds `API_BIND_ADDRESS:API_PORT` and spawns the serve loop as its own
/// graceful-shutdown subsystem, returning as soon as the listener is bound.
/// Bind failure is the only thing that tears this subsystem down; the serve
/// future itself races `subsys.on_shutdown_requested()` exactly as the
/// teacher's `run_rest_api` races its `Handle`.
pub async fn start(
    subsys: &SubsystemHandle,
    config: ApiConfig,
    stt: SttConfig,
    persistence: PersistenceApi,
    enrichment: EnrichmentApi,
) -> ApiResult<()> {
    let addr = std::net::SocketAddr::new(config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to bind batch HTTP API on {addr}: {e}")))?;
    info!(%addr, "batch HTTP API listening");

    let state = AppState {
        api: config,
        stt,
        persistence,
        enrichment,
        http: reqwest::Client::new(),
    };
    let app = router(state);
    let std_listener = listener
        .into_std()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    subsys.start(tokio_graceful_shutdown::SubsystemBuilder::new(
        "batch-http-api",
        move |s: &mut SubsystemHandle| async move {
            let handle = Handle::new();
            let server = axum_server::from_tcp(std_listener);
            let mut serve = Box::pin(server.handle(handle.clone()).serve(app.into_make_service()));

            select! {
                res = &mut serve => {
                    if let Err(e) = res {
                        error!(error = %e, "batch HTTP API server error");
                    }
                }
                _ = s.on_shutdown_requested() => {
                    handle.graceful_shutdown(Some(Duration::from_secs(5)));
                    serve.await.ok();
                }
            }

            info!("batch HTTP API stopped");
            Ok::<(), std::convert::Infallible>(())
        },
    ));

    Ok(())
}

pub(crate) fn validation_error(detail: impl Into<String>) -> ApiError {
    ApiError::Validation(detail.into())
}

/// Maps a failed upstream call onto the exact status classes §7 specifies:
/// provider HTTP status passed through verbatim, timeouts to 504, transport
/// failures to 502.
pub(crate) fn map_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::UpstreamTimeout
    } else if let Some(status) = e.status() {
        ApiError::UpstreamStatus {
            status: StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            body: e.to_string(),
        }
    } else if e.is_connect() {
        ApiError::UpstreamConnect(e.to_string())
    } else {
        ApiError::Internal(e.to_string())
    }
}
