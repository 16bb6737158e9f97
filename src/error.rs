use axum::{http::StatusCode, response::IntoResponse};
use miette::Diagnostic;
use std::io;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error(transparent)]
    Clap(#[from] clap::error::Error),
}

#[derive(Error, Debug, Diagnostic)]
pub enum RtpError {
    #[error("failed to bind RTP socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug, Diagnostic)]
pub enum AriError {
    #[error("ARI request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ARI returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to parse ARI event: {0}")]
    EventParse(#[from] serde_json::Error),
    #[error("invalid ARI URL: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug, Diagnostic)]
pub enum BusError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("payload is missing required field {0} for this topic")]
    SchemaViolation(&'static str),
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug, Diagnostic)]
pub enum SttError {
    #[error("provider WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to (de)serialize provider payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("provider connection refused: {0}")]
    Connect(String),
}

#[derive(Error, Debug, Diagnostic)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("invalid uniqueid: {0}")]
    InvalidUniqueId(String),
    #[error("embedding request failed: {0}")]
    Embedding(#[from] reqwest::Error),
}

#[derive(Error, Debug, Diagnostic)]
pub enum EnrichmentError {
    #[error("failed to spawn enrichment worker: {0}")]
    Spawn(#[from] io::Error),
    #[error("enrichment worker exited with status {0}")]
    NonZeroExit(i32),
    #[error("enrichment worker produced invalid output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("enrichment worker timed out")]
    Timeout,
}

/// Errors surfaced directly to batch API callers; each variant already
/// knows the status code it maps to per the upstream-error rules.
#[derive(Error, Debug, Diagnostic)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("upstream provider returned {status}: {body}")]
    UpstreamStatus { status: StatusCode, body: String },
    #[error("upstream provider request timed out")]
    UpstreamTimeout,
    #[error("could not reach upstream provider: {0}")]
    UpstreamConnect(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::UpstreamStatus { status, .. } => *status,
            ApiError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::UpstreamConnect(_) => StatusCode::BAD_GATEWAY,
            ApiError::Persistence(_) | ApiError::Enrichment(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::UNAUTHORIZED {
            return (status, [("WWW-Authenticate", "Bearer")], self.to_string()).into_response();
        }
        (status, self.to_string()).into_response()
    }
}

/// Boxes an error, mirroring the boxed-variant pattern used throughout the
/// teacher's error layering to keep enum variants small.
pub trait ToBoxed {
    fn boxed(self) -> Box<Self>;
}

impl<T: std::error::Error> ToBoxed for T {
    fn boxed(self) -> Box<Self> {
        Box::new(self)
    }
}

pub trait ToBoxedResult<T, E: ToBoxed> {
    fn boxed(self) -> Result<T, Box<E>>;
}

impl<T, E: ToBoxed + std::error::Error> ToBoxedResult<T, E> for Result<T, E> {
    fn boxed(self) -> Result<T, Box<E>> {
        match self {
            Ok(it) => Ok(it),
            Err(err) => Err(err.boxed()),
        }
    }
}

#[derive(Error, Debug, Diagnostic)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] Box<ConfigError>),
    #[error("RTP server error: {0}")]
    Rtp(#[from] Box<RtpError>),
    #[error("ARI client error: {0}")]
    Ari(#[from] Box<AriError>),
    #[error("message bus error: {0}")]
    Bus(#[from] Box<BusError>),
    #[error("persistence error: {0}")]
    Persistence(#[from] Box<PersistenceError>),
    #[error("batch HTTP API error: {0}")]
    Api(#[from] Box<ApiError>),
    #[error("reply channel dropped")]
    ChannelClosed(#[from] oneshot::error::RecvError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type RtpResult<T> = Result<T, RtpError>;
pub type AriResult<T> = Result<T, AriError>;
pub type BusResult<T> = Result<T, BusError>;
pub type SttResult<T> = Result<T, SttError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;
pub type EnrichmentResult<T> = Result<T, EnrichmentError>;
pub type ApiResult<T> = Result<T, ApiError>;
pub type AppResult<T> = Result<T, AppError>;
