use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("unknown plan '{0}'")]
    UnknownPlan(String),
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("tool '{tool}' is not supported in {mode} mode; enable LENSLAB_ALLOW_FALLBACK to process it locally")]
    UnsupportedToolForMode { tool: &'static str, mode: &'static str },
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("external processing failed after {attempts} attempts: {last_error}")]
    ExternalProcessingFailed { attempts: u32, last_error: String },
    #[error("hosted processing is not configured: missing {0}")]
    HostedConfigMissing(String),
    #[error("hosted processing failed: {0}")]
    HostedInvocationFailed(String),
    #[error("payment gateway error: {0}")]
    PaymentGateway(String),
    #[error("payments not configured")]
    PaymentsNotConfigured,
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Message(format!("{err:#}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::UnknownPlan(_)
            | AppError::UnknownTool(_)
            | AppError::UnsupportedToolForMode { .. }
            | AppError::InvalidImage(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalProcessingFailed { .. }
            | AppError::HostedInvocationFailed(_)
            | AppError::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::PaymentsNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Db(_) | AppError::HostedConfigMissing(_) | AppError::Message(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        tracing::error!(?self);
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
