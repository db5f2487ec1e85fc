use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures talking to the relay actor or joining it
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("Handshake is missing a group token")]
    MissingToken,

    #[error("Relay is not running")]
    Unavailable,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Group not found")]
    GroupNotFound,

    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] regex::Error),

    #[error("Host statistics unavailable: {0}")]
    Stats(String),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::GroupNotFound => {
                return (StatusCode::NOT_FOUND, Json(json!({}))).into_response()
            }
            AppError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
            AppError::Relay(RelayError::MissingToken) => StatusCode::BAD_REQUEST,
            AppError::Stats(_) | AppError::Relay(RelayError::Unavailable) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}
