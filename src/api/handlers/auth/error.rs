//! `AuthError` to HTTP response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{debug, error};
use utoipa::ToSchema;

use super::state::AppState;
use crate::auth::AuthError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    error: AuthError,
    expose: bool,
}

impl ApiError {
    pub(crate) fn new(error: AuthError, state: &AppState) -> Self {
        Self {
            error,
            expose: state.expose_errors(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.error.status()
    }
}

fn error_chain(err: &AuthError) -> String {
    let mut chain = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let detail = status.is_server_error().then(|| error_chain(&self.error));
        if let Some(detail) = &detail {
            error!(status = status.as_u16(), "Request failed: {detail}");
        } else {
            debug!(status = status.as_u16(), "Request rejected: {}", self.error);
        }

        let body = ErrorResponse {
            success: false,
            message: self.error.public_message(),
            detail: detail.filter(|_| self.expose),
        };
        (status, Json(body)).into_response()
    }
}
