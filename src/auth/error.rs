//! Domain error taxonomy for the auth flows and its HTTP status mapping.

use axum::http::StatusCode;
use thiserror::Error;

use crate::{oauth::ProviderError, sessions::TokenError, store::StoreError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("user already exists")]
    DuplicateAccount,
    /// Deliberately identical for unknown email and wrong password.
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("verification code invalid or expired")]
    OtpInvalidOrExpired,
    #[error("session expired, please login again")]
    SessionExpired,
    #[error("no session found, please login again")]
    NoSession,
    #[error("invalid access token, please login again")]
    InvalidAccessToken,
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("invalid oauth state")]
    InvalidState,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("idempotency-key header is required")]
    IdempotencyKeyRequired,
    #[error("a request with this idempotency-key is already in progress")]
    IdempotencyInProgress,
    #[error("store timed out")]
    StoreTimeout,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::OtpInvalidOrExpired
            | Self::InvalidOrExpiredToken
            | Self::InvalidState
            | Self::IdempotencyKeyRequired => StatusCode::BAD_REQUEST,
            Self::DuplicateAccount | Self::IdempotencyInProgress => StatusCode::CONFLICT,
            Self::InvalidCredentials
            | Self::SessionExpired
            | Self::NoSession
            | Self::InvalidAccessToken => StatusCode::UNAUTHORIZED,
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StoreTimeout => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Provider(_) => "authentication with the provider failed".to_string(),
            Self::StoreTimeout => "service temporarily unavailable".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => Self::StoreTimeout,
            StoreError::Conflict => Self::Internal(anyhow::anyhow!("unexpected unique conflict")),
            StoreError::Backend(err) => Self::Internal(err),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(_: TokenError) -> Self {
        Self::InvalidAccessToken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Provider;

    #[test]
    fn status_mapping() {
        assert_eq!(AuthError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::DuplicateAccount.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::SessionExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::NotFound("user").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AuthError::Provider(ProviderError::new(Provider::X, "boom")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AuthError::from(StoreError::Timeout).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_details_stay_private() {
        let err = AuthError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert_eq!(err.public_message(), "internal server error");
        assert!(err.is_internal());

        let err = AuthError::Provider(ProviderError::new(Provider::Google, "bad audience"));
        assert!(!err.public_message().contains("audience"));
    }

    #[test]
    fn token_errors_map_to_invalid_access_token() {
        assert!(matches!(
            AuthError::from(TokenError::Invalid),
            AuthError::InvalidAccessToken
        ));
    }
}
