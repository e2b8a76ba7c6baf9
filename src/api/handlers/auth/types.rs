//! Request and response bodies for the auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::accounts::Account;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyEmailRequest {
    pub otp: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

/// Body for both reset-password and logout-other-sessions.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordRequest {
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub(crate) fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserData {
    pub user: Account,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: UserData,
}

impl AuthResponse {
    pub(crate) fn new(message: Option<&str>, user: Account) -> Self {
        Self {
            success: true,
            message: message.map(str::to_string),
            data: UserData { user },
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckAuthResponse {
    pub success: bool,
    pub user: Account,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutOthersResponse {
    pub success: bool,
    pub message: String,
    pub revoked: u64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denies consent.
    pub error: Option<String>,
}
