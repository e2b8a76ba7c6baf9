//! Local account endpoints: signup, verification, login, logout and password management.

use axum::{
    extract::{Extension, Path},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;

use super::{
    cookies::{clear_cookie, client_meta, login_cookies, read_cookie, ACCESS_COOKIE, SESSION_COOKIE},
    error::{ApiError, ErrorResponse},
    principal::require_auth,
    state::AppState,
    types::{
        AuthResponse, CheckAuthResponse, ForgotPasswordRequest, LoginRequest,
        LogoutOthersResponse, MessageResponse, PasswordRequest, SignupRequest,
        VerifyEmailRequest,
    },
};
use crate::auth::{AuthError, Guarded, Outcome, SignupInput};

pub(crate) const IDEMPOTENCY_HEADER: &str = "idempotency-key";

const SIGNUP_MESSAGE: &str = "Verification code sent to email";
const VERIFIED_MESSAGE: &str = "Email verified successfully";
const LOGIN_MESSAGE: &str = "Logged in successfully";
const LOGOUT_MESSAGE: &str = "Logged out successfully";
const FORGOT_MESSAGE: &str = "Password reset link sent to your email";
const RESET_MESSAGE: &str = "Password reset successful";
const LOGOUT_OTHERS_MESSAGE: &str = "Other sessions logged out";

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn missing_payload() -> AuthError {
    AuthError::validation("missing payload")
}

fn json_outcome<B: Serialize>(status: StatusCode, body: &B) -> Result<Outcome, AuthError> {
    let body = serde_json::to_string(body).map_err(anyhow::Error::from)?;
    Ok(Outcome {
        status: status.as_u16(),
        body,
    })
}

/// Render a stored outcome; replays return exactly the recorded bytes.
fn outcome_response(outcome: Outcome, headers: HeaderMap) -> Response {
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        headers,
        [(CONTENT_TYPE, "application/json")],
        outcome.body,
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignupRequest,
    params(
        ("idempotency-key" = String, Header, description = "Client generated key deduplicating retries")
    ),
    responses(
        (status = 200, description = "Verification code sent", body = MessageResponse),
        (status = 400, description = "Invalid input or missing idempotency key", body = ErrorResponse),
        (status = 409, description = "Email already registered or request in progress", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<SignupRequest>>,
) -> Result<Response, ApiError> {
    let auth = state.auth();
    let request = payload.map(|Json(request)| request);
    let guarded = auth
        .idempotency()
        .run("signup", idempotency_key(&headers).as_deref(), move || async move {
            let request = request.ok_or_else(missing_payload)?;
            auth.signup(&SignupInput {
                email: request.email,
                password: request.password,
                name: request.name,
            })
            .await?;
            Ok((
                json_outcome(StatusCode::OK, &MessageResponse::ok(SIGNUP_MESSAGE))?,
                (),
            ))
        })
        .await
        .map_err(|err| ApiError::new(err, &state))?;

    let (Guarded::Replayed(outcome) | Guarded::Fresh(outcome, ())) = guarded;
    Ok(outcome_response(outcome, HeaderMap::new()))
}

#[utoipa::path(
    post,
    path = "/api/auth/verify-email",
    request_body = VerifyEmailRequest,
    params(
        ("idempotency-key" = String, Header, description = "Client generated key deduplicating retries")
    ),
    responses(
        (status = 200, description = "Account created and logged in", body = AuthResponse),
        (status = 400, description = "Invalid or expired code", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> Result<Response, ApiError> {
    let auth = state.auth();
    let client = client_meta(&headers);
    let request = payload.map(|Json(request)| request);
    let guarded = auth
        .idempotency()
        .run("verify-email", idempotency_key(&headers).as_deref(), move || async move {
            let request = request.ok_or_else(missing_payload)?;
            let login = auth
                .verify_email(request.otp.as_deref(), request.email.as_deref(), &client)
                .await?;
            let body = AuthResponse::new(Some(VERIFIED_MESSAGE), login.account.clone());
            Ok((json_outcome(StatusCode::OK, &body)?, login))
        })
        .await
        .map_err(|err| ApiError::new(err, &state))?;

    Ok(match guarded {
        Guarded::Fresh(outcome, login) => {
            outcome_response(outcome, login_cookies(auth.config(), &login))
        }
        // Credentials were handed out by the first response only.
        Guarded::Replayed(outcome) => outcome_response(outcome, HeaderMap::new()),
    })
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, ApiError> {
    let fail = |err| ApiError::new(err, &state);
    let Some(Json(request)) = payload else {
        return Err(fail(missing_payload()));
    };
    let login = state
        .auth()
        .login(
            request.email.as_deref(),
            request.password.as_deref(),
            &client_meta(&headers),
        )
        .await
        .map_err(fail)?;
    let cookies = login_cookies(state.auth().config(), &login);
    Ok((
        StatusCode::OK,
        cookies,
        Json(AuthResponse::new(Some(LOGIN_MESSAGE), login.account)),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let session = read_cookie(&headers, SESSION_COOKIE);
    state
        .auth()
        .logout(session.as_deref())
        .await
        .map_err(|err| ApiError::new(err, &state))?;

    // Always clear both cookies, even when the session was already gone.
    let config = state.auth().config();
    let mut cookies = HeaderMap::new();
    clear_cookie(&mut cookies, config, ACCESS_COOKIE);
    clear_cookie(&mut cookies, config, SESSION_COOKIE);
    Ok((StatusCode::OK, cookies, Json(MessageResponse::ok(LOGOUT_MESSAGE))).into_response())
}

#[utoipa::path(
    get,
    path = "/api/auth/check-auth",
    responses(
        (status = 200, description = "Session is valid", body = CheckAuthResponse),
        (status = 401, description = "No valid session", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn check_auth(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let account = state
        .auth()
        .check_auth(principal.account.id, principal.session_token.as_deref())
        .await
        .map_err(|err| ApiError::new(err, &state))?;
    Ok((
        StatusCode::OK,
        principal.cookies(&state),
        Json(CheckAuthResponse {
            success: true,
            user: account,
        }),
    )
        .into_response())
}

#[utoipa::path(
    delete,
    path = "/api/auth/sessions/others",
    request_body = PasswordRequest,
    responses(
        (status = 200, description = "Other sessions revoked", body = LogoutOthersResponse),
        (status = 401, description = "Not logged in or wrong password", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn logout_other_sessions(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<PasswordRequest>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let password = payload.and_then(|Json(request)| request.password);
    let revoked = state
        .auth()
        .logout_other_sessions(
            &principal.account,
            password.as_deref(),
            principal.session_token.as_deref(),
        )
        .await
        .map_err(|err| ApiError::new(err, &state))?;
    Ok((
        StatusCode::OK,
        principal.cookies(&state),
        Json(LogoutOthersResponse {
            success: true,
            message: LOGOUT_OTHERS_MESSAGE.to_string(),
            revoked,
        }),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent", body = MessageResponse),
        (status = 404, description = "No local account for this email", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<Response, ApiError> {
    let email = payload.and_then(|Json(request)| request.email);
    state
        .auth()
        .forgot_password(email.as_deref())
        .await
        .map_err(|err| ApiError::new(err, &state))?;
    Ok((StatusCode::OK, Json(MessageResponse::ok(FORGOT_MESSAGE))).into_response())
}

#[utoipa::path(
    post,
    path = "/api/auth/reset-password/{token}",
    request_body = PasswordRequest,
    params(
        ("token" = String, Path, description = "Reset token from the emailed link"),
        ("idempotency-key" = String, Header, description = "Client generated key deduplicating retries")
    ),
    responses(
        (status = 200, description = "Password replaced", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    Path(token): Path<String>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<PasswordRequest>>,
) -> Result<Response, ApiError> {
    let auth = state.auth();
    let password = payload.and_then(|Json(request)| request.password);
    let guarded = auth
        .idempotency()
        .run("reset-password", idempotency_key(&headers).as_deref(), move || async move {
            auth.reset_password(&token, password.as_deref()).await?;
            Ok((
                json_outcome(StatusCode::OK, &MessageResponse::ok(RESET_MESSAGE))?,
                (),
            ))
        })
        .await
        .map_err(|err| ApiError::new(err, &state))?;

    let (Guarded::Replayed(outcome) | Guarded::Fresh(outcome, ())) = guarded;
    Ok(outcome_response(outcome, HeaderMap::new()))
}
