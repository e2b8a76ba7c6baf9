//! Auth endpoints.
//!
//! Handlers translate HTTP (cookies, headers, JSON bodies) into calls on the
//! [`AuthService`](crate::auth::AuthService) and map its errors back through
//! [`ApiError`]. Credentials travel as `HttpOnly` cookies.

pub(crate) mod cookies;
pub mod error;
pub mod local;
pub mod oauth;
pub mod principal;
pub mod state;
pub mod types;

pub use error::ApiError;
pub use state::AppState;
