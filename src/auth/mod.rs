//! Authentication core: the auth flows, identity reconciliation and the
//! idempotency guard, plus the error taxonomy they share.

mod config;
mod error;
pub mod idempotency;
pub mod password;
mod reconcile;
mod service;

pub use config::AuthConfig;
pub use error::AuthError;
pub use idempotency::{Guarded, IdempotencyGuard, Outcome};
pub use reconcile::Reconciler;
pub use service::{
    AuthDeps, AuthService, Authenticated, Login, OAuthRedirect, SignupInput,
};

#[cfg(test)]
mod tests;
