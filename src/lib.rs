//! # Authgate (Authentication & Session Service)
//!
//! `authgate` authenticates users with a local email/password flow (OTP-gated
//! email verification, password reset) and with third-party `OAuth2` providers
//! (Google, Facebook, X). Every login path ends in the same credential pair:
//!
//! - **Access token:** a short-lived signed JWT binding the account id. It is
//!   never stored; validity is the signature plus the embedded expiry.
//! - **Session (refresh credential):** a long-lived opaque random identifier
//!   backed by a server-side record with a fixed TTL. Access tokens are renewed
//!   only while a live session exists, so deleting sessions is how access is revoked.
//!
//! ## Idempotency
//!
//! Signup, email verification and password reset require an `idempotency-key`
//! header. The first successful outcome is cached for two minutes and replayed
//! verbatim for retries carrying the same key.
//!
//! ## Side effects
//!
//! Emails are written to a Postgres outbox and delivered by a polling worker.
//! Enqueue failures are logged and never fail the request that caused them.

pub mod accounts;
pub mod api;
pub mod auth;
pub mod cli;
pub mod notify;
pub mod oauth;
pub mod secrets;
pub mod sessions;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
