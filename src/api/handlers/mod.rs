//! HTTP handlers for authgate.

pub mod auth;
pub mod health;
pub mod root;
