//! Email notifications backed by a durable outbox.
//!
//! Request handlers call [`Notifier::enqueue`], which writes a `pending` row to
//! `email_outbox` ([`PgOutbox`]) and returns. Delivery happens on the outbox
//! worker (see [`worker`]), so queued mail survives restarts. A message may be
//! delivered more than once when a sender reports failure after partially
//! succeeding, so templates are written to be harmless on duplicate delivery.

mod memory;
mod outbox;
pub mod worker;

pub use memory::MemoryOutbox;
pub use outbox::PgOutbox;
pub use worker::{spawn_outbox_worker, EmailSender, EmailWorkerConfig, LogEmailSender};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    VerifyEmail,
    Welcome,
    PasswordReset,
    PasswordResetSuccess,
}

impl EmailTemplate {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify_email",
            Self::Welcome => "welcome",
            Self::PasswordReset => "password_reset",
            Self::PasswordResetSuccess => "password_reset_success",
        }
    }

    #[must_use]
    pub const fn subject(self) -> &'static str {
        match self {
            Self::VerifyEmail => "Verify your email",
            Self::Welcome => "Welcome",
            Self::PasswordReset => "Reset your password",
            Self::PasswordResetSuccess => "Your password was reset",
        }
    }
}

impl FromStr for EmailTemplate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            Self::VerifyEmail,
            Self::Welcome,
            Self::PasswordReset,
            Self::PasswordResetSuccess,
        ]
        .into_iter()
        .find(|template| template.as_str() == s)
        .ok_or_else(|| anyhow!("unknown email template: {s}"))
    }
}

impl fmt::Display for EmailTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: EmailTemplate,
    pub params: serde_json::Value,
}

impl EmailMessage {
    #[must_use]
    pub fn new(to_email: impl Into<String>, template: EmailTemplate, params: serde_json::Value) -> Self {
        Self {
            to_email: to_email.into(),
            template,
            params,
        }
    }
}

/// Fire-and-forget notification dispatch.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Hand a message to the delivery pipeline without waiting for delivery.
    ///
    /// # Errors
    /// Returns an error only if the message could not be queued at all.
    async fn enqueue(&self, message: EmailMessage) -> Result<()>;
}
