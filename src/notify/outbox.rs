//! Postgres-backed producer side of the email outbox.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info_span, instrument, Instrument};

use super::{EmailMessage, Notifier};

#[derive(Clone, Debug)]
pub struct PgOutbox {
    pool: PgPool,
}

impl PgOutbox {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for PgOutbox {
    #[instrument(skip_all, fields(template = %message.template))]
    async fn enqueue(&self, message: EmailMessage) -> Result<()> {
        // Rows start as `pending` and due now; the worker picks them up on its next poll.
        let query = r"
            INSERT INTO email_outbox (to_email, template, params)
            VALUES ($1, $2, $3::jsonb)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&message.to_email)
            .bind(message.template.as_str())
            .bind(message.params.to_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert email outbox row")?;
        Ok(())
    }
}
