//! Email outbox worker.
//!
//! The worker polls `email_outbox` on a fixed cadence, locks a batch of due
//! `pending` rows with `FOR UPDATE SKIP LOCKED` and hands each to an
//! [`EmailSender`]. Several workers can share the table without double
//! sending. A failed row goes back to `pending` with an exponential backoff
//! and jitter until `max_attempts` is reached, then it is marked `failed`.
use anyhow::{Context, Result};
use rand::Rng;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{EmailMessage, EmailTemplate};

/// Email delivery abstraction used by the worker.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Development sender that logs the message instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            subject = message.template.subject(),
            params = %message.params,
            "email send stub"
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl EmailWorkerConfig {
    /// Default worker config: 5s poll interval, 10 rows per batch, 5 max
    /// attempts and 1s->60s exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    #[must_use]
    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_millis(1)
        } else {
            self.backoff_base
        };
        Self {
            poll_interval,
            batch_size: self.batch_size.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff_base,
            backoff_max: self.backoff_max.max(backoff_base),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What happens to an outbox row after one delivery attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    Retry { error: String, delay: Duration },
    Failed { error: String },
}

/// Decide the row's next state given how many attempts came before this one.
pub(crate) fn next_delivery(
    previous_attempts: u32,
    result: Result<()>,
    config: &EmailWorkerConfig,
) -> Delivery {
    let attempt = previous_attempts.saturating_add(1);
    match result {
        Ok(()) => Delivery::Sent,
        Err(err) if attempt >= config.max_attempts() => Delivery::Failed {
            error: err.to_string(),
        },
        Err(err) => Delivery::Retry {
            error: err.to_string(),
            delay: backoff_delay(attempt, config.backoff_base(), config.backoff_max()),
        },
    }
}

/// Spawn the background task that polls and drains the email outbox.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        loop {
            match process_outbox_batch(&pool, sender.as_ref(), &config).await {
                Ok(0) => {}
                Ok(processed) => info!(processed, "email outbox batch done"),
                Err(err) => error!("email outbox batch failed: {err:#}"),
            }
            sleep(config.poll_interval()).await;
        }
    })
}

async fn process_outbox_batch(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &EmailWorkerConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start email outbox transaction")?;

    let query = r"
        SELECT id, to_email, template, params::text AS params, attempts
        FROM email_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load email outbox batch")?;

    let processed = rows.len();
    for row in rows {
        let id: Uuid = row.try_get("id")?;
        let attempts = u32::try_from(row.try_get::<i32, _>("attempts")?).unwrap_or(0);
        let delivery = match decode_row(&row) {
            Ok(message) => {
                let span = info_span!("email.deliver", template = %message.template);
                let result = span.in_scope(|| sender.send(&message));
                next_delivery(attempts, result, config)
            }
            // An undecodable row never becomes sendable.
            Err(err) => Delivery::Failed {
                error: err.to_string(),
            },
        };
        update_outbox_status(&mut tx, id, attempts.saturating_add(1), delivery).await?;
    }

    // Commit even an empty batch to release the snapshot.
    tx.commit()
        .await
        .context("failed to commit email outbox batch")?;
    Ok(processed)
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<EmailMessage> {
    let template: String = row.try_get("template")?;
    let params: String = row.try_get("params")?;
    Ok(EmailMessage::new(
        row.try_get::<String, _>("to_email")?,
        template.parse::<EmailTemplate>()?,
        serde_json::from_str(&params).context("malformed outbox params")?,
    ))
}

async fn update_outbox_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    attempts: u32,
    delivery: Delivery,
) -> Result<()> {
    let query = match &delivery {
        Delivery::Sent => {
            r"
                UPDATE email_outbox
                SET status = 'sent',
                    attempts = $2,
                    last_error = NULL,
                    sent_at = NOW()
                WHERE id = $1
            "
        }
        Delivery::Retry { .. } => {
            r"
                UPDATE email_outbox
                SET status = 'pending',
                    attempts = $2,
                    last_error = $3,
                    next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
                WHERE id = $1
            "
        }
        Delivery::Failed { .. } => {
            r"
                UPDATE email_outbox
                SET status = 'failed',
                    attempts = $2,
                    last_error = $3
                WHERE id = $1
            "
        }
    };
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    let update = sqlx::query(query)
        .bind(id)
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX));
    let update = match delivery {
        Delivery::Sent => update,
        Delivery::Retry { error, delay } => {
            warn!(%id, attempts, "email delivery failed, retrying: {error}");
            update
                .bind(error)
                .bind(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
        }
        Delivery::Failed { error } => {
            error!(%id, attempts, "email delivery failed permanently: {error}");
            update.bind(error)
        }
    };
    update
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update email outbox row")?;
    Ok(())
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
