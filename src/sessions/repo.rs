//! Postgres-backed session store.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row};
use std::time::Duration;
use tracing::{info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::{generate_session_token, ClientMeta, Session, SessionStore, CREATE_ATTEMPTS};
use crate::store::{hash_secret, is_unique_violation, StoreError, StoreResult};

#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
    ttl: Duration,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    fn ttl_seconds(&self) -> i64 {
        i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    #[instrument(skip(self, client))]
    async fn create(&self, account_id: Uuid, client: &ClientMeta) -> StoreResult<String> {
        // Generate a random token, store only its hash, and return the raw value
        // so the caller can set the refresh cookie.
        let query = r"
            INSERT INTO sessions (account_id, token_hash, user_agent, ip_address, expires_at)
            VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        for _ in 0..CREATE_ATTEMPTS {
            let token = generate_session_token()?;
            let result = sqlx::query(query)
                .bind(account_id)
                .bind(hash_secret(&token))
                .bind(client.user_agent.as_deref())
                .bind(client.ip.as_deref())
                .bind(self.ttl_seconds())
                .execute(&self.pool)
                .instrument(span.clone())
                .await;

            match result {
                Ok(_) => return Ok(token),
                Err(err) if is_unique_violation(&err) => {
                    warn!("session token collision, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StoreError::Backend(anyhow!(
            "failed to generate unique session token"
        )))
    }

    #[instrument(skip_all)]
    async fn find(&self, token: &str) -> StoreResult<Option<Session>> {
        let query = r"
            SELECT account_id, user_agent, ip_address, created_at, expires_at
            FROM sessions
            WHERE token_hash = $1
              AND expires_at > NOW()
            LIMIT 1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(hash_secret(token))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;

        row.map(|row| -> StoreResult<Session> {
            Ok(Session {
                account_id: row.try_get("account_id")?,
                user_agent: row.try_get("user_agent")?,
                ip: row.try_get("ip_address")?,
                created_at: row.try_get("created_at")?,
                expires_at: row.try_get("expires_at")?,
            })
        })
        .transpose()
    }

    #[instrument(skip_all)]
    async fn delete(&self, token: &str) -> StoreResult<()> {
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(hash_secret(token))
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, keep))]
    async fn delete_all_except(&self, account_id: Uuid, keep: Option<&str>) -> StoreResult<u64> {
        // A NULL keep hash matches nothing, so every session of the account goes.
        let query = "DELETE FROM sessions WHERE account_id = $1 AND token_hash IS DISTINCT FROM $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(keep.map(hash_secret))
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}
