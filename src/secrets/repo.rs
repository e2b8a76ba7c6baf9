//! Postgres-backed secret store (`one_time_secrets` table).

use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row};
use std::time::Duration;
use tracing::{info_span, instrument, Instrument};

use super::{ttl_seconds, SecretStore};
use crate::store::StoreResult;

#[derive(Clone, Debug)]
pub struct PgSecretStore {
    pool: PgPool,
}

impl PgSecretStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let query = r"
            INSERT INTO one_time_secrets (key, value, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(ttl_seconds(ttl))
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        // An expired row counts as absent and is replaced in the same statement.
        let query = r"
            INSERT INTO one_time_secrets (key, value, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at
            WHERE one_time_secrets.expires_at <= NOW()
            RETURNING key
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(ttl_seconds(ttl))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let query = r"
            SELECT value
            FROM one_time_secrets
            WHERE key = $1
              AND expires_at > NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.map(|row| row.try_get("value")).transpose()?)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> StoreResult<()> {
        let query = "DELETE FROM one_time_secrets WHERE key = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        // Expired rows are removed too but never returned.
        let query = r"
            DELETE FROM one_time_secrets
            WHERE key = $1
            RETURNING value, expires_at > NOW() AS live
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let live: bool = row.try_get("live")?;
        if !live {
            return Ok(None);
        }
        Ok(Some(row.try_get("value")?))
    }
}
