//! Postgres-backed account store.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Connection, PgPool, Row};
use tracing::{info_span, instrument, Instrument};
use uuid::Uuid;

use super::{Account, AccountStore, NewAccount, Provider};
use crate::store::{StoreError, StoreResult};

const ACCOUNT_COLUMNS: &str = "id, email, name, provider, external_id, avatar_url, \
     password_hash, last_login, created_at, reset_token_hash, reset_expires_at";

#[derive(Clone, Debug)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(
        &self,
        query: &str,
        operation: &'static str,
        bind: impl FnOnce(
            sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
        ) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> StoreResult<Option<Account>> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = operation,
            db.statement = query
        );
        let row = bind(sqlx::query(query))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    let provider: String = row.try_get("provider").map_err(StoreError::from)?;
    let provider = provider
        .parse::<Provider>()
        .map_err(|err| StoreError::Backend(anyhow!(err)))?;
    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        provider,
        external_id: row.try_get("external_id")?,
        avatar_url: row.try_get("avatar_url")?,
        password_hash: row.try_get("password_hash")?,
        last_login: row.try_get("last_login")?,
        created_at: row.try_get("created_at")?,
        reset_token_hash: row.try_get("reset_token_hash")?,
        reset_expires_at: row.try_get("reset_expires_at")?,
    })
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        self.fetch_optional(&query, "SELECT", |q| q.bind(id)).await
    }

    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
        self.fetch_optional(&query, "SELECT", |q| q.bind(email.to_string()))
            .await
    }

    #[instrument(skip(self))]
    async fn find_by_external(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> StoreResult<Option<Account>> {
        let query = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE provider = $1 AND external_id = $2"
        );
        self.fetch_optional(&query, "SELECT", |q| {
            q.bind(provider.as_str()).bind(external_id.to_string())
        })
        .await
    }

    #[instrument(skip(self, account), fields(provider = %account.provider))]
    async fn insert(&self, account: NewAccount) -> StoreResult<Account> {
        let query = format!(
            r"
            INSERT INTO accounts
                (email, name, provider, external_id, avatar_url, password_hash, last_login)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ACCOUNT_COLUMNS}
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(account.email)
            .bind(account.name)
            .bind(account.provider.as_str())
            .bind(account.external_id)
            .bind(account.avatar_url)
            .bind(account.password_hash)
            .bind(account.last_login)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        account_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let query = "UPDATE accounts SET last_login = $2, updated_at = NOW() WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, token_hash))]
    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let query = r"
            UPDATE accounts
            SET reset_token_hash = $2,
                reset_expires_at = $3,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn consume_reset_token(
        &self,
        token_hash: &[u8],
        password_hash: &str,
    ) -> StoreResult<Option<Account>> {
        // Single statement: the token matches at most once even under concurrent resets.
        let query = format!(
            r"
            UPDATE accounts
            SET password_hash = $2,
                reset_token_hash = NULL,
                reset_expires_at = NULL,
                updated_at = NOW()
            WHERE reset_token_hash = $1
              AND reset_expires_at > NOW()
            RETURNING {ACCOUNT_COLUMNS}
            "
        );
        self.fetch_optional(&query, "UPDATE", |q| {
            q.bind(token_hash.to_vec()).bind(password_hash.to_string())
        })
        .await
    }
}
