use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

/// Where an account's identity comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Local,
    Google,
    Facebook,
    X,
}

impl Provider {
    pub const OAUTH: [Self; 3] = [Self::Google, Self::Facebook, Self::X];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Google => "google",
            Self::Facebook => "facebook",
            Self::X => "x",
        }
    }

    #[must_use]
    pub const fn is_oauth(self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "local" => Ok(Self::Local),
            "google" => Ok(Self::Google),
            "facebook" => Ok(Self::Facebook),
            "x" => Ok(Self::X),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Identity record. Credentials and reset state never serialize outward.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub email: Option<String>,
    pub name: String,
    pub provider: Provider,
    pub avatar_url: Option<String>,
    pub last_login: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub external_id: Option<String>,
    #[serde(skip)]
    pub(crate) password_hash: Option<String>,
    #[serde(skip)]
    pub(crate) reset_token_hash: Option<Vec<u8>>,
    #[serde(skip)]
    pub(crate) reset_expires_at: Option<DateTime<Utc>>,
}

impl Account {
    #[must_use]
    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }
}

/// Fields required to materialize an account.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub email: Option<String>,
    pub name: String,
    pub provider: Provider,
    pub external_id: Option<String>,
    pub avatar_url: Option<String>,
    pub password_hash: Option<String>,
    pub last_login: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn provider_round_trips_through_str() -> Result<()> {
        for provider in [Provider::Local, Provider::Google, Provider::Facebook, Provider::X] {
            assert_eq!(provider.as_str().parse::<Provider>()?, provider);
        }
        assert!("github".parse::<Provider>().is_err());
        Ok(())
    }

    #[test]
    fn account_hides_credentials() -> Result<()> {
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            email: Some("a@x.com".to_string()),
            name: "A".to_string(),
            provider: Provider::Local,
            avatar_url: None,
            last_login: now,
            created_at: now,
            external_id: None,
            password_hash: Some("$argon2id$secret".to_string()),
            reset_token_hash: Some(vec![1, 2, 3]),
            reset_expires_at: Some(now),
        };
        let value = serde_json::to_value(&account)?;
        assert_eq!(value["email"], "a@x.com");
        assert_eq!(value["provider"], "local");
        assert!(value.get("lastLogin").is_some());
        assert!(value.get("passwordHash").is_none());
        assert!(value.get("resetTokenHash").is_none());
        assert!(value.get("externalId").is_none());
        Ok(())
    }
}
