use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

use super::auth::AppState;
use crate::GIT_COMMIT_HASH;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    accounts: String,
    sessions: String,
    secrets: String,
}

fn status(result: &crate::store::StoreResult<()>, store: &str) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(err) => {
            error!("Failed to ping {store} store: {err}");
            "error".to_string()
        }
    }
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "All stores are reachable", body = [Health]),
        (status = 503, description = "At least one store is unreachable", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let deps = state.auth().deps();
    let (accounts, sessions, secrets) = tokio::join!(
        deps.accounts.ping(),
        deps.sessions.ping(),
        deps.secrets.ping()
    );
    let is_healthy = accounts.is_ok() && sessions.is_ok() && secrets.is_ok();

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        accounts: status(&accounts, "account"),
        sessions: status(&sessions, "session"),
        secrets: status(&secrets, "secret"),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = health.commit.get(0..7).unwrap_or("");
    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            debug!("X-App header: {:?}", value);
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    if is_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}
