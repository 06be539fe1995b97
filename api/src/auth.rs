//! Session authentication.
//!
//! Sessions live in Redis as `session:<token>` JSON blobs with a TTL; the
//! token arrives as a bearer token. Admin access is a session whose team is
//! the configured admin team.

use anyhow::{Context, anyhow};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Response;
use instancer_common::response;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::server::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub team_id: String,
}

/// An authenticated team session.
#[derive(Debug, Clone)]
pub struct Session {
    pub team_id: String,
}

impl FromRequestParts<AppState> for Session {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Response> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| response::unauthorized(anyhow!("missing session token")))?;

        let data = lookup_session(&state.inst.redis, token)
            .await
            .map_err(response::internal_server_error)?
            .ok_or_else(|| response::unauthorized(anyhow!("invalid or expired session")))?;

        Ok(Session {
            team_id: data.team_id,
        })
    }
}

/// A session belonging to the admin team.
#[derive(Debug, Clone)]
pub struct AdminSession(pub Session);

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Response> {
        let session = Session::from_request_parts(parts, state).await?;
        let admin = state
            .admin_team_id
            .ok_or_else(|| response::forbidden(anyhow!("no admin team is configured")))?;
        if session.team_id != admin.to_string() {
            return Err(response::forbidden(anyhow!(
                "session does not belong to the admin team"
            )));
        }
        Ok(AdminSession(session))
    }
}

async fn lookup_session(
    redis: &deadpool_redis::Pool,
    token: &str,
) -> anyhow::Result<Option<SessionData>> {
    let mut conn = redis
        .get()
        .await
        .context("failed to get redis connection")?;
    let raw: Option<String> = conn.get(format!("session:{token}")).await?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Writes a fresh session for a team and returns its token.
pub async fn mint_session(
    redis: &deadpool_redis::Pool,
    team_id: &str,
    session_length: i64,
) -> anyhow::Result<String> {
    let token = hex::encode(rand::random::<[u8; 16]>());
    let data = serde_json::to_string(&SessionData {
        team_id: team_id.to_string(),
    })?;
    let mut conn = redis
        .get()
        .await
        .context("failed to get redis connection")?;
    conn.set_ex::<_, _, ()>(format!("session:{token}"), data, session_length.max(1) as u64)
        .await?;
    Ok(token)
}
