//! Public team routes.
//!
//! Every route except the health check requires a session. Challenges are
//! fetched bound to the session's team, so per-team challenges resolve to
//! that team's namespace throughout.

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
};
use instancer_common::response;
use instancer_engine::challenge::Challenge;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::Session;
use crate::models::{ChallengeInfo, ChallengeListEntry, DeploymentStatusJson};

use super::{AppState, engine_error};

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/challenges", get(list_challenges))
        .route("/api/v1/challenge/{chall_id}", get(get_challenge))
        .route(
            "/api/v1/challenge/{chall_id}/deploy",
            axum::routing::post(deploy_challenge),
        )
        .route(
            "/api/v1/challenge/{chall_id}/deployment",
            get(get_deployment).delete(terminate_deployment),
        )
        .layer(axum::middleware::from_fn(
            instancer_common::access_log::public,
        ))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    "OK"
}

async fn fetch_challenge(
    state: &AppState,
    chall_id: &str,
    team_id: &str,
) -> Result<Challenge, Response> {
    Challenge::fetch(&state.inst, chall_id, team_id)
        .await
        .map_err(engine_error)?
        .ok_or_else(|| response::not_found(anyhow!("invalid challenge ID")))
}

/// Every challenge with its tags and, when deployed, its instance status.
async fn list_challenges(
    State(state): State<AppState>,
    session: Session,
) -> Result<impl IntoResponse, Response> {
    let challenges = Challenge::fetchall(&state.inst, &session.team_id)
        .await
        .map_err(engine_error)?;

    let mut out = Vec::with_capacity(challenges.len());
    for (chall, tags) in challenges {
        let deployment = chall
            .deployment_status(&state.inst)
            .await
            .map_err(engine_error)?
            .map(|status| DeploymentStatusJson::new(status, &state.challenge_host));
        out.push(ChallengeListEntry {
            challenge_info: ChallengeInfo::new(&chall, tags),
            deployment,
        });
    }
    Ok(Json(out))
}

async fn get_challenge(
    State(state): State<AppState>,
    session: Session,
    Path(chall_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    let chall = fetch_challenge(&state, &chall_id, &session.team_id).await?;
    let tags = chall.tags(&state.inst).await.map_err(engine_error)?;
    Ok(Json(ChallengeInfo::new(&chall, tags)))
}

/// Starts or renews the team's deployment and returns its status.
async fn deploy_challenge(
    State(state): State<AppState>,
    session: Session,
    Path(chall_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    let chall = fetch_challenge(&state, &chall_id, &session.team_id).await?;
    chall.start(&state.inst).await.map_err(engine_error)?;
    let deployment = chall
        .deployment_status(&state.inst)
        .await
        .map_err(engine_error)?
        .map(|status| DeploymentStatusJson::new(status, &state.challenge_host));
    Ok(Json(serde_json::json!({ "deployment": deployment })))
}

async fn get_deployment(
    State(state): State<AppState>,
    session: Session,
    Path(chall_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    let chall = fetch_challenge(&state, &chall_id, &session.team_id).await?;
    let deployment = chall
        .deployment_status(&state.inst)
        .await
        .map_err(engine_error)?
        .map(|status| DeploymentStatusJson::new(status, &state.challenge_host));
    Ok(Json(serde_json::json!({ "deployment": deployment })))
}

/// Terminates the team's deployment. Shared deployments are admin-only.
async fn terminate_deployment(
    State(state): State<AppState>,
    session: Session,
    Path(chall_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    let chall = fetch_challenge(&state, &chall_id, &session.team_id).await?;
    if chall.is_shared() {
        return Err(response::method_not_allowed(anyhow!(
            "you do not have permission to terminate a shared challenge deployment"
        )));
    }
    chall.stop(&state.inst).await.map_err(engine_error)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
