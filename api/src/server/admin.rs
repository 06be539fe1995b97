//! Admin challenge CRUD.
//!
//! Uploads are validated here in full -- id shape, lifetime bounds, config
//! schema, and the cross-field rules -- so the engine can assume a
//! conforming config from then on. Updates cannot change `cfg` or
//! `per_team`; those require delete + recreate.

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use instancer_common::response;
use instancer_engine::catalog::{self, ChallengeRecord, Tag};
use instancer_engine::config::{ChallengeConfig, is_dns_label};
use instancer_engine::{Error as EngineError, challenge::Challenge};

use crate::auth::AdminSession;
use crate::models::{CreateChallengeRequest, UpdateChallengeRequest};

use super::{AppState, engine_error};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/challenges", post(create_challenge))
        .route(
            "/challenges/{chall_id}",
            get(get_challenge)
                .put(update_challenge)
                .delete(delete_challenge),
        )
        .layer(axum::middleware::from_fn(
            instancer_common::access_log::admin,
        ))
        .with_state(state)
}

fn collect_tags(categories: &[String], other_tags: &[String]) -> Vec<Tag> {
    categories
        .iter()
        .map(|name| Tag {
            name: name.trim().to_string(),
            is_category: true,
        })
        .chain(other_tags.iter().map(|name| Tag {
            name: name.trim().to_string(),
            is_category: false,
        }))
        .filter(|tag| !tag.name.is_empty())
        .collect()
}

async fn get_challenge(
    State(state): State<AppState>,
    AdminSession(_): AdminSession,
    Path(chall_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    let record = Challenge::fetch_info(&state.inst, &chall_id)
        .await
        .map_err(engine_error)?
        .ok_or_else(|| response::not_found(anyhow!("challenge not found")))?;
    let tags = catalog::fetch_tags(&state.inst, &chall_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(serde_json::json!({
        "challenge": record,
        "tags": tags,
    })))
}

async fn create_challenge(
    State(state): State<AppState>,
    AdminSession(_): AdminSession,
    Json(req): Json<CreateChallengeRequest>,
) -> Result<impl IntoResponse, Response> {
    if !is_dns_label(&req.chall_id) {
        return Err(response::bad_request(anyhow!(
            "challenge id must match [a-z0-9]([-a-z0-9]{{0,61}}[a-z0-9])?"
        )));
    }
    if req.lifetime <= 0 {
        return Err(response::bad_request(anyhow!("lifetime must be positive")));
    }
    if req.boot_time < 0 || req.boot_time >= req.lifetime {
        return Err(response::bad_request(anyhow!(
            "boot_time must be non-negative and less than the challenge lifetime"
        )));
    }

    let cfg: ChallengeConfig = serde_json::from_value(req.cfg.clone())
        .map_err(|e| response::bad_request(anyhow!("invalid config: {e}")))?;
    cfg.validate().map_err(engine_error)?;

    let record = ChallengeRecord {
        id: req.chall_id.clone(),
        per_team: req.per_team,
        cfg: req.cfg,
        lifetime: req.lifetime,
        boot_time: req.boot_time,
        name: req.name,
        description: req.description,
        author: req.author,
    };
    let tags = collect_tags(&req.categories, &req.tags);

    match catalog::create(&state.inst, &record, &tags).await {
        Ok(()) => Ok(Json(serde_json::json!({ "status": "ok" }))),
        Err(EngineError::DuplicateId(_)) if req.replace_existing => {
            catalog::delete(&state.inst, &record.id)
                .await
                .map_err(engine_error)?;
            catalog::create(&state.inst, &record, &tags)
                .await
                .map_err(engine_error)?;
            Ok(Json(
                serde_json::json!({ "status": "ok", "msg": "replaced older challenge" }),
            ))
        }
        Err(e) => Err(engine_error(e)),
    }
}

async fn update_challenge(
    State(state): State<AppState>,
    AdminSession(_): AdminSession,
    Path(chall_id): Path<String>,
    Json(req): Json<UpdateChallengeRequest>,
) -> Result<impl IntoResponse, Response> {
    let record = Challenge::fetch_info(&state.inst, &chall_id)
        .await
        .map_err(engine_error)?
        .ok_or_else(|| response::not_found(anyhow!("invalid challenge ID")))?;

    let lifetime = req.lifetime.unwrap_or(record.lifetime);
    let boot_time = req.boot_time.unwrap_or(record.boot_time);
    if lifetime <= 0 {
        return Err(response::bad_request(anyhow!("lifetime must be positive")));
    }
    if boot_time < 0 || boot_time >= lifetime {
        return Err(response::bad_request(anyhow!(
            "boot_time must be non-negative and less than the challenge lifetime"
        )));
    }

    catalog::update(
        &state.inst,
        &chall_id,
        req.lifetime,
        req.boot_time,
        req.name.as_deref(),
        req.description.as_deref(),
        req.author.as_deref(),
    )
    .await
    .map_err(engine_error)?;

    if req.categories.is_some() || req.tags.is_some() {
        let tags = collect_tags(
            req.categories.as_deref().unwrap_or_default(),
            req.tags.as_deref().unwrap_or_default(),
        );
        catalog::replace_tags(&state.inst, &chall_id, &tags)
            .await
            .map_err(engine_error)?;
    }

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn delete_challenge(
    State(state): State<AppState>,
    AdminSession(_): AdminSession,
    Path(chall_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    if catalog::delete(&state.inst, &chall_id)
        .await
        .map_err(engine_error)?
    {
        Ok(Json(serde_json::json!({ "status": "ok" })))
    } else {
        Err(response::not_found(anyhow!("invalid challenge ID")))
    }
}
