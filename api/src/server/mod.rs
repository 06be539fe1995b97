//! The instancer HTTP server.
//!
//! Two route groups share one listener: the public team routes (session
//! required) and the admin challenge CRUD (admin session required).

pub mod admin;
pub mod public;

use anyhow::{Context, Result};
use axum::Router;
use axum::response::Response;
use instancer_common::response;
use instancer_engine::{Error as EngineError, Instancer, catalog, init_kube};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::args::ServerArgs;

#[derive(Clone)]
pub struct AppState {
    pub inst: Instancer,
    pub challenge_host: String,
    pub admin_team_id: Option<Uuid>,
}

/// Maps engine errors onto the HTTP status the caller can act on.
pub fn engine_error(e: EngineError) -> Response {
    match &e {
        EngineError::NotFound(_) => response::not_found(e),
        EngineError::DuplicateId(_) => response::conflict(e),
        EngineError::InvalidConfig(_) | EngineError::NotSupported(_) => response::bad_request(e),
        EngineError::Unavailable(_) | EngineError::AlreadyLocked(_) => {
            response::service_unavailable(e)
        }
        _ => response::internal_server_error(e),
    }
}

pub async fn run_server(args: ServerArgs) -> Result<()> {
    let redis = instancer_common::redis::init_redis(&args.redis).await;
    let pg = instancer_common::postgres::create_pool(args.postgres.clone());
    let kube = init_kube(&args.cluster).await?;

    catalog::init_schema(&pg).await?;

    let state = AppState {
        inst: Instancer::new(kube, redis, pg),
        challenge_host: args.instancer.challenge_host.clone(),
        admin_team_id: args.instancer.admin_team_id,
    };

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        instancer_common::shutdown::shutdown_signal().await;
        cancel_signal.cancel();
    });

    let app = Router::new()
        .merge(public::router(state.clone()))
        .nest("/api/v1/admin", admin::router(state));

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind server")?;
    println!(
        "{}{}",
        "🚀 Instancer API listening on ".green(),
        addr.green().dimmed()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("server failed")?;

    tracing::info!("server stopped gracefully");
    Ok(())
}
