use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use instancer_engine::{Instancer, init_kube, reaper};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

mod args;

use args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    instancer_common::init();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let redis = instancer_common::redis::init_redis(&cli.redis).await;
    let pg = instancer_common::postgres::create_pool(cli.postgres.clone());
    let kube = init_kube(&cli.cluster).await?;
    let inst = Instancer::new(kube, redis, pg);

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        instancer_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });

    println!("{}", "⚙️ Starting reaper...".green());
    loop {
        if let Err(e) = reaper::run_once(&inst, cli.resync_interval).await {
            eprintln!("{}", format!("Reaper sweep failed: {e:?}").red());
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(reaper::SWEEP_SECS)) => {}
        }
    }

    println!("{}", "⚙️ Reaper stopped".green());
    Ok(())
}
