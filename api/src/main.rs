use anyhow::Result;
use clap::Parser;

mod args;
mod auth;
mod cli;
mod client;
mod models;
mod server;

use args::{ChallengeCommands, Cli, Commands};
use server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    instancer_common::init();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Challenge(args) => match args.command {
            ChallengeCommands::Get(args) => cli::run_challenge_get(args).await,
            ChallengeCommands::Delete(args) => cli::run_challenge_delete(args).await,
            ChallengeCommands::List(args) => cli::run_challenge_list(args).await,
        },
        Commands::Session(args) => cli::run_session(args).await,
        Commands::Health(args) => cli::run_health(args.endpoint).await,
    }
}
