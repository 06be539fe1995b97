use clap::{Parser, Subcommand};
use instancer_common::args::{ClusterArgs, InstancerArgs, PostgresArgs, RedisArgs};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "instancer-api")]
#[command(about = "On-demand challenge instancer API")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the API server
    Server(ServerArgs),

    /// Challenge operations against a running server
    Challenge(ChallengeCommandArgs),

    /// Mint a session token directly in Redis
    Session(SessionArgs),

    /// Check service health
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long, env = "INSTANCER_PORT", default_value_t = 8080)]
    pub port: u16,

    #[clap(flatten)]
    pub postgres: PostgresArgs,

    #[clap(flatten)]
    pub redis: RedisArgs,

    #[clap(flatten)]
    pub cluster: ClusterArgs,

    #[clap(flatten)]
    pub instancer: InstancerArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct ChallengeCommandArgs {
    #[command(subcommand)]
    pub command: ChallengeCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ChallengeCommands {
    /// Get a challenge by ID
    Get(GetChallengeArgs),
    /// Delete a challenge by ID
    Delete(DeleteChallengeArgs),
    /// List challenges with deployment status
    List(ListChallengesArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct GetChallengeArgs {
    /// Instancer API endpoint
    #[arg(long, env = "INSTANCER_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Session token
    #[arg(long, env = "INSTANCER_TOKEN")]
    pub token: String,

    /// Challenge ID
    #[arg(long)]
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct DeleteChallengeArgs {
    /// Instancer API endpoint
    #[arg(long, env = "INSTANCER_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Session token
    #[arg(long, env = "INSTANCER_TOKEN")]
    pub token: String,

    /// Challenge ID
    #[arg(long)]
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ListChallengesArgs {
    /// Instancer API endpoint
    #[arg(long, env = "INSTANCER_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Session token
    #[arg(long, env = "INSTANCER_TOKEN")]
    pub token: String,
}

#[derive(Parser, Debug, Clone)]
pub struct SessionArgs {
    #[clap(flatten)]
    pub redis: RedisArgs,

    /// Team the session belongs to
    #[arg(long)]
    pub team_id: Uuid,

    /// Session lifetime in seconds
    #[arg(long, env = "INSTANCER_SESSION_LENGTH", default_value_t = 24 * 3600)]
    pub session_length: i64,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    /// Instancer API endpoint
    #[arg(long, env = "INSTANCER_ENDPOINT")]
    pub endpoint: Option<String>,
}
