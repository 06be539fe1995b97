use clap::Parser;
use instancer_common::args::{ClusterArgs, PostgresArgs, RedisArgs};

#[derive(Parser, Debug)]
#[command(name = "instancer-reaper")]
#[command(about = "Expires challenge instances and resyncs the state index")]
pub struct Cli {
    /// Minimum seconds between index resyncs from the cluster
    #[arg(
        long,
        env = "INSTANCER_REDIS_RESYNC_INTERVAL",
        default_value_t = instancer_engine::reaper::DEFAULT_RESYNC_SECS,
    )]
    pub resync_interval: i64,

    #[clap(flatten)]
    pub redis: RedisArgs,

    #[clap(flatten)]
    pub postgres: PostgresArgs,

    #[clap(flatten)]
    pub cluster: ClusterArgs,
}
