//! Challenge-instance lifecycle engine.
//!
//! The engine turns a declarative challenge config into a live namespaced
//! deployment on the cluster, keeps a renewable lease on it, and mirrors the
//! authoritative namespace annotations into a Redis index for fast range
//! scans. The reaper loop in [`reaper`] enforces expirations and repairs
//! index drift.

use anyhow::Result;
use instancer_common::args::ClusterArgs;
use owo_colors::OwoColorize;

pub mod catalog;
pub mod challenge;
pub mod config;
mod error;
pub mod index;
pub mod instance;
pub mod lock;
pub mod reaper;
pub mod translate;

pub use error::Error;

/// Labels stamped on every object the instancer creates. These are the wire
/// compatibility surface with already-running instances; do not rename.
pub mod labels {
    pub const INSTANCE_ID: &str = "instancer.acmcyber.com/instance-id";
    pub const CONTAINER_NAME: &str = "instancer.acmcyber.com/container-name";
    pub const HAS_INGRESS: &str = "instancer.acmcyber.com/has-ingress";
    pub const HAS_EGRESS: &str = "instancer.acmcyber.com/has-egress";
    pub const TEAM_ID: &str = "instancer.acmcyber.com/team-id";
}

/// Annotations carrying the authoritative lifecycle record.
pub mod annotations {
    /// Namespace: lease expiration, UNIX seconds.
    pub const CHALL_EXPIRES: &str = "instancer.acmcyber.com/chall-expires";
    /// Namespace: first boot, UNIX seconds.
    pub const CHALL_START_TIME: &str = "instancer.acmcyber.com/chall-start-time";
    /// Pod template: start of the most recent create.
    pub const CHALL_STARTED: &str = "instancer.acmcyber.com/chall-started";
    /// IngressRoute: JSON `[(port, host), ...]`, the source of truth for
    /// port-mapping recovery.
    pub const RAW_ROUTES: &str = "instancer.acmcyber.com/raw-routes";
}

/// Shared handles for the cluster, the key-value store, and the relational
/// store. Constructed once at startup and passed explicitly; nothing in the
/// engine reaches for globals.
#[derive(Clone)]
pub struct Instancer {
    pub kube: kube::Client,
    pub redis: deadpool_redis::Pool,
    pub pg: deadpool_postgres::Pool,
}

impl Instancer {
    pub fn new(
        kube: kube::Client,
        redis: deadpool_redis::Pool,
        pg: deadpool_postgres::Pool,
    ) -> Self {
        Self { kube, redis, pg }
    }
}

pub async fn init_kube(args: &ClusterArgs) -> Result<kube::Client> {
    let config = if args.in_cluster {
        println!("{}", "🔌 Using in-cluster Kubernetes config".green());
        kube::Config::incluster()?
    } else {
        println!("{}", "🔌 Using local Kubernetes config".green());
        kube::Config::infer().await?
    };
    Ok(kube::Client::try_from(config)?)
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
