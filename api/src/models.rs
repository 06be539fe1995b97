//! Request and response shapes for the HTTP boundary.

use instancer_engine::catalog::Tag;
use instancer_engine::challenge::Challenge;
use instancer_engine::instance::{DeploymentStatus, PortMappings};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeInfo {
    pub id: String,
    pub name: String,
    pub author: String,
    pub description: String,
    pub tags: Vec<Tag>,
    pub is_shared: bool,
}

impl ChallengeInfo {
    pub fn new(chall: &Challenge, tags: Vec<Tag>) -> Self {
        Self {
            id: chall.id.clone(),
            name: chall.metadata.name.clone(),
            author: chall.metadata.author.clone(),
            description: chall.metadata.description.clone(),
            tags,
            is_shared: chall.is_shared(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatusJson {
    pub expiration: i64,
    /// When the instance is expected to be reachable, UNIX seconds.
    pub start_delay: i64,
    /// The host exposed TCP ports are reachable on.
    pub host: String,
    pub port_mappings: PortMappings,
}

impl DeploymentStatusJson {
    pub fn new(status: DeploymentStatus, host: &str) -> Self {
        Self {
            expiration: status.expiration,
            start_delay: status.start_timestamp,
            host: host.to_string(),
            port_mappings: status.port_mappings,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeListEntry {
    pub challenge_info: ChallengeInfo,
    pub deployment: Option<DeploymentStatusJson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateChallengeRequest {
    pub chall_id: String,
    #[serde(default)]
    pub per_team: bool,
    pub cfg: serde_json::Value,
    pub lifetime: i64,
    #[serde(default)]
    pub boot_time: i64,
    pub name: String,
    pub description: String,
    pub author: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub replace_existing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateChallengeRequest {
    #[serde(default)]
    pub lifetime: Option<i64>,
    #[serde(default)]
    pub boot_time: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}
