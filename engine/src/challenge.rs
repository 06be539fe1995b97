//! The challenge model.
//!
//! Two variants over the shared instance engine: a *shared* challenge keeps
//! one namespace for every team, a *per-team* challenge derives a namespace
//! from the requesting team and randomizes its public hostnames. Everything
//! else -- start, renew, stop, status -- is identical.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::{self, ChallengeRecord, Tag};
use crate::config::{ChallengeConfig, HttpRoute};
use crate::instance::{self, DeploymentStatus};
use crate::{Error, Instancer};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeMetadata {
    pub name: String,
    pub description: String,
    pub author: String,
}

#[derive(Debug, Clone)]
pub enum Variant {
    Shared,
    PerTeam { team_id: String },
}

/// A challenge definition bound to a requesting team, ready to be started,
/// renewed, stopped, or inspected.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: String,
    pub variant: Variant,
    pub cfg: ChallengeConfig,
    /// Lease length in seconds.
    pub lifetime: i64,
    /// Seconds the challenge needs after creation before it is reachable.
    pub boot_time: i64,
    pub metadata: ChallengeMetadata,
}

impl Challenge {
    /// Fetches the appropriate challenge given challenge ID and team ID.
    ///
    /// Returns None if the challenge doesn't exist.
    pub async fn fetch(
        inst: &Instancer,
        challenge_id: &str,
        team_id: &str,
    ) -> Result<Option<Challenge>, Error> {
        let Some(record) = catalog::fetch_record(inst, challenge_id).await? else {
            return Ok(None);
        };
        Ok(Some(Self::from_record(record, team_id)?))
    }

    /// Cached definition without binding to a team.
    pub async fn fetch_info(
        inst: &Instancer,
        challenge_id: &str,
    ) -> Result<Option<ChallengeRecord>, Error> {
        catalog::fetch_record(inst, challenge_id).await
    }

    /// Every challenge with its tags, bound to the given team.
    pub async fn fetchall(
        inst: &Instancer,
        team_id: &str,
    ) -> Result<Vec<(Challenge, Vec<Tag>)>, Error> {
        let mut out = Vec::new();
        for (record, tags) in catalog::fetchall(inst).await? {
            out.push((Self::from_record(record, team_id)?, tags));
        }
        Ok(out)
    }

    fn from_record(record: ChallengeRecord, team_id: &str) -> Result<Challenge, Error> {
        let cfg: ChallengeConfig = serde_json::from_value(record.cfg)?;
        let variant = if record.per_team {
            Variant::PerTeam {
                team_id: team_id.to_string(),
            }
        } else {
            Variant::Shared
        };
        Ok(Challenge {
            id: record.id,
            variant,
            cfg,
            lifetime: record.lifetime,
            boot_time: record.boot_time,
            metadata: ChallengeMetadata {
                name: record.name,
                description: record.description,
                author: record.author,
            },
        })
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.variant, Variant::Shared)
    }

    pub fn team_id(&self) -> Option<&str> {
        match &self.variant {
            Variant::Shared => None,
            Variant::PerTeam { team_id } => Some(team_id),
        }
    }

    /// The namespace this challenge deploys into; the unit of mutual
    /// exclusion and teardown.
    pub fn namespace(&self) -> String {
        derive_namespace(&self.id, self.team_id())
    }

    /// The HTTP routes to install on this start: verbatim for shared
    /// challenges, hostname-randomized for per-team ones. Renewals never
    /// reach this; they reuse the objects already in the namespace.
    pub fn start_http_routes(&self) -> BTreeMap<String, Vec<HttpRoute>> {
        match self.variant {
            Variant::Shared => self.cfg.http.clone(),
            Variant::PerTeam { .. } => self
                .cfg
                .http
                .iter()
                .map(|(container, routes)| {
                    (
                        container.clone(),
                        routes
                            .iter()
                            .map(|(port, host)| (*port, randomize_host(host)))
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    /// Starts the challenge, or renews its lease if it is already running.
    pub async fn start(&self, inst: &Instancer) -> Result<(), Error> {
        instance::start(inst, self).await
    }

    /// Stops the challenge if it's running.
    pub async fn stop(&self, inst: &Instancer) -> Result<(), Error> {
        instance::stop_namespace(inst, &self.namespace()).await
    }

    pub async fn deployment_status(
        &self,
        inst: &Instancer,
    ) -> Result<Option<DeploymentStatus>, Error> {
        instance::deployment_status(inst, self).await
    }

    pub async fn tags(&self, inst: &Instancer) -> Result<Vec<Tag>, Error> {
        catalog::fetch_tags(inst, &self.id).await
    }

    pub async fn replace_tags(&self, inst: &Instancer, tags: &[Tag]) -> Result<(), Error> {
        catalog::replace_tags(inst, &self.id, tags).await
    }
}

/// Derives the namespace name for a challenge and team. Pure: the same pair
/// always yields the same name, and the result is a valid DNS label of at
/// most 63 characters. Names that would exceed the limit collapse to the
/// first 60 hex digits of their SHA-256.
pub fn derive_namespace(challenge_id: &str, team_id: Option<&str>) -> String {
    let name = match team_id {
        None => format!("ci-{challenge_id}"),
        Some(team_id) => format!("ci-{challenge_id}-t-{}", team_id.replace('-', "")),
    };
    if name.len() > 63 {
        let digest = Sha256::digest(name.as_bytes());
        format!("ci-{}", &hex::encode(digest)[..60])
    } else {
        name
    }
}

const SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LEN: usize = 5;

/// Appends a random suffix to the leftmost label of a hostname, so per-team
/// instance URLs cannot be guessed from the challenge config.
fn randomize_host(host: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARS[rng.random_range(0..SUFFIX_CHARS.len())] as char)
        .collect();
    match host.split_once('.') {
        Some((first, rest)) => format!("{first}-{suffix}.{rest}"),
        None => format!("{host}-{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_namespace() {
        assert_eq!(derive_namespace("web", None), "ci-web");
    }

    #[test]
    fn test_per_team_namespace_strips_dashes() {
        assert_eq!(
            derive_namespace("pwn", Some("a1b2c3d4-e5f6-7788-99aa-bbccddeeff00")),
            "ci-pwn-t-a1b2c3d4e5f6778899aabbccddeeff00"
        );
    }

    #[test]
    fn test_namespace_determinism() {
        let a = derive_namespace("web", Some("a1b2c3d4-e5f6-7788-99aa-bbccddeeff00"));
        let b = derive_namespace("web", Some("a1b2c3d4-e5f6-7788-99aa-bbccddeeff00"));
        assert_eq!(a, b);
        let c = derive_namespace("web2", Some("a1b2c3d4-e5f6-7788-99aa-bbccddeeff00"));
        assert_ne!(a, c);
        let d = derive_namespace("web", Some("00000000-0000-0000-0000-000000000000"));
        assert_ne!(a, d);
    }

    #[test]
    fn test_namespace_length_bound() {
        // 26-char id + 32-char team id exceeds 63 and takes the hash branch.
        let long_id = "a".repeat(26);
        let team = "a1b2c3d4-e5f6-7788-99aa-bbccddeeff00";
        let ns = derive_namespace(&long_id, Some(team));
        assert_eq!(ns.len(), 63);
        assert!(ns.starts_with("ci-"));
        assert!(ns[3..].chars().all(|c| c.is_ascii_hexdigit()));

        // The hash branch is only reachable past the limit.
        let short = derive_namespace("web", Some(team));
        assert_eq!(short, "ci-web-t-a1b2c3d4e5f6778899aabbccddeeff00");
        assert!(short.len() <= 63);
    }

    #[test]
    fn test_hash_branch_deterministic() {
        let long_id = "a".repeat(40);
        let a = derive_namespace(&long_id, Some("a1b2c3d4-e5f6-7788-99aa-bbccddeeff00"));
        let b = derive_namespace(&long_id, Some("a1b2c3d4-e5f6-7788-99aa-bbccddeeff00"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_randomize_host_shape() {
        let host = randomize_host("web.chall.example.com");
        let (first, rest) = host.split_once('.').unwrap();
        assert_eq!(rest, "chall.example.com");
        let (base, suffix) = first.rsplit_once('-').unwrap();
        assert_eq!(base, "web");
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn test_start_http_routes_shared_verbatim() {
        let cfg: ChallengeConfig = serde_json::from_value(serde_json::json!({
            "containers": {"web": {"image": "nginx", "ports": [80]}},
            "http": {"web": [[80, "web.chall.example.com"]]},
        }))
        .unwrap();
        let chall = Challenge {
            id: "web".into(),
            variant: Variant::Shared,
            cfg,
            lifetime: 600,
            boot_time: 0,
            metadata: ChallengeMetadata {
                name: "Web".into(),
                description: String::new(),
                author: String::new(),
            },
        };
        assert_eq!(
            chall.start_http_routes()["web"],
            vec![(80, "web.chall.example.com".to_string())]
        );
    }

    #[test]
    fn test_start_http_routes_per_team_randomized() {
        let cfg: ChallengeConfig = serde_json::from_value(serde_json::json!({
            "containers": {"web": {"image": "nginx", "ports": [80]}},
            "http": {"web": [[80, "web.chall.example.com"]]},
        }))
        .unwrap();
        let chall = Challenge {
            id: "web".into(),
            variant: Variant::PerTeam {
                team_id: "a1b2c3d4-e5f6-7788-99aa-bbccddeeff00".into(),
            },
            cfg,
            lifetime: 600,
            boot_time: 0,
            metadata: ChallengeMetadata {
                name: "Web".into(),
                description: String::new(),
                author: String::new(),
            },
        };
        let routes = chall.start_http_routes();
        let (port, host) = &routes["web"][0];
        assert_eq!(*port, 80);
        assert_ne!(host, "web.chall.example.com");
        assert!(host.starts_with("web-"));
        assert!(host.ends_with(".chall.example.com"));
    }
}
