//! Declarative challenge configuration.
//!
//! The shape mirrors what challenge authors upload:
//!
//! ```json
//! {
//!   "containers": { "<container-id>": { "image": "...", ... } },
//!   "tcp":  { "<container-id>": [1337] },
//!   "http": { "<container-id>": [[80, "web.chall.example.com"]] }
//! }
//! ```
//!
//! Every cross-field rule is enforced at the admin boundary via
//! [`ChallengeConfig::validate`]; the translator assumes a validated config.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ResourceRequirements, SecurityContext};
use serde::{Deserialize, Serialize};

use crate::Error;

/// A port/public-hostname pair routed through the HTTP ingress.
pub type HttpRoute = (i32, String);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChallengeConfig {
    pub containers: BTreeMap<String, ContainerSpec>,

    /// Container ports exposed as NodePort services.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tcp: BTreeMap<String, Vec<i32>>,

    /// Container ports routed to public hostnames by the ingress controller.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http: BTreeMap<String, Vec<HttpRoute>>,
}

/// A restricted subset of the cluster's container shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerSpec {
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_once: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_message_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_message_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Environment as an explicit name/value list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvEntry>>,
    /// Environment as a map; unioned with `env`, which wins on collisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,

    /// Full container-port descriptors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_ports: Option<Vec<KubePort>>,
    /// Bare container port numbers; unioned with `kubePorts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<i32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Whether pods may reach the outside world (default true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_egress: Option<bool>,
    /// Permits one NodePort and one ClusterIP service for the same container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_service: Option<bool>,

    // Recognized but unsupported groups; the translator rejects them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_from: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_devices: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KubePort {
    pub container_port: i32,
    #[serde(
        default,
        rename = "hostIP",
        skip_serializing_if = "Option::is_none"
    )]
    pub host_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Reserved for the NodePort service of multi-service containers.
pub const EXTERNAL_SERVICE_SUFFIX: &str = "-instancer-external";

/// Checks `[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?` -- a DNS label of at most 63
/// characters.
pub fn is_dns_label(s: &str) -> bool {
    if s.is_empty() || s.len() > 63 {
        return false;
    }
    let bytes = s.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| edge_ok(b) || b == b'-')
}

fn port_in_range(port: i32) -> bool {
    (1..=65535).contains(&port)
}

impl ContainerSpec {
    /// Every port the container declares, via either `ports` or `kubePorts`,
    /// sorted and deduplicated.
    pub fn declared_ports(&self) -> Vec<i32> {
        let mut out: Vec<i32> = self.ports.clone().unwrap_or_default();
        for kp in self.kube_ports.iter().flatten() {
            out.push(kp.container_port);
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

impl ChallengeConfig {
    /// Validates the upload-time rules the translator relies on. Returns the
    /// first failing rule as [`Error::InvalidConfig`].
    pub fn validate(&self) -> Result<(), Error> {
        for (name, spec) in &self.containers {
            if !is_dns_label(name) {
                return Err(Error::InvalidConfig(format!(
                    "container id {name:?} must match [a-z0-9]([-a-z0-9]{{0,61}}[a-z0-9])?"
                )));
            }
            if name.ends_with(EXTERNAL_SERVICE_SUFFIX) {
                return Err(Error::InvalidConfig(format!(
                    "suffix {EXTERNAL_SERVICE_SUFFIX} is reserved and cannot be used for containers"
                )));
            }
            for port in spec.ports.iter().flatten() {
                if !port_in_range(*port) {
                    return Err(Error::InvalidConfig(format!(
                        "container {name:?} declares out-of-range port {port}"
                    )));
                }
            }
            for kp in spec.kube_ports.iter().flatten() {
                if !port_in_range(kp.container_port) {
                    return Err(Error::InvalidConfig(format!(
                        "container {name:?} declares out-of-range port {}",
                        kp.container_port
                    )));
                }
                if let Some(protocol) = &kp.protocol
                    && !["TCP", "UDP", "SCTP"].contains(&protocol.as_str())
                {
                    return Err(Error::InvalidConfig(format!(
                        "container {name:?} declares unknown protocol {protocol:?}"
                    )));
                }
            }

            let exposed = self.tcp.get(name).cloned().unwrap_or_default();
            let private: Vec<i32> = spec
                .declared_ports()
                .into_iter()
                .filter(|p| !exposed.contains(p))
                .collect();
            if !exposed.is_empty() && !private.is_empty() && !spec.multi_service.unwrap_or(false) {
                return Err(Error::InvalidConfig(format!(
                    "container {name:?} has both exposed and private ports but multiService is not true"
                )));
            }
        }

        for (name, ports) in &self.tcp {
            if !self.containers.contains_key(name) {
                return Err(Error::InvalidConfig(format!(
                    "exposed port for non-existent container {name:?}"
                )));
            }
            for port in ports {
                if !port_in_range(*port) {
                    return Err(Error::InvalidConfig(format!(
                        "exposed out-of-range port {port} for container {name:?}"
                    )));
                }
            }
        }

        for (name, routes) in &self.http {
            if !self.containers.contains_key(name) {
                return Err(Error::InvalidConfig(format!(
                    "exposed subdomain for non-existent container {name:?}"
                )));
            }
            for (port, host) in routes {
                if !port_in_range(*port) {
                    return Err(Error::InvalidConfig(format!(
                        "HTTP route on out-of-range port {port} for container {name:?}"
                    )));
                }
                if host.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "HTTP route on port {port} for container {name:?} has an empty host"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(containers: &[(&str, &[i32])]) -> ChallengeConfig {
        let mut map = BTreeMap::new();
        for (name, ports) in containers {
            map.insert(
                name.to_string(),
                serde_json::from_value::<ContainerSpec>(serde_json::json!({
                    "image": "alpine",
                    "ports": ports,
                }))
                .unwrap(),
            );
        }
        ChallengeConfig {
            containers: map,
            tcp: BTreeMap::new(),
            http: BTreeMap::new(),
        }
    }

    #[test]
    fn test_dns_label() {
        assert!(is_dns_label("web"));
        assert!(is_dns_label("a"));
        assert!(is_dns_label("web-1"));
        assert!(is_dns_label("0day"));
        assert!(!is_dns_label(""));
        assert!(!is_dns_label("-web"));
        assert!(!is_dns_label("web-"));
        assert!(!is_dns_label("Web"));
        assert!(!is_dns_label("web_1"));
        assert!(is_dns_label(&"a".repeat(63)));
        assert!(!is_dns_label(&"a".repeat(64)));
    }

    #[test]
    fn test_validate_ok() {
        let mut cfg = minimal(&[("web", &[80])]);
        cfg.tcp.insert("web".into(), vec![80]);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_reserved_suffix() {
        let cfg = minimal(&[("web-instancer-external", &[80])]);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_undeclared_tcp_container() {
        let mut cfg = minimal(&[("web", &[80])]);
        cfg.tcp.insert("db".into(), vec![5432]);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_undeclared_http_container() {
        let mut cfg = minimal(&[("web", &[80])]);
        cfg.http
            .insert("db".into(), vec![(80, "db.chall.example.com".into())]);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_multi_service_required() {
        let mut cfg = minimal(&[("web", &[80, 8080])]);
        cfg.tcp.insert("web".into(), vec![80]);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        cfg.containers.get_mut("web").unwrap().multi_service = Some(true);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_port_range() {
        let cfg = minimal(&[("web", &[0])]);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        let cfg = minimal(&[("web", &[65536])]);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let parsed: Result<ContainerSpec, _> = serde_json::from_value(serde_json::json!({
            "image": "alpine",
            "hostNetwork": true,
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_declared_ports_union() {
        let spec: ContainerSpec = serde_json::from_value(serde_json::json!({
            "image": "alpine",
            "ports": [8080, 80],
            "kubePorts": [{"containerPort": 9090}, {"containerPort": 80}],
        }))
        .unwrap();
        assert_eq!(spec.declared_ports(), vec![80, 8080, 9090]);
    }

    #[test]
    fn test_kube_port_host_ip_casing() {
        let kp: KubePort = serde_json::from_value(serde_json::json!({
            "containerPort": 80,
            "hostIP": "10.0.0.1",
        }))
        .unwrap();
        assert_eq!(kp.host_ip.as_deref(), Some("10.0.0.1"));
    }
}
