//! Config-to-workload translation.
//!
//! Pure functions from a validated [`ChallengeConfig`] to the cluster API
//! payloads: one Deployment per container, its services, its ingress route,
//! and the three per-namespace network policies. Same input, same output,
//! byte for byte -- everything iterates in BTreeMap order and nothing here
//! touches the clock or the network.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{ChallengeConfig, ContainerSpec, HttpRoute};
use crate::{Error, annotations, labels};

/// The Traefik ingress CRD. The group is pinned here and nowhere else.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "traefik.io",
    version = "v1alpha1",
    kind = "IngressRoute",
    plural = "ingressroutes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IngressRouteSpec {
    pub entry_points: Vec<String>,
    pub routes: Vec<IngressRouteRule>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct IngressRouteRule {
    #[serde(rename = "match")]
    pub match_rule: String,
    pub kind: String,
    pub services: Vec<IngressRouteBackend>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct IngressRouteBackend {
    pub name: String,
    pub port: i32,
}

/// Environment variable carrying instance metadata into every container.
pub const METADATA_ENV: &str = "INSTANCER_METADATA";

/// Identity and config of one instance, borrowed for the duration of a
/// translation pass.
#[derive(Clone, Copy)]
pub struct Translator<'a> {
    pub instance_id: &'a str,
    pub namespace: &'a str,
    pub team_id: Option<&'a str>,
    /// UNIX seconds of the start call, stamped on pod templates.
    pub started_at: i64,
    pub cfg: &'a ChallengeConfig,
    /// HTTP routes after any per-team hostname rewriting.
    pub http_routes: &'a BTreeMap<String, Vec<HttpRoute>>,
}

impl<'a> Translator<'a> {
    /// Labels shared by every object of the instance.
    pub fn common_labels(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert(labels::INSTANCE_ID.to_string(), self.instance_id.to_string());
        if let Some(team_id) = self.team_id {
            out.insert(labels::TEAM_ID.to_string(), team_id.to_string());
        }
        out
    }

    fn selector_labels(&self, container_name: &str) -> BTreeMap<String, String> {
        let mut out = self.common_labels();
        out.insert(
            labels::CONTAINER_NAME.to_string(),
            container_name.to_string(),
        );
        out
    }

    fn pod_labels(&self, container_name: &str, spec: &ContainerSpec) -> BTreeMap<String, String> {
        let mut out = self.selector_labels(container_name);
        out.insert(
            labels::HAS_EGRESS.to_string(),
            spec.has_egress.unwrap_or(true).to_string(),
        );
        out.insert(
            labels::HAS_INGRESS.to_string(),
            self.has_ingress(container_name).to_string(),
        );
        out
    }

    fn exposed_tcp(&self, container_name: &str) -> Vec<i32> {
        let mut out = self
            .cfg
            .tcp
            .get(container_name)
            .cloned()
            .unwrap_or_default();
        out.sort_unstable();
        out.dedup();
        out
    }

    fn private_ports(&self, container_name: &str, spec: &ContainerSpec) -> Vec<i32> {
        let exposed = self.exposed_tcp(container_name);
        spec.declared_ports()
            .into_iter()
            .filter(|p| !exposed.contains(p))
            .collect()
    }

    fn has_ingress(&self, container_name: &str) -> bool {
        !self.exposed_tcp(container_name).is_empty()
            || self
                .http_routes
                .get(container_name)
                .is_some_and(|routes| !routes.is_empty())
    }

    /// The JSON payload of [`METADATA_ENV`]: enough for a challenge to know
    /// where it is running and which public hostnames route to it.
    pub fn instancer_metadata(&self, container_name: &str) -> Result<String, Error> {
        #[derive(Serialize)]
        struct Metadata<'m> {
            namespace: &'m str,
            instance_id: &'m str,
            container_name: &'m str,
            http: BTreeMap<&'m str, BTreeMap<String, &'m str>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            team_id: Option<&'m str>,
        }

        let http = self
            .http_routes
            .iter()
            .map(|(container, routes)| {
                (
                    container.as_str(),
                    routes
                        .iter()
                        .map(|(port, host)| (port.to_string(), host.as_str()))
                        .collect(),
                )
            })
            .collect();

        Ok(serde_json::to_string(&Metadata {
            namespace: self.namespace,
            instance_id: self.instance_id,
            container_name,
            http,
            team_id: self.team_id,
        })?)
    }

    fn container(&self, name: &str, spec: &ContainerSpec) -> Result<Container, Error> {
        for (field, present) in [
            ("env_from", spec.env_from.is_some()),
            ("lifecycle", spec.lifecycle.is_some()),
            ("liveness_probe", spec.liveness_probe.is_some()),
            ("readiness_probe", spec.readiness_probe.is_some()),
            ("startup_probe", spec.startup_probe.is_some()),
            ("volume_devices", spec.volume_devices.is_some()),
            ("volume_mounts", spec.volume_mounts.is_some()),
        ] {
            if present {
                return Err(Error::NotSupported(field.to_string()));
            }
        }

        let mut env: Vec<EnvVar> = spec
            .env
            .iter()
            .flatten()
            .map(|e| EnvVar {
                name: e.name.clone(),
                value: Some(e.value.clone()),
                ..Default::default()
            })
            .collect();
        for (k, v) in spec.environment.iter().flatten() {
            if !env.iter().any(|e| &e.name == k) {
                env.push(EnvVar {
                    name: k.clone(),
                    value: Some(v.clone()),
                    ..Default::default()
                });
            }
        }
        if !env.iter().any(|e| e.name == METADATA_ENV) {
            env.push(EnvVar {
                name: METADATA_ENV.to_string(),
                value: Some(self.instancer_metadata(name)?),
                ..Default::default()
            });
        }

        let mut ports: Vec<ContainerPort> = spec
            .kube_ports
            .iter()
            .flatten()
            .map(|kp| ContainerPort {
                container_port: kp.container_port,
                host_ip: kp.host_ip.clone(),
                host_port: kp.host_port,
                name: kp.name.clone(),
                protocol: kp.protocol.clone(),
            })
            .collect();
        for port in spec.ports.iter().flatten() {
            if !ports.iter().any(|p| p.container_port == *port) {
                ports.push(ContainerPort {
                    container_port: *port,
                    ..Default::default()
                });
            }
        }

        let resources = spec.resources.clone().unwrap_or_else(default_resources);

        Ok(Container {
            name: name.to_string(),
            image: Some(spec.image.clone()),
            args: spec.args.clone(),
            command: spec.command.clone(),
            image_pull_policy: spec.image_pull_policy.clone(),
            stdin: spec.stdin,
            stdin_once: spec.stdin_once,
            termination_message_path: spec.termination_message_path.clone(),
            termination_message_policy: spec.termination_message_policy.clone(),
            tty: spec.tty,
            working_dir: spec.working_dir.clone(),
            env: Some(env),
            ports: if ports.is_empty() { None } else { Some(ports) },
            security_context: spec.security_context.clone(),
            resources: Some(resources),
            ..Default::default()
        })
    }

    /// One workload object per container: a single-replica Deployment with
    /// service links and the service-account token mount disabled.
    pub fn deployment(&self, name: &str, spec: &ContainerSpec) -> Result<Deployment, Error> {
        let pod_labels = self.pod_labels(name, spec);
        let mut pod_annotations = BTreeMap::new();
        pod_annotations.insert(
            annotations::CHALL_STARTED.to_string(),
            self.started_at.to_string(),
        );

        Ok(Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(pod_labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        annotations: Some(pod_annotations),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        automount_service_account_token: Some(false),
                        enable_service_links: Some(false),
                        termination_grace_period_seconds: Some(0),
                        containers: vec![self.container(name, spec)?],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Zero, one, or two services per container: a NodePort for the exposed
    /// TCP ports and a ClusterIP for the private ones. When both exist the
    /// NodePort yields the container name to the ClusterIP so that ingress
    /// routes keep resolving.
    pub fn services(&self, name: &str, spec: &ContainerSpec) -> Vec<Service> {
        let exposed = self.exposed_tcp(name);
        let private = self.private_ports(name, spec);
        let mut out = Vec::new();

        if !exposed.is_empty() {
            let service_name = if private.is_empty() {
                name.to_string()
            } else {
                format!("{name}{}", crate::config::EXTERNAL_SERVICE_SUFFIX)
            };
            out.push(self.service(&service_name, name, "NodePort", &exposed));
        }
        if !private.is_empty() {
            out.push(self.service(name, name, "ClusterIP", &private));
        }
        out
    }

    fn service(
        &self,
        service_name: &str,
        container_name: &str,
        type_: &str,
        ports: &[i32],
    ) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(service_name.to_string()),
                labels: Some(self.selector_labels(container_name)),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(self.selector_labels(container_name)),
                ports: Some(
                    ports
                        .iter()
                        .map(|&port| ServicePort {
                            name: Some(format!("port-{port}")),
                            port,
                            target_port: Some(IntOrString::Int(port)),
                            ..Default::default()
                        })
                        .collect(),
                ),
                type_: Some(type_.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// The Traefik route for a container with HTTP routes, carrying the raw
    /// `(port, host)` list as an annotation for port-mapping recovery.
    pub fn ingress_route(&self, name: &str) -> Result<Option<IngressRoute>, Error> {
        let routes = match self.http_routes.get(name) {
            Some(routes) if !routes.is_empty() => routes,
            _ => return Ok(None),
        };

        let mut route_annotations = BTreeMap::new();
        route_annotations.insert(
            annotations::RAW_ROUTES.to_string(),
            serde_json::to_string(routes)?,
        );

        let mut ingress = IngressRoute::new(
            name,
            IngressRouteSpec {
                entry_points: vec!["web".to_string(), "websecure".to_string()],
                routes: routes
                    .iter()
                    .map(|(port, host)| IngressRouteRule {
                        match_rule: format!("Host(`{host}`)"),
                        kind: "Rule".to_string(),
                        services: vec![IngressRouteBackend {
                            name: name.to_string(),
                            port: *port,
                        }],
                    })
                    .collect(),
            },
        );
        ingress.metadata.annotations = Some(route_annotations);
        ingress.metadata.labels = Some(self.selector_labels(name));
        Ok(Some(ingress))
    }

    /// The three network policies every instance gets: intra-namespace
    /// traffic plus DNS and the ingress controller, public ingress for pods
    /// that expose something, and public egress minus the private ranges.
    pub fn network_policies(&self) -> Vec<NetworkPolicy> {
        vec![
            self.intrans_policy(),
            self.ingress_policy(),
            self.egress_policy(),
        ]
    }

    fn policy_meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(self.common_labels()),
            ..Default::default()
        }
    }

    fn intrans_policy(&self) -> NetworkPolicy {
        let same_namespace = NetworkPolicyPeer {
            pod_selector: Some(LabelSelector::default()),
            ..Default::default()
        };
        let kube_dns = NetworkPolicyPeer {
            namespace_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    "kubernetes.io/metadata.name".to_string(),
                    "kube-system".to_string(),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };
        // The ingress controller lives in either `default` or `traefik`
        // depending on the cluster generation.
        let ingress_controller = NetworkPolicyPeer {
            namespace_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: "kubernetes.io/metadata.name".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["default".to_string(), "traefik".to_string()]),
                }]),
                ..Default::default()
            }),
            pod_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/name".to_string(),
                    "traefik".to_string(),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };

        NetworkPolicy {
            metadata: self.policy_meta("intrans"),
            spec: Some(NetworkPolicySpec {
                pod_selector: Some(LabelSelector::default()),
                policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    from: Some(vec![same_namespace.clone()]),
                    ..Default::default()
                }]),
                egress: Some(vec![
                    NetworkPolicyEgressRule {
                        to: Some(vec![same_namespace]),
                        ..Default::default()
                    },
                    NetworkPolicyEgressRule {
                        to: Some(vec![kube_dns]),
                        ports: Some(vec![NetworkPolicyPort {
                            port: Some(IntOrString::Int(53)),
                            protocol: Some("UDP".to_string()),
                            ..Default::default()
                        }]),
                    },
                    NetworkPolicyEgressRule {
                        to: Some(vec![ingress_controller]),
                        ..Default::default()
                    },
                ]),
            }),
        }
    }

    fn ingress_policy(&self) -> NetworkPolicy {
        NetworkPolicy {
            metadata: self.policy_meta("ingress"),
            spec: Some(NetworkPolicySpec {
                pod_selector: Some(LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        labels::HAS_INGRESS.to_string(),
                        "true".to_string(),
                    )])),
                    ..Default::default()
                }),
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    from: Some(vec![
                        NetworkPolicyPeer {
                            ip_block: Some(IPBlock {
                                cidr: "0.0.0.0/0".to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        // Some ingress controllers present their peer as a
                        // namespace rather than a pod IP.
                        NetworkPolicyPeer {
                            namespace_selector: Some(LabelSelector::default()),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    fn egress_policy(&self) -> NetworkPolicy {
        NetworkPolicy {
            metadata: self.policy_meta("egress"),
            spec: Some(NetworkPolicySpec {
                pod_selector: Some(LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        labels::HAS_EGRESS.to_string(),
                        "true".to_string(),
                    )])),
                    ..Default::default()
                }),
                policy_types: Some(vec!["Egress".to_string()]),
                egress: Some(vec![NetworkPolicyEgressRule {
                    to: Some(vec![NetworkPolicyPeer {
                        ip_block: Some(IPBlock {
                            cidr: "0.0.0.0/0".to_string(),
                            except: Some(vec![
                                "10.0.0.0/8".to_string(),
                                "172.16.0.0/12".to_string(),
                                "192.168.0.0/16".to_string(),
                                "169.254.0.0/16".to_string(),
                            ]),
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }
}

fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("500m".to_string())),
            ("memory".to_string(), Quantity("512Mi".to_string())),
        ])),
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("50m".to_string())),
            ("memory".to_string(), Quantity("64Mi".to_string())),
        ])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(value: serde_json::Value) -> ChallengeConfig {
        serde_json::from_value(value).unwrap()
    }

    fn translator<'a>(
        cfg: &'a ChallengeConfig,
        http_routes: &'a BTreeMap<String, Vec<HttpRoute>>,
    ) -> Translator<'a> {
        Translator {
            instance_id: "web",
            namespace: "ci-web",
            team_id: None,
            started_at: 1700000000,
            cfg,
            http_routes,
        }
    }

    #[test]
    fn test_deployment_shape() {
        let cfg = cfg(serde_json::json!({
            "containers": {"web": {"image": "nginx:1.25", "ports": [80]}},
            "tcp": {"web": [80]},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let dep = t.deployment("web", &cfg.containers["web"]).unwrap();

        assert_eq!(dep.metadata.name.as_deref(), Some("web"));
        let spec = dep.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.automount_service_account_token, Some(false));
        assert_eq!(pod.enable_service_links, Some(false));
        assert_eq!(pod.termination_grace_period_seconds, Some(0));
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].image.as_deref(), Some("nginx:1.25"));

        let pod_meta = spec.template.metadata.unwrap();
        assert_eq!(
            pod_meta.annotations.unwrap()[annotations::CHALL_STARTED],
            "1700000000"
        );
        let labels_map = pod_meta.labels.unwrap();
        assert_eq!(labels_map[labels::INSTANCE_ID], "web");
        assert_eq!(labels_map[labels::HAS_INGRESS], "true");
        assert_eq!(labels_map[labels::HAS_EGRESS], "true");
    }

    #[test]
    fn test_default_resources() {
        let cfg = cfg(serde_json::json!({
            "containers": {"c": {"image": "alpine"}},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let dep = t.deployment("c", &cfg.containers["c"]).unwrap();
        let resources = dep.spec.unwrap().template.spec.unwrap().containers[0]
            .resources
            .clone()
            .unwrap();
        assert_eq!(
            resources.limits.unwrap()["cpu"],
            Quantity("500m".to_string())
        );
        assert_eq!(
            resources.requests.unwrap()["memory"],
            Quantity("64Mi".to_string())
        );
    }

    #[test]
    fn test_explicit_resources_pass_through() {
        let cfg = cfg(serde_json::json!({
            "containers": {"c": {
                "image": "alpine",
                "resources": {"limits": {"cpu": "2", "memory": "1Gi"}},
            }},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let dep = t.deployment("c", &cfg.containers["c"]).unwrap();
        let resources = dep.spec.unwrap().template.spec.unwrap().containers[0]
            .resources
            .clone()
            .unwrap();
        assert_eq!(resources.limits.unwrap()["cpu"], Quantity("2".to_string()));
        assert!(resources.requests.is_none());
    }

    #[test]
    fn test_unsupported_fields_rejected() {
        let cfg = cfg(serde_json::json!({
            "containers": {"c": {
                "image": "alpine",
                "volumeMounts": [{"name": "data", "mountPath": "/data"}],
            }},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let err = t.deployment("c", &cfg.containers["c"]).unwrap_err();
        assert!(matches!(err, Error::NotSupported(field) if field == "volume_mounts"));
    }

    #[test]
    fn test_metadata_env_injected_once() {
        let cfg = cfg(serde_json::json!({
            "containers": {"c": {
                "image": "alpine",
                "environment": {"FLAG": "actf{test}"},
            }},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let dep = t.deployment("c", &cfg.containers["c"]).unwrap();
        let env = dep.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        assert_eq!(
            env.iter().filter(|e| e.name == METADATA_ENV).count(),
            1
        );
        assert!(env.iter().any(|e| e.name == "FLAG"));

        let meta: serde_json::Value = serde_json::from_str(
            env.iter()
                .find(|e| e.name == METADATA_ENV)
                .unwrap()
                .value
                .as_deref()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(meta["namespace"], "ci-web");
        assert_eq!(meta["container_name"], "c");
        assert!(meta.get("team_id").is_none());
    }

    #[test]
    fn test_metadata_env_not_overridden() {
        let cfg = cfg(serde_json::json!({
            "containers": {"c": {
                "image": "alpine",
                "env": [{"name": "INSTANCER_METADATA", "value": "custom"}],
            }},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let dep = t.deployment("c", &cfg.containers["c"]).unwrap();
        let env = dep.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let values: Vec<_> = env.iter().filter(|e| e.name == METADATA_ENV).collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value.as_deref(), Some("custom"));
    }

    #[test]
    fn test_env_list_wins_over_map() {
        let cfg = cfg(serde_json::json!({
            "containers": {"c": {
                "image": "alpine",
                "env": [{"name": "MODE", "value": "list"}],
                "environment": {"MODE": "map", "EXTRA": "1"},
            }},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let dep = t.deployment("c", &cfg.containers["c"]).unwrap();
        let env = dep.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let mode: Vec<_> = env.iter().filter(|e| e.name == "MODE").collect();
        assert_eq!(mode.len(), 1);
        assert_eq!(mode[0].value.as_deref(), Some("list"));
        assert!(env.iter().any(|e| e.name == "EXTRA"));
    }

    #[test]
    fn test_single_nodeport_service() {
        let cfg = cfg(serde_json::json!({
            "containers": {"web": {"image": "nginx", "ports": [80]}},
            "tcp": {"web": [80]},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let services = t.services("web", &cfg.containers["web"]);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].metadata.name.as_deref(), Some("web"));
        let spec = services[0].spec.as_ref().unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        let ports = spec.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(80)));
    }

    #[test]
    fn test_multi_service_split() {
        let cfg = cfg(serde_json::json!({
            "containers": {"web": {
                "image": "nginx",
                "ports": [80, 8080],
                "multiService": true,
            }},
            "tcp": {"web": [80]},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let services = t.services("web", &cfg.containers["web"]);
        assert_eq!(services.len(), 2);
        assert_eq!(
            services[0].metadata.name.as_deref(),
            Some("web-instancer-external")
        );
        assert_eq!(
            services[0].spec.as_ref().unwrap().type_.as_deref(),
            Some("NodePort")
        );
        assert_eq!(services[1].metadata.name.as_deref(), Some("web"));
        assert_eq!(
            services[1].spec.as_ref().unwrap().type_.as_deref(),
            Some("ClusterIP")
        );
        let private = services[1].spec.as_ref().unwrap().ports.as_ref().unwrap();
        assert_eq!(private.len(), 1);
        assert_eq!(private[0].port, 8080);
    }

    #[test]
    fn test_private_only_cluster_ip() {
        let cfg = cfg(serde_json::json!({
            "containers": {"db": {"image": "postgres", "ports": [5432]}},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let services = t.services("db", &cfg.containers["db"]);
        assert_eq!(services.len(), 1);
        assert_eq!(
            services[0].spec.as_ref().unwrap().type_.as_deref(),
            Some("ClusterIP")
        );
    }

    #[test]
    fn test_no_ports_no_services() {
        let cfg = cfg(serde_json::json!({
            "containers": {"bot": {"image": "bot"}},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        assert!(t.services("bot", &cfg.containers["bot"]).is_empty());
    }

    #[test]
    fn test_ingress_route() {
        let cfg = cfg(serde_json::json!({
            "containers": {"web": {"image": "nginx", "ports": [80]}},
            "http": {"web": [[80, "web.chall.example.com"]]},
        }));
        let mut routes = BTreeMap::new();
        routes.insert(
            "web".to_string(),
            vec![(80, "web.chall.example.com".to_string())],
        );
        let t = translator(&cfg, &routes);
        let ingress = t.ingress_route("web").unwrap().unwrap();
        assert_eq!(ingress.spec.entry_points, vec!["web", "websecure"]);
        assert_eq!(ingress.spec.routes.len(), 1);
        assert_eq!(
            ingress.spec.routes[0].match_rule,
            "Host(`web.chall.example.com`)"
        );
        assert_eq!(ingress.spec.routes[0].services[0].port, 80);
        let raw = &ingress.metadata.annotations.unwrap()[annotations::RAW_ROUTES];
        let decoded: Vec<HttpRoute> = serde_json::from_str(raw).unwrap();
        assert_eq!(decoded, vec![(80, "web.chall.example.com".to_string())]);
    }

    #[test]
    fn test_no_routes_no_ingress() {
        let cfg = cfg(serde_json::json!({
            "containers": {"web": {"image": "nginx", "ports": [80]}},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        assert!(t.ingress_route("web").unwrap().is_none());
    }

    #[test]
    fn test_network_policies() {
        let cfg = cfg(serde_json::json!({
            "containers": {"web": {"image": "nginx", "ports": [80]}},
            "tcp": {"web": [80]},
        }));
        let routes = BTreeMap::new();
        let t = translator(&cfg, &routes);
        let policies = t.network_policies();
        assert_eq!(policies.len(), 3);
        let names: Vec<_> = policies
            .iter()
            .map(|p| p.metadata.name.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["intrans", "ingress", "egress"]);

        let ingress = policies[1].spec.as_ref().unwrap();
        assert_eq!(
            ingress.pod_selector.as_ref().unwrap().match_labels.as_ref().unwrap()[labels::HAS_INGRESS],
            "true"
        );

        let egress = policies[2].spec.as_ref().unwrap();
        let block = egress.egress.as_ref().unwrap()[0].to.as_ref().unwrap()[0]
            .ip_block
            .as_ref()
            .unwrap();
        assert_eq!(block.cidr, "0.0.0.0/0");
        assert_eq!(
            block.except.as_ref().unwrap(),
            &vec![
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
                "169.254.0.0/16".to_string(),
            ]
        );
    }

    #[test]
    fn test_per_team_labels() {
        let cfg = cfg(serde_json::json!({
            "containers": {"c": {"image": "alpine", "ports": [1337]}},
            "tcp": {"c": [1337]},
        }));
        let routes = BTreeMap::new();
        let mut t = translator(&cfg, &routes);
        t.team_id = Some("a1b2c3d4-e5f6-7788-99aa-bbccddeeff00");
        let dep = t.deployment("c", &cfg.containers["c"]).unwrap();
        let labels_map = dep.metadata.labels.unwrap();
        assert_eq!(
            labels_map[labels::TEAM_ID],
            "a1b2c3d4-e5f6-7788-99aa-bbccddeeff00"
        );

        let env = dep.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let meta: serde_json::Value = serde_json::from_str(
            env.iter()
                .find(|e| e.name == METADATA_ENV)
                .unwrap()
                .value
                .as_deref()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(meta["team_id"], "a1b2c3d4-e5f6-7788-99aa-bbccddeeff00");
    }

    #[test]
    fn test_translation_deterministic() {
        let cfg = cfg(serde_json::json!({
            "containers": {
                "web": {"image": "nginx", "ports": [80, 8080], "multiService": true,
                         "environment": {"B": "2", "A": "1"}},
                "db": {"image": "postgres", "ports": [5432]},
            },
            "tcp": {"web": [80]},
            "http": {"web": [[8080, "web.chall.example.com"]]},
        }));
        let mut routes = BTreeMap::new();
        routes.insert(
            "web".to_string(),
            vec![(8080, "web.chall.example.com".to_string())],
        );
        let t = translator(&cfg, &routes);

        let render = || {
            let mut parts = Vec::new();
            for (name, spec) in &cfg.containers {
                parts.push(serde_json::to_string(&t.deployment(name, spec).unwrap()).unwrap());
                parts.push(serde_json::to_string(&t.services(name, spec)).unwrap());
                parts.push(serde_json::to_string(&t.ingress_route(name).unwrap()).unwrap());
            }
            parts.push(serde_json::to_string(&t.network_policies()).unwrap());
            parts.join("\n")
        };
        assert_eq!(render(), render());
    }
}
