//! The instance engine: start, renew, stop, and status of one namespaced
//! deployment.
//!
//! Start and renew run under the per-namespace Redis lock; the `Terminating`
//! phase and already-exists preconditions on the cluster cover the window a
//! lost lock could open. Rollback is best-effort -- the reaper is the safety
//! net for anything a crashed start leaves behind.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};

use crate::challenge::Challenge;
use crate::translate::{IngressRoute, Translator};
use crate::{Error, Instancer, annotations, index, labels, lock::Lock, unix_now};

/// Where an exposed container port can be reached from the outside: an
/// assigned NodePort, or a public hostname routed by the ingress controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Port(i32),
    Host(String),
}

/// Keys are `<container>:<port>`.
pub type PortMappings = BTreeMap<String, Endpoint>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatus {
    /// Lease expiration, UNIX seconds.
    pub expiration: i64,
    /// When the instance is expected to be reachable, UNIX seconds.
    pub start_timestamp: i64,
    pub port_mappings: PortMappings,
}

/// Starts a challenge instance, or renews its lease when the namespace
/// already exists. Serialized per namespace by the Redis lock; a busy lock
/// surfaces as [`Error::Unavailable`] so the caller can retry shortly.
pub async fn start(inst: &Instancer, chall: &Challenge) -> Result<(), Error> {
    let namespace = chall.namespace();
    let lock = match Lock::acquire(&inst.redis, &namespace, crate::lock::DEFAULT_LOCK_SECS).await {
        Ok(lock) => lock,
        Err(Error::AlreadyLocked(_)) => {
            return Err(Error::Unavailable(format!(
                "another deployment of {namespace} is in progress"
            )));
        }
        Err(e) => return Err(e),
    };
    let result = start_locked(inst, chall, &namespace).await;
    lock.release(&inst.redis).await;
    result
}

async fn start_locked(inst: &Instancer, chall: &Challenge, namespace: &str) -> Result<(), Error> {
    let namespaces: Api<Namespace> = Api::all(inst.kube.clone());
    let now = unix_now();
    let expires = now + chall.lifetime;

    match namespaces.get(namespace).await {
        Ok(current) => {
            let phase = current.status.as_ref().and_then(|s| s.phase.as_deref());
            if phase == Some("Terminating") {
                return Err(Error::Unavailable(format!(
                    "namespace {namespace} is terminating"
                )));
            }
            println!(
                "{}",
                format!("⏳ Renewing namespace {namespace}...").green()
            );
            let has_start_time = current
                .metadata
                .annotations
                .as_ref()
                .is_some_and(|a| a.contains_key(annotations::CHALL_START_TIME));

            let mut patched = BTreeMap::new();
            patched.insert(annotations::CHALL_EXPIRES, expires.to_string());
            if !has_start_time {
                // Legacy namespace without a first-boot record; backfill it.
                patched.insert(annotations::CHALL_START_TIME, now.to_string());
            }
            let patch = serde_json::json!({"metadata": {"annotations": patched}});
            namespaces
                .patch(namespace, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;

            index::set_score(&inst.redis, index::EXPIRATION, namespace, expires).await?;
            if !has_start_time {
                index::set_score(&inst.redis, index::BOOT_TIME, namespace, now).await?;
            }
            return Ok(());
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => return Err(e.into()),
    }

    println!("{}", format!("🌱 Making namespace {namespace}...").green());
    let http_routes = chall.start_http_routes();
    let translator = Translator {
        instance_id: &chall.id,
        namespace,
        team_id: chall.team_id(),
        started_at: now,
        cfg: &chall.cfg,
        http_routes: &http_routes,
    };

    let mut ns_annotations = BTreeMap::new();
    ns_annotations.insert(annotations::CHALL_EXPIRES.to_string(), expires.to_string());
    ns_annotations.insert(annotations::CHALL_START_TIME.to_string(), now.to_string());
    namespaces
        .create(
            &PostParams::default(),
            &Namespace {
                metadata: ObjectMeta {
                    name: Some(namespace.to_string()),
                    annotations: Some(ns_annotations),
                    labels: Some(translator.common_labels()),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await?;

    // From here on the namespace exists; any failure tears everything down.
    match populate(inst, &translator, chall, namespace, now, expires).await {
        Ok(()) => Ok(()),
        Err(e) => {
            rollback(inst, namespace).await;
            Err(e)
        }
    }
}

async fn populate(
    inst: &Instancer,
    translator: &Translator<'_>,
    chall: &Challenge,
    namespace: &str,
    now: i64,
    expires: i64,
) -> Result<(), Error> {
    let deployments: Api<Deployment> = Api::namespaced(inst.kube.clone(), namespace);
    for (name, spec) in &chall.cfg.containers {
        println!(
            "{}",
            format!("🌱 Making deployment {name} under namespace {namespace}...").green()
        );
        deployments
            .create(&PostParams::default(), &translator.deployment(name, spec)?)
            .await?;
    }

    let services: Api<Service> = Api::namespaced(inst.kube.clone(), namespace);
    for (name, spec) in &chall.cfg.containers {
        for service in translator.services(name, spec) {
            println!(
                "{}",
                format!(
                    "🌱 Making service {} under namespace {namespace}...",
                    service.metadata.name.as_deref().unwrap_or(name)
                )
                .green()
            );
            services.create(&PostParams::default(), &service).await?;
        }
    }

    let routes: Api<IngressRoute> = Api::namespaced(inst.kube.clone(), namespace);
    for name in chall.cfg.containers.keys() {
        if let Some(route) = translator.ingress_route(name)? {
            println!(
                "{}",
                format!("🌱 Making ingress {name} under namespace {namespace}...").green()
            );
            routes.create(&PostParams::default(), &route).await?;
        }
    }

    let policies: Api<NetworkPolicy> = Api::namespaced(inst.kube.clone(), namespace);
    for policy in translator.network_policies() {
        policies.create(&PostParams::default(), &policy).await?;
    }

    index::set_score(&inst.redis, index::EXPIRATION, namespace, expires).await?;
    index::set_score(&inst.redis, index::BOOT_TIME, namespace, now).await?;
    Ok(())
}

/// Deletes a half-built namespace and its index entries. Failures are logged
/// and swallowed; the reaper reconciles whatever is left.
async fn rollback(inst: &Instancer, namespace: &str) {
    eprintln!(
        "{}",
        format!("🔥 Rolling back namespace {namespace}...").red()
    );
    let namespaces: Api<Namespace> = Api::all(inst.kube.clone());
    match namespaces.delete(namespace, &delete_now()).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => tracing::warn!("rollback could not delete namespace {namespace}: {e}"),
    }
    if let Err(e) = index::remove(&inst.redis, namespace).await {
        tracing::warn!("rollback could not clean index for {namespace}: {e}");
    }
}

fn delete_now() -> DeleteParams {
    DeleteParams {
        grace_period_seconds: Some(0),
        ..Default::default()
    }
}

/// Stops whatever instance lives in `namespace`. Deleting the namespace
/// cascades to every child object; a namespace that is already gone is not
/// an error. Index entries and the port-mapping snapshot go unconditionally.
pub async fn stop_namespace(inst: &Instancer, namespace: &str) -> Result<(), Error> {
    println!(
        "{}",
        format!("🗑️ Deleting namespace {namespace}...").green()
    );
    let namespaces: Api<Namespace> = Api::all(inst.kube.clone());
    match namespaces.delete(namespace, &delete_now()).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => {
            tracing::warn!("could not delete namespace {namespace}: {e}");
        }
    }

    index::remove(&inst.redis, namespace).await?;
    index::cache_del(&inst.redis, &[format!("ports:{namespace}")]).await?;
    Ok(())
}

/// Returns the instance status, or None when no deployment is indexed for
/// the challenge's namespace.
pub async fn deployment_status(
    inst: &Instancer,
    chall: &Challenge,
) -> Result<Option<DeploymentStatus>, Error> {
    let namespace = chall.namespace();
    let Some(expiration) = index::score_of(&inst.redis, index::EXPIRATION, &namespace).await?
    else {
        return Ok(None);
    };
    // Namespaces predating the boot_time set fall back to 1 so the boot
    // delay reads as already elapsed.
    let booted = index::score_of(&inst.redis, index::BOOT_TIME, &namespace)
        .await?
        .unwrap_or(1);

    let port_mappings = port_mappings(inst, &namespace, expiration).await?;
    Ok(Some(DeploymentStatus {
        expiration,
        start_timestamp: booted + chall.boot_time,
        port_mappings,
    }))
}

/// Mapping from `<container>:<port>` to the externally reachable endpoint.
/// Served from the `ports:<namespace>` snapshot when present, otherwise
/// recomputed from the live services and ingress routes and cached until the
/// lease expires.
async fn port_mappings(
    inst: &Instancer,
    namespace: &str,
    expiration: i64,
) -> Result<PortMappings, Error> {
    let cache_key = format!("ports:{namespace}");
    if let Some(cached) = index::cache_get(&inst.redis, &cache_key).await? {
        return Ok(serde_json::from_str(&cached)?);
    }

    let mut out = PortMappings::new();

    let services: Api<Service> = Api::namespaced(inst.kube.clone(), namespace);
    for service in services.list(&ListParams::default()).await? {
        let Some(spec) = &service.spec else { continue };
        if spec.type_.as_deref() != Some("NodePort") {
            continue;
        }
        // The NodePort service of a multi-service container carries the
        // reserved suffix; the container-name label is authoritative.
        let Some(container) = service
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::CONTAINER_NAME))
            .cloned()
            .or_else(|| service.metadata.name.clone())
        else {
            continue;
        };
        for port in spec.ports.iter().flatten() {
            if let Some(node_port) = port.node_port {
                out.insert(
                    format!("{container}:{}", port.port),
                    Endpoint::Port(node_port),
                );
            }
        }
    }

    let routes: Api<IngressRoute> = Api::namespaced(inst.kube.clone(), namespace);
    for route in routes.list(&ListParams::default()).await? {
        let Some(name) = route.metadata.name.clone() else {
            continue;
        };
        let Some(raw) = route
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotations::RAW_ROUTES))
        else {
            continue;
        };
        let decoded: Vec<(i32, String)> = serde_json::from_str(raw)?;
        for (port, host) in decoded {
            out.insert(format!("{name}:{port}"), Endpoint::Host(host));
        }
    }

    let ttl = expiration - unix_now();
    if !out.is_empty() && ttl > 0 {
        index::cache_set_for(
            &inst.redis,
            &cache_key,
            &serde_json::to_string(&out)?,
            ttl as u64,
        )
        .await?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_roundtrip() {
        let mut mappings = PortMappings::new();
        mappings.insert("web:80".to_string(), Endpoint::Port(30712));
        mappings.insert(
            "web:8080".to_string(),
            Endpoint::Host("web-x7f3a.chall.example.com".to_string()),
        );
        let encoded = serde_json::to_string(&mappings).unwrap();
        let decoded: PortMappings = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, mappings);
        assert_eq!(decoded["web:80"], Endpoint::Port(30712));
    }

    #[test]
    fn test_endpoint_json_shape() {
        assert_eq!(serde_json::to_string(&Endpoint::Port(30712)).unwrap(), "30712");
        assert_eq!(
            serde_json::to_string(&Endpoint::Host("a.b".into())).unwrap(),
            "\"a.b\""
        );
    }
}
