//! The reaper loop body.
//!
//! Every sweep stops the namespaces whose lease has expired, and at most once
//! per resync interval rebuilds the state index from cluster ground truth:
//! the namespace annotations are authoritative, the index is the cache.
//! The reaper never takes the per-namespace lock -- `stop` is idempotent, and
//! a renew racing the sweep either wins (the lease moves forward) or falls
//! into the create path.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams};
use owo_colors::OwoColorize;

use crate::{Error, Instancer, annotations, index, instance, unix_now};

/// Seconds between sweeps.
pub const SWEEP_SECS: u64 = 5;
/// Default minimum seconds between index resyncs.
pub const DEFAULT_RESYNC_SECS: i64 = 60;

/// One sweep: expire overdue namespaces, then resync if the interval is up.
pub async fn run_once(inst: &Instancer, resync_interval: i64) -> Result<(), Error> {
    let now = unix_now();

    for namespace in index::expired_before(&inst.redis, now).await? {
        println!(
            "{}",
            format!("⏰ Namespace {namespace} expired, reaping...").yellow()
        );
        instance::stop_namespace(inst, &namespace).await?;
    }

    let due = match index::last_resync(&inst.redis).await? {
        None => true,
        Some(last) => last + resync_interval <= now,
    };
    if due {
        resync(inst).await?;
        index::set_last_resync(&inst.redis, unix_now()).await?;
    }

    Ok(())
}

/// Rebuilds both sorted sets from the namespace annotations, in both
/// directions: upsert everything the cluster declares, drop index members the
/// cluster no longer backs.
async fn resync(inst: &Instancer) -> Result<(), Error> {
    let namespaces: Api<Namespace> = Api::all(inst.kube.clone());

    let mut expirations: BTreeMap<String, i64> = BTreeMap::new();
    let mut boot_times: BTreeMap<String, i64> = BTreeMap::new();
    for ns in namespaces.list(&ListParams::default()).await? {
        let Some(name) = ns.metadata.name else {
            continue;
        };
        let Some(anns) = ns.metadata.annotations else {
            continue;
        };
        if let Some(at) = anns
            .get(annotations::CHALL_EXPIRES)
            .and_then(|v| v.parse::<i64>().ok())
        {
            expirations.insert(name.clone(), at);
        }
        if let Some(at) = anns
            .get(annotations::CHALL_START_TIME)
            .and_then(|v| v.parse::<i64>().ok())
        {
            boot_times.insert(name.clone(), at);
        }
    }

    index::bulk_set(&inst.redis, index::EXPIRATION, &expirations).await?;
    index::bulk_set(&inst.redis, index::BOOT_TIME, &boot_times).await?;

    for member in index::members(&inst.redis, index::EXPIRATION).await? {
        if !expirations.contains_key(&member) {
            index::remove_from(&inst.redis, index::EXPIRATION, &member).await?;
        }
    }
    for member in index::members(&inst.redis, index::BOOT_TIME).await? {
        if !boot_times.contains_key(&member) {
            index::remove_from(&inst.redis, index::BOOT_TIME, &member).await?;
        }
    }

    Ok(())
}
