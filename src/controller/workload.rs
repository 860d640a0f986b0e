//! Kubernetes workload helpers shared by the reconciler and the protocols
//!
//! Thin wrappers over the pod, StatefulSet and Job APIs plus the server-side
//! apply helper every generated resource goes through.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PropagationPolicy};
use kube::{Api, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::Result;
use crate::crd::RedisCluster;
use crate::resources::pod_selector;

/// Apply a Kubernetes resource using server-side apply
pub async fn apply_resource<T>(ctx: &Context, ns: &str, resource: &T) -> Result<()>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + serde::Serialize
        + DeserializeOwned
        + Clone
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(ctx.client.clone(), ns);
    let name = resource.name_any();

    let patch = Patch::Apply(resource);
    let params = PatchParams::apply(FIELD_MANAGER).force();

    api.patch(&name, &params, &patch).await?;
    debug!("Applied resource: {}", name);

    Ok(())
}

/// List the cluster's data-plane pods by label selector
pub async fn list_cluster_pods(
    ctx: &Context,
    cluster: &RedisCluster,
    ns: &str,
) -> Result<Vec<Pod>> {
    let api: Api<Pod> = Api::namespaced(ctx.client.clone(), ns);
    let selector = pod_selector(cluster)
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");

    let pods = api.list(&ListParams::default().labels(&selector)).await?;
    Ok(pods.items)
}

/// Fetch a single pod, tolerating absence
pub async fn get_pod(ctx: &Context, ns: &str, name: &str) -> Result<Option<Pod>> {
    let api: Api<Pod> = Api::namespaced(ctx.client.clone(), ns);
    Ok(api.get_opt(name).await?)
}

/// Whether a pod is Running with every container ready
pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    match status.container_statuses.as_ref() {
        Some(statuses) if !statuses.is_empty() => statuses.iter().all(|cs| cs.ready),
        _ => false,
    }
}

/// IP assigned to a pod, once scheduled
pub fn pod_ip(pod: &Pod) -> Option<String> {
    pod.status.as_ref().and_then(|s| s.pod_ip.clone())
}

/// Desired and ready replica counts of the cluster's StatefulSet
pub async fn statefulset_replicas(
    ctx: &Context,
    ns: &str,
    name: &str,
) -> Result<Option<(i32, i32)>> {
    let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), ns);
    let Some(sts) = api.get_opt(name).await? else {
        return Ok(None);
    };

    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let ready = sts
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    Ok(Some((desired, ready)))
}

/// Fetch a Job, tolerating absence
pub async fn get_job(ctx: &Context, ns: &str, name: &str) -> Result<Option<Job>> {
    let api: Api<Job> = Api::namespaced(ctx.client.clone(), ns);
    Ok(api.get_opt(name).await?)
}

/// Create a Job. The builders set owner references, so cascading deletion
/// of the cluster terminates any in-flight task.
pub async fn create_job(ctx: &Context, ns: &str, job: &Job) -> Result<()> {
    let api: Api<Job> = Api::namespaced(ctx.client.clone(), ns);
    api.create(&Default::default(), job).await?;
    info!(job = %job.name_any(), "created admin job");
    Ok(())
}

/// Delete a Job with background propagation, tolerating absence
pub async fn delete_job(ctx: &Context, ns: &str, name: &str) -> Result<()> {
    let api: Api<Job> = Api::namespaced(ctx.client.clone(), ns);
    let params = DeleteParams {
        propagation_policy: Some(PropagationPolicy::Background),
        ..Default::default()
    };
    match api.delete(name, &params).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write the shard count into the spec.
///
/// Spec is always mutated before status: a crash between the two leaves the
/// replica set already reshaped and a status that converges next tick.
pub async fn set_active_shards(
    ctx: &Context,
    cluster: &RedisCluster,
    ns: &str,
    active_shards: i32,
) -> Result<()> {
    if cluster.spec.active_shards == active_shards {
        return Ok(());
    }

    let api: Api<RedisCluster> = Api::namespaced(ctx.client.clone(), ns);
    let patch = serde_json::json!({
        "spec": { "activeShards": active_shards }
    });
    api.patch(
        &cluster.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;

    info!(
        from = cluster.spec.active_shards,
        to = active_shards,
        "updated desired shard count"
    );
    Ok(())
}
