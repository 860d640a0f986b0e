//! Helpers shared by the scaling protocols
//!
//! Topology-client construction, pod-to-node resolution, and the fix-job
//! health precheck that both scale directions run before touching slots.

use std::time::Duration;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{info, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::workload::{
    create_job, delete_job, get_job, get_pod, is_pod_ready, list_cluster_pods, pod_ip,
};
use crate::crd::RedisCluster;
use crate::redis::{NodeInfo, TopologyClient, primary_by_ip};
use crate::resources::job::{fix_job_name, generate_fix_job};
use crate::resources::{JobOutcome, job_outcome};

/// Build the topology client for a cluster.
///
/// Managed deployments are reached through the stable DNS name of pod 0;
/// externally-managed deployments have no known naming convention, so any
/// running selector-matched pod serves as the entrypoint.
pub async fn topology_for(
    ctx: &Context,
    cluster: &RedisCluster,
    ns: &str,
) -> Result<TopologyClient> {
    if cluster.spec.existing_mode {
        let ip = any_ready_pod_ip(ctx, cluster, ns).await?;
        return Ok(TopologyClient::new(format!("{}:6379", ip)));
    }

    let pod = cluster.pod_name(0);
    Ok(TopologyClient::new(format!(
        "{}:6379",
        cluster.pod_fqdn(&pod, ns)
    )))
}

/// IP of any Running+Ready data-plane pod.
pub async fn any_ready_pod_ip(ctx: &Context, cluster: &RedisCluster, ns: &str) -> Result<String> {
    let pods = list_cluster_pods(ctx, cluster, ns).await?;
    pods.iter()
        .find(|p| is_pod_ready(p))
        .and_then(pod_ip)
        .ok_or_else(|| Error::PreconditionError("no ready data-plane pod found".to_string()))
}

/// IP of a specific pod, if it exists and is scheduled.
pub async fn ip_for_pod(ctx: &Context, ns: &str, pod_name: &str) -> Result<Option<String>> {
    Ok(get_pod(ctx, ns, pod_name).await?.as_ref().and_then(pod_ip))
}

/// Resolve a pod name to its healthy-primary membership entry, if any.
pub async fn primary_node_for_pod<'a>(
    ctx: &Context,
    ns: &str,
    pod_name: &str,
    nodes: &'a [NodeInfo],
) -> Result<Option<&'a NodeInfo>> {
    let Some(ip) = ip_for_pod(ctx, ns, pod_name).await? else {
        return Ok(None);
    };
    Ok(primary_by_ip(nodes, &ip))
}

/// Resolve a pod name to its membership entry regardless of role or health.
pub async fn any_node_for_pod<'a>(
    ctx: &Context,
    ns: &str,
    pod_name: &str,
    nodes: &'a [NodeInfo],
) -> Result<Option<&'a NodeInfo>> {
    let Some(ip) = ip_for_pod(ctx, ns, pod_name).await? else {
        return Ok(None);
    };
    Ok(nodes.iter().find(|n| n.ip() == ip))
}

/// Outcome of the health precheck that opens every protocol.
pub enum HealthCheck {
    /// `cluster_state:ok`, proceed
    Healthy,
    /// A fix job is running (or was just created); come back later
    Pending(Action),
    /// Fix ran and the cluster is still unhealthy
    Failed(String),
}

/// Ensure `cluster_state:ok`, running the fix job at most once.
///
/// A healthy cluster skips the fix entirely. An unhealthy one gets one fix
/// job; if the state is still not ok afterwards the protocol fails and the
/// state machine falls back to Stable under cooldown.
pub async fn ensure_cluster_healthy(
    ctx: &Context,
    cluster: &RedisCluster,
    ns: &str,
    topology: &TopologyClient,
) -> Result<HealthCheck> {
    let name = cluster.name_any();
    let fix_name = fix_job_name(&name);

    match get_job(ctx, ns, &fix_name).await? {
        None => {
            if topology.health().await? {
                return Ok(HealthCheck::Healthy);
            }
            info!("cluster state not ok, scheduling fix job");
            create_job(ctx, ns, &generate_fix_job(cluster, ns)).await?;
            Ok(HealthCheck::Pending(Action::requeue(Duration::from_secs(
                10,
            ))))
        }
        Some(job) => match job_outcome(&job) {
            JobOutcome::Running => Ok(HealthCheck::Pending(Action::requeue(Duration::from_secs(
                10,
            )))),
            JobOutcome::Succeeded => {
                delete_job(ctx, ns, &fix_name).await?;
                if topology.health().await? {
                    Ok(HealthCheck::Healthy)
                } else {
                    Ok(HealthCheck::Failed(
                        "cluster state still not ok after fix".to_string(),
                    ))
                }
            }
            JobOutcome::Failed => {
                delete_job(ctx, ns, &fix_name).await?;
                Ok(HealthCheck::Failed("cluster fix job failed".to_string()))
            }
        },
    }
}

/// Re-enable the full-coverage requirement after a migration, best-effort.
pub async fn restore_full_coverage(topology: &TopologyClient) {
    match topology.list_nodes().await {
        Ok(nodes) => {
            if let Err(e) = topology.set_full_coverage(&nodes, true).await {
                warn!(error = %e, "failed to re-enable full coverage");
            }
        }
        Err(e) => warn!(error = %e, "failed to list nodes while restoring full coverage"),
    }
}

/// Poll the membership table until a node with the given IP appears.
///
/// The gossip handshake after MEET completes within a couple of seconds;
/// the wait is bounded so a tick can never hang on it.
pub async fn wait_for_membership(
    topology: &TopologyClient,
    ip: &str,
    attempts: u32,
) -> Result<Option<NodeInfo>> {
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let nodes = topology.list_nodes().await?;
        if let Some(node) = nodes.iter().find(|n| n.ip() == ip) {
            return Ok(Some(node.clone()));
        }
    }
    Ok(None)
}
