//! Provisioning protocol: onboard fresh standby pods
//!
//! Entered after a completed scale-up (and after bootstrap, which leaves the
//! standby group unjoined on purpose). Waits for the tail pods to come up,
//! joins the tail primary as an empty member, and attaches its replicas.
//! Joins are short admin commands and run in-process; failures are retried
//! a bounded number of times before the cluster is parked as Failed.

use std::time::Duration;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{info, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::protocol::{ip_for_pod, topology_for, wait_for_membership};
use crate::controller::status::StatusManager;
use crate::controller::workload::{
    delete_job, get_job, get_pod, is_pod_ready, statefulset_replicas,
};
use crate::crd::RedisCluster;
use crate::redis::{NodeRole, TopologyClient};
use crate::resources::job::{bootstrap_job_name, reshard_job_name};
use crate::resources::{JobOutcome, job_outcome};

/// Join attempts before the protocol gives up.
const MAX_JOIN_RETRIES: i32 = 3;

/// Drive the ProvisioningStandby phase forward by one step.
pub async fn reconcile_provisioning(
    cluster: &RedisCluster,
    ctx: &Context,
    ns: &str,
) -> Result<Action> {
    let name = cluster.name_any();
    let status = StatusManager::new(cluster, ctx, ns);

    // Sweep terminal jobs left behind by the step that got us here.
    for job_name in [reshard_job_name(&name), bootstrap_job_name(&name)] {
        if let Some(job) = get_job(ctx, ns, &job_name).await?
            && job_outcome(&job) != JobOutcome::Running
        {
            delete_job(ctx, ns, &job_name).await?;
        }
    }

    // The replica set must have grown to include the new standby group.
    if !cluster.spec.existing_mode
        && cluster.spec.manage_replica_set
        && let Some((desired, _)) = statefulset_replicas(ctx, ns, &name).await?
        && desired != cluster.total_pods()
    {
        info!(desired, expected = cluster.total_pods(), "waiting for replica set resize");
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    // Every pod of the standby group has to be Running+Ready before joining.
    let standby_ordinal = cluster.standby_ordinal();
    for ordinal in standby_ordinal..standby_ordinal + cluster.group_size() {
        let pod_name = cluster.pod_name(ordinal);
        let Some(pod) = get_pod(ctx, ns, &pod_name).await? else {
            info!(pod = %pod_name, "standby pod not yet created");
            return Ok(Action::requeue(Duration::from_secs(5)));
        };
        if !is_pod_ready(&pod) {
            info!(pod = %pod_name, "standby pod not yet ready");
            return Ok(Action::requeue(Duration::from_secs(5)));
        }
    }

    let topology = topology_for(ctx, cluster, ns).await?;
    match join_standby_group(cluster, ctx, ns, &topology).await {
        Ok(JoinProgress::Complete) => {
            let standby = cluster.pod_name(standby_ordinal);
            status
                .complete_provisioning(&standby, cluster.spec.active_shards)
                .await?;
            ctx.publish_normal_event(
                cluster,
                "StandbyProvisioned",
                "Provision",
                Some(format!("standby {} joined with zero slots", standby)),
            )
            .await;
            info!(standby = %standby, "provisioning complete");
            Ok(Action::requeue(Duration::from_secs(1)))
        }
        Ok(JoinProgress::InProgress) => Ok(Action::requeue(Duration::from_secs(5))),
        Err(e) => {
            let retries = status.record_join_retry().await?;
            warn!(error = %e, retries, "standby join attempt failed");
            if retries >= MAX_JOIN_RETRIES {
                ctx.record_scale_failure("standby-join");
                ctx.publish_warning_event(
                    cluster,
                    "StandbyJoinFailed",
                    "Provision",
                    Some(format!("standby join failed after {} attempts: {}", retries, e)),
                )
                .await;
                status
                    .set_failed(
                        "StandbyJoin",
                        &format!("standby join failed after {} attempts: {}", retries, e),
                    )
                    .await?;
                return Ok(Action::requeue(Duration::from_secs(300)));
            }
            Ok(Action::requeue(Duration::from_secs(10)))
        }
    }
}

enum JoinProgress {
    /// Primary joined and every replica attached
    Complete,
    /// A join was issued this tick; membership not settled yet
    InProgress,
}

/// Join the tail primary and attach its replicas, one settled step per tick.
async fn join_standby_group(
    cluster: &RedisCluster,
    ctx: &Context,
    ns: &str,
    topology: &TopologyClient,
) -> Result<JoinProgress> {
    let standby_ordinal = cluster.standby_ordinal();
    let standby_pod = cluster.pod_name(standby_ordinal);

    let entry_ip = ip_for_pod(ctx, ns, &cluster.pod_name(0))
        .await?
        .ok_or_else(|| Error::ProtocolStepError {
            step: "StandbyJoin",
            message: "entrypoint pod has no IP".to_string(),
        })?;
    let standby_ip = ip_for_pod(ctx, ns, &standby_pod)
        .await?
        .ok_or_else(|| Error::ProtocolStepError {
            step: "StandbyJoin",
            message: format!("standby pod {} has no IP", standby_pod),
        })?;

    let nodes = topology.list_nodes().await?;
    let standby_node = match nodes.iter().find(|n| n.ip() == standby_ip) {
        Some(node) => node.clone(),
        None => {
            info!(standby = %standby_pod, "joining standby primary");
            topology
                .meet(&format!("{}:6379", standby_ip), &entry_ip)
                .await?;
            match wait_for_membership(topology, &standby_ip, 5).await? {
                Some(node) => node,
                None => return Ok(JoinProgress::InProgress),
            }
        }
    };

    for ordinal in standby_ordinal + 1..standby_ordinal + cluster.group_size() {
        let replica_pod = cluster.pod_name(ordinal);
        let replica_ip =
            ip_for_pod(ctx, ns, &replica_pod)
                .await?
                .ok_or_else(|| Error::ProtocolStepError {
                    step: "StandbyJoin",
                    message: format!("replica pod {} has no IP", replica_pod),
                })?;
        let replica_addr = format!("{}:6379", replica_ip);

        let existing = nodes.iter().find(|n| n.ip() == replica_ip);
        match existing {
            None => {
                info!(replica = %replica_pod, "joining standby replica");
                topology.meet(&replica_addr, &entry_ip).await?;
                if wait_for_membership(topology, &replica_ip, 5).await?.is_none() {
                    return Ok(JoinProgress::InProgress);
                }
                topology.replicate(&replica_addr, &standby_node.id).await?;
            }
            Some(node)
                if node.role != NodeRole::Replica
                    || node.primary_id.as_deref() != Some(standby_node.id.as_str()) =>
            {
                info!(replica = %replica_pod, "attaching replica to standby primary");
                topology.replicate(&replica_addr, &standby_node.id).await?;
            }
            Some(_) => {}
        }
    }

    Ok(JoinProgress::Complete)
}
