//! Scale-down protocol: drain one victim shard and rotate the standby
//!
//! Phase D1 empties the highest-index active shard into the low-memory
//! destinations through a drain Job. Phase D2 is the subtle part: slot
//! migration alone leaves membership entries pointing at the ordered
//! replica set's tail, and a plain StatefulSet shrink would orphan them as
//! phantom primaries that block every later cluster fix. The rotation
//! therefore excises both the drained group and the old standby group from
//! the membership table, resets the drained pods, shrinks the replica set,
//! and rejoins the drained group as the fresh standby.
//!
//! The rotation is idempotent: forget/reset/meet/replicate all tolerate
//! re-execution, so a crash anywhere re-runs it from the persisted drain Job.

use std::time::Duration;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{error, info, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::protocol::{
    HealthCheck, any_node_for_pod, ensure_cluster_healthy, ip_for_pod, primary_node_for_pod,
    restore_full_coverage, topology_for, wait_for_membership,
};
use crate::controller::status::StatusManager;
use crate::controller::workload::{create_job, delete_job, get_job, set_active_shards};
use crate::crd::RedisCluster;
use crate::redis::{NodeRole, TopologyClient};
use crate::resources::job::{DrainPlan, drain_job_name, generate_drain_job};
use crate::resources::{JobOutcome, job_outcome};

/// Witness fields of an in-flight scale-down.
struct DrainWitnesses {
    victim: String,
    dest_a: String,
    dest_b: Option<String>,
    old_standby: String,
}

/// Drive the ScalingDown phase forward by one step.
pub async fn reconcile_scaling_down(
    cluster: &RedisCluster,
    ctx: &Context,
    ns: &str,
) -> Result<Action> {
    let name = cluster.name_any();
    let status = StatusManager::new(cluster, ctx, ns);

    let witnesses = {
        let s = cluster.status.as_ref();
        let victim = s.and_then(|s| s.drain_victim_id.clone());
        let dest_a = s.and_then(|s| s.drain_dest_a.clone());
        let old_standby = s.and_then(|s| s.standby_id.clone());
        match (victim, dest_a, old_standby) {
            (Some(victim), Some(dest_a), Some(old_standby)) => DrainWitnesses {
                victim,
                dest_a,
                dest_b: s.and_then(|s| s.drain_dest_b.clone()),
                old_standby,
            },
            _ => {
                warn!("ScalingDown with incomplete witnesses, aborting protocol");
                status
                    .abort_protocol("DrainWitness", "scale-down state incomplete")
                    .await?;
                return Ok(Action::requeue(Duration::from_secs(1)));
            }
        }
    };

    // The decision engine never picks the standby, but the invariant is
    // cheap to re-check against a stale status.
    if witnesses.victim == witnesses.old_standby {
        warn!(victim = %witnesses.victim, "drain victim equals standby, aborting protocol");
        status
            .abort_protocol("DrainVictim", "drain victim equals the standby")
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let job_name = drain_job_name(&name);
    match get_job(ctx, ns, &job_name).await? {
        None => start_drain(cluster, ctx, ns, &witnesses).await,
        Some(job) => match job_outcome(&job) {
            JobOutcome::Running => {
                info!("drain job still running");
                Ok(Action::requeue(Duration::from_secs(15)))
            }
            JobOutcome::Failed => {
                error!("drain job failed, aborting scale-down");
                let topology = topology_for(ctx, cluster, ns).await?;
                restore_full_coverage(&topology).await;
                delete_job(ctx, ns, &job_name).await?;
                ctx.record_scale_failure("drain");
                ctx.publish_warning_event(
                    cluster,
                    "DrainFailed",
                    "ScaleDown",
                    Some(format!("drain of {} failed", witnesses.victim)),
                )
                .await;
                status
                    .abort_protocol("Drain", "drain job failed or timed out")
                    .await?;
                Ok(Action::requeue(Duration::from_secs(1)))
            }
            JobOutcome::Succeeded => {
                let topology = topology_for(ctx, cluster, ns).await?;
                restore_full_coverage(&topology).await;
                rotate_standby(cluster, ctx, ns, &topology, &witnesses).await
            }
        },
    }
}

/// Phase D1 preflight: health, ghost cleanup, destination resolution, and
/// the drain Job itself.
async fn start_drain(
    cluster: &RedisCluster,
    ctx: &Context,
    ns: &str,
    witnesses: &DrainWitnesses,
) -> Result<Action> {
    let status = StatusManager::new(cluster, ctx, ns);
    let topology = topology_for(ctx, cluster, ns).await?;

    match ensure_cluster_healthy(ctx, cluster, ns, &topology).await? {
        HealthCheck::Healthy => {}
        HealthCheck::Pending(action) => return Ok(action),
        HealthCheck::Failed(message) => {
            ctx.record_scale_failure("cluster-fix");
            status.abort_protocol("ClusterFix", &message).await?;
            return Ok(Action::requeue(Duration::from_secs(1)));
        }
    }

    // Membership entries for unreachable members block the migration paths;
    // drop them before planning.
    let forgotten = topology.forget_ghosts().await?;
    if forgotten > 0 {
        info!(forgotten, "cleaned up ghost nodes before drain");
    }

    let nodes = topology.list_nodes().await?;

    // The standby should still be empty. Unusual but not fatal here: the
    // rotation rebuilds it from scratch anyway.
    if let Some(standby_node) =
        primary_node_for_pod(ctx, ns, &witnesses.old_standby, &nodes).await?
        && standby_node.slot_count() != 0
    {
        warn!(
            standby = %witnesses.old_standby,
            slots = standby_node.slot_count(),
            "standby holds slots entering drain, continuing"
        );
    }

    // A victim already absent or empty means the drain completed on a prior
    // attempt; skip straight to rotation.
    let victim_node = primary_node_for_pod(ctx, ns, &witnesses.victim, &nodes).await?;
    let victim_slots = match victim_node {
        Some(node) if node.slot_count() > 0 => node.slot_count(),
        _ => {
            info!(victim = %witnesses.victim, "victim already drained, rotating standby");
            return rotate_standby(cluster, ctx, ns, &topology, witnesses).await;
        }
    };
    let victim_id = victim_node.map(|n| n.id.clone()).unwrap_or_default();

    let Some(dest_a_node) = primary_node_for_pod(ctx, ns, &witnesses.dest_a, &nodes).await? else {
        status
            .abort_protocol(
                "DrainDestinations",
                &format!("destination {} not found in membership table", witnesses.dest_a),
            )
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    };
    let dest_b_id = match &witnesses.dest_b {
        Some(dest_b) => match primary_node_for_pod(ctx, ns, dest_b, &nodes).await? {
            Some(node) => Some(node.id.clone()),
            None => {
                status
                    .abort_protocol(
                        "DrainDestinations",
                        &format!("destination {} not found in membership table", dest_b),
                    )
                    .await?;
                return Ok(Action::requeue(Duration::from_secs(1)));
            }
        },
        None => None,
    };

    let plan = DrainPlan::split(victim_id, dest_a_node.id.clone(), dest_b_id, victim_slots);
    info!(
        victim = %witnesses.victim,
        slots = victim_slots,
        dest_a = %witnesses.dest_a,
        dest_b = witnesses.dest_b.as_deref().unwrap_or("-"),
        "starting drain"
    );

    topology.set_full_coverage(&nodes, false).await?;
    create_job(ctx, ns, &generate_drain_job(cluster, ns, &plan)).await?;

    Ok(Action::requeue(Duration::from_secs(10)))
}

/// Phase D2: excise both standby groups from the membership table, reset the
/// drained pods, shrink the replica set, and rejoin the drained group empty.
async fn rotate_standby(
    cluster: &RedisCluster,
    ctx: &Context,
    ns: &str,
    topology: &TopologyClient,
    witnesses: &DrainWitnesses,
) -> Result<Action> {
    let name = cluster.name_any();
    let status = StatusManager::new(cluster, ctx, ns);

    // Ordinal ranges come from the witness pod names, not the spec: the
    // spec may already be decremented by a previous attempt at this step.
    let (Some(victim_ordinal), Some(old_standby_ordinal)) = (
        cluster.pod_ordinal(&witnesses.victim),
        cluster.pod_ordinal(&witnesses.old_standby),
    ) else {
        status
            .abort_protocol("Rotation", "cannot parse ordinals from witness pod names")
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    };
    let group = cluster.group_size();

    let nodes = topology.list_nodes().await?;

    // The drained pods are about to be wiped. That is only sound while they
    // hold no slots; anything else means data would be destroyed.
    if let Some(victim_node) = primary_node_for_pod(ctx, ns, &witnesses.victim, &nodes).await?
        && victim_node.slot_count() != 0
    {
        error!(
            victim = %witnesses.victim,
            slots = victim_node.slot_count(),
            "drained victim unexpectedly holds slots, refusing to reset it"
        );
        status
            .set_failed(
                "RotationPrecondition",
                &format!(
                    "victim {} holds {} slots after drain; manual intervention required",
                    witnesses.victim,
                    victim_node.slot_count()
                ),
            )
            .await?;
        return Ok(Action::requeue(Duration::from_secs(300)));
    }

    // Forget every pod of the new-standby (victim) and old-standby groups.
    for base in [victim_ordinal, old_standby_ordinal] {
        for ordinal in base..base + group {
            let pod = cluster.pod_name(ordinal);
            if let Some(node) = any_node_for_pod(ctx, ns, &pod, &nodes).await? {
                info!(pod = %pod, node_id = %node.id, "removing from membership table");
                topology.del_node(&node.id, &nodes).await?;
            }
        }
    }

    // Reset the drained group so its pods can rejoin with blank state.
    for ordinal in victim_ordinal..victim_ordinal + group {
        let pod = cluster.pod_name(ordinal);
        let Some(ip) = ip_for_pod(ctx, ns, &pod).await? else {
            warn!(pod = %pod, "pod unresolvable during reset, skipping");
            continue;
        };
        let addr = format!("{}:6379", ip);
        // Replicas refuse FLUSHALL while still attached; the hard reset
        // below detaches them, so a flush failure here is not terminal.
        if let Err(e) = topology.flush_all(&addr).await {
            warn!(pod = %pod, error = %e, "flush before reset failed");
        }
        topology.reset_hard(&addr).await?;
    }

    // Spec first: the shard count the data plane now shows. The StatefulSet
    // shrink that follows deletes the old standby's pods, which are by
    // construction the highest ordinals.
    let remaining = topology
        .list_nodes()
        .await?
        .iter()
        .filter(|n| n.role == NodeRole::Primary && n.is_healthy() && n.slot_count() > 0)
        .count() as i32;
    set_active_shards(ctx, cluster, ns, remaining).await?;

    // Rejoin the drained primary as the fresh standby, then its replicas.
    let entry_ip = rotation_entrypoint_ip(ctx, cluster, ns, witnesses).await?;
    let Some(victim_ip) = ip_for_pod(ctx, ns, &witnesses.victim).await? else {
        return Err(Error::ProtocolStepError {
            step: "Rotation",
            message: format!("victim pod {} has no IP", witnesses.victim),
        });
    };
    let victim_addr = format!("{}:6379", victim_ip);
    topology.meet(&victim_addr, &entry_ip).await?;
    let Some(new_standby_node) = wait_for_membership(topology, &victim_ip, 5).await? else {
        return Err(Error::ProtocolStepError {
            step: "Rotation",
            message: format!("{} did not rejoin the membership table", witnesses.victim),
        });
    };

    for ordinal in victim_ordinal + 1..victim_ordinal + group {
        let pod = cluster.pod_name(ordinal);
        let Some(replica_ip) = ip_for_pod(ctx, ns, &pod).await? else {
            warn!(pod = %pod, "standby replica unresolvable, skipping");
            continue;
        };
        let replica_addr = format!("{}:6379", replica_ip);
        topology.meet(&replica_addr, &entry_ip).await?;
        if wait_for_membership(topology, &replica_ip, 5).await?.is_none() {
            return Err(Error::ProtocolStepError {
                step: "Rotation",
                message: format!("{} did not rejoin the membership table", pod),
            });
        }
        topology.replicate(&replica_addr, &new_standby_node.id).await?;
    }

    status
        .complete_scale_down(&witnesses.victim, remaining)
        .await?;
    delete_job(ctx, ns, &drain_job_name(&name)).await?;
    ctx.record_drain_completed(ns, &name);
    ctx.publish_normal_event(
        cluster,
        "ScaleDownComplete",
        "ScaleDown",
        Some(format!(
            "{} drained and rotated to standby, cluster now has {} active shards",
            witnesses.victim, remaining
        )),
    )
    .await;

    info!(
        shards = remaining,
        new_standby = %witnesses.victim,
        "scale-down complete"
    );
    Ok(Action::requeue(Duration::from_secs(1)))
}

/// Entrypoint IP for the rotation meets. Pod 0 is never part of either
/// standby group, so it is always a settled member.
async fn rotation_entrypoint_ip(
    ctx: &Context,
    cluster: &RedisCluster,
    ns: &str,
    witnesses: &DrainWitnesses,
) -> Result<String> {
    let candidate = if cluster.spec.existing_mode {
        witnesses.dest_a.clone()
    } else {
        cluster.pod_name(0)
    };
    ip_for_pod(ctx, ns, &candidate)
        .await?
        .ok_or_else(|| Error::ProtocolStepError {
            step: "Rotation",
            message: format!("entrypoint pod {} has no IP", candidate),
        })
}
