//! Scale-up protocol: activate the standby
//!
//! Moves half of the overloaded shard's hash slots into the pre-warmed
//! standby, which collapses scale-up latency to the duration of one slot
//! migration. The migration itself runs as a one-shot Job so no worker is
//! held while data moves; the controller plans it in-process (node ids,
//! slot counts) and observes the Job across ticks.
//!
//! Re-entry after a controller restart is driven entirely by the persisted
//! Job: a succeeded Job short-circuits to finalization, while a slot-holding
//! standby with no Job in sight is an invariant violation that parks the
//! cluster for operator inspection.

use std::time::Duration;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{error, info, warn};

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::protocol::{
    HealthCheck, ensure_cluster_healthy, primary_node_for_pod, restore_full_coverage, topology_for,
};
use crate::controller::status::StatusManager;
use crate::controller::workload::{
    create_job, delete_job, get_job, set_active_shards, statefulset_replicas,
};
use crate::crd::RedisCluster;
use crate::redis::NodeRole;
use crate::resources::job::{generate_reshard_job, reshard_job_name};
use crate::resources::{JobOutcome, job_outcome};

/// Drive the ScalingUp phase forward by one step.
pub async fn reconcile_scaling_up(
    cluster: &RedisCluster,
    ctx: &Context,
    ns: &str,
) -> Result<Action> {
    let name = cluster.name_any();
    let status = StatusManager::new(cluster, ctx, ns);

    let overloaded = cluster
        .status
        .as_ref()
        .and_then(|s| s.overloaded_id.clone());
    let standby = cluster.status.as_ref().and_then(|s| s.standby_id.clone());
    let (Some(overloaded), Some(standby)) = (overloaded, standby) else {
        warn!("ScalingUp with incomplete witnesses, aborting protocol");
        status
            .abort_protocol("ScaleUpWitness", "scale-up state incomplete")
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    };

    // All pods must be serving before slots move.
    if let Some((desired, ready)) = statefulset_replicas(ctx, ns, &name).await?
        && (desired != cluster.total_pods() || ready != desired)
    {
        info!(desired, ready, "waiting for replica set before reshard");
        return Ok(Action::requeue(Duration::from_secs(10)));
    }

    let job_name = reshard_job_name(&name);
    match get_job(ctx, ns, &job_name).await? {
        None => start_reshard(cluster, ctx, ns, &overloaded, &standby).await,
        Some(job) => match job_outcome(&job) {
            JobOutcome::Running => {
                info!("reshard job still running");
                Ok(Action::requeue(Duration::from_secs(15)))
            }
            JobOutcome::Failed => {
                error!("reshard job failed, aborting scale-up");
                let topology = topology_for(ctx, cluster, ns).await?;
                restore_full_coverage(&topology).await;
                delete_job(ctx, ns, &job_name).await?;
                ctx.record_scale_failure("reshard");
                ctx.publish_warning_event(
                    cluster,
                    "ReshardFailed",
                    "ScaleUp",
                    Some(format!("reshard from {} to {} failed", overloaded, standby)),
                )
                .await;
                status
                    .abort_protocol("Reshard", "reshard job failed or timed out")
                    .await?;
                Ok(Action::requeue(Duration::from_secs(1)))
            }
            JobOutcome::Succeeded => finalize_scale_up(cluster, ctx, ns, &standby).await,
        },
    }
}

/// Preflight checks and reshard Job creation.
async fn start_reshard(
    cluster: &RedisCluster,
    ctx: &Context,
    ns: &str,
    overloaded: &str,
    standby: &str,
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

    let nodes = topology.list_nodes().await?;

    // The standby must still hold zero slots. With no reshard Job present
    // this cannot be a crash-recovery artifact: something else moved slots
    // onto the standby, and resharding into it would destroy that data.
    let Some(standby_node) = primary_node_for_pod(ctx, ns, standby, &nodes).await? else {
        status
            .abort_protocol(
                "StandbyResolve",
                &format!("standby {} not found in membership table", standby),
            )
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    };
    if standby_node.slot_count() != 0 {
        error!(
            standby = %standby,
            slots = standby_node.slot_count(),
            "standby holds slots outside any protocol"
        );
        ctx.publish_warning_event(
            cluster,
            "StandbyNotEmpty",
            "ScaleUp",
            Some(format!(
                "standby {} holds {} slots, expected 0",
                standby,
                standby_node.slot_count()
            )),
        )
        .await;
        status
            .set_failed(
                "StandbyVerification",
                &format!(
                    "standby {} holds {} slots; manual intervention required",
                    standby,
                    standby_node.slot_count()
                ),
            )
            .await?;
        return Ok(Action::requeue(Duration::from_secs(300)));
    }

    let Some(overloaded_node) = primary_node_for_pod(ctx, ns, overloaded, &nodes).await? else {
        status
            .abort_protocol(
                "OverloadedResolve",
                &format!("overloaded shard {} not found in membership table", overloaded),
            )
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    };

    let total = overloaded_node.slot_count();
    let slots_to_move = total / 2;
    if slots_to_move == 0 {
        // A one-slot shard cannot be split; exit the protocol cleanly.
        info!(overloaded = %overloaded, total, "nothing to move, exiting scale-up");
        status
            .abort_protocol(
                "NoSlotsToMove",
                &format!("overloaded shard {} holds {} slots, nothing to split", overloaded, total),
            )
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    info!(
        from = %overloaded,
        to = %standby,
        slots = slots_to_move,
        total,
        "starting slot migration into standby"
    );

    // Relax the full-coverage guard while slots are in flight.
    topology.set_full_coverage(&nodes, false).await?;

    let job = generate_reshard_job(
        cluster,
        ns,
        &overloaded_node.id,
        &standby_node.id,
        slots_to_move,
    );
    create_job(ctx, ns, &job).await?;

    Ok(Action::requeue(Duration::from_secs(10)))
}

/// Reshard done: restore coverage, grow the spec, hand over to provisioning.
async fn finalize_scale_up(
    cluster: &RedisCluster,
    ctx: &Context,
    ns: &str,
    standby: &str,
) -> Result<Action> {
    let name = cluster.name_any();
    let status = StatusManager::new(cluster, ctx, ns);
    let topology = topology_for(ctx, cluster, ns).await?;

    restore_full_coverage(&topology).await;

    // The new shard count is what the data plane now shows: every healthy
    // primary holding slots. Deriving it (instead of incrementing) makes
    // re-entry after a crash between the spec and status writes a no-op.
    let nodes = topology.list_nodes().await?;
    let active = nodes
        .iter()
        .filter(|n| n.role == NodeRole::Primary && n.is_healthy() && n.slot_count() > 0)
        .count() as i32;

    if active != cluster.spec.active_shards + 1 {
        warn!(
            observed = active,
            expected = cluster.spec.active_shards + 1,
            "slot-holding primary count differs from expected after reshard"
        );
    }

    // Spec first, then status: the replica set grows by one standby group.
    set_active_shards(ctx, cluster, ns, active).await?;
    status.set_provisioning_standby().await?;

    delete_job(ctx, ns, &reshard_job_name(&name)).await?;
    ctx.record_reshard_completed(ns, &name);
    ctx.publish_normal_event(
        cluster,
        "StandbyActivated",
        "ScaleUp",
        Some(format!(
            "standby {} activated, cluster now has {} active shards",
            standby, active
        )),
    )
    .await;

    info!(shards = active, "scale-up complete, provisioning next standby");
    Ok(Action::requeue(Duration::from_secs(5)))
}
