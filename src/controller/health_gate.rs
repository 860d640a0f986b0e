//! Pre-scaling health gate
//!
//! Every scaling decision is gated on the cluster being provably quiet:
//! cooldown elapsed, the full pod complement Running+Ready, the standby
//! identified and validated against the data plane, and no admin job in
//! flight. Any failing check yields a soft requeue with the reason recorded
//! as a status condition.

use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::protocol::topology_for;
use crate::controller::status::{StatusManager, cooldown_remaining};
use crate::controller::workload::{get_job, is_pod_ready, list_cluster_pods, pod_ip};
use crate::crd::RedisCluster;
use crate::redis::zero_slot_primaries;
use crate::resources::job::{bootstrap_job_name, drain_job_name, fix_job_name, reshard_job_name};
use crate::resources::{JobOutcome, job_outcome};

/// Outcome of the gate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// All preconditions hold; the validated standby pod name is attached
    /// so the probe can exclude it.
    Ready { standby: String },
    /// A precondition failed; the tick is abandoned with this reason.
    Blocked { reason: &'static str, message: String },
}

impl GateOutcome {
    fn blocked(reason: &'static str, message: impl Into<String>) -> Self {
        GateOutcome::Blocked {
            reason,
            message: message.into(),
        }
    }
}

/// Evaluate all scaling preconditions for a Stable-phase cluster.
pub async fn evaluate(ctx: &Context, cluster: &RedisCluster, ns: &str) -> Result<GateOutcome> {
    if let Some(remaining) = cooldown_remaining(cluster) {
        return Ok(GateOutcome::blocked(
            "CooldownActive",
            format!("cooldown remaining {}s", remaining),
        ));
    }

    if let Some(outcome) = check_pod_count(ctx, cluster, ns).await? {
        return Ok(outcome);
    }

    if let Some(outcome) = check_jobs(ctx, cluster, ns).await? {
        return Ok(outcome);
    }

    match check_standby(ctx, cluster, ns).await? {
        StandbyCheck::Confirmed(standby) => {
            debug!(standby = %standby, "health gate passed");
            Ok(GateOutcome::Ready { standby })
        }
        StandbyCheck::Updated(standby) => {
            // Persist the new identity and abandon the tick so the next
            // evaluation starts from a settled status (stabilization window).
            info!(standby = %standby, "standby identity changed, stabilizing");
            StatusManager::new(cluster, ctx, ns)
                .set_standby(&standby)
                .await?;
            Ok(GateOutcome::blocked(
                "StandbyUpdated",
                format!("standby reference updated to {}, stabilizing", standby),
            ))
        }
        StandbyCheck::Unresolved(message) => {
            Ok(GateOutcome::blocked("StandbyUnresolved", message))
        }
    }
}

/// Verify the full pod complement is Running and Ready.
async fn check_pod_count(
    ctx: &Context,
    cluster: &RedisCluster,
    ns: &str,
) -> Result<Option<GateOutcome>> {
    let expected = cluster.total_pods();
    let pods = list_cluster_pods(ctx, cluster, ns).await?;

    let running = pods
        .iter()
        .filter(|p| {
            p.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running")
        })
        .count() as i32;
    let ready = pods.iter().filter(|p| is_pod_ready(p)).count() as i32;

    if running != expected {
        return Ok(Some(GateOutcome::blocked(
            "PodCountMismatch",
            format!("expected {} running pods, found {}", expected, running),
        )));
    }
    if ready != expected {
        return Ok(Some(GateOutcome::blocked(
            "PodsNotReady",
            format!("expected {} ready pods, found {}", expected, ready),
        )));
    }
    Ok(None)
}

/// Verify no admin job is running or sitting failed.
async fn check_jobs(ctx: &Context, cluster: &RedisCluster, ns: &str) -> Result<Option<GateOutcome>> {
    let name = cluster.name_any();
    for job_name in [
        bootstrap_job_name(&name),
        fix_job_name(&name),
        reshard_job_name(&name),
        drain_job_name(&name),
    ] {
        let Some(job) = get_job(ctx, ns, &job_name).await? else {
            continue;
        };
        match job_outcome(&job) {
            JobOutcome::Running => {
                return Ok(Some(GateOutcome::blocked(
                    "JobInProgress",
                    format!("{} job in progress", job_name),
                )));
            }
            JobOutcome::Failed => {
                return Ok(Some(GateOutcome::blocked(
                    "JobRecentlyFailed",
                    format!("recent {} job failed, waiting for cleanup", job_name),
                )));
            }
            JobOutcome::Succeeded => {}
        }
    }
    Ok(None)
}

enum StandbyCheck {
    /// Matches the recorded identity and is Ready
    Confirmed(String),
    /// Data plane disagrees with the recorded identity
    Updated(String),
    /// Could not be determined this tick
    Unresolved(String),
}

/// Identify the standby and validate it against the data plane.
///
/// The index convention (`standby = last primary group`) is only the fast
/// path; the authoritative answer is the unique zero-slot primary in the
/// live membership table.
async fn check_standby(ctx: &Context, cluster: &RedisCluster, ns: &str) -> Result<StandbyCheck> {
    let topology = topology_for(ctx, cluster, ns).await?;
    let nodes = topology.list_nodes().await?;

    let zero_slot = zero_slot_primaries(&nodes);
    let [standby_node] = zero_slot.as_slice() else {
        return Ok(StandbyCheck::Unresolved(format!(
            "expected exactly one zero-slot primary, found {}",
            zero_slot.len()
        )));
    };

    // Map the node back to a pod by IP.
    let pods = list_cluster_pods(ctx, cluster, ns).await?;
    let Some(standby_pod) = pods
        .iter()
        .find(|p| pod_ip(p).as_deref() == Some(standby_node.ip()))
    else {
        return Ok(StandbyCheck::Unresolved(format!(
            "no pod found with standby IP {}",
            standby_node.ip()
        )));
    };

    if !is_pod_ready(standby_pod) {
        return Ok(StandbyCheck::Unresolved(format!(
            "standby pod {} not ready",
            standby_pod.name_any()
        )));
    }

    let detected = standby_pod.name_any();
    if !cluster.spec.existing_mode {
        let expected = cluster.pod_name(cluster.standby_ordinal());
        if detected != expected {
            debug!(
                detected = %detected,
                expected = %expected,
                "standby deviates from index convention"
            );
        }
    }

    let recorded = cluster
        .status
        .as_ref()
        .and_then(|s| s.standby_id.as_deref());
    if recorded == Some(detected.as_str()) {
        Ok(StandbyCheck::Confirmed(detected))
    } else {
        Ok(StandbyCheck::Updated(detected))
    }
}
