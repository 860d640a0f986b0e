//! Scaling decision logic
//!
//! Pure translation of shard load samples and spec thresholds into a scaling
//! verdict. No I/O happens here; the health gate has already established that
//! the samples are trustworthy and the cluster is safe to reshape.

use crate::controller::metrics_probe::ShardLoad;
use crate::crd::RedisCluster;

/// How many simultaneously underutilized primaries a shrink requires.
/// A single cold shard is deliberately not enough: one quiet pod in an
/// otherwise busy cluster would oscillate the topology.
pub const MIN_UNDERUTILIZED_FOR_SHRINK: usize = 2;

/// Outcome of evaluating one round of samples.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// All shards within thresholds
    None,
    /// Activate the standby by relieving the trigger shard
    Grow { trigger: String, reason: String },
    /// Drain the victim into the destination shard(s)
    Shrink {
        victim: String,
        dest_a: String,
        dest_b: Option<String>,
        reason: String,
    },
}

/// Evaluate samples against the spec thresholds.
pub fn decide(cluster: &RedisCluster, loads: &[ShardLoad]) -> Verdict {
    if let Some((trigger, reason)) = check_grow(cluster, loads) {
        return Verdict::Grow { trigger, reason };
    }
    if let Some(verdict) = check_shrink(cluster, loads) {
        return verdict;
    }
    Verdict::None
}

/// Grow when any shard exceeds either threshold. Among exceeding shards the
/// trigger is the one with the highest memory: for an in-memory store memory
/// is the signal that runs out first, so it wins ties against CPU.
fn check_grow(cluster: &RedisCluster, loads: &[ShardLoad]) -> Option<(String, String)> {
    let cpu_high = f64::from(cluster.spec.cpu_high);
    let mem_high = f64::from(cluster.spec.mem_high);

    let trigger = loads
        .iter()
        .filter(|l| l.cpu_pct > cpu_high || l.mem_pct > mem_high)
        .max_by(|a, b| a.mem_pct.total_cmp(&b.mem_pct))?;

    let reason = if trigger.cpu_pct > cpu_high && trigger.mem_pct > mem_high {
        format!(
            "CPU and Memory overloaded (CPU: {:.2}%, Memory: {:.2}%)",
            trigger.cpu_pct, trigger.mem_pct
        )
    } else if trigger.cpu_pct > cpu_high {
        format!(
            "CPU overloaded (CPU: {:.2}%, Memory: {:.2}%)",
            trigger.cpu_pct, trigger.mem_pct
        )
    } else {
        format!(
            "Memory overloaded (CPU: {:.2}%, Memory: {:.2}%)",
            trigger.cpu_pct, trigger.mem_pct
        )
    };

    Some((trigger.pod.clone(), reason))
}

/// Shrink when the cluster is above its floor and at least
/// `MIN_UNDERUTILIZED_FOR_SHRINK` primaries sit below both low thresholds.
fn check_shrink(cluster: &RedisCluster, loads: &[ShardLoad]) -> Option<Verdict> {
    if cluster.spec.active_shards <= cluster.spec.min_shards {
        return None;
    }

    let cpu_low = f64::from(cluster.spec.cpu_low);
    let mem_low = f64::from(cluster.spec.mem_low);

    let underutilized = loads
        .iter()
        .filter(|l| l.cpu_pct < cpu_low && l.mem_pct < mem_low)
        .count();
    if underutilized < MIN_UNDERUTILIZED_FOR_SHRINK {
        return None;
    }

    // The victim is always the highest-index active primary: StatefulSet
    // shrink removes the tail, so any other choice would fragment the
    // ordered replica set.
    let victim = cluster.pod_name(cluster.highest_active_ordinal());

    // Destinations are the two lowest-memory primaries. Samples include only
    // primaries with complete data, but verify the ordinal position anyway
    // in case a replica leaked into the metric labels.
    let mut primaries: Vec<&ShardLoad> = loads
        .iter()
        .filter(|l| {
            cluster
                .pod_ordinal(&l.pod)
                .is_some_and(|o| cluster.is_primary_ordinal(o))
        })
        .collect();
    if primaries.len() < 2 {
        return None;
    }
    primaries.sort_by(|a, b| a.mem_pct.total_cmp(&b.mem_pct));

    let lowest_a = &primaries[0].pod;
    let lowest_b = &primaries[1].pod;

    let (dest_a, dest_b) = if victim != *lowest_a && victim != *lowest_b {
        (lowest_a.clone(), Some(lowest_b.clone()))
    } else if victim == *lowest_a {
        // The victim is itself a low-memory candidate: all its slots go to
        // the other one.
        (lowest_b.clone(), None)
    } else {
        (lowest_a.clone(), None)
    };

    let reason = format!(
        "Scale-down triggered: {} underutilized shards (CPU < {:.0}%, Memory < {:.0}%)",
        underutilized, cpu_low, mem_low
    );

    Some(Verdict::Shrink {
        victim,
        dest_a,
        dest_b,
        reason,
    })
}
