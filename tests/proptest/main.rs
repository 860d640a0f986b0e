//! Property-based tests for spec validation and the decision engine
//!
//! These tests use proptest to generate random configurations and verify that:
//! 1. Validation never panics, it only accepts or rejects
//! 2. Accepted specs always satisfy the threshold and floor invariants
//! 3. The decision engine is deterministic and respects the shrink rules
//! 4. The slot split of a drain plan always covers the victim exactly

use std::collections::BTreeMap;

use proptest::prelude::*;

use kube::core::ObjectMeta;

use redis_operator::controller::decision::{MIN_UNDERUTILIZED_FOR_SHRINK, Verdict, decide};
use redis_operator::controller::metrics_probe::ShardLoad;
use redis_operator::controller::validation::validate_spec;
use redis_operator::crd::{RedisCluster, RedisClusterSpec};
use redis_operator::resources::job::DrainPlan;

fn make_cluster(spec: RedisClusterSpec) -> RedisCluster {
    RedisCluster {
        metadata: ObjectMeta {
            name: Some("cache".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Arbitrary spec, valid or not
fn any_spec() -> impl Strategy<Value = RedisClusterSpec> {
    (
        -2..20i32,    // active_shards
        0..10i32,     // min_shards
        -1..4i32,     // replicas_per_shard
        (-10..120i32, -10..120i32), // cpu thresholds
        (-10..120i32, -10..120i32), // mem thresholds
        -5..600i32,   // cooldown
    )
        .prop_map(
            |(active_shards, min_shards, replicas_per_shard, (cpu_high, cpu_low), (mem_high, mem_low), cooldown_seconds)| {
                RedisClusterSpec {
                    active_shards,
                    min_shards,
                    replicas_per_shard,
                    redis_version: "7.2".to_string(),
                    auto_scale: true,
                    cpu_high,
                    cpu_low,
                    mem_high,
                    mem_low,
                    cooldown_seconds,
                    task_timeout_seconds: 600,
                    poll_interval_seconds: 15,
                    metrics_endpoint: "http://prometheus:9090".to_string(),
                    existing_mode: false,
                    selector: BTreeMap::new(),
                    service_name: None,
                    manage_replica_set: true,
                }
            },
        )
}

/// A spec that always validates
fn valid_spec() -> impl Strategy<Value = RedisClusterSpec> {
    (3..12i32, 0..3i32).prop_flat_map(|(min_shards, replicas_per_shard)| {
        (min_shards..24i32).prop_map(move |active_shards| RedisClusterSpec {
            active_shards,
            min_shards,
            replicas_per_shard,
            redis_version: "7.2".to_string(),
            auto_scale: true,
            cpu_high: 70,
            cpu_low: 20,
            mem_high: 70,
            mem_low: 30,
            cooldown_seconds: 60,
            task_timeout_seconds: 600,
            poll_interval_seconds: 15,
            metrics_endpoint: "http://prometheus:9090".to_string(),
            existing_mode: false,
            selector: BTreeMap::new(),
            service_name: None,
            manage_replica_set: true,
        })
    })
}

/// Load samples for every active primary of the cluster
fn loads_for(cluster: &RedisCluster) -> impl Strategy<Value = Vec<ShardLoad>> + use<> {
    let group = 1 + cluster.spec.replicas_per_shard;
    let pods: Vec<String> = (0..cluster.spec.active_shards)
        .map(|i| format!("cache-{}", i * group))
        .collect();

    pods.into_iter()
        .map(|pod| {
            (0.0..120.0f64, 0.0..120.0f64).prop_map(move |(cpu_pct, mem_pct)| ShardLoad {
                pod: pod.clone(),
                cpu_pct,
                mem_pct,
            })
        })
        .collect::<Vec<_>>()
}

proptest! {
    #[test]
    fn validation_never_panics(spec in any_spec()) {
        let _ = validate_spec(&make_cluster(spec));
    }

    #[test]
    fn accepted_specs_hold_invariants(spec in any_spec()) {
        let cluster = make_cluster(spec);
        if validate_spec(&cluster).is_ok() {
            prop_assert!(cluster.spec.cpu_high > cluster.spec.cpu_low);
            prop_assert!(cluster.spec.mem_high > cluster.spec.mem_low);
            prop_assert!(cluster.spec.active_shards >= cluster.spec.min_shards);
            prop_assert!(cluster.spec.min_shards >= 3);
            prop_assert!(cluster.spec.cooldown_seconds > 0);
        }
    }

    #[test]
    fn decision_is_deterministic(spec in valid_spec()) {
        let cluster = make_cluster(spec);
        let loads: Vec<ShardLoad> = (0..cluster.spec.active_shards)
            .map(|i| ShardLoad {
                pod: format!("cache-{}", i * (1 + cluster.spec.replicas_per_shard)),
                cpu_pct: f64::from(i) * 7.0 % 100.0,
                mem_pct: f64::from(i) * 13.0 % 100.0,
            })
            .collect();
        prop_assert_eq!(decide(&cluster, &loads), decide(&cluster, &loads));
    }

    #[test]
    fn shrink_respects_floor_and_quorum((spec, seed) in valid_spec().prop_flat_map(|s| {
        let cluster = make_cluster(s.clone());
        loads_for(&cluster).prop_map(move |loads| (s.clone(), loads))
    })) {
        let cluster = make_cluster(spec);
        let loads = seed;
        if let Verdict::Shrink { victim, dest_a, dest_b, .. } = decide(&cluster, &loads) {
            // Never below the floor
            prop_assert!(cluster.spec.active_shards > cluster.spec.min_shards);

            // At least two primaries sat below both low thresholds
            let under = loads.iter()
                .filter(|l| l.cpu_pct < f64::from(cluster.spec.cpu_low)
                    && l.mem_pct < f64::from(cluster.spec.mem_low))
                .count();
            prop_assert!(under >= MIN_UNDERUTILIZED_FOR_SHRINK);

            // The victim is the highest-index active primary and never a destination
            let group = 1 + cluster.spec.replicas_per_shard;
            let expected_victim = format!("cache-{}", (cluster.spec.active_shards - 1) * group);
            prop_assert_eq!(&victim, &expected_victim);
            prop_assert_ne!(&victim, &dest_a);
            if let Some(dest_b) = dest_b {
                prop_assert_ne!(&victim, &dest_b);
                prop_assert_ne!(&dest_a, &dest_b);
            }
        }
    }

    #[test]
    fn grow_trigger_exceeds_a_threshold((spec, seed) in valid_spec().prop_flat_map(|s| {
        let cluster = make_cluster(s.clone());
        loads_for(&cluster).prop_map(move |loads| (s.clone(), loads))
    })) {
        let cluster = make_cluster(spec);
        let loads = seed;
        if let Verdict::Grow { trigger, .. } = decide(&cluster, &loads) {
            let sample = loads.iter().find(|l| l.pod == trigger).unwrap();
            prop_assert!(
                sample.cpu_pct > f64::from(cluster.spec.cpu_high)
                    || sample.mem_pct > f64::from(cluster.spec.mem_high)
            );
        }
    }

    #[test]
    fn drain_plan_covers_victim_exactly(total in 0u32..16384, split in proptest::bool::ANY) {
        let dest_b = split.then(|| "dest-b".to_string());
        let plan = DrainPlan::split("victim".to_string(), "dest-a".to_string(), dest_b, total);
        let moved = plan.slots_a + plan.dest_b.as_ref().map(|(_, n)| *n).unwrap_or(0);
        prop_assert_eq!(moved, total);
        if let Some((_, slots_b)) = plan.dest_b {
            // Halves differ by at most one slot
            prop_assert!(plan.slots_a.abs_diff(slots_b) <= 1);
        }
    }
}
