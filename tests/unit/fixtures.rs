//! Shared test fixtures

use std::collections::BTreeMap;

use kube::core::ObjectMeta;

use redis_operator::controller::ShardLoad;
use redis_operator::crd::{RedisCluster, RedisClusterSpec, RedisClusterStatus};

/// A cluster named `cache` with the given shard shape and default thresholds:
/// high CPU/mem at 70, low CPU at 20, low mem at 30.
pub fn cluster(active_shards: i32, min_shards: i32, replicas_per_shard: i32) -> RedisCluster {
    RedisCluster {
        metadata: ObjectMeta {
            name: Some("cache".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("test-uid-12345".to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: RedisClusterSpec {
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
            metrics_endpoint: "http://prometheus-operated.monitoring.svc:9090".to_string(),
            existing_mode: false,
            selector: BTreeMap::new(),
            service_name: None,
            manage_replica_set: true,
        },
        status: None,
    }
}

pub fn cluster_with_status(
    active_shards: i32,
    min_shards: i32,
    replicas_per_shard: i32,
    status: RedisClusterStatus,
) -> RedisCluster {
    let mut c = cluster(active_shards, min_shards, replicas_per_shard);
    c.status = Some(status);
    c
}

/// A load sample for one shard primary.
pub fn load(pod: &str, cpu_pct: f64, mem_pct: f64) -> ShardLoad {
    ShardLoad {
        pod: pod.to_string(),
        cpu_pct,
        mem_pct,
    }
}
