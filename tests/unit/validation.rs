//! Unit tests for spec validation

use std::collections::BTreeMap;

use redis_operator::controller::validation::{ABSOLUTE_MIN_SHARDS, MAX_SHARDS, validate_spec};

use crate::fixtures::cluster;

#[test]
fn test_limits() {
    assert_eq!(ABSOLUTE_MIN_SHARDS, 3);
    assert_eq!(MAX_SHARDS, 128);
}

#[test]
fn test_valid_spec_passes() {
    let c = cluster(3, 3, 1);
    assert!(validate_spec(&c).is_ok());
}

#[test]
fn test_cpu_threshold_inversion_rejected() {
    let mut c = cluster(3, 3, 1);
    c.spec.cpu_high = 20;
    c.spec.cpu_low = 20;
    assert!(validate_spec(&c).is_err());

    c.spec.cpu_high = 10;
    assert!(validate_spec(&c).is_err());
}

#[test]
fn test_mem_threshold_inversion_rejected() {
    let mut c = cluster(3, 3, 1);
    c.spec.mem_high = 30;
    c.spec.mem_low = 30;
    assert!(validate_spec(&c).is_err());
}

#[test]
fn test_thresholds_must_be_percentages() {
    let mut c = cluster(3, 3, 1);
    c.spec.cpu_high = 0;
    assert!(validate_spec(&c).is_err());

    let mut c = cluster(3, 3, 1);
    c.spec.mem_high = 101;
    assert!(validate_spec(&c).is_err());
}

#[test]
fn test_active_below_min_rejected() {
    let c = cluster(2, 3, 1);
    assert!(validate_spec(&c).is_err());
}

#[test]
fn test_min_shards_floor_enforced() {
    // minShards below the hard floor is rejected even if activeShards agrees
    let c = cluster(2, 2, 1);
    assert!(validate_spec(&c).is_err());
}

#[test]
fn test_too_many_shards_rejected() {
    let c = cluster(MAX_SHARDS + 1, 3, 1);
    assert!(validate_spec(&c).is_err());
}

#[test]
fn test_existing_mode_requires_selector() {
    let mut c = cluster(3, 3, 1);
    c.spec.existing_mode = true;
    assert!(validate_spec(&c).is_err());

    c.spec.selector =
        BTreeMap::from([("app".to_string(), "legacy-redis".to_string())]);
    assert!(validate_spec(&c).is_ok());
}

#[test]
fn test_nonpositive_intervals_rejected() {
    for field in ["cooldown", "timeout", "poll"] {
        let mut c = cluster(3, 3, 1);
        match field {
            "cooldown" => c.spec.cooldown_seconds = 0,
            "timeout" => c.spec.task_timeout_seconds = -1,
            _ => c.spec.poll_interval_seconds = 0,
        }
        assert!(validate_spec(&c).is_err(), "{} should be rejected", field);
    }
}

#[test]
fn test_empty_metrics_endpoint_rejected() {
    let mut c = cluster(3, 3, 1);
    c.spec.metrics_endpoint = String::new();
    assert!(validate_spec(&c).is_err());
}

#[test]
fn test_negative_replicas_rejected() {
    let mut c = cluster(3, 3, -1);
    assert!(validate_spec(&c).is_err());
}

#[test]
fn test_zero_replicas_per_shard_allowed() {
    let c = cluster(3, 3, 0);
    assert!(validate_spec(&c).is_ok());
}
