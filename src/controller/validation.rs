//! Validation logic for RedisCluster specs
//!
//! Rejected specs never reach the reconciliation protocols: a cluster with a
//! contradictory spec stays untouched until the operator fixes it.

use crate::controller::error::{Error, Result};
use crate::crd::RedisCluster;

/// Hard floor for the shard count, independent of `minShards`.
/// The data plane refuses to form a cluster with fewer primaries.
pub const ABSOLUTE_MIN_SHARDS: i32 = 3;

/// Safety ceiling for the shard count.
pub const MAX_SHARDS: i32 = 128;

/// Validate the cluster spec
pub fn validate_spec(cluster: &RedisCluster) -> Result<()> {
    validate_shards(cluster)?;
    validate_thresholds(cluster)?;
    validate_intervals(cluster)?;
    validate_existing_mode(cluster)?;
    Ok(())
}

/// Validate shard counts
fn validate_shards(cluster: &RedisCluster) -> Result<()> {
    let spec = &cluster.spec;

    if spec.min_shards < ABSOLUTE_MIN_SHARDS {
        return Err(Error::ValidationError(format!(
            "minShards {} is below the hard floor of {}",
            spec.min_shards, ABSOLUTE_MIN_SHARDS
        )));
    }

    if spec.active_shards < spec.min_shards {
        return Err(Error::ValidationError(format!(
            "activeShards {} cannot be less than minShards {}",
            spec.active_shards, spec.min_shards
        )));
    }

    if spec.active_shards > MAX_SHARDS {
        return Err(Error::ValidationError(format!(
            "activeShards {} exceeds maximum {}",
            spec.active_shards, MAX_SHARDS
        )));
    }

    if spec.replicas_per_shard < 0 {
        return Err(Error::ValidationError(format!(
            "replicasPerShard {} cannot be negative",
            spec.replicas_per_shard
        )));
    }

    Ok(())
}

/// Validate scaling thresholds
fn validate_thresholds(cluster: &RedisCluster) -> Result<()> {
    let spec = &cluster.spec;

    for (name, value) in [
        ("cpuHigh", spec.cpu_high),
        ("cpuLow", spec.cpu_low),
        ("memHigh", spec.mem_high),
        ("memLow", spec.mem_low),
    ] {
        if !(1..=100).contains(&value) {
            return Err(Error::ValidationError(format!(
                "{} {} must be a percentage in [1,100]",
                name, value
            )));
        }
    }

    if spec.cpu_high <= spec.cpu_low {
        return Err(Error::ValidationError(format!(
            "cpuHigh ({}) must be greater than cpuLow ({})",
            spec.cpu_high, spec.cpu_low
        )));
    }

    if spec.mem_high <= spec.mem_low {
        return Err(Error::ValidationError(format!(
            "memHigh ({}) must be greater than memLow ({})",
            spec.mem_high, spec.mem_low
        )));
    }

    Ok(())
}

/// Validate timing knobs
fn validate_intervals(cluster: &RedisCluster) -> Result<()> {
    let spec = &cluster.spec;

    for (name, value) in [
        ("cooldownSeconds", spec.cooldown_seconds),
        ("taskTimeoutSeconds", spec.task_timeout_seconds),
        ("pollIntervalSeconds", spec.poll_interval_seconds),
    ] {
        if value <= 0 {
            return Err(Error::ValidationError(format!(
                "{} {} must be positive",
                name, value
            )));
        }
    }

    if cluster.spec.metrics_endpoint.is_empty() {
        return Err(Error::ValidationError(
            "metricsEndpoint must not be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validate existing-mode configuration
fn validate_existing_mode(cluster: &RedisCluster) -> Result<()> {
    if cluster.spec.existing_mode && cluster.spec.selector.is_empty() {
        return Err(Error::ValidationError(
            "selector is required when existingMode is set".to_string(),
        ));
    }
    Ok(())
}
