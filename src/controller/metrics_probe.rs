//! Per-shard load sampling from the Prometheus query API
//!
//! Issues two instant-vector queries (CPU rate and memory ratio) restricted
//! to the cluster's shard primaries, joins them by pod name, and drops the
//! standby. The probe reports the most recent instantaneous ratio; it never
//! aggregates or smooths.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::RedisCluster;

/// Deadline for each metrics query.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// CPU and memory load of one shard primary, in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardLoad {
    pub pod: String,
    pub cpu_pct: f64,
    pub mem_pct: f64,
}

#[derive(Deserialize)]
struct PromResponse {
    status: String,
    data: PromData,
}

#[derive(Deserialize)]
struct PromData {
    result: Vec<PromSample>,
}

#[derive(Deserialize)]
struct PromSample {
    metric: HashMap<String, String>,
    /// `[unix_timestamp, "<value>"]`
    value: (f64, String),
}

/// PromQL for CPU percent of the cluster's shard primaries.
pub fn cpu_query(cluster_name: &str, namespace: &str) -> String {
    format!(
        "rate(container_cpu_usage_seconds_total{{container=\"redis\", pod=~\"^{name}-.*\", namespace=\"{ns}\"}}[1m]) * 100 \
         and on(pod) redis_instance_info{{role=\"master\"}}",
        name = cluster_name,
        ns = namespace,
    )
}

/// PromQL for memory percent (usage over limit) of the shard primaries.
pub fn mem_query(cluster_name: &str, namespace: &str) -> String {
    format!(
        "(sum(container_memory_usage_bytes{{container=\"redis\", pod=~\"^{name}-.*\", namespace=\"{ns}\"}}) by (pod) \
         / sum(kube_pod_container_resource_limits{{resource=\"memory\", pod=~\"^{name}-.*\", namespace=\"{ns}\"}}) by (pod)) * 100 \
         and on(pod) redis_instance_info{{role=\"master\"}}",
        name = cluster_name,
        ns = namespace,
    )
}

/// Parse an instant-vector response into a pod -> value map.
///
/// Samples without a `pod` label or with an unparsable value are dropped.
fn parse_instant_vector(body: &str) -> Result<HashMap<String, f64>> {
    let response: PromResponse = serde_json::from_str(body)
        .map_err(|e| Error::MetricsError(format!("malformed query response: {}", e)))?;

    if response.status != "success" {
        return Err(Error::MetricsError(format!(
            "query returned status {}",
            response.status
        )));
    }

    let mut values = HashMap::new();
    for sample in response.data.result {
        let Some(pod) = sample.metric.get("pod") else {
            continue;
        };
        let Ok(value) = sample.value.1.parse::<f64>() else {
            continue;
        };
        values.insert(pod.clone(), value);
    }
    Ok(values)
}

/// Join CPU and memory maps by pod, excluding the standby.
/// Pods missing either sample are dropped silently.
pub fn join_samples(
    cpu: &HashMap<String, f64>,
    mem: &HashMap<String, f64>,
    standby: Option<&str>,
) -> Vec<ShardLoad> {
    let mut loads: Vec<ShardLoad> = cpu
        .iter()
        .filter(|(pod, _)| Some(pod.as_str()) != standby)
        .filter_map(|(pod, cpu_pct)| {
            mem.get(pod).map(|mem_pct| ShardLoad {
                pod: pod.clone(),
                cpu_pct: *cpu_pct,
                mem_pct: *mem_pct,
            })
        })
        .collect();
    // Deterministic order keeps decisions and logs reproducible
    loads.sort_by(|a, b| a.pod.cmp(&b.pod));
    loads
}

/// Client for the generic time-series query endpoint.
pub struct MetricsProbe {
    http: reqwest::Client,
}

impl MetricsProbe {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(QUERY_TIMEOUT)
            .build()
            .map_err(|e| Error::MetricsError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    async fn instant_query(&self, endpoint: &str, query: &str) -> Result<HashMap<String, f64>> {
        let url = format!("{}/api/v1/query", endpoint.trim_end_matches('/'));
        let body = self
            .http
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| Error::MetricsError(format!("query request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::MetricsError(format!("query rejected: {}", e)))?
            .text()
            .await
            .map_err(|e| Error::MetricsError(format!("query body unreadable: {}", e)))?;

        parse_instant_vector(&body)
    }

    /// Sample CPU and memory for every active shard primary of the cluster.
    ///
    /// An empty result is not an error: the caller treats it as metric
    /// starvation and skips the tick.
    pub async fn sample_shards(
        &self,
        cluster: &RedisCluster,
        namespace: &str,
        standby: Option<&str>,
    ) -> Result<Vec<ShardLoad>> {
        let name = kube::ResourceExt::name_any(cluster);
        let endpoint = &cluster.spec.metrics_endpoint;

        let cpu = self
            .instant_query(endpoint, &cpu_query(&name, namespace))
            .await?;
        let mem = self
            .instant_query(endpoint, &mem_query(&name, namespace))
            .await?;

        let loads = join_samples(&cpu, &mem, standby);
        for load in &loads {
            debug!(
                pod = %load.pod,
                cpu = format_args!("{:.2}%", load.cpu_pct),
                mem = format_args!("{:.2}%", load.mem_pct),
                "shard load sample"
            );
        }
        Ok(loads)
    }
}
