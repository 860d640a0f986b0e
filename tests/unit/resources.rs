//! Unit tests for the resource generators

use redis_operator::resources::configmap::generate_config_map;
use redis_operator::resources::service::generate_headless_service;
use redis_operator::resources::statefulset::generate_statefulset;

use crate::fixtures::cluster;

#[test]
fn test_statefulset_includes_standby_group() {
    // 3 active shards + 1 standby, each with 1 replica: 8 pods
    let c = cluster(3, 3, 1);
    let sts = generate_statefulset(&c);
    let spec = sts.spec.as_ref().unwrap();

    assert_eq!(spec.replicas, Some(8));
    assert_eq!(spec.service_name.as_str(), "cache-headless");
}

#[test]
fn test_statefulset_no_replicas() {
    let c = cluster(4, 3, 0);
    let sts = generate_statefulset(&c);
    assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(5));
}

#[test]
fn test_statefulset_containers() {
    let c = cluster(3, 3, 1);
    let sts = generate_statefulset(&c);
    let pod_spec = sts
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap();

    assert_eq!(pod_spec.containers.len(), 2);

    let redis = &pod_spec.containers[0];
    assert_eq!(redis.name, "redis");
    assert_eq!(redis.image.as_deref(), Some("redis:7.2"));
    assert_eq!(
        redis.command.as_ref().unwrap(),
        &["redis-server", "/conf/redis.conf"]
    );

    let exporter = &pod_spec.containers[1];
    assert_eq!(exporter.name, "redis-exporter");
    assert_eq!(
        exporter.ports.as_ref().unwrap()[0].container_port,
        9121
    );
}

#[test]
fn test_statefulset_scrape_annotations() {
    let c = cluster(3, 3, 1);
    let sts = generate_statefulset(&c);
    let annotations = sts
        .spec
        .as_ref()
        .unwrap()
        .template
        .metadata
        .as_ref()
        .unwrap()
        .annotations
        .as_ref()
        .unwrap();

    assert_eq!(annotations.get("prometheus.io/scrape").unwrap(), "true");
    assert_eq!(annotations.get("prometheus.io/port").unwrap(), "9121");
}

#[test]
fn test_headless_service_shape() {
    let c = cluster(3, 3, 1);
    let svc = generate_headless_service(&c);
    let spec = svc.spec.as_ref().unwrap();

    assert_eq!(svc.metadata.name.as_deref(), Some("cache-headless"));
    assert_eq!(spec.cluster_ip.as_deref(), Some("None"));

    let ports = spec.ports.as_ref().unwrap();
    assert_eq!(ports.len(), 2);
    assert_eq!(ports[0].port, 6379);
    assert_eq!(ports[1].port, 9121);
}

#[test]
fn test_config_map_enables_cluster_mode() {
    let c = cluster(3, 3, 1);
    let cm = generate_config_map(&c);

    assert_eq!(cm.metadata.name.as_deref(), Some("cache-config"));
    let conf = cm.data.as_ref().unwrap().get("redis.conf").unwrap();
    assert!(conf.contains("cluster-enabled yes"));
    assert!(conf.contains("cluster-config-file /data/nodes.conf"));
    assert!(conf.contains("appendonly yes"));
}

#[test]
fn test_resources_are_owned() {
    let c = cluster(3, 3, 1);
    for owners in [
        generate_statefulset(&c).metadata.owner_references,
        generate_headless_service(&c).metadata.owner_references,
        generate_config_map(&c).metadata.owner_references,
    ] {
        let owners = owners.unwrap();
        assert_eq!(owners[0].kind, "RedisCluster");
        assert_eq!(owners[0].controller, Some(true));
    }
}
