//! Unit tests for the admin job builders and the drain plan

use k8s_openapi::api::batch::v1::{Job, JobStatus};

use redis_operator::resources::job::{
    DrainPlan, bootstrap_job_name, drain_job_name, entrypoint_addr, fix_job_name,
    generate_bootstrap_job, generate_drain_job, generate_fix_job, generate_reshard_job,
    reshard_job_name,
};
use redis_operator::resources::{JobOutcome, job_outcome};

use crate::fixtures::cluster;

const FROM_ID: &str = "07c37dfeb235213a872192d90877d0cd55635b91";
const TO_ID: &str = "eb3724b15e7e9b7d9a8a4a40cb0c7c3f1f0e5a77";

fn job_command(job: &Job) -> String {
    job.spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap()
        .containers[0]
        .args
        .as_ref()
        .unwrap()[0]
        .clone()
}

#[test]
fn test_job_names() {
    assert_eq!(bootstrap_job_name("cache"), "cache-bootstrap");
    assert_eq!(fix_job_name("cache"), "cache-fix");
    assert_eq!(reshard_job_name("cache"), "cache-reshard");
    assert_eq!(drain_job_name("cache"), "cache-drain");
}

#[test]
fn test_entrypoint_addresses_pod_zero() {
    let c = cluster(3, 3, 1);
    assert_eq!(
        entrypoint_addr(&c, "default"),
        "cache-0.cache-headless.default.svc.cluster.local:6379"
    );
}

#[test]
fn test_bootstrap_covers_only_active_groups() {
    // 3 shards x (1 primary + 1 replica) = pods 0..5; the standby group
    // (6, 7) must not participate in cluster creation.
    let c = cluster(3, 3, 1);
    let command = job_command(&generate_bootstrap_job(&c, "default"));

    assert!(command.contains("--cluster create"));
    assert!(command.contains("--cluster-replicas 1"));
    assert!(command.contains("cache-5.cache-headless.default.svc.cluster.local:6379"));
    assert!(!command.contains("cache-6."));
    assert!(!command.contains("cache-7."));
}

#[test]
fn test_fix_job_tolerates_unreachable_primaries() {
    let c = cluster(3, 3, 1);
    let command = job_command(&generate_fix_job(&c, "default"));
    assert!(command.contains("--cluster fix"));
    assert!(command.contains("--cluster-fix-with-unreachable-masters"));
}

#[test]
fn test_reshard_job_carries_resolved_arguments() {
    let c = cluster(3, 3, 1);
    let job = generate_reshard_job(&c, "default", FROM_ID, TO_ID, 2730);
    let command = job_command(&job);

    assert!(command.contains(&format!("--cluster-from {}", FROM_ID)));
    assert!(command.contains(&format!("--cluster-to {}", TO_ID)));
    assert!(command.contains("--cluster-slots 2730"));
    assert!(command.contains("--cluster-yes"));
    assert!(command.contains("--cluster-pipeline 100"));

    // The task deadline comes from the spec
    assert_eq!(
        job.spec.as_ref().unwrap().active_deadline_seconds,
        Some(600)
    );
    assert_eq!(job.spec.as_ref().unwrap().backoff_limit, Some(0));
}

#[test]
fn test_jobs_are_owned_by_the_cluster() {
    let c = cluster(3, 3, 1);
    let job = generate_reshard_job(&c, "default", FROM_ID, TO_ID, 100);
    let owners = job.metadata.owner_references.as_ref().unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "RedisCluster");
    assert_eq!(owners[0].name, "cache");
}

mod drain_plan {
    use super::*;

    #[test]
    fn test_split_between_two_destinations() {
        let plan = DrainPlan::split(
            FROM_ID.to_string(),
            TO_ID.to_string(),
            Some("dest-b-id".to_string()),
            5461,
        );
        assert_eq!(plan.slots_a, 2730);
        assert_eq!(plan.dest_b, Some(("dest-b-id".to_string(), 2731)));
    }

    #[test]
    fn test_single_destination_takes_everything() {
        let plan = DrainPlan::split(FROM_ID.to_string(), TO_ID.to_string(), None, 5461);
        assert_eq!(plan.slots_a, 5461);
        assert_eq!(plan.dest_b, None);
    }

    #[test]
    fn test_one_slot_never_splits() {
        let plan = DrainPlan::split(
            FROM_ID.to_string(),
            TO_ID.to_string(),
            Some("dest-b-id".to_string()),
            1,
        );
        assert_eq!(plan.slots_a, 1);
        assert_eq!(plan.dest_b, None);
    }

    #[test]
    fn test_drain_job_runs_halves_sequentially() {
        let c = cluster(5, 3, 1);
        let plan = DrainPlan::split(
            FROM_ID.to_string(),
            TO_ID.to_string(),
            Some("dest-b-id".to_string()),
            3276,
        );
        let command = job_command(&generate_drain_job(&c, "default", &plan));

        assert!(command.contains("--cluster-slots 1638"));
        assert!(command.contains("&& sleep 5 &&"));
        assert!(command.contains("--cluster-slots 1638 "));
        assert!(command.contains("dest-b-id"));
        // Slot counts across both halves must cover the victim exactly
        assert_eq!(1638 + 1638, 3276);
    }
}

mod outcome {
    use super::*;

    fn job_with_status(succeeded: Option<i32>, failed: Option<i32>) -> Job {
        Job {
            status: Some(JobStatus {
                succeeded,
                failed,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_running_job() {
        assert_eq!(job_outcome(&job_with_status(None, None)), JobOutcome::Running);
        assert_eq!(
            job_outcome(&job_with_status(Some(0), Some(0))),
            JobOutcome::Running
        );
        assert_eq!(job_outcome(&Job::default()), JobOutcome::Running);
    }

    #[test]
    fn test_succeeded_job() {
        assert_eq!(
            job_outcome(&job_with_status(Some(1), None)),
            JobOutcome::Succeeded
        );
    }

    #[test]
    fn test_failed_job() {
        assert_eq!(
            job_outcome(&job_with_status(None, Some(1))),
            JobOutcome::Failed
        );
    }
}
