//! Unit tests for status conditions and cooldown accounting

use chrono::{Duration, Utc};

use redis_operator::controller::status::{
    ConditionBuilder, condition_status, condition_types, cooldown_remaining, spec_changed,
};
use redis_operator::crd::{ClusterPhase, Condition, RedisClusterStatus};

use crate::fixtures::{cluster, cluster_with_status};

mod condition_builder_tests {
    use super::*;

    #[test]
    fn test_new_condition_builder() {
        let builder = ConditionBuilder::new(Some(1));
        let conditions = builder.build();
        assert!(conditions.is_empty());
    }

    #[test]
    fn test_set_condition_adds_new() {
        let conditions = ConditionBuilder::new(Some(1))
            .set_condition("TestCondition", "True", "TestReason", "Test message")
            .build();

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, "TestCondition");
        assert_eq!(conditions[0].status, "True");
        assert_eq!(conditions[0].reason, "TestReason");
        assert_eq!(conditions[0].message, "Test message");
        assert_eq!(conditions[0].observed_generation, Some(1));
    }

    #[test]
    fn test_set_condition_updates_existing_same_status() {
        let existing = vec![Condition {
            type_: "TestCondition".to_string(),
            status: "True".to_string(),
            reason: "OldReason".to_string(),
            message: "Old message".to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
            observed_generation: Some(1),
        }];

        let conditions = ConditionBuilder::from_existing(existing, Some(2))
            .set_condition("TestCondition", "True", "NewReason", "New message")
            .build();

        assert_eq!(conditions.len(), 1);
        // Status same, so transition time should NOT change
        assert_eq!(
            conditions[0].last_transition_time,
            "2024-01-01T00:00:00Z".to_string()
        );
        // But reason and message should update
        assert_eq!(conditions[0].reason, "NewReason");
        assert_eq!(conditions[0].message, "New message");
        assert_eq!(conditions[0].observed_generation, Some(2));
    }

    #[test]
    fn test_set_condition_updates_existing_different_status() {
        let existing = vec![Condition {
            type_: "TestCondition".to_string(),
            status: "True".to_string(),
            reason: "OldReason".to_string(),
            message: "Old message".to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
            observed_generation: Some(1),
        }];

        let conditions = ConditionBuilder::from_existing(existing, Some(2))
            .set_condition("TestCondition", "False", "NewReason", "New message")
            .build();

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "False");
        // Status changed, so transition time SHOULD change
        assert_ne!(
            conditions[0].last_transition_time,
            "2024-01-01T00:00:00Z".to_string()
        );
    }

    #[test]
    fn test_condition_helpers() {
        let conditions = ConditionBuilder::new(Some(1))
            .ready(true, "Ready", "Ready")
            .progressing(false, "Stable", "Stable")
            .degraded(false, "Healthy", "Healthy")
            .scaling_blocked(true, "CooldownActive", "cooldown remaining 30s")
            .build();

        assert_eq!(conditions.len(), 4);
        assert_eq!(conditions[0].type_, condition_types::READY);
        assert_eq!(conditions[0].status, condition_status::TRUE);
        assert_eq!(conditions[3].type_, condition_types::SCALING_BLOCKED);
        assert_eq!(conditions[3].status, condition_status::TRUE);
        assert_eq!(conditions[3].message, "cooldown remaining 30s");
    }

    #[test]
    fn test_condition_types_constants() {
        assert_eq!(condition_types::READY, "Ready");
        assert_eq!(condition_types::PROGRESSING, "Progressing");
        assert_eq!(condition_types::DEGRADED, "Degraded");
        assert_eq!(condition_types::SCALING_BLOCKED, "ScalingBlocked");
    }
}

mod spec_changed_tests {
    use super::*;

    #[test]
    fn test_spec_changed_no_status() {
        let c = cluster(3, 3, 1);
        // No status means never observed, needs reconciliation
        assert!(spec_changed(&c));
    }

    #[test]
    fn test_spec_changed_no_observed_generation() {
        let status = RedisClusterStatus {
            observed_generation: None,
            ..Default::default()
        };
        let c = cluster_with_status(3, 3, 1, status);
        assert!(spec_changed(&c));
    }

    #[test]
    fn test_spec_changed_generations_match() {
        let status = RedisClusterStatus {
            observed_generation: Some(1),
            ..Default::default()
        };
        let c = cluster_with_status(3, 3, 1, status);
        assert!(!spec_changed(&c));
    }

    #[test]
    fn test_spec_changed_generation_increased() {
        let status = RedisClusterStatus {
            observed_generation: Some(1),
            ..Default::default()
        };
        let mut c = cluster_with_status(3, 3, 1, status);
        c.metadata.generation = Some(2);
        assert!(spec_changed(&c));
    }
}

mod cooldown_tests {
    use super::*;

    fn status_scaled_at(seconds_ago: i64) -> RedisClusterStatus {
        RedisClusterStatus {
            phase: ClusterPhase::Stable,
            last_scale_at: Some((Utc::now() - Duration::seconds(seconds_ago)).to_rfc3339()),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_last_scale_means_no_cooldown() {
        let c = cluster(3, 3, 1);
        assert_eq!(cooldown_remaining(&c), None);
    }

    #[test]
    fn test_cooldown_active() {
        // Scaled 30s ago with a 60s cooldown: roughly 30s remain
        let c = cluster_with_status(3, 3, 1, status_scaled_at(30));
        let remaining = cooldown_remaining(&c).expect("cooldown should be active");
        assert!((25..=35).contains(&remaining), "remaining: {}", remaining);
    }

    #[test]
    fn test_cooldown_elapsed() {
        let c = cluster_with_status(3, 3, 1, status_scaled_at(120));
        assert_eq!(cooldown_remaining(&c), None);
    }

    #[test]
    fn test_unparsable_timestamp_is_ignored() {
        let status = RedisClusterStatus {
            last_scale_at: Some("not-a-timestamp".to_string()),
            ..Default::default()
        };
        let c = cluster_with_status(3, 3, 1, status);
        assert_eq!(cooldown_remaining(&c), None);
    }
}

mod status_shape_tests {
    use super::*;

    #[test]
    fn test_default_phase_is_uninitialized() {
        let status = RedisClusterStatus::default();
        assert_eq!(status.phase, ClusterPhase::Uninitialized);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(format!("{}", ClusterPhase::Uninitialized), "Uninitialized");
        assert_eq!(format!("{}", ClusterPhase::Stable), "Stable");
        assert_eq!(format!("{}", ClusterPhase::ScalingUp), "ScalingUp");
        assert_eq!(
            format!("{}", ClusterPhase::ProvisioningStandby),
            "ProvisioningStandby"
        );
        assert_eq!(format!("{}", ClusterPhase::ScalingDown), "ScalingDown");
        assert_eq!(format!("{}", ClusterPhase::Failed), "Failed");
    }

    #[test]
    fn test_witnesses_survive_serialization() {
        let status = RedisClusterStatus {
            phase: ClusterPhase::ScalingDown,
            drain_victim_id: Some("cache-8".to_string()),
            drain_dest_a: Some("cache-0".to_string()),
            drain_dest_b: None,
            standby_id: Some("cache-10".to_string()),
            ..Default::default()
        };

        let json = serde_json::to_string(&status).unwrap();
        let parsed: RedisClusterStatus = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.phase, ClusterPhase::ScalingDown);
        assert_eq!(parsed.drain_victim_id.as_deref(), Some("cache-8"));
        assert_eq!(parsed.drain_dest_a.as_deref(), Some("cache-0"));
        assert_eq!(parsed.drain_dest_b, None);
        assert_eq!(parsed.standby_id.as_deref(), Some("cache-10"));
    }

    #[test]
    fn test_witness_fields_omitted_when_empty() {
        let json = serde_json::to_string(&RedisClusterStatus::default()).unwrap();
        assert!(!json.contains("drainVictimId"));
        assert!(!json.contains("overloadedId"));
        assert!(!json.contains("lastScaleAt"));
    }
}
