//! Unit tests for the scaling decision engine

use redis_operator::controller::decision::{MIN_UNDERUTILIZED_FOR_SHRINK, Verdict, decide};

use crate::fixtures::{cluster, load};

mod grow {
    use super::*;

    #[test]
    fn test_steady_state_no_verdict() {
        // Three active shards all at 50/50 against 70/70 thresholds
        let c = cluster(3, 3, 1);
        let loads = vec![
            load("cache-0", 50.0, 50.0),
            load("cache-2", 50.0, 50.0),
            load("cache-4", 50.0, 50.0),
        ];
        assert_eq!(decide(&c, &loads), Verdict::None);
    }

    #[test]
    fn test_memory_overload_triggers_grow() {
        let c = cluster(3, 3, 1);
        let loads = vec![
            load("cache-0", 50.0, 50.0),
            load("cache-2", 50.0, 82.0),
            load("cache-4", 50.0, 50.0),
        ];
        match decide(&c, &loads) {
            Verdict::Grow { trigger, reason } => {
                assert_eq!(trigger, "cache-2");
                assert!(reason.starts_with("Memory overloaded"), "reason: {}", reason);
                assert!(reason.contains("82.00%"));
            }
            other => panic!("expected grow verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_cpu_overload_triggers_grow() {
        let c = cluster(3, 3, 1);
        let loads = vec![
            load("cache-0", 88.0, 40.0),
            load("cache-2", 50.0, 50.0),
            load("cache-4", 50.0, 50.0),
        ];
        match decide(&c, &loads) {
            Verdict::Grow { trigger, reason } => {
                assert_eq!(trigger, "cache-0");
                assert!(reason.starts_with("CPU overloaded"), "reason: {}", reason);
            }
            other => panic!("expected grow verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_breaks_cpu_ties() {
        // Two shards exceed the CPU threshold; the one with higher memory
        // is the more urgent trigger for an in-memory store.
        let c = cluster(3, 3, 1);
        let loads = vec![
            load("cache-0", 90.0, 40.0),
            load("cache-2", 75.0, 60.0),
            load("cache-4", 10.0, 10.0),
        ];
        match decide(&c, &loads) {
            Verdict::Grow { trigger, .. } => assert_eq!(trigger, "cache-2"),
            other => panic!("expected grow verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_both_signals_in_reason() {
        let c = cluster(3, 3, 1);
        let loads = vec![load("cache-0", 90.0, 90.0)];
        match decide(&c, &loads) {
            Verdict::Grow { reason, .. } => {
                assert!(reason.starts_with("CPU and Memory overloaded"));
            }
            other => panic!("expected grow verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_exactly_at_threshold_is_not_overloaded() {
        let c = cluster(3, 3, 1);
        let loads = vec![load("cache-0", 70.0, 70.0)];
        assert_eq!(decide(&c, &loads), Verdict::None);
    }
}

mod shrink {
    use super::*;

    #[test]
    fn test_shrink_selects_highest_index_victim() {
        // Five shards, four idle, one barely warm but still underutilized
        let c = cluster(5, 3, 1);
        let loads = vec![
            load("cache-0", 10.0, 25.0),
            load("cache-2", 10.0, 25.0),
            load("cache-4", 10.0, 25.0),
            load("cache-6", 10.0, 25.0),
            load("cache-8", 12.0, 28.0),
        ];
        match decide(&c, &loads) {
            Verdict::Shrink {
                victim,
                dest_a,
                dest_b,
                ..
            } => {
                assert_eq!(victim, "cache-8");
                // Destinations are the two lowest-memory primaries
                assert_eq!(dest_a, "cache-0");
                assert_eq!(dest_b.as_deref(), Some("cache-2"));
            }
            other => panic!("expected shrink verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_one_warm_pod_does_not_block_shrink() {
        // Four underutilized primaries satisfy the >= 2 rule even though
        // the fifth sits above the low CPU threshold.
        let c = cluster(5, 3, 1);
        let loads = vec![
            load("cache-0", 10.0, 25.0),
            load("cache-2", 10.0, 25.0),
            load("cache-4", 10.0, 25.0),
            load("cache-6", 10.0, 25.0),
            load("cache-8", 35.0, 25.0),
        ];
        assert!(matches!(decide(&c, &loads), Verdict::Shrink { .. }));
    }

    #[test]
    fn test_no_shrink_at_min_shards() {
        let c = cluster(3, 3, 1);
        let loads = vec![
            load("cache-0", 1.0, 1.0),
            load("cache-2", 1.0, 1.0),
            load("cache-4", 1.0, 1.0),
        ];
        assert_eq!(decide(&c, &loads), Verdict::None);
    }

    #[test]
    fn test_single_underutilized_is_rejected() {
        assert_eq!(MIN_UNDERUTILIZED_FOR_SHRINK, 2);

        let c = cluster(5, 3, 1);
        let loads = vec![
            load("cache-0", 5.0, 5.0),
            load("cache-2", 50.0, 50.0),
            load("cache-4", 50.0, 50.0),
            load("cache-6", 50.0, 50.0),
            load("cache-8", 50.0, 50.0),
        ];
        assert_eq!(decide(&c, &loads), Verdict::None);
    }

    #[test]
    fn test_victim_among_lowest_memory_falls_back_to_single_destination() {
        // Victim cache-6 is the second-lowest-memory primary, so everything
        // it holds goes to the single remaining low-memory candidate.
        let c = cluster(4, 3, 1);
        let loads = vec![
            load("cache-0", 5.0, 5.0),
            load("cache-2", 5.0, 20.0),
            load("cache-4", 5.0, 25.0),
            load("cache-6", 5.0, 8.0),
        ];
        match decide(&c, &loads) {
            Verdict::Shrink {
                victim,
                dest_a,
                dest_b,
                ..
            } => {
                assert_eq!(victim, "cache-6");
                assert_eq!(dest_a, "cache-0");
                assert_eq!(dest_b, None);
            }
            other => panic!("expected shrink verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_replica_samples_never_become_destinations() {
        // A replica pod (odd ordinal) leaking into the samples must not be
        // chosen as a slot destination.
        let c = cluster(4, 3, 1);
        let loads = vec![
            load("cache-1", 1.0, 1.0),
            load("cache-0", 5.0, 10.0),
            load("cache-2", 5.0, 12.0),
            load("cache-4", 5.0, 25.0),
            load("cache-6", 5.0, 26.0),
        ];
        match decide(&c, &loads) {
            Verdict::Shrink { dest_a, dest_b, .. } => {
                assert_eq!(dest_a, "cache-0");
                assert_eq!(dest_b.as_deref(), Some("cache-2"));
            }
            other => panic!("expected shrink verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_shrink_reason_names_the_rule() {
        let c = cluster(5, 3, 1);
        let loads = vec![
            load("cache-0", 1.0, 1.0),
            load("cache-2", 1.0, 1.0),
            load("cache-4", 1.0, 1.0),
            load("cache-6", 1.0, 1.0),
            load("cache-8", 1.0, 1.0),
        ];
        match decide(&c, &loads) {
            Verdict::Shrink { reason, .. } => {
                assert!(reason.contains("5 underutilized"), "reason: {}", reason);
            }
            other => panic!("expected shrink verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_grow_wins_over_shrink() {
        // One overloaded shard plus several idle ones: relieving the hot
        // shard takes priority.
        let c = cluster(5, 3, 1);
        let loads = vec![
            load("cache-0", 1.0, 1.0),
            load("cache-2", 1.0, 1.0),
            load("cache-4", 1.0, 1.0),
            load("cache-6", 1.0, 1.0),
            load("cache-8", 90.0, 90.0),
        ];
        assert!(matches!(decide(&c, &loads), Verdict::Grow { .. }));
    }
}
