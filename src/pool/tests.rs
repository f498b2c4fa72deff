//! Worker Pool Tests
//!
//! ## Test Scopes
//! - **Registration**: Locality detection and replacement.
//! - **Selection**: Least-loaded ordering with explicit key order, availability and locality filters.
//! - **Inactivity**: Heartbeat timeouts.

#[cfg(test)]
mod tests {
    use crate::pool::pool::WorkerPool;
    use crate::pool::types::{EngineType, WorkerId};
    use std::collections::HashMap;
    use std::time::Duration;

    fn resources(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn pool() -> WorkerPool {
        WorkerPool::new("host-a", vec!["job_capacity".to_string(), "memory".to_string()])
    }

    // ============================================================
    // REGISTRATION TESTS
    // ============================================================

    #[test]
    fn test_register_marks_local_workers() {
        let pool = pool();
        let spark = EngineType::new("SPARK");

        let local = pool.register(WorkerId("w1".into()), spark.clone(), "host-a", resources(&[("job_capacity", 2)]));
        let remote = pool.register(WorkerId("w2".into()), spark, "host-b", resources(&[("job_capacity", 2)]));

        assert!(local.is_local);
        assert!(!remote.is_local);
        assert_eq!(local.used("job_capacity"), 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_deregister_unknown_worker() {
        let pool = pool();
        assert!(pool.deregister(&WorkerId("ghost".into())).is_none());
    }

    #[test]
    fn test_update_usage_of_unknown_worker() {
        let pool = pool();
        assert!(pool.update_usage(&WorkerId("ghost".into()), HashMap::new()).is_none());
    }

    // ============================================================
    // SELECTION TESTS
    // ============================================================

    #[test]
    fn test_least_loaded_uses_configured_key_order() {
        let pool = pool();
        let spark = EngineType::new("SPARK");
        let caps = resources(&[("job_capacity", 10), ("memory", 100)]);

        pool.register(WorkerId("w1".into()), spark.clone(), "host-a", caps.clone());
        pool.register(WorkerId("w2".into()), spark.clone(), "host-a", caps);

        // w1 has fewer jobs but more memory in use; job_capacity is compared first.
        pool.update_usage(&WorkerId("w1".into()), resources(&[("job_capacity", 1), ("memory", 90)]));
        pool.update_usage(&WorkerId("w2".into()), resources(&[("job_capacity", 2), ("memory", 10)]));

        assert_eq!(pool.least_loaded(&spark, false), Some(WorkerId("w1".into())));
    }

    #[test]
    fn test_least_loaded_ties_broken_by_id() {
        let pool = pool();
        let eep = EngineType::new("EEP");

        pool.register(WorkerId("b".into()), eep.clone(), "host-a", resources(&[("job_capacity", 3)]));
        pool.register(WorkerId("a".into()), eep.clone(), "host-a", resources(&[("job_capacity", 3)]));

        assert_eq!(pool.least_loaded(&eep, false), Some(WorkerId("a".into())));
    }

    #[test]
    fn test_full_worker_is_not_available() {
        let pool = pool();
        let spark = EngineType::new("SPARK");

        pool.register(WorkerId("w1".into()), spark.clone(), "host-a", resources(&[("job_capacity", 1)]));
        pool.update_usage(&WorkerId("w1".into()), resources(&[("job_capacity", 1)]));

        assert_eq!(pool.least_loaded(&spark, false), None);
        assert_eq!(pool.available_count(&spark), 0);
    }

    #[test]
    fn test_local_only_selection() {
        let pool = pool();
        let post = EngineType::post_processing();

        pool.register(WorkerId("remote".into()), post.clone(), "host-b", resources(&[("job_capacity", 5)]));
        assert_eq!(pool.least_loaded(&post, true), None);
        assert_eq!(pool.least_loaded(&post, false), Some(WorkerId("remote".into())));

        pool.register(WorkerId("local".into()), post.clone(), "host-a", resources(&[("job_capacity", 5)]));
        assert_eq!(pool.least_loaded(&post, true), Some(WorkerId("local".into())));
    }

    #[test]
    fn test_other_engine_types_are_ignored() {
        let pool = pool();

        pool.register(WorkerId("w1".into()), EngineType::new("EEP"), "host-a", resources(&[("job_capacity", 5)]));

        assert_eq!(pool.least_loaded(&EngineType::new("SPARK"), false), None);
        assert_eq!(pool.engine_types(), vec![EngineType::new("EEP")]);
    }

    // ============================================================
    // INACTIVITY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_inactive_workers_after_timeout() {
        let pool = pool();
        let spark = EngineType::new("SPARK");

        pool.register(WorkerId("quiet".into()), spark.clone(), "host-a", HashMap::new());
        pool.register(WorkerId("chatty".into()), spark, "host-a", HashMap::new());

        tokio::time::sleep(Duration::from_millis(40)).await;
        pool.update_usage(&WorkerId("chatty".into()), HashMap::new());

        let inactive = pool.inactive_workers(Duration::from_millis(20));
        assert_eq!(inactive, vec![WorkerId("quiet".into())]);
    }
}
