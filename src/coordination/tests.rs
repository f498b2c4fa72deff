//! Coordination Module Tests
//!
//! ## Test Scopes
//! - **Priority Queue**: Score ordering, tie-breaking by element, score updates.
//! - **Node Job Queue**: Per-engine isolation.
//! - **Locks**: Mutual exclusion, release by owner only, expiry.

#[cfg(test)]
mod tests {
    use crate::coordination::lock::{DistributedLock, MemoryLock, NoopLock};
    use crate::coordination::priority_queue::{MemoryPriorityQueue, NodeJobQueue, PriorityQueue};
    use crate::pool::types::EngineType;
    use std::sync::Arc;
    use std::time::Duration;

    // ============================================================
    // PRIORITY QUEUE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_pop_returns_lowest_score_first() {
        let queue = MemoryPriorityQueue::new();

        queue.push("q", "late", 30).await.unwrap();
        queue.push("q", "early", 10).await.unwrap();
        queue.push("q", "middle", 20).await.unwrap();

        assert_eq!(queue.pop_min("q").await.unwrap(), Some(("early".to_string(), 10)));
        assert_eq!(queue.pop_min("q").await.unwrap(), Some(("middle".to_string(), 20)));
        assert_eq!(queue.pop_min("q").await.unwrap(), Some(("late".to_string(), 30)));
        assert_eq!(queue.pop_min("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_equal_scores_pop_in_element_order() {
        let queue = MemoryPriorityQueue::new();

        queue.push("q", "b", 5).await.unwrap();
        queue.push("q", "a", 5).await.unwrap();

        assert_eq!(queue.pop_min("q").await.unwrap().unwrap().0, "a");
        assert_eq!(queue.pop_min("q").await.unwrap().unwrap().0, "b");
    }

    #[tokio::test]
    async fn test_push_existing_element_updates_score() {
        let queue = MemoryPriorityQueue::new();

        queue.push("q", "x", 1).await.unwrap();
        queue.push("q", "y", 2).await.unwrap();
        queue.push("q", "x", 3).await.unwrap();

        assert_eq!(queue.len("q").await.unwrap(), 2);
        assert_eq!(queue.pop_min("q").await.unwrap().unwrap().0, "y");
    }

    #[tokio::test]
    async fn test_remove_element() {
        let queue = MemoryPriorityQueue::new();
        queue.push("q", "x", 1).await.unwrap();

        assert!(queue.remove("q", "x").await.unwrap());
        assert!(!queue.remove("q", "x").await.unwrap());
        assert_eq!(queue.len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_queue_is_empty() {
        let queue = MemoryPriorityQueue::new();

        assert_eq!(queue.pop_min("missing").await.unwrap(), None);
        assert_eq!(queue.len("missing").await.unwrap(), 0);
    }

    // ============================================================
    // NODE JOB QUEUE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_node_job_queue_isolated_by_engine_type() {
        let queue = NodeJobQueue::new(Arc::new(MemoryPriorityQueue::new()));
        let spark = EngineType::new("SPARK");
        let eep = EngineType::new("EEP");

        queue.enqueue_with_score(&spark, "job-1", 100).await.unwrap();
        queue.enqueue_with_score(&eep, "job-2", 50).await.unwrap();

        assert_eq!(queue.pop(&spark).await.unwrap(), Some("job-1".to_string()));
        assert_eq!(queue.pop(&spark).await.unwrap(), None);
        assert_eq!(queue.len(&eep).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_popped_job_put_back_with_its_score_stays_ahead() {
        let queue = NodeJobQueue::new(Arc::new(MemoryPriorityQueue::new()));
        let post = EngineType::post_processing();

        queue.enqueue_with_score(&post, "older", 10).await.unwrap();
        queue.enqueue_with_score(&post, "newer", 20).await.unwrap();

        let (element, score) = queue.pop_with_score(&post).await.unwrap().unwrap();
        assert_eq!((element.as_str(), score), ("older", 10));

        queue.enqueue_with_score(&post, &element, score).await.unwrap();
        assert_eq!(queue.pop(&post).await.unwrap(), Some("older".to_string()));
    }

    // ============================================================
    // LOCK TESTS
    // ============================================================

    #[tokio::test]
    async fn test_memory_lock_excludes_second_owner() {
        let lock = MemoryLock::new();

        let first = lock
            .try_acquire("register_node", Duration::from_secs(5))
            .await
            .unwrap();
        let second = lock
            .try_acquire("register_node", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none(), "Lock must not be granted twice");

        lock.release(first.unwrap()).await.unwrap();

        let third = lock
            .try_acquire("register_node", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(third.is_some(), "Lock should be free after release");
    }

    #[tokio::test]
    async fn test_memory_lock_release_requires_owner_token() {
        let lock = MemoryLock::new();

        let owner = lock
            .try_acquire("op", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        let mut stranger = owner.clone();
        stranger.value = "someone-else".to_string();
        lock.release(stranger).await.unwrap();

        assert!(lock.try_acquire("op", Duration::from_secs(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_lock_expires() {
        let lock = MemoryLock::new();

        let _held = lock.try_acquire("op", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(lock.try_acquire("op", Duration::from_secs(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_noop_lock_always_acquires() {
        let lock = NoopLock;

        assert!(lock.try_acquire("op", Duration::from_secs(1)).await.unwrap().is_some());
        assert!(lock.try_acquire("op", Duration::from_secs(1)).await.unwrap().is_some());
    }
}
