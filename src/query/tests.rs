//! Query Front End Tests
//!
//! ## Test Scopes
//! - **makejob**: Persistence of the planned jobs and publication of the leaves.
//! - **Errors**: Translation and planning failures surface as `QueryError`.
//! - **checkjob / getresult / cancel**: Reading back and ending submitted jobs.
//! - **End to end**: A query driven through the dispatcher handlers to its result.

#[cfg(test)]
mod tests {
    use crate::coordination::priority_queue::{MemoryPriorityQueue, NodeJobQueue};
    use crate::dispatcher::broker::{MemoryBroker, MessageBroker, Subscription};
    use crate::dispatcher::handlers::{MessageHandler, OtlJobHandler};
    use crate::dispatcher::protocol::TOPIC_OTL_JOB;
    use crate::dispatcher::status_manager::NodeJobStatusManager;
    use crate::dispatcher::store::{JobStore, MemoryJobStore};
    use crate::dispatcher::types::*;
    use crate::planner::JobPlanner;
    use crate::planner::error::{PlanningError, TranslationError};
    use crate::planner::result_address::StorageClass;
    use crate::pool::pool::WorkerPool;
    use crate::pool::types::{EngineType, WorkerId};
    use crate::query::handlers::{handle_check_job, handle_make_job};
    use crate::query::manager::QueryManager;
    use crate::query::protocol::{JobIdParams, MakeJobRequest};
    use crate::query::types::{QueryDefaults, QueryError};
    use axum::extract::{Extension, Json, Query};
    use axum::http::StatusCode;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    struct Setup {
        store: Arc<MemoryJobStore>,
        broker: Arc<MemoryBroker>,
        manager: Arc<QueryManager>,
    }

    async fn setup() -> Setup {
        let store = Arc::new(MemoryJobStore::new());
        let broker = Arc::new(MemoryBroker::new());

        let syntax: BTreeMap<String, serde_json::Value> = ["readfile", "otstats"]
            .iter()
            .map(|name| (name.to_string(), json!({})))
            .collect();
        store
            .register_worker(WorkerRegistration {
                uuid: WorkerId("spark-1".into()),
                engine_type: EngineType::new("SPARK"),
                host_id: "host-a".to_string(),
                resources: HashMap::from([("job_capacity".to_string(), 4)]),
                command_syntax: syntax,
                active: true,
            })
            .await
            .unwrap();

        let planner = JobPlanner::new(
            vec![
                EngineType::new("SPARK"),
                EngineType::new("EEP"),
                EngineType::post_processing(),
            ],
            false,
        );
        let manager = Arc::new(QueryManager::new(
            store.clone(),
            broker.clone(),
            planner,
            QueryDefaults {
                cache_ttl: 60,
                timeout: 0,
                shared_post_processing: true,
            },
        ));

        Setup {
            store,
            broker,
            manager,
        }
    }

    fn request(query: &str) -> MakeJobRequest {
        MakeJobRequest {
            user: "tester".to_string(),
            ..MakeJobRequest::new(query)
        }
    }

    fn published(subscription: &mut Subscription) -> Vec<serde_json::Value> {
        std::iter::from_fn(|| subscription.try_next()).collect()
    }

    // ============================================================
    // MAKEJOB TESTS
    // ============================================================

    #[tokio::test]
    async fn test_make_job_persists_plan_and_publishes_leaves() {
        let s = setup().await;
        let mut otl_job = s.broker.subscribe(TOPIC_OTL_JOB).await.unwrap();

        let submission = s
            .manager
            .make_job(MakeJobRequest {
                cache_ttl: Some(30),
                ..request("readfile a | readfile b | set_cache ttl=15 | readfile c")
            })
            .await
            .unwrap();

        let query = s.store.query(&submission.job_id).await.unwrap().unwrap();
        assert_eq!(query.status, QueryStatus::Planned);
        assert_eq!(query.user, "tester");
        assert_eq!(query.cache_ttl, 30);

        let jobs = s.store.query_jobs(&submission.job_id).await.unwrap();
        assert_eq!(jobs.len(), 2);
        let root = jobs.iter().find(|job| job.next_job.is_none()).unwrap();
        let child = jobs.iter().find(|job| job.next_job.is_some()).unwrap();

        assert_eq!(child.next_job.as_ref(), Some(&root.uuid));
        assert_eq!(child.cache_ttl, 15);
        assert_eq!(root.cache_ttl, 30);
        assert!(jobs.iter().all(|job| job.status == NodeJobStatus::Planned));

        assert_eq!(submission.storage, root.address.storage);
        assert_eq!(submission.path, root.address.path);

        let child_row = s.store.result(&child.address).await.unwrap().unwrap();
        assert_eq!(child_row.status, ResultStatus::NotExist);
        assert_eq!(child_row.ttl, 15);

        let messages = published(&mut otl_job);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["command_name"], "NEW_OTL_JOB");
        let leaves = messages[0]["command"]["node_jobs"].as_array().unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0]["uuid"], child.uuid.0.as_str());
    }

    #[tokio::test]
    async fn test_make_job_rejects_bad_syntax() {
        let s = setup().await;

        let error = s
            .manager
            .make_job(request("readfile [otstats"))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            QueryError::Translation(TranslationError::UnterminatedSubsearch(_))
        ));
        assert!(
            s.store
                .queries_with_status(QueryStatus::Planned)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_make_job_rejects_unsupported_command() {
        let s = setup().await;

        let error = s
            .manager
            .make_job(request("readfile a | nosuchcommand"))
            .await
            .unwrap_err();

        match error {
            QueryError::Planning(PlanningError::UnsupportedCommand(name)) => {
                assert_eq!(name, "nosuchcommand")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    // ============================================================
    // CHECKJOB / GETRESULT / CANCEL TESTS
    // ============================================================

    #[tokio::test]
    async fn test_check_job_reports_progress() {
        let s = setup().await;
        let submission = s
            .manager
            .make_job(request("readfile a | set_cache ttl=15 | readfile b"))
            .await
            .unwrap();

        let state = s.manager.check_job(&submission.job_id).await.unwrap();
        assert_eq!(state.status, QueryStatus::Planned);
        assert_eq!(state.status_text, "Planned");

        let jobs = s.store.query_jobs(&submission.job_id).await.unwrap();
        let child = jobs.iter().find(|job| job.next_job.is_some()).unwrap();
        s.store
            .compare_and_set_status(&child.uuid, NodeJobStatus::Planned, NodeJobStatus::Running, "")
            .await
            .unwrap();
        s.store
            .set_query_status(&submission.job_id, QueryStatus::Running, "Running")
            .await
            .unwrap();

        let state = s.manager.check_job(&submission.job_id).await.unwrap();
        assert_eq!(state.status, QueryStatus::Running);
        assert_eq!(state.status_text, "Running 1 of 2 node_jobs. Finished 0");
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let s = setup().await;
        let missing = QueryId::new();

        assert!(matches!(
            s.manager.check_job(&missing).await,
            Err(QueryError::NotFound(id)) if id == missing
        ));
        assert!(matches!(
            s.manager.cancel(&missing).await,
            Err(QueryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_result_needs_finished_job() {
        let s = setup().await;
        let submission = s.manager.make_job(request("readfile a")).await.unwrap();

        assert!(matches!(
            s.manager.get_result(&submission.job_id).await,
            Err(QueryError::NotFinished(_, QueryStatus::Planned))
        ));

        s.store
            .set_query_status(&submission.job_id, QueryStatus::Finished, "Finished")
            .await
            .unwrap();

        let result = s.manager.get_result(&submission.job_id).await.unwrap();
        assert_eq!(
            result.data_url,
            format!("{}/{}/jsonl/data.json", submission.storage.as_str(), submission.path)
        );
        assert_eq!(
            result.schema_url,
            format!("{}/{}/jsonl/_SCHEMA", submission.storage.as_str(), submission.path)
        );
    }

    #[tokio::test]
    async fn test_cancel_publishes_unfinished_jobs() {
        let s = setup().await;
        let submission = s
            .manager
            .make_job(request("readfile a | set_cache ttl=15 | readfile b"))
            .await
            .unwrap();
        let mut otl_job = s.broker.subscribe(TOPIC_OTL_JOB).await.unwrap();
        published(&mut otl_job);

        let state = s.manager.cancel(&submission.job_id).await.unwrap();
        assert_eq!(state.status, QueryStatus::Canceled);
        assert_eq!(state.status_text, "Canceled by user");

        let messages = published(&mut otl_job);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["command_name"], "CANCEL_JOB");
        assert_eq!(messages[0]["command"]["node_jobs"].as_array().unwrap().len(), 2);

        // already canceled: nothing more to publish
        s.manager.cancel(&submission.job_id).await.unwrap();
        assert!(published(&mut otl_job).is_empty());
    }

    // ============================================================
    // END TO END TESTS
    // ============================================================

    #[tokio::test]
    async fn test_query_runs_to_result() {
        let s = setup().await;
        let pool = Arc::new(WorkerPool::new("host-a", vec!["job_capacity".to_string()]));
        pool.register(
            WorkerId("spark-1".into()),
            EngineType::new("SPARK"),
            "host-a",
            HashMap::from([("job_capacity".to_string(), 4)]),
        );
        let status_manager = Arc::new(NodeJobStatusManager::new(
            s.store.clone(),
            s.broker.clone(),
            pool,
            Arc::new(NodeJobQueue::new(Arc::new(MemoryPriorityQueue::new()))),
        ));
        let otl_handler = OtlJobHandler::new(status_manager.clone());

        let mut otl_job = s.broker.subscribe(TOPIC_OTL_JOB).await.unwrap();
        let submission = s
            .manager
            .make_job(request("readfile a | set_cache ttl=15 | otstats"))
            .await
            .unwrap();

        for message in published(&mut otl_job) {
            otl_handler.handle(message).await.unwrap();
        }

        let mut order = s.store.query_jobs(&submission.job_id).await.unwrap();
        order.sort_by_key(|job| job.next_job.is_none());

        for job in &order {
            let current = s.store.node_job(&job.uuid).await.unwrap().unwrap();
            assert_eq!(current.status, NodeJobStatus::SentToComputingNode);

            status_manager
                .change_status(&job.uuid, NodeJobStatus::Running, "")
                .await
                .unwrap();
            status_manager
                .change_status(&job.uuid, NodeJobStatus::Finished, "")
                .await
                .unwrap();
        }

        let state = s.manager.check_job(&submission.job_id).await.unwrap();
        assert_eq!(state.status, QueryStatus::Finished);

        let result = s.manager.get_result(&submission.job_id).await.unwrap();
        assert!(result.data_url.ends_with("/jsonl/data.json"));
    }

    // ============================================================
    // HTTP HANDLER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_http_make_and_check_job() {
        let s = setup().await;

        let (status, Json(created)) =
            handle_make_job(Extension(s.manager.clone()), Json(request("readfile a")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created.status, "success");
        assert_eq!(created.storage_type, StorageClass::InterprocStorage);

        let (_, Json(checked)) = handle_check_job(
            Extension(s.manager.clone()),
            Query(JobIdParams {
                job_id: created.job_id,
            }),
        )
        .await
        .unwrap();
        assert_eq!(checked.job_status, QueryStatus::Planned);
    }

    #[tokio::test]
    async fn test_http_errors_map_to_status_codes() {
        let s = setup().await;

        let (status, Json(body)) = handle_check_job(
            Extension(s.manager.clone()),
            Query(JobIdParams {
                job_id: QueryId::new(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.status, "error");

        let (status, _) = handle_make_job(Extension(s.manager.clone()), Json(request("")))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
