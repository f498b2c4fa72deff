use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use otl_orchestrator::config::OrchestratorConfig;
use otl_orchestrator::coordination::lock::{DistributedLock, NoopLock};
use otl_orchestrator::coordination::priority_queue::{
    MemoryPriorityQueue, NodeJobQueue, PriorityQueue,
};
use otl_orchestrator::coordination::redis_backend::{RedisLock, RedisPriorityQueue};
use otl_orchestrator::dispatcher::broker::{MemoryBroker, MessageBroker};
use otl_orchestrator::dispatcher::http::{TopicBridge, handle_poll, handle_publish};
use otl_orchestrator::dispatcher::protocol::ENDPOINT_TOPIC;
use otl_orchestrator::dispatcher::runtime::Dispatcher;
use otl_orchestrator::dispatcher::store::{JobStore, MemoryJobStore};
use otl_orchestrator::planner::JobPlanner;
use otl_orchestrator::pool::pool::WorkerPool;
use otl_orchestrator::query::handlers::{
    handle_cancel_job, handle_check_job, handle_get_result, handle_make_job,
};
use otl_orchestrator::query::manager::QueryManager;
use otl_orchestrator::query::protocol::*;
use otl_orchestrator::query::types::QueryDefaults;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help") {
        eprintln!(
            "Usage: {} [--bind <addr:port>] [--host-id <id>] [--engine-priority SPARK,EEP] \
             [--resource-order job_capacity,memory] [--redis <url>] [--standalone] \
             [--one-process] [--worker-timeout <secs>] [--log-level <level>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:6081 --host-id node-a", args[0]);
        std::process::exit(1);
    }

    let config = OrchestratorConfig::from_args(&args)?;

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();

    tracing::info!("Starting dispatcher {} on {}", config.host_id, config.bind);

    // 1. Coordination backends:
    let queue_backend: Arc<dyn PriorityQueue> = if config.standalone {
        tracing::info!("Standalone mode, node job queues are in-process");
        Arc::new(MemoryPriorityQueue::new())
    } else {
        tracing::info!("Node job queues in Redis at {}", config.redis_url);
        Arc::new(RedisPriorityQueue::new(&config.redis_url)?)
    };

    let lock: Arc<dyn DistributedLock> = if config.one_process_mode {
        Arc::new(NoopLock)
    } else {
        Arc::new(RedisLock::new(&config.redis_url)?)
    };

    // 2. Shared state:
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let broker: Arc<dyn MessageBroker> = Arc::new(MemoryBroker::new());
    let pool = Arc::new(WorkerPool::new(
        config.host_id.clone(),
        config.resource_order.clone(),
    ));
    let queue = Arc::new(NodeJobQueue::new(queue_backend));

    // 3. Dispatcher:
    let dispatcher = Dispatcher::new(
        &config,
        store.clone(),
        broker.clone(),
        pool.clone(),
        queue,
        lock,
    );
    dispatcher.start().await?;

    // 4. Query front end:
    let planner = JobPlanner::new(
        config.engine_priority.clone(),
        config.subsearch_is_node_job.unwrap_or(false),
    );
    let manager = Arc::new(QueryManager::new(
        store,
        broker.clone(),
        planner,
        QueryDefaults {
            cache_ttl: config.default_cache_ttl,
            timeout: config.default_timeout,
            shared_post_processing: config.shared_post_processing,
        },
    ));

    let bridge = Arc::new(TopicBridge::new(broker));

    let app = Router::new()
        .route(ENDPOINT_MAKE_JOB, post(handle_make_job))
        .route(ENDPOINT_CHECK_JOB, get(handle_check_job))
        .route(ENDPOINT_GET_RESULT, get(handle_get_result))
        .route(ENDPOINT_CANCEL_JOB, post(handle_cancel_job))
        .route(ENDPOINT_TOPIC, post(handle_publish).get(handle_poll))
        .layer(Extension(manager))
        .layer(Extension(bridge));

    // 5. Spawn pool reporter:
    let stats_pool = pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            tracing::info!("Computing nodes: {}", stats_pool.len());
            for engine_type in stats_pool.engine_types() {
                tracing::info!(
                    "  - {}: {} available",
                    engine_type,
                    stats_pool.available_count(&engine_type)
                );
            }
        }
    });

    // 6. Start HTTP server:
    tracing::info!("HTTP server listening on {}", config.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
