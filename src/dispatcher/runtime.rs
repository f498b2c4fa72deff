//! Dispatcher Runtime
//!
//! Wires the topic handlers to the broker and runs the periodic maintenance:
//! evicting silent computing nodes, promoting queued node jobs and canceling
//! queries whose timeout expired.

use super::broker::{MessageBroker, Subscription};
use super::handlers::*;
use super::status_manager::NodeJobStatusManager;
use super::store::JobStore;
use super::types::QueryStatus;
use crate::config::OrchestratorConfig;
use crate::coordination::lock::DistributedLock;
use crate::coordination::priority_queue::NodeJobQueue;
use crate::pool::pool::WorkerPool;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn MessageBroker>,
    pool: Arc<WorkerPool>,
    manager: Arc<NodeJobStatusManager>,
    lock: Arc<dyn DistributedLock>,
    handlers: Vec<Arc<dyn MessageHandler>>,
    worker_timeout: Duration,
    health_check_interval: Duration,
    queue_check_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        config: &OrchestratorConfig,
        store: Arc<dyn JobStore>,
        broker: Arc<dyn MessageBroker>,
        pool: Arc<WorkerPool>,
        queue: Arc<NodeJobQueue>,
        lock: Arc<dyn DistributedLock>,
    ) -> Arc<Self> {
        let manager = Arc::new(NodeJobStatusManager::new(
            store.clone(),
            broker.clone(),
            pool.clone(),
            queue,
        ));

        let handlers: Vec<Arc<dyn MessageHandler>> = vec![
            Arc::new(ComputingNodeControlHandler::new(
                pool.clone(),
                store.clone(),
                lock.clone(),
                manager.clone(),
            )),
            Arc::new(OtlJobHandler::new(manager.clone())),
            Arc::new(NodeJobStatusHandler::new(store.clone(), manager.clone())),
        ];

        Arc::new(Self {
            store,
            broker,
            pool,
            manager,
            lock,
            handlers,
            worker_timeout: config.worker_timeout,
            health_check_interval: config.health_check_interval,
            queue_check_interval: config.queue_check_interval,
        })
    }

    pub fn manager(&self) -> Arc<NodeJobStatusManager> {
        self.manager.clone()
    }

    /// Subscribes every handler and spawns the consume and maintenance loops.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        for handler in &self.handlers {
            let subscription = self.broker.subscribe(handler.topic()).await?;
            tokio::spawn(consume(handler.clone(), subscription));
        }

        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dispatcher.health_check_interval);
            loop {
                interval.tick().await;
                if let Err(e) = dispatcher.check_health().await {
                    tracing::error!("Health check failed: {:#}", e);
                }
            }
        });

        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dispatcher.queue_check_interval);
            loop {
                interval.tick().await;
                if let Err(e) = dispatcher.promote_queues().await {
                    tracing::error!("Queue check failed: {:#}", e);
                }
                if let Err(e) = dispatcher.expire_queries().await {
                    tracing::error!("Timeout check failed: {:#}", e);
                }
            }
        });

        tracing::info!("Dispatcher started with {} topic handlers", self.handlers.len());
        Ok(())
    }

    /// One pass of every periodic task.
    pub async fn run_maintenance(&self) -> Result<()> {
        self.check_health().await?;
        self.promote_queues().await?;
        self.expire_queries().await
    }

    /// Evicts nodes without a recent heartbeat and fails the work they held.
    pub async fn check_health(&self) -> Result<()> {
        for id in self.pool.inactive_workers(self.worker_timeout) {
            let Some(record) = self.pool.deregister(&id) else {
                continue;
            };
            tracing::warn!("Computing node {} is inactive, evicting", id);

            // every dispatcher evicts from its own pool, one of them records it
            if acquire_unregister_lock(self.lock.as_ref(), &id).await? {
                self.store.deactivate_worker(&id).await?;
            }
            self.manager
                .fail_worker_jobs(&id, &format!("Computing node {} is inactive", id))
                .await?;
            self.manager.check_queue(&record.engine_type).await?;
        }

        Ok(())
    }

    pub async fn promote_queues(&self) -> Result<()> {
        for engine_type in self.pool.engine_types() {
            for _ in 0..self.pool.available_count(&engine_type) {
                self.manager.check_queue(&engine_type).await?;
            }
        }

        Ok(())
    }

    pub async fn expire_queries(&self) -> Result<()> {
        let now = crate::now_ms();

        for status in [QueryStatus::New, QueryStatus::Planned, QueryStatus::Running] {
            for query in self.store.queries_with_status(status).await? {
                if query.timed_out(now) {
                    tracing::info!("Query {} exceeded its {}s timeout", query.uuid, query.timeout);
                    self.manager
                        .cancel_query(&query.uuid, "Timeout expired")
                        .await?;
                }
            }
        }

        Ok(())
    }
}

/// Handles messages of one topic in order. Each message runs in its own task so
/// a panicking handler does not stop the loop.
async fn consume(handler: Arc<dyn MessageHandler>, mut subscription: Subscription) {
    tracing::debug!("Consuming {}", subscription.topic);

    while let Some(message) = subscription.next().await {
        let task_handler = handler.clone();
        let outcome = tokio::spawn(async move { task_handler.handle(message).await }).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Handler for {} failed: {:#}", subscription.topic, e),
            Err(e) => tracing::error!("Handler for {} panicked: {}", subscription.topic, e),
        }
    }

    tracing::warn!("Subscription to {} closed", subscription.topic);
}
