//! Broker HTTP Bridge
//!
//! Lets computing nodes in other processes publish on a topic and long-poll
//! their job topic. The first poll of a topic subscribes the bridge once; that
//! subscription outlives the request, so anything published between two polls
//! stays buffered until the next one. Pollers of the same topic share it.

use super::broker::{MessageBroker, Subscription};
use super::protocol::*;

use anyhow::Result;
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const MAX_POLL_TIMEOUT_MS: u64 = 60_000;

pub struct TopicBridge {
    broker: Arc<dyn MessageBroker>,
    subscriptions: Mutex<HashMap<String, Arc<Mutex<Subscription>>>>,
}

impl TopicBridge {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            broker,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn publish(&self, topic: &str, message: serde_json::Value) -> Result<()> {
        self.broker.publish(topic, message).await
    }

    /// Waits up to `wait` for the first message, then takes everything buffered.
    pub async fn poll(&self, topic: &str, wait: Duration) -> Result<Vec<serde_json::Value>> {
        let subscription = self.subscription(topic).await?;
        let mut subscription = subscription.lock().await;
        let mut messages = Vec::new();

        // no await between receiving and returning, a dropped request loses nothing
        if let Ok(Some(first)) = tokio::time::timeout(wait, subscription.next()).await {
            messages.push(first);
            while let Some(message) = subscription.try_next() {
                messages.push(message);
            }
        }

        Ok(messages)
    }

    async fn subscription(&self, topic: &str) -> Result<Arc<Mutex<Subscription>>> {
        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(existing) = subscriptions.get(topic) {
            return Ok(existing.clone());
        }

        tracing::debug!("HTTP bridge subscribing to {}", topic);
        let subscription = Arc::new(Mutex::new(self.broker.subscribe(topic).await?));
        subscriptions.insert(topic.to_string(), subscription.clone());
        Ok(subscription)
    }
}

pub async fn handle_publish(
    Extension(bridge): Extension<Arc<TopicBridge>>,
    Path(topic): Path<String>,
    Json(message): Json<serde_json::Value>,
) -> StatusCode {
    match bridge.publish(&topic, message).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::error!("Failed to publish on {}: {:#}", topic, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_poll(
    Extension(bridge): Extension<Arc<TopicBridge>>,
    Path(topic): Path<String>,
    Query(params): Query<PollParams>,
) -> (StatusCode, Json<PollResponse>) {
    let wait = Duration::from_millis(params.timeout_ms.min(MAX_POLL_TIMEOUT_MS));

    match bridge.poll(&topic, wait).await {
        Ok(messages) => {
            tracing::trace!("Poll on {} returned {} messages", topic, messages.len());
            (StatusCode::OK, Json(PollResponse { topic, messages }))
        }
        Err(e) => {
            tracing::error!("Failed to poll {}: {:#}", topic, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PollResponse {
                    topic,
                    messages: Vec::new(),
                }),
            )
        }
    }
}
