//! Message Broker
//!
//! Topic-based publish/subscribe. Every subscriber of a topic receives every
//! message published after it subscribed. Messages published to a topic with no
//! subscriber are kept and handed to the first one that shows up, so a computing
//! node that subscribes late still gets its work.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, topic: &str, message: serde_json::Value) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription>;
}

/// Receiving end of a topic subscription.
pub struct Subscription {
    pub topic: String,
    receiver: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl Subscription {
    /// Waits for the next message. `None` once the broker is gone.
    pub async fn next(&mut self) -> Option<serde_json::Value> {
        self.receiver.recv().await
    }

    /// Next message if one is already waiting.
    pub fn try_next(&mut self) -> Option<serde_json::Value> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Default)]
struct TopicState {
    subscribers: Vec<mpsc::UnboundedSender<serde_json::Value>>,
    backlog: Vec<serde_json::Value>,
}

/// In-process broker used when the dispatcher runs standalone.
#[derive(Default)]
pub struct MemoryBroker {
    topics: DashMap<String, TopicState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(&self, topic: &str, message: serde_json::Value) -> Result<()> {
        let mut state = self.topics.entry(topic.to_string()).or_default();

        state.subscribers.retain(|sender| !sender.is_closed());

        if state.subscribers.is_empty() {
            tracing::trace!("No subscriber on {}, keeping message", topic);
            state.backlog.push(message);
            return Ok(());
        }

        for sender in &state.subscribers {
            // a receiver dropped since the retain above is simply skipped
            let _ = sender.send(message.clone());
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.topics.entry(topic.to_string()).or_default();

        for message in state.backlog.drain(..) {
            let _ = sender.send(message);
        }
        state.subscribers.push(sender);

        tracing::debug!("New subscriber on {} ({} total)", topic, state.subscribers.len());

        Ok(Subscription {
            topic: topic.to_string(),
            receiver,
        })
    }
}
