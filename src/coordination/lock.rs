//! Distributed Mutual Exclusion
//!
//! A non-blocking try-lock keyed by operation name. Losing the race is a normal
//! outcome: the caller skips the guarded operation because another dispatcher
//! instance is already performing it.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

/// Proof of ownership returned by a successful `try_acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub name: String,
    pub value: String,
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Returns `None` if somebody else holds the lock.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>>;

    /// Releases the lock if it is still owned by `token`.
    async fn release(&self, token: LockToken) -> Result<()>;
}

fn new_token(name: &str) -> LockToken {
    LockToken {
        name: name.to_string(),
        value: uuid::Uuid::new_v4().to_string(),
    }
}

/// Always succeeds. For a single dispatcher process.
pub struct NoopLock;

#[async_trait]
impl DistributedLock for NoopLock {
    async fn try_acquire(&self, name: &str, _ttl: Duration) -> Result<Option<LockToken>> {
        Ok(Some(new_token(name)))
    }

    async fn release(&self, _token: LockToken) -> Result<()> {
        Ok(())
    }
}

/// Lock table local to the process, with expiry.
#[derive(Default)]
pub struct MemoryLock {
    held: DashMap<String, (String, Instant)>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let token = new_token(name);
        let expires = Instant::now() + ttl;

        match self.held.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().1 > Instant::now() {
                    return Ok(None);
                }
                entry.insert((token.value.clone(), expires));
            }
            Entry::Vacant(entry) => {
                entry.insert((token.value.clone(), expires));
            }
        }

        Ok(Some(token))
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        self.held
            .remove_if(&token.name, |_, (value, _)| *value == token.value);
        Ok(())
    }
}
