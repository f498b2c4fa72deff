//! Redis Backends
//!
//! `RedisPriorityQueue` keeps each queue in a sorted set; `RedisLock` uses
//! `SET key token NX PX ttl` and a compare-and-delete script for release.

use super::lock::{DistributedLock, LockToken};
use super::priority_queue::PriorityQueue;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

const RELEASE_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

pub struct RedisPriorityQueue {
    client: redis::Client,
}

impl RedisPriorityQueue {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("invalid redis url {}", redis_url))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PriorityQueue for RedisPriorityQueue {
    async fn push(&self, queue: &str, element: &str, score: u64) -> Result<()> {
        let mut conn = self.client.get_async_connection().await?;
        redis::cmd("ZADD")
            .arg(queue)
            .arg(score)
            .arg(element)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop_min(&self, queue: &str) -> Result<Option<(String, u64)>> {
        let mut conn = self.client.get_async_connection().await?;
        let reply: Vec<String> = redis::cmd("ZPOPMIN")
            .arg(queue)
            .arg(1)
            .query_async(&mut conn)
            .await?;

        match reply.as_slice() {
            [element, score] => {
                // sorted set scores come back as floats
                let score = score
                    .parse::<f64>()
                    .with_context(|| format!("bad score {} in {}", score, queue))?;
                Ok(Some((element.clone(), score as u64)))
            }
            [] => Ok(None),
            other => Err(anyhow::anyhow!(
                "unexpected ZPOPMIN reply of {} items",
                other.len()
            )),
        }
    }

    async fn remove(&self, queue: &str, element: &str) -> Result<bool> {
        let mut conn = self.client.get_async_connection().await?;
        let removed: i64 = redis::cmd("ZREM")
            .arg(queue)
            .arg(element)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        let mut conn = self.client.get_async_connection().await?;
        let len: usize = redis::cmd("ZCARD")
            .arg(queue)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

pub struct RedisLock {
    client: redis::Client,
}

impl RedisLock {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("invalid redis url {}", redis_url))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let token = LockToken {
            name: name.to_string(),
            value: uuid::Uuid::new_v4().to_string(),
        };

        let mut conn = self.client.get_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(&token.value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        if reply.is_some() {
            tracing::debug!("Acquired lock {}", name);
            Ok(Some(token))
        } else {
            tracing::debug!("Lock {} is held by another dispatcher", name);
            Ok(None)
        }
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        let mut conn = self.client.get_async_connection().await?;
        redis::cmd("EVAL")
            .arg(RELEASE_SCRIPT)
            .arg(1)
            .arg(&token.name)
            .arg(&token.value)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }
}
