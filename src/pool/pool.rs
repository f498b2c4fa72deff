use super::types::{EngineType, WorkerId, WorkerRecord};

use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct WorkerPool {
    pub workers: DashMap<WorkerId, WorkerRecord>,
    /// Resource keys compared first when ranking load, most significant first.
    resource_order: Vec<String>,
    /// Host of this dispatcher, used to decide `WorkerRecord::is_local`.
    host_id: String,
}

impl WorkerPool {
    pub fn new(host_id: impl Into<String>, resource_order: Vec<String>) -> Self {
        Self {
            workers: DashMap::new(),
            resource_order,
            host_id: host_id.into(),
        }
    }

    /// Adds or replaces a node. Usage starts at zero for every declared resource.
    pub fn register(
        &self,
        id: WorkerId,
        engine_type: EngineType,
        host_id: &str,
        capacity: HashMap<String, i64>,
    ) -> WorkerRecord {
        let usage = capacity.keys().map(|key| (key.clone(), 0)).collect();
        let record = WorkerRecord {
            id: id.clone(),
            engine_type,
            host_id: host_id.to_string(),
            is_local: host_id == self.host_id,
            capacity,
            usage,
            last_heartbeat: Instant::now(),
        };

        tracing::info!(
            "Computing node {} registered ({}, host {}, local={})",
            id,
            record.engine_type,
            record.host_id,
            record.is_local
        );

        self.workers.insert(id, record.clone());
        record
    }

    pub fn deregister(&self, id: &WorkerId) -> Option<WorkerRecord> {
        let removed = self.workers.remove(id).map(|(_, record)| record);
        if removed.is_some() {
            tracing::info!("Computing node {} removed from pool ({} left)", id, self.workers.len());
        }
        removed
    }

    /// Applies a heartbeat. Returns the node's engine type, or `None` for an unknown node.
    pub fn update_usage(&self, id: &WorkerId, usage: HashMap<String, i64>) -> Option<EngineType> {
        let mut record = self.workers.get_mut(id)?;
        record.usage.extend(usage);
        record.last_heartbeat = Instant::now();
        Some(record.engine_type.clone())
    }

    pub fn get(&self, id: &WorkerId) -> Option<WorkerRecord> {
        self.workers.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn engine_types(&self) -> Vec<EngineType> {
        let mut types: Vec<EngineType> = self
            .workers
            .iter()
            .map(|entry| entry.value().engine_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Picks the available node of `engine_type` with the smallest usage.
    ///
    /// Usage vectors are compared over the configured resource keys in order, then over
    /// any remaining keys alphabetically; ties go to the smaller node id.
    pub fn least_loaded(&self, engine_type: &EngineType, local_only: bool) -> Option<WorkerId> {
        let candidates: Vec<WorkerRecord> = self
            .workers
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|worker| &worker.engine_type == engine_type)
            .filter(|worker| !local_only || worker.is_local)
            .filter(|worker| worker.is_available())
            .collect();

        candidates
            .into_iter()
            .min_by(|a, b| self.compare_load(a, b))
            .map(|worker| worker.id)
    }

    pub fn available_count(&self, engine_type: &EngineType) -> usize {
        self.workers
            .iter()
            .filter(|entry| {
                let worker = entry.value();
                &worker.engine_type == engine_type && worker.is_available()
            })
            .count()
    }

    fn compare_load(&self, a: &WorkerRecord, b: &WorkerRecord) -> Ordering {
        let mut remaining: Vec<&String> = a
            .usage
            .keys()
            .chain(b.usage.keys())
            .filter(|key| !self.resource_order.contains(key))
            .collect();
        remaining.sort();
        remaining.dedup();

        let keys = self.resource_order.iter().chain(remaining);
        for key in keys {
            match a.used(key).cmp(&b.used(key)) {
                Ordering::Equal => continue,
                other => return other,
            }
        }

        a.id.cmp(&b.id)
    }

    /// Nodes whose last heartbeat is older than `timeout`.
    pub fn inactive_workers(&self, timeout: Duration) -> Vec<WorkerId> {
        let now = Instant::now();
        self.workers
            .iter()
            .filter(|entry| now.duration_since(entry.value().last_heartbeat) > timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }
}
