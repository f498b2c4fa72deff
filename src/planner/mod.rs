//! Job Planner Module
//!
//! Turns a translated query into a tree of node jobs ready for the dispatcher.
//!
//! ## Pipeline
//! 1. **`command_tree`**: Builds the command tree, resolving `async`/`await` futures
//!    and `set_cache` directives.
//! 2. **`node_type`**: Assigns every command the engine type that minimizes dataframe
//!    transfers between engines.
//! 3. **`node_job_tree`**: Cuts the tree into node jobs at engine boundaries, inserts
//!    the bridging commands and computes content-addressed result locations.
//!
//! Planning is synchronous and side-effect free apart from the timestamp salt
//! counter; failures come back as `PlanningError`.

pub mod catalog;
pub mod command;
pub mod command_tree;
pub mod error;
pub mod node_job_tree;
pub mod node_type;
pub mod result_address;
pub mod translator;


use catalog::CommandCatalog;
use command::Command;
use command_tree::CommandTree;
use error::PlanningError;
use node_job_tree::{NodeJobTree, SplitOptions};
use crate::pool::types::EngineType;

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-query planning options.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub tws: i64,
    pub twf: i64,
    pub shared_post_processing: bool,
    /// Overrides the planner-wide subsearch policy when set.
    pub subsearch_is_node_job: Option<bool>,
}

pub struct JobPlanner {
    engine_priority: Vec<EngineType>,
    subsearch_is_node_job: bool,
    /// Last timestamp salt handed out, microseconds.
    last_salt: AtomicU64,
}

impl JobPlanner {
    pub fn new(engine_priority: Vec<EngineType>, subsearch_is_node_job: bool) -> Self {
        Self {
            engine_priority,
            subsearch_is_node_job,
            last_salt: AtomicU64::new(0),
        }
    }

    /// Configured priority completed with every registered engine type.
    /// `POST_PROCESSING` always comes last.
    pub fn priority_for(&self, catalog: &CommandCatalog) -> Vec<EngineType> {
        let mut priority: Vec<EngineType> = self
            .engine_priority
            .iter()
            .filter(|engine_type| !engine_type.is_post_processing())
            .cloned()
            .collect();

        for engine_type in catalog.engine_types() {
            if !engine_type.is_post_processing() && !priority.contains(&engine_type) {
                priority.push(engine_type);
            }
        }

        priority.push(EngineType::post_processing());
        priority
    }

    pub fn plan(
        &self,
        commands: Vec<Command>,
        catalog: &CommandCatalog,
        options: &PlanOptions,
    ) -> Result<NodeJobTree, PlanningError> {
        let mut tree = CommandTree::construct(commands)?;

        let priority = self.priority_for(catalog);
        node_type::assign_engine_types(&mut tree, catalog, &priority)?;

        let split = SplitOptions {
            tws: options.tws,
            twf: options.twf,
            shared_post_processing: options.shared_post_processing,
            subsearch_is_node_job: options
                .subsearch_is_node_job
                .unwrap_or(self.subsearch_is_node_job),
        };

        let mut next_salt = || self.next_salt();
        let jobs = NodeJobTree::construct(&tree, catalog, &split, &mut next_salt);

        tracing::info!(
            "Planned {} commands into {} node jobs (root on {})",
            tree.len(),
            jobs.len(),
            jobs.job(jobs.root).engine_type
        );

        Ok(jobs)
    }

    /// Strictly increasing, close to the wall clock in microseconds.
    fn next_salt(&self) -> u64 {
        let now = crate::now_ms() * 1000;
        let previous = self
            .last_salt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }
}
