//! Engine Type Assignment
//!
//! Chooses an engine type for every command so that the number of dataframe
//! transfers between engines is minimal.
//!
//! Bottom-up, `weight[n][T]` is the least number of engine switches in the subtree
//! of `n` if `n` runs on `T` (`INF` if `T` does not implement the command).
//! Top-down, each node takes the cheapest type given its parent's choice, ties
//! going to the type listed first in the priority order. Awaited pipelines do not
//! feed a dataframe and are assigned on their own.

use super::catalog::CommandCatalog;
use super::command_tree::CommandTree;
use super::error::PlanningError;
use crate::pool::types::EngineType;

use std::collections::HashMap;

pub const INF: u64 = u64::MAX;

/// Per-node weights for one assignment pass, indexed like the priority list.
struct WeightTree {
    weights: HashMap<usize, Vec<u64>>,
}

impl WeightTree {
    fn build(
        tree: &CommandTree,
        order: &[usize],
        catalog: &CommandCatalog,
        priority: &[EngineType],
    ) -> Result<Self, PlanningError> {
        let mut weights: HashMap<usize, Vec<u64>> = HashMap::new();

        for &id in order.iter().rev() {
            let node = tree.node(id);
            let children = node.dataframe_children();

            let row: Vec<u64> = priority
                .iter()
                .enumerate()
                .map(|(index, engine_type)| {
                    if !catalog.supports(engine_type, &node.command.name) {
                        return INF;
                    }
                    children.iter().fold(0u64, |total, child| {
                        total.saturating_add(cheapest_under(&weights[child], index))
                    })
                })
                .collect();

            if row.iter().all(|weight| *weight >= INF) {
                return Err(PlanningError::UnsupportedCommand(node.command.name.clone()));
            }

            weights.insert(id, row);
        }

        Ok(Self { weights })
    }

    fn row(&self, id: usize) -> &[u64] {
        &self.weights[&id]
    }
}

/// Cheapest cost of a child row when its parent runs on `parent_index`.
fn cheapest_under(row: &[u64], parent_index: usize) -> u64 {
    row.iter()
        .enumerate()
        .map(|(index, weight)| weight.saturating_add(u64::from(index != parent_index)))
        .min()
        .unwrap_or(INF)
}

/// First index with the minimal cost; `penalty_from` adds one for every index
/// that differs from the parent's.
fn pick(row: &[u64], penalty_from: Option<usize>) -> usize {
    let mut best = 0;
    let mut best_cost = INF;

    for (index, weight) in row.iter().enumerate() {
        let switch = penalty_from.is_some_and(|parent| parent != index);
        let cost = weight.saturating_add(u64::from(switch));
        if cost < best_cost {
            best = index;
            best_cost = cost;
        }
    }

    best
}

/// Assigns `engine_type` on every node of the tree, awaited pipelines included.
pub fn assign_engine_types(
    tree: &mut CommandTree,
    catalog: &CommandCatalog,
    priority: &[EngineType],
) -> Result<(), PlanningError> {
    let mut pending = vec![tree.root];

    while let Some(top) = pending.pop() {
        assign_dataframe_subtree(tree, top, catalog, priority)?;
        pending.extend(tree.awaited_roots(top));
    }

    Ok(())
}

fn assign_dataframe_subtree(
    tree: &mut CommandTree,
    top: usize,
    catalog: &CommandCatalog,
    priority: &[EngineType],
) -> Result<(), PlanningError> {
    let order = tree.dataframe_subtree(top);
    let weights = WeightTree::build(tree, &order, catalog, priority)?;
    let mut chosen: HashMap<usize, usize> = HashMap::new();

    for &id in &order {
        let parent = if id == top {
            None
        } else {
            let node = tree.node(id);
            node.next.or(node.subsearch_of)
        };

        let parent_index = parent.and_then(|parent| chosen.get(&parent).copied());
        let index = pick(weights.row(id), parent_index);

        chosen.insert(id, index);
        tree.nodes[id].engine_type = Some(priority[index].clone());
    }

    tracing::trace!(
        "Assigned engine types for {} commands, {} switches",
        order.len(),
        weights.row(top)[chosen[&top]]
    );

    Ok(())
}
