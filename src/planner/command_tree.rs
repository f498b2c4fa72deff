//! Command Tree
//!
//! Arena of command nodes addressed by index. Edges are stored in both directions
//! and only the builder in this module mutates them:
//! - `previous`/`next`: dataframe flow along the pipeline.
//! - `subsearches`/`subsearch_of`: dataframe-producing subsearch pipelines.
//! - `awaited`/`awaited_by`: background pipelines joined in later; they do not
//!   feed a dataframe and are planned as independent sub-problems.
//!
//! A pipeline is identified by its last node, which is where its dataframe comes out.

use super::command::{ASYNC, AWAIT, ArgValue, Command, SET_CACHE};
use super::error::PlanningError;
use crate::pool::types::EngineType;

use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone)]
pub struct CommandNode {
    /// The command; subsearch arguments are emptied and referenced from `subsearches`.
    pub command: Command,
    pub engine_type: Option<EngineType>,
    pub previous: Option<usize>,
    pub next: Option<usize>,
    /// `(argument index, pipeline root)` for each subsearch argument.
    pub subsearches: Vec<(usize, usize)>,
    pub subsearch_of: Option<usize>,
    pub awaited: Vec<usize>,
    pub awaited_by: Option<usize>,
    /// Set by a cache directive: the node must end a node job of its own.
    pub force_new_unit: bool,
    pub cache_ttl: Option<u64>,
    pub cache_key: Option<String>,
}

impl CommandNode {
    fn new(command: Command) -> Self {
        Self {
            command,
            engine_type: None,
            previous: None,
            next: None,
            subsearches: Vec::new(),
            subsearch_of: None,
            awaited: Vec::new(),
            awaited_by: None,
            force_new_unit: false,
            cache_ttl: None,
            cache_key: None,
        }
    }

    /// Nodes whose dataframe flows into this one.
    pub fn dataframe_children(&self) -> Vec<usize> {
        self.previous
            .into_iter()
            .chain(self.subsearches.iter().map(|(_, root)| *root))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct CommandTree {
    pub nodes: Vec<CommandNode>,
    pub root: usize,
}

impl CommandTree {
    /// Builds the tree from a translated pipeline.
    pub fn construct(commands: Vec<Command>) -> Result<Self, PlanningError> {
        let mut builder = TreeBuilder::default();
        let (root, dangling) = builder.build(commands)?;
        let root = root.ok_or(PlanningError::EmptyQuery)?;

        // Awaits with no command after them are joined by the final command.
        for awaited in dangling {
            builder.link_awaited(root, awaited);
        }

        if !builder.stashed.is_empty() {
            return Err(PlanningError::UnawaitedAsync(
                builder.stashed.into_keys().collect(),
            ));
        }

        Ok(Self {
            nodes: builder.nodes,
            root,
        })
    }

    pub fn node(&self, id: usize) -> &CommandNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes reachable from `top` over dataframe edges, parents before children.
    pub fn dataframe_subtree(&self, top: usize) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![top];
        while let Some(id) = stack.pop() {
            order.push(id);
            let mut children = self.nodes[id].dataframe_children();
            children.reverse();
            stack.extend(children);
        }
        order
    }

    /// Roots of every awaited pipeline hanging anywhere off the dataframe subtree of `top`.
    pub fn awaited_roots(&self, top: usize) -> Vec<usize> {
        self.dataframe_subtree(top)
            .into_iter()
            .flat_map(|id| self.nodes[id].awaited.clone())
            .collect()
    }
}

#[derive(Default)]
struct TreeBuilder {
    nodes: Vec<CommandNode>,
    stashed: BTreeMap<String, Vec<Command>>,
    consumed: HashSet<String>,
}

/// Pipeline being assembled: the current dataframe source and the awaited
/// pipelines that the next command will join.
#[derive(Default)]
struct PipelineState {
    previous: Option<usize>,
    awaited: Vec<usize>,
}

impl TreeBuilder {
    fn build(&mut self, commands: Vec<Command>) -> Result<(Option<usize>, Vec<usize>), PlanningError> {
        let mut state = PipelineState::default();

        for command in commands {
            match command.name.as_str() {
                ASYNC => self.stash_async(command)?,
                AWAIT => self.process_await(command, &mut state)?,
                SET_CACHE => self.process_cache(command, &state)?,
                _ => self.process_ordinary(command, &mut state)?,
            }
        }

        Ok((state.previous, state.awaited))
    }

    fn stash_async(&mut self, command: Command) -> Result<(), PlanningError> {
        let name = required_text(&command, "name")?;
        let subsearch = command
            .args
            .into_iter()
            .find_map(|arg| match arg.value {
                ArgValue::Subsearch(commands) => Some(commands),
                _ => None,
            })
            .ok_or_else(|| PlanningError::MissingArgument {
                command: ASYNC.to_string(),
                argument: "subsearch".to_string(),
            })?;

        if self.stashed.contains_key(&name) {
            return Err(PlanningError::DuplicateAsync(name));
        }

        tracing::trace!("Stashed async subsearch <{}>", name);
        self.stashed.insert(name, subsearch);
        Ok(())
    }

    fn process_await(&mut self, command: Command, state: &mut PipelineState) -> Result<(), PlanningError> {
        let name = required_text(&command, "name")?;
        let override_pipeline = command
            .named("override")
            .and_then(|value| value.as_text())
            .is_some_and(|value| value.eq_ignore_ascii_case("true"));

        let Some(subsearch) = self.stashed.remove(&name) else {
            return Err(if self.consumed.contains(&name) {
                PlanningError::DuplicateAwait(name)
            } else {
                PlanningError::UndefinedAwait(name)
            });
        };
        self.consumed.insert(name.clone());

        let (tree, nested_awaited) = self.build(subsearch)?;
        let tree = tree.ok_or(PlanningError::EmptySubsearch(format!("{} {}", ASYNC, name)))?;

        if override_pipeline {
            if let Some(previous) = state.previous.take() {
                state.awaited.push(previous);
            }
            state.previous = Some(tree);
        } else {
            state.awaited.push(tree);
        }

        state.awaited.extend(nested_awaited);
        Ok(())
    }

    fn process_cache(&mut self, command: Command, state: &PipelineState) -> Result<(), PlanningError> {
        let previous = state
            .previous
            .ok_or_else(|| PlanningError::DirectiveWithoutCommand(SET_CACHE.to_string()))?;

        let ttl = command
            .named("ttl")
            .and_then(|value| value.as_integer())
            .ok_or_else(|| PlanningError::MissingArgument {
                command: SET_CACHE.to_string(),
                argument: "ttl".to_string(),
            })?;

        let node = &mut self.nodes[previous];
        node.force_new_unit = true;
        node.cache_ttl = Some(ttl.max(0) as u64);
        node.cache_key = command.named("key").and_then(|value| value.as_text());
        Ok(())
    }

    fn process_ordinary(&mut self, mut command: Command, state: &mut PipelineState) -> Result<(), PlanningError> {
        let mut subsearch_roots = Vec::new();
        let mut nested_awaited = Vec::new();

        for index in command.subsearch_positions() {
            let ArgValue::Subsearch(subsearch) = std::mem::replace(
                &mut command.args[index].value,
                ArgValue::Subsearch(Vec::new()),
            ) else {
                continue;
            };

            let (root, awaited) = self.build(subsearch)?;
            let root = root.ok_or_else(|| PlanningError::EmptySubsearch(command.name.clone()))?;
            subsearch_roots.push((index, root));
            nested_awaited.extend(awaited);
        }

        let id = self.nodes.len();
        self.nodes.push(CommandNode::new(command));

        for (index, root) in subsearch_roots {
            self.nodes[root].subsearch_of = Some(id);
            self.nodes[id].subsearches.push((index, root));
        }

        for awaited in std::mem::take(&mut state.awaited) {
            self.link_awaited(id, awaited);
        }

        if let Some(previous) = state.previous {
            self.nodes[previous].next = Some(id);
            self.nodes[id].previous = Some(previous);
        }
        state.previous = Some(id);

        // Awaits opened inside subsearches are joined further down the pipeline.
        state.awaited.extend(nested_awaited);
        Ok(())
    }

    fn link_awaited(&mut self, consumer: usize, awaited: usize) {
        self.nodes[awaited].awaited_by = Some(consumer);
        self.nodes[consumer].awaited.push(awaited);
    }
}

fn required_text(command: &Command, key: &str) -> Result<String, PlanningError> {
    command
        .named(key)
        .and_then(|value| value.as_text())
        .ok_or_else(|| PlanningError::MissingArgument {
            command: command.name.clone(),
            argument: key.to_string(),
        })
}
