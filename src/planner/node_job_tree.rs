//! Node Job Tree
//!
//! Cuts an engine-typed command tree into node jobs: maximal runs of
//! pipeline/subsearch commands sharing one engine type. Every cut gets a pair of
//! bridging commands sharing one `ResultAddress`: the child job ends with
//! `sys_write_interproc` and the parent reads the dataframe back with
//! `sys_read_interproc` where the child's commands used to be.
//!
//! ## Construction steps
//! 1. **Partition**: walk parent-first, opening a new job on an engine switch, on a
//!    cached node, for every subsearch if configured, and for every awaited pipeline.
//! 2. **Argument injection**: `earliest`/`latest` for commands that use the time
//!    window, a `sys_timestamp` salt for non-idempotent commands.
//! 3. **Rendering and addressing**: children first, render each job's commands with
//!    subsearches substituted back in, hash them (sha256 over the JSON form) and
//!    derive the address. The hash is taken before the job's own write bridge is
//!    appended, so it only depends on what the job computes.

use super::catalog::CommandCatalog;
use super::command::{
    ArgValue, Argument, Command, EARLIEST, LATEST, SYS_READ_INTERPROC, SYS_TIMESTAMP,
    SYS_WRITE_INTERPROC, SYS_WRITE_RESULT,
};
use super::command_tree::CommandTree;
use super::result_address::{ResultAddress, StorageClass};
use crate::pool::types::EngineType;

use sha2::{Digest, Sha256};

/// Caller-controlled knobs for one planning run.
#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Time window start, seconds.
    pub tws: i64,
    /// Time window end, seconds.
    pub twf: i64,
    pub shared_post_processing: bool,
    pub subsearch_is_node_job: bool,
}

#[derive(Debug, Clone)]
pub struct NodeJob {
    pub uuid: String,
    pub engine_type: EngineType,
    pub commands: Vec<Command>,
    /// The job consuming this one's result.
    pub next_job: Option<usize>,
    /// Jobs that must finish before this one can run.
    pub children: Vec<usize>,
    /// The subset of `children` joined through `await`.
    pub awaited: Vec<usize>,
    pub address: ResultAddress,
    pub cache_ttl: Option<u64>,
    /// Command tree nodes grouped into this job.
    pub command_nodes: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct NodeJobTree {
    pub jobs: Vec<NodeJob>,
    pub root: usize,
}

struct Unit {
    top: usize,
    engine_type: EngineType,
    parent: Option<usize>,
    awaited: bool,
    members: Vec<usize>,
}

impl NodeJobTree {
    pub fn construct(
        tree: &CommandTree,
        catalog: &CommandCatalog,
        options: &SplitOptions,
        next_salt: &mut dyn FnMut() -> u64,
    ) -> Self {
        let (units, unit_of) = partition(tree, options);
        let commands = inject_arguments(tree, catalog, options, next_salt);

        let renderer = Renderer {
            tree,
            commands: &commands,
            unit_of: &unit_of,
        };

        let mut addresses: Vec<Option<ResultAddress>> = vec![None; units.len()];
        let mut rendered: Vec<Vec<Command>> = vec![Vec::new(); units.len()];

        // Children are always created after their parent.
        for index in (0..units.len()).rev() {
            let unit = &units[index];
            let mut job_commands = renderer.pipeline(unit.top, index, &addresses);

            let top = tree.node(unit.top);
            let path = match &top.cache_key {
                Some(key) => key.clone(),
                None => content_hash(&job_commands),
            };

            let (storage, bridge) = if index == 0 {
                (
                    StorageClass::for_root(&unit.engine_type, options.shared_post_processing),
                    SYS_WRITE_RESULT,
                )
            } else {
                (StorageClass::InterprocStorage, SYS_WRITE_INTERPROC)
            };

            let address = ResultAddress::new(storage, path);
            job_commands.push(Command::bridge(bridge, &address));

            addresses[index] = Some(address);
            rendered[index] = job_commands;
        }

        let jobs = units
            .iter()
            .enumerate()
            .zip(rendered.into_iter().zip(addresses))
            .map(|((index, unit), (commands, address))| {
                let children: Vec<usize> = units
                    .iter()
                    .enumerate()
                    .filter(|(_, other)| other.parent == Some(index))
                    .map(|(child, _)| child)
                    .collect();
                let awaited = children
                    .iter()
                    .copied()
                    .filter(|child| units[*child].awaited)
                    .collect();

                NodeJob {
                    uuid: uuid::Uuid::new_v4().to_string(),
                    engine_type: unit.engine_type.clone(),
                    commands,
                    next_job: unit.parent,
                    children,
                    awaited,
                    address: address.unwrap_or_else(|| ResultAddress::new(StorageClass::InterprocStorage, "")),
                    cache_ttl: tree.node(unit.top).cache_ttl,
                    command_nodes: unit.members.clone(),
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!("Split query into {} node jobs", jobs.len());

        Self { jobs, root: 0 }
    }

    pub fn job(&self, id: usize) -> &NodeJob {
        &self.jobs[id]
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs with nothing to wait for; these are dispatched first.
    pub fn leaves(&self) -> Vec<usize> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.children.is_empty())
            .map(|(index, _)| index)
            .collect()
    }
}

fn partition(tree: &CommandTree, options: &SplitOptions) -> (Vec<Unit>, Vec<Option<usize>>) {
    let mut units: Vec<Unit> = Vec::new();
    let mut unit_of: Vec<Option<usize>> = vec![None; tree.len()];

    let open_unit = |units: &mut Vec<Unit>, top: usize, parent: Option<usize>, awaited: bool| {
        units.push(Unit {
            top,
            engine_type: tree.node(top).engine_type.clone().unwrap_or_else(EngineType::post_processing),
            parent,
            awaited,
            members: Vec::new(),
        });
        units.len() - 1
    };

    let root_unit = open_unit(&mut units, tree.root, None, false);
    let mut stack = vec![(tree.root, root_unit)];

    while let Some((id, unit)) = stack.pop() {
        unit_of[id] = Some(unit);
        units[unit].members.push(id);

        let node = tree.node(id);
        let must_split = |child: usize, is_subsearch: bool| {
            let child_node = tree.node(child);
            child_node.engine_type != node.engine_type
                || child_node.force_new_unit
                || (is_subsearch && options.subsearch_is_node_job)
        };

        let mut children: Vec<(usize, bool)> = Vec::new();
        children.extend(node.previous.map(|previous| (previous, false)));
        children.extend(node.subsearches.iter().map(|(_, root)| (*root, true)));

        for (child, is_subsearch) in children {
            if must_split(child, is_subsearch) {
                let child_unit = open_unit(&mut units, child, Some(unit), false);
                stack.push((child, child_unit));
            } else {
                stack.push((child, unit));
            }
        }

        for awaited in &node.awaited {
            let child_unit = open_unit(&mut units, *awaited, Some(unit), true);
            stack.push((*awaited, child_unit));
        }
    }

    (units, unit_of)
}

fn inject_arguments(
    tree: &CommandTree,
    catalog: &CommandCatalog,
    options: &SplitOptions,
    next_salt: &mut dyn FnMut() -> u64,
) -> Vec<Command> {
    tree.nodes
        .iter()
        .map(|node| {
            let mut command = node.command.clone();
            let Some(syntax) = node
                .engine_type
                .as_ref()
                .and_then(|engine_type| catalog.syntax(engine_type, &command.name))
            else {
                return command;
            };

            if syntax.use_timewindow && !command.has_named(EARLIEST) {
                command.args.push(Argument::named(EARLIEST, ArgValue::Integer(options.tws)));
                command.args.push(Argument::named(LATEST, ArgValue::Integer(options.twf)));
            }

            if !syntax.idempotent {
                let salt = next_salt();
                command.args.push(Argument::named(
                    SYS_TIMESTAMP,
                    ArgValue::Integer(salt as i64),
                ));
            }

            command
        })
        .collect()
}

struct Renderer<'a> {
    tree: &'a CommandTree,
    commands: &'a [Command],
    unit_of: &'a [Option<usize>],
}

impl Renderer<'_> {
    /// Commands of the pipeline of `unit` ending at node `last`.
    fn pipeline(&self, last: usize, unit: usize, addresses: &[Option<ResultAddress>]) -> Vec<Command> {
        let mut chain = vec![last];
        let mut cursor = last;
        while let Some(previous) = self.tree.node(cursor).previous {
            if self.unit_of[previous] != Some(unit) {
                break;
            }
            chain.push(previous);
            cursor = previous;
        }
        chain.reverse();

        let mut rendered = Vec::with_capacity(chain.len() + 1);

        if let Some(previous) = self.tree.node(chain[0]).previous {
            rendered.push(self.read_bridge(previous, addresses));
        }

        for id in chain {
            rendered.push(self.command(id, unit, addresses));
        }

        rendered
    }

    fn command(&self, id: usize, unit: usize, addresses: &[Option<ResultAddress>]) -> Command {
        let mut command = self.commands[id].clone();

        for (arg_index, root) in &self.tree.node(id).subsearches {
            let subsearch = if self.unit_of[*root] == Some(unit) {
                self.pipeline(*root, unit, addresses)
            } else {
                vec![self.read_bridge(*root, addresses)]
            };
            command.args[*arg_index].value = ArgValue::Subsearch(subsearch);
        }

        command
    }

    fn read_bridge(&self, child_node: usize, addresses: &[Option<ResultAddress>]) -> Command {
        let address = self.unit_of[child_node]
            .and_then(|unit| addresses[unit].clone())
            .unwrap_or_else(|| ResultAddress::new(StorageClass::InterprocStorage, ""));
        Command::bridge(SYS_READ_INTERPROC, &address)
    }
}

/// Hex sha256 of the canonical JSON form of a command list.
pub fn content_hash(commands: &[Command]) -> String {
    let canonical = serde_json::to_string(commands).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}
