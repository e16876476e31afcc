//! Dependency graph construction and topological ordering.

use std::collections::VecDeque;

use chrono::NaiveDate;

use crate::interner::{NodeId, TaskIdInterner};
use crate::models::{Constraint, SchedulingMode, Task, TaskId};

use super::types::{CriticalPathError, Edge};

/// Per-node scheduling inputs copied out of the task.
#[derive(Clone, Debug)]
pub struct NodeData {
    pub duration: u32,
    pub constraint: Constraint,
    pub mode: SchedulingMode,
    pub manual_start: Option<NaiveDate>,
}

/// Interned task graph ready for the forward and backward passes.
///
/// Nodes are schedulable tasks. A summary (a task with schedulable children)
/// is dated by its children, so a dependency naming a summary as successor is
/// re-targeted onto each of the summary's leaf descendants. A summary used as
/// a predecessor keeps its edge and contributes its rolled-up dates.
pub struct ScheduleGraph {
    pub interner: TaskIdInterner,
    pub nodes: Vec<NodeData>,
    /// Incoming dependency edges per node, in stored order.
    pub predecessors: Vec<Vec<Edge>>,
    /// Outgoing dependency edges per node.
    pub successors: Vec<Vec<Edge>>,
    pub parent: Vec<Option<NodeId>>,
    pub children: Vec<Vec<NodeId>>,
    /// Predecessors before successors, children before parents.
    pub order: Vec<NodeId>,
}

impl ScheduleGraph {
    /// Build and topologically sort the graph for `tasks`.
    ///
    /// Dependencies on unknown or non-schedulable rows are skipped, as are
    /// self-dependencies.
    pub fn build(tasks: &[&Task]) -> Result<Self, CriticalPathError> {
        let schedulable: Vec<&Task> = tasks
            .iter()
            .copied()
            .filter(|t| t.is_schedulable())
            .collect();
        let n = schedulable.len();

        let mut interner = TaskIdInterner::with_capacity(n);
        for task in &schedulable {
            interner.intern(&task.id);
        }

        let nodes: Vec<NodeData> = schedulable
            .iter()
            .map(|t| NodeData {
                duration: t.duration.max(1),
                constraint: t.constraint,
                mode: t.mode,
                manual_start: t.manual_start,
            })
            .collect();

        let mut parent = vec![None; n];
        let mut children: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        for (index, task) in schedulable.iter().enumerate() {
            if let Some(p) = task.parent_id.as_ref().and_then(|p| interner.get(p)) {
                if p as usize != index {
                    parent[index] = Some(p);
                    children[p as usize].push(index as NodeId);
                }
            }
        }

        let mut predecessors: Vec<Vec<Edge>> = vec![Vec::new(); n];
        let mut successors: Vec<Vec<Edge>> = vec![Vec::new(); n];
        for (index, task) in schedulable.iter().enumerate() {
            let node = index as NodeId;
            for dep in &task.dependencies {
                let Some(pred) = interner.get(&dep.predecessor) else {
                    continue;
                };
                if pred == node {
                    continue;
                }
                let targets = if children[index].is_empty() {
                    vec![node]
                } else {
                    leaves_under(node, &children)
                };
                for target in targets {
                    if target == pred {
                        continue;
                    }
                    predecessors[target as usize].push(Edge {
                        node: pred,
                        link_type: dep.link_type,
                        lag: dep.lag,
                    });
                    successors[pred as usize].push(Edge {
                        node: target,
                        link_type: dep.link_type,
                        lag: dep.lag,
                    });
                }
            }
        }

        let order = topological_order(&interner, &predecessors, &successors, &parent, &children)?;

        Ok(Self {
            interner,
            nodes,
            predecessors,
            successors,
            parent,
            children,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_summary(&self, node: NodeId) -> bool {
        !self.children[node as usize].is_empty()
    }

    pub fn task_id(&self, node: NodeId) -> Option<&TaskId> {
        self.interner.resolve(node)
    }
}

/// Non-summary descendants of `root`.
fn leaves_under(root: NodeId, children: &[Vec<NodeId>]) -> Vec<NodeId> {
    let mut leaves = Vec::new();
    let mut stack = vec![root];
    let mut steps = 0usize;
    while let Some(node) = stack.pop() {
        steps += 1;
        if steps > children.len() {
            break;
        }
        let kids = &children[node as usize];
        if kids.is_empty() {
            if node != root {
                leaves.push(node);
            }
        } else {
            stack.extend(kids.iter().rev());
        }
    }
    leaves
}

/// Kahn's algorithm over dependency edges plus child -> parent edges.
///
/// The queue is seeded in input order so the result is deterministic.
fn topological_order(
    interner: &TaskIdInterner,
    predecessors: &[Vec<Edge>],
    successors: &[Vec<Edge>],
    parent: &[Option<NodeId>],
    children: &[Vec<NodeId>],
) -> Result<Vec<NodeId>, CriticalPathError> {
    let n = predecessors.len();
    let mut in_degree: Vec<usize> = (0..n)
        .map(|i| predecessors[i].len() + children[i].len())
        .collect();

    let mut queue: VecDeque<NodeId> = (0..n as NodeId)
        .filter(|&i| in_degree[i as usize] == 0)
        .collect();
    let mut order = Vec::with_capacity(n);

    while let Some(node) = queue.pop_front() {
        order.push(node);
        let downstream = successors[node as usize]
            .iter()
            .map(|e| e.node)
            .chain(parent[node as usize]);
        for next in downstream {
            let slot = &mut in_degree[next as usize];
            *slot -= 1;
            if *slot == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != n {
        let path = find_cycle(&in_degree, predecessors, children)
            .into_iter()
            .filter_map(|node| interner.resolve(node).cloned())
            .collect();
        return Err(CriticalPathError::CircularDependency { path });
    }
    Ok(order)
}

/// Recover one cycle among the nodes Kahn's algorithm could not release.
///
/// Every such node still has an unreleased upstream node, so walking
/// upstream must eventually revisit a node.
fn find_cycle(
    in_degree: &[usize],
    predecessors: &[Vec<Edge>],
    children: &[Vec<NodeId>],
) -> Vec<NodeId> {
    let stuck = |node: NodeId| in_degree[node as usize] > 0;
    let Some(start) = (0..in_degree.len() as NodeId).find(|&i| stuck(i)) else {
        return Vec::new();
    };

    let mut walk = vec![start];
    let mut position = vec![usize::MAX; in_degree.len()];
    position[start as usize] = 0;
    let mut current = start;
    loop {
        let upstream = predecessors[current as usize]
            .iter()
            .map(|e| e.node)
            .chain(children[current as usize].iter().copied())
            .find(|&u| stuck(u));
        let Some(next) = upstream else {
            return walk;
        };
        if position[next as usize] != usize::MAX {
            let mut cycle = walk[position[next as usize]..].to_vec();
            // Walked upstream; present it in dependency direction.
            cycle.reverse();
            cycle.push(cycle[0]);
            return cycle;
        }
        position[next as usize] = walk.len();
        walk.push(next);
        current = next;
    }
}
