//! Task forest helpers: ordering, depth, visibility, cascades.
//!
//! All traversals are iterative over a parent index so deep hierarchies
//! cannot exhaust the stack. Rows whose parent is missing are treated as
//! roots.

use std::borrow::Borrow;
use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::models::{Dependency, Task, TaskId};
use crate::order_key::{self, OrderKey, OrderKeyError};

/// Where to place a task among its siblings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Position {
    First,
    #[default]
    Last,
    Before(TaskId),
    After(TaskId),
}

/// Parent -> ordered children index over a task slice.
pub struct ForestIndex<'a> {
    by_id: FxHashMap<&'a TaskId, usize>,
    children: FxHashMap<usize, Vec<usize>>,
    roots: Vec<usize>,
}

impl<'a> ForestIndex<'a> {
    pub fn new<T: Borrow<Task>>(tasks: &'a [T]) -> Self {
        let by_id: FxHashMap<&TaskId, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (&t.borrow().id, i))
            .collect();
        let mut children: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        let mut roots = Vec::new();
        for (i, task) in tasks.iter().enumerate() {
            match task.borrow().parent_id.as_ref().and_then(|p| by_id.get(p)) {
                Some(&parent) if parent != i => children.entry(parent).or_default().push(i),
                _ => roots.push(i),
            }
        }
        let sort = |list: &mut Vec<usize>| {
            list.sort_by(|&a, &b| {
                let (ta, tb) = (tasks[a].borrow(), tasks[b].borrow());
                ta.sort_key.cmp(&tb.sort_key).then_with(|| ta.id.cmp(&tb.id))
            })
        };
        sort(&mut roots);
        for list in children.values_mut() {
            sort(list);
        }
        Self {
            by_id,
            children,
            roots,
        }
    }

    pub fn position_of(&self, id: &TaskId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn children_of(&self, index: usize) -> &[usize] {
        self.children.get(&index).map(|c| c.as_slice()).unwrap_or(&[])
    }

    pub fn has_children(&self, index: usize) -> bool {
        !self.children_of(index).is_empty()
    }

    /// Preorder walk as `(index, depth)` pairs. Children of rows for which
    /// `prune` returns true are skipped. Rows unreachable from a root (parent
    /// cycles) are appended at depth 0.
    pub fn preorder(&self, len: usize, prune: impl Fn(usize) -> bool) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(len);
        let mut visited = vec![false; len];
        let mut stack: Vec<(usize, usize, bool)> =
            self.roots.iter().rev().map(|&r| (r, 0, false)).collect();
        while let Some((index, depth, hidden)) = stack.pop() {
            if visited[index] {
                continue;
            }
            visited[index] = true;
            if !hidden {
                out.push((index, depth));
            }
            let hide = hidden || prune(index);
            for &child in self.children_of(index).iter().rev() {
                stack.push((child, depth + 1, hide));
            }
        }
        if visited.iter().any(|seen| !seen) {
            for (index, seen) in visited.iter().enumerate() {
                if !seen {
                    out.push((index, 0));
                }
            }
        }
        out
    }

    /// `root` and all its descendants, breadth-first (parents before children).
    pub fn subtree(&self, root: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::from([root]);
        while let Some(index) = queue.pop_front() {
            if !seen.insert(index) {
                continue;
            }
            out.push(index);
            queue.extend(self.children_of(index).iter().copied());
        }
        out
    }
}

/// Sort `tasks` into canonical depth-first order: parents before children,
/// siblings by sort key.
pub fn arrange<T: Borrow<Task>>(tasks: &mut Vec<T>) {
    let order: Vec<usize> = {
        let index = ForestIndex::new(tasks.as_slice());
        index
            .preorder(tasks.len(), |_| false)
            .into_iter()
            .map(|(i, _)| i)
            .collect()
    };
    if order.iter().enumerate().all(|(pos, &i)| pos == i) {
        return;
    }
    let mut slots: Vec<Option<T>> = tasks.drain(..).map(Some).collect();
    for i in order {
        if let Some(task) = slots[i].take() {
            tasks.push(task);
        }
    }
}

/// Ids of `root` and all its descendants, parents first.
pub fn cascade_ids<T: Borrow<Task>>(tasks: &[T], root: &TaskId) -> Vec<TaskId> {
    let index = ForestIndex::new(tasks);
    match index.position_of(root) {
        Some(pos) => index
            .subtree(pos)
            .into_iter()
            .map(|i| tasks[i].borrow().id.clone())
            .collect(),
        None => Vec::new(),
    }
}

/// Surviving tasks that depend on a removed id, with their dependency lists
/// minus the dangling entries.
pub fn stripped_dependencies<T: Borrow<Task>>(
    tasks: &[T],
    removed: &FxHashSet<TaskId>,
) -> Vec<(TaskId, Vec<Dependency>)> {
    tasks
        .iter()
        .map(|t| t.borrow())
        .filter(|t| !removed.contains(&t.id))
        .filter(|t| t.dependencies.iter().any(|d| removed.contains(&d.predecessor)))
        .map(|t| {
            let kept = t
                .dependencies
                .iter()
                .filter(|d| !removed.contains(&d.predecessor))
                .cloned()
                .collect();
            (t.id.clone(), kept)
        })
        .collect()
}

/// Nesting depth of a task (roots are 0), or None if the id is unknown.
pub fn depth<T: Borrow<Task>>(tasks: &[T], id: &TaskId) -> Option<usize> {
    let by_id: FxHashMap<&TaskId, &Task> = tasks
        .iter()
        .map(|t| (&t.borrow().id, t.borrow()))
        .collect();
    let mut current = *by_id.get(id)?;
    let mut depth = 0;
    while let Some(parent) = current.parent_id.as_ref().and_then(|p| by_id.get(p)) {
        depth += 1;
        if depth > tasks.len() {
            // Parent cycle; report the walk so far.
            break;
        }
        current = parent;
    }
    Some(depth)
}

/// Whether any task names `id` as its parent.
pub fn is_parent<T: Borrow<Task>>(tasks: &[T], id: &TaskId) -> bool {
    tasks
        .iter()
        .any(|t| t.borrow().parent_id.as_ref() == Some(id))
}

/// Whether `candidate` is `ancestor` itself or one of its descendants.
pub fn is_within<T: Borrow<Task>>(tasks: &[T], candidate: &TaskId, ancestor: &TaskId) -> bool {
    let by_id: FxHashMap<&TaskId, &Task> = tasks
        .iter()
        .map(|t| (&t.borrow().id, t.borrow()))
        .collect();
    let mut current = Some(candidate);
    let mut steps = 0;
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        steps += 1;
        if steps > tasks.len() + 1 {
            return false;
        }
        current = by_id.get(id).and_then(|t| t.parent_id.as_ref());
    }
    false
}

/// Order key for a new row under `parent` at `position`.
pub fn key_for_position<T: Borrow<Task>>(
    tasks: &[T],
    parent: Option<&TaskId>,
    position: &Position,
    exclude: Option<&TaskId>,
) -> Result<OrderKey, OrderKeyError> {
    let mut siblings: Vec<&Task> = tasks
        .iter()
        .map(|t| t.borrow())
        .filter(|t| t.parent_id.as_ref() == parent && Some(&t.id) != exclude)
        .collect();
    siblings.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then_with(|| a.id.cmp(&b.id)));

    let anchor = |id: &TaskId| siblings.iter().position(|t| &t.id == id);
    match position {
        Position::First => order_key::prepend_key(siblings.first().map(|t| &t.sort_key)),
        Position::Last => order_key::append_key(siblings.last().map(|t| &t.sort_key)),
        Position::Before(id) => match anchor(id) {
            Some(i) => order_key::insert_key(
                i.checked_sub(1).map(|p| &siblings[p].sort_key),
                Some(&siblings[i].sort_key),
            ),
            None => order_key::append_key(siblings.last().map(|t| &t.sort_key)),
        },
        Position::After(id) => match anchor(id) {
            Some(i) => order_key::insert_key(
                Some(&siblings[i].sort_key),
                siblings.get(i + 1).map(|t| &t.sort_key),
            ),
            None => order_key::append_key(siblings.last().map(|t| &t.sort_key)),
        },
    }
}

/// A row of the rendering projection.
#[derive(Clone, Debug, PartialEq)]
pub struct VisibleRow<T> {
    pub task: T,
    pub depth: usize,
}

/// Flat, depth-annotated projection of the forest, hiding the descendants of
/// collapsed rows.
pub fn visible<T: Borrow<Task> + Clone>(
    tasks: &[T],
    is_collapsed: impl Fn(&TaskId) -> bool,
) -> Vec<VisibleRow<T>> {
    let index = ForestIndex::new(tasks);
    index
        .preorder(tasks.len(), |i| is_collapsed(&tasks[i].borrow().id))
        .into_iter()
        .map(|(i, depth)| VisibleRow {
            task: tasks[i].clone(),
            depth,
        })
        .collect()
}
