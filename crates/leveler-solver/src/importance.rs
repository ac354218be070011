//! Importance tracking
//!
//! A task is as important as its own priority, or as the most important
//! successor it is tightly chained to (no slack day in between). Urgency
//! therefore flows backwards along chains that cannot absorb a delay.

use crate::graph::TaskGraph;
use crate::paths::AssignedTaskRef;
use crate::state::LevelingState;

/// Recompute the importance of `task` from its successors. Returns whether it changed.
pub fn update(graph: &TaskGraph, state: &mut LevelingState, task: usize) -> bool {
    let node = graph.task(task);
    let min_end = state.task(task).min_end;
    let importance = node
        .successors
        .iter()
        .map(|&s| state.task(s))
        .filter(|s| (s.min_start - min_end).num_days() <= 1)
        .map(|s| s.importance)
        .fold(node.priority, u32::max);

    if importance == state.task(task).importance {
        false
    } else {
        state.task_mut(task).importance = importance;
        true
    }
}

/// Re-propagate to unfinalized predecessors until nothing changes
pub fn update_predecessors(graph: &TaskGraph, state: &mut LevelingState, task: usize) {
    let mut pending = vec![task];
    while let Some(current) = pending.pop() {
        for &p in graph.task(current).predecessors.iter().rev() {
            if !state.is_final(p) && update(graph, state, p) {
                pending.push(p);
            }
        }
    }
}

/// Compute every importance bottom-up, successors first
pub fn populate(graph: &TaskGraph, state: &mut LevelingState) {
    for &t in graph.topo_order.iter().rev() {
        update(graph, state, t);
    }
}

/// Insert before the first strictly less important task
fn insert_sorted(list: &mut Vec<usize>, task: usize, state: &LevelingState) {
    let importance = state.task(task).importance;
    let pos = list
        .iter()
        .position(|&t| state.task(t).importance < importance)
        .unwrap_or(list.len());
    list.insert(pos, task);
}

/// Initial ordering of the unfinalized tasks.
///
/// Tasks become visible once every unfinalized predecessor is sorted; the
/// most important visible task is taken first.
pub fn sorted_tasks(graph: &TaskGraph, state: &LevelingState) -> Vec<AssignedTaskRef> {
    let mut visible = Vec::new();
    for &t in &graph.topo_order {
        if !state.is_final(t) && state.predecessors_final(graph, t) {
            insert_sorted(&mut visible, t, state);
        }
    }

    let mut sorted: Vec<usize> = Vec::with_capacity(graph.len());
    while !visible.is_empty() {
        let task = visible.remove(0);
        sorted.push(task);
        for &child in &graph.task(task).successors {
            if state.is_final(child) || sorted.contains(&child) || visible.contains(&child) {
                continue;
            }
            let ready = graph
                .task(child)
                .predecessors
                .iter()
                .all(|&p| state.is_final(p) || sorted.contains(&p));
            if ready {
                insert_sorted(&mut visible, child, state);
            }
        }
    }

    sorted
        .into_iter()
        .map(|task| AssignedTaskRef { task, iteration: 0 })
        .collect()
}
