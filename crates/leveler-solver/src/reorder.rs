//! Reordering requests
//!
//! When no iteration of a task leads to an acceptable schedule, look for a
//! task sequence the path cache has not explored yet.
//!
//! # Algorithm
//!
//! 1. Keep the shifted tasks whose shifting task comes first in the sequence
//! 2. For each one sharing a partition with the failing task, move the
//!    failing task right after it, dragging its successors along
//! 3. Validate the new sequence against the cache: an unknown head is a new
//!    path; a solved head is followed into its accepted iterations; an
//!    unsolved head asks for its own reordering
//! 4. When every single move is known, compound moves on top of the known
//!    sequences
//! 5. At the root, when nothing else is left, accept the least harmful
//!    rejected branch of the whole tree
//!
//! A sequence already used to request a reordering for a task is never used
//! again for that task, which bounds the search.

use std::collections::HashSet;

use leveler_core::LevelingError;

use crate::graph::TaskGraph;
use crate::paths::{AssignedTaskRef, NodeId, PathTree, ShiftedTaskInfo, ROOT};
use crate::scheduler::Budget;

type Sequence = Vec<AssignedTaskRef>;

/// Whether `info.shifting` appears before `info.shifted` in `list`
fn shifting_precedes(list: &[AssignedTaskRef], info: &ShiftedTaskInfo) -> bool {
    for r in list {
        if r.task == info.shifted {
            return false;
        }
        if r.task == info.shifting {
            return list.iter().any(|x| x.task == info.shifted);
        }
    }
    false
}

/// Move `to_move` right after `to_pass`, dragging the successors of
/// `to_move` that lie in between. The moved task restarts at iteration 0.
///
/// When `solve` is given, shifted infos that the move settles are removed:
/// those about `to_pass` and about passed tasks of the same partition.
/// Returns false, leaving `list` untouched, when `to_pass` does not come
/// after `to_move` or depends on it.
pub fn move_after(
    graph: &TaskGraph,
    to_move: usize,
    to_pass: usize,
    list: &mut Sequence,
    mut solve: Option<&mut Vec<ShiftedTaskInfo>>,
) -> bool {
    let Some(from) = list.iter().position(|r| r.task == to_move) else {
        return false;
    };
    let Some(target) = list.iter().position(|r| r.task == to_pass) else {
        return false;
    };
    if target <= from || graph.reaches(to_move, to_pass) {
        return false;
    }

    let mut idx = from;
    while idx == from || list[idx - 1].task != to_pass {
        let passing = list[idx].task;
        if let Some(solve) = solve.as_deref_mut() {
            if graph.same_partition(to_move, passing) {
                solve.retain(|info| info.shifted != passing);
            }
        }
        if passing != to_move
            && graph.task(to_move).successors.contains(&passing)
            && move_after(graph, passing, to_pass, list, solve.as_deref_mut())
        {
            continue;
        }
        idx += 1;
    }

    if let Some(solve) = solve {
        solve.retain(|info| info.shifted != to_pass);
    }
    let mut moved = list.remove(from);
    moved.iteration = 0;
    list.insert(idx - 1, moved);
    true
}

/// Apply every pending move to the unexplored tail of a sequence
pub fn reorder_branch(
    graph: &TaskGraph,
    list: &[AssignedTaskRef],
    solve: &[ShiftedTaskInfo],
) -> Sequence {
    let mut branch = list.to_vec();
    for info in solve {
        if shifting_precedes(list, info) {
            move_after(graph, info.shifting, info.shifted, &mut branch, None);
        }
    }
    branch
}

/// Searches the path cache for unexplored sequences
pub struct Reorderer<'a> {
    graph: &'a TaskGraph,
    tree: &'a mut PathTree,
    budget: &'a mut Budget,
    /// Set when the root fallback accepted a rejected branch
    pub fell_back: bool,
}

impl<'a> Reorderer<'a> {
    pub fn new(graph: &'a TaskGraph, tree: &'a mut PathTree, budget: &'a mut Budget) -> Self {
        Self {
            graph,
            tree,
            budget,
            fell_back: false,
        }
    }

    /// A new sequence for the tasks of `list`, whose head `task` failed at `node`
    pub fn find_better_path(
        &mut self,
        task: usize,
        node: NodeId,
        list: &[AssignedTaskRef],
    ) -> Result<Option<Sequence>, LevelingError> {
        self.budget.tick()?;
        self.tree.compute_shifted_list(node, task, list.len());

        let sequence: Vec<usize> = list.iter().map(|r| r.task).collect();
        let to_solve = match self.tree.options_mut(node, task) {
            Some(options) if !options.tried.contains(&sequence) => {
                options.tried.push(sequence);
                let shifted = options.shifted.clone().unwrap_or_default();
                Some(
                    shifted
                        .into_iter()
                        .filter(|info| shifting_precedes(list, info))
                        .collect::<Vec<_>>(),
                )
            }
            _ => None,
        };

        if let Some(to_solve) = to_solve {
            for info in &to_solve {
                if !self.graph.same_partition(task, info.shifted) {
                    continue;
                }
                let mut candidate = list.to_vec();
                let mut solve = to_solve.clone();
                if !move_after(self.graph, task, info.shifted, &mut candidate, Some(&mut solve)) {
                    continue;
                }
                if let Some(found) = self.validate_unknown(node, &candidate, &solve)? {
                    return Ok(Some(found));
                }
                let mut seen = HashSet::new();
                if let Some(found) = self.reorder_search(node, &candidate, &solve, &mut seen)? {
                    return Ok(Some(found));
                }
            }
        }

        if node == ROOT {
            if let Some(found) = self.tree.already_known(list) {
                self.fell_back = true;
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// The unexplored part of `list` from `node`, if any
    fn validate_unknown(
        &mut self,
        node: NodeId,
        list: &[AssignedTaskRef],
        solve: &[ShiftedTaskInfo],
    ) -> Result<Option<Sequence>, LevelingError> {
        let Some((head, rest)) = list.split_first() else {
            return Ok(None);
        };

        let accepted: Vec<(u32, NodeId)> = match self.tree.options(node, head.task) {
            None => {
                let mut branch = vec![AssignedTaskRef::first(head.task)];
                branch.extend(reorder_branch(self.graph, rest, solve));
                return Ok(Some(branch));
            }
            Some(options) if options.solution_found => options
                .iterations
                .iter()
                .filter(|(_, &child)| self.tree.node(child).is_accepted())
                .map(|(&iteration, &child)| (iteration, child))
                .collect(),
            Some(_) => Vec::new(),
        };

        for (iteration, child) in accepted {
            if let Some(sub) = self.validate_unknown(child, rest, solve)? {
                let mut branch = vec![AssignedTaskRef {
                    task: head.task,
                    iteration,
                }];
                branch.extend(sub);
                return Ok(Some(branch));
            }
        }

        self.find_better_path(head.task, node, list)
    }

    /// Compound moves: try moving every task up to each shifting task past
    /// its shifted task, then recurse on the known results
    fn reorder_search(
        &mut self,
        node: NodeId,
        list: &[AssignedTaskRef],
        solve: &[ShiftedTaskInfo],
        seen: &mut HashSet<Vec<usize>>,
    ) -> Result<Option<Sequence>, LevelingError> {
        if !seen.insert(list.iter().map(|r| r.task).collect()) {
            return Ok(None);
        }

        let mut known: Vec<(Sequence, Vec<ShiftedTaskInfo>)> = Vec::new();
        for info in solve {
            let Some(shifting_pos) = list.iter().position(|r| r.task == info.shifting) else {
                continue;
            };
            for idx in (0..=shifting_pos).rev() {
                let candidate_task = list[idx].task;
                if !self.graph.same_partition(candidate_task, info.shifted) {
                    continue;
                }
                self.budget.tick()?;
                let mut candidate = list.to_vec();
                let mut sub_solve = solve.to_vec();
                if !move_after(self.graph, candidate_task, info.shifted, &mut candidate, Some(&mut sub_solve)) {
                    continue;
                }
                if let Some(found) = self.validate_unknown(node, &candidate, &sub_solve)? {
                    return Ok(Some(found));
                }
                known.push((candidate, sub_solve));
            }
        }

        for (candidate, sub_solve) in known {
            if let Some(found) = self.reorder_search(node, &candidate, &sub_solve, seen)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
