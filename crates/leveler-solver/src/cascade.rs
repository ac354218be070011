//! Consequence engine
//!
//! Committing an assignment can push other tasks later: successors whose
//! precedence would break, and competitors that lose resource hours. Each
//! pushed task becomes a node of the consequence tree.
//!
//! # Algorithm
//!
//! 1. `delay = assignment.end − minEnd`. When positive, notify the task:
//!    every successor starting too early is shifted to the first slot after
//!    the new end, and its own successors are notified in turn
//! 2. Remove the assigned hours from every other unfinalized task; a task
//!    whose minimal window moves is notified the same way
//! 3. A task left with exactly its sizing in reachable hours is assigned
//!    completely on the spot
//!
//! Successor chains are walked with an explicit stack of frames. The ignore
//! list carried by each chain keeps a chain from revisiting its own tasks.

use chrono::NaiveDate;

use crate::consequence::Consequence;
use crate::graph::{DayPlan, TaskGraph};
use crate::importance;
use crate::state::{Assignment, LevelingState};
use crate::strategy::WeightedStrategy;

enum Frame {
    /// The minimal end of `task` moved by `delay` days
    Notify {
        task: usize,
        delay: i64,
        ignore: Vec<usize>,
        path: Vec<usize>,
        may_force: bool,
    },
    /// Shift the successors of `parent` from position `next` on
    Shift {
        parent: usize,
        next: usize,
        start: NaiveDate,
        ignore: Vec<usize>,
        path: Vec<usize>,
    },
    /// Aggregate the children of the node at `path`
    Settle {
        task: usize,
        delay: i64,
        old_importance: u32,
        path: Vec<usize>,
        update_importance: bool,
    },
}

/// Effect of withdrawing hours from one competitor
enum Withdrawal {
    Untouched,
    Impossible,
    Moved { delay: i64, start_shifted: bool },
}

/// Propagates one commit over a leveling state
pub struct Cascade<'a> {
    graph: &'a TaskGraph,
    strategies: &'a [WeightedStrategy],
    state: &'a mut LevelingState,
    path_min: u32,
    root: Consequence,
}

impl<'a> Cascade<'a> {
    pub fn new(
        graph: &'a TaskGraph,
        strategies: &'a [WeightedStrategy],
        state: &'a mut LevelingState,
        path_min: u32,
    ) -> Self {
        Self {
            graph,
            strategies,
            state,
            path_min,
            root: Consequence::new(),
        }
    }

    /// Commit `assignment` as the final assignment of `task`
    pub fn commit(
        mut self,
        task: usize,
        assignment: Assignment,
        measures: Vec<(u32, u32)>,
    ) -> Consequence {
        self.commit_at(task, assignment, measures, &[], &[]);
        self.root
    }

    /// Assign every remaining slot of `task`
    pub fn assign_complete(mut self, task: usize) -> Consequence {
        self.force(task, &[], &[]);
        self.root
    }

    /// Withdraw the hours of a pinned task from every other task
    pub fn absorb_pinned(mut self, task: usize, days: &DayPlan) -> Consequence {
        self.remove_resources(task, days, &[]);
        self.root
    }

    fn possible_at(&mut self, path: &[usize]) -> bool {
        self.root.node_mut(path).possible
    }

    fn commit_at(
        &mut self,
        task: usize,
        assignment: Assignment,
        measures: Vec<(u32, u32)>,
        ignore: &[usize],
        path: &[usize],
    ) {
        let st = self.state.task_mut(task);
        let delay = (assignment.end - st.min_end).num_days();
        st.min_start = assignment.start;
        st.min_end = assignment.end;
        st.min_end_hours = assignment.end_hours;

        if delay > 0 {
            self.propagate(Frame::Notify {
                task,
                delay,
                ignore: ignore.to_vec(),
                path: path.to_vec(),
                may_force: false,
            });
            if !self.possible_at(path) {
                return;
            }
        }

        self.remove_resources(task, &assignment.days, path);
        if !self.possible_at(path) {
            return;
        }

        let st = self.state.task_mut(task);
        st.assignment = Some(assignment);
        st.measures = measures;
    }

    fn force(&mut self, task: usize, ignore: &[usize], path: &[usize]) {
        let days = self.state.task(task).remaining_slots();
        let node = self.graph.task(task);
        let measures = self
            .strategies
            .iter()
            .map(|s| s.strategy.measure(node, &days))
            .collect();

        match Assignment::from_days(days) {
            Some(assignment) => {
                let mut ignore = ignore.to_vec();
                ignore.push(task);
                self.commit_at(task, assignment, measures, &ignore, path);
            }
            None => self.root.node_mut(path).add_impossible(task),
        }
    }

    fn propagate(&mut self, start: Frame) {
        let graph = self.graph;
        let mut stack = vec![start];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Notify {
                    task,
                    delay,
                    mut ignore,
                    path,
                    may_force,
                } => {
                    let st = self.state.task(task);
                    let sizing = graph.task(task).sizing;
                    if st.available_hours < sizing {
                        self.root.node_mut(&path).add_impossible(task);
                        continue;
                    }

                    let old_importance = st.importance;
                    if may_force && st.available_hours == sizing {
                        self.force(task, &ignore, &path);
                        stack.push(Frame::Settle {
                            task,
                            delay,
                            old_importance,
                            path,
                            update_importance: false,
                        });
                    } else {
                        let start = st.min_end.succ_opt().unwrap_or(st.min_end);
                        ignore.push(task);
                        stack.push(Frame::Settle {
                            task,
                            delay,
                            old_importance,
                            path: path.clone(),
                            update_importance: true,
                        });
                        stack.push(Frame::Shift {
                            parent: task,
                            next: 0,
                            start,
                            ignore,
                            path,
                        });
                    }
                }

                Frame::Shift {
                    parent,
                    next,
                    start,
                    ignore,
                    path,
                } => {
                    let node = self.root.node_mut(&path);
                    if !node.possible || node.shifted.values().any(|c| !c.possible) {
                        continue;
                    }

                    for (i, &child) in graph.task(parent).successors.iter().enumerate().skip(next) {
                        if ignore.contains(&child) {
                            continue;
                        }
                        let cs = self.state.task(child);
                        if cs.min_start >= start {
                            continue;
                        }
                        if cs.is_final() {
                            self.root.node_mut(&path).add_impossible(child);
                            break;
                        }
                        let Some(day) = cs.first_slot_from(start) else {
                            self.root.node_mut(&path).add_impossible(child);
                            break;
                        };
                        let Some(delay) = self
                            .state
                            .task_mut(child)
                            .shift_minimal_dates(graph.task(child), day)
                        else {
                            self.root.node_mut(&path).add_impossible(child);
                            break;
                        };

                        self.root.node_mut(&path).shifted.insert(child, Consequence::new());
                        let mut child_path = path.clone();
                        child_path.push(child);
                        stack.push(Frame::Shift {
                            parent,
                            next: i + 1,
                            start,
                            ignore: ignore.clone(),
                            path,
                        });
                        stack.push(Frame::Notify {
                            task: child,
                            delay,
                            ignore,
                            path: child_path,
                            may_force: true,
                        });
                        break;
                    }
                }

                Frame::Settle {
                    task,
                    delay,
                    old_importance,
                    path,
                    update_importance,
                } => {
                    if update_importance {
                        importance::update(graph, self.state, task);
                    }
                    let accumulated = self.state.task(task).non_optimal_delay;

                    let node = self.root.node_mut(&path);
                    let mut max_importance = old_importance;
                    let mut max_delay = delay + accumulated;
                    let mut possible = true;
                    for child in node.shifted.values() {
                        if child.max_importance > max_importance {
                            max_importance = child.max_importance;
                            max_delay = child.delay;
                        } else if child.max_importance == max_importance && child.delay > max_delay {
                            max_delay = child.delay;
                        }
                        possible &= child.possible;
                    }
                    node.max_importance = max_importance;
                    node.delay = max_delay;
                    node.possible = possible;

                    if max_importance > self.path_min {
                        self.state.task_mut(task).non_optimal_delay += delay;
                    }
                }
            }
        }
    }

    fn remove_resources(&mut self, assigned: usize, days: &DayPlan, path: &[usize]) {
        let graph = self.graph;

        for &other in &graph.topo_order {
            if other == assigned || self.state.is_final(other) {
                continue;
            }

            match self.withdraw(other, days) {
                Withdrawal::Untouched => {}
                Withdrawal::Impossible => {
                    self.root.node_mut(path).add_impossible(other);
                    return;
                }
                Withdrawal::Moved {
                    delay,
                    start_shifted,
                } => {
                    if delay > 0 {
                        self.root.node_mut(path).shifted.insert(other, Consequence::new());
                        let mut child_path = path.to_vec();
                        child_path.push(other);
                        self.propagate(Frame::Notify {
                            task: other,
                            delay,
                            ignore: Vec::new(),
                            path: child_path.clone(),
                            may_force: true,
                        });

                        let child = self.root.node_mut(&child_path);
                        let (importance, child_delay, possible) =
                            (child.max_importance, child.delay, child.possible);
                        let parent = self.root.node_mut(path);
                        parent.absorb(importance, child_delay, possible);
                        if !parent.possible {
                            return;
                        }
                    }
                    if start_shifted {
                        importance::update_predecessors(graph, self.state, other);
                    }
                }
            }
        }
    }

    /// Remove `days` from the slots of `other` and move its window if needed
    fn withdraw(&mut self, other: usize, days: &DayPlan) -> Withdrawal {
        let node = self.graph.task(other);
        let st = self.state.task_mut(other);
        let mut removed_used = 0;
        let mut recalculate = false;
        let mut start_shifted = false;

        for (day, hours) in days.range(st.min_start..) {
            let on_start = *day == st.min_start;
            let on_end = *day == st.min_end;
            let in_window = *day <= st.min_end;

            if let Some(slot) = st.slots.get_mut(day) {
                for (resource, h) in hours {
                    let Some(available) = slot.get_mut(resource) else {
                        continue;
                    };
                    let taken = (*h).min(*available);
                    *available -= taken;
                    if *available == 0 {
                        slot.remove(resource);
                    }
                    st.available_hours = st.available_hours.saturating_sub(taken);

                    if in_window {
                        recalculate = true;
                        let counted = if on_end { taken.min(st.min_end_hours) } else { taken };
                        removed_used += st.buffers.entry(*resource).or_default().remove_counted(counted);
                    }
                }
                if slot.is_empty() {
                    st.slots.remove(day);
                }
            }
            if on_start && !st.slots.contains_key(day) {
                start_shifted = true;
            }
        }

        if !recalculate {
            return Withdrawal::Untouched;
        }

        let mut delay = 0;
        let mut from_end = true;
        if start_shifted {
            if let Some(next) = st.first_slot_from(st.min_start).filter(|d| *d <= st.max_end) {
                st.min_start = next;
            }
            if st.min_start > st.min_end {
                let Some((end, hours)) = st.recompute_from_start(node) else {
                    return Withdrawal::Impossible;
                };
                delay = (end - st.min_end).num_days();
                st.min_end = end;
                st.min_end_hours = hours;
                from_end = false;
            }
        }

        if from_end && removed_used > 0 {
            let (min_end, min_end_hours) = (st.min_end, st.min_end_hours);
            let Some((end, hours)) =
                st.shifted_date_hours(&node.resources, min_end, min_end_hours, removed_used)
            else {
                return Withdrawal::Impossible;
            };
            delay = (end - st.min_end).num_days();
            st.min_end = end;
            st.min_end_hours = hours;
        }

        Withdrawal::Moved {
            delay,
            start_shifted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::prepare;
    use leveler_core::{Resource, Task};
    use pretty_assertions::assert_eq;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2000, 1, d).unwrap()
    }

    fn resources() -> Vec<Resource> {
        vec![
            Resource::new("R1").daily(date(1), 10, 1),
            Resource::new("R2").daily(date(1), 10, 1),
        ]
    }

    fn plan(resource: usize, from: u32, to: u32) -> DayPlan {
        (from..=to)
            .map(|d| (date(d), [(resource, 1)].into_iter().collect()))
            .collect()
    }

    fn setup(tasks: &[Task]) -> (TaskGraph, LevelingState) {
        let graph = TaskGraph::build(tasks, &resources()).unwrap();
        let state = prepare(&graph, &WeightedStrategy::defaults()).unwrap();
        (graph, state)
    }

    #[test]
    fn commit_without_delay_has_no_consequence() {
        let (graph, mut state) = setup(&[Task::new("A").priority(100).sizing(2).resource("R1", 2)]);
        let strategies = WeightedStrategy::defaults();
        let assignment = Assignment::from_days(plan(0, 1, 2)).unwrap();

        let consequence =
            Cascade::new(&graph, &strategies, &mut state, u32::MAX).commit(0, assignment, vec![(1, 1)]);

        assert_eq!(consequence, Consequence::new());
        assert!(state.is_final(0));
        assert_eq!(state.task(0).measures, vec![(1, 1)]);
    }

    #[test]
    fn competitor_is_pushed_after_the_commit() {
        let (graph, mut state) = setup(&[
            Task::new("A").priority(200).sizing(2).resource("R1", 2),
            Task::new("B").priority(100).sizing(2).resource("R1", 2),
        ]);
        let strategies = WeightedStrategy::defaults();
        let assignment = Assignment::from_days(plan(0, 1, 2)).unwrap();

        let consequence =
            Cascade::new(&graph, &strategies, &mut state, 200).commit(0, assignment, vec![(1, 1)]);

        assert!(consequence.possible);
        assert_eq!(consequence.max_importance, 100);
        assert_eq!(consequence.delay, 2);
        assert_eq!(consequence.shifted.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(state.task(1).min_start, date(3));
        assert_eq!(state.task(1).min_end, date(4));
        assert_eq!(state.task(1).available_hours, 8);
    }

    #[test]
    fn delay_shifts_successor_chain() {
        let (graph, mut state) = setup(&[
            Task::new("A").priority(100).sizing(2).resource("R1", 2).successor("B"),
            Task::new("B").priority(300).sizing(2).resource("R2", 2),
        ]);
        let strategies = WeightedStrategy::defaults();
        // A finishes on day 4 instead of day 2
        let assignment = Assignment::from_days(plan(0, 3, 4)).unwrap();

        let consequence =
            Cascade::new(&graph, &strategies, &mut state, u32::MAX).commit(0, assignment, vec![(1, 1)]);

        assert!(consequence.possible);
        assert_eq!(consequence.max_importance, 300);
        assert_eq!(consequence.delay, 2);
        assert_eq!(state.task(1).min_start, date(5));
        assert_eq!(state.task(1).min_end, date(6));
    }

    #[test]
    fn finalized_successor_makes_commit_impossible() {
        let (graph, mut state) = setup(&[
            Task::new("A").priority(100).sizing(2).resource("R1", 2).successor("B"),
            Task::new("B").priority(300).sizing(2).resource("R2", 2),
        ]);
        let strategies = WeightedStrategy::defaults();
        let b = Assignment::from_days(plan(1, 3, 4)).unwrap();
        let consequence =
            Cascade::new(&graph, &strategies, &mut state, u32::MAX).commit(1, b, vec![(1, 1)]);
        assert!(consequence.possible);

        let late = Assignment::from_days(plan(0, 3, 4)).unwrap();
        let consequence =
            Cascade::new(&graph, &strategies, &mut state, u32::MAX).commit(0, late, vec![(1, 1)]);

        assert!(!consequence.possible);
        assert!(!consequence.shifted[&1].possible);
        assert!(!state.is_final(0));
    }

    #[test]
    fn exhausted_competitor_is_assigned_completely() {
        // B can only use R1 on days 1-4 and needs 2 hours
        let resources = vec![Resource::new("R1").daily(date(1), 4, 1)];
        let tasks = [
            Task::new("A").priority(200).sizing(2).resource("R1", 2),
            Task::new("B").priority(100).sizing(2).resource("R1", 2),
        ];
        let graph = TaskGraph::build(&tasks, &resources).unwrap();
        let strategies = WeightedStrategy::defaults();
        let mut state = prepare(&graph, &strategies).unwrap();
        let assignment = Assignment::from_days(plan(0, 1, 2)).unwrap();

        let consequence =
            Cascade::new(&graph, &strategies, &mut state, 200).commit(0, assignment, vec![(1, 1)]);

        assert!(consequence.possible);
        let b = state.task(1).assignment.clone().unwrap();
        assert_eq!(b.start, date(3));
        assert_eq!(b.end, date(4));
    }

    #[test]
    fn non_optimal_shift_accumulates_delay() {
        let (graph, mut state) = setup(&[
            Task::new("A").priority(100).sizing(2).resource("R1", 2),
            Task::new("B").priority(200).sizing(2).resource("R1", 2),
        ]);
        let strategies = WeightedStrategy::defaults();
        let assignment = Assignment::from_days(plan(0, 1, 2)).unwrap();

        let consequence =
            Cascade::new(&graph, &strategies, &mut state, 100).commit(0, assignment, vec![(1, 1)]);

        assert_eq!(consequence.max_importance, 200);
        assert_eq!(state.task(1).non_optimal_delay, 2);
    }
}
