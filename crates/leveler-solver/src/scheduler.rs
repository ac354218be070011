//! Backtracking scheduler
//!
//! # Algorithm
//!
//! 1. Prepare one state per task in topological order: reachable slots after
//!    the predecessors' minimal ends, then the minimal window. Pinned tasks
//!    are finalized and their hours withdrawn; tasks with exactly their
//!    sizing left are assigned completely
//! 2. Sort the remaining tasks by importance, predecessors first
//! 3. Drive loop over the sequence head:
//!    - replay a cached `(task, iteration)` without recomputation
//!    - otherwise commit each candidate on a copy of the state; accept it
//!      when nothing above the path bound is shifted and recurse on the tail
//!    - when nothing succeeds, ask the path cache for another sequence
//! 4. Evaluate every complete schedule against the utopic one and keep the
//!    best
//!
//! Every drive-loop turn and reordering probe consumes one step of the
//! budget.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use leveler_core::{
    FailureReason, LevelingConfig, LevelingError, Project, Resource, Schedule, Task, TaskFailure,
};

use crate::assigner::{Candidate, DayAssigner};
use crate::cascade::Cascade;
use crate::consequence::Consequence;
use crate::evaluate;
use crate::graph::{DayPlan, TaskGraph, TaskNode};
use crate::importance;
use crate::paths::{AssignedTaskRef, NodeId, PathTree, ROOT};
use crate::reorder::Reorderer;
use crate::state::{Assignment, LevelingState, ResourceBuffer, TaskState};
use crate::strategy::{AssignmentStrategy, WeightedStrategy};
use crate::trace::{TraceEvent, TraceSink, TracingSink};

// ============================================================================
// Budget
// ============================================================================

/// Step budget with an optional wall-clock deadline
#[derive(Debug, Clone)]
pub struct Budget {
    max_steps: u64,
    steps: u64,
    deadline: Option<Instant>,
}

impl Budget {
    pub fn new(max_steps: u64, limit: Option<Duration>) -> Self {
        Self {
            max_steps,
            steps: 0,
            deadline: limit.and_then(|d| Instant::now().checked_add(d)),
        }
    }

    /// Consume one step
    pub fn tick(&mut self) -> Result<(), LevelingError> {
        self.steps += 1;
        let late = self.deadline.is_some_and(|d| Instant::now() >= d);
        if self.steps > self.max_steps || late {
            return Err(LevelingError::BudgetExhausted { steps: self.steps });
        }
        Ok(())
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

// ============================================================================
// Setup
// ============================================================================

fn failure(node: &TaskNode, reason: FailureReason) -> LevelingError {
    LevelingError::Infeasible(vec![TaskFailure {
        task: node.id.clone(),
        reason,
    }])
}

fn insufficient(node: &TaskNode, available: u32) -> LevelingError {
    failure(
        node,
        FailureReason::InsufficientResources {
            needed: node.sizing,
            available,
        },
    )
}

/// Slots of every candidate resource from `bound` on
fn free_state(
    graph: &TaskGraph,
    node: &TaskNode,
    bound: Option<NaiveDate>,
) -> Result<TaskState, LevelingError> {
    let mut slots = DayPlan::new();
    let mut buffers = BTreeMap::new();
    let mut available = 0;

    for &r in node.resources.keys() {
        for (&day, &hours) in &graph.resources[r].availability {
            if hours == 0 || bound.is_some_and(|b| day < b) {
                continue;
            }
            slots.entry(day).or_insert_with(BTreeMap::new).insert(r, hours);
            available += hours;
            buffers.entry(r).or_insert_with(ResourceBuffer::default);
        }
    }

    let (Some(&min_start), Some(&max_end)) = (slots.keys().next(), slots.keys().next_back()) else {
        return Err(insufficient(node, 0));
    };
    if available < node.sizing {
        return Err(insufficient(node, available));
    }

    let mut st = TaskState {
        slots,
        available_hours: available,
        min_start,
        min_end: min_start,
        min_end_hours: 0,
        max_end,
        assignment: None,
        measures: Vec::new(),
        importance: node.priority,
        non_optimal_delay: 0,
        buffers,
    };
    let (min_end, min_end_hours) = st
        .recompute_from_start(node)
        .ok_or_else(|| insufficient(node, available))?;
    st.min_end = min_end;
    st.min_end_hours = min_end_hours;
    Ok(st)
}

/// A pinned task, final from the start
fn pinned_state(
    node: &TaskNode,
    plan: &DayPlan,
    strategies: &[WeightedStrategy],
) -> Result<TaskState, LevelingError> {
    let assignment = Assignment::from_days(plan.clone()).ok_or_else(|| insufficient(node, 0))?;
    let measures = strategies
        .iter()
        .map(|s| s.strategy.measure(node, plan))
        .collect();
    Ok(TaskState {
        slots: plan.clone(),
        available_hours: assignment.total_hours(),
        min_start: assignment.start,
        min_end: assignment.end,
        min_end_hours: assignment.end_hours,
        max_end: assignment.end,
        assignment: Some(assignment),
        measures,
        importance: node.priority,
        non_optimal_delay: 0,
        buffers: BTreeMap::new(),
    })
}

/// Tasks at the origin of an impossible consequence
fn impossible_tasks(consequence: &Consequence, out: &mut Vec<usize>) {
    for (&task, child) in &consequence.shifted {
        if child.possible {
            continue;
        }
        if child.shifted.values().all(|c| c.possible) {
            out.push(task);
        } else {
            impossible_tasks(child, out);
        }
    }
}

/// Build the initial leveling state.
///
/// Fails with `InsufficientResources` when a task cannot reach its sizing
/// after its predecessors, and with `ImpossibleConsequence` when assigning a
/// task without freedom delays something that cannot move.
pub fn prepare(
    graph: &TaskGraph,
    strategies: &[WeightedStrategy],
) -> Result<LevelingState, LevelingError> {
    let mut states: Vec<Option<TaskState>> = vec![None; graph.len()];

    for &t in &graph.topo_order {
        let node = graph.task(t);
        let st = match &node.pinned {
            Some(plan) => pinned_state(node, plan, strategies)?,
            None => {
                let bound = node
                    .predecessors
                    .iter()
                    .filter_map(|&p| states[p].as_ref())
                    .map(|p| p.min_end.succ_opt().unwrap_or(p.min_end))
                    .max();
                free_state(graph, node, bound)?
            }
        };
        states[t] = Some(st);
    }
    let mut state = LevelingState {
        tasks: states.into_iter().flatten().collect(),
    };

    for &t in &graph.topo_order {
        let Some(plan) = &graph.task(t).pinned else {
            continue;
        };
        let consequence =
            Cascade::new(graph, strategies, &mut state, u32::MAX).absorb_pinned(t, plan);
        if !consequence.possible {
            let mut blocked = Vec::new();
            impossible_tasks(&consequence, &mut blocked);
            let task = blocked.first().copied().unwrap_or(t);
            return Err(insufficient(graph.task(task), state.task(task).available_hours));
        }
    }

    for &t in &graph.topo_order {
        let st = state.task(t);
        if !st.is_final() && st.available_hours < graph.task(t).sizing {
            return Err(insufficient(graph.task(t), st.available_hours));
        }
    }

    for &t in &graph.topo_order {
        let st = state.task(t);
        if st.is_final() || st.available_hours != graph.task(t).sizing {
            continue;
        }
        let consequence = Cascade::new(graph, strategies, &mut state, u32::MAX).assign_complete(t);
        if !consequence.possible {
            return Err(failure(graph.task(t), FailureReason::ImpossibleConsequence));
        }
    }

    importance::populate(graph, &mut state);
    Ok(state)
}

// ============================================================================
// Options and report
// ============================================================================

/// Solver tunables, built from a [`LevelingConfig`] or by hand
#[derive(Debug)]
pub struct LevelingOptions {
    pub max_steps: u64,
    pub deadline: Option<Duration>,
    pub max_iterations: u32,
    pub strategies: Vec<WeightedStrategy>,
}

impl From<&LevelingConfig> for LevelingOptions {
    fn from(config: &LevelingConfig) -> Self {
        let strategies = if config.strategies.is_empty() {
            WeightedStrategy::defaults()
        } else {
            config.strategies.iter().map(WeightedStrategy::from_config).collect()
        };
        Self {
            max_steps: config.max_steps,
            deadline: config.deadline_ms.map(Duration::from_millis),
            max_iterations: config.max_iterations,
            strategies,
        }
    }
}

impl Default for LevelingOptions {
    fn default() -> Self {
        Self::from(&LevelingConfig::default())
    }
}

/// Statistics of one leveling run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchReport {
    /// Budget steps consumed
    pub steps: u64,
    /// Path cache nodes created
    pub nodes: usize,
    /// New orderings adopted
    pub reorderings: u32,
    /// Rejected branches accepted at the root
    pub fallbacks: u32,
    /// Complete schedules evaluated
    pub candidates: usize,
}

// ============================================================================
// Leveler
// ============================================================================

/// Resource leveling solver
#[derive(Debug, Default)]
pub struct Leveler {
    options: LevelingOptions,
}

impl Leveler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: LevelingOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &LevelingConfig) -> Self {
        Self::with_options(LevelingOptions::from(config))
    }

    /// Replace the strategies with a single custom one
    pub fn strategy(
        mut self,
        strategy: impl AssignmentStrategy + 'static,
        coefficient: u32,
    ) -> Self {
        self.options.strategies = vec![WeightedStrategy::new(strategy, coefficient)];
        self
    }

    /// Add a strategy after the configured ones
    pub fn with_strategy(
        mut self,
        strategy: impl AssignmentStrategy + 'static,
        coefficient: u32,
    ) -> Self {
        self.options.strategies.push(WeightedStrategy::new(strategy, coefficient));
        self
    }

    pub fn max_steps(mut self, steps: u64) -> Self {
        self.options.max_steps = steps;
        self
    }

    pub fn max_iterations(mut self, iterations: u32) -> Self {
        self.options.max_iterations = iterations;
        self
    }

    pub fn options(&self) -> &LevelingOptions {
        &self.options
    }

    pub fn level(
        &self,
        project: &Project,
        resources: &[Resource],
        tasks: &[Task],
    ) -> Result<Schedule, LevelingError> {
        self.level_with_report(project, resources, tasks)
            .map(|(schedule, _)| schedule)
    }

    pub fn level_with_report(
        &self,
        project: &Project,
        resources: &[Resource],
        tasks: &[Task],
    ) -> Result<(Schedule, SearchReport), LevelingError> {
        self.level_traced(project, resources, tasks, &mut TracingSink)
    }

    /// Level `tasks`, reporting every search step to `sink`
    pub fn level_traced(
        &self,
        project: &Project,
        resources: &[Resource],
        tasks: &[Task],
        sink: &mut dyn TraceSink,
    ) -> Result<(Schedule, SearchReport), LevelingError> {
        if tasks.is_empty() {
            return Ok((Schedule::new(), SearchReport::default()));
        }

        let graph = TaskGraph::build(tasks, resources)?;
        let strategies = &self.options.strategies;
        let state = prepare(&graph, strategies)?;
        let utopic = state.clone();

        let order = importance::sorted_tasks(&graph, &state);
        sink.event(TraceEvent::Sorted {
            order: names(&graph, &order),
        });

        let mut search = Search {
            graph: &graph,
            assigner: DayAssigner::new(&graph, strategies, self.options.max_iterations),
            strategies,
            tree: PathTree::new(&graph, &state),
            budget: Budget::new(self.options.max_steps, self.options.deadline),
            sink,
            report: SearchReport::default(),
        };
        let solutions = if order.is_empty() {
            vec![state.clone()]
        } else {
            search.find_assignment(order.clone(), &state, ROOT)?
        };
        search.sink.event(TraceEvent::Solutions {
            count: solutions.len(),
        });

        if solutions.is_empty() {
            return Err(LevelingError::Infeasible(
                order
                    .iter()
                    .map(|r| TaskFailure {
                        task: graph.task_id(r.task).to_string(),
                        reason: FailureReason::NoFeasiblePath,
                    })
                    .collect(),
            ));
        }

        let scores: Vec<_> = solutions
            .iter()
            .map(|s| evaluate::score(&graph, s, &utopic, project.days()))
            .collect();
        let best = evaluate::pick_best(&scores).unwrap_or(0);
        let schedule = evaluate::to_schedule(&graph, &solutions[best], strategies);

        let report = SearchReport {
            steps: search.budget.steps(),
            nodes: search.tree.len(),
            candidates: solutions.len(),
            ..search.report
        };
        tracing::debug!(
            tasks = schedule.len(),
            steps = report.steps,
            nodes = report.nodes,
            candidates = report.candidates,
            "leveling complete"
        );
        Ok((schedule, report))
    }
}

fn names(graph: &TaskGraph, list: &[AssignedTaskRef]) -> Vec<String> {
    list.iter()
        .map(|r| graph.task_id(r.task).to_string())
        .collect()
}

// ============================================================================
// Search
// ============================================================================

struct Search<'a> {
    graph: &'a TaskGraph,
    strategies: &'a [WeightedStrategy],
    assigner: DayAssigner<'a>,
    tree: PathTree,
    budget: Budget,
    sink: &'a mut dyn TraceSink,
    report: SearchReport,
}

impl Search<'_> {
    /// Every complete state reachable by assigning `list` from `node`
    fn find_assignment(
        &mut self,
        mut list: Vec<AssignedTaskRef>,
        state: &LevelingState,
        node: NodeId,
    ) -> Result<Vec<LevelingState>, LevelingError> {
        loop {
            self.budget.tick()?;
            let Some((&head, rest)) = list.split_first() else {
                return Ok(vec![state.clone()]);
            };
            let task = head.task;
            let remaining = rest.to_vec();
            let mut found = Vec::new();

            let replay = self
                .tree
                .cached(node, head)
                .and_then(|child| Some((child, self.tree.node(child).state.clone()?)));
            if let Some((child, child_state)) = replay {
                self.sink.event(TraceEvent::Replayed {
                    task: self.graph.task_id(task).to_string(),
                    iteration: head.iteration,
                });
                found = self.find_assignment(remaining, &child_state, child)?;
            } else {
                let initial_importance = state.task(task).importance;
                let tries: Vec<Option<Candidate>> = if state.is_final(task) {
                    vec![None]
                } else {
                    self.assigner
                        .candidates(state, task)
                        .into_iter()
                        .map(Some)
                        .collect()
                };

                let mut any_accepted = false;
                if tries.is_empty() {
                    let mut consequence = Consequence::new();
                    consequence.add_impossible(task);
                    self.tree.complete_tried_path(
                        self.graph,
                        node,
                        task,
                        0,
                        consequence,
                        initial_importance,
                        state,
                    );
                }
                for (iteration, candidate) in (0u32..).zip(tries) {
                    any_accepted |= self.try_solution(
                        task,
                        iteration,
                        candidate,
                        state,
                        &remaining,
                        initial_importance,
                        node,
                        &mut found,
                    )?;
                }
                if let Some(options) = self.tree.options_mut(node, task) {
                    options.solution_found = any_accepted;
                    options.remaining = remaining;
                }
            }

            if !found.is_empty() {
                return Ok(found);
            }

            self.tree.reset_shifted(node, task);
            let mut reorderer = Reorderer::new(self.graph, &mut self.tree, &mut self.budget);
            let next = reorderer.find_better_path(task, node, &list)?;
            let fell_back = reorderer.fell_back;
            let Some(next) = next else {
                return Ok(Vec::new());
            };

            if fell_back {
                self.report.fallbacks += 1;
                self.sink.event(TraceEvent::Fallback {
                    order: names(self.graph, &next),
                });
            } else {
                self.report.reorderings += 1;
                self.sink.event(TraceEvent::Reordered {
                    task: self.graph.task_id(task).to_string(),
                    order: names(self.graph, &next),
                });
            }
            list = next;
        }
    }

    /// Commit one candidate and recurse when it is accepted. Returns whether
    /// it was accepted under the path bound.
    fn try_solution(
        &mut self,
        task: usize,
        iteration: u32,
        candidate: Option<Candidate>,
        state: &LevelingState,
        remaining: &[AssignedTaskRef],
        initial_importance: u32,
        node: NodeId,
        found: &mut Vec<LevelingState>,
    ) -> Result<bool, LevelingError> {
        let path_min = self.tree.node(node).path_min;
        let mut new_state = state.clone();
        let consequence = match candidate {
            Some(candidate) => {
                let consequence = Cascade::new(self.graph, self.strategies, &mut new_state, path_min)
                    .commit(task, candidate.assignment, candidate.measures);
                if consequence.possible {
                    importance::update(self.graph, &mut new_state, task);
                }
                consequence
            }
            None => Consequence::new(),
        };

        let (child, accepted) = self.tree.complete_tried_path(
            self.graph,
            node,
            task,
            iteration,
            consequence.clone(),
            initial_importance,
            &new_state,
        );
        self.sink.event(TraceEvent::Tried {
            task: self.graph.task_id(task).to_string(),
            iteration,
            importance: consequence.max_importance,
            delay: consequence.delay,
            possible: consequence.possible,
            accepted,
        });

        if !accepted {
            if consequence.possible {
                self.tree.node_mut(child).state = Some(new_state);
            }
            return Ok(false);
        }

        self.tree.node_mut(child).state = Some(new_state.clone());
        if remaining.is_empty() {
            found.push(new_state);
        } else {
            found.extend(self.find_assignment(remaining.to_vec(), &new_state, child)?);
        }
        Ok(true)
    }
}
