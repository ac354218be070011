//! Day-by-day candidate assignments
//!
//! # Algorithm
//!
//! For each day from the task's minimal start to its maximal end:
//! 1. Pick the strategy furthest from its desired score
//!    (`coeff² − score·maxCoeff·coeff/maxScore`, unmeasured = `coeff²`)
//! 2. Offer it the hours each resource can give today, bounded by the
//!    calendar, the task's remaining per-resource hours and its slots
//! 3. Re-measure every strategy and stop once the sizing is met
//!
//! Further iterations exclude the resource that carried the most hours in
//! each earlier candidate, which yields distinct alternatives.

use std::collections::BTreeSet;

use crate::graph::{DayPlan, ResourceHours, TaskGraph};
use crate::state::{Assignment, LevelingState};
use crate::strategy::{DayRequest, WeightedStrategy};

/// A complete candidate assignment with its strategy measures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub assignment: Assignment,
    pub measures: Vec<(u32, u32)>,
}

/// Produces candidate assignments for one task
pub struct DayAssigner<'a> {
    graph: &'a TaskGraph,
    strategies: &'a [WeightedStrategy],
    max_iterations: u32,
}

impl<'a> DayAssigner<'a> {
    pub fn new(
        graph: &'a TaskGraph,
        strategies: &'a [WeightedStrategy],
        max_iterations: u32,
    ) -> Self {
        Self {
            graph,
            strategies,
            max_iterations,
        }
    }

    /// Up to `max_iterations` distinct complete candidates, best first
    pub fn candidates(&self, state: &LevelingState, task: usize) -> Vec<Candidate> {
        let mut found: Vec<Candidate> = Vec::new();
        let mut excluded = BTreeSet::new();

        for _ in 0..self.max_iterations.max(1) {
            let Some(candidate) = self.assign_once(state, task, &excluded) else {
                break;
            };
            if found.iter().any(|c| c.assignment == candidate.assignment) {
                break;
            }
            if let Some(resource) = dominant_resource(&candidate.assignment.days) {
                excluded.insert(resource);
            }
            found.push(candidate);
        }
        found
    }

    /// Measure `days` with every strategy
    pub fn measure(&self, task: usize, days: &DayPlan) -> Vec<(u32, u32)> {
        let node = self.graph.task(task);
        self.strategies
            .iter()
            .map(|s| s.strategy.measure(node, days))
            .collect()
    }

    fn pick_strategy(&self, measures: &[Option<(u32, u32)>]) -> Option<usize> {
        let max_coeff = i64::from(
            self.strategies
                .iter()
                .map(|s| s.coefficient)
                .max()
                .unwrap_or(0),
        );
        let mut best: Option<(usize, i64)> = None;
        for (i, weighted) in self.strategies.iter().enumerate() {
            let coeff = i64::from(weighted.coefficient);
            let distance = match measures.get(i).copied().flatten() {
                Some((score, max)) if max > 0 => {
                    coeff * coeff - i64::from(score) * max_coeff * coeff / i64::from(max)
                }
                _ => coeff * coeff,
            };
            if best.map_or(true, |(_, d)| distance > d) {
                best = Some((i, distance));
            }
        }
        best.map(|(i, _)| i)
    }

    fn assign_once(
        &self,
        state: &LevelingState,
        task: usize,
        excluded: &BTreeSet<usize>,
    ) -> Option<Candidate> {
        let node = self.graph.task(task);
        let st = state.task(task);
        let mut overall: ResourceHours = node
            .resources
            .iter()
            .filter(|(r, _)| !excluded.contains(r))
            .map(|(r, h)| (*r, *h))
            .collect();
        let mut measures: Vec<Option<(u32, u32)>> = vec![None; self.strategies.len()];
        let mut plan = DayPlan::new();
        let mut total = 0;

        for (day, slot) in st.slots.range(st.min_start..=st.max_end) {
            let today: ResourceHours = overall
                .iter()
                .filter_map(|(r, left)| {
                    let in_slot = slot.get(r)?;
                    let hours = self.graph.resources[*r]
                        .hours_on(*day)
                        .min(*left)
                        .min(*in_slot);
                    (hours > 0).then_some((*r, hours))
                })
                .collect();
            if today.is_empty() {
                continue;
            }

            let chosen = self.pick_strategy(&measures)?;
            let request = DayRequest {
                task: node,
                day: *day,
                so_far: &plan,
                today: &today,
                overall: &overall,
                remaining: node.sizing - total,
            };
            let offered = self.strategies[chosen].strategy.assign_day(&request);

            let mut assigned = ResourceHours::new();
            for (r, h) in offered {
                let h = h
                    .min(today.get(&r).copied().unwrap_or(0))
                    .min(node.sizing - total);
                if h == 0 {
                    continue;
                }
                assigned.insert(r, h);
                if let Some(left) = overall.get_mut(&r) {
                    *left -= h;
                }
                total += h;
            }
            if !assigned.is_empty() {
                plan.insert(*day, assigned);
            }

            for (i, weighted) in self.strategies.iter().enumerate() {
                measures[i] = Some(weighted.strategy.measure(node, &plan));
            }
            if total >= node.sizing {
                break;
            }
        }

        if total < node.sizing {
            return None;
        }
        let measures = self.measure(task, &plan);
        Assignment::from_days(plan).map(|assignment| Candidate {
            assignment,
            measures,
        })
    }
}

/// Resource carrying the most hours; the lowest index wins ties
fn dominant_resource(days: &DayPlan) -> Option<usize> {
    let mut totals = ResourceHours::new();
    for hours in days.values() {
        for (r, h) in hours {
            *totals.entry(*r).or_default() += h;
        }
    }
    let mut best: Option<(usize, u32)> = None;
    for (r, h) in totals {
        if best.map_or(true, |(_, b)| h > b) {
            best = Some((r, h));
        }
    }
    best.map(|(r, _)| r)
}
