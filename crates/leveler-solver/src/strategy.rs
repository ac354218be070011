//! Assignment strategies
//!
//! A strategy decides which resources work on a task each day and scores
//! how well an assignment matches its policy. The day assigner weighs the
//! configured strategies against each other by coefficient.

use chrono::NaiveDate;
use leveler_core::{StrategyConfig, StrategyKind};
use std::collections::BTreeSet;

use crate::graph::{DayPlan, ResourceHours, TaskNode};

/// Everything a strategy sees when assigning one day
#[derive(Debug, Clone, Copy)]
pub struct DayRequest<'a> {
    pub task: &'a TaskNode,
    pub day: NaiveDate,
    /// Days assigned so far
    pub so_far: &'a DayPlan,
    /// Hours each resource can give today
    pub today: &'a ResourceHours,
    /// Hours each resource can still give to the task overall
    pub overall: &'a ResourceHours,
    /// Hours still needed to reach the sizing
    pub remaining: u32,
}

/// Pluggable day-by-day assignment policy
pub trait AssignmentStrategy {
    /// Stable name, reported in schedule measures
    fn name(&self) -> &str;

    /// Hours per resource for the requested day
    fn assign_day(&self, request: &DayRequest<'_>) -> ResourceHours;

    /// `(score, max_score)` of an assignment under this policy
    fn measure(&self, task: &TaskNode, assignment: &DayPlan) -> (u32, u32);
}

/// A strategy with its coefficient
pub struct WeightedStrategy {
    pub strategy: Box<dyn AssignmentStrategy>,
    pub coefficient: u32,
}

impl WeightedStrategy {
    pub fn new(strategy: impl AssignmentStrategy + 'static, coefficient: u32) -> Self {
        Self {
            strategy: Box::new(strategy),
            coefficient,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        match config.kind {
            StrategyKind::PreferOneResource => Self::new(PreferOneResource, config.coefficient),
        }
    }

    /// The built-in default: prefer one resource, coefficient 10
    pub fn defaults() -> Vec<Self> {
        vec![Self::new(PreferOneResource, 10)]
    }
}

impl std::fmt::Debug for WeightedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedStrategy")
            .field("strategy", &self.strategy.name())
            .field("coefficient", &self.coefficient)
            .finish()
    }
}

/// Keep working with the resource already chosen for the task
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferOneResource;

/// Resource with the most hours left overall among `candidates`; first wins ties
fn most_remaining(
    candidates: impl Iterator<Item = usize>,
    overall: &ResourceHours,
) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for r in candidates {
        let left = overall.get(&r).copied().unwrap_or(0);
        if best.map_or(true, |(_, b)| left > b) {
            best = Some((r, left));
        }
    }
    best.map(|(r, _)| r)
}

impl AssignmentStrategy for PreferOneResource {
    fn name(&self) -> &str {
        "prefer-one-resource"
    }

    fn assign_day(&self, request: &DayRequest<'_>) -> ResourceHours {
        let used: BTreeSet<usize> = request
            .so_far
            .values()
            .flat_map(|d| d.keys().copied())
            .collect();

        let chosen = most_remaining(
            used.iter().copied().filter(|r| request.today.contains_key(r)),
            request.overall,
        )
        .or_else(|| most_remaining(request.today.keys().copied(), request.overall));

        let mut hours = ResourceHours::new();
        if let Some(resource) = chosen {
            let available = request.today.get(&resource).copied().unwrap_or(0);
            let assigned = available.min(request.remaining);
            if assigned > 0 {
                hours.insert(resource, assigned);
            }
        }
        hours
    }

    fn measure(&self, task: &TaskNode, assignment: &DayPlan) -> (u32, u32) {
        let used: BTreeSet<usize> = assignment
            .values()
            .flat_map(|d| d.keys().copied())
            .collect();
        let max = u32::try_from(task.resources.len()).unwrap_or(u32::MAX);
        let used = u32::try_from(used.len()).unwrap_or(u32::MAX);
        ((max + 1).saturating_sub(used), max)
    }
}
