//! Schedule evaluation
//!
//! Complete schedules found by the search are compared with the utopic
//! schedule, where every task sits at its minimal window as if alone.
//!
//! # Algorithm
//!
//! Per task:
//! 1. `dates = priority × (Δstart + Δduration)` against the utopic window
//! 2. `fit = Σ (maxMeasure − score × maxMeasure / max)` over the strategies
//! 3. Both are rescaled to the larger of their ceilings,
//!    `days × priority × 2` and `strategies × maxMeasure`
//! 4. `note = (fit + 4 × dates) / (5 × ceiling)`
//!
//! The score of a schedule is the average note. Lower is better.

use leveler_core::{Schedule, ScheduledTask, StrategyMeasure};
use rust_decimal::Decimal;

use crate::graph::TaskGraph;
use crate::state::{LevelingState, TaskState};
use crate::strategy::WeightedStrategy;

const FIT_WEIGHT: u32 = 1;
const DATES_WEIGHT: u32 = 4;

fn task_note(
    priority: u32,
    project_days: i64,
    solution: &TaskState,
    utopic: &TaskState,
) -> Decimal {
    let (start, end) = solution
        .assignment
        .as_ref()
        .map_or((solution.min_start, solution.min_end), |a| (a.start, a.end));
    let start_distance = (start - utopic.min_start).num_days();
    let duration_distance =
        (end - start).num_days() - (utopic.min_end - utopic.min_start).num_days();
    let priority = Decimal::from(priority);
    let dates = Decimal::from(start_distance + duration_distance) * priority;

    let max_measure = solution.measures.iter().map(|(_, max)| *max).max().unwrap_or(0);
    let max_measure = Decimal::from(max_measure);
    let fit: Decimal = solution
        .measures
        .iter()
        .filter(|(_, max)| *max > 0)
        .map(|(score, max)| max_measure - Decimal::from(*score) * max_measure / Decimal::from(*max))
        .sum();

    let max_dates = Decimal::from(project_days.max(1)) * priority * Decimal::TWO;
    let max_fit = Decimal::from(solution.measures.len()) * max_measure;

    let (fit, dates, ceiling) = if max_dates > max_fit {
        let fit = if max_fit.is_zero() {
            Decimal::ZERO
        } else {
            fit * max_dates / max_fit
        };
        (fit, dates, max_dates)
    } else {
        let dates = if max_dates.is_zero() {
            Decimal::ZERO
        } else {
            dates * max_fit / max_dates
        };
        (fit, dates, max_fit)
    };
    if ceiling.is_zero() {
        return Decimal::ZERO;
    }

    (fit * Decimal::from(FIT_WEIGHT) + dates * Decimal::from(DATES_WEIGHT))
        / (ceiling * Decimal::from(FIT_WEIGHT + DATES_WEIGHT))
}

/// Average note of `solution` against `utopic`
pub fn score(
    graph: &TaskGraph,
    solution: &LevelingState,
    utopic: &LevelingState,
    project_days: i64,
) -> Decimal {
    if graph.is_empty() {
        return Decimal::ZERO;
    }
    let total: Decimal = (0..graph.len())
        .map(|t| task_note(graph.task(t).priority, project_days, solution.task(t), utopic.task(t)))
        .sum();
    total / Decimal::from(graph.len())
}

/// Index of the lowest score; the first wins ties
pub fn pick_best(scores: &[Decimal]) -> Option<usize> {
    let mut best: Option<(usize, Decimal)> = None;
    for (i, score) in scores.iter().enumerate() {
        if best.map_or(true, |(_, b)| *score < b) {
            best = Some((i, *score));
        }
    }
    best.map(|(i, _)| i)
}

/// Convert a complete leveling state into a named schedule
pub fn to_schedule(
    graph: &TaskGraph,
    state: &LevelingState,
    strategies: &[WeightedStrategy],
) -> Schedule {
    let mut schedule = Schedule::new();
    for (t, st) in state.tasks.iter().enumerate() {
        let Some(assignment) = &st.assignment else {
            continue;
        };
        let measures = strategies
            .iter()
            .zip(&st.measures)
            .map(|(s, (score, max))| StrategyMeasure {
                strategy: s.strategy.name().to_string(),
                score: *score,
                max: *max,
            })
            .collect();
        let id = graph.task_id(t).to_string();
        schedule.tasks.insert(
            id.clone(),
            ScheduledTask {
                task_id: id,
                start: assignment.start,
                end: assignment.end,
                end_hours: assignment.end_hours,
                importance: st.importance,
                days: graph.named_plan(&assignment.days),
                measures,
            },
        );
    }
    schedule
}
