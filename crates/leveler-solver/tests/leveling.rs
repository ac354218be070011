//! Integration tests for the leveling entry points
//!
//! Covers the reference scenarios, setup failures, graph validation and the
//! search budget.

use chrono::NaiveDate;
use leveler_core::{FailureReason, LevelingConfig, LevelingError, Project, Resource, Task, TaskFailure};
use leveler_solver::{level, Leveler, RecordingSink, TraceEvent};
use pretty_assertions::assert_eq;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, day).unwrap()
}

fn days(from: u32, to: u32) -> Vec<NaiveDate> {
    (from..=to).map(date).collect()
}

fn project() -> Project {
    Project::new("scenarios", date(1), date(10))
}

/// One hour per day for ten days
fn resource(id: &str) -> Resource {
    Resource::new(id).daily(date(1), 10, 1)
}

fn worked_days(schedule: &leveler_core::Schedule, task: &str) -> Vec<NaiveDate> {
    schedule.get(task).unwrap().days.keys().copied().collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn empty_task_list_levels_to_empty_schedule() {
    let schedule = level(&project(), &[resource("R1")], &[]).unwrap();

    assert!(schedule.is_empty());
}

#[test]
fn single_task_takes_first_days() {
    let tasks = vec![Task::new("T1").priority(100).sizing(2).resource("R1", 2)];

    let schedule = level(&project(), &[resource("R1")], &tasks).unwrap();

    let t1 = schedule.get("T1").unwrap();
    assert_eq!(worked_days(&schedule, "T1"), days(1, 2));
    assert_eq!(t1.start, date(1));
    assert_eq!(t1.end, date(2));
    assert_eq!(t1.end_hours, 1);
    assert_eq!(t1.total_hours(), 2);
}

#[test]
fn higher_priority_goes_first() {
    let tasks = vec![
        Task::new("T1").priority(100).sizing(2).resource("R1", 2),
        Task::new("T2").priority(200).sizing(2).resource("R1", 2),
    ];

    let schedule = level(&project(), &[resource("R1")], &tasks).unwrap();

    assert_eq!(worked_days(&schedule, "T2"), days(1, 2));
    assert_eq!(worked_days(&schedule, "T1"), days(3, 4));
}

#[test]
fn successor_importance_flows_to_predecessor() {
    let tasks = vec![
        Task::new("A").priority(100).sizing(2).resource("R1", 2).successor("B"),
        Task::new("B").priority(200).sizing(2).resource("R2", 2),
    ];

    let schedule = level(&project(), &[resource("R1"), resource("R2")], &tasks).unwrap();

    assert_eq!(worked_days(&schedule, "A"), days(1, 2));
    assert_eq!(worked_days(&schedule, "B"), days(3, 4));
    assert_eq!(schedule.get("A").unwrap().importance, 200);
    assert_eq!(schedule.get("B").unwrap().importance, 200);
}

#[test]
fn measures_are_reported_per_strategy() {
    let tasks = vec![Task::new("T1").priority(100).sizing(2).resource("R1", 2)];

    let schedule = level(&project(), &[resource("R1")], &tasks).unwrap();

    let measures = &schedule.get("T1").unwrap().measures;
    assert_eq!(measures.len(), 1);
    assert_eq!(measures[0].strategy, "prefer-one-resource");
    assert!(measures[0].score <= measures[0].max);
}

// =============================================================================
// Setup failures
// =============================================================================

#[test]
fn insufficient_resources_fail_the_run() {
    let tasks = vec![Task::new("big").priority(100).sizing(20).resource("R1", 20)];

    let err = level(&project(), &[resource("R1")], &tasks).unwrap_err();

    assert_eq!(
        err.failures(),
        &[TaskFailure {
            task: "big".into(),
            reason: FailureReason::InsufficientResources {
                needed: 20,
                available: 10
            },
        }]
    );
}

#[test]
fn competing_tasks_without_freedom_are_impossible() {
    let short = Resource::new("R1").daily(date(1), 2, 1);
    let tasks = vec![
        Task::new("A").priority(100).sizing(2).resource("R1", 2),
        Task::new("B").priority(100).sizing(2).resource("R1", 2),
    ];

    let err = level(&project(), &[short], &tasks).unwrap_err();

    assert_eq!(
        err.failures(),
        &[TaskFailure {
            task: "A".into(),
            reason: FailureReason::ImpossibleConsequence,
        }]
    );
}

#[test]
fn failure_message_names_the_task() {
    let tasks = vec![Task::new("big").priority(100).sizing(20).resource("R1", 20)];

    let err = level(&project(), &[resource("R1")], &tasks).unwrap_err();

    let message = err.to_string();
    assert!(message.contains("big"), "unexpected message: {}", message);
    assert!(message.contains("20 hours"), "unexpected message: {}", message);
}

// =============================================================================
// Graph validation
// =============================================================================

#[test]
fn unknown_successor_is_rejected() {
    let tasks = vec![Task::new("A").sizing(1).resource("R1", 1).successor("ghost")];

    let err = level(&project(), &[resource("R1")], &tasks).unwrap_err();

    assert!(matches!(
        err,
        LevelingError::TaskNotFound { ref task, ref missing } if task == "A" && missing == "ghost"
    ));
}

#[test]
fn unknown_resource_is_rejected() {
    let tasks = vec![Task::new("A").sizing(1).resource("R9", 1)];

    let err = level(&project(), &[resource("R1")], &tasks).unwrap_err();

    assert!(matches!(err, LevelingError::ResourceNotFound { ref resource, .. } if resource == "R9"));
}

#[test]
fn duplicate_task_is_rejected() {
    let tasks = vec![
        Task::new("A").sizing(1).resource("R1", 1),
        Task::new("A").sizing(1).resource("R1", 1),
    ];

    let err = level(&project(), &[resource("R1")], &tasks).unwrap_err();

    assert!(matches!(err, LevelingError::DuplicateTask(ref id) if id == "A"));
}

#[test]
fn dependency_cycle_is_rejected() {
    let tasks = vec![
        Task::new("A").sizing(1).resource("R1", 1).successor("B"),
        Task::new("B").sizing(1).resource("R1", 1).successor("A"),
    ];

    let err = level(&project(), &[resource("R1")], &tasks).unwrap_err();

    assert!(matches!(err, LevelingError::CircularDependency(_)));
}

#[test]
fn zero_hour_task_is_rejected_before_leveling() {
    let tasks = vec![
        Task::new("M").priority(100).resource("R1", 0).successor("T"),
        Task::new("T").priority(100).sizing(2).resource("R1", 2),
    ];

    let err = level(&project(), &[resource("R1")], &tasks).unwrap_err();

    assert!(matches!(err, LevelingError::EmptyTask(ref id) if id == "M"));
    assert!(err.failures().is_empty());
    assert!(err.to_string().contains("sizing is 0"));
}

// =============================================================================
// Budget, options and trace
// =============================================================================

#[test]
fn step_budget_is_enforced() {
    let tasks = vec![
        Task::new("T1").priority(100).sizing(2).resource("R1", 2),
        Task::new("T2").priority(200).sizing(2).resource("R1", 2),
    ];

    let err = Leveler::new()
        .max_steps(1)
        .level(&project(), &[resource("R1")], &tasks)
        .unwrap_err();

    assert!(matches!(err, LevelingError::BudgetExhausted { steps: 2 }));
}

#[test]
fn config_drives_the_leveler() {
    let config = LevelingConfig {
        max_steps: 1,
        ..LevelingConfig::default()
    };
    let tasks = vec![
        Task::new("T1").priority(100).sizing(2).resource("R1", 2),
        Task::new("T2").priority(200).sizing(2).resource("R1", 2),
    ];

    let result = Leveler::from_config(&config).level(&project(), &[resource("R1")], &tasks);

    assert!(matches!(result, Err(LevelingError::BudgetExhausted { .. })));
}

#[test]
fn report_counts_the_search() {
    let tasks = vec![
        Task::new("T1").priority(100).sizing(2).resource("R1", 2),
        Task::new("T2").priority(200).sizing(2).resource("R1", 2),
    ];

    let (schedule, report) = Leveler::new()
        .level_with_report(&project(), &[resource("R1")], &tasks)
        .unwrap();

    assert_eq!(schedule.len(), 2);
    assert_eq!(report.candidates, 1);
    assert_eq!(report.reorderings, 0);
    assert_eq!(report.fallbacks, 0);
    // Root plus one node per tried iteration
    assert_eq!(report.nodes, 3);
    assert_eq!(report.steps, 2);
}

#[test]
fn trace_sink_sees_every_iteration() {
    let tasks = vec![
        Task::new("A").priority(100).sizing(2).resource("R1", 2).successor("B"),
        Task::new("B").priority(200).sizing(2).resource("R2", 2),
    ];
    let mut sink = RecordingSink::default();

    Leveler::new()
        .level_traced(&project(), &[resource("R1"), resource("R2")], &tasks, &mut sink)
        .unwrap();

    let tried: Vec<(String, bool)> = sink
        .events
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Tried { task, accepted, .. } => Some((task.clone(), *accepted)),
            _ => None,
        })
        .collect();
    assert_eq!(tried, vec![("A".to_string(), true), ("B".to_string(), true)]);
}

// =============================================================================
// Alternative resources
// =============================================================================

/// Two hours per day for ten days
fn busy_resource(id: &str) -> Resource {
    Resource::new(id).daily(date(1), 10, 2)
}

fn tried_iterations(sink: &RecordingSink) -> Vec<(u32, bool)> {
    sink.events
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Tried {
                iteration, accepted, ..
            } => Some((*iteration, *accepted)),
            _ => None,
        })
        .collect()
}

#[test]
fn second_resource_yields_another_iteration() {
    let tasks = vec![Task::new("A").priority(100).sizing(4).resource("R1", 4).resource("R2", 4)];
    let resources = [busy_resource("R1"), busy_resource("R2")];
    let mut sink = RecordingSink::default();

    let (schedule, report) = Leveler::new()
        .level_traced(&project(), &resources, &tasks, &mut sink)
        .unwrap();

    // R1 first, then the same days on R2; nothing is left for a third try
    assert_eq!(tried_iterations(&sink), vec![(0, true), (1, true)]);
    assert_eq!(report.candidates, 2);
    let a = schedule.get("A").unwrap();
    assert_eq!(worked_days(&schedule, "A"), days(1, 2));
    assert!(a.days.values().all(|hours| hours.get("R1") == Some(&2)));
    assert_eq!(a.total_hours(), 4);
}

#[test]
fn iteration_limit_caps_alternatives() {
    let tasks = vec![Task::new("A").priority(100).sizing(4).resource("R1", 4).resource("R2", 4)];
    let resources = [busy_resource("R1"), busy_resource("R2")];
    let mut sink = RecordingSink::default();

    Leveler::new()
        .max_iterations(1)
        .level_traced(&project(), &resources, &tasks, &mut sink)
        .unwrap();

    assert_eq!(tried_iterations(&sink), vec![(0, true)]);
}
