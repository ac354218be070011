//! # leveler-core
//!
//! Core domain model for the leveler resource leveling engine.
//!
//! This crate provides:
//! - Calendar model: `Project`, `Resource`, `Task`
//! - Leveling output: `Schedule`, `ScheduledTask`
//! - Configuration: `LevelingConfig`, `Workload`
//! - Error types: `LevelingError`, `TaskFailure`, `FailureReason`
//!
//! ## Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use leveler_core::{Project, Resource, Task};
//!
//! let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
//! let project = Project::new("Demo", start, start + chrono::Duration::days(10));
//! let dev = Resource::new("dev").daily(start, 10, 8);
//! let design = Task::new("design")
//!     .priority(700)
//!     .sizing(16)
//!     .resource("dev", 16)
//!     .successor("build");
//!
//! assert_eq!(dev.hours_on(start), 8);
//! assert_eq!(design.successors, vec!["build".to_string()]);
//! assert_eq!(project.days(), 10);
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// Type Aliases
// ============================================================================

/// Unique identifier for a task
pub type TaskId = String;

/// Unique identifier for a resource
pub type ResourceId = String;

/// Hours worked per resource, per day
pub type DayAssignments = BTreeMap<NaiveDate, BTreeMap<ResourceId, u32>>;

// ============================================================================
// Project
// ============================================================================

/// The leveling horizon
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// First day of the project
    pub start: NaiveDate,
    /// Last day of the project
    pub end: NaiveDate,
}

impl Project {
    pub fn new(name: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    /// Number of days between start and end
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

// ============================================================================
// Resource
// ============================================================================

/// A person or piece of equipment with a per-day availability calendar
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ResourceFile")]
pub struct Resource {
    /// Unique identifier
    pub id: ResourceId,
    /// Working hours available per day. Days absent from the map are off.
    pub availability: BTreeMap<NaiveDate, u32>,
}

impl Resource {
    /// Create a resource with an empty calendar
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            availability: BTreeMap::new(),
        }
    }

    /// Make the resource available for `hours` on `date`
    pub fn available(mut self, date: NaiveDate, hours: u32) -> Self {
        self.availability.insert(date, hours);
        self
    }

    /// Make the resource available for `hours` on each of `days` consecutive days
    pub fn daily(mut self, from: NaiveDate, days: u32, hours: u32) -> Self {
        for date in from.iter_days().take(days as usize) {
            self.availability.insert(date, hours);
        }
        self
    }

    /// Hours available on `date` (0 when off)
    pub fn hours_on(&self, date: NaiveDate) -> u32 {
        self.availability.get(&date).copied().unwrap_or(0)
    }
}

/// A run of identical working days, as written in workload files
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRange {
    pub from: NaiveDate,
    pub days: u32,
    pub hours: u32,
}

/// On-disk shape of a resource: explicit days and/or daily ranges.
/// Explicit days win over ranges.
#[derive(Deserialize)]
struct ResourceFile {
    id: ResourceId,
    #[serde(default)]
    availability: BTreeMap<NaiveDate, u32>,
    #[serde(default)]
    daily: Vec<DailyRange>,
}

impl From<ResourceFile> for Resource {
    fn from(file: ResourceFile) -> Self {
        let mut resource = Resource::new(file.id);
        for range in &file.daily {
            resource = resource.daily(range.from, range.days, range.hours);
        }
        resource.availability.extend(file.availability);
        resource
    }
}

// ============================================================================
// Task
// ============================================================================

/// A unit of work needing a fixed number of hours from candidate resources
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,
    /// Scheduling priority (higher = more important)
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Work needed, in hours
    pub sizing: u32,
    /// Candidate resources with the maximal hours each may work on the task
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, u32>,
    /// Tasks that can only start once this one is finished
    #[serde(default)]
    pub successors: Vec<TaskId>,
    /// Assignment fixed by a previous leveling run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<DayAssignments>,
}

fn default_priority() -> u32 {
    500
}

impl Task {
    /// Create a new task with the given ID
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: default_priority(),
            sizing: 0,
            resources: BTreeMap::new(),
            successors: Vec::new(),
            pinned: None,
        }
    }

    /// Set the priority
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the work needed, in hours
    pub fn sizing(mut self, hours: u32) -> Self {
        self.sizing = hours;
        self
    }

    /// Allow a resource to work up to `max_hours` on this task
    pub fn resource(mut self, resource: impl Into<String>, max_hours: u32) -> Self {
        self.resources.insert(resource.into(), max_hours);
        self
    }

    /// Add a successor
    pub fn successor(mut self, task: impl Into<String>) -> Self {
        self.successors.push(task.into());
        self
    }

    /// Fix the assignment of this task
    pub fn pin(mut self, days: DayAssignments) -> Self {
        self.pinned = Some(days);
        self
    }
}

// ============================================================================
// Schedule (Result)
// ============================================================================

/// The result of leveling a set of tasks
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Leveled tasks indexed by ID
    pub tasks: BTreeMap<TaskId, ScheduledTask>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, task: &str) -> Option<&ScheduledTask> {
        self.tasks.get(task)
    }

    /// Total hours a resource works on `date` across every task
    pub fn hours_on(&self, resource: &str, date: NaiveDate) -> u32 {
        self.tasks
            .values()
            .filter_map(|task| task.days.get(&date))
            .filter_map(|day| day.get(resource))
            .sum()
    }

    /// Copy of `tasks` where each task leveled here is pinned to its assignment
    pub fn pin_onto(&self, tasks: &[Task]) -> Vec<Task> {
        tasks
            .iter()
            .map(|task| match self.tasks.get(&task.id) {
                Some(scheduled) => task.clone().pin(scheduled.days.clone()),
                None => task.clone(),
            })
            .collect()
    }
}

/// A task with its final resource/day assignment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Task ID
    pub task_id: TaskId,
    /// First worked day
    pub start: NaiveDate,
    /// Last worked day
    pub end: NaiveDate,
    /// Hours worked on the last day
    pub end_hours: u32,
    /// Importance of the task when it was committed
    pub importance: u32,
    /// Hours per resource, per day
    pub days: DayAssignments,
    /// Score of the assignment under each strategy
    pub measures: Vec<StrategyMeasure>,
}

impl ScheduledTask {
    /// Sum of every assigned hour
    pub fn total_hours(&self) -> u32 {
        self.days.values().flat_map(|day| day.values()).sum()
    }

    /// Whether the task has hours assigned on `date`
    pub fn works_on(&self, date: NaiveDate) -> bool {
        self.days.contains_key(&date)
    }
}

/// How well an assignment satisfies one strategy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyMeasure {
    pub strategy: String,
    pub score: u32,
    pub max: u32,
}

// ============================================================================
// Configuration
// ============================================================================

/// Built-in assignment strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Keep working with the resource already chosen for the task
    PreferOneResource,
}

/// One weighted strategy entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub coefficient: u32,
}

/// Tunables of a leveling run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelingConfig {
    /// Search steps allowed before giving up
    pub max_steps: u64,
    /// Wall-clock limit in milliseconds
    pub deadline_ms: Option<u64>,
    /// Candidate assignments tried per task
    pub max_iterations: u32,
    /// Weighted assignment strategies, in order
    pub strategies: Vec<StrategyConfig>,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            max_steps: 200_000,
            deadline_ms: None,
            max_iterations: 3,
            strategies: vec![StrategyConfig {
                kind: StrategyKind::PreferOneResource,
                coefficient: 10,
            }],
        }
    }
}

/// Everything needed for one leveling run, as read from a workload file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub project: Project,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub leveling: LevelingConfig,
}

// ============================================================================
// Errors
// ============================================================================

/// Why a task could not be leveled
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FailureReason {
    #[error("needs {needed} hours but only {available} are reachable after its predecessors")]
    InsufficientResources { needed: u32, available: u32 },

    #[error("its assignment forces a delay that cannot be absorbed")]
    ImpossibleConsequence,

    #[error("no task ordering yields an acceptable schedule")]
    NoFeasiblePath,
}

/// A task that could not be leveled, with the reason
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task: TaskId,
    pub reason: FailureReason,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.task, self.reason)
    }
}

/// Leveling error
#[derive(Debug, Error)]
pub enum LevelingError {
    #[error("Task not found: {missing} (successor of {task})")]
    TaskNotFound { task: TaskId, missing: TaskId },

    #[error("Resource not found: {resource} (candidate of {task})")]
    ResourceNotFound { task: TaskId, resource: ResourceId },

    #[error("Duplicate task: {0}")]
    DuplicateTask(TaskId),

    #[error("Task has no work to level: {0} (sizing is 0)")]
    EmptyTask(TaskId),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Search budget exhausted after {steps} steps")]
    BudgetExhausted { steps: u64 },

    #[error("Leveling failed for {} task(s): {}", .0.len(), join_failures(.0))]
    Infeasible(Vec<TaskFailure>),
}

fn join_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl LevelingError {
    /// The per-task failures, empty for structural errors
    pub fn failures(&self) -> &[TaskFailure] {
        match self {
            LevelingError::Infeasible(failures) => failures,
            _ => &[],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
