//! # leveler-solver
//!
//! Backtracking resource leveling.
//!
//! This crate provides:
//! - Dependency graph construction and resource partitions
//! - Strategy-driven day-by-day candidate assignments
//! - Delay cascades over competing tasks and successors
//! - A path cache that reorders tasks when a branch harms more important work
//! - Evaluation of complete schedules against the utopic one
//!
//! ## Example
//!
//! ```rust,ignore
//! use leveler_core::{Project, Resource, Task};
//! use leveler_solver::Leveler;
//!
//! let project = Project::new("demo", start, end);
//! let resources = vec![Resource::new("R1").daily(start, 10, 8)];
//! let tasks = vec![Task::new("T1").priority(200).sizing(16).resource("R1", 16)];
//! let schedule = Leveler::new().level(&project, &resources, &tasks)?;
//! ```

pub mod assigner;
pub mod cascade;
pub mod consequence;
pub mod evaluate;
pub mod graph;
pub mod importance;
pub mod partition;
pub mod paths;
pub mod reorder;
pub mod scheduler;
pub mod state;
pub mod strategy;
pub mod trace;

pub use graph::{GraphError, TaskGraph};
pub use scheduler::{prepare, Budget, Leveler, LevelingOptions, SearchReport};
pub use strategy::{AssignmentStrategy, DayRequest, PreferOneResource, WeightedStrategy};
pub use trace::{NullSink, RecordingSink, TraceEvent, TraceSink, TracingSink};

use leveler_core::{LevelingError, Project, Resource, Schedule, Task};

/// Level `tasks` with the default options
pub fn level(
    project: &Project,
    resources: &[Resource],
    tasks: &[Task],
) -> Result<Schedule, LevelingError> {
    Leveler::new().level(project, resources, tasks)
}
