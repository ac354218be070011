//! Search trace sinks
//!
//! The scheduler reports what it explores through a [`TraceSink`]. The
//! default sink forwards to `tracing`; tests record events in memory.

use leveler_core::TaskId;

/// One observable step of the search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Initial task ordering
    Sorted { order: Vec<TaskId> },
    /// One iteration committed and judged against the path bound
    Tried {
        task: TaskId,
        iteration: u32,
        importance: u32,
        delay: i64,
        possible: bool,
        accepted: bool,
    },
    /// A cached iteration reused without recomputation
    Replayed { task: TaskId, iteration: u32 },
    /// No iteration of `task` led to a schedule; a new ordering is tried
    Reordered { task: TaskId, order: Vec<TaskId> },
    /// Reordering exhausted; the least harmful rejected branch is accepted
    Fallback { order: Vec<TaskId> },
    /// Complete schedules found by the search
    Solutions { count: usize },
}

pub trait TraceSink {
    fn event(&mut self, event: TraceEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn event(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::Sorted { order } => {
                tracing::debug!(order = %order.join(", "), "initial ordering");
            }
            TraceEvent::Tried {
                task,
                iteration,
                importance,
                delay,
                possible,
                accepted,
            } => {
                tracing::trace!(
                    task = %task,
                    iteration,
                    importance,
                    delay,
                    possible,
                    accepted,
                    "iteration tried"
                );
            }
            TraceEvent::Replayed { task, iteration } => {
                tracing::trace!(task = %task, iteration, "iteration replayed");
            }
            TraceEvent::Reordered { task, order } => {
                tracing::debug!(task = %task, order = %order.join(", "), "trying a new ordering");
            }
            TraceEvent::Fallback { order } => {
                tracing::info!(order = %order.join(", "), "accepting least harmful branch");
            }
            TraceEvent::Solutions { count } => {
                tracing::debug!(count, "schedules found");
            }
        }
    }
}

/// Keeps every event, in order
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<TraceEvent>,
}

impl TraceSink for RecordingSink {
    fn event(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn event(&mut self, _event: TraceEvent) {}
}
