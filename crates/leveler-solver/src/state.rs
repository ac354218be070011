//! Per-task leveling state
//!
//! One `TaskState` per task holds the slots still reachable by the task and
//! its minimal window. The whole `LevelingState` is cloned at every branch
//! point of the search; sibling branches never share a state.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::graph::{DayPlan, ResourceHours, TaskGraph, TaskNode};

/// Chargeable hours of one resource inside a task's minimal window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceBuffer {
    /// Hours counted toward reaching the sizing
    pub used: u32,
    /// Hours freed but not yet counted
    pub unused: u32,
}

impl ResourceBuffer {
    /// Consume `hours`, taking from `unused` first. Returns the hours taken from `used`.
    pub fn remove_counted(&mut self, hours: u32) -> u32 {
        if self.unused >= hours {
            self.unused -= hours;
            return 0;
        }
        let removed = (hours - self.unused).min(self.used);
        self.unused = 0;
        self.used -= removed;
        removed
    }
}

/// A concrete day-by-day assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub days: DayPlan,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Hours worked on the last day
    pub end_hours: u32,
}

impl Assignment {
    /// Derive dates from a non-empty plan
    pub fn from_days(days: DayPlan) -> Option<Self> {
        let start = *days.keys().next()?;
        let (end, last) = days.iter().next_back()?;
        let end = *end;
        let end_hours = last.values().sum();
        Some(Self {
            days,
            start,
            end,
            end_hours,
        })
    }

    pub fn total_hours(&self) -> u32 {
        self.days.values().flat_map(|d| d.values()).sum()
    }
}

/// Leveling state of one task
#[derive(Debug, Clone)]
pub struct TaskState {
    /// Hours still reachable per day and resource
    pub slots: DayPlan,
    /// Sum of the slot hours from `min_start` on
    pub available_hours: u32,
    pub min_start: NaiveDate,
    pub min_end: NaiveDate,
    pub min_end_hours: u32,
    pub max_end: NaiveDate,
    pub assignment: Option<Assignment>,
    pub measures: Vec<(u32, u32)>,
    pub importance: u32,
    /// Delay accumulated by shifts that exceeded the path bound
    pub non_optimal_delay: i64,
    pub buffers: BTreeMap<usize, ResourceBuffer>,
}

impl TaskState {
    pub fn is_final(&self) -> bool {
        self.assignment.is_some()
    }

    /// First slot day on or after `day`
    pub fn first_slot_from(&self, day: NaiveDate) -> Option<NaiveDate> {
        self.slots.range(day..).next().map(|(d, _)| *d)
    }

    /// Walk the slots from `date` until `shift` more hours are counted.
    ///
    /// The first `date_hours` usable hours of `date` are skipped. Every
    /// counted hour is added to the resource buffers, capped by the task's
    /// per-resource maximum. Returns the reached day and the hours counted
    /// on that day.
    pub fn shifted_date_hours(
        &mut self,
        caps: &ResourceHours,
        date: NaiveDate,
        date_hours: u32,
        shift: u32,
    ) -> Option<(NaiveDate, u32)> {
        if date > self.max_end {
            return None;
        }
        let mut total_before = 0;
        let mut skip = date_hours;

        for (day, slot) in self.slots.range(date..=self.max_end) {
            let mut used_today = 0;
            for (resource, hours) in slot {
                let buffer = self.buffers.entry(*resource).or_default();
                let cap = caps.get(resource).copied().unwrap_or(0);
                let mut usable = (*hours).min(cap.saturating_sub(buffer.used));
                if *day == date {
                    let skipped = usable.min(skip);
                    usable -= skipped;
                    skip -= skipped;
                }
                if usable == 0 {
                    continue;
                }
                if total_before + used_today + usable >= shift {
                    buffer.used += shift - total_before - used_today;
                    return Some((*day, shift - total_before));
                }
                used_today += usable;
                buffer.used += usable;
            }
            total_before += used_today;
        }
        None
    }

    fn reset_buffers(&mut self) {
        for buffer in self.buffers.values_mut() {
            *buffer = ResourceBuffer::default();
        }
    }

    /// Recompute the window from `min_start` with the full sizing
    pub fn recompute_from_start(&mut self, task: &TaskNode) -> Option<(NaiveDate, u32)> {
        self.reset_buffers();
        self.shifted_date_hours(&task.resources, self.min_start, 0, task.sizing)
    }

    /// Move the minimal start to `new_start`. Returns the end delay in days,
    /// or `None` when the sizing can no longer be reached.
    pub fn shift_minimal_dates(&mut self, task: &TaskNode, new_start: NaiveDate) -> Option<i64> {
        let skipped_days: Vec<(NaiveDate, ResourceHours)> = self
            .slots
            .range(self.min_start..new_start)
            .map(|(d, s)| (*d, s.clone()))
            .collect();
        let skipped: u32 = skipped_days
            .iter()
            .flat_map(|(_, s)| s.values())
            .sum();

        let new_end = if new_start <= self.min_end {
            let mut removed = 0;
            for (_, slot) in &skipped_days {
                for (resource, hours) in slot {
                    removed += self.buffers.entry(*resource).or_default().remove_counted(*hours);
                }
            }
            if removed == 0 {
                Some((self.min_end, self.min_end_hours))
            } else {
                self.shifted_date_hours(&task.resources, self.min_end, self.min_end_hours, removed)
            }
        } else {
            self.reset_buffers();
            self.shifted_date_hours(&task.resources, new_start, 0, task.sizing)
        };

        let (end, end_hours) = new_end?;
        let delay = (end - self.min_end).num_days();
        self.min_start = new_start;
        self.min_end = end;
        self.min_end_hours = end_hours;
        self.available_hours = self.available_hours.saturating_sub(skipped);
        Some(delay)
    }

    /// Every slot from the minimal start on
    pub fn remaining_slots(&self) -> DayPlan {
        self.slots
            .range(self.min_start..)
            .map(|(d, s)| (*d, s.clone()))
            .collect()
    }
}

/// State of every task, indexed like the graph
#[derive(Debug, Clone)]
pub struct LevelingState {
    pub tasks: Vec<TaskState>,
}

impl LevelingState {
    pub fn task(&self, idx: usize) -> &TaskState {
        &self.tasks[idx]
    }

    pub fn task_mut(&mut self, idx: usize) -> &mut TaskState {
        &mut self.tasks[idx]
    }

    pub fn is_final(&self, idx: usize) -> bool {
        self.tasks[idx].is_final()
    }

    /// Whether every predecessor of `idx` has a final assignment
    pub fn predecessors_final(&self, graph: &TaskGraph, idx: usize) -> bool {
        graph.task(idx)
            .predecessors
            .iter()
            .all(|&p| self.is_final(p))
    }

    pub fn all_final(&self) -> bool {
        self.tasks.iter().all(TaskState::is_final)
    }
}
