//! Task graph preparation
//!
//! Resolves task and resource names into dense indices so the search can
//! work on plain `usize` handles. Everything derived here is computed once
//! per run: predecessors, resource calendars, partitions and a topological
//! order.
//!
//! # Algorithm
//!
//! 1. Index tasks and resources in input order, rejecting duplicates
//! 2. Resolve successor and candidate resource names
//! 3. Derive predecessors from successor lists
//! 4. Order tasks topologically with repeated passes over the remaining
//!    tasks, so ready tasks keep their input order
//! 5. Reject tasks with nothing to level (sizing of 0 hours)
//! 6. Cluster tasks into partitions of shared resources

use chrono::NaiveDate;
use leveler_core::{LevelingError, Resource, ResourceId, Task, TaskId};
use std::collections::{BTreeMap, HashMap};

use crate::partition;

/// Hours per resource index
pub type ResourceHours = BTreeMap<usize, u32>;

/// Hours per resource index, per day
pub type DayPlan = BTreeMap<NaiveDate, ResourceHours>;

/// Errors during graph construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two tasks share an identifier
    DuplicateTask(TaskId),
    /// A successor name does not resolve
    MissingSuccessor { task: TaskId, missing: TaskId },
    /// A candidate or pinned resource does not resolve
    UnknownResource { task: TaskId, resource: ResourceId },
    /// Cycle detected in successor links
    CycleDetected { tasks: Vec<TaskId> },
    /// A task with a sizing of zero hours
    EmptyTask(TaskId),
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::DuplicateTask(task) => write!(f, "Task '{}' is declared twice", task),
            GraphError::MissingSuccessor { task, missing } => {
                write!(f, "Task '{}' precedes '{}' which doesn't exist", task, missing)
            }
            GraphError::UnknownResource { task, resource } => {
                write!(f, "Task '{}' uses resource '{}' which doesn't exist", task, resource)
            }
            GraphError::CycleDetected { tasks } => {
                write!(f, "Cycle detected involving tasks: {:?}", tasks)
            }
            GraphError::EmptyTask(task) => write!(f, "Task '{}' has a sizing of 0 hours", task),
        }
    }
}

impl std::error::Error for GraphError {}

impl From<GraphError> for LevelingError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::DuplicateTask(task) => LevelingError::DuplicateTask(task),
            GraphError::MissingSuccessor { task, missing } => {
                LevelingError::TaskNotFound { task, missing }
            }
            GraphError::UnknownResource { task, resource } => {
                LevelingError::ResourceNotFound { task, resource }
            }
            GraphError::CycleDetected { tasks } => {
                LevelingError::CircularDependency(tasks.join(" -> "))
            }
            GraphError::EmptyTask(task) => LevelingError::EmptyTask(task),
        }
    }
}

/// A task with every reference resolved to an index
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: TaskId,
    pub priority: u32,
    pub sizing: u32,
    /// Maximal hours per candidate resource
    pub resources: ResourceHours,
    pub successors: Vec<usize>,
    pub predecessors: Vec<usize>,
    /// Partition of tasks sharing resources with this one
    pub partition: usize,
    pub pinned: Option<DayPlan>,
}

/// A resource calendar
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub id: ResourceId,
    pub availability: BTreeMap<NaiveDate, u32>,
}

impl ResourceNode {
    pub fn hours_on(&self, day: NaiveDate) -> u32 {
        self.availability.get(&day).copied().unwrap_or(0)
    }
}

/// The resolved leveling problem
#[derive(Debug, Clone)]
pub struct TaskGraph {
    pub tasks: Vec<TaskNode>,
    pub resources: Vec<ResourceNode>,
    /// Task lookup by ID
    pub task_map: HashMap<TaskId, usize>,
    /// Topological order (computed once, reused)
    pub topo_order: Vec<usize>,
}

impl TaskGraph {
    /// Resolve tasks and resources into an indexed graph
    pub fn build(tasks: &[Task], resources: &[Resource]) -> Result<Self, GraphError> {
        let resource_map: HashMap<&str, usize> = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.as_str(), i))
            .collect();

        let mut task_map: HashMap<TaskId, usize> = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            if task_map.insert(task.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateTask(task.id.clone()));
            }
        }

        let resolve_resource = |task: &Task, name: &str| -> Result<usize, GraphError> {
            resource_map
                .get(name)
                .copied()
                .ok_or_else(|| GraphError::UnknownResource {
                    task: task.id.clone(),
                    resource: name.to_string(),
                })
        };

        let mut nodes = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut successors = Vec::with_capacity(task.successors.len());
            for name in &task.successors {
                let idx = task_map
                    .get(name)
                    .copied()
                    .ok_or_else(|| GraphError::MissingSuccessor {
                        task: task.id.clone(),
                        missing: name.clone(),
                    })?;
                if !successors.contains(&idx) {
                    successors.push(idx);
                }
            }

            let mut task_resources = ResourceHours::new();
            for (name, hours) in &task.resources {
                task_resources.insert(resolve_resource(task, name)?, *hours);
            }

            let pinned = match &task.pinned {
                Some(days) => {
                    let mut plan = DayPlan::new();
                    for (day, hours) in days {
                        let mut resolved = ResourceHours::new();
                        for (name, h) in hours {
                            if *h > 0 {
                                resolved.insert(resolve_resource(task, name)?, *h);
                            }
                        }
                        if !resolved.is_empty() {
                            plan.insert(*day, resolved);
                        }
                    }
                    Some(plan)
                }
                None => None,
            };

            nodes.push(TaskNode {
                id: task.id.clone(),
                priority: task.priority,
                sizing: task.sizing,
                resources: task_resources,
                successors,
                predecessors: Vec::new(),
                partition: 0,
                pinned,
            });
        }

        for i in 0..nodes.len() {
            for s in nodes[i].successors.clone() {
                nodes[s].predecessors.push(i);
            }
        }

        let topo_order = topological_order(&nodes)?;

        if let Some(empty) = nodes.iter().find(|node| node.sizing == 0) {
            return Err(GraphError::EmptyTask(empty.id.clone()));
        }

        let partitions = partition::partition(&nodes);
        for (id, members) in partitions.iter().enumerate() {
            for &t in members {
                nodes[t].partition = id;
            }
        }

        Ok(Self {
            tasks: nodes,
            resources: resources
                .iter()
                .map(|r| ResourceNode {
                    id: r.id.clone(),
                    availability: r.availability.clone(),
                })
                .collect(),
            task_map,
            topo_order,
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, idx: usize) -> &TaskNode {
        &self.tasks[idx]
    }

    pub fn task_id(&self, idx: usize) -> &str {
        &self.tasks[idx].id
    }

    /// Whether two tasks compete for at least one resource, transitively
    pub fn same_partition(&self, a: usize, b: usize) -> bool {
        self.tasks[a].partition == self.tasks[b].partition
    }

    /// Whether `to` is a transitive successor of `from`
    pub fn reaches(&self, from: usize, to: usize) -> bool {
        let mut visited = vec![false; self.tasks.len()];
        let mut stack = self.tasks[from].successors.clone();
        while let Some(t) = stack.pop() {
            if t == to {
                return true;
            }
            if !visited[t] {
                visited[t] = true;
                stack.extend(&self.tasks[t].successors);
            }
        }
        false
    }

    /// Number of distinct partitions
    pub fn partition_count(&self) -> usize {
        self.tasks
            .iter()
            .map(|t| t.partition + 1)
            .max()
            .unwrap_or(0)
    }

    /// Task IDs grouped by partition, in task input order
    pub fn partitions(&self) -> Vec<Vec<TaskId>> {
        let mut groups = vec![Vec::new(); self.partition_count()];
        for task in &self.tasks {
            groups[task.partition].push(task.id.clone());
        }
        groups
    }

    /// Convert a per-index day plan back to resource names
    pub fn named_plan(&self, plan: &DayPlan) -> leveler_core::DayAssignments {
        plan.iter()
            .map(|(day, hours)| {
                let named = hours
                    .iter()
                    .map(|(r, h)| (self.resources[*r].id.clone(), *h))
                    .collect();
                (*day, named)
            })
            .collect()
    }
}

/// Repeated passes over the remaining tasks; a pass that places nothing means a cycle
fn topological_order(nodes: &[TaskNode]) -> Result<Vec<usize>, GraphError> {
    let mut placed = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    let mut remaining: Vec<usize> = (0..nodes.len()).collect();

    while !remaining.is_empty() {
        let mut progressed = false;
        remaining.retain(|&t| {
            if nodes[t].predecessors.iter().all(|&p| placed[p]) {
                placed[t] = true;
                order.push(t);
                progressed = true;
                false
            } else {
                true
            }
        });

        if !progressed {
            return Err(GraphError::CycleDetected {
                tasks: remaining.iter().map(|&t| nodes[t].id.clone()).collect(),
            });
        }
    }

    Ok(order)
}
