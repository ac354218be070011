//! Path cache
//!
//! An arena of search-tree nodes addressed by index. Each node stands for
//! one explored prefix of `(task, iteration)` choices. For every task tried
//! from a node, [`TaskOptions`] remembers the iterations explored, whether
//! one of them was accepted, the orderings already requested, and the tasks
//! its rejected iterations shifted.
//!
//! The tree lives for the whole run and is mutated in place. Nodes are never
//! removed; a rejected leaf may later be accepted by the fallback.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::consequence::Consequence;
use crate::graph::TaskGraph;
use crate::state::LevelingState;

pub type NodeId = usize;

/// The root node: nothing assigned yet
pub const ROOT: NodeId = 0;

/// One position in a task sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssignedTaskRef {
    pub task: usize,
    pub iteration: u32,
}

impl AssignedTaskRef {
    pub fn first(task: usize) -> Self {
        Self { task, iteration: 0 }
    }
}

/// A task shifted by another one in a rejected iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftedTaskInfo {
    pub shifted: usize,
    pub shifting: usize,
    pub consequence: Consequence,
    /// Tasks left to assign when the shift happened
    pub remaining: usize,
}

impl ShiftedTaskInfo {
    /// Consequence harm first, then the remaining count, then the task indices
    pub fn cmp_rank(&self, other: &Self) -> Ordering {
        self.consequence
            .cmp_harm(&other.consequence)
            .then(self.remaining.cmp(&other.remaining))
            .then(self.shifted.cmp(&other.shifted))
            .then(self.shifting.cmp(&other.shifting))
    }
}

/// Insert before the first strictly smaller info, dropping exact duplicates
fn insert_descending(list: &mut Vec<ShiftedTaskInfo>, info: ShiftedTaskInfo) {
    let mut pos = list.len();
    for (i, other) in list.iter().enumerate() {
        match info.cmp_rank(other) {
            Ordering::Greater => {
                pos = i;
                break;
            }
            Ordering::Equal if info == *other => return,
            _ => {}
        }
    }
    list.insert(pos, info);
}

/// Everything known about one task tried from one node
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub initial_importance: u32,
    /// Some iteration was accepted under the node's bound
    pub solution_found: bool,
    /// Tasks queued after this one when it was tried
    pub remaining: Vec<AssignedTaskRef>,
    /// Shifted tasks, most harmful first; `None` until computed
    pub shifted: Option<Vec<ShiftedTaskInfo>>,
    /// Task sequences already used to request a reordering
    pub tried: Vec<Vec<usize>>,
    pub iterations: BTreeMap<u32, NodeId>,
}

impl TaskOptions {
    fn new(initial_importance: u32) -> Self {
        Self {
            initial_importance,
            solution_found: false,
            remaining: Vec::new(),
            shifted: None,
            tried: Vec::new(),
            iterations: BTreeMap::new(),
        }
    }
}

/// One explored prefix
#[derive(Debug, Clone)]
pub struct PathNode {
    /// Present only on rejected iterations
    pub consequence: Option<Consequence>,
    /// Smallest initial importance committed along the prefix
    pub path_min: u32,
    /// State reached after the prefix; replayed instead of recomputed
    pub state: Option<LevelingState>,
    /// Tasks reachable from here; `None` until tried
    pub children: BTreeMap<usize, Option<TaskOptions>>,
}

impl PathNode {
    pub fn is_accepted(&self) -> bool {
        self.consequence.is_none()
    }
}

/// Branches with their leaf node, as returned by [`PathTree::find_smallest`]
pub type Branches = Vec<(Vec<AssignedTaskRef>, NodeId)>;

#[derive(Debug, Clone)]
pub struct PathTree {
    nodes: Vec<PathNode>,
}

impl PathTree {
    /// Root node listing every unfinalized task whose predecessors are final
    pub fn new(graph: &TaskGraph, state: &LevelingState) -> Self {
        let children = graph
            .topo_order
            .iter()
            .filter(|&&t| !state.is_final(t) && state.predecessors_final(graph, t))
            .map(|&t| (t, None))
            .collect();
        Self {
            nodes: vec![PathNode {
                consequence: None,
                path_min: u32::MAX,
                state: None,
                children,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &PathNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PathNode {
        &mut self.nodes[id]
    }

    pub fn options(&self, node: NodeId, task: usize) -> Option<&TaskOptions> {
        self.nodes[node].children.get(&task)?.as_ref()
    }

    pub fn options_mut(&mut self, node: NodeId, task: usize) -> Option<&mut TaskOptions> {
        self.nodes[node].children.get_mut(&task)?.as_mut()
    }

    /// Accepted node with a stored state for `r`, if already explored
    pub fn cached(&self, node: NodeId, r: AssignedTaskRef) -> Option<NodeId> {
        let child = *self.options(node, r.task)?.iterations.get(&r.iteration)?;
        let child_node = &self.nodes[child];
        (child_node.is_accepted() && child_node.state.is_some()).then_some(child)
    }

    /// Record one tried iteration of `task` from `node`.
    ///
    /// The new node's bound is `min(bound, initial_importance)`. The
    /// iteration is accepted when its consequence is possible and does not
    /// shift anything above that bound. Returns the new node and whether it
    /// was accepted.
    pub fn complete_tried_path(
        &mut self,
        graph: &TaskGraph,
        node: NodeId,
        task: usize,
        iteration: u32,
        consequence: Consequence,
        initial_importance: u32,
        state: &LevelingState,
    ) -> (NodeId, bool) {
        let mut children: BTreeMap<usize, Option<TaskOptions>> = self.nodes[node]
            .children
            .keys()
            .filter(|&&t| t != task)
            .map(|&t| (t, None))
            .collect();
        for &s in &graph.task(task).successors {
            if state.predecessors_final(graph, s) {
                children.insert(s, None);
            }
        }

        let path_min = self.nodes[node].path_min.min(initial_importance);
        let accepted = consequence.possible && consequence.max_importance <= path_min;

        let child = self.nodes.len();
        self.nodes.push(PathNode {
            consequence: (!accepted).then_some(consequence),
            path_min,
            state: None,
            children,
        });

        self.nodes[node]
            .children
            .entry(task)
            .or_insert(None)
            .get_or_insert_with(|| TaskOptions::new(initial_importance))
            .iterations
            .insert(iteration, child);

        (child, accepted)
    }

    /// Forget the shifted list of `task` so the next request recomputes it
    pub fn reset_shifted(&mut self, node: NodeId, task: usize) {
        if let Some(options) = self.options_mut(node, task) {
            options.shifted = None;
        }
    }

    /// Collect the tasks shifted at or above the bound of every iteration of
    /// `task`, descending into accepted iterations. Impossible shifts are
    /// always kept.
    pub fn compute_shifted_list(&mut self, node: NodeId, task: usize, remaining: usize) {
        let Some(options) = self.options(node, task) else {
            return;
        };
        if options.shifted.is_some() {
            return;
        }
        let iterations: Vec<NodeId> = options.iterations.values().copied().collect();
        let mut list = Vec::new();

        for iteration in iterations {
            // Bound the iteration was judged against
            let path_min = self.nodes[iteration].path_min;
            match self.nodes[iteration].consequence.clone() {
                Some(consequence) => {
                    for (&shifted, c) in &consequence.shifted {
                        if !c.possible || c.max_importance >= path_min {
                            insert_descending(
                                &mut list,
                                ShiftedTaskInfo {
                                    shifted,
                                    shifting: task,
                                    consequence: c.clone(),
                                    remaining,
                                },
                            );
                        }
                    }
                }
                None => {
                    let tried: Vec<usize> = self.nodes[iteration]
                        .children
                        .iter()
                        .filter(|(_, o)| o.is_some())
                        .map(|(t, _)| *t)
                        .collect();
                    for next in tried {
                        self.compute_shifted_list(iteration, next, remaining.saturating_sub(1));
                        let sub = self
                            .options(iteration, next)
                            .and_then(|o| o.shifted.clone())
                            .unwrap_or_default();
                        for info in sub {
                            if info.consequence.possible && info.consequence.max_importance < path_min {
                                continue;
                            }
                            insert_descending(&mut list, info);
                        }
                    }
                }
            }
        }

        if let Some(options) = self.options_mut(node, task) {
            options.shifted = Some(list);
        }
    }

    /// Rejected leaves under `node` with the least harmful consequence.
    ///
    /// Leaves that are impossible or have no stored state cannot be
    /// accepted and are skipped.
    pub fn find_smallest(&self, node: NodeId) -> (Branches, Option<Consequence>) {
        let mut best: Branches = Vec::new();
        let mut best_consequence: Option<Consequence> = None;

        for (&task, options) in &self.nodes[node].children {
            let Some(options) = options else {
                continue;
            };
            for (&iteration, &child) in &options.iterations {
                let head = AssignedTaskRef { task, iteration };
                let (sub_paths, sub_consequence) = self.find_smallest(child);

                let (paths, consequence) = if sub_paths.is_empty() {
                    let leaf = &self.nodes[child];
                    let Some(consequence) = leaf.consequence.as_ref().filter(|c| c.possible) else {
                        continue;
                    };
                    if leaf.state.is_none() {
                        continue;
                    }
                    let mut branch = vec![head];
                    branch.extend(options.remaining.iter().copied());
                    (vec![(branch, child)], consequence.clone())
                } else {
                    let Some(consequence) = sub_consequence else {
                        continue;
                    };
                    let paths = sub_paths
                        .into_iter()
                        .map(|(path, leaf)| {
                            let mut branch = vec![head];
                            branch.extend(path);
                            (branch, leaf)
                        })
                        .collect();
                    (paths, consequence)
                };

                match best_consequence.as_ref().map(|b| consequence.cmp_harm(b)) {
                    None | Some(Ordering::Less) => {
                        best = paths;
                        best_consequence = Some(consequence);
                    }
                    Some(Ordering::Equal) => best.extend(paths),
                    Some(Ordering::Greater) => {}
                }
            }
        }
        (best, best_consequence)
    }

    /// Initial importances met along `path` from the root
    pub fn importance_path(&self, path: &[AssignedTaskRef]) -> Vec<u32> {
        let mut result = Vec::new();
        let mut node = ROOT;
        for r in path {
            let Some(options) = self.options(node, r.task) else {
                break;
            };
            result.push(options.initial_importance);
            let Some(&next) = options.iterations.get(&r.iteration) else {
                break;
            };
            node = next;
        }
        result
    }

    /// Tie-break between equally harmful branches.
    ///
    /// Branches committing more important tasks earlier win. Among those, the
    /// branches sharing the longest prefix with `current` win, then the
    /// shortest.
    pub fn best_among(
        &self,
        branches: Branches,
        current: &[AssignedTaskRef],
    ) -> Option<(Vec<AssignedTaskRef>, NodeId)> {
        let mut iter = branches.into_iter();
        let first = iter.next()?;
        let mut reference = self.importance_path(&first.0);
        let mut selected = vec![first];

        for branch in iter {
            let importances = self.importance_path(&branch.0);
            let order = importances
                .iter()
                .zip(&reference)
                .map(|(a, b)| a.cmp(b))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal);
            match order {
                Ordering::Greater => {
                    reference = importances;
                    selected = vec![branch];
                }
                Ordering::Equal => selected.push(branch),
                Ordering::Less => {}
            }
        }

        for (idx, r) in current.iter().enumerate() {
            if selected.len() <= 1 {
                break;
            }
            let same = |b: &(Vec<AssignedTaskRef>, NodeId)| b.0.get(idx).map(|x| x.task) == Some(r.task);
            if selected.iter().any(same) {
                selected.retain(same);
            } else {
                break;
            }
        }

        let shortest = selected.iter().map(|b| b.0.len()).min()?;
        selected.into_iter().find(|b| b.0.len() == shortest)
    }

    /// Accept the least harmful rejected leaf of the whole tree and return
    /// the sequence leading to it.
    pub fn already_known(&mut self, current: &[AssignedTaskRef]) -> Option<Vec<AssignedTaskRef>> {
        let (branches, _) = self.find_smallest(ROOT);
        let (branch, leaf) = self.best_among(branches, current)?;
        self.nodes[leaf].consequence = None;
        Some(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::prepare;
    use crate::strategy::WeightedStrategy;
    use chrono::NaiveDate;
    use leveler_core::{Resource, Task};
    use pretty_assertions::assert_eq;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2000, 1, d).unwrap()
    }

    fn setup() -> (TaskGraph, LevelingState) {
        let resources = vec![Resource::new("R1").daily(date(1), 10, 1)];
        let tasks = [
            Task::new("A").priority(300).sizing(1).resource("R1", 1).successor("C"),
            Task::new("B").priority(200).sizing(1).resource("R1", 1),
            Task::new("C").priority(100).sizing(1).resource("R1", 1),
        ];
        let graph = TaskGraph::build(&tasks, &resources).unwrap();
        let state = prepare(&graph, &WeightedStrategy::defaults()).unwrap();
        (graph, state)
    }

    fn shifted(importance: u32, delay: i64) -> Consequence {
        let mut c = Consequence::new();
        c.max_importance = importance;
        c.delay = delay;
        c
    }

    fn rejected(task: usize, importance: u32) -> Consequence {
        let mut c = shifted(importance, 1);
        c.shifted.insert(task, shifted(importance, 1));
        c
    }

    #[test]
    fn root_lists_ready_tasks() {
        let (graph, state) = setup();
        let tree = PathTree::new(&graph, &state);

        assert_eq!(tree.node(ROOT).children.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(tree.node(ROOT).path_min, u32::MAX);
    }

    #[test]
    fn accepted_iteration_tightens_bound_and_opens_successors() {
        let (graph, mut state) = setup();
        let mut tree = PathTree::new(&graph, &state);
        state.task_mut(0).assignment = Some(crate::state::Assignment::from_days(
            [(date(1), [(0, 1)].into_iter().collect())].into_iter().collect(),
        )
        .unwrap());

        let (child, accepted) = tree.complete_tried_path(&graph, ROOT, 0, 0, Consequence::new(), 300, &state);

        assert!(accepted);
        assert_eq!(tree.node(child).path_min, 300);
        assert_eq!(tree.node(child).children.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert!(tree.options(ROOT, 0).is_some());
        assert_eq!(tree.options(ROOT, 0).unwrap().iterations[&0], child);
    }

    #[test]
    fn bound_is_non_increasing() {
        let (graph, state) = setup();
        let mut tree = PathTree::new(&graph, &state);

        let (a, _) = tree.complete_tried_path(&graph, ROOT, 1, 0, Consequence::new(), 200, &state);
        let (b, _) = tree.complete_tried_path(&graph, a, 0, 0, Consequence::new(), 300, &state);

        assert_eq!(tree.node(a).path_min, 200);
        assert_eq!(tree.node(b).path_min, 200);
    }

    #[test]
    fn shifting_above_bound_is_rejected() {
        let (graph, state) = setup();
        let mut tree = PathTree::new(&graph, &state);

        let (a, _) = tree.complete_tried_path(&graph, ROOT, 1, 0, Consequence::new(), 200, &state);
        let (b, accepted) = tree.complete_tried_path(&graph, a, 2, 0, rejected(0, 300), 100, &state);

        assert!(!accepted);
        assert!(tree.node(b).consequence.is_some());
        assert_eq!(tree.cached(a, AssignedTaskRef::first(2)), None);
    }

    #[test]
    fn impossible_consequence_is_rejected() {
        let (graph, state) = setup();
        let mut tree = PathTree::new(&graph, &state);
        let mut impossible = Consequence::new();
        impossible.add_impossible(1);

        let (_, accepted) = tree.complete_tried_path(&graph, ROOT, 0, 0, impossible, 300, &state);

        assert!(!accepted);
    }

    #[test]
    fn cached_requires_a_stored_state() {
        let (graph, state) = setup();
        let mut tree = PathTree::new(&graph, &state);
        let (child, _) = tree.complete_tried_path(&graph, ROOT, 1, 0, Consequence::new(), 200, &state);

        assert_eq!(tree.cached(ROOT, AssignedTaskRef::first(1)), None);
        tree.node_mut(child).state = Some(state.clone());
        assert_eq!(tree.cached(ROOT, AssignedTaskRef::first(1)), Some(child));
    }

    #[test]
    fn shifted_list_is_sorted_most_harmful_first() {
        let (graph, state) = setup();
        let mut tree = PathTree::new(&graph, &state);
        let (a, _) = tree.complete_tried_path(&graph, ROOT, 1, 0, Consequence::new(), 100, &state);

        let mut two = shifted(300, 1);
        two.shifted.insert(0, shifted(300, 1));
        two.shifted.insert(2, shifted(150, 4));
        tree.complete_tried_path(&graph, a, 2, 0, two, 100, &state);
        tree.complete_tried_path(&graph, a, 2, 1, rejected(0, 300), 100, &state);

        tree.compute_shifted_list(a, 2, 2);
        let list = tree.options(a, 2).unwrap().shifted.clone().unwrap();

        let order: Vec<(usize, u32, i64)> = list
            .iter()
            .map(|i| (i.shifted, i.consequence.max_importance, i.consequence.delay))
            .collect();
        assert_eq!(order, vec![(0, 300, 1), (2, 150, 4)]);
    }

    #[test]
    fn fallback_accepts_the_least_harmful_leaf() {
        let (graph, state) = setup();
        let mut tree = PathTree::new(&graph, &state);

        let (worse, _) = tree.complete_tried_path(&graph, ROOT, 1, 0, rejected(0, 300), 100, &state);
        let (better, _) = tree.complete_tried_path(&graph, ROOT, 0, 0, rejected(1, 250), 100, &state);
        tree.node_mut(worse).state = Some(state.clone());
        tree.node_mut(better).state = Some(state.clone());
        tree.options_mut(ROOT, 0).unwrap().remaining = vec![AssignedTaskRef::first(1), AssignedTaskRef::first(2)];

        let branch = tree.already_known(&[]).unwrap();

        assert_eq!(
            branch,
            vec![AssignedTaskRef::first(0), AssignedTaskRef::first(1), AssignedTaskRef::first(2)]
        );
        assert!(tree.node(better).is_accepted());
        assert!(!tree.node(worse).is_accepted());
    }

    #[test]
    fn tie_prefers_more_important_prefix() {
        let (graph, state) = setup();
        let mut tree = PathTree::new(&graph, &state);
        let (low, _) = tree.complete_tried_path(&graph, ROOT, 1, 0, rejected(2, 350), 200, &state);
        let (high, _) = tree.complete_tried_path(&graph, ROOT, 0, 0, rejected(2, 350), 300, &state);
        tree.node_mut(low).state = Some(state.clone());
        tree.node_mut(high).state = Some(state.clone());

        let (branches, _) = tree.find_smallest(ROOT);
        assert_eq!(branches.len(), 2);

        let (branch, leaf) = tree.best_among(branches, &[]).unwrap();
        assert_eq!(branch[0].task, 0);
        assert_eq!(leaf, high);
    }
}
