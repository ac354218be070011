//! Consequence trees and their ordering
//!
//! A consequence records which tasks an assignment delays, recursively.
//! Trees are ranked from least to most harmful:
//!
//! 1. Smaller maximal shifted importance wins
//! 2. Then smaller delay at that importance
//! 3. Then the sub-consequences, compared bucket by bucket: children are
//!    grouped by `(importance, delay)` in decreasing order and walked in
//!    lock-step on importance, delay, bucket size, then recursively on the
//!    buckets' own children. The side that runs out of buckets first is
//!    smaller.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Delays caused by committing one assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consequence {
    /// False when some task had to move but could not
    pub possible: bool,
    pub max_importance: u32,
    /// Delay in days at `max_importance`
    pub delay: i64,
    /// Shifted tasks by index
    pub shifted: BTreeMap<usize, Consequence>,
}

impl Default for Consequence {
    fn default() -> Self {
        Self {
            possible: true,
            max_importance: 0,
            delay: 0,
            shifted: BTreeMap::new(),
        }
    }
}

impl Consequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task` could not be moved
    pub fn add_impossible(&mut self, task: usize) {
        self.possible = false;
        self.shifted.insert(
            task,
            Consequence {
                possible: false,
                ..Consequence::default()
            },
        );
    }

    /// Fold a child's summary into this node; ties keep the larger delay
    pub fn absorb(&mut self, max_importance: u32, delay: i64, possible: bool) {
        if !possible {
            self.possible = false;
        }
        if max_importance > self.max_importance
            || (max_importance == self.max_importance && delay > self.delay)
        {
            self.max_importance = max_importance;
            self.delay = delay;
        }
    }

    /// Node reached by following `path` from this one, created on demand
    pub fn node_mut(&mut self, path: &[usize]) -> &mut Consequence {
        path.iter()
            .fold(self, |node, task| node.shifted.entry(*task).or_default())
    }

    /// Number of shifted tasks in the whole tree
    pub fn shifted_count(&self) -> usize {
        self.shifted
            .values()
            .map(|c| 1 + c.shifted_count())
            .sum()
    }

    /// Harm ordering: `Less` means `self` is the better consequence
    pub fn cmp_harm(&self, other: &Self) -> Ordering {
        self.max_importance
            .cmp(&other.max_importance)
            .then(self.delay.cmp(&other.delay))
            .then_with(|| compare_lists(&[self], &[other]))
    }
}

type Bucket<'a> = (u32, i64, Vec<&'a Consequence>);

/// Children of every listed node, grouped by (importance, delay), decreasing
fn buckets<'a>(list: &[&'a Consequence]) -> Vec<Bucket<'a>> {
    let mut result: Vec<Bucket<'a>> = Vec::new();
    for consequence in list {
        for child in consequence.shifted.values() {
            let key = (child.max_importance, child.delay);
            match result
                .iter()
                .position(|(i, d, _)| (*i, *d) <= key)
            {
                Some(pos) if (result[pos].0, result[pos].1) == key => result[pos].2.push(child),
                Some(pos) => result.insert(pos, (key.0, key.1, vec![child])),
                None => result.push((key.0, key.1, vec![child])),
            }
        }
    }
    result
}

fn compare_lists(mine: &[&Consequence], theirs: &[&Consequence]) -> Ordering {
    let mine = buckets(mine);
    let theirs = buckets(theirs);

    let mut idx = 0;
    loop {
        match (mine.get(idx), theirs.get(idx)) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some((mi, md, ml)), Some((ti, td, tl))) => {
                let order = mi
                    .cmp(ti)
                    .then(md.cmp(td))
                    .then(ml.len().cmp(&tl.len()))
                    .then_with(|| compare_lists(ml, tl));
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
        idx += 1;
    }
}
