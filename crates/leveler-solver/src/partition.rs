//! Resource partitions
//!
//! Tasks compete for capacity only when they share a candidate resource,
//! directly or through a chain of other tasks. Only tasks of the same
//! partition are ever reordered relative to each other.
//!
//! # Algorithm
//!
//! Buckets map a resource set to the tasks using it. Each task either opens
//! a new bucket, joins the single bucket it intersects, or merges every
//! intersecting bucket into one.

use std::collections::BTreeSet;

use crate::graph::TaskNode;

struct Bucket {
    resources: BTreeSet<usize>,
    tasks: Vec<usize>,
}

/// Group tasks into disjoint partitions, in order of first appearance
pub fn partition(tasks: &[TaskNode]) -> Vec<Vec<usize>> {
    let mut buckets: Vec<Bucket> = Vec::new();

    for (idx, task) in tasks.iter().enumerate() {
        let resources: BTreeSet<usize> = task.resources.keys().copied().collect();
        let intersecting: Vec<usize> = buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.resources.is_disjoint(&resources))
            .map(|(i, _)| i)
            .collect();

        match intersecting.as_slice() {
            [] => buckets.push(Bucket {
                resources,
                tasks: vec![idx],
            }),
            [single] => {
                let bucket = &mut buckets[*single];
                bucket.resources.extend(resources);
                bucket.tasks.push(idx);
            }
            many => {
                let mut merged = Bucket {
                    resources,
                    tasks: Vec::new(),
                };
                // Remove from the back so earlier indices stay valid
                for &i in many.iter().rev() {
                    let bucket = buckets.remove(i);
                    merged.resources.extend(bucket.resources);
                    merged.tasks.extend(bucket.tasks);
                }
                merged.tasks.push(idx);
                merged.tasks.sort_unstable();
                buckets.push(merged);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = buckets.into_iter().map(|b| b.tasks).collect();
    groups.sort_by_key(|g| g.first().copied());
    groups
}
