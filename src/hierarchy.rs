use std;
use std::collections::{BTreeMap, BTreeSet};

use crate::distance_store::{DistanceMethod, DistanceStore};
use crate::errors::ClusterError;

use disjoint::DisjointSetVec;

/// Inter-cluster distance update rule used during agglomeration. A closed
/// set; each variant maps to its standard Lance-Williams formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    Single,
    Complete,
    Average,
    Weighted,
}

impl Linkage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Linkage::Single => "single",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
            Linkage::Weighted => "weighted",
        }
    }
}

impl std::fmt::Display for Linkage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Linkage {
    type Err = String;

    fn from_str(s: &str) -> Result<Linkage, String> {
        match s {
            "single" => Ok(Linkage::Single),
            "complete" => Ok(Linkage::Complete),
            "average" => Ok(Linkage::Average),
            "weighted" => Ok(Linkage::Weighted),
            _ => Err(format!("Unknown linkage method '{}'", s)),
        }
    }
}

/// One agglomeration step. `left` and `right` are node ids local to the
/// dendrogram: 0..n-1 are leaves (positions into `Dendrogram::leaves`),
/// internal nodes are numbered n.. in merge order, `id` being this step's.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f32,
    pub id: usize,
}

/// Result of one agglomerative clustering run over a genome subset.
/// `leaves` holds the global genome indices in ascending order, so leaf node
/// i corresponds to genome `leaves[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dendrogram {
    pub leaves: Vec<usize>,
    pub merges: Vec<Merge>,
}

impl Dendrogram {
    /// Merge heights must be non-decreasing. The four supported linkages
    /// cannot produce inversions, but violations are still reported rather
    /// than silently accepted.
    pub fn check_monotonic(&self) -> Result<(), ClusterError> {
        let mut previous = 0.0f32;
        for (step, merge) in self.merges.iter().enumerate() {
            if merge.height < previous {
                return Err(ClusterError::NonMonotonic {
                    step,
                    height: merge.height,
                    previous,
                });
            }
            previous = merge.height;
        }
        Ok(())
    }

    /// Flatten the merge tree at a height threshold: genomes end up in the
    /// same cluster iff they are connected through merges at or below the
    /// threshold. Returns clusters of global genome indices, members sorted,
    /// clusters ordered by their smallest member.
    pub fn cut(&self, threshold: f32) -> Vec<Vec<usize>> {
        let n = self.leaves.len();
        let mut sets: DisjointSetVec<usize> = DisjointSetVec::with_capacity(n);
        for i in 0..n {
            sets.push(i);
        }

        // Track a representative leaf for every node id so internal nodes
        // can be joined through their subtrees.
        let mut representative: BTreeMap<usize, usize> = (0..n).map(|i| (i, i)).collect();
        for merge in &self.merges {
            let left_leaf = representative[&merge.left];
            let right_leaf = representative[&merge.right];
            if merge.height <= threshold {
                sets.join(left_leaf, right_leaf);
            }
            representative.insert(merge.id, left_leaf);
        }

        let mut clusters: Vec<Vec<usize>> = sets
            .indices()
            .sets()
            .iter()
            .map(|cluster| {
                let mut indices: Vec<_> = cluster.to_vec();
                indices.sort_unstable();
                indices.iter().map(|i| self.leaves[*i]).collect()
            })
            .collect();
        clusters.sort_unstable_by_key(|c| c[0]);
        clusters
    }

    /// Drop the given genomes, retaining only merge nodes whose entire leaf
    /// set survives. Parents of dropped nodes necessarily contain the same
    /// removed leaves and are dropped with them, so the result may be a
    /// forest. Node ids are renumbered to stay dense.
    pub fn remove_leaves(&mut self, removed_genomes: &BTreeSet<usize>) {
        let removed_local: BTreeSet<usize> = self
            .leaves
            .iter()
            .enumerate()
            .filter(|(_, genome)| removed_genomes.contains(genome))
            .map(|(i, _)| i)
            .collect();
        if removed_local.is_empty() {
            return;
        }

        let mut new_leaves = vec![];
        let mut id_map: BTreeMap<usize, usize> = BTreeMap::new();
        for (old_local, genome) in self.leaves.iter().enumerate() {
            if !removed_local.contains(&old_local) {
                id_map.insert(old_local, new_leaves.len());
                new_leaves.push(*genome);
            }
        }

        let n_new = new_leaves.len();
        let mut leaf_sets: BTreeMap<usize, BTreeSet<usize>> =
            (0..self.leaves.len()).map(|i| (i, std::iter::once(i).collect())).collect();
        let mut new_merges: Vec<Merge> = vec![];
        for merge in &self.merges {
            let mut leaf_set = leaf_sets[&merge.left].clone();
            leaf_set.extend(leaf_sets[&merge.right].iter().copied());
            let disjoint = leaf_set.is_disjoint(&removed_local);
            leaf_sets.insert(merge.id, leaf_set);
            if disjoint {
                let new_id = n_new + new_merges.len();
                let mut left = id_map[&merge.left];
                let mut right = id_map[&merge.right];
                if left > right {
                    std::mem::swap(&mut left, &mut right);
                }
                id_map.insert(merge.id, new_id);
                new_merges.push(Merge {
                    left,
                    right,
                    height: merge.height,
                    id: new_id,
                });
            }
        }

        self.leaves = new_leaves;
        self.merges = new_merges;
    }
}

/// Cluster a genome subset: build the complete distance matrix under the
/// method (failing fast if any pair is missing from the store), agglomerate
/// under the linkage rule, and cut the dendrogram at the threshold, a
/// distance i.e. 1 - ANI.
///
/// Sets of size 0 or 1 trivially form singleton clusters without touching
/// the store, and return no dendrogram.
pub fn cluster(
    store: &DistanceStore,
    genome_indices: &[usize],
    method: DistanceMethod,
    linkage: Linkage,
    threshold: f32,
) -> Result<(Vec<Vec<usize>>, Option<Dendrogram>), ClusterError> {
    if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
        return Err(ClusterError::InvalidThreshold { threshold });
    }

    let mut leaves = genome_indices.to_vec();
    leaves.sort_unstable();
    leaves.dedup();
    if leaves.len() <= 1 {
        return Ok((leaves.iter().map(|leaf| vec![*leaf]).collect(), None));
    }

    let n = leaves.len();
    let mut pair_distances: BTreeMap<(usize, usize), f32> = BTreeMap::new();
    let mut missing = vec![];
    for i in 0..n {
        for j in (i + 1)..n {
            match store.get(leaves[i], leaves[j], method) {
                Some(distance) => {
                    pair_distances.insert((i, j), distance);
                }
                None => missing.push((leaves[i], leaves[j])),
            }
        }
    }
    if !missing.is_empty() {
        return Err(ClusterError::IncompleteMatrix { method, missing });
    }

    let merges = agglomerate(n, pair_distances, linkage);
    let dendrogram = Dendrogram { leaves, merges };
    dendrogram.check_monotonic()?;
    let clusters = dendrogram.cut(threshold);
    debug!(
        "Cut {} linkage dendrogram at {} into {} clusters",
        linkage,
        threshold,
        clusters.len()
    );
    Ok((clusters, Some(dendrogram)))
}

/// Agglomerative hierarchical clustering over a complete pairwise distance
/// map keyed by local leaf index. Ties on merge height are broken towards
/// the pair containing the lowest original leaf indices, so results never
/// depend on insertion order of unrelated pairs.
fn agglomerate(
    n: usize,
    pair_distances: BTreeMap<(usize, usize), f32>,
    linkage: Linkage,
) -> Vec<Merge> {
    // Active cluster id -> (size, smallest leaf index underneath)
    let mut active: BTreeMap<usize, (usize, usize)> = (0..n).map(|i| (i, (1, i))).collect();
    let mut distances = pair_distances;
    let mut merges: Vec<Merge> = vec![];

    for step in 0..(n - 1) {
        let mut best: Option<((usize, usize), f32, (usize, usize))> = None;
        for (pair, distance) in distances.iter() {
            let min_a = active[&pair.0].1;
            let min_b = active[&pair.1].1;
            let tie_key = if min_a < min_b {
                (min_a, min_b)
            } else {
                (min_b, min_a)
            };
            let better = match &best {
                None => true,
                Some((_, best_distance, best_key)) => {
                    *distance < *best_distance
                        || (*distance == *best_distance && tie_key < *best_key)
                }
            };
            if better {
                best = Some((*pair, *distance, tie_key));
            }
        }

        let ((a, b), height, _) = best.expect("Distance matrix unexpectedly exhausted");
        let (size_a, min_a) = active[&a];
        let (size_b, min_b) = active[&b];
        let new_id = n + step;

        // Lance-Williams update against every other active cluster
        let mut new_distances: Vec<((usize, usize), f32)> = vec![];
        for k in active.keys() {
            if *k == a || *k == b {
                continue;
            }
            let d_ak = distances[&sorted(a, *k)];
            let d_bk = distances[&sorted(b, *k)];
            let updated = match linkage {
                Linkage::Single => d_ak.min(d_bk),
                Linkage::Complete => d_ak.max(d_bk),
                Linkage::Average => {
                    (size_a as f32 * d_ak + size_b as f32 * d_bk) / (size_a + size_b) as f32
                }
                Linkage::Weighted => (d_ak + d_bk) / 2.0,
            };
            new_distances.push((sorted(*k, new_id), updated));
        }

        distances.retain(|(x, y), _| *x != a && *x != b && *y != a && *y != b);
        distances.extend(new_distances);
        active.remove(&a);
        active.remove(&b);
        active.insert(new_id, (size_a + size_b, min_a.min(min_b)));

        merges.push(Merge {
            left: a,
            right: b,
            height,
            id: new_id,
        });
    }

    merges
}

fn sorted(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}
