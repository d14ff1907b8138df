use std;
use std::collections::BTreeSet;

use crate::clusterer::ClusteringResult;
use crate::distance_store::DistanceStore;
use crate::errors::AdjustError;
use crate::hierarchy::{self, Linkage};
use crate::FineDistanceFinder;

/// Reference to a cluster named on the command line: "3" or "primary_3" for
/// a primary cluster, "3_1" for a secondary cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRef {
    Primary(usize),
    Secondary(usize, usize),
}

impl std::str::FromStr for ClusterRef {
    type Err = String;

    fn from_str(s: &str) -> Result<ClusterRef, String> {
        let stripped = s.strip_prefix("primary_").unwrap_or(s);
        if s.starts_with("primary_") || !stripped.contains('_') {
            return stripped
                .parse::<usize>()
                .map(ClusterRef::Primary)
                .map_err(|_| format!("Malformed cluster id '{}'", s));
        }
        let mut parts = stripped.splitn(2, '_');
        let primary = parts.next().and_then(|p| p.parse::<usize>().ok());
        let secondary = parts.next().and_then(|p| p.parse::<usize>().ok());
        match (primary, secondary) {
            (Some(p), Some(sec)) => Ok(ClusterRef::Secondary(p, sec)),
            _ => Err(format!("Malformed cluster id '{}'", s)),
        }
    }
}

impl std::fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ClusterRef::Primary(p) => write!(f, "{}", p),
            ClusterRef::Secondary(p, s) => write!(f, "{}_{}", p, s),
        }
    }
}

/// Mutates an existing clustering result in place without recomputing
/// unaffected primary clusters. The only writer that deletes distance store
/// entries; it holds both structures mutably so deletions cannot overlap
/// in-flight reads.
pub struct AdjustmentEngine<'a> {
    pub result: &'a mut ClusteringResult,
    pub store: &'a mut DistanceStore,
}

impl<'a> AdjustmentEngine<'a> {
    /// Re-run secondary clustering of one primary cluster under a new
    /// method/linkage/threshold, fetching any distances not already stored.
    /// Only that cluster's secondary assignments and dendrogram are
    /// replaced.
    pub fn recluster<F: FineDistanceFinder + Sync>(
        &mut self,
        primary_id: usize,
        fine: &F,
        linkage: Linkage,
        threshold: f32,
    ) -> Result<(), AdjustError> {
        if !self.result.contains_primary(primary_id) {
            return Err(AdjustError::UnknownClusterId(primary_id.to_string()));
        }
        let members = self.result.members_of_primary(primary_id);
        info!(
            "Re-clustering primary cluster {} ({} genomes) with {} at threshold {} under {} linkage",
            primary_id,
            members.len(),
            fine.method_name(),
            threshold,
            linkage
        );

        for (a, b) in self.store.pairs_needed(&members, fine.method()) {
            let estimate = fine.calculate(
                &self.result.genome_names[a],
                &self.result.genome_names[b],
            )?;
            let distance = match estimate {
                Some(estimate) => (1.0 - estimate.ani).clamp(0.0, 1.0),
                None => 1.0,
            };
            self.store
                .put(a, b, fine.method(), distance)
                .map_err(crate::errors::ClusterError::from)?;
        }

        let (clusters, dendrogram) =
            hierarchy::cluster(self.store, &members, fine.method(), linkage, threshold)?;
        for (secondary_position, cluster) in clusters.iter().enumerate() {
            for genome in cluster {
                self.result
                    .assignments
                    .insert(*genome, (primary_id, secondary_position + 1));
            }
        }
        match dendrogram {
            Some(dendrogram) => {
                self.result.secondary_dendrograms.insert(primary_id, dendrogram);
            }
            None => {
                self.result.secondary_dendrograms.remove(&primary_id);
            }
        }
        // A successful re-cluster supersedes any earlier degradation record
        self.result.degraded.retain(|d| d.primary_id != primary_id);
        Ok(())
    }

    /// Remove clusters. Primary removal cascades: genomes, their distance
    /// store entries under every method, their dendrogram merge nodes, and
    /// their secondary clusters all go. Secondary removal deletes only that
    /// subset, leaving sibling secondary clusters untouched.
    ///
    /// All ids are validated before anything is mutated, so a list
    /// containing an unknown id fails without changing state. Removal is
    /// irreversible within the session.
    pub fn remove_clusters(&mut self, refs: &[ClusterRef]) -> Result<(), AdjustError> {
        for cluster_ref in refs {
            let known = match cluster_ref {
                ClusterRef::Primary(p) => self.result.contains_primary(*p),
                ClusterRef::Secondary(p, s) => self.result.contains_secondary(*p, *s),
            };
            if !known {
                return Err(AdjustError::UnknownClusterId(cluster_ref.to_string()));
            }
        }

        let mut removed_genomes: BTreeSet<usize> = BTreeSet::new();
        for cluster_ref in refs {
            match cluster_ref {
                ClusterRef::Primary(p) => {
                    removed_genomes.extend(self.result.members_of_primary(*p));
                }
                ClusterRef::Secondary(p, s) => {
                    removed_genomes.extend(self.result.members_of_secondary(*p, *s));
                }
            }
        }
        info!(
            "Removing {} genomes across {} cluster id(s)",
            removed_genomes.len(),
            refs.len()
        );

        for genome in &removed_genomes {
            self.result.assignments.remove(genome);
            self.store.remove_genome(*genome);
        }

        if let Some(dendrogram) = self.result.primary_dendrogram.as_mut() {
            dendrogram.remove_leaves(&removed_genomes);
        }
        for cluster_ref in refs {
            match cluster_ref {
                ClusterRef::Primary(p) => {
                    self.result.secondary_dendrograms.remove(p);
                    self.result.degraded.retain(|d| d.primary_id != *p);
                }
                ClusterRef::Secondary(p, _) => {
                    if let Some(dendrogram) = self.result.secondary_dendrograms.get_mut(p) {
                        dendrogram.remove_leaves(&removed_genomes);
                    }
                    // The whole primary cluster may now be empty
                    if !self.result.contains_primary(*p) {
                        self.result.secondary_dendrograms.remove(p);
                        self.result.degraded.retain(|d| d.primary_id != *p);
                    }
                }
            }
        }
        Ok(())
    }
}
