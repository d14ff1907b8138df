use std;
use std::collections::BTreeMap;

use crate::distance_store::{DistanceMethod, DistanceStore};
use crate::errors::ClusterError;
use crate::hierarchy::{self, Dendrogram, Linkage};
use crate::CoarseDistanceFinder;
use crate::FineDistanceFinder;

use concurrent_queue::ConcurrentQueue;
use rayon::prelude::*;

/// Method, linkage rule and cut threshold (a distance, 1 - ANI) for one
/// clustering tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierParams {
    pub method: DistanceMethod,
    pub linkage: Linkage,
    pub threshold: f32,
}

/// The four enumerable combinations of the skip-primary / skip-secondary
/// flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierMode {
    TwoTier,
    PrimaryOnly,
    SecondaryOnly,
    Passthrough,
}

impl TierMode {
    pub fn from_skip_flags(skip_primary: bool, skip_secondary: bool) -> TierMode {
        match (skip_primary, skip_secondary) {
            (false, false) => TierMode::TwoTier,
            (false, true) => TierMode::PrimaryOnly,
            (true, false) => TierMode::SecondaryOnly,
            (true, true) => TierMode::Passthrough,
        }
    }

    pub fn runs_primary(&self) -> bool {
        matches!(self, TierMode::TwoTier | TierMode::PrimaryOnly)
    }

    pub fn runs_secondary(&self) -> bool {
        matches!(self, TierMode::TwoTier | TierMode::SecondaryOnly)
    }
}

/// A primary cluster whose secondary pass failed and fell back to singleton
/// secondary clusters.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradedCluster {
    pub primary_id: usize,
    pub reason: String,
}

/// The combined output of a two-tier run. Primary cluster ids are 1-based
/// and stable across secondary re-clustering; secondary ids are 1-based and
/// unique only within their primary cluster (displayed as "P_S").
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringResult {
    pub genome_names: Vec<String>,
    /// genome index -> (primary id, secondary id). Genomes removed by the
    /// adjustment engine are absent from this map.
    pub assignments: BTreeMap<usize, (usize, usize)>,
    pub primary_dendrogram: Option<Dendrogram>,
    /// One secondary dendrogram per primary cluster of >= 2 genomes
    pub secondary_dendrograms: BTreeMap<usize, Dendrogram>,
    pub degraded: Vec<DegradedCluster>,
}

impl ClusteringResult {
    pub fn primary_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.assignments.values().map(|(p, _)| *p).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn secondary_ids(&self) -> Vec<(usize, usize)> {
        let mut ids: Vec<(usize, usize)> = self.assignments.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn members_of_primary(&self, primary_id: usize) -> Vec<usize> {
        self.assignments
            .iter()
            .filter(|(_, (p, _))| *p == primary_id)
            .map(|(genome, _)| *genome)
            .collect()
    }

    pub fn members_of_secondary(&self, primary_id: usize, secondary_id: usize) -> Vec<usize> {
        self.assignments
            .iter()
            .filter(|(_, (p, s))| *p == primary_id && *s == secondary_id)
            .map(|(genome, _)| *genome)
            .collect()
    }

    pub fn contains_primary(&self, primary_id: usize) -> bool {
        self.assignments.values().any(|(p, _)| *p == primary_id)
    }

    pub fn contains_secondary(&self, primary_id: usize, secondary_id: usize) -> bool {
        self.assignments
            .values()
            .any(|(p, s)| *p == primary_id && *s == secondary_id)
    }
}

/// Two-tier cluster orchestrator: one global primary pass with the cheap
/// metric, then a per-primary-cluster secondary pass with the expensive
/// metric. The distance store is owned by the caller for the run's lifetime;
/// this struct only fills and reads it.
pub struct TwoTierClusterer<'a, P: CoarseDistanceFinder + Sync, F: FineDistanceFinder + Sync> {
    pub genome_fasta_paths: Vec<&'a str>,
    pub mode: TierMode,
    pub primary: TierParams,
    pub secondary: TierParams,
    pub coarse: &'a P,
    pub fine: &'a F,
}

impl<'a, P: CoarseDistanceFinder + Sync, F: FineDistanceFinder + Sync> TwoTierClusterer<'a, P, F> {
    pub fn run(&self, store: &mut DistanceStore) -> Result<ClusteringResult, ClusterError> {
        self.validate_config()?;
        let num_genomes = self.genome_fasta_paths.len();
        let all: Vec<usize> = (0..num_genomes).collect();

        let (primary_clusters, primary_dendrogram) = if self.mode.runs_primary() {
            info!(
                "Primary clustering {} genomes with {} ..",
                num_genomes,
                self.coarse.method_name()
            );
            let needed = store.pairs_needed(&all, self.primary.method);
            if !needed.is_empty() {
                debug!("Requesting {} coarse distances", needed.len());
                for ((a, b), distance) in self.coarse.distances(&self.genome_fasta_paths, &needed)
                {
                    store.put(a, b, self.primary.method, distance)?;
                }
            }
            hierarchy::cluster(
                store,
                &all,
                self.primary.method,
                self.primary.linkage,
                self.primary.threshold,
            )?
        } else {
            info!("Skipping the primary pass; treating all genomes as one primary cluster");
            (vec![all], None)
        };
        info!("Found {} primary clusters", primary_clusters.len());

        let mut assignments: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
        let mut secondary_dendrograms: BTreeMap<usize, Dendrogram> = BTreeMap::new();
        let mut degraded: Vec<DegradedCluster> = vec![];

        if !self.mode.runs_secondary() {
            // Secondary id mirrors the primary grouping
            for (position, members) in primary_clusters.iter().enumerate() {
                for genome in members {
                    assignments.insert(*genome, (position + 1, 1));
                }
            }
        } else {
            let failures =
                self.run_secondary_comparisons(store, &primary_clusters);

            for (position, members) in primary_clusters.iter().enumerate() {
                let primary_id = position + 1;
                let secondary_clusters = match failures.get(&primary_id) {
                    Some(reason) => {
                        warn!(
                            "Secondary pass for primary cluster {} failed ({}); falling back to singleton secondary clusters",
                            primary_id, reason
                        );
                        degraded.push(DegradedCluster {
                            primary_id,
                            reason: reason.clone(),
                        });
                        members.iter().map(|genome| vec![*genome]).collect()
                    }
                    None => {
                        match hierarchy::cluster(
                            store,
                            members,
                            self.secondary.method,
                            self.secondary.linkage,
                            self.secondary.threshold,
                        ) {
                            Ok((clusters, dendrogram)) => {
                                if let Some(dendrogram) = dendrogram {
                                    secondary_dendrograms.insert(primary_id, dendrogram);
                                }
                                clusters
                            }
                            Err(e) => {
                                warn!(
                                    "Secondary clustering of primary cluster {} failed ({}); falling back to singleton secondary clusters",
                                    primary_id, e
                                );
                                degraded.push(DegradedCluster {
                                    primary_id,
                                    reason: e.to_string(),
                                });
                                members.iter().map(|genome| vec![*genome]).collect()
                            }
                        }
                    }
                };
                debug!(
                    "Primary cluster {} split into {} secondary clusters",
                    primary_id,
                    secondary_clusters.len()
                );
                for (secondary_position, cluster) in secondary_clusters.iter().enumerate() {
                    for genome in cluster {
                        assignments.insert(*genome, (primary_id, secondary_position + 1));
                    }
                }
            }
        }

        Ok(ClusteringResult {
            genome_names: self
                .genome_fasta_paths
                .iter()
                .map(|p| p.to_string())
                .collect(),
            assignments,
            primary_dendrogram,
            secondary_dendrograms,
            degraded,
        })
    }

    /// Compute all demanded fine comparisons across all primary clusters in
    /// parallel, funneled through a concurrent queue, and ingest them.
    /// Returns per-primary-cluster failure reasons; failed clusters are not
    /// ingested completely and degrade to singletons at the caller.
    fn run_secondary_comparisons(
        &self,
        store: &mut DistanceStore,
        primary_clusters: &[Vec<usize>],
    ) -> BTreeMap<usize, String> {
        let mut demanded: Vec<(usize, (usize, usize))> = vec![];
        for (position, members) in primary_clusters.iter().enumerate() {
            if members.len() < 2 {
                continue;
            }
            for pair in store.pairs_needed(members, self.secondary.method) {
                demanded.push((position + 1, pair));
            }
        }
        if demanded.is_empty() {
            return BTreeMap::new();
        }
        info!(
            "Requesting {} {} comparisons within primary clusters ..",
            demanded.len(),
            self.fine.method_name()
        );

        let queue = ConcurrentQueue::unbounded();
        demanded.par_iter().for_each(|(primary_id, (a, b))| {
            let result = self
                .fine
                .calculate(self.genome_fasta_paths[*a], self.genome_fasta_paths[*b]);
            queue
                .push((*primary_id, *a, *b, result))
                .expect("Failed to push to queue during secondary pass");
        });

        let mut computed: Vec<(usize, usize, usize, f32)> = vec![];
        let mut failed: Vec<(usize, usize, usize, String)> = vec![];
        while let Ok((primary_id, a, b, result)) = queue.pop() {
            match result {
                Ok(Some(estimate)) => {
                    trace!(
                        "Fine estimate between {} and {}: {:?}",
                        a, b, estimate
                    );
                    let distance = (1.0 - estimate.ani).clamp(0.0, 1.0);
                    computed.push((primary_id, a, b, distance));
                }
                // Too divergent for the aligner: record as maximal distance
                Ok(None) => computed.push((primary_id, a, b, 1.0)),
                Err(e) => failed.push((primary_id, a, b, e.to_string())),
            }
        }

        // Deterministic ingestion order and failure attribution regardless
        // of scheduling: a degraded cluster always reports the error of its
        // smallest failing pair.
        let mut failures: BTreeMap<usize, String> = BTreeMap::new();
        failed.sort_unstable();
        for (primary_id, _, _, reason) in failed {
            failures.entry(primary_id).or_insert(reason);
        }
        computed.sort_unstable_by(|x, y| (x.0, x.1, x.2).cmp(&(y.0, y.1, y.2)));
        for (primary_id, a, b, distance) in computed {
            if failures.contains_key(&primary_id) {
                continue;
            }
            if let Err(e) = store.put(a, b, self.secondary.method, distance) {
                failures.insert(primary_id, e.to_string());
            }
        }
        failures
    }

    fn validate_config(&self) -> Result<(), ClusterError> {
        if self.mode.runs_primary() {
            validate_threshold(self.primary.threshold)?;
        }
        if self.mode.runs_secondary() {
            validate_threshold(self.secondary.threshold)?;
        }
        Ok(())
    }
}

fn validate_threshold(threshold: f32) -> Result<(), ClusterError> {
    if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
        return Err(ClusterError::InvalidThreshold { threshold });
    }
    Ok(())
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::errors::FineDistanceError;
    use crate::AniEstimate;
    use std::sync::Mutex;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    pub struct MockCoarse {
        /// similarity (ANI fraction) per pair; distances returned are 1-ANI
        pub anis: BTreeMap<(usize, usize), f32>,
        pub calls: Mutex<usize>,
    }

    impl MockCoarse {
        pub fn new(anis: &[(usize, usize, f32)]) -> MockCoarse {
            MockCoarse {
                anis: anis.iter().map(|(a, b, ani)| ((*a, *b), *ani)).collect(),
                calls: Mutex::new(0),
            }
        }
    }

    impl CoarseDistanceFinder for MockCoarse {
        fn method_name(&self) -> &str {
            "mock-sketch"
        }

        fn distances(
            &self,
            _genome_fasta_paths: &[&str],
            pairs: &[(usize, usize)],
        ) -> Vec<((usize, usize), f32)> {
            *self.calls.lock().unwrap() += 1;
            pairs
                .iter()
                .filter_map(|pair| self.anis.get(pair).map(|ani| (*pair, 1.0 - ani)))
                .collect()
        }
    }

    pub struct MockFine {
        pub anis: BTreeMap<(String, String), f32>,
        pub failing: Vec<(String, String)>,
        pub calls: Mutex<usize>,
    }

    impl MockFine {
        pub fn new(anis: &[(&str, &str, f32)]) -> MockFine {
            MockFine {
                anis: anis
                    .iter()
                    .map(|(a, b, ani)| ((a.to_string(), b.to_string()), *ani))
                    .collect(),
                failing: vec![],
                calls: Mutex::new(0),
            }
        }
    }

    impl FineDistanceFinder for MockFine {
        fn method_name(&self) -> &str {
            "mock-ani"
        }

        fn method(&self) -> DistanceMethod {
            DistanceMethod::AniNormal
        }

        fn calculate(
            &self,
            fasta1: &str,
            fasta2: &str,
        ) -> Result<Option<AniEstimate>, FineDistanceError> {
            *self.calls.lock().unwrap() += 1;
            let key = if fasta1 < fasta2 {
                (fasta1.to_string(), fasta2.to_string())
            } else {
                (fasta2.to_string(), fasta1.to_string())
            };
            if self.failing.contains(&key) {
                return Err(FineDistanceError::AlignmentFailed {
                    query: key.0,
                    reference: key.1,
                    message: "mock alignment error".to_string(),
                });
            }
            Ok(self.anis.get(&key).map(|ani| AniEstimate {
                ani: *ani,
                aligned_fraction: 0.9,
            }))
        }
    }

    fn tier(method: DistanceMethod, threshold: f32) -> TierParams {
        TierParams {
            method,
            linkage: Linkage::Average,
            threshold,
        }
    }

    #[test]
    fn test_two_tier_scenario() {
        init();
        // Primary distances: A-B 0.05, A-C 0.5, B-C 0.5; threshold 0.1
        let coarse = MockCoarse::new(&[(0, 1, 0.95), (0, 2, 0.5), (1, 2, 0.5)]);
        // Secondary distance A-B 0.005; threshold 0.01
        let fine = MockFine::new(&[("A.fna", "B.fna", 0.995)]);
        let clusterer = TwoTierClusterer {
            genome_fasta_paths: vec!["A.fna", "B.fna", "C.fna"],
            mode: TierMode::TwoTier,
            primary: tier(DistanceMethod::Sketch, 0.1),
            secondary: tier(DistanceMethod::AniNormal, 0.01),
            coarse: &coarse,
            fine: &fine,
        };
        let mut store = DistanceStore::new();
        let result = clusterer.run(&mut store).unwrap();

        assert_eq!(vec![1, 2], result.primary_ids());
        assert_eq!(vec![0, 1], result.members_of_primary(1));
        assert_eq!(vec![2], result.members_of_primary(2));
        assert_eq!(vec![0, 1], result.members_of_secondary(1, 1));
        assert_eq!(vec![2], result.members_of_secondary(2, 1));
        assert!(result.degraded.is_empty());
        // Only the within-cluster pair was aligned
        assert_eq!(1, *fine.calls.lock().unwrap());
        assert_eq!(Some(0.05), store.get(0, 1, DistanceMethod::Sketch));
        assert!((store.get(0, 1, DistanceMethod::AniNormal).unwrap() - 0.005).abs() < 1e-6);
    }

    #[test]
    fn test_singleton_input_makes_no_external_calls() {
        init();
        let coarse = MockCoarse::new(&[]);
        let fine = MockFine::new(&[]);
        let clusterer = TwoTierClusterer {
            genome_fasta_paths: vec!["A.fna"],
            mode: TierMode::TwoTier,
            primary: tier(DistanceMethod::Sketch, 0.1),
            secondary: tier(DistanceMethod::AniNormal, 0.01),
            coarse: &coarse,
            fine: &fine,
        };
        let mut store = DistanceStore::new();
        let result = clusterer.run(&mut store).unwrap();
        assert_eq!(1, result.assignments.len());
        assert_eq!(Some(&(1, 1)), result.assignments.get(&0));
        assert_eq!(0, *coarse.calls.lock().unwrap());
        assert_eq!(0, *fine.calls.lock().unwrap());
    }

    #[test]
    fn test_skip_modes() {
        init();
        let coarse = MockCoarse::new(&[(0, 1, 0.95), (0, 2, 0.5), (1, 2, 0.5)]);
        let fine = MockFine::new(&[
            ("A.fna", "B.fna", 0.995),
            ("A.fna", "C.fna", 0.5),
            ("B.fna", "C.fna", 0.5),
        ]);

        // PrimaryOnly: secondary mirrors primary
        let clusterer = TwoTierClusterer {
            genome_fasta_paths: vec!["A.fna", "B.fna", "C.fna"],
            mode: TierMode::PrimaryOnly,
            primary: tier(DistanceMethod::Sketch, 0.1),
            secondary: tier(DistanceMethod::AniNormal, 0.01),
            coarse: &coarse,
            fine: &fine,
        };
        let mut store = DistanceStore::new();
        let result = clusterer.run(&mut store).unwrap();
        assert_eq!(vec![(1, 1), (2, 1)], result.secondary_ids());
        assert_eq!(0, *fine.calls.lock().unwrap());

        // SecondaryOnly: everything is primary cluster 1, fine metric splits
        let clusterer = TwoTierClusterer {
            mode: TierMode::SecondaryOnly,
            ..clusterer
        };
        let mut store = DistanceStore::new();
        let result = clusterer.run(&mut store).unwrap();
        assert_eq!(vec![1], result.primary_ids());
        assert_eq!(vec![0, 1], result.members_of_secondary(1, 1));
        assert_eq!(vec![2], result.members_of_secondary(1, 2));

        // Passthrough: one cluster holding everything
        let clusterer = TwoTierClusterer {
            mode: TierMode::Passthrough,
            ..clusterer
        };
        let mut store = DistanceStore::new();
        let result = clusterer.run(&mut store).unwrap();
        assert_eq!(vec![(1, 1)], result.secondary_ids());
        assert_eq!(vec![0, 1, 2], result.members_of_secondary(1, 1));
    }

    #[test]
    fn test_alignment_failure_degrades_only_its_cluster() {
        init();
        // Two primary clusters of two genomes each
        let coarse = MockCoarse::new(&[
            (0, 1, 0.95),
            (2, 3, 0.95),
            (0, 2, 0.5),
            (0, 3, 0.5),
            (1, 2, 0.5),
            (1, 3, 0.5),
        ]);
        let mut fine = MockFine::new(&[("C.fna", "D.fna", 0.995)]);
        fine.failing
            .push(("A.fna".to_string(), "B.fna".to_string()));
        let clusterer = TwoTierClusterer {
            genome_fasta_paths: vec!["A.fna", "B.fna", "C.fna", "D.fna"],
            mode: TierMode::TwoTier,
            primary: tier(DistanceMethod::Sketch, 0.1),
            secondary: tier(DistanceMethod::AniNormal, 0.01),
            coarse: &coarse,
            fine: &fine,
        };
        let mut store = DistanceStore::new();
        let result = clusterer.run(&mut store).unwrap();

        // Cluster {A,B} degraded to singletons, cluster {C,D} intact
        assert_eq!(1, result.degraded.len());
        assert_eq!(1, result.degraded[0].primary_id);
        assert_eq!(vec![0], result.members_of_secondary(1, 1));
        assert_eq!(vec![1], result.members_of_secondary(1, 2));
        assert_eq!(vec![2, 3], result.members_of_secondary(2, 1));
    }

    #[test]
    fn test_degraded_reason_names_the_smallest_failing_pair() {
        init();
        // One primary cluster of three genomes, every pairwise alignment
        // failing. The reported reason must belong to the A-B pair no matter
        // which comparison finishes first.
        let coarse = MockCoarse::new(&[(0, 1, 0.95), (0, 2, 0.95), (1, 2, 0.95)]);
        let mut fine = MockFine::new(&[]);
        for (a, b) in [("A.fna", "B.fna"), ("A.fna", "C.fna"), ("B.fna", "C.fna")] {
            fine.failing.push((a.to_string(), b.to_string()));
        }
        let clusterer = TwoTierClusterer {
            genome_fasta_paths: vec!["A.fna", "B.fna", "C.fna"],
            mode: TierMode::TwoTier,
            primary: tier(DistanceMethod::Sketch, 0.1),
            secondary: tier(DistanceMethod::AniNormal, 0.01),
            coarse: &coarse,
            fine: &fine,
        };
        let mut store = DistanceStore::new();
        let result = clusterer.run(&mut store).unwrap();

        assert_eq!(1, result.degraded.len());
        let reason = &result.degraded[0].reason;
        assert!(
            reason.contains("A.fna") && reason.contains("B.fna"),
            "unexpected degraded reason: {}",
            reason
        );
    }

    #[test]
    fn test_too_divergent_pair_is_maximal_distance() {
        init();
        let coarse = MockCoarse::new(&[(0, 1, 0.95)]);
        // No ANI entry for the pair: the mock returns Ok(None)
        let fine = MockFine::new(&[]);
        let clusterer = TwoTierClusterer {
            genome_fasta_paths: vec!["A.fna", "B.fna"],
            mode: TierMode::TwoTier,
            primary: tier(DistanceMethod::Sketch, 0.1),
            secondary: tier(DistanceMethod::AniNormal, 0.01),
            coarse: &coarse,
            fine: &fine,
        };
        let mut store = DistanceStore::new();
        let result = clusterer.run(&mut store).unwrap();
        assert_eq!(Some(1.0), store.get(0, 1, DistanceMethod::AniNormal));
        assert_eq!(vec![(1, 1), (1, 2)], result.secondary_ids());
        assert!(result.degraded.is_empty());
    }

    #[test]
    fn test_incomplete_coarse_results_are_fatal_to_the_primary_pass() {
        init();
        // Coarse collaborator returns nothing for pair (1, 2)
        let coarse = MockCoarse::new(&[(0, 1, 0.95), (0, 2, 0.5)]);
        let fine = MockFine::new(&[]);
        let clusterer = TwoTierClusterer {
            genome_fasta_paths: vec!["A.fna", "B.fna", "C.fna"],
            mode: TierMode::TwoTier,
            primary: tier(DistanceMethod::Sketch, 0.1),
            secondary: tier(DistanceMethod::AniNormal, 0.01),
            coarse: &coarse,
            fine: &fine,
        };
        let mut store = DistanceStore::new();
        let err = clusterer.run(&mut store).unwrap_err();
        assert!(matches!(err, ClusterError::IncompleteMatrix { .. }));
    }

    #[test]
    fn test_invalid_threshold_is_fatal_up_front() {
        init();
        let coarse = MockCoarse::new(&[]);
        let fine = MockFine::new(&[]);
        let clusterer = TwoTierClusterer {
            genome_fasta_paths: vec!["A.fna", "B.fna"],
            mode: TierMode::TwoTier,
            primary: tier(DistanceMethod::Sketch, 1.5),
            secondary: tier(DistanceMethod::AniNormal, 0.01),
            coarse: &coarse,
            fine: &fine,
        };
        let mut store = DistanceStore::new();
        assert_eq!(
            ClusterError::InvalidThreshold { threshold: 1.5 },
            clusterer.run(&mut store).unwrap_err()
        );
        assert_eq!(0, *coarse.calls.lock().unwrap());
    }
}
