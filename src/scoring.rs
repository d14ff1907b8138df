use std::collections::BTreeMap;

use crate::clusterer::ClusteringResult;
use crate::errors::ScoreError;
use crate::genome::GenomeMetadata;

/// Weights of the composite genome quality score:
/// comp*completeness - con*contamination + n50*log10(N50) + size*log10(size)
/// - strain*strain_heterogeneity, with completeness, contamination and
/// strain heterogeneity as percentages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub completeness: f32,
    pub contamination: f32,
    pub n50: f32,
    pub genome_size: f32,
    pub strain_heterogeneity: f32,
}

impl Default for ScoreWeights {
    fn default() -> ScoreWeights {
        *QUALITY_FORMULAS
            .get(crate::DEFAULT_QUALITY_FORMULA)
            .expect("Programming error: default quality formula is not in the formula table")
    }
}

lazy_static! {
    /// Named weight presets selectable on the command line.
    pub static ref QUALITY_FORMULAS: BTreeMap<&'static str, ScoreWeights> = {
        let mut formulas = BTreeMap::new();
        formulas.insert(
            "drep",
            ScoreWeights {
                completeness: 1.0,
                contamination: 5.0,
                n50: 0.5,
                genome_size: 0.0,
                strain_heterogeneity: 1.0,
            },
        );
        formulas.insert(
            "completeness-4contamination",
            ScoreWeights {
                completeness: 1.0,
                contamination: 4.0,
                n50: 0.0,
                genome_size: 0.0,
                strain_heterogeneity: 0.0,
            },
        );
        formulas
    };
}

/// Composite score for one genome. Pure: depends only on the genome's
/// attributes and the weights. Attributes whose weight is zero may be
/// absent; any needed attribute that is missing fails the genome's score.
pub fn score_genome(genome: &GenomeMetadata, weights: &ScoreWeights) -> Result<f64, ScoreError> {
    let mut score = 0f64;

    if weights.completeness != 0.0 || weights.contamination != 0.0 || weights.strain_heterogeneity != 0.0 {
        let quality = genome.quality.as_ref().ok_or(ScoreError::MissingQualityData {
            genome: genome.name.clone(),
            attribute: "completeness/contamination",
        })?;
        score += weights.completeness as f64 * quality.completeness as f64 * 100.;
        score -= weights.contamination as f64 * quality.contamination as f64 * 100.;
        score -= weights.strain_heterogeneity as f64 * quality.strain_heterogeneity as f64 * 100.;
    }
    if weights.n50 != 0.0 {
        let n50 = genome.n50.ok_or(ScoreError::MissingQualityData {
            genome: genome.name.clone(),
            attribute: "N50",
        })?;
        score += weights.n50 as f64 * (n50 as f64).log10();
    }
    if weights.genome_size != 0.0 {
        let genome_size = genome.genome_size.ok_or(ScoreError::MissingQualityData {
            genome: genome.name.clone(),
            attribute: "genome size",
        })?;
        score += weights.genome_size as f64 * (genome_size as f64).log10();
    }

    Ok(score)
}

/// The winner of one secondary cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Representative {
    pub genome_index: usize,
    pub score: f64,
}

/// Choose the maximum-scoring genome of every secondary cluster. A pure
/// projection of the assignment, metadata and weights: identical inputs
/// yield identical output. Genomes that cannot be scored are excluded with a
/// warning; a cluster whose members all fail scoring gets no representative,
/// leaving a partial representative set.
///
/// Ties on score go to the lexicographically smallest genome name.
pub fn select_all(
    result: &ClusteringResult,
    genomes: &[GenomeMetadata],
    weights: &ScoreWeights,
) -> (BTreeMap<(usize, usize), Representative>, Vec<String>) {
    let mut representatives: BTreeMap<(usize, usize), Representative> = BTreeMap::new();
    let mut warnings: Vec<String> = vec![];

    for cluster_id in result.secondary_ids() {
        let mut members = result.members_of_secondary(cluster_id.0, cluster_id.1);
        // Name order makes the strict > comparison below resolve score ties
        // towards the lexicographically smallest name
        members.sort_by(|a, b| genomes[*a].name.cmp(&genomes[*b].name));

        let mut best: Option<Representative> = None;
        for genome_index in members {
            match score_genome(&genomes[genome_index], weights) {
                Ok(score) => {
                    let better = match &best {
                        None => true,
                        Some(current) => score > current.score,
                    };
                    if better {
                        best = Some(Representative {
                            genome_index,
                            score,
                        });
                    }
                }
                Err(e) => {
                    warn!("Excluding genome from selection: {}", e);
                    warnings.push(e.to_string());
                }
            }
        }

        match best {
            Some(representative) => {
                debug!(
                    "Representative of cluster {}_{} is {} with score {}",
                    cluster_id.0,
                    cluster_id.1,
                    genomes[representative.genome_index].name,
                    representative.score
                );
                representatives.insert(cluster_id, representative);
            }
            None => {
                warnings.push(format!(
                    "No representative could be chosen for cluster {}_{}: no member genome could be scored",
                    cluster_id.0, cluster_id.1
                ));
            }
        }
    }

    (representatives, warnings)
}

/// One row of the read-only result handed to downstream reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomeReportRow {
    pub genome: String,
    pub primary_id: usize,
    pub secondary_id: usize,
    pub score: Option<f64>,
    pub is_representative: bool,
}

/// Project the full clustering + selection state into report rows, one per
/// assigned genome, ordered by (primary, secondary, genome name).
pub fn report(
    result: &ClusteringResult,
    genomes: &[GenomeMetadata],
    weights: &ScoreWeights,
) -> (Vec<GenomeReportRow>, Vec<String>) {
    let (representatives, warnings) = select_all(result, genomes, weights);

    let mut rows: Vec<GenomeReportRow> = result
        .assignments
        .iter()
        .map(|(genome_index, (primary_id, secondary_id))| GenomeReportRow {
            genome: genomes[*genome_index].name.clone(),
            primary_id: *primary_id,
            secondary_id: *secondary_id,
            score: score_genome(&genomes[*genome_index], weights).ok(),
            is_representative: representatives
                .get(&(*primary_id, *secondary_id))
                .map(|r| r.genome_index == *genome_index)
                .unwrap_or(false),
        })
        .collect();
    rows.sort_by(|a, b| {
        (a.primary_id, a.secondary_id, &a.genome).cmp(&(b.primary_id, b.secondary_id, &b.genome))
    });
    (rows, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusterer::ClusteringResult;
    use checkm::GenomeQuality;
    use std::collections::BTreeMap;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn genome(name: &str, completeness: f32, contamination: f32, n50: u64) -> GenomeMetadata {
        GenomeMetadata {
            name: name.to_string(),
            quality: Some(GenomeQuality {
                completeness,
                contamination,
                strain_heterogeneity: 0.,
            }),
            n50: Some(n50),
            genome_size: Some(2_000_000),
        }
    }

    fn result_with(assignments: &[(usize, (usize, usize))], names: &[&str]) -> ClusteringResult {
        ClusteringResult {
            genome_names: names.iter().map(|n| n.to_string()).collect(),
            assignments: assignments.iter().copied().collect(),
            primary_dendrogram: None,
            secondary_dendrograms: BTreeMap::new(),
            degraded: vec![],
        }
    }

    #[test]
    fn test_score_formula() {
        init();
        let g = genome("a.fna", 0.95, 0.02, 100_000);
        let score = score_genome(&g, &ScoreWeights::default()).unwrap();
        // 95 - 5*2 + 0.5*log10(100000) = 95 - 10 + 2.5
        assert!((score - 87.5).abs() < 1e-6);
    }

    #[test]
    fn test_missing_quality_fails_only_when_weighted() {
        init();
        let mut g = genome("a.fna", 0.95, 0.02, 100_000);
        g.quality = None;
        assert!(score_genome(&g, &ScoreWeights::default()).is_err());

        let n50_only = ScoreWeights {
            completeness: 0.,
            contamination: 0.,
            n50: 1.,
            genome_size: 0.,
            strain_heterogeneity: 0.,
        };
        let score = score_genome(&g, &n50_only).unwrap();
        assert!((score - 5.0).abs() < 1e-6);

        g.n50 = None;
        assert_eq!(
            ScoreError::MissingQualityData {
                genome: "a.fna".to_string(),
                attribute: "N50",
            },
            score_genome(&g, &n50_only).unwrap_err()
        );
    }

    #[test]
    fn test_select_all_picks_max_and_reports() {
        init();
        let genomes = vec![
            genome("A.fna", 0.90, 0.0, 10_000),
            genome("B.fna", 0.85, 0.0, 10_000),
            genome("C.fna", 0.50, 0.0, 10_000),
        ];
        let result = result_with(&[(0, (1, 1)), (1, (1, 1)), (2, (2, 1))], &["A.fna", "B.fna", "C.fna"]);
        let (reps, warnings) = select_all(&result, &genomes, &ScoreWeights::default());
        assert!(warnings.is_empty());
        assert_eq!(0, reps[&(1, 1)].genome_index);
        assert_eq!(2, reps[&(2, 1)].genome_index);

        let (rows, _) = report(&result, &genomes, &ScoreWeights::default());
        assert_eq!(3, rows.len());
        assert!(rows[0].is_representative);
        assert!(!rows[1].is_representative);
        assert!(rows[2].is_representative);
    }

    #[test]
    fn test_select_all_tie_breaks_lexicographically() {
        init();
        let genomes = vec![
            genome("b.fna", 0.90, 0.0, 10_000),
            genome("a.fna", 0.90, 0.0, 10_000),
        ];
        let result = result_with(&[(0, (1, 1)), (1, (1, 1))], &["b.fna", "a.fna"]);
        let (reps, _) = select_all(&result, &genomes, &ScoreWeights::default());
        assert_eq!(1, reps[&(1, 1)].genome_index);
    }

    #[test]
    fn test_select_all_is_deterministic() {
        init();
        let genomes = vec![
            genome("A.fna", 0.90, 0.01, 50_000),
            genome("B.fna", 0.85, 0.0, 80_000),
            genome("C.fna", 0.70, 0.1, 10_000),
        ];
        let result = result_with(&[(0, (1, 1)), (1, (1, 1)), (2, (1, 2))], &["A.fna", "B.fna", "C.fna"]);
        let first = select_all(&result, &genomes, &ScoreWeights::default());
        let second = select_all(&result, &genomes, &ScoreWeights::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_unscorable_genome_excluded_with_warning() {
        init();
        let mut genomes = vec![
            genome("A.fna", 0.90, 0.0, 10_000),
            genome("B.fna", 0.85, 0.0, 10_000),
        ];
        genomes[0].quality = None;
        let result = result_with(&[(0, (1, 1)), (1, (1, 1))], &["A.fna", "B.fna"]);
        let (reps, warnings) = select_all(&result, &genomes, &ScoreWeights::default());
        assert_eq!(1, reps[&(1, 1)].genome_index);
        assert_eq!(1, warnings.len());

        // All members unscorable: partial representative set
        genomes[1].quality = None;
        let (reps, warnings) = select_all(&result, &genomes, &ScoreWeights::default());
        assert!(reps.is_empty());
        assert_eq!(3, warnings.len());
    }
}
