pub mod adjust;
pub mod cluster_argument_parsing;
pub mod clusterer;
pub mod distance_store;
pub mod errors;
pub mod external_command_checker;
pub mod fastani;
pub mod finch;
pub mod genome;
pub mod genome_info_file;
pub mod genome_stats;
pub mod hierarchy;
pub mod scoring;
pub mod work_directory;

#[macro_use]
extern crate log;
extern crate clap;
extern crate rayon;
#[macro_use]
extern crate lazy_static;

use crate::distance_store::DistanceMethod;
use crate::errors::FineDistanceError;

/// A fine-pass ANI estimate for one genome pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AniEstimate {
    /// Fraction, not percentage
    pub ani: f32,
    /// Fraction of fragments aligned, supporting the estimate
    pub aligned_fraction: f32,
}

/// The cheap similarity collaborator used for the primary pass, e.g. MinHash
/// sketch comparison. Handed the demand list of pairs lacking stored values;
/// may return partial results (clustering then fails fast on the holes).
pub trait CoarseDistanceFinder {
    fn method_name(&self) -> &str;

    /// Distances (1 - ANI) for the requested pairs of indices into
    /// `genome_fasta_paths`.
    fn distances(
        &self,
        genome_fasta_paths: &[&str],
        pairs: &[(usize, usize)],
    ) -> Vec<((usize, usize), f32)>;
}

/// The expensive alignment-based similarity collaborator used for the
/// secondary pass, e.g. fastANI. Called once per demanded pair; pairs are
/// independent so calls may run in parallel.
pub trait FineDistanceFinder {
    fn method_name(&self) -> &str;

    /// Which store method this finder's values belong to.
    fn method(&self) -> DistanceMethod;

    /// Ok(None) means the aligner found the pair too divergent to estimate
    /// ANI at all; the orchestrator records those as maximal distance.
    fn calculate(
        &self,
        fasta1: &str,
        fasta2: &str,
    ) -> Result<Option<AniEstimate>, FineDistanceError>;
}

pub const DEFAULT_ANI: &str = "99";
pub const DEFAULT_PRETHRESHOLD_ANI: &str = "90";
pub const DEFAULT_LINKAGE: &str = "average";
pub const DEFAULT_QUALITY_FORMULA: &str = "drep";

pub const AUTHOR: &str =
    "Ben J. Woodcroft, Centre for Microbiome Research, Queensland University of Technology";
