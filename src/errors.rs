use crate::distance_store::DistanceMethod;

use thiserror::Error;

/// Errors raised at the distance store boundary.
#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("invalid {method} value {value} for genome pair {a}/{b}: must be a finite distance within [0, 1]")]
    InvalidValue {
        a: usize,
        b: usize,
        method: DistanceMethod,
        value: f32,
    },
    #[error("conflicting {method} values for genome pair {a}/{b}: {existing} already stored, refusing to overwrite with {attempted}")]
    ConflictingValue {
        a: usize,
        b: usize,
        method: DistanceMethod,
        existing: f32,
        attempted: f32,
    },
}

/// Errors raised by the hierarchical clustering engine and the orchestrator.
#[derive(Error, Debug, PartialEq)]
pub enum ClusterError {
    #[error("incomplete {method} distance matrix: {} required pair(s) have no stored value{}", missing.len(), first_missing(missing))]
    IncompleteMatrix {
        method: DistanceMethod,
        missing: Vec<(usize, usize)>,
    },
    #[error("non-monotonic dendrogram: merge step {step} at height {height} is below the previous merge height {previous}")]
    NonMonotonic {
        step: usize,
        height: f32,
        previous: f32,
    },
    #[error("invalid clustering threshold {threshold}: must be a distance within (0, 1]")]
    InvalidThreshold { threshold: f32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn first_missing(missing: &[(usize, usize)]) -> String {
    match missing.first() {
        Some((a, b)) => format!(", first missing pair is {}/{}", a, b),
        None => String::new(),
    }
}

/// Per-pair failure of the fine (alignment-based) similarity collaborator.
#[derive(Error, Debug, PartialEq)]
pub enum FineDistanceError {
    #[error("alignment failed between {query} and {reference}: {message}")]
    AlignmentFailed {
        query: String,
        reference: String,
        message: String,
    },
}

/// Errors raised when scoring a single genome.
#[derive(Error, Debug, PartialEq)]
pub enum ScoreError {
    #[error("missing {attribute} for genome {genome}: required because its scoring weight is non-zero")]
    MissingQualityData {
        genome: String,
        attribute: &'static str,
    },
}

/// Errors raised by the cluster adjustment engine.
#[derive(Error, Debug, PartialEq)]
pub enum AdjustError {
    #[error("unknown cluster id '{0}'")]
    UnknownClusterId(String),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    FineDistance(#[from] FineDistanceError),
}

/// Errors raised when reading or writing work directory tables.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("malformed {table} table: {message}")]
    MalformedTable { table: String, message: String },
}
