use std;
use std::collections::BTreeMap;

use crate::errors::StoreError;

/// Closed set of similarity methods whose values may be stored. `Sketch` is
/// the cheap pre-clustering metric, the ANI variants are the expensive
/// alignment-based metrics used for secondary clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DistanceMethod {
    Sketch,
    AniNormal,
    AniTight,
}

impl DistanceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMethod::Sketch => "sketch",
            DistanceMethod::AniNormal => "ani_normal",
            DistanceMethod::AniTight => "ani_tight",
        }
    }
}

impl std::fmt::Display for DistanceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DistanceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<DistanceMethod, String> {
        match s {
            "sketch" => Ok(DistanceMethod::Sketch),
            "ani_normal" => Ok(DistanceMethod::AniNormal),
            "ani_tight" => Ok(DistanceMethod::AniTight),
            _ => Err(format!("Unknown distance method '{}'", s)),
        }
    }
}

/// Sparse symmetric matrix of pairwise distances, keyed by unordered genome
/// index pair and method. Like a BTreeMap except the pair keys are sorted
/// before insertion / get etc. Values are distances (1 - ANI) within [0, 1].
/// The store never computes values itself; collaborators fill it via `put`.
#[derive(Debug, Default, PartialEq)]
pub struct DistanceStore {
    internal: BTreeMap<DistanceMethod, BTreeMap<(usize, usize), f32>>,
}

fn sorted_pair(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

impl DistanceStore {
    pub fn new() -> DistanceStore {
        DistanceStore {
            internal: BTreeMap::new(),
        }
    }

    /// Store one pair's distance. Conflicting re-writes are rejected so that
    /// repeated computation cannot silently change clustering inputs;
    /// re-putting the identical value is a no-op.
    pub fn put(
        &mut self,
        a: usize,
        b: usize,
        method: DistanceMethod,
        value: f32,
    ) -> Result<(), StoreError> {
        if a == b || !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(StoreError::InvalidValue {
                a,
                b,
                method,
                value,
            });
        }
        let key = sorted_pair(a, b);
        let entries = self.internal.entry(method).or_default();
        if let Some(existing) = entries.get(&key) {
            if *existing != value {
                return Err(StoreError::ConflictingValue {
                    a: key.0,
                    b: key.1,
                    method,
                    existing: *existing,
                    attempted: value,
                });
            }
            trace!("Ignoring repeated identical {} value for {:?}", method, key);
            return Ok(());
        }
        entries.insert(key, value);
        Ok(())
    }

    pub fn get(&self, a: usize, b: usize, method: DistanceMethod) -> Option<f32> {
        self.internal
            .get(&method)
            .and_then(|entries| entries.get(&sorted_pair(a, b)))
            .copied()
    }

    pub fn contains(&self, a: usize, b: usize, method: DistanceMethod) -> bool {
        self.get(a, b, method).is_some()
    }

    /// The demand list: unordered pairs within the given genome subset which
    /// have no stored value under the method, in ascending pair order. This
    /// is what gets handed to the external similarity collaborators.
    pub fn pairs_needed(&self, genome_indices: &[usize], method: DistanceMethod) -> Vec<(usize, usize)> {
        let mut sorted_indices = genome_indices.to_vec();
        sorted_indices.sort_unstable();
        sorted_indices.dedup();

        let mut needed = vec![];
        for (i, a) in sorted_indices.iter().enumerate() {
            for b in sorted_indices[(i + 1)..].iter() {
                if !self.contains(*a, *b, method) {
                    needed.push((*a, *b));
                }
            }
        }
        needed
    }

    /// Drop every entry involving the genome, under all methods. Used by the
    /// adjustment engine when genomes are removed; requires `&mut self` so
    /// deletions cannot overlap in-flight clustering reads.
    pub fn remove_genome(&mut self, genome_index: usize) {
        for entries in self.internal.values_mut() {
            entries.retain(|(a, b), _| *a != genome_index && *b != genome_index);
        }
    }

    /// All stored entries, for persistence.
    pub fn entries(&self) -> Vec<(DistanceMethod, (usize, usize), f32)> {
        self.internal
            .iter()
            .flat_map(|(method, entries)| {
                entries.iter().map(move |(pair, value)| (*method, *pair, *value))
            })
            .collect()
    }

    pub fn len(&self, method: DistanceMethod) -> usize {
        self.internal.get(&method).map(|e| e.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_put_get_symmetric() {
        init();
        let mut store = DistanceStore::new();
        store.put(3, 1, DistanceMethod::Sketch, 0.25).unwrap();
        assert_eq!(Some(0.25), store.get(1, 3, DistanceMethod::Sketch));
        assert_eq!(Some(0.25), store.get(3, 1, DistanceMethod::Sketch));
        assert_eq!(None, store.get(1, 3, DistanceMethod::AniNormal));
    }

    #[test]
    fn test_put_rejects_invalid_values() {
        init();
        let mut store = DistanceStore::new();
        assert!(store.put(0, 1, DistanceMethod::Sketch, 1.5).is_err());
        assert!(store.put(0, 1, DistanceMethod::Sketch, -0.1).is_err());
        assert!(store.put(0, 1, DistanceMethod::Sketch, f32::NAN).is_err());
        assert!(store.put(2, 2, DistanceMethod::Sketch, 0.5).is_err());
        assert_eq!(0, store.len(DistanceMethod::Sketch));
    }

    #[test]
    fn test_put_rejects_conflicting_values() {
        init();
        let mut store = DistanceStore::new();
        store.put(0, 1, DistanceMethod::AniNormal, 0.01).unwrap();
        // Identical re-put is a no-op
        store.put(1, 0, DistanceMethod::AniNormal, 0.01).unwrap();
        let err = store.put(0, 1, DistanceMethod::AniNormal, 0.02).unwrap_err();
        assert_eq!(
            StoreError::ConflictingValue {
                a: 0,
                b: 1,
                method: DistanceMethod::AniNormal,
                existing: 0.01,
                attempted: 0.02,
            },
            err
        );
        assert_eq!(Some(0.01), store.get(0, 1, DistanceMethod::AniNormal));
    }

    #[test]
    fn test_pairs_needed() {
        init();
        let mut store = DistanceStore::new();
        store.put(0, 2, DistanceMethod::Sketch, 0.1).unwrap();
        let needed = store.pairs_needed(&[2, 0, 3], DistanceMethod::Sketch);
        assert_eq!(vec![(0, 3), (2, 3)], needed);
        // Demand lists are method specific
        assert_eq!(
            vec![(0, 2), (0, 3), (2, 3)],
            store.pairs_needed(&[2, 0, 3], DistanceMethod::AniNormal)
        );
        assert!(store.pairs_needed(&[1], DistanceMethod::Sketch).is_empty());
    }

    #[test]
    fn test_remove_genome() {
        init();
        let mut store = DistanceStore::new();
        store.put(0, 1, DistanceMethod::Sketch, 0.1).unwrap();
        store.put(0, 2, DistanceMethod::Sketch, 0.2).unwrap();
        store.put(1, 2, DistanceMethod::AniNormal, 0.3).unwrap();
        store.remove_genome(1);
        assert_eq!(None, store.get(0, 1, DistanceMethod::Sketch));
        assert_eq!(Some(0.2), store.get(0, 2, DistanceMethod::Sketch));
        assert_eq!(None, store.get(1, 2, DistanceMethod::AniNormal));
    }
}
