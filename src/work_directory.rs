use std;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::clusterer::{ClusteringResult, DegradedCluster};
use crate::distance_store::{DistanceMethod, DistanceStore};
use crate::errors::PersistError;
use crate::genome::GenomeMetadata;
use crate::hierarchy::{Dendrogram, Merge};
use crate::scoring::GenomeReportRow;

/// On-disk state of a dereplication run, as tab separated tables: genome
/// metadata, the distance store, cluster assignments, dendrograms (the
/// secondary ones in one file per primary cluster, so the adjustment engine
/// can rewrite a single cluster's data), degraded clusters and the
/// representative report.
pub struct WorkDirectory {
    path: PathBuf,
}

const GENOMES_TABLE: &str = "genomes.tsv";
const DISTANCES_TABLE: &str = "distances.tsv";
const ASSIGNMENTS_TABLE: &str = "assignments.tsv";
const DEGRADED_TABLE: &str = "degraded_clusters.tsv";
const PRIMARY_DENDROGRAM_TABLE: &str = "dendrogram_primary.tsv";
const SECONDARY_DENDROGRAM_PREFIX: &str = "dendrogram_secondary_";
const REPRESENTATIVES_TABLE: &str = "representatives.tsv";

impl WorkDirectory {
    /// Create the directory if needed and hand back a handle.
    pub fn establish(path: &Path) -> Result<WorkDirectory, PersistError> {
        std::fs::create_dir_all(path)?;
        Ok(WorkDirectory {
            path: path.to_path_buf(),
        })
    }

    /// Open an existing work directory.
    pub fn open(path: &Path) -> Result<WorkDirectory, PersistError> {
        if !path.is_dir() {
            return Err(PersistError::MalformedTable {
                table: path.to_string_lossy().to_string(),
                message: "work directory does not exist".to_string(),
            });
        }
        Ok(WorkDirectory {
            path: path.to_path_buf(),
        })
    }

    pub fn save(
        &self,
        genomes: &[GenomeMetadata],
        store: &DistanceStore,
        result: &ClusteringResult,
    ) -> Result<(), PersistError> {
        self.write_genomes(genomes)?;
        self.write_distances(store, genomes)?;
        self.write_assignments(result, genomes)?;
        self.write_degraded(&result.degraded)?;

        match &result.primary_dendrogram {
            Some(dendrogram) => {
                write_dendrogram(&self.path.join(PRIMARY_DENDROGRAM_TABLE), genomes, dendrogram)?
            }
            None => remove_if_present(&self.path.join(PRIMARY_DENDROGRAM_TABLE))?,
        }

        // Rewrite per-cluster secondary dendrograms, dropping stale ones
        for stale in self.secondary_dendrogram_files()? {
            if !result
                .secondary_dendrograms
                .contains_key(&stale.1)
            {
                remove_if_present(&stale.0)?;
            }
        }
        for (primary_id, dendrogram) in &result.secondary_dendrograms {
            write_dendrogram(
                &self.secondary_dendrogram_path(*primary_id),
                genomes,
                dendrogram,
            )?;
        }
        info!("Saved clustering state to {:?}", self.path);
        Ok(())
    }

    pub fn load(
        &self,
    ) -> Result<(Vec<GenomeMetadata>, DistanceStore, ClusteringResult), PersistError> {
        let genomes = self.read_genomes()?;
        let indices: BTreeMap<String, usize> = genomes
            .iter()
            .enumerate()
            .map(|(i, g)| (g.name.clone(), i))
            .collect();

        let store = self.read_distances(&indices)?;
        let assignments = self.read_assignments(&indices)?;
        let degraded = self.read_degraded()?;

        let primary_path = self.path.join(PRIMARY_DENDROGRAM_TABLE);
        let primary_dendrogram = if primary_path.is_file() {
            Some(read_dendrogram(&primary_path, &indices)?)
        } else {
            None
        };
        let mut secondary_dendrograms = BTreeMap::new();
        for (path, primary_id) in self.secondary_dendrogram_files()? {
            secondary_dendrograms.insert(primary_id, read_dendrogram(&path, &indices)?);
        }

        Ok((
            genomes.clone(),
            store,
            ClusteringResult {
                genome_names: genomes.into_iter().map(|g| g.name).collect(),
                assignments,
                primary_dendrogram,
                secondary_dendrograms,
                degraded,
            },
        ))
    }

    pub fn write_representatives(&self, rows: &[GenomeReportRow]) -> Result<(), PersistError> {
        let mut writer = table_writer(&self.path.join(REPRESENTATIVES_TABLE))?;
        writer.write_record(["genome", "primary_cluster", "secondary_cluster", "score", "representative"])?;
        for row in rows {
            writer.write_record(&[
                row.genome.clone(),
                row.primary_id.to_string(),
                row.secondary_id.to_string(),
                row.score.map(|s| s.to_string()).unwrap_or_default(),
                row.is_representative.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_genomes(&self, genomes: &[GenomeMetadata]) -> Result<(), PersistError> {
        let mut writer = table_writer(&self.path.join(GENOMES_TABLE))?;
        writer.write_record([
            "genome",
            "completeness",
            "contamination",
            "strain_heterogeneity",
            "n50",
            "length",
        ])?;
        for genome in genomes {
            writer.write_record(&[
                genome.name.clone(),
                genome
                    .quality
                    .as_ref()
                    .map(|q| q.completeness.to_string())
                    .unwrap_or_default(),
                genome
                    .quality
                    .as_ref()
                    .map(|q| q.contamination.to_string())
                    .unwrap_or_default(),
                genome
                    .quality
                    .as_ref()
                    .map(|q| q.strain_heterogeneity.to_string())
                    .unwrap_or_default(),
                genome.n50.map(|n| n.to_string()).unwrap_or_default(),
                genome
                    .genome_size
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read_genomes(&self) -> Result<Vec<GenomeMetadata>, PersistError> {
        let mut reader = table_reader(&self.path.join(GENOMES_TABLE))?;
        let mut genomes = vec![];
        for record in reader.records() {
            let record = record?;
            if record.len() != 6 {
                return Err(malformed(GENOMES_TABLE, "expected 6 columns"));
            }
            let mut genome = GenomeMetadata::new(&record[0]);
            if !record[1].is_empty() {
                genome.quality = Some(checkm::GenomeQuality {
                    completeness: parse_field(&record[1], GENOMES_TABLE)?,
                    contamination: parse_field(&record[2], GENOMES_TABLE)?,
                    strain_heterogeneity: parse_field(&record[3], GENOMES_TABLE)?,
                });
            }
            if !record[4].is_empty() {
                genome.n50 = Some(parse_field(&record[4], GENOMES_TABLE)?);
            }
            if !record[5].is_empty() {
                genome.genome_size = Some(parse_field(&record[5], GENOMES_TABLE)?);
            }
            genomes.push(genome);
        }
        Ok(genomes)
    }

    fn write_distances(
        &self,
        store: &DistanceStore,
        genomes: &[GenomeMetadata],
    ) -> Result<(), PersistError> {
        let mut writer = table_writer(&self.path.join(DISTANCES_TABLE))?;
        writer.write_record(["method", "genome_a", "genome_b", "distance"])?;
        for (method, (a, b), distance) in store.entries() {
            writer.write_record(&[
                method.to_string(),
                genomes[a].name.clone(),
                genomes[b].name.clone(),
                distance.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read_distances(
        &self,
        indices: &BTreeMap<String, usize>,
    ) -> Result<DistanceStore, PersistError> {
        let mut reader = table_reader(&self.path.join(DISTANCES_TABLE))?;
        let mut store = DistanceStore::new();
        for record in reader.records() {
            let record = record?;
            if record.len() != 4 {
                return Err(malformed(DISTANCES_TABLE, "expected 4 columns"));
            }
            let method: DistanceMethod = record[0]
                .parse()
                .map_err(|e: String| malformed(DISTANCES_TABLE, &e))?;
            let a = lookup(indices, &record[1], DISTANCES_TABLE)?;
            let b = lookup(indices, &record[2], DISTANCES_TABLE)?;
            let distance: f32 = parse_field(&record[3], DISTANCES_TABLE)?;
            store
                .put(a, b, method, distance)
                .map_err(|e| malformed(DISTANCES_TABLE, &e.to_string()))?;
        }
        Ok(store)
    }

    fn write_assignments(
        &self,
        result: &ClusteringResult,
        genomes: &[GenomeMetadata],
    ) -> Result<(), PersistError> {
        let mut writer = table_writer(&self.path.join(ASSIGNMENTS_TABLE))?;
        writer.write_record(["genome", "primary_cluster", "secondary_cluster"])?;
        for (genome, (primary_id, secondary_id)) in &result.assignments {
            writer.write_record(&[
                genomes[*genome].name.clone(),
                primary_id.to_string(),
                secondary_id.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read_assignments(
        &self,
        indices: &BTreeMap<String, usize>,
    ) -> Result<BTreeMap<usize, (usize, usize)>, PersistError> {
        let mut reader = table_reader(&self.path.join(ASSIGNMENTS_TABLE))?;
        let mut assignments = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            if record.len() != 3 {
                return Err(malformed(ASSIGNMENTS_TABLE, "expected 3 columns"));
            }
            let genome = lookup(indices, &record[0], ASSIGNMENTS_TABLE)?;
            let primary_id: usize = parse_field(&record[1], ASSIGNMENTS_TABLE)?;
            let secondary_id: usize = parse_field(&record[2], ASSIGNMENTS_TABLE)?;
            assignments.insert(genome, (primary_id, secondary_id));
        }
        Ok(assignments)
    }

    fn write_degraded(&self, degraded: &[DegradedCluster]) -> Result<(), PersistError> {
        let mut writer = table_writer(&self.path.join(DEGRADED_TABLE))?;
        writer.write_record(["primary_cluster", "reason"])?;
        for cluster in degraded {
            writer.write_record(&[cluster.primary_id.to_string(), cluster.reason.clone()])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read_degraded(&self) -> Result<Vec<DegradedCluster>, PersistError> {
        let path = self.path.join(DEGRADED_TABLE);
        if !path.is_file() {
            return Ok(vec![]);
        }
        let mut reader = table_reader(&path)?;
        let mut degraded = vec![];
        for record in reader.records() {
            let record = record?;
            if record.len() != 2 {
                return Err(malformed(DEGRADED_TABLE, "expected 2 columns"));
            }
            degraded.push(DegradedCluster {
                primary_id: parse_field(&record[0], DEGRADED_TABLE)?,
                reason: record[1].to_string(),
            });
        }
        Ok(degraded)
    }

    fn secondary_dendrogram_path(&self, primary_id: usize) -> PathBuf {
        self.path
            .join(format!("{}{}.tsv", SECONDARY_DENDROGRAM_PREFIX, primary_id))
    }

    fn secondary_dendrogram_files(&self) -> Result<Vec<(PathBuf, usize)>, PersistError> {
        let mut files = vec![];
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(rest) = file_name.strip_prefix(SECONDARY_DENDROGRAM_PREFIX) {
                if let Some(id_str) = rest.strip_suffix(".tsv") {
                    if let Ok(primary_id) = id_str.parse::<usize>() {
                        files.push((entry.path(), primary_id));
                    }
                }
            }
        }
        files.sort_by_key(|(_, id)| *id);
        Ok(files)
    }
}

fn table_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, PersistError> {
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?)
}

fn table_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, PersistError> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .has_headers(true)
        .from_path(path)?)
}

fn remove_if_present(path: &Path) -> Result<(), PersistError> {
    if path.is_file() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

fn malformed(table: &str, message: &str) -> PersistError {
    PersistError::MalformedTable {
        table: table.to_string(),
        message: message.to_string(),
    }
}

fn lookup(
    indices: &BTreeMap<String, usize>,
    name: &str,
    table: &str,
) -> Result<usize, PersistError> {
    indices
        .get(name)
        .copied()
        .ok_or_else(|| malformed(table, &format!("unknown genome '{}'", name)))
}

fn parse_field<T: std::str::FromStr>(field: &str, table: &str) -> Result<T, PersistError> {
    field
        .parse()
        .map_err(|_| malformed(table, &format!("unparseable field '{}'", field)))
}

/// Dendrograms are stored as "leaf" rows (position, genome name) followed by
/// "merge" rows (left, right, height, id).
fn write_dendrogram(
    path: &Path,
    genomes: &[GenomeMetadata],
    dendrogram: &Dendrogram,
) -> Result<(), PersistError> {
    let mut writer = table_writer(path)?;
    writer.write_record(["row_type", "a", "b", "height", "id"])?;
    for (position, genome) in dendrogram.leaves.iter().enumerate() {
        writer.write_record(&[
            "leaf".to_string(),
            position.to_string(),
            genomes[*genome].name.clone(),
        ])?;
    }
    for merge in &dendrogram.merges {
        writer.write_record(&[
            "merge".to_string(),
            merge.left.to_string(),
            merge.right.to_string(),
            merge.height.to_string(),
            merge.id.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn read_dendrogram(
    path: &Path,
    indices: &BTreeMap<String, usize>,
) -> Result<Dendrogram, PersistError> {
    let table = path.to_string_lossy().to_string();
    let mut reader = table_reader(path)?;
    let mut leaf_positions: BTreeMap<usize, usize> = BTreeMap::new();
    let mut merges = vec![];
    for record in reader.records() {
        let record = record?;
        match &record[0] {
            "leaf" => {
                if record.len() != 3 {
                    return Err(malformed(&table, "leaf rows need 3 columns"));
                }
                let position: usize = parse_field(&record[1], &table)?;
                leaf_positions.insert(position, lookup(indices, &record[2], &table)?);
            }
            "merge" => {
                if record.len() != 5 {
                    return Err(malformed(&table, "merge rows need 5 columns"));
                }
                merges.push(Merge {
                    left: parse_field(&record[1], &table)?,
                    right: parse_field(&record[2], &table)?,
                    height: parse_field(&record[3], &table)?,
                    id: parse_field(&record[4], &table)?,
                });
            }
            other => {
                return Err(malformed(&table, &format!("unknown row type '{}'", other)));
            }
        }
    }
    let expected: BTreeSet<usize> = (0..leaf_positions.len()).collect();
    if leaf_positions.keys().copied().collect::<BTreeSet<usize>>() != expected {
        return Err(malformed(&table, "leaf positions are not dense"));
    }
    Ok(Dendrogram {
        leaves: leaf_positions.values().copied().collect(),
        merges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusterer::tests::{MockCoarse, MockFine};
    use crate::clusterer::{TierMode, TierParams, TwoTierClusterer};
    use crate::hierarchy::Linkage;
    use crate::scoring::{report, ScoreWeights};
    use checkm::GenomeQuality;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn run_fixture() -> (Vec<GenomeMetadata>, DistanceStore, ClusteringResult) {
        let coarse = MockCoarse::new(&[(0, 1, 0.95), (0, 2, 0.5), (1, 2, 0.5)]);
        let fine = MockFine::new(&[("A.fna", "B.fna", 0.995)]);
        let clusterer = TwoTierClusterer {
            genome_fasta_paths: vec!["A.fna", "B.fna", "C.fna"],
            mode: TierMode::TwoTier,
            primary: TierParams {
                method: crate::distance_store::DistanceMethod::Sketch,
                linkage: Linkage::Average,
                threshold: 0.1,
            },
            secondary: TierParams {
                method: crate::distance_store::DistanceMethod::AniNormal,
                linkage: Linkage::Average,
                threshold: 0.01,
            },
            coarse: &coarse,
            fine: &fine,
        };
        let mut store = DistanceStore::new();
        let result = clusterer.run(&mut store).unwrap();
        let genomes = ["A.fna", "B.fna", "C.fna"]
            .iter()
            .map(|name| {
                let mut g = GenomeMetadata::new(name);
                g.quality = Some(GenomeQuality {
                    completeness: 0.9,
                    contamination: 0.01,
                    strain_heterogeneity: 0.,
                });
                g.n50 = Some(40_000);
                g.genome_size = Some(2_000_000);
                g
            })
            .collect();
        (genomes, store, result)
    }

    #[test]
    fn test_save_load_round_trip() {
        init();
        let (genomes, store, result) = run_fixture();
        let tmp = tempfile::tempdir().unwrap();
        let work_directory = WorkDirectory::establish(tmp.path()).unwrap();
        work_directory.save(&genomes, &store, &result).unwrap();

        let (loaded_genomes, loaded_store, loaded_result) = work_directory.load().unwrap();
        assert_eq!(genomes, loaded_genomes);
        assert_eq!(store, loaded_store);
        assert_eq!(result, loaded_result);
    }

    #[test]
    fn test_representatives_table() {
        init();
        let (genomes, _store, result) = run_fixture();
        let tmp = tempfile::tempdir().unwrap();
        let work_directory = WorkDirectory::establish(tmp.path()).unwrap();
        let (rows, _) = report(&result, &genomes, &ScoreWeights::default());
        work_directory.write_representatives(&rows).unwrap();
        let written =
            std::fs::read_to_string(tmp.path().join(REPRESENTATIVES_TABLE)).unwrap();
        assert!(written.starts_with("genome\tprimary_cluster\tsecondary_cluster\tscore\trepresentative\n"));
        assert_eq!(4, written.trim_end().lines().count());
    }

    #[test]
    fn test_open_missing_directory_fails() {
        init();
        let tmp = tempfile::tempdir().unwrap();
        assert!(WorkDirectory::open(&tmp.path().join("not_there")).is_err());
    }
}
