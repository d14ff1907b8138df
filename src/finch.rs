use crate::CoarseDistanceFinder;

/// Coarse pass distances from finch MinHash sketches. Sketches every genome
/// once, then compares only the requested pairs. Pairs whose comparison fails
/// are skipped with a warning; holes are caught downstream when the
/// clustering engine demands a complete matrix.
pub struct FinchCoarseFinder {
    pub num_kmers: usize,
    pub kmer_length: u8,
}

impl Default for FinchCoarseFinder {
    fn default() -> FinchCoarseFinder {
        FinchCoarseFinder {
            num_kmers: 1000,
            kmer_length: 21,
        }
    }
}

impl CoarseDistanceFinder for FinchCoarseFinder {
    fn method_name(&self) -> &str {
        "finch"
    }

    fn distances(
        &self,
        genome_fasta_paths: &[&str],
        pairs: &[(usize, usize)],
    ) -> Vec<((usize, usize), f32)> {
        let sketch_params = finch::sketch_schemes::SketchParams::Mash {
            kmers_to_sketch: self.num_kmers,
            final_size: self.num_kmers,
            no_strict: true, // Possibly not right.
            kmer_length: self.kmer_length,
            hash_seed: 0,
        };
        let filters = finch::filtering::FilterParams {
            filter_on: Some(false),
            abun_filter: (None, None),
            err_filter: 0.,
            strand_filter: 0.,
        };
        info!("Sketching MinHash representations of each genome with finch ..");
        let sketches = finch::sketch_files(genome_fasta_paths, &sketch_params, &filters)
            .expect("Failed to sketch genomes with finch");
        info!("Finished sketching genomes");

        let mut to_return = Vec::with_capacity(pairs.len());
        for (i, j) in pairs {
            match finch::distance::distance(&sketches[*i], &sketches[*j], false) {
                Ok(finch_distance) => {
                    let distance = finch_distance.mash_distance.clamp(0., 1.) as f32;
                    debug!(
                        "Comparing {} and {}, distance {}",
                        genome_fasta_paths[*i], genome_fasta_paths[*j], distance
                    );
                    to_return.push(((*i, *j), distance));
                }
                Err(e) => {
                    warn!(
                        "Failed to compare finch sketches of {} and {}: {}",
                        genome_fasta_paths[*i], genome_fasta_paths[*j], e
                    );
                }
            }
        }
        to_return
    }
}
