use checkm;

/// One genome in the input set. Created once at ingestion and immutable
/// afterwards; the index of a genome in the run's metadata slice is its
/// identifier throughout the pipeline. Quality values come from the external
/// CheckM-style collaborator, assembly values from the FASTA itself.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomeMetadata {
    pub name: String,
    pub quality: Option<checkm::GenomeQuality>,
    pub n50: Option<u64>,
    pub genome_size: Option<u64>,
}

impl GenomeMetadata {
    pub fn new(name: &str) -> GenomeMetadata {
        GenomeMetadata {
            name: name.to_string(),
            quality: None,
            n50: None,
            genome_size: None,
        }
    }
}
