use needletail::parse_sequence_path;
use needletail::sequence::Sequence;

#[derive(Debug, PartialEq)]
pub struct GenomeAssemblyStats {
    pub num_contigs: usize,
    pub total_length: usize,
    pub n50: usize,
}

/// Assembly statistics that feed the genome quality score. Panics on
/// unreadable or empty FASTA files since these are user inputs checked at
/// startup.
pub fn calculate_genome_stats(fasta_path: &str) -> GenomeAssemblyStats {
    let mut num_contigs = 0;
    let mut contig_lengths = vec![];
    let mut total_length = 0usize;

    parse_sequence_path(
        fasta_path,
        |_| {},
        |seq| {
            num_contigs += 1;
            let s = seq.sequence();
            contig_lengths.push(s.len());
            total_length += s.len();
        },
    )
    .unwrap_or_else(|_| {
        panic!(
            "Failed to calculate genome statistics for file {}",
            fasta_path
        )
    });

    // Calculate n50
    contig_lengths.sort();
    let n50_cutoff = total_length / 2;
    let mut n50 = None;
    let mut n50_sum = 0usize;
    for length in contig_lengths {
        n50_sum += length;
        if n50_sum >= n50_cutoff {
            n50 = Some(length);
            break;
        }
    }

    GenomeAssemblyStats {
        num_contigs,
        total_length,
        n50: n50.unwrap_or_else(|| panic!("Failed to calculate n50 from {}", fasta_path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn fasta_of_contigs(contigs: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".fna").tempfile().unwrap();
        for (i, contig) in contigs.iter().enumerate() {
            writeln!(file, ">contig_{}", i).unwrap();
            writeln!(file, "{}", contig).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_one_contig_n50() {
        init();
        let file = fasta_of_contigs(&["ATGC".repeat(250)]);
        assert_eq!(
            GenomeAssemblyStats {
                num_contigs: 1,
                total_length: 1000,
                n50: 1000,
            },
            calculate_genome_stats(file.path().to_str().unwrap())
        );
    }

    #[test]
    fn test_multi_contig_n50() {
        init();
        // Lengths 400, 800, 1200: cutoff 1200, cumulative 400, 1200 -> n50 800
        let file = fasta_of_contigs(&[
            "ATGC".repeat(100),
            "ATGC".repeat(200),
            "ATGC".repeat(300),
        ]);
        assert_eq!(
            GenomeAssemblyStats {
                num_contigs: 3,
                total_length: 2400,
                n50: 800,
            },
            calculate_genome_stats(file.path().to_str().unwrap())
        );
    }
}
