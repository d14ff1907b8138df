use std::io::BufReader;

use crate::errors::FineDistanceError;
use crate::distance_store::DistanceMethod;
use crate::{AniEstimate, FineDistanceFinder};

/// The two bundled fastANI parameterisations. Normal is fastANI's default
/// fragmentation; Tight halves the fragment length and demands more of the
/// genome aligned, for dereplication at high identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AniPreset {
    Normal,
    Tight,
}

impl AniPreset {
    pub fn fraglen(&self) -> u32 {
        match self {
            AniPreset::Normal => 3000,
            AniPreset::Tight => 1500,
        }
    }

    /// Minimum fraction of fragments aligned for an estimate to count.
    pub fn min_aligned_fraction(&self) -> f32 {
        match self {
            AniPreset::Normal => 0.5,
            AniPreset::Tight => 0.8,
        }
    }

    pub fn method(&self) -> DistanceMethod {
        match self {
            AniPreset::Normal => DistanceMethod::AniNormal,
            AniPreset::Tight => DistanceMethod::AniTight,
        }
    }
}

/// Alignment-based ANI from the external fastANI binary. Each comparison is
/// run in both directions and the better direction wins, with the aligned
/// fraction judged on fragment counts rather than fastANI's genome-length
/// based minFraction (see https://github.com/wwood/galah/issues/7).
pub struct FastaniFineFinder {
    pub preset: AniPreset,
    pub min_aligned_fraction: f32,
    pub fraglen: u32,
}

impl FastaniFineFinder {
    pub fn from_preset(preset: AniPreset) -> FastaniFineFinder {
        FastaniFineFinder {
            preset,
            min_aligned_fraction: preset.min_aligned_fraction(),
            fraglen: preset.fraglen(),
        }
    }
}

impl FineDistanceFinder for FastaniFineFinder {
    fn method_name(&self) -> &str {
        "FastANI"
    }

    fn method(&self) -> DistanceMethod {
        self.preset.method()
    }

    fn calculate(
        &self,
        fasta1: &str,
        fasta2: &str,
    ) -> Result<Option<AniEstimate>, FineDistanceError> {
        let first = match calculate_fastani_one_way(fasta1, fasta2, self.fraglen)? {
            Some(m) => m,
            None => return Ok(None),
        };
        let second = match calculate_fastani_one_way(fasta2, fasta1, self.fraglen)? {
            Some(m) => m,
            None => return Ok(None),
        };
        Ok(combine_directions(
            &first,
            &second,
            self.min_aligned_fraction,
        ))
    }
}

#[derive(Debug, PartialEq)]
pub struct FastaniMatch {
    /// Percentage, as fastANI reports it
    pub ani: f32,
    pub fragments_matching: u32,
    pub fragments_total: u32,
}

impl FastaniMatch {
    fn aligned_fraction(&self) -> f32 {
        self.fragments_matching as f32 / self.fragments_total as f32
    }
}

/// Both one-way results are in hand: take the higher ANI, requiring at least
/// one direction to clear the aligned-fraction floor.
fn combine_directions(
    first: &FastaniMatch,
    second: &FastaniMatch,
    min_aligned_fraction: f32,
) -> Option<AniEstimate> {
    if first.aligned_fraction() < min_aligned_fraction
        && second.aligned_fraction() < min_aligned_fraction
    {
        return None;
    }
    let best = if first.ani > second.ani { first } else { second };
    Some(AniEstimate {
        ani: best.ani / 100.,
        aligned_fraction: first.aligned_fraction().max(second.aligned_fraction()),
    })
}

fn calculate_fastani_one_way(
    fasta1: &str,
    fasta2: &str,
    fastani_fraglen: u32,
) -> Result<Option<FastaniMatch>, FineDistanceError> {
    let alignment_failed = |message: String| FineDistanceError::AlignmentFailed {
        query: fasta1.to_string(),
        reference: fasta2.to_string(),
        message,
    };

    let mut cmd = std::process::Command::new("fastANI");
    cmd.arg("-o")
        .arg("/dev/stdout")
        .arg("--fragLen")
        .arg(format!("{fastani_fraglen}"))
        .arg("--query")
        .arg(fasta1)
        .arg("--ref")
        .arg(fasta2)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    debug!("Running fastANI command: {:?}", &cmd);
    let mut process = cmd
        .spawn()
        .map_err(|e| alignment_failed(format!("Failed to spawn fastANI: {}", e)))?;
    let stdout = process
        .stdout
        .as_mut()
        .ok_or_else(|| alignment_failed("Failed to attach to fastANI stdout".to_string()))?;
    let to_return = parse_fastani_output(BufReader::new(stdout)).map_err(&alignment_failed);

    let output = process
        .wait_with_output()
        .map_err(|e| alignment_failed(format!("Failed to wait for fastANI: {}", e)))?;
    if !output.status.success() {
        return Err(alignment_failed(format!(
            "fastANI exited with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    let to_return = to_return?;
    debug!(
        "FastANI of {} against {} was {:?}",
        fasta1, fasta2, to_return
    );
    Ok(to_return)
}

/// Parse fastANI's 5-column tab separated output. No rows means the pair was
/// too divergent for fastANI to estimate at all.
pub fn parse_fastani_output<R: std::io::Read>(
    reader: R,
) -> Result<Option<FastaniMatch>, String> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_reader(reader);

    let mut to_return = None;
    for record_res in rdr.records() {
        let record = record_res.map_err(|e| format!("Error parsing fastANI output: {}", e))?;
        if record.len() != 5 {
            return Err(format!(
                "Unexpected number of fields in fastANI output line: {:?}",
                record
            ));
        }
        let ani: f32 = record[2]
            .parse()
            .map_err(|_| format!("Failed to convert fastANI ANI '{}' to float", &record[2]))?;
        let fragments_matching: u32 = record[3].parse().map_err(|_| {
            format!(
                "Failed to convert fastANI fragment count '{}' to integer",
                &record[3]
            )
        })?;
        let fragments_total: u32 = record[4].parse().map_err(|_| {
            format!(
                "Failed to convert fastANI fragment count '{}' to integer",
                &record[4]
            )
        })?;
        if to_return.is_some() {
            return Err("Unexpectedly found >1 result from fastANI".to_string());
        }
        to_return = Some(FastaniMatch {
            ani,
            fragments_matching,
            fragments_total,
        });
    }
    Ok(to_return)
}
