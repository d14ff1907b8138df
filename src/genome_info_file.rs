use checkm;
use std;

/// Read a genomeInfo file as defined by dRep i.e. ["genome" (basename of the
/// .fasta file of that genome), "completeness" (0-100), "contamination"
/// (0-100)], optionally extended with a fourth "strain_heterogeneity" (0-100)
/// column.
pub fn read_genome_info_file(file_path: &str) -> Result<checkm::CheckMResult, String> {
    let mut qualities = std::collections::BTreeMap::new();
    let rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(std::path::Path::new(file_path));
    let mut total_seen = 0usize;

    let mut parse_result =
        rdr.map_err(|e| format!("Failed to parse genomeInfo file {}: {}", file_path, e))?;
    let headers = parse_result
        .headers()
        .map_err(|e| format!("Failed to find headers in genomeInfo file: {}", e))?;
    let has_strain_heterogeneity = match headers.len() {
        3 if headers == vec!["genome", "completeness", "contamination"] => false,
        4 if headers
            == vec![
                "genome",
                "completeness",
                "contamination",
                "strain_heterogeneity",
            ] =>
        {
            true
        }
        _ => return Err("Incorrect headers found in genomeInfo file".to_string()),
    };

    for result in parse_result.records() {
        let res = result.map_err(|e| format!("Parsing error in genomeInfo file: {}", e))?;
        let expected_columns = if has_strain_heterogeneity { 4 } else { 3 };
        if res.len() != expected_columns {
            return Err(format!(
                "Parsing error in genomeInfo file - didn't find {} columns in line {:?}",
                expected_columns, res
            ));
        }
        let completeness: f32 = parse_percentage_column(&res[1], "completeness")?;
        let contamination: f32 = parse_percentage_column(&res[2], "contamination")?;
        let strain_heterogeneity: f32 = if has_strain_heterogeneity {
            parse_percentage_column(&res[3], "strain_heterogeneity")?
        } else {
            0.
        };
        trace!(
            "For {}, found completeness {} and contamination {}",
            &res[0],
            completeness,
            contamination
        );
        match qualities.insert(
            res[0].to_string(),
            checkm::GenomeQuality {
                completeness: completeness / 100.,
                contamination: contamination / 100.,
                strain_heterogeneity: strain_heterogeneity / 100.,
            },
        ) {
            None => {}
            Some(_) => {
                return Err(format!(
                    "The genome {} was found multiple times in the genomeInfo file {}",
                    &res[0], file_path
                ));
            }
        };
        total_seen += 1;
    }
    debug!("Read in {} genomes from {}", total_seen, file_path);
    Ok(checkm::CheckMResult {
        genome_to_quality: qualities,
    })
}

fn parse_percentage_column(field: &str, column: &str) -> Result<f32, String> {
    let value: f32 = field
        .parse()
        .map_err(|_| format!("Error parsing {} '{}' in genomeInfo file", column, field))?;
    if !(0. ..=100.).contains(&value) {
        return Err(format!(
            "The {} value {} in the genomeInfo file is outside 0-100",
            column, value
        ));
    }
    Ok(value)
}
