use std;
use std::path::Path;

use clap::*;
use rayon::prelude::*;

use crate::adjust::{AdjustmentEngine, ClusterRef};
use crate::clusterer::{TierMode, TierParams, TwoTierClusterer};
use crate::distance_store::{DistanceMethod, DistanceStore};
use crate::external_command_checker;
use crate::fastani::{AniPreset, FastaniFineFinder};
use crate::finch::FinchCoarseFinder;
use crate::genome::GenomeMetadata;
use crate::genome_info_file;
use crate::genome_stats;
use crate::hierarchy::Linkage;
use crate::scoring::{self, ScoreWeights, QUALITY_FORMULAS};
use crate::work_directory::WorkDirectory;

pub fn add_cluster_subcommand(app: Command) -> Command {
    let mut cluster_subcommand = bird_tool_utils::clap_utils::add_clap_verbosity_flags(
        Command::new("cluster")
            .about("Cluster genome FASTA files by average nucleotide identity")
            .arg(
                Arg::new("output-directory")
                    .long("output-directory")
                    .short('o')
                    .required(true)
                    .help("Directory to write the clustering state into"),
            )
            .arg(
                Arg::new("ani")
                    .long("ani")
                    .default_value(crate::DEFAULT_ANI)
                    .help("Average nucleotide identity threshold for secondary clustering"),
            )
            .arg(
                Arg::new("precluster-ani")
                    .long("precluster-ani")
                    .default_value(crate::DEFAULT_PRETHRESHOLD_ANI)
                    .help("Require at least this MinHash-derived ANI for primary (pre-)clustering"),
            )
            .arg(
                Arg::new("linkage")
                    .long("linkage")
                    .value_parser(["single", "complete", "average", "weighted"])
                    .default_value(crate::DEFAULT_LINKAGE)
                    .help("Linkage rule for secondary clustering"),
            )
            .arg(
                Arg::new("precluster-linkage")
                    .long("precluster-linkage")
                    .value_parser(["single", "complete", "average", "weighted"])
                    .default_value(crate::DEFAULT_LINKAGE)
                    .help("Linkage rule for primary clustering"),
            )
            .arg(
                Arg::new("ani-method")
                    .long("ani-method")
                    .value_parser(["normal", "tight"])
                    .default_value("normal")
                    .help(
                        "fastANI parameterisation: 'normal' for default fragments, \
                         'tight' for shorter fragments and a stricter aligned fraction, \
                         suited to very high identity thresholds",
                    ),
            )
            .arg(
                Arg::new("min-aligned-fraction")
                    .long("min-aligned-fraction")
                    .help("Min aligned fraction of two genomes for clustering [default: from --ani-method]"),
            )
            .arg(
                Arg::new("fragment-length")
                    .long("fragment-length")
                    .value_parser(value_parser!(u32))
                    .help("Length of fragments for fastANI [default: from --ani-method]"),
            )
            .arg(
                Arg::new("num-hashes")
                    .long("num-hashes")
                    .value_parser(value_parser!(usize))
                    .default_value("1000")
                    .help("Number of hashes to use for each genome in MinHash"),
            )
            .arg(
                Arg::new("kmer-length")
                    .long("kmer-length")
                    .value_parser(value_parser!(u8))
                    .default_value("21")
                    .help("Kmer length to use in MinHash"),
            )
            .arg(
                Arg::new("skip-precluster")
                    .long("skip-precluster")
                    .action(ArgAction::SetTrue)
                    .help("Skip MinHash preclustering and compare all genome pairs with fastANI"),
            )
            .arg(
                Arg::new("skip-ani")
                    .long("skip-ani")
                    .action(ArgAction::SetTrue)
                    .help("Skip the fastANI pass and report MinHash preclusters as final clusters"),
            )
            .arg(
                Arg::new("checkm-tab-table")
                    .long("checkm-tab-table")
                    .conflicts_with("genome-info")
                    .help("Output of CheckM lineage_wf/taxonomy_wf/qa with --tab_table specified"),
            )
            .arg(
                Arg::new("genome-info")
                    .long("genome-info")
                    .help("dRep style genomeInfo CSV of completeness and contamination"),
            )
            .arg(
                Arg::new("min-completeness")
                    .long("min-completeness")
                    .help("Genomes with less than this percentage of completeness are excluded"),
            )
            .arg(
                Arg::new("max-contamination")
                    .long("max-contamination")
                    .help("Genomes with greater than this percentage of contamination are excluded"),
            )
            .arg(
                Arg::new("quality-formula")
                    .long("quality-formula")
                    .value_parser(["drep", "completeness-4contamination"])
                    .default_value(crate::DEFAULT_QUALITY_FORMULA)
                    .help("Formula used to score genomes when choosing representatives"),
            )
            .arg(
                Arg::new("threads")
                    .short('t')
                    .long("threads")
                    .value_parser(value_parser!(usize))
                    .default_value("1")
                    .help("Number of CPU threads to use"),
            ),
    );

    cluster_subcommand =
        bird_tool_utils::clap_utils::add_genome_specification_arguments(cluster_subcommand);

    app.subcommand(cluster_subcommand)
}

pub fn add_choose_subcommand(app: Command) -> Command {
    app.subcommand(bird_tool_utils::clap_utils::add_clap_verbosity_flags(
        Command::new("choose")
            .about("Choose the highest scoring representative genome of each cluster")
            .arg(
                Arg::new("output-directory")
                    .long("output-directory")
                    .short('o')
                    .required(true)
                    .help("Directory holding the state of a previous 'cluster' run"),
            )
            .arg(
                Arg::new("quality-formula")
                    .long("quality-formula")
                    .value_parser(["drep", "completeness-4contamination"])
                    .default_value(crate::DEFAULT_QUALITY_FORMULA)
                    .help("Formula used to score genomes"),
            ),
    ))
}

pub fn add_adjust_subcommand(app: Command) -> Command {
    app.subcommand(bird_tool_utils::clap_utils::add_clap_verbosity_flags(
        Command::new("adjust")
            .about("Re-cluster or remove clusters of a previous 'cluster' run")
            .arg(
                Arg::new("output-directory")
                    .long("output-directory")
                    .short('o')
                    .required(true)
                    .help("Directory holding the state of a previous 'cluster' run"),
            )
            .arg(
                Arg::new("remove-clusters")
                    .long("remove-clusters")
                    .num_args(1..)
                    .conflicts_with("recluster-primary")
                    .help("Cluster ids to remove, e.g. '3' for a primary cluster or '3_1' for a secondary cluster"),
            )
            .arg(
                Arg::new("recluster-primary")
                    .long("recluster-primary")
                    .value_parser(value_parser!(usize))
                    .help("Primary cluster id whose secondary clustering should be re-run"),
            )
            .arg(
                Arg::new("ani")
                    .long("ani")
                    .default_value(crate::DEFAULT_ANI)
                    .help("Average nucleotide identity threshold for re-clustering"),
            )
            .arg(
                Arg::new("linkage")
                    .long("linkage")
                    .value_parser(["single", "complete", "average", "weighted"])
                    .default_value(crate::DEFAULT_LINKAGE)
                    .help("Linkage rule for re-clustering"),
            )
            .arg(
                Arg::new("ani-method")
                    .long("ani-method")
                    .value_parser(["normal", "tight"])
                    .default_value("normal")
                    .help("fastANI parameterisation for re-clustering"),
            )
            .arg(
                Arg::new("min-aligned-fraction")
                    .long("min-aligned-fraction")
                    .help("Min aligned fraction of two genomes [default: from --ani-method]"),
            )
            .arg(
                Arg::new("fragment-length")
                    .long("fragment-length")
                    .value_parser(value_parser!(u32))
                    .help("Length of fragments for fastANI [default: from --ani-method]"),
            )
            .arg(
                Arg::new("threads")
                    .short('t')
                    .long("threads")
                    .value_parser(value_parser!(usize))
                    .default_value("1")
                    .help("Number of CPU threads to use"),
            ),
    ))
}

pub fn run_cluster_subcommand(matches: &clap::ArgMatches) {
    let m = matches.subcommand_matches("cluster").unwrap();

    let genome_fasta_files: Vec<String> =
        bird_tool_utils::clap_utils::parse_list_of_genome_fasta_files(m, true)
            .expect("Failed to parse genome fasta files");
    info!("Read in {} genomes to cluster", genome_fasta_files.len());

    let qualities = read_genome_qualities(m);
    let genomes = gather_genome_metadata(&genome_fasta_files, qualities.as_ref());
    let genomes = filter_genomes_by_quality(genomes, m);
    if genomes.is_empty() {
        error!("No genomes remained after quality filtering");
        std::process::exit(1);
    }

    let mode = TierMode::from_skip_flags(m.get_flag("skip-precluster"), m.get_flag("skip-ani"));
    if mode.runs_secondary() {
        external_command_checker::check_for_fastani();
    }

    let preset = parse_ani_preset(m);
    let fine = fastani_finder_from_matches(m, preset);
    let coarse = FinchCoarseFinder {
        num_kmers: *m.get_one::<usize>("num-hashes").unwrap(),
        kmer_length: *m.get_one::<u8>("kmer-length").unwrap(),
    };

    let clusterer = TwoTierClusterer {
        genome_fasta_paths: genomes.iter().map(|g| g.name.as_str()).collect(),
        mode,
        primary: TierParams {
            method: DistanceMethod::Sketch,
            linkage: parse_linkage(m, "precluster-linkage"),
            threshold: ani_to_threshold(m, "precluster-ani"),
        },
        secondary: TierParams {
            method: preset.method(),
            linkage: parse_linkage(m, "linkage"),
            threshold: ani_to_threshold(m, "ani"),
        },
        coarse: &coarse,
        fine: &fine,
    };

    let mut store = DistanceStore::new();
    let result = match clusterer.run(&mut store) {
        Ok(result) => result,
        Err(e) => {
            error!("Clustering failed: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Clustered {} genomes into {} primary and {} secondary clusters",
        genomes.len(),
        result.primary_ids().len(),
        result.secondary_ids().len()
    );
    for degraded in &result.degraded {
        warn!(
            "Primary cluster {} degraded to singleton secondary clusters: {}",
            degraded.primary_id, degraded.reason
        );
    }

    let work_directory = establish_work_directory(m);
    if let Err(e) = work_directory.save(&genomes, &store, &result) {
        error!("Failed to save clustering state: {}", e);
        std::process::exit(1);
    }

    for (genome, (primary_id, secondary_id)) in &result.assignments {
        println!("{}_{}\t{}", primary_id, secondary_id, genomes[*genome].name);
    }
}

pub fn run_choose_subcommand(matches: &clap::ArgMatches) {
    let m = matches.subcommand_matches("choose").unwrap();
    let work_directory = open_work_directory(m);
    let (genomes, _store, result) = load_state(&work_directory);

    let weights = parse_quality_formula(m);
    let (rows, warnings) = scoring::report(&result, &genomes, &weights);
    for warning in &warnings {
        warn!("{}", warning);
    }
    if let Err(e) = work_directory.write_representatives(&rows) {
        error!("Failed to write representatives table: {}", e);
        std::process::exit(1);
    }

    for row in rows.iter().filter(|r| r.is_representative) {
        println!("{}", row.genome);
    }
}

pub fn run_adjust_subcommand(matches: &clap::ArgMatches) {
    let m = matches.subcommand_matches("adjust").unwrap();
    let work_directory = open_work_directory(m);
    let (genomes, mut store, mut result) = load_state(&work_directory);

    if let Some(refs) = m.get_many::<String>("remove-clusters") {
        let refs: Vec<ClusterRef> = refs
            .map(|s| {
                s.parse().unwrap_or_else(|e| {
                    error!("{}", e);
                    std::process::exit(1);
                })
            })
            .collect();
        let mut engine = AdjustmentEngine {
            result: &mut result,
            store: &mut store,
        };
        if let Err(e) = engine.remove_clusters(&refs) {
            error!("Failed to remove clusters: {}", e);
            std::process::exit(1);
        }
    } else if let Some(primary_id) = m.get_one::<usize>("recluster-primary") {
        external_command_checker::check_for_fastani();
        let preset = parse_ani_preset(m);
        let fine = fastani_finder_from_matches(m, preset);
        let mut engine = AdjustmentEngine {
            result: &mut result,
            store: &mut store,
        };
        if let Err(e) = engine.recluster(
            *primary_id,
            &fine,
            parse_linkage(m, "linkage"),
            ani_to_threshold(m, "ani"),
        ) {
            error!("Failed to re-cluster primary cluster {}: {}", primary_id, e);
            std::process::exit(1);
        }
    } else {
        error!("Either --remove-clusters or --recluster-primary must be specified");
        std::process::exit(1);
    }

    if let Err(e) = work_directory.save(&genomes, &store, &result) {
        error!("Failed to save adjusted clustering state: {}", e);
        std::process::exit(1);
    }
    for (genome, (primary_id, secondary_id)) in &result.assignments {
        println!("{}_{}\t{}", primary_id, secondary_id, genomes[*genome].name);
    }
}

pub fn parse_percentage(
    m: &clap::ArgMatches,
    parameter: &str,
) -> std::result::Result<Option<f32>, String> {
    match m.get_one::<String>(parameter) {
        Some(value) => {
            let mut percentage: f32 = value
                .parse()
                .map_err(|_| format!("Failed to parse --{} '{}'", parameter, value))?;
            if (1.0..=100.0).contains(&percentage) {
                percentage /= 100.0;
            } else if !(0.0..=100.0).contains(&percentage) {
                error!("Invalid percentage: '{}'", percentage);
                return Err(format!(
                    "Invalid percentage specified for --{}: '{}'",
                    parameter, percentage
                ));
            }
            debug!("Using {} {}%", parameter, percentage * 100.0);
            Ok(Some(percentage))
        }
        None => Ok(None),
    }
}

fn ani_to_threshold(m: &clap::ArgMatches, parameter: &str) -> f32 {
    let ani = parse_percentage(m, parameter)
        .unwrap_or_else(|e| {
            error!("{}", e);
            std::process::exit(1);
        })
        .unwrap_or_else(|| {
            panic!("Programming error: --{} has a default value", parameter)
        });
    1.0 - ani
}

fn parse_linkage(m: &clap::ArgMatches, parameter: &str) -> Linkage {
    m.get_one::<String>(parameter)
        .unwrap()
        .parse()
        .unwrap_or_else(|e: String| {
            error!("{}", e);
            std::process::exit(1);
        })
}

fn parse_ani_preset(m: &clap::ArgMatches) -> AniPreset {
    match m.get_one::<String>("ani-method").unwrap().as_str() {
        "normal" => AniPreset::Normal,
        "tight" => AniPreset::Tight,
        other => panic!("Programming error: unexpected ani-method '{}'", other),
    }
}

fn parse_quality_formula(m: &clap::ArgMatches) -> ScoreWeights {
    let formula = m.get_one::<String>("quality-formula").unwrap();
    *QUALITY_FORMULAS
        .get(formula.as_str())
        .unwrap_or_else(|| panic!("Programming error: unexpected quality formula '{}'", formula))
}

fn fastani_finder_from_matches(m: &clap::ArgMatches, preset: AniPreset) -> FastaniFineFinder {
    let mut fine = FastaniFineFinder::from_preset(preset);
    if let Some(fraction) = parse_percentage(m, "min-aligned-fraction").unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    }) {
        fine.min_aligned_fraction = fraction;
    }
    if let Some(fraglen) = m.get_one::<u32>("fragment-length") {
        fine.fraglen = *fraglen;
    }
    fine
}

fn establish_work_directory(m: &clap::ArgMatches) -> WorkDirectory {
    let path = m.get_one::<String>("output-directory").unwrap();
    WorkDirectory::establish(Path::new(path)).unwrap_or_else(|e| {
        error!("Failed to establish output directory {}: {}", path, e);
        std::process::exit(1);
    })
}

fn open_work_directory(m: &clap::ArgMatches) -> WorkDirectory {
    let path = m.get_one::<String>("output-directory").unwrap();
    WorkDirectory::open(Path::new(path)).unwrap_or_else(|e| {
        error!("Failed to open output directory {}: {}", path, e);
        std::process::exit(1);
    })
}

fn load_state(
    work_directory: &WorkDirectory,
) -> (
    Vec<GenomeMetadata>,
    DistanceStore,
    crate::clusterer::ClusteringResult,
) {
    work_directory.load().unwrap_or_else(|e| {
        error!("Failed to load clustering state: {}", e);
        std::process::exit(1);
    })
}

fn read_genome_qualities(m: &clap::ArgMatches) -> Option<checkm::CheckMResult> {
    if let Some(path) = m.get_one::<String>("checkm-tab-table") {
        info!("Reading CheckM tab table ..");
        Some(checkm::CheckMTabTable::read_file_path(path))
    } else if let Some(path) = m.get_one::<String>("genome-info") {
        info!("Reading genomeInfo file ..");
        Some(
            genome_info_file::read_genome_info_file(path).unwrap_or_else(|e| {
                error!("{}", e);
                std::process::exit(1);
            }),
        )
    } else {
        warn!(
            "Since CheckM input is missing, genomes will be scored on assembly statistics alone"
        );
        None
    }
}

/// Collect per-genome assembly statistics (in parallel) and attach quality
/// values, matched on the FASTA file stem the way dRep genomeInfo files key
/// genomes.
fn gather_genome_metadata(
    genome_fasta_files: &[String],
    qualities: Option<&checkm::CheckMResult>,
) -> Vec<GenomeMetadata> {
    info!("Calculating assembly statistics for each genome ..");
    genome_fasta_files
        .par_iter()
        .map(|path| {
            let stats = genome_stats::calculate_genome_stats(path);
            let mut genome = GenomeMetadata::new(path);
            genome.n50 = Some(stats.n50 as u64);
            genome.genome_size = Some(stats.total_length as u64);
            if let Some(qualities) = qualities {
                let stem = Path::new(path)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.to_string());
                genome.quality = qualities.genome_to_quality.get(&stem).map(|q| {
                    checkm::GenomeQuality {
                        completeness: q.completeness,
                        contamination: q.contamination,
                        strain_heterogeneity: q.strain_heterogeneity,
                    }
                });
                if genome.quality.is_none() {
                    warn!("No quality information found for genome {}", path);
                }
            }
            genome
        })
        .collect()
}

fn filter_genomes_by_quality(
    genomes: Vec<GenomeMetadata>,
    m: &clap::ArgMatches,
) -> Vec<GenomeMetadata> {
    let min_completeness = parse_percentage(m, "min-completeness").unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });
    let max_contamination = parse_percentage(m, "max-contamination").unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });
    if min_completeness.is_none() && max_contamination.is_none() {
        return genomes;
    }

    let before = genomes.len();
    let filtered: Vec<GenomeMetadata> = genomes
        .into_iter()
        .filter(|genome| match &genome.quality {
            Some(quality) => {
                min_completeness.map_or(true, |min| quality.completeness >= min)
                    && max_contamination.map_or(true, |max| quality.contamination <= max)
            }
            None => {
                error!(
                    "Quality thresholds were specified but genome {} has no quality information",
                    genome.name
                );
                std::process::exit(1);
            }
        })
        .collect();
    info!(
        "{} of {} genomes passed quality thresholds",
        filtered.len(),
        before
    );
    filtered
}
