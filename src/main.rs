extern crate corella;

extern crate clap;
use clap::*;

extern crate log;

extern crate bird_tool_utils;
use bird_tool_utils::clap_utils::*;

static PROGRAM_NAME: &str = "Corella";

fn main() {
    let app = build_cli();
    let matches = app.clone().get_matches();
    set_log_level(&matches, false, PROGRAM_NAME, crate_version!());

    match matches.subcommand_name() {
        Some("cluster") => {
            let m = matches.subcommand_matches("cluster").unwrap();
            set_log_level(m, true, PROGRAM_NAME, crate_version!());
            initialise_rayon(m);
            corella::cluster_argument_parsing::run_cluster_subcommand(&matches);
        }
        Some("choose") => {
            let m = matches.subcommand_matches("choose").unwrap();
            set_log_level(m, true, PROGRAM_NAME, crate_version!());
            corella::cluster_argument_parsing::run_choose_subcommand(&matches);
        }
        Some("adjust") => {
            let m = matches.subcommand_matches("adjust").unwrap();
            set_log_level(m, true, PROGRAM_NAME, crate_version!());
            initialise_rayon(m);
            corella::cluster_argument_parsing::run_adjust_subcommand(&matches);
        }
        _ => panic!("Programming error"),
    }
}

fn initialise_rayon(m: &ArgMatches) {
    let num_threads: usize = *m.get_one::<usize>("threads").unwrap();
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .expect("Programming error: rayon initialised multiple times");
}

fn build_cli() -> Command {
    let mut app = add_clap_verbosity_flags(Command::new("corella"))
        .version(crate_version!())
        .author("Ben J. Woodcroft <benjwoodcroft near gmail.com>")
        .about("Two-tier genome dereplicator: MinHash preclustering refined by fastANI")
        .arg_required_else_help(true);

    app = corella::cluster_argument_parsing::add_cluster_subcommand(app);
    app = corella::cluster_argument_parsing::add_choose_subcommand(app);
    app = corella::cluster_argument_parsing::add_adjust_subcommand(app);
    app
}
