use std::fs;
use std::path::Path;
use std::process::exit;

use anyhow::Result;
use clap::{App, Arg, SubCommand};
use log::{debug, error, info, warn, LevelFilter};

use jobgraph::graph::validate;
use jobgraph::utils::process_env;
use jobgraph::load_config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    pretty_env_logger::formatted_timed_builder()
        .filter_level(LevelFilter::Info)
        .init();
    let matches = App::new("job-graph")
        .version(VERSION)
        .about("Validates build-job definitions and emits the job graph")
        .arg(Arg::with_name("config").short("c").long("config").value_name("FILE").help("Sets the job definitions file").takes_value(true).default_value("jobs.yml"))
        .subcommand(SubCommand::with_name("validate").about("Checks the definitions and reports every violation"))
        .subcommand(SubCommand::with_name("emit").about("Validates, then writes the serialized job graph").arg(Arg::with_name("output").short("o").long("output").value_name("FILE").help("Write the graph here instead of stdout").takes_value(true)))
        .get_matches();
    let config_path = Path::new(matches.value_of("config").unwrap());
    let config = load_config(config_path)?;
    debug!("config: {:#?}", config);
    if matches.subcommand_matches("validate").is_some() {
        match validate(config) {
            Ok(graph) => info!("ok: {} job(s)", graph.len()),
            Err(errors) => {
                for e in &errors {
                    error!("{}", e);
                }
                exit(1);
            }
        }
    } else if let Some(matches) = matches.subcommand_matches("emit") {
        let graph = match validate(config) {
            Ok(g) => g,
            Err(errors) => {
                for e in &errors {
                    error!("{}", e);
                }
                exit(1);
            }
        };
        let out = graph.emit(&process_env());
        for w in &out.warnings {
            warn!("{}", w);
        }
        let yaml = out.to_yaml()?;
        match matches.value_of("output") {
            Some(path) => fs::write(path, yaml)?,
            None => print!("{}", yaml),
        }
    }
    Ok(())
}
