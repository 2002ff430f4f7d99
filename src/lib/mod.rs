use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Result};
use log::{error, info, warn};

use crate::conf::JobGraphConfig;
use crate::graph::{validate, SerializedGraph, ValidatedGraph};

pub mod conf;
pub mod graph;
pub mod params;
pub mod utils;

/// A name-to-value string mapping, used for job parameters and for the
/// environment lookup supplied at emission time
pub type Env = BTreeMap<String, String>;


/// Reads a job-definitions document and fail-fast checks every entity in it
pub fn load_config(path: &Path) -> Result<JobGraphConfig> {
    let config: JobGraphConfig = serde_yaml::from_reader(File::open(path)?)?;
    for (name, template) in &config.templates {
        template.check(name)?;
    }
    for job in &config.jobs {
        job.check()?;
    }
    Ok(config)
}

/// Runs the cross-job checks over an already-loaded document
pub fn build_graph(config: JobGraphConfig) -> std::result::Result<ValidatedGraph, Vec<graph::GraphError>> {
    validate(config)
}

/// One-shot pipeline: load, validate, emit. Graph errors are logged one by one
/// so the user can fix the whole set in a single pass
pub fn emit_from_file(path: &Path, env: &Env) -> Result<SerializedGraph> {
    let config = load_config(path)?;
    let graph = match build_graph(config) {
        Ok(g) => g,
        Err(errors) => {
            for e in &errors {
                error!("{}", e);
            }
            return Err(anyhow!("{} error(s) in job definitions", errors.len()));
        }
    };
    info!("validated {} job(s)", graph.len());
    let out = graph.emit(env);
    for w in &out.warnings {
        warn!("{}", w);
    }
    Ok(out)
}
