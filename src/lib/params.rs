/// Parameter merging and %name% placeholder resolution
use std::fmt::{Display, Formatter};

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::conf::{BuildJob, Requirement, Template};
use crate::Env;

lazy_static! {
    static ref PLACEHOLDER_PATTERN: Regex =
        Regex::new(r"%([A-Za-z0-9][A-Za-z0-9._\-]*)%").expect("could not compile pattern");
}

/// Substitution passes run over a job's parameter map before giving up on
/// whatever placeholders remain. Bounds self- and mutually-referential
/// parameters, which would otherwise never converge.
pub const MAX_RESOLUTION_PASSES: usize = 8;


#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
/// A placeholder that survived every resolution pass. Non-fatal; the value is
/// emitted verbatim and this record is attached to the result
pub struct UnresolvedParameterWarning {
    /// Id of the job owning the parameter
    pub job: String,
    /// Name of the parameter whose value kept the placeholder
    pub parameter: String,
    /// The placeholder itself, including the surrounding percent signs
    pub placeholder: String,
}

impl Display for UnresolvedParameterWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job \"{}\": parameter \"{}\" kept unresolved placeholder {}",
            self.job, self.parameter, self.placeholder
        )
    }
}

/// Merges template defaults with the job's own parameters, job values taking
/// precedence key by key
pub fn effective_parameters(job: &BuildJob, template: Option<&Template>) -> Env {
    let mut merged = match template {
        Some(t) => t.parameters.clone(),
        None => Env::new(),
    };
    for (k, v) in &job.parameters {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Template requirements not overridden by a same-id job requirement, followed
/// by the job's own, declaration order preserved on both sides
pub fn effective_requirements(job: &BuildJob, template: Option<&Template>) -> Vec<Requirement> {
    let mut reqs: Vec<Requirement> = match template {
        Some(t) => t
            .requirements
            .iter()
            .filter(|tr| !job.requirements.iter().any(|jr| jr.id == tr.id))
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    reqs.extend(job.requirements.iter().cloned());
    reqs
}

/// Substitutes %name% placeholders in every value of `merged`, looking names up
/// in the parameter map first and in the external environment mapping second.
/// Runs until a pass changes nothing or [MAX_RESOLUTION_PASSES] passes ran;
/// whatever placeholders remain are left verbatim and reported as warnings.
pub fn resolve(job_id: &str, merged: &Env, env: &Env) -> (Env, Vec<UnresolvedParameterWarning>) {
    let mut resolved = merged.clone();
    for _ in 0..MAX_RESOLUTION_PASSES {
        let snapshot = resolved.clone();
        let mut changed = false;
        for value in resolved.values_mut() {
            let next = PLACEHOLDER_PATTERN.replace_all(value, |caps: &Captures| {
                let name = &caps[1];
                snapshot
                    .get(name)
                    .or_else(|| env.get(name))
                    .cloned()
                    // unknown name: keep the placeholder as written
                    .unwrap_or_else(|| caps[0].to_string())
            });
            if next != *value {
                *value = next.into_owned();
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    let mut warnings = Vec::new();
    for (name, value) in &resolved {
        for caps in PLACEHOLDER_PATTERN.captures_iter(value) {
            warnings.push(UnresolvedParameterWarning {
                job: job_id.to_string(),
                parameter: name.clone(),
                placeholder: caps[0].to_string(),
            });
        }
    }
    (resolved, warnings)
}
