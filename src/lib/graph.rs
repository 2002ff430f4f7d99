/// Cross-job validation and deterministic graph emission
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use log::debug;
use serde::Serialize;

use crate::conf::{BuildJob, JobGraphConfig, Requirement, SnapshotDependency, Template};
use crate::params::{
    effective_parameters, effective_requirements, resolve, UnresolvedParameterWarning,
};
use crate::Env;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::conf::{
        BuildJob, FailureAction, JobGraphConfig, SnapshotDependency, Template,
    };
    use crate::graph::{validate, GraphError};
    use crate::Env;

    fn job(id: &str, deps: &[&str]) -> BuildJob {
        let deps = deps
            .iter()
            .map(|t| {
                SnapshotDependency::new(t, FailureAction::Fail, FailureAction::Fail).unwrap()
            })
            .collect();
        BuildJob::new(id, &id.to_uppercase(), None, vec![], deps, vec![]).unwrap()
    }

    fn config(jobs: Vec<BuildJob>) -> JobGraphConfig {
        JobGraphConfig {
            templates: Default::default(),
            jobs,
        }
    }

    #[test]
    fn valid_set_emits_one_entry_per_job() {
        let c = config(vec![job("a", &[]), job("b", &["a"]), job("c", &["a"])]);
        let g = validate(c).expect("valid set must validate");
        let out = g.emit(&Env::new());
        assert_eq!(out.jobs.len(), 3);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn dependencies_come_first_in_emitted_order() {
        let c = config(vec![job("b", &["a"]), job("a", &[])]);
        let g = validate(c).expect("valid set must validate");
        let out = g.emit(&Env::new());
        let ids: Vec<&str> = out.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn ties_break_by_id_ascending() {
        let c = config(vec![job("c", &[]), job("a", &[]), job("b", &["a", "c"])]);
        let g = validate(c).expect("valid set must validate");
        let ids: Vec<String> = g.emit(&Env::new()).jobs.into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn duplicate_id_is_reported() {
        let c = config(vec![job("a", &[]), job("a", &[])]);
        let errors = validate(c).err().expect("duplicate id must not validate");
        assert_eq!(errors, vec![GraphError::DuplicateId("a".to_string())]);
    }

    #[test]
    fn dangling_dependency_is_reported() {
        let c = config(vec![job("a", &["ghost"])]);
        let errors = validate(c).err().expect("dangling target must not validate");
        assert_eq!(
            errors,
            vec![GraphError::DanglingDependency {
                job: "a".to_string(),
                target: "ghost".to_string(),
            }]
        );
    }

    #[test]
    fn unknown_template_is_reported() {
        let mut j = job("a", &[]);
        j.template = Some("ghost".to_string());
        let errors = validate(config(vec![j]))
            .err()
            .expect("unknown template must not validate");
        assert_eq!(
            errors,
            vec![GraphError::UnknownTemplate {
                job: "a".to_string(),
                template: "ghost".to_string(),
            }]
        );
    }

    #[test]
    fn two_job_cycle_is_reported() {
        let c = config(vec![job("a", &["b"]), job("b", &["a"])]);
        let errors = validate(c).err().expect("cycle must not validate");
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            GraphError::CyclicDependency(cycle) => {
                assert_eq!(cycle, &vec!["a".to_string(), "b".to_string(), "a".to_string()]);
            }
            other => panic!("expected a cycle error, got {:?}", other),
        }
    }

    #[test]
    fn self_cycle_is_reported() {
        let errors = validate(config(vec![job("a", &["a"])]))
            .err()
            .expect("self cycle must not validate");
        assert_eq!(
            errors,
            vec![GraphError::CyclicDependency(vec![
                "a".to_string(),
                "a".to_string()
            ])]
        );
    }

    #[test]
    fn all_errors_are_reported_together() {
        let mut dup = job("a", &[]);
        dup.template = Some("ghost".to_string());
        let c = config(vec![job("a", &["missing"]), dup, job("b", &["c"]), job("c", &["b"])]);
        let errors = validate(c).err().expect("broken set must not validate");
        assert!(errors.contains(&GraphError::DuplicateId("a".to_string())));
        assert!(errors.contains(&GraphError::DanglingDependency {
            job: "a".to_string(),
            target: "missing".to_string(),
        }));
        assert!(errors.contains(&GraphError::UnknownTemplate {
            job: "a".to_string(),
            template: "ghost".to_string(),
        }));
        assert!(errors
            .iter()
            .any(|e| matches!(e, GraphError::CyclicDependency(_))));
    }

    #[test]
    fn emitting_twice_is_byte_identical() {
        let mut t = Template::default();
        t.parameters
            .insert("gradle.tasks".to_string(), "check".to_string());
        let mut j = job("a", &[]);
        j.template = Some("t".to_string());
        let mut templates = std::collections::BTreeMap::new();
        templates.insert("t".to_string(), t);
        let c = JobGraphConfig {
            templates,
            jobs: vec![j, job("b", &["a"])],
        };
        let g = validate(c).expect("valid set must validate");
        let mut env = Env::new();
        env.insert("k".to_string(), "v".to_string());
        let first = g.emit(&env).to_yaml().expect("could not serialize");
        let second = g.emit(&env).to_yaml().expect("could not serialize");
        assert_eq!(first, second);
    }

    #[test]
    fn emitted_job_carries_resolved_parameters_and_merged_requirements() {
        let s = crate::utils::tests::get_sample_resource_file("buildship.yml")
            .expect("could not find buildship");
        let c = crate::utils::tests::deser_yaml(&s).expect("could not parse buildship");
        let g = validate(c).expect("buildship sample must validate");
        let mut env = Env::new();
        env.insert(
            "windows.java8.oracle.64bit".to_string(),
            "C:\\jdk8".to_string(),
        );
        let out = g.emit(&env);
        assert!(out.warnings.is_empty());
        let ids: Vec<&str> = out.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "Basic_Test_Coverage",
                "Full_Test_Coverage_Windows_Eclipse42_Java8"
            ]
        );
        let full = &out.jobs[1];
        assert_eq!(full.parameters.get("env.JAVA_HOME").unwrap(), "C:\\jdk8");
        assert_eq!(
            full.parameters.get("compiler.location").unwrap(),
            "C:\\jdk8\\bin\\javac"
        );
        // template default survives under the job's override
        assert_eq!(full.parameters.get("eclipse.version").unwrap(), "42");
        assert_eq!(full.parameters.get("gradle.tasks").unwrap(), "eclipseTest");
        // template requirement plus the job's own
        assert_eq!(full.requirements.len(), 2);
        assert_eq!(full.dependencies[0].on_failure, FailureAction::Cancel);
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
/// A cross-job rule violation found by [validate]. All violations of one pass
/// are reported together
pub enum GraphError {
    /// Two or more jobs share this id
    DuplicateId(String),
    /// A job references a template name with no definition
    UnknownTemplate { job: String, template: String },
    /// A snapshot dependency points at an id absent from the set
    DanglingDependency { job: String, target: String },
    /// Job ids along a dependency cycle, first id repeated at the end
    CyclicDependency(Vec<String>),
}

impl Display for GraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::DuplicateId(id) => write!(f, "duplicate job id \"{}\"", id),
            GraphError::UnknownTemplate { job, template } => {
                write!(f, "job \"{}\" references unknown template \"{}\"", job, template)
            }
            GraphError::DanglingDependency { job, target } => write!(
                f,
                "job \"{}\" depends on \"{}\", which is not defined",
                job, target
            ),
            GraphError::CyclicDependency(cycle) => {
                write!(f, "dependency cycle: {}", cycle.join(" -> "))
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// A job set that passed every cross-job check. Only [validate] can build one,
/// so emission is unreachable for a broken set
#[derive(Debug)]
pub struct ValidatedGraph {
    jobs: BTreeMap<String, BuildJob>,
    templates: BTreeMap<String, Template>,
    /// Topological order, dependencies first, ties broken by id ascending
    order: Vec<String>,
}

#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
/// One job of the emitted graph: identity plus fully resolved parameters and
/// merged requirements, ready for an external orchestrator
pub struct SerializedJob {
    pub id: String,
    pub name: String,
    pub template: Option<String>,
    pub parameters: Env,
    pub dependencies: Vec<SnapshotDependency>,
    pub requirements: Vec<Requirement>,
}

#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
/// The emitted job graph, jobs in topological order
pub struct SerializedGraph {
    pub jobs: Vec<SerializedJob>,
    #[serde(skip)]
    /// Non-fatal resolution warnings. Skipped during serialization so emitted
    /// output stays byte-identical for identical inputs
    pub warnings: Vec<UnresolvedParameterWarning>,
}

impl SerializedGraph {
    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(self)
    }
}

/// Checks every cross-job invariant over the whole set and either hands back a
/// [ValidatedGraph] or every violation found, never a prefix of them
pub fn validate(config: JobGraphConfig) -> Result<ValidatedGraph, Vec<GraphError>> {
    let mut errors = Vec::new();

    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for job in &config.jobs {
        if !seen.insert(job.id.as_str()) {
            duplicates.insert(job.id.clone());
        }
    }
    for id in duplicates {
        errors.push(GraphError::DuplicateId(id));
    }

    for job in &config.jobs {
        if let Some(template) = &job.template {
            if !config.templates.contains_key(template) {
                errors.push(GraphError::UnknownTemplate {
                    job: job.id.clone(),
                    template: template.clone(),
                });
            }
        }
        for dep in &job.dependencies {
            if !seen.contains(dep.target.as_str()) {
                errors.push(GraphError::DanglingDependency {
                    job: job.id.clone(),
                    target: dep.target.clone(),
                });
            }
        }
    }

    // edges job -> target, restricted to targets that exist
    let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for job in &config.jobs {
        let targets = job
            .dependencies
            .iter()
            .map(|d| d.target.as_str())
            .filter(|t| seen.contains(t))
            .collect();
        edges.insert(&job.id, targets);
    }
    for cycle in find_cycles(&edges) {
        errors.push(GraphError::CyclicDependency(cycle));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let order = topological_order(&edges);
    debug!("validated {} jobs, order: {:?}", order.len(), order);
    Ok(ValidatedGraph {
        jobs: config.jobs.into_iter().map(|j| (j.id.clone(), j)).collect(),
        templates: config.templates,
        order,
    })
}

impl ValidatedGraph {
    /// Number of jobs in the graph
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Produces the serialized graph: jobs in the stored topological order,
    /// template defaults merged in, placeholders resolved against the merged
    /// parameters and the given environment mapping
    pub fn emit(&self, env: &Env) -> SerializedGraph {
        let mut jobs = Vec::with_capacity(self.order.len());
        let mut warnings = Vec::new();
        for id in &self.order {
            let job = &self.jobs[id];
            let template = job.template.as_ref().and_then(|t| self.templates.get(t));
            let merged = effective_parameters(job, template);
            let (parameters, mut w) = resolve(&job.id, &merged, env);
            warnings.append(&mut w);
            jobs.push(SerializedJob {
                id: job.id.clone(),
                name: job.name.clone(),
                template: job.template.clone(),
                parameters,
                dependencies: job.dependencies.clone(),
                requirements: effective_requirements(job, template),
            });
        }
        SerializedGraph { jobs, warnings }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Mark {
    InStack,
    Done,
}

/// Depth-first cycle search over the dependency edges, tracking the recursion
/// stack. Each cycle is reported once, its ids in dependency order with the
/// entry id repeated at the end
fn find_cycles(edges: &BTreeMap<&str, Vec<&str>>) -> Vec<Vec<String>> {
    fn dfs(
        v: &str,
        edges: &BTreeMap<&str, Vec<&str>>,
        marks: &mut BTreeMap<String, Mark>,
        stack: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        match marks.get(v) {
            Some(Mark::Done) => return,
            Some(Mark::InStack) => {
                let start = stack.iter().position(|s| s == v).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].to_vec();
                cycle.push(v.to_string());
                cycles.push(cycle);
                return;
            }
            None => {}
        }
        marks.insert(v.to_string(), Mark::InStack);
        stack.push(v.to_string());
        if let Some(targets) = edges.get(v) {
            for t in targets {
                dfs(t, edges, marks, stack, cycles);
            }
        }
        stack.pop();
        marks.insert(v.to_string(), Mark::Done);
    }

    let mut marks = BTreeMap::new();
    let mut stack = Vec::new();
    let mut cycles = Vec::new();
    for v in edges.keys() {
        dfs(v, edges, &mut marks, &mut stack, &mut cycles);
    }
    cycles
}

/// Kahn's algorithm with an ordered ready set, so equal-depth jobs come out in
/// id order and the whole emission is reproducible
fn topological_order(edges: &BTreeMap<&str, Vec<&str>>) -> Vec<String> {
    let mut remaining: BTreeMap<&str, usize> =
        edges.iter().map(|(v, ts)| (*v, ts.len())).collect();
    // reverse adjacency: target -> jobs depending on it
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (v, targets) in edges {
        for t in targets {
            dependents.entry(t).or_default().push(v);
        }
    }
    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(v, _)| *v)
        .collect();
    let mut order = Vec::with_capacity(edges.len());
    while let Some(&v) = ready.iter().next() {
        ready.remove(v);
        order.push(v.to_string());
        if let Some(deps) = dependents.get(v) {
            for d in deps {
                let n = remaining.get_mut(d).expect("dependent not in graph");
                *n -= 1;
                if *n == 0 {
                    ready.insert(d);
                }
            }
        }
    }
    order
}
