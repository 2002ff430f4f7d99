/// Defines what makes for a valid job definition
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::Env;


#[derive(Debug, PartialEq, Eq)]
/// A malformed single entity, caught at construction time
pub enum ValidationError {
    /// A mandatory string field was empty
    EmptyField { entity: String, field: String },
    /// The same parameter key was given twice for one job
    DuplicateParameter { job: String, key: String },
    /// The same requirement id was given twice within one owner (job or template)
    DuplicateRequirementId { owner: String, id: String },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyField { entity, field } => {
                write!(f, "{} has an empty {}", entity, field)
            }
            ValidationError::DuplicateParameter { job, key } => {
                write!(f, "job \"{}\" defines parameter \"{}\" twice", job, key)
            }
            ValidationError::DuplicateRequirementId { owner, id } => {
                write!(f, "\"{}\" defines requirement id \"{}\" twice", owner, id)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
/// What happens to a job when one of its snapshot dependencies fails or is cancelled
pub enum FailureAction {
    /// Fail this job as well
    Fail,
    /// Cancel this job
    Cancel,
    /// Run anyway, but attach a build problem
    AddProblem,
    /// Run as if nothing happened
    Ignore,
}

impl Default for FailureAction {
    fn default() -> Self {
        FailureAction::Fail
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
/// How a [Requirement] compares an agent property against its value
pub enum RequirementOperator {
    /// The property merely has to be defined on the agent
    Exists,
    /// Exact string equality
    Equals,
    /// Substring match
    Contains,
    /// Prefix match
    StartsWith,
    /// Suffix match
    EndsWith,
    /// Regular-expression match
    Matches,
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
/// A same-configuration-version dependency on another job. Serializes to:
/// ```yaml
/// target: basic-test-coverage  # id of the job we depend on
/// on_failure: cancel           # optional, defaults to fail
/// on_cancel: cancel            # optional, defaults to fail
/// ```
pub struct SnapshotDependency {
    /// Id of the [job](BuildJob) whose result must be available before this one runs
    pub target: String,
    #[serde(default)]
    /// Action taken if the referenced job fails
    pub on_failure: FailureAction,
    #[serde(default)]
    /// Action taken if the referenced job is cancelled
    pub on_cancel: FailureAction,
}

impl SnapshotDependency {
    pub fn new(
        target: &str,
        on_failure: FailureAction,
        on_cancel: FailureAction,
    ) -> Result<Self, ValidationError> {
        if target.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "dependency".to_string(),
                field: "target".to_string(),
            });
        }
        Ok(SnapshotDependency {
            target: target.to_string(),
            on_failure,
            on_cancel,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
/// A constraint on which agent may run a job. Serializes to:
/// ```yaml
/// property: teamcity.agent.jvm.os.name
/// operator: contains
/// value: Windows
/// id: RQ_489  # unique within the owning job; lets a job override a template requirement
/// ```
pub struct Requirement {
    /// Agent capability name to inspect
    pub property: String,
    /// Comparison to apply
    pub operator: RequirementOperator,
    #[serde(default)]
    /// String to compare against. Ignored by the exists operator
    pub value: String,
    /// Requirement id, unique within the owning job or template
    pub id: String,
}

impl Requirement {
    pub fn new(
        property: &str,
        operator: RequirementOperator,
        value: &str,
        id: &str,
    ) -> Result<Self, ValidationError> {
        if property.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "requirement".to_string(),
                field: "property".to_string(),
            });
        }
        if id.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "requirement".to_string(),
                field: "id".to_string(),
            });
        }
        Ok(Requirement {
            property: property.to_string(),
            operator,
            value: value.to_string(),
            id: id.to_string(),
        })
    }
}

fn check_requirement_ids(owner: &str, requirements: &[Requirement]) -> Result<(), ValidationError> {
    let mut seen: Vec<&str> = Vec::with_capacity(requirements.len());
    for r in requirements {
        if seen.contains(&r.id.as_str()) {
            return Err(ValidationError::DuplicateRequirementId {
                owner: owner.to_string(),
                id: r.id.clone(),
            });
        }
        seen.push(&r.id);
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
/// A reusable bundle of default parameters and requirements, referenced by name
/// from any number of [jobs](BuildJob). Composition by reference, not inheritance:
/// defaults are merged in at emission time, job values winning key by key.
pub struct Template {
    #[serde(default)]
    /// Default parameters. A job's own parameters override these key by key
    pub parameters: Env,
    #[serde(default)]
    /// Default requirements. A job requirement with a matching id replaces the default
    pub requirements: Vec<Requirement>,
}

impl Template {
    /// Re-runs the entity-local rules on a deserialized template
    pub fn check(&self, name: &str) -> Result<(), ValidationError> {
        for r in &self.requirements {
            if r.property.is_empty() || r.id.is_empty() {
                return Err(ValidationError::EmptyField {
                    entity: format!("template \"{}\" requirement", name),
                    field: if r.property.is_empty() {
                        "property".to_string()
                    } else {
                        "id".to_string()
                    },
                });
            }
        }
        check_requirement_ids(name, &self.requirements)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
/// A named, independently schedulable unit of CI work. Serializes to:
/// ```yaml
/// id: Full_Test_Coverage_Windows_Eclipse42_Java8  # stable key across the graph
/// name: "Full Test Coverage (Windows, Eclipse 4.2, Java 8)"
/// template: eclipse-build  # optional reference to shared defaults
/// parameters:
///   eclipse.version: "42"
///   env.JAVA_HOME: "%windows.java8.oracle.64bit%"
/// dependencies:
///   - target: basic-test-coverage
///     on_failure: cancel
///     on_cancel: cancel
/// requirements:
///   - property: teamcity.agent.jvm.os.name
///     operator: contains
///     value: Windows
///     id: RQ_489
/// ```
pub struct BuildJob {
    /// Unique id, the stable key across the whole graph
    pub id: String,
    /// Human-readable display name
    pub name: String,
    #[serde(default)]
    /// Optional reference to a [Template] providing shared defaults
    pub template: Option<String>,
    #[serde(default)]
    /// This job's own parameters. Values may embed %name% placeholders
    pub parameters: Env,
    #[serde(default)]
    /// Snapshot dependencies, in declaration order
    pub dependencies: Vec<SnapshotDependency>,
    #[serde(default)]
    /// Agent requirements, in declaration order
    pub requirements: Vec<Requirement>,
}

impl BuildJob {
    /// Builds a job from parts, rejecting malformed definitions outright.
    /// Parameters are taken as a key/value sequence so a duplicated key is
    /// still visible here; they are stored as an ordered map afterwards.
    pub fn new(
        id: &str,
        name: &str,
        template: Option<&str>,
        parameters: Vec<(String, String)>,
        dependencies: Vec<SnapshotDependency>,
        requirements: Vec<Requirement>,
    ) -> Result<Self, ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "job".to_string(),
                field: "id".to_string(),
            });
        }
        if name.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "job".to_string(),
                field: "name".to_string(),
            });
        }
        let mut params = Env::new();
        for (k, v) in parameters {
            if params.insert(k.clone(), v).is_some() {
                return Err(ValidationError::DuplicateParameter {
                    job: id.to_string(),
                    key: k,
                });
            }
        }
        check_requirement_ids(id, &requirements)?;
        Ok(BuildJob {
            id: id.to_string(),
            name: name.to_string(),
            template: template.map(String::from),
            parameters: params,
            dependencies,
            requirements,
        })
    }

    /// Re-runs the entity-local rules on a deserialized job. The yaml path
    /// cannot go through [BuildJob::new], so the loader calls this instead.
    pub fn check(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "job".to_string(),
                field: "id".to_string(),
            });
        }
        if self.name.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "job".to_string(),
                field: "name".to_string(),
            });
        }
        for d in &self.dependencies {
            if d.target.is_empty() {
                return Err(ValidationError::EmptyField {
                    entity: format!("job \"{}\" dependency", self.id),
                    field: "target".to_string(),
                });
            }
        }
        for r in &self.requirements {
            if r.property.is_empty() || r.id.is_empty() {
                return Err(ValidationError::EmptyField {
                    entity: format!("job \"{}\" requirement", self.id),
                    field: if r.property.is_empty() {
                        "property".to_string()
                    } else {
                        "id".to_string()
                    },
                });
            }
        }
        check_requirement_ids(&self.id, &self.requirements)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
/// Represents an entire job-definitions document
pub struct JobGraphConfig {
    #[serde(default)]
    /// Named templates, available for jobs to reference
    pub templates: BTreeMap<String, Template>,
    /// The jobs themselves
    pub jobs: Vec<BuildJob>,
}
