//! Pipeline configuration domain types
//!
//! A `PipelineConfig` is the provider-agnostic description of what to run.
//! Credentials appear only as names; secret material never travels in a config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::run::{Stage, Task};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub project_id: String,
    pub source: SourceRef,
    pub stages: Vec<StageDefinition>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Additional credential references (registry auth, deploy keys)
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Where the pipeline's source code comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub repository: String,
    pub revision: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    /// Name of the git credential used to clone
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl PipelineConfig {
    /// Every credential name this config references, source credential first
    pub fn credential_refs(&self) -> impl Iterator<Item = &str> {
        self.source
            .credential
            .iter()
            .chain(self.credentials.iter())
            .map(String::as_str)
    }

    pub fn references_credential(&self, name: &str) -> bool {
        self.credential_refs().any(|c| c == name)
    }

    /// Initial stage/task layout for a new run, every task pending
    pub fn stage_plan(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .map(|stage| Stage {
                name: stage.name.clone(),
                tasks: stage
                    .tasks
                    .iter()
                    .map(|task| Task::pending(&task.name))
                    .collect(),
            })
            .collect()
    }

    /// Visits every free-text field that may carry template placeholders
    pub fn for_each_text_mut(&mut self, f: &mut impl FnMut(&mut String)) {
        f(&mut self.name);
        f(&mut self.project_id);
        f(&mut self.source.repository);
        f(&mut self.source.revision);
        if let Some(sha) = self.source.commit_sha.as_mut() {
            f(sha);
        }
        if let Some(credential) = self.source.credential.as_mut() {
            f(credential);
        }
        for stage in &mut self.stages {
            f(&mut stage.name);
            for task in &mut stage.tasks {
                f(&mut task.name);
                if let Some(image) = task.image.as_mut() {
                    f(image);
                }
                task.commands.iter_mut().for_each(&mut *f);
            }
        }
        self.environment.values_mut().for_each(&mut *f);
        self.credentials.iter_mut().for_each(&mut *f);
    }
}
