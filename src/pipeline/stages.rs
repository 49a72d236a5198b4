//! Stage graph and movement policy.
//!
//! The pipeline is a totally ordered list of stages with dense ordinals.
//! From ordinal `i` a lead may move to any ordinal `<= i` or to exactly
//! `i + 1`. Anything further forward is a structural violation, decided
//! here without looking at the lead's data.

use std::collections::HashSet;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub ordinal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Backward,
    Same,
    Forward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageGraph {
    stages: Vec<Stage>,
}

impl StageGraph {
    /// Build a graph from `(id, display name)` pairs in pipeline order.
    /// Ordinals are assigned by position.
    pub fn new<I, S, N>(defs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, N)>,
        S: Into<String>,
        N: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut stages = Vec::new();
        for (ordinal, (id, name)) in defs.into_iter().enumerate() {
            let id = id.into();
            if id.trim().is_empty() {
                bail!("Stage at position {} has an empty id", ordinal);
            }
            if !seen.insert(id.clone()) {
                bail!("Duplicate stage id '{}'", id);
            }
            stages.push(Stage {
                id,
                name: name.into(),
                ordinal,
            });
        }
        if stages.is_empty() {
            bail!("A stage graph needs at least one stage");
        }
        Ok(Self { stages })
    }

    /// The built-in sales pipeline: new → contacted → audit → proposal → won.
    pub fn default_pipeline() -> Self {
        Self {
            stages: DEFAULT_STAGES
                .iter()
                .enumerate()
                .map(|(ordinal, (id, name))| Stage {
                    id: (*id).to_string(),
                    name: (*name).to_string(),
                    ordinal,
                })
                .collect(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Where newly captured leads start.
    pub fn first(&self) -> &Stage {
        &self.stages[0]
    }

    pub fn get(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ordinal(&self, id: &str) -> Option<usize> {
        self.get(id).map(|s| s.ordinal)
    }

    pub fn next(&self, id: &str) -> Option<&Stage> {
        let ordinal = self.ordinal(id)?;
        self.stages.get(ordinal + 1)
    }

    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map(|s| s.name.as_str()).unwrap_or(id)
    }

    /// Apply the movement policy to a `from → to` request.
    pub fn check_move(&self, from: &str, to: &str) -> Result<MoveKind, WorkflowError> {
        let to_ordinal = self.ordinal(to).ok_or_else(|| WorkflowError::UnknownStage {
            stage_id: to.to_string(),
        })?;
        let from_ordinal =
            self.ordinal(from)
                .ok_or_else(|| WorkflowError::CurrentStageNotConfigured {
                    stage_id: to.to_string(),
                    current_stage: from.to_string(),
                })?;

        if to_ordinal > from_ordinal + 1 {
            return Err(WorkflowError::StructuralPolicyViolation {
                stage_id: to.to_string(),
                from_stage: from.to_string(),
            });
        }
        Ok(match to_ordinal.cmp(&from_ordinal) {
            std::cmp::Ordering::Less => MoveKind::Backward,
            std::cmp::Ordering::Equal => MoveKind::Same,
            std::cmp::Ordering::Greater => MoveKind::Forward,
        })
    }

    /// Every stage a lead at `from` may structurally target, itself included.
    pub fn allowed_targets(&self, from: &str) -> Vec<&Stage> {
        match self.ordinal(from) {
            Some(i) => self.stages.iter().filter(|s| s.ordinal <= i + 1).collect(),
            None => Vec::new(),
        }
    }
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::default_pipeline()
    }
}

const DEFAULT_STAGES: &[(&str, &str)] = &[
    ("new", "New Lead"),
    ("contacted", "Contacted"),
    ("audit", "Audit"),
    ("proposal", "Proposal Sent"),
    ("won", "Won"),
];
