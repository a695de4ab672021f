//! Flow and stage definitions.
//!
//! A `FlowDefinition` is only ever built through validation from the on-disk
//! `FlowConfig` shape, so every definition in memory satisfies the graph
//! invariants (resolvable initial stage, no dangling next stages, positive
//! turn budgets). Stages live in an arena keyed by id; edges are ids, which
//! makes cycles free to express.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::InvalidFlowError;

/// Turn budget used when a stage config omits `max_turns`.
pub const DEFAULT_MAX_TURNS: u32 = 3;

fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}

/// On-disk shape of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub stage_id: String,
    #[serde(default)]
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub next_stages: Vec<String>,
    #[serde(default)]
    pub completion_criteria: BTreeMap<String, String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

/// On-disk shape of a flow, as stored in `<flow_id>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub flow_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub initial_stage: String,
    #[serde(default)]
    pub stages: BTreeMap<String, StageConfig>,
}

/// A validated stage of a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDefinition {
    pub stage_id: String,
    pub name: String,
    /// Instruction handed to the utterance generator while in this stage.
    pub system_instruction: String,
    /// Prompt surfaced to the user on stage entry.
    pub user_instruction: Option<String>,
    /// Candidate successors in preference order. Empty means terminal.
    pub next_stage_ids: Vec<String>,
    /// Criterion name → description. Empty means no semantic gate.
    pub completion_criteria: BTreeMap<String, String>,
    pub max_turns: u32,
}

impl StageDefinition {
    pub fn is_terminal(&self) -> bool {
        self.next_stage_ids.is_empty()
    }

    pub fn has_criteria(&self) -> bool {
        !self.completion_criteria.is_empty()
    }

    fn to_config(&self) -> StageConfig {
        StageConfig {
            stage_id: self.stage_id.clone(),
            name: self.name.clone(),
            system_prompt: self.system_instruction.clone(),
            user_prompt: self.user_instruction.clone(),
            next_stages: self.next_stage_ids.clone(),
            completion_criteria: self.completion_criteria.clone(),
            max_turns: self.max_turns,
        }
    }
}

/// A validated, immutable flow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDefinition {
    flow_id: String,
    name: String,
    description: String,
    initial_stage_id: String,
    stages: BTreeMap<String, StageDefinition>,
}

impl FlowDefinition {
    /// Validate a flow config and build the definition.
    pub fn from_config(config: FlowConfig) -> Result<Self, InvalidFlowError> {
        let FlowConfig {
            flow_id,
            name,
            description,
            initial_stage,
            stages: raw_stages,
        } = config;

        if flow_id.trim().is_empty() {
            return Err(InvalidFlowError::EmptyFlowId);
        }
        // Flow ids double as file names in a flow directory.
        if flow_id.contains(['/', '\\']) || flow_id.contains("..") {
            return Err(InvalidFlowError::UnsafeFlowId { flow_id });
        }
        if raw_stages.is_empty() {
            return Err(InvalidFlowError::NoStages { flow_id });
        }

        let mut stages = BTreeMap::new();
        for (key, stage) in raw_stages {
            if key.is_empty() || stage.stage_id.is_empty() {
                return Err(InvalidFlowError::EmptyStageId { flow_id });
            }
            if key != stage.stage_id {
                return Err(InvalidFlowError::StageIdCollision {
                    flow_id,
                    key,
                    stage_id: stage.stage_id,
                });
            }
            if stage.max_turns == 0 {
                return Err(InvalidFlowError::NonPositiveMaxTurns {
                    flow_id,
                    stage_id: key,
                });
            }
            if stage.system_prompt.trim().is_empty() {
                return Err(InvalidFlowError::EmptySystemInstruction {
                    flow_id,
                    stage_id: key,
                });
            }

            let user_instruction = stage.user_prompt.filter(|p| !p.trim().is_empty());
            let name = if stage.name.is_empty() {
                key.clone()
            } else {
                stage.name
            };

            stages.insert(
                key,
                StageDefinition {
                    stage_id: stage.stage_id,
                    name,
                    system_instruction: stage.system_prompt,
                    user_instruction,
                    next_stage_ids: stage.next_stages,
                    completion_criteria: stage.completion_criteria,
                    max_turns: stage.max_turns,
                },
            );
        }

        if !stages.contains_key(&initial_stage) {
            return Err(InvalidFlowError::MissingInitialStage {
                flow_id,
                stage_id: initial_stage,
            });
        }

        for stage in stages.values() {
            let mut seen = HashSet::new();
            for target in &stage.next_stage_ids {
                if !stages.contains_key(target) {
                    return Err(InvalidFlowError::DanglingNextStage {
                        flow_id,
                        stage_id: stage.stage_id.clone(),
                        target: target.clone(),
                    });
                }
                if !seen.insert(target.as_str()) {
                    return Err(InvalidFlowError::DuplicateNextStage {
                        flow_id,
                        stage_id: stage.stage_id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        Ok(Self {
            name: if name.is_empty() { flow_id.clone() } else { name },
            flow_id,
            description,
            initial_stage_id: initial_stage,
            stages,
        })
    }

    /// Convert back to the on-disk shape.
    pub fn to_config(&self) -> FlowConfig {
        FlowConfig {
            flow_id: self.flow_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            initial_stage: self.initial_stage_id.clone(),
            stages: self
                .stages
                .iter()
                .map(|(id, stage)| (id.clone(), stage.to_config()))
                .collect(),
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn initial_stage_id(&self) -> &str {
        &self.initial_stage_id
    }

    pub fn initial_stage(&self) -> &StageDefinition {
        // Validated at construction.
        &self.stages[&self.initial_stage_id]
    }

    /// Look up a stage by id.
    pub fn stage(&self, stage_id: &str) -> Option<&StageDefinition> {
        self.stages.get(stage_id)
    }

    /// All stages, ordered by id.
    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.values()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl TryFrom<FlowConfig> for FlowDefinition {
    type Error = InvalidFlowError;

    fn try_from(config: FlowConfig) -> Result<Self, Self::Error> {
        Self::from_config(config)
    }
}
