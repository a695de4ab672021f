//! Transition policy: decides whether a conversation leaves its stage.
//!
//! Pure decision logic over `(stage, turns_in_stage, evaluation)`. The turn
//! budget is the liveness guarantee: whatever the evaluator reports, a stage
//! is left once `max_turns` turns have been spent in it.

use serde::{Deserialize, Serialize};

use crate::collab::Evaluation;
use crate::error::ConfigError;
use crate::flow::StageDefinition;

/// Why a terminal stage ended the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateReason {
    CriteriaMet,
    TurnLimit,
}

/// The policy's decision for the current turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Keep talking in the current stage.
    Stay,
    /// Criteria satisfied; move to the chosen candidate.
    AdvanceTo(String),
    /// Turn budget exhausted; move to the chosen candidate.
    ForceAdvance(String),
    /// Terminal stage finished; the conversation is complete.
    Terminate(TerminateReason),
}

/// How stages without completion criteria are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UngatedStages {
    /// No criteria means vacuously satisfied: leave after the first turn.
    #[default]
    AdvanceAfterFirstTurn,
    /// No criteria means no semantic gate: only the turn budget ends the stage.
    HoldUntilTurnLimit,
}

impl std::str::FromStr for UngatedStages {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "advance_after_first_turn" => Ok(Self::AdvanceAfterFirstTurn),
            "hold_until_turn_limit" => Ok(Self::HoldUntilTurnLimit),
            other => Err(ConfigError::InvalidValue {
                key: "FLOW_UNGATED_STAGES".to_string(),
                message: format!(
                    "'{other}' (expected advance_after_first_turn or hold_until_turn_limit)"
                ),
            }),
        }
    }
}

/// Stage-exit decision logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionPolicy {
    pub ungated: UngatedStages,
}

impl TransitionPolicy {
    pub fn new(ungated: UngatedStages) -> Self {
        Self { ungated }
    }

    /// Decide what happens after `turns_in_stage` completed turns in `stage`.
    pub fn decide(
        &self,
        stage: &StageDefinition,
        turns_in_stage: u32,
        evaluation: &Evaluation,
    ) -> Transition {
        if turns_in_stage >= 1 && self.criteria_satisfied(stage, evaluation) {
            return match select_next(stage, evaluation) {
                Some(next) => Transition::AdvanceTo(next),
                None => Transition::Terminate(TerminateReason::CriteriaMet),
            };
        }

        if turns_in_stage >= stage.max_turns {
            return match select_next(stage, evaluation) {
                Some(next) => Transition::ForceAdvance(next),
                None => Transition::Terminate(TerminateReason::TurnLimit),
            };
        }

        Transition::Stay
    }

    fn criteria_satisfied(&self, stage: &StageDefinition, evaluation: &Evaluation) -> bool {
        if !stage.has_criteria() {
            return self.ungated == UngatedStages::AdvanceAfterFirstTurn;
        }
        evaluation.all_satisfied(stage.completion_criteria.keys())
    }
}

/// Pick the successor: the evaluator's best-ranked candidate if it named one,
/// otherwise the first listed candidate. `None` for terminal stages.
pub fn select_next(stage: &StageDefinition, evaluation: &Evaluation) -> Option<String> {
    evaluation
        .preferred_next
        .iter()
        .find(|id| stage.next_stage_ids.contains(id))
        .or_else(|| stage.next_stage_ids.first())
        .cloned()
}
