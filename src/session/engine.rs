//! Turn engine: processes one user message against a session.
//!
//! Every external call (generator, evaluator) happens on a staged copy of the
//! transcript before anything is written back. A failed, timed-out or
//! cancelled turn therefore leaves the session exactly as it was.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::collab::{
    CandidateStage, CompletionEvaluator, Evaluation, EvaluationRequest, UtteranceGenerator,
};
use crate::error::{EvaluationError, GenerationError, InactiveSessionError, TurnError};
use crate::flow::{FlowDefinition, StageDefinition};
use crate::policy::{TerminateReason, Transition, TransitionPolicy};

use super::state::{FlowSession, SessionStatus, Speaker, TranscriptEntry, TransitionKind};

/// Stage change reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTransition {
    pub from: String,
    pub to: String,
    pub kind: TransitionKind,
}

/// Result of a successful turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnOutcome {
    /// The assistant's reply.
    pub utterance: String,
    /// Stage the session is in after the turn.
    pub stage_id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<StageTransition>,
    /// Set when the turn completed the session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<TerminateReason>,
    /// Prompt the new stage suggests putting to the user. Never auto-injected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_prompt: Option<String>,
}

/// Executes turns: generator → evaluator → policy → commit.
pub struct TurnEngine {
    generator: Arc<dyn UtteranceGenerator>,
    evaluator: Arc<dyn CompletionEvaluator>,
    policy: TransitionPolicy,
    call_timeout: Duration,
}

impl TurnEngine {
    pub fn new(
        generator: Arc<dyn UtteranceGenerator>,
        evaluator: Arc<dyn CompletionEvaluator>,
        policy: TransitionPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            evaluator,
            policy,
            call_timeout,
        }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Process one user message.
    ///
    /// Not idempotent: each successful call appends two transcript entries.
    pub async fn advance(
        &self,
        flow: &FlowDefinition,
        session: &mut FlowSession,
        user_message: &str,
    ) -> Result<TurnOutcome, TurnError> {
        if !session.is_active() {
            return Err(InactiveSessionError {
                session_id: session.session_id,
                status: session.status,
            }
            .into());
        }
        if session.flow_id != flow.flow_id() {
            return Err(TurnError::FlowMismatch {
                session_id: session.session_id,
                expected: session.flow_id.clone(),
                actual: flow.flow_id().to_string(),
            });
        }
        let stage = flow
            .stage(&session.current_stage_id)
            .ok_or_else(|| TurnError::UnknownStage {
                flow_id: flow.flow_id().to_string(),
                stage_id: session.current_stage_id.clone(),
            })?;

        // Staged transcript: the committed one plus this turn's entries.
        let mut staged = session.transcript.clone();
        staged.push(TranscriptEntry::new(
            Speaker::User,
            user_message,
            &stage.stage_id,
        ));

        let utterance = self.generate(stage, &staged).await?;
        staged.push(TranscriptEntry::new(
            Speaker::Assistant,
            utterance.as_str(),
            &stage.stage_id,
        ));
        let turns = session.turns_in_current_stage + 1;

        let evaluation = if stage.has_criteria() {
            self.evaluate(flow, stage, &staged).await?
        } else {
            Evaluation::vacuous()
        };

        let decision = self.policy.decide(stage, turns, &evaluation);
        debug!(
            session_id = %session.session_id,
            stage = %stage.stage_id,
            turns,
            decision = ?decision,
            "Turn decided"
        );

        // Lifecycle check first so a refused completion leaves nothing half-written.
        if matches!(decision, Transition::Terminate(_)) {
            mark_completed(session)?;
        }

        // Commit. No awaits past this point.
        session.transcript = staged;
        session.turns_in_current_stage = turns;
        session.updated_at = chrono::Utc::now();

        let mut outcome = TurnOutcome {
            utterance,
            stage_id: stage.stage_id.clone(),
            status: session.status,
            transition: None,
            completion: None,
            suggested_prompt: None,
        };

        match decision {
            Transition::Stay => {}
            Transition::AdvanceTo(target) => {
                self.commit_stage_change(
                    flow,
                    session,
                    &mut outcome,
                    target,
                    TransitionKind::Criteria,
                );
            }
            Transition::ForceAdvance(target) => {
                self.commit_stage_change(
                    flow,
                    session,
                    &mut outcome,
                    target,
                    TransitionKind::TurnLimit,
                );
            }
            Transition::Terminate(reason) => {
                outcome.status = session.status;
                outcome.completion = Some(reason);
                info!(
                    session_id = %session.session_id,
                    flow_id = %session.flow_id,
                    stage = %stage.stage_id,
                    reason = ?reason,
                    "Session completed"
                );
            }
        }

        Ok(outcome)
    }

    fn commit_stage_change(
        &self,
        flow: &FlowDefinition,
        session: &mut FlowSession,
        outcome: &mut TurnOutcome,
        target: String,
        kind: TransitionKind,
    ) {
        let from = session.current_stage_id.clone();
        session.enter_stage(&target, kind);
        info!(
            session_id = %session.session_id,
            flow_id = %session.flow_id,
            from = %from,
            to = %target,
            kind = ?kind,
            "Stage transition"
        );
        outcome.suggested_prompt = flow
            .stage(&target)
            .and_then(|s| s.user_instruction.clone());
        outcome.stage_id = target.clone();
        outcome.transition = Some(StageTransition {
            from,
            to: target,
            kind,
        });
    }

    async fn generate(
        &self,
        stage: &StageDefinition,
        transcript: &[TranscriptEntry],
    ) -> Result<String, GenerationError> {
        match timeout(
            self.call_timeout,
            self.generator.generate(&stage.system_instruction, transcript),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Transient(format!(
                "generator timed out after {:?}",
                self.call_timeout
            ))),
        }
    }

    async fn evaluate(
        &self,
        flow: &FlowDefinition,
        stage: &StageDefinition,
        transcript: &[TranscriptEntry],
    ) -> Result<Evaluation, EvaluationError> {
        let candidates = stage
            .next_stage_ids
            .iter()
            .filter_map(|id| flow.stage(id))
            .map(|s| CandidateStage {
                stage_id: &s.stage_id,
                name: &s.name,
            })
            .collect();
        let request = EvaluationRequest {
            stage_id: &stage.stage_id,
            stage_name: &stage.name,
            transcript,
            criteria: &stage.completion_criteria,
            candidates,
        };

        let evaluation = match timeout(self.call_timeout, self.evaluator.evaluate(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EvaluationError::Transient(format!(
                    "evaluator timed out after {:?}",
                    self.call_timeout
                )));
            }
        };

        let missing = evaluation.missing(&stage.completion_criteria);
        if !missing.is_empty() {
            return Err(EvaluationError::Permanent(format!(
                "evaluation for stage {} is missing criteria: {}",
                stage.stage_id,
                missing.join(", ")
            )));
        }
        Ok(evaluation)
    }
}

/// Move the session to `Completed`, refusing if it has already left `Active`.
fn mark_completed(session: &mut FlowSession) -> Result<(), InactiveSessionError> {
    session
        .set_status(SessionStatus::Completed)
        .map_err(|status| InactiveSessionError {
            session_id: session.session_id,
            status,
        })
}
