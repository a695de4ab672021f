//! Flow session state: one conversation's position in a flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flow::FlowDefinition;

/// Lifecycle of a session.
///
/// `Active` → `Completed` | `Terminated`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting turns.
    Active,
    /// A terminal stage's exit condition fired.
    Completed,
    /// The caller ended the session.
    Terminated,
}

impl SessionStatus {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!((self, target), (Active, Completed) | (Active, Terminated))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Who said something in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// One transcript record, tagged with the stage it was said in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Speaker,
    pub text: String,
    pub stage_id: String,
    pub at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(role: Speaker, text: impl Into<String>, stage_id: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            stage_id: stage_id.into(),
            at: Utc::now(),
        }
    }
}

/// What caused a stage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// All completion criteria held.
    Criteria,
    /// The stage's turn budget ran out.
    TurnLimit,
}

/// A recorded stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageChange {
    pub from: String,
    pub to: String,
    pub kind: TransitionKind,
    pub at: DateTime<Utc>,
}

/// Mutable per-conversation state.
///
/// Owns its transcript and counters; the flow definition is only referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSession {
    pub session_id: Uuid,
    pub flow_id: String,
    pub current_stage_id: String,
    /// Assistant turns produced since entering the current stage.
    pub turns_in_current_stage: u32,
    pub status: SessionStatus,
    /// Append-only record of every turn, across all stages.
    pub transcript: Vec<TranscriptEntry>,
    /// Append-only record of stage changes.
    pub stage_history: Vec<StageChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowSession {
    /// Create an active session positioned at the flow's initial stage.
    pub fn new(flow: &FlowDefinition) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            flow_id: flow.flow_id().to_string(),
            current_stage_id: flow.initial_stage_id().to_string(),
            turns_in_current_stage: 0,
            status: SessionStatus::Active,
            transcript: Vec::new(),
            stage_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Move to `target` status. Fails if the lifecycle does not allow it.
    pub(crate) fn set_status(&mut self, target: SessionStatus) -> Result<(), SessionStatus> {
        if !self.status.can_transition_to(target) {
            return Err(self.status);
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Enter `stage_id`, resetting the turn counter and recording the change.
    pub(crate) fn enter_stage(&mut self, stage_id: &str, kind: TransitionKind) {
        let now = Utc::now();
        self.stage_history.push(StageChange {
            from: std::mem::replace(&mut self.current_stage_id, stage_id.to_string()),
            to: stage_id.to_string(),
            kind,
            at: now,
        });
        self.turns_in_current_stage = 0;
        self.updated_at = now;
    }

    /// Ids of the stages left so far, in order (revisits included).
    pub fn completed_stages(&self) -> impl Iterator<Item = &str> {
        self.stage_history.iter().map(|c| c.from.as_str())
    }
}
