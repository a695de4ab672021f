//! Conversation sessions: state, the turn engine and the manager that owns them.

pub mod engine;
pub mod manager;
pub mod state;

pub use engine::{StageTransition, TurnEngine, TurnOutcome};
pub use manager::{SessionManager, SessionStatusView, TurnReply};
pub use state::{FlowSession, SessionStatus, Speaker, StageChange, TranscriptEntry, TransitionKind};
