//! SessionManager: owns live sessions and serializes turns per session.
//!
//! The session map sits behind an `RwLock` that is only held for lookups.
//! Each session has its own `Mutex`, so turns on one session never wait on
//! another session's model calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collab::{CompletionEvaluator, UtteranceGenerator};
use crate::config::SessionConfig;
use crate::error::{InactiveSessionError, NotFoundError, Result, TurnError};
use crate::flow::{FlowDefinition, FlowRegistry};
use crate::policy::TransitionPolicy;

use super::engine::{TurnEngine, TurnOutcome};
use super::state::{FlowSession, SessionStatus, TranscriptEntry};

/// A turn's result as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    pub session_id: Uuid,
    /// Display name of the stage the session is now in.
    pub stage_name: String,
    #[serde(flatten)]
    pub outcome: TurnOutcome,
}

/// Where a session currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatusView {
    pub session_id: Uuid,
    pub flow_id: String,
    pub stage_id: String,
    pub stage_name: String,
    pub turns_in_current_stage: u32,
    pub status: SessionStatus,
    /// The current stage's suggested user prompt, while the session is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_prompt: Option<String>,
}

type SessionHandle = Arc<Mutex<FlowSession>>;

/// Caller-facing API over flows and sessions.
pub struct SessionManager {
    registry: Arc<FlowRegistry>,
    engine: TurnEngine,
    config: SessionConfig,
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<FlowRegistry>,
        generator: Arc<dyn UtteranceGenerator>,
        evaluator: Arc<dyn CompletionEvaluator>,
        config: SessionConfig,
    ) -> Self {
        let engine = TurnEngine::new(
            generator,
            evaluator,
            TransitionPolicy::new(config.ungated_stages),
            config.call_timeout,
        );
        Self {
            registry,
            engine,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &FlowRegistry {
        &self.registry
    }

    /// Start a new session at the flow's initial stage.
    pub async fn create_session(&self, flow_id: &str) -> Result<Uuid> {
        let flow = self.registry.get(flow_id)?;
        let session = FlowSession::new(&flow);
        let session_id = session.session_id;
        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(session)));
        info!(
            session_id = %session_id,
            flow_id = %flow_id,
            stage = %flow.initial_stage_id(),
            "Session created"
        );
        Ok(session_id)
    }

    /// Run one turn, retrying transient collaborator failures with backoff.
    ///
    /// Concurrent calls on the same session are applied one after another.
    pub async fn advance(&self, session_id: Uuid, message: &str) -> Result<TurnReply> {
        let handle = self.handle(session_id).await?;
        let mut session = handle.lock().await;
        let flow = self.registry.get(&session.flow_id)?;

        let mut attempt: u32 = 0;
        loop {
            match self.engine.advance(&flow, &mut session, message).await {
                Ok(outcome) => {
                    let stage_name = stage_name(&flow, &outcome.stage_id);
                    return Ok(TurnReply {
                        session_id,
                        stage_name,
                        outcome,
                    });
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.retry_delay(attempt);
                    attempt += 1;
                    warn!(
                        session_id = %session_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient turn failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Exponential backoff from the base delay, plus up to 50% jitter.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_base_delay.as_millis() as u64;
        let backoff = base.saturating_mul(1u64 << attempt.min(16));
        let jitter = if backoff > 1 {
            rand::thread_rng().gen_range(0..=backoff / 2)
        } else {
            0
        };
        Duration::from_millis(backoff + jitter)
    }

    pub async fn get_status(&self, session_id: Uuid) -> Result<SessionStatusView> {
        let handle = self.handle(session_id).await?;
        let session = handle.lock().await;
        self.view(&session)
    }

    /// End an active session at the caller's request.
    pub async fn terminate(&self, session_id: Uuid) -> Result<SessionStatusView> {
        let handle = self.handle(session_id).await?;
        let mut session = handle.lock().await;
        session
            .set_status(SessionStatus::Terminated)
            .map_err(|status| InactiveSessionError { session_id, status })?;
        info!(
            session_id = %session_id,
            flow_id = %session.flow_id,
            stage = %session.current_stage_id,
            "Session terminated"
        );
        self.view(&session)
    }

    pub async fn transcript(&self, session_id: Uuid) -> Result<Vec<TranscriptEntry>> {
        let handle = self.handle(session_id).await?;
        let session = handle.lock().await;
        Ok(session.transcript.clone())
    }

    /// Copy of the full session state, e.g. for persistence.
    pub async fn snapshot(&self, session_id: Uuid) -> Result<FlowSession> {
        let handle = self.handle(session_id).await?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    /// Re-attach a previously snapshotted session.
    ///
    /// Its flow must be registered and its current stage must exist in that
    /// flow. A live session with the same id is replaced.
    pub async fn restore(&self, session: FlowSession) -> Result<Uuid> {
        let flow = self.registry.get(&session.flow_id)?;
        if flow.stage(&session.current_stage_id).is_none() {
            return Err(TurnError::UnknownStage {
                flow_id: session.flow_id.clone(),
                stage_id: session.current_stage_id.clone(),
            }
            .into());
        }
        let session_id = session.session_id;
        info!(
            session_id = %session_id,
            flow_id = %session.flow_id,
            stage = %session.current_stage_id,
            status = %session.status,
            "Session restored"
        );
        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(session)));
        Ok(session_id)
    }

    /// Drop a session, returning its final state.
    pub async fn remove(&self, session_id: Uuid) -> Result<FlowSession> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(&session_id)
            .ok_or(NotFoundError::Session(session_id))?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    /// Status of every live session, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionStatusView> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(handles.len());
        for handle in handles {
            sessions.push(handle.lock().await.clone());
        }
        sessions.sort_by_key(|s| s.created_at);
        sessions.iter().filter_map(|s| self.view(s).ok()).collect()
    }

    async fn handle(&self, session_id: Uuid) -> Result<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| NotFoundError::Session(session_id).into())
    }

    fn view(&self, session: &FlowSession) -> Result<SessionStatusView> {
        let flow = self.registry.get(&session.flow_id)?;
        let stage = flow
            .stage(&session.current_stage_id)
            .ok_or_else(|| TurnError::UnknownStage {
                flow_id: session.flow_id.clone(),
                stage_id: session.current_stage_id.clone(),
            })?;
        Ok(SessionStatusView {
            session_id: session.session_id,
            flow_id: session.flow_id.clone(),
            stage_id: stage.stage_id.clone(),
            stage_name: stage.name.clone(),
            turns_in_current_stage: session.turns_in_current_stage,
            status: session.status,
            suggested_prompt: session
                .is_active()
                .then(|| stage.user_instruction.clone())
                .flatten(),
        })
    }
}

fn stage_name(flow: &FlowDefinition, stage_id: &str) -> String {
    flow.stage(stage_id)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| stage_id.to_string())
}
