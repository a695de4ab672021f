//! Interactive chat REPL that drives one session over a line-based reader.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::Result;
use crate::policy::TerminateReason;
use crate::session::{SessionManager, TransitionKind, TurnReply};

/// How a chat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatExit {
    /// The flow reached its end.
    Completed,
    /// The user typed `/quit` (the session is terminated).
    Quit,
    /// Input closed before the flow finished.
    Eof,
}

/// Run a chat over `flow_id`, reading user lines from `input` and writing
/// replies to `out`.
///
/// Commands: `/quit` ends the session, `/status` prints where it stands.
pub async fn run_chat<R, W>(
    manager: &SessionManager,
    flow_id: &str,
    input: R,
    out: &mut W,
) -> Result<ChatExit>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let session_id = manager.create_session(flow_id).await?;
    let status = manager.get_status(session_id).await?;
    print_line(out, &format!("[{}]", status.stage_name));
    if let Some(prompt) = status.suggested_prompt {
        print_line(out, &format!("💡 {prompt}"));
    }
    prompt(out);

    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line.trim().to_string(),
            Ok(None) => return Ok(ChatExit::Eof),
            Err(e) => {
                tracing::error!("Error reading input: {}", e);
                return Ok(ChatExit::Eof);
            }
        };

        match line.as_str() {
            "" => {
                prompt(out);
                continue;
            }
            "/quit" => {
                manager.terminate(session_id).await?;
                return Ok(ChatExit::Quit);
            }
            "/status" => {
                let status = manager.get_status(session_id).await?;
                print_line(
                    out,
                    &format!(
                        "ℹ️  {} ({}), turn {} of this stage, {}",
                        status.stage_name,
                        status.stage_id,
                        status.turns_in_current_stage,
                        status.status
                    ),
                );
                prompt(out);
                continue;
            }
            _ => {}
        }

        match manager.advance(session_id, &line).await {
            Ok(reply) => {
                render_reply(out, &reply);
                if reply.outcome.completion.is_some() {
                    return Ok(ChatExit::Completed);
                }
            }
            // The session is unchanged; the user can simply try again.
            Err(e) if e.is_transient() => print_line(out, &format!("⏳ {e}")),
            Err(e) => return Err(e),
        }
        prompt(out);
    }
}

fn render_reply<W: Write>(out: &mut W, reply: &TurnReply) {
    print_line(out, &format!("\n{}\n", reply.outcome.utterance));
    if let Some(ref transition) = reply.outcome.transition {
        let why = match transition.kind {
            TransitionKind::Criteria => "criteria met",
            TransitionKind::TurnLimit => "turn limit",
        };
        print_line(out, &format!("→ [{}] ({why})", reply.stage_name));
    }
    if let Some(ref prompt) = reply.outcome.suggested_prompt {
        print_line(out, &format!("💡 {prompt}"));
    }
    match reply.outcome.completion {
        Some(TerminateReason::CriteriaMet) => print_line(out, "✅ Conversation complete."),
        Some(TerminateReason::TurnLimit) => {
            print_line(out, "✅ Conversation complete (turn limit reached).")
        }
        None => {}
    }
}

// Output failures on a terminal are not actionable; ignore them.
fn print_line<W: Write>(out: &mut W, text: &str) {
    let _ = writeln!(out, "{text}");
}

fn prompt<W: Write>(out: &mut W) {
    let _ = write!(out, "> ");
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SessionConfig;
    use crate::flow::FlowRegistry;
    use crate::flow::definition::tests::{flow, stage};
    use crate::session::SessionStatus;
    use crate::session::engine::tests::{EchoGenerator, ScriptedEvaluator};

    fn manager() -> SessionManager {
        let mut first = stage("welcome", &["goodbye"], 1);
        first.user_prompt = Some("Introduce yourself.".to_string());
        let mut registry = FlowRegistry::new();
        registry
            .register_config(flow(
                "chat",
                "welcome",
                vec![first, stage("goodbye", &[], 1)],
            ))
            .unwrap();
        SessionManager::new(
            Arc::new(registry),
            Arc::new(EchoGenerator::default()),
            Arc::new(ScriptedEvaluator::default()),
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn chat_runs_flow_to_completion() {
        let manager = manager();
        let mut out = Vec::new();
        let exit = run_chat(&manager, "chat", &b"hello\n\n/status\nbye\nignored\n"[..], &mut out)
            .await
            .unwrap();
        assert_eq!(exit, ChatExit::Completed);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[WELCOME]"));
        assert!(text.contains("💡 Introduce yourself."));
        assert!(text.contains("reply 1 to: hello"));
        assert!(text.contains("→ [GOODBYE] (criteria met)"));
        assert!(text.contains("GOODBYE (goodbye), turn 0"));
        assert!(text.contains("✅ Conversation complete."));
        assert!(!text.contains("ignored"));
    }

    #[tokio::test]
    async fn quit_terminates_session() {
        let manager = manager();
        let mut out = Vec::new();
        let exit = run_chat(&manager, "chat", &b"/quit\n"[..], &mut out)
            .await
            .unwrap();
        assert_eq!(exit, ChatExit::Quit);

        let sessions = manager.list_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Terminated);
    }

    #[tokio::test]
    async fn unknown_flow_is_an_error() {
        let manager = manager();
        let mut out = Vec::new();
        assert!(run_chat(&manager, "missing", &b""[..], &mut out).await.is_err());
    }
}
