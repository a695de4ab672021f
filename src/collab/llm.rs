//! LLM-backed generator and evaluator.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{EvaluationError, GenerationError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::session::{Speaker, TranscriptEntry};

use super::{CompletionEvaluator, Evaluation, EvaluationRequest, UtteranceGenerator};

/// Sampling settings for the assistant's replies.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Generates assistant utterances with a chat completion call.
pub struct LlmGenerator {
    llm: Arc<dyn LlmProvider>,
    config: GeneratorConfig,
}

impl LlmGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }
}

fn to_chat_message(entry: &TranscriptEntry) -> ChatMessage {
    match entry.role {
        Speaker::User => ChatMessage::user(&entry.text),
        Speaker::Assistant => ChatMessage::assistant(&entry.text),
    }
}

#[async_trait]
impl UtteranceGenerator for LlmGenerator {
    async fn generate(
        &self,
        system_instruction: &str,
        transcript: &[TranscriptEntry],
    ) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(ChatMessage::system(system_instruction));
        messages.extend(transcript.iter().map(to_chat_message));

        let request = CompletionRequest::new(messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);
        let response = self.llm.complete(request).await?;

        let text = response.content.trim();
        if text.is_empty() {
            return Err(GenerationError::Permanent(
                "model returned an empty utterance".to_string(),
            ));
        }
        Ok(text.to_string())
    }
}

/// Judges stage criteria by asking the model for a JSON verdict.
pub struct LlmEvaluator {
    llm: Arc<dyn LlmProvider>,
}

impl LlmEvaluator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    criteria: BTreeMap<String, bool>,
    #[serde(default)]
    next_stage: Option<String>,
}

/// Build the judging prompt for a stage.
pub fn evaluation_prompt(request: &EvaluationRequest<'_>) -> String {
    let conversation: String = request
        .transcript
        .iter()
        .map(|e| {
            let who = match e.role {
                Speaker::User => "User",
                Speaker::Assistant => "Assistant",
            };
            format!("{who}: {}", e.text)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let criteria: String = request
        .criteria
        .iter()
        .map(|(name, description)| format!("- {name}: {description}"))
        .collect::<Vec<_>>()
        .join("\n");

    let candidates = if request.candidates.is_empty() {
        "This is the final stage; use null for next_stage.".to_string()
    } else {
        let list = request
            .candidates
            .iter()
            .map(|c| format!("- {} ({})", c.stage_id, c.name))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "If the criteria are met, pick the stage the conversation should move to next:\n{list}"
        )
    };

    format!(
        "You are evaluating whether a conversation has met the completion criteria for a stage.\n\n\
         Conversation stage: {stage}\n\n\
         Conversation so far:\n{conversation}\n\n\
         Completion criteria:\n{criteria}\n\n\
         {candidates}\n\n\
         Respond with ONLY a JSON object, no explanation or markdown formatting:\n\
         {{\"criteria\": {{\"<criterion name>\": true | false, ...}}, \"next_stage\": \"<stage id>\" | null}}\n\
         Report every criterion listed above. A criterion that is only partially met is false.",
        stage = request.stage_name,
    )
}

/// Extract the outermost JSON object from a model response (which might be
/// wrapped in markdown fences or prose).
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a model verdict and check it covers every criterion.
pub fn parse_verdict(
    response: &str,
    request: &EvaluationRequest<'_>,
) -> Result<Evaluation, EvaluationError> {
    let json = extract_json_object(response).ok_or_else(|| {
        EvaluationError::Permanent(format!("no JSON object in evaluator response: {response}"))
    })?;
    let raw: RawVerdict = serde_json::from_str(json)
        .map_err(|e| EvaluationError::Permanent(format!("malformed evaluator verdict: {e}")))?;

    let criteria: BTreeMap<String, bool> = raw
        .criteria
        .into_iter()
        .filter(|(name, _)| request.criteria.contains_key(name))
        .collect();

    let evaluation = Evaluation::new(criteria);
    let missing = evaluation.missing(request.criteria);
    if !missing.is_empty() {
        return Err(EvaluationError::Permanent(format!(
            "evaluator verdict is missing criteria: {}",
            missing.join(", ")
        )));
    }

    let preferred: Vec<String> = match raw.next_stage {
        Some(id) if request.candidates.iter().any(|c| c.stage_id == id) => vec![id],
        Some(id) => {
            debug!(next_stage = %id, "Evaluator suggested a stage that is not a candidate");
            Vec::new()
        }
        None => Vec::new(),
    };

    Ok(evaluation.with_preferred_next(preferred))
}

#[async_trait]
impl CompletionEvaluator for LlmEvaluator {
    async fn evaluate(
        &self,
        request: EvaluationRequest<'_>,
    ) -> Result<Evaluation, EvaluationError> {
        let prompt = evaluation_prompt(&request);
        let llm_request = CompletionRequest::new(vec![
            ChatMessage::system("You are a strict conversation judge. Output only valid JSON."),
            ChatMessage::user(prompt),
        ])
        .with_temperature(0.0)
        .with_max_tokens(256);

        let response = self.llm.complete(llm_request).await?;
        parse_verdict(&response.content, &request).inspect_err(|e| {
            warn!(stage = request.stage_name, error = %e, "Rejected evaluator verdict");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::collab::CandidateStage;
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, Role};

    /// Stub provider that replays canned responses and records requests.
    struct CannedLlm {
        reply: Result<String, u16>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl CannedLlm {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn status(code: u16) -> Self {
            Self {
                reply: Err(code),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedLlm {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.seen.lock().unwrap().push(request);
            match &self.reply {
                Ok(text) => Ok(CompletionResponse {
                    content: text.clone(),
                    input_tokens: 0,
                    output_tokens: 0,
                }),
                Err(status) if *status >= 500 => Err(LlmError::RequestFailed {
                    provider: "canned".to_string(),
                    reason: format!("HTTP {status}"),
                }),
                Err(status) => Err(LlmError::Rejected {
                    provider: "canned".to_string(),
                    reason: format!("HTTP {status}"),
                }),
            }
        }
    }

    fn entry(role: Speaker, text: &str) -> TranscriptEntry {
        TranscriptEntry::new(role, text, "problem")
    }

    fn criteria() -> BTreeMap<String, String> {
        let mut c = BTreeMap::new();
        c.insert("details".to_string(), "Problem details are known".to_string());
        c.insert("severity".to_string(), "Severity is clear".to_string());
        c
    }

    fn request<'a>(
        transcript: &'a [TranscriptEntry],
        criteria: &'a BTreeMap<String, String>,
    ) -> EvaluationRequest<'a> {
        EvaluationRequest {
            stage_id: "problem",
            stage_name: "Problem Identification",
            transcript,
            criteria,
            candidates: vec![
                CandidateStage {
                    stage_id: "solution",
                    name: "Solution",
                },
                CandidateStage {
                    stage_id: "escalation",
                    name: "Escalation",
                },
            ],
        }
    }

    #[tokio::test]
    async fn generator_sends_instruction_and_transcript() {
        let llm = Arc::new(CannedLlm::ok("  How can I help?  "));
        let generator = LlmGenerator::new(llm.clone(), GeneratorConfig::default());
        let transcript = vec![entry(Speaker::User, "hi")];

        let text = generator.generate("Be kind.", &transcript).await.unwrap();
        assert_eq!(text, "How can I help?");

        let seen = llm.seen.lock().unwrap();
        let messages = &seen[0].messages;
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "Be kind.");
        assert_eq!(messages[1], ChatMessage::user("hi"));
    }

    #[tokio::test]
    async fn generator_classifies_provider_failures() {
        let generator =
            LlmGenerator::new(Arc::new(CannedLlm::status(503)), GeneratorConfig::default());
        let err = generator.generate("x", &[]).await.unwrap_err();
        assert!(err.is_transient());

        let generator =
            LlmGenerator::new(Arc::new(CannedLlm::status(400)), GeneratorConfig::default());
        let err = generator.generate("x", &[]).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn evaluator_parses_fenced_verdict_and_ranking() {
        let llm = Arc::new(CannedLlm::ok(
            "```json\n{\"criteria\": {\"details\": true, \"severity\": true}, \"next_stage\": \"escalation\"}\n```",
        ));
        let evaluator = LlmEvaluator::new(llm.clone());
        let transcript = vec![entry(Speaker::User, "my router is on fire")];
        let criteria = criteria();

        let verdict = evaluator
            .evaluate(request(&transcript, &criteria))
            .await
            .unwrap();
        assert!(verdict.all_satisfied(criteria.keys()));
        assert_eq!(verdict.preferred_next, vec!["escalation"]);

        let seen = llm.seen.lock().unwrap();
        let prompt = &seen[0].messages[1].content;
        assert!(prompt.contains("User: my router is on fire"));
        assert!(prompt.contains("- details: Problem details are known"));
        assert!(prompt.contains("- escalation (Escalation)"));
    }

    #[test]
    fn verdict_with_unknown_next_stage_has_no_ranking() {
        let criteria = criteria();
        let verdict = parse_verdict(
            r#"{"criteria": {"details": false, "severity": true, "extra": true}, "next_stage": "closing"}"#,
            &request(&[], &criteria),
        )
        .unwrap();
        assert!(!verdict.all_satisfied(criteria.keys()));
        assert!(verdict.preferred_next.is_empty());
        assert!(!verdict.criteria.contains_key("extra"));
    }

    #[test]
    fn incomplete_or_garbled_verdict_is_permanent() {
        let criteria = criteria();
        let missing = parse_verdict(r#"{"criteria": {"details": true}}"#, &request(&[], &criteria))
            .unwrap_err();
        assert!(matches!(missing, EvaluationError::Permanent(ref m) if m.contains("severity")));

        let garbled = parse_verdict("COMPLETE: solution", &request(&[], &criteria)).unwrap_err();
        assert!(!garbled.is_transient());
    }
}
