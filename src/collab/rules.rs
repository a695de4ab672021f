//! Deterministic keyword-rule evaluator.
//!
//! A criterion holds once any user message sent during the current visit to
//! the stage being judged contains one of its keywords (case-insensitive). Routing rules rank
//! candidate stages the same way. Useful wherever the semantic judge must be
//! replaced by something predictable.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::EvaluationError;
use crate::session::{Speaker, TranscriptEntry};

use super::{CompletionEvaluator, Evaluation, EvaluationRequest};

/// Keyword rules per criterion, plus keyword routes to candidate stages.
#[derive(Debug, Clone, Default)]
pub struct KeywordEvaluator {
    criteria: HashMap<String, Vec<String>>,
    routes: Vec<(String, String)>,
}

impl KeywordEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Satisfy `criterion` when any of `keywords` appears.
    pub fn with_criterion(mut self, criterion: impl Into<String>, keywords: &[&str]) -> Self {
        self.criteria.insert(
            criterion.into(),
            keywords.iter().map(|k| k.to_lowercase()).collect(),
        );
        self
    }

    /// Prefer `stage_id` when `keyword` appears. Routes are ranked in insertion order.
    pub fn with_route(mut self, keyword: &str, stage_id: impl Into<String>) -> Self {
        self.routes.push((keyword.to_lowercase(), stage_id.into()));
        self
    }

    /// User text from the current visit: the trailing run of entries tagged
    /// with `stage_id`. Earlier visits to a revisited stage do not count.
    fn stage_text(stage_id: &str, transcript: &[TranscriptEntry]) -> String {
        let visit = transcript
            .iter()
            .rev()
            .take_while(|e| e.stage_id == stage_id)
            .count();
        transcript[transcript.len() - visit..]
            .iter()
            .filter(|e| e.role == Speaker::User)
            .map(|e| e.text.to_lowercase())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl CompletionEvaluator for KeywordEvaluator {
    async fn evaluate(
        &self,
        request: EvaluationRequest<'_>,
    ) -> Result<Evaluation, EvaluationError> {
        let text = Self::stage_text(request.stage_id, request.transcript);

        let results = request
            .criteria
            .keys()
            .map(|name| {
                let hit = self
                    .criteria
                    .get(name)
                    .is_some_and(|keywords| keywords.iter().any(|k| text.contains(k.as_str())));
                (name.clone(), hit)
            })
            .collect();

        let preferred = self
            .routes
            .iter()
            .filter(|(keyword, stage_id)| {
                text.contains(keyword.as_str())
                    && request.candidates.iter().any(|c| c.stage_id == stage_id.as_str())
            })
            .map(|(_, stage_id)| stage_id.clone())
            .collect();

        Ok(Evaluation::new(results).with_preferred_next(preferred))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::collab::CandidateStage;

    #[tokio::test]
    async fn keywords_only_count_in_the_judged_stage() {
        let evaluator = KeywordEvaluator::new()
            .with_criterion("resolved", &["fixed", "works now"])
            .with_route("still broken", "problem");

        let transcript = vec![
            TranscriptEntry::new(Speaker::User, "It was FIXED before", "greeting"),
            TranscriptEntry::new(Speaker::Assistant, "fixed?", "resolution"),
            TranscriptEntry::new(Speaker::User, "hmm, still broken", "resolution"),
        ];
        let mut criteria = BTreeMap::new();
        criteria.insert("resolved".to_string(), "Issue resolved".to_string());
        criteria.insert("unknown".to_string(), "No rule for this one".to_string());

        let verdict = evaluator
            .evaluate(EvaluationRequest {
                stage_id: "resolution",
                stage_name: "Resolution",
                transcript: &transcript,
                criteria: &criteria,
                candidates: vec![
                    CandidateStage {
                        stage_id: "closing",
                        name: "Closing",
                    },
                    CandidateStage {
                        stage_id: "problem",
                        name: "Problem",
                    },
                ],
            })
            .await
            .unwrap();

        assert_eq!(verdict.criteria.get("resolved"), Some(&false));
        assert_eq!(verdict.criteria.get("unknown"), Some(&false));
        assert_eq!(verdict.preferred_next, vec!["problem"]);
    }

    #[tokio::test]
    async fn revisited_stage_ignores_earlier_visits() {
        let evaluator = KeywordEvaluator::new().with_criterion("error_seen", &["error"]);
        let transcript = vec![
            TranscriptEntry::new(Speaker::User, "I see an error", "collect"),
            TranscriptEntry::new(Speaker::Assistant, "Noted.", "collect"),
            TranscriptEntry::new(Speaker::User, "ok", "confirm"),
            TranscriptEntry::new(Speaker::Assistant, "Anything else?", "confirm"),
            TranscriptEntry::new(Speaker::User, "something unrelated", "collect"),
        ];
        let mut criteria = BTreeMap::new();
        criteria.insert("error_seen".to_string(), "An error was reported".to_string());

        let verdict = evaluator
            .evaluate(EvaluationRequest {
                stage_id: "collect",
                stage_name: "Collect",
                transcript: &transcript,
                criteria: &criteria,
                candidates: vec![CandidateStage {
                    stage_id: "confirm",
                    name: "Confirm",
                }],
            })
            .await
            .unwrap();
        assert_eq!(verdict.criteria.get("error_seen"), Some(&false));

        let verdict = evaluator
            .evaluate(EvaluationRequest {
                stage_id: "collect",
                stage_name: "Collect",
                transcript: &transcript[..1],
                criteria: &criteria,
                candidates: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(verdict.criteria.get("error_seen"), Some(&true));
    }
}
