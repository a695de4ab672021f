//! Collaborator interfaces consumed by the turn engine.
//!
//! The engine never talks to a model directly: it asks an
//! [`UtteranceGenerator`] for the next assistant message and a
//! [`CompletionEvaluator`] whether a stage's criteria hold. Both are narrow
//! async traits so a deterministic rule engine can stand in for the model.

pub mod llm;
pub mod rules;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EvaluationError, GenerationError};
use crate::session::TranscriptEntry;

pub use llm::{LlmEvaluator, LlmGenerator};
pub use rules::KeywordEvaluator;

/// Produces the next assistant utterance.
#[async_trait]
pub trait UtteranceGenerator: Send + Sync {
    async fn generate(
        &self,
        system_instruction: &str,
        transcript: &[TranscriptEntry],
    ) -> Result<String, GenerationError>;
}

/// A stage the conversation may move to next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateStage<'a> {
    pub stage_id: &'a str,
    pub name: &'a str,
}

/// Input to a completion evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationRequest<'a> {
    /// Stage being judged.
    pub stage_id: &'a str,
    pub stage_name: &'a str,
    pub transcript: &'a [TranscriptEntry],
    /// Criterion name → description.
    pub criteria: &'a BTreeMap<String, String>,
    /// Candidate next stages in preference order. Empty for terminal stages.
    pub candidates: Vec<CandidateStage<'a>>,
}

/// Per-criterion verdict, plus an optional ranking of candidate next stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub criteria: BTreeMap<String, bool>,
    /// Stage ids the evaluator prefers, best first. May be empty.
    #[serde(default)]
    pub preferred_next: Vec<String>,
}

impl Evaluation {
    pub fn new(criteria: BTreeMap<String, bool>) -> Self {
        Self {
            criteria,
            preferred_next: Vec::new(),
        }
    }

    /// Verdict used for stages without criteria: nothing to judge, nothing ranked.
    pub fn vacuous() -> Self {
        Self::default()
    }

    pub fn with_preferred_next(mut self, preferred: Vec<String>) -> Self {
        self.preferred_next = preferred;
        self
    }

    /// Whether every named criterion was reported true. Missing names count as false.
    pub fn all_satisfied<'a, I>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        names
            .into_iter()
            .all(|name| self.criteria.get(name).copied().unwrap_or(false))
    }

    /// Names from `required` that the evaluation did not report on.
    pub fn missing<'a>(&self, required: &'a BTreeMap<String, String>) -> Vec<&'a str> {
        required
            .keys()
            .filter(|name| !self.criteria.contains_key(*name))
            .map(String::as_str)
            .collect()
    }
}

/// Judges whether a stage's completion criteria are met.
///
/// Must never be called for a stage without criteria.
#[async_trait]
pub trait CompletionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        request: EvaluationRequest<'_>,
    ) -> Result<Evaluation, EvaluationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(names: &[&str]) -> BTreeMap<String, String> {
        names
            .iter()
            .map(|n| (n.to_string(), format!("{n} holds")))
            .collect()
    }

    #[test]
    fn all_satisfied_requires_every_name() {
        let required = criteria(&["a", "b"]);
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), true);
        let partial = Evaluation::new(results.clone());
        assert!(!partial.all_satisfied(required.keys()));
        assert_eq!(partial.missing(&required), vec!["b"]);

        results.insert("b".to_string(), true);
        let full = Evaluation::new(results);
        assert!(full.all_satisfied(required.keys()));
        assert!(full.missing(&required).is_empty());
    }

    #[test]
    fn vacuous_satisfies_nothing_required() {
        let none: BTreeMap<String, String> = BTreeMap::new();
        assert!(Evaluation::vacuous().all_satisfied(none.keys()));
    }
}
