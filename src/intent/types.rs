//! Intent Record and supporting types (spec.md §3 "Intent Record").

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentClass {
    QuickAnswer,
    Explanation,
    Analysis,
    Research,
}

impl IntentClass {
    /// `intent_weight(intent_class)` factor used by the token budget
    /// calculator (spec.md §4.2).
    pub fn weight(self) -> f64 {
        match self {
            IntentClass::QuickAnswer => 0.5,
            IntentClass::Explanation => 1.0,
            IntentClass::Analysis => 1.5,
            IntentClass::Research => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Rule,
    Llm,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    What,
    Who,
    Where,
    When,
    How,
    Why,
    Which,
    HowMuch,
    Statement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Date,
    Amount,
    SectionReference,
    Place,
    Organisation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub text: String,
}

/// Classification output consumed by the budget calculator (C2), agent
/// router (C4), and synthesiser (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRecord {
    pub intent_class: IntentClass,
    pub confidence: f64,
    pub method: Method,
    pub complexity_score: f64,
    pub detected_domains: Vec<String>,
    pub question_type: QuestionType,
    pub entities: Vec<Entity>,
    /// Rule-stage vote tally before the winning class was chosen, kept for
    /// diagnostics and tests (mirrors the teacher's
    /// `TaskComplexitySignals::active_signals()` diagnostic surface).
    pub raw_scores: HashMap<IntentClass, i32>,
}

impl IntentRecord {
    /// The canned fallback for an empty query (spec.md §4.1 edge case):
    /// `quick_answer`, complexity 1, confidence 0.
    pub fn empty_query_fallback() -> Self {
        Self {
            intent_class: IntentClass::QuickAnswer,
            confidence: 0.0,
            method: Method::Rule,
            complexity_score: 1.0,
            detected_domains: Vec::new(),
            question_type: QuestionType::Statement,
            entities: Vec::new(),
            raw_scores: HashMap::new(),
        }
    }

    /// `complexity_factor` derived from `complexity_score` via the
    /// piecewise-linear curve in spec.md §4.1, clamped to the [0.1, 2.0]
    /// range declared in §3 "Token Budget".
    pub fn complexity_factor(&self) -> f64 {
        // Linear map from [1, 10] to [0.1, 2.0]; outside that range the
        // score is clamped first so malformed LLM output can't produce an
        // out-of-range factor.
        let score = self.complexity_score.clamp(1.0, 10.0);
        let factor = 0.1 + (score - 1.0) * (2.0 - 0.1) / (10.0 - 1.0);
        factor.clamp(0.1, 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_factor_at_endpoints() {
        let mut rec = IntentRecord::empty_query_fallback();
        rec.complexity_score = 1.0;
        assert!((rec.complexity_factor() - 0.1).abs() < 1e-9);
        rec.complexity_score = 10.0;
        assert!((rec.complexity_factor() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn intent_weight_matches_spec_defaults() {
        assert_eq!(IntentClass::QuickAnswer.weight(), 0.5);
        assert_eq!(IntentClass::Explanation.weight(), 1.0);
        assert_eq!(IntentClass::Analysis.weight(), 1.5);
        assert_eq!(IntentClass::Research.weight(), 2.0);
    }
}
