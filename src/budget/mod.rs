//! Token Budget Calculator (C2): a pure function of its inputs, no async, no
//! I/O, no fallible path — the formula itself cannot fail (spec.md §4.2).

use crate::domain::EvidenceSource;
use crate::intent::IntentRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point in the pipeline at which a `BudgetSnapshot` was taken. The plan
/// accumulates a `Vec<BudgetSnapshot>` history across stages, the same way
/// the teacher's `TrackedClient` accumulates `CostTracker` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStage {
    Initial,
    PostRetrieval,
    Final,
}

/// Full factor breakdown behind one budget figure, recorded for
/// observability and for the "never exceeds clamps" guarantee's tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub stage: BudgetStage,
    pub budget: u32,
    pub base_tokens: u32,
    pub complexity_factor: f64,
    pub chunk_bonus: f64,
    pub source_multiplier: f64,
    pub agent_factor: f64,
    pub intent_weight: f64,
    pub user_preference: f64,
    pub confidence_adjustment: f64,
    pub taken_at: DateTime<Utc>,
}

/// `source_multiplier(source_kinds_present)`: 1.0 for a single evidence
/// source kind, 1.2 when a second kind contributes, 1.4 for a third or more
/// (spec.md §4.2 defaults).
pub fn source_multiplier(source_kinds_present: &[EvidenceSource]) -> f64 {
    let distinct = source_kinds_present
        .iter()
        .collect::<std::collections::HashSet<_>>()
        .len();
    match distinct {
        0 | 1 => 1.0,
        2 => 1.2,
        _ => 1.4,
    }
}

/// Inputs to `calculate`, bundled to keep the function signature manageable
/// (spec.md §4.2 `calculate(query, intent, chunk_count, source_kinds_present,
/// agent_count, user_pref, confidence_hint?)`).
#[derive(Debug, Clone)]
pub struct BudgetInputs<'a> {
    pub intent: &'a IntentRecord,
    pub chunk_count: usize,
    pub source_kinds_present: &'a [EvidenceSource],
    pub agent_count: usize,
    pub user_preference: f64,
    pub confidence_hint: Option<f64>,
}

/// `base_tokens` default (spec.md §4.2).
pub const DEFAULT_BASE_TOKENS: u32 = 600;
pub const BUDGET_MIN: u32 = 250;
pub const BUDGET_MAX: u32 = 4000;

/// `confidence_adjustment`, clamped to `[0.8, 1.2]`. Absent a hint, a
/// neutral `1.0` is used so the factor is a no-op.
fn confidence_adjustment(confidence_hint: Option<f64>) -> f64 {
    confidence_hint.unwrap_or(1.0).clamp(0.8, 1.2)
}

/// `calculate(...) -> BudgetSnapshot` (spec.md §4.2). Deterministic, pure,
/// clamps the result to `[250, 4000]`.
pub fn calculate(stage: BudgetStage, base_tokens: u32, inputs: &BudgetInputs<'_>) -> BudgetSnapshot {
    let complexity_factor = inputs.intent.complexity_factor();
    let chunk_bonus = 1.0 + (inputs.chunk_count.min(20) as f64) * 0.08;
    let source_multiplier = source_multiplier(inputs.source_kinds_present);
    let agent_factor = 1.0 + 0.15 * inputs.agent_count as f64;
    let intent_weight = inputs.intent.intent_class.weight();
    let user_preference = inputs.user_preference;
    let confidence_adjustment = confidence_adjustment(inputs.confidence_hint);

    let raw = base_tokens as f64
        * complexity_factor
        * chunk_bonus
        * source_multiplier
        * agent_factor
        * intent_weight
        * user_preference
        * confidence_adjustment;

    let budget = (raw.round() as i64).clamp(BUDGET_MIN as i64, BUDGET_MAX as i64) as u32;

    BudgetSnapshot {
        stage,
        budget,
        base_tokens,
        complexity_factor,
        chunk_bonus,
        source_multiplier,
        agent_factor,
        intent_weight,
        user_preference,
        confidence_adjustment,
        taken_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{IntentClass, Method, QuestionType};
    use std::collections::HashMap;

    fn intent(class: IntentClass, complexity_score: f64) -> IntentRecord {
        IntentRecord {
            intent_class: class,
            confidence: 0.9,
            method: Method::Rule,
            complexity_score,
            detected_domains: Vec::new(),
            question_type: QuestionType::What,
            entities: Vec::new(),
            raw_scores: HashMap::new(),
        }
    }

    #[test]
    fn clamps_to_configured_minimum() {
        let rec = intent(IntentClass::QuickAnswer, 1.0);
        let inputs = BudgetInputs {
            intent: &rec,
            chunk_count: 0,
            source_kinds_present: &[],
            agent_count: 0,
            user_preference: 1.0,
            confidence_hint: None,
        };
        let snapshot = calculate(BudgetStage::Initial, DEFAULT_BASE_TOKENS, &inputs);
        assert_eq!(snapshot.budget, BUDGET_MIN);
    }

    #[test]
    fn clamps_to_configured_maximum() {
        let rec = intent(IntentClass::Research, 10.0);
        let inputs = BudgetInputs {
            intent: &rec,
            chunk_count: 20,
            source_kinds_present: &[
                EvidenceSource::Vector,
                EvidenceSource::Sparse,
                EvidenceSource::Graph,
            ],
            agent_count: 5,
            user_preference: 1.5,
            confidence_hint: Some(1.2),
        };
        let snapshot = calculate(BudgetStage::Final, DEFAULT_BASE_TOKENS, &inputs);
        assert_eq!(snapshot.budget, BUDGET_MAX);
    }

    #[test]
    fn source_multiplier_steps_match_spec_defaults() {
        assert_eq!(source_multiplier(&[EvidenceSource::Vector]), 1.0);
        assert_eq!(
            source_multiplier(&[EvidenceSource::Vector, EvidenceSource::Sparse]),
            1.2
        );
        assert_eq!(
            source_multiplier(&[
                EvidenceSource::Vector,
                EvidenceSource::Sparse,
                EvidenceSource::Graph
            ]),
            1.4
        );
    }

    #[test]
    fn is_deterministic_for_identical_inputs() {
        let rec = intent(IntentClass::Explanation, 5.0);
        let inputs = BudgetInputs {
            intent: &rec,
            chunk_count: 8,
            source_kinds_present: &[EvidenceSource::Vector, EvidenceSource::Sparse],
            agent_count: 2,
            user_preference: 1.0,
            confidence_hint: Some(1.0),
        };
        let a = calculate(BudgetStage::PostRetrieval, DEFAULT_BASE_TOKENS, &inputs);
        let b = calculate(BudgetStage::PostRetrieval, DEFAULT_BASE_TOKENS, &inputs);
        assert_eq!(a.budget, b.budget);
    }

    #[test]
    fn confidence_adjustment_is_clamped() {
        assert_eq!(confidence_adjustment(Some(5.0)), 1.2);
        assert_eq!(confidence_adjustment(Some(-5.0)), 0.8);
        assert_eq!(confidence_adjustment(None), 1.0);
    }

    proptest::proptest! {
        /// `budget` never leaves `[BUDGET_MIN, BUDGET_MAX]` regardless of how
        /// extreme the inputs are (spec.md §4.2 "clamped to [250, 4000]").
        #[test]
        fn budget_always_stays_within_configured_bounds(
            complexity_score in 1.0f64..=10.0,
            chunk_count in 0usize..=200,
            agent_count in 0usize..=50,
            user_preference in 0.0f64..=5.0,
            confidence_hint in 0.0f64..=5.0,
        ) {
            let rec = intent(IntentClass::Research, complexity_score);
            let inputs = BudgetInputs {
                intent: &rec,
                chunk_count,
                source_kinds_present: &[EvidenceSource::Vector, EvidenceSource::Sparse, EvidenceSource::Graph],
                agent_count,
                user_preference,
                confidence_hint: Some(confidence_hint),
            };
            let snapshot = calculate(BudgetStage::Initial, DEFAULT_BASE_TOKENS, &inputs);
            prop_assert!(snapshot.budget >= BUDGET_MIN);
            prop_assert!(snapshot.budget <= BUDGET_MAX);
        }
    }
}
