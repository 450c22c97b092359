//! Context-Window & Overflow Manager (C8, spec.md §4.8): a pure function
//! deciding how much output a model call may request, and what to do when
//! the prompt plus requested output would overflow the window.

use crate::llm::ModelSpec;
use serde::{Deserialize, Serialize};

/// Overflow mitigation applied, in priority order, until the remaining
/// budget fits (spec.md §4.8 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    RerankChunks,
    SummarizeContext,
    ReduceAgents,
    ChunkedResponse,
}

impl OverflowStrategy {
    /// Answer-quality multiplier applied when this strategy is chosen,
    /// consumed by the synthesiser's metadata and by tests asserting
    /// "degrades in priority order" (spec.md §4.8, §8).
    pub fn quality(self) -> f64 {
        match self {
            OverflowStrategy::RerankChunks => 0.95,
            OverflowStrategy::SummarizeContext => 0.80,
            OverflowStrategy::ReduceAgents => 0.85,
            OverflowStrategy::ChunkedResponse => 1.00,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverflowDecision {
    pub strategy: OverflowStrategy,
    pub quality_factor: f64,
    /// Tokens no longer requested as output once this strategy is applied,
    /// i.e. `requested_output - adjusted_output` (spec.md §3 "Overflow
    /// Decision").
    pub tokens_saved: u32,
    /// What remains of `safe_max_output` after `adjusted_output` is spent —
    /// headroom still available to later stages of the same call.
    pub residual_budget: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub adjusted_output: u32,
    pub overflow_decision: Option<OverflowDecision>,
}

/// Rough token estimate used where an exact tokenizer isn't wired up: about
/// 4 characters per token, the same heuristic the teacher's cost-estimation
/// helpers use elsewhere in `llm`.
pub fn estimate_tokens(text: &str) -> u32 {
    ((text.chars().count() as f64) / 4.0).ceil() as u32
}

/// `fit(model, system_prompt, user_prompt, evidence_bundle, requested_output)
/// -> (adjusted_output, overflow_decision?)` (spec.md §4.8).
///
/// `evidence_chunk_count` drives whether `rerank_chunks` is eligible (needs
/// at least 5 chunks to have anything to drop).
pub fn fit(
    model: &ModelSpec,
    system_prompt: &str,
    user_prompt: &str,
    evidence_text: &str,
    evidence_chunk_count: usize,
    requested_output: u32,
    safety_factor: f64,
) -> FitResult {
    let prompt_tokens =
        estimate_tokens(system_prompt) + estimate_tokens(user_prompt) + estimate_tokens(evidence_text);
    let safe_output = model.safe_max_output(prompt_tokens, safety_factor);

    if requested_output <= safe_output {
        return FitResult {
            adjusted_output: requested_output,
            overflow_decision: None,
        };
    }

    // `chunked_response` is the strategy of last resort: if the prompt alone
    // already exhausts the safe window, no amount of chunk-dropping or
    // context-summarizing can make a single-turn answer fit, so gate on the
    // pre-clamp `safe_output` before applying the priority ladder.
    let strategy = if safe_output == 0 {
        OverflowStrategy::ChunkedResponse
    } else if evidence_chunk_count >= 5 {
        OverflowStrategy::RerankChunks
    } else if !evidence_text.is_empty() {
        OverflowStrategy::SummarizeContext
    } else {
        OverflowStrategy::ReduceAgents
    };

    // Whichever strategy is chosen, the caller must still not exceed
    // `safe_output`.
    let adjusted_output = safe_output.max(1).min(requested_output);

    FitResult {
        adjusted_output,
        overflow_decision: Some(OverflowDecision {
            strategy,
            quality_factor: strategy.quality(),
            tokens_saved: requested_output.saturating_sub(adjusted_output),
            residual_budget: safe_output.saturating_sub(adjusted_output),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_within_window_without_a_decision() {
        let model = ModelSpec::claude_sonnet();
        let result = fit(&model, "system", "user", "evidence", 3, 500, 0.8);
        assert!(result.overflow_decision.is_none());
        assert_eq!(result.adjusted_output, 500);
    }

    #[test]
    fn chooses_rerank_chunks_when_many_chunks_present() {
        let model = ModelSpec::test_small_window();
        let big_evidence = "word ".repeat(2000);
        let result = fit(&model, "system", "user", &big_evidence, 8, 4096, 0.8);
        let decision = result.overflow_decision.expect("should overflow");
        assert_eq!(decision.strategy, OverflowStrategy::RerankChunks);
        assert!((decision.quality_factor - 0.95).abs() < 1e-9);
        assert_eq!(decision.tokens_saved, 4096 - result.adjusted_output);
    }

    #[test]
    fn never_exceeds_safe_output() {
        let model = ModelSpec::test_small_window();
        let big_evidence = "word ".repeat(5000);
        let result = fit(&model, "system", "user", &big_evidence, 1, 4096, 0.8);
        let safe = model.safe_max_output(
            estimate_tokens("system") + estimate_tokens("user") + estimate_tokens(&big_evidence),
            0.8,
        );
        assert!(result.adjusted_output <= safe.max(1));
    }

    #[test]
    fn residual_budget_is_zero_once_output_is_capped_at_the_safe_limit() {
        let model = ModelSpec::test_small_window();
        let big_evidence = "word ".repeat(2000);
        let result = fit(&model, "system", "user", &big_evidence, 8, 4096, 0.8);
        let decision = result.overflow_decision.expect("should overflow");
        // adjusted_output is clamped to safe_output whenever an overflow decision
        // fires, so there is no headroom left over.
        assert_eq!(decision.residual_budget, 0);
        assert_eq!(decision.tokens_saved, 4096 - result.adjusted_output);
    }

    #[test]
    fn falls_back_to_chunked_response_when_nothing_fits() {
        let model = ModelSpec::test_small_window();
        let huge_prompt = "word ".repeat(20_000);
        let result = fit(&model, &huge_prompt, "user", "", 0, 4096, 0.8);
        let decision = result.overflow_decision.expect("should overflow");
        assert_eq!(decision.strategy, OverflowStrategy::ChunkedResponse);
    }
}
