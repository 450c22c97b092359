//! LLM Synthesiser (C7, spec.md §4.7): assembles the prompt, calls the
//! model, and resolves citation markers against the evidence/agent sources
//! it was given — never against anything the model invented.

mod citations;
mod prompt;

pub use citations::{resolve_citations, SourceCandidate};
pub use prompt::{AgentFinding, PromptBuilder};

use crate::budget::BudgetSnapshot;
use crate::domain::{EvidenceChunk, Source};
use crate::error::Result;
use crate::intent::IntentRecord;
use crate::llm::LLMClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `{content, sources, metadata}` (spec.md §4.7 "Answer shape").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub content: String,
    pub sources: Vec<Source>,
    pub metadata: AnswerMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub model: String,
    pub intent: crate::intent::IntentClass,
    pub complexity: f64,
    pub duration_ms: u64,
    pub allocated_tokens: u32,
    /// Full budget factor decomposition behind `allocated_tokens` (spec.md
    /// §4.7 "metadata", §4.2 "the calculator records the full factor
    /// breakdown in the snapshot").
    pub breakdown: BudgetSnapshot,
}

pub struct Synthesiser {
    client: Arc<dyn LLMClient>,
    builder: PromptBuilder,
}

impl Synthesiser {
    pub fn new(client: Arc<dyn LLMClient>, language: impl Into<String>) -> Self {
        Self {
            client,
            builder: PromptBuilder::new(language),
        }
    }

    /// `synthesise(query, evidence, agent_results, intent, budget_snapshot,
    /// model_name) -> Answer` (spec.md §4.7). Resolves citations against the
    /// evidence chunks and agent-declared sources it was given; fails with
    /// `Error::DataIntegrity` rather than dropping an unresolved marker.
    pub async fn synthesise(
        &self,
        query: &str,
        evidence: &[EvidenceChunk],
        findings: &[AgentFinding],
        intent: &IntentRecord,
        budget: &BudgetSnapshot,
        model_name: &str,
    ) -> Result<Answer> {
        let started = std::time::Instant::now();

        let request = self
            .builder
            .build(query, evidence, findings, model_name, budget.budget);

        let response = self.client.complete(request).await?;

        let candidates = Self::candidates_from(evidence, findings);
        let sources = resolve_citations(&response.content, &candidates)?;

        Ok(Answer {
            content: response.content,
            sources,
            metadata: AnswerMetadata {
                model: response.model,
                intent: intent.intent_class,
                complexity: intent.complexity_score,
                duration_ms: started.elapsed().as_millis() as u64,
                allocated_tokens: budget.budget,
                breakdown: budget.clone(),
            },
        })
    }

    fn candidates_from(evidence: &[EvidenceChunk], findings: &[AgentFinding]) -> Vec<SourceCandidate> {
        let mut candidates: Vec<SourceCandidate> = evidence
            .iter()
            .map(|chunk| SourceCandidate {
                source_id: chunk.chunk_id.clone(),
                kind: crate::domain::SourceKind::Generic,
                formatted_reference: chunk
                    .metadata
                    .title
                    .clone()
                    .unwrap_or_else(|| chunk.document_id.clone()),
                document_id: Some(chunk.document_id.clone()),
                url: chunk.metadata.url.clone(),
            })
            .collect();

        for finding in findings {
            for source_id in &finding.sources {
                if !candidates.iter().any(|c| &c.source_id == source_id) {
                    candidates.push(SourceCandidate {
                        source_id: source_id.clone(),
                        kind: crate::domain::SourceKind::Generic,
                        formatted_reference: source_id.clone(),
                        document_id: None,
                        url: None,
                    });
                }
            }
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetStage;
    use crate::intent::{IntentClass, Method, QuestionType};
    use crate::llm::{CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelSpec, Provider};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeClient {
        content: String,
    }

    #[async_trait]
    impl LLMClient for FakeClient {
        async fn complete(&self, _request: crate::llm::CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                id: "r1".to_string(),
                model: "test-model".to_string(),
                content: self.content.clone(),
                stop_reason: None,
                usage: Default::default(),
                timestamp: chrono::Utc::now(),
                cost: None,
            })
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            unimplemented!("not used by these tests")
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            vec![ModelSpec::claude_sonnet()]
        }
    }

    fn intent() -> IntentRecord {
        IntentRecord {
            intent_class: IntentClass::Explanation,
            confidence: 0.9,
            method: Method::Rule,
            complexity_score: 4.0,
            detected_domains: Vec::new(),
            question_type: QuestionType::What,
            entities: Vec::new(),
            raw_scores: HashMap::new(),
        }
    }

    fn budget() -> BudgetSnapshot {
        BudgetSnapshot {
            stage: BudgetStage::Final,
            budget: 1000,
            base_tokens: 600,
            complexity_factor: 1.0,
            chunk_bonus: 1.0,
            source_multiplier: 1.0,
            agent_factor: 1.0,
            intent_weight: 1.0,
            user_preference: 1.0,
            confidence_adjustment: 1.0,
            taken_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn synthesises_an_answer_with_resolved_sources() {
        let chunk = crate::domain::EvidenceChunk {
            chunk_id: "c-1".to_string(),
            document_id: "doc-1".to_string(),
            content: "text".to_string(),
            metadata: crate::domain::EvidenceMetadata::default(),
            source: crate::domain::EvidenceSource::Vector,
            raw_score: 1.0,
            rrf_rank: 1,
            fused_score: 1.0,
            rerank_score: None,
            confidence: 0.9,
            retrieved_at: chrono::Utc::now(),
        };
        let client = Arc::new(FakeClient {
            content: "The rule applies {cite:c-1}.".to_string(),
        });
        let synthesiser = Synthesiser::new(client, "en");
        let answer = synthesiser
            .synthesise("What rule applies?", &[chunk], &[], &intent(), &budget(), "test-model")
            .await
            .unwrap();
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].number, 1);
    }

    #[tokio::test]
    async fn fails_loudly_on_unresolved_citation() {
        let client = Arc::new(FakeClient {
            content: "Claim {cite:unknown}.".to_string(),
        });
        let synthesiser = Synthesiser::new(client, "en");
        let result = synthesiser
            .synthesise("q", &[], &[], &intent(), &budget(), "test-model")
            .await;
        assert!(result.is_err());
    }
}
