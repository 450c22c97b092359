//! Prompt assembly (spec.md §4.7 "Prompt assembly"): system prompt, evidence
//! block, agent-result block, and task block, in that order.

use crate::domain::EvidenceChunk;
use crate::llm::{ChatMessage, CompletionRequest};

/// A normalised per-agent key point with its own sources, ready to drop into
/// the agent-result block.
#[derive(Debug, Clone)]
pub struct AgentFinding {
    pub agent_id: String,
    pub summary: String,
    pub sources: Vec<String>,
}

pub struct PromptBuilder {
    language: String,
}

impl PromptBuilder {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are an assistant answering in {lang}. Cite every factual claim with a \
             {{cite:<source_id>}} marker placed at the claim boundary. Use only the source ids \
             given in the evidence and agent-result blocks below; never invent one.",
            lang = self.language
        )
    }

    fn evidence_block(&self, evidence: &[EvidenceChunk]) -> String {
        if evidence.is_empty() {
            return "No evidence chunks were retrieved.".to_string();
        }
        let mut block = String::from("Evidence:\n");
        for chunk in evidence {
            block.push_str(&format!(
                "- [{id}] (doc {doc}): {content}\n",
                id = chunk.chunk_id,
                doc = chunk.document_id,
                content = chunk.content
            ));
        }
        block
    }

    fn agent_result_block(&self, findings: &[AgentFinding]) -> String {
        if findings.is_empty() {
            return String::new();
        }
        let mut block = String::from("\nAgent findings:\n");
        for finding in findings {
            block.push_str(&format!(
                "- [{agent}] {summary} (sources: {sources})\n",
                agent = finding.agent_id,
                summary = finding.summary,
                sources = finding.sources.join(", ")
            ));
        }
        block
    }

    /// Assembles the full `CompletionRequest` for one synthesis call
    /// (spec.md §4.7). `max_output` is the budget-and-window-adjusted cap
    /// computed by `crate::context_window::fit`.
    pub fn build(
        &self,
        query: &str,
        evidence: &[EvidenceChunk],
        findings: &[AgentFinding],
        model: impl Into<String>,
        max_output: u32,
    ) -> CompletionRequest {
        let user_prompt = format!(
            "{evidence}{agents}\nQuestion: {query}",
            evidence = self.evidence_block(evidence),
            agents = self.agent_result_block(findings),
            query = query
        );

        CompletionRequest::new()
            .with_model(model)
            .with_system(self.system_prompt())
            .with_message(ChatMessage::user(user_prompt))
            .with_max_tokens(max_output)
            .with_temperature(0.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_block_lists_every_chunk_id() {
        let builder = PromptBuilder::new("de");
        let evidence = vec![crate::domain::EvidenceChunk {
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
        }];
        let block = builder.evidence_block(&evidence);
        assert!(block.contains("c-1"));
    }

    #[test]
    fn empty_evidence_does_not_panic() {
        let builder = PromptBuilder::new("en");
        let request = builder.build("What is X?", &[], &[], "model", 500);
        assert_eq!(request.max_tokens, Some(500));
    }
}
