//! LLM client abstraction.
//!
//! Provides a unified interface for talking to the inference server(s) the
//! synthesiser (C7) and the intent analyser's LLM-fallback stage (C1) call
//! out to. Model *selection* and *routing* for domain agents lives in
//! `crate::agents`; this module only knows how to shape a request and parse
//! a response for a given provider.

mod client;
mod types;

pub use client::{AnthropicClient, ClientConfig, LLMClient, MultiProviderClient, OpenAIClient, TrackedClient};
pub use types::{
    CacheControl, ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker,
    EmbeddingRequest, EmbeddingResponse, ModelCosts, ModelSpec, ModelTier, Provider, StopReason,
    TokenUsage,
};
