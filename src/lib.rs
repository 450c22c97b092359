//! # veritas-core
//!
//! Multi-agent retrieval-augmented research engine for German
//! administrative, legal, and environmental domains: classifies a query's
//! intent and complexity, retrieves evidence from vector/sparse/graph
//! backends, routes the work across a registry of domain agents, and
//! synthesises a cited answer under a token budget that respects every
//! model's context window.
//!
//! ## Core Components
//!
//! - **Intent & Complexity Analyser** ([`intent`]): classifies a query into
//!   an [`intent::IntentRecord`] consumed by every downstream stage.
//! - **Token Budget Calculator** ([`budget`]): a pure function turning
//!   intent, evidence, and agent counts into a token allowance.
//! - **Hybrid Retriever** ([`retrieval`]): dense + sparse + graph search
//!   fused with Reciprocal Rank Fusion, with optional cross-encoder rerank.
//! - **Agent Registry** ([`agents`]): capability-matched routing across
//!   domain agents.
//! - **Step Executor** ([`executor`]): a DAG engine running a research
//!   plan's steps under a bounded worker pool with retry and cancellation.
//! - **Context-Window & Overflow Manager** ([`context_window`]): decides how
//!   much output a model call may request and what to do when it wouldn't
//!   fit.
//! - **LLM Synthesiser** ([`synthesis`]): assembles the prompt, calls the
//!   model, and resolves citation markers against real evidence.
//! - **Streaming Channel** ([`streaming`]): per-request NDJSON event
//!   publication.
//! - **State Store** ([`store`]): persists research plans and their results
//!   behind a SQLite-primary, JSON-fallback pair.
//! - **Pipeline Factory** ([`pipeline`]): wires every component above into
//!   the full request dataflow.

pub mod agents;
pub mod budget;
pub mod config;
pub mod context_window;
pub mod domain;
pub mod error;
pub mod executor;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod retrieval;
pub mod store;
pub mod streaming;
pub mod synthesis;

pub use agents::{Agent, AgentContext, AgentHandle, AgentHealth, AgentRegistry, Capability};
pub use budget::{BudgetInputs, BudgetSnapshot, BudgetStage};
pub use config::{Config, RetryPolicy};
pub use context_window::{estimate_tokens, fit, FitResult, OverflowDecision, OverflowStrategy};
pub use domain::{
    EvidenceChunk, EvidenceMetadata, EvidenceSource, ExecutionLogEntry, Plan, PlanSnapshot,
    PlanStatus, QuerySession, RunStatus, SecurityLevel, Source, SourceKind, Step, StepResult,
    StepStatus, StepType,
};
pub use error::{Error, Result};
pub use executor::{CancellationToken, PauseToken, PlanResult, StateSink, StepExecutor, StepRunner};
pub use intent::{Entity, EntityKind, IntentClass, IntentClassifier, IntentRecord, Method, QuestionType};
pub use llm::{
    AnthropicClient, CacheControl, ChatMessage, ChatRole, ClientConfig, CompletionRequest,
    CompletionResponse, CostTracker, EmbeddingRequest, EmbeddingResponse, LLMClient, ModelCosts,
    ModelSpec, ModelTier, MultiProviderClient, OpenAIClient, Provider, StopReason, TokenUsage,
    TrackedClient,
};
pub use pipeline::{
    AgentStepRunner, Capabilities, FeatureFlags, PersistingSink, Pipeline, PipelineFactory,
    ReadinessReport, RequestContext,
};
pub use retrieval::{
    BackendHit, Bm25Index, CrossEncoder, Filters, GraphBackend, HybridRetriever,
    InMemorySparseBackend, RetrievalDiagnostics, RetrievalRequest, SparseBackend, VectorBackend,
};
pub use store::{
    ConsistencyHint, FallbackStore, PlanFilters, ResilientStateStore, SqliteStateStore, StateStore,
};
pub use streaming::{channel, StreamEvent, StreamPublisher, StreamSubscriber};
pub use synthesis::{AgentFinding, Answer, AnswerMetadata, PromptBuilder, Synthesiser};
