//! Pipeline Factory (C6, spec.md §4.6): wires every component into the
//! full request dataflow. Grounded on the teacher's
//! `OrchestratorBuilder`/`OrchestrationRoutingRuntime::for_mode` split — a
//! durable factory holding process-wide shared resources, and a fresh
//! per-request `Pipeline` built from it for every incoming query.

mod runner;

pub use runner::{AgentStepRunner, PersistingSink};

use crate::agents::{AgentContext, AgentRegistry};
use crate::budget::{self, BudgetInputs, BudgetStage, BUDGET_MIN, DEFAULT_BASE_TOKENS};
use crate::config::Config;
use crate::context_window;
use crate::domain::{EvidenceSource, Plan, PlanStatus, SecurityLevel, Step, StepType};
use crate::error::{Error, Result};
use crate::executor::{CancellationToken, PauseToken, StateSink, StepExecutor, StepRunner};
use crate::intent::{IntentClassifier, IntentRecord};
use crate::llm::LLMClient;
use crate::retrieval::{HybridRetriever, RetrievalRequest};
use crate::store::{ConsistencyHint, StateStore};
use crate::streaming::{self, StreamEvent, StreamPublisher, StreamSubscriber};
use crate::synthesis::{Answer, AnswerMetadata, PromptBuilder, Synthesiser};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One incoming request (spec.md §4.6 "Request context").
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub query_text: String,
    pub language: String,
    pub security_level: SecurityLevel,
    pub user_preference: f64,
}

impl RequestContext {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            query_text: query_text.into(),
            language: "de".to_string(),
            security_level: SecurityLevel::Public,
            user_preference: 1.0,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    pub fn with_user_preference(mut self, preference: f64) -> Self {
        self.user_preference = preference;
        self
    }
}

/// Durable, process-wide shared resources (spec.md §3 "Lifecycle/Ownership"
/// — every backend here outlives any one request and is reused across
/// them), constructed once at startup.
pub struct PipelineFactory {
    config: Config,
    intent_classifier: Arc<IntentClassifier>,
    retriever: Arc<HybridRetriever>,
    registry: Arc<AgentRegistry>,
    llm: Arc<dyn LLMClient>,
    store: Arc<dyn StateStore>,
}

impl PipelineFactory {
    pub fn new(
        config: Config,
        intent_classifier: Arc<IntentClassifier>,
        retriever: Arc<HybridRetriever>,
        registry: Arc<AgentRegistry>,
        llm: Arc<dyn LLMClient>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            intent_classifier,
            retriever,
            registry,
            llm,
            store,
        }
    }

    /// Builds a fresh per-request `Pipeline`: its own stream channel and
    /// cancellation token, sharing every durable backend by `Arc` (spec.md
    /// §3 "a fresh runtime object per request, owning no shared state").
    pub fn create_pipeline(&self, context: RequestContext) -> (Pipeline, StreamSubscriber) {
        let (publisher, subscriber) = streaming::channel(self.config.stream_queue_capacity);
        let pipeline = Pipeline {
            config: self.config.clone(),
            intent_classifier: self.intent_classifier.clone(),
            retriever: self.retriever.clone(),
            registry: self.registry.clone(),
            llm: self.llm.clone(),
            store: self.store.clone(),
            context,
            publisher,
            cancellation: CancellationToken::new(),
            pause: PauseToken::new(),
        };
        (pipeline, subscriber)
    }

    /// Capabilities introspection (spec.md §6 "available models ..., available
    /// agents ..., feature flags ..."): a snapshot of what this deployment can
    /// currently do, independent of any one request.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            models: self.llm.available_models(),
            agents: self.registry.handles(),
            feature_flags: FeatureFlags {
                hybrid_search: self.config.enable_hybrid_search,
                query_expansion: self.config.enable_query_expansion,
                reranking: self.config.enable_reranking,
                streaming: true,
            },
        }
    }

    /// Liveness (spec.md §6 "Health: liveness (always cheap)"): the process
    /// can answer at all. Never touches a backend.
    pub fn is_alive(&self) -> bool {
        true
    }

    /// Readiness (spec.md §6 "Health: readiness (every shared resource
    /// check: data stores, LLM, retriever index)"). Touches the state store
    /// with a cheap listing call; the retriever and LLM checks are
    /// in-memory only (no network round trip), matching the "cheap" framing
    /// for liveness while still covering every shared resource readiness
    /// names.
    pub async fn readiness(&self) -> ReadinessReport {
        let store_ready = self
            .store
            .list_plans(&crate::store::PlanFilters::default())
            .await
            .is_ok();
        ReadinessReport {
            store: store_ready,
            retriever: self.retriever.is_ready(),
            llm: !self.llm.available_models().is_empty(),
        }
    }
}

/// Result of [`PipelineFactory::capabilities`].
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub models: Vec<crate::llm::ModelSpec>,
    pub agents: Vec<crate::agents::AgentHandle>,
    pub feature_flags: FeatureFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureFlags {
    pub hybrid_search: bool,
    pub query_expansion: bool,
    pub reranking: bool,
    pub streaming: bool,
}

/// Result of [`PipelineFactory::readiness`]. `true` on every field means the
/// deployment can serve a request end to end.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessReport {
    pub store: bool,
    pub retriever: bool,
    pub llm: bool,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.store && self.retriever && self.llm
    }
}

/// Per-request runtime object (spec.md §4.6). Owns nothing durable; every
/// field either is cloned from the factory's `Arc`s or is scoped to this one
/// request.
pub struct Pipeline {
    config: Config,
    intent_classifier: Arc<IntentClassifier>,
    retriever: Arc<HybridRetriever>,
    registry: Arc<AgentRegistry>,
    llm: Arc<dyn LLMClient>,
    store: Arc<dyn StateStore>,
    context: RequestContext,
    publisher: StreamPublisher,
    cancellation: CancellationToken,
    pause: PauseToken,
}

impl Pipeline {
    pub fn request_id(&self) -> Uuid {
        self.context.request_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Stops launching new steps; steps already running are allowed to
    /// finish (spec.md §4.5 "Pause/Resume").
    pub fn pause(&self) {
        self.pause.pause();
    }

    /// Re-enters the scheduling loop after a `pause()`.
    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Runs the full C1 -> C10 dataflow for this request and returns the
    /// synthesised answer. Emits stream events throughout; on failure,
    /// publishes one final `StreamEvent::Error` before propagating.
    pub async fn run(&self) -> Result<Answer> {
        match self.run_inner().await {
            Ok(answer) => Ok(answer),
            Err(err) => {
                let _ = self
                    .publisher
                    .publish(StreamEvent::Error {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    })
                    .await;
                Err(err)
            }
        }
    }

    async fn run_inner(&self) -> Result<Answer> {
        let started = std::time::Instant::now();
        info!(request_id = %self.context.request_id, "pipeline started");

        let _ = self
            .publisher
            .publish(StreamEvent::Status {
                stage: "intent".to_string(),
                progress: 0.0,
            })
            .await;

        if self.context.query_text.trim().is_empty() {
            let intent = IntentRecord::empty_query_fallback();
            let answer = Self::empty_query_answer(&intent);
            let _ = self
                .publisher
                .publish(StreamEvent::Sources {
                    sources: answer.sources.clone(),
                })
                .await;
            return Ok(answer);
        }

        let intent = self
            .intent_classifier
            .analyse(&self.context.query_text, &self.context.language)
            .await;

        let model = self
            .llm
            .available_models()
            .into_iter()
            .next()
            .ok_or_else(|| Error::resource_unavailable("llm", "no model configured"))?;

        let initial_budget = budget::calculate(
            BudgetStage::Initial,
            self.config.token_base,
            &BudgetInputs {
                intent: &intent,
                chunk_count: 0,
                source_kinds_present: &[],
                agent_count: 0,
                user_preference: self.context.user_preference,
                confidence_hint: Some(intent.confidence),
            },
        );
        tracing::debug!(budget = initial_budget.budget, "initial token budget");

        let _ = self
            .publisher
            .publish(StreamEvent::Status {
                stage: "retrieval".to_string(),
                progress: 15.0,
            })
            .await;

        let retrieval_query = if self.config.enable_query_expansion {
            self.expand_query(&self.context.query_text, &model.id).await
        } else {
            self.context.query_text.clone()
        };

        let mut retrieval_request = RetrievalRequest::new(retrieval_query, self.config.vector_top_k);
        retrieval_request.use_sparse = self.config.enable_sparse;
        retrieval_request.weight_vector = self.config.rrf_weight_vector;
        retrieval_request.weight_sparse = self.config.rrf_weight_sparse;
        retrieval_request.weight_graph = self.config.rrf_weight_graph;

        let (evidence, diagnostics) = self.retriever.retrieve(retrieval_request).await;
        for backend in &diagnostics.failed_backends {
            let _ = self
                .publisher
                .publish(StreamEvent::Metadata {
                    data: [(
                        "degraded_backend".to_string(),
                        serde_json::json!(backend),
                    )]
                    .into_iter()
                    .collect(),
                })
                .await;
        }

        let source_kinds: Vec<EvidenceSource> = evidence.iter().map(|c| c.source).collect();

        let post_retrieval_budget = budget::calculate(
            BudgetStage::PostRetrieval,
            self.config.token_base,
            &BudgetInputs {
                intent: &intent,
                chunk_count: evidence.len(),
                source_kinds_present: &source_kinds,
                agent_count: 0,
                user_preference: self.context.user_preference,
                confidence_hint: Some(intent.confidence),
            },
        );

        let _ = self
            .publisher
            .publish(StreamEvent::Status {
                stage: "planning".to_string(),
                progress: 30.0,
            })
            .await;

        let plan = self.build_plan(&intent);
        let plan_id = plan.plan_id;
        self.store
            .create_plan(&plan, ConsistencyHint::BestEffort)
            .await?;

        let _ = self
            .publisher
            .publish(StreamEvent::Status {
                stage: "agents".to_string(),
                progress: 45.0,
            })
            .await;

        let agent_context = AgentContext {
            detected_domains: intent.detected_domains.clone(),
            language: self.context.language.clone(),
        };
        let runner = Arc::new(AgentStepRunner::new(
            self.registry.clone(),
            agent_context,
            post_retrieval_budget.budget,
        ));
        let sink = Arc::new(PersistingSink::new(
            self.store.clone(),
            ConsistencyHint::BestEffort,
        ));
        let executor = StepExecutor::new(
            self.config.worker_pool_size,
            self.config.retry,
            self.config.grace_period_ms,
        );

        let plan_result = executor
            .execute_with_pause(
                plan,
                runner.clone() as Arc<dyn StepRunner>,
                Some(sink.clone() as Arc<dyn StateSink>),
                self.cancellation.clone(),
                self.pause.clone(),
            )
            .await?;

        if plan_result.status == PlanStatus::Cancelled {
            return Err(Error::Cancelled);
        }

        let agent_results = runner.results().await;
        for (_, result) in &agent_results {
            self.store.append_step_result(result).await?;
        }

        let findings: Vec<crate::synthesis::AgentFinding> = agent_results
            .iter()
            .map(|(agent_id, result)| crate::synthesis::AgentFinding {
                agent_id: agent_id.clone(),
                summary: Self::summarize(&result.result_data),
                sources: result.sources.clone(),
            })
            .collect();

        let confidence_hint = if agent_results.is_empty() {
            intent.confidence
        } else {
            agent_results.iter().map(|(_, r)| r.confidence).sum::<f64>() / agent_results.len() as f64
        };

        let final_budget = budget::calculate(
            BudgetStage::Final,
            self.config.token_base,
            &BudgetInputs {
                intent: &intent,
                chunk_count: evidence.len(),
                source_kinds_present: &source_kinds,
                agent_count: agent_results.len(),
                user_preference: self.context.user_preference,
                confidence_hint: Some(confidence_hint),
            },
        );

        let _ = self
            .publisher
            .publish(StreamEvent::Status {
                stage: "synthesis".to_string(),
                progress: 75.0,
            })
            .await;

        let prompt_builder = PromptBuilder::new(self.context.language.clone());
        let probe = prompt_builder.build(
            &self.context.query_text,
            &evidence,
            &findings,
            model.id.clone(),
            final_budget.budget,
        );
        let system_text = probe.system.clone().unwrap_or_default();
        let user_text = probe
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let evidence_text = evidence
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let fit_result = context_window::fit(
            &model,
            &system_text,
            &user_text,
            &evidence_text,
            evidence.len(),
            final_budget.budget,
            self.config.safety_factor,
        );

        if let Some(decision) = &fit_result.overflow_decision {
            let _ = self
                .publisher
                .publish(StreamEvent::Metadata {
                    data: [
                        ("overflow_strategy".to_string(), serde_json::json!(decision.strategy)),
                        ("overflow_quality".to_string(), serde_json::json!(decision.quality_factor)),
                        ("overflow_tokens_saved".to_string(), serde_json::json!(decision.tokens_saved)),
                    ]
                    .into_iter()
                    .collect(),
                })
                .await;
        }

        let mut adjusted_budget = final_budget.clone();
        adjusted_budget.budget = fit_result.adjusted_output;

        let synthesiser = Synthesiser::new(self.llm.clone(), self.context.language.clone());
        let answer = synthesiser
            .synthesise(
                &self.context.query_text,
                &evidence,
                &findings,
                &intent,
                &adjusted_budget,
                &model.id,
            )
            .await?;

        let _ = self
            .publisher
            .publish(StreamEvent::Sources {
                sources: answer.sources.clone(),
            })
            .await;
        let _ = self
            .publisher
            .publish(StreamEvent::Metadata {
                data: [
                    ("model".to_string(), serde_json::json!(answer.metadata.model)),
                    ("duration_ms".to_string(), serde_json::json!(answer.metadata.duration_ms)),
                    (
                        "allocated_tokens".to_string(),
                        serde_json::json!(answer.metadata.allocated_tokens),
                    ),
                ]
                .into_iter()
                .collect(),
            })
            .await;

        self.store
            .append_log(&crate::domain::ExecutionLogEntry {
                plan_id,
                timestamp: chrono::Utc::now(),
                event_type: "synthesis_completed".to_string(),
                agent_id: None,
                payload: serde_json::json!({ "duration_ms": started.elapsed().as_millis() as u64 }),
                error: None,
            })
            .await?;

        info!(
            request_id = %self.context.request_id,
            plan_id = %plan_id,
            duration_ms = started.elapsed().as_millis() as u64,
            "pipeline completed"
        );

        Ok(answer)
    }

    /// Builds one analysis step per detected domain, run in parallel; a
    /// query with no detected domain still gets a single general step so
    /// the DAG is never empty (spec.md §4.4 "Selection").
    fn build_plan(&self, intent: &IntentRecord) -> Plan {
        let domains = if intent.detected_domains.is_empty() {
            vec!["general".to_string()]
        } else {
            intent.detected_domains.clone()
        };

        let plan_id = Uuid::new_v4();
        let steps: Vec<Step> = domains
            .iter()
            .enumerate()
            .map(|(i, domain)| {
                Step::new(
                    plan_id,
                    i as u32,
                    format!("analyse-{domain}"),
                    format!("analyse {domain}"),
                    StepType::Analysis,
                )
                .with_capabilities(vec![domain.clone()])
                .with_parallel_group("analysis")
                .with_input_ref(&self.context.query_text)
            })
            .collect();

        Plan {
            plan_id,
            research_question: self.context.query_text.clone(),
            status: PlanStatus::Pending,
            uds3_databases: Vec::new(),
            security_level: self.context.security_level,
            total_steps: steps.len() as u32,
            steps,
        }
    }

    /// Query expansion (spec.md §4.1/§6 `ENABLE_QUERY_EXPANSION`, default
    /// off: "2-10s LLM overhead documented"). When enabled, asks the model
    /// for a handful of related terms/phrasings and appends them to the
    /// retrieval query so the sparse/dense backends see more surface area
    /// to match against. Falls back to the original query text on any LLM
    /// error — expansion is a recall aid, never a hard dependency.
    async fn expand_query(&self, query_text: &str, model_id: &str) -> String {
        let request = crate::llm::CompletionRequest::new()
            .with_model(model_id)
            .with_system(
                "Given a German-language research question, list up to 5 closely related \
                 terms or rephrasings, comma-separated, no explanation.",
            )
            .with_message(crate::llm::ChatMessage::user(query_text))
            .with_max_tokens(64)
            .with_temperature(0.0);
        match self.llm.complete(request).await {
            Ok(response) if !response.content.trim().is_empty() => {
                format!("{query_text} {}", response.content.trim())
            }
            Ok(_) => query_text.to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "query expansion failed, using original query");
                query_text.to_string()
            }
        }
    }

    fn summarize(value: &serde_json::Value) -> String {
        value
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| value.to_string())
    }

    fn empty_query_answer(intent: &IntentRecord) -> Answer {
        let breakdown = budget::calculate(
            BudgetStage::Final,
            DEFAULT_BASE_TOKENS,
            &BudgetInputs {
                intent,
                chunk_count: 0,
                source_kinds_present: &[],
                agent_count: 0,
                user_preference: 1.0,
                confidence_hint: Some(intent.confidence),
            },
        );
        Answer {
            content: "Please provide a question to research.".to_string(),
            sources: Vec::new(),
            metadata: AnswerMetadata {
                model: "n/a".to_string(),
                intent: intent.intent_class,
                complexity: intent.complexity_score,
                duration_ms: 0,
                allocated_tokens: breakdown.budget,
                breakdown,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentHandle, AgentHealth};
    use crate::domain::StepResult;
    use crate::llm::{
        ChatRole, CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelSpec, Provider,
        TokenUsage,
    };
    use async_trait::async_trait;

    struct FakeAgent {
        handle: AgentHandle,
    }

    #[async_trait]
    impl Agent for FakeAgent {
        fn handle(&self) -> AgentHandle {
            self.handle.clone()
        }

        async fn execute(
            &self,
            step: &Step,
            _context: &AgentContext,
            _budget_hint: u32,
        ) -> Result<StepResult> {
            Ok(StepResult {
                plan_id: step.plan_id,
                step_id: step.step_id.clone(),
                result_data: serde_json::json!("the statute applies"),
                confidence: 0.9,
                quality: 0.9,
                sources: vec!["c-1".to_string()],
                recorded_at: chrono::Utc::now(),
            })
        }
    }

    struct FakeLLMClient;

    #[async_trait]
    impl LLMClient for FakeLLMClient {
        async fn complete(
            &self,
            request: crate::llm::CompletionRequest,
        ) -> Result<CompletionResponse> {
            assert!(matches!(request.messages[0].role, ChatRole::User));
            Ok(CompletionResponse {
                id: "r1".to_string(),
                model: "test-small-window".to_string(),
                content: "The rule applies {cite:c-1}.".to_string(),
                stop_reason: None,
                usage: TokenUsage::default(),
                timestamp: chrono::Utc::now(),
                cost: None,
            })
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            unimplemented!("not exercised by pipeline tests")
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            vec![ModelSpec::test_small_window()]
        }
    }

    fn factory() -> PipelineFactory {
        let config = Config::default();
        let registry = Arc::new(AgentRegistry::new());
        registry.register(Arc::new(FakeAgent {
            handle: AgentHandle::new("agent-1", "general")
                .with_capability("general")
                .with_health(AgentHealth::Healthy),
        }));
        PipelineFactory::new(
            config.clone(),
            Arc::new(IntentClassifier::new(config)),
            Arc::new(HybridRetriever::new(Config::default())),
            registry,
            Arc::new(FakeLLMClient),
            Arc::new(crate::store::SqliteStateStore::in_memory().unwrap()),
        )
    }

    #[tokio::test]
    async fn empty_query_short_circuits_without_touching_backends() {
        let factory = factory();
        let (pipeline, _subscriber) = factory.create_pipeline(RequestContext::new(""));
        let answer = pipeline.run().await.unwrap();
        assert!(answer.sources.is_empty());
        assert_eq!(answer.metadata.allocated_tokens, BUDGET_MIN);
    }

    #[tokio::test]
    async fn runs_end_to_end_with_no_retrieval_backends_configured() {
        let factory = factory();
        let (pipeline, mut subscriber) = factory.create_pipeline(RequestContext::new("What rule applies?"));

        let handle = tokio::spawn(async move { pipeline.run().await });

        let mut saw_status = false;
        while let Some(event) = subscriber.recv().await {
            if matches!(event, StreamEvent::Status { .. }) {
                saw_status = true;
            }
        }
        assert!(saw_status);

        let answer = handle.await.unwrap().unwrap();
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].number, 1);
    }

    #[test]
    fn capabilities_reports_registered_agents_models_and_flags() {
        let factory = factory();
        let capabilities = factory.capabilities();
        assert_eq!(capabilities.agents.len(), 1);
        assert_eq!(capabilities.agents[0].id, "agent-1");
        assert_eq!(capabilities.models.len(), 1);
        assert!(capabilities.feature_flags.hybrid_search);
        assert!(!capabilities.feature_flags.query_expansion);
    }

    #[test]
    fn liveness_is_always_true() {
        assert!(factory().is_alive());
    }

    #[tokio::test]
    async fn readiness_reflects_store_retriever_and_llm_state() {
        let factory = factory();
        let report = factory.readiness().await;
        assert!(report.store);
        assert!(report.llm);
        // No vector/sparse/graph backend is wired up in this test factory.
        assert!(!report.retriever);
        assert!(!report.is_ready());
    }

    struct CountingExpansionClient {
        completions: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl LLMClient for CountingExpansionClient {
        async fn complete(
            &self,
            request: crate::llm::CompletionRequest,
        ) -> Result<CompletionResponse> {
            self.completions.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let content = if request.max_tokens == Some(64) {
                "Ermessensfehler, Verwaltungsakt".to_string()
            } else {
                "The rule applies {cite:c-1}.".to_string()
            };
            Ok(CompletionResponse {
                id: "r1".to_string(),
                model: "test-small-window".to_string(),
                content,
                stop_reason: None,
                usage: TokenUsage::default(),
                timestamp: chrono::Utc::now(),
                cost: None,
            })
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            unimplemented!("not exercised by these tests")
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            vec![ModelSpec::test_small_window()]
        }
    }

    #[tokio::test]
    async fn query_expansion_appends_related_terms_when_enabled() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(Arc::new(FakeAgent {
            handle: AgentHandle::new("agent-1", "general")
                .with_capability("general")
                .with_health(AgentHealth::Healthy),
        }));
        let config = Config::default().with_query_expansion(true);
        let llm = Arc::new(CountingExpansionClient {
            completions: std::sync::atomic::AtomicUsize::new(0),
        });
        let factory = PipelineFactory::new(
            config.clone(),
            Arc::new(IntentClassifier::new(config)),
            Arc::new(HybridRetriever::new(Config::default())),
            registry,
            llm.clone(),
            Arc::new(crate::store::SqliteStateStore::in_memory().unwrap()),
        );
        let (pipeline, _subscriber) = factory.create_pipeline(RequestContext::new("Was ist eine Genehmigung?"));
        let answer = pipeline.run().await.unwrap();
        assert_eq!(answer.sources.len(), 1);
        // One call for expansion, one for synthesis.
        assert_eq!(llm.completions.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pause_then_resume_lets_a_paused_pipeline_finish() {
        let factory = factory();
        let (pipeline, _subscriber) = factory.create_pipeline(RequestContext::new("What rule applies?"));
        pipeline.pause();
        assert!(pipeline.is_paused());
        pipeline.resume();
        assert!(!pipeline.is_paused());
        let answer = pipeline.run().await.unwrap();
        assert_eq!(answer.sources.len(), 1);
    }
}
