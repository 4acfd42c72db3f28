//! Retrieval-augmented generation for one post.
//!
//! `Validating -> Retrieving -> Merging -> Generating -> Verifying -> Enhancing -> Done`,
//! with a `Fallback` branch to the template generator when retrieval finds nothing,
//! the primary generator fails, or none of a remote draft's claims can be verified.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use postgen_config::{FeatureToggles, RetrievalSettings};
use postgen_observability::{log_feature, log_stage, MetricsContext};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::api_client::ApiError;
use super::enhancement::{default_enhancements, Enhancement, EnhancementContext};
use super::generation::{GenerationInput, Generator, RemoteGenerator, TemplateGenerator};
use super::keyword_index::KeywordIndex;
use super::scoring::{merge_and_rank, DefaultScoreModel, ScoreModel, ScoreWeights};
use super::source_clients::{Embedder, GenerationClient};
use super::strategies::{HybridStrategy, KeywordStrategy, RetrievalStrategy, SemanticStrategy};
use super::vector_index::{VectorIndex, VectorIndexError};
use super::verification::ClaimVerifier;
use crate::models::{Document, Draft, GenerationRequest, RagStage, RetrievalQuery, RetrievalResult, VerificationReport};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("No retrieval strategies configured")]
    NoStrategies,

    #[error("No corpus configured for ingestion")]
    NoCorpus,

    #[error("All retrieval strategies failed: {}", .0.join("; "))]
    AllStrategiesFailed(Vec<String>),

    #[error("Strategy '{strategy}' failed: {message}")]
    Strategy { strategy: String, message: String },

    #[error("Strategy '{0}' timed out")]
    Timeout(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Primary generation failed ({primary}); fallback failed ({fallback})")]
    GenerationFailed { primary: String, fallback: String },

    #[error("Cancelled")]
    Cancelled,
}

/// A strategy whose results were dropped from this call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyFailure {
    pub strategy: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagOutput {
    pub draft: Draft,
    /// Merged results the draft was generated from, best first
    pub sources: Vec<RetrievalResult>,
    pub verification: VerificationReport,
    pub stages: Vec<RagStage>,
    pub used_fallback: bool,
    pub strategy_failures: Vec<StrategyFailure>,
}

/// Indexes that `ingest` writes to
struct Corpus {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<VectorIndex>,
    keywords: Arc<KeywordIndex>,
}

pub struct RagOrchestrator {
    strategies: Vec<Arc<dyn RetrievalStrategy>>,
    primary: Option<Arc<dyn Generator>>,
    fallback: Arc<dyn Generator>,
    verifier: ClaimVerifier,
    enhancements: Vec<Arc<dyn Enhancement>>,
    score_model: Arc<dyn ScoreModel>,
    weights: ScoreWeights,
    settings: RetrievalSettings,
    toggles: FeatureToggles,
    metrics: MetricsContext,
    corpus: Option<Corpus>,
}

impl RagOrchestrator {
    /// Orchestrator with no strategies and the template generator only
    pub fn new(settings: RetrievalSettings, metrics: MetricsContext) -> Self {
        Self {
            strategies: Vec::new(),
            primary: None,
            fallback: Arc::new(TemplateGenerator::new()),
            verifier: ClaimVerifier::default(),
            enhancements: default_enhancements(),
            score_model: Arc::new(DefaultScoreModel::default()),
            weights: ScoreWeights::from(&settings),
            settings,
            toggles: FeatureToggles::default(),
            metrics,
            corpus: None,
        }
    }

    /// Semantic, keyword and hybrid retrieval over a local corpus, with remote
    /// generation when a client is given
    pub fn standard(
        settings: RetrievalSettings,
        toggles: FeatureToggles,
        metrics: MetricsContext,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<VectorIndex>,
        keywords: Arc<KeywordIndex>,
        generation: Option<GenerationClient>,
    ) -> Self {
        let semantic: Arc<dyn RetrievalStrategy> =
            Arc::new(SemanticStrategy::new(Arc::clone(&embedder), Arc::clone(&vectors)));
        let keyword: Arc<dyn RetrievalStrategy> = Arc::new(KeywordStrategy::new(Arc::clone(&keywords)));
        let hybrid: Arc<dyn RetrievalStrategy> =
            Arc::new(HybridStrategy::new(Arc::clone(&semantic), Arc::clone(&keyword)));

        let mut orchestrator = Self::new(settings, metrics)
            .with_toggles(toggles)
            .with_strategy(semantic)
            .with_strategy(keyword)
            .with_strategy(hybrid)
            .with_corpus(embedder, vectors, keywords);

        if let Some(client) = generation {
            orchestrator = orchestrator.with_primary(Arc::new(RemoteGenerator::new(client)));
        }
        orchestrator
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn RetrievalStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_primary(mut self, generator: Arc<dyn Generator>) -> Self {
        self.primary = Some(generator);
        self
    }

    pub fn with_fallback(mut self, generator: Arc<dyn Generator>) -> Self {
        self.fallback = generator;
        self
    }

    pub fn with_enhancements(mut self, enhancements: Vec<Arc<dyn Enhancement>>) -> Self {
        self.enhancements = enhancements;
        self
    }

    pub fn with_score_model(mut self, model: Arc<dyn ScoreModel>) -> Self {
        self.score_model = model;
        self
    }

    pub fn with_verifier(mut self, verifier: ClaimVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_toggles(mut self, toggles: FeatureToggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_corpus(
        mut self,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<VectorIndex>,
        keywords: Arc<KeywordIndex>,
    ) -> Self {
        self.corpus = Some(Corpus {
            embedder,
            vectors,
            keywords,
        });
        self
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    /// Embed a document and write it to both the vector and keyword indexes
    pub async fn ingest(&self, document: Document) -> Result<(), RagError> {
        let corpus = self.corpus.as_ref().ok_or(RagError::NoCorpus)?;

        if document.id.trim().is_empty() {
            return Err(RagError::InvalidDocument("document id is empty".to_string()));
        }
        if document.content.trim().is_empty() {
            return Err(RagError::InvalidDocument(format!("document '{}' has no content", document.id)));
        }

        let text = match &document.title {
            Some(title) => format!("{}\n{}", title, document.content),
            None => document.content.clone(),
        };
        let vector = corpus
            .embedder
            .embed(&text)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        corpus.vectors.add(document.id.clone(), vector, document.to_metadata())?;
        corpus.keywords.index(&document);

        tracing::info!("📥 Ingested document '{}' ({} indexed)", document.id, corpus.keywords.len());
        Ok(())
    }

    /// Run the full retrieval-augmented generation for one validated request
    pub async fn run(&self, request: &GenerationRequest) -> Result<RagOutput, RagError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut stages = Vec::new();

        // Validating
        enter(&mut stages, run_id, RagStage::Validating);
        if request.topic.trim().is_empty() {
            return Err(RagError::InvalidQuery("topic is empty".to_string()));
        }
        if self.strategies.is_empty() {
            return Err(RagError::NoStrategies);
        }

        // Retrieving
        enter(&mut stages, run_id, RagStage::Retrieving);
        let query = RetrievalQuery {
            topic: request.topic.clone(),
            tone: request.options.tone,
            user_context: request.options.user_context.clone(),
            limit: self.settings.candidates_per_strategy,
            threshold: self.settings.similarity_threshold,
        };
        let (batches, strategy_failures) = self.retrieve_all(&query).await;
        if batches.is_empty() {
            return Err(RagError::AllStrategiesFailed(
                strategy_failures
                    .iter()
                    .map(|f| format!("{}: {}", f.strategy, f.error))
                    .collect(),
            ));
        }

        // Merging
        enter(&mut stages, run_id, RagStage::Merging);
        let sources = merge_and_rank(
            batches,
            self.score_model.as_ref(),
            &self.weights,
            self.settings.top_k,
            Utc::now(),
        );
        let input = GenerationInput::new(request, sources.clone());

        // Generating
        let mut used_fallback = false;
        let mut draft = if sources.is_empty() {
            enter_with(&mut stages, run_id, RagStage::Fallback, "no retrieval results");
            used_fallback = true;
            self.fallback_draft(&input, None).await?
        } else {
            enter(&mut stages, run_id, RagStage::Generating);
            match self.primary_generator() {
                Some(primary) => match primary.generate(&input).await {
                    Ok(draft) => draft,
                    Err(primary_err) => {
                        tracing::warn!("⚠️  Primary generator '{}' failed: {}", primary.name(), primary_err);
                        enter_with(&mut stages, run_id, RagStage::Fallback, &primary_err);
                        used_fallback = true;
                        self.fallback_draft(&input, Some(primary_err)).await?
                    }
                },
                None => self.fallback.generate(&input).await?,
            }
        };

        // Verifying
        enter(&mut stages, run_id, RagStage::Verifying);
        let mut verification = self.verifier.verify(&draft, &sources);
        let unsupported = !verification.claims.is_empty() && verification.verified == 0;
        if unsupported && draft.generator != self.fallback.name() {
            enter_with(&mut stages, run_id, RagStage::Fallback, "no claim could be verified");
            match self.fallback.generate(&input).await {
                Ok(replacement) => {
                    used_fallback = true;
                    self.metrics.record_fallback_generation();
                    verification = self.verifier.verify(&replacement, &sources);
                    draft = replacement;
                }
                Err(e) => tracing::warn!("⚠️  Keeping unverified draft, fallback failed: {}", e),
            }
        }

        // Enhancing
        let enhance = self.toggles.enhancement_enabled();
        log_feature!("Enhancement", enhance);
        if enhance && !self.enhancements.is_empty() {
            enter(&mut stages, run_id, RagStage::Enhancing);
            let ctx = EnhancementContext {
                topic: request.topic.clone(),
                tone: request.options.tone,
            };
            for enhancement in &self.enhancements {
                match enhancement.apply(&draft, &ctx) {
                    Ok(enhanced) => draft = enhanced,
                    Err(e) => tracing::warn!("⚠️  Skipping {} enhancement: {}", enhancement.name(), e),
                }
            }
        }

        enter(&mut stages, run_id, RagStage::Done);
        tracing::info!(
            "🎯 Generated draft for '{}' with {} ({} sources, {}/{} claims verified) in {}ms",
            request.topic,
            draft.generator,
            sources.len(),
            verification.verified,
            verification.claims.len(),
            started.elapsed().as_millis()
        );

        Ok(RagOutput {
            draft,
            sources,
            verification,
            stages,
            used_fallback,
            strategy_failures,
        })
    }

    fn primary_generator(&self) -> Option<&Arc<dyn Generator>> {
        let remote = self.toggles.remote_generation_enabled();
        log_feature!("RemoteGeneration", remote);
        self.primary.as_ref().filter(|_| remote)
    }

    async fn fallback_draft(
        &self,
        input: &GenerationInput,
        primary_err: Option<RagError>,
    ) -> Result<Draft, RagError> {
        self.metrics.record_fallback_generation();
        self.fallback.generate(input).await.map_err(|fallback_err| {
            tracing::error!("❌ Fallback generator failed: {}", fallback_err);
            RagError::GenerationFailed {
                primary: primary_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "not attempted".to_string()),
                fallback: fallback_err.to_string(),
            }
        })
    }

    /// Run every strategy as its own task and wait for all of them to settle.
    ///
    /// Returns the successful batches in strategy order plus the failures.
    async fn retrieve_all(&self, query: &RetrievalQuery) -> (Vec<Vec<RetrievalResult>>, Vec<StrategyFailure>) {
        let query = Arc::new(query.clone());
        let timeout = self.settings.strategy_timeout();

        let names: Vec<String> = self.strategies.iter().map(|s| s.name().to_string()).collect();
        let mut tasks = JoinSet::new();
        for (position, strategy) in self.strategies.iter().enumerate() {
            let strategy = Arc::clone(strategy);
            let query = Arc::clone(&query);
            let name = names[position].clone();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(tokio::time::timeout(timeout, strategy.retrieve(&query)))
                    .catch_unwind()
                    .await;
                let result = match outcome {
                    Ok(Ok(Ok(results))) => Ok(results),
                    Ok(Ok(Err(e))) => Err(e.to_string()),
                    Ok(Err(_)) => Err(RagError::Timeout(name.clone()).to_string()),
                    Err(_) => Err(format!("strategy '{}' panicked", name)),
                };
                (position, name, result)
            });
        }

        let mut settled = Vec::with_capacity(self.strategies.len());
        let mut join_errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => settled.push(entry),
                Err(e) => {
                    tracing::error!("❌ Retrieval task did not complete: {}", e);
                    join_errors.push(e.to_string());
                }
            }
        }

        mark_unreported(&mut settled, &names, &join_errors);
        settled.sort_by_key(|(position, _, _)| *position);

        let mut batches = Vec::new();
        let mut failures = Vec::new();
        for (_, name, result) in settled {
            match result {
                Ok(results) => {
                    tracing::debug!("🔎 Strategy '{}' returned {} results", name, results.len());
                    self.metrics.record_strategy(&name, true);
                    batches.push(results);
                }
                Err(error) => {
                    tracing::warn!("⚠️  Strategy '{}' failed: {}", name, error);
                    self.metrics.record_strategy(&name, false);
                    failures.push(StrategyFailure { strategy: name, error });
                }
            }
        }
        (batches, failures)
    }
}

type Settled = (usize, String, Result<Vec<RetrievalResult>, String>);

/// Charge every strategy that never reported back with the join failures
fn mark_unreported(settled: &mut Vec<Settled>, names: &[String], join_errors: &[String]) {
    if join_errors.is_empty() {
        return;
    }
    let reason = join_errors.join("; ");
    for (position, name) in names.iter().enumerate() {
        if !settled.iter().any(|(p, _, _)| *p == position) {
            settled.push((
                position,
                name.clone(),
                Err(format!("retrieval task did not complete: {}", reason)),
            ));
        }
    }
}

fn enter(stages: &mut Vec<RagStage>, run_id: Uuid, stage: RagStage) {
    log_stage!(run_id, stage);
    stages.push(stage);
}

fn enter_with(stages: &mut Vec<RagStage>, run_id: Uuid, stage: RagStage, detail: impl std::fmt::Display) {
    log_stage!(run_id, stage, detail);
    stages.push(stage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, Tone};
    use crate::services::generation::TEMPLATE_GENERATOR;
    use async_trait::async_trait;
    use postgen_config::VectorIndexSettings;
    use std::time::Duration;

    #[test]
    fn test_unreported_strategies_become_failures() {
        let names = vec!["semantic".to_string(), "keyword".to_string(), "hybrid".to_string()];
        let mut settled: Vec<Settled> = vec![(1, "keyword".to_string(), Ok(vec![]))];

        mark_unreported(&mut settled, &names, &["task 7 was cancelled".to_string()]);
        settled.sort_by_key(|(position, _, _)| *position);

        let failed: Vec<&str> = settled
            .iter()
            .filter(|(_, _, r)| r.is_err())
            .map(|(_, name, _)| name.as_str())
            .collect();
        assert_eq!(failed, vec!["semantic", "hybrid"]);
        assert!(matches!(&settled[0].2, Err(e) if e.contains("task 7 was cancelled")));

        let mut untouched: Vec<Settled> = Vec::new();
        mark_unreported(&mut untouched, &names, &[]);
        assert!(untouched.is_empty());
    }

    struct FixedStrategy {
        name: &'static str,
        docs: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl RetrievalStrategy for FixedStrategy {
        fn name(&self) -> &str {
            self.name
        }

        async fn retrieve(&self, _query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError> {
            Ok(self
                .docs
                .iter()
                .map(|(id, content)| {
                    let mut meta = Metadata::new();
                    meta.insert("content".into(), serde_json::json!(content));
                    RetrievalResult::from_metadata(id, self.name, 0.9, &meta)
                })
                .collect())
        }
    }

    struct FailingStrategy(&'static str);

    #[async_trait]
    impl RetrievalStrategy for FailingStrategy {
        fn name(&self) -> &str {
            self.0
        }

        async fn retrieve(&self, _query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError> {
            Err(RagError::Embedding("embedding service unavailable".into()))
        }
    }

    struct PanickingStrategy;

    #[async_trait]
    impl RetrievalStrategy for PanickingStrategy {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn retrieve(&self, _query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError> {
            panic!("index corrupted")
        }
    }

    struct SlowStrategy;

    #[async_trait]
    impl RetrievalStrategy for SlowStrategy {
        fn name(&self) -> &str {
            "slow"
        }

        async fn retrieve(&self, _query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![])
        }
    }

    struct ScriptedGenerator {
        body: Option<&'static str>,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _input: &GenerationInput) -> Result<Draft, RagError> {
            match self.body {
                Some(body) => Ok(Draft {
                    title: "Scripted".into(),
                    body: body.into(),
                    summary: "Scripted summary.".into(),
                    keywords: vec![],
                    generator: "scripted".into(),
                }),
                None => Err(RagError::Generation("model overloaded".into())),
            }
        }
    }

    fn keyword_docs() -> Arc<dyn RetrievalStrategy> {
        Arc::new(FixedStrategy {
            name: "keyword",
            docs: vec![("tokio-guide", "Tokio is an async runtime for Rust.")],
        })
    }

    fn hybrid_docs() -> Arc<dyn RetrievalStrategy> {
        Arc::new(FixedStrategy {
            name: "hybrid",
            docs: vec![
                ("tokio-guide", "Tokio is an async runtime for Rust."),
                ("futures", "Futures in Rust are lazy."),
            ],
        })
    }

    fn orchestrator() -> RagOrchestrator {
        RagOrchestrator::new(RetrievalSettings::default(), MetricsContext::new())
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("tokio runtime").with_tone(Tone::Professional)
    }

    #[tokio::test]
    async fn test_failed_semantic_strategy_still_reaches_generating() {
        let rag = orchestrator()
            .with_strategy(Arc::new(FailingStrategy("semantic")))
            .with_strategy(keyword_docs())
            .with_strategy(hybrid_docs());

        let output = rag.run(&request()).await.unwrap();

        assert!(output.stages.contains(&RagStage::Generating));
        assert_eq!(output.stages.last(), Some(&RagStage::Done));
        assert_eq!(output.strategy_failures.len(), 1);
        assert_eq!(output.strategy_failures[0].strategy, "semantic");
        assert!(output.sources.iter().all(|s| s.source_strategy != "semantic"));
        assert_eq!(output.sources.len(), 3);
        assert!(!output.used_fallback);

        let snapshot = rag.metrics.snapshot();
        assert_eq!(snapshot.strategies["semantic"].failures, 1);
        assert_eq!(snapshot.strategies["keyword"].successes, 1);
    }

    #[tokio::test]
    async fn test_all_strategies_failing_is_an_error() {
        let rag = orchestrator()
            .with_strategy(Arc::new(FailingStrategy("semantic")))
            .with_strategy(Arc::new(PanickingStrategy));

        let err = rag.run(&request()).await.unwrap_err();
        match err {
            RagError::AllStrategiesFailed(reasons) => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[1].contains("panicked"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_strategy_times_out() {
        let settings = RetrievalSettings {
            strategy_timeout_ms: 50,
            ..RetrievalSettings::default()
        };
        let rag = RagOrchestrator::new(settings, MetricsContext::new())
            .with_strategy(Arc::new(SlowStrategy))
            .with_strategy(keyword_docs());

        let output = rag.run(&request()).await.unwrap();
        assert_eq!(output.strategy_failures.len(), 1);
        assert!(output.strategy_failures[0].error.contains("timed out"));
        assert_eq!(output.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back_to_template() {
        let rag = orchestrator()
            .with_strategy(keyword_docs())
            .with_primary(Arc::new(ScriptedGenerator { body: None }));

        let output = rag.run(&request()).await.unwrap();
        assert!(output.used_fallback);
        assert!(output.stages.contains(&RagStage::Fallback));
        assert_eq!(output.draft.generator, TEMPLATE_GENERATOR);
        assert_eq!(rag.metrics.snapshot().fallback_generations, 1);
    }

    #[tokio::test]
    async fn test_both_generators_failing() {
        let rag = orchestrator()
            .with_strategy(keyword_docs())
            .with_primary(Arc::new(ScriptedGenerator { body: None }))
            .with_fallback(Arc::new(ScriptedGenerator { body: None }));

        let err = rag.run(&request()).await.unwrap_err();
        assert!(matches!(err, RagError::GenerationFailed { .. }));
    }

    #[tokio::test]
    async fn test_unverifiable_remote_draft_is_replaced() {
        let rag = orchestrator()
            .with_strategy(keyword_docs())
            .with_primary(Arc::new(ScriptedGenerator {
                body: Some("Penguins are Antarctic birds. Glaciers were formed in 1850."),
            }));

        let output = rag.run(&request()).await.unwrap();
        assert!(output.used_fallback);
        assert_eq!(output.draft.generator, TEMPLATE_GENERATOR);
        assert_eq!(
            output.stages,
            vec![
                RagStage::Validating,
                RagStage::Retrieving,
                RagStage::Merging,
                RagStage::Generating,
                RagStage::Verifying,
                RagStage::Fallback,
                RagStage::Enhancing,
                RagStage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_supported_remote_draft_is_kept_and_enhanced() {
        let rag = orchestrator()
            .with_strategy(keyword_docs())
            .with_primary(Arc::new(ScriptedGenerator {
                body: Some("Tokio is an async runtime for Rust."),
            }));

        let output = rag.run(&request()).await.unwrap();
        assert!(!output.used_fallback);
        assert_eq!(output.draft.generator, "scripted");
        assert_eq!(output.verification.verified, 1);
        assert!(output.draft.title.to_lowercase().contains("tokio runtime"));
        assert!(output.draft.body.ends_with("Consider how these points apply to your own work."));
    }

    #[tokio::test]
    async fn test_enhancement_toggle_off() {
        let rag = orchestrator()
            .with_strategy(keyword_docs())
            .with_toggles(FeatureToggles::from_flags([("Enhancement", false)]));

        let output = rag.run(&request()).await.unwrap();
        assert!(!output.stages.contains(&RagStage::Enhancing));
    }

    #[tokio::test]
    async fn test_empty_retrieval_uses_fallback() {
        let rag = orchestrator().with_strategy(Arc::new(FixedStrategy {
            name: "keyword",
            docs: vec![],
        }));

        let output = rag.run(&request()).await.unwrap();
        assert!(output.used_fallback);
        assert!(!output.stages.contains(&RagStage::Generating));
        assert!(!output.draft.body.is_empty());
    }

    #[tokio::test]
    async fn test_no_strategies() {
        let err = orchestrator().run(&request()).await.unwrap_err();
        assert_eq!(err, RagError::NoStrategies);
    }

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    #[tokio::test]
    async fn test_ingest_writes_both_indexes() {
        let vectors = Arc::new(VectorIndex::new(2, VectorIndexSettings::with_dimension(2)));
        let keywords = Arc::new(KeywordIndex::new());
        let rag = orchestrator().with_corpus(Arc::new(LengthEmbedder), Arc::clone(&vectors), Arc::clone(&keywords));

        rag.ingest(Document::new("doc-1", "Tokio schedules tasks.")).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(keywords.len(), 1);

        let err = rag.ingest(Document::new("doc-2", "   ")).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidDocument(_)));

        let err = orchestrator().ingest(Document::new("doc-3", "text")).await.unwrap_err();
        assert_eq!(err, RagError::NoCorpus);
    }
}
