//! KGX Pipeline - text to enriched triples
//!
//! Ties the workspace together: the chunk orchestrator drives the oracle
//! client over (possibly segmented) text, and the selected processing mode
//! decides which enrichment stages run over the merged triples.
//!
//! | mode           | stages                                          |
//! |----------------|-------------------------------------------------|
//! | `pass-through` | none                                            |
//! | `enhanced`     | disambiguation, validation                      |
//! | `fusion`       | disambiguation, fusion, validation, quality     |
//!
//! A failing stage never aborts a request: the failure is recorded on the
//! outcome and the previous batch is carried forward.
//!
//! Author: hephaex@gmail.com

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use kgx_core::{
    AppConfig, EnrichedTriple, EnrichmentBatch, EnrichmentStage, EntityStore, ExtractionKind,
    ExtractionOracle, ExtractionOutcome, ExtractionRequest, ExtractionStats, KgxError,
    ProcessingMode, Result, SharedCache, StageFailure, TripleSink,
};
use kgx_extractor::{
    Disambiguator, EntityClassifier, InMemoryEntityStore, KeywordClassifier, KnowledgeFusion,
    QualityAssessor, RelationValidator,
};
use kgx_oracle::{create_oracle, OracleClient, ResultCache, RetryPolicy};
use kgx_segmenter::{Segmenter, SegmenterConfig};
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub mod chunking;

pub use chunking::{ChunkOrchestrator, ChunkedExtraction};

/// Stage chain per processing mode
pub type StageChains = HashMap<ProcessingMode, Vec<Arc<dyn EnrichmentStage>>>;

// ============================================================================
// Pipeline
// ============================================================================

/// Extraction pipeline
pub struct Pipeline {
    orchestrator: ChunkOrchestrator,
    chains: StageChains,
    sink: Option<Arc<dyn TripleSink>>,
}

impl Pipeline {
    /// Start building a pipeline from configuration
    pub fn builder(config: AppConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Kinds accepted by [`Pipeline::extract`]
    pub fn supported_kinds() -> &'static [ExtractionKind] {
        &ExtractionKind::ALL
    }

    /// Names of the stages run for `mode`
    pub fn stage_names(&self, mode: ProcessingMode) -> Vec<&'static str> {
        self.chain(mode).iter().map(|stage| stage.name()).collect()
    }

    pub fn orchestrator(&self) -> &ChunkOrchestrator {
        &self.orchestrator
    }

    fn chain(&self, mode: ProcessingMode) -> &[Arc<dyn EnrichmentStage>] {
        self.chains.get(&mode).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Extract and enrich triples from `text`
    pub async fn extract(
        &self,
        text: &str,
        kind: ExtractionKind,
        mode: ProcessingMode,
    ) -> Result<ExtractionOutcome> {
        if text.trim().is_empty() {
            return Err(KgxError::InvalidInput("text must not be empty".to_string()));
        }

        let started = Instant::now();
        let request = ExtractionRequest::new(text, kind, mode);
        info!(
            request_id = %request.id,
            kind = %kind,
            mode = %mode,
            chars = request.char_len(),
            "Extraction started"
        );

        let extraction = self.orchestrator.extract(&request.text, kind).await?;

        let mut batch = EnrichmentBatch::from_triples(extraction.triples);
        for stage in self.chain(mode) {
            match stage.apply(&request, &batch) {
                Ok(next) => batch = next,
                Err(e) => {
                    warn!(
                        request_id = %request.id,
                        stage = stage.name(),
                        error = %e,
                        "Enrichment stage failed, continuing with previous batch"
                    );
                    batch.stage_failures.push(StageFailure {
                        stage: stage.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let triples = dedup(batch.triples);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = ExtractionOutcome {
            request_id: request.id,
            kind,
            mode,
            stats: ExtractionStats {
                chunks: extraction.stats,
                output_triples: triples.len(),
                invalid_triples: batch.invalid.len(),
                elapsed_ms,
            },
            triples,
            invalid: batch.invalid,
            conflicts: batch.conflicts,
            validation: batch.validation,
            quality: batch.quality,
            stage_failures: batch.stage_failures,
            fallback: extraction.fallback,
            message: extraction.message,
            processed_at: Utc::now(),
        };

        info!(
            request_id = %outcome.request_id,
            triples = outcome.triples.len(),
            fallback = outcome.fallback,
            elapsed_ms = elapsed_ms,
            "Extraction finished"
        );

        self.hand_off(&outcome);
        Ok(outcome)
    }

    /// Fire-and-forget persistence; failures are only logged
    fn hand_off(&self, outcome: &ExtractionOutcome) {
        let Some(sink) = &self.sink else {
            return;
        };
        let sink = Arc::clone(sink);
        let outcome = outcome.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.persist(&outcome).await {
                warn!(request_id = %outcome.request_id, error = %e, "Failed to persist outcome");
            }
        });
    }
}

/// Drop exact repeats of (subject, predicate, object, sources), keeping the first
fn dedup(triples: Vec<EnrichedTriple>) -> Vec<EnrichedTriple> {
    let mut seen = HashSet::new();
    triples
        .into_iter()
        .filter(|t| {
            seen.insert((
                t.subject.clone(),
                t.predicate.clone(),
                t.object.clone(),
                t.sources.clone(),
            ))
        })
        .collect()
}

// ============================================================================
// Builder
// ============================================================================

/// Builder wiring a [`Pipeline`] from configuration and injected parts
pub struct PipelineBuilder {
    config: AppConfig,
    oracle: Option<Arc<dyn ExtractionOracle>>,
    store: Option<Arc<dyn EntityStore>>,
    classifier: Option<Arc<dyn EntityClassifier>>,
    shared_cache: Option<Arc<dyn SharedCache>>,
    sink: Option<Arc<dyn TripleSink>>,
    semaphore: Option<Arc<Semaphore>>,
    retry: Option<RetryPolicy>,
    chain_overrides: StageChains,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            oracle: None,
            store: None,
            classifier: None,
            shared_cache: None,
            sink: None,
            semaphore: None,
            retry: None,
            chain_overrides: HashMap::new(),
        }
    }

    /// Use this oracle instead of one created from `config.llm`
    pub fn with_oracle(mut self, oracle: Arc<dyn ExtractionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_entity_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn EntityClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_shared_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TripleSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share an oracle semaphore with other pipelines
    pub fn with_semaphore(mut self, semaphore: Arc<Semaphore>) -> Self {
        self.semaphore = Some(semaphore);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Replace the stage chain of one mode
    pub fn with_stage_chain(
        mut self,
        mode: ProcessingMode,
        stages: Vec<Arc<dyn EnrichmentStage>>,
    ) -> Self {
        self.chain_overrides.insert(mode, stages);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let oracle = match self.oracle {
            Some(oracle) => oracle,
            None => create_oracle(&self.config.llm)?,
        };

        let mut client = OracleClient::new(oracle, self.config.oracle.clone());
        if self.config.cache.enabled {
            let mut cache = ResultCache::with_config(&self.config.cache);
            if let Some(shared) = self.shared_cache {
                cache = cache.with_shared(shared);
            }
            client = client.with_cache(cache);
        }
        if let Some(semaphore) = self.semaphore {
            client = client.with_semaphore(semaphore);
        }
        if let Some(retry) = self.retry {
            client = client.with_retry_policy(retry);
        }

        let enrichment = &self.config.enrichment;
        let validator = RelationValidator::from_config(&enrichment.constraints);

        let segmenter = Segmenter::new(SegmenterConfig::from(&self.config.chunking))?;
        let orchestrator =
            ChunkOrchestrator::new(client, segmenter, self.config.chunking.worker_pool_size)
                .with_reflexive_predicates(validator.reflexive_predicates());

        let store: Arc<dyn EntityStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryEntityStore::new()),
        };
        let classifier: Arc<dyn EntityClassifier> = match self.classifier {
            Some(classifier) => classifier,
            None => Arc::new(KeywordClassifier::new()),
        };

        let disambiguation: Arc<dyn EnrichmentStage> = Arc::new(Disambiguator::with_config(
            store,
            Arc::clone(&classifier),
            enrichment,
        ));
        let fusion: Arc<dyn EnrichmentStage> = Arc::new(KnowledgeFusion::new(enrichment.tie_break));
        let validation: Arc<dyn EnrichmentStage> = Arc::new(validator);
        let quality: Arc<dyn EnrichmentStage> = Arc::new(QualityAssessor::new(classifier));

        let mut chains: StageChains = HashMap::from([
            (ProcessingMode::PassThrough, Vec::new()),
            (
                ProcessingMode::Enhanced,
                vec![Arc::clone(&disambiguation), Arc::clone(&validation)],
            ),
            (
                ProcessingMode::Fusion,
                vec![disambiguation, fusion, validation, quality],
            ),
        ]);
        chains.extend(self.chain_overrides);

        Ok(Pipeline {
            orchestrator,
            chains,
            sink: self.sink,
        })
    }
}
