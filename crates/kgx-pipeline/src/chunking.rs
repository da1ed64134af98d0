//! Chunk orchestration
//!
//! Short texts go to the oracle client in one call. Long texts are segmented
//! and the chunks are extracted on a bounded worker pool, then merged back
//! in chunk order with duplicate triples removed. Self-loops are dropped
//! unless their predicate is reflexive.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use kgx_core::{ChunkStats, ExtractionKind, OracleError, Provenance, Triple, TripleSet};
use kgx_oracle::OracleClient;
use kgx_segmenter::{Chunk, Segmenter};
use tracing::{debug, info, warn};

/// Triples and statistics for one document
#[derive(Debug, Clone, Default)]
pub struct ChunkedExtraction {
    pub triples: Vec<Triple>,
    pub stats: ChunkStats,
    /// No chunk produced a real result
    pub fallback: bool,
    pub message: Option<String>,
}

/// Runs oracle extraction over a document, chunking it when needed
#[derive(Clone)]
pub struct ChunkOrchestrator {
    client: OracleClient,
    segmenter: Segmenter,
    worker_pool_size: usize,
    reflexive: Arc<HashSet<String>>,
}

impl ChunkOrchestrator {
    pub fn new(client: OracleClient, segmenter: Segmenter, worker_pool_size: usize) -> Self {
        Self {
            client,
            segmenter,
            worker_pool_size: worker_pool_size.max(1),
            reflexive: Arc::new(HashSet::new()),
        }
    }

    /// Predicates whose self-loops are kept
    pub fn with_reflexive_predicates(mut self, predicates: HashSet<String>) -> Self {
        self.reflexive = Arc::new(predicates);
        self
    }

    pub fn client(&self) -> &OracleClient {
        &self.client
    }

    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    /// Extract triples from a whole document
    pub async fn extract(
        &self,
        text: &str,
        kind: ExtractionKind,
    ) -> Result<ChunkedExtraction, OracleError> {
        if !self.segmenter.needs_chunking(text) {
            return self.extract_single(text, kind).await;
        }

        let chunks = self.segmenter.segment(text);
        info!(
            chars = text.chars().count(),
            chunks = chunks.len(),
            workers = self.worker_pool_size,
            "Extracting chunked document"
        );

        let mut results: Vec<(u32, Result<TripleSet, OracleError>)> =
            stream::iter(chunks.iter().map(|chunk| self.extract_chunk(chunk, kind)))
                .buffer_unordered(self.worker_pool_size)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        merge(results, &self.reflexive)
    }

    async fn extract_single(
        &self,
        text: &str,
        kind: ExtractionKind,
    ) -> Result<ChunkedExtraction, OracleError> {
        let set = self.client.call(text, kind).await?;
        let succeeded = !set.fallback;
        let triples = drop_self_loops(set.triples, &self.reflexive);
        let total_triples = triples.len();

        Ok(ChunkedExtraction {
            stats: ChunkStats {
                total_chunks: 1,
                successful_chunks: usize::from(succeeded),
                failed_chunks: if succeeded { Vec::new() } else { vec![0] },
                total_triples,
                success_rate: if succeeded { 1.0 } else { 0.0 },
                from_cache: set.from_cache,
            },
            triples,
            fallback: set.fallback,
            message: set.message,
        })
    }

    async fn extract_chunk(
        &self,
        chunk: &Chunk,
        kind: ExtractionKind,
    ) -> (u32, Result<TripleSet, OracleError>) {
        debug!(
            chunk = chunk.index,
            chars = chunk.char_len(),
            overlap = chunk.overlap_len,
            "Extracting chunk"
        );
        let result = self.client.call(&chunk.content, kind).await;
        (chunk.index, result)
    }
}

/// Remove triples relating an entity to itself through a non-reflexive predicate
fn drop_self_loops(triples: Vec<Triple>, reflexive: &HashSet<String>) -> Vec<Triple> {
    let before = triples.len();
    let kept: Vec<Triple> = triples
        .into_iter()
        .filter(|t| !t.is_self_loop() || reflexive.contains(t.predicate.trim()))
        .collect();
    if kept.len() < before {
        debug!(dropped = before - kept.len(), "Dropped self-loop triples");
    }
    kept
}

/// Merge per-chunk results, already sorted by chunk index
fn merge(
    results: Vec<(u32, Result<TripleSet, OracleError>)>,
    reflexive: &HashSet<String>,
) -> Result<ChunkedExtraction, OracleError> {
    let total_chunks = results.len();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let mut triples = Vec::new();
    let mut failed_chunks = Vec::new();
    let mut fatal: Option<OracleError> = None;
    let mut message: Option<String> = None;
    let mut all_cached = total_chunks > 0;

    for (index, result) in results {
        let set = match result {
            Ok(set) => set,
            Err(e) => {
                warn!(chunk = index, error = %e, "Chunk extraction failed fatally");
                failed_chunks.push(index);
                all_cached = false;
                fatal.get_or_insert(e);
                continue;
            }
        };

        all_cached &= set.from_cache;
        if set.fallback {
            warn!(chunk = index, message = ?set.message, "Chunk produced a fallback result");
            failed_chunks.push(index);
            if message.is_none() {
                message = set.message;
            }
            continue;
        }

        for triple in drop_self_loops(set.triples, reflexive) {
            if seen.insert(triple.key()) {
                triples.push(triple.with_provenance(Provenance::Chunk(index)));
            }
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }

    let successful_chunks = total_chunks - failed_chunks.len();
    let stats = ChunkStats {
        total_chunks,
        successful_chunks,
        failed_chunks,
        total_triples: triples.len(),
        success_rate: if total_chunks == 0 {
            0.0
        } else {
            successful_chunks as f32 / total_chunks as f32
        },
        from_cache: all_cached,
    };

    info!(
        total_chunks = stats.total_chunks,
        successful_chunks = stats.successful_chunks,
        triples = stats.total_triples,
        "Chunk results merged"
    );

    Ok(ChunkedExtraction {
        fallback: successful_chunks == 0,
        message: if successful_chunks == 0 { message } else { None },
        triples,
        stats,
    })
}
