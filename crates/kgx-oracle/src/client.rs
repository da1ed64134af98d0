//! Oracle client
//!
//! Wraps an [`ExtractionOracle`] with everything a production call needs:
//! result cache lookup, a process-wide concurrency limit, a length-aware
//! timeout, retry with backoff, and degradation to a fallback result.
//!
//! Only fatal errors (bad credentials, malformed requests) surface as `Err`.
//! Everything else ends in a [`TripleSet`], possibly flagged `fallback`.
//!
//! Author: hephaex@gmail.com

use crate::cache::ResultCache;
use crate::prompts;
use crate::response::{parse_answer, parse_payload};
use crate::retry::RetryPolicy;
use kgx_core::{ExtractionKind, ExtractionOracle, OracleConfig, OracleError, TripleSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Message attached to results produced while all permits are taken
pub const BUSY_MESSAGE: &str = "system busy";

/// Client for text-to-triples oracle calls
#[derive(Clone)]
pub struct OracleClient {
    oracle: Arc<dyn ExtractionOracle>,
    cache: Option<ResultCache>,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
    config: OracleConfig,
}

impl OracleClient {
    /// Create a client with its own semaphore sized from `config`
    pub fn new(oracle: Arc<dyn ExtractionOracle>, config: OracleConfig) -> Self {
        Self {
            oracle,
            cache: None,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_calls)),
            retry: RetryPolicy::from_config(&config),
            config,
        }
    }

    /// Attach a result cache
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share a semaphore with other clients
    pub fn with_semaphore(mut self, semaphore: Arc<Semaphore>) -> Self {
        self.semaphore = semaphore;
        self
    }

    /// Replace the retry policy derived from config
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn oracle_name(&self) -> &str {
        self.oracle.name()
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Per-attempt timeout for a text of this length
    pub fn call_timeout(&self, text: &str) -> Duration {
        let config = &self.config;
        let blocks = text.chars().count().div_ceil(1000) as u64;
        let secs = (config.base_timeout_secs + config.timeout_per_1000_chars_secs * blocks)
            .min(config.max_timeout_secs)
            .max(config.min_timeout_secs);
        Duration::from_secs(secs)
    }

    /// Extract triples from `text`
    pub async fn call(&self, text: &str, kind: ExtractionKind) -> Result<TripleSet, OracleError> {
        if let Some(triples) = self.cached(text, kind).await {
            return Ok(TripleSet::cached(triples));
        }

        let call_timeout = self.call_timeout(text);
        let prompt_text = prompts::truncate_for_prompt(
            text,
            self.config.max_prompt_chars,
            self.config.truncated_prompt_chars,
        );
        if prompt_text.len() < text.len() {
            info!(
                original_chars = text.chars().count(),
                prompt_chars = prompt_text.chars().count(),
                "Input truncated before prompting"
            );
        }
        let prompt = prompts::render(kind, prompt_text);

        let oracle = &self.oracle;
        let semaphore = &self.semaphore;
        let permit_wait = self.config.permit_wait();
        let prompt = prompt.as_str();
        let answer = self
            .retry
            .retry("oracle_call", |attempt| async move {
                // held for this attempt only, never across a backoff sleep
                let _permit = acquire_permit(semaphore, permit_wait).await?;
                debug!(
                    oracle = oracle.name(),
                    kind = %kind,
                    attempt = attempt,
                    timeout_secs = call_timeout.as_secs(),
                    "Calling oracle"
                );
                match tokio::time::timeout(call_timeout, oracle.call(prompt, kind)).await {
                    Ok(answer) => answer,
                    Err(_) => Err(OracleError::Timeout(format!(
                        "no answer within {}s",
                        call_timeout.as_secs()
                    ))),
                }
            })
            .await;

        match answer {
            Ok(raw) => match parse_answer(&raw) {
                Ok(parsed) => {
                    if let Some(cache) = &self.cache {
                        cache.put(text, kind, &parsed.json).await;
                    }
                    debug!(
                        oracle = self.oracle.name(),
                        triples = parsed.triples.len(),
                        "Oracle answer parsed"
                    );
                    Ok(TripleSet::extracted(parsed.triples))
                }
                Err(e) => {
                    warn!(oracle = self.oracle.name(), error = %e, "Unparseable oracle answer");
                    Ok(TripleSet::fallback(format!("unparseable answer: {e}")))
                }
            },
            Err(OracleError::Busy(_)) => {
                warn!(
                    oracle = self.oracle.name(),
                    wait_secs = self.config.permit_wait_secs,
                    "No oracle permit available, returning busy result"
                );
                Ok(TripleSet::fallback(BUSY_MESSAGE))
            }
            Err(e) if e.is_fatal() => {
                error!(oracle = self.oracle.name(), error = %e, "Fatal oracle error");
                Err(e)
            }
            Err(e) => {
                warn!(
                    oracle = self.oracle.name(),
                    error = %e,
                    "Oracle unavailable, using fallback"
                );
                Ok(TripleSet::fallback(format!("oracle unavailable: {e}")))
            }
        }
    }

    async fn cached(&self, text: &str, kind: ExtractionKind) -> Option<Vec<kgx_core::Triple>> {
        let cache = self.cache.as_ref()?;
        let json = cache.get(text, kind).await?;
        match parse_payload(&json) {
            Ok(triples) => Some(triples),
            Err(e) => {
                warn!(error = %e, "Discarding unparseable cache entry");
                cache.invalidate(text, kind).await;
                None
            }
        }
    }
}

/// Wait at most `wait` for an oracle permit
async fn acquire_permit(
    semaphore: &Arc<Semaphore>,
    wait: Duration,
) -> Result<OwnedSemaphorePermit, OracleError> {
    match tokio::time::timeout(wait, Arc::clone(semaphore).acquire_owned()).await {
        Ok(Ok(permit)) => Ok(permit),
        Ok(Err(_)) => Err(OracleError::Busy("oracle semaphore closed".to_string())),
        Err(_) => Err(OracleError::Busy(format!(
            "no permit within {}s",
            wait.as_secs()
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
