//! Entity disambiguation stage
//!
//! Resolves the subject and object mentions of every triple against the
//! [`EntityStore`] and rewrites them to canonical names.
//!
//! Resolution order per mention:
//! 1. mentions already resolved in this batch
//! 2. recorded alias history
//! 3. exact matches (a single hit is a unique match)
//! 4. fuzzy candidates, scored by name, context and attribute similarity
//!
//! Store failures never fail the stage; the mention is kept with reason
//! `error`.
//!
//! Author: hephaex@gmail.com

use std::collections::HashMap;
use std::sync::Arc;

use kgx_core::{
    AliasRecord, DisambiguationResult, EnrichedTriple, EnrichmentBatch, EnrichmentConfig,
    EnrichmentStage, EntityCandidate, EntityKind, EntityRole, EntityStore, ExtractionRequest,
    ReasonCode, Result,
};
use tracing::{debug, warn};

use crate::EntityClassifier;

pub const UNIQUE_MATCH_CONFIDENCE: f32 = 0.95;
pub const NEW_ENTITY_CONFIDENCE: f32 = 1.0;
pub const NO_SUITABLE_MATCH_CONFIDENCE: f32 = 0.5;

const NAME_WEIGHT: f32 = 0.6;
const CONTEXT_WEIGHT: f32 = 0.3;
const ATTRIBUTE_WEIGHT: f32 = 0.1;

// ============================================================================
// Thresholds
// ============================================================================

/// Minimum similarity score per entity kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    pub person: f32,
    pub work: f32,
    pub event: f32,
    pub generic: f32,
}

impl MatchThresholds {
    pub fn for_kind(&self, kind: EntityKind) -> f32 {
        match kind {
            EntityKind::Person => self.person,
            EntityKind::Work => self.work,
            EntityKind::Event => self.event,
            EntityKind::Generic => self.generic,
        }
    }
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self::from(&EnrichmentConfig::default())
    }
}

impl From<&EnrichmentConfig> for MatchThresholds {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            person: config.person_threshold,
            work: config.work_threshold,
            event: config.event_threshold,
            generic: config.generic_threshold,
        }
    }
}

// ============================================================================
// Similarity
// ============================================================================

/// Levenshtein distance over characters
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Name similarity in [0, 1]: `1 - distance / longer length`
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / max_len as f32
}

/// Where and how a mention was seen
struct MentionContext<'a> {
    predicate: &'a str,
    /// Value at the other end of the triple
    counterpart: &'a str,
}

fn score_candidate(
    mention: &str,
    context: &MentionContext<'_>,
    candidate: &EntityCandidate,
) -> f32 {
    let name = name_similarity(mention, &candidate.name);

    let context_score = if candidate.contexts.is_empty() {
        0.5
    } else if candidate.contexts.contains(context.predicate) {
        1.0
    } else {
        0.0
    };

    let attribute_score = if candidate.attributes.is_empty() {
        0.5
    } else if candidate
        .attributes
        .values()
        .any(|value| value == context.counterpart)
    {
        1.0
    } else {
        0.0
    };

    NAME_WEIGHT * name + CONTEXT_WEIGHT * context_score + ATTRIBUTE_WEIGHT * attribute_score
}

// ============================================================================
// Disambiguator
// ============================================================================

/// Enrichment stage resolving entity mentions to canonical names
pub struct Disambiguator {
    store: Arc<dyn EntityStore>,
    classifier: Arc<dyn EntityClassifier>,
    thresholds: MatchThresholds,
    candidate_limit: usize,
}

impl Disambiguator {
    pub fn new(store: Arc<dyn EntityStore>, classifier: Arc<dyn EntityClassifier>) -> Self {
        Self::with_config(store, classifier, &EnrichmentConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn EntityStore>,
        classifier: Arc<dyn EntityClassifier>,
        config: &EnrichmentConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            thresholds: MatchThresholds::from(config),
            candidate_limit: config.candidate_limit,
        }
    }

    /// Resolve one mention, falling back to an `error` result on store failure
    fn resolve(
        &self,
        kind: EntityKind,
        mention: &str,
        context: &MentionContext<'_>,
        role: EntityRole,
    ) -> DisambiguationResult {
        match self.try_resolve(kind, mention, context, role) {
            Ok(result) => result,
            Err(e) => {
                warn!(mention = mention, kind = %kind, error = %e, "Entity lookup failed");
                DisambiguationResult {
                    mention: mention.to_string(),
                    kind,
                    matched: false,
                    canonical: None,
                    confidence: 0.0,
                    reason: ReasonCode::Error,
                }
            }
        }
    }

    fn try_resolve(
        &self,
        kind: EntityKind,
        mention: &str,
        context: &MentionContext<'_>,
        role: EntityRole,
    ) -> Result<DisambiguationResult> {
        let result = |matched, canonical: Option<String>, confidence, reason| DisambiguationResult {
            mention: mention.to_string(),
            kind,
            matched,
            canonical,
            confidence,
            reason,
        };

        let history = self.store.aliases(kind, mention)?;
        if let Some(best) = history
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
        {
            self.remember(kind, &best.canonical, context, role)?;
            return Ok(result(
                true,
                Some(best.canonical),
                best.score,
                ReasonCode::HistoryMatch,
            ));
        }

        let exact = self.store.find(kind, mention)?;
        let candidates = match exact.len() {
            1 => {
                let canonical = exact[0].name.clone();
                self.remember(kind, &canonical, context, role)?;
                return Ok(result(
                    true,
                    Some(canonical),
                    UNIQUE_MATCH_CONFIDENCE,
                    ReasonCode::UniqueMatch,
                ));
            }
            0 => self.store.candidates(kind, mention, self.candidate_limit)?,
            _ => exact,
        };

        if candidates.is_empty() {
            self.remember(kind, mention, context, role)?;
            return Ok(result(
                false,
                None,
                NEW_ENTITY_CONFIDENCE,
                ReasonCode::NewEntity,
            ));
        }

        let threshold = self.thresholds.for_kind(kind);
        let best = candidates
            .iter()
            .map(|candidate| (candidate, score_candidate(mention, context, candidate)))
            .max_by(|(_, a), (_, b)| a.total_cmp(b));

        match best {
            Some((candidate, score)) if score >= threshold => {
                let canonical = candidate.name.clone();
                self.remember(kind, &canonical, context, role)?;
                Ok(result(
                    true,
                    Some(canonical),
                    score,
                    ReasonCode::SimilarityMatch,
                ))
            }
            _ => {
                self.remember(kind, mention, context, role)?;
                Ok(result(
                    false,
                    None,
                    NO_SUITABLE_MATCH_CONFIDENCE,
                    ReasonCode::NoSuitableMatch,
                ))
            }
        }
    }

    /// Insert or extend the store entry for `name` with this sighting
    fn remember(
        &self,
        kind: EntityKind,
        name: &str,
        context: &MentionContext<'_>,
        role: EntityRole,
    ) -> Result<()> {
        let mut candidate = EntityCandidate::new(name, kind).with_context(context.predicate);
        if role == EntityRole::Subject {
            candidate = candidate.with_attribute(context.predicate, context.counterpart);
        }
        self.store.insert(candidate)
    }

    fn record_alias(&self, result: &DisambiguationResult) {
        let Some(canonical) = result.canonical.as_deref() else {
            return;
        };
        if canonical == result.mention || result.reason == ReasonCode::HistoryMatch {
            return;
        }
        let record = AliasRecord::new(result.kind, &result.mention, canonical, result.confidence);
        if let Err(e) = self.store.record_alias(record) {
            warn!(mention = %result.mention, error = %e, "Failed to record alias");
        }
    }
}

/// Per-batch memo of resolved mentions
type ResolutionMemo = HashMap<(EntityKind, String), DisambiguationResult>;

impl Disambiguator {
    fn resolve_memoized(
        &self,
        memo: &mut ResolutionMemo,
        kind: EntityKind,
        mention: &str,
        context: &MentionContext<'_>,
        role: EntityRole,
    ) -> DisambiguationResult {
        let key = (kind, mention.to_string());
        if let Some(known) = memo.get(&key) {
            return known.clone();
        }
        let result = self.resolve(kind, mention, context, role);
        self.record_alias(&result);
        memo.insert(key, result.clone());
        result
    }

    fn disambiguate_triple(&self, memo: &mut ResolutionMemo, triple: &mut EnrichedTriple) {
        let subject_kind = self
            .classifier
            .classify(&triple.subject, &triple.predicate, EntityRole::Subject)
            .unwrap_or(EntityKind::Generic);
        let subject = self.resolve_memoized(
            memo,
            subject_kind,
            &triple.subject,
            &MentionContext {
                predicate: &triple.predicate,
                counterpart: &triple.object,
            },
            EntityRole::Subject,
        );

        let object = self
            .classifier
            .classify(&triple.object, &triple.predicate, EntityRole::Object)
            .map(|object_kind| {
                self.resolve_memoized(
                    memo,
                    object_kind,
                    &triple.object,
                    &MentionContext {
                        predicate: &triple.predicate,
                        counterpart: &triple.subject,
                    },
                    EntityRole::Object,
                )
            });

        triple.subject = subject.resolved_name().to_string();
        triple.subject_resolution = Some(subject);
        if let Some(object) = object {
            triple.object = object.resolved_name().to_string();
            triple.object_resolution = Some(object);
        }
    }
}

impl EnrichmentStage for Disambiguator {
    fn name(&self) -> &'static str {
        "disambiguation"
    }

    fn apply(
        &self,
        request: &ExtractionRequest,
        batch: &EnrichmentBatch,
    ) -> Result<EnrichmentBatch> {
        let mut next = batch.clone();
        let mut memo = ResolutionMemo::new();

        for triple in &mut next.triples {
            self.disambiguate_triple(&mut memo, triple);
        }

        let matched = memo.values().filter(|r| r.matched).count();
        debug!(
            request_id = %request.id,
            mentions = memo.len(),
            matched = matched,
            "Disambiguation complete"
        );

        Ok(next)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordClassifier;
    use crate::store::InMemoryEntityStore;
    use kgx_core::{ExtractionKind, KgxError, ProcessingMode, Triple};

    fn request() -> ExtractionRequest {
        ExtractionRequest::new("text", ExtractionKind::Triples, ProcessingMode::Enhanced)
    }

    fn stage(store: Arc<dyn EntityStore>) -> Disambiguator {
        Disambiguator::new(store, Arc::new(KeywordClassifier::new()))
    }

    fn run(stage: &Disambiguator, triples: Vec<Triple>) -> EnrichmentBatch {
        stage
            .apply(&request(), &EnrichmentBatch::from_triples(triples))
            .unwrap()
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("周杰伦", "周杰倫"), 1);
        assert!((name_similarity("周杰伦", "周杰倫") - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(name_similarity("", ""), 1.0);
    }

    #[test]
    fn test_new_entity_then_unique_match() {
        let store = Arc::new(InMemoryEntityStore::new());
        let stage = stage(store.clone());

        let first = run(&stage, vec![Triple::new("小明", "是", "学生", 0.9)]);
        let resolution = first.triples[0].subject_resolution.clone().unwrap();
        assert_eq!(resolution.reason, ReasonCode::NewEntity);
        assert_eq!(resolution.confidence, NEW_ENTITY_CONFIDENCE);
        assert!(!resolution.matched);

        let second = run(&stage, vec![Triple::new("小明", "是", "学生", 0.9)]);
        let resolution = second.triples[0].subject_resolution.clone().unwrap();
        assert_eq!(resolution.reason, ReasonCode::UniqueMatch);
        assert_eq!(resolution.confidence, UNIQUE_MATCH_CONFIDENCE);
        assert_eq!(second.triples[0].subject, "小明");
    }

    #[test]
    fn test_repeated_mention_resolved_once_per_batch() {
        let store = Arc::new(InMemoryEntityStore::new());
        let stage = stage(store.clone());

        let batch = run(
            &stage,
            vec![
                Triple::new("小明", "是", "学生", 0.9),
                Triple::new("小明", "是", "学生", 0.9),
            ],
        );

        assert_eq!(batch.triples[0], batch.triples[1]);
        assert_eq!(
            batch.triples[1].subject_resolution.as_ref().unwrap().reason,
            ReasonCode::NewEntity
        );
    }

    #[test]
    fn test_similarity_match_rewrites_name_and_records_alias() {
        let store = Arc::new(InMemoryEntityStore::new());
        store
            .insert(
                EntityCandidate::new("周杰伦工作室", EntityKind::Generic)
                    .with_context("成立于")
                    .with_attribute("成立于", "2007年"),
            )
            .unwrap();
        let stage = stage(store.clone());

        // name 1 - 1/6, context 1.0, attribute 1.0 -> 0.6*0.833 + 0.4 = 0.9
        let batch = run(&stage, vec![Triple::new("周杰伦工作", "成立于", "2007年", 0.8)]);

        let triple = &batch.triples[0];
        assert_eq!(triple.subject, "周杰伦工作室");
        let resolution = triple.subject_resolution.as_ref().unwrap();
        assert_eq!(resolution.reason, ReasonCode::SimilarityMatch);
        assert!((resolution.confidence - 0.9).abs() < 1e-4);
        assert!(triple.object_resolution.is_none());

        let aliases = store.aliases(EntityKind::Generic, "周杰伦工作").unwrap();
        assert_eq!(aliases[0].canonical, "周杰伦工作室");

        let again = run(&stage, vec![Triple::new("周杰伦工作", "成立于", "2007年", 0.8)]);
        assert_eq!(
            again.triples[0].subject_resolution.as_ref().unwrap().reason,
            ReasonCode::HistoryMatch
        );
    }

    #[test]
    fn test_weak_candidate_is_no_suitable_match() {
        let store = Arc::new(InMemoryEntityStore::new());
        store
            .insert(EntityCandidate::new("刘德华", EntityKind::Person).with_context("职业"))
            .unwrap();
        let stage = stage(store.clone());

        let batch = run(&stage, vec![Triple::new("德华", "配偶", "朱丽倩", 0.9)]);

        let resolution = batch.triples[0].subject_resolution.as_ref().unwrap();
        assert_eq!(resolution.reason, ReasonCode::NoSuitableMatch);
        assert_eq!(resolution.confidence, NO_SUITABLE_MATCH_CONFIDENCE);
        assert_eq!(batch.triples[0].subject, "德华");
        assert_eq!(store.find(EntityKind::Person, "德华").unwrap().len(), 1);
    }

    struct BrokenStore;

    impl EntityStore for BrokenStore {
        fn find(&self, _: EntityKind, _: &str) -> Result<Vec<EntityCandidate>> {
            Err(KgxError::StoreError("unavailable".into()))
        }
        fn candidates(&self, _: EntityKind, _: &str, _: usize) -> Result<Vec<EntityCandidate>> {
            Err(KgxError::StoreError("unavailable".into()))
        }
        fn insert(&self, _: EntityCandidate) -> Result<()> {
            Err(KgxError::StoreError("unavailable".into()))
        }
        fn record_alias(&self, _: AliasRecord) -> Result<()> {
            Err(KgxError::StoreError("unavailable".into()))
        }
        fn aliases(&self, _: EntityKind, _: &str) -> Result<Vec<AliasRecord>> {
            Err(KgxError::StoreError("unavailable".into()))
        }
        fn entity_count(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_store_failure_keeps_mention() {
        let stage = stage(Arc::new(BrokenStore));

        let batch = run(&stage, vec![Triple::new("周杰伦", "配偶", "昆凌", 0.9)]);

        let triple = &batch.triples[0];
        assert_eq!(triple.subject, "周杰伦");
        assert_eq!(triple.object, "昆凌");
        let resolution = triple.subject_resolution.as_ref().unwrap();
        assert_eq!(resolution.reason, ReasonCode::Error);
        assert_eq!(resolution.confidence, 0.0);
    }
}
