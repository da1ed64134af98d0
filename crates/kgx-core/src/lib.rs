//! KGX Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the KGX pipeline:
//! - Extraction kinds and processing modes
//! - Triples, entity candidates and enriched triples
//! - Disambiguation, validation and quality result types
//! - Error types with typed oracle failure classification
//! - Collaborator traits (oracle, entity store, shared cache, sink)
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, CacheConfig, ChunkingConfig, ConfigError, EnrichmentConfig, LlmConfig,
    LlmProvider, LoggingConfig, OracleConfig,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for KGX operations
#[derive(Error, Debug)]
pub enum KgxError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown extraction kind: {0}")]
    UnknownKind(String),

    #[error("Unknown processing mode: {0}")]
    UnknownMode(String),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Entity store error: {0}")]
    StoreError(String),

    #[error("Stage {stage} failed: {message}")]
    StageError { stage: String, message: String },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Sink error: {0}")]
    SinkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KgxError>;

/// Failure reported by an extraction oracle.
///
/// Every variant maps to exactly one [`ErrorClass`]; callers decide on retry
/// by class and never by inspecting the message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Oracle call timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Malformed request: {0}")]
    BadRequest(String),

    #[error("Unparseable oracle response: {0}")]
    Parse(String),

    #[error("Oracle call failed: {0}")]
    Failed(String),

    /// No concurrency permit became free in time
    #[error("Oracle busy: {0}")]
    Busy(String),
}

/// Retry classification of an [`OracleError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; retried with backoff, then degraded to a fallback result
    Retryable,
    /// Never retried and never replaced by a fallback
    Fatal,
    /// Not retried, degraded to a fallback result right away
    Terminal,
}

impl OracleError {
    /// Classify this error for the retry loop
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited(_) | Self::Server { .. } => {
                ErrorClass::Retryable
            }
            Self::Auth(_) | Self::BadRequest(_) => ErrorClass::Fatal,
            Self::Parse(_) | Self::Failed(_) | Self::Busy(_) => ErrorClass::Terminal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Map a non-success HTTP status to an error variant
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            401 | 403 => Self::Auth(message),
            400 | 422 => Self::BadRequest(message),
            408 => Self::Timeout(message),
            429 => Self::RateLimited(message),
            500..=599 => Self::Server { status, message },
            _ => Self::Failed(format!("HTTP {status}: {message}")),
        }
    }
}

// ============================================================================
// Extraction Kinds and Modes
// ============================================================================

/// Oracle prompt/schema selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionKind {
    /// Person profiles (occupation, birth, works...)
    Celebrity,
    /// Person-to-person relations
    CelebrityRelation,
    /// Creative works (films, albums, books)
    Work,
    /// Events (ceremonies, festivals, releases)
    Event,
    /// Generic subject-predicate-object triples
    #[default]
    Triples,
}

impl ExtractionKind {
    /// Every supported kind, in a stable order
    pub const ALL: [ExtractionKind; 5] = [
        Self::Celebrity,
        Self::CelebrityRelation,
        Self::Work,
        Self::Event,
        Self::Triples,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Celebrity => "celebrity",
            Self::CelebrityRelation => "celebrity_relation",
            Self::Work => "work",
            Self::Event => "event",
            Self::Triples => "triples",
        }
    }

    /// Parse a kind, coercing unknown or empty values to [`ExtractionKind::Triples`]
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl std::fmt::Display for ExtractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExtractionKind {
    type Err = KgxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "celebrity" => Ok(Self::Celebrity),
            "celebrity_relation" | "celebrity-relation" | "celebritycelebrity" => {
                Ok(Self::CelebrityRelation)
            }
            "work" => Ok(Self::Work),
            "event" => Ok(Self::Event),
            "triples" => Ok(Self::Triples),
            _ => Err(KgxError::UnknownKind(s.to_string())),
        }
    }
}

/// Named processing mode of the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Oracle extraction and merge only
    #[default]
    PassThrough,
    /// Adds disambiguation and validation
    Enhanced,
    /// Full chain: disambiguation, fusion, validation, quality
    Fusion,
}

impl ProcessingMode {
    pub const ALL: [ProcessingMode; 3] = [Self::PassThrough, Self::Enhanced, Self::Fusion];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassThrough => "pass-through",
            Self::Enhanced => "enhanced",
            Self::Fusion => "fusion",
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingMode {
    type Err = KgxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pass-through" | "pass_through" | "passthrough" | "standard" => Ok(Self::PassThrough),
            "enhanced" => Ok(Self::Enhanced),
            "fusion" => Ok(Self::Fusion),
            _ => Err(KgxError::UnknownMode(s.to_string())),
        }
    }
}

// ============================================================================
// Triples
// ============================================================================

/// Clamp a confidence score into [0, 1]; NaN becomes 0
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Where a triple came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Whole input sent in a single oracle call
    Document,
    /// Chunk with the given index
    Chunk(u32),
}

/// A subject-predicate-object statement produced by the oracle layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    pub provenance: Provenance,
}

impl Triple {
    /// Create a triple; fields are trimmed and confidence clamped
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            subject: subject.into().trim().to_string(),
            predicate: predicate.into().trim().to_string(),
            object: object.into().trim().to_string(),
            confidence: clamp_confidence(confidence),
            provenance: Provenance::Document,
        }
    }

    /// Return a copy tagged with a different provenance
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// True when subject, predicate and object are all non-empty
    pub fn is_well_formed(&self) -> bool {
        !self.subject.trim().is_empty()
            && !self.predicate.trim().is_empty()
            && !self.object.trim().is_empty()
    }

    /// Subject and object name the same thing
    pub fn is_self_loop(&self) -> bool {
        self.subject.trim() == self.object.trim()
    }

    /// Dedup key over the trimmed statement
    pub fn key(&self) -> (String, String, String) {
        (
            self.subject.trim().to_string(),
            self.predicate.trim().to_string(),
            self.object.trim().to_string(),
        )
    }
}

/// Result of one oracle client call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripleSet {
    pub triples: Vec<Triple>,

    /// Placeholder result produced because the oracle was unusable
    pub fallback: bool,

    /// Served from the result cache
    pub from_cache: bool,

    /// Explanation attached to fallback results
    pub message: Option<String>,
}

impl TripleSet {
    pub fn extracted(triples: Vec<Triple>) -> Self {
        Self {
            triples,
            ..Default::default()
        }
    }

    pub fn cached(triples: Vec<Triple>) -> Self {
        Self {
            triples,
            from_cache: true,
            ..Default::default()
        }
    }

    /// Well-formed, empty result tagged `fallback`
    pub fn fallback(message: impl Into<String>) -> Self {
        Self {
            triples: Vec::new(),
            fallback: true,
            from_cache: false,
            message: Some(message.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

// ============================================================================
// Entities and Disambiguation
// ============================================================================

/// Entity type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Work,
    Event,
    Generic,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Work => "work",
            Self::Event => "event",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a value within a triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRole {
    Subject,
    Object,
}

/// A known (or newly seen) entity representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    /// Entity name
    pub name: String,

    /// Entity type
    pub kind: EntityKind,

    /// Attribute values keyed by predicate
    pub attributes: BTreeMap<String, String>,

    /// Predicates the entity has been seen with
    pub contexts: BTreeSet<String>,
}

impl EntityCandidate {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            attributes: BTreeMap::new(),
            contexts: BTreeSet::new(),
        }
    }

    /// Add an attribute value
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a predicate context
    pub fn with_context(mut self, predicate: impl Into<String>) -> Self {
        self.contexts.insert(predicate.into());
        self
    }

    /// Fold another representation of the same entity into this one
    pub fn absorb(&mut self, other: EntityCandidate) {
        for (key, value) in other.attributes {
            self.attributes.entry(key).or_insert(value);
        }
        self.contexts.extend(other.contexts);
    }
}

/// Why a disambiguation decision was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    NewEntity,
    UniqueMatch,
    SimilarityMatch,
    HistoryMatch,
    NoSuitableMatch,
    Error,
}

/// Outcome of resolving one entity mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisambiguationResult {
    /// Name as it appeared in the triple
    pub mention: String,

    /// Entity type used for the lookup
    pub kind: EntityKind,

    /// Mention resolved to a previously known entity
    pub matched: bool,

    /// Canonical name of the matched entity
    pub canonical: Option<String>,

    pub confidence: f32,

    pub reason: ReasonCode,
}

impl DisambiguationResult {
    /// Name to write back into the triple
    pub fn resolved_name(&self) -> &str {
        self.canonical.as_deref().unwrap_or(&self.mention)
    }
}

/// Recorded mapping from a mention to its canonical entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub kind: EntityKind,
    pub alias: String,
    pub canonical: String,
    pub score: f32,
    pub recorded_at: DateTime<Utc>,
}

impl AliasRecord {
    pub fn new(
        kind: EntityKind,
        alias: impl Into<String>,
        canonical: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            kind,
            alias: alias.into(),
            canonical: canonical.into(),
            score: clamp_confidence(score),
            recorded_at: Utc::now(),
        }
    }
}

// ============================================================================
// Relation Constraints
// ============================================================================

/// How many distinct objects a predicate may have per subject (and vice versa)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationCardinality {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:N")]
    OneToMany,
    #[serde(rename = "N:1")]
    ManyToOne,
    #[serde(rename = "N:N")]
    ManyToMany,
}

/// Declared constraint for one predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationConstraint {
    pub predicate: String,

    pub cardinality: RelationCardinality,

    /// At most one such relation holds at a time
    #[serde(default)]
    pub exclusive: bool,

    /// Relation is time-bounded
    #[serde(default)]
    pub temporal: bool,

    /// Subject may equal object
    #[serde(default)]
    pub reflexive: bool,

    /// Predicates that contradict this one for the same subject
    #[serde(default)]
    pub conflicting_predicates: Vec<String>,
}

impl RelationConstraint {
    pub fn new(predicate: impl Into<String>, cardinality: RelationCardinality) -> Self {
        Self {
            predicate: predicate.into(),
            cardinality,
            exclusive: false,
            temporal: false,
            reflexive: false,
            conflicting_predicates: Vec::new(),
        }
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn temporal(mut self) -> Self {
        self.temporal = true;
        self
    }

    pub fn reflexive(mut self) -> Self {
        self.reflexive = true;
        self
    }

    pub fn conflicts_with<I, S>(mut self, predicates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conflicting_predicates
            .extend(predicates.into_iter().map(Into::into));
        self
    }
}

/// Tie-break used by fusion when a group disagrees on the object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectTieBreak {
    /// Longest object string (in characters)
    #[default]
    Longest,
    /// Object of the most confident member
    HighestConfidence,
    /// Object asserted most often
    MostFrequent,
}

// ============================================================================
// Enriched Triples
// ============================================================================

/// Validation state of an enriched triple
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Unchecked,
    Valid,
    Conflict,
    Invalid,
}

/// A relation that contradicts one already accepted for the same subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub conflicting_predicate: String,
    pub conflicting_object: String,
}

/// A triple carrying the annotations added by the enrichment chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Provenance of every triple folded into this one (sorted, unique)
    pub sources: Vec<Provenance>,

    pub validation_status: ValidationStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,

    /// Number of extracted triples merged into this one
    pub fusion_source_count: usize,

    /// Objects rejected by fusion for the same (subject, predicate)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_resolution: Option<DisambiguationResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_resolution: Option<DisambiguationResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictInfo>,

    /// Relation is time-bounded
    pub temporal: bool,

    /// Quality score of the subject entity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_contribution: Option<f32>,
}

impl From<Triple> for EnrichedTriple {
    fn from(triple: Triple) -> Self {
        Self {
            subject: triple.subject,
            predicate: triple.predicate,
            object: triple.object,
            confidence: clamp_confidence(triple.confidence),
            sources: vec![triple.provenance],
            validation_status: ValidationStatus::Unchecked,
            invalid_reason: None,
            fusion_source_count: 1,
            alternatives: Vec::new(),
            subject_resolution: None,
            object_resolution: None,
            conflict: None,
            temporal: false,
            quality_contribution: None,
        }
    }
}

impl EnrichedTriple {
    /// Return a copy with a new (clamped) confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    /// Identity used for the final dedup pass
    pub fn identity(&self) -> (&str, &str, &str, &[Provenance]) {
        (&self.subject, &self.predicate, &self.object, &self.sources)
    }
}

/// Counts produced by the relation validator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub conflicts: usize,
    pub validity_rate: f32,
}

// ============================================================================
// Quality
// ============================================================================

/// Overall quality grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
    VeryPoor,
}

impl QualityGrade {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.9 {
            Self::Excellent
        } else if score >= 0.8 {
            Self::Good
        } else if score >= 0.6 {
            Self::Fair
        } else if score >= 0.4 {
            Self::Poor
        } else {
            Self::VeryPoor
        }
    }
}

/// Quality metrics for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityQuality {
    pub name: String,
    pub kind: EntityKind,
    pub completeness: f32,
    pub consistency: f32,
    pub accuracy: f32,
    pub score: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_attributes: Vec<String>,
}

/// Quality assessment over an enriched triple set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub completeness: f32,
    pub consistency: f32,
    pub accuracy: f32,
    pub overall_score: f32,
    pub grade: QualityGrade,
    pub entity_count: usize,
    pub relation_count: usize,
    pub valid_relation_ratio: f32,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub entities: Vec<EntityQuality>,
}

impl QualityReport {
    /// Report for an empty triple set
    pub fn empty() -> Self {
        Self {
            completeness: 0.0,
            consistency: 0.0,
            accuracy: 0.0,
            overall_score: 0.0,
            grade: QualityGrade::VeryPoor,
            entity_count: 0,
            relation_count: 0,
            valid_relation_ratio: 0.0,
            issues: vec!["no triples to assess".to_string()],
            suggestions: vec!["add more data sources".to_string()],
            entities: Vec::new(),
        }
    }
}

// ============================================================================
// Requests, Batches and Outcomes
// ============================================================================

/// Immutable per-request context threaded through every stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub id: Uuid,
    pub text: String,
    pub kind: ExtractionKind,
    pub mode: ProcessingMode,
    pub received_at: DateTime<Utc>,
}

impl ExtractionRequest {
    pub fn new(text: impl Into<String>, kind: ExtractionKind, mode: ProcessingMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            kind,
            mode,
            received_at: Utc::now(),
        }
    }

    /// Input length in characters
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A stage error recorded in place of aborting the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: String,
    pub message: String,
}

/// Data handed from one enrichment stage to the next
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentBatch {
    /// Accepted triples
    pub triples: Vec<EnrichedTriple>,

    /// Triples rejected by validation, with reasons
    pub invalid: Vec<EnrichedTriple>,

    pub conflicts: Vec<ConflictInfo>,

    pub validation: Option<ValidationSummary>,

    pub quality: Option<QualityReport>,

    pub stage_failures: Vec<StageFailure>,
}

impl EnrichmentBatch {
    pub fn from_triples(triples: Vec<Triple>) -> Self {
        Self {
            triples: triples.into_iter().map(EnrichedTriple::from).collect(),
            ..Default::default()
        }
    }
}

/// Per-document chunking statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub successful_chunks: usize,
    pub failed_chunks: Vec<u32>,
    /// Unique triples after merge
    pub total_triples: usize,
    pub success_rate: f32,
    pub from_cache: bool,
}

/// Statistics returned alongside an outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub chunks: ChunkStats,
    pub output_triples: usize,
    pub invalid_triples: usize,
    pub elapsed_ms: u64,
}

/// Final result of one `extract` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub request_id: Uuid,
    pub kind: ExtractionKind,
    pub mode: ProcessingMode,
    pub triples: Vec<EnrichedTriple>,
    pub invalid: Vec<EnrichedTriple>,
    pub conflicts: Vec<ConflictInfo>,
    pub validation: Option<ValidationSummary>,
    pub quality: Option<QualityReport>,
    pub stats: ExtractionStats,
    pub stage_failures: Vec<StageFailure>,

    /// Oracle was unusable and the result is a placeholder
    pub fallback: bool,

    pub message: Option<String>,
    pub processed_at: DateTime<Utc>,
}

// ============================================================================
// Traits
// ============================================================================

/// Remote text-to-triples service
#[async_trait::async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Send a rendered prompt and return the raw text answer
    async fn call(
        &self,
        prompt: &str,
        kind: ExtractionKind,
    ) -> std::result::Result<String, OracleError>;

    /// Oracle name for logging
    fn name(&self) -> &str;
}

/// Lookup and insertion of previously seen entities.
///
/// Implementations must tolerate concurrent callers. Entries are only ever
/// added or extended, never removed.
pub trait EntityStore: Send + Sync {
    /// Entities of `kind` whose name equals `name`
    fn find(&self, kind: EntityKind, name: &str) -> Result<Vec<EntityCandidate>>;

    /// Entities of `kind` whose name is similar to `name`, at most `limit`
    fn candidates(&self, kind: EntityKind, name: &str, limit: usize)
        -> Result<Vec<EntityCandidate>>;

    /// Insert a candidate, merging into an existing entry of the same key
    fn insert(&self, candidate: EntityCandidate) -> Result<()>;

    /// Record a mention-to-canonical mapping
    fn record_alias(&self, record: AliasRecord) -> Result<()>;

    /// Recorded mappings for a mention
    fn aliases(&self, kind: EntityKind, alias: &str) -> Result<Vec<AliasRecord>>;

    /// Number of known entities
    fn entity_count(&self) -> usize;
}

/// Optional slower cache tier shared between processes
#[async_trait::async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    fn name(&self) -> &str;
}

/// Storage hand-off for finished outcomes
#[async_trait::async_trait]
pub trait TripleSink: Send + Sync {
    async fn persist(&self, outcome: &ExtractionOutcome) -> Result<()>;
}

/// One step of the enrichment chain
pub trait EnrichmentStage: Send + Sync {
    /// Stage name, used in logs and failure annotations
    fn name(&self) -> &'static str;

    /// Produce a new batch from the previous one
    fn apply(&self, request: &ExtractionRequest, batch: &EnrichmentBatch)
        -> Result<EnrichmentBatch>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_error_classification() {
        assert_eq!(
            OracleError::Timeout("30s".into()).class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            OracleError::from_status(503, "unavailable").class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            OracleError::from_status(429, "slow down").class(),
            ErrorClass::Retryable
        );
        assert!(OracleError::from_status(401, "bad key").is_fatal());
        assert!(OracleError::from_status(400, "bad body").is_fatal());
        assert_eq!(
            OracleError::from_status(404, "missing").class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            OracleError::Busy("no permit".into()).class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            OracleError::Parse("no json".into()).class(),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn test_extraction_kind_parse() {
        assert_eq!(
            "triples".parse::<ExtractionKind>().unwrap(),
            ExtractionKind::Triples
        );
        assert_eq!(
            "CelebrityCelebrity".parse::<ExtractionKind>().unwrap(),
            ExtractionKind::CelebrityRelation
        );
        assert!("movie".parse::<ExtractionKind>().is_err());
        assert_eq!(
            ExtractionKind::parse_or_default("movie"),
            ExtractionKind::Triples
        );
        assert_eq!(ExtractionKind::ALL.len(), 5);
    }

    #[test]
    fn test_processing_mode_parse() {
        assert_eq!(
            "pass-through".parse::<ProcessingMode>().unwrap(),
            ProcessingMode::PassThrough
        );
        assert_eq!(
            "standard".parse::<ProcessingMode>().unwrap(),
            ProcessingMode::PassThrough
        );
        assert_eq!(
            "FUSION".parse::<ProcessingMode>().unwrap(),
            ProcessingMode::Fusion
        );
        assert!("turbo".parse::<ProcessingMode>().is_err());
    }

    #[test]
    fn test_triple_clamps_and_trims() {
        let triple = Triple::new(" Alice ", "spouse", "Bob", 1.7);
        assert_eq!(triple.subject, "Alice");
        assert_eq!(triple.confidence, 1.0);
        assert!(triple.is_well_formed());

        let empty = Triple::new("Alice", " ", "Bob", -0.3);
        assert_eq!(empty.confidence, 0.0);
        assert!(!empty.is_well_formed());

        assert_eq!(clamp_confidence(f32::NAN), 0.0);
    }

    #[test]
    fn test_enriched_from_triple() {
        let triple = Triple::new("小明", "是", "学生", 0.9).with_provenance(Provenance::Chunk(2));
        let enriched = EnrichedTriple::from(triple);

        assert_eq!(enriched.sources, vec![Provenance::Chunk(2)]);
        assert_eq!(enriched.fusion_source_count, 1);
        assert_eq!(enriched.validation_status, ValidationStatus::Unchecked);
    }

    #[test]
    fn test_quality_grade_thresholds() {
        assert_eq!(QualityGrade::from_score(0.95), QualityGrade::Excellent);
        assert_eq!(QualityGrade::from_score(0.9), QualityGrade::Excellent);
        assert_eq!(QualityGrade::from_score(0.85), QualityGrade::Good);
        assert_eq!(QualityGrade::from_score(0.6), QualityGrade::Fair);
        assert_eq!(QualityGrade::from_score(0.4), QualityGrade::Poor);
        assert_eq!(QualityGrade::from_score(0.39), QualityGrade::VeryPoor);
    }

    #[test]
    fn test_candidate_absorb_keeps_existing_attributes() {
        let mut known = EntityCandidate::new("周杰伦", EntityKind::Person)
            .with_attribute("职业", "歌手")
            .with_context("职业");
        let other = EntityCandidate::new("周杰伦", EntityKind::Person)
            .with_attribute("职业", "演员")
            .with_attribute("国籍", "中国")
            .with_context("国籍");

        known.absorb(other);

        assert_eq!(known.attributes.get("职业"), Some(&"歌手".to_string()));
        assert_eq!(known.attributes.get("国籍"), Some(&"中国".to_string()));
        assert_eq!(known.contexts.len(), 2);
    }

    #[test]
    fn test_constraint_serde_cardinality() {
        let constraint = RelationConstraint::new("spouse", RelationCardinality::OneToOne)
            .exclusive()
            .conflicts_with(["ex_spouse"]);
        let json = serde_json::to_string(&constraint).unwrap();
        assert!(json.contains("\"1:1\""));

        let back: RelationConstraint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, constraint);
    }
}
