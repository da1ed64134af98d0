//! Keyword-based entity classification
//!
//! Decides whether a triple value names an entity and of which kind, using
//! lexical shape first and predicate cues second. Literal values (numbers,
//! dates, single characters, sentences) are not entities.

use kgx_core::{EntityKind, EntityRole};
use regex::Regex;

use crate::EntityClassifier;

// ============================================================================
// Rule tables
// ============================================================================

const WORK_MARKERS: [&str; 4] = ["专辑", "电影", "album", "film"];
const EVENT_MARKERS: [&str; 4] = ["活动", "典礼", "颁奖", "发布会"];
const EVENT_SUFFIXES: [char; 4] = ['节', '会', '展', '赛'];

/// Values longer than this are treated as text, not names
const MAX_ENTITY_CHARS: usize = 40;

/// Whitespace-separated tokens beyond which a value reads as a sentence
const MAX_ENTITY_TOKENS: usize = 5;

/// Predicate cue: (predicate fragment, subject kind, object kind)
///
/// `None` on the object side marks predicates whose objects are attribute
/// values rather than entities.
type PredicateCue = (&'static str, Option<EntityKind>, Option<EntityKind>);

const PREDICATE_CUES: &[PredicateCue] = &[
    // person -> work
    ("导演", Some(EntityKind::Person), Some(EntityKind::Work)),
    ("主演", Some(EntityKind::Person), Some(EntityKind::Work)),
    ("演唱", Some(EntityKind::Person), Some(EntityKind::Work)),
    ("作品", Some(EntityKind::Person), Some(EntityKind::Work)),
    ("director", Some(EntityKind::Person), Some(EntityKind::Work)),
    ("starred_in", Some(EntityKind::Person), Some(EntityKind::Work)),
    // person -> person
    ("配偶", Some(EntityKind::Person), Some(EntityKind::Person)),
    ("父亲", Some(EntityKind::Person), Some(EntityKind::Person)),
    ("母亲", Some(EntityKind::Person), Some(EntityKind::Person)),
    ("子女", Some(EntityKind::Person), Some(EntityKind::Person)),
    ("spouse", Some(EntityKind::Person), Some(EntityKind::Person)),
    ("father", Some(EntityKind::Person), Some(EntityKind::Person)),
    ("mother", Some(EntityKind::Person), Some(EntityKind::Person)),
    // person -> event
    ("参加", Some(EntityKind::Person), Some(EntityKind::Event)),
    ("出席", Some(EntityKind::Person), Some(EntityKind::Event)),
    ("获奖", Some(EntityKind::Person), Some(EntityKind::Event)),
    // person attributes
    ("职业", Some(EntityKind::Person), None),
    ("国籍", Some(EntityKind::Person), None),
    ("出生", Some(EntityKind::Person), None),
    ("occupation", Some(EntityKind::Person), None),
    ("nationality", Some(EntityKind::Person), None),
    ("birth", Some(EntityKind::Person), None),
    // work attributes
    ("上映", Some(EntityKind::Work), None),
    ("发行", Some(EntityKind::Work), None),
    ("票房", Some(EntityKind::Work), None),
    ("release", Some(EntityKind::Work), None),
    // event attributes
    ("举办", Some(EntityKind::Event), None),
];

// ============================================================================
// Keyword Classifier
// ============================================================================

/// Default classifier driven by keyword and predicate tables
pub struct KeywordClassifier {
    /// Patterns for literal values (numbers, dates)
    literal_patterns: Vec<Regex>,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        let mut classifier = Self {
            literal_patterns: Vec::new(),
        };
        classifier.init_literal_patterns();
        classifier
    }

    fn init_literal_patterns(&mut self) {
        let patterns = [
            // 42, -3.5, 1,000, 85%
            r"^[+-]?\d+(?:[.,]\d+)*%?$",
            // 1979, 1979-01-18, 2007/5/1, 1979年1月18日
            r"^\d{4}(?:[-/.年]\d{1,2}(?:[-/.月]\d{1,2}日?)?月?)?年?$",
            // 1月18日
            r"^\d{1,2}月\d{1,2}日$",
            // 2000年代, 90年代
            r"^\d{2,4}年代$",
        ];
        for pattern in patterns {
            if let Ok(regex) = Regex::new(pattern) {
                self.literal_patterns.push(regex);
            }
        }
    }

    fn lexical_kind(value: &str) -> Option<EntityKind> {
        let lower = value.to_lowercase();
        if (value.starts_with('《') && value.ends_with('》'))
            || WORK_MARKERS.iter().any(|m| lower.contains(m))
        {
            return Some(EntityKind::Work);
        }
        if value.ends_with(&EVENT_SUFFIXES[..]) || EVENT_MARKERS.iter().any(|m| value.contains(m)) {
            return Some(EntityKind::Event);
        }
        None
    }

    fn predicate_cue(predicate: &str) -> Option<&'static PredicateCue> {
        let lower = predicate.to_lowercase();
        PREDICATE_CUES
            .iter()
            .find(|(fragment, _, _)| lower.contains(fragment))
    }

    fn is_literal(&self, value: &str) -> bool {
        let chars = value.chars().count();
        chars <= 1
            || chars > MAX_ENTITY_CHARS
            || value.split_whitespace().count() > MAX_ENTITY_TOKENS
            || self.literal_patterns.iter().any(|re| re.is_match(value))
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityClassifier for KeywordClassifier {
    fn classify(&self, value: &str, predicate: &str, role: EntityRole) -> Option<EntityKind> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        if let Some(kind) = Self::lexical_kind(value) {
            return Some(kind);
        }

        // dates and numbers stay literals whatever the predicate suggests
        if self.is_literal(value) {
            return None;
        }

        if let Some((_, subject_kind, object_kind)) = Self::predicate_cue(predicate) {
            match role {
                EntityRole::Subject => {
                    if let Some(kind) = subject_kind {
                        return Some(*kind);
                    }
                }
                // attribute predicates: the object is a value
                EntityRole::Object => return *object_kind,
            }
        }

        Some(EntityKind::Generic)
    }
}
