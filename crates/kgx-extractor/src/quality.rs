//! Quality assessment stage
//!
//! Scores the entities described by an enriched triple set on completeness,
//! consistency and accuracy, and aggregates them into a graded report with
//! issues and suggestions.
//!
//! Author: hephaex@gmail.com

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use kgx_core::{
    EnrichedTriple, EnrichmentBatch, EnrichmentStage, EntityKind, EntityQuality, EntityRole,
    ExtractionRequest, QualityGrade, QualityReport, Result, ValidationStatus,
};
use tracing::debug;

use crate::EntityClassifier;

const COMPLETENESS_WEIGHT: f32 = 0.3;
const CONSISTENCY_WEIGHT: f32 = 0.3;
const ACCURACY_WEIGHT: f32 = 0.4;

/// Entities scoring below this are reported as low quality
pub const LOW_QUALITY_SCORE: f32 = 0.6;

/// Relations below this confidence are suggested for manual review
pub const LOW_CONFIDENCE: f32 = 0.7;

/// Attribute count at which a generic entity counts as complete
const GENERIC_COMPLETE_ATTRIBUTES: f32 = 5.0;

/// Maximum variance of values in [0, 1]
const MAX_VARIANCE: f32 = 0.25;

// ============================================================================
// Required attributes
// ============================================================================

/// A required attribute and the predicates that satisfy it
type RequiredAttribute = (&'static str, &'static [&'static str]);

const PERSON_ATTRIBUTES: &[RequiredAttribute] = &[
    ("occupation", &["职业", "occupation", "profession"]),
    (
        "birth",
        &["出生", "出生日期", "出生地", "出生年", "birth", "birth_date", "birthplace"],
    ),
    ("nationality", &["国籍", "nationality"]),
];

const WORK_ATTRIBUTES: &[RequiredAttribute] = &[
    ("type", &["类型", "type", "genre"]),
    ("director/author", &["导演", "作者", "编剧", "director", "author"]),
    (
        "release",
        &["上映", "上映时间", "发行", "发行时间", "首映", "release", "release_date"],
    ),
];

const EVENT_ATTRIBUTES: &[RequiredAttribute] = &[
    ("time", &["时间", "举办时间", "日期", "time", "date"]),
    ("location", &["地点", "举办地点", "location", "venue"]),
];

fn required_attributes(kind: EntityKind) -> &'static [RequiredAttribute] {
    match kind {
        EntityKind::Person => PERSON_ATTRIBUTES,
        EntityKind::Work => WORK_ATTRIBUTES,
        EntityKind::Event => EVENT_ATTRIBUTES,
        EntityKind::Generic => &[],
    }
}

// ============================================================================
// Entity profiles
// ============================================================================

/// What the triple set says about one entity
struct EntityProfile {
    name: String,
    kind: EntityKind,
    /// Predicates where the entity is the subject
    attributes: BTreeSet<String>,
    confidences: Vec<f32>,
}

impl EntityProfile {
    fn assess(&self) -> EntityQuality {
        let required = required_attributes(self.kind);
        let missing: Vec<String> = required
            .iter()
            .filter(|(_, predicates)| !predicates.iter().any(|p| self.attributes.contains(*p)))
            .map(|(name, _)| name.to_string())
            .collect();

        let completeness = if required.is_empty() {
            (self.attributes.len() as f32 / GENERIC_COMPLETE_ATTRIBUTES).min(1.0)
        } else {
            (required.len() - missing.len()) as f32 / required.len() as f32
        };
        let consistency = consistency(&self.confidences);
        let accuracy = mean(&self.confidences);

        EntityQuality {
            name: self.name.clone(),
            kind: self.kind,
            completeness,
            consistency,
            accuracy,
            score: weighted(completeness, consistency, accuracy),
            missing_attributes: missing,
        }
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// `1 - variance / 0.25`; a single value is fully consistent
fn consistency(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 1.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f32>() / values.len() as f32;
    (1.0 - variance / MAX_VARIANCE).clamp(0.0, 1.0)
}

fn weighted(completeness: f32, consistency: f32, accuracy: f32) -> f32 {
    COMPLETENESS_WEIGHT * completeness
        + CONSISTENCY_WEIGHT * consistency
        + ACCURACY_WEIGHT * accuracy
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// Quality Assessor
// ============================================================================

/// Enrichment stage producing a [`QualityReport`]
pub struct QualityAssessor {
    classifier: Arc<dyn EntityClassifier>,
}

impl QualityAssessor {
    pub fn new(classifier: Arc<dyn EntityClassifier>) -> Self {
        Self { classifier }
    }

    fn profiles(&self, triples: &[EnrichedTriple]) -> Vec<EntityProfile> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut profiles: Vec<EntityProfile> = Vec::new();

        let mut profile_for = |name: &str, kind: EntityKind| -> usize {
            *index.entry(name.to_string()).or_insert_with(|| {
                profiles.push(EntityProfile {
                    name: name.to_string(),
                    kind,
                    attributes: BTreeSet::new(),
                    confidences: Vec::new(),
                });
                profiles.len() - 1
            })
        };

        let mut sightings: Vec<(usize, Option<String>, f32)> = Vec::new();
        for triple in triples {
            let subject_kind = self
                .classifier
                .classify(&triple.subject, &triple.predicate, EntityRole::Subject)
                .unwrap_or(EntityKind::Generic);
            let slot = profile_for(&triple.subject, subject_kind);
            sightings.push((slot, Some(triple.predicate.clone()), triple.confidence));

            if let Some(object_kind) =
                self.classifier
                    .classify(&triple.object, &triple.predicate, EntityRole::Object)
            {
                let slot = profile_for(&triple.object, object_kind);
                sightings.push((slot, None, triple.confidence));
            }
        }

        for (slot, attribute, confidence) in sightings {
            let profile = &mut profiles[slot];
            profile.confidences.push(confidence);
            if let Some(attribute) = attribute {
                profile.attributes.insert(attribute);
            }
        }

        profiles
    }

    /// Assess accepted triples, with `invalid_count` rejected ones alongside
    pub fn assess(&self, triples: &[EnrichedTriple], invalid_count: usize) -> QualityReport {
        if triples.is_empty() {
            return QualityReport::empty();
        }

        let entities: Vec<EntityQuality> = self
            .profiles(triples)
            .iter()
            .map(EntityProfile::assess)
            .collect();

        let n = entities.len() as f32;
        let completeness = entities.iter().map(|e| e.completeness).sum::<f32>() / n;
        let consistency = entities.iter().map(|e| e.consistency).sum::<f32>() / n;
        let accuracy = entities.iter().map(|e| e.accuracy).sum::<f32>() / n;
        let overall_score = round2(weighted(completeness, consistency, accuracy));

        let conflicts = triples
            .iter()
            .filter(|t| t.validation_status == ValidationStatus::Conflict)
            .count();
        let low_quality = entities.iter().filter(|e| e.score < LOW_QUALITY_SCORE).count();
        let incomplete = entities
            .iter()
            .filter(|e| !e.missing_attributes.is_empty())
            .count();

        let mut issues = Vec::new();
        if low_quality > 0 {
            issues.push(format!("{low_quality} low-quality entities found"));
        }
        if conflicts > 0 {
            issues.push(format!("{conflicts} relation conflicts found"));
        }
        if invalid_count > 0 {
            issues.push(format!("{invalid_count} invalid relations found"));
        }
        if incomplete > 0 {
            issues.push(format!("{incomplete} entities missing required attributes"));
        }

        let mut suggestions = vec![weakest_metric_suggestion(completeness, consistency, accuracy)];
        if overall_score < 0.8 {
            suggestions.push("add more data sources".to_string());
        }
        if triples.iter().any(|t| t.confidence < LOW_CONFIDENCE) {
            suggestions.push("manually review low-confidence relations".to_string());
        }

        let relation_count = triples.len();
        QualityReport {
            completeness,
            consistency,
            accuracy,
            overall_score,
            grade: QualityGrade::from_score(overall_score),
            entity_count: entities.len(),
            relation_count,
            valid_relation_ratio: relation_count as f32 / (relation_count + invalid_count) as f32,
            issues,
            suggestions,
            entities,
        }
    }
}

fn weakest_metric_suggestion(completeness: f32, consistency: f32, accuracy: f32) -> String {
    let suggestion = if completeness <= consistency && completeness <= accuracy {
        "complete missing entity attributes"
    } else if consistency <= accuracy {
        "reconcile inconsistent confidence across sources"
    } else {
        "improve extraction accuracy with more reliable sources"
    };
    suggestion.to_string()
}

impl EnrichmentStage for QualityAssessor {
    fn name(&self) -> &'static str {
        "quality"
    }

    fn apply(
        &self,
        request: &ExtractionRequest,
        batch: &EnrichmentBatch,
    ) -> Result<EnrichmentBatch> {
        let report = self.assess(&batch.triples, batch.invalid.len());

        let scores: HashMap<&str, f32> = report
            .entities
            .iter()
            .map(|e| (e.name.as_str(), e.score))
            .collect();

        let mut next = batch.clone();
        for triple in &mut next.triples {
            triple.quality_contribution = scores.get(triple.subject.as_str()).copied();
        }

        debug!(
            request_id = %request.id,
            overall = report.overall_score,
            grade = ?report.grade,
            entities = report.entity_count,
            "Quality assessment complete"
        );

        next.quality = Some(report);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordClassifier;
    use kgx_core::Triple;

    fn assessor() -> QualityAssessor {
        QualityAssessor::new(Arc::new(KeywordClassifier::new()))
    }

    fn triple(s: &str, p: &str, o: &str, confidence: f32) -> EnrichedTriple {
        EnrichedTriple::from(Triple::new(s, p, o, confidence))
    }

    #[test]
    fn test_empty_set() {
        let report = assessor().assess(&[], 0);
        assert_eq!(report.grade, QualityGrade::VeryPoor);
        assert_eq!(report.issues, vec!["no triples to assess"]);
    }

    #[test]
    fn test_complete_person() {
        let report = assessor().assess(
            &[
                triple("周杰伦", "职业", "歌手", 0.9),
                triple("周杰伦", "出生日期", "1979年1月18日", 0.9),
                triple("周杰伦", "国籍", "中国", 0.9),
            ],
            0,
        );

        assert_eq!(report.entity_count, 1);
        let person = &report.entities[0];
        assert_eq!(person.kind, EntityKind::Person);
        assert_eq!(person.completeness, 1.0);
        assert_eq!(person.consistency, 1.0);
        assert!((person.accuracy - 0.9).abs() < 1e-6);
        // 0.3 + 0.3 + 0.36
        assert_eq!(report.overall_score, 0.96);
        assert_eq!(report.grade, QualityGrade::Excellent);
        assert!(report.issues.is_empty());
        assert_eq!(report.valid_relation_ratio, 1.0);
    }

    #[test]
    fn test_missing_attributes_and_issues() {
        let report = assessor().assess(
            &[
                triple("周杰伦", "配偶", "昆凌", 0.5),
                triple("周杰伦", "职业", "歌手", 0.9),
            ],
            2,
        );

        // person subject plus person object
        assert_eq!(report.entity_count, 2);
        let jay = &report.entities[0];
        assert_eq!(jay.missing_attributes, vec!["birth", "nationality"]);
        assert!((jay.consistency - (1.0 - 0.04 / 0.25)).abs() < 1e-5);

        assert!(report
            .issues
            .contains(&"2 invalid relations found".to_string()));
        assert!(report
            .issues
            .contains(&"2 entities missing required attributes".to_string()));
        assert!(report
            .suggestions
            .contains(&"manually review low-confidence relations".to_string()));
        assert!((report.valid_relation_ratio - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_generic_completeness_by_attribute_count() {
        let report = assessor().assess(&[triple("小明", "是", "学生", 0.9)], 0);

        let xiaoming = &report.entities[0];
        assert_eq!(xiaoming.kind, EntityKind::Generic);
        assert!((xiaoming.completeness - 0.2).abs() < 1e-6);
        assert_eq!(report.entities[1].name, "学生");
        assert_eq!(report.entities[1].completeness, 0.0);
    }

    #[test]
    fn test_stage_sets_contribution() {
        let request = ExtractionRequest::new(
            "text",
            kgx_core::ExtractionKind::Triples,
            kgx_core::ProcessingMode::Fusion,
        );
        let batch = EnrichmentBatch::from_triples(vec![Triple::new("小明", "是", "学生", 0.9)]);

        let next = assessor().apply(&request, &batch).unwrap();

        let report = next.quality.as_ref().unwrap();
        assert_eq!(
            next.triples[0].quality_contribution,
            Some(report.entities[0].score)
        );
    }
}
