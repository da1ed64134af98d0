//! Relation validation stage
//!
//! Checks triples against predicate constraints (cardinality, exclusivity,
//! conflicting predicates, temporal scope). Triples are checked in order
//! against the relations already accepted from the same batch.

use std::collections::{HashMap, HashSet};

use kgx_core::{
    ConflictInfo, EnrichedTriple, EnrichmentBatch, EnrichmentStage, ExtractionRequest,
    RelationCardinality, RelationConstraint, Result, ValidationStatus, ValidationSummary,
};
use tracing::debug;

/// Confidence factor for a triple contradicting an accepted one
pub const CONFLICT_PENALTY: f32 = 0.7;

/// Confidence factor for time-bounded relations
pub const TEMPORAL_PENALTY: f32 = 0.9;

/// Built-in constraint table
pub fn default_constraints() -> Vec<RelationConstraint> {
    use RelationCardinality::*;

    vec![
        RelationConstraint::new("配偶", OneToOne)
            .exclusive()
            .conflicts_with(["前配偶", "离婚"]),
        RelationConstraint::new("spouse", OneToOne)
            .exclusive()
            .conflicts_with(["ex_spouse"]),
        RelationConstraint::new("导演", OneToMany),
        RelationConstraint::new("director", OneToMany),
        RelationConstraint::new("主演", ManyToMany),
        RelationConstraint::new("starred_in", ManyToMany),
        RelationConstraint::new("父亲", ManyToOne).conflicts_with(["母亲"]),
        RelationConstraint::new("father", ManyToOne).conflicts_with(["mother"]),
        RelationConstraint::new("母亲", ManyToOne).conflicts_with(["父亲"]),
        RelationConstraint::new("mother", ManyToOne).conflicts_with(["father"]),
        RelationConstraint::new("前配偶", OneToMany)
            .temporal()
            .conflicts_with(["配偶"]),
        RelationConstraint::new("ex_spouse", OneToMany)
            .temporal()
            .conflicts_with(["spouse"]),
    ]
}

// ============================================================================
// Accepted relation index
// ============================================================================

/// Relations accepted so far in one validation run
#[derive(Default)]
struct AcceptedRelations {
    triples: HashSet<(String, String, String)>,
    /// (subject, predicate) -> objects
    by_subject: HashMap<(String, String), Vec<String>>,
    /// (predicate, object) -> subjects
    by_object: HashMap<(String, String), Vec<String>>,
}

impl AcceptedRelations {
    fn contains(&self, triple: &EnrichedTriple) -> bool {
        self.triples.contains(&(
            triple.subject.clone(),
            triple.predicate.clone(),
            triple.object.clone(),
        ))
    }

    fn objects(&self, subject: &str, predicate: &str) -> &[String] {
        self.by_subject
            .get(&(subject.to_string(), predicate.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn subjects(&self, predicate: &str, object: &str) -> &[String] {
        self.by_object
            .get(&(predicate.to_string(), object.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn accept(&mut self, triple: &EnrichedTriple) {
        let (s, p, o) = (&triple.subject, &triple.predicate, &triple.object);
        self.triples.insert((s.clone(), p.clone(), o.clone()));
        self.by_subject
            .entry((s.clone(), p.clone()))
            .or_default()
            .push(o.clone());
        self.by_object
            .entry((p.clone(), o.clone()))
            .or_default()
            .push(s.clone());
    }
}

// ============================================================================
// Relation Validator
// ============================================================================

/// Enrichment stage validating triples against relation constraints
pub struct RelationValidator {
    constraints: HashMap<String, RelationConstraint>,
}

impl RelationValidator {
    pub fn new(constraints: Vec<RelationConstraint>) -> Self {
        Self {
            constraints: constraints
                .into_iter()
                .map(|c| (c.predicate.clone(), c))
                .collect(),
        }
    }

    /// Validator with the built-in table
    pub fn with_defaults() -> Self {
        Self::new(default_constraints())
    }

    /// Validator from configured constraints, or the built-in table when none are set
    pub fn from_config(constraints: &[RelationConstraint]) -> Self {
        if constraints.is_empty() {
            Self::with_defaults()
        } else {
            Self::new(constraints.to_vec())
        }
    }

    pub fn constraint(&self, predicate: &str) -> Option<&RelationConstraint> {
        self.constraints.get(predicate)
    }

    /// Predicates allowed to relate an entity to itself
    pub fn reflexive_predicates(&self) -> HashSet<String> {
        self.constraints
            .values()
            .filter(|c| c.reflexive)
            .map(|c| c.predicate.clone())
            .collect()
    }

    /// Check a triple; `Err` carries the reason it is invalid
    fn check(
        &self,
        accepted: &AcceptedRelations,
        triple: &mut EnrichedTriple,
    ) -> std::result::Result<(), String> {
        if triple.subject.trim().is_empty() || triple.object.trim().is_empty() {
            return Err("empty subject or object".to_string());
        }

        let constraint = self.constraint(&triple.predicate);

        if triple.subject == triple.object && !constraint.is_some_and(|c| c.reflexive) {
            return Err(format!("self relation on '{}'", triple.predicate));
        }

        if accepted.contains(triple) {
            triple.validation_status = ValidationStatus::Valid;
            return Ok(());
        }

        let Some(constraint) = constraint else {
            triple.validation_status = ValidationStatus::Valid;
            return Ok(());
        };

        check_cardinality(accepted, constraint, triple)?;

        triple.validation_status = ValidationStatus::Valid;

        let conflict = constraint.conflicting_predicates.iter().find_map(|other| {
            accepted
                .objects(&triple.subject, other)
                .first()
                .map(|object| (other.clone(), object.clone()))
        });
        if let Some((conflicting_predicate, conflicting_object)) = conflict {
            triple.validation_status = ValidationStatus::Conflict;
            triple.confidence *= CONFLICT_PENALTY;
            triple.conflict = Some(ConflictInfo {
                subject: triple.subject.clone(),
                predicate: triple.predicate.clone(),
                object: triple.object.clone(),
                conflicting_predicate,
                conflicting_object,
            });
        }

        if constraint.temporal {
            triple.temporal = true;
            triple.confidence *= TEMPORAL_PENALTY;
        }

        Ok(())
    }

    /// Validate a list of triples, splitting accepted from invalid ones
    pub fn validate(
        &self,
        triples: &[EnrichedTriple],
    ) -> (Vec<EnrichedTriple>, Vec<EnrichedTriple>, ValidationSummary) {
        let mut accepted = AcceptedRelations::default();
        let mut valid = Vec::new();
        let mut invalid = Vec::new();

        for triple in triples {
            let mut triple = triple.clone();
            match self.check(&accepted, &mut triple) {
                Ok(()) => {
                    accepted.accept(&triple);
                    valid.push(triple);
                }
                Err(reason) => {
                    triple.validation_status = ValidationStatus::Invalid;
                    triple.invalid_reason = Some(reason);
                    invalid.push(triple);
                }
            }
        }

        let conflicts = valid
            .iter()
            .filter(|t| t.validation_status == ValidationStatus::Conflict)
            .count();
        let total = triples.len();
        let summary = ValidationSummary {
            total,
            valid: valid.len() - conflicts,
            invalid: invalid.len(),
            conflicts,
            validity_rate: if total == 0 {
                0.0
            } else {
                valid.len() as f32 / total as f32
            },
        };

        (valid, invalid, summary)
    }
}

impl Default for RelationValidator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn check_cardinality(
    accepted: &AcceptedRelations,
    constraint: &RelationConstraint,
    triple: &EnrichedTriple,
) -> std::result::Result<(), String> {
    let (s, p, o) = (&triple.subject, &triple.predicate, &triple.object);
    let subject_taken = !accepted.objects(s, p).is_empty();
    let object_taken_by_other = accepted.subjects(p, o).iter().any(|other| other != s);

    match constraint.cardinality {
        RelationCardinality::OneToOne if subject_taken => {
            Err(format!("'{s}' already has a '{p}' relation"))
        }
        RelationCardinality::OneToOne if !accepted.subjects(p, o).is_empty() => {
            Err(format!("'{o}' is already the target of a '{p}' relation"))
        }
        RelationCardinality::OneToMany if object_taken_by_other => {
            Err(format!("'{o}' is already the '{p}' target of another subject"))
        }
        RelationCardinality::ManyToOne if subject_taken => {
            Err(format!("'{s}' already has a '{p}' relation"))
        }
        _ => Ok(()),
    }
}

impl EnrichmentStage for RelationValidator {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn apply(
        &self,
        request: &ExtractionRequest,
        batch: &EnrichmentBatch,
    ) -> Result<EnrichmentBatch> {
        let (valid, invalid, summary) = self.validate(&batch.triples);

        debug!(
            request_id = %request.id,
            total = summary.total,
            invalid = summary.invalid,
            conflicts = summary.conflicts,
            "Validation complete"
        );

        let mut next = batch.clone();
        next.conflicts
            .extend(valid.iter().filter_map(|t| t.conflict.clone()));
        next.invalid.extend(invalid);
        next.triples = valid;
        next.validation = Some(summary);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgx_core::Triple;

    fn triple(s: &str, p: &str, o: &str) -> EnrichedTriple {
        EnrichedTriple::from(Triple::new(s, p, o, 1.0))
    }

    #[test]
    fn test_spouse_is_one_to_one() {
        let validator = RelationValidator::with_defaults();
        let (valid, invalid, summary) = validator.validate(&[
            triple("周杰伦", "配偶", "昆凌"),
            triple("周杰伦", "配偶", "蔡依林"),
            triple("王力宏", "配偶", "昆凌"),
        ]);

        assert_eq!(valid.len(), 1);
        assert_eq!(invalid.len(), 2);
        assert!(invalid
            .iter()
            .all(|t| t.validation_status == ValidationStatus::Invalid && t.invalid_reason.is_some()));
        assert_eq!(summary.total, 3);
        assert_eq!(summary.valid, 1);
        assert!((summary.validity_rate - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_exact_repeat_is_valid() {
        let validator = RelationValidator::with_defaults();
        let (valid, invalid, _) = validator.validate(&[
            triple("周杰伦", "配偶", "昆凌"),
            triple("周杰伦", "配偶", "昆凌"),
        ]);

        assert_eq!(valid.len(), 2);
        assert!(invalid.is_empty());
    }

    #[test]
    fn test_self_relation_invalid_unless_reflexive() {
        let validator = RelationValidator::with_defaults();
        let (_, invalid, _) = validator.validate(&[triple("A", "认识", "A")]);
        assert_eq!(invalid.len(), 1);

        let reflexive = RelationValidator::new(vec![RelationConstraint::new(
            "认识",
            RelationCardinality::ManyToMany,
        )
        .reflexive()]);
        let (valid, _, _) = reflexive.validate(&[triple("A", "认识", "A")]);
        assert_eq!(valid.len(), 1);
    }

    #[test]
    fn test_director_one_to_many() {
        let validator = RelationValidator::with_defaults();
        let (valid, invalid, _) = validator.validate(&[
            triple("周杰伦", "导演", "不能说的秘密"),
            triple("周杰伦", "导演", "天台爱情"),
            triple("张艺谋", "导演", "不能说的秘密"),
        ]);

        assert_eq!(valid.len(), 2);
        assert_eq!(invalid[0].subject, "张艺谋");
    }

    #[test]
    fn test_father_many_to_one() {
        let validator = RelationValidator::with_defaults();
        let (valid, invalid, _) = validator.validate(&[
            triple("小明", "父亲", "老王"),
            triple("小红", "父亲", "老王"),
            triple("小明", "父亲", "老李"),
        ]);

        assert_eq!(valid.len(), 2);
        assert_eq!(invalid[0].object, "老李");
    }

    #[test]
    fn test_conflict_and_temporal_penalties() {
        let validator = RelationValidator::with_defaults();
        let (valid, _, summary) = validator.validate(&[
            triple("A", "配偶", "B"),
            triple("A", "前配偶", "C"),
        ]);

        let ex = &valid[1];
        assert_eq!(ex.validation_status, ValidationStatus::Conflict);
        assert!(ex.temporal);
        assert!((ex.confidence - 0.63).abs() < 1e-6);
        let conflict = ex.conflict.as_ref().unwrap();
        assert_eq!(conflict.conflicting_predicate, "配偶");
        assert_eq!(conflict.conflicting_object, "B");
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.valid, 1);
    }

    #[test]
    fn test_stage_moves_invalid_and_collects_conflicts() {
        let validator = RelationValidator::with_defaults();
        let request = ExtractionRequest::new(
            "text",
            kgx_core::ExtractionKind::CelebrityRelation,
            kgx_core::ProcessingMode::Enhanced,
        );
        let batch = EnrichmentBatch::from_triples(vec![
            Triple::new("A", "配偶", "B", 0.9),
            Triple::new("A", "配偶", "C", 0.9),
            Triple::new("A", "离婚", "D", 0.9),
            Triple::new("D", "前配偶", "E", 0.9),
        ]);

        let next = validator.apply(&request, &batch).unwrap();

        assert_eq!(next.triples.len(), 3);
        assert_eq!(next.invalid.len(), 1);
        assert!(next.conflicts.is_empty());
        assert_eq!(next.validation.as_ref().unwrap().total, 4);
    }

    #[test]
    fn test_config_overrides_table() {
        let validator = RelationValidator::from_config(&[RelationConstraint::new(
            "配偶",
            RelationCardinality::ManyToMany,
        )]);
        let (valid, _, _) = validator.validate(&[
            triple("A", "配偶", "B"),
            triple("A", "配偶", "C"),
        ]);
        assert_eq!(valid.len(), 2);
        assert!(validator.constraint("导演").is_none());
    }
}
