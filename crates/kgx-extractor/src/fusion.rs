//! Knowledge fusion stage
//!
//! Merges triples that share a (subject, predicate) pair into a single
//! triple. Groups keep their first-seen order.

use std::collections::HashMap;

use kgx_core::{
    clamp_confidence, EnrichedTriple, EnrichmentBatch, EnrichmentStage, ExtractionRequest,
    ObjectTieBreak, Result,
};
use tracing::debug;

/// Enrichment stage fusing triples with the same subject and predicate
#[derive(Debug, Clone, Default)]
pub struct KnowledgeFusion {
    tie_break: ObjectTieBreak,
}

/// Per-object tally within one group
struct ObjectVotes<'a> {
    object: &'a str,
    /// Index of the first member asserting this object
    first: usize,
    count: usize,
    max_confidence: f32,
}

impl KnowledgeFusion {
    pub fn new(tie_break: ObjectTieBreak) -> Self {
        Self { tie_break }
    }

    pub fn tie_break(&self) -> ObjectTieBreak {
        self.tie_break
    }

    /// Fuse a list of triples, preserving first-seen group order
    pub fn fuse(&self, triples: &[EnrichedTriple]) -> Vec<EnrichedTriple> {
        let mut index: HashMap<(&str, &str), usize> = HashMap::new();
        let mut groups: Vec<Vec<&EnrichedTriple>> = Vec::new();

        for triple in triples {
            let key = (triple.subject.as_str(), triple.predicate.as_str());
            match index.get(&key) {
                Some(&slot) => groups[slot].push(triple),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![triple]);
                }
            }
        }

        groups.into_iter().map(|group| self.fuse_group(&group)).collect()
    }

    fn fuse_group(&self, group: &[&EnrichedTriple]) -> EnrichedTriple {
        if let [single] = group {
            return (*single).clone();
        }

        let votes = tally(group);
        let winner = self.pick(&votes);
        let mut fused = group[winner.first].clone();

        let total: f32 = group.iter().map(|t| t.confidence).sum();
        fused.confidence = clamp_confidence(total / group.len() as f32);

        let mut sources: Vec<_> = group.iter().flat_map(|t| t.sources.iter().copied()).collect();
        sources.sort();
        sources.dedup();
        fused.sources = sources;

        fused.fusion_source_count = group.iter().map(|t| t.fusion_source_count).sum();

        let mut alternatives: Vec<String> = Vec::new();
        let rejected = votes
            .iter()
            .map(|v| v.object)
            .chain(group.iter().flat_map(|t| t.alternatives.iter().map(String::as_str)));
        for object in rejected {
            if object != winner.object && !alternatives.iter().any(|a| a == object) {
                alternatives.push(object.to_string());
            }
        }
        fused.alternatives = alternatives;

        fused
    }

    fn pick<'v, 'a>(&self, votes: &'v [ObjectVotes<'a>]) -> &'v ObjectVotes<'a> {
        // strict comparisons keep the first-seen object on ties
        let mut best = &votes[0];
        for candidate in &votes[1..] {
            let better = match self.tie_break {
                ObjectTieBreak::Longest => {
                    candidate.object.chars().count() > best.object.chars().count()
                }
                ObjectTieBreak::HighestConfidence => candidate.max_confidence > best.max_confidence,
                ObjectTieBreak::MostFrequent => candidate.count > best.count,
            };
            if better {
                best = candidate;
            }
        }
        best
    }
}

fn tally<'a>(group: &[&'a EnrichedTriple]) -> Vec<ObjectVotes<'a>> {
    let mut votes: Vec<ObjectVotes<'a>> = Vec::new();
    for (i, triple) in group.iter().enumerate() {
        match votes.iter_mut().find(|v| v.object == triple.object) {
            Some(vote) => {
                vote.count += triple.fusion_source_count;
                vote.max_confidence = vote.max_confidence.max(triple.confidence);
            }
            None => votes.push(ObjectVotes {
                object: &triple.object,
                first: i,
                count: triple.fusion_source_count,
                max_confidence: triple.confidence,
            }),
        }
    }
    votes
}

impl EnrichmentStage for KnowledgeFusion {
    fn name(&self) -> &'static str {
        "fusion"
    }

    fn apply(
        &self,
        request: &ExtractionRequest,
        batch: &EnrichmentBatch,
    ) -> Result<EnrichmentBatch> {
        let fused = self.fuse(&batch.triples);
        debug!(
            request_id = %request.id,
            before = batch.triples.len(),
            after = fused.len(),
            "Fusion complete"
        );
        Ok(EnrichmentBatch {
            triples: fused,
            ..batch.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgx_core::{Provenance, Triple};

    fn enriched(s: &str, p: &str, o: &str, confidence: f32, chunk: u32) -> EnrichedTriple {
        EnrichedTriple::from(
            Triple::new(s, p, o, confidence).with_provenance(Provenance::Chunk(chunk)),
        )
    }

    #[test]
    fn test_identical_objects_collapse() {
        let fusion = KnowledgeFusion::default();
        let fused = fusion.fuse(&[
            enriched("小明", "是", "学生", 0.9, 0),
            enriched("小明", "是", "学生", 0.7, 1),
        ]);

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].fusion_source_count, 2);
        assert!((fused[0].confidence - 0.8).abs() < 1e-6);
        assert_eq!(fused[0].sources, vec![Provenance::Chunk(0), Provenance::Chunk(1)]);
        assert!(fused[0].alternatives.is_empty());
    }

    #[test]
    fn test_singletons_pass_through_in_order() {
        let fusion = KnowledgeFusion::default();
        let input = vec![
            enriched("B", "p", "x", 0.5, 0),
            enriched("A", "p", "y", 0.6, 0),
            enriched("B", "q", "z", 0.7, 0),
        ];

        assert_eq!(fusion.fuse(&input), input);
    }

    #[test]
    fn test_longest_object_wins_by_default() {
        let fusion = KnowledgeFusion::default();
        let fused = fusion.fuse(&[
            enriched("周杰伦", "出生地", "台湾", 0.9, 0),
            enriched("周杰伦", "出生地", "台湾新北市", 0.6, 1),
            enriched("周杰伦", "出生地", "新北", 0.8, 2),
        ]);

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].object, "台湾新北市");
        assert_eq!(fused[0].alternatives, vec!["台湾", "新北"]);
        assert_eq!(fused[0].fusion_source_count, 3);
    }

    #[test]
    fn test_alternative_tie_breaks() {
        let input = [
            enriched("A", "职业", "歌手", 0.6, 0),
            enriched("A", "职业", "演员", 0.95, 1),
            enriched("A", "职业", "歌手", 0.7, 2),
        ];

        let by_confidence = KnowledgeFusion::new(ObjectTieBreak::HighestConfidence).fuse(&input);
        assert_eq!(by_confidence[0].object, "演员");

        let by_frequency = KnowledgeFusion::new(ObjectTieBreak::MostFrequent).fuse(&input);
        assert_eq!(by_frequency[0].object, "歌手");

        // equal lengths: first seen wins
        let by_length = KnowledgeFusion::new(ObjectTieBreak::Longest).fuse(&input);
        assert_eq!(by_length[0].object, "歌手");
    }
}
