//! In-memory entity store
//!
//! A process-local [`EntityStore`] built on `DashMap`, safe for concurrent
//! pipelines. Entities are keyed by kind and normalized name (trimmed,
//! lowercased); several surface forms may share one key.

use dashmap::DashMap;
use kgx_core::{AliasRecord, EntityCandidate, EntityKind, EntityStore, Result};

type EntityKey = (EntityKind, String);

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Concurrent in-memory entity and alias store
#[derive(Default)]
pub struct InMemoryEntityStore {
    entities: DashMap<EntityKey, Vec<EntityCandidate>>,
    aliases: DashMap<EntityKey, Vec<AliasRecord>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded alias mappings
    pub fn alias_count(&self) -> usize {
        self.aliases.iter().map(|entry| entry.value().len()).sum()
    }
}

impl EntityStore for InMemoryEntityStore {
    fn find(&self, kind: EntityKind, name: &str) -> Result<Vec<EntityCandidate>> {
        Ok(self
            .entities
            .get(&(kind, normalize(name)))
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    fn candidates(
        &self,
        kind: EntityKind,
        name: &str,
        limit: usize,
    ) -> Result<Vec<EntityCandidate>> {
        let needle = normalize(name);
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut found: Vec<EntityCandidate> = self
            .entities
            .iter()
            .filter(|entry| {
                let (entry_kind, key) = entry.key();
                *entry_kind == kind
                    && key != &needle
                    && (key.contains(&needle) || needle.contains(key.as_str()))
            })
            .flat_map(|entry| entry.value().clone())
            .collect();

        // closest lengths first; map iteration order is arbitrary
        let target = needle.chars().count();
        found.sort_by(|a, b| {
            let da = a.name.chars().count().abs_diff(target);
            let db = b.name.chars().count().abs_diff(target);
            da.cmp(&db).then_with(|| a.name.cmp(&b.name))
        });
        found.truncate(limit);
        Ok(found)
    }

    fn insert(&self, candidate: EntityCandidate) -> Result<()> {
        let key = (candidate.kind, normalize(&candidate.name));
        let mut entry = self.entities.entry(key).or_default();
        match entry.iter_mut().find(|existing| existing.name == candidate.name) {
            Some(existing) => existing.absorb(candidate),
            None => entry.push(candidate),
        }
        Ok(())
    }

    fn record_alias(&self, record: AliasRecord) -> Result<()> {
        let key = (record.kind, normalize(&record.alias));
        let mut entry = self.aliases.entry(key).or_default();
        match entry
            .iter_mut()
            .find(|existing| existing.canonical == record.canonical)
        {
            Some(existing) => {
                existing.score = existing.score.max(record.score);
                existing.recorded_at = record.recorded_at;
            }
            None => entry.push(record),
        }
        Ok(())
    }

    fn aliases(&self, kind: EntityKind, alias: &str) -> Result<Vec<AliasRecord>> {
        Ok(self
            .aliases
            .get(&(kind, normalize(alias)))
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    fn entity_count(&self) -> usize {
        self.entities.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_merges_same_name() {
        let store = InMemoryEntityStore::new();
        store
            .insert(EntityCandidate::new("周杰伦", EntityKind::Person).with_context("职业"))
            .unwrap();
        store
            .insert(
                EntityCandidate::new("周杰伦", EntityKind::Person)
                    .with_context("配偶")
                    .with_attribute("配偶", "昆凌"),
            )
            .unwrap();

        let found = store.find(EntityKind::Person, " 周杰伦 ").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].contexts.len(), 2);
        assert_eq!(found[0].attributes.get("配偶").map(String::as_str), Some("昆凌"));
        assert_eq!(store.entity_count(), 1);
    }

    #[test]
    fn test_find_is_kind_scoped_and_case_insensitive() {
        let store = InMemoryEntityStore::new();
        store.insert(EntityCandidate::new("Avatar", EntityKind::Work)).unwrap();
        store.insert(EntityCandidate::new("avatar", EntityKind::Work)).unwrap();

        assert_eq!(store.find(EntityKind::Work, "AVATAR").unwrap().len(), 2);
        assert!(store.find(EntityKind::Person, "Avatar").unwrap().is_empty());
    }

    #[test]
    fn test_candidates_by_containment() {
        let store = InMemoryEntityStore::new();
        for name in ["刘德华", "华仔", "刘德华工作室", "张学友"] {
            store.insert(EntityCandidate::new(name, EntityKind::Person)).unwrap();
        }

        let found = store.candidates(EntityKind::Person, "德华", 5).unwrap();
        let names: Vec<_> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["刘德华", "刘德华工作室"]);

        let limited = store.candidates(EntityKind::Person, "德华", 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert!(store.candidates(EntityKind::Person, "", 5).unwrap().is_empty());
    }

    #[test]
    fn test_alias_records_keep_best_score() {
        let store = InMemoryEntityStore::new();
        store
            .record_alias(AliasRecord::new(EntityKind::Person, "Jay", "周杰伦", 0.7))
            .unwrap();
        store
            .record_alias(AliasRecord::new(EntityKind::Person, "jay", "周杰伦", 0.9))
            .unwrap();

        let records = store.aliases(EntityKind::Person, "JAY").unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].score - 0.9).abs() < 1e-6);
        assert_eq!(store.alias_count(), 1);
    }

    #[test]
    fn test_concurrent_inserts() {
        let store = Arc::new(InMemoryEntityStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store
                            .insert(
                                EntityCandidate::new(format!("entity-{}", j % 10), EntityKind::Generic)
                                    .with_context(format!("p{i}")),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.entity_count(), 10);
        let found = store.find(EntityKind::Generic, "entity-3").unwrap();
        assert_eq!(found[0].contexts.len(), 8);
    }
}
