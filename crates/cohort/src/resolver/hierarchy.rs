//! The criteria hierarchy collaborator.
//!
//! The warehouse expands rollup codes and drug ingredients inline through
//! `cb_criteria` paths. The index has no hierarchy of its own, so the
//! index executor asks a [`CriteriaHierarchy`] for the concept ids under
//! each root and filters on those.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::compiler::HierarchyLookup;
use crate::dataset::DatasetContext;
use crate::error::CohortResult;

/// Expands a hierarchy root into the concept ids selectable beneath it.
#[async_trait]
pub trait CriteriaHierarchy: Send + Sync {
    /// Returns every concept id under the root, the root's own included
    /// when it is selectable. An unknown root expands to nothing.
    async fn descendant_concepts(
        &self,
        ctx: &DatasetContext,
        lookup: &HierarchyLookup,
    ) -> CohortResult<Vec<i64>>;
}

/// An in-memory hierarchy, the same for every dataset.
#[derive(Debug, Clone, Default)]
pub struct StaticCriteriaHierarchy {
    entries: HashMap<HierarchyLookup, Vec<i64>>,
}

impl StaticCriteriaHierarchy {
    /// Creates an empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the concepts under a root. Repeated inserts for the same
    /// root add to earlier ones.
    pub fn insert(&mut self, lookup: HierarchyLookup, concept_ids: Vec<i64>) {
        let existing = self.entries.entry(lookup).or_default();
        for id in concept_ids {
            if !existing.contains(&id) {
                existing.push(id);
            }
        }
    }

    /// Number of roots registered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no root is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CriteriaHierarchy for StaticCriteriaHierarchy {
    async fn descendant_concepts(
        &self,
        _ctx: &DatasetContext,
        lookup: &HierarchyLookup,
    ) -> CohortResult<Vec<i64>> {
        Ok(self.entries.get(lookup).cloned().unwrap_or_default())
    }
}
