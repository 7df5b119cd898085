//! The code-to-domain index collaborator.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CohortResult;
use crate::types::{CriteriaSubType, CriteriaType, DomainType};

/// Lookup key for a hierarchical code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeKey {
    /// The code system.
    #[serde(rename = "type")]
    pub criteria_type: CriteriaType,
    /// The code system variant, such as CM or PCS.
    #[serde(default)]
    pub subtype: Option<CriteriaSubType>,
    /// The code itself.
    pub code: String,
}

impl CodeKey {
    /// Creates a key.
    pub fn new(
        criteria_type: CriteriaType,
        subtype: Option<CriteriaSubType>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            criteria_type,
            subtype,
            code: code.into(),
        }
    }
}

/// Read-only index over the hierarchical code tables.
#[async_trait]
pub trait CodeDomainIndex: Send + Sync {
    /// Returns every domain the code is registered in. An empty result is
    /// not an error here; the resolver decides what it means.
    async fn find_domains_for_code(&self, key: &CodeKey) -> CohortResult<Vec<DomainType>>;
}

/// One row of a serialized code index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeIndexEntry {
    /// The code.
    #[serde(flatten)]
    pub key: CodeKey,
    /// Domains the code is registered in.
    pub domains: Vec<DomainType>,
}

/// An in-memory code index.
#[derive(Debug, Clone, Default)]
pub struct StaticCodeDomainIndex {
    entries: HashMap<CodeKey, Vec<DomainType>>,
}

impl StaticCodeDomainIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from serialized entries. Later entries for the same
    /// key add to earlier ones.
    pub fn from_entries(entries: impl IntoIterator<Item = CodeIndexEntry>) -> Self {
        let mut index = Self::new();
        for entry in entries {
            index.insert(entry.key, entry.domains);
        }
        index
    }

    /// Registers domains for a code.
    pub fn insert(&mut self, key: CodeKey, domains: Vec<DomainType>) {
        let existing = self.entries.entry(key).or_default();
        for domain in domains {
            if !existing.contains(&domain) {
                existing.push(domain);
            }
        }
    }

    /// Number of codes in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index holds no codes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CodeDomainIndex for StaticCodeDomainIndex {
    async fn find_domains_for_code(&self, key: &CodeKey) -> CohortResult<Vec<DomainType>> {
        Ok(self.entries.get(key).cloned().unwrap_or_default())
    }
}
