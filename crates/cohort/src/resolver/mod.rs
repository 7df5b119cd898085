//! Domain resolution for rollup codes.
//!
//! A rollup parameter (`group: true`) from one of the hierarchical code
//! systems (ICD9, ICD10, CONDITION, PROCEDURE) may arrive without a domain.
//! [`DomainResolver`] asks a [`CodeDomainIndex`] which domains the code is
//! registered in and replaces the parameter with one copy per domain, so
//! the code matches in every domain it appears in.
//!
//! [`CriteriaHierarchy`] expands a rollup root into the concept ids under
//! it, for backends that cannot walk `cb_criteria` themselves.
//!
//! ```
//! use std::sync::Arc;
//! use helios_cohort::resolver::{CodeKey, DomainResolver, StaticCodeDomainIndex};
//! use helios_cohort::types::*;
//!
//! # tokio_test::block_on(async {
//! let mut index = StaticCodeDomainIndex::new();
//! index.insert(
//!     CodeKey::new(CriteriaType::Icd9, Some(CriteriaSubType::Cm), "001"),
//!     vec![DomainType::Condition, DomainType::Procedure],
//! );
//! let resolver = DomainResolver::new(Arc::new(index));
//!
//! let request = SearchRequest::new().include(SearchGroup::new("g").with_item(
//!     SearchGroupItem::new(ItemType::Icd9).with_parameter(SearchParameter::rollup(
//!         CriteriaType::Icd9,
//!         Some(CriteriaSubType::Cm),
//!         "001",
//!     )),
//! ));
//! let resolved = resolver.resolve_request(&request).await.unwrap();
//! assert_eq!(resolved.includes[0].items[0].search_parameters.len(), 2);
//! # });
//! ```

mod cache;
mod domain_resolver;
mod hierarchy;
mod index;

pub use cache::{CacheStats, CachedCodeDomainIndex};
pub use domain_resolver::DomainResolver;
pub use hierarchy::{CriteriaHierarchy, StaticCriteriaHierarchy};
pub use index::{CodeDomainIndex, CodeIndexEntry, CodeKey, StaticCodeDomainIndex};
