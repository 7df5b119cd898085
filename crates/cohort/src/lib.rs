//! Helios Cohort Criteria Compiler
//!
//! This crate turns a cohort definition, a tree of include and exclude
//! groups of clinical criteria, into queries over a research data warehouse
//! and an approximate per-person search index, and executes them.
//!
//! # Pipeline
//!
//! 1. [`compiler::validate_request`] checks operators and operands.
//! 2. [`resolver::DomainResolver`] expands rollup codes into one parameter
//!    per domain the code is registered in.
//! 3. [`compiler::CriteriaCompiler`] produces a backend-neutral
//!    [`compiler::QueryPlan`] and flags plans the index cannot answer.
//! 4. [`routing::ExecutionRouter`] runs the plan on the index when it can,
//!    falling back to the warehouse exactly once on failure.
//! 5. [`extraction::DatasetQueryBuilder`] reuses a cohort's subject query to
//!    project columns out of each domain's table.
//!
//! [`CohortService`] wires these together.
//!
//! # Semantics
//!
//! A subject is in the cohort if they match **any** include group and
//! **no** exclude group. Within a group, items are OR'd; a temporal group
//! instead relates anchor and target events of the same subject in time.
//! An empty include list matches nobody.
//!
//! # Quick Start
//!
//! ```
//! use helios_cohort::compiler::CriteriaCompiler;
//! use helios_cohort::dataset::DatasetContext;
//! use helios_cohort::types::*;
//! use helios_cohort::warehouse::WarehouseQueryBuilder;
//!
//! let request = SearchRequest::new().include(SearchGroup::new("diabetes").with_item(
//!     SearchGroupItem::new(ItemType::Condition).with_parameter(SearchParameter::concept(
//!         CriteriaType::Snomed,
//!         DomainType::Condition,
//!         201826,
//!         true,
//!     )),
//! ));
//!
//! let plan = CriteriaCompiler::new().compile(&request).unwrap();
//! assert!(!plan.exact_only);
//!
//! let ctx = DatasetContext::builder()
//!     .project("research")
//!     .dataset("cdr")
//!     .build()
//!     .unwrap();
//! let query = WarehouseQueryBuilder::build_count(&ctx, &plan);
//! assert!(query.sql.starts_with("SELECT COUNT(DISTINCT person.person_id)"));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod compiler;
pub mod dataset;
pub mod error;
pub mod extraction;
pub mod index;
pub mod resolver;
pub mod routing;
pub mod service;
pub mod types;
pub mod warehouse;

// Re-export commonly used types at crate root
pub use dataset::{DatasetContext, DatasetId};
pub use error::{CohortError, CohortResult};
pub use service::{CohortService, CohortServiceBuilder};
pub use types::{SearchGroup, SearchGroupItem, SearchParameter, SearchRequest};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
