//! Dataset extraction.
//!
//! Reuses a cohort's compiled subject query as a filter and projects the
//! requested columns out of each domain's base table.

mod builder;
mod tables;

pub use builder::{DatasetQueryBuilder, DomainValuePair, ExtractionRequest};
pub use tables::{DomainTable, DomainToBaseTable, StandardDomainTables};
