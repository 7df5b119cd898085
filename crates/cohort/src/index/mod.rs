//! The approximate search index backend.
//!
//! Answers plain concept, rollup, categorical, modifier and demographic
//! criteria from a per-dataset person index. Plans flagged `exact_only`,
//! and plans with constructs the index cannot answer as the warehouse
//! would (occurrence counts), are refused before any request is sent.

mod aggregation;
mod executor;
mod query_builder;

pub use aggregation::{demographic_aggregations, parse_breakdown};
pub use executor::{IndexClient, IndexPlanExecutor};
pub use query_builder::{IndexQuery, IndexQueryBuilder, IndexRequestKind};
