//! The exact SQL warehouse backend.
//!
//! [`WarehouseQueryBuilder`] renders a [`QueryPlan`](crate::compiler::QueryPlan)
//! into parameterized SQL and [`WarehousePlanExecutor`] runs it through a
//! [`WarehouseClient`] under a deadline.

mod executor;
mod hierarchy;
mod query_builder;
mod sql;

pub use executor::{WarehouseClient, WarehousePlanExecutor, WarehouseRow};
pub use hierarchy::WarehouseCriteriaHierarchy;
pub use query_builder::{
    CRITERIA_ANCESTOR_TABLE, CRITERIA_TABLE, DEATH_TABLE, EVENTS_TABLE, PERSON_TABLE,
    SEARCH_PERSON_TABLE,
    WarehouseQueryBuilder,
};
pub use sql::{SqlFragment, SqlParam, sql_operator};
