//! Backend selection.
//!
//! [`ExecutionRouter`] sends index-representable plans to the search index
//! and everything else to the warehouse. A failed index call is retried once
//! on the warehouse; the two are never raced.

mod config;
mod executor;
mod router;

pub use config::{ConfigError, ConfigWarning, RouterConfig, RouterConfigBuilder};
pub use executor::{
    DemographicBucket, ExecutionRequest, ExecutionResult, ExecutionTarget, PlanExecutor,
};
pub use router::{ExecutionRouter, RouteReason, RoutingDecision, with_fallback};
