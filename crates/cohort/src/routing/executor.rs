//! The executor seam shared by the warehouse and the search index.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::compiler::QueryPlan;
use crate::dataset::DatasetContext;
use crate::error::CohortResult;
use crate::types::Stratification;

/// What to compute for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionRequest {
    /// Number of distinct matching subjects.
    Count,
    /// Matching subjects bucketed by gender (or sex), race and age range.
    Breakdown(Stratification),
}

/// The result of executing a plan, identical whichever backend answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Distinct subject count.
    Count(i64),
    /// Demographic buckets.
    Breakdown(Vec<DemographicBucket>),
}

impl ExecutionResult {
    /// Returns the count, if this is a count result.
    pub fn into_count(self) -> Option<i64> {
        match self {
            ExecutionResult::Count(n) => Some(n),
            ExecutionResult::Breakdown(_) => None,
        }
    }

    /// Returns the buckets, if this is a breakdown result.
    pub fn into_breakdown(self) -> Option<Vec<DemographicBucket>> {
        match self {
            ExecutionResult::Breakdown(buckets) => Some(buckets),
            ExecutionResult::Count(_) => None,
        }
    }
}

/// One cell of a demographic breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemographicBucket {
    /// First letter of the gender (or sex at birth) concept name.
    pub gender: String,
    /// Race concept name.
    pub race: String,
    /// `18-44`, `45-64` or `> 65`.
    pub age_range: String,
    /// Subjects in the bucket.
    pub count: i64,
}

/// Which backend a plan runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTarget {
    /// The exact SQL warehouse.
    Warehouse,
    /// The approximate search index.
    Index,
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionTarget::Warehouse => write!(f, "warehouse"),
            ExecutionTarget::Index => write!(f, "index"),
        }
    }
}

/// Runs compiled plans against one backend.
#[async_trait]
pub trait PlanExecutor: Send + Sync {
    /// Name used in errors and logs.
    fn backend_name(&self) -> &'static str;

    /// Returns false for plans this backend would refuse. Must not perform
    /// I/O; the router consults it before choosing a backend.
    fn supports(&self, _plan: &QueryPlan) -> bool {
        true
    }

    /// Executes the plan against the given dataset.
    async fn execute(
        &self,
        ctx: &DatasetContext,
        plan: &QueryPlan,
        request: ExecutionRequest,
    ) -> CohortResult<ExecutionResult>;
}
