//! Executes plans on the SQL warehouse.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use super::query_builder::WarehouseQueryBuilder;
use super::sql::SqlFragment;
use crate::compiler::QueryPlan;
use crate::dataset::DatasetContext;
use crate::error::{BackendError, CohortResult};
use crate::routing::{DemographicBucket, ExecutionRequest, ExecutionResult, PlanExecutor};

/// A result row keyed by column name.
pub type WarehouseRow = Map<String, Value>;

/// Runs a parameterized statement on the warehouse.
///
/// Implementations should honour `timeout` themselves; the executor also
/// enforces it around the call.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Runs the query and returns every row.
    async fn run_query(&self, query: &SqlFragment, timeout: Duration)
    -> CohortResult<Vec<WarehouseRow>>;
}

/// [`PlanExecutor`] for the warehouse. Answers every plan exactly.
pub struct WarehousePlanExecutor {
    client: Arc<dyn WarehouseClient>,
    timeout: Duration,
}

impl WarehousePlanExecutor {
    const NAME: &'static str = "warehouse";

    /// Creates an executor with the given per-query timeout.
    pub fn new(client: Arc<dyn WarehouseClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Returns the per-query timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, query: &SqlFragment) -> CohortResult<Vec<WarehouseRow>> {
        match tokio::time::timeout(self.timeout, self.client.run_query(query, self.timeout)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Warehouse query exceeded its deadline");
                Err(BackendError::DeadlineExceeded {
                    backend_name: Self::NAME.to_string(),
                    timeout: self.timeout,
                }
                .into())
            }
        }
    }
}

#[async_trait]
impl PlanExecutor for WarehousePlanExecutor {
    fn backend_name(&self) -> &'static str {
        Self::NAME
    }

    #[instrument(skip(self, ctx, plan), fields(dataset = %ctx.dataset()))]
    async fn execute(
        &self,
        ctx: &DatasetContext,
        plan: &QueryPlan,
        request: ExecutionRequest,
    ) -> CohortResult<ExecutionResult> {
        match request {
            ExecutionRequest::Count => {
                let query = WarehouseQueryBuilder::build_count(ctx, plan);
                debug!(sql = %query.sql, params = query.params.len(), "Running count query");
                let rows = self.run(&query).await?;
                let row = rows.first().ok_or_else(|| malformed("count query returned no rows"))?;
                Ok(ExecutionResult::Count(int_column(row, "count")?))
            }
            ExecutionRequest::Breakdown(stratification) => {
                let query = WarehouseQueryBuilder::build_breakdown(ctx, plan, stratification);
                debug!(sql = %query.sql, params = query.params.len(), "Running breakdown query");
                let rows = self.run(&query).await?;
                let buckets = rows
                    .iter()
                    .map(|row| {
                        Ok(DemographicBucket {
                            gender: string_column(row, "gender")?,
                            race: string_column(row, "race")?,
                            age_range: string_column(row, "age_range")?,
                            count: int_column(row, "count")?,
                        })
                    })
                    .collect::<CohortResult<Vec<_>>>()?;
                Ok(ExecutionResult::Breakdown(buckets))
            }
        }
    }
}

fn malformed(message: impl Into<String>) -> BackendError {
    BackendError::MalformedResponse {
        backend_name: WarehousePlanExecutor::NAME.to_string(),
        message: message.into(),
    }
}

/// Warehouses commonly return INT64 as a JSON string.
pub(super) fn int_column(row: &WarehouseRow, column: &str) -> CohortResult<i64> {
    let value = match row.get(column) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    value.ok_or_else(|| malformed(format!("column '{column}' is not an integer")).into())
}

fn string_column(row: &WarehouseRow, column: &str) -> CohortResult<String> {
    match row.get(column) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Ok(String::new()),
        Some(other) => Err(malformed(format!("column '{column}' is not a string: {other}")).into()),
    }
}
