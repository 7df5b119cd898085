//! Hierarchy expansion read from the warehouse's criteria tables.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::executor::{WarehouseClient, int_column};
use super::query_builder::WarehouseQueryBuilder;
use crate::compiler::HierarchyLookup;
use crate::dataset::DatasetContext;
use crate::error::{BackendError, CohortResult};
use crate::resolver::CriteriaHierarchy;

/// [`CriteriaHierarchy`] backed by `cb_criteria` and
/// `cb_criteria_ancestor`.
pub struct WarehouseCriteriaHierarchy {
    client: Arc<dyn WarehouseClient>,
    timeout: Duration,
}

impl WarehouseCriteriaHierarchy {
    /// Creates a hierarchy reading through `client`.
    pub fn new(client: Arc<dyn WarehouseClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl CriteriaHierarchy for WarehouseCriteriaHierarchy {
    #[instrument(skip(self, ctx), fields(dataset = %ctx.dataset(), root = %lookup.root))]
    async fn descendant_concepts(
        &self,
        ctx: &DatasetContext,
        lookup: &HierarchyLookup,
    ) -> CohortResult<Vec<i64>> {
        let query = WarehouseQueryBuilder::build_hierarchy_lookup(ctx, lookup);
        let rows = tokio::time::timeout(self.timeout, self.client.run_query(&query, self.timeout))
            .await
            .map_err(|_| BackendError::DeadlineExceeded {
                backend_name: "warehouse".to_string(),
                timeout: self.timeout,
            })??;
        let ids = rows
            .iter()
            .map(|row| int_column(row, "concept_id"))
            .collect::<CohortResult<Vec<_>>>()?;
        debug!(concepts = ids.len(), "Expanded criteria hierarchy");
        Ok(ids)
    }
}
