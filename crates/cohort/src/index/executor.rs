//! Executes plans on the approximate search index.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::aggregation::parse_breakdown;
use super::query_builder::{IndexQuery, IndexQueryBuilder};
use crate::compiler::{HierarchyLookup, PlanFeature, QueryPlan, index_unsupported_features};
use crate::dataset::DatasetContext;
use crate::error::{BackendError, CohortResult};
use crate::resolver::CriteriaHierarchy;
use crate::routing::{ExecutionRequest, ExecutionResult, PlanExecutor};

/// Sends a request to the search cluster and returns the response body.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Runs the request.
    async fn run_query(&self, query: &IndexQuery) -> CohortResult<Value>;
}

/// [`PlanExecutor`] for the person index.
///
/// Refuses plans it cannot answer the way the warehouse would, and datasets
/// with no index. Rollup and ancestor parameters need a
/// [`CriteriaHierarchy`] to expand them.
pub struct IndexPlanExecutor {
    client: Arc<dyn IndexClient>,
    timeout: Duration,
    hierarchy: Option<Arc<dyn CriteriaHierarchy>>,
    today: Option<NaiveDate>,
}

impl IndexPlanExecutor {
    const NAME: &'static str = "index";

    /// Creates an executor with the given per-request timeout.
    pub fn new(client: Arc<dyn IndexClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            hierarchy: None,
            today: None,
        }
    }

    /// Expands hierarchy roots through `hierarchy`.
    pub fn with_hierarchy(mut self, hierarchy: Arc<dyn CriteriaHierarchy>) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    /// Measures current ages as of `today` instead of the current date.
    pub fn as_of(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Returns the per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn builder(&self, index: String) -> IndexQueryBuilder {
        let builder = IndexQueryBuilder::new(index);
        match self.today {
            Some(today) => builder.as_of(today),
            None => builder,
        }
    }

    async fn expand(
        &self,
        ctx: &DatasetContext,
        plan: &QueryPlan,
    ) -> CohortResult<BTreeMap<HierarchyLookup, Vec<i64>>> {
        let lookups = plan.hierarchy_lookups();
        let mut expansions = BTreeMap::new();
        if lookups.is_empty() {
            return Ok(expansions);
        }
        let hierarchy = self.hierarchy.as_ref().ok_or_else(|| BackendError::Unsupported {
            backend_name: Self::NAME.to_string(),
            construct: "criteria hierarchy".to_string(),
        })?;
        for lookup in lookups {
            let concepts = hierarchy.descendant_concepts(ctx, lookup).await?;
            debug!(root = %lookup.root, concepts = concepts.len(), "Expanded hierarchy root");
            expansions.insert(lookup.clone(), concepts);
        }
        Ok(expansions)
    }

    async fn run(&self, query: &IndexQuery) -> CohortResult<Value> {
        match tokio::time::timeout(self.timeout, self.client.run_query(query)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, index = %query.index, "Index query exceeded its deadline");
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
impl PlanExecutor for IndexPlanExecutor {
    fn backend_name(&self) -> &'static str {
        Self::NAME
    }

    /// Dry-renders the plan with empty expansions, so every construct the
    /// builder refuses is caught before routing.
    fn supports(&self, plan: &QueryPlan) -> bool {
        if plan.exact_only || !index_unsupported_features(plan).is_empty() {
            return false;
        }
        if self.hierarchy.is_none() && plan.has_feature(PlanFeature::HierarchyExpansion) {
            return false;
        }
        let placeholders = plan
            .hierarchy_lookups()
            .into_iter()
            .map(|lookup| (lookup.clone(), Vec::new()))
            .collect();
        self.builder(String::new())
            .with_expansions(placeholders)
            .build_filter(plan)
            .is_ok()
    }

    #[instrument(skip(self, ctx, plan), fields(dataset = %ctx.dataset()))]
    async fn execute(
        &self,
        ctx: &DatasetContext,
        plan: &QueryPlan,
        request: ExecutionRequest,
    ) -> CohortResult<ExecutionResult> {
        if !self.supports(plan) {
            return Err(BackendError::Unsupported {
                backend_name: Self::NAME.to_string(),
                construct: if plan.exact_only {
                    "exact-only plan".to_string()
                } else {
                    "plan outside index capabilities".to_string()
                },
            }
            .into());
        }
        let index = ctx.person_index().ok_or_else(|| BackendError::Unavailable {
            backend_name: Self::NAME.to_string(),
            reason: format!("dataset '{}' has no search index", ctx.dataset()),
        })?;
        let builder = self.builder(index).with_expansions(self.expand(ctx, plan).await?);

        match request {
            ExecutionRequest::Count => {
                let query = builder.build_count(plan)?;
                debug!(index = %query.index, body = %query.body, "Running count request");
                let response = self.run(&query).await?;
                let count = response
                    .get("count")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| BackendError::MalformedResponse {
                        backend_name: Self::NAME.to_string(),
                        message: "count response has no integer 'count'".to_string(),
                    })?;
                Ok(ExecutionResult::Count(count))
            }
            ExecutionRequest::Breakdown(stratification) => {
                let query = builder.build_breakdown(plan, stratification)?;
                debug!(index = %query.index, body = %query.body, "Running breakdown request");
                let response = self.run(&query).await?;
                Ok(ExecutionResult::Breakdown(parse_breakdown(&response)?))
            }
        }
    }
}
