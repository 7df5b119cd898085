//! The caller-facing cohort operations.
//!
//! Every operation runs the same pipeline: validate, resolve rollup domains,
//! compile, then route to a backend. Nothing reaches a backend unless the
//! first three steps succeed.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::compiler::{CriteriaCompiler, QueryPlan, validate_request};
use crate::dataset::DatasetContext;
use crate::error::{BackendError, CohortError, CohortResult};
use crate::extraction::{
    DatasetQueryBuilder, DomainToBaseTable, ExtractionRequest, StandardDomainTables,
};
use crate::resolver::{CodeDomainIndex, DomainResolver};
use crate::routing::{
    ConfigError, DemographicBucket, ExecutionRequest, ExecutionRouter, RoutingDecision,
};
use crate::types::{DomainType, SearchRequest, Stratification};
use crate::warehouse::{SqlFragment, WarehouseQueryBuilder};

/// Counts, breakdowns and extraction queries for cohort definitions.
pub struct CohortService {
    resolver: DomainResolver,
    compiler: CriteriaCompiler,
    router: ExecutionRouter,
    extraction: DatasetQueryBuilder,
}

impl CohortService {
    /// Creates a builder.
    pub fn builder() -> CohortServiceBuilder {
        CohortServiceBuilder::default()
    }

    /// Returns the router.
    pub fn router(&self) -> &ExecutionRouter {
        &self.router
    }

    /// Validates, resolves and compiles a request.
    #[instrument(skip(self, ctx, request), fields(dataset = %ctx.dataset()))]
    pub async fn prepare(
        &self,
        ctx: &DatasetContext,
        request: &SearchRequest,
    ) -> CohortResult<QueryPlan> {
        validate_request(request)?;
        let resolved = self.resolver.resolve_request(request).await?;
        self.compiler.compile(&resolved)
    }

    /// Where a request would be executed, without executing it.
    pub async fn routing_decision(
        &self,
        ctx: &DatasetContext,
        request: &SearchRequest,
    ) -> CohortResult<RoutingDecision> {
        let plan = self.prepare(ctx, request).await?;
        Ok(self.router.decide(ctx, &plan))
    }

    /// Number of distinct subjects matching the request.
    #[instrument(skip(self, ctx, request), fields(dataset = %ctx.dataset()))]
    pub async fn count_subjects(
        &self,
        ctx: &DatasetContext,
        request: &SearchRequest,
    ) -> CohortResult<i64> {
        let plan = self.prepare(ctx, request).await?;
        let count = self
            .router
            .route(ctx, &plan, ExecutionRequest::Count)
            .await?
            .into_count()
            .ok_or_else(|| mismatched("count"))?;
        info!(count, correlation_id = ctx.correlation_id(), "Counted cohort");
        Ok(count)
    }

    /// Matching subjects bucketed by gender (or sex at birth), race and age.
    #[instrument(skip(self, ctx, request), fields(dataset = %ctx.dataset()))]
    pub async fn demographic_breakdown(
        &self,
        ctx: &DatasetContext,
        request: &SearchRequest,
        stratification: Stratification,
    ) -> CohortResult<Vec<DemographicBucket>> {
        let plan = self.prepare(ctx, request).await?;
        self.router
            .route(ctx, &plan, ExecutionRequest::Breakdown(stratification))
            .await?
            .into_breakdown()
            .ok_or_else(|| mismatched("breakdown"))
    }

    /// One projection query per requested domain over the union of the
    /// request's cohorts.
    #[instrument(skip(self, ctx, request), fields(dataset = %ctx.dataset(), name = %request.name))]
    pub async fn build_extraction_queries(
        &self,
        ctx: &DatasetContext,
        request: &ExtractionRequest,
    ) -> CohortResult<BTreeMap<DomainType, SqlFragment>> {
        request.validate()?;

        let mut subject_queries = Vec::new();
        if !request.includes_all_participants {
            for cohort in &request.cohorts {
                let plan = self.prepare(ctx, cohort).await?;
                subject_queries.push(WarehouseQueryBuilder::build_subject_query(ctx, &plan));
            }
        }
        self.extraction
            .build_extraction_queries(ctx, &subject_queries, &request.domain_values)
    }
}

fn mismatched(expected: &str) -> CohortError {
    BackendError::Internal {
        backend_name: "router".to_string(),
        message: format!("executor returned a result other than a {expected}"),
        source: None,
    }
    .into()
}

/// Builder for [`CohortService`].
#[derive(Default)]
pub struct CohortServiceBuilder {
    code_index: Option<Arc<dyn CodeDomainIndex>>,
    router: Option<ExecutionRouter>,
    tables: Option<Arc<dyn DomainToBaseTable>>,
}

impl CohortServiceBuilder {
    /// Sets the code index used to resolve rollup domains.
    pub fn code_index(mut self, index: Arc<dyn CodeDomainIndex>) -> Self {
        self.code_index = Some(index);
        self
    }

    /// Sets the execution router.
    pub fn router(mut self, router: ExecutionRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Sets the domain-to-table mapping. Defaults to [`StandardDomainTables`].
    pub fn domain_tables(mut self, tables: Arc<dyn DomainToBaseTable>) -> Self {
        self.tables = Some(tables);
        self
    }

    /// Builds the service. The code index and router are required.
    pub fn build(self) -> CohortResult<CohortService> {
        let code_index = self.code_index.ok_or_else(|| missing("code index"))?;
        let router = self.router.ok_or_else(|| missing("router"))?;
        let tables = self
            .tables
            .unwrap_or_else(|| Arc::new(StandardDomainTables));
        Ok(CohortService {
            resolver: DomainResolver::new(code_index),
            compiler: CriteriaCompiler::new(),
            router,
            extraction: DatasetQueryBuilder::new(tables),
        })
    }
}

fn missing(component: &'static str) -> CohortError {
    ConfigError::MissingComponent(component).into()
}
