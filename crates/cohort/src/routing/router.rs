//! Backend selection with a one-shot index to warehouse fallback.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::config::RouterConfig;
use super::executor::{ExecutionRequest, ExecutionResult, ExecutionTarget, PlanExecutor};
use crate::compiler::{QueryPlan, blocking_features, index_unsupported_features};
use crate::dataset::DatasetContext;
use crate::error::{BackendError, CohortError, CohortResult};

/// Why a backend was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    /// The plan holds constructs only the warehouse answers exactly.
    ExactOnly,
    /// The index is switched off or no index executor is wired.
    IndexDisabled,
    /// The dataset has no registered person index.
    NoIndexForDataset,
    /// The plan has a construct the index cannot answer like the warehouse,
    /// such as an occurrence count.
    IndexUnsupported,
    /// The plan is index-representable and the index is available.
    IndexPreferred,
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteReason::ExactOnly => write!(f, "plan requires exact execution"),
            RouteReason::IndexDisabled => write!(f, "search index is disabled"),
            RouteReason::NoIndexForDataset => write!(f, "dataset has no search index"),
            RouteReason::IndexUnsupported => write!(f, "search index cannot answer plan"),
            RouteReason::IndexPreferred => write!(f, "search index preferred"),
        }
    }
}

/// The backend a plan is sent to first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingDecision {
    /// The first backend tried.
    pub target: ExecutionTarget,
    /// Why.
    pub reason: RouteReason,
}

/// Runs `primary`; if it fails with a backend error, runs `fallback` once.
///
/// The fallback is never started before the primary has failed, and its
/// result is returned as is.
pub async fn with_fallback<T, P, F, Fut>(primary: P, fallback: F) -> CohortResult<T>
where
    P: Future<Output = CohortResult<T>>,
    F: FnOnce(CohortError) -> Fut,
    Fut: Future<Output = CohortResult<T>>,
{
    match primary.await {
        Ok(value) => Ok(value),
        Err(e) if e.is_backend_error() => fallback(e).await,
        Err(e) => Err(e),
    }
}

/// Chooses between the index and the warehouse for each plan.
pub struct ExecutionRouter {
    config: RouterConfig,
    warehouse: Arc<dyn PlanExecutor>,
    index: Option<Arc<dyn PlanExecutor>>,
}

impl ExecutionRouter {
    /// Creates a router that only uses the warehouse.
    pub fn new(config: RouterConfig, warehouse: Arc<dyn PlanExecutor>) -> Self {
        Self {
            config,
            warehouse,
            index: None,
        }
    }

    /// Wires the search index executor.
    pub fn with_index(mut self, index: Arc<dyn PlanExecutor>) -> Self {
        self.index = Some(index);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Decides which backend is tried first. Performs no I/O.
    pub fn decide(&self, ctx: &DatasetContext, plan: &QueryPlan) -> RoutingDecision {
        let index = match &self.index {
            Some(index) if self.config.index_enabled => Some(index),
            _ => None,
        };
        let reason = if plan.exact_only {
            RouteReason::ExactOnly
        } else if let Some(index) = index {
            if ctx.person_index().is_none() || !self.config.is_indexed(ctx.dataset().as_str()) {
                RouteReason::NoIndexForDataset
            } else if !index.supports(plan) {
                RouteReason::IndexUnsupported
            } else {
                RouteReason::IndexPreferred
            }
        } else {
            RouteReason::IndexDisabled
        };
        let target = match reason {
            RouteReason::IndexPreferred => ExecutionTarget::Index,
            RouteReason::ExactOnly
            | RouteReason::IndexDisabled
            | RouteReason::NoIndexForDataset
            | RouteReason::IndexUnsupported => ExecutionTarget::Warehouse,
        };
        RoutingDecision { target, reason }
    }

    /// Executes the plan on the chosen backend.
    ///
    /// An index failure is logged and retried exactly once on the warehouse.
    /// If that retry fails too the caller sees [`BackendError::Unavailable`].
    #[instrument(skip(self, ctx, plan), fields(dataset = %ctx.dataset()))]
    pub async fn route(
        &self,
        ctx: &DatasetContext,
        plan: &QueryPlan,
        request: ExecutionRequest,
    ) -> CohortResult<ExecutionResult> {
        let decision = self.decide(ctx, plan);
        debug!(
            backend = %decision.target,
            reason = %decision.reason,
            blocking = ?blocking_features(plan),
            off_index = ?index_unsupported_features(plan),
            "Routing plan"
        );

        let index = match (&self.index, decision.target) {
            (Some(index), ExecutionTarget::Index) => index,
            _ => return self.warehouse.execute(ctx, plan, request).await,
        };

        with_fallback(index.execute(ctx, plan, request), |index_error| async move {
            warn!(
                error = %index_error,
                backend = index.backend_name(),
                "Index execution failed, falling back to warehouse"
            );
            self.warehouse
                .execute(ctx, plan, request)
                .await
                .map_err(|e| {
                    CohortError::from(BackendError::Unavailable {
                        backend_name: self.warehouse.backend_name().to_string(),
                        reason: format!("index failed ({index_error}); warehouse failed ({e})"),
                    })
                })
        })
        .await
    }
}
