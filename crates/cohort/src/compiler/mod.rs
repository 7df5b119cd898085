//! Criteria compilation.
//!
//! [`CriteriaCompiler`] turns a resolved [`SearchRequest`](crate::types::SearchRequest)
//! into a backend-neutral [`QueryPlan`]. Translation into warehouse SQL or
//! index queries happens in [`crate::warehouse`] and [`crate::index`].
//!
//! The plan carries the set of [`PlanFeature`]s it uses and an `exact_only`
//! flag set when one of them [forces exact execution](PlanFeature::forces_exact).

mod analyzer;
mod compile;
mod plan;
mod validation;

pub use analyzer::{
    PlanFeature, blocking_features, detect_plan_features, index_unsupported_features,
    requires_exact,
};
pub use compile::{CriteriaCompiler, DIASTOLIC_CONCEPT_ID, SYSTOLIC_CONCEPT_ID};
pub use plan::{
    AgeMeasure, Comparison, DemographicPredicate, GroupPlan, HierarchyLookup, HierarchyRoot,
    ItemModifiers, ItemPlan, ParameterPredicate, QueryPlan, TemporalConstraint, TemporalPlan,
    ValuePredicate,
};
pub use validation::validate_request;
