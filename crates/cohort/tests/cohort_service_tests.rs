//! End-to-end tests of the cohort service: validation, resolution,
//! compilation and routing against scripted backends.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;

use helios_cohort::compiler::{HierarchyLookup, HierarchyRoot};
use helios_cohort::error::{BackendError, CohortError, ResolutionError};
use helios_cohort::extraction::{DomainValuePair, ExtractionRequest};
use helios_cohort::index::IndexPlanExecutor;
use helios_cohort::resolver::StaticCriteriaHierarchy;
use helios_cohort::routing::{
    ConfigError, ExecutionRouter, ExecutionTarget, RouteReason, RouterConfig,
};
use helios_cohort::types::{CriteriaType, DomainType, SearchRequest, Stratification};
use helios_cohort::warehouse::{SqlParam, WarehousePlanExecutor};
use helios_cohort::CohortService;

struct Harness {
    service: CohortService,
    code_index: Arc<CountingCodeIndex>,
    warehouse: Arc<ScriptedWarehouse>,
    index: Arc<ScriptedIndex>,
}

fn harness(
    index_enabled: bool,
    warehouse: Arc<ScriptedWarehouse>,
    index: Arc<ScriptedIndex>,
) -> Harness {
    let config = RouterConfig::builder()
        .index_enabled(index_enabled)
        .indexed_dataset("synthetic_cdr")
        .warehouse_timeout(Duration::from_secs(30))
        .index_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let router = ExecutionRouter::new(
        config.clone(),
        Arc::new(WarehousePlanExecutor::new(
            warehouse.clone(),
            config.warehouse_timeout,
        )),
    )
    .with_index(Arc::new(IndexPlanExecutor::new(
        index.clone(),
        config.index_timeout,
    )));
    let code_index = CountingCodeIndex::new(code_index());
    let service = CohortService::builder()
        .code_index(code_index.clone())
        .router(router)
        .build()
        .unwrap();
    Harness {
        service,
        code_index,
        warehouse,
        index,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

/// An ICD9 rollup resolves to Condition and is counted on the warehouse when
/// the index is disabled.
#[tokio::test]
async fn test_icd9_rollup_counted_on_warehouse() {
    let h = harness(
        false,
        ScriptedWarehouse::counting(12),
        ScriptedIndex::responding(json!({ "count": 99 })),
    );
    let ctx = dataset(true);
    let request = icd9_rollup_request();

    let plan = h.service.prepare(&ctx, &request).await.unwrap();
    assert_eq!(
        plan.domains().into_iter().collect::<Vec<_>>(),
        vec![DomainType::Condition]
    );
    assert!(!plan.exact_only);

    let count = h.service.count_subjects(&ctx, &request).await.unwrap();
    assert!(count >= 0);
    assert_eq!(count, 12);
    assert_eq!(h.index.calls(), 0);
    assert_eq!(h.warehouse.calls(), 1);

    let query = &h.warehouse.queries()[0];
    assert!(query.params.contains(&SqlParam::text("CONDITION")));
    assert!(query.params.contains(&SqlParam::text("001")));
    assert!(!query.params.contains(&SqlParam::text("PROCEDURE")));
}

/// A temporal group always runs on the warehouse, whatever the index state.
#[tokio::test]
async fn test_temporal_group_forces_warehouse() {
    let h = harness(
        true,
        ScriptedWarehouse::counting(3),
        ScriptedIndex::responding(json!({ "count": 99 })),
    );
    let ctx = dataset(true);
    let request = drug_within_30_days_of_condition();

    let plan = h.service.prepare(&ctx, &request).await.unwrap();
    assert!(plan.exact_only);

    let decision = h.service.routing_decision(&ctx, &request).await.unwrap();
    assert_eq!(decision.target, ExecutionTarget::Warehouse);
    assert_eq!(decision.reason, RouteReason::ExactOnly);

    assert_eq!(h.service.count_subjects(&ctx, &request).await.unwrap(), 3);
    assert_eq!(h.index.calls(), 0);
    assert!(h.warehouse.queries()[0].sql.contains("DATE_SUB"));
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_index_answers_representable_plans() {
    let h = harness(
        true,
        ScriptedWarehouse::counting(1),
        ScriptedIndex::responding(json!({ "count": 40 })),
    );
    let request = SearchRequest::new().include(single_group("g", condition_item(201_826)));

    let count = h.service.count_subjects(&dataset(true), &request).await.unwrap();
    assert_eq!(count, 40);
    assert_eq!(h.warehouse.calls(), 0);
    assert_eq!(
        h.index.queries()[0].index,
        "synthetic_cdr_person".to_string()
    );
}

#[tokio::test]
async fn test_index_failure_falls_back_to_warehouse_once() {
    let h = harness(true, ScriptedWarehouse::counting(8), ScriptedIndex::failing());
    let request = SearchRequest::new().include(single_group("g", condition_item(201_826)));

    let count = h.service.count_subjects(&dataset(true), &request).await.unwrap();
    assert_eq!(count, 8);
    assert_eq!(h.index.calls(), 1);
    assert_eq!(h.warehouse.calls(), 1);
}

#[tokio::test]
async fn test_unindexed_dataset_uses_warehouse() {
    let h = harness(
        true,
        ScriptedWarehouse::counting(2),
        ScriptedIndex::responding(json!({ "count": 99 })),
    );
    let request = SearchRequest::new().include(single_group("g", condition_item(201_826)));

    let decision = h
        .service
        .routing_decision(&dataset(false), &request)
        .await
        .unwrap();
    assert_eq!(decision.reason, RouteReason::NoIndexForDataset);
    assert_eq!(
        h.service.count_subjects(&dataset(false), &request).await.unwrap(),
        2
    );
    assert_eq!(h.index.calls(), 0);
}

/// With a hierarchy configured the index answers rollups on the concepts
/// beneath the code.
#[tokio::test]
async fn test_rollup_on_index_filters_expanded_concepts() {
    let config = RouterConfig::builder()
        .index_enabled(true)
        .indexed_dataset("synthetic_cdr")
        .build()
        .unwrap();
    let mut hierarchy = StaticCriteriaHierarchy::new();
    hierarchy.insert(
        HierarchyLookup {
            domain: DomainType::Condition,
            criteria_type: CriteriaType::Icd9,
            standard: false,
            root: HierarchyRoot::Code("001".to_string()),
            group: true,
            ancestors: false,
        },
        vec![44_826_468, 44_829_196],
    );
    let warehouse = ScriptedWarehouse::counting(1);
    let index = ScriptedIndex::responding(json!({ "count": 6 }));
    let router = ExecutionRouter::new(
        config.clone(),
        Arc::new(WarehousePlanExecutor::new(warehouse.clone(), config.warehouse_timeout)),
    )
    .with_index(Arc::new(
        IndexPlanExecutor::new(index.clone(), config.index_timeout)
            .with_hierarchy(Arc::new(hierarchy)),
    ));
    let service = CohortService::builder()
        .code_index(CountingCodeIndex::new(code_index()))
        .router(router)
        .build()
        .unwrap();

    let ctx = dataset(true);
    let decision = service
        .routing_decision(&ctx, &icd9_rollup_request())
        .await
        .unwrap();
    assert_eq!(decision.target, ExecutionTarget::Index);

    let count = service.count_subjects(&ctx, &icd9_rollup_request()).await.unwrap();
    assert_eq!(count, 6);
    assert_eq!(warehouse.calls(), 0);
    let body = index.queries()[0].body.to_string();
    assert!(body.contains(r#"{"terms":{"events.source_concept_id":[44826468,44829196]}}"#));
}

/// Without a hierarchy the same rollup stays on the warehouse.
#[tokio::test]
async fn test_rollup_without_hierarchy_uses_warehouse() {
    let h = harness(
        true,
        ScriptedWarehouse::counting(4),
        ScriptedIndex::responding(json!({ "count": 99 })),
    );
    let ctx = dataset(true);

    let decision = h
        .service
        .routing_decision(&ctx, &icd9_rollup_request())
        .await
        .unwrap();
    assert_eq!(decision.reason, RouteReason::IndexUnsupported);
    assert_eq!(h.service.count_subjects(&ctx, &icd9_rollup_request()).await.unwrap(), 4);
    assert_eq!(h.index.calls(), 0);
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_missing_router_is_a_configuration_error() {
    let err = CohortService::builder()
        .code_index(CountingCodeIndex::new(code_index()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        CohortError::Config(ConfigError::MissingComponent("router"))
    ));
    assert!(!err.is_backend_error());
    assert!(!err.is_input_error());
    assert_eq!(err.to_string(), "no router configured");
}

/// A code with no registered domain fails before any backend is called.
#[tokio::test]
async fn test_unknown_rollup_code_fails_fast() {
    let h = harness(
        true,
        ScriptedWarehouse::counting(1),
        ScriptedIndex::responding(json!({ "count": 1 })),
    );
    let mut request = icd9_rollup_request();
    request.includes[0].items[0].search_parameters[0].value = Some("999.9".to_string());

    let err = h
        .service
        .count_subjects(&dataset(true), &request)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CohortError::Resolution(ResolutionError::NoDomainFound { .. })
    ));
    assert_eq!(h.code_index.calls(), 1);
    assert_eq!(h.warehouse.calls(), 0);
    assert_eq!(h.index.calls(), 0);
}

#[tokio::test]
async fn test_invalid_request_never_reaches_resolution() {
    let h = harness(
        false,
        ScriptedWarehouse::counting(1),
        ScriptedIndex::responding(json!({})),
    );
    let mut request = icd9_rollup_request();
    request.includes[0].items[0].search_parameters.clear();

    let err = h
        .service
        .count_subjects(&dataset(true), &request)
        .await
        .unwrap_err();
    assert!(err.is_input_error());
    assert_eq!(h.code_index.calls(), 0);
    assert_eq!(h.warehouse.calls(), 0);
}

#[tokio::test]
async fn test_empty_includes_count_zero_without_error() {
    let h = harness(
        false,
        ScriptedWarehouse::counting(0),
        ScriptedIndex::responding(json!({})),
    );
    let request = SearchRequest::new().exclude(single_group("x", condition_item(1)));

    let count = h.service.count_subjects(&dataset(true), &request).await.unwrap();
    assert_eq!(count, 0);
    assert!(h.warehouse.queries()[0].sql.ends_with("WHERE FALSE"));
}

// ============================================================================
// Breakdown and extraction
// ============================================================================

#[tokio::test]
async fn test_breakdown_on_index() {
    let response = json!({
        "aggregations": {
            "d_18-44": { "buckets": [{ "key": "a", "doc_count": 1, "g_18-44": { "buckets": [
                { "key": "MALE", "doc_count": 1, "r_18-44": { "buckets": [
                    { "key": "Asian", "doc_count": 1 }
                ] } }
            ] } }] },
            "d_45-64": { "buckets": [{ "key": "b", "doc_count": 0, "g_45-64": { "buckets": [] } }] },
            "d_65": { "buckets": [{ "key": "c", "doc_count": 0, "g_65": { "buckets": [] } }] }
        }
    });
    let h = harness(true, ScriptedWarehouse::counting(0), ScriptedIndex::responding(response));
    let request = SearchRequest::new().include(single_group("g", condition_item(201_826)));

    let buckets = h
        .service
        .demographic_breakdown(&dataset(true), &request, Stratification::Gender)
        .await
        .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].gender, "M");
    assert_eq!(buckets[0].age_range, "18-44");
}

#[tokio::test]
async fn test_breakdown_failure_is_unavailable_when_both_fail() {
    let h = harness(true, ScriptedWarehouse::with_rows(vec![json!({ "gender": 1 })]), ScriptedIndex::failing());
    let request = SearchRequest::new().include(single_group("g", condition_item(201_826)));

    let err = h
        .service
        .demographic_breakdown(&dataset(true), &request, Stratification::SexAtBirth)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CohortError::Backend(BackendError::Unavailable { .. })
    ));
    assert_eq!(h.warehouse.calls(), 1);
}

#[tokio::test]
async fn test_extraction_queries_reuse_cohort_predicate() {
    let h = harness(
        false,
        ScriptedWarehouse::counting(0),
        ScriptedIndex::responding(json!({})),
    );
    let request = ExtractionRequest {
        name: "diabetes dataset".to_string(),
        cohorts: vec![
            icd9_rollup_request(),
            SearchRequest::new().include(single_group("g", drug_item(1_124_300))),
        ],
        includes_all_participants: false,
        domain_values: vec![
            DomainValuePair::new(DomainType::Condition, "condition_concept_id"),
            DomainValuePair::new(DomainType::Person, "gender_concept_id"),
        ],
    };

    let queries = h
        .service
        .build_extraction_queries(&dataset(true), &request)
        .await
        .unwrap();
    assert_eq!(
        queries.keys().copied().collect::<Vec<_>>(),
        vec![DomainType::Condition, DomainType::Person]
    );
    let person = &queries[&DomainType::Person];
    assert!(person.sql.contains("FROM `cohort-test.synthetic_cdr.person` t"));
    assert_eq!(person.sql.matches("t.person_id IN (").count(), 2);
    assert!(person.params.contains(&SqlParam::text("001")));
    assert_eq!(h.warehouse.calls(), 0);
}
