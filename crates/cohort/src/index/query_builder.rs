//! Search index query DSL builder.
//!
//! The person index holds one document per subject with demographic fields
//! at the top level and clinical events in the nested `events` array. Event
//! criteria become nested queries. Current ages are rendered against the
//! builder's reference date as concrete `birth_datetime` bounds, so the
//! birthday itself falls on the same side as in the warehouse.
//!
//! The index has no criteria hierarchy: rollup and ancestor parameters are
//! filtered on concept ids expanded beforehand (see
//! [`IndexQueryBuilder::with_expansions`]).

use std::collections::BTreeMap;

use chrono::{Days, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};

use super::aggregation::demographic_aggregations;
use crate::compiler::{
    AgeMeasure, Comparison, DemographicPredicate, GroupPlan, HierarchyLookup, ItemModifiers,
    ItemPlan, ParameterPredicate, QueryPlan, ValuePredicate,
};
use crate::error::{BackendError, CohortError, CohortResult};
use crate::types::{DomainType, Operator, Stratification};

const BACKEND_NAME: &str = "index";

/// Date format of every date bound the builder renders.
pub(crate) const DATE_FORMAT: &str = "yyyy-MM-dd";

/// The kind of index request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexRequestKind {
    /// `_count` endpoint.
    Count,
    /// `_search` endpoint.
    Search,
}

/// A complete index request ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    /// The index to query.
    pub index: String,
    /// The endpoint.
    pub kind: IndexRequestKind,
    /// The request body.
    pub body: Value,
}

/// Builds index queries from compiled plans.
#[derive(Debug, Clone)]
pub struct IndexQueryBuilder {
    index: String,
    today: NaiveDate,
    expansions: BTreeMap<HierarchyLookup, Vec<i64>>,
}

impl IndexQueryBuilder {
    /// Creates a builder targeting the given person index, with ages
    /// measured as of today (UTC).
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            today: Utc::now().date_naive(),
            expansions: BTreeMap::new(),
        }
    }

    /// Measures current ages as of `today`.
    pub fn as_of(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Supplies the concept ids each hierarchy root expands to.
    pub fn with_expansions(mut self, expansions: BTreeMap<HierarchyLookup, Vec<i64>>) -> Self {
        self.expansions = expansions;
        self
    }

    /// Builds a `_count` request.
    pub fn build_count(&self, plan: &QueryPlan) -> CohortResult<IndexQuery> {
        Ok(IndexQuery {
            index: self.index.clone(),
            kind: IndexRequestKind::Count,
            body: json!({ "query": self.build_filter(plan)? }),
        })
    }

    /// Builds a `_search` request returning only the breakdown aggregations.
    pub fn build_breakdown(
        &self,
        plan: &QueryPlan,
        stratification: Stratification,
    ) -> CohortResult<IndexQuery> {
        Ok(IndexQuery {
            index: self.index.clone(),
            kind: IndexRequestKind::Search,
            body: json!({
                "size": 0,
                "query": self.build_filter(plan)?,
                "aggs": demographic_aggregations(stratification, self.today)?,
            }),
        })
    }

    /// Builds the boolean filter selecting the plan's subjects.
    ///
    /// Fails with [`BackendError::Unsupported`] for constructs the index
    /// cannot answer the way the warehouse does.
    pub fn build_filter(&self, plan: &QueryPlan) -> CohortResult<Value> {
        if plan.matches_nothing() {
            return Ok(json!({ "bool": { "must_not": [{ "match_all": {} }] } }));
        }
        let includes = plan
            .includes
            .iter()
            .map(|group| self.group_clause(group))
            .collect::<CohortResult<Vec<_>>>()?;
        let excludes = plan
            .excludes
            .iter()
            .map(|group| self.group_clause(group))
            .collect::<CohortResult<Vec<_>>>()?;

        let mut bool_query = json!({
            "filter": [should(includes)],
        });
        if !excludes.is_empty() {
            bool_query["must_not"] = json!(excludes);
        }
        Ok(json!({ "bool": bool_query }))
    }

    fn group_clause(&self, group: &GroupPlan) -> CohortResult<Value> {
        match group {
            GroupPlan::Union { items, .. } => Ok(should(
                items
                    .iter()
                    .map(|item| self.item_clause(item))
                    .collect::<CohortResult<Vec<_>>>()?,
            )),
            GroupPlan::Temporal(_) => Err(unsupported("temporal group")),
        }
    }

    fn item_clause(&self, item: &ItemPlan) -> CohortResult<Value> {
        let mut clauses = Vec::new();
        for predicate in &item.predicates {
            clauses.push(match predicate {
                ParameterPredicate::Demographic(demographic) => {
                    self.demographic_clause(demographic)?
                }
                event => self.event_clause(event, &item.modifiers)?,
            });
        }
        Ok(should(clauses))
    }

    /// Nested query matching subjects with at least one qualifying event.
    fn event_clause(
        &self,
        predicate: &ParameterPredicate,
        modifiers: &ItemModifiers,
    ) -> CohortResult<Value> {
        // Nested hits cannot be deduplicated per day and concept.
        if modifiers.occurrences.is_some() {
            return Err(unsupported("occurrence count"));
        }
        let mut filters = self.event_filters(predicate)?;
        filters.extend(modifier_filters(modifiers)?);
        Ok(json!({
            "nested": {
                "path": "events",
                "query": { "bool": { "filter": filters } }
            }
        }))
    }

    fn event_filters(&self, predicate: &ParameterPredicate) -> CohortResult<Vec<Value>> {
        let filters = match predicate {
            ParameterPredicate::Concepts {
                standard,
                concept_ids,
                ..
            } => vec![json!({ "terms": { concept_field(*standard): concept_ids } })],
            ParameterPredicate::Hierarchy(lookup) => {
                let concept_ids = self
                    .expansions
                    .get(lookup)
                    .ok_or_else(|| unsupported("criteria hierarchy"))?;
                vec![json!({ "terms": { concept_field(lookup.standard): concept_ids } })]
            }
            ParameterPredicate::Valued {
                domain,
                standard,
                concept_id,
                values,
            } => {
                let mut filters =
                    vec![json!({ "terms": { concept_field(*standard): [concept_id] } })];
                for value in values {
                    match value {
                        ValuePredicate::Categorical(ids) => {
                            let field = if *domain == DomainType::Survey {
                                "events.value_source_concept_id"
                            } else {
                                "events.value_as_concept_id"
                            };
                            filters.push(json!({ "terms": { field: ids } }));
                        }
                        ValuePredicate::Numeric(_) => {
                            return Err(unsupported("numeric value range"));
                        }
                    }
                }
                filters
            }
            ParameterPredicate::BloodPressure { .. } => return Err(unsupported("blood pressure")),
            ParameterPredicate::Demographic(_) => Vec::new(),
        };
        Ok(filters)
    }

    /// Demographic criteria on the person document. Age criteria only
    /// match living subjects.
    fn demographic_clause(&self, predicate: &DemographicPredicate) -> CohortResult<Value> {
        let clause = match predicate {
            DemographicPredicate::Gender(ids) => json!({ "terms": { "gender_concept_id": ids } }),
            DemographicPredicate::Sex(ids) => {
                json!({ "terms": { "sex_at_birth_concept_id": ids } })
            }
            DemographicPredicate::Race(ids) => json!({ "terms": { "race_concept_id": ids } }),
            DemographicPredicate::Ethnicity(ids) => {
                json!({ "terms": { "ethnicity_concept_id": ids } })
            }
            DemographicPredicate::Age { measure, range } => {
                let clause = match measure {
                    AgeMeasure::Current => birth_date_clause(self.today, range)?,
                    AgeMeasure::AtConsent => range_clause(
                        "age_at_consent",
                        range.operator,
                        &decimal_values(&range.operands)?,
                        None,
                    )?,
                    AgeMeasure::AtCdr => range_clause(
                        "age_at_cdr",
                        range.operator,
                        &decimal_values(&range.operands)?,
                        None,
                    )?,
                };
                return Ok(json!({
                    "bool": {
                        "filter": [clause],
                        "must_not": [{ "term": { "is_deceased": true } }]
                    }
                }));
            }
            DemographicPredicate::Deceased => return Err(unsupported("deceased")),
        };
        Ok(json!({ "bool": { "filter": [clause] } }))
    }
}

fn modifier_filters(modifiers: &ItemModifiers) -> CohortResult<Vec<Value>> {
    let mut filters = Vec::new();
    if let Some(age) = &modifiers.age_at_event {
        let bounds = decimal_values(&age.operands)?;
        filters.push(range_clause("events.age_at_start", age.operator, &bounds, None)?);
    }
    if let Some(date) = &modifiers.event_date {
        let bounds: Vec<Value> = date.operands.iter().map(|d| date_value(*d)).collect();
        filters.push(range_clause(
            "events.start_date",
            date.operator,
            &bounds,
            Some(DATE_FORMAT),
        )?);
    }
    if let Some(visits) = &modifiers.encounters {
        filters.push(json!({ "terms": { "events.visit_concept_id": visits } }));
    }
    Ok(filters)
}

/// The latest birth date of someone at least `years` old on `today`.
///
/// A subject born on 29 February turns a year older on 1 March in common
/// years, which is where the month arithmetic clamps to.
pub(crate) fn latest_birth_date(today: NaiveDate, years: i64) -> Option<NaiveDate> {
    let months = years.checked_mul(12)?;
    let span = Months::new(u32::try_from(months.checked_abs()?).ok()?);
    if months >= 0 {
        today.checked_sub_months(span)
    } else {
        today.checked_add_months(span)
    }
}

/// Exclusive lower bound on the birth date of someone at most `years` old.
fn earliest_birth_date_exclusive(today: NaiveDate, years: i64) -> Option<NaiveDate> {
    latest_birth_date(today, years.checked_add(1)?)
}

/// Current age in whole years as a `birth_datetime` range.
///
/// Age >= n means born on or before the latest birth date for n; age <= n
/// means born after the latest birth date for n + 1.
fn birth_date_clause(today: NaiveDate, range: &Comparison<Decimal>) -> CohortResult<Value> {
    let years = range
        .operands
        .iter()
        .map(|d| whole_years(*d))
        .collect::<CohortResult<Vec<_>>>()?;
    let at_least = |n: i64| {
        latest_birth_date(today, n)
            .map(date_value)
            .ok_or_else(|| unsupported("age out of range"))
    };
    let at_most = |n: i64| {
        earliest_birth_date_exclusive(today, n)
            .map(date_value)
            .ok_or_else(|| unsupported("age out of range"))
    };
    let born = |mut bounds: Value| {
        bounds["format"] = json!(DATE_FORMAT);
        json!({ "range": { "birth_datetime": bounds } })
    };
    let exactly = |n: i64| -> CohortResult<Value> {
        Ok(born(json!({ "gt": at_most(n)?, "lte": at_least(n)? })))
    };

    let clause = match (range.operator, years.as_slice()) {
        (Operator::GreaterThanOrEqualTo, [n]) => born(json!({ "lte": at_least(*n)? })),
        (Operator::GreaterThan, [n]) => born(json!({ "lte": at_most(*n)? })),
        (Operator::LessThanOrEqualTo, [n]) => born(json!({ "gt": at_most(*n)? })),
        (Operator::LessThan, [n]) => born(json!({ "gt": at_least(*n)? })),
        (Operator::Equal, [n]) => exactly(*n)?,
        (Operator::NotEqual, [n]) => json!({ "bool": { "must_not": [exactly(*n)?] } }),
        (Operator::Between, [low, high]) => {
            born(json!({ "gt": at_most(*high)?, "lte": at_least(*low)? }))
        }
        (Operator::In, values) => should(
            values
                .iter()
                .map(|n| exactly(*n))
                .collect::<CohortResult<Vec<_>>>()?,
        ),
        _ => return Err(unsupported("age comparison")),
    };
    Ok(clause)
}

fn whole_years(value: Decimal) -> CohortResult<i64> {
    if !value.fract().is_zero() {
        return Err(unsupported("fractional age"));
    }
    value.to_i64().ok_or_else(|| unsupported("age out of range"))
}

pub(crate) fn date_value(date: NaiveDate) -> Value {
    json!(date.format("%Y-%m-%d").to_string())
}

/// The day after `date`, for exclusive upper bounds.
pub(crate) fn next_day(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(1))
}

fn decimal_values(values: &[Decimal]) -> CohortResult<Vec<Value>> {
    values
        .iter()
        .map(|d| {
            d.to_f64()
                .map(|f| json!(f))
                .ok_or_else(|| unsupported("numeric operand out of range"))
        })
        .collect()
}

/// A `range` query for one comparison.
fn range_clause(
    field: &str,
    operator: Operator,
    bounds: &[Value],
    format: Option<&str>,
) -> CohortResult<Value> {
    let range = |spec: Value| {
        let mut spec = spec;
        if let Some(format) = format {
            spec["format"] = json!(format);
        }
        json!({ "range": { field: spec } })
    };
    let clause = match (operator, bounds) {
        (Operator::Equal, [v]) => range(json!({ "gte": v, "lte": v })),
        (Operator::NotEqual, [v]) => {
            json!({ "bool": { "must_not": [range(json!({ "gte": v, "lte": v }))] } })
        }
        (Operator::LessThan, [v]) => range(json!({ "lt": v })),
        (Operator::GreaterThan, [v]) => range(json!({ "gt": v })),
        (Operator::LessThanOrEqualTo, [v]) => range(json!({ "lte": v })),
        (Operator::GreaterThanOrEqualTo, [v]) => range(json!({ "gte": v })),
        (Operator::Between, [low, high]) => range(json!({ "gte": low, "lte": high })),
        (Operator::In, values) => should(
            values
                .iter()
                .map(|v| range(json!({ "gte": v, "lte": v })))
                .collect(),
        ),
        _ => return Err(unsupported("comparison operator")),
    };
    Ok(clause)
}

fn concept_field(standard: bool) -> &'static str {
    if standard {
        "events.concept_id"
    } else {
        "events.source_concept_id"
    }
}

fn should(clauses: Vec<Value>) -> Value {
    json!({ "bool": { "should": clauses, "minimum_should_match": 1 } })
}

pub(crate) fn unsupported(construct: &str) -> CohortError {
    BackendError::Unsupported {
        backend_name: BACKEND_NAME.to_string(),
        construct: construct.to_string(),
    }
    .into()
}
