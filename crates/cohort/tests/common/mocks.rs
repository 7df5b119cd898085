//! Scripted collaborators that record how often they are called.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{Map, Value, json};

use helios_cohort::compiler::{
    AgeMeasure, Comparison, DemographicPredicate, GroupPlan, ItemPlan, ParameterPredicate,
    QueryPlan,
};
use helios_cohort::dataset::DatasetContext;
use helios_cohort::error::{BackendError, CohortResult};
use helios_cohort::index::{IndexClient, IndexQuery, IndexRequestKind};
use helios_cohort::resolver::{CodeDomainIndex, CodeKey, StaticCodeDomainIndex};
use helios_cohort::routing::{DemographicBucket, ExecutionRequest, ExecutionResult, PlanExecutor};
use helios_cohort::types::{DomainType, Operator};
use helios_cohort::warehouse::{SqlFragment, WarehouseClient, WarehouseRow};

use super::fixtures::reference_date;

/// Code index that counts lookups.
pub struct CountingCodeIndex {
    inner: StaticCodeDomainIndex,
    calls: AtomicUsize,
}

impl CountingCodeIndex {
    pub fn new(inner: StaticCodeDomainIndex) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeDomainIndex for CountingCodeIndex {
    async fn find_domains_for_code(&self, key: &CodeKey) -> CohortResult<Vec<DomainType>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.find_domains_for_code(key).await
    }
}

/// Warehouse that answers every query with the same rows.
pub struct ScriptedWarehouse {
    rows: Vec<WarehouseRow>,
    queries: Mutex<Vec<SqlFragment>>,
}

impl ScriptedWarehouse {
    /// Answers count queries with `count`.
    pub fn counting(count: i64) -> Arc<Self> {
        Self::with_rows(vec![json!({ "count": count.to_string() })])
    }

    pub fn with_rows(rows: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            rows: rows
                .into_iter()
                .filter_map(|row| row.as_object().cloned())
                .collect(),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn queries(&self) -> Vec<SqlFragment> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl WarehouseClient for ScriptedWarehouse {
    async fn run_query(
        &self,
        query: &SqlFragment,
        _timeout: Duration,
    ) -> CohortResult<Vec<WarehouseRow>> {
        self.queries.lock().push(query.clone());
        Ok(self.rows.clone())
    }
}

/// Search cluster that returns a canned body or fails every request.
pub struct ScriptedIndex {
    response: Option<Value>,
    queries: Mutex<Vec<IndexQuery>>,
}

impl ScriptedIndex {
    pub fn responding(response: Value) -> Arc<Self> {
        Arc::new(Self {
            response: Some(response),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            response: None,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn queries(&self) -> Vec<IndexQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl IndexClient for ScriptedIndex {
    async fn run_query(&self, query: &IndexQuery) -> CohortResult<Value> {
        self.queries.lock().push(query.clone());
        match &self.response {
            Some(response) => Ok(response.clone()),
            None => Err(BackendError::ConnectionFailed {
                backend_name: "index".to_string(),
                message: "cluster unreachable".to_string(),
            }
            .into()),
        }
    }
}

/// One clinical event of an in-memory subject.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub domain: DomainType,
    pub concept_id: i64,
    pub standard: bool,
    pub date: NaiveDate,
}

impl Event {
    /// A standard-vocabulary event on the reference date.
    pub fn new(domain: DomainType, concept_id: i64) -> Self {
        Self {
            domain,
            concept_id,
            standard: true,
            date: reference_date(),
        }
    }

    pub fn on(mut self, year: i32, month: u32, day: u32) -> Self {
        self.date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
        self
    }
}

/// An in-memory subject, shared by the warehouse and index stand-ins.
#[derive(Debug, Clone)]
pub struct Person {
    pub id: i64,
    pub birth_date: NaiveDate,
    pub deceased: bool,
    pub gender: &'static str,
    pub race: &'static str,
    pub events: Vec<Event>,
}

impl Person {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            birth_date: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            deceased: false,
            gender: "FEMALE",
            race: "White",
            events: Vec::new(),
        }
    }

    pub fn born(mut self, year: i32, month: u32, day: u32) -> Self {
        self.birth_date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
        self
    }

    pub fn died(mut self) -> Self {
        self.deceased = true;
        self
    }

    pub fn with_gender(mut self, gender: &'static str) -> Self {
        self.gender = gender;
        self
    }

    pub fn with_race(mut self, race: &'static str) -> Self {
        self.race = race;
        self
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }
}

/// Whole years between `birth` and `today`, one less until the birthday.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> i64 {
    let years = i64::from(today.year() - birth.year());
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years - 1
    } else {
        years
    }
}

fn satisfies<T: PartialOrd + Copy>(comparison: &Comparison<T>, value: T) -> bool {
    match (comparison.operator, comparison.operands.as_slice()) {
        (Operator::Equal, [v]) => value == *v,
        (Operator::NotEqual, [v]) => value != *v,
        (Operator::LessThan, [v]) => value < *v,
        (Operator::GreaterThan, [v]) => value > *v,
        (Operator::LessThanOrEqualTo, [v]) => value <= *v,
        (Operator::GreaterThanOrEqualTo, [v]) => value >= *v,
        (Operator::Between, [low, high]) => *low <= value && value <= *high,
        (Operator::In, values) => values.contains(&value),
        _ => false,
    }
}

/// Evaluates plans against in-memory subjects the way the warehouse SQL
/// does.
///
/// Understands plain concept sets with the occurrence count modifier
/// (distinct event dates per concept), current age (whole years, living
/// subjects only) and the demographic breakdown buckets. Anything else
/// matches nobody.
pub struct InMemoryExecutor {
    people: Vec<Person>,
    today: NaiveDate,
}

impl InMemoryExecutor {
    pub fn new(people: impl IntoIterator<Item = Person>) -> Self {
        Self {
            people: people.into_iter().collect(),
            today: reference_date(),
        }
    }

    pub fn as_of(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Subjects selected by the plan.
    pub fn matching(&self, plan: &QueryPlan) -> BTreeSet<i64> {
        self.people
            .iter()
            .filter(|person| {
                plan.includes.iter().any(|g| self.group_matches(g, person))
                    && !plan.excludes.iter().any(|g| self.group_matches(g, person))
            })
            .map(|person| person.id)
            .collect()
    }

    /// Buckets ordered by age range, gender and race.
    pub fn breakdown(&self, plan: &QueryPlan) -> Vec<DemographicBucket> {
        let selected = self.matching(plan);
        let mut cells: BTreeMap<(&str, String, &str), i64> = BTreeMap::new();
        for person in self.people.iter().filter(|p| selected.contains(&p.id)) {
            let age_range = match age_on(person.birth_date, self.today) {
                age if age < 18 => continue,
                age if age <= 44 => "18-44",
                age if age <= 64 => "45-64",
                _ => "> 65",
            };
            let gender = person.gender.chars().take(1).collect();
            *cells.entry((age_range, gender, person.race)).or_default() += 1;
        }
        cells
            .into_iter()
            .map(|((age_range, gender, race), count)| DemographicBucket {
                gender,
                race: race.to_string(),
                age_range: age_range.to_string(),
                count,
            })
            .collect()
    }

    fn group_matches(&self, group: &GroupPlan, person: &Person) -> bool {
        match group {
            GroupPlan::Union { items, .. } => {
                items.iter().any(|item| self.item_matches(item, person))
            }
            GroupPlan::Temporal(_) => false,
        }
    }

    fn item_matches(&self, item: &ItemPlan, person: &Person) -> bool {
        item.predicates.iter().any(|predicate| match predicate {
            ParameterPredicate::Concepts {
                domain,
                standard,
                concept_ids,
            } => {
                // One row per distinct (date, concept), as SELECT DISTINCT does.
                let rows: BTreeSet<(i64, NaiveDate)> = person
                    .events
                    .iter()
                    .filter(|e| {
                        e.domain == *domain
                            && e.standard == *standard
                            && concept_ids.contains(&e.concept_id)
                    })
                    .map(|e| (e.concept_id, e.date))
                    .collect();
                match &item.modifiers.occurrences {
                    None => !rows.is_empty(),
                    Some(count) => {
                        let mut per_concept: BTreeMap<i64, i64> = BTreeMap::new();
                        for (concept_id, _) in &rows {
                            *per_concept.entry(*concept_id).or_default() += 1;
                        }
                        per_concept.values().any(|n| satisfies(count, *n))
                    }
                }
            }
            ParameterPredicate::Demographic(DemographicPredicate::Age {
                measure: AgeMeasure::Current,
                range,
            }) => {
                !person.deceased
                    && satisfies(range, Decimal::from(age_on(person.birth_date, self.today)))
            }
            _ => false,
        })
    }
}

#[async_trait]
impl PlanExecutor for InMemoryExecutor {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn execute(
        &self,
        _ctx: &DatasetContext,
        plan: &QueryPlan,
        request: ExecutionRequest,
    ) -> CohortResult<ExecutionResult> {
        match request {
            ExecutionRequest::Count => Ok(ExecutionResult::Count(self.matching(plan).len() as i64)),
            ExecutionRequest::Breakdown(_) => Ok(ExecutionResult::Breakdown(self.breakdown(plan))),
        }
    }
}

/// A search cluster holding one person document per subject that
/// interprets the query DSL the index builder emits.
pub struct InMemoryIndex {
    documents: Vec<Value>,
    queries: Mutex<Vec<IndexQuery>>,
}

impl InMemoryIndex {
    pub fn new(people: &[Person]) -> Arc<Self> {
        Arc::new(Self {
            documents: people.iter().map(person_document).collect(),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().len()
    }

    /// Subjects whose document matches `query`.
    pub fn matching(&self, query: &Value) -> BTreeSet<i64> {
        self.documents
            .iter()
            .filter(|doc| clause_matches(query, doc, ""))
            .filter_map(|doc| doc["person_id"].as_i64())
            .collect()
    }
}

#[async_trait]
impl IndexClient for InMemoryIndex {
    async fn run_query(&self, query: &IndexQuery) -> CohortResult<Value> {
        self.queries.lock().push(query.clone());
        let filter = &query.body["query"];
        match query.kind {
            IndexRequestKind::Count => Ok(json!({ "count": self.matching(filter).len() })),
            IndexRequestKind::Search => {
                let docs: Vec<&Value> = self
                    .documents
                    .iter()
                    .filter(|doc| clause_matches(filter, doc, ""))
                    .collect();
                let aggs = query.body["aggs"].as_object().cloned().unwrap_or_default();
                Ok(json!({ "aggregations": aggregate(&aggs, &docs) }))
            }
        }
    }
}

fn person_document(person: &Person) -> Value {
    let events: Vec<Value> = person
        .events
        .iter()
        .map(|e| {
            let mut event = json!({
                "domain": e.domain.as_str(),
                "start_date": e.date.format("%Y-%m-%d").to_string(),
            });
            let field = if e.standard { "concept_id" } else { "source_concept_id" };
            event[field] = json!(e.concept_id);
            event
        })
        .collect();
    json!({
        "person_id": person.id,
        "birth_datetime": person.birth_date.format("%Y-%m-%d").to_string(),
        "is_deceased": person.deceased,
        "gender_concept_name": person.gender,
        "sex_at_birth_concept_name": person.gender,
        "race_concept_name": person.race,
        "events": events,
    })
}

/// Looks a field up in a document, or in one nested object of `path`.
fn field<'a>(doc: &'a Value, name: &str, path: &str) -> Option<&'a Value> {
    let key = if path.is_empty() {
        name
    } else {
        name.strip_prefix(path)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(name)
    };
    doc.get(key)
}

fn single_entry(value: &Value) -> (&String, &Value) {
    value
        .as_object()
        .and_then(|object| object.iter().next())
        .unwrap_or_else(|| panic!("expected a single-key object, got {value}"))
}

fn compare(left: &Value, right: &Value) -> Option<CmpOrdering> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        _ => None,
    }
}

fn clause_matches(query: &Value, doc: &Value, path: &str) -> bool {
    let (kind, body) = single_entry(query);
    let all = |key: &str| {
        body.get(key)
            .and_then(Value::as_array)
            .map(|clauses| clauses.iter().all(|q| clause_matches(q, doc, path)))
            .unwrap_or(true)
    };
    match kind.as_str() {
        "bool" => {
            let none = body
                .get("must_not")
                .and_then(Value::as_array)
                .map(|clauses| !clauses.iter().any(|q| clause_matches(q, doc, path)))
                .unwrap_or(true);
            let should = match body.get("should").and_then(Value::as_array) {
                Some(clauses) => {
                    let scoring = body.get("filter").is_some() || body.get("must").is_some();
                    let minimum = body
                        .get("minimum_should_match")
                        .and_then(Value::as_u64)
                        .unwrap_or(if scoring { 0 } else { 1 });
                    let hits = clauses.iter().filter(|q| clause_matches(q, doc, path)).count();
                    hits as u64 >= minimum
                }
                None => true,
            };
            all("filter") && all("must") && none && should
        }
        "terms" => {
            let (name, values) = single_entry(body);
            let values = values.as_array().cloned().unwrap_or_default();
            field(doc, name, path).is_some_and(|v| values.contains(v))
        }
        "term" => {
            let (name, value) = single_entry(body);
            let value = value.get("value").unwrap_or(value);
            field(doc, name, path) == Some(value)
        }
        "range" => {
            let (name, bounds) = single_entry(body);
            let Some(actual) = field(doc, name, path) else {
                return false;
            };
            let check = |key: &str, accept: fn(CmpOrdering) -> bool| {
                bounds
                    .get(key)
                    .map(|bound| compare(actual, bound).is_some_and(accept))
                    .unwrap_or(true)
            };
            check("gt", |o| o == CmpOrdering::Greater)
                && check("gte", |o| o != CmpOrdering::Less)
                && check("lt", |o| o == CmpOrdering::Less)
                && check("lte", |o| o != CmpOrdering::Greater)
        }
        "nested" => {
            let nested_path = body["path"].as_str().unwrap_or_default();
            doc.get(nested_path)
                .and_then(Value::as_array)
                .is_some_and(|objects| {
                    objects
                        .iter()
                        .any(|object| clause_matches(&body["query"], object, nested_path))
                })
        }
        "match_all" => true,
        other => panic!("in-memory index does not understand '{other}'"),
    }
}

/// Evaluates `date_range` and `terms` aggregations into response buckets.
fn aggregate(aggs: &Map<String, Value>, docs: &[&Value]) -> Value {
    let mut out = Map::new();
    for (name, spec) in aggs {
        let sub = spec.get("aggs").and_then(Value::as_object);
        let buckets: Vec<Value> = if let Some(range) = spec.get("date_range") {
            let name = range["field"].as_str().unwrap_or_default();
            range["ranges"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .iter()
                .map(|bounds| {
                    let from = bounds.get("from").and_then(Value::as_str);
                    let to = bounds.get("to").and_then(Value::as_str);
                    let inside: Vec<&Value> = docs
                        .iter()
                        .copied()
                        .filter(|doc| match doc.get(name).and_then(Value::as_str) {
                            Some(date) => {
                                from.is_none_or(|from| date >= from) && to.is_none_or(|to| date < to)
                            }
                            None => false,
                        })
                        .collect();
                    let key = format!("{}-{}", from.unwrap_or("*"), to.unwrap_or("*"));
                    bucket(json!(key), &inside, sub)
                })
                .collect()
        } else if let Some(terms) = spec.get("terms") {
            let name = terms["field"].as_str().unwrap_or_default();
            let mut groups: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
            for &doc in docs {
                if let Some(key) = doc.get(name).and_then(Value::as_str) {
                    groups.entry(key).or_default().push(doc);
                }
            }
            groups
                .into_iter()
                .map(|(key, members)| bucket(json!(key), &members, sub))
                .collect()
        } else {
            panic!("in-memory index does not understand aggregation '{name}'");
        };
        out.insert(name.clone(), json!({ "buckets": buckets }));
    }
    Value::Object(out)
}

fn bucket(key: Value, docs: &[&Value], sub: Option<&Map<String, Value>>) -> Value {
    let mut bucket = json!({ "key": key, "doc_count": docs.len() });
    if let Some(sub) = sub {
        if let Value::Object(nested) = aggregate(sub, docs) {
            for (name, value) in nested {
                bucket[name] = value;
            }
        }
    }
    bucket
}
