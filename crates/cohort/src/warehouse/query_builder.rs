//! Warehouse SQL rendering.
//!
//! Event criteria read the flattened `cb_search_all_events` table, one
//! statement per domain an item references. Demographics read `person`
//! (and `cb_search_person` for ages). Every value taken from a request is
//! bound as a parameter; only table names from the [`DatasetContext`] and
//! fixed column names are interpolated.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::sql::{ParamBinder, SqlFragment, SqlParam, sql_operator};
use crate::compiler::{
    AgeMeasure, Comparison, DemographicPredicate, GroupPlan, HierarchyLookup, HierarchyRoot,
    ItemModifiers, ItemPlan, ParameterPredicate, QueryPlan, TemporalConstraint, TemporalPlan,
    ValuePredicate,
};
use crate::dataset::DatasetContext;
use crate::types::{DomainType, Stratification, TemporalMention};

/// Flattened event table.
pub const EVENTS_TABLE: &str = "cb_search_all_events";
/// Person table.
pub const PERSON_TABLE: &str = "person";
/// Denormalized person table with ages and concept names.
pub const SEARCH_PERSON_TABLE: &str = "cb_search_person";
/// Death records.
pub const DEATH_TABLE: &str = "death";
/// Criteria hierarchy with codes.
pub const CRITERIA_TABLE: &str = "cb_criteria";
/// Concept ancestry used to widen drug ingredients to their products.
pub const CRITERIA_ANCESTOR_TABLE: &str = "cb_criteria_ancestor";

/// Whole years since `dob`, one less until this year's birthday.
const CURRENT_AGE_SQL: &str = "(DATE_DIFF(CURRENT_DATE(), dob, YEAR) - \
IF(FORMAT_DATE('%m%d', CURRENT_DATE()) < FORMAT_DATE('%m%d', dob), 1, 0))";

/// Renders [`QueryPlan`]s as warehouse SQL.
pub struct WarehouseQueryBuilder;

impl WarehouseQueryBuilder {
    /// Builds `SELECT COUNT(DISTINCT person_id)` over the plan's subjects.
    pub fn build_count(ctx: &DatasetContext, plan: &QueryPlan) -> SqlFragment {
        let mut renderer = Renderer::new(ctx);
        let predicate = renderer.subject_predicate(plan);
        let sql = format!(
            "SELECT COUNT(DISTINCT person.person_id) AS count\nFROM {} person\nWHERE {}",
            ctx.table(PERSON_TABLE),
            predicate
        );
        renderer.binder.finish(sql)
    }

    /// Builds a query returning the `person_id` of every matching subject.
    pub fn build_subject_query(ctx: &DatasetContext, plan: &QueryPlan) -> SqlFragment {
        let mut renderer = Renderer::new(ctx);
        let sql = renderer.subject_query(plan);
        renderer.binder.finish(sql)
    }

    /// Builds the concept ids a hierarchy root expands to, one
    /// `concept_id` per row.
    pub fn build_hierarchy_lookup(ctx: &DatasetContext, lookup: &HierarchyLookup) -> SqlFragment {
        let mut renderer = Renderer::new(ctx);
        let concepts = renderer.hierarchy_concepts(lookup);
        let sql = format!("SELECT DISTINCT concept_id FROM (\n{concepts}) h");
        renderer.binder.finish(sql)
    }

    /// Builds the demographic breakdown query.
    ///
    /// Rows are `(gender, race, age_range, count)` where `gender` is the
    /// first letter of the stratifying concept name and `age_range` is one
    /// of `18-44`, `45-64` and `> 65`. Subjects under 18 fall in no bucket.
    pub fn build_breakdown(
        ctx: &DatasetContext,
        plan: &QueryPlan,
        stratification: Stratification,
    ) -> SqlFragment {
        let mut renderer = Renderer::new(ctx);
        let subjects = renderer.subject_query(plan);
        let column = match stratification {
            Stratification::Gender => "gender",
            Stratification::SexAtBirth => "sex_at_birth",
        };
        let sql = format!(
            "SELECT gender, race, age_range, COUNT(*) AS count\n\
             FROM (\n\
             SELECT SUBSTR(sp.{column}, 1, 1) AS gender, sp.race AS race,\n\
             CASE WHEN sp.age <= 44 THEN '18-44' WHEN sp.age <= 64 THEN '45-64' ELSE '> 65' END AS age_range\n\
             FROM (SELECT person_id, gender, sex_at_birth, race, {CURRENT_AGE_SQL} AS age\n\
             FROM {search_person}) sp\n\
             WHERE sp.age >= 18\n\
             AND sp.person_id IN ({subjects})\n\
             )\n\
             GROUP BY gender, race, age_range\n\
             ORDER BY age_range, gender, race",
            search_person = ctx.table(SEARCH_PERSON_TABLE),
        );
        renderer.binder.finish(sql)
    }
}

struct Renderer<'a> {
    ctx: &'a DatasetContext,
    binder: ParamBinder,
}

impl<'a> Renderer<'a> {
    fn new(ctx: &'a DatasetContext) -> Self {
        Self {
            ctx,
            binder: ParamBinder::new(),
        }
    }

    fn subject_query(&mut self, plan: &QueryPlan) -> String {
        let predicate = self.subject_predicate(plan);
        format!(
            "SELECT person.person_id\nFROM {} person\nWHERE {}",
            self.ctx.table(PERSON_TABLE),
            predicate
        )
    }

    /// `person.person_id IN (includes) AND NOT EXISTS (excludes)`.
    fn subject_predicate(&mut self, plan: &QueryPlan) -> String {
        if plan.matches_nothing() {
            return "FALSE".to_string();
        }
        let includes = self.groups_sql(&plan.includes);
        let mut predicate = format!("person.person_id IN (\n{includes})\n");
        if !plan.excludes.is_empty() {
            let excludes = self.groups_sql(&plan.excludes);
            predicate.push_str(&format!(
                "AND NOT EXISTS (\nSELECT 'x' FROM (\n{excludes}) x\nWHERE x.person_id = person.person_id)\n"
            ));
        }
        predicate
    }

    fn groups_sql(&mut self, groups: &[GroupPlan]) -> String {
        groups
            .iter()
            .map(|group| self.group_sql(group))
            .collect::<Vec<_>>()
            .join("UNION DISTINCT\n")
    }

    fn group_sql(&mut self, group: &GroupPlan) -> String {
        match group {
            GroupPlan::Union { items, .. } => items
                .iter()
                .map(|item| self.item_sql(item))
                .collect::<Vec<_>>()
                .join("UNION ALL\n"),
            GroupPlan::Temporal(temporal) => self.temporal_sql(temporal),
        }
    }

    /// One statement per referenced domain, plus one for demographics.
    fn item_sql(&mut self, item: &ItemPlan) -> String {
        let mut parts = Vec::new();
        for (domain, predicates) in item.event_predicates_by_domain() {
            parts.push(self.event_sql(domain, &predicates, &item.modifiers));
        }
        let demographics: Vec<&DemographicPredicate> = item.demographic_predicates().collect();
        if !demographics.is_empty() {
            parts.push(self.demographic_sql(&demographics));
        }
        parts.join("UNION ALL\n")
    }

    fn event_sql(
        &mut self,
        domain: DomainType,
        predicates: &[&ParameterPredicate],
        modifiers: &ItemModifiers,
    ) -> String {
        let conditions = self.event_conditions(domain, predicates);
        let filters = self.modifier_filters(modifiers);
        let base = format!(
            "SELECT DISTINCT person_id, entry_date, concept_id\nFROM {}\nWHERE {conditions}\n{filters}",
            self.ctx.table(EVENTS_TABLE),
        );
        let mut sql = format!("SELECT criteria.person_id FROM (\n{base}) criteria\n");
        if let Some(occurrences) = &modifiers.occurrences {
            let operands = self
                .binder
                .bind_operands(occurrences.operator, int_params(&occurrences.operands));
            sql.push_str(&format!(
                "GROUP BY criteria.person_id, criteria.concept_id\nHAVING COUNT(criteria.person_id) {} {operands}\n",
                sql_operator(occurrences.operator)
            ));
        }
        sql
    }

    /// `domain = @d AND (p1 OR p2 ...)`.
    fn event_conditions(&mut self, domain: DomainType, predicates: &[&ParameterPredicate]) -> String {
        let domain_param = self.binder.bind(SqlParam::text(domain.as_str()));
        let parts: Vec<String> = predicates
            .iter()
            .filter_map(|p| self.predicate_sql(p))
            .collect();
        format!("domain = {domain_param} AND ({})", parts.join(" OR\n"))
    }

    /// Event-level modifiers other than the occurrence count.
    fn modifier_filters(&mut self, modifiers: &ItemModifiers) -> String {
        let mut sql = String::new();
        if let Some(age) = &modifiers.age_at_event {
            let operands = self.binder.bind_operands(age.operator, decimal_params(&age.operands));
            sql.push_str(&format!(
                "AND age_at_event {} {operands}\n",
                sql_operator(age.operator)
            ));
        }
        if let Some(date) = &modifiers.event_date {
            let operands = self.binder.bind_operands(date.operator, date_params(&date.operands));
            sql.push_str(&format!(
                "AND entry_date {} {operands}\n",
                sql_operator(date.operator)
            ));
        }
        if let Some(visits) = &modifiers.encounters {
            let ids = self.binder.bind(SqlParam::IntegerArray(visits.clone()));
            sql.push_str(&format!("AND visit_concept_id IN UNNEST({ids})\n"));
        }
        sql
    }

    fn predicate_sql(&mut self, predicate: &ParameterPredicate) -> Option<String> {
        let sql = match predicate {
            ParameterPredicate::Concepts {
                standard,
                concept_ids,
                ..
            } => {
                let standard = self.bind_standard(*standard);
                let ids = self.binder.bind(SqlParam::IntegerArray(concept_ids.clone()));
                format!("(is_standard = {standard} AND concept_id IN UNNEST({ids}))")
            }
            ParameterPredicate::Hierarchy(lookup) => {
                let is_standard = self.bind_standard(lookup.standard);
                let concepts = self.hierarchy_concepts(lookup);
                format!("(is_standard = {is_standard} AND concept_id IN ({concepts}))")
            }
            ParameterPredicate::Valued {
                domain,
                standard,
                concept_id,
                values,
            } => {
                let standard = self.bind_standard(*standard);
                let concept = self.binder.bind(SqlParam::Integer(*concept_id));
                let mut sql = format!("(is_standard = {standard} AND concept_id = {concept}");
                for value in values {
                    let clause = self.value_sql(*domain, value);
                    sql.push_str(" AND ");
                    sql.push_str(&clause);
                }
                sql.push(')');
                sql
            }
            ParameterPredicate::BloodPressure {
                standard,
                concept_ids,
                systolic,
                diastolic,
                ..
            } => {
                let standard = self.bind_standard(*standard);
                let ids = self.binder.bind(SqlParam::IntegerArray(concept_ids.clone()));
                let mut sql = format!("(is_standard = {standard} AND concept_id IN UNNEST({ids})");
                for (column, range) in [("systolic", systolic), ("diastolic", diastolic)] {
                    if let Some(range) = range {
                        let clause = self.decimal_comparison(column, range);
                        sql.push_str(" AND ");
                        sql.push_str(&clause);
                    }
                }
                sql.push(')');
                sql
            }
            ParameterPredicate::Demographic(_) => return None,
        };
        Some(sql)
    }

    fn value_sql(&mut self, domain: DomainType, value: &ValuePredicate) -> String {
        match value {
            ValuePredicate::Numeric(range) => self.decimal_comparison("value_as_number", range),
            ValuePredicate::Categorical(ids) => {
                let column = if domain == DomainType::Survey {
                    "value_source_concept_id"
                } else {
                    "value_as_concept_id"
                };
                let ids = self.binder.bind(SqlParam::IntegerArray(ids.clone()));
                format!("{column} IN UNNEST({ids})")
            }
        }
    }

    fn decimal_comparison(&mut self, column: &str, range: &Comparison<Decimal>) -> String {
        let operands = self
            .binder
            .bind_operands(range.operator, decimal_params(&range.operands));
        format!("{column} {} {operands}", sql_operator(range.operator))
    }

    /// Concept ids selectable under a hierarchy root: every `cb_criteria`
    /// row whose path passes through the root's row, widened through
    /// `cb_criteria_ancestor` when ancestor data is requested.
    fn hierarchy_concepts(&mut self, lookup: &HierarchyLookup) -> String {
        let domain = self.binder.bind(SqlParam::text(lookup.domain.as_str()));
        let standard = self.bind_standard(lookup.standard);
        let root = match &lookup.root {
            HierarchyRoot::Concept(id) => {
                format!("cr.concept_id = {}", self.binder.bind(SqlParam::Integer(*id)))
            }
            HierarchyRoot::Code(code) => {
                format!("cr.code = {}", self.binder.bind(SqlParam::text(code)))
            }
        };
        let group = self.binder.bind(SqlParam::Integer(i64::from(lookup.group)));
        let criteria = self.ctx.table(CRITERIA_TABLE);
        let descendants = format!(
            "SELECT DISTINCT c.concept_id\n\
             FROM {criteria} c\n\
             JOIN (SELECT CAST(cr.id AS STRING) AS id\n\
             FROM {criteria} cr\n\
             WHERE cr.domain_id = {domain}\n\
             AND cr.is_standard = {standard}\n\
             AND {root}\n\
             AND cr.is_group = {group}\n\
             AND cr.is_selectable = 1) a\n\
             ON (c.path LIKE CONCAT('%.', a.id, '.%') OR c.path LIKE CONCAT('%.', a.id) \
             OR c.path LIKE CONCAT(a.id, '.%') OR c.path = a.id)\n\
             WHERE c.domain_id = {domain}\n\
             AND c.is_standard = {standard}\n\
             AND c.is_selectable = 1"
        );
        if lookup.ancestors {
            format!(
                "SELECT DISTINCT ca.descendant_id AS concept_id\n\
                 FROM {} ca\n\
                 JOIN (\n{descendants}) b ON ca.ancestor_id = b.concept_id",
                self.ctx.table(CRITERIA_ANCESTOR_TABLE),
            )
        } else {
            descendants
        }
    }

    fn bind_standard(&mut self, standard: bool) -> String {
        self.binder.bind(SqlParam::Integer(i64::from(standard)))
    }

    /// Demographic predicates of one item, OR'd over the person table.
    fn demographic_sql(&mut self, predicates: &[&DemographicPredicate]) -> String {
        let conditions: Vec<String> = predicates
            .iter()
            .map(|p| self.demographic_condition(p))
            .collect();
        format!(
            "SELECT p.person_id\nFROM {} p\nWHERE {}\n",
            self.ctx.table(PERSON_TABLE),
            conditions.join(" OR\n")
        )
    }

    fn demographic_condition(&mut self, predicate: &DemographicPredicate) -> String {
        let (column, ids) = match predicate {
            DemographicPredicate::Gender(ids) => ("gender_concept_id", ids),
            DemographicPredicate::Sex(ids) => ("sex_at_birth_concept_id", ids),
            DemographicPredicate::Race(ids) => ("race_concept_id", ids),
            DemographicPredicate::Ethnicity(ids) => ("ethnicity_concept_id", ids),
            DemographicPredicate::Age { measure, range } => {
                let column = match measure {
                    AgeMeasure::Current => CURRENT_AGE_SQL,
                    AgeMeasure::AtConsent => "age_at_consent",
                    AgeMeasure::AtCdr => "age_at_cdr",
                };
                let comparison = self.decimal_comparison(column, range);
                return format!(
                    "p.person_id IN (SELECT sp.person_id\nFROM {} sp\nWHERE {comparison}\n\
                     AND NOT EXISTS (SELECT 'x' FROM {} d WHERE d.person_id = sp.person_id))",
                    self.ctx.table(SEARCH_PERSON_TABLE),
                    self.ctx.table(DEATH_TABLE),
                );
            }
            DemographicPredicate::Deceased => {
                return format!(
                    "EXISTS (SELECT 'x' FROM {} d WHERE d.person_id = p.person_id)",
                    self.ctx.table(DEATH_TABLE)
                );
            }
        };
        let ids = self.binder.bind(SqlParam::IntegerArray(ids.clone()));
        format!("p.{column} IN UNNEST({ids})")
    }

    /// Anchor events with a target event for the same subject in the
    /// configured relationship.
    fn temporal_sql(&mut self, temporal: &TemporalPlan) -> String {
        let anchor = self.temporal_side(&temporal.anchor, temporal.mention);
        let target = self.temporal_side(&temporal.target, temporal.mention);
        let mut condition = "temp1.person_id = temp2.person_id AND ".to_string();
        match temporal.constraint {
            TemporalConstraint::SameEncounter => {
                condition.push_str("temp1.visit_occurrence_id = temp2.visit_occurrence_id");
            }
            TemporalConstraint::DaysBefore(days) => {
                let days = self.binder.bind(SqlParam::Integer(i64::from(days)));
                condition.push_str(&format!(
                    "temp1.entry_date <= DATE_SUB(temp2.entry_date, INTERVAL {days} DAY)"
                ));
            }
            TemporalConstraint::DaysAfter(days) => {
                let days = self.binder.bind(SqlParam::Integer(i64::from(days)));
                condition.push_str(&format!(
                    "temp1.entry_date >= DATE_ADD(temp2.entry_date, INTERVAL {days} DAY)"
                ));
            }
            TemporalConstraint::WithinDays(days) => {
                let days = self.binder.bind(SqlParam::Integer(i64::from(days)));
                condition.push_str(&format!(
                    "temp1.entry_date BETWEEN DATE_SUB(temp2.entry_date, INTERVAL {days} DAY) \
                     AND DATE_ADD(temp2.entry_date, INTERVAL {days} DAY)"
                ));
            }
        }
        format!(
            "SELECT temp1.person_id\nFROM (\n{anchor}) temp1\nWHERE EXISTS (SELECT 1\nFROM (\n{target}) temp2\nWHERE ({condition}))\n"
        )
    }

    fn temporal_side(&mut self, items: &[ItemPlan], mention: TemporalMention) -> String {
        items
            .iter()
            .map(|item| self.temporal_events(item, mention))
            .collect::<Vec<_>>()
            .join("UNION ALL\n")
    }

    /// The dated events of one item, restricted to subjects matching the
    /// whole item and ranked when only the first or last mention counts.
    fn temporal_events(&mut self, item: &ItemPlan, mention: TemporalMention) -> String {
        let by_domain = item.event_predicates_by_domain();
        let mut conditions = Vec::new();
        for (domain, predicates) in &by_domain {
            conditions.push(format!("({})", self.event_conditions(*domain, predicates)));
        }
        let filters = self.modifier_filters(&item.modifiers);
        let subjects = self.item_sql(item);
        let rank = match mention {
            TemporalMention::AnyMention => "",
            TemporalMention::FirstMention => {
                ", RANK() OVER (PARTITION BY person_id ORDER BY entry_date) rn"
            }
            TemporalMention::LastMention => {
                ", RANK() OVER (PARTITION BY person_id ORDER BY entry_date DESC) rn"
            }
        };
        let events = format!(
            "SELECT person_id, visit_occurrence_id, entry_date{rank}\nFROM {}\nWHERE ({})\n{filters}AND person_id IN (\n{subjects})\n",
            self.ctx.table(EVENTS_TABLE),
            conditions.join(" OR\n"),
        );
        match mention {
            TemporalMention::AnyMention => events,
            TemporalMention::FirstMention | TemporalMention::LastMention => format!(
                "SELECT person_id, visit_occurrence_id, entry_date\nFROM (\n{events}) a\nWHERE rn = 1\n"
            ),
        }
    }
}

fn decimal_params(values: &[Decimal]) -> Vec<SqlParam> {
    values.iter().copied().map(SqlParam::Decimal).collect()
}

fn int_params(values: &[i64]) -> Vec<SqlParam> {
    values.iter().copied().map(SqlParam::Integer).collect()
}

fn date_params(values: &[NaiveDate]) -> Vec<SqlParam> {
    values.iter().copied().map(SqlParam::Date).collect()
}
