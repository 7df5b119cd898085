//! The criteria compiler.

use tracing::debug;

use super::analyzer::{detect_plan_features, requires_exact};
use super::plan::{
    AgeMeasure, Comparison, DemographicPredicate, GroupPlan, HierarchyLookup, ItemModifiers,
    ItemPlan, ParameterPredicate, QueryPlan, TemporalConstraint, TemporalPlan, ValuePredicate,
};
use super::validation::{
    ParsedAttribute, age_attribute, attribute_predicate, blood_pressure_concepts,
    concept_operands, date_comparison, hierarchy_root, integer_comparison, numeric_comparison,
    require_concept_id,
};
use crate::error::{CohortResult, CompileError, ValidationError};
use crate::types::{
    AttrName, CriteriaSubType, CriteriaType, DomainType, Modifier, ModifierType, SearchGroup,
    SearchGroupItem, SearchParameter, SearchRequest, TemporalRole, TemporalTime,
};

/// Concept id of the systolic blood pressure attribute.
pub const SYSTOLIC_CONCEPT_ID: i64 = 903118;
/// Concept id of the diastolic blood pressure attribute.
pub const DIASTOLIC_CONCEPT_ID: i64 = 903115;

/// Compiles resolved criteria trees into [`QueryPlan`]s.
///
/// Compilation is deterministic and performs no I/O. Unresolved rollup
/// parameters are rejected; run the request through
/// [`DomainResolver`](crate::resolver::DomainResolver) first.
#[derive(Debug, Clone, Copy, Default)]
pub struct CriteriaCompiler;

impl CriteriaCompiler {
    /// Creates a compiler.
    pub fn new() -> Self {
        Self
    }

    /// Compiles a request.
    pub fn compile(&self, request: &SearchRequest) -> CohortResult<QueryPlan> {
        // Fail fast before doing any other work.
        if let Some(param) = request.parameters().find(|p| p.is_unresolved()) {
            return Err(CompileError::UnresolvedDomain {
                parameter: param.label(),
                criteria_type: param.criteria_type,
            }
            .into());
        }

        let includes = request
            .includes
            .iter()
            .map(compile_group)
            .collect::<CohortResult<Vec<_>>>()?;
        let excludes = request
            .excludes
            .iter()
            .map(compile_group)
            .collect::<CohortResult<Vec<_>>>()?;

        let features = detect_plan_features(&includes, &excludes);
        let exact_only = requires_exact(&features);
        debug!(
            includes = includes.len(),
            excludes = excludes.len(),
            exact_only,
            features = ?features,
            "Compiled criteria"
        );

        Ok(QueryPlan {
            includes,
            excludes,
            features,
            exact_only,
        })
    }
}

fn compile_group(group: &SearchGroup) -> CohortResult<GroupPlan> {
    if group.items.is_empty() {
        return Err(ValidationError::EmptyGroup {
            group: group.label().to_string(),
        }
        .into());
    }
    if group.temporal {
        return compile_temporal(group).map(GroupPlan::Temporal);
    }
    Ok(GroupPlan::Union {
        id: group.id.clone(),
        items: group
            .items
            .iter()
            .map(compile_item)
            .collect::<CohortResult<Vec<_>>>()?,
    })
}

fn compile_temporal(group: &SearchGroup) -> CohortResult<TemporalPlan> {
    let malformed = |reason: String| CompileError::MalformedTemporalGroup {
        group: group.label().to_string(),
        reason,
    };

    let mut anchor = Vec::new();
    let mut target = Vec::new();
    for item in &group.items {
        let plan = compile_item(item)?;
        if plan.predicates.iter().any(ParameterPredicate::is_demographic) {
            return Err(malformed(format!(
                "item '{}' has demographic criteria, which have no event dates",
                item.label()
            ))
            .into());
        }
        match item.temporal_role() {
            Some(TemporalRole::Anchor) => anchor.push(plan),
            Some(TemporalRole::Target) => target.push(plan),
            None => {
                return Err(malformed(format!(
                    "item '{}' has temporal group {:?}, expected 0 or 1",
                    item.label(),
                    item.temporal_group
                ))
                .into());
            }
        }
    }
    if anchor.is_empty() || target.is_empty() {
        return Err(malformed("items are required in both temporal groups".to_string()).into());
    }

    let mention = group
        .mention
        .ok_or_else(|| malformed("mention is required".to_string()))?;
    let time = group
        .time
        .ok_or_else(|| malformed("time is required".to_string()))?;
    let days = if time.requires_time_value() {
        let value = group
            .time_value
            .ok_or_else(|| malformed(format!("{time} requires a time value")))?;
        u32::try_from(value)
            .map_err(|_| malformed(format!("time value {value} is out of range")))?
    } else {
        0
    };
    let constraint = match time {
        TemporalTime::DuringSameEncounterAs => TemporalConstraint::SameEncounter,
        TemporalTime::XDaysBefore => TemporalConstraint::DaysBefore(days),
        TemporalTime::XDaysAfter => TemporalConstraint::DaysAfter(days),
        TemporalTime::WithinXDaysOf => TemporalConstraint::WithinDays(days),
    };

    Ok(TemporalPlan {
        id: group.id.clone(),
        anchor,
        target,
        mention,
        constraint,
    })
}

fn compile_item(item: &SearchGroupItem) -> CohortResult<ItemPlan> {
    if item.search_parameters.is_empty() {
        return Err(ValidationError::EmptyItem { item: item.label() }.into());
    }

    let mut predicates: Vec<ParameterPredicate> = Vec::new();
    for param in &item.search_parameters {
        let predicate = compile_parameter(item, param)?;
        merge_predicate(&mut predicates, predicate);
    }

    let modifiers = compile_modifiers(item)?;
    if !modifiers.is_empty() && predicates.iter().any(ParameterPredicate::is_demographic) {
        if let Some(modifier) = item.modifiers.first() {
            return Err(ValidationError::ModifierNotAllowed {
                modifier: modifier.name,
            }
            .into());
        }
    }

    Ok(ItemPlan {
        id: item.id.clone(),
        predicates,
        modifiers,
    })
}

fn compile_parameter(
    item: &SearchGroupItem,
    param: &SearchParameter,
) -> CohortResult<ParameterPredicate> {
    let domain = param
        .domain
        .or_else(|| item.item_type.default_domain())
        .ok_or_else(|| CompileError::UnresolvedDomain {
            parameter: param.label(),
            criteria_type: param.criteria_type,
        })?;

    if param.criteria_type.is_demographic() != domain.is_demographic() {
        return Err(CompileError::UnsupportedCriteria {
            domain,
            criteria_type: param.criteria_type,
        }
        .into());
    }
    if domain.is_demographic() {
        return Ok(ParameterPredicate::Demographic(compile_demographic(param)?));
    }

    if param.group || param.ancestor_data {
        return Ok(ParameterPredicate::Hierarchy(HierarchyLookup {
            domain,
            criteria_type: param.criteria_type,
            standard: param.standard,
            root: hierarchy_root(param)?,
            group: param.group,
            ancestors: param.ancestor_data,
        }));
    }

    if param.subtype == Some(CriteriaSubType::Bp) {
        return compile_blood_pressure(domain, param);
    }

    let concept_id = require_concept_id(param)?;
    let mut values = Vec::new();
    for attribute in &param.attributes {
        match attribute_predicate(param, attribute)? {
            ParsedAttribute::Unconstrained => {}
            ParsedAttribute::Numeric(range) => values.push(ValuePredicate::Numeric(range)),
            ParsedAttribute::Categorical(ids) => values.push(ValuePredicate::Categorical(ids)),
        }
    }
    if values.is_empty() {
        Ok(ParameterPredicate::Concepts {
            domain,
            standard: param.standard,
            concept_ids: vec![concept_id],
        })
    } else {
        Ok(ParameterPredicate::Valued {
            domain,
            standard: param.standard,
            concept_id,
            values,
        })
    }
}

fn compile_blood_pressure(
    domain: DomainType,
    param: &SearchParameter,
) -> CohortResult<ParameterPredicate> {
    let concept_ids = blood_pressure_concepts(param)?;
    let mut systolic = None;
    let mut diastolic = None;
    for attribute in param.attributes.iter().filter(|a| a.name != AttrName::Any) {
        let context = format!("blood pressure attribute of '{}'", param.label());
        let range = numeric_comparison(&context, attribute.operator, &attribute.operands)?;
        match attribute.concept_id {
            Some(SYSTOLIC_CONCEPT_ID) => systolic = Some(range),
            Some(DIASTOLIC_CONCEPT_ID) => diastolic = Some(range),
            _ => {
                return Err(ValidationError::MissingConceptId {
                    parameter: param.label(),
                    criteria_type: param.criteria_type,
                }
                .into());
            }
        }
    }
    Ok(ParameterPredicate::BloodPressure {
        domain,
        standard: param.standard,
        concept_ids,
        systolic,
        diastolic,
    })
}

fn compile_demographic(param: &SearchParameter) -> CohortResult<DemographicPredicate> {
    let predicate = match param.criteria_type {
        CriteriaType::Gender => DemographicPredicate::Gender(vec![require_concept_id(param)?]),
        CriteriaType::Sex => DemographicPredicate::Sex(vec![require_concept_id(param)?]),
        CriteriaType::Race => DemographicPredicate::Race(vec![require_concept_id(param)?]),
        CriteriaType::Ethnicity => {
            DemographicPredicate::Ethnicity(vec![require_concept_id(param)?])
        }
        CriteriaType::Deceased => DemographicPredicate::Deceased,
        CriteriaType::Age => {
            let (name, range) = age_attribute(param)?;
            let measure = match name {
                AttrName::AgeAtConsent => AgeMeasure::AtConsent,
                AttrName::AgeAtCdr => AgeMeasure::AtCdr,
                _ => AgeMeasure::Current,
            };
            DemographicPredicate::Age { measure, range }
        }
        other => {
            return Err(CompileError::UnsupportedCriteria {
                domain: DomainType::Person,
                criteria_type: other,
            }
            .into());
        }
    };
    Ok(predicate)
}

fn compile_modifiers(item: &SearchGroupItem) -> CohortResult<ItemModifiers> {
    let mut modifiers = ItemModifiers::default();
    for modifier in &item.modifiers {
        let context = format!("{} modifier of '{}'", modifier.name, item.label());
        let duplicate = match modifier.name {
            ModifierType::AgeAtEvent => modifiers
                .age_at_event
                .replace(numeric_comparison(&context, modifier.operator, &modifier.operands)?)
                .is_some(),
            ModifierType::EventDate => modifiers
                .event_date
                .replace(date_comparison(&context, modifier.operator, &modifier.operands)?)
                .is_some(),
            ModifierType::Encounters => modifiers
                .encounters
                .replace(concept_operands(&context, modifier.operator, &modifier.operands)?)
                .is_some(),
            ModifierType::NumOfOccurrences => modifiers
                .occurrences
                .replace(occurrence_count(&context, modifier)?)
                .is_some(),
        };
        if duplicate {
            return Err(ValidationError::DuplicateModifier {
                modifier: modifier.name,
                item: item.label(),
            }
            .into());
        }
    }
    Ok(modifiers)
}

fn occurrence_count(context: &str, modifier: &Modifier) -> CohortResult<Comparison<i64>> {
    let count = integer_comparison(context, modifier.operator, &modifier.operands)?;
    if let Some(negative) = count.operands.iter().find(|n| **n < 0) {
        return Err(ValidationError::NonNumericOperand {
            context: context.to_string(),
            operand: negative.to_string(),
        }
        .into());
    }
    Ok(count)
}

/// Folds a predicate into the item's list, merging plain concept sets that
/// share a domain and standard flag, and demographic id lists of one kind.
fn merge_predicate(predicates: &mut Vec<ParameterPredicate>, predicate: ParameterPredicate) {
    for existing in predicates.iter_mut() {
        match (existing, &predicate) {
            (
                ParameterPredicate::Concepts {
                    domain,
                    standard,
                    concept_ids,
                },
                ParameterPredicate::Concepts {
                    domain: new_domain,
                    standard: new_standard,
                    concept_ids: new_ids,
                },
            ) if domain == new_domain && standard == new_standard => {
                extend_unique(concept_ids, new_ids);
                return;
            }
            (ParameterPredicate::Demographic(existing), ParameterPredicate::Demographic(new)) => {
                match (existing, new) {
                    (DemographicPredicate::Gender(ids), DemographicPredicate::Gender(new_ids))
                    | (DemographicPredicate::Sex(ids), DemographicPredicate::Sex(new_ids))
                    | (DemographicPredicate::Race(ids), DemographicPredicate::Race(new_ids))
                    | (
                        DemographicPredicate::Ethnicity(ids),
                        DemographicPredicate::Ethnicity(new_ids),
                    ) => {
                        extend_unique(ids, new_ids);
                        return;
                    }
                    (DemographicPredicate::Deceased, DemographicPredicate::Deceased) => return,
                    _ => {}
                }
            }
            _ => {}
        }
    }
    predicates.push(predicate);
}

fn extend_unique(ids: &mut Vec<i64>, new_ids: &[i64]) {
    for id in new_ids {
        if !ids.contains(id) {
            ids.push(*id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{HierarchyRoot, PlanFeature};
    use crate::error::CohortError;
    use crate::types::{Attribute, ItemType, Operator, TemporalMention};

    fn snomed(concept_id: i64) -> SearchParameter {
        SearchParameter::concept(CriteriaType::Snomed, DomainType::Condition, concept_id, true)
    }

    fn condition_item(concept_id: i64) -> SearchGroupItem {
        SearchGroupItem::new(ItemType::Condition).with_parameter(snomed(concept_id))
    }

    fn compile(request: &SearchRequest) -> CohortResult<QueryPlan> {
        CriteriaCompiler::new().compile(request)
    }

    #[test]
    fn test_empty_includes_matches_nothing() {
        let request =
            SearchRequest::new().exclude(SearchGroup::new("e").with_item(condition_item(1)));
        let plan = compile(&request).unwrap();
        assert!(plan.matches_nothing());
        assert!(!plan.exact_only);
        assert!(plan.has_feature(PlanFeature::NoIncludes));
    }

    #[test]
    fn test_unresolved_rollup_fails_fast() {
        let request = SearchRequest::new().include(
            SearchGroup::new("g").with_item(SearchGroupItem::new(ItemType::Icd9).with_parameter(
                SearchParameter::rollup(CriteriaType::Icd9, Some(CriteriaSubType::Cm), "001"),
            )),
        );
        let err = compile(&request).unwrap_err();
        assert!(matches!(
            err,
            CohortError::Compile(CompileError::UnresolvedDomain { .. })
        ));
    }

    #[test]
    fn test_rollups_and_ancestor_data_compile_to_hierarchy_lookups() {
        let mut rollup = SearchParameter::rollup(CriteriaType::Icd10, Some(CriteriaSubType::Cm), "E11");
        rollup.domain = Some(DomainType::Condition);
        let mut ingredient = SearchParameter::concept(CriteriaType::RxNorm, DomainType::Drug, 1_124_300, true);
        ingredient.ancestor_data = true;
        let request = SearchRequest::new()
            .include(SearchGroup::new("a").with_item(SearchGroupItem::new(ItemType::Icd10).with_parameter(rollup)))
            .include(SearchGroup::new("b").with_item(SearchGroupItem::new(ItemType::Drug).with_parameter(ingredient)));
        let plan = compile(&request).unwrap();

        let lookups: Vec<_> = plan.hierarchy_lookups().into_iter().cloned().collect();
        assert_eq!(
            lookups,
            vec![
                HierarchyLookup {
                    domain: DomainType::Condition,
                    criteria_type: CriteriaType::Icd10,
                    standard: false,
                    root: HierarchyRoot::Code("E11".to_string()),
                    group: true,
                    ancestors: false,
                },
                HierarchyLookup {
                    domain: DomainType::Drug,
                    criteria_type: CriteriaType::RxNorm,
                    standard: true,
                    root: HierarchyRoot::Concept(1_124_300),
                    group: false,
                    ancestors: true,
                },
            ]
        );
        assert!(plan.has_feature(PlanFeature::HierarchyExpansion));
        assert!(!plan.exact_only);
    }

    #[test]
    fn test_concepts_merge_within_item() {
        let mut source = snomed(3);
        source.standard = false;
        let item = SearchGroupItem::new(ItemType::Condition)
            .with_parameter(snomed(1))
            .with_parameter(snomed(2))
            .with_parameter(snomed(1))
            .with_parameter(source);
        let plan = compile(&SearchRequest::new().include(SearchGroup::new("g").with_item(item)))
            .unwrap();

        let item = plan.includes[0].items().next().unwrap();
        assert_eq!(
            item.predicates,
            vec![
                ParameterPredicate::Concepts {
                    domain: DomainType::Condition,
                    standard: true,
                    concept_ids: vec![1, 2],
                },
                ParameterPredicate::Concepts {
                    domain: DomainType::Condition,
                    standard: false,
                    concept_ids: vec![3],
                },
            ]
        );
    }

    #[test]
    fn test_measurement_attributes() {
        let param = SearchParameter::concept(CriteriaType::Loinc, DomainType::Measurement, 3000963, true)
            .with_attribute(Attribute::new(AttrName::Num, Operator::Between, ["10", "12.5"]));
        let plan = compile(&SearchRequest::new().include(
            SearchGroup::new("g")
                .with_item(SearchGroupItem::new(ItemType::Measurement).with_parameter(param)),
        ))
        .unwrap();
        assert!(plan.exact_only);
        assert!(plan.has_feature(PlanFeature::NumericValue));

        let param = SearchParameter::concept(CriteriaType::Loinc, DomainType::Measurement, 3000963, true)
            .with_attribute(Attribute::new(AttrName::Cat, Operator::In, ["45876384"]));
        let plan = compile(&SearchRequest::new().include(
            SearchGroup::new("g")
                .with_item(SearchGroupItem::new(ItemType::Measurement).with_parameter(param)),
        ))
        .unwrap();
        assert!(!plan.exact_only);
    }

    #[test]
    fn test_blood_pressure_is_exact_only() {
        let param = SearchParameter::concept(CriteriaType::Pm, DomainType::Measurement, 0, true)
            .with_subtype(CriteriaSubType::Bp)
            .with_attribute(
                Attribute::new(AttrName::Num, Operator::LessThanOrEqualTo, ["90"])
                    .with_concept_id(SYSTOLIC_CONCEPT_ID),
            )
            .with_attribute(
                Attribute::new(AttrName::Num, Operator::Between, ["60", "80"])
                    .with_concept_id(DIASTOLIC_CONCEPT_ID),
            );
        let plan = compile(&SearchRequest::new().include(
            SearchGroup::new("g").with_item(
                SearchGroupItem::new(ItemType::PhysicalMeasurement).with_parameter(param),
            ),
        ))
        .unwrap();
        assert!(plan.exact_only);
        match &plan.includes[0].items().next().unwrap().predicates[0] {
            ParameterPredicate::BloodPressure {
                concept_ids,
                systolic,
                diastolic,
                ..
            } => {
                assert_eq!(concept_ids, &vec![SYSTOLIC_CONCEPT_ID, DIASTOLIC_CONCEPT_ID]);
                assert!(systolic.is_some());
                assert_eq!(diastolic.as_ref().unwrap().operands.len(), 2);
            }
            other => panic!("unexpected predicate {other:?}"),
        }
    }

    #[test]
    fn test_demographics() {
        let item = SearchGroupItem::new(ItemType::Person)
            .with_parameter(SearchParameter::demographic(CriteriaType::Gender, Some(8507)))
            .with_parameter(SearchParameter::demographic(CriteriaType::Gender, Some(8532)))
            .with_parameter(
                SearchParameter::demographic(CriteriaType::Age, None).with_attribute(
                    Attribute::new(AttrName::AgeAtConsent, Operator::Between, ["20", "34"]),
                ),
            );
        let plan = compile(&SearchRequest::new().include(SearchGroup::new("g").with_item(item)))
            .unwrap();
        let item = plan.includes[0].items().next().unwrap();
        assert_eq!(item.predicates.len(), 2);
        assert_eq!(
            item.predicates[0],
            ParameterPredicate::Demographic(DemographicPredicate::Gender(vec![8507, 8532]))
        );
        assert!(matches!(
            item.predicates[1],
            ParameterPredicate::Demographic(DemographicPredicate::Age {
                measure: AgeMeasure::AtConsent,
                ..
            })
        ));
        assert!(!plan.exact_only);
    }

    #[test]
    fn test_deceased_is_exact_only() {
        let item = SearchGroupItem::new(ItemType::Person)
            .with_parameter(SearchParameter::demographic(CriteriaType::Deceased, None));
        let plan = compile(&SearchRequest::new().include(SearchGroup::new("g").with_item(item)))
            .unwrap();
        assert!(plan.exact_only);
    }

    #[test]
    fn test_demographic_type_outside_person_domain() {
        let mut param = SearchParameter::demographic(CriteriaType::Race, Some(1));
        param.domain = Some(DomainType::Condition);
        let item = SearchGroupItem::new(ItemType::Condition).with_parameter(param);
        let err = compile(&SearchRequest::new().include(SearchGroup::new("g").with_item(item)))
            .unwrap_err();
        assert!(matches!(
            err,
            CohortError::Compile(CompileError::UnsupportedCriteria { .. })
        ));
    }

    #[test]
    fn test_modifiers_compile() {
        let item = condition_item(1)
            .with_modifier(Modifier::new(
                ModifierType::AgeAtEvent,
                Operator::GreaterThanOrEqualTo,
                ["18"],
            ))
            .with_modifier(Modifier::new(ModifierType::Encounters, Operator::In, ["9201"]))
            .with_modifier(Modifier::new(
                ModifierType::NumOfOccurrences,
                Operator::GreaterThanOrEqualTo,
                ["2"],
            ));
        let plan = compile(&SearchRequest::new().include(SearchGroup::new("g").with_item(item)))
            .unwrap();
        let modifiers = &plan.includes[0].items().next().unwrap().modifiers;
        assert_eq!(modifiers.encounters, Some(vec![9201]));
        assert_eq!(modifiers.occurrences.as_ref().unwrap().operands, vec![2]);
        assert!(!plan.exact_only);
    }

    fn temporal_group(time: TemporalTime, time_value: Option<i64>) -> SearchGroup {
        SearchGroup::new("t")
            .with_item(
                SearchGroupItem::new(ItemType::Drug)
                    .with_parameter(SearchParameter::concept(
                        CriteriaType::RxNorm,
                        DomainType::Drug,
                        1,
                        true,
                    ))
                    .in_role(TemporalRole::Anchor),
            )
            .with_item(condition_item(2).in_role(TemporalRole::Target))
            .temporal(TemporalMention::AnyMention, time, time_value)
    }

    #[test]
    fn test_temporal_group_is_exact_only() {
        let request =
            SearchRequest::new().include(temporal_group(TemporalTime::WithinXDaysOf, Some(30)));
        let plan = compile(&request).unwrap();
        assert!(plan.exact_only);
        match &plan.includes[0] {
            GroupPlan::Temporal(t) => {
                assert_eq!(t.constraint, TemporalConstraint::WithinDays(30));
                assert_eq!(t.anchor[0].predicates[0].domain(), DomainType::Drug);
                assert_eq!(t.target[0].predicates[0].domain(), DomainType::Condition);
            }
            other => panic!("expected temporal group, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_temporal_groups() {
        let missing_value = temporal_group(TemporalTime::XDaysAfter, None);
        let mut one_role = temporal_group(TemporalTime::DuringSameEncounterAs, None);
        one_role.items[1].temporal_group = Some(0);
        let mut bad_role = temporal_group(TemporalTime::WithinXDaysOf, Some(3));
        bad_role.items[0].temporal_group = Some(7);
        let mut no_mention = temporal_group(TemporalTime::WithinXDaysOf, Some(3));
        no_mention.mention = None;
        let negative = temporal_group(TemporalTime::XDaysBefore, Some(-1));

        for group in [missing_value, one_role, bad_role, no_mention, negative] {
            let err = compile(&SearchRequest::new().include(group)).unwrap_err();
            assert!(
                matches!(
                    err,
                    CohortError::Compile(CompileError::MalformedTemporalGroup { .. })
                ),
                "unexpected error {err}"
            );
        }
    }

    #[test]
    fn test_same_encounter_needs_no_value() {
        let request =
            SearchRequest::new().include(temporal_group(TemporalTime::DuringSameEncounterAs, None));
        let plan = compile(&request).unwrap();
        match &plan.includes[0] {
            GroupPlan::Temporal(t) => assert_eq!(t.constraint, TemporalConstraint::SameEncounter),
            other => panic!("expected temporal group, got {other:?}"),
        }
    }

    #[test]
    fn test_compile_is_deterministic() {
        let request = SearchRequest::new()
            .include(SearchGroup::new("a").with_item(condition_item(1)))
            .include(temporal_group(TemporalTime::XDaysBefore, Some(5)))
            .exclude(SearchGroup::new("b").with_item(condition_item(2)));
        let compiler = CriteriaCompiler::new();
        assert_eq!(compiler.compile(&request).unwrap(), compiler.compile(&request).unwrap());
    }
}
