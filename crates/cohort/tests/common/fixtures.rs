//! Request and dataset fixtures.

use chrono::NaiveDate;

use helios_cohort::dataset::DatasetContext;
use helios_cohort::resolver::{CodeKey, StaticCodeDomainIndex};
use helios_cohort::types::{
    AttrName, Attribute, CriteriaSubType, CriteriaType, DomainType, ItemType, Operator,
    SearchGroup, SearchGroupItem, SearchParameter, SearchRequest, TemporalMention, TemporalRole,
    TemporalTime,
};

/// The date current ages are measured on unless a test says otherwise.
pub fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
}

/// Dataset used by every test; indexed when `indexed` is set.
pub fn dataset(indexed: bool) -> DatasetContext {
    let builder = DatasetContext::builder()
        .project("cohort-test")
        .dataset("synthetic_cdr")
        .correlation_id("test-request");
    let builder = if indexed {
        builder.index_base_name("synthetic_cdr")
    } else {
        builder
    };
    builder.build().unwrap()
}

/// A standard SNOMED condition item.
pub fn condition_item(concept_id: i64) -> SearchGroupItem {
    SearchGroupItem::new(ItemType::Condition).with_parameter(SearchParameter::concept(
        CriteriaType::Snomed,
        DomainType::Condition,
        concept_id,
        true,
    ))
}

/// A standard RxNorm drug item.
pub fn drug_item(concept_id: i64) -> SearchGroupItem {
    SearchGroupItem::new(ItemType::Drug).with_parameter(SearchParameter::concept(
        CriteriaType::RxNorm,
        DomainType::Drug,
        concept_id,
        true,
    ))
}

/// A measurement item with a numeric value range.
pub fn numeric_measurement_item(concept_id: i64) -> SearchGroupItem {
    SearchGroupItem::new(ItemType::Measurement).with_parameter(
        SearchParameter::concept(CriteriaType::Loinc, DomainType::Measurement, concept_id, true)
            .with_attribute(Attribute::new(AttrName::Num, Operator::GreaterThan, ["7.0"])),
    )
}

/// A demographic item on current age.
pub fn current_age_item(operator: Operator, operands: &[&str]) -> SearchGroupItem {
    SearchGroupItem::new(ItemType::Person).with_parameter(
        SearchParameter::demographic(CriteriaType::Age, None).with_attribute(Attribute::new(
            AttrName::Age,
            operator,
            operands.iter().copied(),
        )),
    )
}

/// A demographic item for the deceased flag.
pub fn deceased_item() -> SearchGroupItem {
    SearchGroupItem::new(ItemType::Person)
        .with_parameter(SearchParameter::demographic(CriteriaType::Deceased, None))
}

/// A single include group holding one item.
pub fn single_group(id: &str, item: SearchGroupItem) -> SearchGroup {
    SearchGroup::new(id).with_item(item)
}

/// The unresolved ICD9-CM `001` rollup.
pub fn icd9_rollup_item() -> SearchGroupItem {
    SearchGroupItem::new(ItemType::Icd9).with_parameter(SearchParameter::rollup(
        CriteriaType::Icd9,
        Some(CriteriaSubType::Cm),
        "001",
    ))
}

/// One include group with the unresolved ICD9-CM `001` rollup.
pub fn icd9_rollup_request() -> SearchRequest {
    SearchRequest::new().include(single_group("icd9", icd9_rollup_item()))
}

/// Drug events within 30 days of condition events.
pub fn drug_within_30_days_of_condition() -> SearchRequest {
    SearchRequest::new().include(
        SearchGroup::new("temporal")
            .with_item(drug_item(1_124_300).in_role(TemporalRole::Anchor))
            .with_item(condition_item(201_826).in_role(TemporalRole::Target))
            .temporal(
                TemporalMention::AnyMention,
                TemporalTime::WithinXDaysOf,
                Some(30),
            ),
    )
}

/// A code index knowing a handful of rollup codes.
pub fn code_index() -> StaticCodeDomainIndex {
    let mut index = StaticCodeDomainIndex::new();
    index.insert(
        CodeKey::new(CriteriaType::Icd9, Some(CriteriaSubType::Cm), "001"),
        vec![DomainType::Condition],
    );
    index.insert(
        CodeKey::new(CriteriaType::Icd10, Some(CriteriaSubType::Cm), "E11"),
        vec![
            DomainType::Condition,
            DomainType::Observation,
            DomainType::Procedure,
        ],
    );
    index
}
