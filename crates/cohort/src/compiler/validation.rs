//! Request validation and operand parsing.
//!
//! The parsers here are shared by [`validate_request`], which checks a whole
//! request up front, and by the compiler, which needs the parsed values.
//!
//! | Construct | Operands |
//! |-----------|----------|
//! | `BETWEEN` | exactly 2 |
//! | `IN` | 1 or more |
//! | any other operator | exactly 1 |
//! | `EVENT_DATE` modifier | `YYYY-MM-DD` dates |
//! | `ENCOUNTERS` modifier, `CAT` attribute | concept ids, `IN`/`EQUAL` only |
//! | everything else | numbers, no `LIKE` |

use std::collections::HashSet;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::plan::{Comparison, HierarchyRoot};
use crate::error::ValidationError;
use crate::types::{
    AttrName, Attribute, CriteriaSubType, CriteriaType, Modifier, ModifierType, Operator,
    SearchGroup, SearchGroupItem, SearchParameter, SearchRequest,
};

/// Checks every group, item, parameter, attribute and modifier of a request.
///
/// Structural problems with temporal groups are reported by the compiler,
/// which owns that invariant.
pub fn validate_request(request: &SearchRequest) -> Result<(), ValidationError> {
    for group in request.includes.iter().chain(request.excludes.iter()) {
        validate_group(group)?;
    }
    Ok(())
}

fn validate_group(group: &SearchGroup) -> Result<(), ValidationError> {
    if group.items.is_empty() {
        return Err(ValidationError::EmptyGroup {
            group: group.label().to_string(),
        });
    }
    for item in &group.items {
        validate_item(item)?;
    }
    Ok(())
}

fn validate_item(item: &SearchGroupItem) -> Result<(), ValidationError> {
    if item.search_parameters.is_empty() {
        return Err(ValidationError::EmptyItem { item: item.label() });
    }

    let mut seen = HashSet::new();
    for modifier in &item.modifiers {
        if !seen.insert(modifier.name) {
            return Err(ValidationError::DuplicateModifier {
                modifier: modifier.name,
                item: item.label(),
            });
        }
        validate_modifier(modifier)?;
    }

    let demographic = item
        .search_parameters
        .iter()
        .any(|p| p.criteria_type.is_demographic());
    if let (true, Some(modifier)) = (demographic, item.modifiers.first()) {
        return Err(ValidationError::ModifierNotAllowed {
            modifier: modifier.name,
        });
    }

    for param in &item.search_parameters {
        validate_parameter(param)?;
    }
    Ok(())
}

fn validate_parameter(param: &SearchParameter) -> Result<(), ValidationError> {
    match param.criteria_type {
        CriteriaType::Gender | CriteriaType::Sex | CriteriaType::Race | CriteriaType::Ethnicity => {
            require_concept_id(param)?;
        }
        CriteriaType::Age => {
            age_attribute(param)?;
        }
        CriteriaType::Deceased => {}
        _ if param.group || param.ancestor_data => {
            hierarchy_root(param)?;
        }
        _ if param.subtype == Some(CriteriaSubType::Bp) => {
            blood_pressure_concepts(param)?;
        }
        _ => {
            require_concept_id(param)?;
        }
    }
    for attribute in &param.attributes {
        attribute_predicate(param, attribute)?;
    }
    Ok(())
}

/// Returns the concept id or reports it missing.
pub(crate) fn require_concept_id(param: &SearchParameter) -> Result<i64, ValidationError> {
    param
        .concept_id
        .ok_or_else(|| ValidationError::MissingConceptId {
            parameter: param.label(),
            criteria_type: param.criteria_type,
        })
}

/// Returns the trimmed rollup code or reports it missing.
fn require_code(param: &SearchParameter) -> Result<String, ValidationError> {
    param
        .value
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ValidationError::MissingCode {
            parameter: param.label(),
            criteria_type: param.criteria_type,
        })
}

/// The criteria tree node a rollup or ancestor parameter starts from.
///
/// The concept id wins; a code is accepted for rollups sent without one.
pub(crate) fn hierarchy_root(param: &SearchParameter) -> Result<HierarchyRoot, ValidationError> {
    if let Some(concept_id) = param.concept_id {
        return Ok(HierarchyRoot::Concept(concept_id));
    }
    if !param.group {
        return require_concept_id(param).map(HierarchyRoot::Concept);
    }
    require_code(param).map(HierarchyRoot::Code)
}

/// Finds the age attribute of an AGE parameter.
pub(crate) fn age_attribute(
    param: &SearchParameter,
) -> Result<(AttrName, Comparison<Decimal>), ValidationError> {
    let context = format!("{} parameter", param.criteria_type);
    let attribute = param
        .attributes
        .iter()
        .find(|a| matches!(a.name, AttrName::Age | AttrName::AgeAtConsent | AttrName::AgeAtCdr))
        .ok_or_else(|| ValidationError::EmptyOperands {
            context: context.clone(),
        })?;
    let range = numeric_comparison(&context, attribute.operator, &attribute.operands)?;
    Ok((attribute.name, range))
}

/// The concept ids of a blood pressure parameter, taken from its attributes.
pub(crate) fn blood_pressure_concepts(param: &SearchParameter) -> Result<Vec<i64>, ValidationError> {
    let ids: Vec<i64> = param.attributes.iter().filter_map(|a| a.concept_id).collect();
    if ids.is_empty() {
        return Err(ValidationError::MissingConceptId {
            parameter: param.label(),
            criteria_type: param.criteria_type,
        });
    }
    Ok(ids)
}

/// Parsed form of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParsedAttribute {
    /// `ANY`: no constraint.
    Unconstrained,
    Numeric(Comparison<Decimal>),
    Categorical(Vec<i64>),
}

/// Parses one attribute of a parameter.
pub(crate) fn attribute_predicate(
    param: &SearchParameter,
    attribute: &Attribute,
) -> Result<ParsedAttribute, ValidationError> {
    let context = format!("{} attribute of '{}'", attribute.name, param.label());
    match attribute.name {
        AttrName::Any => Ok(ParsedAttribute::Unconstrained),
        AttrName::Cat => Ok(ParsedAttribute::Categorical(concept_operands(
            &context,
            attribute.operator,
            &attribute.operands,
        )?)),
        AttrName::Num | AttrName::Age | AttrName::AgeAtConsent | AttrName::AgeAtCdr => {
            Ok(ParsedAttribute::Numeric(numeric_comparison(
                &context,
                attribute.operator,
                &attribute.operands,
            )?))
        }
    }
}

/// Checks a single modifier.
pub(crate) fn validate_modifier(modifier: &Modifier) -> Result<(), ValidationError> {
    let context = format!("{} modifier", modifier.name);
    match modifier.name {
        ModifierType::AgeAtEvent => {
            numeric_comparison(&context, modifier.operator, &modifier.operands).map(|_| ())
        }
        ModifierType::EventDate => {
            date_comparison(&context, modifier.operator, &modifier.operands).map(|_| ())
        }
        ModifierType::Encounters => {
            concept_operands(&context, modifier.operator, &modifier.operands).map(|_| ())
        }
        ModifierType::NumOfOccurrences => {
            integer_comparison(&context, modifier.operator, &modifier.operands).map(|_| ())
        }
    }
}

fn checked_operator(
    context: &str,
    operator: Option<Operator>,
    operands: &[String],
) -> Result<Operator, ValidationError> {
    let operator = operator.ok_or_else(|| ValidationError::MissingOperator {
        context: context.to_string(),
    })?;
    if operands.is_empty() {
        return Err(ValidationError::EmptyOperands {
            context: context.to_string(),
        });
    }
    if let Some(expected) = operator.operand_count() {
        if operands.len() != expected {
            return Err(ValidationError::OperandCount {
                context: context.to_string(),
                operator,
                expected,
                actual: operands.len(),
            });
        }
    }
    Ok(operator)
}

fn parse_operands<T>(
    context: &str,
    operator: Option<Operator>,
    operands: &[String],
    parse: impl Fn(&str) -> Option<T>,
    invalid: impl Fn(String, String) -> ValidationError,
) -> Result<Comparison<T>, ValidationError> {
    let operator = checked_operator(context, operator, operands)?;
    if operator == Operator::Like {
        return Err(ValidationError::UnsupportedOperator {
            context: context.to_string(),
            operator,
        });
    }
    let values = operands
        .iter()
        .map(|raw| parse(raw.trim()).ok_or_else(|| invalid(context.to_string(), raw.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Comparison::new(operator, values))
}

/// Parses numeric operands.
pub(crate) fn numeric_comparison(
    context: &str,
    operator: Option<Operator>,
    operands: &[String],
) -> Result<Comparison<Decimal>, ValidationError> {
    parse_operands(
        context,
        operator,
        operands,
        |raw| Decimal::from_str(raw).ok(),
        |context, operand| ValidationError::NonNumericOperand { context, operand },
    )
}

/// Parses whole-number operands.
pub(crate) fn integer_comparison(
    context: &str,
    operator: Option<Operator>,
    operands: &[String],
) -> Result<Comparison<i64>, ValidationError> {
    parse_operands(
        context,
        operator,
        operands,
        |raw| raw.parse::<i64>().ok(),
        |context, operand| ValidationError::NonNumericOperand { context, operand },
    )
}

/// Parses date operands.
pub(crate) fn date_comparison(
    context: &str,
    operator: Option<Operator>,
    operands: &[String],
) -> Result<Comparison<NaiveDate>, ValidationError> {
    parse_operands(
        context,
        operator,
        operands,
        |raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok(),
        |context, operand| ValidationError::InvalidDate { context, operand },
    )
}

/// Parses a concept id list; only membership operators make sense here.
pub(crate) fn concept_operands(
    context: &str,
    operator: Option<Operator>,
    operands: &[String],
) -> Result<Vec<i64>, ValidationError> {
    let comparison = integer_comparison(context, operator, operands)?;
    match comparison.operator {
        Operator::In | Operator::Equal => Ok(comparison.operands),
        operator => Err(ValidationError::UnsupportedOperator {
            context: context.to_string(),
            operator,
        }),
    }
}
