//! The backend-neutral compiled form of a criteria tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::analyzer::PlanFeature;
use crate::types::{CriteriaType, DomainType, Operator, TemporalMention};

/// A compiled cohort definition.
///
/// The subject set is `union(includes) AND NOT union(excludes)`. An empty
/// `includes` list matches nobody, whatever the excludes hold.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Include groups, any of which admits a subject.
    pub includes: Vec<GroupPlan>,
    /// Exclude groups, any of which removes a subject.
    pub excludes: Vec<GroupPlan>,
    /// Constructs present in the plan.
    pub features: BTreeSet<PlanFeature>,
    /// True if the approximate search index cannot answer this plan.
    pub exact_only: bool,
}

impl QueryPlan {
    /// Returns true if the plan matches no subject by construction.
    pub fn matches_nothing(&self) -> bool {
        self.includes.is_empty()
    }

    /// Iterates over every group, includes first.
    pub fn groups(&self) -> impl Iterator<Item = &GroupPlan> {
        self.includes.iter().chain(self.excludes.iter())
    }

    /// Iterates over every parameter predicate in the plan.
    pub fn predicates(&self) -> impl Iterator<Item = &ParameterPredicate> {
        self.groups()
            .flat_map(|g| g.items())
            .flat_map(|i| i.predicates.iter())
    }

    /// The domains referenced by the plan.
    pub fn domains(&self) -> BTreeSet<DomainType> {
        self.predicates().map(ParameterPredicate::domain).collect()
    }

    /// The predicate fragments of the plan, per referenced domain.
    pub fn predicates_by_domain(&self) -> BTreeMap<DomainType, Vec<&ParameterPredicate>> {
        let mut by_domain: BTreeMap<DomainType, Vec<&ParameterPredicate>> = BTreeMap::new();
        for predicate in self.predicates() {
            by_domain.entry(predicate.domain()).or_default().push(predicate);
        }
        by_domain
    }

    /// The distinct criteria tree expansions the plan needs.
    pub fn hierarchy_lookups(&self) -> BTreeSet<&HierarchyLookup> {
        self.predicates()
            .filter_map(|p| match p {
                ParameterPredicate::Hierarchy(lookup) => Some(lookup),
                _ => None,
            })
            .collect()
    }

    /// Returns true if the plan contains the given feature.
    pub fn has_feature(&self, feature: PlanFeature) -> bool {
        self.features.contains(&feature)
    }
}

/// A compiled search group.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupPlan {
    /// Subjects matching any item.
    Union {
        /// Group id from the request.
        id: Option<String>,
        /// The item predicates, OR'd.
        items: Vec<ItemPlan>,
    },
    /// Subjects with anchor and target events in a time relationship.
    Temporal(TemporalPlan),
}

impl GroupPlan {
    /// Iterates over every item of the group.
    pub fn items(&self) -> Box<dyn Iterator<Item = &ItemPlan> + '_> {
        match self {
            GroupPlan::Union { items, .. } => Box::new(items.iter()),
            GroupPlan::Temporal(t) => Box::new(t.anchor.iter().chain(t.target.iter())),
        }
    }

    /// The group id from the request.
    pub fn id(&self) -> Option<&str> {
        match self {
            GroupPlan::Union { id, .. } => id.as_deref(),
            GroupPlan::Temporal(t) => t.id.as_deref(),
        }
    }
}

/// A same-subject correlated constraint between two event sets.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalPlan {
    /// Group id from the request.
    pub id: Option<String>,
    /// Items whose events are positioned (`temporalGroup` 0).
    pub anchor: Vec<ItemPlan>,
    /// Items the anchor events are positioned against (`temporalGroup` 1).
    pub target: Vec<ItemPlan>,
    /// Which events per subject are considered, on both sides.
    pub mention: TemporalMention,
    /// The time relationship.
    pub constraint: TemporalConstraint,
}

/// Time relationship of anchor event A to target event T.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalConstraint {
    /// A and T share a visit.
    SameEncounter,
    /// A is at least n days before T.
    DaysBefore(u32),
    /// A is at least n days after T.
    DaysAfter(u32),
    /// A is within n days of T either way.
    WithinDays(u32),
}

/// A compiled search group item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPlan {
    /// Item id from the request.
    pub id: Option<String>,
    /// Parameter predicates, OR'd.
    pub predicates: Vec<ParameterPredicate>,
    /// Event constraints, AND'd onto every event predicate.
    pub modifiers: ItemModifiers,
}

impl ItemPlan {
    /// Predicates answered from clinical events.
    pub fn event_predicates(&self) -> impl Iterator<Item = &ParameterPredicate> {
        self.predicates.iter().filter(|p| !p.is_demographic())
    }

    /// Predicates answered from the person table.
    pub fn demographic_predicates(&self) -> impl Iterator<Item = &DemographicPredicate> {
        self.predicates.iter().filter_map(|p| match p {
            ParameterPredicate::Demographic(d) => Some(d),
            _ => None,
        })
    }

    /// Event predicates grouped by domain, in domain order.
    pub fn event_predicates_by_domain(&self) -> BTreeMap<DomainType, Vec<&ParameterPredicate>> {
        let mut by_domain: BTreeMap<DomainType, Vec<&ParameterPredicate>> = BTreeMap::new();
        for predicate in self.event_predicates() {
            by_domain.entry(predicate.domain()).or_default().push(predicate);
        }
        by_domain
    }
}

/// Item-level modifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemModifiers {
    /// Age of the subject at the event.
    pub age_at_event: Option<Comparison<Decimal>>,
    /// Date of the event.
    pub event_date: Option<Comparison<NaiveDate>>,
    /// Visit types the event must belong to.
    pub encounters: Option<Vec<i64>>,
    /// Number of matching events per subject and concept.
    pub occurrences: Option<Comparison<i64>>,
}

impl ItemModifiers {
    /// Returns true if no modifier is set.
    pub fn is_empty(&self) -> bool {
        self.age_at_event.is_none()
            && self.event_date.is_none()
            && self.encounters.is_none()
            && self.occurrences.is_none()
    }
}

/// An operator with its parsed operands.
///
/// Operand counts have been checked: BETWEEN has two, IN at least one and
/// every other operator exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison<T> {
    /// The operator.
    pub operator: Operator,
    /// The operands.
    pub operands: Vec<T>,
}

impl<T> Comparison<T> {
    /// Creates a comparison.
    pub fn new(operator: Operator, operands: Vec<T>) -> Self {
        Self { operator, operands }
    }
}

/// The predicate one parameter (or a merged run of parameters) contributes.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterPredicate {
    /// Events whose concept is one of the given ids.
    Concepts {
        domain: DomainType,
        standard: bool,
        concept_ids: Vec<i64>,
    },
    /// Events whose concept sits at or below a criteria tree node.
    Hierarchy(HierarchyLookup),
    /// Events of one concept whose recorded value satisfies every constraint.
    Valued {
        domain: DomainType,
        standard: bool,
        concept_id: i64,
        values: Vec<ValuePredicate>,
    },
    /// Blood pressure readings with systolic and/or diastolic bounds.
    BloodPressure {
        domain: DomainType,
        standard: bool,
        concept_ids: Vec<i64>,
        systolic: Option<Comparison<Decimal>>,
        diastolic: Option<Comparison<Decimal>>,
    },
    /// A person-level predicate.
    Demographic(DemographicPredicate),
}

impl ParameterPredicate {
    /// The domain this predicate reads.
    pub fn domain(&self) -> DomainType {
        match self {
            ParameterPredicate::Concepts { domain, .. }
            | ParameterPredicate::Valued { domain, .. }
            | ParameterPredicate::BloodPressure { domain, .. } => *domain,
            ParameterPredicate::Hierarchy(lookup) => lookup.domain,
            ParameterPredicate::Demographic(_) => DomainType::Person,
        }
    }

    /// Returns true for person-level predicates.
    pub fn is_demographic(&self) -> bool {
        matches!(self, ParameterPredicate::Demographic(_))
    }
}

/// The criteria tree node a hierarchy lookup starts from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HierarchyRoot {
    /// Node carrying this concept id.
    Concept(i64),
    /// Node carrying this code, for rollups sent without a concept id.
    Code(String),
}

impl fmt::Display for HierarchyRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyRoot::Concept(id) => write!(f, "concept {id}"),
            HierarchyRoot::Code(code) => write!(f, "code {code}"),
        }
    }
}

/// A criteria tree expansion.
///
/// Selects every selectable node of the domain whose `path` runs through
/// the root node. With `ancestors` set the result is further expanded to
/// every descendant concept of the concept ancestor table, which is how
/// drug ingredients reach their brands and clinical drugs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HierarchyLookup {
    pub domain: DomainType,
    pub criteria_type: CriteriaType,
    pub standard: bool,
    pub root: HierarchyRoot,
    /// True if the root is a parent node rather than a selectable leaf.
    pub group: bool,
    pub ancestors: bool,
}

/// A constraint on the value recorded with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuePredicate {
    /// Numeric value range.
    Numeric(Comparison<Decimal>),
    /// Coded answer.
    Categorical(Vec<i64>),
}

/// Which age a demographic age range applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgeMeasure {
    /// Age today, living subjects only.
    Current,
    /// Age when the subject consented.
    AtConsent,
    /// Age at the data release cutoff.
    AtCdr,
}

/// A person-level predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum DemographicPredicate {
    Gender(Vec<i64>),
    Sex(Vec<i64>),
    Race(Vec<i64>),
    Ethnicity(Vec<i64>),
    Age {
        measure: AgeMeasure,
        range: Comparison<Decimal>,
    },
    Deceased,
}
