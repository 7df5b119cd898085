//! Plan feature detection and backend capabilities.
//!
//! Every construct the compiler can emit maps to a [`PlanFeature`]. Two
//! questions are asked of each feature:
//!
//! - [`PlanFeature::forces_exact`]: the construct needs the warehouse no
//!   matter what, which makes the plan `exact_only`.
//! - [`PlanFeature::index_supported`]: the search index renders it with the
//!   same subject set as the warehouse. A plan that is not `exact_only` can
//!   still hold features the index does not render; the router sends those
//!   to the warehouse as well.
//!
//! | Feature | Exact only | Index | Notes |
//! |---------|------------|-------|-------|
//! | ConceptMatch | no | yes | `terms` on event concepts |
//! | HierarchyExpansion | no | yes | concepts looked up from the criteria tree |
//! | CategoricalValue | no | yes | `terms` on coded answers |
//! | NumericValue | yes | no | value ranges are not mirrored faithfully |
//! | BloodPressure | yes | no | systolic/diastolic pairs |
//! | DemographicConcept | no | yes | gender, sex, race, ethnicity |
//! | DemographicAge | no | yes | birth date ranges, living subjects |
//! | Deceased | yes | no | death state lags in the index |
//! | AgeAtEventModifier | no | yes | |
//! | EventDateModifier | no | yes | |
//! | EncounterModifier | no | yes | |
//! | OccurrenceCount | no | no | counts distinct event dates per concept |
//! | TemporalJoin | yes | no | correlated self-join |
//! | Exclusion | no | yes | `must_not` |
//! | NoIncludes | no | yes | matches nothing |
//!
//! The matches have no wildcard arm, so a new feature does not compile
//! until it has been classified.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::plan::{
    DemographicPredicate, GroupPlan, ItemPlan, ParameterPredicate, QueryPlan, ValuePredicate,
};

/// A construct present in a compiled plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFeature {
    /// Event concept id membership.
    ConceptMatch,
    /// Concepts looked up from the criteria tree or the ancestor table.
    HierarchyExpansion,
    /// Coded answer membership.
    CategoricalValue,
    /// Numeric value range on an event.
    NumericValue,
    /// Systolic/diastolic range.
    BloodPressure,
    /// Gender, sex, race or ethnicity membership.
    DemographicConcept,
    /// Age range.
    DemographicAge,
    /// Subject has died.
    Deceased,
    /// Age at event modifier.
    AgeAtEventModifier,
    /// Event date modifier.
    EventDateModifier,
    /// Visit type modifier.
    EncounterModifier,
    /// Number of occurrences modifier.
    OccurrenceCount,
    /// Same-subject time relationship between two event sets.
    TemporalJoin,
    /// At least one exclude group.
    Exclusion,
    /// No include groups.
    NoIncludes,
}

impl PlanFeature {
    /// Returns true if the feature alone makes a plan `exact_only`.
    pub fn forces_exact(&self) -> bool {
        match self {
            PlanFeature::NumericValue
            | PlanFeature::BloodPressure
            | PlanFeature::Deceased
            | PlanFeature::TemporalJoin => true,
            PlanFeature::ConceptMatch
            | PlanFeature::HierarchyExpansion
            | PlanFeature::CategoricalValue
            | PlanFeature::DemographicConcept
            | PlanFeature::DemographicAge
            | PlanFeature::AgeAtEventModifier
            | PlanFeature::EventDateModifier
            | PlanFeature::EncounterModifier
            | PlanFeature::OccurrenceCount
            | PlanFeature::Exclusion
            | PlanFeature::NoIncludes => false,
        }
    }

    /// Returns true if the search index answers this feature exactly.
    pub fn index_supported(&self) -> bool {
        match self {
            PlanFeature::ConceptMatch
            | PlanFeature::HierarchyExpansion
            | PlanFeature::CategoricalValue
            | PlanFeature::DemographicConcept
            | PlanFeature::DemographicAge
            | PlanFeature::AgeAtEventModifier
            | PlanFeature::EventDateModifier
            | PlanFeature::EncounterModifier
            | PlanFeature::Exclusion
            | PlanFeature::NoIncludes => true,
            // Nested hits cannot be counted per distinct date and concept.
            PlanFeature::OccurrenceCount => false,
            PlanFeature::NumericValue
            | PlanFeature::BloodPressure
            | PlanFeature::Deceased
            | PlanFeature::TemporalJoin => false,
        }
    }
}

/// Collects the features of a plan's groups.
pub fn detect_plan_features(includes: &[GroupPlan], excludes: &[GroupPlan]) -> BTreeSet<PlanFeature> {
    let mut features = BTreeSet::new();
    if includes.is_empty() {
        features.insert(PlanFeature::NoIncludes);
    }
    if !excludes.is_empty() {
        features.insert(PlanFeature::Exclusion);
    }
    for group in includes.iter().chain(excludes.iter()) {
        if let GroupPlan::Temporal(_) = group {
            features.insert(PlanFeature::TemporalJoin);
        }
        for item in group.items() {
            item_features(item, &mut features);
        }
    }
    features
}

/// Returns true if any feature forces exact execution.
pub fn requires_exact(features: &BTreeSet<PlanFeature>) -> bool {
    features.iter().any(PlanFeature::forces_exact)
}

/// Features of a plan that make it `exact_only`.
pub fn blocking_features(plan: &QueryPlan) -> Vec<PlanFeature> {
    plan.features
        .iter()
        .copied()
        .filter(PlanFeature::forces_exact)
        .collect()
}

/// Features of a plan the search index does not render.
pub fn index_unsupported_features(plan: &QueryPlan) -> Vec<PlanFeature> {
    plan.features
        .iter()
        .copied()
        .filter(|f| !f.index_supported())
        .collect()
}

fn item_features(item: &ItemPlan, features: &mut BTreeSet<PlanFeature>) {
    for predicate in &item.predicates {
        match predicate {
            ParameterPredicate::Concepts { .. } => {
                features.insert(PlanFeature::ConceptMatch);
            }
            ParameterPredicate::Hierarchy(_) => {
                features.insert(PlanFeature::HierarchyExpansion);
            }
            ParameterPredicate::Valued { values, .. } => {
                features.insert(PlanFeature::ConceptMatch);
                for value in values {
                    features.insert(match value {
                        ValuePredicate::Numeric(_) => PlanFeature::NumericValue,
                        ValuePredicate::Categorical(_) => PlanFeature::CategoricalValue,
                    });
                }
            }
            ParameterPredicate::BloodPressure { .. } => {
                features.insert(PlanFeature::BloodPressure);
            }
            ParameterPredicate::Demographic(demographic) => {
                features.insert(match demographic {
                    DemographicPredicate::Gender(_)
                    | DemographicPredicate::Sex(_)
                    | DemographicPredicate::Race(_)
                    | DemographicPredicate::Ethnicity(_) => PlanFeature::DemographicConcept,
                    DemographicPredicate::Age { .. } => PlanFeature::DemographicAge,
                    DemographicPredicate::Deceased => PlanFeature::Deceased,
                });
            }
        }
    }

    let modifiers = &item.modifiers;
    if modifiers.age_at_event.is_some() {
        features.insert(PlanFeature::AgeAtEventModifier);
    }
    if modifiers.event_date.is_some() {
        features.insert(PlanFeature::EventDateModifier);
    }
    if modifiers.encounters.is_some() {
        features.insert(PlanFeature::EncounterModifier);
    }
    if modifiers.occurrences.is_some() {
        features.insert(PlanFeature::OccurrenceCount);
    }
}
