//! The criteria tree: requests, groups, items and parameters.

use serde::{Deserialize, Serialize};

use super::criteria::{
    AttrName, CriteriaSubType, CriteriaType, DomainType, ItemType, ModifierType, Operator,
    TemporalMention, TemporalTime,
};

/// A cohort definition.
///
/// A subject matches when they match ANY include group and NO exclude group.
/// An empty `includes` list matches nobody.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Groups of which at least one must match.
    #[serde(default)]
    pub includes: Vec<SearchGroup>,
    /// Groups of which none may match.
    #[serde(default)]
    pub excludes: Vec<SearchGroup>,
}

impl SearchRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an include group.
    pub fn include(mut self, group: SearchGroup) -> Self {
        self.includes.push(group);
        self
    }

    /// Adds an exclude group.
    pub fn exclude(mut self, group: SearchGroup) -> Self {
        self.excludes.push(group);
        self
    }

    /// Iterates over every parameter in the tree.
    pub fn parameters(&self) -> impl Iterator<Item = &SearchParameter> {
        self.includes
            .iter()
            .chain(self.excludes.iter())
            .flat_map(|g| g.items.iter())
            .flat_map(|i| i.search_parameters.iter())
    }
}

/// An ordered list of items; a subject matching any item matches the group.
///
/// When `temporal` is set the items are split into anchor and target roles
/// by their `temporal_group`, and the group matches only subjects whose
/// anchor and target events satisfy `time`/`time_value`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub items: Vec<SearchGroupItem>,
    #[serde(default)]
    pub temporal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mention: Option<TemporalMention>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TemporalTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_value: Option<i64>,
}

impl SearchGroup {
    /// Creates an empty non-temporal group.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Adds an item.
    pub fn with_item(mut self, item: SearchGroupItem) -> Self {
        self.items.push(item);
        self
    }

    /// Marks the group temporal with the given relationship.
    pub fn temporal(
        mut self,
        mention: TemporalMention,
        time: TemporalTime,
        time_value: Option<i64>,
    ) -> Self {
        self.temporal = true;
        self.mention = Some(mention);
        self.time = Some(time);
        self.time_value = time_value;
        self
    }

    /// A label for messages.
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or("<unnamed>")
    }
}

/// The role of an item inside a temporal group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalRole {
    /// `temporalGroup: 0`. The events being qualified by the mention.
    Anchor,
    /// `temporalGroup: 1`. The events the anchor is positioned against.
    Target,
}

/// A single criterion: events matching any parameter and all modifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchGroupItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub search_parameters: Vec<SearchParameter>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_group: Option<u8>,
}

impl SearchGroupItem {
    /// Creates an item with no parameters.
    pub fn new(item_type: ItemType) -> Self {
        Self {
            id: None,
            item_type,
            search_parameters: Vec::new(),
            modifiers: Vec::new(),
            temporal_group: None,
        }
    }

    /// Sets the item id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds a parameter.
    pub fn with_parameter(mut self, parameter: SearchParameter) -> Self {
        self.search_parameters.push(parameter);
        self
    }

    /// Adds a modifier.
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Tags the item with a temporal role.
    pub fn in_role(mut self, role: TemporalRole) -> Self {
        self.temporal_group = Some(match role {
            TemporalRole::Anchor => 0,
            TemporalRole::Target => 1,
        });
        self
    }

    /// The temporal role, if the tag is one of the two known values.
    pub fn temporal_role(&self) -> Option<TemporalRole> {
        match self.temporal_group {
            Some(0) => Some(TemporalRole::Anchor),
            Some(1) => Some(TemporalRole::Target),
            _ => None,
        }
    }

    /// A label for messages.
    pub fn label(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.item_type.as_str().to_lowercase())
    }
}

/// One code, concept or demographic value of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParameter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Domain of the parameter. `None` on a rollup means "not yet resolved".
    #[serde(default, alias = "domainId", skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainType>,
    #[serde(rename = "type")]
    pub criteria_type: CriteriaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<CriteriaSubType>,
    /// True for a rollup code standing for all of its descendants.
    #[serde(default)]
    pub group: bool,
    #[serde(default)]
    pub ancestor_data: bool,
    #[serde(default)]
    pub standard: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_id: Option<i64>,
    /// The raw code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
}

impl SearchParameter {
    /// Creates a concept parameter in the given domain.
    pub fn concept(
        criteria_type: CriteriaType,
        domain: DomainType,
        concept_id: i64,
        standard: bool,
    ) -> Self {
        Self {
            parameter_id: None,
            name: None,
            domain: Some(domain),
            criteria_type,
            subtype: None,
            group: false,
            ancestor_data: false,
            standard,
            concept_id: Some(concept_id),
            value: None,
            attributes: Vec::new(),
        }
    }

    /// Creates an unresolved rollup parameter for a hierarchical code.
    pub fn rollup(
        criteria_type: CriteriaType,
        subtype: Option<CriteriaSubType>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            parameter_id: None,
            name: None,
            domain: None,
            criteria_type,
            subtype,
            group: true,
            ancestor_data: false,
            standard: false,
            concept_id: None,
            value: Some(code.into()),
            attributes: Vec::new(),
        }
    }

    /// Creates a demographic parameter.
    pub fn demographic(criteria_type: CriteriaType, concept_id: Option<i64>) -> Self {
        Self {
            parameter_id: None,
            name: None,
            domain: Some(DomainType::Person),
            criteria_type,
            subtype: None,
            group: false,
            ancestor_data: false,
            standard: true,
            concept_id,
            value: None,
            attributes: Vec::new(),
        }
    }

    /// Sets the subtype.
    pub fn with_subtype(mut self, subtype: CriteriaSubType) -> Self {
        self.subtype = Some(subtype);
        self
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Returns true if this is a rollup still waiting for its domain.
    pub fn is_unresolved(&self) -> bool {
        self.group && self.domain.is_none()
    }

    /// A label for messages.
    pub fn label(&self) -> String {
        if let Some(id) = self.parameter_id.as_ref().or(self.name.as_ref()) {
            return id.clone();
        }
        match (&self.value, self.concept_id) {
            (Some(code), _) => code.clone(),
            (None, Some(concept_id)) => concept_id.to_string(),
            (None, None) => self.criteria_type.as_str().to_lowercase(),
        }
    }
}

/// A value constraint on a parameter, such as a measurement range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: AttrName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default)]
    pub operands: Vec<String>,
    /// For blood pressure, selects systolic or diastolic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_id: Option<i64>,
}

impl Attribute {
    /// Creates an attribute.
    pub fn new<S: Into<String>>(
        name: AttrName,
        operator: Operator,
        operands: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name,
            operator: Some(operator),
            operands: operands.into_iter().map(Into::into).collect(),
            concept_id: None,
        }
    }

    /// Sets the concept id.
    pub fn with_concept_id(mut self, concept_id: i64) -> Self {
        self.concept_id = Some(concept_id);
        self
    }
}

/// An event-level constraint applied to every parameter of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modifier {
    pub name: ModifierType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default)]
    pub operands: Vec<String>,
}

impl Modifier {
    /// Creates a modifier.
    pub fn new<S: Into<String>>(
        name: ModifierType,
        operator: Operator,
        operands: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name,
            operator: Some(operator),
            operands: operands.into_iter().map(Into::into).collect(),
        }
    }
}
