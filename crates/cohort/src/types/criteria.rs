//! Closed enums for the criteria model.

wire_enum! {
    /// A clinical domain, each backed by its own base table.
    pub enum DomainType {
        Condition => "CONDITION",
        Death => "DEATH",
        Device => "DEVICE",
        Drug => "DRUG",
        Lab => "LAB",
        Measurement => "MEASUREMENT",
        Observation => "OBSERVATION",
        Person => "PERSON" | "DEMO",
        PhysicalMeasurement => "PHYSICAL_MEASUREMENT" | "PM",
        Procedure => "PROCEDURE",
        Survey => "SURVEY" | "PPI",
        Visit => "VISIT",
    }
}

impl DomainType {
    /// Returns true for the domain answered from the person table.
    pub fn is_demographic(&self) -> bool {
        matches!(self, DomainType::Person)
    }
}

wire_enum! {
    /// The event category of a search group item.
    ///
    /// Besides the domains this includes the code-system trees a user can
    /// browse, whose codes may live in more than one domain.
    pub enum ItemType {
        Condition => "CONDITION",
        Death => "DEATH",
        Device => "DEVICE",
        Drug => "DRUG",
        Lab => "LAB",
        Measurement => "MEASUREMENT" | "MEAS",
        Observation => "OBSERVATION",
        Person => "PERSON" | "DEMO",
        PhysicalMeasurement => "PHYSICAL_MEASUREMENT" | "PM",
        Procedure => "PROCEDURE",
        Survey => "SURVEY" | "PPI",
        Visit => "VISIT",
        Icd9 => "ICD9",
        Icd10 => "ICD10",
        Cpt => "CPT",
        Snomed => "SNOMED",
    }
}

impl ItemType {
    /// The domain a parameter of this item belongs to when it carries none.
    ///
    /// Code-system trees span several domains and have no default.
    pub fn default_domain(&self) -> Option<DomainType> {
        match self {
            ItemType::Condition => Some(DomainType::Condition),
            ItemType::Death => Some(DomainType::Death),
            ItemType::Device => Some(DomainType::Device),
            ItemType::Drug => Some(DomainType::Drug),
            ItemType::Lab => Some(DomainType::Lab),
            ItemType::Measurement => Some(DomainType::Measurement),
            ItemType::Observation => Some(DomainType::Observation),
            ItemType::Person => Some(DomainType::Person),
            ItemType::PhysicalMeasurement => Some(DomainType::PhysicalMeasurement),
            ItemType::Procedure => Some(DomainType::Procedure),
            ItemType::Survey => Some(DomainType::Survey),
            ItemType::Visit => Some(DomainType::Visit),
            ItemType::Icd9 | ItemType::Icd10 | ItemType::Cpt | ItemType::Snomed => None,
        }
    }
}

wire_enum! {
    /// The code system or demographic category of a search parameter.
    pub enum CriteriaType {
        Icd9Cm => "ICD9CM",
        Icd9Proc => "ICD9PROC",
        Icd10Cm => "ICD10CM",
        Icd10Pcs => "ICD10PCS",
        Cpt4 => "CPT4",
        Snomed => "SNOMED",
        Atc => "ATC",
        RxNorm => "RXNORM",
        Loinc => "LOINC",
        Ppi => "PPI",
        Pm => "PM",
        Visit => "VISIT",
        Brand => "BRAND",
        Age => "AGE",
        Deceased => "DECEASED",
        Ethnicity => "ETHNICITY",
        Gender => "GENDER",
        Race => "RACE",
        Sex => "SEX",
        Icd9 => "ICD9",
        Icd10 => "ICD10",
        Condition => "CONDITION",
        Procedure => "PROCEDURE",
    }
}

impl CriteriaType {
    /// Returns true for the hierarchical code systems whose rollup codes
    /// need a domain lookup before compilation.
    pub fn is_rollup_system(&self) -> bool {
        match self {
            CriteriaType::Icd9
            | CriteriaType::Icd10
            | CriteriaType::Condition
            | CriteriaType::Procedure => true,
            CriteriaType::Icd9Cm
            | CriteriaType::Icd9Proc
            | CriteriaType::Icd10Cm
            | CriteriaType::Icd10Pcs
            | CriteriaType::Cpt4
            | CriteriaType::Snomed
            | CriteriaType::Atc
            | CriteriaType::RxNorm
            | CriteriaType::Loinc
            | CriteriaType::Ppi
            | CriteriaType::Pm
            | CriteriaType::Visit
            | CriteriaType::Brand
            | CriteriaType::Age
            | CriteriaType::Deceased
            | CriteriaType::Ethnicity
            | CriteriaType::Gender
            | CriteriaType::Race
            | CriteriaType::Sex => false,
        }
    }

    /// Returns true for the person-level categories.
    pub fn is_demographic(&self) -> bool {
        matches!(
            self,
            CriteriaType::Age
                | CriteriaType::Deceased
                | CriteriaType::Ethnicity
                | CriteriaType::Gender
                | CriteriaType::Race
                | CriteriaType::Sex
        )
    }
}

wire_enum! {
    /// Refines a criteria type; physical measurements and surveys use it most.
    pub enum CriteriaSubType {
        Cm => "CM",
        Pcs => "PCS",
        Proc => "PROC",
        Bp => "BP",
        Hr => "HR",
        HrDetail => "HR_DETAIL",
        HrIrr => "HR_IRR",
        HrNoIrr => "HR_NOIRR",
        Height => "HEIGHT",
        Weight => "WEIGHT",
        Bmi => "BMI",
        Wc => "WC",
        Hc => "HC",
        Preg => "PREG",
        Wheel => "WHEEL",
        Basics => "BASICS",
        Lifestyle => "LIFESTYLE",
        OverallHealth => "OVERALL_HEALTH",
    }
}

wire_enum! {
    /// A modifier applied to every event of a search group item.
    pub enum ModifierType {
        AgeAtEvent => "AGE_AT_EVENT",
        NumOfOccurrences => "NUM_OF_OCCURRENCES",
        EventDate => "EVENT_DATE",
        Encounters => "ENCOUNTERS",
    }
}

wire_enum! {
    /// Comparison operator for attributes and modifiers.
    pub enum Operator {
        Equal => "EQUAL",
        NotEqual => "NOT_EQUAL",
        LessThan => "LESS_THAN",
        GreaterThan => "GREATER_THAN",
        LessThanOrEqualTo => "LESS_THAN_OR_EQUAL_TO",
        GreaterThanOrEqualTo => "GREATER_THAN_OR_EQUAL_TO",
        Like => "LIKE",
        In => "IN",
        Between => "BETWEEN",
    }
}

impl Operator {
    /// Number of operands this operator takes, or `None` for any non-zero count.
    pub fn operand_count(&self) -> Option<usize> {
        match self {
            Operator::Between => Some(2),
            Operator::In => None,
            Operator::Equal
            | Operator::NotEqual
            | Operator::LessThan
            | Operator::GreaterThan
            | Operator::LessThanOrEqualTo
            | Operator::GreaterThanOrEqualTo
            | Operator::Like => Some(1),
        }
    }
}

wire_enum! {
    /// The value an attribute constrains.
    pub enum AttrName {
        Any => "ANY",
        Num => "NUM",
        Cat => "CAT",
        Age => "AGE",
        AgeAtConsent => "AGE_AT_CONSENT",
        AgeAtCdr => "AGE_AT_CDR",
    }
}

wire_enum! {
    /// Which occurrences of the anchor events a temporal group considers.
    pub enum TemporalMention {
        AnyMention => "ANY_MENTION" | "ANYMENTION",
        FirstMention => "FIRST_MENTION",
        LastMention => "LAST_MENTION",
    }
}

wire_enum! {
    /// The time relationship between anchor and target events.
    pub enum TemporalTime {
        DuringSameEncounterAs => "DURING_SAME_ENCOUNTER_AS",
        XDaysBefore => "X_DAYS_BEFORE",
        XDaysAfter => "X_DAYS_AFTER",
        WithinXDaysOf => "WITHIN_X_DAYS_OF",
    }
}

impl TemporalTime {
    /// Returns true if this relationship needs a day count.
    pub fn requires_time_value(&self) -> bool {
        !matches!(self, TemporalTime::DuringSameEncounterAs)
    }
}

wire_enum! {
    /// The person attribute that leads a demographic breakdown.
    pub enum Stratification {
        Gender => "GENDER",
        SexAtBirth => "SEX_AT_BIRTH",
    }
}
