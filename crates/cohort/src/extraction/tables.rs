//! Mapping from clinical domains to the warehouse tables rows are extracted from.

use serde::{Deserialize, Serialize};

use crate::error::{CohortResult, ExtractionError};
use crate::types::DomainType;

/// A domain's base table and the column that links its rows to a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTable {
    /// Unqualified table name.
    pub table: String,
    /// Column holding the subject id.
    pub join_column: String,
}

impl DomainTable {
    /// Creates a mapping entry.
    pub fn new(table: impl Into<String>, join_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            join_column: join_column.into(),
        }
    }
}

/// Looks up the base table of a domain.
pub trait DomainToBaseTable: Send + Sync {
    /// Returns the table for the domain, or
    /// [`ExtractionError::UnknownDomain`] if none is registered.
    fn base_table(&self, domain: DomainType) -> CohortResult<DomainTable>;
}

/// The standard OMOP tables, all joined on `person_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDomainTables;

impl DomainToBaseTable for StandardDomainTables {
    fn base_table(&self, domain: DomainType) -> CohortResult<DomainTable> {
        let table = match domain {
            DomainType::Condition => "condition_occurrence",
            DomainType::Procedure => "procedure_occurrence",
            DomainType::Observation => "observation",
            DomainType::Measurement => "measurement",
            DomainType::Drug => "drug_exposure",
            DomainType::Device => "device_exposure",
            DomainType::Visit => "visit_occurrence",
            DomainType::Person => "person",
            DomainType::Survey => "ds_survey",
            DomainType::Death
            | DomainType::Lab
            | DomainType::PhysicalMeasurement => {
                return Err(ExtractionError::UnknownDomain(domain).into());
            }
        };
        Ok(DomainTable::new(table, "person_id"))
    }
}
