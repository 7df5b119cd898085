//! Per-domain extraction queries over a cohort's subjects.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tables::DomainToBaseTable;
use crate::dataset::DatasetContext;
use crate::error::{CohortResult, ExtractionError, ValidationError};
use crate::types::{DomainType, SearchRequest};
use crate::warehouse::SqlFragment;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// One output column of one domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainValuePair {
    /// Domain whose table the column is read from.
    pub domain: DomainType,
    /// Column name.
    pub value: String,
}

impl DomainValuePair {
    /// Creates a pair.
    pub fn new(domain: DomainType, value: impl Into<String>) -> Self {
        Self {
            domain,
            value: value.into(),
        }
    }
}

/// A named dataset: cohorts to draw subjects from and the columns to extract.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    /// Dataset name.
    pub name: String,
    /// Cohort definitions whose subjects are extracted.
    #[serde(default)]
    pub cohorts: Vec<SearchRequest>,
    /// Extract every subject instead of the cohorts' union.
    #[serde(default)]
    pub includes_all_participants: bool,
    /// Columns to extract.
    #[serde(default)]
    pub domain_values: Vec<DomainValuePair>,
}

impl ExtractionRequest {
    /// Checks that the request names a dataset, has subjects and columns.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidDatasetRequest(
                "dataset name is required".to_string(),
            ));
        }
        if self.cohorts.is_empty() && !self.includes_all_participants {
            return Err(ValidationError::InvalidDatasetRequest(
                "at least one cohort is required unless all participants are included".to_string(),
            ));
        }
        if self.domain_values.is_empty() {
            return Err(ValidationError::InvalidDatasetRequest(
                "at least one domain value is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builds projection queries restricted to a cohort's subjects.
#[derive(Clone)]
pub struct DatasetQueryBuilder {
    tables: Arc<dyn DomainToBaseTable>,
}

impl DatasetQueryBuilder {
    /// Creates a builder over a domain-to-table mapping.
    pub fn new(tables: Arc<dyn DomainToBaseTable>) -> Self {
        Self { tables }
    }

    /// Builds one query per requested domain.
    ///
    /// `subject_queries` each select `person_id`; rows match if their
    /// subject is in any of them. An empty slice means every subject.
    /// Domains are only present in the output if a column was requested.
    pub fn build_extraction_queries(
        &self,
        ctx: &DatasetContext,
        subject_queries: &[SqlFragment],
        values: &[DomainValuePair],
    ) -> CohortResult<BTreeMap<DomainType, SqlFragment>> {
        let mut columns: BTreeMap<DomainType, Vec<&str>> = BTreeMap::new();
        for pair in values {
            if !IDENTIFIER.is_match(&pair.value) {
                return Err(ValidationError::InvalidIdentifier(pair.value.clone()).into());
            }
            let domain_columns = columns.entry(pair.domain).or_default();
            if !domain_columns.contains(&pair.value.as_str()) {
                domain_columns.push(&pair.value);
            }
        }
        if columns.is_empty() {
            return Err(ExtractionError::NoValueColumns.into());
        }

        let mut queries = BTreeMap::new();
        for (domain, domain_columns) in columns {
            let table = self.tables.base_table(domain)?;
            let projection = domain_columns
                .iter()
                .map(|c| format!("t.{c}"))
                .collect::<Vec<_>>()
                .join(", ");
            let select = format!("SELECT {projection}\nFROM {} t", ctx.table(&table.table));

            let query = match cohort_filter(&table.join_column, subject_queries) {
                Some(filter) => filter.map_sql(|f| format!("{select}\nWHERE {f}")),
                None => SqlFragment::new(select),
            };
            debug!(domain = %domain, columns = domain_columns.len(), "Built extraction query");
            queries.insert(domain, query);
        }
        Ok(queries)
    }
}

/// `t.<join> IN (q1) OR t.<join> IN (q2) ...`, renumbering parameters.
fn cohort_filter(join_column: &str, subject_queries: &[SqlFragment]) -> Option<SqlFragment> {
    subject_queries
        .iter()
        .cloned()
        .map(|q| q.map_sql(|sql| format!("t.{join_column} IN ({sql})")))
        .reduce(|acc, next| acc.combine(next, |l, r| format!("{l}\nOR {r}")))
}
