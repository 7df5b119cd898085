//! The explicit dataset handle passed to every query.

use std::sync::LazyLock;

use regex::Regex;

use super::DatasetId;
use crate::error::ValidationError;

static PROJECT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,62}[a-z0-9]$").expect("valid regex"));

static INDEX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]{0,200}$").expect("valid regex"));

/// Identifies the data release a request runs against.
///
/// The warehouse tables are addressed as `` `project.dataset.table` `` and
/// the search index, when the release has one, as `<index_base_name>_person`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetContext {
    project: String,
    dataset: DatasetId,
    index_base_name: Option<String>,
    correlation_id: Option<String>,
}

impl DatasetContext {
    /// Creates a context for a warehouse dataset without a search index.
    pub fn new(project: impl Into<String>, dataset: DatasetId) -> Result<Self, ValidationError> {
        let project = project.into();
        if !PROJECT_PATTERN.is_match(&project) {
            return Err(ValidationError::InvalidIdentifier(project));
        }
        Ok(Self {
            project,
            dataset,
            index_base_name: None,
            correlation_id: None,
        })
    }

    /// Creates a builder.
    pub fn builder() -> DatasetContextBuilder {
        DatasetContextBuilder::new()
    }

    /// Sets the correlation ID used in logs.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Returns the warehouse project.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Returns the warehouse dataset.
    pub fn dataset(&self) -> &DatasetId {
        &self.dataset
    }

    /// Returns the search index base name, if the dataset is indexed.
    pub fn index_base_name(&self) -> Option<&str> {
        self.index_base_name.as_deref()
    }

    /// Returns the correlation ID.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Fully qualified, quoted reference to a warehouse table.
    pub fn table(&self, name: &str) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset, name)
    }

    /// Name of the per-person search index, if the dataset is indexed.
    pub fn person_index(&self) -> Option<String> {
        self.index_base_name
            .as_ref()
            .map(|base| format!("{}_person", base))
    }
}

/// Builder for [`DatasetContext`].
#[derive(Debug, Default)]
pub struct DatasetContextBuilder {
    project: Option<String>,
    dataset: Option<String>,
    index_base_name: Option<String>,
    correlation_id: Option<String>,
}

impl DatasetContextBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the warehouse project.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Sets the warehouse dataset.
    pub fn dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    /// Sets the search index base name.
    pub fn index_base_name(mut self, base: impl Into<String>) -> Self {
        self.index_base_name = Some(base.into());
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Builds the context, validating every identifier.
    pub fn build(self) -> Result<DatasetContext, ValidationError> {
        let project = self
            .project
            .ok_or_else(|| ValidationError::InvalidIdentifier("<missing project>".to_string()))?;
        let dataset = self
            .dataset
            .ok_or_else(|| ValidationError::InvalidIdentifier("<missing dataset>".to_string()))?;

        let mut ctx = DatasetContext::new(project, DatasetId::new(dataset)?)?;
        if let Some(base) = self.index_base_name {
            if !INDEX_PATTERN.is_match(&base) {
                return Err(ValidationError::InvalidIdentifier(base));
            }
            ctx.index_base_name = Some(base);
        }
        ctx.correlation_id = self.correlation_id;
        Ok(ctx)
    }
}
