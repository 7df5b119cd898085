//! Error types for the cohort compiler.
//!
//! Errors are split by the stage that raises them so callers can tell a bad
//! request apart from a data-integrity problem or a backend outage:
//!
//! - [`ValidationError`] - the caller's request is malformed
//! - [`ResolutionError`] - a rollup code could not be mapped to a domain
//! - [`CompileError`] - the criteria tree cannot be compiled as given
//! - [`BackendError`] - the warehouse or search index failed
//! - [`ExtractionError`] - a dataset extraction request cannot be served
//! - [`ConfigError`] - the service or router was assembled incorrectly

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::time::Duration;

use thiserror::Error;

use crate::routing::ConfigError;
use crate::types::{CriteriaSubType, CriteriaType, DomainType, ModifierType, Operator};

/// The primary error type for all cohort operations.
#[derive(Error, Debug)]
pub enum CohortError {
    /// Request validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Domain resolution errors
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Compilation errors
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Backend execution errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Dataset extraction errors
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Service configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CohortError {
    /// Returns true if the caller can fix this error by changing the request.
    pub fn is_input_error(&self) -> bool {
        match self {
            CohortError::Validation(_) | CohortError::Extraction(_) => true,
            CohortError::Compile(e) => !matches!(e, CompileError::UnsupportedCriteria { .. }),
            CohortError::Resolution(_) | CohortError::Backend(_) | CohortError::Config(_) => false,
        }
    }

    /// Returns true if this error came from a backend call.
    pub fn is_backend_error(&self) -> bool {
        matches!(self, CohortError::Backend(_))
    }

    /// Returns true if this is a deadline expiry rather than a query failure.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(
            self,
            CohortError::Backend(BackendError::DeadlineExceeded { .. })
        )
    }
}

/// Errors in the shape or values of a caller's request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{context}: operator is required")]
    MissingOperator { context: String },

    #[error("{context}: operands are required")]
    EmptyOperands { context: String },

    #[error("{context}: operator {operator} takes {expected} operand(s), got {actual}")]
    OperandCount {
        context: String,
        operator: Operator,
        expected: usize,
        actual: usize,
    },

    #[error("{context}: operand '{operand}' is not a number")]
    NonNumericOperand { context: String, operand: String },

    #[error("{context}: operand '{operand}' is not a YYYY-MM-DD date")]
    InvalidDate { context: String, operand: String },

    #[error("{context}: operator {operator} is not supported here")]
    UnsupportedOperator { context: String, operator: Operator },

    #[error("modifier {modifier} is not allowed on demographic criteria")]
    ModifierNotAllowed { modifier: ModifierType },

    #[error("modifier {modifier} appears more than once in item '{item}'")]
    DuplicateModifier { modifier: ModifierType, item: String },

    #[error("parameter '{parameter}' of type {criteria_type} requires a concept id")]
    MissingConceptId {
        parameter: String,
        criteria_type: CriteriaType,
    },

    #[error("rollup parameter '{parameter}' of type {criteria_type} requires a code value")]
    MissingCode {
        parameter: String,
        criteria_type: CriteriaType,
    },

    #[error("search group item '{item}' has no search parameters")]
    EmptyItem { item: String },

    #[error("search group '{group}' has no items")]
    EmptyGroup { group: String },

    #[error("invalid dataset request: {0}")]
    InvalidDatasetRequest(String),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
}

/// Errors raised while mapping rollup codes to their domains.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    /// The code index holds no domain for this code. This is a data-integrity
    /// failure; dropping the parameter would silently shrink the cohort.
    #[error(
        "no domain found for {criteria_type}/{} code '{code}'",
        subtype_label(.subtype)
    )]
    NoDomainFound {
        criteria_type: CriteriaType,
        subtype: Option<CriteriaSubType>,
        code: String,
    },

    #[error("code index lookup failed: {message}")]
    LookupFailed { message: String },
}

fn subtype_label(subtype: &Option<CriteriaSubType>) -> String {
    subtype.map_or_else(|| "-".to_string(), |s| s.to_string())
}

/// Errors raised by the criteria compiler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("parameter '{parameter}' ({criteria_type}) has no domain; resolve domains before compiling")]
    UnresolvedDomain {
        parameter: String,
        criteria_type: CriteriaType,
    },

    #[error("malformed temporal group '{group}': {reason}")]
    MalformedTemporalGroup { group: String, reason: String },

    #[error("criteria type {criteria_type} cannot be used in the {domain} domain")]
    UnsupportedCriteria {
        domain: DomainType,
        criteria_type: CriteriaType,
    },
}

/// Errors from the warehouse or search-index collaborators.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend unavailable: {backend_name}: {reason}")]
    Unavailable { backend_name: String, reason: String },

    #[error("deadline of {timeout:?} exceeded on {backend_name}")]
    DeadlineExceeded {
        backend_name: String,
        timeout: Duration,
    },

    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// The backend rejected the generated query. Outside of tests this
    /// indicates a compiler defect.
    #[error("query error on {backend_name}: {message}")]
    QueryError {
        backend_name: String,
        message: String,
    },

    #[error("malformed response from {backend_name}: {message}")]
    MalformedResponse {
        backend_name: String,
        message: String,
    },

    #[error("{backend_name} cannot evaluate {construct}")]
    Unsupported {
        backend_name: String,
        construct: String,
    },

    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Errors building dataset extraction queries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("no base table registered for domain {0}")]
    UnknownDomain(DomainType),

    #[error("no value columns requested for any domain")]
    NoValueColumns,
}

/// Result type for cohort operations.
pub type CohortResult<T> = Result<T, CohortError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResolutionError::NoDomainFound {
            criteria_type: CriteriaType::Icd9,
            subtype: Some(CriteriaSubType::Cm),
            code: "001".to_string(),
        };
        assert_eq!(err.to_string(), "no domain found for ICD9/CM code '001'");

        let err = BackendError::DeadlineExceeded {
            backend_name: "warehouse".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_error_conversion() {
        let err: CohortError = CompileError::MalformedTemporalGroup {
            group: "g1".to_string(),
            reason: "missing target".to_string(),
        }
        .into();
        assert!(err.is_input_error());
        assert!(!err.is_backend_error());

        let err: CohortError = BackendError::DeadlineExceeded {
            backend_name: "index".to_string(),
            timeout: Duration::from_millis(500),
        }
        .into();
        assert!(err.is_backend_error());
        assert!(err.is_deadline_exceeded());
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_no_domain_found_is_not_input_error() {
        let err: CohortError = ResolutionError::NoDomainFound {
            criteria_type: CriteriaType::Icd10,
            subtype: None,
            code: "A00".to_string(),
        }
        .into();
        assert!(!err.is_input_error());
        assert!(err.to_string().contains("ICD10/-"));
    }

    #[test]
    fn test_missing_component_is_not_a_backend_error() {
        let err: CohortError = ConfigError::MissingComponent("router").into();
        assert!(!err.is_backend_error());
        assert!(!err.is_input_error());
        assert_eq!(err.to_string(), "no router configured");
    }
}
