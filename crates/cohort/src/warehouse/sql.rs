//! SQL fragments with named query parameters.
//!
//! Parameters are positional and named `@p1`, `@p2`, ... in the order they
//! appear in [`SqlFragment::params`]. Combining fragments renumbers the
//! right-hand side so the names stay unique.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use crate::types::Operator;

static PARAM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@p(\d+)\b").expect("valid regex"));

/// A SQL fragment with associated parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    /// The SQL string with `@pN` placeholders.
    pub sql: String,
    /// The parameter values; `params[0]` is `@p1`.
    pub params: Vec<SqlParam>,
}

/// A query parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// STRING parameter.
    String(String),
    /// INT64 parameter.
    Integer(i64),
    /// NUMERIC parameter.
    Decimal(Decimal),
    /// BOOL parameter.
    Bool(bool),
    /// DATE parameter.
    Date(NaiveDate),
    /// ARRAY<INT64> parameter.
    IntegerArray(Vec<i64>),
}

impl SqlParam {
    /// Creates a string parameter.
    pub fn text(s: &str) -> Self {
        SqlParam::String(s.to_string())
    }

    /// The warehouse type name of the parameter.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlParam::String(_) => "STRING",
            SqlParam::Integer(_) => "INT64",
            SqlParam::Decimal(_) => "NUMERIC",
            SqlParam::Bool(_) => "BOOL",
            SqlParam::Date(_) => "DATE",
            SqlParam::IntegerArray(_) => "ARRAY<INT64>",
        }
    }

    /// The parameter as a JSON value.
    ///
    /// Numerics and dates are rendered as strings so no precision is lost.
    pub fn to_json(&self) -> Value {
        match self {
            SqlParam::String(s) => Value::String(s.clone()),
            SqlParam::Integer(n) => json!(n),
            SqlParam::Decimal(d) => Value::String(d.to_string()),
            SqlParam::Bool(b) => json!(b),
            SqlParam::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            SqlParam::IntegerArray(ids) => json!(ids),
        }
    }
}

impl SqlFragment {
    /// Creates a new fragment with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Combines two fragments with AND.
    pub fn and(self, other: SqlFragment) -> SqlFragment {
        self.combine(other, |l, r| format!("({l}) AND ({r})"))
    }

    /// Combines two fragments with OR.
    pub fn or(self, other: SqlFragment) -> SqlFragment {
        self.combine(other, |l, r| format!("({l}) OR ({r})"))
    }

    /// Combines two fragments with an arbitrary template, renumbering the
    /// parameters of `other` after those of `self`.
    pub fn combine(
        self,
        other: SqlFragment,
        template: impl FnOnce(&str, &str) -> String,
    ) -> SqlFragment {
        let other = other.shifted(self.params.len());
        SqlFragment {
            sql: template(&self.sql, &other.sql),
            params: [self.params, other.params].concat(),
        }
    }

    /// Wraps the SQL text, keeping the parameters.
    pub fn map_sql(self, wrap: impl FnOnce(&str) -> String) -> SqlFragment {
        SqlFragment {
            sql: wrap(&self.sql),
            params: self.params,
        }
    }

    /// Returns the fragment with every placeholder index raised by `offset`.
    pub fn shifted(self, offset: usize) -> SqlFragment {
        if offset == 0 || self.params.is_empty() {
            return self;
        }
        let sql = PARAM_NAME
            .replace_all(&self.sql, |caps: &Captures<'_>| {
                match caps[1].parse::<usize>() {
                    Ok(n) => format!("@p{}", n + offset),
                    Err(_) => caps[0].to_string(),
                }
            })
            .into_owned();
        SqlFragment {
            sql,
            params: self.params,
        }
    }

    /// The parameters keyed by placeholder name.
    pub fn named_params(&self) -> BTreeMap<String, SqlParam> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, p)| (format!("p{}", i + 1), p.clone()))
            .collect()
    }

    /// The parameters in the warehouse's JSON query parameter form.
    pub fn params_json(&self) -> Value {
        Value::Array(
            self.params
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    json!({
                        "name": format!("p{}", i + 1),
                        "type": p.type_name(),
                        "value": p.to_json(),
                    })
                })
                .collect(),
        )
    }
}

/// Hands out placeholder names while a statement is being rendered.
#[derive(Debug, Default)]
pub(crate) struct ParamBinder {
    params: Vec<SqlParam>,
}

impl ParamBinder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a value and returns its placeholder.
    pub(crate) fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("@p{}", self.params.len())
    }

    /// Binds each operand and joins them for the given operator:
    /// `@a AND @b` for BETWEEN, `(@a, @b)` for IN, otherwise `@a`.
    pub(crate) fn bind_operands(
        &mut self,
        operator: Operator,
        operands: impl IntoIterator<Item = SqlParam>,
    ) -> String {
        let names: Vec<String> = operands.into_iter().map(|p| self.bind(p)).collect();
        match operator {
            Operator::Between => names.join(" AND "),
            Operator::In => format!("({})", names.join(", ")),
            _ => names.join(", "),
        }
    }

    pub(crate) fn finish(self, sql: String) -> SqlFragment {
        SqlFragment::with_params(sql, self.params)
    }
}

/// The SQL spelling of an operator.
pub fn sql_operator(operator: Operator) -> &'static str {
    match operator {
        Operator::Equal => "=",
        Operator::NotEqual => "!=",
        Operator::LessThan => "<",
        Operator::GreaterThan => ">",
        Operator::LessThanOrEqualTo => "<=",
        Operator::GreaterThanOrEqualTo => ">=",
        Operator::Like => "LIKE",
        Operator::In => "IN",
        Operator::Between => "BETWEEN",
    }
}
