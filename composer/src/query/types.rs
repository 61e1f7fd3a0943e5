//! Request and result types for query dispatch.
//!
//! - `Value` - A materialized value (literal, entity record or collection)
//! - `Record` - A single entity with its type name and properties
//! - `QueryRequest` - What the caller wants executed
//! - `QueryResult` - What comes back

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::expr::Expr;

/// A materialized value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Entity(Arc<Record>),
    Collection(Vec<Value>),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Entity(record) => Some(record),
            _ => None,
        }
    }

    /// Flatten into rows: a collection yields its items, null yields
    /// nothing, anything else is a single row.
    #[must_use]
    pub fn into_rows(self) -> Vec<Self> {
        match self {
            Self::Collection(items) => items,
            Self::Null => Vec::new(),
            other => vec![other],
        }
    }

    /// Compare two values of compatible kinds.
    ///
    /// Integers and doubles compare numerically. Null sorts before
    /// everything. Records and collections are unordered.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Mixed int/double comparison is inherently approximate
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Double(b)) => (*a as f64).partial_cmp(b),
            (Self::Double(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality as a predicate sees it: numeric across int and double,
    /// structural for records.
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Entity(a), Self::Entity(b)) => a == b,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Double(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Entity(Arc::new(record))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Double(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Entity(record) => write!(f, "{record}"),
            Self::Collection(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// An entity instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    #[serde(rename = "@type")]
    pub type_name: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_owned(),
            properties: BTreeMap::new(),
        }
    }

    /// Set a property, builder style.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.type_name)?;
        for (i, (name, value)) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {name}: {value}")?;
        }
        f.write_str(" }")
    }
}

/// A query to compose and execute.
#[derive(Debug)]
pub struct QueryRequest {
    expression: Expr,
    /// Return a single count instead of rows.
    pub should_return_count: bool,
    /// Also report the number of rows before paging.
    pub include_total_count: bool,
}

impl QueryRequest {
    #[must_use]
    pub const fn new(expression: Expr) -> Self {
        Self {
            expression,
            should_return_count: false,
            include_total_count: false,
        }
    }

    /// Ask for a single count instead of rows.
    #[must_use]
    pub const fn count(mut self) -> Self {
        self.should_return_count = true;
        self
    }

    /// Ask for the pre-paging total alongside the rows.
    #[must_use]
    pub const fn with_total_count(mut self) -> Self {
        self.include_total_count = true;
        self
    }

    #[must_use]
    pub const fn expression(&self) -> &Expr {
        &self.expression
    }
}

/// Query results.
#[derive(Debug, Default, Serialize)]
pub struct QueryResult {
    /// Materialized rows, or the single scalar on the scalar path.
    pub results: Vec<Value>,
    /// Total number of rows before paging, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,
    /// The entity set the results belong to, for response metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_collection: Option<Arc<str>>,
}

impl QueryResult {
    #[must_use]
    pub const fn new(results: Vec<Value>, total_count: Option<i64>) -> Self {
        Self {
            results,
            total_count,
            result_collection: None,
        }
    }

    /// Results for the scalar path: exactly one value.
    #[must_use]
    pub fn scalar(value: Value) -> Self {
        Self::new(vec![value], None)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_mixed_numbers() {
        assert_eq!(Value::Int(2).compare(&Value::Double(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::Int(1).compare(&Value::Double(1.5)), Some(Ordering::Less));
        assert!(Value::Int(3).loose_eq(&Value::Double(3.0)));
    }

    #[test]
    fn test_compare_null_and_incompatible() {
        assert_eq!(Value::Null.compare(&Value::Int(0)), Some(Ordering::Less));
        assert_eq!(Value::from("a").compare(&Value::Int(0)), None);
        assert!(!Value::from("1").loose_eq(&Value::Int(1)));
    }

    #[test]
    fn test_into_rows() {
        let rows = Value::Collection(vec![Value::Int(1), Value::Int(2)]).into_rows();
        assert_eq!(rows.len(), 2);
        assert!(Value::Null.into_rows().is_empty());
        assert_eq!(Value::Int(5).into_rows(), vec![Value::Int(5)]);
    }

    #[test]
    fn test_record_display() {
        let record = Record::new("Book").with("Id", "1").with("Pages", 120_i64);
        assert_eq!(record.to_string(), "Book { Id: \"1\", Pages: 120 }");
        assert_eq!(record.get("Pages"), Some(&Value::Int(120)));
    }

    #[test]
    fn test_request_builder() {
        let request = QueryRequest::new(Expr::int(1)).count().with_total_count();
        assert!(request.should_return_count);
        assert!(request.include_total_count);
    }
}
