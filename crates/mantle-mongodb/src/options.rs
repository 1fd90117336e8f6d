//! Option normalization
//!
//! Callers may express index hints, sort orders and projections in several
//! shapes. Everything here is turned into one ordered `{field: direction}`
//! document before it reaches a command.

use crate::Result;
use bson::{Bson, Document};
use mantle_common::MantleError;

/// An index hint as given by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum Hint {
    /// A single field name: `"x"` → `{x: 1}`
    Field(String),
    /// A list of field names: `["x", "y"]` → `{x: 1, y: 1}`
    Fields(Vec<String>),
    /// An explicit field → direction mapping, copied as is
    Spec(Document),
}

impl Hint {
    /// Canonical ordered form of this hint
    pub fn normalize(&self) -> Document {
        match self {
            Hint::Field(field) => ascending([field.as_str()]),
            Hint::Fields(fields) => ascending(fields.iter().map(String::as_str)),
            Hint::Spec(spec) => spec.clone(),
        }
    }

    /// Reads a hint from an untyped value
    ///
    /// Returns `None` for anything that is not a string, a list of strings or
    /// a document.
    pub fn from_bson(value: &Bson) -> Option<Hint> {
        match value {
            Bson::String(field) => Some(Hint::Field(field.clone())),
            Bson::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(Hint::Fields),
            Bson::Document(spec) => Some(Hint::Spec(spec.clone())),
            _ => None,
        }
    }
}

impl From<&str> for Hint {
    fn from(field: &str) -> Self {
        Hint::Field(field.to_string())
    }
}

impl From<String> for Hint {
    fn from(field: String) -> Self {
        Hint::Field(field)
    }
}

impl From<Vec<String>> for Hint {
    fn from(fields: Vec<String>) -> Self {
        Hint::Fields(fields)
    }
}

impl From<Vec<&str>> for Hint {
    fn from(fields: Vec<&str>) -> Self {
        Hint::Fields(fields.into_iter().map(str::to_string).collect())
    }
}

impl From<Document> for Hint {
    fn from(spec: Document) -> Self {
        Hint::Spec(spec)
    }
}

/// Normalizes a hint given as an untyped value; unrecognized shapes yield `None`
pub fn normalize_hint(value: &Bson) -> Option<Document> {
    Hint::from_bson(value).map(|hint| hint.normalize())
}

/// A projection as given by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Inclusion list; an empty list selects only `_id`
    Fields(Vec<String>),
    /// An explicit projection document, passed through
    Spec(Document),
}

impl Projection {
    pub fn normalize(&self) -> Document {
        match self {
            Projection::Fields(fields) if fields.is_empty() => ascending(["_id"]),
            Projection::Fields(fields) => ascending(fields.iter().map(String::as_str)),
            Projection::Spec(spec) => spec.clone(),
        }
    }
}

impl From<Vec<&str>> for Projection {
    fn from(fields: Vec<&str>) -> Self {
        Projection::Fields(fields.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Projection {
    fn from(fields: Vec<String>) -> Self {
        Projection::Fields(fields)
    }
}

impl From<Document> for Projection {
    fn from(spec: Document) -> Self {
        Projection::Spec(spec)
    }
}

/// Normalizes a sort clause
///
/// Accepted shapes:
/// - `"field"` → `{field: 1}`
/// - `["a", "b"]` → `{a: 1, b: 1}`
/// - `[["a", "desc"], ["b", 1]]` → `{a: -1, b: 1}`
/// - `{a: -1}` with each direction checked
pub fn normalize_sort(value: &Bson) -> Result<Document> {
    let mut order = Document::new();
    match value {
        Bson::String(field) => {
            order.insert(field.clone(), 1);
        }
        Bson::Array(items) => {
            for item in items {
                match item {
                    Bson::String(field) => {
                        order.insert(field.clone(), 1);
                    }
                    Bson::Array(pair) if pair.len() == 2 => {
                        let field = pair[0]
                            .as_str()
                            .ok_or_else(|| illegal_sort(value))?;
                        order.insert(field.to_string(), sort_direction(&pair[1])?);
                    }
                    _ => return Err(illegal_sort(value)),
                }
            }
        }
        Bson::Document(spec) => {
            for (field, direction) in spec {
                order.insert(field.clone(), sort_direction(direction)?);
            }
        }
        _ => return Err(illegal_sort(value)),
    }
    Ok(order)
}

fn sort_direction(value: &Bson) -> Result<i32> {
    match value {
        Bson::Int32(1) | Bson::Int64(1) => Ok(1),
        Bson::Int32(-1) | Bson::Int64(-1) => Ok(-1),
        Bson::Double(d) if *d == 1.0 => Ok(1),
        Bson::Double(d) if *d == -1.0 => Ok(-1),
        Bson::String(s) => match s.as_str() {
            "asc" | "ascending" => Ok(1),
            "desc" | "descending" => Ok(-1),
            _ => Err(illegal_direction(value)),
        },
        _ => Err(illegal_direction(value)),
    }
}

fn illegal_sort(value: &Bson) -> MantleError {
    MantleError::Validation(format!("Illegal sort clause, must be of the form [['field1', '(ascending|descending)'], ['field2', '(ascending|descending)']]: {}", value))
}

fn illegal_direction(value: &Bson) -> MantleError {
    MantleError::Validation(format!(
        "Illegal sort direction, must be 1, -1, 'ascending' or 'descending': {}",
        value
    ))
}

fn ascending<'a>(fields: impl IntoIterator<Item = &'a str>) -> Document {
    let mut spec = Document::new();
    for field in fields {
        spec.insert(field, 1);
    }
    spec
}

/// Options for [`Collection::find`](crate::Collection::find)
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub fields: Option<Projection>,
    pub skip: Option<u32>,
    pub limit: Option<i32>,
    pub sort: Option<Bson>,
    /// Overrides the collection's stored default hint for this call
    pub hint: Option<Hint>,
    pub explain: bool,
    pub snapshot: bool,
    /// `Some(false)` asks the server to keep the cursor open indefinitely
    pub timeout: Option<bool>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projection
    pub fn fields(mut self, fields: impl Into<Projection>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    /// Set the number of documents to skip
    pub fn skip(mut self, skip: u32) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return
    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the sort order (see [`normalize_sort`] for accepted shapes)
    pub fn sort(mut self, sort: impl Into<Bson>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    /// Set the index hint for this query only
    pub fn hint(mut self, hint: impl Into<Hint>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn timeout(mut self, timeout: bool) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for [`Collection::update`](crate::Collection::update)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert the document when nothing matches the selector
    pub upsert: bool,
    /// Confirm the update with a status round trip
    pub safe: bool,
    /// Update every matching document instead of the first
    pub multi: bool,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    pub fn multi(mut self, multi: bool) -> Self {
        self.multi = multi;
        self
    }
}
