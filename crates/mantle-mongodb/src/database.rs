//! The execution collaborator
//!
//! A [`Database`] owns transport and encoding. Collections hand it fully built
//! commands and interpret what comes back.

use crate::command::{QueryCommand, WriteCommand};
use crate::Result;
use async_trait::async_trait;
use bson::{Bson, Document};

/// Server reply to a query: index 0 holds the primary reply document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub documents: Vec<Document>,
}

impl Reply {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn primary(&self) -> Option<&Document> {
        self.documents.first()
    }

    pub fn into_primary(self) -> Option<Document> {
        self.documents.into_iter().next()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Reads the `ok` field of a reply, accepting the numeric and boolean forms servers send
pub fn is_ok(document: &Document) -> bool {
    match document.get("ok") {
        Some(Bson::Boolean(ok)) => *ok,
        Some(Bson::Int32(n)) => *n != 0,
        Some(Bson::Int64(n)) => *n != 0,
        Some(Bson::Double(n)) => *n != 0.0,
        _ => false,
    }
}

/// Reads the `errmsg` field of a reply, or an empty string
pub fn errmsg(document: &Document) -> String {
    document
        .get_str("errmsg")
        .map(str::to_string)
        .unwrap_or_default()
}

/// Like [`errmsg`], with `fallback` when the reply carries no message
pub fn errmsg_or(document: &Document, fallback: &str) -> String {
    match document.get_str("errmsg") {
        Ok(message) if !message.is_empty() => message.to_string(),
        _ => fallback.to_string(),
    }
}

/// Reads a numeric field as u64, accepting int32, int64 and double
pub fn read_count(document: &Document, field: &str) -> Option<u64> {
    match document.get(field)? {
        Bson::Int32(n) if *n >= 0 => Some(*n as u64),
        Bson::Int64(n) if *n >= 0 => Some(*n as u64),
        Bson::Double(n) if *n >= 0.0 => Some(*n as u64),
        _ => None,
    }
}

/// The owning database of a collection, as seen by this layer
#[async_trait]
pub trait Database: Send + Sync {
    /// Database name used to build namespaces
    fn name(&self) -> &str;

    /// Submits a write; the protocol sends no acknowledgement
    async fn execute(&self, command: WriteCommand) -> Result<()>;

    /// Runs a query or an administrative command and returns the reply
    async fn query(&self, query: QueryCommand) -> Result<Reply>;

    /// Status of the last write on this connection (`getlasterror`)
    async fn last_error(&self) -> Result<Document>;

    /// Renames `from` to `to`; the reply carries `ok` and, on failure, `errmsg`
    async fn rename_collection(&self, from: &str, to: &str) -> Result<Document>;

    async fn drop_collection(&self, name: &str) -> Result<bool>;

    /// Metadata entry for one collection, if it exists
    async fn collection_info(&self, name: &str) -> Result<Option<Document>>;
}
