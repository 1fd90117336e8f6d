//! Protocol command payloads and the builder that produces them
//!
//! Commands are plain values: building one never touches the network, so a
//! validation failure here means nothing was submitted.

use crate::options::UpdateOptions;
use crate::Result;
use bson::{doc, oid::ObjectId, Bson, Document};
use mantle_common::MantleError;
use serde::Serialize;
use std::ops::BitOr;

/// Collection suffix of the administrative command channel
pub const COMMAND_COLLECTION: &str = "$cmd";

/// Builds `"<database>.$cmd"`
pub fn command_namespace(database: &str) -> String {
    format!("{}.{}", database, COMMAND_COLLECTION)
}

/// Query flag bits, as laid out in the wire protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QueryFlags(u32);

impl QueryFlags {
    pub const NONE: QueryFlags = QueryFlags(0);
    pub const TAILABLE_CURSOR: QueryFlags = QueryFlags(2);
    pub const SLAVE_OK: QueryFlags = QueryFlags(4);
    pub const OPLOG_REPLAY: QueryFlags = QueryFlags(8);
    pub const NO_CURSOR_TIMEOUT: QueryFlags = QueryFlags(16);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: QueryFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for QueryFlags {
    type Output = QueryFlags;

    fn bitor(self, rhs: QueryFlags) -> QueryFlags {
        QueryFlags(self.0 | rhs.0)
    }
}

/// Batch insert; every document carries an `_id`
#[derive(Debug, Clone, PartialEq)]
pub struct InsertCommand {
    pub namespace: String,
    pub documents: Vec<Document>,
}

impl InsertCommand {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            documents: Vec::new(),
        }
    }

    pub fn add(&mut self, document: Document) -> &mut Self {
        self.documents.push(document);
        self
    }
}

/// Flags carried by an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateFlags {
    pub upsert: bool,
    pub multi: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommand {
    pub namespace: String,
    pub selector: Document,
    pub document: Document,
    pub flags: UpdateFlags,
}

impl UpdateCommand {
    /// True when the update document holds `$` modifiers rather than a replacement
    pub fn is_modifier(&self) -> bool {
        self.document
            .keys()
            .next()
            .is_some_and(|key| key.starts_with('$'))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteCommand {
    pub namespace: String,
    pub selector: Document,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryCommand {
    pub namespace: String,
    pub flags: QueryFlags,
    pub skip: u32,
    /// Negative values ask for a single batch of `|limit|` documents
    pub limit: i32,
    pub selector: Document,
    pub fields: Option<Document>,
}

impl QueryCommand {
    /// An administrative command sent through `<database>.$cmd`
    pub fn db_command(database: &str, selector: Document) -> Self {
        Self {
            namespace: command_namespace(database),
            flags: QueryFlags::NO_CURSOR_TIMEOUT,
            skip: 0,
            limit: -1,
            selector,
            fields: None,
        }
    }

    /// True when this query targets the command channel
    pub fn is_command(&self) -> bool {
        self.namespace
            .rsplit_once('.')
            .is_some_and(|(_, collection)| collection == COMMAND_COLLECTION)
    }
}

/// Commands submitted without waiting for a reply
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCommand {
    Insert(InsertCommand),
    Update(UpdateCommand),
    Delete(DeleteCommand),
}

impl WriteCommand {
    pub fn namespace(&self) -> &str {
        match self {
            WriteCommand::Insert(cmd) => &cmd.namespace,
            WriteCommand::Update(cmd) => &cmd.namespace,
            WriteCommand::Delete(cmd) => &cmd.namespace,
        }
    }
}

/// Assigns an identifier to `document` unless it already has a non-null one
///
/// Returns the identifier the document ends up with.
pub fn ensure_id(document: &mut Document) -> Bson {
    match document.get("_id") {
        Some(id) if *id != Bson::Null => id.clone(),
        _ => {
            let id = Bson::ObjectId(ObjectId::new());
            document.insert("_id", id.clone());
            id
        }
    }
}

/// Builds commands scoped to one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    database: String,
    collection: String,
}

impl CommandBuilder {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// `"database.collection"`
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    /// Builds a batch insert
    ///
    /// Returns the command together with the finalized documents, each
    /// carrying its `_id`.
    pub fn insert<T: Serialize>(&self, documents: &[T]) -> Result<(InsertCommand, Vec<Document>)> {
        let mut command = InsertCommand::new(self.namespace());
        for document in documents {
            let mut finalized = bson::to_document(document).map_err(|e| {
                MantleError::Validation(format!("document must serialize to a BSON document: {}", e))
            })?;
            ensure_id(&mut finalized);
            command.add(finalized);
        }
        let finalized = command.documents.clone();
        Ok((command, finalized))
    }

    /// Builds a delete; no selector removes every document
    pub fn remove(&self, selector: Option<Document>) -> DeleteCommand {
        DeleteCommand {
            namespace: self.namespace(),
            selector: selector.unwrap_or_default(),
        }
    }

    pub fn update(
        &self,
        selector: Document,
        document: Document,
        options: &UpdateOptions,
    ) -> UpdateCommand {
        UpdateCommand {
            namespace: self.namespace(),
            selector,
            document,
            flags: UpdateFlags {
                upsert: options.upsert,
                multi: options.multi,
            },
        }
    }

    /// A single-document query against the collection
    pub fn find_one(&self, selector: Document) -> QueryCommand {
        QueryCommand {
            namespace: self.namespace(),
            flags: QueryFlags::NONE,
            skip: 0,
            limit: -1,
            selector,
            fields: None,
        }
    }

    /// `{count: <collection>, query, fields: null}` on the command channel
    pub fn count(&self, query: Option<Document>) -> QueryCommand {
        let selector = doc! {
            "count": self.collection.as_str(),
            "query": query.unwrap_or_default(),
            "fields": Bson::Null,
        };
        self.db_command(selector)
    }

    pub fn db_command(&self, selector: Document) -> QueryCommand {
        QueryCommand::db_command(&self.database, selector)
    }
}
