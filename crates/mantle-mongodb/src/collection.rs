//! Collection handle
//!
//! A [`Collection`] turns high-level operations into commands for its owning
//! [`Database`] and interprets the replies. Validation always happens before
//! anything is submitted, so a failed call either sent nothing or sent one
//! fully built command.

use crate::aggregation::{GroupMode, GroupSpec};
use crate::command::CommandBuilder;
use crate::command::WriteCommand;
use crate::cursor::{Cursor, QuerySpec};
use crate::database::{errmsg_or, is_ok, read_count, Database};
use crate::options::{FindOptions, Hint, UpdateOptions};
use crate::safe_write::verify_update;
use crate::validation::CollectionName;
use crate::Result;
use bson::{doc, oid::ObjectId, Bson, Document};
use mantle_common::MantleError;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Selector accepted by [`Collection::find_one`]
#[derive(Debug, Clone, PartialEq)]
pub enum FindOneQuery {
    /// Shorthand for `{_id: value}`
    Id(Bson),
    Filter(Document),
}

impl FindOneQuery {
    pub fn into_selector(self) -> Document {
        match self {
            FindOneQuery::Id(id) => doc! { "_id": id },
            FindOneQuery::Filter(filter) => filter,
        }
    }
}

impl From<ObjectId> for FindOneQuery {
    fn from(id: ObjectId) -> Self {
        FindOneQuery::Id(Bson::ObjectId(id))
    }
}

impl From<Document> for FindOneQuery {
    fn from(filter: Document) -> Self {
        FindOneQuery::Filter(filter)
    }
}

impl From<Option<Document>> for FindOneQuery {
    fn from(filter: Option<Document>) -> Self {
        FindOneQuery::Filter(filter.unwrap_or_default())
    }
}

/// A named collection within a database
pub struct Collection {
    db: Arc<dyn Database>,
    name: CollectionName,
    builder: CommandBuilder,
    /// Default hint for `find`. Readers take one snapshot per call; a
    /// `set_hint` racing with a `find` may or may not be seen by it.
    hint: RwLock<Option<Document>>,
}

impl Collection {
    /// Opens a handle, rejecting illegal names
    pub fn new(db: Arc<dyn Database>, name: &str) -> Result<Self> {
        let name = CollectionName::parse(name)?;
        let builder = CommandBuilder::new(db.name(), name.as_str());
        Ok(Self {
            db,
            name,
            builder,
            hint: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn database_name(&self) -> &str {
        self.builder.database_name()
    }

    /// `"database.collection"`
    pub fn namespace(&self) -> String {
        self.builder.namespace()
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Replaces the stored default hint; `None` clears it
    pub fn set_hint(&self, hint: Option<Hint>) {
        *self.hint.write() = hint.map(|hint| hint.normalize());
    }

    pub fn hint(&self) -> Option<Document> {
        self.hint.read().clone()
    }

    /// Inserts one document and returns it with its `_id`
    pub async fn insert<T: Serialize>(&self, document: &T) -> Result<Document> {
        let mut documents = self.insert_many(std::slice::from_ref(document)).await?;
        documents
            .pop()
            .ok_or_else(|| MantleError::Internal("insert produced no document".to_string()))
    }

    /// Inserts a batch and returns the documents with their `_id`s
    ///
    /// Inserts are not acknowledged by the protocol, so success means the
    /// batch was built and handed over.
    pub async fn insert_many<T: Serialize>(&self, documents: &[T]) -> Result<Vec<Document>> {
        if documents.is_empty() {
            debug!(namespace = %self.namespace(), "insert of empty batch skipped");
            return Ok(Vec::new());
        }
        let (command, finalized) = self.builder.insert(documents)?;
        debug!(namespace = %command.namespace, count = finalized.len(), "insert");
        self.db.execute(WriteCommand::Insert(command)).await?;
        Ok(finalized)
    }

    /// Updates by `_id` with upsert when the document has one, inserts otherwise
    pub async fn save(&self, document: Document, safe: bool) -> Result<Document> {
        match document.get("_id") {
            Some(id) if *id != Bson::Null => {
                let selector = doc! { "_id": id.clone() };
                let options = UpdateOptions::new().upsert(true).safe(safe);
                self.update(selector, document, options).await
            }
            _ => self.insert(&document).await,
        }
    }

    /// Updates documents matching `selector`
    ///
    /// Returns `document` once submitted, or, in safe mode, once the server
    /// confirms that an existing document was updated (or one was upserted).
    pub async fn update(
        &self,
        selector: Document,
        document: Document,
        options: UpdateOptions,
    ) -> Result<Document> {
        let command = self.builder.update(selector, document.clone(), &options);
        debug!(
            namespace = %command.namespace,
            upsert = options.upsert,
            multi = options.multi,
            safe = options.safe,
            "update"
        );
        self.db.execute(WriteCommand::Update(command)).await?;

        if options.safe {
            verify_update(self.db.as_ref(), document).await
        } else {
            Ok(document)
        }
    }

    /// Removes documents matching `selector`; `None` removes all of them
    pub async fn remove(&self, selector: Option<Document>) -> Result<()> {
        let command = self.builder.remove(selector);
        debug!(namespace = %command.namespace, selector = %command.selector, "remove");
        self.db.execute(WriteCommand::Delete(command)).await
    }

    /// Builds a cursor; nothing is sent until the cursor is read
    pub fn find(&self, selector: Option<Document>, options: FindOptions) -> Result<Cursor> {
        let spec = QuerySpec::build(self.namespace(), selector, options, self.hint())?;
        Ok(Cursor::new(Arc::clone(&self.db), spec))
    }

    /// Fetches one document by selector or by `_id`
    pub async fn find_one(&self, query: impl Into<FindOneQuery>) -> Result<Option<Document>> {
        let command = self.builder.find_one(query.into().into_selector());
        debug!(namespace = %command.namespace, selector = %command.selector, "find_one");
        let reply = self.db.query(command).await?;
        Ok(reply.into_primary())
    }

    /// Counts documents matching `query`
    pub async fn count(&self, query: Option<Document>) -> Result<u64> {
        let command = self.builder.count(query);
        debug!(namespace = %command.namespace, selector = %command.selector, "count");
        let reply = self.db.query(command).await?;
        let document = reply.into_primary().unwrap_or_default();

        match read_count(&document, "n") {
            Some(n) => Ok(n),
            None if !is_ok(&document) => Err(MantleError::Operation(errmsg_or(
                &document,
                "count failed",
            ))),
            None => Err(MantleError::Deserialization(format!(
                "count reply has no numeric 'n': {}",
                document
            ))),
        }
    }

    /// Renames this collection and returns a handle for the new name
    pub async fn rename(&self, new_name: &str) -> Result<Collection> {
        CollectionName::parse(new_name)?;

        let reply = self.db.rename_collection(self.name(), new_name).await?;
        if !is_ok(&reply) {
            let message = errmsg_or(&reply, "rename failed");
            warn!(from = %self.name, to = new_name, error = %message, "rename failed");
            return Err(MantleError::Operation(message));
        }

        debug!(from = %self.name, to = new_name, "renamed collection");
        Collection::new(Arc::clone(&self.db), new_name)
    }

    pub async fn drop(&self) -> Result<bool> {
        debug!(namespace = %self.namespace(), "drop");
        self.db.drop_collection(self.name()).await
    }

    /// Creation options recorded for this collection, if any
    pub async fn options(&self) -> Result<Option<Document>> {
        let info = self.db.collection_info(self.name()).await?;
        Ok(info.and_then(|info| info.get_document("options").ok().cloned()))
    }

    /// Groups documents matching `spec.condition` by `spec.keys`
    pub async fn group(&self, spec: &GroupSpec, mode: GroupMode) -> Result<Vec<Document>> {
        let strategy = mode.strategy();
        let command = strategy.command(self.database_name(), self.name(), spec);
        debug!(namespace = %command.namespace, mode = ?mode, keys = ?spec.keys, "group");

        let reply = self.db.query(command).await?;
        strategy.unwrap_reply(reply).map_err(|err| {
            warn!(collection = %self.name, mode = ?mode, error = %err, "group failed");
            err
        })
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.namespace())
            .field("hint", &self.hint())
            .finish()
    }
}
