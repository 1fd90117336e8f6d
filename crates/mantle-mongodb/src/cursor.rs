//! Query specifications and the cursors built from them

use crate::command::{QueryCommand, QueryFlags};
use crate::database::Database;
use crate::options::{normalize_sort, FindOptions};
use crate::Result;
use bson::{doc, Document};
use std::sync::Arc;
use tracing::debug;

/// Everything needed to run one query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    pub namespace: String,
    pub selector: Document,
    /// `None` returns whole documents
    pub fields: Option<Document>,
    pub skip: u32,
    pub limit: i32,
    pub sort: Option<Document>,
    pub hint: Option<Document>,
    pub explain: bool,
    pub snapshot: bool,
    pub timeout: Option<bool>,
}

impl QuerySpec {
    /// Resolves caller options into a spec
    ///
    /// `default_hint` is the collection's stored hint; an explicit hint in
    /// `options` takes precedence over it.
    pub fn build(
        namespace: String,
        selector: Option<Document>,
        options: FindOptions,
        default_hint: Option<Document>,
    ) -> Result<Self> {
        let sort = options.sort.as_ref().map(normalize_sort).transpose()?;
        let hint = match &options.hint {
            Some(hint) => Some(hint.normalize()),
            None => default_hint,
        };

        Ok(QuerySpec {
            namespace,
            selector: selector.unwrap_or_default(),
            fields: options.fields.as_ref().map(|fields| fields.normalize()),
            skip: options.skip.unwrap_or(0),
            limit: options.limit.unwrap_or(0),
            sort,
            hint,
            explain: options.explain,
            snapshot: options.snapshot,
            timeout: options.timeout,
        })
    }

    fn has_modifiers(&self) -> bool {
        self.sort.is_some() || self.hint.is_some() || self.explain || self.snapshot
    }

    /// The selector as sent: wrapped in `$query` when modifiers are present
    pub fn query_selector(&self) -> Document {
        if !self.has_modifiers() {
            return self.selector.clone();
        }

        let mut wrapped = doc! { "$query": self.selector.clone() };
        if let Some(sort) = &self.sort {
            wrapped.insert("$orderby", sort.clone());
        }
        if let Some(hint) = &self.hint {
            wrapped.insert("$hint", hint.clone());
        }
        if self.explain {
            wrapped.insert("$explain", true);
        }
        if self.snapshot {
            wrapped.insert("$snapshot", true);
        }
        wrapped
    }

    pub fn flags(&self) -> QueryFlags {
        match self.timeout {
            Some(false) => QueryFlags::NO_CURSOR_TIMEOUT,
            _ => QueryFlags::NONE,
        }
    }

    pub fn query_command(&self) -> QueryCommand {
        QueryCommand {
            namespace: self.namespace.clone(),
            flags: self.flags(),
            skip: self.skip,
            limit: self.limit,
            selector: self.query_selector(),
            fields: self.fields.clone(),
        }
    }
}

/// Lazy handle over a query's results
///
/// Nothing is sent until one of the async methods is called.
pub struct Cursor {
    db: Arc<dyn Database>,
    spec: QuerySpec,
}

impl Cursor {
    pub fn new(db: Arc<dyn Database>, spec: QuerySpec) -> Self {
        Self { db, spec }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn query_command(&self) -> QueryCommand {
        self.spec.query_command()
    }

    /// Runs the query and returns every document
    pub async fn to_list(&self) -> Result<Vec<Document>> {
        let command = self.query_command();
        debug!(namespace = %command.namespace, skip = command.skip, limit = command.limit, "query");
        let reply = self.db.query(command).await?;
        Ok(reply.documents)
    }

    /// Fetches the first matching document
    pub async fn next_object(&self) -> Result<Option<Document>> {
        let mut command = self.query_command();
        command.limit = -1;
        let reply = self.db.query(command).await?;
        Ok(reply.into_primary())
    }

    /// Runs the query with `$explain` and returns the plan
    pub async fn explain(&self) -> Result<Option<Document>> {
        let mut spec = self.spec.clone();
        spec.explain = true;
        // a single batch carries the plan
        spec.limit = -spec.limit.abs();
        let reply = self.db.query(spec.query_command()).await?;
        Ok(reply.into_primary())
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").field("spec", &self.spec).finish()
    }
}
