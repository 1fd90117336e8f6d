//! Driver-backed [`Database`] with pool configuration
//!
//! Maps the collection layer's commands onto the official driver. Writes are
//! sent as driver operations and their outcome is kept as the "last error"
//! status that safe-mode updates read back.

use crate::command::{QueryCommand, QueryFlags, UpdateCommand, WriteCommand};
use crate::database::{Database, Reply};
use crate::Result;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mantle_common::MantleError;
use mongodb::{
    error::ErrorKind,
    options::{ClientOptions, Hint, ServerApi, ServerApiVersion},
    Client, Collection,
};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool (default: 0)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 10)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(0),
            max_pool_size: Some(10),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("mantle".to_string()),
        }
    }
}

impl PoolConfig {
    fn apply(self, client_options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            client_options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = self.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = self.app_name {
            client_options.app_name = Some(app);
        }
    }
}

/// [`Database`] implementation on top of the MongoDB driver
///
/// The last-write status is kept per instance, so it is only meaningful when
/// writes and their safe-mode checks go through the same `DriverDatabase`
/// without interleaving.
pub struct DriverDatabase {
    client: Client,
    database: mongodb::Database,
    database_name: String,
    last_status: Mutex<Document>,
}

impl DriverDatabase {
    /// Connect with default pool settings
    pub async fn connect(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Connect with a custom pool configuration
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connection_string).await?;
        config.apply(&mut client_options);

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;

        let database = client.default_database().ok_or_else(|| {
            MantleError::Connection(
                "No default database specified in connection string".to_string(),
            )
        })?;
        let database_name = database.name().to_string();
        info!(database = %database_name, "connected");

        Ok(Self {
            client,
            database,
            database_name,
            last_status: Mutex::new(doc! { "ok": 1, "n": 0 }),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn collection(&self, namespace: &str) -> Result<Collection<Document>> {
        let (_, name) = namespace.split_once('.').ok_or_else(|| {
            MantleError::Validation(format!("namespace '{}' has no collection part", namespace))
        })?;
        Ok(self.database.collection(name))
    }

    fn record(&self, status: Document) {
        *self.last_status.lock() = status;
    }

    async fn run_update(&self, command: UpdateCommand) -> Result<Document> {
        let collection = self.collection(&command.namespace)?;
        let is_modifier = command.is_modifier();
        let UpdateCommand {
            selector,
            document,
            flags,
            ..
        } = command;

        let result = if !is_modifier {
            collection
                .replace_one(selector, document)
                .upsert(flags.upsert)
                .await?
        } else if flags.multi {
            collection
                .update_many(selector, document)
                .upsert(flags.upsert)
                .await?
        } else {
            collection
                .update_one(selector, document)
                .upsert(flags.upsert)
                .await?
        };

        let mut status = doc! {
            "ok": 1,
            "n": result.matched_count as i64,
            "updatedExisting": result.matched_count > 0,
        };
        if let Some(id) = result.upserted_id {
            status.insert("n", 1i64);
            status.insert("upserted", id);
        }
        Ok(status)
    }

    /// Runs a `$cmd` query; server-side command failures come back as `{ok: 0}` replies
    async fn run_command(&self, selector: Document) -> Result<Reply> {
        match self.database.run_command(selector).await {
            Ok(document) => Ok(Reply::new(vec![document])),
            Err(err) => match err.kind.as_ref() {
                ErrorKind::Command(command_error) => Ok(Reply::new(vec![doc! {
                    "ok": 0,
                    "errmsg": command_error.message.clone(),
                    "code": command_error.code,
                }])),
                _ => Err(err.into()),
            },
        }
    }

    async fn run_find(&self, query: QueryCommand) -> Result<Reply> {
        let collection = self.collection(&query.namespace)?;
        let mut selector = query.selector;

        // Unwrap $query modifiers into driver options
        let (filter, sort, hint, explain) = if selector.contains_key("$query") {
            let filter = selector.get_document("$query").cloned().unwrap_or_default();
            let sort = selector.get_document("$orderby").ok().cloned();
            let hint = selector.get_document("$hint").ok().cloned();
            let explain = selector.get_bool("$explain").unwrap_or(false);
            if selector.remove("$snapshot").is_some() {
                warn!("$snapshot is not supported by the driver, ignoring");
            }
            (filter, sort, hint, explain)
        } else {
            (selector, None, None, false)
        };

        if explain {
            let collection_name = collection.name().to_string();
            return self
                .run_command(doc! {
                    "explain": { "find": collection_name, "filter": filter },
                })
                .await;
        }

        let mut find = collection
            .find(filter)
            .skip(u64::from(query.skip))
            .no_cursor_timeout(query.flags.contains(QueryFlags::NO_CURSOR_TIMEOUT));
        if query.limit != 0 {
            find = find.limit(i64::from(query.limit));
        }
        if let Some(fields) = query.fields {
            find = find.projection(fields);
        }
        if let Some(sort) = sort {
            find = find.sort(sort);
        }
        if let Some(hint) = hint {
            find = find.hint(Hint::Keys(hint));
        }

        let documents: Vec<Document> = find.await?.try_collect().await?;
        Ok(Reply::new(documents))
    }
}

#[async_trait]
impl Database for DriverDatabase {
    fn name(&self) -> &str {
        &self.database_name
    }

    async fn execute(&self, command: WriteCommand) -> Result<()> {
        debug!(namespace = command.namespace(), "execute");
        let status = match command {
            WriteCommand::Insert(insert) => {
                let collection = self.collection(&insert.namespace)?;
                let result = collection.insert_many(insert.documents).await?;
                doc! { "ok": 1, "n": result.inserted_ids.len() as i64 }
            }
            WriteCommand::Update(update) => self.run_update(update).await?,
            WriteCommand::Delete(delete) => {
                let collection = self.collection(&delete.namespace)?;
                let result = collection.delete_many(delete.selector).await?;
                doc! { "ok": 1, "n": result.deleted_count as i64 }
            }
        };
        self.record(status);
        Ok(())
    }

    async fn query(&self, query: QueryCommand) -> Result<Reply> {
        if query.is_command() {
            self.run_command(query.selector).await
        } else {
            self.run_find(query).await
        }
    }

    async fn last_error(&self) -> Result<Document> {
        Ok(self.last_status.lock().clone())
    }

    async fn rename_collection(&self, from: &str, to: &str) -> Result<Document> {
        let command = doc! {
            "renameCollection": format!("{}.{}", self.database_name, from),
            "to": format!("{}.{}", self.database_name, to),
        };
        match self.client.database("admin").run_command(command).await {
            Ok(reply) => Ok(reply),
            Err(err) => match err.kind.as_ref() {
                ErrorKind::Command(command_error) => Ok(doc! {
                    "ok": 0,
                    "errmsg": command_error.message.clone(),
                }),
                _ => Err(err.into()),
            },
        }
    }

    async fn drop_collection(&self, name: &str) -> Result<bool> {
        self.database.collection::<Document>(name).drop().await?;
        Ok(true)
    }

    async fn collection_info(&self, name: &str) -> Result<Option<Document>> {
        let reply = self
            .run_command(doc! { "listCollections": 1, "filter": { "name": name } })
            .await?;
        let first = reply
            .primary()
            .and_then(|document| document.get_document("cursor").ok())
            .and_then(|cursor| cursor.get_array("firstBatch").ok())
            .and_then(|batch| batch.first())
            .and_then(Bson::as_document)
            .cloned();
        Ok(first)
    }
}
