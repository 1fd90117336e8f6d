//! Collection-level data access for mantle
//!
//! This crate turns collection operations into protocol commands and
//! interprets what the server sends back.
//!
//! # Features
//! - Collection name validation before any command is built
//! - Identifier assignment on insert
//! - Hint, sort and projection normalization
//! - Safe-mode update verification
//! - Lazy cursors over query results
//! - Grouping through the native command or a server-side reduce script
//!
//! Transport is left to a [`Database`] implementation; [`DriverDatabase`]
//! runs everything through the official driver.

pub mod aggregation;
pub mod collection;
pub mod command;
pub mod connection;
pub mod cursor;
pub mod database;
pub mod options;
pub mod safe_write;
pub mod validation;

pub use aggregation::{
    GroupMode, GroupSpec, GroupStrategy, NativeGroup, Reducer, ScriptGroup, ScriptTemplate,
};
pub use collection::{Collection, FindOneQuery};
pub use command::{
    CommandBuilder, DeleteCommand, InsertCommand, QueryCommand, QueryFlags, UpdateCommand,
    UpdateFlags, WriteCommand,
};
pub use connection::{DriverDatabase, PoolConfig};
pub use cursor::{Cursor, QuerySpec};
pub use database::{Database, Reply};
pub use mantle_common::{ErrorKind, MantleError, Result};
pub use options::{normalize_hint, normalize_sort, FindOptions, Hint, Projection, UpdateOptions};
pub use validation::{validate_collection_name, validate_collection_name_value, CollectionName};
