//! Collection name validation
//!
//! Every operation that creates or renames a collection runs the name through
//! [`validate_collection_name`] before a command referencing it is built.
//!
//! Rules are checked in order and the first one violated decides the message:
//! - the name must be a string
//! - the name must be non-empty and must not contain `..`
//! - `$` is only allowed in the command channel (`$cmd...`) or the oplog (`oplog.$main`)
//! - the name must not start or end with `.`

use crate::Result;
use bson::Bson;
use mantle_common::MantleError;

/// Prefix of the administrative command channel
const COMMAND_CHANNEL: &str = "$cmd";

/// Oplog marker that legitimately contains `$`
const OPLOG_MARKER: &str = "oplog.$main";

/// Validated collection name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionName {
    name: String,
}

impl CollectionName {
    /// Validates `name` and wraps it
    pub fn parse(name: &str) -> Result<Self> {
        validate_collection_name(name)?;
        Ok(CollectionName {
            name: name.to_string(),
        })
    }

    /// Returns the validated collection name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Consumes the CollectionName and returns the inner String
    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Validates a collection name given as an untyped BSON value
///
/// Names read back from documents (rename targets, collection listings) arrive
/// as `Bson`; anything but a string is rejected first.
pub fn validate_collection_name_value(value: &Bson) -> Result<()> {
    match value {
        Bson::String(name) => validate_collection_name(name),
        _ => Err(invalid("collection name must be a String")),
    }
}

/// Validates a collection name
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains("..") {
        return Err(invalid("collection names cannot be empty"));
    }

    if name.contains('$') && !is_reserved_name(name) {
        return Err(invalid("collection names must not contain '$'"));
    }

    if name.starts_with('.') || name.ends_with('.') {
        return Err(invalid("collection names must not start or end with '.'"));
    }

    Ok(())
}

/// The administrative forms allowed to carry `$`
fn is_reserved_name(name: &str) -> bool {
    name.starts_with(COMMAND_CHANNEL) || name.contains(OPLOG_MARKER)
}

fn invalid(msg: &str) -> MantleError {
    MantleError::Validation(msg.to_string())
}
