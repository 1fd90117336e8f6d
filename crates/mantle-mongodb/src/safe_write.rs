//! Safe-mode write verification
//!
//! Updates go out without acknowledgement. In safe mode the collection asks
//! the server for the status of the last write and decides from it whether the
//! update took effect. That costs one extra round trip per update.

use crate::database::Database;
use crate::Result;
use bson::{Bson, Document};
use mantle_common::MantleError;
use tracing::{debug, warn};

pub const UPDATE_FAILED: &str = "Failed to update document";

/// Interprets a last-write status document for an update of `document`
///
/// An explicit `updatedExisting: false` is a failure, even when the write
/// upserted a new document. A status without the flag is accepted.
pub fn interpret_update_status(status: &Document, document: Document) -> Result<Document> {
    if status.get("updatedExisting") == Some(&Bson::Boolean(false)) {
        return Err(MantleError::Operation(UPDATE_FAILED.to_string()));
    }
    Ok(document)
}

/// Follows an update with a status round trip
pub async fn verify_update(db: &dyn Database, document: Document) -> Result<Document> {
    let status = db.last_error().await?;
    debug!(status = %status, "safe update status");

    interpret_update_status(&status, document).map_err(|err| {
        warn!(error = %err, "safe update not confirmed");
        err
    })
}
