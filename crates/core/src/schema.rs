//! Stored-record schema versioning.
//!
//! Every record the broker writes carries the schema version it was written
//! with. Readers refuse records written by a newer broker instead of guessing
//! at fields they do not understand. This is a forward-compatibility guard,
//! not a migration mechanism.

use thiserror::Error;

/// Schema version of the records this broker writes.
pub const SCHEMA_VERSION: i64 = 1;

/// A stored record was written with a newer schema than this broker knows.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("json version mismatch, stored version: {stored}, broker version: {supported}")]
pub struct SchemaVersionMismatch {
    pub stored: i64,
    pub supported: i64,
}

/// Fail closed when `version` is newer than [`SCHEMA_VERSION`].
pub fn check_schema_version(version: i64) -> Result<(), SchemaVersionMismatch> {
    if version > SCHEMA_VERSION {
        return Err(SchemaVersionMismatch {
            stored: version,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// A persisted record stamped with a schema version.
pub trait Versioned {
    fn schema_version(&self) -> i64;

    /// Stamp the record with the current [`SCHEMA_VERSION`] before writing.
    fn stamp_schema_version(&mut self);

    fn check_schema_version(&self) -> Result<(), SchemaVersionMismatch> {
        check_schema_version(self.schema_version())
    }
}
