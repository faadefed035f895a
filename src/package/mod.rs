//! Packages
//!
//! - **id**: `topic/timestamp_ms.dp` identifiers
//! - **envelope**: decoding of serialized packages

mod envelope;
mod id;

pub use envelope::{DriftPackage, STATUS_GOOD};
pub use id::PackageId;

#[cfg(test)]
pub(crate) use envelope::tests::encode_package;
