//! Protobuf messages for the AkiDB data-plane API.
//!
//! Each wire-schema generation lives in its own module and package
//! (`akidb.v4`, `akidb.v51`, `akidb.v52`, `akidb.v6`). Messages whose shape
//! never changed across generations live in `common`. Field tags are stable
//! across generations: a newer message only ever adds fields.

pub mod common;
pub mod v4;
pub mod v51;
pub mod v52;
pub mod v6;

/// Service name shared by every generation; the package selects the generation.
pub const SERVICE_NAME: &str = "Akidb";

/// Unversioned service carrying the handshake.
pub const META_SERVICE: &str = "akidb.meta.Meta";
