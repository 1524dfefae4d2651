//! Metadata-reconciliation engine for a scientific data archive.
//!
//! Facility spreadsheets and checksum manifests go in; a normalized graph of
//! dataset packages and file resources, tied together by composite linkage
//! keys, comes out. All matching is exact and pattern-based: the domain data
//! is produced under fixed naming conventions, and anything that falls
//! outside them is surfaced as an anomaly rather than guessed at.

pub mod assemble;
pub mod classify;
pub mod coerce;
pub mod context;
pub mod error;
pub mod fetch;
pub mod fieldspec;
pub mod linkage;
pub mod manifest;
pub mod project;
