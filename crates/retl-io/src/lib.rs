//! # RETL I/O - Extractor and Loader Implementations
//!
//! This crate provides the concrete edges of a RETL pipeline: filesystem
//! extractors feeding records in, and the loader family persisting them.
//!
//! ## Extractors
//! - **FilesExtractor**: recursive walk of one directory tree
//! - **MultiDirExtractor**: the same walk over a list of roots
//!
//! ## Loaders
//! - **NoopLoader**: discard records, optionally logging the row projection
//! - **ConditionalLoader**: gate another loader behind a flag or predicate
//! - **CsvLoader**: buffered delimited text files, one file per instance
//! - **MySqlLoader**: batched parameterised INSERTs with reconnect/rollback
//!   handling
//! - **LoadBalancer**: round-robin fan-out over inner loaders running in
//!   their own workers

/// Row projection shared by the sinks
pub mod columns;

/// Filesystem walker extractors
pub mod source_files;

/// Round-robin fan-out over inner loaders
pub mod sink_balance;

/// Delimited text file sink
pub mod sink_csv;

/// MySQL table sink
pub mod sink_mysql;

/// Discarding and gating sinks
pub mod sink_noop;

pub use columns::ColumnSpec;
pub use sink_balance::LoadBalancer;
pub use sink_csv::CsvLoader;
pub use sink_mysql::MySqlLoader;
pub use sink_noop::{Condition, ConditionalLoader, NoopLoader};
pub use source_files::{FilesExtractor, MultiDirExtractor};
