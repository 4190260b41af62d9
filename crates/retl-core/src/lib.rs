//! # RETL Core - Pipeline Engine Foundations
//!
//! This crate provides the foundational types, traits, and the execution
//! engine for building multi-worker ETL pipelines in RETL. It defines the
//! record model flowing between stages, the operator interfaces, and the
//! supervisor that wires stages together with bounded queues.
//!
//! ## Key Components
//!
//! - **Record Model**: schema-generic nested maps passed between stages
//! - **Operator Traits**: [`Extractor`], [`Transformer`], and [`Loader`]
//!   abstractions for building pipelines
//! - **Pipeline Supervisor**: bounded-queue dataflow, worker lifecycle and
//!   graceful shutdown ([`pipeline::Pipeline`])
//! - **Utilities**: deep key access, rotary iterator, concurrent key bag
//!
//! ## Example Usage
//!
//! ```no_run
//! use retl_core::pipeline::{Pipeline, PipelineOptions};
//!
//! # async fn example(extractor: Box<dyn retl_core::Extractor>,
//! #                  transformers: Vec<std::sync::Arc<dyn retl_core::Transformer>>,
//! #                  loaders: Vec<Box<dyn retl_core::Loader>>) -> anyhow::Result<()> {
//! let pipeline = Pipeline::new(extractor, transformers, loaders, PipelineOptions::default())?;
//! let summary = pipeline.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

pub mod bag;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod rotary;
pub mod worker;

pub use bag::ConcurrentKeyBag;
pub use error::EtlError;
pub use record::{deep_get, deep_remove, deep_set, path, Context, KeyPath, Record, Value, ValueKind};
pub use rotary::RotaryIter;
pub use worker::ExecutorKind;

/// Base trait for all pipeline operators.
///
/// Provides the operator identity used for logging and supervision. The
/// engine is deliberately schema-generic, so operators carry no schema.
pub trait Operator {
    /// Returns the name/identifier of this operator.
    fn name(&self) -> &str;
}

/// A lazy, finite sequence of records produced by an extractor.
pub type RecordIter = Box<dyn Iterator<Item = Result<Record>> + Send>;

/// Trait for data source operators.
///
/// Extractors are the entry points of pipelines. The pipeline drains the
/// returned sequence exactly once; an error item terminates the extraction
/// worker but leaves the downstream queues intact so buffered records still
/// drain.
pub trait Extractor: Operator + Send {
    /// Produce the lazy record sequence.
    fn extract(&mut self) -> Result<RecordIter>;
}

/// Trait for one-to-many record transformations.
///
/// Each input record yields zero or more output records. The returned batch
/// is ordered exactly as a depth-first flattening of the transformer's
/// output sequence would be.
pub trait Transformer: Operator + Send + Sync {
    /// Transform one input record.
    ///
    /// `ctx` is a per-input scratch map scoped to one top-level record; it
    /// is never shared across concurrently processed inputs.
    fn transform(&self, item: Record, ctx: &mut Context) -> Result<Vec<Record>>;

    /// Fill unset input/output paths with wrapper-imposed defaults.
    ///
    /// Used by aggregating wrappers whose inner chains read and write the
    /// reserved `_` key. Transformers without configurable paths ignore it.
    fn set_default_paths(&mut self, _input_key_path: &[String], _output_key: &str) {}
}

/// Atomic in-flight record counter shared between a loader worker and the
/// loaders it drives. Readers tolerate stale values; they only delay
/// termination.
#[derive(Clone, Debug, Default)]
pub struct AckCounter(Arc<AtomicI64>);

impl AckCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: i64) {
        self.0.fetch_add(n, Ordering::AcqRel);
    }

    pub fn sub(&self, n: i64) {
        self.0.fetch_sub(n, Ordering::AcqRel);
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Trait for terminal sink operators.
///
/// Loaders buffer incoming records and flush them to an external sink when
/// the buffer reaches its configured size or when `last_call` is signalled.
/// A loader is owned by exactly one worker; `&mut self` receivers make a
/// second concurrent writer unrepresentable.
#[async_trait]
pub trait Loader: Operator + Send {
    /// Append rows derived from `items`; flush on a full buffer or `last_call`.
    async fn load(&mut self, job_id: &str, items: Vec<Record>, last_call: bool) -> Result<()>;

    /// Same as [`Loader::load`], decrementing `ack` once the items are handed
    /// over (buffered or flushed).
    async fn load_with_ack(
        &mut self,
        job_id: &str,
        items: Vec<Record>,
        ack: &AckCounter,
        last_call: bool,
    ) -> Result<()> {
        let n = items.len() as i64;
        let res = self.load(job_id, items, last_call).await;
        ack.sub(n);
        res
    }

    /// Flush any remaining buffer and release external resources. Idempotent.
    async fn close(&mut self) -> Result<()>;

    fn has_buffered_data(&self) -> bool {
        false
    }
}

/// Apply a transformer chain to one record, flattening depth-first.
///
/// An empty chain yields the input unchanged. Dropped intermediates are
/// silent; a chain that yields nothing at all for an input is noted at
/// DEBUG level by the caller.
pub fn flat_map_apply(
    item: Record,
    chain: &[Arc<dyn Transformer>],
    ctx: &mut Context,
) -> Result<Vec<Record>> {
    let mut current = vec![item];
    for stage in chain {
        let mut next = Vec::new();
        for rec in current {
            next.extend(stage.transform(rec, ctx)?);
        }
        if next.is_empty() {
            debug!(stage = stage.name(), "transformer stage yielded no records");
            return Ok(next);
        }
        current = next;
    }
    Ok(current)
}
