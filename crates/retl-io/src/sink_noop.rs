//! Discarding and gating sinks.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use retl_core::record::{KeyPath, Record};
use retl_core::{AckCounter, Loader, Operator};
use tracing::debug;

use crate::columns::{row_from_record, ColumnSpec};

/// Discards every record, optionally logging its row projection.
pub struct NoopLoader {
    input_key_path: Option<KeyPath>,
    columns: Vec<ColumnSpec>,
    log: bool,
}

impl NoopLoader {
    pub fn new() -> Self {
        Self {
            input_key_path: None,
            columns: Vec::new(),
            log: false,
        }
    }

    pub fn with_logging(input_key_path: Option<KeyPath>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            input_key_path,
            columns,
            log: true,
        }
    }
}

impl Default for NoopLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for NoopLoader {
    fn name(&self) -> &str {
        "noop-loader"
    }
}

#[async_trait]
impl Loader for NoopLoader {
    async fn load(&mut self, _job_id: &str, items: Vec<Record>, _last_call: bool) -> Result<()> {
        if self.log {
            for item in &items {
                let row = row_from_record(item, self.input_key_path.as_ref(), &self.columns);
                debug!(?row, "item loaded");
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Gate for a [`ConditionalLoader`]: a fixed flag or a predicate evaluated
/// on every call.
#[derive(Clone)]
pub enum Condition {
    Flag(bool),
    Predicate(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Condition {
    fn check(&self) -> bool {
        match self {
            Condition::Flag(flag) => *flag,
            Condition::Predicate(predicate) => predicate(),
        }
    }
}

impl From<bool> for Condition {
    fn from(flag: bool) -> Self {
        Condition::Flag(flag)
    }
}

/// Wraps another loader and gates every method on a condition. A gated-off
/// `load_with_ack` still settles the ack counter.
pub struct ConditionalLoader {
    condition: Condition,
    inner: Box<dyn Loader>,
    else_log: bool,
}

impl ConditionalLoader {
    pub fn new(condition: impl Into<Condition>, inner: Box<dyn Loader>) -> Self {
        Self {
            condition: condition.into(),
            inner,
            else_log: false,
        }
    }

    /// Log discarded items when the gate is off.
    pub fn else_log(mut self) -> Self {
        self.else_log = true;
        self
    }
}

impl Operator for ConditionalLoader {
    fn name(&self) -> &str {
        "conditional-loader"
    }
}

#[async_trait]
impl Loader for ConditionalLoader {
    async fn load(&mut self, job_id: &str, items: Vec<Record>, last_call: bool) -> Result<()> {
        if self.condition.check() {
            self.inner.load(job_id, items, last_call).await
        } else {
            if self.else_log {
                debug!(count = items.len(), "items discarded by gate");
            }
            Ok(())
        }
    }

    async fn load_with_ack(
        &mut self,
        job_id: &str,
        items: Vec<Record>,
        ack: &AckCounter,
        last_call: bool,
    ) -> Result<()> {
        if self.condition.check() {
            self.inner.load_with_ack(job_id, items, ack, last_call).await
        } else {
            if self.else_log {
                debug!(count = items.len(), "items discarded by gate");
            }
            ack.sub(items.len() as i64);
            Ok(())
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.condition.check() {
            self.inner.close().await
        } else {
            Ok(())
        }
    }

    fn has_buffered_data(&self) -> bool {
        self.condition.check() && self.inner.has_buffered_data()
    }
}
