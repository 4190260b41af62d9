//! Round-robin fan-out of batches over inner loaders.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use retl_core::error::EtlError;
use retl_core::record::Record;
use retl_core::rotary::RotaryIter;
use retl_core::worker::{block_join, spawn_worker, ExecutorKind, Worker};
use retl_core::{AckCounter, Loader, Operator};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MIN_SLOT_QUEUE_CAPACITY: usize = 100;

type Batch = (bool, Vec<Record>);

struct Slot {
    queue_capacity: usize,
    loader: Option<Box<dyn Loader>>,
}

/// A loader that spreads batches round-robin over N inner loaders, each
/// running behind its own bounded queue in its own worker.
///
/// The balancer buffers incoming records and, on a full buffer or
/// `last_call`, enqueues the batch on the first queue accepting it in rotary
/// order. Ack decrements are deferred until the batch is handed over. Order
/// is preserved within each inner loader's stream only.
pub struct LoadBalancer {
    slots: Vec<Slot>,
    buffer_size: usize,
    buffer: Vec<Record>,
    ack_dec: i64,
    senders: Vec<mpsc::Sender<Batch>>,
    rotary: RotaryIter,
    workers: Vec<Worker>,
    closed: CancellationToken,
    executor: ExecutorKind,
    queue_no_block_timeout: Duration,
    queue_block_timeout: Duration,
    started: bool,
}

impl LoadBalancer {
    /// `loaders` pairs each inner loader with its queue capacity. At least
    /// two inner loaders are required.
    pub fn new(
        loaders: Vec<(usize, Box<dyn Loader>)>,
        buffer_size: usize,
    ) -> Result<Self, EtlError> {
        if loaders.len() < 2 {
            return Err(EtlError::Config(
                "at least two loaders should be passed to the load balancer".into(),
            ));
        }
        let slots: Vec<Slot> = loaders
            .into_iter()
            .map(|(queue_capacity, loader)| Slot {
                queue_capacity,
                loader: Some(loader),
            })
            .collect();
        let rotary = RotaryIter::new(slots.len());
        Ok(Self {
            slots,
            buffer_size: buffer_size.max(1),
            buffer: Vec::new(),
            ack_dec: 0,
            senders: Vec::new(),
            rotary,
            workers: Vec::new(),
            closed: CancellationToken::new(),
            executor: ExecutorKind::Task,
            queue_no_block_timeout: Duration::from_millis(90),
            queue_block_timeout: Duration::from_millis(100),
            started: false,
        })
    }

    pub fn executor(mut self, kind: ExecutorKind) -> Self {
        self.executor = kind;
        self
    }

    fn start(&mut self, job_id: &str) -> Result<()> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let Some(loader) = slot.loader.take() else {
                return Err(EtlError::Config("load balancer already closed".into()).into());
            };
            let (tx, rx) = mpsc::channel(slot.queue_capacity.max(MIN_SLOT_QUEUE_CAPACITY));
            self.senders.push(tx);
            self.workers.push(spawn_worker(
                self.executor,
                &format!("balancer-loader-{idx}"),
                run_slot(idx, job_id.to_owned(), rx, loader, self.closed.clone()),
            )?);
        }
        info!(workers = self.workers.len(), "workers started for load balancing");
        self.started = true;
        Ok(())
    }

    async fn balance(&mut self, ack: Option<&AckCounter>, last_call: bool) {
        let mut batch = std::mem::take(&mut self.buffer);
        loop {
            let idx = self.rotary.next_index();
            match self.senders[idx]
                .send_timeout((last_call, batch), self.queue_no_block_timeout)
                .await
            {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout((_, returned))) => batch = returned,
                Err(SendTimeoutError::Closed((_, returned))) => {
                    warn!(rows = returned.len(), "balancer queue closed, batch lost");
                    break;
                }
            }
        }
        if let Some(ack) = ack {
            ack.sub(self.ack_dec);
        }
        self.ack_dec = 0;
    }

    async fn append(
        &mut self,
        job_id: &str,
        items: Vec<Record>,
        ack: Option<&AckCounter>,
        last_call: bool,
    ) -> Result<()> {
        if !self.started {
            self.start(job_id)?;
        }
        if !items.is_empty() {
            self.ack_dec += items.len() as i64;
            self.buffer.extend(items);
        }
        if last_call || self.buffer.len() >= self.buffer_size {
            self.balance(ack, last_call).await;
            if last_call {
                self.closed.cancel();
            }
        }
        Ok(())
    }
}

async fn run_slot(
    idx: usize,
    job_id: String,
    mut rx: mpsc::Receiver<Batch>,
    mut loader: Box<dyn Loader>,
    closed: CancellationToken,
) -> Result<()> {
    while let Some((last_call, items)) = rx.recv().await {
        let last = last_call || closed.is_cancelled();
        if let Err(e) = loader.load(&job_id, items, last).await {
            error!(slot = idx, error = %e, "balanced loader failed, batch lost");
        }
    }
    if let Err(e) = loader.close().await {
        error!(slot = idx, error = %e, "error closing balanced loader");
    }
    info!(slot = idx, loader = loader.name(), "load balancer slot stopped");
    Ok(())
}

impl Operator for LoadBalancer {
    fn name(&self) -> &str {
        "load-balancer"
    }
}

#[async_trait]
impl Loader for LoadBalancer {
    async fn load(&mut self, job_id: &str, items: Vec<Record>, last_call: bool) -> Result<()> {
        self.append(job_id, items, None, last_call).await
    }

    async fn load_with_ack(
        &mut self,
        job_id: &str,
        items: Vec<Record>,
        ack: &AckCounter,
        last_call: bool,
    ) -> Result<()> {
        self.append(job_id, items, Some(ack), last_call).await
    }

    async fn close(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        info!("closing the load balancer");
        if self.has_buffered_data() {
            info!("flushing buffered data in the load balancer");
            self.balance(None, true).await;
        }
        self.closed.cancel();
        // Dropping the senders lets every slot drain its queue, close its
        // loader and exit.
        self.senders.clear();
        let drained = CancellationToken::new();
        block_join(&mut self.workers, &drained, self.queue_block_timeout).await;
        self.workers.clear();
        self.started = false;
        Ok(())
    }

    fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty()
    }
}
