//! Pipeline supervisor: bounded-queue dataflow and worker lifecycle.
//!
//! A pipeline owns one extractor, an ordered transformer chain and one or
//! more loaders. The supervisor wires them with bounded queues, spawns one
//! worker per stage instance, and orchestrates the drain:
//!
//! ```text
//! extractor -> [K input queues] -> K transformer workers
//!           -> [L output queues, fan-out-all] -> L loader workers
//! ```
//!
//! Termination is deterministic: each stage owns the only senders of its
//! downstream queues and drops them on exit, so a `recv() == None` on the
//! consumer side means "upstream finished and the queue is drained".

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::EtlError;
use crate::record::{Context, Record};
use crate::rotary::RotaryIter;
use crate::worker::{block_join, spawn_worker, ExecutorKind, Worker};
use crate::{flat_map_apply, AckCounter, Extractor, Loader, Operator, Transformer};

/// Tuning knobs for one pipeline. Out-of-range values are clamped, not
/// rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Number of parallel transformer-chain workers (K). Minimum 1.
    pub max_transformation_pipelines: usize,
    /// Per-transformer input queue capacity. Minimum 1000. Output queues are
    /// sized `K * trans_in_queue_max_size`.
    pub trans_in_queue_max_size: usize,
    /// Blocking dequeue poll interval. Minimum 100ms.
    pub queue_block_timeout: Duration,
    /// Non-blocking enqueue timeout. Minimum 10ms.
    pub queue_no_block_timeout: Duration,
    pub extractor_executor: ExecutorKind,
    pub transformer_executor: ExecutorKind,
    pub loader_executor: ExecutorKind,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_transformation_pipelines: 5,
            trans_in_queue_max_size: 1_000,
            queue_block_timeout: Duration::from_millis(100),
            queue_no_block_timeout: Duration::from_millis(50),
            extractor_executor: ExecutorKind::Thread,
            transformer_executor: ExecutorKind::Thread,
            loader_executor: ExecutorKind::Thread,
        }
    }
}

impl PipelineOptions {
    fn clamped(mut self) -> Self {
        self.max_transformation_pipelines = self.max_transformation_pipelines.max(1);
        self.trans_in_queue_max_size = self.trans_in_queue_max_size.max(1_000);
        self.queue_block_timeout = self.queue_block_timeout.max(Duration::from_millis(100));
        self.queue_no_block_timeout = self.queue_no_block_timeout.max(Duration::from_millis(10));
        self
    }
}

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelinePhase {
    Created = 0,
    Starting,
    Running,
    /// Extractor drained and joined.
    ExtractorDrained,
    /// Transformer workers drained and joined.
    TransformersDrained,
    /// Loader workers flushed, closed and joined.
    LoadersDrained,
    Closed,
    Interrupted,
}

impl PipelinePhase {
    fn from_u8(v: u8) -> PipelinePhase {
        match v {
            0 => PipelinePhase::Created,
            1 => PipelinePhase::Starting,
            2 => PipelinePhase::Running,
            3 => PipelinePhase::ExtractorDrained,
            4 => PipelinePhase::TransformersDrained,
            5 => PipelinePhase::LoadersDrained,
            6 => PipelinePhase::Closed,
            _ => PipelinePhase::Interrupted,
        }
    }
}

/// Shared counters polled by the workers and the supervisor. Readers
/// tolerate stale values; they only delay termination.
#[derive(Debug)]
pub struct PipelineState {
    started: AtomicBool,
    extractor_finished: AtomicBool,
    transformation_pipelines_alive: AtomicUsize,
    loaders_alive: AtomicUsize,
    failed: AtomicBool,
    phase: AtomicU8,
    cancel: CancellationToken,
}

impl PipelineState {
    fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            extractor_finished: AtomicBool::new(false),
            transformation_pipelines_alive: AtomicUsize::new(0),
            loaders_alive: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            phase: AtomicU8::new(PipelinePhase::Created as u8),
            cancel: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        PipelinePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: PipelinePhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// True once the `pipeline_closed` flag has been raised.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Raise the `pipeline_closed` flag: workers stop at their next queue
    /// wait and the supervisor tears the pipeline down.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn fail(&self) {
        self.failed.store(true, Ordering::Release);
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Interrupted,
    Failed,
}

/// Returned by [`PipelineHandle::join`] and logged as the run summary line.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub job_id: String,
    pub outcome: PipelineOutcome,
    pub duration: Duration,
}

/// A configured, not-yet-started pipeline.
pub struct Pipeline {
    job_id: String,
    extractor: Box<dyn Extractor>,
    transformers: Vec<Arc<dyn Transformer>>,
    loaders: Vec<Box<dyn Loader>>,
    opts: PipelineOptions,
    state: Arc<PipelineState>,
}

impl Pipeline {
    /// Validate and assemble a pipeline. Fails fast on an empty transformer
    /// or loader list; use `Passthrough` / `NoopLoader` for no-op slots.
    pub fn new(
        extractor: Box<dyn Extractor>,
        transformers: Vec<Arc<dyn Transformer>>,
        loaders: Vec<Box<dyn Loader>>,
        opts: PipelineOptions,
    ) -> Result<Self, EtlError> {
        if transformers.is_empty() {
            return Err(EtlError::Config(
                "at least one transformer is required; use Passthrough for a no-op chain".into(),
            ));
        }
        if loaders.is_empty() {
            return Err(EtlError::Config(
                "at least one loader is required; use NoopLoader to discard output".into(),
            ));
        }
        Ok(Self {
            job_id: Uuid::new_v4().to_string(),
            extractor,
            transformers,
            loaders,
            opts: opts.clamped(),
            state: Arc::new(PipelineState::new()),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Spawn the supervisor and all stage workers. Must be called from
    /// within a tokio runtime.
    pub fn start(self) -> PipelineHandle {
        let job_id = self.job_id.clone();
        let state = self.state.clone();
        let supervisor = tokio::spawn(self.supervise());
        PipelineHandle {
            job_id,
            state,
            supervisor,
        }
    }

    /// Convenience for `start()` followed by `join()`.
    pub async fn run(self) -> Result<PipelineSummary> {
        self.start().join().await
    }

    async fn supervise(self) -> Result<PipelineSummary> {
        let Pipeline {
            job_id,
            extractor,
            transformers,
            loaders,
            opts,
            state,
        } = self;
        let started_at = Instant::now();
        state.set_phase(PipelinePhase::Starting);

        let fanout = opts.max_transformation_pipelines;
        let in_capacity = opts.trans_in_queue_max_size;
        let out_capacity = in_capacity * fanout;

        let mut in_txs = Vec::with_capacity(fanout);
        let mut in_rxs = Vec::with_capacity(fanout);
        for _ in 0..fanout {
            let (tx, rx) = mpsc::channel::<Record>(in_capacity);
            in_txs.push(tx);
            in_rxs.push(rx);
        }
        let mut out_txs = Vec::with_capacity(loaders.len());
        let mut out_rxs = Vec::with_capacity(loaders.len());
        for _ in 0..loaders.len() {
            let (tx, rx) = mpsc::channel::<Record>(out_capacity);
            out_txs.push(tx);
            out_rxs.push(rx);
        }

        let mut extract_workers = vec![spawn_worker(
            opts.extractor_executor,
            "extractor",
            extract_items(
                extractor,
                in_txs,
                state.clone(),
                opts.queue_no_block_timeout,
            ),
        )?];
        info!(job_id = %job_id, "1 extraction worker created");

        state
            .transformation_pipelines_alive
            .store(fanout, Ordering::Release);
        let mut trans_workers = Vec::with_capacity(fanout);
        for (idx, in_rx) in in_rxs.into_iter().enumerate() {
            trans_workers.push(spawn_worker(
                opts.transformer_executor,
                &format!("transformer-{idx}"),
                transform_items(
                    in_rx,
                    out_txs.clone(),
                    transformers.clone(),
                    state.clone(),
                    opts.queue_no_block_timeout,
                ),
            )?);
        }
        // The transformer workers now hold the only output-queue senders;
        // dropping ours makes loader-side recv()==None mean "all drained".
        drop(out_txs);
        info!(job_id = %job_id, "{fanout} transformation workers created");

        state.loaders_alive.store(loaders.len(), Ordering::Release);
        let mut load_workers = Vec::with_capacity(loaders.len());
        for (idx, (out_rx, loader)) in out_rxs.into_iter().zip(loaders).enumerate() {
            load_workers.push(spawn_worker(
                opts.loader_executor,
                &format!("loader-{idx}"),
                load_items(job_id.clone(), out_rx, loader, state.clone()),
            )?);
        }
        info!(job_id = %job_id, "{} loader workers created", load_workers.len());

        state.started.store(true, Ordering::Release);
        state.set_phase(PipelinePhase::Running);
        info!(job_id = %job_id, "pipeline running");

        let mut extractor_joined = false;
        let mut transformers_joined = false;
        let mut loaders_joined = false;
        let mut interrupted = false;
        loop {
            if !extractor_joined && state.extractor_finished.load(Ordering::Acquire) {
                block_join(&mut extract_workers, &state.cancel, opts.queue_block_timeout).await;
                extractor_joined = true;
                state.set_phase(PipelinePhase::ExtractorDrained);
                info!(job_id = %job_id, "extraction worker joined");
            }
            if !transformers_joined
                && state
                    .transformation_pipelines_alive
                    .load(Ordering::Acquire)
                    == 0
            {
                block_join(&mut trans_workers, &state.cancel, opts.queue_block_timeout).await;
                transformers_joined = true;
                state.set_phase(PipelinePhase::TransformersDrained);
                info!(job_id = %job_id, "transformation workers joined, waiting for loaders to finish");
            }
            if !loaders_joined && state.loaders_alive.load(Ordering::Acquire) == 0 {
                block_join(&mut load_workers, &state.cancel, opts.queue_block_timeout).await;
                loaders_joined = true;
                state.set_phase(PipelinePhase::LoadersDrained);
                info!(job_id = %job_id, "loader workers joined");
            }
            if extractor_joined && transformers_joined && loaders_joined {
                break;
            }
            if state.is_closed() {
                interrupted = true;
                warn!(job_id = %job_id, "pipeline interrupted, tearing workers down");
                block_join(&mut extract_workers, &state.cancel, opts.queue_no_block_timeout).await;
                block_join(&mut trans_workers, &state.cancel, opts.queue_no_block_timeout).await;
                // Give loaders a chance to flush what they buffered: join
                // them without the kill switch, bounded by a watchdog.
                let watchdog = CancellationToken::new();
                let drain = block_join(&mut load_workers, &watchdog, opts.queue_no_block_timeout);
                if tokio::time::timeout(Duration::from_secs(1), drain)
                    .await
                    .is_err()
                {
                    warn!(job_id = %job_id, "loader teardown exceeded the close watchdog, killing");
                    block_join(&mut load_workers, &state.cancel, opts.queue_no_block_timeout)
                        .await;
                }
                break;
            }
            tokio::time::sleep(opts.queue_block_timeout).await;
        }

        state.cancel.cancel();
        let outcome = if state.failed.load(Ordering::Acquire) {
            state.set_phase(PipelinePhase::Interrupted);
            PipelineOutcome::Failed
        } else if interrupted {
            state.set_phase(PipelinePhase::Interrupted);
            PipelineOutcome::Interrupted
        } else {
            state.set_phase(PipelinePhase::Closed);
            PipelineOutcome::Completed
        };
        let summary = PipelineSummary {
            job_id: job_id.clone(),
            outcome,
            duration: started_at.elapsed(),
        };
        info!(
            job_id = %job_id,
            outcome = ?summary.outcome,
            duration_ms = summary.duration.as_millis() as u64,
            "pipeline finished"
        );
        Ok(summary)
    }
}

/// A running pipeline. Dropping the handle does not stop the run.
pub struct PipelineHandle {
    job_id: String,
    state: Arc<PipelineState>,
    supervisor: tokio::task::JoinHandle<Result<PipelineSummary>>,
}

impl PipelineHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> Arc<PipelineState> {
        self.state.clone()
    }

    /// External stop signal: raise `pipeline_closed` and let the supervisor
    /// tear the workers down.
    pub fn shutdown(&self) {
        self.state.stop();
    }

    /// Wait for the supervisor to finish and return the run summary.
    pub async fn join(self) -> Result<PipelineSummary> {
        self.supervisor.await?
    }
}

async fn extract_items(
    mut extractor: Box<dyn Extractor>,
    in_txs: Vec<mpsc::Sender<Record>>,
    state: Arc<PipelineState>,
    no_block_timeout: Duration,
) -> Result<()> {
    let res = extract_loop(extractor.as_mut(), &in_txs, &state, no_block_timeout).await;
    // Senders drop with this future; transformers drain whatever was queued.
    state.extractor_finished.store(true, Ordering::Release);
    match res {
        Ok(()) => info!("extractor finished its work"),
        Err(e) => {
            error!(error = %e, "extraction failed");
            state.fail();
        }
    }
    Ok(())
}

async fn extract_loop(
    extractor: &mut dyn Extractor,
    in_txs: &[mpsc::Sender<Record>],
    state: &PipelineState,
    no_block_timeout: Duration,
) -> Result<()> {
    let mut rotary = RotaryIter::new(in_txs.len());
    let records = extractor.extract()?;
    for item in records {
        let mut pending = Some(item?);
        while let Some(record) = pending.take() {
            if state.is_started() && state.is_closed() {
                return Ok(());
            }
            let idx = rotary.next_index();
            match in_txs[idx].send_timeout(record, no_block_timeout).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(record)) => pending = Some(record),
                Err(SendTimeoutError::Closed(_)) => {
                    return Err(EtlError::ChannelClosed("transformer input queue").into());
                }
            }
        }
    }
    Ok(())
}

async fn transform_items(
    mut in_rx: mpsc::Receiver<Record>,
    out_txs: Vec<mpsc::Sender<Record>>,
    chain: Vec<Arc<dyn Transformer>>,
    state: Arc<PipelineState>,
    no_block_timeout: Duration,
) -> Result<()> {
    let res = transform_loop(&mut in_rx, &out_txs, &chain, &state, no_block_timeout).await;
    state
        .transformation_pipelines_alive
        .fetch_sub(1, Ordering::AcqRel);
    match res {
        Ok(()) => info!("a transformation worker finished its work"),
        Err(e) => {
            error!(error = %e, "transformation failed");
            state.fail();
        }
    }
    Ok(())
}

async fn transform_loop(
    in_rx: &mut mpsc::Receiver<Record>,
    out_txs: &[mpsc::Sender<Record>],
    chain: &[Arc<dyn Transformer>],
    state: &PipelineState,
    no_block_timeout: Duration,
) -> Result<()> {
    loop {
        let item = tokio::select! {
            _ = state.cancel.cancelled() => return Ok(()),
            item = in_rx.recv() => match item {
                Some(item) => item,
                None => return Ok(()),
            },
        };
        let mut ctx = Context::new();
        let outputs = flat_map_apply(item, chain, &mut ctx)?;
        if outputs.is_empty() {
            debug!("transformer chain yielded nothing for an input record");
            continue;
        }
        for record in outputs {
            // Fan the same record out to every loader queue; a pending-index
            // set avoids head-of-line blocking on one slow sink.
            let mut pending: Vec<usize> = (0..out_txs.len()).collect();
            while !pending.is_empty() {
                if state.is_closed() {
                    return Ok(());
                }
                let mut still_pending = Vec::with_capacity(pending.len());
                for idx in pending {
                    match out_txs[idx]
                        .send_timeout(record.clone(), no_block_timeout)
                        .await
                    {
                        Ok(()) => {}
                        Err(SendTimeoutError::Timeout(_)) => still_pending.push(idx),
                        Err(SendTimeoutError::Closed(_)) => {
                            debug!(queue = idx, "loader queue closed before fan-out completed");
                        }
                    }
                }
                pending = still_pending;
            }
        }
    }
}

async fn load_items(
    job_id: String,
    mut out_rx: mpsc::Receiver<Record>,
    mut loader: Box<dyn Loader>,
    state: Arc<PipelineState>,
) -> Result<()> {
    let ack = AckCounter::new();
    let res: Result<()> = async {
        loop {
            tokio::select! {
                _ = state.cancel.cancelled() => return Ok(()),
                item = out_rx.recv() => match item {
                    Some(record) => {
                        ack.add(1);
                        loader.load_with_ack(&job_id, vec![record], &ack, false).await?;
                    }
                    None => {
                        // All transformer workers exited and the queue is
                        // drained: tell the loader no further batches come.
                        loader.load(&job_id, Vec::new(), true).await?;
                        return Ok(());
                    }
                },
            }
        }
    }
    .await;
    if let Err(e) = res {
        error!(loader = loader.name(), error = %e, "loading failed");
        state.fail();
    }
    info!(loader = loader.name(), "closing loader");
    if let Err(e) = loader.close().await {
        error!(loader = loader.name(), error = %e, "error closing loader");
    }
    state.loaders_alive.fetch_sub(1, Ordering::AcqRel);
    info!(loader = loader.name(), "a loader worker finished its work");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_are_clamped() {
        let opts = PipelineOptions {
            max_transformation_pipelines: 0,
            trans_in_queue_max_size: 10,
            queue_block_timeout: Duration::from_millis(1),
            queue_no_block_timeout: Duration::from_millis(1),
            ..Default::default()
        }
        .clamped();
        assert_eq!(opts.max_transformation_pipelines, 1);
        assert_eq!(opts.trans_in_queue_max_size, 1_000);
        assert_eq!(opts.queue_block_timeout, Duration::from_millis(100));
        assert_eq!(opts.queue_no_block_timeout, Duration::from_millis(10));
    }

    #[test]
    fn phase_round_trips() {
        for phase in [
            PipelinePhase::Created,
            PipelinePhase::Starting,
            PipelinePhase::Running,
            PipelinePhase::ExtractorDrained,
            PipelinePhase::TransformersDrained,
            PipelinePhase::LoadersDrained,
            PipelinePhase::Closed,
            PipelinePhase::Interrupted,
        ] {
            assert_eq!(PipelinePhase::from_u8(phase as u8), phase);
        }
    }
}
