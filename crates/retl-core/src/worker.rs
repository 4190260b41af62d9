//! Stage worker execution and join helpers.
//!
//! A worker is either a dedicated OS thread driving its own current-thread
//! runtime (the default, suited to CPU-bound transformer chains) or a
//! cooperative task on the shared multi-thread runtime (suited to
//! I/O-dominated stages). Behaviour is invariant across kinds; queues and
//! cancellation work identically in both.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a stage worker is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Dedicated OS thread.
    #[default]
    Thread,
    /// Cooperative task on the shared runtime.
    Task,
}

enum Handle {
    Task(tokio::task::JoinHandle<Result<()>>),
    Thread(std::thread::JoinHandle<Result<()>>),
}

/// A running stage worker.
pub struct Worker {
    name: String,
    handle: Option<Handle>,
}

/// Spawn `fut` as a worker of the given kind.
///
/// Must be called from within a tokio runtime; thread workers get their own
/// single-threaded runtime so queue timeouts keep working off the shared one.
pub fn spawn_worker<F>(kind: ExecutorKind, name: &str, fut: F) -> Result<Worker>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let handle = match kind {
        ExecutorKind::Task => Handle::Task(tokio::spawn(fut)),
        ExecutorKind::Thread => {
            let thread = std::thread::Builder::new()
                .name(name.to_owned())
                .spawn(move || {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_time()
                        .build()?;
                    rt.block_on(fut)
                })?;
            Handle::Thread(thread)
        }
    };
    Ok(Worker {
        name: name.to_owned(),
        handle: Some(handle),
    })
}

impl Worker {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        match &self.handle {
            Some(Handle::Task(h)) => h.is_finished(),
            Some(Handle::Thread(h)) => h.is_finished(),
            None => true,
        }
    }

    /// Abort a task worker. Thread workers stop only through the shared
    /// cancellation token they poll at every queue wait.
    pub fn kill(&self) {
        if let Some(Handle::Task(h)) = &self.handle {
            h.abort();
        }
    }

    async fn reap(&mut self) {
        match self.handle.take() {
            None => {}
            Some(Handle::Task(h)) => match h.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(worker = %self.name, error = %e, "worker exited with error"),
                Err(e) if e.is_cancelled() => debug!(worker = %self.name, "worker aborted"),
                Err(e) => warn!(worker = %self.name, error = %e, "worker panicked"),
            },
            Some(Handle::Thread(h)) => match h.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(worker = %self.name, error = %e, "worker exited with error"),
                Err(_) => warn!(worker = %self.name, "worker panicked"),
            },
        }
    }
}

/// Polling join over a set of workers.
///
/// Logs each member as it completes. Once `interrupt_on` fires, remaining
/// task workers are killed instead of awaited; thread workers are expected
/// to observe the same token and exit on their own.
pub async fn block_join(
    workers: &mut [Worker],
    interrupt_on: &CancellationToken,
    join_timeout: Duration,
) {
    loop {
        let mut pending = false;
        for worker in workers.iter_mut() {
            if worker.handle.is_none() {
                continue;
            }
            if interrupt_on.is_cancelled() {
                worker.kill();
            }
            if worker.is_finished() {
                worker.reap().await;
                debug!(worker = %worker.name, "worker joined");
            } else {
                pending = true;
            }
        }
        if !pending {
            return;
        }
        tokio::time::sleep(join_timeout).await;
    }
}
