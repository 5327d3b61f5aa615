use super::tier::{BufferSelector, PmemTier, TierStatus};
use crate::config::TierConfig;
use crate::core::{PmemError, Result};
use crate::storage::{BufferSlot, LoggedCommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, event, info_span};

/// Shared, cloneable front end to a [`PmemTier`].
///
/// Commands are serialized through one async mutex, which gives the tier
/// the single-writer discipline it relies on.
#[derive(Clone)]
pub struct TierHandle {
    inner: Arc<Mutex<PmemTier>>,
}

impl TierHandle {
    pub fn new(tier: PmemTier) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tier)),
        }
    }

    /// Open the tier on a blocking thread; reconstruction does file I/O
    pub async fn open(config: TierConfig) -> Result<Self> {
        let tier = tokio::task::spawn_blocking(move || PmemTier::open(config))
            .await
            .map_err(|e| PmemError::Io(format!("Tier open task failed: {}", e)))??;
        Ok(Self::new(tier))
    }

    /// Exclusive access for anything the async surface does not cover
    pub async fn lock(&self) -> MutexGuard<'_, PmemTier> {
        self.inner.lock().await
    }

    pub async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.lock().await.set(key, value)
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.lock().await.get(key)
    }

    pub async fn del(&self, key: &[u8]) -> Result<bool> {
        self.inner.lock().await.del(key)
    }

    pub async fn append_command(&self, command: &LoggedCommand) -> Result<()> {
        self.inner.lock().await.append_command(command).map(|_| ())
    }

    pub async fn switch_buffers(&self) -> Result<BufferSlot> {
        self.inner.lock().await.switch_buffers()
    }

    pub async fn buffer_commands(&self, which: BufferSelector) -> Result<Vec<LoggedCommand>> {
        self.inner.lock().await.buffer_commands(which)
    }

    pub async fn flush_log(&self) -> Result<usize> {
        self.inner.lock().await.flush_log()
    }

    pub async fn evict_one(&self) -> Result<Option<Vec<u8>>> {
        self.inner.lock().await.evict_one()
    }

    pub async fn evict_batch(&self, count: usize) -> Result<usize> {
        self.inner.lock().await.evict_batch(count)
    }

    pub async fn flush_victims(&self) -> Result<usize> {
        self.inner.lock().await.flush_victims()
    }

    pub async fn status(&self) -> TierStatus {
        self.inner.lock().await.status()
    }

    /// Periodically drain the log into the AOF.
    ///
    /// Each tick switches buffers under the lock and writes the retired
    /// generation out; producers keep appending to the new current buffer.
    /// Stopping the flusher runs one last drain.
    pub fn spawn_log_flusher(&self, interval: Duration) -> LogFlusher {
        let (shutdown, mut stop) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let span = info_span!("log_flusher", interval_ms = interval.as_millis() as u64);

        let task = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = &mut stop => break,
                        _ = ticker.tick() => drain_once(&inner).await,
                    }
                }
                drain_once(&inner).await;
                event!(Level::DEBUG, "log flusher stopped");
            }
            .instrument(span),
        );

        LogFlusher { shutdown, task }
    }
}

async fn drain_once(inner: &Mutex<PmemTier>) {
    let mut tier = inner.lock().await;
    match tier.flush_log() {
        Ok(0) => {}
        Ok(drained) => event!(Level::DEBUG, drained, "log generation written to the AOF"),
        Err(err) => event!(Level::ERROR, error = %err, "log flush failed"),
    }
}

/// Background log flush task started by [`TierHandle::spawn_log_flusher`]
pub struct LogFlusher {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LogFlusher {
    /// Stop the task after a final drain and wait for it
    pub async fn shutdown(self) -> Result<()> {
        // The task may already be gone; the join below reports why.
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|e| PmemError::Io(format!("Log flusher task failed: {}", e)))
    }
}
