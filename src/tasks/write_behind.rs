//! Write-Behind Task
//!
//! Background task that batches external-writer calls. Map operations
//! enqueue their mirrored mutations and return immediately; the task flushes
//! a batch when it reaches the configured size or when the delay elapses,
//! whichever comes first. Writer failures are logged and never surface to
//! the operation that queued them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::MapWriter;

// == Write-Behind Op ==
/// One queued mirror operation.
#[derive(Debug, Clone)]
pub enum WriteBehindOp {
    Write { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

// == Write-Behind Queue ==
/// Handle to the background flusher owned by a map instance.
pub struct WriteBehindQueue {
    tx: mpsc::UnboundedSender<WriteBehindOp>,
    task: JoinHandle<()>,
}

impl WriteBehindQueue {
    /// Queues one operation. Silently dropped after shutdown.
    pub fn enqueue(&self, op: WriteBehindOp) {
        let _ = self.tx.send(op);
    }

    /// Closes the queue and waits for the final flush.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

/// Spawns the background flusher for an external writer.
///
/// A batch is flushed once `batch_size` operations are buffered or `delay`
/// has elapsed since the previous flush. Closing the queue flushes whatever
/// remains before the task exits.
pub fn spawn_write_behind_task(
    writer: Arc<dyn MapWriter>,
    batch_size: usize,
    delay: Duration,
) -> WriteBehindQueue {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteBehindOp>();
    let batch_size = batch_size.max(1);

    let task = tokio::spawn(async move {
        info!(batch_size, ?delay, "write-behind task started");
        let mut buffer: Vec<WriteBehindOp> = Vec::new();
        let mut ticker = tokio::time::interval(delay);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                op = rx.recv() => match op {
                    Some(op) => {
                        buffer.push(op);
                        if buffer.len() >= batch_size {
                            flush(&writer, &mut buffer).await;
                        }
                    }
                    None => {
                        flush(&writer, &mut buffer).await;
                        debug!("write-behind queue closed, task exiting");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        flush(&writer, &mut buffer).await;
                    }
                }
            }
        }
    });

    WriteBehindQueue { tx, task }
}

/// Flushes the buffer as runs of same-kind operations, preserving the order
/// in which writes and deletes were queued.
async fn flush(writer: &Arc<dyn MapWriter>, buffer: &mut Vec<WriteBehindOp>) {
    let mut writes: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut deletes: Vec<Vec<u8>> = Vec::new();

    for op in buffer.drain(..) {
        match op {
            WriteBehindOp::Write { key, value } => {
                if !deletes.is_empty() {
                    flush_deletes(writer, &mut deletes).await;
                }
                writes.push((key, value));
            }
            WriteBehindOp::Delete { key } => {
                if !writes.is_empty() {
                    flush_writes(writer, &mut writes).await;
                }
                deletes.push(key);
            }
        }
    }
    flush_writes(writer, &mut writes).await;
    flush_deletes(writer, &mut deletes).await;
}

async fn flush_writes(writer: &Arc<dyn MapWriter>, writes: &mut Vec<(Vec<u8>, Vec<u8>)>) {
    if writes.is_empty() {
        return;
    }
    let batch = std::mem::take(writes);
    let size = batch.len();
    if let Err(error) = writer.write_batch(batch).await {
        warn!(%error, size, "write-behind write batch failed");
    } else {
        debug!(size, "write-behind write batch flushed");
    }
}

async fn flush_deletes(writer: &Arc<dyn MapWriter>, deletes: &mut Vec<Vec<u8>>) {
    if deletes.is_empty() {
        return;
    }
    let batch = std::mem::take(deletes);
    let size = batch.len();
    if let Err(error) = writer.delete_batch(batch).await {
        warn!(%error, size, "write-behind delete batch failed");
    } else {
        debug!(size, "write-behind delete batch flushed");
    }
}
