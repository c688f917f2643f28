use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::relay_modules::pipeline::{AlertPipeline, ReceivedChunk};

pub const DEFAULT_WORKER_COUNT: usize = 8;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Fixed set of tasks running the alert pipeline on chunks read from the
/// socket. The queue is bounded, so a saturated pool slows the reader down
/// instead of piling up tasks.
pub struct WorkerPool {
    chunks_tx: mpsc::Sender<ReceivedChunk>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(pipeline: Arc<AlertPipeline>, worker_count: usize, queue_capacity: usize) -> Self {
        let (chunks_tx, chunks_rx) = mpsc::channel(queue_capacity.max(1));
        let chunks_rx = Arc::new(Mutex::new(chunks_rx));

        let handles = (0..worker_count.max(1))
            .map(|worker_id| {
                let pipeline = Arc::clone(&pipeline);
                let chunks_rx = Arc::clone(&chunks_rx);
                tokio::spawn(async move {
                    worker_loop(worker_id, pipeline, chunks_rx).await;
                })
            })
            .collect();

        Self { chunks_tx, handles }
    }

    /// Handle for the connection task to queue chunks with.
    pub fn sender(&self) -> mpsc::Sender<ReceivedChunk> {
        self.chunks_tx.clone()
    }

    /// Closes the queue and waits for the workers to finish what is already
    /// queued or in flight. Every other sender must have been dropped first.
    pub async fn shutdown(self) {
        drop(self.chunks_tx);
        for result in futures::future::join_all(self.handles).await {
            if let Err(join_error) = result {
                error!(error = ?join_error, "A pipeline worker panicked.");
            }
        }
        info!("All pipeline workers finished.");
    }
}

async fn worker_loop(
    worker_id: usize,
    pipeline: Arc<AlertPipeline>,
    chunks_rx: Arc<Mutex<mpsc::Receiver<ReceivedChunk>>>,
) {
    loop {
        let next = chunks_rx.lock().await.recv().await;
        let Some(chunk) = next else {
            break;
        };
        debug!(
            worker_id,
            received = ?chunk.data,
            queued_ms = chunk.received_at.elapsed().as_millis() as u64,
            "Processing chunk."
        );
        pipeline.handle_chunk(&chunk).await;
    }
    debug!(worker_id, "Pipeline worker stopped.");
}
