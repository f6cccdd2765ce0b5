use crate::blockchain::models::{extract_records, RpcReceipt};
use crate::error::IndexerError;
use crate::models::{BlockContext, DerivedRecords};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct DeriveJob {
    pub context: BlockContext,
    pub receipts: Vec<RpcReceipt>,
    pub reply: oneshot::Sender<DerivedRecords>,
}

pub struct WorkerPool {
    size: usize,
    workers: Mutex<Vec<WorkerHandle>>,
    sender: mpsc::Sender<DeriveJob>,
    stop: CancellationToken,
}

struct WorkerHandle {
    id: usize,
    handle: tokio::task::JoinHandle<()>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::channel(1000);
        let receiver = Arc::new(Mutex::new(receiver));
        let stop = CancellationToken::new();

        let mut workers = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let worker_receiver = receiver.clone();
            let worker_stop = stop.clone();

            let handle = tokio::spawn(async move {
                let worker = Worker::new(id, worker_receiver, worker_stop);
                worker.run().await;
            });

            workers.push(WorkerHandle { id, handle });
        }

        info!("Started derivation worker pool with {} workers", worker_count);

        Self {
            size: worker_count,
            workers: Mutex::new(workers),
            sender,
            stop,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// True once every worker has exited.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Slices are merged back in receipt order.
    pub async fn derive(
        &self,
        context: BlockContext,
        receipts: Vec<RpcReceipt>,
        batch_size: usize,
    ) -> Result<DerivedRecords, IndexerError> {
        let mut replies = Vec::new();

        for chunk in receipts.chunks(batch_size.max(1)) {
            let (reply, response) = oneshot::channel();
            let job = DeriveJob {
                context,
                receipts: chunk.to_vec(),
                reply,
            };
            self.sender
                .send(job)
                .await
                .map_err(|_| IndexerError::WorkerPoolClosed)?;
            replies.push(response);
        }

        let mut records = DerivedRecords::default();
        for response in replies {
            let batch = response.await.map_err(|_| IndexerError::WorkerPoolClosed)?;
            records.extend(batch);
        }
        Ok(records)
    }

    /// Stop every worker and wait for it to exit. Later `derive` calls fail
    /// with `WorkerPoolClosed`.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.handle.await {
                debug!("Worker {} ended abnormally: {}", worker.id, e);
            }
        }
    }
}

struct Worker {
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<DeriveJob>>>,
    stop: CancellationToken,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<DeriveJob>>>, stop: CancellationToken) -> Self {
        Self { id, receiver, stop }
    }

    async fn run(&self) {
        debug!("Worker {} started", self.id);

        loop {
            let job = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    job = receiver.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                    _ = self.stop.cancelled() => break,
                }
            };

            let records = extract_records(&job.context, &job.receipts);
            // The requester may have given up on the block; nothing to do then.
            let _ = job.reply.send(records);
        }

        debug!("Worker {} shutting down", self.id);
    }
}
