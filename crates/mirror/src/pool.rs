//! Worker pool and dispatcher.

use crate::client::UpstreamClient;
use crate::worker::{WorkResult, Worker};
use pantry_catalog::PendingPackage;
use pantry_core::WORK_QUEUE_DEPTH;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// A bounded pool of mirror workers with a dispatcher coupling the
/// work queue to idle workers.
///
/// The dispatcher takes one job from the work queue, waits for an
/// idle worker's personal channel, and forwards the job. In-flight
/// jobs therefore never exceed the pool width, and a full work queue
/// throttles the producer.
pub struct WorkerPool {
    work_tx: mpsc::Sender<PendingPackage>,
    quit_txs: Vec<mpsc::Sender<()>>,
    workers: JoinSet<()>,
    dispatcher: JoinHandle<()>,
}

impl WorkerPool {
    /// Spawn `width` workers and the dispatcher.
    pub fn start(
        client: &Arc<UpstreamClient>,
        width: usize,
        result_tx: mpsc::Sender<WorkResult>,
    ) -> Self {
        let (work_tx, work_rx) = mpsc::channel(WORK_QUEUE_DEPTH);
        let (idle_tx, idle_rx) = mpsc::channel(width);

        tracing::debug!(width, "starting workers");
        let mut workers = JoinSet::new();
        let mut quit_txs = Vec::with_capacity(width);
        for id in 0..width {
            let (quit_tx, quit_rx) = mpsc::channel(1);
            quit_txs.push(quit_tx);
            let worker = Worker::new(
                id,
                client.clone(),
                idle_tx.clone(),
                result_tx.clone(),
                quit_rx,
            );
            workers.spawn(worker.run());
        }
        drop(idle_tx);

        let dispatcher = tokio::spawn(dispatch(work_rx, idle_rx));

        Self {
            work_tx,
            quit_txs,
            workers,
            dispatcher,
        }
    }

    /// Queue one package; blocks when the work queue is full.
    pub async fn dispatch(&self, package: PendingPackage) -> bool {
        self.work_tx.send(package).await.is_ok()
    }

    /// Stop the pool once every dispatched job has produced a result.
    ///
    /// Teardown order: the work queue closes first, then each worker
    /// is signalled and awaited, and the result channel closes when
    /// the last worker drops its sender.
    pub async fn shutdown(mut self) {
        drop(self.work_tx);
        tracing::debug!(count = self.quit_txs.len(), "stopping workers");
        for quit in &self.quit_txs {
            let _ = quit.send(()).await;
        }
        while self.workers.join_next().await.is_some() {}
        let _ = self.dispatcher.await;
    }
}

async fn dispatch(
    mut work_rx: mpsc::Receiver<PendingPackage>,
    mut idle_rx: mpsc::Receiver<mpsc::Sender<PendingPackage>>,
) {
    while let Some(package) = work_rx.recv().await {
        let Some(worker) = idle_rx.recv().await else {
            break;
        };
        if worker.send(package).await.is_err() {
            break;
        }
    }
}
