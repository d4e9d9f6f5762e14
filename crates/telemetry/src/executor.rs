//! Bounded background executor for flush work.
//!
//! One executor per telemetry kind, so a slow log flush never delays a metric
//! flush. Tasks run one at a time in submission order on a single tokio task;
//! submission never blocks and fails fast when the queue is full or the
//! executor has been shut down.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use vigil_core::ExecutorError;

pub struct FlushExecutor {
    name: String,
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<BoxFuture<'static, ()>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FlushExecutor {
    /// Start the worker on `runtime` with room for `capacity` pending tasks.
    pub fn spawn(name: impl Into<String>, capacity: usize, runtime: &Handle) -> Self {
        let name = name.into();
        let (sender, mut receiver) = mpsc::channel::<BoxFuture<'static, ()>>(capacity.max(1));

        let worker_name = name.clone();
        let worker = runtime.spawn(async move {
            while let Some(task) = receiver.recv().await {
                task.await;
            }
            tracing::debug!(executor = %worker_name, "Flush executor drained");
        });

        Self {
            name,
            capacity,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn submit<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(ExecutorError::Shutdown(self.name.clone()));
        };
        sender.try_send(Box::pin(task)).map_err(|e| match e {
            TrySendError::Full(_) => ExecutorError::Rejected {
                name: self.name.clone(),
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => ExecutorError::Shutdown(self.name.clone()),
        })
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting tasks and let the worker drain what is queued.
    pub fn shutdown(&self) {
        self.sender.lock().take();
    }

    /// Shut down and wait up to `grace` for queued tasks; abandon the rest.
    pub async fn shutdown_and_wait(&self, grace: Duration) {
        self.shutdown();
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            if tokio::time::timeout(grace, &mut worker).await.is_err() {
                tracing::warn!(
                    executor = %self.name,
                    grace_ms = grace.as_millis() as u64,
                    "Flush executor did not drain in time, abandoning queued tasks"
                );
                worker.abort();
            }
        }
    }
}

impl Drop for FlushExecutor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
    }
}
