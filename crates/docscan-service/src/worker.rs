//! Dedicated scan thread with per-request response routing.
//!
//! Callers submit [`ScanRequest`]s over a bounded queue and get back a
//! [`PendingScan`] future. The worker thread answers requests in order
//! and delivers each response to the oneshot registered under the
//! request's correlation id, so callers may keep several requests in
//! flight and await them in any order.
//!
//! A caller that stops waiting simply drops its [`PendingScan`]; the
//! pipeline still runs to completion and the late response is discarded.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use docscan_pipeline::{ProcessingMode, RgbaImage, ScanRequest, ScanResponse, handle_request};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::DispatchError;

type WaiterMap = HashMap<String, oneshot::Sender<ScanResponse>>;
type Waiters = Arc<Mutex<WaiterMap>>;

/// Worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Requests that may wait in the queue before `submit` applies
    /// backpressure.
    pub queue_capacity: usize,
    /// OS thread name.
    pub thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            thread_name: "docscan-worker".to_owned(),
        }
    }
}

/// Handle to a running scan thread.
///
/// Dropping the handle closes the queue; requests already queued are
/// still answered before the thread exits and is joined.
pub struct ScanWorker {
    requests: Option<mpsc::Sender<ScanRequest>>,
    waiters: Waiters,
    thread: Option<JoinHandle<()>>,
}

impl ScanWorker {
    /// Start a worker running the scan pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Spawn`] if the OS refuses the thread.
    pub fn spawn(config: WorkerConfig) -> Result<Self, DispatchError> {
        Self::spawn_with(config, handle_request)
    }

    /// Start a worker that answers requests with `handler`.
    ///
    /// A panic inside `handler` is turned into a failure response for
    /// that request; the worker keeps serving.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Spawn`] if the OS refuses the thread.
    pub fn spawn_with<F>(config: WorkerConfig, handler: F) -> Result<Self, DispatchError>
    where
        F: FnMut(ScanRequest) -> ScanResponse + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let waiters = Waiters::default();
        let thread = std::thread::Builder::new()
            .name(config.thread_name)
            .spawn({
                let waiters = Arc::clone(&waiters);
                move || serve(rx, &waiters, handler)
            })?;
        Ok(Self {
            requests: Some(tx),
            waiters,
            thread: Some(thread),
        })
    }

    /// Queue a request, waiting for room if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DuplicateId`] if a request with the same
    /// id has not been answered yet, or [`DispatchError::WorkerGone`] if
    /// the worker thread has exited.
    pub async fn submit(&self, request: ScanRequest) -> Result<PendingScan, DispatchError> {
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            if waiters.contains_key(&id) {
                return Err(DispatchError::DuplicateId(id));
            }
            waiters.insert(id.clone(), tx);
        }

        let sent = match &self.requests {
            Some(requests) => requests.send(request).await.is_ok(),
            None => false,
        };
        if !sent {
            self.forget(&id);
            return Err(DispatchError::WorkerGone);
        }
        debug!(%id, "scan queued");
        Ok(PendingScan { id, rx })
    }

    /// Queue an image under a freshly generated id.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub async fn submit_image(
        &self,
        image: RgbaImage,
        mode: ProcessingMode,
        do_crop: bool,
    ) -> Result<PendingScan, DispatchError> {
        let id = Uuid::new_v4().to_string();
        self.submit(ScanRequest::new(id, image, mode, do_crop)).await
    }

    /// Submit a request and wait for its response.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit), plus
    /// [`DispatchError::ResponseDropped`] if no answer arrives.
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanResponse, DispatchError> {
        self.submit(request).await?.await
    }

    /// Number of requests submitted but not yet answered.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn forget(&self, id: &str) {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

impl Drop for ScanWorker {
    fn drop(&mut self) {
        drop(self.requests.take());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("scan worker thread panicked");
        }
    }
}

/// Response to one submitted request.
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct PendingScan {
    id: String,
    rx: oneshot::Receiver<ScanResponse>,
}

impl PendingScan {
    /// Correlation id of the request.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingScan {
    type Output = Result<ScanResponse, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| DispatchError::ResponseDropped(this.id.clone())))
    }
}

fn serve<F>(mut rx: mpsc::Receiver<ScanRequest>, waiters: &Mutex<WaiterMap>, mut handler: F)
where
    F: FnMut(ScanRequest) -> ScanResponse,
{
    debug!("scan worker started");
    while let Some(request) = rx.blocking_recv() {
        let id = request.id.clone();
        let response =
            catch_unwind(AssertUnwindSafe(|| handler(request))).unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(%id, %message, "scan panicked");
                ScanResponse::failure(id.clone(), format!("internal error: {message}"))
            });

        let waiter = waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match waiter {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!(%id, "caller stopped waiting, discarding response");
                }
            }
            None => warn!(%id, "no caller registered for response"),
        }
    }
    debug!("scan worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn default_config_has_room() {
        let config = WorkerConfig::default();
        assert!(config.queue_capacity > 0);
        assert_eq!(config.thread_name, "docscan-worker");
    }
}
