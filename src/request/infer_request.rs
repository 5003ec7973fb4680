//! Asynchronous infer request state machine.
//!
//! ```text
//!   Idle ──start_async──▶ Busy ──▶ Completed | Failed | Cancelled
//!                          ▲                         │
//!                          └──────start_async────────┘
//! ```
//!
//! Execution runs on the network's worker pool. Waiters block on a condvar
//! (or a tokio `Notify` for `wait_async`); the completion callback fires once
//! per run after the final state is visible to waiters. Each run delivers to
//! the callback installed when it started, and one request's callbacks never
//! overlap.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{ForgeResult, SnippetForgeError};
use crate::metrics::{Phase, PhaseTimer};
use crate::profiling::ProfilingInfo;
use crate::runtime::network::{CompiledNetwork, PortKind};

use super::status::StatusCode;
use super::tensor::Tensor;
use super::types::{RequestId, RequestState};
use super::variable::{VariableSlot, VariableState};

/// Completion callback: a handle back to the request and the final status.
pub type Callback = dyn Fn(RequestHandle, StatusCode) + Send + Sync;

#[derive(Debug)]
struct RequestStatus {
    state: RequestState,
    error: Option<SnippetForgeError>,
}

impl RequestStatus {
    fn outcome(&self) -> ForgeResult<()> {
        match self.state {
            RequestState::Completed => Ok(()),
            RequestState::Cancelled => Err(SnippetForgeError::InferCancelled),
            RequestState::Failed => Err(self
                .error
                .clone()
                .unwrap_or_else(|| SnippetForgeError::GeneralError("infer failed".to_string()))),
            RequestState::Idle => Err(SnippetForgeError::InferNotStarted),
            RequestState::Busy => Err(SnippetForgeError::ResultNotReady),
        }
    }
}

/// State shared between request handles, the worker running it, and the
/// network's request table.
pub(crate) struct RequestShared {
    id: RequestId,
    network: Weak<CompiledNetwork>,
    status: Mutex<RequestStatus>,
    settled: Condvar,
    notify: Notify,
    cancel: AtomicBool,
    callback: Mutex<Option<Arc<Callback>>>,
    /// Held by a worker from settle until its callback returns
    delivery: Mutex<()>,
    /// Indexed like the network's ports
    tensors: RwLock<Vec<Tensor>>,
    variables: Vec<Arc<VariableSlot>>,
    profiling: Mutex<Vec<ProfilingInfo>>,
}

impl RequestShared {
    pub(crate) fn new(
        id: RequestId,
        network: Weak<CompiledNetwork>,
        tensors: Vec<Tensor>,
        variables: Vec<Arc<VariableSlot>>,
        profiling: Vec<ProfilingInfo>,
    ) -> Self {
        RequestShared {
            id,
            network,
            status: Mutex::new(RequestStatus {
                state: RequestState::Idle,
                error: None,
            }),
            settled: Condvar::new(),
            notify: Notify::new(),
            cancel: AtomicBool::new(false),
            callback: Mutex::new(None),
            delivery: Mutex::new(()),
            tensors: RwLock::new(tensors),
            variables,
            profiling: Mutex::new(profiling),
        }
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn tensors(&self) -> ForgeResult<Vec<Tensor>> {
        Ok(self.tensors.read()?.clone())
    }

    pub(crate) fn variable(&self, index: usize) -> ForgeResult<&VariableSlot> {
        self.variables
            .get(index)
            .map(Arc::as_ref)
            .ok_or_else(|| SnippetForgeError::InternalError(format!("variable {} missing", index)))
    }

    pub(crate) fn record_profile(
        &self,
        index: usize,
        real_time: Duration,
        cpu_time: Duration,
    ) -> ForgeResult<()> {
        if let Some(entry) = self.profiling.lock()?.get_mut(index) {
            entry.record(real_time, cpu_time);
        }
        Ok(())
    }

    fn reset_profiling(&self) -> ForgeResult<()> {
        self.profiling.lock()?.iter_mut().for_each(ProfilingInfo::reset);
        Ok(())
    }

    /// Publish the final state and wake every waiter.
    fn settle(&self, state: RequestState, error: Option<SnippetForgeError>) {
        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            status.state = state;
            status.error = error;
        }
        self.settled.notify_all();
        self.notify.notify_waiters();
    }

    fn invoke_callback(self: &Arc<Self>, callback: Option<Arc<Callback>>, code: StatusCode) {
        if let Some(callback) = callback {
            let handle = RequestHandle {
                id: self.id,
                request: Arc::downgrade(self),
            };
            if panic::catch_unwind(AssertUnwindSafe(|| callback(handle, code))).is_err() {
                warn!(request = %self.id, "completion callback panicked");
            }
        }
    }
}

impl Drop for RequestShared {
    fn drop(&mut self) {
        if let Some(network) = self.network.upgrade() {
            if let Err(e) = network.requests().remove(self.id) {
                warn!(request = %self.id, error = %e, "failed to unregister request");
            }
        }
    }
}

/// Non-owning reference handed to completion callbacks.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: RequestId,
    request: Weak<RequestShared>,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The request, if it is still alive.
    pub fn request(&self) -> ForgeResult<InferRequest> {
        self.request
            .upgrade()
            .map(InferRequest::from_shared)
            .ok_or_else(|| SnippetForgeError::NotAllocated(format!("request {} was released", self.id)))
    }
}

/// Handle to one infer request. Clones refer to the same request.
#[derive(Clone)]
pub struct InferRequest {
    shared: Arc<RequestShared>,
}

impl fmt::Debug for InferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferRequest")
            .field("id", &self.shared.id)
            .finish_non_exhaustive()
    }
}

impl InferRequest {
    pub(crate) fn from_shared(shared: Arc<RequestShared>) -> Self {
        InferRequest { shared }
    }

    pub fn id(&self) -> RequestId {
        self.shared.id
    }

    pub fn handle(&self) -> RequestHandle {
        RequestHandle {
            id: self.shared.id,
            request: Arc::downgrade(&self.shared),
        }
    }

    pub fn state(&self) -> ForgeResult<RequestState> {
        self.network()?;
        Ok(self.shared.status.lock()?.state)
    }

    fn network(&self) -> ForgeResult<Arc<CompiledNetwork>> {
        self.shared.network.upgrade().ok_or_else(|| {
            SnippetForgeError::NotAllocated(format!(
                "network of request {} was released",
                self.shared.id
            ))
        })
    }

    /// Bind `tensor` to the port `name`.
    pub fn set_tensor(&self, name: &str, tensor: Tensor) -> ForgeResult<()> {
        let network = self.network()?;
        let status = self.shared.status.lock()?;
        if status.state == RequestState::Busy {
            return Err(SnippetForgeError::RequestBusy);
        }
        let index = network.port_index(name)?;
        network.check_binding(index, tensor.desc())?;
        self.shared.tensors.write()?[index] = tensor;
        drop(status);
        Ok(())
    }

    pub fn get_tensor(&self, name: &str) -> ForgeResult<Tensor> {
        let network = self.network()?;
        let status = self.shared.status.lock()?;
        if status.state == RequestState::Busy {
            return Err(SnippetForgeError::RequestBusy);
        }
        let index = network.port_index(name)?;
        let tensor = self.shared.tensors.read()?[index].clone();
        drop(status);

        if let Tensor::Host(host) = &tensor {
            if !host.is_allocated()? {
                return Err(SnippetForgeError::NotAllocated(format!(
                    "tensor for port {} has no buffer",
                    name
                )));
            }
        }
        Ok(tensor)
    }

    /// Bulk form of `set_tensor` restricted to network inputs.
    pub fn set_input<I, S>(&self, tensors: I) -> ForgeResult<()>
    where
        I: IntoIterator<Item = (S, Tensor)>,
        S: AsRef<str>,
    {
        self.set_ports(PortKind::Input, tensors)
    }

    /// Bulk form of `set_tensor` restricted to network outputs.
    pub fn set_output<I, S>(&self, tensors: I) -> ForgeResult<()>
    where
        I: IntoIterator<Item = (S, Tensor)>,
        S: AsRef<str>,
    {
        self.set_ports(PortKind::Output, tensors)
    }

    fn set_ports<I, S>(&self, kind: PortKind, tensors: I) -> ForgeResult<()>
    where
        I: IntoIterator<Item = (S, Tensor)>,
        S: AsRef<str>,
    {
        let network = self.network()?;
        for (name, tensor) in tensors {
            let name = name.as_ref();
            let index = network.port_index(name)?;
            if network.port(index)?.kind != kind {
                return Err(SnippetForgeError::NotFound(format!(
                    "{} is not a network {}",
                    name, kind
                )));
            }
            self.set_tensor(name, tensor)?;
        }
        Ok(())
    }

    /// Current tensors of every network input, by name.
    pub fn inputs(&self) -> ForgeResult<HashMap<String, Tensor>> {
        let network = self.network()?;
        network
            .port_names(PortKind::Input)
            .into_iter()
            .map(|name| self.get_tensor(&name).map(|t| (name, t)))
            .collect()
    }

    /// Run synchronously; returns the original error on failure.
    pub fn infer(&self) -> ForgeResult<()> {
        self.start_async()?;
        self.wait()
    }

    /// Hand execution to the network's worker pool and return immediately.
    pub fn start_async(&self) -> ForgeResult<()> {
        let network = self.network()?;
        let callback = {
            let mut status = self.shared.status.lock()?;
            if status.state == RequestState::Busy {
                return Err(SnippetForgeError::RequestBusy);
            }
            status.state = RequestState::Busy;
            status.error = None;
            self.shared.cancel.store(false, Ordering::SeqCst);
            // The slot is frozen while Busy, so this is the callback of this run.
            self.shared.callback.lock()?.clone()
        };
        self.shared.reset_profiling()?;
        network.metrics().record_request_start();
        debug!(request = %self.shared.id, "infer request started");

        let shared = Arc::clone(&self.shared);
        let worker_network = Arc::clone(&network);
        network.spawn(move || run(shared, worker_network, callback));
        Ok(())
    }

    /// Block until the current run finishes.
    pub fn wait(&self) -> ForgeResult<()> {
        self.network()?;
        let mut status = self.shared.status.lock()?;
        if status.state == RequestState::Idle {
            return Err(SnippetForgeError::InferNotStarted);
        }
        while status.state == RequestState::Busy {
            status = self.shared.settled.wait(status)?;
        }
        status.outcome()
    }

    /// `Ok(true)` once finished, `Ok(false)` on timeout or if never started.
    ///
    /// A finished run that failed returns its error, like `wait`.
    pub fn wait_for(&self, timeout: Duration) -> ForgeResult<bool> {
        self.network()?;
        let status = self.shared.status.lock()?;
        if status.state == RequestState::Idle {
            return Ok(false);
        }
        let (status, _) = self
            .shared
            .settled
            .wait_timeout_while(status, timeout, |s| s.state == RequestState::Busy)?;
        if status.state == RequestState::Busy {
            return Ok(false);
        }
        status.outcome().map(|_| true)
    }

    /// Async form of `wait` for callers on a tokio runtime.
    pub async fn wait_async(&self) -> ForgeResult<()> {
        self.network()?;
        loop {
            // Registered before the state check so a settle in between is not lost.
            let notified = self.shared.notify.notified();
            {
                let status = self.shared.status.lock()?;
                match status.state {
                    RequestState::Idle => return Err(SnippetForgeError::InferNotStarted),
                    RequestState::Busy => {}
                    _ => return status.outcome(),
                }
            }
            notified.await;
        }
    }

    /// Ask a running request to stop at the next node boundary.
    ///
    /// No effect unless the request is busy.
    pub fn cancel(&self) -> ForgeResult<()> {
        self.network()?;
        let status = self.shared.status.lock()?;
        if status.state == RequestState::Busy {
            self.shared.cancel.store(true, Ordering::SeqCst);
            debug!(request = %self.shared.id, "cancellation requested");
        }
        Ok(())
    }

    /// Replace the completion callback.
    ///
    /// Takes effect from the next `start_async`. A run that already settled
    /// still reports to the callback it started with. Waiting on this request
    /// from inside the callback deadlocks.
    pub fn set_callback<F>(&self, callback: F) -> ForgeResult<()>
    where
        F: Fn(RequestHandle, StatusCode) + Send + Sync + 'static,
    {
        self.network()?;
        let status = self.shared.status.lock()?;
        if status.state == RequestState::Busy {
            return Err(SnippetForgeError::RequestBusy);
        }
        *self.shared.callback.lock()? = Some(Arc::new(callback));
        drop(status);
        Ok(())
    }

    pub fn clear_callback(&self) -> ForgeResult<()> {
        self.network()?;
        let status = self.shared.status.lock()?;
        if status.state == RequestState::Busy {
            return Err(SnippetForgeError::RequestBusy);
        }
        *self.shared.callback.lock()? = None;
        drop(status);
        Ok(())
    }

    /// Snapshot of the request's variables.
    pub fn query_state(&self) -> ForgeResult<Vec<VariableState>> {
        self.network()?;
        Ok(self
            .shared
            .variables
            .iter()
            .cloned()
            .map(VariableState::new)
            .collect())
    }

    /// Per-node records of the last run, in execution order.
    pub fn get_profiling_info(&self) -> ForgeResult<Vec<ProfilingInfo>> {
        self.network()?;
        let mut records = self.shared.profiling.lock()?.clone();
        records.sort_by_key(|r| r.exec_index);
        Ok(records)
    }
}

/// Worker body: execute every node, then settle and notify.
fn run(
    shared: Arc<RequestShared>,
    network: Arc<CompiledNetwork>,
    callback: Option<Arc<Callback>>,
) {
    let timer = PhaseTimer::new(Some(network.metrics()), Phase::Infer);
    let result = panic::catch_unwind(AssertUnwindSafe(|| network.run_request(&shared)))
        .unwrap_or_else(|_| {
            Err(SnippetForgeError::Unexpected(
                "node execution panicked".to_string(),
            ))
        });
    timer.finish();

    let metrics = network.metrics();
    let state = match &result {
        Ok(()) => {
            metrics.record_request_complete();
            RequestState::Completed
        }
        Err(SnippetForgeError::InferCancelled) => {
            metrics.record_request_cancelled();
            RequestState::Cancelled
        }
        Err(_) => {
            metrics.record_request_failed();
            RequestState::Failed
        }
    };
    let code = StatusCode::from_result(&result);
    match &result {
        Err(e) if state == RequestState::Failed => {
            warn!(request = %shared.id, error = %e, status = %code, "infer request failed")
        }
        _ => info!(request = %shared.id, state = %state, "infer request finished"),
    }

    let _delivery = shared.delivery.lock().unwrap_or_else(PoisonError::into_inner);
    shared.settle(state, result.err());
    shared.invoke_callback(callback, code);
}

