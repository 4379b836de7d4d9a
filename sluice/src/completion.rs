//! Bridge from transport callbacks to a single-resolution future.
//!
//! A `CompletionSlot` accepts exactly one of value, error or cancellation.
//! `HandlerAdapter` feeds a caller's [`AsyncHandler`] and settles the slot,
//! and [`ResponseFuture`] is what the caller awaits.
use crate::{
    error::{ClientError, TransportError},
    handler::{AsyncHandler, HandlerState, TransportHandler},
    request::Request,
    retry::Attempt,
    transport::{InFlight, Transport},
};
use bytes::Bytes;
use reqwest::{StatusCode, header::HeaderMap};
use sluice_cache::CachedLoad;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll, ready},
};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::trace;

type Outcome<T> = Result<T, ClientError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot result container. The first writer wins, later writes are dropped.
pub(crate) struct CompletionSlot<T> {
    sender: Mutex<Option<oneshot::Sender<Outcome<T>>>>,
    in_flight: Mutex<Option<InFlight>>,
    cancelled: AtomicBool,
    status: Mutex<Option<StatusCode>>,
}

impl<T> CompletionSlot<T> {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<Outcome<T>>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            in_flight: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            status: Mutex::new(None),
        });
        (slot, rx)
    }

    /// Record the outcome. Returns `false` if the slot was already settled.
    pub fn complete(&self, outcome: Outcome<T>) -> bool {
        match lock(&self.sender).take() {
            Some(tx) => {
                // the receiver may be gone already, the slot is settled either way
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Keep the transport's cancellation handle, firing it right away when the
    /// slot was cancelled before the handle arrived.
    pub fn attach(&self, handle: InFlight) {
        let mut in_flight = lock(&self.in_flight);
        if self.cancelled.load(Ordering::SeqCst) {
            drop(in_flight);
            handle.cancel();
        } else {
            *in_flight = Some(handle);
        }
    }

    /// Settle with [`ClientError::Cancelled`] and stop the transport work.
    /// A no-op returning `false` once the slot holds a result.
    pub fn cancel(&self) -> bool {
        if !self.complete(Err(ClientError::Cancelled)) {
            return false;
        }
        let handle = {
            let mut in_flight = lock(&self.in_flight);
            self.cancelled.store(true, Ordering::SeqCst);
            in_flight.take()
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn record_status(&self, status: StatusCode) {
        lock(&self.status).get_or_insert(status);
    }

    pub fn observed_status(&self) -> Option<StatusCode> {
        *lock(&self.status)
    }
}

/// Forwards transport callbacks to an [`AsyncHandler`] and settles the slot.
pub(crate) struct HandlerAdapter<H: AsyncHandler> {
    handler: H,
    slot: Arc<CompletionSlot<H::Output>>,
}

impl<H: AsyncHandler> HandlerAdapter<H> {
    pub fn new(handler: H, slot: Arc<CompletionSlot<H::Output>>) -> Self {
        Self { handler, slot }
    }
}

impl<H: AsyncHandler> TransportHandler for HandlerAdapter<H> {
    fn on_status(&mut self, status: StatusCode) -> HandlerState {
        if self.slot.is_settled() {
            return HandlerState::Abort;
        }
        self.slot.record_status(status);
        self.handler.on_status(status)
    }

    fn on_headers(&mut self, headers: &HeaderMap) -> HandlerState {
        if self.slot.is_settled() {
            return HandlerState::Abort;
        }
        self.handler.on_headers(headers)
    }

    fn on_body_chunk(&mut self, chunk: Bytes) -> HandlerState {
        if self.slot.is_settled() {
            return HandlerState::Abort;
        }
        self.handler.on_body_chunk(&chunk)
    }

    fn on_completed(&mut self) {
        if self.slot.is_settled() {
            trace!("completion after settlement ignored");
            return;
        }
        let outcome = self.handler.on_completed();
        self.slot.complete(outcome);
    }

    fn on_error(&mut self, error: TransportError) {
        if self.slot.is_settled() {
            trace!(%error, "error after settlement ignored");
            return;
        }
        self.handler.on_error(&error);
        self.slot.complete(Err(ClientError::Transport(error)));
    }
}

impl<H: AsyncHandler> Drop for HandlerAdapter<H> {
    fn drop(&mut self) {
        if !self.slot.is_settled() {
            self.slot.complete(Err(ClientError::Incomplete(
                "transport dropped the handler".to_string(),
            )));
        }
    }
}

/// A cache view the response future can poll and inspect.
trait DetachedLoad<T>: Future<Output = Outcome<T>> + Send + Unpin {
    fn is_ready(&self) -> bool;
}

impl<T> DetachedLoad<T> for CachedLoad<T, ClientError>
where
    T: Clone + Send + Sync + 'static,
{
    fn is_ready(&self) -> bool {
        CachedLoad::is_ready(self)
    }
}

enum State<T> {
    Pending {
        rx: oneshot::Receiver<Outcome<T>>,
        slot: Arc<CompletionSlot<T>>,
    },
    Task(JoinHandle<Outcome<T>>),
    Detached(Box<dyn DetachedLoad<T>>),
    Cancelled,
    Done,
}

/// Future of one request's outcome.
///
/// Depending on how the request was routed it waits on a direct transport
/// execution, on a worker pool task or on a shared cache load. Cancelling it,
/// or dropping it before it resolves, stops direct executions and pool tasks.
/// For cache loads only this waiter is detached and the load keeps running
/// for everyone else.
#[must_use = "futures do nothing unless polled, and dropping one cancels it"]
pub struct ResponseFuture<T> {
    state: State<T>,
}

impl<T> ResponseFuture<T> {
    pub(crate) fn pending(rx: oneshot::Receiver<Outcome<T>>, slot: Arc<CompletionSlot<T>>) -> Self {
        Self {
            state: State::Pending { rx, slot },
        }
    }

    pub(crate) fn task(handle: JoinHandle<Outcome<T>>) -> Self {
        Self {
            state: State::Task(handle),
        }
    }

    pub(crate) fn detached(load: CachedLoad<T, ClientError>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self {
            state: State::Detached(Box::new(load)),
        }
    }

    /// Cancel the request. Returns `false` when it already resolved or was
    /// cancelled before.
    pub fn cancel(&mut self) -> bool {
        let cancelled = match &mut self.state {
            State::Pending { slot, .. } => slot.cancel(),
            State::Task(handle) => {
                if handle.is_finished() {
                    false
                } else {
                    handle.abort();
                    true
                }
            }
            State::Detached(load) => !load.is_ready(),
            State::Cancelled | State::Done => false,
        };
        if cancelled {
            self.state = State::Cancelled;
        }
        cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.state {
            State::Pending { slot, .. } => slot.is_cancelled(),
            State::Cancelled => true,
            _ => false,
        }
    }

    /// Status reported by the transport so far, for direct executions.
    pub fn observed_status(&self) -> Option<StatusCode> {
        match &self.state {
            State::Pending { slot, .. } => slot.observed_status(),
            _ => None,
        }
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let outcome = match &mut this.state {
            State::Pending { rx, .. } => match ready!(Pin::new(rx).poll(cx)) {
                Ok(outcome) => outcome,
                Err(_) => Err(ClientError::Incomplete("completion slot dropped".to_string())),
            },
            State::Task(handle) => match ready!(Pin::new(handle).poll(cx)) {
                Ok(outcome) => outcome,
                Err(err) if err.is_cancelled() => Err(ClientError::Cancelled),
                Err(err) => Err(ClientError::Incomplete(format!("worker task failed: {err}"))),
            },
            State::Detached(load) => ready!(Pin::new(load).poll(cx)),
            State::Cancelled => Err(ClientError::Cancelled),
            State::Done => panic!("ResponseFuture polled after completion"),
        };
        this.state = State::Done;
        Poll::Ready(outcome)
    }
}

impl<T> Drop for ResponseFuture<T> {
    fn drop(&mut self) {
        match &mut self.state {
            State::Pending { slot, .. } => {
                slot.cancel();
            }
            State::Task(handle) => handle.abort(),
            _ => {}
        }
    }
}

impl<T> fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Pending { .. } => "pending",
            State::Task(_) => "task",
            State::Detached(_) => "detached",
            State::Cancelled => "cancelled",
            State::Done => "done",
        };
        f.debug_struct("ResponseFuture").field("state", &state).finish()
    }
}

fn start<H: AsyncHandler>(
    transport: &dyn Transport,
    request: &Request,
    handler: H,
) -> (ResponseFuture<H::Output>, Arc<CompletionSlot<H::Output>>) {
    let (slot, rx) = CompletionSlot::new();
    let adapter = HandlerAdapter::new(handler, Arc::clone(&slot));
    let in_flight = transport.execute(request, Box::new(adapter));
    slot.attach(in_flight);
    (ResponseFuture::pending(rx, Arc::clone(&slot)), slot)
}

/// Execute `request` once and return a future of the handler's result.
pub(crate) fn dispatch<H: AsyncHandler>(
    transport: &dyn Transport,
    request: &Request,
    handler: H,
) -> ResponseFuture<H::Output> {
    start(transport, request, handler).0
}

/// Execute `request` once and wait for it, keeping the observed status.
pub(crate) async fn attempt<H: AsyncHandler>(
    transport: &dyn Transport,
    request: &Request,
    handler: H,
) -> Attempt<H::Output> {
    let (future, slot) = start(transport, request, handler);
    let result = future.await;
    Attempt {
        status: slot.observed_status(),
        result,
    }
}
