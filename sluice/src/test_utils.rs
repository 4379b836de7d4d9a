//! In-memory transport for exercising the client without a network.
use crate::{
    error::{TransportError, TransportErrorKind},
    handler::{HandlerState, TransportHandler},
    request::Request,
    transport::{InFlight, Transport},
};
use bytes::Bytes;
use reqwest::{StatusCode, header::HeaderMap};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// How [`ScriptedTransport`] answers one execution.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond right away with a status and body.
    Status { status: u16, body: Bytes },
    /// Respond 200 with the request URL as body.
    Echo,
    /// Fail with an IO error.
    IoFailure,
    /// Fail with an error of the given kind.
    Fail(TransportErrorKind),
    /// Never answer. The handler is held until the execution is cancelled.
    Hang,
    /// Respond from a spawned task after `delay`.
    Delayed { delay: Duration, status: u16 },
    /// Respond, then signal completion again and report a late error.
    Duplicate { status: u16 },
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self::Status {
            status,
            body: Bytes::new(),
        }
    }

    pub fn body(status: u16, body: impl Into<Bytes>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    pub fn delayed(delay: Duration, status: u16) -> Self {
        Self::Delayed { delay, status }
    }
}

#[derive(Default)]
struct Shared {
    cancellations: AtomicUsize,
    hanging: Mutex<HashMap<usize, Box<dyn TransportHandler>>>,
}

/// [`Transport`] answering from a script of [`Reply`] values.
///
/// Replies are consumed in order. Once the script runs out every execution
/// gets the fallback reply.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    requests: Mutex<Vec<Request>>,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn respond(handler: &mut dyn TransportHandler, status: u16, body: Bytes) {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if handler.on_status(status) == HandlerState::Continue
        && handler.on_headers(&HeaderMap::new()) == HandlerState::Continue
        && !body.is_empty()
    {
        handler.on_body_chunk(body);
    }
    handler.on_completed();
}

impl ScriptedTransport {
    pub fn always(reply: Reply) -> Self {
        Self::with_script([], reply)
    }

    pub fn with_script(script: impl IntoIterator<Item = Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn push(&self, reply: Reply) {
        lock(&self.script).push_back(reply);
    }

    /// Executions started, including rejected ones on a closed transport.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Executions cancelled through their [`InFlight`] handle.
    pub fn cancellations(&self) -> usize {
        self.shared.cancellations.load(Ordering::SeqCst)
    }

    /// Executions left hanging and not cancelled yet.
    pub fn hanging(&self) -> usize {
        lock(&self.shared.hanging).len()
    }

    pub fn requests(&self) -> Vec<Request> {
        lock(&self.requests).clone()
    }

    fn next_reply(&self) -> Reply {
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &Request, mut handler: Box<dyn TransportHandler>) -> InFlight {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        if self.is_closed() {
            handler.on_error(TransportError::closed("transport is closed"));
            return InFlight::detached();
        }

        match self.next_reply() {
            Reply::Status { status, body } => {
                respond(handler.as_mut(), status, body);
                InFlight::detached()
            }
            Reply::Echo => {
                let body = Bytes::from(request.url().as_str().to_string());
                respond(handler.as_mut(), 200, body);
                InFlight::detached()
            }
            Reply::IoFailure => {
                handler.on_error(TransportError::io("scripted io failure"));
                InFlight::detached()
            }
            Reply::Fail(kind) => {
                handler.on_error(TransportError::new(kind, "scripted failure"));
                InFlight::detached()
            }
            Reply::Hang => {
                lock(&self.shared.hanging).insert(call, handler);
                let shared = Arc::clone(&self.shared);
                InFlight::new(move || {
                    shared.cancellations.fetch_add(1, Ordering::SeqCst);
                    let handler = lock(&shared.hanging).remove(&call);
                    drop(handler);
                })
            }
            Reply::Delayed { delay, status } => {
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    respond(handler.as_mut(), status, Bytes::new());
                });
                let shared = Arc::clone(&self.shared);
                InFlight::new(move || {
                    shared.cancellations.fetch_add(1, Ordering::SeqCst);
                    task.abort();
                })
            }
            Reply::Duplicate { status } => {
                respond(handler.as_mut(), status, Bytes::new());
                handler.on_completed();
                handler.on_error(TransportError::io("late failure"));
                InFlight::detached()
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
