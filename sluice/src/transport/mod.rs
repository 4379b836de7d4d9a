//! The boundary between the client and whatever performs HTTP exchanges.
mod http_transport;

pub use http_transport::{HttpTransport, build_http_client};

use crate::{
    filter::{IoFailureFilter, RequestFilter, ResponseFilter},
    handler::TransportHandler,
    request::Request,
};
use sluice_config::ClientOptions;
use std::{fmt, sync::Arc};
use tokio::task::AbortHandle;

/// Executes requests and reports progress through a [`TransportHandler`].
///
/// `execute` must not block. It hands back an [`InFlight`] handle the client
/// fires when the caller cancels. Every execution ends with exactly one
/// `on_completed` or `on_error`, unless it is cancelled first.
pub trait Transport: Send + Sync + 'static {
    fn execute(&self, request: &Request, handler: Box<dyn TransportHandler>) -> InFlight;

    /// Stop accepting work. Calling it again has no effect.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Cancellation handle for one transport execution.
///
/// Dropping it leaves the execution running.
pub struct InFlight {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl InFlight {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn from_abort_handle(handle: AbortHandle) -> Self {
        Self::new(move || handle.abort())
    }

    /// A handle for executions that already finished or cannot be stopped.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Everything a transport is built from.
#[derive(Clone, Default)]
pub struct TransportConfig {
    pub options: ClientOptions,
    pub request_filters: Vec<Arc<dyn RequestFilter>>,
    pub response_filters: Vec<Arc<dyn ResponseFilter>>,
    pub io_failure_filters: Vec<Arc<dyn IoFailureFilter>>,
}

impl TransportConfig {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("options", &self.options)
            .field("request_filters", &self.request_filters.len())
            .field("response_filters", &self.response_filters.len())
            .field("io_failure_filters", &self.io_failure_filters.len())
            .finish()
    }
}
