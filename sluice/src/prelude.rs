pub use crate::{
    client::{Client, ClientBuilder},
    completion::ResponseFuture,
    error::{ClientError, TransportError, TransportErrorKind},
    filter::{FilterAction, IoFailureFilter, RequestFilter, ResponseContext, ResponseFilter},
    handler::{AsyncHandler, HandlerState, ResponseCollector},
    pool::WorkerPool,
    request::{Request, RequestBuilder},
    response::Response,
};
pub use sluice_config::{ClientOptions, ClientOptionsBuilder, Configurable, RetryBackoff};
