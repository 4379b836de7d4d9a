//! Hooks a transport runs around each execution.
//!
//! Request filters may rewrite or refuse a request before it is sent.
//! Response and IO-failure filters may ask for the exchange to be replayed,
//! which the transport does at most `max_request_retry` times.
use crate::{error::TransportError, request::Request};
use reqwest::{StatusCode, header::HeaderMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Continue,
    Replay,
}

pub trait RequestFilter: Send + Sync {
    fn filter(&self, request: Request) -> Result<Request, TransportError>;
}

/// What a response filter gets to look at.
#[derive(Debug)]
pub struct ResponseContext<'a> {
    pub request: &'a Request,
    pub status: StatusCode,
    pub headers: &'a HeaderMap,
    /// Replays already performed for this execution.
    pub replays: u32,
}

pub trait ResponseFilter: Send + Sync {
    fn filter(&self, ctx: &ResponseContext<'_>) -> FilterAction;
}

pub trait IoFailureFilter: Send + Sync {
    fn filter(&self, request: &Request, error: &TransportError, replays: u32) -> FilterAction;
}

impl<F> RequestFilter for F
where
    F: Fn(Request) -> Result<Request, TransportError> + Send + Sync,
{
    fn filter(&self, request: Request) -> Result<Request, TransportError> {
        self(request)
    }
}

impl<F> ResponseFilter for F
where
    F: for<'a> Fn(&ResponseContext<'a>) -> FilterAction + Send + Sync,
{
    fn filter(&self, ctx: &ResponseContext<'_>) -> FilterAction {
        self(ctx)
    }
}

impl<F> IoFailureFilter for F
where
    F: Fn(&Request, &TransportError, u32) -> FilterAction + Send + Sync,
{
    fn filter(&self, request: &Request, error: &TransportError, replays: u32) -> FilterAction {
        self(request, error, replays)
    }
}

/// Run `request` through every filter in order.
pub fn apply_request_filters(
    filters: &[Arc<dyn RequestFilter>],
    request: Request,
) -> Result<Request, TransportError> {
    filters
        .iter()
        .try_fold(request, |request, filter| filter.filter(request))
}

pub fn response_replay_requested(
    filters: &[Arc<dyn ResponseFilter>],
    ctx: &ResponseContext<'_>,
) -> bool {
    filters
        .iter()
        .any(|filter| filter.filter(ctx) == FilterAction::Replay)
}

pub fn io_replay_requested(
    filters: &[Arc<dyn IoFailureFilter>],
    request: &Request,
    error: &TransportError,
    replays: u32,
) -> bool {
    filters
        .iter()
        .any(|filter| filter.filter(request, error, replays) == FilterAction::Replay)
}

/// Identity of a filter inside a builder, ignoring vtable addresses.
pub(crate) fn same_filter<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn request() -> Request {
        Request::get("http://example.com/").build().unwrap()
    }

    #[test]
    fn request_filters_run_in_order() {
        let tag: Arc<dyn RequestFilter> = Arc::new(|mut request: Request| {
            request
                .headers_mut()
                .insert("x-tag", HeaderValue::from_static("first"));
            Ok::<_, TransportError>(request)
        });
        let check: Arc<dyn RequestFilter> = Arc::new(|request: Request| {
            match request.headers().get("x-tag") {
                Some(_) => Ok::<_, TransportError>(request),
                None => Err(TransportError::rejected("untagged")),
            }
        });

        let filtered = apply_request_filters(&[tag.clone(), check.clone()], request()).unwrap();
        assert_eq!(filtered.headers()["x-tag"], "first");

        let refused = apply_request_filters(&[check, tag], request());
        assert_eq!(refused.unwrap_err(), TransportError::rejected("untagged"));
    }

    #[test]
    fn any_replay_wins() {
        let keep: Arc<dyn ResponseFilter> =
            Arc::new(|_: &ResponseContext<'_>| FilterAction::Continue);
        let replay_5xx: Arc<dyn ResponseFilter> = Arc::new(|ctx: &ResponseContext<'_>| {
            if ctx.status.is_server_error() {
                FilterAction::Replay
            } else {
                FilterAction::Continue
            }
        });
        let request = request();
        let headers = HeaderMap::new();
        let ctx = |status| ResponseContext {
            request: &request,
            status,
            headers: &headers,
            replays: 0,
        };

        let filters = [keep, replay_5xx];
        assert!(response_replay_requested(&filters, &ctx(StatusCode::BAD_GATEWAY)));
        assert!(!response_replay_requested(&filters, &ctx(StatusCode::OK)));
    }

    #[test]
    fn io_filters_see_replay_count() {
        let twice: Arc<dyn IoFailureFilter> =
            Arc::new(|_: &Request, _: &TransportError, replays: u32| {
                if replays < 2 {
                    FilterAction::Replay
                } else {
                    FilterAction::Continue
                }
            });
        let error = TransportError::io("reset");
        let filters = [twice];
        assert!(io_replay_requested(&filters, &request(), &error, 1));
        assert!(!io_replay_requested(&filters, &request(), &error, 2));
    }

    #[test]
    fn filter_identity() {
        let a: Arc<dyn RequestFilter> = Arc::new(|r: Request| Ok::<_, TransportError>(r));
        let b: Arc<dyn RequestFilter> = Arc::new(|r: Request| Ok::<_, TransportError>(r));
        assert!(same_filter(&a, &a.clone()));
        assert!(!same_filter(&a, &b));
    }
}
