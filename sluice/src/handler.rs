//! Callback interfaces between transports, the client and callers.
//!
//! A [`Transport`](crate::transport::Transport) drives a boxed
//! [`TransportHandler`] as the response arrives. Callers implement the richer
//! [`AsyncHandler`], whose `on_completed` produces the value their
//! [`ResponseFuture`](crate::ResponseFuture) resolves to. The client bridges
//! the two.
use crate::{
    error::{ClientError, TransportError},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use reqwest::{StatusCode, header::HeaderMap};

/// Whether the transport should keep delivering the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Continue,
    Abort,
}

/// Callbacks a transport invokes for one execution.
///
/// `on_completed` or `on_error` ends the exchange. Returning
/// [`HandlerState::Abort`] asks the transport to stop reading and complete.
pub trait TransportHandler: Send {
    fn on_status(&mut self, status: StatusCode) -> HandlerState;
    fn on_headers(&mut self, headers: &HeaderMap) -> HandlerState;
    fn on_body_chunk(&mut self, chunk: Bytes) -> HandlerState;
    fn on_completed(&mut self);
    fn on_error(&mut self, error: TransportError);
}

/// Caller-side handler producing a typed result.
pub trait AsyncHandler: Send + 'static {
    type Output: Send + 'static;

    fn on_status(&mut self, _status: StatusCode) -> HandlerState {
        HandlerState::Continue
    }

    fn on_headers(&mut self, _headers: &HeaderMap) -> HandlerState {
        HandlerState::Continue
    }

    fn on_body_chunk(&mut self, _chunk: &Bytes) -> HandlerState {
        HandlerState::Continue
    }

    fn on_completed(&mut self) -> Result<Self::Output, ClientError>;

    fn on_error(&mut self, _error: &TransportError) {}
}

/// Default handler: buffers status, headers and body into a [`Response`].
#[derive(Debug, Default)]
pub struct ResponseCollector {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl AsyncHandler for ResponseCollector {
    type Output = Response;

    fn on_status(&mut self, status: StatusCode) -> HandlerState {
        self.status = Some(status);
        HandlerState::Continue
    }

    fn on_headers(&mut self, headers: &HeaderMap) -> HandlerState {
        self.headers = headers.clone();
        HandlerState::Continue
    }

    fn on_body_chunk(&mut self, chunk: &Bytes) -> HandlerState {
        self.body.extend_from_slice(chunk);
        HandlerState::Continue
    }

    fn on_completed(&mut self) -> Result<Response, ClientError> {
        let status = self
            .status
            .ok_or_else(|| ClientError::Incomplete("no status received".to_string()))?;
        Ok(Response::new(
            status,
            std::mem::take(&mut self.headers),
            std::mem::take(&mut self.body).freeze(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_buffers_chunks() {
        let mut collector = ResponseCollector::default();
        assert_eq!(collector.on_status(StatusCode::CREATED), HandlerState::Continue);
        collector.on_headers(&HeaderMap::new());
        collector.on_body_chunk(&Bytes::from_static(b"hello "));
        collector.on_body_chunk(&Bytes::from_static(b"world"));

        let response = collector.on_completed().unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.body().as_ref(), b"hello world");
    }

    #[test]
    fn collector_without_status_is_incomplete() {
        let mut collector = ResponseCollector::default();
        assert!(matches!(
            collector.on_completed(),
            Err(ClientError::Incomplete(_))
        ));
    }
}
