use crate::{
    completion,
    error::ClientError,
    handler::AsyncHandler,
    request::Request,
    transport::Transport,
};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff};
use reqwest::StatusCode;
use sluice_config::{ClientOptions, RetryBackoff};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Result of a single execution together with the status the transport
/// reported for it.
#[derive(Debug)]
pub struct Attempt<T> {
    pub status: Option<StatusCode>,
    pub result: Result<T, ClientError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Return,
    RetryStatus,
    RetryIo,
}

/// Re-executes a request while its outcome asks for it.
///
/// A successful attempt whose status is in the request's retry set is repeated
/// up to `max_retries` times. Connect and IO failures are repeated up to
/// `max_request_retry` times on a separate counter. Whatever comes next is
/// returned as is.
pub(crate) struct RetryExecutor {
    transport: Arc<dyn Transport>,
    max_request_retry: u32,
    backoff: Option<RetryBackoff>,
}

impl RetryExecutor {
    pub fn new(transport: Arc<dyn Transport>, options: &ClientOptions) -> Self {
        Self {
            transport,
            max_request_retry: options.max_request_retry,
            backoff: options.retry_backoff,
        }
    }

    #[instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
    pub async fn run<H, F>(
        &self,
        request: &Request,
        new_handler: F,
    ) -> Result<H::Output, ClientError>
    where
        H: AsyncHandler,
        F: Fn() -> H,
    {
        let mut status_retries = 0u32;
        let mut io_retries = 0u32;
        let mut delays = self.backoff.map(exponential);

        loop {
            let attempt =
                completion::attempt(self.transport.as_ref(), request, new_handler()).await;

            match self.next(request, &attempt, status_retries, io_retries) {
                Next::Return => return attempt.result,
                Next::RetryStatus => {
                    status_retries += 1;
                    debug!(
                        status = ?attempt.status,
                        retry = status_retries,
                        max_retries = request.max_retries(),
                        "retrying on status"
                    );
                }
                Next::RetryIo => {
                    io_retries += 1;
                    if let Err(error) = &attempt.result {
                        warn!(
                            %error,
                            retry = io_retries,
                            max_request_retry = self.max_request_retry,
                            "retrying after io failure"
                        );
                    }
                }
            }

            if let Some(delay) = delays.as_mut().and_then(|backoff| backoff.next_backoff()) {
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn next<T>(
        &self,
        request: &Request,
        attempt: &Attempt<T>,
        status_retries: u32,
        io_retries: u32,
    ) -> Next {
        match (&attempt.result, attempt.status) {
            (Ok(_), Some(status))
                if request.should_retry_status(status)
                    && status_retries < request.max_retries() =>
            {
                Next::RetryStatus
            }
            (Err(ClientError::Transport(error)), _)
                if error.is_io_failure() && io_retries < self.max_request_retry =>
            {
                Next::RetryIo
            }
            _ => Next::Return,
        }
    }
}

fn exponential(settings: RetryBackoff) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(settings.initial_interval)
        .with_max_interval(settings.max_interval)
        .with_max_elapsed_time(None)
        .build()
}
