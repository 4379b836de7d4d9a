use super::{InFlight, Transport, TransportConfig};
use crate::{
    error::{ClientError, TransportError},
    filter::{
        ResponseContext, apply_request_filters, io_replay_requested, response_replay_requested,
    },
    handler::{HandlerState, TransportHandler},
    request::Request,
};
use reqwest::redirect::Policy;
use sluice_config::ClientOptions;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio::{runtime::Handle, sync::Semaphore};
use tracing::{debug, warn};

/// Build the `reqwest` client behind [`HttpTransport`] from client options.
///
/// `connection_ttl` and `allow_pooling_ssl_connections` have no `reqwest`
/// counterpart and are not applied here.
pub fn build_http_client(options: &ClientOptions) -> Result<reqwest::Client, reqwest::Error> {
    let redirect = if options.follow_redirect {
        Policy::limited(options.max_redirects)
    } else {
        Policy::none()
    };

    let mut client_builder = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .danger_accept_invalid_certs(options.accept_any_certificate)
        .timeout(options.request_timeout)
        .connect_timeout(options.connect_timeout)
        .read_timeout(options.read_timeout)
        .pool_idle_timeout(options.pooled_connection_idle_timeout)
        .redirect(redirect)
        .gzip(options.compression_enforced)
        .user_agent(options.user_agent.as_str());

    if !options.allow_pooling_connections {
        client_builder = client_builder.pool_max_idle_per_host(0);
    } else if let Some(per_host) = options.max_connections_per_host {
        client_builder = client_builder.pool_max_idle_per_host(per_host);
    }

    client_builder.build()
}

/// [`Transport`] backed by `reqwest`.
///
/// Each execution runs as a task on the given runtime and streams the body to
/// the handler chunk by chunk. `max_connections` bounds how many executions
/// talk to the network at once. Closing drops the `reqwest` client, so its
/// pooled connections go away once executions still running finish.
pub struct HttpTransport {
    exchange: Arc<Exchange>,
    handle: Handle,
    closed: AtomicBool,
}

struct Exchange {
    client: Mutex<Option<reqwest::Client>>,
    config: TransportConfig,
    limiter: Option<Arc<Semaphore>>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, ClientError> {
        let handle = Handle::try_current().map_err(|e| {
            ClientError::Configuration(format!("no tokio runtime available: {e}"))
        })?;
        Self::with_handle(config, handle)
    }

    pub fn with_handle(config: TransportConfig, handle: Handle) -> Result<Self, ClientError> {
        let client = build_http_client(&config.options).map_err(|e| {
            ClientError::Configuration(format!("failed to build http client: {e}"))
        })?;
        let limiter = config
            .options
            .max_connections
            .map(|limit| Arc::new(Semaphore::new(limit)));

        debug!(
            max_connections = ?config.options.max_connections,
            follow_redirect = config.options.follow_redirect,
            "http transport ready"
        );

        Ok(Self {
            exchange: Arc::new(Exchange {
                client: Mutex::new(Some(client)),
                config,
                limiter,
            }),
            handle,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.exchange.config
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &Request, mut handler: Box<dyn TransportHandler>) -> InFlight {
        if self.is_closed() {
            handler.on_error(TransportError::closed("transport is closed"));
            return InFlight::detached();
        }

        let request = match apply_request_filters(
            &self.exchange.config.request_filters,
            request.clone(),
        ) {
            Ok(request) => request,
            Err(error) => {
                debug!(%error, "request refused by filter");
                handler.on_error(error);
                return InFlight::detached();
            }
        };

        let exchange = Arc::clone(&self.exchange);
        let task = self.handle.spawn(exchange.run(request, handler));
        InFlight::from_abort_handle(task.abort_handle())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(limiter) = &self.exchange.limiter {
                limiter.close();
            }
            self.exchange.release();
            debug!("http transport closed, connection pool released");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Exchange {
    fn client(&self) -> Option<reqwest::Client> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn release(&self) -> bool {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    async fn run(self: Arc<Self>, request: Request, mut handler: Box<dyn TransportHandler>) {
        let _permit = match &self.limiter {
            Some(limiter) => match Arc::clone(limiter).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    handler.on_error(TransportError::closed("transport is closed"));
                    return;
                }
            },
            None => None,
        };

        let Some(client) = self.client() else {
            handler.on_error(TransportError::closed("transport is closed"));
            return;
        };

        let max_replays = self.config.options.max_request_retry;
        let mut replays = 0;

        loop {
            let outcome = match prepare(&client, &request) {
                Ok(prepared) => client.execute(prepared).await,
                Err(err) => Err(err),
            };

            match outcome {
                Ok(response) => {
                    let ctx = ResponseContext {
                        request: &request,
                        status: response.status(),
                        headers: response.headers(),
                        replays,
                    };
                    if replays < max_replays
                        && response_replay_requested(&self.config.response_filters, &ctx)
                    {
                        replays += 1;
                        debug!(status = %ctx.status, replays, "response filter requested replay");
                        continue;
                    }
                    stream_response(response, handler.as_mut()).await;
                    return;
                }
                Err(err) => {
                    let error = TransportError::from(err);
                    if error.is_io_failure()
                        && replays < max_replays
                        && io_replay_requested(
                            &self.config.io_failure_filters,
                            &request,
                            &error,
                            replays,
                        )
                    {
                        replays += 1;
                        warn!(%error, replays, "io failure filter requested replay");
                        continue;
                    }
                    handler.on_error(error);
                    return;
                }
            }
        }
    }

}

fn prepare(
    client: &reqwest::Client,
    request: &Request,
) -> Result<reqwest::Request, reqwest::Error> {
    let mut builder = client
        .request(request.method().clone(), request.url().clone())
        .headers(request.headers().clone());
    if let Some(body) = request.body() {
        builder = builder.body(body.clone());
    }
    builder.build()
}

async fn stream_response(mut response: reqwest::Response, handler: &mut dyn TransportHandler) {
    if handler.on_status(response.status()) == HandlerState::Abort
        || handler.on_headers(response.headers()) == HandlerState::Abort
    {
        handler.on_completed();
        return;
    }

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if handler.on_body_chunk(chunk) == HandlerState::Abort {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                handler.on_error(err.into());
                return;
            }
        }
    }

    handler.on_completed();
}
