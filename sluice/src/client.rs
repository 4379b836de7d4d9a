use crate::{
    completion::{self, ResponseFuture},
    error::ClientError,
    filter::{IoFailureFilter, RequestFilter, ResponseFilter, same_filter},
    handler::{AsyncHandler, ResponseCollector},
    pool::WorkerPool,
    request::{Fingerprint, Request},
    response::Response,
    retry::RetryExecutor,
    transport::{HttpTransport, Transport, TransportConfig},
};
use sluice_cache::{CacheSettings, CacheStats, LoadingCache};
use sluice_config::{ClientOptions, RetryBackoff};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tracing::{debug, info};

type TransportFactory =
    Arc<dyn Fn(&TransportConfig) -> Result<Arc<dyn Transport>, ClientError> + Send + Sync>;

/// Entry point for issuing requests.
///
/// Plain GETs go through a response cache that shares one in-flight load
/// between identical requests and keeps the result for
/// `cache_expire_after_write`. Everything else, and GETs marked
/// `critical_get`, goes straight to the transport, through the retry
/// executor when the request names status codes to retry on.
///
/// Clones share the same transport, pool and cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: TransportConfig,
    transport: Arc<dyn Transport>,
    pool: WorkerPool,
    cache: LoadingCache<Fingerprint, Response, ClientError>,
    retry: RetryExecutor,
}

impl ClientInner {
    /// Critical path run inside a pool task: no further pool submissions.
    async fn run_critical<H, F>(
        &self,
        request: &Request,
        new_handler: F,
    ) -> Result<H::Output, ClientError>
    where
        H: AsyncHandler,
        F: Fn() -> H,
    {
        if request.retry_status_codes().is_empty() {
            completion::attempt(self.transport.as_ref(), request, new_handler())
                .await
                .result
        } else {
            self.retry.run(request, new_handler).await
        }
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Client with default options on the current tokio runtime.
    pub fn new() -> Result<Self, ClientError> {
        ClientBuilder::default().build()
    }

    /// Execute `request`, serving cacheable GETs from the response cache.
    pub fn execute(&self, request: Request) -> Result<ResponseFuture<Response>, ClientError> {
        self.ensure_open()?;
        if !request.is_cacheable() {
            return self.critical_execute(request);
        }

        let key = request.fingerprint();
        let load = self.inner.cache.get_with(key, || self.load(request))?;
        Ok(ResponseFuture::detached(load))
    }

    /// [`Client::execute`] for every request, futures in input order.
    ///
    /// The first synchronous failure aborts the call. Futures created before
    /// it are dropped, which cancels their direct executions.
    pub fn execute_all<I>(&self, requests: I) -> Result<Vec<ResponseFuture<Response>>, ClientError>
    where
        I: IntoIterator<Item = Request>,
    {
        requests
            .into_iter()
            .map(|request| self.execute(request))
            .collect()
    }

    /// Execute `request` bypassing the response cache.
    pub fn critical_execute(
        &self,
        request: Request,
    ) -> Result<ResponseFuture<Response>, ClientError> {
        self.critical_execute_with(request, ResponseCollector::default)
    }

    /// Execute `request` bypassing the cache with a custom handler.
    ///
    /// `new_handler` builds a fresh handler for every attempt.
    pub fn critical_execute_with<H, F>(
        &self,
        request: Request,
        new_handler: F,
    ) -> Result<ResponseFuture<H::Output>, ClientError>
    where
        H: AsyncHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.ensure_open()?;

        if request.retry_status_codes().is_empty() {
            debug!(method = %request.method(), url = %request.url(), "direct dispatch");
            return Ok(completion::dispatch(
                self.inner.transport.as_ref(),
                &request,
                new_handler(),
            ));
        }

        let inner = Arc::clone(&self.inner);
        let task = self
            .inner
            .pool
            .submit(async move { inner.retry.run(&request, new_handler).await })?;
        Ok(ResponseFuture::task(task))
    }

    pub fn critical_execute_all<I>(
        &self,
        requests: I,
    ) -> Result<Vec<ResponseFuture<Response>>, ClientError>
    where
        I: IntoIterator<Item = Request>,
    {
        requests
            .into_iter()
            .map(|request| self.critical_execute(request))
            .collect()
    }

    fn load(
        &self,
        request: Request,
    ) -> Result<impl Future<Output = Result<Response, ClientError>> + Send + 'static, ClientError> {
        let inner = Arc::clone(&self.inner);
        debug!(url = %request.url(), "cache miss, loading");
        let task = self.inner.pool.submit(async move {
            inner
                .run_critical(&request, ResponseCollector::default)
                .await
        })?;

        Ok(async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(ClientError::Incomplete(format!("cache load failed: {err}"))),
            }
        })
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    /// Close the transport, shut down the worker pool and stop cache
    /// maintenance. Safe to call any number of times.
    pub fn close(&self) {
        if !self.inner.transport.is_closed() {
            self.inner.transport.close();
        }
        if !self.inner.pool.is_shutdown() {
            self.inner.pool.shutdown();
        }
        self.inner.cache.shutdown_maintenance();
        info!("client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.transport.is_closed()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.config.options
    }

    pub fn transport_config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn connect_timeout(&self) -> Duration {
        self.options().connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.options().read_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.options().request_timeout
    }

    pub fn max_connections(&self) -> Option<usize> {
        self.options().max_connections
    }

    pub fn max_connections_per_host(&self) -> Option<usize> {
        self.options().max_connections_per_host
    }

    pub fn pooled_connection_idle_timeout(&self) -> Duration {
        self.options().pooled_connection_idle_timeout
    }

    pub fn connection_ttl(&self) -> Option<Duration> {
        self.options().connection_ttl
    }

    pub fn max_redirects(&self) -> usize {
        self.options().max_redirects
    }

    pub fn max_request_retry(&self) -> u32 {
        self.options().max_request_retry
    }

    pub fn user_agent(&self) -> &str {
        &self.options().user_agent
    }

    pub fn is_accept_any_certificate(&self) -> bool {
        self.options().accept_any_certificate
    }

    pub fn is_allow_pooling_connections(&self) -> bool {
        self.options().allow_pooling_connections
    }

    pub fn is_allow_pooling_ssl_connections(&self) -> bool {
        self.options().allow_pooling_ssl_connections
    }

    pub fn is_compression_enforced(&self) -> bool {
        self.options().compression_enforced
    }

    pub fn is_follow_redirect(&self) -> bool {
        self.options().follow_redirect
    }

    pub fn request_filters(&self) -> &[Arc<dyn RequestFilter>] {
        &self.inner.config.request_filters
    }

    pub fn response_filters(&self) -> &[Arc<dyn ResponseFilter>] {
        &self.inner.config.response_filters
    }

    pub fn io_failure_filters(&self) -> &[Arc<dyn IoFailureFilter>] {
        &self.inner.config.io_failure_filters
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub fn cache_expire_after_write(&self) -> Duration {
        self.options().cache_expire_after_write
    }

    pub fn cache_maximum_size(&self) -> u64 {
        self.options().cache_maximum_size
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Entries resident in the response cache, expired ones included until
    /// the next sweep.
    pub fn cached_entries(&self) -> u64 {
        self.inner.cache.entry_count()
    }

    pub fn is_cache_maintenance_running(&self) -> bool {
        self.inner.cache.is_maintenance_running()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Collects options, filters, a worker pool and a transport for a [`Client`].
#[derive(Clone, Default)]
pub struct ClientBuilder {
    options: ClientOptions,
    request_filters: Vec<Arc<dyn RequestFilter>>,
    response_filters: Vec<Arc<dyn ResponseFilter>>,
    io_failure_filters: Vec<Arc<dyn IoFailureFilter>>,
    worker_pool: Option<WorkerPool>,
    transport: Option<TransportFactory>,
}

impl ClientBuilder {
    /// Replace every option at once, filters and pool stay as they are.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.options.read_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.options.max_connections = Some(max);
        self
    }

    pub fn max_connections_per_host(mut self, max: usize) -> Self {
        self.options.max_connections_per_host = Some(max);
        self
    }

    pub fn pooled_connection_idle_timeout(mut self, timeout: Duration) -> Self {
        self.options.pooled_connection_idle_timeout = timeout;
        self
    }

    pub fn connection_ttl(mut self, ttl: Duration) -> Self {
        self.options.connection_ttl = Some(ttl);
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.options.max_redirects = max;
        self
    }

    pub fn max_request_retry(mut self, max: u32) -> Self {
        self.options.max_request_retry = max;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.options.user_agent = user_agent.into();
        self
    }

    pub fn accept_any_certificate(mut self, accept: bool) -> Self {
        self.options.accept_any_certificate = accept;
        self
    }

    pub fn allow_pooling_connections(mut self, allow: bool) -> Self {
        self.options.allow_pooling_connections = allow;
        self
    }

    pub fn allow_pooling_ssl_connections(mut self, allow: bool) -> Self {
        self.options.allow_pooling_ssl_connections = allow;
        self
    }

    pub fn compression_enforced(mut self, enforced: bool) -> Self {
        self.options.compression_enforced = enforced;
        self
    }

    pub fn follow_redirect(mut self, follow: bool) -> Self {
        self.options.follow_redirect = follow;
        self
    }

    pub fn max_workers(mut self, max: usize) -> Self {
        self.options.max_workers = max;
        self
    }

    pub fn cache_expire_after_write(mut self, ttl: Duration) -> Self {
        self.options.cache_expire_after_write = ttl;
        self
    }

    pub fn cache_maximum_size(mut self, max: u64) -> Self {
        self.options.cache_maximum_size = max;
        self
    }

    pub fn cache_cleanup_interval(mut self, interval: Duration) -> Self {
        self.options.cache_cleanup_interval = interval;
        self
    }

    pub fn retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.options.retry_backoff = Some(backoff);
        self
    }

    /// Run retries and cache loads on `pool` instead of a pool of
    /// `max_workers` on the current runtime.
    pub fn worker_pool(mut self, pool: WorkerPool) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    pub fn add_request_filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.request_filters.push(filter);
        self
    }

    pub fn remove_request_filter(mut self, filter: &Arc<dyn RequestFilter>) -> Self {
        self.request_filters.retain(|f| !same_filter(f, filter));
        self
    }

    pub fn add_response_filter(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.response_filters.push(filter);
        self
    }

    pub fn remove_response_filter(mut self, filter: &Arc<dyn ResponseFilter>) -> Self {
        self.response_filters.retain(|f| !same_filter(f, filter));
        self
    }

    pub fn add_io_failure_filter(mut self, filter: Arc<dyn IoFailureFilter>) -> Self {
        self.io_failure_filters.push(filter);
        self
    }

    pub fn remove_io_failure_filter(mut self, filter: &Arc<dyn IoFailureFilter>) -> Self {
        self.io_failure_filters.retain(|f| !same_filter(f, filter));
        self
    }

    /// Use an existing transport instead of the `reqwest` one.
    pub fn transport<T: Transport>(mut self, transport: Arc<T>) -> Self {
        self.transport = Some(Arc::new(move |_: &TransportConfig| {
            Ok::<_, ClientError>(Arc::clone(&transport) as Arc<dyn Transport>)
        }));
        self
    }

    /// Build the transport from the final configuration with `factory`.
    pub fn transport_with<F>(mut self, factory: F) -> Self
    where
        F: Fn(&TransportConfig) -> Result<Arc<dyn Transport>, ClientError> + Send + Sync + 'static,
    {
        self.transport = Some(Arc::new(factory));
        self
    }

    pub fn build(self) -> Result<Client, ClientError> {
        self.options.validate()?;

        let pool = match self.worker_pool {
            Some(pool) => pool,
            None => WorkerPool::current(self.options.max_workers)?,
        };

        let config = TransportConfig {
            options: self.options,
            request_filters: self.request_filters,
            response_filters: self.response_filters,
            io_failure_filters: self.io_failure_filters,
        };

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(factory) => factory(&config)?,
            None => Arc::new(HttpTransport::with_handle(
                config.clone(),
                pool.handle().clone(),
            )?),
        };

        let cache = LoadingCache::new(
            CacheSettings {
                expire_after_write: config.options.cache_expire_after_write,
                maximum_size: config.options.cache_maximum_size,
                cleanup_interval: config.options.cache_cleanup_interval,
            },
            pool.handle(),
        );
        let retry = RetryExecutor::new(Arc::clone(&transport), &config.options);

        info!(
            max_workers = pool.max_workers(),
            cache_maximum_size = config.options.cache_maximum_size,
            cache_expire_after_write = ?config.options.cache_expire_after_write,
            "client built"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                transport,
                pool,
                cache,
                retry,
            }),
        })
    }
}

fn same_filters<T: ?Sized>(a: &[Arc<T>], b: &[Arc<T>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_filter(x, y))
}

/// Options compare by value, filters and the pool by identity. The transport
/// is left out.
impl PartialEq for ClientBuilder {
    fn eq(&self, other: &Self) -> bool {
        self.options == other.options
            && same_filters(&self.request_filters, &other.request_filters)
            && same_filters(&self.response_filters, &other.response_filters)
            && same_filters(&self.io_failure_filters, &other.io_failure_filters)
            && self.worker_pool == other.worker_pool
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("options", &self.options)
            .field("request_filters", &self.request_filters.len())
            .field("response_filters", &self.response_filters.len())
            .field("io_failure_filters", &self.io_failure_filters.len())
            .field("worker_pool", &self.worker_pool)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}
