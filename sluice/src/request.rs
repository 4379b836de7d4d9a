use crate::error::ClientError;
use bytes::Bytes;
use reqwest::{
    Method, StatusCode, Url,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use std::collections::BTreeSet;

/// Status-triggered re-attempts allowed per request unless overridden.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// An HTTP request as the client sees it.
///
/// Besides the wire fields it carries the retry policy for status codes and
/// the `critical_get` flag that keeps a GET out of the response cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    retry_status_codes: BTreeSet<StatusCode>,
    max_retries: u32,
    critical_get: bool,
}

impl Request {
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    pub fn get(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::POST, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn retry_status_codes(&self) -> &BTreeSet<StatusCode> {
        &self.retry_status_codes
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_critical_get(&self) -> bool {
        self.critical_get
    }

    /// Only plain GETs go through the response cache.
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET && !self.critical_get
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.retry_status_codes.contains(&status)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// Collects request parts and validates them in [`RequestBuilder::build`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    retry_status_codes: BTreeSet<u16>,
    max_retries: u32,
    critical_get: bool,
}

impl RequestBuilder {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            retry_status_codes: BTreeSet::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            critical_get: false,
        }
    }

    /// Append a header value. Repeated names keep every value in order.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn retry_on(mut self, status: u16) -> Self {
        self.retry_status_codes.insert(status);
        self
    }

    pub fn retry_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_status_codes.extend(codes);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn critical_get(mut self, critical: bool) -> Self {
        self.critical_get = critical;
        self
    }

    pub fn build(self) -> Result<Request, ClientError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ClientError::InvalidRequest(format!("{}: {e}", self.url)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::InvalidRequest(format!("header `{name}`: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::InvalidRequest(format!("header `{name}`: {e}")))?;
            headers.append(header_name, header_value);
        }

        let retry_status_codes = self
            .retry_status_codes
            .iter()
            .map(|code| {
                StatusCode::from_u16(*code).map_err(|e| {
                    ClientError::InvalidRequest(format!("retry status {code}: {e}"))
                })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Request {
            method: self.method,
            url,
            headers,
            body: self.body,
            retry_status_codes,
            max_retries: self.max_retries,
            critical_get: self.critical_get,
        })
    }
}

/// Cache key of a request: method, URL, headers and body.
///
/// Header names are sorted while the values of one name keep their order, so
/// the order headers were added in does not change the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    method: Method,
    url: String,
    headers: Vec<(String, Vec<Vec<u8>>)>,
    body: Option<Bytes>,
}

impl Fingerprint {
    fn of(request: &Request) -> Self {
        let mut names: Vec<&HeaderName> = request.headers.keys().collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        let headers = names
            .into_iter()
            .map(|name| {
                let values = request
                    .headers
                    .get_all(name)
                    .iter()
                    .map(|value| value.as_bytes().to_vec())
                    .collect();
                (name.as_str().to_string(), values)
            })
            .collect();

        Self {
            method: request.method.clone(),
            url: request.url.as_str().to_string(),
            headers,
            body: request.body.clone(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
