//! HTTP transport used by the client.
//!
//! The client only depends on the [`Transport`] trait. [`ReqwestTransport`] is
//! the default implementation and owns connection handling, cookies, timeouts
//! and retries on transient server errors.

use crate::error::{Result, ServerClientError};
use crate::upload::MultipartUpload;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for transient server failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff_factor * 2^(n-1)`
    pub backoff_factor: Duration,
    /// Statuses that trigger a retry
    pub statuses: Vec<u16>,
    /// Methods retried after the request may have reached the server
    pub methods: Vec<Method>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_factor: Duration::from_secs(1),
            statuses: vec![502, 503, 504],
            methods: vec![
                Method::GET,
                Method::PUT,
                Method::HEAD,
                Method::DELETE,
                Method::OPTIONS,
                Method::TRACE,
            ],
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn retries_status(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// Whether `method` may be sent again once the server has seen it.
    pub fn retries_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Delay before the given retry (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_factor
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
    }
}

/// Body of an outgoing request.
#[derive(Debug)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(MultipartUpload),
}

/// A fully resolved request handed to a [`Transport`].
#[derive(Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Raw answer of the server.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Decode the body as JSON.
    pub fn decode(&self) -> ResponseBody {
        match serde_json::from_slice(&self.body) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Undecodable {
                status: self.status,
            },
        }
    }
}

/// Outcome of decoding a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    /// Empty or non-JSON body
    Undecodable { status: u16 },
}

/// Pluggable HTTP transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request, including any retries the transport implements.
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse>;

    /// Release connections. Called exactly once by the owning client.
    fn close(&mut self) {}
}

/// Default transport backed by a reqwest client with a cookie store.
pub struct ReqwestTransport {
    http: Option<Client>,
    retry: RetryPolicy,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, connect_timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .cookie_store(true)
            .user_agent(format!("docspell-client/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http: Some(http),
            retry,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // Multipart forms are single-use, so every attempt rebuilds the request.
    fn build(http: &Client, request: &TransportRequest) -> Result<RequestBuilder> {
        let mut builder = http.request(request.method.clone(), &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(upload) => builder.multipart(upload.to_form()?),
        };

        Ok(builder)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        let http = self.http.as_ref().ok_or(ServerClientError::ClientShutdown)?;
        let mut retries = 0;

        loop {
            let outcome = Self::build(http, &request)?.send().await;

            // A failed connect never reached the server; anything else did.
            let retryable = match &outcome {
                Err(e) if e.is_connect() => true,
                Ok(response) => {
                    self.retry.retries_method(&request.method)
                        && self.retry.retries_status(response.status().as_u16())
                }
                Err(e) => e.is_timeout() && self.retry.retries_method(&request.method),
            };

            if retryable && retries < self.retry.max_retries {
                retries += 1;
                let delay = self.retry.backoff(retries);
                warn!(
                    method = %request.method,
                    url = %request.url,
                    retry = retries,
                    delay = ?delay,
                    "Transient failure, retrying request"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let response = outcome?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;

            return Ok(TransportResponse { status, body });
        }
    }

    fn close(&mut self) {
        if self.http.take().is_some() {
            debug!("HTTP transport released");
        }
    }
}
