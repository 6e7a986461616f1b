//! HTTP client for the REST surface of a node.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Paths relative to the node's base URL, with the protocol version prefix
//! * The shared secret on every request
//! * Per-request timeouts and connection pool settings
//!
//! # Example
//!
//! ```rust
//! use lavanode::http::{Client, RestRequest};
//! use reqwest::Method;
//!
//! let client = Client::new(&options, "lavanode/0.1.0")?;
//! let request = RestRequest::new(
//!     Method::GET,
//!     options.version_path(),
//!     "stats",
//!     &options.password,
//!     options.request_timeout,
//! );
//! let response = client.execute(request).await?;
//! ```

use std::time::Duration;

use reqwest::{
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Body, Method, Url,
};
use serde::Serialize;
use veil::Redact;

use crate::{config::NodeOptions, error::Result};

/// HTTP client bound to one node.
pub struct Client {
    /// Pooled client shared by all requests to the node.
    inner: reqwest::Client,

    /// `http(s)://host:port` of the node.
    base_url: Url,
}

impl Client {
    /// Duration to keep idle TCP connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a client for the node described by `options`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * the host and port do not form a valid URL
    /// * HTTP client creation fails
    pub fn new(options: &NodeOptions, user_agent: &str) -> Result<Self> {
        let scheme = if options.secure { "https" } else { "http" };
        let base_url = Url::parse(&format!("{scheme}://{}:{}", options.host, options.port))?;

        let mut http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .user_agent(user_agent);

        if let Some(max_idle) = options.pool.max_idle_per_host {
            http_client = http_client.pool_max_idle_per_host(max_idle);
        }
        if let Some(idle_timeout) = options.pool.idle_timeout {
            http_client = http_client.pool_idle_timeout(idle_timeout);
        }

        Ok(Self {
            inner: http_client.build()?,
            base_url,
        })
    }

    /// `http(s)://host:port` of the node.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the `reqwest` request for `request`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the path does not form a valid URL or
    /// the shared secret is not a valid header value.
    pub fn build(&self, request: RestRequest) -> Result<reqwest::Request> {
        let mut url = self.base_url.join(&request.path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        let mut http_request = reqwest::Request::new(request.method, url);
        *http_request.timeout_mut() = Some(request.timeout);

        let headers = http_request.headers_mut();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&request.authorization)?);

        if let Some(body) = request.body {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *http_request.body_mut() = Some(Body::from(body));
        }

        Ok(http_request)
    }

    /// Executes a request.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * the request cannot be built
    /// * a network error occurs or the request times out
    /// * the node responds with an error status
    pub async fn execute(&self, request: RestRequest) -> Result<reqwest::Response> {
        let request = self.build(request)?;
        trace!("{} {}", request.method(), request.url().path());

        let response = self.inner.execute(request).await?;
        response.error_for_status().map_err(Into::into)
    }
}

/// Descriptor of a REST request to a node.
///
/// The shared secret is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Redact)]
pub struct RestRequest {
    pub method: Method,

    /// Absolute path, including the version prefix.
    pub path: String,

    pub query: Vec<(String, String)>,

    /// JSON body, sent with a `Content-Type` of `application/json`.
    pub body: Option<String>,

    pub timeout: Duration,

    #[redact]
    authorization: String,
}

impl RestRequest {
    /// Creates a request for `endpoint`.
    ///
    /// The endpoint is taken relative to the version prefix; a leading `/`
    /// is ignored.
    #[must_use]
    pub fn new(
        method: Method,
        version: Option<&str>,
        endpoint: &str,
        password: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            method,
            path: path(version, endpoint),
            query: Vec::new(),
            body: None,
            timeout,
            authorization: password.to_owned(),
        }
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Sets `body` serialized to JSON as request body.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `body` cannot be serialized.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self)
    }
}

/// Path of `endpoint` below the optional version prefix.
#[must_use]
pub fn path(version: Option<&str>, endpoint: &str) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    match version {
        Some(version) => format!("/{version}/{endpoint}"),
        None => format!("/{endpoint}"),
    }
}
