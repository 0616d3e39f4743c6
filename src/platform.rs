//! Interfaces to the host platform: HTTP transport, POST capability and the image-pixel
//! fallback. The crate ships a [`reqwest`]-based implementation in [`ReqwestPlatform`].
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::Method;

use crate::Result;

/// Response to an HTTP request, as seen by the event sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    // Keys are lowercase.
    headers: HashMap<String, String>,
}

impl HttpResponse {
    /// Create a response with the given status and no headers.
    pub fn new(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
        }
    }

    /// Add a response header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> HttpResponse {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header value. Header names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Issues HTTP requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request.
    ///
    /// Returns `Ok(None)` if the platform sent the request fire-and-forget and there is no
    /// response to report. Returns `Err` on transport-level failures (network error, timeout).
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&str>,
    ) -> Result<Option<HttpResponse>>;
}

/// One-way request used when POST is not available, typically by loading an image.
pub trait FallbackPing: Send + Sync {
    /// Fire a GET to `url` without waiting for it to complete.
    fn ping(&self, url: &str);
}

impl<F: Fn(&str) + Send + Sync> FallbackPing for F {
    fn ping(&self, url: &str) {
        self(url)
    }
}

/// Capabilities of the runtime the SDK runs in.
pub trait Platform: Send + Sync {
    /// HTTP capability. `None` in environments without network access.
    fn http(&self) -> Option<&dyn HttpTransport>;

    /// Whether POST requests can be sent in the current runtime context. Some browsers forbid
    /// them while a page is unloading.
    fn http_allows_post(&self) -> bool {
        true
    }

    /// Image-pixel sender used when POST is not available.
    fn fallback_ping(&self) -> Option<&dyn FallbackPing> {
        None
    }
}

/// [`HttpTransport`] backed by an async [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a transport with [`ReqwestTransport::DEFAULT_TIMEOUT`].
    pub fn new() -> Result<ReqwestTransport> {
        ReqwestTransport::with_timeout(ReqwestTransport::DEFAULT_TIMEOUT)
    }

    /// Create a transport with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<ReqwestTransport> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ReqwestTransport { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&str>,
    ) -> Result<Option<HttpResponse>> {
        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body.to_owned());
        }

        let response = request.send().await?;

        let mut result = HttpResponse::new(response.status().as_u16());
        for (name, value) in response.headers() {
            // Non-UTF-8 header values are not interesting to us.
            if let Ok(value) = value.to_str() {
                result = result.with_header(name.as_str(), value);
            }
        }
        Ok(Some(result))
    }
}

/// Server-side [`Platform`]: POST is always available and there's no image-pixel fallback.
#[derive(Debug, Clone)]
pub struct ReqwestPlatform {
    transport: ReqwestTransport,
}

impl ReqwestPlatform {
    /// Create a platform with a default [`ReqwestTransport`].
    pub fn new() -> Result<ReqwestPlatform> {
        Ok(ReqwestPlatform {
            transport: ReqwestTransport::new()?,
        })
    }

    /// Create a platform using the given transport.
    pub fn with_transport(transport: ReqwestTransport) -> ReqwestPlatform {
        ReqwestPlatform { transport }
    }
}

impl Platform for ReqwestPlatform {
    fn http(&self) -> Option<&dyn HttpTransport> {
        Some(&self.transport)
    }
}
