// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP wire layer: the enrollment POST and the session probe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Once;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use url::Url;

use super::payload::APPLY_PATH;
use crate::error::TransportError;
use crate::session::{SessionProbe, TokenPair};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const INDEX_PATH: &str = "/index.do";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One enrollment request as handed to the wire.
#[derive(Debug, Clone, Copy)]
pub struct WireRequest<'a> {
    pub body: &'a str,
    pub cookie: &'a str,
    pub timeout: Duration,
}

/// Sends enrollment requests. Returns the response body text.
pub trait Transport: Send + Sync {
    fn post_form<'a>(
        &'a self,
        request: WireRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<String, TransportError>> + Send + 'a>>;
}

/// Install the ring crypto provider for rustls once per process.
pub fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Addresses derived from the configured base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub origin: String,
    pub apply_url: String,
    pub index_url: String,
}

impl Endpoint {
    pub fn parse(base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)?;
        let Some(host) = base.host_str() else {
            anyhow::bail!("base URL has no host: {base_url}");
        };
        let host = match base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        let origin = base.origin().ascii_serialization();
        Ok(Self {
            apply_url: base.join(APPLY_PATH)?.to_string(),
            index_url: base.join(INDEX_PATH)?.to_string(),
            host,
            origin,
        })
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_str(&self.host)?);
        headers.insert(header::ORIGIN, HeaderValue::from_str(&self.origin)?);
        headers.insert(header::REFERER, HeaderValue::from_str(&self.index_url)?);
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        Ok(headers)
    }
}

fn build_client(pool_size: usize) -> anyhow::Result<reqwest::Client> {
    ensure_crypto_provider();
    Ok(reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(pool_size.max(1))
        .tcp_nodelay(true)
        .build()?)
}

/// reqwest-backed enrollment transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Endpoint,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(endpoint: Endpoint, pool_size: usize) -> anyhow::Result<Self> {
        let headers = endpoint.headers()?;
        Ok(Self { client: build_client(pool_size)?, endpoint, headers })
    }

    async fn post(&self, request: WireRequest<'_>) -> Result<String, TransportError> {
        let resp = self
            .client
            .post(&self.endpoint.apply_url)
            .headers(self.headers.clone())
            .header(header::COOKIE, request.cookie)
            .body(request.body.to_owned())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| TransportError::from_reqwest(&e))?;
        if status.is_success() {
            return Ok(text);
        }

        // Error pages with a body are classified like any other response.
        if text.trim().is_empty() {
            Err(TransportError::status(status.as_u16()))
        } else {
            Ok(format!("HTTP Error {}: {text}", status.as_u16()))
        }
    }
}

impl Transport for HttpTransport {
    fn post_form<'a>(
        &'a self,
        request: WireRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<String, TransportError>> + Send + 'a>> {
        Box::pin(self.post(request))
    }
}

/// Session probe: `HEAD /index.do` with the session cookies, no redirects.
/// HTTP 200 means the session is valid.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl HttpProbe {
    pub fn new(endpoint: Endpoint) -> anyhow::Result<Self> {
        Ok(Self { client: build_client(1)?, endpoint })
    }
}

impl SessionProbe for HttpProbe {
    fn probe<'a>(
        &'a self,
        tokens: &'a TokenPair,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self
                .client
                .head(&self.endpoint.index_url)
                .header(header::COOKIE, tokens.cookie_header())
                .header(header::USER_AGENT, USER_AGENT)
                .timeout(PROBE_TIMEOUT)
                .send()
                .await?;
            Ok(resp.status() == reqwest::StatusCode::OK)
        })
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
