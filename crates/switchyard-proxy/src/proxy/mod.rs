//! Per-request proxy engine
//!
//! Every proxied request goes through [`ProxyEngine::handle`]:
//! 1. Strip any client supplied access token
//! 2. Run the identity middleware (when enabled)
//! 3. Select policy and director, answer 502 when nothing matches
//! 4. Rewrite the request and forward it upstream, streaming both bodies

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, Request, Response};
use futures::TryStreamExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identity::{Claims, IdentityMiddleware, ACCESS_TOKEN_HEADER};
use crate::routing::RoutingEngine;

/// Headers that only apply to a single connection
const HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
];

/// Remove hop-by-hop headers, including those named by `Connection`
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP_HEADERS.iter()) {
        headers.remove(name);
    }
}

/// Sends a rewritten request to its backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forward `request`, whose URI is absolute, and return the backend response
    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>>;
}

/// [`Upstream`] backed by a shared reqwest client
#[derive(Clone)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    /// Create the client; redirects are relayed to the caller, not followed
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for ReqwestUpstream {
    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();
        let mut headers = parts.headers;
        strip_hop_by_hop_headers(&mut headers);

        let response = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop_headers(&mut headers);

        let stream = response.bytes_stream().inspect_err(|e| {
            warn!(error = %e, "Upstream response stream failed");
        });
        let mut relayed = Response::new(Body::from_stream(stream));
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        Ok(relayed)
    }
}

/// Identity, routing and forwarding for one request
pub struct ProxyEngine {
    routing: RoutingEngine,
    identity: Option<IdentityMiddleware>,
    upstream: Arc<dyn Upstream>,
}

impl ProxyEngine {
    /// Create an engine; `identity` is `None` when the middleware is disabled
    pub fn new(
        routing: RoutingEngine,
        identity: Option<IdentityMiddleware>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            routing,
            identity,
            upstream,
        }
    }

    /// The identity middleware, if enabled
    pub fn identity(&self) -> Option<&IdentityMiddleware> {
        self.identity.as_ref()
    }

    /// Handle one request for a caller with optional verified `claims`
    pub async fn handle(
        &self,
        claims: Option<&Claims>,
        mut request: Request<Body>,
    ) -> Result<Response<Body>> {
        request.headers_mut().remove(ACCESS_TOKEN_HEADER);

        if let Some(identity) = &self.identity {
            identity.apply(claims, request.headers_mut()).await?;
        }

        let (policy, rewrite) = self.routing.select(claims, request.uri()).await;
        if rewrite.is_noop() {
            return Err(Error::NoRoute(format!(
                "no director for {} in policy {}",
                request.uri().path(),
                policy
            )));
        }

        rewrite.apply(&mut request)?;

        debug!(
            policy = %policy,
            method = %request.method(),
            target = %request.uri(),
            "Forwarding request"
        );
        self.upstream.forward(request).await
    }
}

#[cfg(test)]
mod tests;
