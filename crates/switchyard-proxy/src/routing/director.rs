//! Request rewriting towards a single backend

use axum::http::header::{HOST, USER_AGENT};
use axum::http::{HeaderValue, Request, Uri};
use url::Url;

use super::RoutingError;

/// Rewrites requests so they target one backend URL
///
/// Everything derived from the backend URL is computed once at build time;
/// applying a director only touches the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Director {
    backend: String,
    scheme: String,
    authority: String,
    base_path: String,
    base_query: String,
    apache_vhost: bool,
}

impl Director {
    /// Build a director for `backend`
    ///
    /// Fails if the URL cannot be parsed or has no host.
    pub fn new(backend: &str, apache_vhost: bool) -> Result<Self, RoutingError> {
        let malformed = |reason: String| RoutingError::MalformedBackendUrl {
            url: backend.to_string(),
            reason,
        };

        let url = Url::parse(backend).map_err(|e| malformed(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| malformed("missing host".to_string()))?;
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            backend: backend.to_string(),
            scheme: url.scheme().to_string(),
            authority,
            base_path: url.path().to_string(),
            base_query: url.query().unwrap_or_default().to_string(),
            apache_vhost,
        })
    }

    /// Backend URL as configured
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// `host[:port]` of the backend
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Whether the Host header is overwritten
    pub fn apache_vhost(&self) -> bool {
        self.apache_vhost
    }

    /// Absolute backend URI for an inbound path and query
    pub fn target(&self, path: &str, query: &str) -> Result<Uri, RoutingError> {
        let path = single_joining_slash(&self.base_path, path);
        let query = merge_query(&self.base_query, query);

        let mut target = format!("{}://{}{}", self.scheme, self.authority, path);
        if !query.is_empty() {
            target.push('?');
            target.push_str(&query);
        }

        target
            .parse::<Uri>()
            .map_err(|e| RoutingError::InvalidTarget {
                target,
                reason: e.to_string(),
            })
    }

    /// Point `request` at the backend
    pub fn apply<B>(&self, request: &mut Request<B>) -> Result<(), RoutingError> {
        let uri = request.uri();
        let target = self.target(uri.path(), uri.query().unwrap_or_default())?;
        *request.uri_mut() = target;

        let headers = request.headers_mut();
        if self.apache_vhost {
            let host = HeaderValue::from_str(&self.authority).map_err(|e| {
                RoutingError::InvalidTarget {
                    target: self.authority.clone(),
                    reason: e.to_string(),
                }
            })?;
            headers.insert(HOST, host);
        }

        // Empty rather than absent so the HTTP client does not add its own
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(""));
        }

        Ok(())
    }
}

/// Join two path segments with exactly one slash between them
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}

/// Merge the backend's fixed query with the request query, backend first
pub fn merge_query(backend: &str, request: &str) -> String {
    if backend.is_empty() || request.is_empty() {
        format!("{}{}", backend, request)
    } else {
        format!("{}&{}", backend, request)
    }
}
