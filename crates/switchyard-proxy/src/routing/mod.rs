//! Policy-based request routing
//!
//! The routing engine asks the policy selector which backend cluster serves a
//! caller, then looks up the director for the request path in that policy.
//! The director table is built once and shared read-only.

mod director;
mod table;

pub use director::{merge_query, single_joining_slash, Director};
pub use table::DirectorTable;

use std::sync::Arc;

use axum::http::{Request, Uri};
use thiserror::Error;

use crate::identity::Claims;
use crate::policy::PolicySelector;

/// Routing errors, all of them configuration problems
#[derive(Debug, Error)]
pub enum RoutingError {
    /// A route backend could not be parsed as a URL
    #[error("malformed backend URL {url}: {reason}")]
    MalformedBackendUrl {
        /// Configured backend
        url: String,
        /// Parser message
        reason: String,
    },

    /// A regex or query endpoint could not be compiled
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpointPattern {
        /// Configured endpoint
        endpoint: String,
        /// Reason
        reason: String,
    },

    /// Two routes in one policy share an endpoint
    #[error("policy {policy} has more than one route for endpoint {endpoint}")]
    DuplicateEndpoint {
        /// Policy name
        policy: String,
        /// Endpoint
        endpoint: String,
    },

    /// The rewritten URI is not a valid request target
    #[error("invalid rewrite target {target}: {reason}")]
    InvalidTarget {
        /// Target that failed to parse
        target: String,
        /// Parser message
        reason: String,
    },
}

/// Outcome of route selection
#[derive(Debug, Clone)]
pub enum Rewrite {
    /// Rewrite towards a backend
    Director(Arc<Director>),
    /// Leave the request untouched
    Noop,
}

impl Rewrite {
    /// Apply the rewrite to `request`
    pub fn apply<B>(&self, request: &mut Request<B>) -> Result<(), RoutingError> {
        match self {
            Rewrite::Director(director) => director.apply(request),
            Rewrite::Noop => Ok(()),
        }
    }

    /// Whether this rewrite leaves requests untouched
    pub fn is_noop(&self) -> bool {
        matches!(self, Rewrite::Noop)
    }

    /// The selected director, if any
    pub fn director(&self) -> Option<&Director> {
        match self {
            Rewrite::Director(director) => Some(director.as_ref()),
            Rewrite::Noop => None,
        }
    }
}

/// Per-request policy selection plus director lookup
pub struct RoutingEngine {
    table: DirectorTable,
    selector: Arc<dyn PolicySelector>,
}

impl RoutingEngine {
    /// Create an engine over a built table and selector
    pub fn new(table: DirectorTable, selector: Arc<dyn PolicySelector>) -> Self {
        Self { table, selector }
    }

    /// The director table
    pub fn table(&self) -> &DirectorTable {
        &self.table
    }

    /// Select the policy for the caller and the rewrite for `uri`
    ///
    /// The caller is identified by the `preferred_username` of its claims;
    /// requests without claims are routed as unauthenticated.
    pub async fn select(&self, claims: Option<&Claims>, uri: &Uri) -> (String, Rewrite) {
        let user_id = claims.map(|c| c.preferred_username.as_str());
        let policy = self.selector.policy(user_id).await;
        let rewrite = self
            .table
            .select(&policy, uri.path(), uri.query().unwrap_or_default());
        (policy, rewrite)
    }
}
