//! Immutable policy -> director lookup table

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use switchyard_common::{Policy, RouteType, ROOT_ENDPOINT};
use tracing::{debug, warn};

use super::{Director, Rewrite, RoutingError};

/// Prefix route that additionally requires query parameters
#[derive(Debug)]
struct QueryRoute {
    endpoint: String,
    path: String,
    params: Vec<(String, String)>,
    director: Arc<Director>,
}

impl QueryRoute {
    fn matches(&self, path: &str, query: &[(String, String)]) -> bool {
        path.starts_with(&self.path)
            && self
                .params
                .iter()
                .all(|(k, v)| query.iter().any(|(qk, qv)| qk == k && qv == v))
    }
}

/// Directors of one policy, grouped by matching mode
#[derive(Debug, Default)]
struct PolicyDirectors {
    /// Longest endpoint first
    query: Vec<QueryRoute>,
    /// Configuration order
    regex: Vec<(Regex, Arc<Director>)>,
    /// Non-root prefixes, longest first
    prefix: Vec<(String, Arc<Director>)>,
    root: Option<Arc<Director>>,
}

/// Directors for every configured policy
///
/// Built once at startup and never mutated, so lookups need no locking.
#[derive(Debug, Default)]
pub struct DirectorTable {
    policies: HashMap<String, PolicyDirectors>,
}

impl DirectorTable {
    /// Build the table from configured policies
    pub fn build(policies: &[Policy]) -> Result<Self, RoutingError> {
        let mut table = HashMap::new();

        for policy in policies {
            let mut directors = PolicyDirectors::default();
            let mut seen = HashSet::new();

            for route in &policy.routes {
                if !seen.insert(route.endpoint.as_str()) {
                    return Err(RoutingError::DuplicateEndpoint {
                        policy: policy.name.clone(),
                        endpoint: route.endpoint.clone(),
                    });
                }

                let director = Arc::new(Director::new(&route.backend, route.apache_vhost)?);

                match route.route_type {
                    RouteType::Prefix if route.endpoint == ROOT_ENDPOINT => {
                        directors.root = Some(director);
                    }
                    RouteType::Prefix => {
                        directors.prefix.push((route.endpoint.clone(), director));
                    }
                    RouteType::Query => {
                        directors
                            .query
                            .push(parse_query_route(&route.endpoint, director)?);
                    }
                    RouteType::Regex => {
                        let pattern = Regex::new(&route.endpoint).map_err(|e| {
                            RoutingError::InvalidEndpointPattern {
                                endpoint: route.endpoint.clone(),
                                reason: e.to_string(),
                            }
                        })?;
                        directors.regex.push((pattern, director));
                    }
                }
            }

            // Stable sorts keep configuration order among equal lengths
            directors
                .prefix
                .sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            directors
                .query
                .sort_by(|a, b| b.endpoint.len().cmp(&a.endpoint.len()));

            debug!(
                policy = %policy.name,
                routes = policy.routes.len(),
                "Directors built"
            );
            table.insert(policy.name.clone(), directors);
        }

        Ok(Self { policies: table })
    }

    /// Whether `policy` has an entry in the table
    pub fn contains(&self, policy: &str) -> bool {
        self.policies.contains_key(policy)
    }

    /// Pick the rewrite for a request path and query under `policy`
    ///
    /// Never fails: unknown policies and misses yield [`Rewrite::Noop`] and a
    /// log line, the caller decides what a no-op means.
    pub fn select(&self, policy: &str, path: &str, query: &str) -> Rewrite {
        let Some(directors) = self.policies.get(policy) else {
            warn!(policy = %policy, "Policy is not configured");
            return Rewrite::Noop;
        };

        if !directors.query.is_empty() {
            let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
            if let Some(route) = directors.query.iter().find(|r| r.matches(path, &pairs)) {
                debug!(policy = %policy, endpoint = %route.endpoint, "Query director found");
                return Rewrite::Director(route.director.clone());
            }
        }

        if let Some((pattern, director)) = directors.regex.iter().find(|(p, _)| p.is_match(path)) {
            debug!(policy = %policy, endpoint = %pattern.as_str(), "Regex director found");
            return Rewrite::Director(director.clone());
        }

        if let Some((prefix, director)) = directors
            .prefix
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
        {
            debug!(policy = %policy, prefix = %prefix, "Director found");
            return Rewrite::Director(director.clone());
        }

        if let Some(root) = &directors.root {
            debug!(policy = %policy, "Root director found");
            return Rewrite::Director(root.clone());
        }

        warn!(policy = %policy, path = %path, "No director found");
        Rewrite::Noop
    }
}

fn parse_query_route(endpoint: &str, director: Arc<Director>) -> Result<QueryRoute, RoutingError> {
    let (path, query) = endpoint.split_once('?').unwrap_or((endpoint, ""));
    let params: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    if params.is_empty() {
        return Err(RoutingError::InvalidEndpointPattern {
            endpoint: endpoint.to_string(),
            reason: "query route without query parameters".to_string(),
        });
    }

    Ok(QueryRoute {
        endpoint: endpoint.to_string(),
        path: path.to_string(),
        params,
        director,
    })
}
