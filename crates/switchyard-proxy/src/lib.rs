//! Switchyard gateway
//!
//! An authenticating reverse proxy in front of several backend clusters
//! ("policies"). For each request it picks the policy that serves the caller,
//! rewrites the request towards the matching backend route and attaches a
//! short-lived signed identity assertion.
//!
//! # Architecture
//!
//! ```text
//! client ──► identity ──► policy selector ──► director ──► backend
//!            (account,     (static /           (prefix,
//!             roles, JWT)   migration)          query, regex)
//! ```
//!
//! # Endpoints
//!
//! - `GET /healthz` - Health check
//! - `*` - Everything else is proxied

#![deny(missing_docs)]

pub mod directory;
pub mod error;
pub mod identity;
pub mod policy;
pub mod proxy;
pub mod routing;
pub mod server;

pub use error::{Error, Result};
pub use identity::{Claims, IdentityMiddleware, IdentityResolver};
pub use policy::{build_selector, PolicySelector};
pub use proxy::{ProxyEngine, ReqwestUpstream, Upstream};
pub use routing::{DirectorTable, Rewrite, RoutingEngine};
pub use server::{build_engine, build_router, start_server, AppState};
