//! Policy selection strategies
//!
//! A strategy maps the caller to the name of the backend cluster that serves
//! it. The strategy is chosen once at startup from a `kind` plus an opaque
//! parameter bag; an unknown kind is fatal.

mod migration;

pub use migration::{MigrationParams, MigrationPolicy};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use switchyard_common::PolicySelectorConfig;
use thiserror::Error;

use crate::directory::AccountDirectory;

/// Strategy kind for a fixed policy
pub const STATIC_POLICY: &str = "static_policy";

/// Strategy kind for directory-driven migration routing
pub const MIGRATION: &str = "migration";

/// Errors raised while building a strategy
#[derive(Debug, Error)]
pub enum SelectorError {
    /// `kind` names no known strategy
    #[error("unknown policy strategy: {0}")]
    UnknownStrategy(String),

    /// Parameters could not be decoded for the strategy
    #[error("invalid parameters for policy strategy {kind}: {message}")]
    InvalidParams {
        /// Strategy kind
        kind: String,
        /// Decoder message
        message: String,
    },
}

/// Maps a caller to a policy name
///
/// Never fails: strategies that call out degrade to a default policy.
#[async_trait]
pub trait PolicySelector: Send + Sync {
    /// Policy for `user_id`; `None` means the request is unauthenticated
    async fn policy(&self, user_id: Option<&str>) -> String;
}

/// Always selects the same policy
#[derive(Debug, Clone)]
pub struct StaticPolicy {
    name: String,
}

impl StaticPolicy {
    /// Select `name` for every request
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl PolicySelector for StaticPolicy {
    async fn policy(&self, _user_id: Option<&str>) -> String {
        self.name.clone()
    }
}

#[derive(Deserialize)]
struct StaticParams {
    #[serde(alias = "policy_name")]
    policy: String,
}

/// Build the strategy named by `config`
pub fn build_selector(
    config: &PolicySelectorConfig,
    directory: Arc<dyn AccountDirectory>,
) -> Result<Arc<dyn PolicySelector>, SelectorError> {
    match config.kind.as_str() {
        STATIC_POLICY => {
            let params: StaticParams = decode_params(config)?;
            Ok(Arc::new(StaticPolicy::new(params.policy)))
        }
        MIGRATION => {
            let params: MigrationParams = decode_params(config)?;
            Ok(Arc::new(MigrationPolicy::new(directory, params)))
        }
        other => Err(SelectorError::UnknownStrategy(other.to_string())),
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(
    config: &PolicySelectorConfig,
) -> Result<T, SelectorError> {
    // An absent bag decodes like an empty one so defaults apply
    let params = if config.params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        config.params.clone()
    };

    serde_json::from_value(params).map_err(|e| SelectorError::InvalidParams {
        kind: config.kind.clone(),
        message: e.to_string(),
    })
}
