//! Directory-driven routing during a platform migration

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::PolicySelector;
use crate::directory::AccountDirectory;

/// Policy names used by [`MigrationPolicy`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MigrationParams {
    /// Selected when the directory has a record for the caller
    pub acc_found_policy: String,
    /// Selected when there is no record or the lookup fails
    pub acc_not_found_policy: String,
    /// Selected for requests without claims
    pub unauthenticated_policy: String,
}

impl Default for MigrationParams {
    fn default() -> Self {
        Self {
            acc_found_policy: "modern".to_string(),
            acc_not_found_policy: "legacy".to_string(),
            unauthenticated_policy: "unauthenticated".to_string(),
        }
    }
}

/// Routes migrated users to the modern stack and everyone else to legacy
///
/// Lookup errors count as "not migrated" so an outage of the directory sends
/// traffic to the legacy stack.
pub struct MigrationPolicy {
    directory: Arc<dyn AccountDirectory>,
    params: MigrationParams,
}

impl MigrationPolicy {
    /// Create the strategy
    pub fn new(directory: Arc<dyn AccountDirectory>, params: MigrationParams) -> Self {
        Self { directory, params }
    }
}

#[async_trait]
impl PolicySelector for MigrationPolicy {
    async fn policy(&self, user_id: Option<&str>) -> String {
        let Some(user_id) = user_id.filter(|id| !id.is_empty()) else {
            return self.params.unauthenticated_policy.clone();
        };

        match self.directory.get_account(user_id).await {
            Ok(Some(_)) => {
                debug!(user = %user_id, policy = %self.params.acc_found_policy, "User is migrated");
                self.params.acc_found_policy.clone()
            }
            Ok(None) => {
                debug!(user = %user_id, policy = %self.params.acc_not_found_policy, "User is not migrated");
                self.params.acc_not_found_policy.clone()
            }
            Err(e) => {
                warn!(
                    user = %user_id,
                    error = %e,
                    policy = %self.params.acc_not_found_policy,
                    "Directory lookup failed, using fallback policy"
                );
                self.params.acc_not_found_policy.clone()
            }
        }
    }
}
