//! Account directory and role service contracts
//!
//! The gateway only consumes these services. The traits are the seam between
//! the identity pipeline and whatever transport reaches the real services;
//! [`HttpAccountDirectory`] and [`HttpRoleService`] are the JSON-over-HTTP
//! implementations used in production.

mod http;

pub use http::{HttpAccountDirectory, HttpRoleService};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Creation-type marker for accounts provisioned by the gateway
pub const LOCAL_ACCOUNT: &str = "LocalAccount";

/// External-state value meaning the account holder accepted an invitation
pub const EXTERNAL_STATE_ACCEPTED: &str = "Accepted";

/// Reference from an account to a group it is a member of
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    /// Group id
    #[serde(default)]
    pub id: String,
    /// Human readable name
    #[serde(default)]
    pub display_name: String,
    /// Unix-style group name
    #[serde(default)]
    pub on_premises_sam_account_name: String,
}

/// Directory-resident identity record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable opaque id (empty on create requests)
    #[serde(default)]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub display_name: String,
    /// Preferred username
    #[serde(default)]
    pub preferred_name: String,
    /// Unix-style username
    #[serde(default)]
    pub on_premises_sam_account_name: String,
    /// Mail address, the directory lookup key
    #[serde(default)]
    pub mail: String,
    /// Disabled accounts never receive a token
    #[serde(default)]
    pub account_enabled: bool,
    /// Invitation state for external users; empty for internal ones
    #[serde(default)]
    pub external_user_state: String,
    /// How the account came into existence
    #[serde(default)]
    pub creation_type: String,
    /// Group memberships
    #[serde(default)]
    pub member_of: Vec<GroupRef>,
}

impl Account {
    /// Whether the mail address counts as verified
    pub fn mail_verified(&self) -> bool {
        self.external_user_state.is_empty() || self.external_user_state == EXTERNAL_STATE_ACCEPTED
    }

    /// Unix-style names of the groups this account is a member of
    pub fn unix_groups(&self) -> Vec<String> {
        self.member_of
            .iter()
            .map(|g| g.on_premises_sam_account_name.clone())
            .collect()
    }
}

/// Grant linking an account to an authorization role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Account the role is granted to
    pub account_uuid: String,
    /// Role identifier
    pub role_id: String,
}

/// Errors from directory and role service calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    /// The service could not be reached or the call timed out
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status
    #[error("service returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        message: String,
    },

    /// The response could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Build the directory filter that matches accounts by mail
///
/// Single quotes are doubled so the address cannot terminate the literal.
pub fn mail_query(email: &str) -> String {
    format!("mail eq '{}'", email.replace('\'', "''"))
}

/// Account directory service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// List accounts matching an equality filter, at most `page_size` of them
    async fn list_accounts(
        &self,
        query: &str,
        page_size: usize,
    ) -> Result<Vec<Account>, DirectoryError>;

    /// Create an account and return it with its assigned id
    async fn create_account(&self, account: Account) -> Result<Account, DirectoryError>;

    /// Fetch the record stored under `id`, `None` if there is none
    async fn get_account(&self, id: &str) -> Result<Option<Account>, DirectoryError>;
}

/// Role assignment service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleService: Send + Sync {
    /// List the role assignments of an account
    async fn list_role_assignments(
        &self,
        account_id: &str,
    ) -> Result<Vec<RoleAssignment>, DirectoryError>;
}
