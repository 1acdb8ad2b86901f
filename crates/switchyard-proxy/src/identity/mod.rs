//! Identity augmentation pipeline
//!
//! Turns verified caller claims into a directory account (provisioning it on
//! first sight), looks up the account's roles and attaches a short-lived
//! signed assertion to the outbound request.
//!
//! Claim verification itself happens upstream: an embedding authentication
//! layer places [`Claims`] into the request extensions and the proxy passes
//! them down explicitly.

mod cache;
mod middleware;
mod resolver;
mod token;

pub use cache::AccountCache;
pub use middleware::{IdentityMiddleware, ACCESS_TOKEN_HEADER};
pub use resolver::{IdentityResolver, ACCOUNT_PAGE_SIZE};
pub use token::{TokenClaims, TokenMinter, TOKEN_ISSUER, TOKEN_TTL};

#[cfg(test)]
pub(crate) use token::decode_for_test;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Verified identity assertions about the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Mail address, the directory lookup key
    #[serde(default)]
    pub email: String,
    /// Preferred username, also the user id for policy selection
    #[serde(default)]
    pub preferred_username: String,
    /// Display name
    #[serde(default, rename = "name")]
    pub display_name: String,
}

/// Failures of the identity pipeline
///
/// Each variant maps to one response status; see `crate::Error`.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The directory could not be queried
    #[error("directory unavailable while looking up {email}: {message}")]
    DirectoryUnavailable {
        /// Claimed mail address
        email: String,
        /// Underlying error
        message: String,
    },

    /// The claims carry no mail address to look the account up by
    #[error("claims for {preferred_username:?} carry no email")]
    MissingEmail {
        /// Preferred username from the claims, possibly empty
        preferred_username: String,
    },

    /// No account has the claimed mail address
    #[error("no account for {email}")]
    AccountNotFound {
        /// Claimed mail address
        email: String,
    },

    /// Creating the account failed
    #[error("failed to provision account for {email}: {message}")]
    ProvisioningFailed {
        /// Claimed mail address
        email: String,
        /// Underlying error
        message: String,
    },

    /// More than one account has the claimed mail address
    #[error("more than one account for {email}")]
    AmbiguousAccount {
        /// Claimed mail address
        email: String,
    },

    /// The account exists but is disabled
    #[error("account {account_id} is disabled")]
    AccountDisabled {
        /// Account id
        account_id: String,
    },

    /// The role service could not be queried
    #[error("role lookup failed for {account_id}: {message}")]
    RoleLookupFailed {
        /// Account id
        account_id: String,
        /// Underlying error
        message: String,
    },

    /// The signer could not be initialized
    #[error("token manager could not be initialized")]
    TokenManagerInitFailed,

    /// Signing the assertion failed
    #[error("failed to mint token: {0}")]
    TokenMintFailed(String),
}
