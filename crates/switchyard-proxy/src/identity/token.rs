//! Signed identity assertions for backends

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::IdentityError;
use crate::directory::Account;

/// Issuer of every minted token
pub const TOKEN_ISSUER: &str = "switchyard";

/// Lifetime of a minted token
pub const TOKEN_TTL: Duration = Duration::from_secs(60);

/// Payload of the identity assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Always [`TOKEN_ISSUER`]
    pub iss: String,
    /// Account id
    pub sub: String,
    /// Unix-style username
    pub username: String,
    /// Display name
    pub display_name: String,
    /// Mail address
    pub mail: String,
    /// Whether the mail address counts as verified
    pub mail_verified: bool,
    /// Unix-style group names
    pub groups: Vec<String>,
    /// Role ids
    pub roles: Vec<String>,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Expiry (seconds since epoch)
    pub exp: i64,
}

impl TokenClaims {
    /// Claims for `account` issued at `now`
    pub fn new(account: &Account, groups: Vec<String>, roles: Vec<String>, now: i64) -> Self {
        Self {
            iss: TOKEN_ISSUER.to_string(),
            sub: account.id.clone(),
            username: account.on_premises_sam_account_name.clone(),
            display_name: account.display_name.clone(),
            mail: account.mail.clone(),
            mail_verified: account.mail_verified(),
            groups,
            roles,
            iat: now,
            exp: now + TOKEN_TTL.as_secs() as i64,
        }
    }
}

/// HS256 token minter holding the shared secret
pub struct TokenMinter {
    secret: Zeroizing<String>,
}

impl std::fmt::Debug for TokenMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenMinter")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenMinter {
    /// Create a minter; an empty secret cannot sign anything
    pub fn new(secret: &str) -> Result<Self, IdentityError> {
        if secret.is_empty() {
            return Err(IdentityError::TokenManagerInitFailed);
        }
        Ok(Self {
            secret: Zeroizing::new(secret.to_string()),
        })
    }

    /// Sign claims for `account`
    pub fn mint(
        &self,
        account: &Account,
        groups: Vec<String>,
        roles: Vec<String>,
    ) -> Result<String, IdentityError> {
        let claims = TokenClaims::new(account, groups, roles, now_epoch_seconds());
        let key = EncodingKey::from_secret(self.secret.as_bytes());
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &key)
            .map_err(|e| IdentityError::TokenMintFailed(e.to_string()))
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) fn decode_for_test(token: &str, secret: &str) -> TokenClaims {
    let mut validation = jsonwebtoken::Validation::new(Algorithm::HS256);
    validation.set_issuer(&[TOKEN_ISSUER]);
    jsonwebtoken::decode::<TokenClaims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .unwrap()
    .claims
}
