//! Attaches the identity assertion to outbound requests

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};
use tracing::debug;

use super::{Claims, IdentityError, IdentityResolver, TokenMinter};
use crate::directory::RoleService;

/// Header carrying the signed assertion to the backend
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Claims -> account -> roles -> token, per request
pub struct IdentityMiddleware {
    resolver: Arc<IdentityResolver>,
    roles: Arc<dyn RoleService>,
    minter: TokenMinter,
}

impl IdentityMiddleware {
    /// Create the middleware
    pub fn new(
        resolver: Arc<IdentityResolver>,
        roles: Arc<dyn RoleService>,
        minter: TokenMinter,
    ) -> Self {
        Self {
            resolver,
            roles,
            minter,
        }
    }

    /// The account resolver
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Set the access token header for `claims`
    ///
    /// Requests without claims pass through unmodified. Any failure leaves
    /// the headers untouched and must deny the request.
    pub async fn apply(
        &self,
        claims: Option<&Claims>,
        headers: &mut HeaderMap,
    ) -> Result<(), IdentityError> {
        let Some(claims) = claims else {
            debug!("No claims, forwarding unauthenticated request");
            return Ok(());
        };

        let account = self.resolver.resolve(claims).await?;
        let groups = account.unix_groups();

        let roles = self
            .roles
            .list_role_assignments(&account.id)
            .await
            .map_err(|e| IdentityError::RoleLookupFailed {
                account_id: account.id.clone(),
                message: e.to_string(),
            })?
            .into_iter()
            .map(|a| a.role_id)
            .collect();

        let token = self.minter.mint(&account, groups, roles)?;
        let value =
            HeaderValue::from_str(&token).map_err(|e| IdentityError::TokenMintFailed(e.to_string()))?;
        headers.insert(ACCESS_TOKEN_HEADER, value);

        debug!(
            email = %claims.email,
            account_id = %account.id,
            "Associated claims with account"
        );
        Ok(())
    }
}
