//! JSON-over-HTTP clients for the directory and role services

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use switchyard_common::ServiceEndpoint;
use tracing::debug;

use super::{Account, AccountDirectory, DirectoryError, RoleAssignment, RoleService};

const LIST_ACCOUNTS_PATH: &str = "/api/v0/accounts/accounts-list";
const CREATE_ACCOUNT_PATH: &str = "/api/v0/accounts/accounts-create";
const GET_ACCOUNT_PATH: &str = "/api/v0/accounts/accounts-get";
const LIST_ROLE_ASSIGNMENTS_PATH: &str = "/api/v0/settings/role-assignments-list";

#[derive(Serialize)]
struct ListAccountsRequest<'a> {
    query: &'a str,
    page_size: usize,
}

#[derive(Deserialize)]
struct ListAccountsResponse {
    #[serde(default)]
    accounts: Vec<Account>,
}

#[derive(Serialize)]
struct CreateAccountRequest {
    account: Account,
}

#[derive(Serialize)]
struct GetAccountRequest<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct ListRoleAssignmentsRequest<'a> {
    account_uuid: &'a str,
}

#[derive(Deserialize)]
struct ListRoleAssignmentsResponse {
    #[serde(default)]
    assignments: Vec<RoleAssignment>,
}

/// Thin JSON RPC helper shared by both clients
#[derive(Clone)]
struct JsonRpc {
    base_url: String,
    client: reqwest::Client,
}

impl JsonRpc {
    fn new(endpoint: &ServiceEndpoint) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| DirectoryError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// POST `body` to `path`; any non-2xx answer, 404 included, is an error
    async fn call<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, DirectoryError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        self.call_optional(path, body)
            .await?
            .ok_or_else(|| DirectoryError::Status {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("{} not found", path),
            })
    }

    /// Like [`JsonRpc::call`], but a 404 answer means "no record"
    async fn call_optional<Req, Resp>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Option<Resp>, DirectoryError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Calling directory service");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Resp>()
            .await
            .map(Some)
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }
}

/// Account directory reached over HTTP
#[derive(Clone)]
pub struct HttpAccountDirectory {
    rpc: JsonRpc,
}

impl HttpAccountDirectory {
    /// Create a client for the directory at `endpoint`
    pub fn new(endpoint: &ServiceEndpoint) -> Result<Self, DirectoryError> {
        Ok(Self {
            rpc: JsonRpc::new(endpoint)?,
        })
    }
}

#[async_trait]
impl AccountDirectory for HttpAccountDirectory {
    async fn list_accounts(
        &self,
        query: &str,
        page_size: usize,
    ) -> Result<Vec<Account>, DirectoryError> {
        let response: ListAccountsResponse = self
            .rpc
            .call(LIST_ACCOUNTS_PATH, &ListAccountsRequest { query, page_size })
            .await?;
        Ok(response.accounts)
    }

    async fn create_account(&self, account: Account) -> Result<Account, DirectoryError> {
        self.rpc
            .call(CREATE_ACCOUNT_PATH, &CreateAccountRequest { account })
            .await
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>, DirectoryError> {
        self.rpc
            .call_optional(GET_ACCOUNT_PATH, &GetAccountRequest { id })
            .await
    }
}

/// Role service reached over HTTP
#[derive(Clone)]
pub struct HttpRoleService {
    rpc: JsonRpc,
}

impl HttpRoleService {
    /// Create a client for the role service at `endpoint`
    pub fn new(endpoint: &ServiceEndpoint) -> Result<Self, DirectoryError> {
        Ok(Self {
            rpc: JsonRpc::new(endpoint)?,
        })
    }
}

#[async_trait]
impl RoleService for HttpRoleService {
    async fn list_role_assignments(
        &self,
        account_id: &str,
    ) -> Result<Vec<RoleAssignment>, DirectoryError> {
        let response: ListRoleAssignmentsResponse = self
            .rpc
            .call(
                LIST_ROLE_ASSIGNMENTS_PATH,
                &ListRoleAssignmentsRequest {
                    account_uuid: account_id,
                },
            )
            .await?;
        Ok(response.assignments)
    }
}
