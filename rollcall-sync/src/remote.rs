//! Remote data API
//!
//! The sync core only needs a handful of table operations plus RPC calls.
//! [`RestRemote`] speaks the PostgREST dialect over `reqwest`; tests plug in
//! an in-memory implementation of [`RemoteApi`].
//!
//! Every failure is mapped onto the [`SyncError`] taxonomy here, so callers
//! decide retry/dead-letter behaviour from `SyncError::class()` alone.

use crate::error::{SyncError, SyncResult};
use crate::model::{StoreName, UserRoleInfo};
use async_trait::async_trait;
use config_engine::RemoteSettings;
use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// RPC returning `{role, sections}` or `null` for a user
pub const GET_USER_ROLE_RPC: &str = "get_user_role";
/// RPC assigning (or with a `null` role, revoking) a user's role
pub const SET_USER_ROLE_RPC: &str = "set_user_role";

const UNIQUE_VIOLATION_CODE: &str = "23505";
const INSUFFICIENT_PRIVILEGE_CODE: &str = "42501";

#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn select_all(&self, store: &StoreName) -> SyncResult<Vec<Value>>;

    async fn select_one(&self, store: &StoreName, id: &str) -> SyncResult<Option<Value>>;

    /// Insert a row; the returned row carries the server-issued id
    async fn insert(&self, store: &StoreName, row: Value) -> SyncResult<Value>;

    /// Update a row by its key column; `None` when no row matched
    async fn update(&self, store: &StoreName, id: &str, row: Value) -> SyncResult<Option<Value>>;

    /// Insert or overwrite a row keyed by its id
    async fn upsert(&self, store: &StoreName, row: Value) -> SyncResult<Value>;

    async fn delete(&self, store: &StoreName, id: &str) -> SyncResult<()>;

    async fn rpc(&self, function: &str, args: Value) -> SyncResult<Value>;

    async fn fetch_role(&self, user_id: &str) -> SyncResult<Option<UserRoleInfo>> {
        let value = self.rpc(GET_USER_ROLE_RPC, json!({ "user_id": user_id })).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    async fn set_role(&self, user_id: &str, info: Option<&UserRoleInfo>) -> SyncResult<()> {
        let (role, sections) = match info {
            Some(info) => (json!(info.role), json!(info.sections)),
            None => (Value::Null, json!([])),
        };
        self.rpc(
            SET_USER_ROLE_RPC,
            json!({ "user_id": user_id, "role": role, "sections": sections }),
        )
        .await?;
        Ok(())
    }
}

/// Error body returned by PostgREST
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Map a failed response onto the error taxonomy
pub fn classify_response(status: u16, code: Option<&str>, message: String) -> SyncError {
    match (status, code) {
        (_, Some(UNIQUE_VIOLATION_CODE)) | (409, _) => SyncError::UniqueViolation(message),
        (_, Some(INSUFFICIENT_PRIVILEGE_CODE)) | (401 | 403, _) => SyncError::Permission(message),
        (404, _) => SyncError::NotFound(message),
        (408 | 429 | 502 | 503 | 504, _) => SyncError::Network(message),
        _ => SyncError::Remote { status, message },
    }
}

fn transport_error(err: reqwest::Error) -> SyncError {
    if err.is_decode() {
        SyncError::Serialization(err.to_string())
    } else {
        SyncError::Network(err.to_string())
    }
}

/// PostgREST-style HTTP client
pub struct RestRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    access_token: RwLock<Option<String>>,
}

impl RestRemote {
    pub fn new(settings: &RemoteSettings) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            access_token: RwLock::new(None),
        })
    }

    /// Use the signed-in user's token for subsequent requests
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    fn table_url(&self, store: &StoreName) -> String {
        format!("{}/rest/v1/{}", self.base_url, store)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut req = self.client.request(method, url);

        if let Some(key) = &self.api_key {
            req = req.header("apikey", key);
        }

        let token = self.access_token.read().clone().or_else(|| self.api_key.clone());
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }

        req
    }

    async fn send(&self, req: RequestBuilder) -> SyncResult<Response> {
        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
        let message = parsed.message.unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.clone()
            }
        });

        tracing::debug!(status = status.as_u16(), code = ?parsed.code, "Remote request failed");
        Err(classify_response(status.as_u16(), parsed.code.as_deref(), message))
    }

    async fn rows(&self, req: RequestBuilder) -> SyncResult<Vec<Value>> {
        let response = self.send(req).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        response.json().await.map_err(transport_error)
    }

    async fn first_row(&self, req: RequestBuilder, store: &StoreName) -> SyncResult<Value> {
        self.rows(req)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Internal(format!("{store} returned no representation")))
    }
}

#[async_trait]
impl RemoteApi for RestRemote {
    async fn select_all(&self, store: &StoreName) -> SyncResult<Vec<Value>> {
        let req = self
            .request(Method::GET, &self.table_url(store))
            .query(&[("select", "*")]);
        self.rows(req).await
    }

    async fn select_one(&self, store: &StoreName, id: &str) -> SyncResult<Option<Value>> {
        let req = self
            .request(Method::GET, &self.table_url(store))
            .query(&[
                ("select", "*".to_string()),
                (store.key_column(), format!("eq.{id}")),
            ]);
        Ok(self.rows(req).await?.into_iter().next())
    }

    async fn insert(&self, store: &StoreName, row: Value) -> SyncResult<Value> {
        let req = self
            .request(Method::POST, &self.table_url(store))
            .header("Prefer", "return=representation")
            .json(&row);
        self.first_row(req, store).await
    }

    async fn update(&self, store: &StoreName, id: &str, row: Value) -> SyncResult<Option<Value>> {
        let req = self
            .request(Method::PATCH, &self.table_url(store))
            .query(&[(store.key_column(), format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&row);
        Ok(self.rows(req).await?.into_iter().next())
    }

    async fn upsert(&self, store: &StoreName, row: Value) -> SyncResult<Value> {
        let req = self
            .request(Method::POST, &self.table_url(store))
            .query(&[("on_conflict", store.key_column())])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row);
        self.first_row(req, store).await
    }

    async fn delete(&self, store: &StoreName, id: &str) -> SyncResult<()> {
        let req = self
            .request(Method::DELETE, &self.table_url(store))
            .query(&[(store.key_column(), format!("eq.{id}"))]);
        self.send(req).await?;
        Ok(())
    }

    async fn rpc(&self, function: &str, args: Value) -> SyncResult<Value> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, function);
        let response = self.send(self.request(Method::POST, &url).json(&args)).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response.json().await.map_err(transport_error)
    }
}
