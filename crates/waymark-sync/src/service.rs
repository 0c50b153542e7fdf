//! Remote observation service client
//!
//! The engine is generic over [`RemoteService`], so coordinators can run
//! against the HTTP implementation in production and the scripted mock in
//! tests.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::wire::CreateResponseJson;

/// Network contract the sync engine consumes.
///
/// Pull results are raw JSON values; decoding happens per record in the pull
/// path so one malformed record cannot poison a batch.
pub trait RemoteService {
    /// Fetch observations for an event modified at or after `start`,
    /// sorted newest-first.
    fn fetch_observations(
        &self,
        event_remote_id: &str,
        start: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = SyncResult<Vec<Value>>> + Send;

    /// Reserve a server id and resource URL for a new observation.
    fn create_observation_id(
        &self,
        event_remote_id: &str,
    ) -> impl std::future::Future<Output = SyncResult<CreateResponseJson>> + Send;

    /// Upload the full content body; returns the server's observation JSON.
    fn update_observation(
        &self,
        observation_url: &str,
        body: &Value,
    ) -> impl std::future::Future<Output = SyncResult<Value>> + Send;

    /// Archive (delete) the observation on the server.
    fn delete_observation(
        &self,
        observation_url: &str,
    ) -> impl std::future::Future<Output = SyncResult<()>> + Send;

    /// Set the acting user's favorite marker.
    fn put_favorite(
        &self,
        observation_url: &str,
    ) -> impl std::future::Future<Output = SyncResult<()>> + Send;

    /// Remove the acting user's favorite marker.
    fn delete_favorite(
        &self,
        observation_url: &str,
    ) -> impl std::future::Future<Output = SyncResult<()>> + Send;

    /// Set the important marker.
    fn put_important(
        &self,
        observation_url: &str,
        body: &Value,
    ) -> impl std::future::Future<Output = SyncResult<()>> + Send;

    /// Remove the important marker.
    fn delete_important(
        &self,
        observation_url: &str,
    ) -> impl std::future::Future<Output = SyncResult<()>> + Send;
}

/// HTTP implementation of [`RemoteService`].
#[derive(Clone)]
pub struct HttpRemoteService {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteService")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl HttpRemoteService {
    /// Create a client for the given server base URL and access token.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> SyncResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(SyncError::InvalidConfiguration(
                "access token must not be empty".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            token,
            client: reqwest::Client::builder().build()?,
        })
    }

    fn observations_url(&self, event_remote_id: &str) -> String {
        format!("{}/api/events/{event_remote_id}/observations", self.base_url)
    }

    async fn expect_success(response: reqwest::Response) -> SyncResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Status {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        })
    }

    async fn send_marker(&self, request: reqwest::RequestBuilder) -> SyncResult<()> {
        let response = request.bearer_auth(&self.token).send().await?;
        Self::expect_success(response).await?;
        Ok(())
    }
}

impl RemoteService for HttpRemoteService {
    async fn fetch_observations(
        &self,
        event_remote_id: &str,
        start: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<Value>> {
        let mut query: Vec<(&str, String)> = vec![("sort", "lastModified DESC".to_string())];
        if let Some(start) = start {
            query.push((
                "startDate",
                start.to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }

        let response = self
            .client
            .get(self.observations_url(event_remote_id))
            .query(&query)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let response = Self::expect_success(response).await?;
        Ok(response.json::<Vec<Value>>().await?)
    }

    async fn create_observation_id(&self, event_remote_id: &str) -> SyncResult<CreateResponseJson> {
        let response = self
            .client
            .post(format!("{}/id", self.observations_url(event_remote_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let response = Self::expect_success(response).await?;
        Ok(response.json::<CreateResponseJson>().await?)
    }

    async fn update_observation(&self, observation_url: &str, body: &Value) -> SyncResult<Value> {
        let response = self
            .client
            .put(observation_url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let response = Self::expect_success(response).await?;
        Ok(response.json::<Value>().await?)
    }

    async fn delete_observation(&self, observation_url: &str) -> SyncResult<()> {
        // Legacy servers have no DELETE verb for observations; archival goes
        // through the states route.
        self.send_marker(
            self.client
                .post(format!("{observation_url}/states"))
                .json(&serde_json::json!({"name": "archive"})),
        )
        .await
    }

    async fn put_favorite(&self, observation_url: &str) -> SyncResult<()> {
        self.send_marker(self.client.put(format!("{observation_url}/favorite")))
            .await
    }

    async fn delete_favorite(&self, observation_url: &str) -> SyncResult<()> {
        self.send_marker(self.client.delete(format!("{observation_url}/favorite")))
            .await
    }

    async fn put_important(&self, observation_url: &str, body: &Value) -> SyncResult<()> {
        self.send_marker(
            self.client
                .put(format!("{observation_url}/important"))
                .json(body),
        )
        .await
    }

    async fn delete_important(&self, observation_url: &str) -> SyncResult<()> {
        self.send_marker(self.client.delete(format!("{observation_url}/important")))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed.to_string()
    }
}

fn normalize_base_url(raw: String) -> SyncResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SyncError::InvalidConfiguration(
            "server base URL must not be empty".to_string(),
        ));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(SyncError::InvalidConfiguration(
            "server base URL must include http:// or https://".to_string(),
        ))
    }
}

/// Operations a [`MockRemoteService`] can script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `fetch_observations`
    Fetch,
    /// `create_observation_id`
    Create,
    /// `update_observation`
    Update,
    /// `delete_observation`
    Delete,
    /// `put_favorite`
    PutFavorite,
    /// `delete_favorite`
    DeleteFavorite,
    /// `put_important`
    PutImportant,
    /// `delete_important`
    DeleteImportant,
}

/// One recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Which operation was invoked
    pub op: MockOp,
    /// Event id or observation URL the call targeted
    pub target: String,
}

/// A scripted remote service for tests.
#[derive(Debug, Default)]
pub struct MockRemoteService {
    observations: Mutex<Vec<Value>>,
    create_response: Mutex<Option<CreateResponseJson>>,
    update_response: Mutex<Option<Value>>,
    status_errors: Mutex<HashMap<MockOp, (u16, String)>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockRemoteService {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next fetch result.
    pub fn set_observations(&self, observations: Vec<Value>) {
        *self.observations.lock().unwrap() = observations;
    }

    /// Script the create response.
    pub fn set_create_response(&self, id: impl Into<String>, url: impl Into<String>) {
        *self.create_response.lock().unwrap() = Some(CreateResponseJson {
            id: id.into(),
            url: url.into(),
        });
    }

    /// Script the update response body.
    pub fn set_update_response(&self, body: Value) {
        *self.update_response.lock().unwrap() = Some(body);
    }

    /// Script a status error for one operation.
    pub fn set_status_error(&self, op: MockOp, status: u16, message: impl Into<String>) {
        self.status_errors
            .lock()
            .unwrap()
            .insert(op, (status, message.into()));
    }

    /// Recorded calls, in invocation order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: MockOp, target: &str) -> SyncResult<()> {
        self.calls.lock().unwrap().push(MockCall {
            op,
            target: target.to_string(),
        });
        if let Some((status, message)) = self.status_errors.lock().unwrap().get(&op) {
            return Err(SyncError::Status {
                status: *status,
                message: message.clone(),
            });
        }
        Ok(())
    }
}

impl RemoteService for MockRemoteService {
    async fn fetch_observations(
        &self,
        event_remote_id: &str,
        _start: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<Value>> {
        self.record(MockOp::Fetch, event_remote_id)?;
        Ok(self.observations.lock().unwrap().clone())
    }

    async fn create_observation_id(&self, event_remote_id: &str) -> SyncResult<CreateResponseJson> {
        self.record(MockOp::Create, event_remote_id)?;
        self.create_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::InvalidConfiguration("no mock create response set".into()))
    }

    async fn update_observation(&self, observation_url: &str, _body: &Value) -> SyncResult<Value> {
        self.record(MockOp::Update, observation_url)?;
        Ok(self
            .update_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Value::Null))
    }

    async fn delete_observation(&self, observation_url: &str) -> SyncResult<()> {
        self.record(MockOp::Delete, observation_url)
    }

    async fn put_favorite(&self, observation_url: &str) -> SyncResult<()> {
        self.record(MockOp::PutFavorite, observation_url)
    }

    async fn delete_favorite(&self, observation_url: &str) -> SyncResult<()> {
        self.record(MockOp::DeleteFavorite, observation_url)
    }

    async fn put_important(&self, observation_url: &str, _body: &Value) -> SyncResult<()> {
        self.record(MockOp::PutImportant, observation_url)
    }

    async fn delete_important(&self, observation_url: &str) -> SyncResult<()> {
        self.record(MockOp::DeleteImportant, observation_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("server.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url("https://server.example.com/".to_string()).unwrap(),
            "https://server.example.com"
        );
    }

    #[test]
    fn test_http_service_debug_redacts_token() {
        let service = HttpRemoteService::new("https://server.example.com", "secret").unwrap();
        let debug = format!("{service:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_parse_api_error_prefers_structured_message() {
        let message = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"message": "timestamp is required"}"#,
        );
        assert_eq!(message, "timestamp is required");

        let fallback = parse_api_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(fallback, "HTTP 502");
    }

    #[tokio::test]
    async fn test_mock_records_calls_and_errors() {
        let mock = MockRemoteService::new();
        mock.set_status_error(MockOp::Delete, 404, "Not Found");

        let result = mock.delete_observation("https://s/obs/1").await;
        assert!(matches!(
            result,
            Err(SyncError::Status { status: 404, .. })
        ));

        mock.put_favorite("https://s/obs/1").await.unwrap();
        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].op, MockOp::Delete);
        assert_eq!(calls[1].op, MockOp::PutFavorite);
    }
}
