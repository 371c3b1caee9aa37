//! REST client for the Task/List API.
//!
//! Routes:
//!
//! ```text
//! GET    {base}/lists/{list_id}/tasks
//! POST   {base}/lists/{list_id}/tasks
//! POST   {base}/tasks/{task_id}/move
//! PATCH  {base}/tasks/{task_id}
//! DELETE {base}/tasks/{task_id}
//! ```
//!
//! Error bodies are `{"message": "...", "current": {task}}`, both optional.
//! The client never retries; retry policy belongs to the move coordinator.

use super::{MoveRequest, NewTask, TaskApi, TaskRecord};
use crate::error::{ApiError, KanbanError, Result};
use crate::types::{ItemId, ListId};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

const HTTP_UNAUTHORIZED: u16 = 401;
const HTTP_FORBIDDEN: u16 = 403;
const HTTP_NOT_FOUND: u16 = 404;
const HTTP_CONFLICT: u16 = 409;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api/";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const USER_AGENT: &str = concat!("taskboard/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`HttpTaskApi`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpApiConfig {
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "error")]
    message: Option<String>,
    #[serde(default)]
    current: Option<TaskRecord>,
}

/// The resource a request addresses, reported when the server answers 404
#[derive(Debug, Clone, Copy)]
struct Resource<'a> {
    kind: &'static str,
    id: &'a str,
}

impl<'a> Resource<'a> {
    fn list(id: &'a ListId) -> Self {
        Self {
            kind: "list",
            id: id.as_str(),
        }
    }

    fn task(id: &'a ItemId) -> Self {
        Self {
            kind: "task",
            id: id.as_str(),
        }
    }
}

/// [`TaskApi`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    client: Client,
    base: Url,
    token: Option<String>,
    timeout: Duration,
}

impl HttpTaskApi {
    /// Build a client from configuration
    pub fn new(config: &HttpApiConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| KanbanError::invalid_value("base_url", e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(KanbanError::invalid_value(
                "base_url",
                format!("'{}' cannot be used as a base URL", config.base_url),
            ));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| KanbanError::invalid_value("http client", e.to_string()))?;

        Ok(Self {
            client,
            base,
            token: config.token.clone(),
            timeout,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        resource: Resource<'_>,
    ) -> std::result::Result<Response, ApiError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        debug!(%status, url = %response.url(), "received response");
        if status.is_success() {
            Ok(response)
        } else {
            Err(Self::status_error(status, response, resource).await)
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: Resource<'_>,
    ) -> std::result::Result<T, ApiError> {
        let response = self.execute(request, resource).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode {
            message: e.to_string(),
        })
    }

    /// Map a non-success status to an [`ApiError`]
    async fn status_error(
        status: StatusCode,
        response: Response,
        resource: Resource<'_>,
    ) -> ApiError {
        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body
            .message
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());

        match status.as_u16() {
            HTTP_UNAUTHORIZED => ApiError::Unauthorized,
            HTTP_FORBIDDEN => ApiError::Forbidden,
            HTTP_NOT_FOUND => ApiError::NotFound {
                resource: resource.kind.to_string(),
                id: resource.id.to_string(),
            },
            HTTP_CONFLICT => ApiError::conflict(message, body.current),
            code if status.is_client_error() => ApiError::Rejected {
                status: code,
                message,
            },
            code => ApiError::Server {
                status: code,
                message,
            },
        }
    }

    fn transport_error(&self, error: reqwest::Error) -> ApiError {
        if error.is_timeout() {
            ApiError::Timeout {
                elapsed_ms: self.timeout.as_millis() as u64,
            }
        } else if error.is_decode() {
            ApiError::Decode {
                message: error.to_string(),
            }
        } else {
            ApiError::network(error.to_string())
        }
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    #[instrument(skip(self))]
    async fn list_tasks(&self, list_id: &ListId) -> std::result::Result<Vec<TaskRecord>, ApiError> {
        let url = self.endpoint(&["lists", list_id.as_str(), "tasks"]);
        self.send(self.client.get(url), Resource::list(list_id))
            .await
    }

    #[instrument(skip(self, task))]
    async fn create_task(
        &self,
        list_id: &ListId,
        task: &NewTask,
    ) -> std::result::Result<TaskRecord, ApiError> {
        let url = self.endpoint(&["lists", list_id.as_str(), "tasks"]);
        self.send(self.client.post(url).json(task), Resource::list(list_id))
            .await
    }

    #[instrument(skip(self, request), fields(intent = %request.intent_id))]
    async fn move_task(
        &self,
        task_id: &ItemId,
        request: &MoveRequest,
    ) -> std::result::Result<TaskRecord, ApiError> {
        let url = self.endpoint(&["tasks", task_id.as_str(), "move"]);
        self.send(self.client.post(url).json(request), Resource::task(task_id))
            .await
    }

    #[instrument(skip(self, fields))]
    async fn update_task(
        &self,
        task_id: &ItemId,
        fields: &Map<String, Value>,
    ) -> std::result::Result<TaskRecord, ApiError> {
        let url = self.endpoint(&["tasks", task_id.as_str()]);
        self.send(self.client.patch(url).json(fields), Resource::task(task_id))
            .await
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, task_id: &ItemId) -> std::result::Result<(), ApiError> {
        let url = self.endpoint(&["tasks", task_id.as_str()]);
        self.execute(self.client.delete(url), Resource::task(task_id))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base_url: &str) -> HttpTaskApi {
        HttpTaskApi::new(&HttpApiConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_under_base_path() {
        let api = api("http://example.test/api");
        let url = api.endpoint(&["tasks", "t 1", "move"]);
        assert_eq!(url.as_str(), "http://example.test/api/tasks/t%201/move");
    }

    #[test]
    fn test_endpoint_with_trailing_slash() {
        let api = api("http://example.test/v2/");
        let url = api.endpoint(&["lists", "l1", "tasks"]);
        assert_eq!(url.as_str(), "http://example.test/v2/lists/l1/tasks");
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        let err = HttpTaskApi::new(&HttpApiConfig {
            base_url: "mailto:someone@example.test".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, KanbanError::InvalidValue { .. }));

        assert!(HttpTaskApi::new(&HttpApiConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        })
        .is_err());
    }
}
