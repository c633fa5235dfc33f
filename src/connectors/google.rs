//! Bearer-token HTTP client shared by the Google connectors.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ConnectorError;

/// Environment variable holding an OAuth access token.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_ACCESS_TOKEN";

/// Error envelope returned by Google APIs.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Thin REST client for Google APIs.
#[derive(Debug, Clone)]
pub struct GoogleClient {
    http_client: Client,
    access_token: String,
}

impl GoogleClient {
    /// Creates a client from an access token.
    pub fn new(access_token: impl Into<String>, timeout: Duration) -> Result<Self, ConnectorError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::RequestFailed(e.to_string()))?;
        Ok(Self {
            http_client,
            access_token: access_token.into(),
        })
    }

    /// Creates a client from `GOOGLE_ACCESS_TOKEN`, falling back to a token
    /// file with a `token` or `access_token` field.
    pub fn from_token_file(path: &Path, timeout: Duration) -> Result<Self, ConnectorError> {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.trim().is_empty() {
                return Self::new(token.trim(), timeout);
            }
        }

        if !path.exists() {
            return Err(ConnectorError::MissingToken);
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConnectorError::TokenFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let token = read_token(&content).map_err(|message| ConnectorError::TokenFile {
            path: path.to_path_buf(),
            message,
        })?;
        Self::new(token, timeout)
    }

    pub async fn get_json(&self, url: &str) -> Result<Value, ConnectorError> {
        self.send(self.http_client.get(url)).await
    }

    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ConnectorError> {
        self.send(self.http_client.post(url).json(body)).await
    }

    pub async fn put_json(&self, url: &str, body: &Value) -> Result<Value, ConnectorError> {
        self.send(self.http_client.put(url).json(body)).await
    }

    pub async fn delete(&self, url: &str) -> Result<(), ConnectorError> {
        self.send(self.http_client.delete(url)).await.map(|_| ())
    }

    /// Lists every item of a paginated collection, following `nextPageToken`
    /// until it is absent.
    pub async fn list_all(
        &self,
        url: &str,
        params: &[(&str, String)],
        items_key: &str,
    ) -> Result<Vec<Value>, ConnectorError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = params.to_vec();
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page = self.get_json(&with_query(url, &query)).await?;

            if let Some(page_items) = page.get(items_key).and_then(Value::as_array) {
                items.extend(page_items.iter().cloned());
            }

            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        debug!("Listed {} {} from {}", items.len(), items_key, url);
        Ok(items)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ConnectorError> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await
            .map_err(|e| ConnectorError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ConnectorError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorResponse>(&text)
                .map(|r| r.error.message)
                .unwrap_or(text);
            return Err(ConnectorError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ConnectorError::ParseError(e.to_string()))
    }
}

/// Appends URL-encoded query parameters to `url`.
pub fn with_query(url: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query)
}

fn read_token(content: &str) -> Result<String, String> {
    let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    ["token", "access_token"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| "no 'token' or 'access_token' field".to_string())
}
