//! Typed HTTP client for the remote control plane.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::protocol::{unexpected, Ack, ResultResponse, StatusResponse, TaskRequest, TextRequest};
use crate::config::StudioConfig;
use crate::error::ControlPlaneError;
use crate::task::TaskConfig;

/// Client for the six control-plane endpoints.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    http_client: Client,
}

impl ControlPlaneClient {
    /// Creates a client for `base_url`, e.g. `http://127.0.0.1:8000`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ControlPlaneError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlPlaneError::RequestFailed {
                endpoint: "client".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn from_config(config: &StudioConfig) -> Result<Self, ControlPlaneError> {
        Self::new(config.control_plane_url(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /runtime/reset`; expects `success`.
    pub async fn reset_runtime(&self) -> Result<(), ControlPlaneError> {
        let endpoint = "/runtime/reset";
        let ack: Ack = self.send(endpoint, self.http_client.post(self.url(endpoint))).await?;
        expect(endpoint, &ack, "success")
    }

    /// `POST /task/reset`; expects `submitted`.
    pub async fn submit_reset(&self, task: &TaskConfig) -> Result<(), ControlPlaneError> {
        let endpoint = "/task/reset";
        let request = self
            .http_client
            .post(self.url(endpoint))
            .json(&TaskRequest { task_config: task });
        let ack: Ack = self.send(endpoint, request).await?;
        expect(endpoint, &ack, "submitted")
    }

    /// `GET /task/status`.
    pub async fn status(&self) -> Result<StatusResponse, ControlPlaneError> {
        let endpoint = "/task/status";
        self.send(endpoint, self.http_client.get(self.url(endpoint))).await
    }

    /// `POST /task/confirm`; expects `success`.
    pub async fn confirm(&self, message: &str) -> Result<(), ControlPlaneError> {
        let endpoint = "/task/confirm";
        let request = self
            .http_client
            .post(self.url(endpoint))
            .json(&TextRequest { message });
        let ack: Ack = self.send(endpoint, request).await?;
        expect(endpoint, &ack, "success")
    }

    /// `POST /task/eval`; expects `submitted`.
    pub async fn submit_eval(&self, task: &TaskConfig) -> Result<(), ControlPlaneError> {
        let endpoint = "/task/eval";
        let request = self
            .http_client
            .post(self.url(endpoint))
            .json(&TaskRequest { task_config: task });
        let ack: Ack = self.send(endpoint, request).await?;
        expect(endpoint, &ack, "submitted")
    }

    /// `GET /task/result`.
    pub async fn result(&self) -> Result<ResultResponse, ControlPlaneError> {
        let endpoint = "/task/result";
        self.send(endpoint, self.http_client.get(self.url(endpoint))).await
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, ControlPlaneError> {
        debug!("Control plane request: {}", endpoint);
        let response = request
            .send()
            .await
            .map_err(|e| ControlPlaneError::RequestFailed {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(ControlPlaneError::HttpStatus {
                endpoint: endpoint.to_string(),
                code: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ControlPlaneError::ParseError {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })
    }
}

fn expect(endpoint: &str, ack: &Ack, expected: &str) -> Result<(), ControlPlaneError> {
    if ack.status == expected {
        Ok(())
    } else {
        Err(unexpected(endpoint, expected, &ack.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task() -> TaskConfig {
        serde_json::from_value(json!({"task_id": "t1", "instruction": "Open the editor"})).unwrap()
    }

    async fn client(server: &MockServer) -> ControlPlaneClient {
        ControlPlaneClient::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_submit_reset_sends_task_config() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task/reset"))
            .and(body_json(json!({"task_config": {
                "task_id": "t1",
                "instruction": "Open the editor",
                "visual": false,
                "evals": [],
                "reset_actions": [],
                "score": 1.0
            }})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "submitted"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).await.submit_reset(&task()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_ack_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/runtime/reset"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "busy"})))
            .mount(&server)
            .await;

        let err = client(&server).await.reset_runtime().await.unwrap_err();
        assert!(matches!(
            err,
            ControlPlaneError::UnexpectedStatus { ref expected, ref actual, .. }
                if expected == "success" && actual == "busy"
        ));
    }

    #[tokio::test]
    async fn test_http_error_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/task/status"))
            .respond_with(ResponseTemplate::new(503).set_body_string("restarting"))
            .mount(&server)
            .await;

        match client(&server).await.status().await {
            Err(ControlPlaneError::HttpStatus { code, body, endpoint }) => {
                assert_eq!(code, 503);
                assert_eq!(body, "restarting");
                assert_eq!(endpoint, "/task/status");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_confirm_sends_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task/confirm"))
            .and(body_json(json!({"message": "y"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).await.confirm("y").await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let client = ControlPlaneClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.result().await,
            Err(ControlPlaneError::RequestFailed { .. })
        ));
    }
}
