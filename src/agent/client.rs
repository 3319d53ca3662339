use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::agent::{DirectoryAgent, ObservedStatus};
use crate::utils::error::{AppError, AppResult};

/// Body of `POST /capture/start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCaptureRequest {
    pub interface: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Body of `POST /capture/set-interface`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetInterfaceRequest {
    pub interface: String,
}

/// `{success, data?, error?}` envelope shared by agents and the directory
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Turn `success: false` into an application error, falling back to
    /// `default_error` when the remote gave no message.
    pub fn into_result(self, default_error: &str) -> AppResult<Option<T>> {
        if self.success {
            return Ok(self.data);
        }
        let message = self
            .error
            .filter(|e| !e.is_empty())
            .or(self.message.filter(|m| !m.is_empty()))
            .unwrap_or_else(|| default_error.to_string());
        Err(AppError::Application(message))
    }
}

/// Decode a reply body. Anything that is not an envelope is a malformed
/// reply, whatever the HTTP status was.
fn parse_envelope<T: DeserializeOwned>(http_status: u16, body: &[u8]) -> AppResult<ApiEnvelope<T>> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::malformed(format!("malformed response (HTTP {}): {}", http_status, e)))
}

/// Commands and status reads against one capture agent
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn status(&self, agent_url: &str) -> AppResult<ObservedStatus>;

    async fn start_capture(&self, agent_url: &str, request: &StartCaptureRequest) -> AppResult<()>;

    async fn stop_capture(&self, agent_url: &str) -> AppResult<()>;

    async fn set_interface(&self, agent_url: &str, interface: &str) -> AppResult<()>;
}

/// Source of the agent roster
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn list_agents(&self) -> AppResult<Vec<DirectoryAgent>>;
}

/// reqwest-backed [`AgentTransport`]
#[derive(Clone)]
pub struct HttpAgentClient {
    client: Client,
}

impl HttpAgentClient {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn endpoint(agent_url: &str, path: &str) -> String {
        format!("{}{}", agent_url.trim_end_matches('/'), path)
    }

    /// Application errors come back in the body whatever the HTTP status,
    /// so the body is decoded before the status code is looked at.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> AppResult<ApiEnvelope<T>> {
        let status = response.status();
        let body = response.bytes().await?;
        parse_envelope(status.as_u16(), &body)
    }

    async fn command<B: Serialize + ?Sized>(
        &self,
        agent_url: &str,
        path: &str,
        body: Option<&B>,
        default_error: &str,
    ) -> AppResult<()> {
        let url = Self::endpoint(agent_url, path);
        debug!("POST {}", url);

        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            error!("Request to {} failed: {}", url, e);
            AppError::from(e)
        })?;
        let envelope: ApiEnvelope<serde_json::Value> = Self::decode(response).await.map_err(|e| {
            if let AppError::MalformedReply { detail } = &e {
                error!("Bad reply from {}: {}", url, detail);
            }
            e
        })?;
        envelope.into_result(default_error).map(|_| ())
    }
}

#[async_trait]
impl AgentTransport for HttpAgentClient {
    async fn status(&self, agent_url: &str) -> AppResult<ObservedStatus> {
        let url = Self::endpoint(agent_url, "/status");
        let response = self.client.get(&url).send().await?;
        let envelope: ApiEnvelope<ObservedStatus> = Self::decode(response).await?;
        envelope
            .into_result("Failed to load agent status")?
            .ok_or_else(|| AppError::malformed(format!("{} returned no status data", url)))
    }

    async fn start_capture(&self, agent_url: &str, request: &StartCaptureRequest) -> AppResult<()> {
        self.command(agent_url, "/capture/start", Some(request), "Failed to start capture")
            .await
    }

    async fn stop_capture(&self, agent_url: &str) -> AppResult<()> {
        self.command::<()>(agent_url, "/capture/stop", None, "Failed to stop capture")
            .await
    }

    async fn set_interface(&self, agent_url: &str, interface: &str) -> AppResult<()> {
        let body = SetInterfaceRequest {
            interface: interface.to_string(),
        };
        self.command(agent_url, "/capture/set-interface", Some(&body), "Failed to set interface")
            .await
    }
}

/// reqwest-backed [`AgentDirectory`] reading `GET /api/agents`
#[derive(Clone)]
pub struct HttpDirectoryClient {
    client: Client,
    base_url: String,
}

impl HttpDirectoryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl AgentDirectory for HttpDirectoryClient {
    async fn list_agents(&self) -> AppResult<Vec<DirectoryAgent>> {
        let url = format!("{}/api/agents", self.base_url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;
        let envelope: ApiEnvelope<Vec<DirectoryAgent>> = HttpAgentClient::decode(response).await?;
        Ok(envelope.into_result("Failed to load agents")?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_filter_is_sent_verbatim() {
        let request = StartCaptureRequest {
            interface: "eth0".into(),
            filter: Some("tcp[13] & 2 != 0".into()),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body, json!({"interface": "eth0", "filter": "tcp[13] & 2 != 0"}));
    }

    #[test]
    fn absent_filter_is_omitted() {
        let request = StartCaptureRequest {
            interface: "eth0".into(),
            filter: None,
        };
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"interface": "eth0"}));
    }

    #[test]
    fn failure_envelope_uses_remote_message() {
        let env: ApiEnvelope<serde_json::Value> =
            serde_json::from_value(json!({"success": false, "error": "No interface specified"})).unwrap();
        match env.into_result("Failed to start capture") {
            Err(AppError::Application(msg)) => assert_eq!(msg, "No interface specified"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn failure_envelope_without_message_uses_default() {
        let env: ApiEnvelope<serde_json::Value> = serde_json::from_value(json!({"success": false})).unwrap();
        assert_eq!(
            env.into_result("Failed to stop capture").unwrap_err().operator_message(),
            "Failed to stop capture"
        );
    }

    #[test]
    fn status_envelope_parses() {
        let env: ApiEnvelope<ObservedStatus> = serde_json::from_value(json!({
            "success": true,
            "data": {
                "status": "capturing",
                "interface": "eth0",
                "interfaces": [{"name": "eth0", "ips": ["10.0.0.2"]}],
                "packets_captured": 12,
                "connected": true
            }
        }))
        .unwrap();
        let observed = env.into_result("x").unwrap().unwrap();
        assert_eq!(observed.packets_captured, 12);
        assert_eq!(observed.interfaces[0].ips, vec!["10.0.0.2".to_string()]);
    }

    #[test]
    fn unreadable_body_is_malformed_not_unreachable() {
        let err = parse_envelope::<ObservedStatus>(500, b"<html>Internal Server Error</html>").unwrap_err();
        assert!(matches!(err, AppError::MalformedReply { .. }));
        assert_eq!(err.operator_message(), "Connection to agent failed");
    }

    #[test]
    fn error_status_with_envelope_is_application_error() {
        let env = parse_envelope::<serde_json::Value>(400, br#"{"success":false,"error":"No interface specified"}"#)
            .unwrap();
        assert!(matches!(env.into_result("x"), Err(AppError::Application(_))));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        assert_eq!(
            HttpAgentClient::endpoint("http://10.0.0.7:8090/", "/status"),
            "http://10.0.0.7:8090/status"
        );
    }

    #[tokio::test]
    async fn unreachable_agent_is_a_transport_error() {
        let client = HttpAgentClient::new(Duration::from_millis(500)).unwrap();
        // port 9 (discard) on localhost is closed in test environments
        let err = client.status("http://127.0.0.1:9").await.unwrap_err();
        assert!(matches!(err, AppError::Transport { .. }));
    }
}
