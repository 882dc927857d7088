//! Typed wrappers for common gateway methods.
//!
//! Pure sugar over [`GatewayClient::call`]: a fixed method name and params
//! shape. Result structs keep unrecognized fields in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::client::GatewayClient;
use crate::error::RequestError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HealthStatus {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub key: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct AgentListPayload {
    #[serde(default)]
    agents: Vec<AgentSummary>,
}

#[derive(Deserialize)]
struct SessionsListPayload {
    #[serde(default)]
    sessions: Vec<SessionSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatSendParams<'a> {
    session_key: &'a str,
    message: &'a str,
}

impl GatewayClient {
    /// `health`
    ///
    /// # Errors
    ///
    /// Any [`RequestError`] from the underlying call.
    pub async fn health(&self) -> Result<HealthStatus, RequestError> {
        self.call("health", &json!({})).await
    }

    /// `status`, returned as raw JSON.
    ///
    /// # Errors
    ///
    /// Any [`RequestError`] from the underlying call.
    pub async fn status(&self) -> Result<Value, RequestError> {
        self.send("status", json!({})).await
    }

    /// `agent.list`
    ///
    /// # Errors
    ///
    /// Any [`RequestError`] from the underlying call.
    pub async fn agent_list(&self) -> Result<Vec<AgentSummary>, RequestError> {
        let payload: AgentListPayload = self.call("agent.list", &json!({})).await?;
        Ok(payload.agents)
    }

    /// `sessions.list`, optionally capped at `limit` entries.
    ///
    /// # Errors
    ///
    /// Any [`RequestError`] from the underlying call.
    pub async fn sessions_list(&self, limit: Option<u32>) -> Result<Vec<SessionSummary>, RequestError> {
        let params = match limit {
            Some(limit) => json!({ "limit": limit }),
            None => json!({}),
        };
        let payload: SessionsListPayload = self.call("sessions.list", &params).await?;
        Ok(payload.sessions)
    }

    /// `chat.send`
    ///
    /// # Errors
    ///
    /// Any [`RequestError`] from the underlying call.
    pub async fn chat_send(&self, session_key: &str, message: &str) -> Result<Value, RequestError> {
        self.call("chat.send", &ChatSendParams { session_key, message }).await
    }
}
