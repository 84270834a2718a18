//! Minimal Home Assistant REST client.

use crate::record::{ConnectionConfig, EntityDescriptor};
use orac_core::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// One entity state as returned by `GET /api/states`.
#[derive(Clone, Debug, Deserialize)]
pub struct HaState {
    pub entity_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub attributes: Value,
}

impl HaState {
    pub fn to_descriptor(&self) -> EntityDescriptor {
        let domain = self
            .entity_id
            .split_once('.')
            .map(|(domain, _)| domain.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let original_name = self
            .attributes
            .get("friendly_name")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.entity_id)
            .to_string();
        EntityDescriptor {
            entity_id: self.entity_id.clone(),
            domain,
            original_name,
            state: self.state.clone(),
        }
    }
}

pub struct HomeAssistantClient {
    http: Client,
    base_url: String,
    token: String,
}

impl HomeAssistantClient {
    pub fn new(connection: &ConnectionConfig) -> Result<Self> {
        let base_url = connection.url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::validation("backend connection has no URL"));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(connection.timeout_secs))
            .danger_accept_invalid_certs(!connection.verify_ssl)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            token: connection.token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, endpoint: &str) -> Result<reqwest::Response> {
        let url = format!("{}{endpoint}", self.base_url);
        debug!(%url, "HA GET");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| classify(&self.base_url, e))?;
        check_status(&self.base_url, response).await
    }

    /// `GET /api/states`: every entity with its current state.
    pub async fn get_states(&self) -> Result<Vec<HaState>> {
        let response = self.get("/api/states").await?;
        let states: Vec<HaState> = response
            .json()
            .await
            .map_err(|e| Error::backend(&self.base_url, format!("invalid states payload: {e}")))?;
        Ok(states)
    }

    /// `GET /api/config`: instance metadata (version, location name, ...).
    pub async fn get_config(&self) -> Result<Value> {
        let response = self.get("/api/config").await?;
        response
            .json()
            .await
            .map_err(|e| Error::backend(&self.base_url, format!("invalid config payload: {e}")))
    }

    /// `POST /api/services/<domain>/<service>`.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Value,
    ) -> Result<Value> {
        let url = format!("{}/api/services/{domain}/{service}", self.base_url);
        debug!(%url, body = %data, "HA service call");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&data)
            .send()
            .await
            .map_err(|e| classify(&self.base_url, e))?;
        let response = check_status(&self.base_url, response).await?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::backend(&self.base_url, e.to_string()))?;
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// `GET /api/`: reachability probe.
    pub async fn probe(&self) -> Result<()> {
        self.get("/api/").await.map(|_| ())
    }
}

fn classify(base_url: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(format!("Home Assistant at {base_url} did not respond"))
    } else {
        Error::backend(base_url, e.to_string())
    }
}

async fn check_status(base_url: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 401 {
        Err(Error::backend(
            base_url,
            "authentication failed - check the API token".to_string(),
        ))
    } else {
        Err(Error::backend(
            base_url,
            format!("HTTP {status}: {body}"),
        ))
    }
}
