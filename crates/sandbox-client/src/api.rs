//! HTTP control plane: provisioning, keep-alive, deletion.
//!
//! Plain request/response calls; the multiplexed transport in
//! `sandbox-rpc` is not involved here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Control-plane error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),
}

/// Sandbox identity returned by the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxInfo {
    #[serde(rename = "sandboxID", default)]
    pub sandbox_id: String,
    #[serde(rename = "clientID", default)]
    pub client_id: String,
    #[serde(rename = "templateID", default)]
    pub template_id: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Body of a provisioning request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateSandbox {
    #[serde(rename = "templateID")]
    pub template_id: String,
    pub cwd: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Refresh {
    duration: u64,
}

/// Thin client over the control-plane endpoints.
#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub(crate) fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("X-API-Key", &self.api_key)
            .header("Accept", "application/json")
    }

    fn expect_ok(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        // Success and redirection ranges pass; anything else is an error.
        if status.as_u16() < 200 || status.as_u16() >= 400 {
            return Err(ApiError::Status(status));
        }
        Ok(resp)
    }

    /// Provision a new sandbox.
    pub(crate) async fn create_sandbox(&self, body: &CreateSandbox) -> Result<SandboxInfo, ApiError> {
        let resp = self
            .request(reqwest::Method::POST, "/sandboxes")
            .json(body)
            .send()
            .await?;
        Ok(Self::expect_ok(resp)?.json().await?)
    }

    /// Look up an existing sandbox.
    pub(crate) async fn get_sandbox(&self, sandbox_id: &str) -> Result<SandboxInfo, ApiError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/sandboxes/{sandbox_id}"))
            .send()
            .await?;
        Ok(Self::expect_ok(resp)?.json().await?)
    }

    /// Extend the sandbox lifetime by `duration_secs`.
    pub(crate) async fn refresh_sandbox(
        &self,
        sandbox_id: &str,
        duration_secs: u64,
    ) -> Result<(), ApiError> {
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/sandboxes/{sandbox_id}/refreshes"),
            )
            .json(&Refresh {
                duration: duration_secs,
            })
            .send()
            .await?;
        Self::expect_ok(resp)?;
        Ok(())
    }

    /// Tear the sandbox down.
    pub(crate) async fn delete_sandbox(&self, sandbox_id: &str) -> Result<(), ApiError> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/sandboxes/{sandbox_id}"))
            .send()
            .await?;
        Self::expect_ok(resp)?;
        Ok(())
    }
}
