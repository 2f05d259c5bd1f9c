//! Sandbox handle: control-plane lifecycle plus the multiplexed RPC
//! session every operation runs over.

use std::time::Duration;

use sandbox_rpc::{RpcClient, RpcError};
use thiserror::Error;

use crate::api::{ApiClient, ApiError, CreateSandbox, SandboxInfo};
use crate::config::SandboxConfig;

/// Sandbox operation error.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("control plane error: {0}")]
    Api(#[from] ApiError),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("process start failed: {0}")]
    ProcessStart(String),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// An isolated, interactive remote system.
///
/// Created through the control plane, then driven over one persistent
/// multiplexed connection. All filesystem, process, and notebook
/// operations share that connection concurrently.
pub struct Sandbox {
    info: SandboxInfo,
    config: SandboxConfig,
    api: ApiClient,
    rpc: RpcClient,
}

impl Sandbox {
    /// Provision a new sandbox and connect to it.
    ///
    /// # Errors
    /// Returns a control-plane error if provisioning fails, or a transport
    /// error if the RPC connection cannot be established.
    pub async fn create(config: SandboxConfig) -> Result<Self, SandboxError> {
        let api = ApiClient::new(config.base_url.clone(), config.api_key.clone());
        let info = api
            .create_sandbox(&CreateSandbox {
                template_id: config.template.clone(),
                cwd: config.cwd.clone(),
                metadata: config.metadata.clone(),
            })
            .await?;
        Self::open(info, config, api).await
    }

    /// Attach to an already-running sandbox.
    ///
    /// # Errors
    /// Returns a control-plane error if the sandbox is unknown, or a
    /// transport error if the RPC connection cannot be established.
    pub async fn connect(sandbox_id: &str, config: SandboxConfig) -> Result<Self, SandboxError> {
        let api = ApiClient::new(config.base_url.clone(), config.api_key.clone());
        let info = api.get_sandbox(sandbox_id).await?;
        Self::open(info, config, api).await
    }

    async fn open(
        info: SandboxInfo,
        config: SandboxConfig,
        api: ApiClient,
    ) -> Result<Self, SandboxError> {
        let url = config.rpc_url_for(&info);
        let rpc = RpcClient::connect(&url).await?;
        tracing::info!(sandbox = %info.sandbox_id, "sandbox connected");
        Ok(Self {
            info,
            config,
            api,
            rpc,
        })
    }

    /// Sandbox identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.info.sandbox_id
    }

    /// Working directory operations default to.
    #[must_use]
    pub fn cwd(&self) -> &str {
        if self.info.cwd.is_empty() {
            &self.config.cwd
        } else {
            &self.info.cwd
        }
    }

    /// The underlying multiplexed RPC client.
    #[must_use]
    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Public host for a port forwarded out of the sandbox.
    #[must_use]
    pub fn host(&self, port: u16) -> String {
        self.config.host_for(&self.info, port)
    }

    /// Extend the sandbox lifetime.
    ///
    /// # Errors
    /// Returns a control-plane error if the refresh is rejected.
    pub async fn keep_alive(&self, timeout: Duration) -> Result<(), SandboxError> {
        self.api
            .refresh_sandbox(&self.info.sandbox_id, timeout.as_secs())
            .await?;
        Ok(())
    }

    /// Drop the current connection and dial the sandbox again.
    ///
    /// In-flight calls fail with a connection-closed error and active
    /// subscriptions end; subscriptions must be re-established by their
    /// owners.
    ///
    /// # Errors
    /// Returns a transport error if the new connection cannot be
    /// established.
    pub async fn reconnect(&self) -> Result<(), SandboxError> {
        let url = self.config.rpc_url_for(&self.info);
        self.rpc.reconnect(&url).await?;
        tracing::info!(sandbox = %self.info.sandbox_id, "sandbox reconnected");
        Ok(())
    }

    /// Destroy the sandbox and tear the connection down.
    ///
    /// # Errors
    /// Returns a control-plane error if deletion fails; the local
    /// connection is shut down either way.
    pub async fn stop(self) -> Result<(), SandboxError> {
        let result = self.api.delete_sandbox(&self.info.sandbox_id).await;
        self.rpc.shutdown().await;
        result?;
        Ok(())
    }
}

/// Decode a raw pushed payload into a call site's event shape, folding
/// subscription errors into [`SandboxError`].
pub(crate) fn decode_event<T: serde::de::DeserializeOwned>(
    payload: Result<serde_json::Value, RpcError>,
) -> Result<T, SandboxError> {
    match payload {
        Ok(value) => serde_json::from_value(value).map_err(|e| SandboxError::Rpc(RpcError::Decode(e))),
        Err(e) => Err(e.into()),
    }
}
