//! Client configuration.

use std::collections::HashMap;

use crate::api::SandboxInfo;

/// Default control-plane endpoint.
const DEFAULT_BASE_URL: &str = "https://api.e2b.dev";
/// Default sandbox template.
pub(crate) const DEFAULT_TEMPLATE: &str = "base";
/// Domain sandbox hosts live under.
const DEFAULT_DOMAIN: &str = "e2b.dev";
/// Port the sandbox RPC endpoint listens on.
const RPC_PORT: u16 = 49982;

/// Connection settings for the sandbox service.
///
/// Built fluently from an API key:
///
/// ```
/// use sandbox_client::SandboxConfig;
///
/// let config = SandboxConfig::new("key")
///     .template("code-interpreter-v1")
///     .cwd("/home/user");
/// ```
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// API key sent as `X-API-Key` on control-plane requests.
    pub api_key: String,
    /// Template the sandbox is provisioned from.
    pub template: String,
    /// Control-plane base URL.
    pub base_url: String,
    /// Domain sandbox hosts live under.
    pub domain: String,
    /// Working directory for operations that do not specify one.
    pub cwd: String,
    /// Metadata attached to the sandbox at creation.
    pub metadata: HashMap<String, String>,
    /// Overrides the derived RPC URL; used against local test servers.
    pub rpc_url: Option<String>,
}

impl SandboxConfig {
    /// Config with stock defaults for the given API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("sdk".to_string(), "sandbox-sdk-rs v1".to_string());
        Self {
            api_key: api_key.into(),
            template: DEFAULT_TEMPLATE.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            domain: DEFAULT_DOMAIN.to_string(),
            cwd: String::new(),
            metadata,
            rpc_url: None,
        }
    }

    /// Override the sandbox template.
    #[must_use]
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Override the control-plane base URL.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the sandbox host domain.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the default working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Pin the RPC URL instead of deriving it from the sandbox identity.
    #[must_use]
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    /// RPC endpoint for a provisioned sandbox.
    #[must_use]
    pub(crate) fn rpc_url_for(&self, info: &SandboxInfo) -> String {
        self.rpc_url.clone().unwrap_or_else(|| {
            format!(
                "wss://{RPC_PORT}-{}-{}.{}/ws",
                info.sandbox_id, info.client_id, self.domain
            )
        })
    }

    /// Public host for a port forwarded out of the sandbox.
    #[must_use]
    pub(crate) fn host_for(&self, info: &SandboxInfo, port: u16) -> String {
        format!("{port}-{}-{}.{}", info.sandbox_id, info.client_id, self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> SandboxInfo {
        SandboxInfo {
            sandbox_id: "sb1".to_string(),
            client_id: "c1".to_string(),
            ..SandboxInfo::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::new("key");
        assert_eq!(config.api_key, "key");
        assert_eq!(config.template, "base");
        assert_eq!(config.base_url, "https://api.e2b.dev");
        assert_eq!(config.metadata["sdk"], "sandbox-sdk-rs v1");
    }

    #[test]
    fn test_builder_overrides() {
        let config = SandboxConfig::new("key")
            .template("code-interpreter-v1")
            .base_url("http://localhost:3000")
            .domain("sandbox.test")
            .cwd("/work")
            .metadata("team", "ml");
        assert_eq!(config.template, "code-interpreter-v1");
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.cwd, "/work");
        assert_eq!(config.metadata["team"], "ml");
        assert_eq!(
            config.rpc_url_for(&info()),
            "wss://49982-sb1-c1.sandbox.test/ws"
        );
    }

    #[test]
    fn test_rpc_url_override_wins() {
        let config = SandboxConfig::new("key").rpc_url("ws://127.0.0.1:9000");
        assert_eq!(config.rpc_url_for(&info()), "ws://127.0.0.1:9000");
    }

    #[test]
    fn test_host_for_port() {
        let config = SandboxConfig::new("key");
        assert_eq!(config.host_for(&info(), 8080), "8080-sb1-c1.e2b.dev");
    }
}
