//! Notebook-style code-cell execution.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;

use crate::config::{DEFAULT_TEMPLATE, SandboxConfig};
use crate::sandbox::{Sandbox, SandboxError};

const NOTEBOOK_EXEC_CELL: &str = "notebook_execCell";

/// Template with the notebook kernel preinstalled.
pub const CODE_INTERPRETER_TEMPLATE: &str = "code-interpreter-v1";

/// One output produced by a cell.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CellResult {
    #[serde(rename = "isMainResult", default)]
    pub is_main_result: bool,
    /// MIME type → rendered representation.
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default)]
    pub formats: Vec<String>,
}

/// Captured stdout/stderr of a cell run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionLogs {
    #[serde(default)]
    pub stdout: Vec<String>,
    #[serde(default)]
    pub stderr: Vec<String>,
}

/// Raised exception of a failed cell.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionError {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub traceback: String,
}

/// Full result of a cell execution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Execution {
    #[serde(default)]
    pub results: Vec<CellResult>,
    #[serde(default)]
    pub logs: ExecutionLogs,
    #[serde(default)]
    pub error: Option<ExecutionError>,
}

/// Sandbox specialized for executing code cells in a notebook kernel.
pub struct CodeInterpreter {
    sandbox: Sandbox,
}

impl CodeInterpreter {
    /// Provision a new interpreter sandbox.
    ///
    /// Uses [`CODE_INTERPRETER_TEMPLATE`] unless the config names another
    /// template explicitly.
    ///
    /// # Errors
    /// See [`Sandbox::create`].
    pub async fn create(mut config: SandboxConfig) -> Result<Self, SandboxError> {
        if config.template == DEFAULT_TEMPLATE {
            config.template = CODE_INTERPRETER_TEMPLATE.to_string();
        }
        Ok(Self {
            sandbox: Sandbox::create(config).await?,
        })
    }

    /// Attach to an existing interpreter sandbox.
    ///
    /// # Errors
    /// See [`Sandbox::connect`].
    pub async fn connect(sandbox_id: &str, config: SandboxConfig) -> Result<Self, SandboxError> {
        Ok(Self {
            sandbox: Sandbox::connect(sandbox_id, config).await?,
        })
    }

    /// The underlying sandbox.
    #[must_use]
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Execute one code cell and wait for its full result.
    ///
    /// # Errors
    /// Returns an application error if the kernel rejects the cell, or a
    /// transport error if the connection fails.
    pub async fn exec_cell(&self, code: &str) -> Result<Execution, SandboxError> {
        Ok(self
            .sandbox
            .rpc()
            .call(NOTEBOOK_EXEC_CELL, vec![json!(code)])
            .await?)
    }

    /// Destroy the sandbox.
    ///
    /// # Errors
    /// See [`Sandbox::stop`].
    pub async fn stop(self) -> Result<(), SandboxError> {
        self.sandbox.stop().await
    }
}
