//! Processes in the sandbox.
//!
//! Starting a process is a one-shot call; its stdout, stderr, and exit
//! notifications each arrive over their own push subscription.

use std::collections::HashMap;

use sandbox_rpc::{RpcClient, Subscription};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::sandbox::{Sandbox, SandboxError, decode_event};

const PROCESS_START: &str = "process_start";
const PROCESS_SUBSCRIBE: &str = "process_subscribe";
const PROCESS_UNSUBSCRIBE: &str = "process_unsubscribe";

/// Output families a process can be subscribed to. The tag is the leading
/// literal argument of the subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEventKind {
    Stdout,
    Stderr,
    Exit,
}

impl ProcessEventKind {
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Stdout => "onStdout",
            Self::Stderr => "onStderr",
            Self::Exit => "onExit",
        }
    }
}

/// One pushed output line or exit notice.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub line: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// Fluent description of a process to start.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    cmd: String,
    cwd: Option<String>,
    env: Option<HashMap<String, String>>,
}

impl ProcessBuilder {
    /// Describe a command to run in the sandbox.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            cwd: None,
            env: None,
        }
    }

    /// Override the working directory (defaults to the sandbox cwd).
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Replace the environment (defaults to `PYTHONUNBUFFERED=1`).
    #[must_use]
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Start the process in `sandbox`.
    ///
    /// The client assigns the process id; the remote must echo it back.
    ///
    /// # Errors
    /// Returns an application or transport error from the call, or a
    /// process-start error if the echoed id is empty or does not match.
    pub async fn start(self, sandbox: &Sandbox) -> Result<Process, SandboxError> {
        let id = Uuid::new_v4().simple().to_string();
        let cwd = self.cwd.unwrap_or_else(|| sandbox.cwd().to_string());
        let env = self.env.unwrap_or_else(|| {
            HashMap::from([("PYTHONUNBUFFERED".to_string(), "1".to_string())])
        });

        let echoed: String = sandbox
            .rpc()
            .call(
                PROCESS_START,
                vec![json!(id), json!(self.cmd), json!(env), json!(cwd)],
            )
            .await?;
        if echoed.is_empty() {
            return Err(SandboxError::ProcessStart(
                "remote returned an empty process id".to_string(),
            ));
        }
        if echoed != id {
            return Err(SandboxError::ProcessStart(format!(
                "remote echoed process id {echoed}, expected {id}"
            )));
        }
        tracing::debug!(process = %id, "process started");

        Ok(Process {
            id,
            rpc: sandbox.rpc().clone(),
        })
    }
}

/// A running process.
#[derive(Clone)]
pub struct Process {
    id: String,
    rpc: RpcClient,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Start `cmd` with default working directory and environment.
    ///
    /// # Errors
    /// See [`ProcessBuilder::start`].
    pub async fn start_process(&self, cmd: impl Into<String>) -> Result<Process, SandboxError> {
        ProcessBuilder::new(cmd).start(self).await
    }
}

impl Process {
    /// Client-assigned process id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribe to one of the process output families.
    ///
    /// # Errors
    /// Returns the subscribe call's application or transport error.
    pub async fn subscribe(&self, kind: ProcessEventKind) -> Result<OutputStream, SandboxError> {
        let sub = self
            .rpc
            .subscribe(
                PROCESS_SUBSCRIBE,
                vec![json!(kind.tag()), json!(self.id)],
                PROCESS_UNSUBSCRIBE,
            )
            .await?;
        Ok(OutputStream { sub })
    }

    /// Subscribe to stdout lines.
    ///
    /// # Errors
    /// See [`Process::subscribe`].
    pub async fn subscribe_stdout(&self) -> Result<OutputStream, SandboxError> {
        self.subscribe(ProcessEventKind::Stdout).await
    }

    /// Subscribe to stderr lines.
    ///
    /// # Errors
    /// See [`Process::subscribe`].
    pub async fn subscribe_stderr(&self) -> Result<OutputStream, SandboxError> {
        self.subscribe(ProcessEventKind::Stderr).await
    }

    /// Subscribe to the exit notice.
    ///
    /// # Errors
    /// See [`Process::subscribe`].
    pub async fn subscribe_exit(&self) -> Result<OutputStream, SandboxError> {
        self.subscribe(ProcessEventKind::Exit).await
    }
}

/// Stream of pushed events for one process output family.
#[derive(Debug)]
pub struct OutputStream {
    sub: Subscription,
}

impl OutputStream {
    /// Token the stream is routed by.
    #[must_use]
    pub fn token(&self) -> &str {
        self.sub.token()
    }

    /// Next event. `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<Result<ProcessEvent, SandboxError>> {
        let payload = self.sub.recv().await?;
        Some(decode_event(payload))
    }

    /// Stop the stream and unsubscribe from the remote.
    pub async fn close(self) {
        self.sub.close().await;
    }
}
