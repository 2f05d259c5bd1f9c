//! Client SDK for the remote code-execution sandbox service.
//!
//! A sandbox is provisioned over plain HTTP, then driven through one
//! persistent multiplexed connection (see `sandbox-rpc`):
//! - `Sandbox` - lifecycle plus filesystem and process operations
//! - `DirWatcher` / `OutputStream` - push subscriptions for file changes
//!   and process output
//! - `CodeInterpreter` - notebook-style code-cell execution

pub mod api;
pub mod config;
pub mod filesystem;
pub mod interpreter;
pub mod process;
pub mod sandbox;

#[cfg(test)]
mod testutil;

pub use api::{ApiError, SandboxInfo};
pub use config::SandboxConfig;
pub use filesystem::{DirEntry, DirWatcher, WatchEvent};
pub use interpreter::{CODE_INTERPRETER_TEMPLATE, CodeInterpreter, Execution};
pub use process::{OutputStream, Process, ProcessBuilder, ProcessEvent, ProcessEventKind};
pub use sandbox::{Sandbox, SandboxError};
