//! Filesystem operations inside the sandbox.
//!
//! One-shot operations run through the call path; directory watching is a
//! push subscription keyed by the `watchDir` tag.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sandbox_rpc::Subscription;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::sandbox::{Sandbox, SandboxError};

const FILESYSTEM_LIST: &str = "filesystem_list";
const FILESYSTEM_READ: &str = "filesystem_read";
const FILESYSTEM_WRITE: &str = "filesystem_write";
const FILESYSTEM_REMOVE: &str = "filesystem_remove";
const FILESYSTEM_MAKE_DIR: &str = "filesystem_makeDir";
const FILESYSTEM_READ_BYTES: &str = "filesystem_readBase64";
const FILESYSTEM_WRITE_BYTES: &str = "filesystem_writeBase64";
const FILESYSTEM_SUBSCRIBE: &str = "filesystem_subscribe";
const FILESYSTEM_UNSUBSCRIBE: &str = "filesystem_unsubscribe";

/// Tag selecting the directory-watch event family.
const WATCH_DIR_TAG: &str = "watchDir";

/// Directory listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "isDir", default)]
    pub is_dir: bool,
}

/// A change pushed by a directory watch.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchEvent {
    /// Operation kind, e.g. `Create`, `Write`, `Remove`.
    #[serde(rename = "type", default)]
    pub operation: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "isDirectory", default)]
    pub is_directory: bool,
}

impl Sandbox {
    /// List files and directories at `path`.
    ///
    /// # Errors
    /// Returns an application or transport error from the call.
    pub async fn ls(&self, path: &str) -> Result<Vec<DirEntry>, SandboxError> {
        Ok(self.rpc().call(FILESYSTEM_LIST, vec![json!(path)]).await?)
    }

    /// Read a text file.
    ///
    /// # Errors
    /// Returns an application or transport error from the call.
    pub async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        Ok(self.rpc().call(FILESYSTEM_READ, vec![json!(path)]).await?)
    }

    /// Write a text file, creating it if needed.
    ///
    /// # Errors
    /// Returns an application or transport error from the call.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.rpc()
            .call::<Value>(FILESYSTEM_WRITE, vec![json!(path), json!(content)])
            .await?;
        Ok(())
    }

    /// Read a binary file. The payload travels base64-encoded.
    ///
    /// # Errors
    /// Returns a call error, or a decode error if the payload is not
    /// valid base64.
    pub async fn read_file_bytes(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let encoded: String = self
            .rpc()
            .call(FILESYSTEM_READ_BYTES, vec![json!(path)])
            .await?;
        Ok(BASE64.decode(encoded)?)
    }

    /// Write a binary file. The payload travels base64-encoded.
    ///
    /// # Errors
    /// Returns an application or transport error from the call.
    pub async fn write_file_bytes(&self, path: &str, data: &[u8]) -> Result<(), SandboxError> {
        let encoded = BASE64.encode(data);
        self.rpc()
            .call::<Value>(FILESYSTEM_WRITE_BYTES, vec![json!(path), json!(encoded)])
            .await?;
        Ok(())
    }

    /// Create a directory, including parents.
    ///
    /// # Errors
    /// Returns an application or transport error from the call.
    pub async fn make_dir(&self, path: &str) -> Result<(), SandboxError> {
        self.rpc()
            .call::<Value>(FILESYSTEM_MAKE_DIR, vec![json!(path)])
            .await?;
        Ok(())
    }

    /// Remove a file or directory.
    ///
    /// # Errors
    /// Returns an application or transport error from the call.
    pub async fn remove(&self, path: &str) -> Result<(), SandboxError> {
        self.rpc()
            .call::<Value>(FILESYSTEM_REMOVE, vec![json!(path)])
            .await?;
        Ok(())
    }

    /// Watch a directory for changes.
    ///
    /// Events stream until the watcher is closed or dropped; either way
    /// the remote watch is unsubscribed.
    ///
    /// # Errors
    /// Returns the subscribe call's application or transport error.
    pub async fn watch_dir(&self, path: &str) -> Result<DirWatcher, SandboxError> {
        let sub = self
            .rpc()
            .subscribe(
                FILESYSTEM_SUBSCRIBE,
                vec![json!(WATCH_DIR_TAG), json!(path)],
                FILESYSTEM_UNSUBSCRIBE,
            )
            .await?;
        Ok(DirWatcher { sub })
    }
}

/// Stream of filesystem changes for one watched directory.
#[derive(Debug)]
pub struct DirWatcher {
    sub: Subscription,
}

impl DirWatcher {
    /// Token the watch is routed by.
    #[must_use]
    pub fn token(&self) -> &str {
        self.sub.token()
    }

    /// Next filesystem change. `None` once the watch is closed.
    pub async fn recv(&mut self) -> Option<Result<WatchEvent, SandboxError>> {
        let payload = self.sub.recv().await?;
        Some(crate::sandbox::decode_event(payload))
    }

    /// Stop watching and unsubscribe from the remote watch.
    pub async fn close(self) {
        self.sub.close().await;
    }
}
