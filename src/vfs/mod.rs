//! Host-side client for the session's in-memory filesystem.
//!
//! [`VfsClient`] wraps one session's typed filesystem channel behind plain
//! `Result`-returning methods: store-level failures arrive as
//! [`FsError::Operation`] with the store's own message, transport failures
//! as [`FsError::Bridge`]. Paths travel as structured request fields, never
//! spliced into program text.

use serde_json::Value;
use thiserror::Error;

use crate::bridge::BridgeError;
use crate::session::SandboxSession;
use crate::wire::{FsRequest, FsResponse};

pub mod node;

pub use node::{FsNode, Listing, NodeKind, TreeNode};

/// Failure of one filesystem operation.
#[derive(Debug, Error)]
pub enum FsError {
    /// The store rejected the operation; carries its message verbatim.
    #[error("{0}")]
    Operation(String),
    /// The bridge to the runtime failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    /// The store answered with a response shape the operation cannot use.
    #[error("unexpected response for {0}")]
    Protocol(&'static str),
}

/// Typed filesystem operations on one open session.
#[derive(Debug)]
pub struct VfsClient<'s> {
    session: &'s SandboxSession,
}

impl<'s> VfsClient<'s> {
    /// Client over `session`'s store.
    pub fn new(session: &'s SandboxSession) -> Self {
        Self { session }
    }

    /// List a directory. Plain names by default; `info` adds per-entry
    /// type and size, `recursive` descends into subdirectories.
    pub async fn list(&self, path: &str, recursive: bool, info: bool) -> Result<Listing, FsError> {
        match self
            .session
            .fs(FsRequest::List {
                path: path.to_string(),
                recursive,
                info,
            })
            .await?
        {
            FsResponse::Listing { listing } => Ok(listing),
            FsResponse::Failed { message } => Err(FsError::Operation(message)),
            _ => Err(FsError::Protocol("list")),
        }
    }

    /// Read a file as UTF-8 text. `None` means there is no file at `path`
    /// or its bytes do not decode as UTF-8.
    pub async fn read(&self, path: &str) -> Result<Option<String>, FsError> {
        match self
            .session
            .fs(FsRequest::Read {
                path: path.to_string(),
            })
            .await?
        {
            FsResponse::Content { content } => Ok(content),
            FsResponse::Failed { message } => Err(FsError::Operation(message)),
            _ => Err(FsError::Protocol("read")),
        }
    }

    /// Write `content` to a file, creating it if absent. `append` extends
    /// the existing content instead of replacing it.
    pub async fn write(&self, path: &str, content: &str, append: bool) -> Result<(), FsError> {
        self.expect_done(
            FsRequest::Write {
                path: path.to_string(),
                content: content.to_string(),
                append,
            },
            "write",
        )
        .await
    }

    /// Remove a file.
    pub async fn remove(&self, path: &str) -> Result<(), FsError> {
        self.expect_done(
            FsRequest::Remove {
                path: path.to_string(),
            },
            "remove",
        )
        .await
    }

    /// Create a directory. The parent must already exist.
    pub async fn make_dir(&self, path: &str) -> Result<(), FsError> {
        self.expect_done(
            FsRequest::MakeDir {
                path: path.to_string(),
            },
            "make_dir",
        )
        .await
    }

    /// Remove an empty directory.
    pub async fn remove_dir(&self, path: &str) -> Result<(), FsError> {
        self.expect_done(
            FsRequest::RemoveDir {
                path: path.to_string(),
            },
            "remove_dir",
        )
        .await
    }

    /// Copy a file or directory tree from `src` to `dst`.
    pub async fn copy(&self, src: &str, dst: &str) -> Result<(), FsError> {
        self.expect_done(
            FsRequest::Copy {
                src: src.to_string(),
                dst: dst.to_string(),
            },
            "copy",
        )
        .await
    }

    async fn expect_done(&self, request: FsRequest, op: &'static str) -> Result<(), FsError> {
        match self.session.fs(request).await? {
            FsResponse::Done => Ok(()),
            FsResponse::Failed { message } => Err(FsError::Operation(message)),
            _ => Err(FsError::Protocol(op)),
        }
    }
}

/// Render a listing as the JSON value the command surface reports.
pub(crate) fn listing_to_value(listing: &Listing) -> Value {
    serde_json::to_value(listing).unwrap_or(Value::Null)
}
