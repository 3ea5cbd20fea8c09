//! Typed messages that cross the isolation boundary.
//!
//! Every filesystem primitive is a [`FsRequest`]/[`FsResponse`] pair, and
//! every evaluation resolves to an [`EvalEnvelope`]. Values are carried as
//! structured data end to end; nothing is ever interpolated into evaluated
//! program text, so paths and file content cannot break out of their
//! position in a message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::vfs::Listing;

/// A filesystem primitive, one round trip each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FsRequest {
    /// List a directory snapshot; the flags select the listing shape.
    List {
        /// Absolute directory path.
        path: String,
        /// Descend into subdirectories.
        recursive: bool,
        /// Include kind/size details per entry.
        info: bool,
    },
    /// Read a file as UTF-8 text.
    Read {
        /// Absolute file path.
        path: String,
    },
    /// Write UTF-8 text to a file, creating it if needed.
    Write {
        /// Absolute file path.
        path: String,
        /// Text to write.
        content: String,
        /// Append instead of overwriting.
        append: bool,
    },
    /// Unlink a file.
    Remove {
        /// Absolute file path.
        path: String,
    },
    /// Create a directory; fails if it already exists.
    MakeDir {
        /// Absolute directory path.
        path: String,
    },
    /// Remove an empty directory.
    RemoveDir {
        /// Absolute directory path.
        path: String,
    },
    /// Copy a file, or a directory tree depth-first. File content crosses
    /// as raw bytes inside the runtime, not through the UTF-8 text mode.
    Copy {
        /// Absolute source path.
        src: String,
        /// Absolute destination path.
        dst: String,
    },
}

/// Reply to one [`FsRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FsResponse {
    /// Successful `list`.
    Listing {
        /// The listing snapshot.
        listing: Listing,
    },
    /// Successful `read`; `None` when the file is missing or unreadable.
    Content {
        /// File content, if any.
        content: Option<String>,
    },
    /// Successful mutation.
    Done,
    /// The operation failed; `message` preserves the runtime's wording.
    Failed {
        /// Original error message.
        message: String,
    },
}

/// Result envelope of one evaluation inside the isolated runtime.
///
/// On success `output` holds everything the program wrote to its captured
/// standard-output stream. On failure `error` holds `"<kind>: <message>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalEnvelope {
    /// Whether the program ran to completion.
    pub success: bool,
    /// Captured stdout, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Fault description, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvalEnvelope {
    /// Envelope for a completed run with its captured output.
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    /// Envelope for a run that faulted inside the runtime.
    pub fn failure(fault: &RuntimeFault) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(fault.to_string()),
        }
    }
}

/// A fault raised by the program while it ran inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeFault {
    /// Fault class, e.g. `NameError` or `RuntimeError`.
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

impl RuntimeFault {
    /// Build a fault from a kind and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Reply envelope for one host-callback invocation.
///
/// Handler failures travel inside this envelope so guest code observes them
/// as data rather than the host run aborting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackReply {
    /// Whether the handler resolved.
    pub ok: bool,
    /// Handler return value, present when `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Failure description, present when not `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackReply {
    /// Reply for a handler that resolved with `value`.
    pub fn resolved(value: Value) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    /// Reply for a handler that rejected.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(error.into()),
        }
    }
}
