//! The filesystem command language.
//!
//! A line-oriented surface over the session store, meant for agent tool
//! calls: `ls`, `cp`, `rm`, `mkdir`, `rmdir`, `get`, and quoted-content
//! `put`. Lines are parsed by [`parse_line`] into [`Command`] values and
//! dispatched by [`CommandInterpreter`] against one session's store.
//! Every outcome, including a failed parse, is reported as a JSON value;
//! the interpreter never panics and never raises past its caller.

use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::session::SandboxSession;
use crate::vfs::{FsError, VfsClient, listing_to_value};

mod parser;

pub use parser::parse_line;

/// One parsed filesystem command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `ls [-r] [-info] [path]`; the path defaults to the root.
    List {
        /// Directory to list; `None` means `/`.
        path: Option<String>,
        /// Descend into subdirectories.
        recursive: bool,
        /// Include per-entry type and size.
        info: bool,
    },
    /// `cp [-r] src dst`. Directories always copy recursively; the flag
    /// is accepted for familiarity.
    Copy {
        /// Source file or directory.
        src: String,
        /// Destination path.
        dst: String,
        /// The `-r` flag was present.
        recursive: bool,
    },
    /// `rm path`: remove a file.
    Remove {
        /// File to remove.
        path: String,
    },
    /// `mkdir path`: create a directory under an existing parent.
    MakeDir {
        /// Directory to create.
        path: String,
    },
    /// `rmdir path`: remove an empty directory.
    RemoveDir {
        /// Directory to remove.
        path: String,
    },
    /// `get path`: read a file as text.
    ReadFile {
        /// File to read.
        path: String,
    },
    /// `"content" > put path` or `"content" >> put path`.
    WriteFile {
        /// Target file.
        path: String,
        /// Content between the outer quotes, verbatim.
        content: String,
        /// `>>` appends instead of overwriting.
        append: bool,
    },
}

/// A line the grammar could not accept.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    /// The parser's diagnostic.
    pub message: String,
    /// The offending line, verbatim.
    pub input: String,
}

/// Executes command lines against one session's store.
#[derive(Debug)]
pub struct CommandInterpreter<'s> {
    vfs: VfsClient<'s>,
}

impl<'s> CommandInterpreter<'s> {
    /// Interpreter over `session`'s store.
    pub fn new(session: &'s SandboxSession) -> Self {
        Self {
            vfs: VfsClient::new(session),
        }
    }

    /// Parse and dispatch one line, reporting the outcome as JSON.
    ///
    /// Successful mutations report `true`; `get` reports the file text or
    /// `null`; `ls` reports names, entry records, or a nested tree. A
    /// failed parse reports `{"error", "input"}`; a failed operation
    /// reports `{"error"}` with the store's message.
    pub async fn run(&self, line: &str) -> Value {
        let command = match parse_line(line) {
            Ok(command) => command,
            Err(e) => {
                debug!(input = %e.input, "rejected command line");
                return json!({"error": e.message, "input": e.input});
            }
        };
        match self.dispatch(command).await {
            Ok(value) => value,
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    /// Dispatch one parsed command against the store.
    pub async fn dispatch(&self, command: Command) -> Result<Value, FsError> {
        match command {
            Command::List {
                path,
                recursive,
                info,
            } => {
                let path = path.as_deref().unwrap_or("/");
                let listing = self.vfs.list(path, recursive, info).await?;
                Ok(listing_to_value(&listing))
            }
            Command::Copy { src, dst, .. } => {
                self.vfs.copy(&src, &dst).await?;
                Ok(Value::Bool(true))
            }
            Command::Remove { path } => {
                self.vfs.remove(&path).await?;
                Ok(Value::Bool(true))
            }
            Command::MakeDir { path } => {
                self.vfs.make_dir(&path).await?;
                Ok(Value::Bool(true))
            }
            Command::RemoveDir { path } => {
                self.vfs.remove_dir(&path).await?;
                Ok(Value::Bool(true))
            }
            Command::ReadFile { path } => Ok(match self.vfs.read(&path).await? {
                Some(text) => Value::String(text),
                None => Value::Null,
            }),
            Command::WriteFile {
                path,
                content,
                append,
            } => {
                self.vfs.write(&path, &content, append).await?;
                Ok(Value::Bool(true))
            }
        }
    }
}
