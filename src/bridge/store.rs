//! The sandbox's embedded hierarchical store.
//!
//! `MemStore` lives on the runtime side of the boundary and executes typed
//! filesystem requests. It is private to one session and vanishes with it.
//! Error messages keep the wording callers of the original runtime saw:
//! an operation prefix plus an errno-style cause.

use std::collections::BTreeMap;

use crate::vfs::{FsNode, Listing, TreeNode};
use crate::wire::{FsRequest, FsResponse};

const ENOENT: &str = "No such file or directory";
const EEXIST: &str = "File exists";
const ENOTDIR: &str = "Not a directory";
const EISDIR: &str = "Is a directory";
const ENOTEMPTY: &str = "Directory not empty";

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir(BTreeMap<String, Node>),
}

/// In-memory hierarchical store rooted at `/`.
#[derive(Debug, Default)]
pub(crate) struct MemStore {
    root: BTreeMap<String, Node>,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn join(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}

impl MemStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Execute one request, mapping failures to the response envelope.
    pub(crate) fn apply(&mut self, request: FsRequest) -> FsResponse {
        match request {
            FsRequest::List {
                path,
                recursive,
                info,
            } => match self.list(&path, recursive, info) {
                Ok(listing) => FsResponse::Listing { listing },
                Err(cause) => FsResponse::Failed {
                    message: format!("Error reading directory: {cause}"),
                },
            },
            FsRequest::Read { path } => FsResponse::Content {
                content: self.read_utf8(&path),
            },
            FsRequest::Write {
                path,
                content,
                append,
            } => match self.write_bytes(&path, content.into_bytes(), append) {
                Ok(()) => FsResponse::Done,
                Err(cause) => FsResponse::Failed {
                    message: format!("Error writing file {path}: {cause}"),
                },
            },
            FsRequest::Remove { path } => match self.remove_file(&path) {
                Ok(()) => FsResponse::Done,
                Err(cause) => FsResponse::Failed {
                    message: format!("Error removing file {path}: {cause}"),
                },
            },
            FsRequest::MakeDir { path } => match self.make_dir(&path) {
                Ok(()) => FsResponse::Done,
                Err(cause) => FsResponse::Failed {
                    message: format!("Error creating directory {path}: {cause}"),
                },
            },
            FsRequest::RemoveDir { path } => match self.remove_dir(&path) {
                Ok(()) => FsResponse::Done,
                Err(cause) => FsResponse::Failed {
                    message: format!("Error removing directory {path}: {cause}"),
                },
            },
            FsRequest::Copy { src, dst } => match self.copy(&src, &dst) {
                Ok(()) => FsResponse::Done,
                Err(message) => FsResponse::Failed { message },
            },
        }
    }

    fn dir_at(&self, segs: &[&str]) -> Result<&BTreeMap<String, Node>, &'static str> {
        let mut current = &self.root;
        for seg in segs {
            match current.get(*seg) {
                Some(Node::Dir(children)) => current = children,
                Some(Node::File(_)) => return Err(ENOTDIR),
                None => return Err(ENOENT),
            }
        }
        Ok(current)
    }

    fn dir_at_mut(&mut self, segs: &[&str]) -> Result<&mut BTreeMap<String, Node>, &'static str> {
        let mut current = &mut self.root;
        for seg in segs {
            match current.get_mut(*seg) {
                Some(Node::Dir(children)) => current = children,
                Some(Node::File(_)) => return Err(ENOTDIR),
                None => return Err(ENOENT),
            }
        }
        Ok(current)
    }

    fn node_at(&self, path: &str) -> Result<&Node, &'static str> {
        let segs = segments(path);
        let (name, parent) = match segs.split_last() {
            Some(split) => split,
            // The root itself behaves as an implicit directory node.
            None => return Err(EISDIR),
        };
        self.dir_at(parent)?.get(*name).ok_or(ENOENT)
    }

    fn list(
        &self,
        path: &str,
        recursive: bool,
        info: bool,
    ) -> Result<Listing, &'static str> {
        let dir = self.dir_at(&segments(path))?;
        Ok(match (recursive, info) {
            (false, false) => Listing::Names(dir.keys().cloned().collect()),
            (_, true) => Listing::Entries(entries_info(dir, recursive)),
            (true, false) => Listing::Tree(tree(dir)),
        })
    }

    fn read_utf8(&self, path: &str) -> Option<String> {
        match self.node_at(path) {
            Ok(Node::File(bytes)) => String::from_utf8(bytes.clone()).ok(),
            _ => None,
        }
    }

    fn write_bytes(
        &mut self,
        path: &str,
        bytes: Vec<u8>,
        append: bool,
    ) -> Result<(), &'static str> {
        let segs = segments(path);
        let (name, parent) = segs.split_last().ok_or(EISDIR)?;
        let dir = self.dir_at_mut(parent)?;
        match dir.get_mut(*name) {
            Some(Node::Dir(_)) => Err(EISDIR),
            Some(Node::File(existing)) => {
                if append {
                    existing.extend_from_slice(&bytes);
                } else {
                    *existing = bytes;
                }
                Ok(())
            }
            None => {
                dir.insert((*name).to_string(), Node::File(bytes));
                Ok(())
            }
        }
    }

    fn remove_file(&mut self, path: &str) -> Result<(), &'static str> {
        let segs = segments(path);
        let (name, parent) = segs.split_last().ok_or(EISDIR)?;
        let dir = self.dir_at_mut(parent)?;
        match dir.get(*name) {
            Some(Node::File(_)) => {
                dir.remove(*name);
                Ok(())
            }
            Some(Node::Dir(_)) => Err(EISDIR),
            None => Err(ENOENT),
        }
    }

    fn make_dir(&mut self, path: &str) -> Result<(), &'static str> {
        let segs = segments(path);
        let (name, parent) = segs.split_last().ok_or(EEXIST)?;
        let dir = self.dir_at_mut(parent)?;
        if dir.contains_key(*name) {
            return Err(EEXIST);
        }
        dir.insert((*name).to_string(), Node::Dir(BTreeMap::new()));
        Ok(())
    }

    fn remove_dir(&mut self, path: &str) -> Result<(), &'static str> {
        let segs = segments(path);
        let (name, parent) = segs.split_last().ok_or(ENOTEMPTY)?;
        let dir = self.dir_at_mut(parent)?;
        match dir.get(*name) {
            Some(Node::Dir(children)) if children.is_empty() => {
                dir.remove(*name);
                Ok(())
            }
            Some(Node::Dir(_)) => Err(ENOTEMPTY),
            Some(Node::File(_)) => Err(ENOTDIR),
            None => Err(ENOENT),
        }
    }

    /// Copy a file or directory tree depth-first.
    ///
    /// Creating an already-existing destination directory is non-fatal; any
    /// other failure aborts the walk and surfaces the first message. File
    /// content moves as raw bytes, so a copy round-trips content the UTF-8
    /// text mode of read/write would refuse.
    fn copy(&mut self, src: &str, dst: &str) -> Result<(), String> {
        let node = self
            .node_at(src)
            .map_err(|cause| format!("Error getting stats for {src}: {cause}"))?
            .clone();
        self.copy_node(&node, src, dst)
    }

    fn copy_node(&mut self, node: &Node, src: &str, dst: &str) -> Result<(), String> {
        match node {
            Node::Dir(children) => {
                match self.make_dir(dst) {
                    Ok(()) | Err(EEXIST) => {}
                    Err(cause) => {
                        return Err(format!("Error creating directory {dst}: {cause}"));
                    }
                }
                for (name, child) in children {
                    let src_child = join(src, name);
                    let dst_child = join(dst, name);
                    self.copy_node(child, &src_child, &dst_child)?;
                }
                Ok(())
            }
            Node::File(bytes) => self
                .write_bytes(dst, bytes.clone(), false)
                .map_err(|cause| format!("Error writing file {dst}: {cause}")),
        }
    }
}

fn entries_info(dir: &BTreeMap<String, Node>, recursive: bool) -> Vec<FsNode> {
    dir.iter()
        .map(|(name, node)| match node {
            Node::File(bytes) => FsNode::file(name, bytes.len() as u64),
            Node::Dir(children) => {
                let kids = recursive.then(|| entries_info(children, true));
                FsNode::dir(name, kids)
            }
        })
        .collect()
}

fn tree(dir: &BTreeMap<String, Node>) -> BTreeMap<String, TreeNode> {
    dir.iter()
        .map(|(name, node)| {
            let value = match node {
                Node::File(_) => TreeNode::File,
                Node::Dir(children) => TreeNode::Dir(tree(children)),
            };
            (name.clone(), value)
        })
        .collect()
}
