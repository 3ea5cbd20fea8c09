//! Data model for directory listings.
//!
//! Listings come back from the sandbox store in one of four shapes depending
//! on the `recursive`/`info` flags, and all of them serialize to the plain
//! JSON structures agents consume on the command surface: flat name arrays,
//! entry objects, or nested name-to-subtree maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Whether a store entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
}

/// One entry in an info listing.
///
/// `size` is present for files and `null` for directories. `children` is
/// populated only in recursive listings, and only for directories. When the
/// store fails to stat an individual entry mid-walk, the entry is kept in
/// the listing with `error` set instead of raising; the listing as a whole
/// still succeeds, and the entry carries only `name` and `error` on the
/// wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FsNode {
    /// Entry name (not the full path; listings are rooted at the requested
    /// directory).
    pub name: String,
    /// Entry kind, absent when the entry could not be stat'ed.
    #[serde(rename = "type", default)]
    pub kind: Option<NodeKind>,
    /// File size in bytes; `null` for directories.
    #[serde(default)]
    pub size: Option<u64>,
    /// Child entries, populated only for directories in recursive listings.
    #[serde(default)]
    pub children: Option<Vec<FsNode>>,
    /// Per-entry traversal error, if stat'ing this entry failed.
    #[serde(default)]
    pub error: Option<String>,
}

// Hand-rolled so `size` appears (null included) only when the entry was
// stat'ed; error entries stay at `{name, error}`.
impl Serialize for FsNode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("FsNode", 3)?;
        s.serialize_field("name", &self.name)?;
        if let Some(kind) = &self.kind {
            s.serialize_field("type", kind)?;
            s.serialize_field("size", &self.size)?;
        }
        if let Some(children) = &self.children {
            s.serialize_field("children", children)?;
        }
        if let Some(error) = &self.error {
            s.serialize_field("error", error)?;
        }
        s.end()
    }
}

impl FsNode {
    /// A file entry with its size.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: Some(NodeKind::File),
            size: Some(size),
            children: None,
            error: None,
        }
    }

    /// A directory entry, optionally carrying its children (recursive mode).
    pub fn dir(name: impl Into<String>, children: Option<Vec<FsNode>>) -> Self {
        Self {
            name: name.into(),
            kind: Some(NodeKind::Dir),
            size: None,
            children,
            error: None,
        }
    }

    /// An entry that could not be inspected.
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            size: None,
            children: None,
            error: Some(error.into()),
        }
    }

    /// True when this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == Some(NodeKind::Dir)
    }
}

/// One node in a recursive name-only listing.
///
/// Serializes the way the store reports it: files as the string `"file"`,
/// directories as nested maps, per-entry failures as their error string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TreeNodeRepr", into = "TreeNodeRepr")]
pub enum TreeNode {
    /// A file leaf.
    File,
    /// A directory with its (possibly empty) subtree.
    Dir(BTreeMap<String, TreeNode>),
    /// A traversal error recorded in place of the entry.
    Error(String),
}

impl TreeNode {
    /// The subtree of a directory node, if this is one.
    pub fn subtree(&self) -> Option<&BTreeMap<String, TreeNode>> {
        match self {
            TreeNode::Dir(children) => Some(children),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TreeNodeRepr {
    Dir(BTreeMap<String, TreeNode>),
    Text(String),
}

impl From<TreeNodeRepr> for TreeNode {
    fn from(repr: TreeNodeRepr) -> Self {
        match repr {
            TreeNodeRepr::Dir(children) => TreeNode::Dir(children),
            TreeNodeRepr::Text(text) if text == "file" => TreeNode::File,
            TreeNodeRepr::Text(text) => TreeNode::Error(text),
        }
    }
}

impl From<TreeNode> for TreeNodeRepr {
    fn from(node: TreeNode) -> Self {
        match node {
            TreeNode::File => TreeNodeRepr::Text("file".to_string()),
            TreeNode::Dir(children) => TreeNodeRepr::Dir(children),
            TreeNode::Error(message) => TreeNodeRepr::Text(message),
        }
    }
}

/// A directory listing snapshot.
///
/// The shape tracks the `recursive`/`info` flags of the request:
/// plain names, entry objects (flat, or nested via [`FsNode::children`]),
/// or a nested name-to-subtree map. The untagged serde representation means
/// an empty listing deserializes as [`Listing::Names`] regardless of the
/// shape it was produced in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Listing {
    /// Non-recursive, no info: entry names.
    Names(Vec<String>),
    /// Info listing; recursive listings populate [`FsNode::children`].
    Entries(Vec<FsNode>),
    /// Recursive, no info: nested name-to-subtree map.
    Tree(BTreeMap<String, TreeNode>),
}

impl Listing {
    /// Entry names, if this is a name listing.
    pub fn names(&self) -> Option<&[String]> {
        match self {
            Listing::Names(names) => Some(names),
            _ => None,
        }
    }

    /// Entry nodes, if this is an info listing.
    pub fn entries(&self) -> Option<&[FsNode]> {
        match self {
            Listing::Entries(entries) => Some(entries),
            _ => None,
        }
    }

    /// The nested map, if this is a recursive name listing.
    pub fn tree(&self) -> Option<&BTreeMap<String, TreeNode>> {
        match self {
            Listing::Tree(tree) => Some(tree),
            _ => None,
        }
    }
}
