//! Nodes: the tagged records a [`crate::roster::Roster`] is built from.

use crate::hash::{ContentHash, RevisionId};
use crate::ids::NodeId;
use crate::interner::intern_str;
use crate::path::PathComponent;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};

/// an interned attribute key (e.g. `"execute"`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrKey(&'static str);

impl AttrKey {
    pub fn intern(s: impl AsRef<str>) -> Self {
        Self(intern_str(s.as_ref()))
    }

    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl Debug for AttrKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// a `(live, value)` pair attached to a node under an attribute key.
///
/// `live=false` is the "cleared" state and always carries an empty value; this is the
/// two-state cell the spec's open question decided to keep (no third "undefined" state).
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct AttrCell {
    pub live: bool,
    pub value: Vec<u8>,
}

impl AttrCell {
    pub fn cleared() -> Self {
        Self { live: false, value: Vec::new() }
    }

    pub fn set(value: impl Into<Vec<u8>>) -> Self {
        Self { live: true, value: value.into() }
    }

    pub fn is_well_formed(&self) -> bool {
        self.live || self.value.is_empty()
    }
}

/// the type-specific payload of a node: a directory's children, or a file's content hash.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum NodeKind {
    Dir { children: BTreeMap<PathComponent, NodeId> },
    File { content: ContentHash },
}

impl NodeKind {
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Dir { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File { .. })
    }
}

/// a node in a roster. dynamic dispatch on type is avoided: `kind` is a plain tagged
/// variant, matched at the handful of call sites that care (attach, apply_delta,
/// scalar merge).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub name: Option<PathComponent>,
    pub attrs: BTreeMap<AttrKey, AttrCell>,
    pub birth_revision: RevisionId,
    pub kind: NodeKind,
}

impl Node {
    pub fn new_dir(id: NodeId, birth_revision: RevisionId) -> Self {
        Self {
            id,
            parent: None,
            name: None,
            attrs: BTreeMap::new(),
            birth_revision,
            kind: NodeKind::Dir { children: BTreeMap::new() },
        }
    }

    pub fn new_file(id: NodeId, content: ContentHash, birth_revision: RevisionId) -> Self {
        Self {
            id,
            parent: None,
            name: None,
            attrs: BTreeMap::new(),
            birth_revision,
            kind: NodeKind::File { content },
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn children(&self) -> Option<&BTreeMap<PathComponent, NodeId>> {
        match &self.kind {
            NodeKind::Dir { children } => Some(children),
            NodeKind::File { .. } => None,
        }
    }

    pub fn content(&self) -> Option<ContentHash> {
        match &self.kind {
            NodeKind::File { content } => Some(*content),
            NodeKind::Dir { .. } => None,
        }
    }
}

/// per-node provenance: which revisions "decided" each of its scalars.
///
/// sets are non-empty antichains in the revision DAG in the sense described by §4.4;
/// this type does not enforce the antichain property itself (see the open question
/// recorded in DESIGN.md: no antichain-reduction pass is run).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Marking {
    pub birth_revision: RevisionId,
    pub parent_name: std::collections::BTreeSet<RevisionId>,
    pub file_content: std::collections::BTreeSet<RevisionId>,
    pub attrs: BTreeMap<AttrKey, std::collections::BTreeSet<RevisionId>>,
}

impl Marking {
    pub fn new_dir(birth_revision: RevisionId) -> Self {
        Self {
            birth_revision,
            parent_name: std::iter::once(birth_revision).collect(),
            file_content: Default::default(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn new_file(birth_revision: RevisionId) -> Self {
        Self {
            birth_revision,
            parent_name: std::iter::once(birth_revision).collect(),
            file_content: std::iter::once(birth_revision).collect(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn is_well_formed(&self, is_dir: bool) -> bool {
        !self.parent_name.is_empty() && (is_dir == self.file_content.is_empty())
    }
}

pub type MarkingMap = BTreeMap<NodeId, Marking>;
