//! The conflict taxonomy roster merge (§4.4) populates: each variant names the node
//! id(s) involved and enough context (the contested `(parent, name)` pair, the two
//! competing values) to render a diagnostic, without carrying any rendering logic
//! itself — that belongs to whatever front end eventually prints these (out of scope
//! here, per §1).

use crate::hash::ContentHash;
use crate::ids::NodeId;
use crate::node::AttrKey;
use crate::path::PathComponent;

/// a node's resolved `(parent, name)` pair. `None` on both sides means "the root".
pub type ParentName = (Option<NodeId>, Option<PathComponent>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidNameConflict {
    pub nid: NodeId,
    pub parent_name: ParentName,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryLoopConflict {
    pub nid: NodeId,
    pub parent_name: ParentName,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrphanedNodeConflict {
    pub nid: NodeId,
    pub parent_name: ParentName,
}

/// the same node resolved to two incompatible `(parent, name)` choices; neither side's
/// marks dominate the other's, so roster merge can't pick one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipleNameConflict {
    pub nid: NodeId,
    pub left: ParentName,
    pub right: ParentName,
}

/// two different nodes independently resolved to the same `(parent, name)` slot. It is
/// a theorem of the design (§4.4 phase 3) that at most two nodes can ever contend for
/// one slot, so this is always exactly a pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateNameConflict {
    pub left_nid: NodeId,
    pub right_nid: NodeId,
    pub parent_name: ParentName,
}

/// `None` on a side means the attribute was cleared (`live=false`) on that side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeConflict {
    pub nid: NodeId,
    pub key: AttrKey,
    pub left: Option<Vec<u8>>,
    pub right: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileContentConflict {
    pub nid: NodeId,
    pub left: ContentHash,
    pub right: ContentHash,
}
