//! The roster: a node-id-keyed tree snapshot, and the editable-tree interface a
//! [`crate::cset::Changeset`] applies to.

use crate::error::{CoreError, Result};
use crate::hash::{ContentHash, RevisionId};
use crate::ids::{is_temp, IdSource, NodeId, NULL_NODE};
use crate::node::{AttrCell, AttrKey, MarkingMap, Node, NodeKind};
use crate::path::{PathComponent, SplitPath};
use crate::store::Limits;
use std::collections::BTreeMap;

/// the abstract mutation target a cset applies to (§4.1, §4.2). A [`Roster`]
/// implements it directly.
pub trait EditableTree {
    fn detach_node(&mut self, path: &SplitPath) -> Result<NodeId>;
    fn drop_detached_node(&mut self, nid: NodeId) -> Result<()>;
    fn create_dir_node(&mut self, ids: &mut dyn IdSource, birth_revision: RevisionId)
    -> Result<NodeId>;
    fn create_file_node(
        &mut self,
        ids: &mut dyn IdSource,
        content: ContentHash,
        birth_revision: RevisionId,
    ) -> Result<NodeId>;
    fn attach_node(&mut self, nid: NodeId, path: &SplitPath) -> Result<()>;
    fn apply_delta(&mut self, path: &SplitPath, old: ContentHash, new: ContentHash)
    -> Result<()>;
    fn clear_attr(&mut self, path: &SplitPath, key: AttrKey) -> Result<()>;
    fn set_attr(&mut self, path: &SplitPath, key: AttrKey, value: Vec<u8>) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
}

/// a (node id → node) mapping with at most one root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Roster {
    nodes: BTreeMap<NodeId, Node>,
    root: Option<NodeId>,
}

impl Roster {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_root(&self) -> bool {
        self.root.is_some()
    }

    pub fn root_id(&self) -> Option<NodeId> {
        self.root
    }

    pub fn has_node(&self, nid: NodeId) -> bool {
        self.nodes.contains_key(&nid)
    }

    pub fn get_node(&self, nid: NodeId) -> Option<&Node> {
        self.nodes.get(&nid)
    }

    pub(crate) fn get_node_mut(&mut self, nid: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&nid)
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    /// the raw node map, for callers (roster merge, roster delta) that need
    /// [`crate::parallel_iter::parallel_iter`] rather than a plain iterator.
    pub(crate) fn node_map(&self) -> &BTreeMap<NodeId, Node> {
        &self.nodes
    }

    /// the child of `parent` named `name`, if any.
    pub(crate) fn child_at(&self, parent: NodeId, name: PathComponent) -> Option<NodeId> {
        self.get_node(parent)?.children()?.get(&name).copied()
    }

    /// whether attaching `nid` under `parent` would make `nid` its own ancestor.
    /// `parent` need not be attached itself; walking stops as soon as a detached
    /// (parent-less) node is reached, same as `EditableTree::attach_node`'s check.
    pub(crate) fn would_make_loop(&self, nid: NodeId, parent: NodeId) -> bool {
        let mut cur = Some(parent);
        while let Some(p) = cur {
            if p == nid {
                return true;
            }
            cur = self.get_node(p).and_then(|n| n.parent);
        }
        false
    }

    /// structural attach bypassing the path-based lookup `EditableTree::attach_node`
    /// does: the caller (roster merge) already knows the resolved (parent, name) pair
    /// and has already checked for collisions/loops/orphaning itself.
    pub(crate) fn raw_attach(&mut self, nid: NodeId, parent: Option<NodeId>, name: Option<PathComponent>) {
        if let Some(node) = self.get_node_mut(nid) {
            node.parent = parent;
            node.name = name;
        }
        match (parent, name) {
            (None, None) => self.root = Some(nid),
            (Some(p), Some(n)) =>
                if let Some(NodeKind::Dir { children }) = self.get_node_mut(p).map(|n| &mut n.kind) {
                    children.insert(n, nid);
                },
            _ => bug!("parent and name must agree on root-ness"),
        }
    }

    /// structural detach by id, the counterpart to [`Roster::raw_attach`]; leaves the
    /// node present but parentless, same end state `EditableTree::detach_node` leaves.
    pub(crate) fn raw_detach(&mut self, nid: NodeId) {
        let (parent, name) = match self.get_node_mut(nid) {
            Some(node) => (node.parent.take(), node.name.take()),
            None => return,
        };
        if let (Some(p), Some(n)) = (parent, name) {
            if let Some(NodeKind::Dir { children }) = self.get_node_mut(p).map(|n| &mut n.kind) {
                children.remove(&n);
            }
        }
        if Some(nid) == self.root {
            self.root = None;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// whether `nid` is attached anywhere in the tree (the root, or reachable from it)
    fn is_attached(&self, nid: NodeId) -> bool {
        Some(nid) == self.root || self.get_node(nid).map_or(false, |n| n.parent.is_some())
    }

    pub fn lookup(&self, path: &SplitPath) -> Option<NodeId> {
        let mut cur = self.root?;
        for component in path.components() {
            let node = self.get_node(cur)?;
            let children = node.children()?;
            cur = *children.get(component)?;
        }
        Some(cur)
    }

    pub fn get_name(&self, nid: NodeId) -> Option<SplitPath> {
        if !self.has_node(nid) {
            return None;
        }
        let mut components = Vec::new();
        let mut cur = nid;
        while Some(cur) != self.root {
            let node = self.get_node(cur)?;
            components.push(node.name?);
            cur = node.parent?;
        }
        components.reverse();
        Some(SplitPath::from_components(components))
    }

    /// insert a brand new detached node (used directly by roster-delta/roster-merge
    /// construction, which sometimes need to insert a node whose id was decided
    /// elsewhere rather than allocated fresh via [`EditableTree::create_dir_node`]).
    pub fn insert_detached(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    pub fn remove(&mut self, nid: NodeId) -> Option<Node> {
        self.nodes.remove(&nid)
    }

    pub fn replace_node_id(&mut self, old: NodeId, new: NodeId) {
        if let Some(mut node) = self.nodes.remove(&old) {
            node.id = new;
            if let Some(parent) = node.parent {
                if let Some(p) = self.get_node_mut(parent) {
                    if let NodeKind::Dir { children } = &mut p.kind {
                        if let Some(name) = node.name {
                            children.insert(name, new);
                        }
                    }
                }
            }
            if Some(old) == self.root {
                self.root = Some(new);
            }
            for n in self.nodes.values_mut() {
                if let NodeKind::Dir { children } = &mut n.kind {
                    for child in children.values_mut() {
                        if *child == old {
                            *child = new;
                        }
                    }
                }
            }
            self.nodes.insert(new, node);
        }
    }

    /// unique root, parent/child consistency, bounded depth, attribute well-formedness,
    /// no null/temp ids (unless `allow_temp`). `limits` supplies the max-depth bound
    /// (§12) rather than a hardcoded constant, so a host crate can override it.
    pub fn sane(&self, allow_temp: bool, limits: &Limits) -> bool {
        for (&nid, node) in &self.nodes {
            if nid == NULL_NODE {
                return false;
            }
            if !allow_temp && is_temp(nid) {
                return false;
            }
            if (node.parent.is_none()) != (node.name.is_none()) {
                return false;
            }
            let is_root = Some(nid) == self.root;
            if node.parent.is_none() && !is_root {
                // detached node, not part of the committed tree: allowed mid-edit but
                // not in a committed roster. caller distinguishes via `is_attached`.
                continue;
            }
            if is_root && node.parent.is_some() {
                return false;
            }
            if !is_root {
                let parent = match self.get_node(node.parent.unwrap()) {
                    Some(p) => p,
                    None => return false,
                };
                let children = match parent.children() {
                    Some(c) => c,
                    None => return false,
                };
                if children.get(&node.name.unwrap()) != Some(&nid) {
                    return false;
                }
            }
            for cell in node.attrs.values() {
                if !cell.is_well_formed() {
                    return false;
                }
            }
            if self.depth_of(nid, limits) > limits.max_path_depth {
                return false;
            }
        }
        if let Some(root) = self.root {
            match self.get_node(root) {
                Some(n) if n.is_dir() && n.parent.is_none() => {}
                _ => return false,
            }
        }
        true
    }

    pub fn sane_against(&self, markings: &MarkingMap, limits: &Limits) -> bool {
        if !self.sane(false, limits) {
            return false;
        }
        let attached: Vec<NodeId> =
            self.nodes.keys().copied().filter(|&n| self.is_attached(n)).collect();
        if attached.len() != markings.len() {
            return false;
        }
        for nid in attached {
            let node = self.get_node(nid).unwrap();
            match markings.get(&nid) {
                Some(marking) if marking.is_well_formed(node.is_dir()) => {}
                _ => return false,
            }
        }
        true
    }

    fn depth_of(&self, mut nid: NodeId, limits: &Limits) -> usize {
        let mut depth = 0;
        while Some(nid) != self.root {
            match self.get_node(nid).and_then(|n| n.parent) {
                Some(p) => {
                    nid = p;
                    depth += 1;
                }
                None => break,
            }
            if depth > limits.max_path_depth + 1 {
                break;
            }
        }
        depth
    }
}

impl EditableTree for Roster {
    fn detach_node(&mut self, path: &SplitPath) -> Result<NodeId> {
        let nid = self.lookup(path).ok_or_else(|| CoreError::NoSuchPath(path.clone()))?;
        ensure!(Some(nid) != self.root, "cannot detach the root");
        {
            let node = self.get_node(nid).unwrap();
            if let Some(children) = node.children() {
                if !children.is_empty() {
                    return Err(CoreError::NotEmpty(path.clone()).into());
                }
            }
        }
        let node = self.get_node_mut(nid).unwrap();
        let (parent, name) = (node.parent.take(), node.name.take());
        if let (Some(parent), Some(name)) = (parent, name) {
            if let Some(p) = self.get_node_mut(parent) {
                if let NodeKind::Dir { children } = &mut p.kind {
                    children.remove(&name);
                }
            }
        }
        if Some(nid) == self.root {
            self.root = None;
        }
        trace!("detach_node({}) -> {}", path, nid);
        Ok(nid)
    }

    fn drop_detached_node(&mut self, nid: NodeId) -> Result<()> {
        let node = self.get_node(nid).ok_or_else(|| anyhow!("no such node `{}`", nid))?;
        ensure!(node.parent.is_none() && Some(nid) != self.root, "node `{}` is not detached", nid);
        self.nodes.remove(&nid);
        Ok(())
    }

    fn create_dir_node(
        &mut self,
        ids: &mut dyn IdSource,
        birth_revision: RevisionId,
    ) -> Result<NodeId> {
        let id = ids.next();
        self.nodes.insert(id, Node::new_dir(id, birth_revision));
        Ok(id)
    }

    fn create_file_node(
        &mut self,
        ids: &mut dyn IdSource,
        content: ContentHash,
        birth_revision: RevisionId,
    ) -> Result<NodeId> {
        let id = ids.next();
        self.nodes.insert(id, Node::new_file(id, content, birth_revision));
        Ok(id)
    }

    fn attach_node(&mut self, nid: NodeId, path: &SplitPath) -> Result<()> {
        if path.is_root() {
            ensure!(!self.has_root(), "roster already has a root");
            let node = self.get_node_mut(nid).ok_or_else(|| anyhow!("no such node `{}`", nid))?;
            ensure!(node.is_dir(), "root must be a directory");
            node.parent = None;
            node.name = None;
            self.root = Some(nid);
            return Ok(());
        }
        let parent_path = path.parent().unwrap();
        let name = path.name().unwrap();
        let parent_id =
            self.lookup(&parent_path).ok_or_else(|| CoreError::NoSuchPath(parent_path.clone()))?;
        {
            let parent = self
                .get_node(parent_id)
                .ok_or_else(|| CoreError::NoSuchPath(parent_path.clone()))?;
            let children =
                parent.children().ok_or_else(|| CoreError::NotAFile(parent_path.clone()))?;
            if children.contains_key(&name) {
                return Err(CoreError::PathExists(path.clone()).into());
            }
        }
        {
            let mut walk = Some(parent_id);
            while let Some(cur) = walk {
                if cur == nid {
                    return Err(CoreError::DirectoryLoop(path.clone()).into());
                }
                walk = self.get_node(cur).and_then(|n| n.parent);
            }
        }
        {
            let node = self.get_node_mut(nid).ok_or_else(|| anyhow!("no such node `{}`", nid))?;
            node.parent = Some(parent_id);
            node.name = Some(name);
        }
        if let NodeKind::Dir { children } = &mut self.get_node_mut(parent_id).unwrap().kind {
            children.insert(name, nid);
        }
        trace!("attach_node({}, {})", nid, path);
        Ok(())
    }

    fn apply_delta(&mut self, path: &SplitPath, old: ContentHash, new: ContentHash) -> Result<()> {
        let nid = self.lookup(path).ok_or_else(|| CoreError::NoSuchPath(path.clone()))?;
        let node = self.get_node_mut(nid).unwrap();
        match &mut node.kind {
            NodeKind::File { content } => {
                if *content != old {
                    return Err(CoreError::StaleDelta { path: path.clone() }.into());
                }
                *content = new;
                Ok(())
            }
            NodeKind::Dir { .. } => Err(CoreError::NotAFile(path.clone()).into()),
        }
    }

    fn clear_attr(&mut self, path: &SplitPath, key: AttrKey) -> Result<()> {
        let nid = self.lookup(path).ok_or_else(|| CoreError::NoSuchPath(path.clone()))?;
        let node = self.get_node_mut(nid).unwrap();
        match node.attrs.get(&key) {
            Some(cell) if cell.live => {}
            _ => bail!("clear_attr on absent or already-cleared attr `{:?}` on `{}`", key, path),
        }
        node.attrs.insert(key, AttrCell::cleared());
        Ok(())
    }

    fn set_attr(&mut self, path: &SplitPath, key: AttrKey, value: Vec<u8>) -> Result<()> {
        let nid = self.lookup(path).ok_or_else(|| CoreError::NoSuchPath(path.clone()))?;
        let node = self.get_node_mut(nid).unwrap();
        let new_cell = AttrCell::set(value);
        if node.attrs.get(&key) == Some(&new_cell) {
            bail!("no-op attr_set on `{}` `{:?}`", path, key);
        }
        node.attrs.insert(key, new_cell);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TrueIdSource;

    fn rev(n: u8) -> RevisionId {
        RevisionId::new([n; 20])
    }

    #[test]
    fn root_attach_and_lookup() {
        let mut roster = Roster::empty();
        let mut ids = TrueIdSource::default();
        let root = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(root, &SplitPath::root()).unwrap();
        assert_eq!(roster.root_id(), Some(root));
        assert_eq!(roster.lookup(&SplitPath::root()), Some(root));
    }

    #[test]
    fn file_under_root() {
        let mut roster = Roster::empty();
        let mut ids = TrueIdSource::default();
        let root = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(root, &SplitPath::root()).unwrap();
        let file = roster.create_file_node(&mut ids, ContentHash::UNKNOWN, rev(1)).unwrap();
        let path: SplitPath = "a".into();
        roster.attach_node(file, &path).unwrap();
        assert_eq!(roster.lookup(&path), Some(file));
        assert_eq!(roster.get_name(file), Some(path));
    }

    #[test]
    fn detach_nonempty_dir_fails() {
        let mut roster = Roster::empty();
        let mut ids = TrueIdSource::default();
        let root = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(root, &SplitPath::root()).unwrap();
        let dir = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(dir, &SplitPath::from("d")).unwrap();
        let file = roster.create_file_node(&mut ids, ContentHash::UNKNOWN, rev(1)).unwrap();
        roster.attach_node(file, &SplitPath::from("d/x")).unwrap();
        assert!(roster.detach_node(&SplitPath::from("d")).is_err());
    }

    #[test]
    fn attach_duplicate_name_fails() {
        let mut roster = Roster::empty();
        let mut ids = TrueIdSource::default();
        let root = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(root, &SplitPath::root()).unwrap();
        let a = roster.create_file_node(&mut ids, ContentHash::UNKNOWN, rev(1)).unwrap();
        roster.attach_node(a, &SplitPath::from("x")).unwrap();
        let b = roster.create_file_node(&mut ids, ContentHash::UNKNOWN, rev(1)).unwrap();
        assert!(roster.attach_node(b, &SplitPath::from("x")).is_err());
    }

    #[test]
    fn detach_root_fails() {
        let mut roster = Roster::empty();
        let mut ids = TrueIdSource::default();
        let root = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(root, &SplitPath::root()).unwrap();
        assert!(roster.detach_node(&SplitPath::root()).is_err());
    }

    #[test]
    fn attach_under_own_descendant_is_a_directory_loop() {
        let mut roster = Roster::empty();
        let mut ids = TrueIdSource::default();
        let root = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(root, &SplitPath::root()).unwrap();
        let d = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(d, &SplitPath::from("d")).unwrap();
        let nid = roster.detach_node(&SplitPath::from("d")).unwrap();
        assert!(roster.attach_node(nid, &SplitPath::from("d/under-itself")).is_err());
    }

    #[test]
    fn apply_delta_on_a_directory_fails() {
        let mut roster = Roster::empty();
        let mut ids = TrueIdSource::default();
        let root = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(root, &SplitPath::root()).unwrap();
        let d = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(d, &SplitPath::from("d")).unwrap();
        assert!(roster
            .apply_delta(&SplitPath::from("d"), ContentHash::UNKNOWN, ContentHash::UNKNOWN)
            .is_err());
    }

    #[test]
    fn no_op_attr_set_fails() {
        let mut roster = Roster::empty();
        let mut ids = TrueIdSource::default();
        let root = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(root, &SplitPath::root()).unwrap();
        let key = AttrKey::intern("execute");
        roster.set_attr(&SplitPath::root(), key, b"yes".to_vec()).unwrap();
        assert!(roster.set_attr(&SplitPath::root(), key, b"yes".to_vec()).is_err());
    }

    #[test]
    fn clear_nonexistent_attr_fails() {
        let mut roster = Roster::empty();
        let mut ids = TrueIdSource::default();
        let root = roster.create_dir_node(&mut ids, rev(1)).unwrap();
        roster.attach_node(root, &SplitPath::root()).unwrap();
        let key = AttrKey::intern("execute");
        assert!(roster.clear_attr(&SplitPath::root(), key).is_err());

        roster.set_attr(&SplitPath::root(), key, b"yes".to_vec()).unwrap();
        roster.clear_attr(&SplitPath::root(), key).unwrap();
        assert!(roster.clear_attr(&SplitPath::root(), key).is_err());
    }
}
