//! The changeset (cset) algebra: a normalized, ordered diff between two rosters, and
//! the algorithm that applies one to an [`crate::roster::EditableTree`] (§4.2).

use crate::error::Result;
use crate::hash::{ContentHash, RevisionId};
use crate::ids::{IdSource, NodeId};
use crate::node::{AttrKey, Marking, MarkingMap};
use crate::path::SplitPath;
use crate::roster::{EditableTree, Roster};
use crate::textio::{print_stanzas, Stanza, Token, Tokenizer};
use std::collections::{BTreeMap, BTreeSet};

/// a normalized, ordered record of differences between two rosters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Changeset {
    pub nodes_deleted: BTreeSet<SplitPath>,
    pub dirs_added: BTreeSet<SplitPath>,
    pub files_added: BTreeMap<SplitPath, ContentHash>,
    pub nodes_renamed: BTreeMap<SplitPath, SplitPath>,
    pub deltas_applied: BTreeMap<SplitPath, (ContentHash, ContentHash)>,
    pub attrs_cleared: BTreeSet<(SplitPath, AttrKey)>,
    pub attrs_set: BTreeMap<(SplitPath, AttrKey), Vec<u8>>,
}

impl Changeset {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes_deleted.is_empty()
            && self.dirs_added.is_empty()
            && self.files_added.is_empty()
            && self.nodes_renamed.is_empty()
            && self.deltas_applied.is_empty()
            && self.attrs_cleared.is_empty()
            && self.attrs_set.is_empty()
    }

    fn added_paths(&self) -> impl Iterator<Item = &SplitPath> {
        self.dirs_added.iter().chain(self.files_added.keys())
    }

    /// checks the invariants listed in §3's Changeset entry and §4.2's normalization
    /// clause. Does not attempt the apply itself; a cset can fail `check_normalized`
    /// for reasons unrelated to any particular target tree (e.g. a no-op delta).
    pub fn check_normalized(&self) -> Result<()> {
        for path in &self.nodes_deleted {
            ensure!(!path.is_root(), "cannot delete the root");
        }
        for path in self.dirs_added.iter() {
            ensure!(!self.files_added.contains_key(path), "`{}` is added twice", path);
        }
        for path in self.added_paths() {
            ensure!(
                !self.deltas_applied.contains_key(path),
                "path `{}` is both added and delta'd",
                path
            );
        }
        for (path, key) in &self.attrs_cleared {
            ensure!(
                !self.attrs_set.contains_key(&(path.clone(), *key)),
                "attr `{:?}` on `{}` is both cleared and set",
                key,
                path
            );
        }
        for (src, dst) in &self.nodes_renamed {
            ensure!(src != dst, "rename of `{}` to itself", src);
            ensure!(!dst.is_root(), "cannot rename onto the root");
            ensure!(!src.is_root(), "cannot rename the root");
        }
        for src in self.nodes_renamed.keys() {
            ensure!(!self.nodes_deleted.contains(src), "`{}` is both deleted and renamed", src);
        }
        for path in self.added_paths() {
            ensure!(
                !self.nodes_renamed.contains_key(path),
                "`{}` is both added and renamed",
                path
            );
        }
        for (old, new) in self.deltas_applied.values() {
            ensure!(old != new, "no-op delta recorded");
        }
        let mut dsts: BTreeSet<&SplitPath> = BTreeSet::new();
        for dst in self.nodes_renamed.values() {
            ensure!(dsts.insert(dst), "two renames target the same path `{}`", dst);
        }
        Ok(())
    }

    /// applies `self` to `tree` following the eight-step algorithm of §4.2: schedule
    /// detaches (decreasing path length), schedule attaches (increasing path length),
    /// execute detaches, execute adds and rename reattachments in the single merged
    /// increasing-length order, execute drops, execute content/attr mutations, commit.
    pub fn apply_to(
        &self,
        tree: &mut impl EditableTree,
        ids: &mut dyn IdSource,
        revision: RevisionId,
    ) -> Result<()> {
        self.check_normalized()?;
        trace!(
            "Changeset::apply_to (deletes: {}, adds: {}, renames: {})",
            self.nodes_deleted.len(),
            self.dirs_added.len() + self.files_added.len(),
            self.nodes_renamed.len()
        );

        // step 1: schedule detaches, decreasing path length (leaves before ancestors)
        let mut detaches: Vec<&SplitPath> =
            self.nodes_deleted.iter().chain(self.nodes_renamed.keys()).collect();
        detaches.sort_by_key(|p| std::cmp::Reverse(p.depth()));

        // step 3: execute detaches
        let mut renamed_ids: BTreeMap<&SplitPath, NodeId> = BTreeMap::new();
        let mut to_drop: Vec<NodeId> = Vec::new();
        for path in detaches {
            let nid = tree.detach_node(path)?;
            if self.nodes_deleted.contains(path) {
                to_drop.push(nid);
            } else {
                renamed_ids.insert(path, nid);
            }
        }

        // step 2 (attaches, merged add+rename order) and step 4/5 (execute them)
        enum Attach<'a> {
            AddDir(&'a SplitPath),
            AddFile(&'a SplitPath, ContentHash),
            Rename(&'a SplitPath),
        }
        let mut attaches: Vec<(&SplitPath, Attach<'_>)> = Vec::new();
        for path in &self.dirs_added {
            attaches.push((path, Attach::AddDir(path)));
        }
        for (path, content) in &self.files_added {
            attaches.push((path, Attach::AddFile(path, *content)));
        }
        for dst in self.nodes_renamed.values() {
            attaches.push((dst, Attach::Rename(dst)));
        }
        attaches.sort_by_key(|(path, _)| path.depth());

        for (target, action) in attaches {
            match action {
                Attach::AddDir(_) => {
                    let nid = tree.create_dir_node(ids, revision)?;
                    tree.attach_node(nid, target)?;
                }
                Attach::AddFile(_, content) => {
                    let nid = tree.create_file_node(ids, content, revision)?;
                    tree.attach_node(nid, target)?;
                }
                Attach::Rename(dst) => {
                    let src = self
                        .nodes_renamed
                        .iter()
                        .find(|(_, d)| *d == dst)
                        .map(|(s, _)| s)
                        .expect("rename target scheduled without a matching source");
                    let nid =
                        *renamed_ids.get(src).expect("rename source was not detached earlier");
                    tree.attach_node(nid, target)?;
                }
            }
        }

        // step 6: execute drops
        for nid in to_drop {
            tree.drop_detached_node(nid)?;
        }

        // step 7: content deltas, then attr clears, then attr sets
        for (path, (old, new)) in &self.deltas_applied {
            tree.apply_delta(path, *old, *new)?;
        }
        for (path, key) in &self.attrs_cleared {
            tree.clear_attr(path, *key)?;
        }
        for ((path, key), value) in &self.attrs_set {
            tree.set_attr(path, *key, value.clone())?;
        }

        // step 8
        tree.commit()
    }

    /// updates a marking map for a single-parent commit (§3 Lifecycle): every scalar
    /// this cset actually touches is now "decided" by `new_revision` alone (no merge,
    /// so no union with anything); everything else carries its old marking forward
    /// unchanged. `old_tree` resolves deleted/renamed source paths to node ids (already
    /// detached in `new_tree`, so they can't be looked up there); `new_tree` resolves
    /// added/renamed/edited paths to node ids. Call after a successful `apply_to` using
    /// the same cset against the pair of trees it was applied between.
    pub fn commit_markings(
        &self,
        old_tree: &Roster,
        old_markings: &MarkingMap,
        new_tree: &Roster,
        new_revision: RevisionId,
    ) -> Result<MarkingMap> {
        let mut markings = old_markings.clone();

        for path in &self.nodes_deleted {
            let nid = old_tree.lookup(path).ok_or_else(|| anyhow!("no such path `{}`", path))?;
            markings.remove(&nid);
        }
        for src in self.nodes_renamed.keys() {
            let nid = old_tree.lookup(src).ok_or_else(|| anyhow!("no such path `{}`", src))?;
            let marking = markings
                .get_mut(&nid)
                .ok_or_else(|| anyhow!("no marking recorded for node `{}`", nid))?;
            marking.parent_name = std::iter::once(new_revision).collect();
        }
        for path in &self.dirs_added {
            let nid = new_tree.lookup(path).ok_or_else(|| anyhow!("no such path `{}`", path))?;
            markings.insert(nid, Marking::new_dir(new_revision));
        }
        for path in self.files_added.keys() {
            let nid = new_tree.lookup(path).ok_or_else(|| anyhow!("no such path `{}`", path))?;
            markings.insert(nid, Marking::new_file(new_revision));
        }
        for path in self.deltas_applied.keys() {
            let nid = new_tree.lookup(path).ok_or_else(|| anyhow!("no such path `{}`", path))?;
            let marking = markings
                .get_mut(&nid)
                .ok_or_else(|| anyhow!("no marking recorded for node `{}`", nid))?;
            marking.file_content = std::iter::once(new_revision).collect();
        }
        for (path, key) in self.attrs_cleared.iter().chain(self.attrs_set.keys()) {
            let nid = new_tree.lookup(path).ok_or_else(|| anyhow!("no such path `{}`", path))?;
            let marking = markings
                .get_mut(&nid)
                .ok_or_else(|| anyhow!("no marking recorded for node `{}`", nid))?;
            marking.attrs.insert(*key, std::iter::once(new_revision).collect());
        }
        Ok(markings)
    }

    pub fn print(&self) -> Vec<u8> {
        let mut stanzas = Vec::new();
        for path in &self.nodes_deleted {
            let mut s = Stanza::new();
            s.push_str("delete", path.to_string().as_bytes());
            stanzas.push(s);
        }
        for (src, dst) in &self.nodes_renamed {
            let mut s = Stanza::new();
            s.push_str("rename", src.to_string().as_bytes());
            s.push_str("to", dst.to_string().as_bytes());
            stanzas.push(s);
        }
        for path in &self.dirs_added {
            let mut s = Stanza::new();
            s.push_str("add_dir", path.to_string().as_bytes());
            stanzas.push(s);
        }
        for (path, content) in &self.files_added {
            let mut s = Stanza::new();
            s.push_str("add_file", path.to_string().as_bytes());
            s.push_hex("content", content.as_bytes());
            stanzas.push(s);
        }
        for (path, (from, to)) in &self.deltas_applied {
            let mut s = Stanza::new();
            s.push_str("patch", path.to_string().as_bytes());
            s.push_hex("from", from.as_bytes());
            s.push_hex("to", to.as_bytes());
            stanzas.push(s);
        }
        for (path, key) in &self.attrs_cleared {
            let mut s = Stanza::new();
            s.push_str("clear", path.to_string().as_bytes());
            s.push_str("attr", key.as_str().as_bytes());
            stanzas.push(s);
        }
        for ((path, key), value) in &self.attrs_set {
            let mut s = Stanza::new();
            s.push_str("set", path.to_string().as_bytes());
            s.push_str("attr", key.as_str().as_bytes());
            s.push_str("value", value);
            stanzas.push(s);
        }
        print_stanzas(&stanzas)
    }

    /// parses the textual format printed by [`Changeset::print`]. Verifies strict
    /// ascending order within each stanza class and rejects duplicates, per §6.
    pub fn parse(input: &[u8]) -> Result<Self> {
        let mut cset = Self::empty();
        let mut tok = Tokenizer::new(input);
        let mut last_delete: Option<SplitPath> = None;
        let mut last_rename: Option<SplitPath> = None;
        let mut last_add_dir: Option<SplitPath> = None;
        let mut last_add_file: Option<SplitPath> = None;
        let mut last_patch: Option<SplitPath> = None;
        let mut last_clear: Option<(SplitPath, AttrKey)> = None;
        let mut last_set: Option<(SplitPath, AttrKey)> = None;

        loop {
            let key = match tok.next_token()? {
                Token::None => break,
                Token::Symbol(s) => s,
                _ => bail!("expected a stanza keyword"),
            };
            let path: SplitPath = expect_string_path(&mut tok)?;
            match key.as_str() {
                "delete" => {
                    check_ascending(&last_delete, &path)?;
                    cset.nodes_deleted.insert(path.clone());
                    last_delete = Some(path);
                }
                "rename" => {
                    check_ascending(&last_rename, &path)?;
                    expect_symbol(&mut tok, "to")?;
                    let dst = expect_string_path(&mut tok)?;
                    cset.nodes_renamed.insert(path.clone(), dst);
                    last_rename = Some(path);
                }
                "add_dir" => {
                    check_ascending(&last_add_dir, &path)?;
                    cset.dirs_added.insert(path.clone());
                    last_add_dir = Some(path);
                }
                "add_file" => {
                    check_ascending(&last_add_file, &path)?;
                    expect_symbol(&mut tok, "content")?;
                    let content = expect_hex_hash(&mut tok)?;
                    cset.files_added.insert(path.clone(), content);
                    last_add_file = Some(path);
                }
                "patch" => {
                    check_ascending(&last_patch, &path)?;
                    expect_symbol(&mut tok, "from")?;
                    let from = expect_hex_hash(&mut tok)?;
                    expect_symbol(&mut tok, "to")?;
                    let to = expect_hex_hash(&mut tok)?;
                    cset.deltas_applied.insert(path.clone(), (from, to));
                    last_patch = Some(path);
                }
                "clear" => {
                    expect_symbol(&mut tok, "attr")?;
                    let attr = expect_string_attr(&mut tok)?;
                    check_ascending_attr(&last_clear, &path, attr)?;
                    cset.attrs_cleared.insert((path.clone(), attr));
                    last_clear = Some((path, attr));
                }
                "set" => {
                    expect_symbol(&mut tok, "attr")?;
                    let attr = expect_string_attr(&mut tok)?;
                    check_ascending_attr(&last_set, &path, attr)?;
                    expect_symbol(&mut tok, "value")?;
                    let value = expect_string(&mut tok)?;
                    cset.attrs_set.insert((path.clone(), attr), value);
                    last_set = Some((path, attr));
                }
                other => bail!("unknown stanza keyword `{}`", other),
            }
        }
        cset.check_normalized()?;
        Ok(cset)
    }
}

fn expect_symbol(tok: &mut Tokenizer<'_>, expected: &'static str) -> Result<()> {
    match tok.next_token()? {
        Token::Symbol(s) if s == expected => Ok(()),
        _ => bail!("expected symbol `{}` at byte {}", expected, tok.pos()),
    }
}

fn expect_string(tok: &mut Tokenizer<'_>) -> Result<Vec<u8>> {
    match tok.next_token()? {
        Token::String(s) => Ok(s),
        _ => bail!("expected a string token at byte {}", tok.pos()),
    }
}

fn expect_string_path(tok: &mut Tokenizer<'_>) -> Result<SplitPath> {
    let bytes = expect_string(tok)?;
    let s = String::from_utf8(bytes).map_err(|_| anyhow!("path must be valid utf8"))?;
    Ok(SplitPath::from(s.as_str()))
}

fn expect_string_attr(tok: &mut Tokenizer<'_>) -> Result<AttrKey> {
    let bytes = expect_string(tok)?;
    let s = String::from_utf8(bytes).map_err(|_| anyhow!("attr key must be valid utf8"))?;
    Ok(AttrKey::intern(s))
}

fn expect_hex_hash(tok: &mut Tokenizer<'_>) -> Result<ContentHash> {
    match tok.next_token()? {
        Token::Hex(bytes) if bytes.len() == crate::hash::DIGEST_SIZE => {
            let mut buf = [0u8; crate::hash::DIGEST_SIZE];
            buf.copy_from_slice(&bytes);
            Ok(ContentHash::new(buf))
        }
        _ => bail!("expected a {}-byte hex token at byte {}", crate::hash::DIGEST_SIZE, tok.pos()),
    }
}

fn check_ascending(last: &Option<SplitPath>, current: &SplitPath) -> Result<()> {
    if let Some(prev) = last {
        ensure!(prev < current, "stanzas out of order: `{}` after `{}`", current, prev);
    }
    Ok(())
}

fn check_ascending_attr(
    last: &Option<(SplitPath, AttrKey)>,
    path: &SplitPath,
    attr: AttrKey,
) -> Result<()> {
    if let Some((prev_path, prev_attr)) = last {
        let prev = (prev_path.clone(), *prev_attr);
        ensure!(
            prev < (path.clone(), attr),
            "stanzas out of order: `{}`/`{:?}` after `{}`/`{:?}`",
            path,
            attr,
            prev_path,
            prev_attr
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TrueIdSource;
    use crate::roster::Roster;

    fn rev(n: u8) -> RevisionId {
        RevisionId::new([n; 20])
    }

    fn root_roster() -> (Roster, TrueIdSource) {
        let mut roster = Roster::empty();
        let mut ids = TrueIdSource::default();
        let root = roster.create_dir_node(&mut ids, rev(0)).unwrap();
        roster.attach_node(root, &SplitPath::root()).unwrap();
        (roster, ids)
    }

    #[test]
    fn add_file_then_delete_round_trip() {
        let (mut roster, mut ids) = root_roster();
        let mut cset = Changeset::empty();
        cset.files_added.insert("a".into(), ContentHash::UNKNOWN);
        cset.apply_to(&mut roster, &mut ids, rev(1)).unwrap();
        assert!(roster.lookup(&"a".into()).is_some());

        let mut cset2 = Changeset::empty();
        cset2.nodes_deleted.insert("a".into());
        cset2.apply_to(&mut roster, &mut ids, rev(2)).unwrap();
        assert!(roster.lookup(&"a".into()).is_none());
    }

    #[test]
    fn rename_directory_with_children_in_one_cset() {
        let (mut roster, mut ids) = root_roster();
        let mut add = Changeset::empty();
        add.dirs_added.insert("d".into());
        add.files_added.insert("d/x".into(), ContentHash::UNKNOWN);
        add.apply_to(&mut roster, &mut ids, rev(1)).unwrap();

        let mut rename = Changeset::empty();
        rename.nodes_renamed.insert("d".into(), "e".into());
        rename.apply_to(&mut roster, &mut ids, rev(2)).unwrap();
        assert!(roster.lookup(&"e".into()).is_some());
        assert!(roster.lookup(&"e/x".into()).is_some());
    }

    #[test]
    fn double_delete_not_normalized() {
        let mut cset = Changeset::empty();
        cset.nodes_deleted.insert("a".into());
        cset.nodes_renamed.insert("a".into(), "b".into());
        assert!(cset.check_normalized().is_err());
    }

    #[test]
    fn rename_to_self_not_normalized() {
        let mut cset = Changeset::empty();
        cset.nodes_renamed.insert("a".into(), "a".into());
        assert!(cset.check_normalized().is_err());
    }

    #[test]
    fn add_then_delta_not_normalized() {
        let mut cset = Changeset::empty();
        cset.files_added.insert("a".into(), ContentHash::UNKNOWN);
        cset.deltas_applied.insert("a".into(), (ContentHash::UNKNOWN, rev(1)));
        assert!(cset.check_normalized().is_err());
    }

    #[test]
    fn no_op_delta_not_normalized() {
        let mut cset = Changeset::empty();
        cset.deltas_applied.insert("a".into(), (rev(1), rev(1)));
        assert!(cset.check_normalized().is_err());
    }

    #[test]
    fn delete_root_not_normalized() {
        let mut cset = Changeset::empty();
        cset.nodes_deleted.insert(SplitPath::root());
        assert!(cset.check_normalized().is_err());
    }

    #[test]
    fn double_add_not_normalized() {
        let mut cset = Changeset::empty();
        cset.dirs_added.insert("a".into());
        cset.files_added.insert("a".into(), ContentHash::UNKNOWN);
        assert!(cset.check_normalized().is_err());
    }

    #[test]
    fn print_then_parse_round_trips() {
        let mut cset = Changeset::empty();
        cset.nodes_deleted.insert("a".into());
        cset.dirs_added.insert("b".into());
        cset.files_added.insert("c".into(), rev(7));
        let printed = cset.print();
        let parsed = Changeset::parse(&printed).unwrap();
        assert_eq!(cset, parsed);
    }

    #[test]
    fn commit_markings_sets_new_revision_for_touched_nodes_only() {
        let (mut old_roster, mut ids) = root_roster();
        let mut add = Changeset::empty();
        add.dirs_added.insert("d".into());
        add.files_added.insert("d/x".into(), ContentHash::UNKNOWN);
        add.files_added.insert("untouched".into(), ContentHash::UNKNOWN);
        add.apply_to(&mut old_roster, &mut ids, rev(1)).unwrap();
        let old_markings = add.commit_markings(
            &Roster::empty(),
            &MarkingMap::new(),
            &old_roster,
            rev(1),
        ).unwrap();

        let untouched_id = old_roster.lookup(&"untouched".into()).unwrap();
        let untouched_marking_before = old_markings.get(&untouched_id).cloned().unwrap();

        let mut new_roster = old_roster.clone();
        let mut cset = Changeset::empty();
        cset.deltas_applied.insert("d/x".into(), (ContentHash::UNKNOWN, rev(7)));
        cset.apply_to(&mut new_roster, &mut ids, rev(2)).unwrap();
        let new_markings =
            cset.commit_markings(&old_roster, &old_markings, &new_roster, rev(2)).unwrap();

        let x_id = new_roster.lookup(&"d/x".into()).unwrap();
        assert_eq!(new_markings[&x_id].file_content, std::iter::once(rev(2)).collect());

        let untouched_marking_after = &new_markings[&untouched_id];
        assert_eq!(untouched_marking_after, &untouched_marking_before);
    }
}
