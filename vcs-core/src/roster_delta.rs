//! Roster deltas (§4.6): a textual patch between two `(roster, markings)` pairs,
//! expressed directly over node ids rather than paths.
//!
//! Grounded on `original_source/roster_delta.cc`: the same seven-bucket diff
//! (`nodes_deleted`/`dirs_added`/`files_added`/`nodes_renamed`/`deltas_applied`/
//! `attrs_cleared`/`attrs_changed`) plus a `markings_changed` map that carries every
//! marking that is new or different (a deleted node's marking is implied, not stored).
//! `make_roster_delta` walks both node maps and both marking maps in parallel exactly as
//! `make_roster_delta_t`/its inner helpers do; `RosterDelta::apply` mirrors
//! `roster_delta_t::apply`'s five-phase order (detach, drop, create, attach, edit).

use crate::conflict::ParentName;
use crate::error::Result;
use crate::hash::{ContentHash, RevisionId};
use crate::ids::NodeId;
use crate::node::{AttrCell, AttrKey, Marking, MarkingMap, Node, NodeKind};
use crate::parallel_iter::{parallel_iter, Side};
use crate::path::PathComponent;
use crate::roster::Roster;
use crate::textio::{print_stanzas, Stanza, Token, Tokenizer};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RosterDelta {
    pub nodes_deleted: BTreeSet<NodeId>,
    pub dirs_added: BTreeMap<NodeId, ParentName>,
    pub files_added: BTreeMap<NodeId, (ParentName, ContentHash)>,
    pub nodes_renamed: BTreeMap<NodeId, ParentName>,
    pub deltas_applied: BTreeMap<NodeId, ContentHash>,
    pub attrs_cleared: BTreeSet<(NodeId, AttrKey)>,
    pub attrs_changed: BTreeMap<(NodeId, AttrKey), AttrCell>,
    pub markings_changed: MarkingMap,
}

impl RosterDelta {
    pub fn is_empty(&self) -> bool {
        self.nodes_deleted.is_empty()
            && self.dirs_added.is_empty()
            && self.files_added.is_empty()
            && self.nodes_renamed.is_empty()
            && self.deltas_applied.is_empty()
            && self.attrs_cleared.is_empty()
            && self.attrs_changed.is_empty()
            && self.markings_changed.is_empty()
    }

    /// applies this delta in place. Mirrors the original's five phases: detach
    /// everything that moves or dies, drop the dead, create the new, reattach
    /// everything at its destination, then patch content/attrs/markings.
    pub fn apply(&self, roster: &mut Roster, markings: &mut MarkingMap) -> Result<()> {
        for &nid in self.nodes_deleted.iter().chain(self.nodes_renamed.keys()) {
            roster.raw_detach(nid);
        }
        for &nid in &self.nodes_deleted {
            roster.remove(nid);
        }

        for (&nid, _) in &self.dirs_added {
            let birth = self.birth_revision_of(nid)?;
            roster.insert_detached(Node::new_dir(nid, birth));
        }
        for (&nid, (_, content)) in &self.files_added {
            let birth = self.birth_revision_of(nid)?;
            roster.insert_detached(Node::new_file(nid, *content, birth));
        }

        for (&nid, &(parent, name)) in &self.dirs_added {
            roster.raw_attach(nid, parent, name);
        }
        for (&nid, &((parent, name), _)) in &self.files_added {
            roster.raw_attach(nid, parent, name);
        }
        for (&nid, &(parent, name)) in &self.nodes_renamed {
            roster.raw_attach(nid, parent, name);
        }

        for (&nid, &content) in &self.deltas_applied {
            if let Some(node) = roster.get_node_mut(nid) {
                if let NodeKind::File { content: c } = &mut node.kind {
                    *c = content;
                }
            }
        }
        for &(nid, key) in &self.attrs_cleared {
            if let Some(node) = roster.get_node_mut(nid) {
                node.attrs.insert(key, AttrCell::cleared());
            }
        }
        for (&(nid, key), cell) in &self.attrs_changed {
            if let Some(node) = roster.get_node_mut(nid) {
                node.attrs.insert(key, cell.clone());
            }
        }

        for nid in &self.nodes_deleted {
            markings.remove(nid);
        }
        for (&nid, m) in &self.markings_changed {
            markings.insert(nid, m.clone());
        }
        Ok(())
    }

    fn birth_revision_of(&self, nid: NodeId) -> Result<crate::hash::RevisionId> {
        self.markings_changed
            .get(&nid)
            .map(|m| m.birth_revision)
            .ok_or_else(|| anyhow!("roster delta: no marking recorded for newly added node `{}`", nid))
    }

    pub fn print(&self) -> Vec<u8> {
        let mut stanzas = Vec::new();
        for &nid in &self.nodes_deleted {
            let mut st = Stanza::new();
            push_nid(&mut st, "deleted", nid);
            stanzas.push(st);
        }
        for (&nid, &loc) in &self.nodes_renamed {
            let mut st = Stanza::new();
            push_nid(&mut st, "rename", nid);
            push_loc(&mut st, loc);
            stanzas.push(st);
        }
        for (&nid, &loc) in &self.dirs_added {
            let mut st = Stanza::new();
            push_nid(&mut st, "add_dir", nid);
            push_loc(&mut st, loc);
            stanzas.push(st);
        }
        for (&nid, &(loc, content)) in &self.files_added {
            let mut st = Stanza::new();
            push_nid(&mut st, "add_file", nid);
            push_loc(&mut st, loc);
            st.push_hex("content", content.as_bytes());
            stanzas.push(st);
        }
        for (&nid, &content) in &self.deltas_applied {
            let mut st = Stanza::new();
            push_nid(&mut st, "delta", nid);
            st.push_hex("content", content.as_bytes());
            stanzas.push(st);
        }
        for &(nid, key) in &self.attrs_cleared {
            let mut st = Stanza::new();
            push_nid(&mut st, "attr_cleared", nid);
            st.push_str("attr", key.as_str().as_bytes());
            stanzas.push(st);
        }
        for (&(nid, key), cell) in &self.attrs_changed {
            let mut st = Stanza::new();
            push_nid(&mut st, "attr_changed", nid);
            st.push_str("attr", key.as_str().as_bytes());
            st.push_symbol("live", cell.live);
            st.push_str("value", &cell.value);
            stanzas.push(st);
        }
        for (&nid, m) in &self.markings_changed {
            let mut st = Stanza::new();
            push_nid(&mut st, "marking", nid);
            st.push_hex("birth", m.birth_revision.as_bytes());
            for r in &m.parent_name {
                st.push_hex("parent_name", r.as_bytes());
            }
            for r in &m.file_content {
                st.push_hex("file_content", r.as_bytes());
            }
            for (&key, marks) in &m.attrs {
                for r in marks {
                    st.push_str("attr_mark_key", key.as_str().as_bytes());
                    st.push_hex("attr_mark", r.as_bytes());
                }
            }
            stanzas.push(st);
        }
        print_stanzas(&stanzas)
    }

    /// parses the textual format printed by [`RosterDelta::print`]. Each stanza class
    /// must appear with strictly ascending node ids (ties broken by attr key where
    /// applicable), mirroring the ordering `cset`'s parser enforces for the same reason:
    /// it's what a `BTreeMap`/`BTreeSet`-driven printer always produces, and checking it
    /// catches a corrupted or hand-edited delta early.
    pub fn parse(input: &[u8]) -> Result<Self> {
        let mut d = Self::default();
        let mut tok = Tokenizer::new(input);
        let mut last: BTreeMap<&'static str, NodeId> = BTreeMap::new();
        let mut last_attr: BTreeMap<&'static str, (NodeId, AttrKey)> = BTreeMap::new();

        loop {
            let key = match tok.next_token()? {
                Token::None => break,
                Token::Symbol(s) => s,
                _ => bail!("expected a stanza keyword"),
            };
            let nid = expect_nid(&mut tok)?;
            match key.as_str() {
                "deleted" => {
                    check_ascending_nid(&mut last, "deleted", nid)?;
                    d.nodes_deleted.insert(nid);
                }
                "rename" => {
                    check_ascending_nid(&mut last, "rename", nid)?;
                    d.nodes_renamed.insert(nid, expect_loc(&mut tok)?);
                }
                "add_dir" => {
                    check_ascending_nid(&mut last, "add_dir", nid)?;
                    d.dirs_added.insert(nid, expect_loc(&mut tok)?);
                }
                "add_file" => {
                    check_ascending_nid(&mut last, "add_file", nid)?;
                    let loc = expect_loc(&mut tok)?;
                    expect_symbol(&mut tok, "content")?;
                    let content = expect_hex_hash(&mut tok)?;
                    d.files_added.insert(nid, (loc, content));
                }
                "delta" => {
                    check_ascending_nid(&mut last, "delta", nid)?;
                    expect_symbol(&mut tok, "content")?;
                    d.deltas_applied.insert(nid, expect_hex_hash(&mut tok)?);
                }
                "attr_cleared" => {
                    expect_symbol(&mut tok, "attr")?;
                    let attr = expect_string_attr(&mut tok)?;
                    check_ascending_attr(&mut last_attr, "attr_cleared", nid, attr)?;
                    d.attrs_cleared.insert((nid, attr));
                }
                "attr_changed" => {
                    expect_symbol(&mut tok, "attr")?;
                    let attr = expect_string_attr(&mut tok)?;
                    check_ascending_attr(&mut last_attr, "attr_changed", nid, attr)?;
                    expect_symbol(&mut tok, "live")?;
                    let live = expect_bool(&mut tok)?;
                    expect_symbol(&mut tok, "value")?;
                    let value = expect_string(&mut tok)?;
                    d.attrs_changed.insert((nid, attr), AttrCell { live, value });
                }
                "marking" => {
                    check_ascending_nid(&mut last, "marking", nid)?;
                    d.markings_changed.insert(nid, expect_marking(&mut tok)?);
                }
                other => bail!("unknown stanza keyword `{}`", other),
            }
        }
        Ok(d)
    }
}

fn push_nid(st: &mut Stanza, key: &'static str, nid: NodeId) {
    st.push_str(key, nid.to_string().as_bytes());
}

fn push_loc(st: &mut Stanza, loc: ParentName) {
    let parent_str = loc.0.map(|p| p.to_string()).unwrap_or_default();
    st.push_str("location_parent", parent_str.as_bytes());
    let name_str = loc.1.map(|n| n.to_string()).unwrap_or_default();
    st.push_str("location_name", name_str.as_bytes());
}

/// the only-in-`to` case: the node is brand new, so it's recorded with its full
/// location and (for files) content, plus every attr it carries (there's nothing to
/// diff against).
fn delta_for_node_only_in_dest(new_n: &Node, d: &mut RosterDelta) {
    let loc: ParentName = (new_n.parent, new_n.name);
    match &new_n.kind {
        NodeKind::Dir { .. } => {
            d.dirs_added.insert(new_n.id, loc);
        }
        NodeKind::File { content } => {
            d.files_added.insert(new_n.id, (loc, *content));
        }
    }
    for (&key, cell) in &new_n.attrs {
        d.attrs_changed.insert((new_n.id, key), cell.clone());
    }
}

/// the in-both case: only the fields that actually differ are recorded.
fn delta_for_node_in_both(old_n: &Node, new_n: &Node, d: &mut RosterDelta) {
    debug_assert_eq!(old_n.id, new_n.id);
    let nid = old_n.id;
    let old_loc: ParentName = (old_n.parent, old_n.name);
    let new_loc: ParentName = (new_n.parent, new_n.name);
    if old_loc != new_loc {
        d.nodes_renamed.insert(nid, new_loc);
    }
    if let (NodeKind::File { content: old_c }, NodeKind::File { content: new_c }) =
        (&old_n.kind, &new_n.kind)
    {
        if old_c != new_c {
            d.deltas_applied.insert(nid, *new_c);
        }
    }
    for (&key, side) in parallel_iter(&old_n.attrs, &new_n.attrs) {
        match side {
            Side::Left(_) => {
                d.attrs_cleared.insert((nid, key));
            }
            Side::Right(cell) => {
                d.attrs_changed.insert((nid, key), cell.clone());
            }
            Side::Both(old_cell, new_cell) =>
                if old_cell != new_cell {
                    d.attrs_changed.insert((nid, key), new_cell.clone());
                },
        }
    }
}

pub fn make_roster_delta(
    from: &Roster,
    from_markings: &MarkingMap,
    to: &Roster,
    to_markings: &MarkingMap,
) -> RosterDelta {
    trace!("make_roster_delta: {} nodes -> {} nodes", from.len(), to.len());
    let mut d = RosterDelta::default();
    for (&nid, side) in parallel_iter(from.node_map(), to.node_map()) {
        match side {
            Side::Left(_) => {
                d.nodes_deleted.insert(nid);
            }
            Side::Right(new_n) => delta_for_node_only_in_dest(new_n, &mut d),
            Side::Both(old_n, new_n) => delta_for_node_in_both(old_n, new_n, &mut d),
        }
    }
    for (&nid, side) in parallel_iter(from_markings, to_markings) {
        match side {
            Side::Left(_) => {}
            Side::Right(m) => {
                d.markings_changed.insert(nid, m.clone());
            }
            Side::Both(old_m, new_m) =>
                if old_m != new_m {
                    d.markings_changed.insert(nid, new_m.clone());
                },
        }
    }
    d
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

fn expect_nid(tok: &mut Tokenizer<'_>) -> Result<NodeId> {
    let bytes = expect_string(tok)?;
    let s = String::from_utf8(bytes).map_err(|_| anyhow!("node id must be valid utf8"))?;
    s.parse().map_err(|_| anyhow!("invalid node id `{}`", s))
}

fn expect_bool(tok: &mut Tokenizer<'_>) -> Result<bool> {
    match tok.next_token()? {
        Token::Symbol(s) if s == "true" => Ok(true),
        Token::Symbol(s) if s == "false" => Ok(false),
        _ => bail!("expected `true` or `false` at byte {}", tok.pos()),
    }
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

fn expect_loc(tok: &mut Tokenizer<'_>) -> Result<ParentName> {
    expect_symbol(tok, "location_parent")?;
    let parent_bytes = expect_string(tok)?;
    expect_symbol(tok, "location_name")?;
    let name_bytes = expect_string(tok)?;
    if parent_bytes.is_empty() {
        return Ok((None, None));
    }
    let parent_s = String::from_utf8(parent_bytes).map_err(|_| anyhow!("location parent must be valid utf8"))?;
    let parent = parent_s.parse().map_err(|_| anyhow!("invalid node id `{}`", parent_s))?;
    let name_s = String::from_utf8(name_bytes).map_err(|_| anyhow!("location name must be valid utf8"))?;
    Ok((Some(parent), Some(PathComponent::intern(name_s))))
}

/// `true` (without consuming) iff the next token is the symbol `expected`. Used to
/// look ahead past a marking's variable-length repeated fields, which `Tokenizer`
/// itself has no way to un-consume.
fn peek_is_symbol(tok: &Tokenizer<'_>, expected: &str) -> Result<bool> {
    let mut lookahead = tok.clone();
    Ok(matches!(lookahead.next_token()?, Token::Symbol(s) if s == expected))
}

fn expect_marking(tok: &mut Tokenizer<'_>) -> Result<Marking> {
    expect_symbol(tok, "birth")?;
    let birth_revision = expect_hex_revision(tok)?;
    let mut parent_name = BTreeSet::new();
    while peek_is_symbol(tok, "parent_name")? {
        tok.next_token()?;
        parent_name.insert(expect_hex_revision(tok)?);
    }
    let mut file_content = BTreeSet::new();
    while peek_is_symbol(tok, "file_content")? {
        tok.next_token()?;
        file_content.insert(expect_hex_revision(tok)?);
    }
    let mut attrs: BTreeMap<AttrKey, BTreeSet<RevisionId>> = BTreeMap::new();
    while peek_is_symbol(tok, "attr_mark_key")? {
        tok.next_token()?;
        let key = expect_string_attr(tok)?;
        expect_symbol(tok, "attr_mark")?;
        let mark = expect_hex_revision(tok)?;
        attrs.entry(key).or_default().insert(mark);
    }
    Ok(Marking { birth_revision, parent_name, file_content, attrs })
}

fn expect_hex_revision(tok: &mut Tokenizer<'_>) -> Result<RevisionId> {
    match tok.next_token()? {
        Token::Hex(bytes) if bytes.len() == crate::hash::DIGEST_SIZE => {
            let mut buf = [0u8; crate::hash::DIGEST_SIZE];
            buf.copy_from_slice(&bytes);
            Ok(RevisionId::new(buf))
        }
        _ => bail!("expected a {}-byte hex token at byte {}", crate::hash::DIGEST_SIZE, tok.pos()),
    }
}

fn check_ascending_nid(
    last: &mut BTreeMap<&'static str, NodeId>,
    class: &'static str,
    nid: NodeId,
) -> Result<()> {
    if let Some(&prev) = last.get(class) {
        ensure!(prev < nid, "stanzas out of order in `{}`: `{}` after `{}`", class, nid, prev);
    }
    last.insert(class, nid);
    Ok(())
}

fn check_ascending_attr(
    last: &mut BTreeMap<&'static str, (NodeId, AttrKey)>,
    class: &'static str,
    nid: NodeId,
    attr: AttrKey,
) -> Result<()> {
    if let Some(&(prev_nid, prev_attr)) = last.get(class) {
        ensure!(
            (prev_nid, prev_attr) < (nid, attr),
            "stanzas out of order in `{}`: `{}`/`{:?}` after `{}`/`{:?}`",
            class,
            nid,
            attr,
            prev_nid,
            prev_attr
        );
    }
    last.insert(class, (nid, attr));
    Ok(())
}

#[cfg(test)]
mod tests;
