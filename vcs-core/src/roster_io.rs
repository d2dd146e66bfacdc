//! The roster+markings textual format (§4.7, §6): one stanza per node, printed and
//! parsed in path order.
//!
//! Node ids are deliberately absent from the format — they are ambient, per-roster
//! allocator output (§3's node id source), not part of a tree's persistent identity.
//! A path is; so [`parse_roster`] takes an [`IdSource`] and mints fresh ids as it
//! attaches each stanza's node at its printed path, exactly as applying an `add_dir`/
//! `add_file` cset entry would. This mirrors `roster_delta.rs`'s node-id-is-ephemeral
//! treatment one level up: there ids are carried because a delta's source and
//! destination roster must agree on them; here there is only one roster, so nothing
//! needs to agree with anything and the ids can simply be re-minted.
//!
//! Grounding: no standalone `print_roster`/`parse_roster` survived into
//! `original_source/`'s retrieved files (the roster `.cc`/`.hh` files cover the data
//! structure and merge, not its I/O), so this format is an original design, built from
//! the stanza fields §4.7 names and in the same `textio` idiom as `cset.rs` and
//! `roster_delta.rs`.

use crate::error::Result;
use crate::hash::{ContentHash, RevisionId};
use crate::ids::IdSource;
use crate::node::{AttrCell, AttrKey, Marking, MarkingMap, NodeKind};
use crate::path::SplitPath;
use crate::roster::{EditableTree, Roster};
use crate::textio::{print_stanzas, Stanza, Token, Tokenizer};
use std::collections::BTreeSet;

/// prints every node in `roster` as one stanza, in ascending path order (the order
/// `SplitPath`'s `Ord` impl already gives a `BTreeMap` keyed by path).
pub fn print_roster(roster: &Roster, markings: &MarkingMap) -> Vec<u8> {
    let mut by_path: std::collections::BTreeMap<SplitPath, &crate::node::Node> =
        std::collections::BTreeMap::new();
    for (&nid, node) in roster.all_nodes() {
        if let Some(path) = roster.get_name(nid) {
            by_path.insert(path, node);
        }
    }

    let mut stanzas = Vec::new();
    for (path, node) in &by_path {
        let mut st = Stanza::new();
        st.push_str("path", path.to_string().as_bytes());
        match &node.kind {
            NodeKind::Dir { .. } => {
                st.push_symbol("type", "dir");
            }
            NodeKind::File { content } => {
                st.push_symbol("type", "file");
                st.push_hex("content", content.as_bytes());
            }
        }
        for (&key, cell) in &node.attrs {
            st.push_str("attr", key.as_str().as_bytes());
            st.push_symbol("live", cell.live);
            st.push_str("value", &cell.value);
        }
        let marking = markings.get(&node.id);
        let birth = marking.map(|m| m.birth_revision).unwrap_or(node.birth_revision);
        st.push_hex("birth", birth.as_bytes());
        if let Some(m) = marking {
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
        }
        stanzas.push(st);
    }
    print_stanzas(&stanzas)
}

/// parses the format printed by [`print_roster`], minting a fresh node id per stanza
/// via `ids` and attaching each node at its printed path. Stanzas must already be in
/// ascending path order (so every parent is attached before its children are parsed);
/// this is what [`print_roster`] always produces and is re-checked here the same way
/// `cset::parse`/`RosterDelta::parse` check their own stanza classes.
pub fn parse_roster(input: &[u8], ids: &mut dyn IdSource) -> Result<(Roster, MarkingMap)> {
    let mut roster = Roster::empty();
    let mut markings = MarkingMap::new();
    let mut tok = Tokenizer::new(input);
    let mut last_path: Option<SplitPath> = None;

    loop {
        match tok.next_token()? {
            Token::None => break,
            Token::Symbol(s) if s == "path" => {
                let path = expect_string_path_inline(&mut tok)?;
                if let Some(prev) = &last_path {
                    ensure!(prev < &path, "stanzas out of order: `{}` after `{}`", path, prev);
                }
                last_path = Some(path.clone());

                expect_symbol(&mut tok, "type")?;
                let kind = match tok.next_token()? {
                    Token::Symbol(s) if s == "dir" => NodeKind::Dir { children: Default::default() },
                    Token::Symbol(s) if s == "file" => {
                        expect_symbol(&mut tok, "content")?;
                        NodeKind::File { content: expect_hex_hash(&mut tok)? }
                    }
                    _ => bail!("expected `dir` or `file` at byte {}", tok.pos()),
                };

                let mut attrs = std::collections::BTreeMap::new();
                while peek_is_symbol(&tok, "attr")? {
                    tok.next_token()?;
                    let key = expect_string_attr(&mut tok)?;
                    expect_symbol(&mut tok, "live")?;
                    let live = expect_bool(&mut tok)?;
                    expect_symbol(&mut tok, "value")?;
                    let value = expect_string(&mut tok)?;
                    attrs.insert(key, AttrCell { live, value });
                }

                expect_symbol(&mut tok, "birth")?;
                let birth_revision = expect_hex_revision(&mut tok)?;

                let mut parent_name = BTreeSet::new();
                while peek_is_symbol(&tok, "parent_name")? {
                    tok.next_token()?;
                    parent_name.insert(expect_hex_revision(&mut tok)?);
                }
                let mut file_content = BTreeSet::new();
                while peek_is_symbol(&tok, "file_content")? {
                    tok.next_token()?;
                    file_content.insert(expect_hex_revision(&mut tok)?);
                }
                let mut attr_marks: std::collections::BTreeMap<AttrKey, BTreeSet<RevisionId>> =
                    std::collections::BTreeMap::new();
                while peek_is_symbol(&tok, "attr_mark_key")? {
                    tok.next_token()?;
                    let key = expect_string_attr(&mut tok)?;
                    expect_symbol(&mut tok, "attr_mark")?;
                    attr_marks.entry(key).or_default().insert(expect_hex_revision(&mut tok)?);
                }
                if parent_name.is_empty() {
                    parent_name.insert(birth_revision);
                }
                if file_content.is_empty() && matches!(kind, NodeKind::File { .. }) {
                    file_content.insert(birth_revision);
                }

                let nid = if path.is_root() {
                    ensure!(matches!(kind, NodeKind::Dir { .. }), "root must be a directory");
                    let nid = ids.next();
                    roster.insert_detached(crate::node::Node::new_dir(nid, birth_revision));
                    roster.attach_node(nid, &SplitPath::root())?;
                    nid
                } else {
                    let nid = match &kind {
                        NodeKind::Dir { .. } => roster.create_dir_node(ids, birth_revision)?,
                        NodeKind::File { content } =>
                            roster.create_file_node(ids, *content, birth_revision)?,
                    };
                    roster.attach_node(nid, &path)?;
                    nid
                };
                for (key, cell) in attrs {
                    if let Some(node) = roster.get_node_mut(nid) {
                        node.attrs.insert(key, cell);
                    }
                }
                markings.insert(
                    nid,
                    Marking { birth_revision, parent_name, file_content, attrs: attr_marks },
                );
            }
            _ => bail!("expected stanza keyword `path`"),
        }
    }
    Ok((roster, markings))
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

fn expect_string_path_inline(tok: &mut Tokenizer<'_>) -> Result<SplitPath> {
    let bytes = expect_string(tok)?;
    let s = String::from_utf8(bytes).map_err(|_| anyhow!("path must be valid utf8"))?;
    Ok(SplitPath::from(s.as_str()))
}

fn expect_string_attr(tok: &mut Tokenizer<'_>) -> Result<AttrKey> {
    let bytes = expect_string(tok)?;
    let s = String::from_utf8(bytes).map_err(|_| anyhow!("attr key must be valid utf8"))?;
    Ok(AttrKey::intern(s))
}

fn expect_bool(tok: &mut Tokenizer<'_>) -> Result<bool> {
    match tok.next_token()? {
        Token::Symbol(s) if s == "true" => Ok(true),
        Token::Symbol(s) if s == "false" => Ok(false),
        _ => bail!("expected `true` or `false` at byte {}", tok.pos()),
    }
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

/// `true` (without consuming) iff the next token is the symbol `expected`.
fn peek_is_symbol(tok: &Tokenizer<'_>, expected: &str) -> Result<bool> {
    let mut lookahead = tok.clone();
    Ok(matches!(lookahead.next_token()?, Token::Symbol(s) if s == expected))
}
