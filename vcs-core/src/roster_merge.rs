//! Three-way roster merge (§4.4): produces a merged roster, marking map, and conflict
//! record from two parent rosters, their markings, and their uncommon-ancestor sets.
//!
//! Grounded on `original_source/roster_merge.cc`'s `roster_merge` function for phases
//! 1-4 (die-die-die lifecycle, mark-based scalar merge, `assign_name`'s structural-
//! conflict detection, the two global root checks). Node ids are shared identity across
//! `left`/`right`/the result here (both parents descend from a common roster), so this
//! port looks up nodes directly by id rather than the original's parallel positional
//! iterator over the freshly built result map.
//!
//! Phase 5 (temp-id unification) is a separate reconstruction path, [`make_roster_for_merge`]
//! and its [`unify_rosters`] helper, grounded on `original_source/roster3.cc`'s
//! `make_roster_for_merge`/`unify_rosters`/`unify_roster_oneway`: it rebuilds a merge's
//! result roster by replaying each parent's cset through a temp id source and unifying
//! the two sides' freshly-minted ids, rather than recomputing conflicts from scratch the
//! way [`merge_rosters`] does.

use crate::conflict::*;
use crate::cset::Changeset;
use crate::error::Result;
use crate::hash::{ContentHash, RevisionId};
use crate::ids::{is_temp, IdSource, NodeId, TempIdSource};
use crate::node::{AttrCell, AttrKey, Marking, MarkingMap, Node, NodeKind};
use crate::parallel_iter::{parallel_iter, Side};
use crate::path::PathComponent;
use crate::roster::Roster;
use crate::store::Limits;
use std::collections::BTreeSet;

#[derive(Default, Debug)]
pub struct MergeResult {
    pub roster: Roster,
    pub markings: MarkingMap,
    pub missing_root_dir: bool,
    pub invalid_name_conflicts: Vec<InvalidNameConflict>,
    pub directory_loop_conflicts: Vec<DirectoryLoopConflict>,
    pub orphaned_node_conflicts: Vec<OrphanedNodeConflict>,
    pub multiple_name_conflicts: Vec<MultipleNameConflict>,
    pub duplicate_name_conflicts: Vec<DuplicateNameConflict>,
    pub attribute_conflicts: Vec<AttributeConflict>,
    pub file_content_conflicts: Vec<FileContentConflict>,
}

impl MergeResult {
    pub fn has_content_conflicts(&self) -> bool {
        !self.file_content_conflicts.is_empty()
    }

    pub fn has_non_content_conflicts(&self) -> bool {
        self.missing_root_dir
            || !self.invalid_name_conflicts.is_empty()
            || !self.directory_loop_conflicts.is_empty()
            || !self.orphaned_node_conflicts.is_empty()
            || !self.multiple_name_conflicts.is_empty()
            || !self.duplicate_name_conflicts.is_empty()
            || !self.attribute_conflicts.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        !self.has_content_conflicts() && !self.has_non_content_conflicts()
    }

    /// removes any marking entry left over for a node that is no longer attached
    /// (either never attached, or detached by a later structural conflict).
    fn prune_unattached_markings(&mut self) {
        let attached: BTreeSet<NodeId> =
            self.roster.all_nodes().filter(|(&nid, _)| self.is_attached(nid)).map(|(&n, _)| n).collect();
        self.markings.retain(|nid, _| attached.contains(nid));
    }

    fn is_attached(&self, nid: NodeId) -> bool {
        Some(nid) == self.roster.root_id() || self.roster.get_node(nid).map_or(false, |n| n.parent.is_some())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParentSide {
    Left,
    Right,
}

/// `a_wins` per `original_source/roster_merge.cc`: `b`'s marks dominate `a` iff none
/// of them is an uncommon ancestor of `b` — i.e. every one of `b`'s marks is already an
/// ancestor of `a`, so `b` brings no new information `a` doesn't already have.
fn a_wins(b_marks: &BTreeSet<RevisionId>, b_uncommon: &BTreeSet<RevisionId>) -> bool {
    b_marks.iter().all(|r| !b_uncommon.contains(r))
}

enum ScalarMerge<T> {
    Clean(T),
    Conflict { left: T, right: T },
}

/// the classical mark-based three-way scalar merge rule (§4.4 phase 2).
fn merge_scalar<T: Clone + PartialEq>(
    left: &T,
    left_marks: &BTreeSet<RevisionId>,
    left_uncommon: &BTreeSet<RevisionId>,
    right: &T,
    right_marks: &BTreeSet<RevisionId>,
    right_uncommon: &BTreeSet<RevisionId>,
) -> ScalarMerge<T> {
    if left == right {
        return ScalarMerge::Clean(left.clone());
    }
    let left_wins = a_wins(right_marks, right_uncommon);
    let right_wins = a_wins(left_marks, left_uncommon);
    debug_assert!(!(left_wins && right_wins), "ambiguous clean merge is impossible by construction");
    match (left_wins, right_wins) {
        (true, false) => ScalarMerge::Clean(left.clone()),
        (false, true) => ScalarMerge::Clean(right.clone()),
        _ => ScalarMerge::Conflict { left: left.clone(), right: right.clone() },
    }
}

/// union of both sides' mark sets: sound for the reasons §4.4/§9 give (the set is only
/// ever tested for uncommon-ancestor membership, never reduced to a minimal antichain),
/// and is the policy this port applies uniformly to every merged scalar whose mark set
/// the spec doesn't pin down precisely — see DESIGN.md's "mark-set policy" entry.
fn union_marks(a: &BTreeSet<RevisionId>, b: &BTreeSet<RevisionId>) -> BTreeSet<RevisionId> {
    a.union(b).copied().collect()
}

pub fn merge_rosters(
    left_parent: &Roster,
    left_markings: &MarkingMap,
    left_uncommon_ancestors: &BTreeSet<RevisionId>,
    right_parent: &Roster,
    right_markings: &MarkingMap,
    right_uncommon_ancestors: &BTreeSet<RevisionId>,
    limits: &Limits,
) -> MergeResult {
    trace!(
        "merge_rosters: left has {} nodes, right has {} nodes",
        left_parent.len(),
        right_parent.len()
    );
    let mut result = MergeResult::default();

    // phase 1: lifecycle (die-die-die)
    for (_, side) in parallel_iter(left_parent.node_map(), right_parent.node_map()) {
        match side {
            Side::Both(left_n, _right_n) => {
                result.roster.insert_detached(empty_shell(left_n));
            }
            Side::Left(left_n) =>
                insert_if_unborn(left_n, left_markings, left_uncommon_ancestors, left_parent, &mut result),
            Side::Right(right_n) => insert_if_unborn(
                right_n,
                right_markings,
                right_uncommon_ancestors,
                right_parent,
                &mut result,
            ),
        }
    }

    // phase 2 + 3: scalar merge, then structural attachment, one node at a time
    for (&nid, side) in parallel_iter(left_parent.node_map(), right_parent.node_map()) {
        match side {
            Side::Left(left_n) =>
                if result.roster.has_node(nid) {
                    copy_node_forward(&mut result, left_n, &left_markings[&nid], ParentSide::Left);
                },
            Side::Right(right_n) =>
                if result.roster.has_node(nid) {
                    copy_node_forward(&mut result, right_n, &right_markings[&nid], ParentSide::Right);
                },
            Side::Both(left_n, right_n) => {
                let left_marking = &left_markings[&nid];
                let right_marking = &right_markings[&nid];
                merge_in_both(
                    &mut result,
                    nid,
                    left_n,
                    left_marking,
                    left_uncommon_ancestors,
                    right_n,
                    right_marking,
                    right_uncommon_ancestors,
                );
            }
        }
    }

    // phase 4: global checks
    if !result.roster.has_root() {
        result.missing_root_dir = true;
    } else {
        let root = result.roster.root_id().unwrap();
        let bookkeeping = PathComponent::intern(limits.bookkeeping_name);
        if let Some(child) = result.roster.child_at(root, bookkeeping) {
            result.roster.raw_detach(child);
            result
                .invalid_name_conflicts
                .push(InvalidNameConflict { nid: child, parent_name: (Some(root), Some(bookkeeping)) });
        }
    }

    result.prune_unattached_markings();
    result
}

fn empty_shell(n: &Node) -> Node {
    match &n.kind {
        NodeKind::Dir { .. } => Node::new_dir(n.id, n.birth_revision),
        NodeKind::File { .. } => Node::new_file(n.id, ContentHash::UNKNOWN, n.birth_revision),
    }
}

/// phase 1's per-side lifecycle decision: keep a single-side node iff it was born
/// after the common point on that side (a genuinely new node the other side never
/// knew about); otherwise it must have been deleted on the other side, so drop it,
/// warning if the surviving side also changed its content since divergence.
fn insert_if_unborn(
    n: &Node,
    markings: &MarkingMap,
    uncommon_ancestors: &BTreeSet<RevisionId>,
    parent_roster: &Roster,
    result: &mut MergeResult,
) {
    let marking = &markings[&n.id];
    if uncommon_ancestors.contains(&marking.birth_revision) {
        result.roster.insert_detached(empty_shell(n));
        return;
    }
    debug!("lifecycle: dropping node `{}`, absent on the other side", n.id);
    let mut warned = false;
    for rid in &marking.file_content {
        if uncommon_ancestors.contains(rid) {
            if !warned {
                let path = parent_roster.get_name(n.id).unwrap_or_default();
                warn!(
                    "content changes to `{}` will be ignored during this merge: \
                     the file was removed on the other side",
                    path
                );
                warned = true;
            }
            warn!("affected revision: {}", rid);
        }
    }
}

/// copies attrs/content verbatim from the single side that has this node, then
/// attempts structural attachment at that side's `(parent, name)`.
fn copy_node_forward(result: &mut MergeResult, old_n: &Node, old_marking: &Marking, side: ParentSide) {
    {
        let new_n = result.roster.get_node_mut(old_n.id).expect("created in phase 1");
        new_n.attrs = old_n.attrs.clone();
        if let (NodeKind::File { content }, NodeKind::File { content: new_content }) =
            (&old_n.kind, &mut new_n.kind)
        {
            *new_content = *content;
        }
    }
    result.markings.insert(old_n.id, old_marking.clone());
    assign_name(result, old_n.id, old_n.parent, old_n.name, side);
}

#[allow(clippy::too_many_arguments)]
fn merge_in_both(
    result: &mut MergeResult,
    nid: NodeId,
    left_n: &Node,
    left_marking: &Marking,
    left_uncommon: &BTreeSet<RevisionId>,
    right_n: &Node,
    right_marking: &Marking,
    right_uncommon: &BTreeSet<RevisionId>,
) {
    let birth_revision = left_n.birth_revision;
    debug_assert_eq!(birth_revision, right_n.birth_revision);

    // merge (parent, name)
    let left_name: ParentName = (left_n.parent, left_n.name);
    let right_name: ParentName = (right_n.parent, right_n.name);
    let name_merge = merge_scalar(
        &left_name,
        &left_marking.parent_name,
        left_uncommon,
        &right_name,
        &right_marking.parent_name,
        right_uncommon,
    );
    let mut parent_name_marks = None;
    match name_merge {
        ScalarMerge::Clean(resolved) => {
            // when both sides agree, `side` only controls which way a later duplicate-name
            // conflict's (left_nid, right_nid) pair gets ordered, which is cosmetic.
            let side = if resolved == left_name { ParentSide::Left } else { ParentSide::Right };
            if left_name != right_name {
                debug!("scalar merge: node `{}` (parent, name) resolved by {:?}", nid, side);
            }
            parent_name_marks = Some(if left_name == right_name {
                union_marks(&left_marking.parent_name, &right_marking.parent_name)
            } else if side == ParentSide::Left {
                left_marking.parent_name.clone()
            } else {
                right_marking.parent_name.clone()
            });
            assign_name(result, nid, resolved.0, resolved.1, side);
        }
        ScalarMerge::Conflict { left, right } => {
            result.multiple_name_conflicts.push(MultipleNameConflict { nid, left, right });
        }
    }

    // merge file content (files only)
    let mut file_content_marks = None;
    if let (NodeKind::File { content: left_content }, NodeKind::File { content: right_content }) =
        (&left_n.kind, &right_n.kind)
    {
        let content_merge = merge_scalar(
            left_content,
            &left_marking.file_content,
            left_uncommon,
            right_content,
            &right_marking.file_content,
            right_uncommon,
        );
        match content_merge {
            ScalarMerge::Clean(resolved) => {
                if left_content != right_content {
                    let side = if &resolved == left_content { ParentSide::Left } else { ParentSide::Right };
                    debug!("scalar merge: node `{}` file content resolved by {:?}", nid, side);
                }
                file_content_marks = Some(union_marks(&left_marking.file_content, &right_marking.file_content));
                if let Some(new_n) = result.roster.get_node_mut(nid) {
                    if let NodeKind::File { content } = &mut new_n.kind {
                        *content = resolved;
                    }
                }
            }
            ScalarMerge::Conflict { left, right } => {
                file_content_marks = Some(union_marks(&left_marking.file_content, &right_marking.file_content));
                result.file_content_conflicts.push(FileContentConflict { nid, left, right });
            }
        }
    }

    // merge attributes: union of key sets, scalar-merged per key
    let mut attr_marks: std::collections::BTreeMap<AttrKey, BTreeSet<RevisionId>> = Default::default();
    for (&key, side) in parallel_iter(&left_n.attrs, &right_n.attrs) {
        match side {
            Side::Left(cell) => {
                set_attr(result, nid, key, cell.clone());
                attr_marks.insert(key, left_marking.attrs.get(&key).cloned().unwrap_or_default());
            }
            Side::Right(cell) => {
                set_attr(result, nid, key, cell.clone());
                attr_marks.insert(key, right_marking.attrs.get(&key).cloned().unwrap_or_default());
            }
            Side::Both(left_cell, right_cell) => {
                let left_cell_marks = left_marking.attrs.get(&key).cloned().unwrap_or_default();
                let right_cell_marks = right_marking.attrs.get(&key).cloned().unwrap_or_default();
                let cell_merge = merge_scalar(
                    left_cell,
                    &left_cell_marks,
                    left_uncommon,
                    right_cell,
                    &right_cell_marks,
                    right_uncommon,
                );
                match cell_merge {
                    ScalarMerge::Clean(resolved) => {
                        set_attr(result, nid, key, resolved);
                        attr_marks.insert(key, union_marks(&left_cell_marks, &right_cell_marks));
                    }
                    ScalarMerge::Conflict { left, right } => {
                        // leave the attr entirely absent on conflict; the node itself
                        // is unaffected (it may still be attached).
                        result.attribute_conflicts.push(AttributeConflict {
                            nid,
                            key,
                            left: cell_to_value(&left),
                            right: cell_to_value(&right),
                        });
                    }
                }
            }
        }
    }

    // stitch the marking entry together; it's dropped again later by
    // `prune_unattached_markings` if the node ended up detached by phase 3/4.
    result.markings.insert(
        nid,
        Marking {
            birth_revision,
            parent_name: parent_name_marks.unwrap_or_else(|| left_marking.parent_name.clone()),
            file_content: file_content_marks.unwrap_or_default(),
            attrs: attr_marks,
        },
    );
}

fn cell_to_value(cell: &AttrCell) -> Option<Vec<u8>> {
    cell.live.then(|| cell.value.clone())
}

fn set_attr(result: &mut MergeResult, nid: NodeId, key: AttrKey, cell: AttrCell) {
    if let Some(n) = result.roster.get_node_mut(nid) {
        n.attrs.insert(key, cell);
    }
}

/// structural attachment at a resolved `(parent, name)`: detects orphans, directory
/// loops, duplicate-name collisions, and the root/bookkeeping-name special case,
/// recording a conflict and leaving the node detached instead of attaching it when one
/// of those fires. Mirrors `original_source/roster_merge.cc`'s `assign_name`.
fn assign_name(
    result: &mut MergeResult,
    nid: NodeId,
    parent: Option<NodeId>,
    name: Option<PathComponent>,
    side: ParentSide,
) {
    match parent {
        None => {
            if let Some(existing) = result.roster.root_id() {
                if existing == nid {
                    result.roster.raw_attach(nid, None, None);
                    return;
                }
                record_duplicate(result, nid, existing, side, (None, None));
                return;
            }
        }
        Some(p) => {
            let name = name.expect("non-root node always has a name");
            if !result.roster.has_node(p) {
                result.orphaned_node_conflicts.push(OrphanedNodeConflict { nid, parent_name: (Some(p), Some(name)) });
                return;
            }
            if let Some(existing) = result.roster.child_at(p, name) {
                if existing == nid {
                    // already attached here (single-sided copy re-attaching at its
                    // unchanged location): nothing to do.
                    return;
                }
                record_duplicate(result, nid, existing, side, (Some(p), Some(name)));
                return;
            }
            if result.roster.would_make_loop(nid, p) {
                result
                    .directory_loop_conflicts
                    .push(DirectoryLoopConflict { nid, parent_name: (Some(p), Some(name)) });
                return;
            }
        }
    }
    result.roster.raw_attach(nid, parent, name);
}

fn record_duplicate(
    result: &mut MergeResult,
    nid: NodeId,
    existing: NodeId,
    side: ParentSide,
    parent_name: ParentName,
) {
    let (left_nid, right_nid) = match side {
        ParentSide::Left => (nid, existing),
        ParentSide::Right => (existing, nid),
    };
    result.roster.raw_detach(existing);
    result.duplicate_name_conflicts.push(DuplicateNameConflict { left_nid, right_nid, parent_name });
}

/// Phase 5 (§4.4): unifies the temp ids two independent cset applications minted for
/// "the same" new node (one that resolves to the same path on both sides) into a single
/// shared real id, so the two working rosters converge to one tree with no residual
/// temp ids. `left_new`/`right_new` are each side's freshly-minted node ids (everything
/// `left`/`right` didn't have before their cset was applied); `ids` must be a true id
/// source. Grounded on `original_source/roster3.cc`'s `unify_rosters`/
/// `unify_roster_oneway`.
pub fn unify_rosters(
    left: &mut Roster,
    left_new: &mut BTreeSet<NodeId>,
    right: &mut Roster,
    right_new: &mut BTreeSet<NodeId>,
    ids: &mut dyn IdSource,
) {
    unify_roster_oneway(left, left_new, right, right_new, ids);
    unify_roster_oneway(right, right_new, left, left_new, ids);
}

/// handles everything in `a_new`, matching each against `b` by resolved path.
fn unify_roster_oneway(
    a: &mut Roster,
    a_new: &mut BTreeSet<NodeId>,
    b: &mut Roster,
    b_new: &mut BTreeSet<NodeId>,
    ids: &mut dyn IdSource,
) {
    for aid in std::mem::take(a_new) {
        let path = a.get_name(aid).expect("a new node is always attached somewhere");
        let bid = match b.lookup(&path) {
            Some(bid) => bid,
            None => bug!("unify_rosters: `{}` has no counterpart on the other side", path),
        };
        if is_temp(bid) {
            let new_id = ids.next();
            debug_assert!(!is_temp(new_id), "unify_rosters must be given a true id source");
            a.replace_node_id(aid, new_id);
            b.replace_node_id(bid, new_id);
            b_new.remove(&bid);
        } else {
            // `b`'s node at this path already has a committed real id (from a previous
            // unification pass, or because only `a`'s cset treated this as new); adopt it
            // and its birth revision rather than minting another one.
            let birth_revision = b.get_node(bid).expect("looked up by path").birth_revision;
            a.replace_node_id(aid, bid);
            if let Some(n) = a.get_node_mut(bid) {
                n.birth_revision = birth_revision;
            }
        }
    }
}

/// Reconstructs a merge's result roster directly from the two parent csets (each
/// expressing the same logical change relative to its own parent), rather than
/// recomputing conflicts from scratch the way [`merge_rosters`] does. Used to replay an
/// already-decided merge (e.g. materializing a revision that records two parent edges)
/// instead of deciding one. Grounded on `original_source/roster3.cc`'s
/// `make_roster_for_merge`.
pub fn make_roster_for_merge(
    left_parent: &Roster,
    left_cset: &Changeset,
    right_parent: &Roster,
    right_cset: &Changeset,
    new_revision: RevisionId,
    ids: &mut dyn IdSource,
) -> Result<Roster> {
    let mut left_result = left_parent.clone();
    let left_before: BTreeSet<NodeId> = left_result.all_nodes().map(|(&n, _)| n).collect();
    left_cset.apply_to(&mut left_result, &mut TempIdSource::default(), new_revision)?;
    let mut left_new: BTreeSet<NodeId> = left_result
        .all_nodes()
        .map(|(&n, _)| n)
        .filter(|n| !left_before.contains(n))
        .collect();

    let mut right_result = right_parent.clone();
    let right_before: BTreeSet<NodeId> = right_result.all_nodes().map(|(&n, _)| n).collect();
    right_cset.apply_to(&mut right_result, &mut TempIdSource::default(), new_revision)?;
    let mut right_new: BTreeSet<NodeId> = right_result
        .all_nodes()
        .map(|(&n, _)| n)
        .filter(|n| !right_before.contains(n))
        .collect();

    unify_rosters(&mut left_result, &mut left_new, &mut right_result, &mut right_new, ids);

    if left_result != right_result {
        bug!("make_roster_for_merge: left and right csets produced different trees");
    }
    Ok(left_result)
}

#[cfg(test)]
mod tests;
