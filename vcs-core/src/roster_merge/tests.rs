use super::*;
use crate::hash::RevisionId;
use crate::ids::{IdSource, TrueIdSource};
use crate::node::Marking;
use crate::path::SplitPath;
use crate::store::Limits;

fn rev(n: u8) -> RevisionId {
    RevisionId::new([n; 20])
}

fn limits() -> Limits {
    Limits::default()
}

/// builds a single-root roster (with one file `a` under it) plus its marking map, all
/// attributed to `birth`. Returns `(roster, markings, root, file)`.
fn base_tree(birth: RevisionId) -> (Roster, MarkingMap, NodeId, NodeId) {
    let mut roster = Roster::empty();
    let mut ids = TrueIdSource::default();
    let root = roster.create_dir_node(&mut ids, birth).unwrap();
    roster.attach_node(root, &SplitPath::root()).unwrap();
    let file = roster.create_file_node(&mut ids, ContentHash::UNKNOWN, birth).unwrap();
    roster.attach_node(file, &SplitPath::from("a")).unwrap();
    let mut markings = MarkingMap::new();
    markings.insert(root, Marking::new_dir(birth));
    markings.insert(file, Marking::new_file(birth));
    (roster, markings, root, file)
}

#[test]
fn identical_parents_merge_cleanly() {
    let (roster, markings, ..) = base_tree(rev(1));
    let uncommon = BTreeSet::new();
    let result =
        merge_rosters(&roster, &markings, &uncommon, &roster, &markings, &uncommon, &limits());
    assert!(result.is_clean());
    assert_eq!(result.roster.len(), roster.len());
    assert!(result.roster.sane_against(&result.markings, &limits()));
}

#[test]
fn scalar_content_change_wins_by_uncommon_mark() {
    // left changes `a`'s content at rev 2 (an uncommon ancestor on the left); right is
    // untouched. left's mark for file_content is {2}, which is an uncommon ancestor of
    // left, so right's unchanged mark {1} does not dominate -> left wins cleanly.
    let (mut left, mut left_marks, _root, file) = base_tree(rev(1));
    let (right, right_marks, ..) = base_tree(rev(1));

    left.apply_delta(&SplitPath::from("a"), ContentHash::UNKNOWN, rev(99)).unwrap();
    left_marks.get_mut(&file).unwrap().file_content = std::iter::once(rev(2)).collect();

    let left_uncommon: BTreeSet<RevisionId> = std::iter::once(rev(2)).collect();
    let right_uncommon = BTreeSet::new();

    let result = merge_rosters(
        &left,
        &left_marks,
        &left_uncommon,
        &right,
        &right_marks,
        &right_uncommon,
        &limits(),
    );
    assert!(result.is_clean());
    assert_eq!(result.roster.get_node(file).unwrap().content(), Some(rev(99)));
}

#[test]
fn symmetric_rename_collision_is_a_name_conflict() {
    // both sides rename `a` to different names at their own uncommon revisions: neither
    // side's mark dominates the other's, so the (parent, name) scalar merge conflicts.
    let (mut left, mut left_marks, root, file) = base_tree(rev(1));
    let (mut right, mut right_marks, _root2, _file2) = base_tree(rev(1));

    let old_path = SplitPath::from("a");
    left.detach_node(&old_path).unwrap();
    left.attach_node(file, &SplitPath::from("b")).unwrap();
    left_marks.get_mut(&file).unwrap().parent_name = std::iter::once(rev(2)).collect();

    right.detach_node(&old_path).unwrap();
    right.attach_node(file, &SplitPath::from("c")).unwrap();
    right_marks.get_mut(&file).unwrap().parent_name = std::iter::once(rev(3)).collect();

    let left_uncommon: BTreeSet<RevisionId> = std::iter::once(rev(2)).collect();
    let right_uncommon: BTreeSet<RevisionId> = std::iter::once(rev(3)).collect();

    let result = merge_rosters(
        &left,
        &left_marks,
        &left_uncommon,
        &right,
        &right_marks,
        &right_uncommon,
        &limits(),
    );
    assert!(!result.is_clean());
    assert_eq!(result.multiple_name_conflicts.len(), 1);
    assert_eq!(result.multiple_name_conflicts[0].nid, file);
    assert!(!result.roster.get_node(file).unwrap().parent.is_some());
    let _ = root;
}

#[test]
fn independent_adds_of_the_same_name_is_a_duplicate_name_conflict() {
    // both sides independently add a new file named `x` under root, each using a
    // distinct node id born at its own uncommon revision.
    let (mut left, mut left_marks, root, _file) = base_tree(rev(1));
    let (mut right, mut right_marks, _root2, _file2) = base_tree(rev(1));

    let mut left_ids = TrueIdSource::default();
    let left_new = left.create_file_node(&mut left_ids, ContentHash::UNKNOWN, rev(2)).unwrap();
    left.attach_node(left_new, &SplitPath::from("x")).unwrap();
    left_marks.insert(left_new, Marking::new_file(rev(2)));

    let mut right_ids = TrueIdSource::default();
    // use a disjoint id range from `left_ids` to model two independently-allocated ids
    for _ in 0..5 {
        right_ids.next();
    }
    let right_new = right.create_file_node(&mut right_ids, ContentHash::UNKNOWN, rev(3)).unwrap();
    right.attach_node(right_new, &SplitPath::from("x")).unwrap();
    right_marks.insert(right_new, Marking::new_file(rev(3)));

    let left_uncommon: BTreeSet<RevisionId> = std::iter::once(rev(2)).collect();
    let right_uncommon: BTreeSet<RevisionId> = std::iter::once(rev(3)).collect();

    let result = merge_rosters(
        &left,
        &left_marks,
        &left_uncommon,
        &right,
        &right_marks,
        &right_uncommon,
        &limits(),
    );
    assert!(!result.is_clean());
    assert_eq!(result.duplicate_name_conflicts.len(), 1);
    let conflict = &result.duplicate_name_conflicts[0];
    assert_eq!(conflict.parent_name.0, Some(root));
    assert!(!result.roster.get_node(left_new).unwrap().parent.is_some());
}

#[test]
fn deletion_on_one_side_is_respected() {
    // left deletes `a`; right leaves it untouched. `a`'s birth mark (rev 1) is not an
    // uncommon ancestor on the right, so `insert_if_unborn` drops it there too.
    let (mut left, mut left_marks, root, file) = base_tree(rev(1));
    let (right, right_marks, ..) = base_tree(rev(1));

    left.detach_node(&SplitPath::from("a")).unwrap();
    left.drop_detached_node(file).unwrap();
    left_marks.remove(&file);

    let left_uncommon: BTreeSet<RevisionId> = std::iter::once(rev(2)).collect();
    let right_uncommon: BTreeSet<RevisionId> = std::iter::once(rev(3)).collect();

    let result = merge_rosters(
        &left,
        &left_marks,
        &left_uncommon,
        &right,
        &right_marks,
        &right_uncommon,
        &limits(),
    );
    assert!(result.is_clean());
    assert!(!result.roster.has_node(file) || result.roster.get_node(file).unwrap().parent.is_none());
    assert!(result.roster.has_node(root));
}

#[test]
fn attribute_merge_conflicts_leave_the_attr_absent() {
    let (mut left, mut left_marks, _root, file) = base_tree(rev(1));
    let (mut right, mut right_marks, ..) = base_tree(rev(1));
    let key = AttrKey::intern("execute");

    left.set_attr(&SplitPath::from("a"), key, b"true".to_vec()).unwrap();
    left_marks.get_mut(&file).unwrap().attrs.insert(key, std::iter::once(rev(2)).collect());

    right.set_attr(&SplitPath::from("a"), key, b"false".to_vec()).unwrap();
    right_marks.get_mut(&file).unwrap().attrs.insert(key, std::iter::once(rev(3)).collect());

    let left_uncommon: BTreeSet<RevisionId> = std::iter::once(rev(2)).collect();
    let right_uncommon: BTreeSet<RevisionId> = std::iter::once(rev(3)).collect();

    let result = merge_rosters(
        &left,
        &left_marks,
        &left_uncommon,
        &right,
        &right_marks,
        &right_uncommon,
        &limits(),
    );
    assert!(!result.is_clean());
    assert_eq!(result.attribute_conflicts.len(), 1);
    assert!(!result.roster.get_node(file).unwrap().attrs.contains_key(&key));
}

#[test]
fn make_roster_for_merge_unifies_independent_adds_of_the_same_path() {
    // both csets add a new file `x` under root; applied with independent temp id
    // sources each side's `x` starts out with a different temp id, and
    // `make_roster_for_merge` must unify them into one shared real id.
    let (parent, ..) = base_tree(rev(1));
    let mut left_cset = crate::cset::Changeset::default();
    left_cset.files_added.insert(SplitPath::from("x"), ContentHash::UNKNOWN);
    let mut right_cset = crate::cset::Changeset::default();
    right_cset.files_added.insert(SplitPath::from("x"), ContentHash::UNKNOWN);

    let mut ids = TrueIdSource::new(100);
    let merged =
        make_roster_for_merge(&parent, &left_cset, &parent, &right_cset, rev(2), &mut ids)
            .unwrap();

    assert_eq!(merged.len(), parent.len() + 1);
    let x = merged.lookup(&SplitPath::from("x")).unwrap();
    assert!(!crate::ids::is_temp(x));
}

#[test]
#[should_panic(expected = "produced different trees")]
fn make_roster_for_merge_rejects_divergent_csets() {
    // `cset`/`other_cset` apply a different final content to the same existing file:
    // both apply individually, but the two sides can never converge to the same tree,
    // which is an invariant violation (§7), not a reportable conflict.
    let (parent, ..) = base_tree(rev(1));
    let mut cset = crate::cset::Changeset::default();
    cset.deltas_applied.insert(SplitPath::from("a"), (ContentHash::UNKNOWN, rev(10)));
    let mut other_cset = crate::cset::Changeset::default();
    other_cset.deltas_applied.insert(SplitPath::from("a"), (ContentHash::UNKNOWN, rev(20)));

    let mut ids = TrueIdSource::new(100);
    let _ = make_roster_for_merge(&parent, &cset, &parent, &other_cset, rev(2), &mut ids);
}
