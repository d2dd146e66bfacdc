use super::*;
use crate::ids::TrueIdSource;
use crate::node::Marking;
use crate::path::SplitPath;
use crate::roster::EditableTree;

fn rev(n: u8) -> RevisionId {
    RevisionId::new([n; 20])
}

fn root_tree(birth: RevisionId) -> (Roster, MarkingMap, TrueIdSource) {
    let mut roster = Roster::empty();
    let mut ids = TrueIdSource::default();
    let root = roster.create_dir_node(&mut ids, birth).unwrap();
    roster.attach_node(root, &SplitPath::root()).unwrap();
    let mut markings = MarkingMap::new();
    markings.insert(root, Marking::new_dir(birth));
    (roster, markings, ids)
}

fn spin(from: &Roster, from_m: &MarkingMap, to: &Roster, to_m: &MarkingMap) {
    let delta = make_roster_delta(from, from_m, to, to_m);
    let mut tmp = from.clone();
    let mut tmp_m = from_m.clone();
    delta.apply(&mut tmp, &mut tmp_m).unwrap();
    assert_eq!(&tmp, to);
    assert_eq!(&tmp_m, to_m);

    let printed = delta.print();
    let reparsed = RosterDelta::parse(&printed).unwrap();
    assert_eq!(delta, reparsed);
}

#[test]
fn adding_a_file_round_trips() {
    let (from, from_m, mut ids) = root_tree(rev(1));
    let mut to = from.clone();
    let mut to_m = from_m.clone();
    let file = to.create_file_node(&mut ids, ContentHash::UNKNOWN, rev(2)).unwrap();
    to.attach_node(file, &SplitPath::from("a")).unwrap();
    to_m.insert(file, Marking::new_file(rev(2)));

    spin(&from, &from_m, &to, &to_m);
}

#[test]
fn renaming_and_deleting_round_trips() {
    let (mut from, mut from_m, mut ids) = root_tree(rev(1));
    let file = from.create_file_node(&mut ids, ContentHash::UNKNOWN, rev(1)).unwrap();
    from.attach_node(file, &SplitPath::from("a")).unwrap();
    from_m.insert(file, Marking::new_file(rev(1)));

    let dir = from.create_dir_node(&mut ids, rev(1)).unwrap();
    from.attach_node(dir, &SplitPath::from("d")).unwrap();
    from_m.insert(dir, Marking::new_dir(rev(1)));

    let mut to = from.clone();
    let mut to_m = from_m.clone();
    to.detach_node(&SplitPath::from("a")).unwrap();
    to.attach_node(file, &SplitPath::from("d/b")).unwrap();
    to_m.get_mut(&file).unwrap().parent_name = std::iter::once(rev(2)).collect();

    spin(&from, &from_m, &to, &to_m);
}

#[test]
fn content_delta_and_attr_change_round_trip() {
    let (mut from, mut from_m, mut ids) = root_tree(rev(1));
    let file = from.create_file_node(&mut ids, ContentHash::UNKNOWN, rev(1)).unwrap();
    from.attach_node(file, &SplitPath::from("a")).unwrap();
    from_m.insert(file, Marking::new_file(rev(1)));

    let mut to = from.clone();
    let mut to_m = from_m.clone();
    to.apply_delta(&SplitPath::from("a"), ContentHash::UNKNOWN, rev(42)).unwrap();
    to_m.get_mut(&file).unwrap().file_content = std::iter::once(rev(2)).collect();
    let key = AttrKey::intern("execute");
    to.set_attr(&SplitPath::from("a"), key, b"true".to_vec()).unwrap();
    to_m.get_mut(&file).unwrap().attrs.insert(key, std::iter::once(rev(2)).collect());

    spin(&from, &from_m, &to, &to_m);
}

#[test]
fn empty_delta_between_identical_trees() {
    let (from, from_m, _ids) = root_tree(rev(1));
    let delta = make_roster_delta(&from, &from_m, &from, &from_m);
    assert!(delta.is_empty());
}
