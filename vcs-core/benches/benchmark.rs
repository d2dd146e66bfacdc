use criterion::{criterion_group, criterion_main, Criterion};
use std::collections::BTreeSet;
use vcs_core::hash::{ContentHash, RevisionId};
use vcs_core::ids::{IdSource, TrueIdSource};
use vcs_core::node::Marking;
use vcs_core::path::SplitPath;
use vcs_core::roster::{EditableTree, Roster};
use vcs_core::roster_merge::merge_rosters;

fn rev(n: u32) -> RevisionId {
    let mut bytes = [0u8; 20];
    bytes[..4].copy_from_slice(&n.to_be_bytes());
    RevisionId::new(bytes)
}

/// a roster with `n` files directly under root, all born at `birth`, plus a marking
/// map recording that birth for every scalar.
fn wide_roster(n: u32, birth: RevisionId) -> (Roster, vcs_core::node::MarkingMap) {
    let mut roster = Roster::empty();
    let mut ids = TrueIdSource::default();
    let mut markings = vcs_core::node::MarkingMap::new();

    let root = roster.create_dir_node(&mut ids, birth).unwrap();
    roster.attach_node(root, &SplitPath::root()).unwrap();
    markings.insert(root, Marking::new_dir(birth));

    for i in 0..n {
        let content = ContentHash::new([0; 20]);
        let file = roster.create_file_node(&mut ids, content, birth).unwrap();
        let path: SplitPath = format!("file-{i}").as_str().into();
        roster.attach_node(file, &path).unwrap();
        markings.insert(file, Marking::new_file(birth));
    }
    (roster, markings)
}

fn bench_roster_merge_clean(c: &mut Criterion) {
    let birth = rev(1);
    let (roster, markings) = wide_roster(500, birth);
    let uncommon = BTreeSet::new();
    c.bench_function("roster_merge_clean_500_files", |b| {
        b.iter(|| merge_rosters(&roster, &markings, &uncommon, &roster, &markings, &uncommon))
    });
}

fn bench_roster_merge_divergent(c: &mut Criterion) {
    // left adds 250 new files at an uncommon revision; right is untouched, so every
    // lifecycle/scalar-merge path in `merge_rosters` gets exercised, not just the
    // trivial left==right shortcut.
    let birth = rev(1);
    let (mut left, mut left_markings) = wide_roster(500, birth);
    let (right, right_markings) = wide_roster(500, birth);

    // `wide_roster` already consumed ids 1..=501 (root + 500 files); start past that
    // so these new nodes never collide with it.
    let mut ids = TrueIdSource::default();
    for _ in 0..501 {
        ids.next();
    }
    let add_rev = rev(2);
    for i in 0..250 {
        let content = ContentHash::new([1; 20]);
        let file = left.create_file_node(&mut ids, content, add_rev).unwrap();
        let path: SplitPath = format!("new-{i}").as_str().into();
        left.attach_node(file, &path).unwrap();
        left_markings.insert(file, Marking::new_file(add_rev));
    }
    let left_uncommon: BTreeSet<RevisionId> = std::iter::once(add_rev).collect();
    let right_uncommon = BTreeSet::new();

    c.bench_function("roster_merge_divergent_750_files", |b| {
        b.iter(|| {
            merge_rosters(
                &left,
                &left_markings,
                &left_uncommon,
                &right,
                &right_markings,
                &right_uncommon,
            )
        })
    });
}

fn bench_myers_diff(c: &mut Criterion) {
    let ancestor: Vec<u32> = (0..2000).collect();
    let mut left = ancestor.clone();
    left.insert(1000, 999_999);
    left.remove(500);
    let mut right = ancestor.clone();
    right.insert(250, 888_888);
    right.remove(1500);

    c.bench_function("myers_diff_2000_lines", |b| {
        b.iter(|| vcs_core::myers::diff(&ancestor, &left))
    });
    c.bench_function("myers_diff_two_divergent_edits", |b| {
        b.iter(|| vcs_core::myers::diff(&left, &right))
    });
}

fn bench_merge3(c: &mut Criterion) {
    let limits = vcs_core::store::Limits::default();
    let ancestor_lines: Vec<String> = (0..2000).map(|i| format!("line {i}\n")).collect();
    let ancestor = ancestor_lines.concat().into_bytes();

    let mut left_lines = ancestor_lines.clone();
    left_lines[500] = "left change\n".to_string();
    let left = left_lines.concat().into_bytes();

    let mut right_lines = ancestor_lines.clone();
    right_lines[1500] = "right change\n".to_string();
    let right = right_lines.concat().into_bytes();

    c.bench_function("merge3_2000_lines_non_overlapping", |b| {
        b.iter(|| vcs_core::merge3::merge3(&limits, &ancestor, &left, &right).unwrap())
    });
}

criterion_group!(
    benches,
    bench_roster_merge_clean,
    bench_roster_merge_divergent,
    bench_myers_diff,
    bench_merge3,
);
criterion_main!(benches);
