//! Three-way line-level text merge (§4.3): LCS over interned lines, extent-based
//! reconciliation, binary-file guard.

use crate::error::Result;
use crate::myers::{self, Edit};
use crate::store::Limits;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged(Vec<u8>),
    Conflict,
}

/// splits on `\n`, keeping the terminator attached to the line it ends, so a trailing
/// partial line (no final newline) survives round-tripping untouched.
fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            lines.push(&bytes[start..=i]);
            start = i + 1;
        }
    }
    if start < bytes.len() {
        lines.push(&bytes[start..]);
    }
    lines
}

fn looks_binary(bytes: &[u8], guard: &[u8]) -> bool {
    bytes.iter().any(|b| guard.contains(b))
}

/// a per-call line interner: scoped to one `merge3` invocation, thrown away when it
/// returns. distinct from the process-wide `crate::interner`, which is never freed.
#[derive(Default)]
struct LineInterner<'a> {
    ids: FxHashMap<&'a [u8], u32>,
}

impl<'a> LineInterner<'a> {
    fn intern_all(&mut self, lines: &[&'a [u8]]) -> Vec<u32> {
        lines
            .iter()
            .map(|&line| {
                let next = self.ids.len() as u32;
                *self.ids.entry(line).or_insert(next)
            })
            .collect()
    }
}

/// a non-preserved span over the ancestor's line coordinates: `[start, end)` ancestor
/// lines replaced by `replacement` (empty replacement means pure deletion).
type Change<'a> = (usize, usize, Vec<&'a [u8]>);

fn flush_group<'a>(
    dels: &mut Vec<usize>,
    inserts: &mut Vec<usize>,
    seen_anchor: bool,
    anchor_pos: usize,
    prefix: &mut Vec<&'a [u8]>,
    changes: &mut Vec<Change<'a>>,
    other_lines: &[&'a [u8]],
) {
    if dels.is_empty() && inserts.is_empty() {
        return;
    }
    let replacement: Vec<&[u8]> = inserts.drain(..).map(|i| other_lines[i]).collect();
    if dels.is_empty() {
        if !seen_anchor {
            prefix.extend(replacement);
        } else {
            changes.push((anchor_pos, anchor_pos, replacement));
        }
    } else {
        let start = dels[0];
        let end = start + dels.len();
        dels.clear();
        changes.push((start, end, replacement));
    }
}

fn flush_trailing<'a>(
    dels: &mut Vec<usize>,
    inserts: &mut Vec<usize>,
    suffix: &mut Vec<&'a [u8]>,
    changes: &mut Vec<Change<'a>>,
    other_lines: &[&'a [u8]],
) {
    if dels.is_empty() && inserts.is_empty() {
        return;
    }
    let replacement: Vec<&[u8]> = inserts.drain(..).map(|i| other_lines[i]).collect();
    if dels.is_empty() {
        suffix.extend(replacement);
    } else {
        let start = dels[0];
        let end = start + dels.len();
        changes.push((start, end, replacement));
    }
}

/// builds `(prefix, interior changes, suffix)` from an ancestor→other edit script, per
/// §4.3 step 2. Interior changes are spans over ancestor coordinates; prefix/suffix are
/// pure insertions before the first or after the last ancestor line the script touches.
fn build_changes<'a>(edits: &[Edit], other_lines: &[&'a [u8]]) -> (Vec<&'a [u8]>, Vec<Change<'a>>, Vec<&'a [u8]>) {
    let mut prefix = Vec::new();
    let mut suffix = Vec::new();
    let mut changes = Vec::new();
    let mut dels: Vec<usize> = Vec::new();
    let mut inserts: Vec<usize> = Vec::new();
    let mut seen_anchor = false;

    for edit in edits {
        match *edit {
            Edit::Equal { a_idx, .. } => {
                flush_group(
                    &mut dels,
                    &mut inserts,
                    seen_anchor,
                    a_idx,
                    &mut prefix,
                    &mut changes,
                    other_lines,
                );
                seen_anchor = true;
            }
            Edit::Delete { a_idx } => dels.push(a_idx),
            Edit::Insert { b_idx } => inserts.push(b_idx),
        }
    }
    flush_trailing(&mut dels, &mut inserts, &mut suffix, &mut changes, other_lines);
    (prefix, changes, suffix)
}

/// merges the interior change lists from both sides against the shared ancestor, per
/// §4.3 step 3: overlapping/touching spans from either side cluster together; a cluster
/// touched by one side only takes that side; a cluster touched identically by both
/// (same span, same replacement) collapses to one copy; anything else is a conflict.
fn merge_changes<'a>(
    ancestor_lines: &[&'a [u8]],
    left: Vec<Change<'a>>,
    right: Vec<Change<'a>>,
) -> Result<Vec<&'a [u8]>> {
    #[derive(Clone, Copy)]
    enum Side {
        Left,
        Right,
    }
    let mut events: Vec<(usize, usize, Side, usize)> = Vec::new();
    for (i, c) in left.iter().enumerate() {
        events.push((c.0, c.1, Side::Left, i));
    }
    for (i, c) in right.iter().enumerate() {
        events.push((c.0, c.1, Side::Right, i));
    }
    events.sort_by_key(|e| (e.0, e.1));

    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut idx = 0usize;
    while idx < events.len() {
        let mut cluster_end = events[idx].1;
        let cluster_start = events[idx].0;
        let mut members = vec![idx];
        let mut j = idx + 1;
        while j < events.len() && events[j].0 <= cluster_end {
            cluster_end = cluster_end.max(events[j].1);
            members.push(j);
            j += 1;
        }

        out.extend_from_slice(&ancestor_lines[pos..cluster_start]);

        let lefts: Vec<&Change<'a>> = members
            .iter()
            .filter_map(|&m| matches!(events[m].2, Side::Left).then(|| &left[events[m].3]))
            .collect();
        let rights: Vec<&Change<'a>> = members
            .iter()
            .filter_map(|&m| matches!(events[m].2, Side::Right).then(|| &right[events[m].3]))
            .collect();

        match (lefts.len(), rights.len()) {
            (_, 0) =>
                for c in &lefts {
                    out.extend_from_slice(&c.2);
                },
            (0, _) =>
                for c in &rights {
                    out.extend_from_slice(&c.2);
                },
            (1, 1) if lefts[0].0 == rights[0].0 && lefts[0].1 == rights[0].1 && lefts[0].2 == rights[0].2 =>
                out.extend_from_slice(&lefts[0].2),
            _ => bail!("merge conflict in ancestor lines [{}, {})", cluster_start, cluster_end),
        }

        pos = cluster_end;
        idx = j;
    }
    out.extend_from_slice(&ancestor_lines[pos..]);
    Ok(out)
}

/// performs the three-way merge described by §4.3. Returns `Conflict` (not an error) for
/// an unresolvable content conflict; returns an error only for the binary-guard
/// rejection, which is a precondition failure rather than a mergeable outcome.
pub fn merge3(limits: &Limits, ancestor: &[u8], left: &[u8], right: &[u8]) -> Result<MergeOutcome> {
    for blob in [ancestor, left, right] {
        if looks_binary(blob, limits.binary_guard_bytes) {
            bail!("refusing to three-way merge binary content");
        }
    }

    let ancestor_lines = split_lines(ancestor);
    let left_lines = split_lines(left);
    let right_lines = split_lines(right);

    let mut interner = LineInterner::default();
    let ancestor_ids = interner.intern_all(&ancestor_lines);
    let left_ids = interner.intern_all(&left_lines);
    let right_ids = interner.intern_all(&right_lines);

    let edits_left = myers::diff(&ancestor_ids, &left_ids);
    let edits_right = myers::diff(&ancestor_ids, &right_ids);

    let (left_prefix, left_changes, left_suffix) = build_changes(&edits_left, &left_lines);
    let (right_prefix, right_changes, right_suffix) = build_changes(&edits_right, &right_lines);

    let merged_middle = match merge_changes(&ancestor_lines, left_changes, right_changes) {
        Ok(lines) => lines,
        Err(_) => return Ok(MergeOutcome::Conflict),
    };

    let prefix = match merge_edge(left_prefix, right_prefix) {
        Some(lines) => lines,
        None => return Ok(MergeOutcome::Conflict),
    };
    let suffix = match merge_edge(left_suffix, right_suffix) {
        Some(lines) => lines,
        None => return Ok(MergeOutcome::Conflict),
    };

    let mut out = Vec::new();
    for line in prefix.into_iter().chain(merged_middle).chain(suffix) {
        out.extend_from_slice(line);
    }
    Ok(MergeOutcome::Merged(out))
}

/// reconciles a prefix or suffix pure-insertion from both sides: empty on one side takes
/// the other verbatim; identical on both collapses to one copy; anything else is a
/// conflicting prefix/suffix per §4.3 step 3.
fn merge_edge<'a>(left: Vec<&'a [u8]>, right: Vec<&'a [u8]>) -> Option<Vec<&'a [u8]>> {
    if left.is_empty() {
        Some(right)
    } else if right.is_empty() || left == right {
        Some(left)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits::default()
    }

    #[test]
    fn non_overlapping_edits_merge_cleanly() {
        let ancestor = b"a\nb\nc\n";
        let left = b"A\nb\nc\n";
        let right = b"a\nb\nC\n";
        match merge3(&limits(), ancestor, left, right).unwrap() {
            MergeOutcome::Merged(out) => assert_eq!(out, b"A\nb\nC\n"),
            MergeOutcome::Conflict => panic!("expected a clean merge"),
        }
    }

    #[test]
    fn identical_edits_on_both_sides_collapse() {
        let ancestor = b"a\nb\n";
        let left = b"a\nB\n";
        let right = b"a\nB\n";
        match merge3(&limits(), ancestor, left, right).unwrap() {
            MergeOutcome::Merged(out) => assert_eq!(out, b"a\nB\n"),
            MergeOutcome::Conflict => panic!("expected identical edits to collapse"),
        }
    }

    #[test]
    fn conflicting_edits_on_the_same_line_report_conflict() {
        let ancestor = b"a\n";
        let left = b"left\n";
        let right = b"right\n";
        assert_eq!(merge3(&limits(), ancestor, left, right).unwrap(), MergeOutcome::Conflict);
    }

    #[test]
    fn binary_content_is_rejected() {
        let ancestor = b"a\n";
        let left: &[u8] = &[0x00, 0x01, b'\n'];
        assert!(merge3(&limits(), ancestor, left, ancestor).is_err());
    }

    #[test]
    fn insertions_at_both_ends_are_both_kept() {
        let ancestor = b"b\n";
        let left = b"a\nb\n";
        let right = b"b\nc\n";
        match merge3(&limits(), ancestor, left, right).unwrap() {
            MergeOutcome::Merged(out) => assert_eq!(out, b"a\nb\nc\n"),
            MergeOutcome::Conflict => panic!("expected prefix/suffix insertions to both survive"),
        }
    }

    #[test]
    fn conflicting_prefix_insertions_report_conflict() {
        let ancestor = b"b\n";
        let left = b"a\nb\n";
        let right = b"z\nb\n";
        assert_eq!(merge3(&limits(), ancestor, left, right).unwrap(), MergeOutcome::Conflict);
    }

    #[test]
    fn identical_prefix_insertions_collapse() {
        let ancestor = b"b\n";
        let left = b"a\nb\n";
        let right = b"a\nb\n";
        match merge3(&limits(), ancestor, left, right).unwrap() {
            MergeOutcome::Merged(out) => assert_eq!(out, b"a\nb\n"),
            MergeOutcome::Conflict => panic!("expected identical prefixes to collapse"),
        }
    }
}
