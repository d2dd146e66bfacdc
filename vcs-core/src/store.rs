//! The abstract interfaces the core is specified against (§6) rather than against any
//! concrete storage/transport/ancestry implementation, plus the `Limits` configuration
//! surface (§12).

use crate::error::Result;
use crate::hash::{ContentHash, RevisionId};
use std::collections::BTreeSet;

/// a content-addressed blob + delta store, consumed by [`crate::reconstruction`].
pub trait Store {
    fn exists(&self, hash: ContentHash) -> bool;
    fn get_full(&self, hash: ContentHash) -> Result<Vec<u8>>;
    fn get_delta(&self, from: ContentHash, to: ContentHash) -> Result<Vec<u8>>;
    fn reconstruct(&self, hash: ContentHash) -> Result<Vec<u8>>;
    fn put_full(&mut self, hash: ContentHash, blob: Vec<u8>) -> Result<()>;
    fn put_delta(&mut self, from: ContentHash, to: ContentHash, delta: Vec<u8>) -> Result<()>;
    fn is_base(&self, hash: ContentHash) -> bool;
    fn successors(&self, hash: ContentHash) -> BTreeSet<ContentHash>;
}

/// reports the two disjoint uncommon-ancestor sets roster merge (§4.4) needs to decide
/// lifecycle and scalar-merge outcomes.
pub trait AncestryOracle {
    fn uncommon_ancestors(
        &self,
        a: RevisionId,
        b: RevisionId,
    ) -> (BTreeSet<RevisionId>, BTreeSet<RevisionId>);
}

/// the handful of numeric/constant knobs the core owns (§12): no config file format, no
/// environment parsing, just a struct algorithms take by reference so a host crate can
/// override them without forking.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_path_depth: usize,
    pub bookkeeping_name: &'static str,
    pub binary_guard_bytes: &'static [u8],
}

/// the control-plane codepoints the §4.3 binary-file guard tests for: the same set
/// `original_source/diff_patch.cc`'s `guess_binary` uses, i.e. every C0 byte except the
/// ones that legitimately occur in text (`\t \n \v \f \r` and ESC).
const BINARY_GUARD_BYTES: &[u8] =
    &[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0e, 0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15,
      0x16, 0x17, 0x18, 0x19, 0x1a, 0x1c, 0x1d, 0x1e, 0x1f];

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_path_depth: crate::path::MAX_PATH_DEPTH,
            bookkeeping_name: crate::path::BOOKKEEPING_NAME,
            binary_guard_bytes: BINARY_GUARD_BYTES,
        }
    }
}
