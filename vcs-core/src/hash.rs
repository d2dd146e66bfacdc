use crate::error::Error;
use rustc_hash::FxHasher;
use rustc_hex::{FromHex, ToHex};
use sha1::{Digest as _, Sha1};
use std::convert::TryInto;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::Hasher;
use std::ops::Index;
use std::slice::SliceIndex;
use std::str::FromStr;

pub const DIGEST_SIZE: usize = 20;

/// a fixed-width opaque hash; equality is byte-equality.
///
/// used both as a content hash (identifying a blob in the content store) and as a
/// revision id (identifying a point in the ancestry DAG); the two domains never mix
/// values but share this representation, exactly as the spec's data model treats them
/// as "opaque content hashes (fixed-width binary)".
#[derive(PartialEq, Eq, Hash, Clone, Ord, PartialOrd, Copy)]
#[repr(transparent)]
pub struct Digest([u8; DIGEST_SIZE]);

pub type ContentHash = Digest;
pub type RevisionId = Digest;

impl Digest {
    /// the null/unknown hash; used as the `content` of a freshly created, not-yet-written file node
    pub const UNKNOWN: Self = Self([0; DIGEST_SIZE]);

    #[inline]
    pub fn new(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    #[inline]
    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }

    #[inline]
    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    pub fn short(&self) -> String {
        self.to_hex()[0..7].to_owned()
    }
}

#[cfg(test)]
impl<'a> From<&'a str> for Digest {
    fn from(s: &'a str) -> Self {
        Self::from_str(s).unwrap()
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for Digest {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self((0..DIGEST_SIZE).map(|_| u8::arbitrary(g)).collect::<Vec<_>>().try_into().unwrap())
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end();
        ensure!(s.len() == DIGEST_SIZE * 2, "invalid hash string (incorrect length)");
        let bytes = s.from_hex::<arrayvec::ArrayVec<u8, DIGEST_SIZE>>()?;
        Ok(Self(bytes.into_inner().map_err(|_| anyhow!("invalid hash string"))?))
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<I> Index<I> for Digest
where
    I: SliceIndex<[u8]>,
{
    type Output = I::Output;

    fn index(&self, index: I) -> &Self::Output {
        &self.0[index]
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let hex = self.0.to_hex::<String>();
        if f.alternate() { write!(f, "{}", &hex[..7]) } else { write!(f, "{}", hex) }
    }
}

pub fn hash_bytes(bytes: impl AsRef<[u8]>) -> Digest {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    Digest::new(hasher.finalize().into())
}

pub trait MakeHash {
    fn mk_fx_hash(&self) -> u64;
}

impl<H: std::hash::Hash + ?Sized> MakeHash for H {
    #[inline]
    fn mk_fx_hash(&self) -> u64 {
        let mut state = FxHasher::default();
        self.hash(&mut state);
        state.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn digest_round_trips_through_display(d: Digest) -> bool {
        d.to_string().parse::<Digest>().unwrap() == d
    }
}
