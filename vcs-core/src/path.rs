use crate::interner::intern_str;
use std::fmt::{self, Debug, Display, Formatter};

/// the reserved bookkeeping component; may never appear as a direct child of the root
/// in a committed roster (see [`crate::error::CoreError`] and the `invalid_name_conflict`
/// case of roster merge).
pub const BOOKKEEPING_NAME: &str = "_MTN";

/// the bound referenced by the node invariant in the data model and by `Roster::sane`.
pub const MAX_PATH_DEPTH: usize = 4096;

/// an interned, non-empty path component. never contains `/`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathComponent(&'static str);

impl PathComponent {
    pub fn intern(s: impl AsRef<str>) -> Self {
        let s = s.as_ref();
        debug_assert!(!s.is_empty(), "path components must be non-empty");
        debug_assert!(!s.contains('/'), "path components must not contain '/'");
        Self(intern_str(s))
    }

    pub fn as_str(self) -> &'static str {
        self.0
    }

    pub fn is_bookkeeping(self) -> bool {
        self.0 == BOOKKEEPING_NAME
    }
}

impl PartialOrd for PathComponent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathComponent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(other.0)
    }
}

impl Debug for PathComponent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for PathComponent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// an ordered sequence of path components rooted at the synthetic empty root.
///
/// `Ord` is the natural lexicographic (prefix, then length) order over the component
/// sequence: this is exactly the ascending order the textual stanza format (§4.7)
/// requires and the scheduling order cset application (§4.2) sorts by path length on.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SplitPath(Vec<PathComponent>);

impl SplitPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn components(&self) -> &[PathComponent] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn name(&self) -> Option<PathComponent> {
        self.0.last().copied()
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn join(&self, component: PathComponent) -> Self {
        let mut v = self.0.clone();
        v.push(component);
        Self(v)
    }

    pub fn from_components(components: impl IntoIterator<Item = PathComponent>) -> Self {
        Self(components.into_iter().collect())
    }

    /// whether `self` is an ancestor of (or equal to) `other`
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl Debug for SplitPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for SplitPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "");
        }
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl<'a> From<&'a str> for SplitPath {
    fn from(s: &'a str) -> Self {
        if s.is_empty() {
            Self::root()
        } else {
            Self(s.split('/').map(PathComponent::intern).collect())
        }
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for PathComponent {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        let choices = ["a", "b", "c", "foo", "bar", "baz", "quux"];
        Self::intern(*g.choose(&choices).unwrap())
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for SplitPath {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        let len = usize::arbitrary(g) % 4;
        Self((0..len).map(|_| PathComponent::arbitrary(g)).collect())
    }
}
