use owo_colors::OwoColorize;
use std::fmt::{self, Display, Formatter};

pub type Result<T> = std::result::Result<T, Error>;
pub type Error = anyhow::Error;

/// usually we can just use anyhow for errors, but sometimes its nice to have a "rust"
/// representation we can test or match against
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub enum CoreError {
    /// `detach_node`/`attach_node` couldn't resolve a path
    NoSuchPath(crate::path::SplitPath),
    /// `attach_node` found the target name already occupied
    PathExists(crate::path::SplitPath),
    /// `detach_node` on a directory that still has children
    NotEmpty(crate::path::SplitPath),
    /// `apply_delta` on a node that isn't a file
    NotAFile(crate::path::SplitPath),
    /// `apply_delta`'s `old` didn't match the node's current content
    StaleDelta { path: crate::path::SplitPath },
    /// `attach_node` would make a directory its own descendant
    DirectoryLoop(crate::path::SplitPath),
    /// a delta graph handed to `get_reconstruction_path` contains a cycle
    CycleInGraph,
    /// `get_reconstruction_path` started from a node with no path to any base
    Unreachable,
    /// a textual or binary input failed to parse or failed a well-formedness check
    Decode { pos: usize, expected: &'static str },
}

pub trait CoreErrorExt {
    fn is_invariant_violation(&self) -> bool;
    fn is_decode_error(&self) -> bool;
}

impl CoreErrorExt for Error {
    fn is_invariant_violation(&self) -> bool {
        match self.downcast_ref::<CoreError>() {
            Some(err) => !matches!(err, CoreError::Decode { .. }),
            None => false,
        }
    }

    fn is_decode_error(&self) -> bool {
        matches!(self.downcast_ref::<CoreError>(), Some(CoreError::Decode { .. }))
    }
}

impl<T> CoreErrorExt for Result<T> {
    fn is_invariant_violation(&self) -> bool {
        match self {
            Ok(..) => false,
            Err(err) => err.is_invariant_violation(),
        }
    }

    fn is_decode_error(&self) -> bool {
        match self {
            Ok(..) => false,
            Err(err) => err.is_decode_error(),
        }
    }
}

macro_rules! write_hint {
    ($f:expr, $($args:tt)*) => {{
        write!($f, "{}: ", "hint".yellow())?;
        writeln!($f, $($args)*)
    }};
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NoSuchPath(path) => write!(f, "no node exists at path `{}`", path),
            CoreError::PathExists(path) => write!(f, "a node already exists at path `{}`", path),
            CoreError::NotEmpty(path) => write!(f, "directory `{}` is not empty", path),
            CoreError::NotAFile(path) => write!(f, "`{}` is not a file", path),
            CoreError::StaleDelta { path } => {
                writeln!(f, "delta for `{}` does not apply to its current content", path)?;
                write_hint!(f, "the content was changed since the delta was recorded")
            }
            CoreError::DirectoryLoop(path) =>
                write!(f, "attaching `{}` here would make it its own ancestor", path),
            CoreError::CycleInGraph => write!(f, "delta graph contains a cycle"),
            CoreError::Unreachable => write!(f, "no base is reachable from the given node"),
            CoreError::Decode { pos, expected } =>
                write!(f, "decode error at byte {}: expected {}", pos, expected),
        }
    }
}

impl std::error::Error for CoreError {
}
