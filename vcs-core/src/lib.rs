#![deny(rust_2018_idioms)]

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate log;

#[cfg(test)]
extern crate quickcheck;

#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

#[macro_use]
mod macros;

mod interner;

pub mod conflict;
pub mod cset;
pub mod error;
pub mod hash;
pub mod ids;
pub mod merge3;
pub mod myers;
pub mod node;
pub mod parallel_iter;
pub mod path;
pub mod reconstruction;
pub mod roster;
pub mod roster_delta;
pub mod roster_io;
pub mod roster_merge;
pub mod store;
pub mod textio;
