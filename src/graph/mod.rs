#![forbid(unsafe_code)]
//! In-memory graph state and traversal.

mod index;
mod path;

pub use index::{EdgeOutcome, GraphIndex};
pub use path::PathFinder;
