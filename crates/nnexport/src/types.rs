//! Shared type definitions for the nnexport crate
//!
//! Ordered hash collections are used wherever the iteration order ends up in
//! generated source code, so that the same architecture always produces the
//! same program.

use std::hash::BuildHasherDefault;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

/// Insertion-ordered map backed by the Fx hasher
pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Insertion-ordered set backed by the Fx hasher
pub type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;
