//! A sparse, byte-addressable 64-bit memory whose contents are committed by a
//! fixed-shape binary Keccak-256 Merkle tree.
//!
//! The address space is split into 4096-byte [`Page`]s. Each page is itself a
//! small Merkle tree over 128 leaves of 32 bytes (see [`CachedPage`]), and the
//! page roots are the leaves of a 52-level tree spanning every possible page
//! index (see [`Memory`]). Nodes are addressed by *generalized index*
//! (gindex): the root is `1` and the children of `g` are `2g` and `2g + 1`.
//!
//! Hashes are computed lazily. Writes only mark the affected paths as stale,
//! and the next root or proof query refills whatever was invalidated. Subtrees
//! that contain no allocated page are never stored; their hash comes from a
//! precomputed table of [`ZERO_HASHES`](utils::ZERO_HASHES).

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod memory;
mod memory_json;
pub mod page;
pub mod utils;

pub use memory::{Memory, MemoryError, MemoryResult};
pub use page::{CachedPage, Page};
