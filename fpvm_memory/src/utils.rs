//! Hashing primitives and index arithmetic shared by the page and memory
//! trees.

use ethereum_types::H256;
use keccak_hash::keccak;
use once_cell::sync::Lazy;

/// A generalized index into a complete binary tree (root = `1`).
pub type Gindex = u64;

/// A byte address in the 64-bit memory space.
pub type Address = u64;

/// The index of a page slot, i.e. `address >> PAGE_ADDR_SIZE`.
pub type PageIndex = u64;

/// Size in bytes of a leaf of the memory tree.
pub const LEAF_SIZE: usize = 32;

/// Number of entries in [`ZERO_HASHES`].
pub const ZERO_HASH_COUNT: usize = 256;

/// Bit length of the gindex of a 32-byte leaf of the full memory tree.
///
/// There are `2^64 / 2^5` leaves, so the leaf level sits `64 - 5` levels below
/// the root, whose gindex has a bit length of one.
pub const LEAF_GINDEX_BITS: usize = 64 - 5 + 1;

/// `ZERO_HASHES[k]` is the root of a tree of height `k` whose 32-byte leaves
/// are all zero.
pub static ZERO_HASHES: Lazy<[H256; ZERO_HASH_COUNT]> = Lazy::new(|| {
    let mut hashes = [H256::zero(); ZERO_HASH_COUNT];
    for k in 1..ZERO_HASH_COUNT {
        hashes[k] = hash_pair(&hashes[k - 1], &hashes[k - 1]);
    }
    hashes
});

/// Returns `keccak(left || right)`.
pub fn hash_pair(left: &H256, right: &H256) -> H256 {
    let mut buf = [0u8; 2 * LEAF_SIZE];
    buf[..LEAF_SIZE].copy_from_slice(left.as_bytes());
    buf[LEAF_SIZE..].copy_from_slice(right.as_bytes());
    keccak(buf)
}

/// Number of bits needed to represent `gindex`. The root has a bit length of
/// one, and a node's depth below the root is `bit_length - 1`.
pub const fn bit_length(gindex: Gindex) -> usize {
    (u64::BITS - gindex.leading_zeros()) as usize
}

/// Hash of an entirely unpopulated subtree rooted at a node of bit length
/// `bits`.
///
/// Such a node has `LEAF_GINDEX_BITS - bits` levels of descendants down to the
/// 32-byte leaves, which is exactly the height indexed by [`ZERO_HASHES`].
/// Callers must ensure `bits <= LEAF_GINDEX_BITS`.
pub(crate) fn zero_hash_at(bits: usize) -> H256 {
    ZERO_HASHES[LEAF_GINDEX_BITS - bits]
}
