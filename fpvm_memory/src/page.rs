//! Fixed-size memory pages and their intra-page Merkle cache.

use std::{fmt, str::FromStr};

use ethereum_types::H256;
use keccak_hash::keccak;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    memory::{MemoryError, MemoryResult},
    utils::{hash_pair, Gindex, LEAF_SIZE},
};

/// Number of address bits addressing a byte within a page.
pub const PAGE_ADDR_SIZE: usize = 12;

/// Number of address bits selecting the page.
pub const PAGE_KEY_SIZE: usize = 64 - PAGE_ADDR_SIZE;

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_ADDR_SIZE;

/// Mask extracting the in-page offset of an address.
pub const PAGE_ADDR_MASK: u64 = PAGE_SIZE as u64 - 1;

/// Number of page slots in the address space.
pub const MAX_PAGE_COUNT: u64 = 1 << PAGE_KEY_SIZE;

/// Mask extracting a page index.
pub const PAGE_KEY_MASK: u64 = MAX_PAGE_COUNT - 1;

/// Number of 32-byte leaves in a page. Leaves occupy gindices
/// `PAGE_LEAF_COUNT..2 * PAGE_LEAF_COUNT` of the page tree.
pub const PAGE_LEAF_COUNT: usize = PAGE_SIZE / LEAF_SIZE;

/// The raw bytes of a page.
#[derive(Clone, Eq, PartialEq)]
pub struct Page(pub [u8; PAGE_SIZE]);

impl Default for Page {
    fn default() -> Self {
        Self([0; PAGE_SIZE])
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let non_zero = self.0.iter().filter(|b| **b != 0).count();
        write!(f, "Page({} non-zero bytes)", non_zero)
    }
}

impl Page {
    /// Lowercase hex encoding of the page, `2 * PAGE_SIZE` characters long.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a page from hex. A leading `0x` is tolerated, anything that
    /// does not decode to exactly [`PAGE_SIZE`] bytes is rejected.
    pub fn from_hex(s: &str) -> MemoryResult<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut page = Self::default();
        hex::decode_to_slice(digits, &mut page.0).map_err(|err| {
            MemoryError::MalformedPageHex {
                len: digits.len(),
                reason: err.to_string(),
            }
        })?;
        Ok(page)
    }
}

impl FromStr for Page {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Page {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Page {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

/// A [`Page`] together with the Merkle tree over its 128 leaves.
///
/// `cache[g]` holds the hash of the page-tree node with gindex `g` for
/// `1 <= g < PAGE_LEAF_COUNT`, and is only meaningful while `valid[g]` is set.
/// Leaves themselves are never cached; they are read straight from the page
/// data.
#[derive(Clone)]
pub struct CachedPage {
    /// The page contents.
    pub data: Page,
    cache: [H256; PAGE_LEAF_COUNT],
    valid: [bool; PAGE_LEAF_COUNT],
}

impl Default for CachedPage {
    fn default() -> Self {
        Self {
            data: Page::default(),
            cache: [H256::zero(); PAGE_LEAF_COUNT],
            valid: [false; PAGE_LEAF_COUNT],
        }
    }
}

impl fmt::Debug for CachedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedPage")
            .field("data", &self.data)
            .field("valid_nodes", &self.valid.iter().filter(|v| **v).count())
            .finish()
    }
}

impl From<Page> for CachedPage {
    fn from(data: Page) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }
}

impl CachedPage {
    /// Marks every cached node above the 32-byte leaf containing `page_addr`
    /// as stale.
    ///
    /// # Panics
    ///
    /// Panics if `page_addr` is not an offset within the page.
    pub fn invalidate(&mut self, page_addr: u64) {
        assert!(
            page_addr < PAGE_SIZE as u64,
            "Invalid page address: {page_addr:#x}"
        );

        // The lowest cached level holds the hash of two 32-byte leaves, so a
        // 64-byte span of the page maps onto a single node.
        let mut k = ((1 << PAGE_ADDR_SIZE) | page_addr) >> 6;
        while k > 0 {
            self.valid[k as usize] = false;
            k >>= 1;
        }
    }

    /// Marks the whole page tree as stale.
    pub fn invalidate_full(&mut self) {
        self.valid = [false; PAGE_LEAF_COUNT];
    }

    /// Whether the cached page root is up to date.
    pub const fn is_root_valid(&self) -> bool {
        self.valid[1]
    }

    /// Computes the page root, refilling any stale cache entries.
    pub fn merkle_root(&mut self) -> H256 {
        // Hash pairs of leaves into the bottom cached level.
        let bottom = PAGE_LEAF_COUNT / 2;
        for (i, chunk) in self.data.0.chunks_exact(2 * LEAF_SIZE).enumerate() {
            let j = bottom + i;
            if self.valid[j] {
                continue;
            }
            self.cache[j] = keccak(chunk);
            self.valid[j] = true;
        }

        // Then fold every level into its parent, right to left.
        for i in (2..PAGE_LEAF_COUNT).step_by(2).rev() {
            let j = i >> 1;
            if self.valid[j] {
                continue;
            }
            self.cache[j] = hash_pair(&self.cache[i], &self.cache[i + 1]);
            self.valid[j] = true;
        }

        self.cache[1]
    }

    /// Returns the hash of the page-tree node at `gindex`. Gindices
    /// `PAGE_LEAF_COUNT..2 * PAGE_LEAF_COUNT` are the raw 32-byte leaves.
    pub fn merkleize_subtree(&mut self, gindex: Gindex) -> MemoryResult<H256> {
        // Fills up the cache.
        self.merkle_root();

        let leaf_count = PAGE_LEAF_COUNT as Gindex;
        if gindex == 0 {
            return Err(MemoryError::GindexZero);
        }
        if gindex >= 2 * leaf_count {
            return Err(MemoryError::GindexTooDeep(gindex));
        }
        if gindex >= leaf_count {
            let offset = (gindex - leaf_count) as usize * LEAF_SIZE;
            return Ok(H256::from_slice(&self.data.0[offset..offset + LEAF_SIZE]));
        }
        Ok(self.cache[gindex as usize])
    }
}
