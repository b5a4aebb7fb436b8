//! The sparse paged memory and its inter-page Merkle tree.

use std::{fmt, io};

use ethereum_types::H256;
use hashbrown::HashMap;
use log::trace;
use thiserror::Error;

use crate::{
    page::{
        CachedPage, Page, PAGE_ADDR_MASK, PAGE_ADDR_SIZE, PAGE_KEY_MASK, PAGE_KEY_SIZE, PAGE_SIZE,
    },
    utils::{bit_length, hash_pair, zero_hash_at, Address, Gindex, PageIndex, LEAF_GINDEX_BITS},
};

/// Number of 32-byte entries in a memory proof: the leaf followed by one
/// sibling per level of the tree.
pub const PROOF_LEN: usize = LEAF_GINDEX_BITS;

/// Size in bytes of a memory proof.
pub const MEM_PROOF_SIZE: usize = PROOF_LEN * 32;

/// Page-lookup cache key that never matches a real page index.
const INVALID_PAGE_KEY: PageIndex = !0;

/// Stores the result of memory operations. Returns a [`MemoryError`] upon
/// failure.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// An error type for memory operations.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum MemoryError {
    /// Gindex `0` does not name a node; the root is `1`.
    #[error("gindex 0 is not a tree node")]
    GindexZero,

    /// The gindex addresses a node below the leaves of the tree it was
    /// queried on.
    #[error("gindex too deep: {0:#x}")]
    GindexTooDeep(Gindex),

    /// The gindex addresses the interior of a page at a depth that cannot be
    /// reached through the inter-page tree.
    #[error("cannot jump into intermediate node of page: {0:#x}")]
    GindexIntermediatePage(Gindex),

    /// The access is not aligned to the width of the value being accessed.
    #[error("unaligned memory access of {width} bytes at {address:#x}")]
    UnalignedAccess {
        /// The offending address.
        address: Address,
        /// Width of the access in bytes.
        width: usize,
    },

    /// A page index that does not fit into the page key space.
    #[error("page index out of range: {0:#x}")]
    PageIndexOutOfRange(PageIndex),

    /// A serialized memory contains the same page twice.
    #[error("cannot load duplicate page, entry {entry}, page index {index}")]
    DuplicatePage {
        /// Position of the offending entry in the input.
        entry: usize,
        /// The repeated page index.
        index: PageIndex,
    },

    /// A page body is not exactly `2 * PAGE_SIZE` hex characters.
    #[error("malformed page hex ({len} characters): {reason}")]
    MalformedPageHex {
        /// Number of hex characters received.
        len: usize,
        /// Why decoding failed.
        reason: String,
    },
}

/// Sparse 64-bit memory backed by 4096-byte pages.
///
/// The memory is committed to by a binary Merkle tree of depth
/// [`PAGE_KEY_SIZE`] whose leaves are the page roots; the page at index `p`
/// sits at gindex `(1 << PAGE_KEY_SIZE) | p`. `nodes` only tracks subtrees
/// that contain at least one allocated page: a missing entry means the subtree
/// is all zero, and `None` means its hash is stale.
///
/// Hash queries refill internal caches and therefore take `&mut self`.
#[derive(Clone)]
pub struct Memory {
    nodes: HashMap<Gindex, Option<H256>>,
    pages: HashMap<PageIndex, Box<CachedPage>>,
    /// The two most recently looked up page indices, most recent first.
    last_page_keys: [PageIndex; 2],
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            pages: HashMap::new(),
            last_page_keys: [INVALID_PAGE_KEY; 2],
        }
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("pages", &self.pages.len())
            .field("nodes", &self.nodes.len())
            .field("last_page_keys", &self.last_page_keys)
            .finish()
    }
}

impl PartialEq for Memory {
    /// Two memories are equal when they hold the same pages with the same
    /// contents. Cache state is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.pages.len() == other.pages.len()
            && self.pages.iter().all(|(index, page)| {
                other
                    .pages
                    .get(index)
                    .map_or(false, |other_page| other_page.data == page.data)
            })
    }
}

impl Eq for Memory {}

impl Memory {
    /// Creates an empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of allocated pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Returns the keys held by the two-slot page-lookup cache, most recent
    /// first. Empty slots hold `!0`.
    pub const fn last_page_keys(&self) -> [PageIndex; 2] {
        self.last_page_keys
    }

    /// Allocated pages in ascending page-index order.
    pub fn sorted_pages(&self) -> Vec<(PageIndex, &CachedPage)> {
        let mut pages: Vec<_> = self
            .pages
            .iter()
            .map(|(index, page)| (*index, &**page))
            .collect();
        pages.sort_unstable_by_key(|(index, _)| *index);
        pages
    }

    /// Calls `f` for every allocated page in ascending page-index order.
    pub fn for_each_page<F: FnMut(PageIndex, &CachedPage)>(&self, mut f: F) {
        for (index, page) in self.sorted_pages() {
            f(index, page);
        }
    }

    /// Human readable size of the allocated memory, e.g. `"4.0 KiB"`.
    pub fn usage(&self) -> String {
        const UNIT: u64 = 1024;

        let total = self.pages.len() as u64 * PAGE_SIZE as u64;
        if total < UNIT {
            return format!("{} B", total);
        }

        let mut div = UNIT;
        let mut exp = 0;
        let mut n = total / UNIT;
        while n >= UNIT {
            div *= UNIT;
            exp += 1;
            n /= UNIT;
        }
        let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
        format!("{:.1} {}iB", total as f64 / div as f64, prefix)
    }

    /// Moves `page_index` to the front of the page-lookup cache and reports
    /// whether the page exists.
    fn touch_page(&mut self, page_index: PageIndex) -> bool {
        // Pages are never freed, so a cached key always names a live page.
        if self.last_page_keys[0] == page_index {
            return true;
        }
        if self.last_page_keys[1] == page_index {
            self.last_page_keys.swap(0, 1);
            return true;
        }
        if !self.pages.contains_key(&page_index) {
            return false;
        }
        self.last_page_keys[1] = self.last_page_keys[0];
        self.last_page_keys[0] = page_index;
        true
    }

    /// Looks up a page, consulting the page-lookup cache first.
    pub fn page_lookup(&mut self, page_index: PageIndex) -> Option<&CachedPage> {
        if !self.touch_page(page_index) {
            return None;
        }
        self.pages.get(&page_index).map(|page| &**page)
    }

    /// Allocates a fresh zeroed page at `page_index`, replacing any page
    /// already there, and marks its path to the root as stale.
    ///
    /// # Panics
    ///
    /// Panics if `page_index` does not fit into [`PAGE_KEY_SIZE`] bits.
    pub fn alloc_page(&mut self, page_index: PageIndex) -> &mut CachedPage {
        assert!(
            page_index <= PAGE_KEY_MASK,
            "Page index out of range: {page_index:#x}"
        );
        trace!("Allocating page {:#x}", page_index);

        self.invalidate_page_path(page_index);
        let page = self.pages.entry(page_index).or_default();
        **page = CachedPage::default();
        page
    }

    /// Marks every inter-page node from the page's leaf up to the root as
    /// stale. Zero siblings stay implicit.
    fn invalidate_page_path(&mut self, page_index: PageIndex) {
        let mut key = (1 << PAGE_KEY_SIZE) | page_index;
        while key > 0 {
            self.nodes.insert(key, None);
            key >>= 1;
        }
    }

    /// Invalidates the cached hashes covering the 32-byte leaf that contains
    /// `address`. Does nothing if the page is not allocated.
    pub fn invalidate(&mut self, address: Address) {
        self.invalidate_range(address, 1);
    }

    /// Invalidates every leaf of a single page overlapping
    /// `address..address + len`.
    fn invalidate_range(&mut self, address: Address, len: usize) {
        let page_index = address >> PAGE_ADDR_SIZE;
        if !self.touch_page(page_index) {
            return;
        }
        let Some(page) = self.pages.get_mut(&page_index) else {
            return;
        };

        let was_valid = page.is_root_valid();
        let start = (address & PAGE_ADDR_MASK) as usize;
        let end = (start + len).min(PAGE_SIZE);
        for leaf_start in ((start & !31)..end).step_by(32) {
            page.invalidate(leaf_start as u64);
        }

        // A stale page root implies its path to the root is already stale.
        if was_valid {
            self.invalidate_page_path(page_index);
        }
    }

    /// Returns the page holding `address`, allocating it if needed, with the
    /// leaves covering `address..address + len` invalidated.
    fn page_for_write(&mut self, address: Address, len: usize) -> &mut CachedPage {
        let page_index = address >> PAGE_ADDR_SIZE;
        if !self.touch_page(page_index) {
            return self.alloc_page(page_index);
        }
        self.invalidate_range(address, len);
        self.pages.entry(page_index).or_default()
    }

    /// Computes the hash of the node at `gindex`.
    ///
    /// Gindices with a bit length above [`PAGE_KEY_SIZE`] address nodes
    /// inside a page and are answered by that page's own tree.
    pub fn merkleize_subtree(&mut self, gindex: Gindex) -> MemoryResult<H256> {
        let bits = bit_length(gindex);
        if bits == 0 {
            return Err(MemoryError::GindexZero);
        }
        if bits > PROOF_LEN {
            return Err(MemoryError::GindexTooDeep(gindex));
        }

        if bits > PAGE_KEY_SIZE {
            let depth_into_page = bits - 1 - PAGE_KEY_SIZE;
            let page_index = (gindex >> depth_into_page) & PAGE_KEY_MASK;
            return match self.pages.get_mut(&page_index) {
                Some(page) => {
                    let page_gindex =
                        (1 << depth_into_page) | (gindex & ((1 << depth_into_page) - 1));
                    page.merkleize_subtree(page_gindex)
                }
                None => Ok(zero_hash_at(bits)),
            };
        }

        if bits > PAGE_KEY_SIZE + 1 {
            return Err(MemoryError::GindexIntermediatePage(gindex));
        }

        Ok(self.merkleize_node(gindex))
    }

    /// Hashes a node of the inter-page tree, recursing left then right into
    /// stale children and memoizing the result.
    fn merkleize_node(&mut self, gindex: Gindex) -> H256 {
        let bits = bit_length(gindex);
        if bits == PAGE_KEY_SIZE + 1 {
            return match self.pages.get_mut(&(gindex & PAGE_KEY_MASK)) {
                Some(page) => page.merkle_root(),
                None => zero_hash_at(bits),
            };
        }

        match self.nodes.get(&gindex) {
            None => return zero_hash_at(bits),
            Some(Some(node)) => return *node,
            Some(None) => {}
        }

        let left = self.merkleize_node(gindex << 1);
        let right = self.merkleize_node((gindex << 1) | 1);
        let node = hash_pair(&left, &right);
        trace!("Refilled memory node {:#x}", gindex);
        self.nodes.insert(gindex, Some(node));
        node
    }

    /// Computes the root of the memory tree.
    pub fn merkle_root(&mut self) -> H256 {
        self.merkleize_node(1)
    }

    /// Builds a proof for the 32-byte leaf containing `address`: the leaf
    /// itself followed by its sibling at every level, from the bottom up.
    pub fn merkle_proof(&mut self, address: Address) -> MemoryResult<[u8; MEM_PROOF_SIZE]> {
        let mut proof = [0u8; MEM_PROOF_SIZE];

        let mut gindex = (1 << (PROOF_LEN - 1)) | (address >> 5);
        let leaf = self.merkleize_subtree(gindex)?;
        proof[..32].copy_from_slice(leaf.as_bytes());

        for chunk in proof[32..].chunks_exact_mut(32) {
            let sibling = self.merkleize_subtree(gindex ^ 1)?;
            chunk.copy_from_slice(sibling.as_bytes());
            gindex >>= 1;
        }
        Ok(proof)
    }

    /// Writes a little-endian doubleword. `address` must be 8-byte aligned.
    pub fn set_u64(&mut self, address: Address, value: u64) -> MemoryResult<()> {
        check_alignment(address, 8)?;
        let offset = (address & PAGE_ADDR_MASK) as usize;
        let page = self.page_for_write(address, 8);
        page.data.0[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads a little-endian doubleword. `address` must be 8-byte aligned.
    /// Unallocated memory reads as zero.
    pub fn get_u64(&mut self, address: Address) -> MemoryResult<u64> {
        check_alignment(address, 8)?;
        let mut buf = [0u8; 8];
        self.read_into(address, &mut buf);
        Ok(u64::from_le_bytes(buf))
    }

    /// Writes `data` starting at `address`, spanning pages as needed.
    pub fn set_unaligned(&mut self, mut address: Address, mut data: &[u8]) {
        while !data.is_empty() {
            let offset = (address & PAGE_ADDR_MASK) as usize;
            let n = data.len().min(PAGE_SIZE - offset);
            let page = self.page_for_write(address, n);
            page.data.0[offset..offset + n].copy_from_slice(&data[..n]);
            data = &data[n..];
            address = address.wrapping_add(n as u64);
        }
    }

    /// Reads `len` bytes starting at `address`.
    pub fn get_unaligned(&mut self, address: Address, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read_into(address, &mut out);
        out
    }

    fn read_into(&mut self, mut address: Address, mut out: &mut [u8]) {
        while !out.is_empty() {
            let offset = (address & PAGE_ADDR_MASK) as usize;
            let n = out.len().min(PAGE_SIZE - offset);
            let (head, tail) = out.split_at_mut(n);
            match self.page_lookup(address >> PAGE_ADDR_SIZE) {
                Some(page) => head.copy_from_slice(&page.data.0[offset..offset + n]),
                None => head.fill(0),
            }
            out = tail;
            address = address.wrapping_add(n as u64);
        }
    }

    /// Copies everything `reader` yields into memory starting at `address`.
    pub fn set_memory_range<R: io::Read>(
        &mut self,
        mut address: Address,
        mut reader: R,
    ) -> io::Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        loop {
            let room = PAGE_SIZE - (address & PAGE_ADDR_MASK) as usize;
            let n = match reader.read(&mut buf[..room]) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.set_unaligned(address, &buf[..n]);
            address = address.wrapping_add(n as u64);
        }
    }

    /// Returns a reader over `len` bytes of memory starting at `address`.
    pub fn read_memory_range(&mut self, address: Address, len: u64) -> MemoryRangeReader<'_> {
        MemoryRangeReader {
            memory: self,
            address,
            remaining: len,
        }
    }

    /// Builds a memory from `(page_index, page)` entries in the given order.
    /// Entries may come in any order but must not repeat a page index.
    pub fn from_pages<I>(entries: I) -> MemoryResult<Self>
    where
        I: IntoIterator<Item = (PageIndex, Page)>,
    {
        let mut memory = Self::new();
        for (entry, (index, data)) in entries.into_iter().enumerate() {
            memory.insert_loaded_page(entry, index, data)?;
        }
        Ok(memory)
    }

    pub(crate) fn insert_loaded_page(
        &mut self,
        entry: usize,
        index: PageIndex,
        data: Page,
    ) -> MemoryResult<()> {
        if index > PAGE_KEY_MASK {
            return Err(MemoryError::PageIndexOutOfRange(index));
        }
        if self.pages.contains_key(&index) {
            return Err(MemoryError::DuplicatePage { entry, index });
        }
        self.alloc_page(index).data = data;
        Ok(())
    }

    /// Serializes the memory as a JSON array of `{ "index", "data" }` objects
    /// in ascending page-index order.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a memory from the format written by [`Memory::to_json`].
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Checks that a `width`-byte access at `address` is naturally aligned.
fn check_alignment(address: Address, width: usize) -> MemoryResult<()> {
    match address & (width as u64 - 1) {
        0 => Ok(()),
        _ => Err(MemoryError::UnalignedAccess { address, width }),
    }
}

/// Checks a proof produced by [`Memory::merkle_proof`] against `root`.
pub fn verify_proof(root: H256, address: Address, proof: &[u8; MEM_PROOF_SIZE]) -> bool {
    let mut node = H256::from_slice(&proof[..32]);
    let mut path = address >> 5;
    for sibling in proof[32..].chunks_exact(32) {
        let sibling = H256::from_slice(sibling);
        node = match path & 1 {
            0 => hash_pair(&node, &sibling),
            _ => hash_pair(&sibling, &node),
        };
        path >>= 1;
    }
    node == root
}

/// Streams a range of [`Memory`]. Unallocated pages read as zeroes.
pub struct MemoryRangeReader<'a> {
    memory: &'a mut Memory,
    address: Address,
    remaining: u64,
}

impl fmt::Debug for MemoryRangeReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRangeReader")
            .field("address", &self.address)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl io::Read for MemoryRangeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let offset = (self.address & PAGE_ADDR_MASK) as usize;
        let n = (PAGE_SIZE - offset)
            .min(buf.len())
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        self.memory.read_into(self.address, &mut buf[..n]);
        self.address = self.address.wrapping_add(n as u64);
        self.remaining -= n as u64;
        Ok(n)
    }
}
