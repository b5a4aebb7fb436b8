//! JSON representation of [`Memory`]: an array of `{ "index", "data" }`
//! objects, one per allocated page, in ascending page-index order.

use std::fmt;

use log::debug;
use serde::{
    de::{Error as _, SeqAccess, Visitor},
    ser::SerializeSeq,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::{memory::Memory, page::Page, utils::PageIndex};

#[derive(Serialize)]
struct PageEntryRef<'a> {
    index: PageIndex,
    data: &'a Page,
}

#[derive(Deserialize)]
struct PageEntry {
    index: PageIndex,
    data: Page,
}

impl Serialize for Memory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let pages = self.sorted_pages();
        let mut seq = serializer.serialize_seq(Some(pages.len()))?;
        for (index, page) in pages {
            seq.serialize_element(&PageEntryRef {
                index,
                data: &page.data,
            })?;
        }
        seq.end()
    }
}

struct MemoryVisitor;

impl<'de> Visitor<'de> for MemoryVisitor {
    type Value = Memory;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of memory pages")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        // Pages are loaded as they are read so the whole array is never
        // buffered.
        let mut memory = Memory::new();
        let mut entry = 0;
        while let Some(PageEntry { index, data }) = seq.next_element()? {
            memory
                .insert_loaded_page(entry, index, data)
                .map_err(A::Error::custom)?;
            entry += 1;
        }
        debug!("Loaded {} memory pages ({})", entry, memory.usage());
        Ok(memory)
    }
}

impl<'de> Deserialize<'de> for Memory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(MemoryVisitor)
    }
}
