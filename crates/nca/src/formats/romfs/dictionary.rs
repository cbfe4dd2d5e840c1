use crate::formats::romfs::structs::{RomFsEntry, RomOffset};
use crate::storage::{ReadStorage, ReadStorageExt, StorageError};
use binrw::{BinRead, BinWrite};
use std::marker::PhantomData;
use tracing::warn;

/// One of the RomFS name dictionaries: a hash-bucket table over entries
/// keyed by (parent entry offset, name).
#[derive(Debug)]
pub struct RomDictionary<T> {
    buckets: Vec<RomOffset>,
    entries: Vec<u8>,
    phantom: PhantomData<T>,
}

impl<T> RomDictionary<T>
where
    T: for<'a> BinRead<Args<'a> = ()> + for<'a> BinWrite<Args<'a> = ()> + 'static,
{
    pub fn new(buckets: Vec<RomOffset>, entries: Vec<u8>) -> Self {
        Self {
            buckets,
            entries,
            phantom: PhantomData,
        }
    }

    pub fn from_storage(
        buckets: impl ReadStorage,
        entries: impl ReadStorage,
    ) -> Result<Self, StorageError> {
        let buckets = buckets
            .read_all()?
            .chunks_exact(4)
            .map(|c| RomOffset(u32::from_le_bytes(c.try_into().unwrap())))
            .collect();
        let entries = entries.read_all()?;

        Ok(Self::new(buckets, entries))
    }

    /// Hash-chain lookup; `None` on a missed or damaged chain.
    pub fn find(&self, key: RomEntryKey) -> Option<(&str, RomOffset)> {
        if self.buckets.is_empty() {
            return None;
        }

        let hash = key.hash();
        let index = hash as usize % self.buckets.len();
        let mut id = self.buckets[index];

        while id.is_some() {
            let (name, entry) = self.entry(id)?;

            if entry.parent == key.parent && name == key.name {
                return Some((name, id));
            }

            id = entry.hash_next;
        }

        None
    }

    /// Reads the entry at the given table offset, `None` when the offset
    /// or the name it carries does not fit the table.
    pub fn entry(&self, id: RomOffset) -> Option<(&str, RomFsEntry<T>)> {
        assert!(id.is_some());

        let mut cur = std::io::Cursor::new(&self.entries);
        cur.set_position(id.0 as u64);

        let entry = match RomFsEntry::read(&mut cur) {
            Ok(entry) => entry,
            Err(_) => {
                warn!("RomFS metadata entry at {:#x} is out of bounds", id.0);
                return None;
            }
        };

        let name = self
            .entries
            .get(cur.position() as usize..)
            .and_then(|tail| tail.get(..entry.name_length as usize));
        let Some(name) = name.and_then(|name| std::str::from_utf8(name).ok()) else {
            warn!("RomFS metadata entry at {:#x} has a malformed name", id.0);
            return None;
        };

        Some((name, entry))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RomEntryKey<'a> {
    pub name: &'a str,
    pub parent: RomOffset,
}

impl<'a> RomEntryKey<'a> {
    pub fn hash(&self) -> u32 {
        let mut hash = 123456789 ^ self.parent.0;

        for c in self.name.bytes() {
            hash = (c as u32) ^ ((hash << 27) | (hash >> 5));
        }

        hash
    }
}

#[cfg(test)]
mod tests {
    use super::RomEntryKey;
    use crate::formats::romfs::structs::RomOffset;

    #[test]
    fn hash_mixes_the_parent_offset() {
        let a = RomEntryKey {
            name: "same",
            parent: RomOffset(0),
        };
        let b = RomEntryKey {
            name: "same",
            parent: RomOffset(0x18),
        };
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.hash());
    }
}
