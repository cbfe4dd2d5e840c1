use crate::hexstring::HexData;
use binrw::{BinRead, BinWrite};
use itertools::Itertools;
use snafu::{ResultExt, Snafu};
use std::io::Cursor;

/// Bucket tree blocks are built out of fixed 0x4000-byte nodes.
pub const BUCKET_SIZE: usize = 0x4000;
pub const MAX_BUCKET_COUNT: usize = (BUCKET_SIZE - 0x10) / 8; // 0x7fe
pub const RELOCATION_BUCKET_CAPACITY: usize = (BUCKET_SIZE - 0x10) / 0x14; // 818
pub const SUBSECTION_BUCKET_CAPACITY: usize = (BUCKET_SIZE - 0x10) / 0x10; // 1023

#[derive(Snafu, Debug)]
pub enum BktrError {
    #[snafu(display("Failed to parse a BKTR bucket tree block"))]
    Parsing { source: binrw::Error },
    #[snafu(display("BKTR bucket tree claims {} buckets", count))]
    TooManyBuckets { count: u32 },
    #[snafu(display("BKTR bucket {} is empty", index))]
    EmptyBucket { index: usize },
    #[snafu(display("BKTR bucket {} has non-monotonic entries", index))]
    NonMonotonic { index: usize },
    #[snafu(display("BKTR bucket {} does not continue where its predecessor ended", index))]
    BucketChain { index: usize },
    #[snafu(display(
        "BKTR relocation entry {} in bucket {} has source {}",
        entry,
        bucket,
        source_value
    ))]
    BadRelocationSource {
        bucket: usize,
        entry: usize,
        source_value: u32,
    },
}

/// The 0x10-byte "BKTR" header embedded in the FS header's patch info,
/// in front of each bucket tree block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"BKTR")]
pub struct BktrBlockHeader {
    pub version: u32,
    pub num_entries: u32,
    pub reserved: u32,
}

impl BktrBlockHeader {
    pub fn parse(raw: &HexData<0x10>) -> Result<Self, BktrError> {
        Self::read(&mut Cursor::new(&raw.0)).context(ParsingSnafu)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct BucketTreeHeader {
    pub reserved: u32,
    pub num_buckets: u32,
    /// Size of the keyed space the tree covers: the virtual RomFS size
    /// for the relocation tree, the patched area size for the subsection
    /// tree.
    pub total_size: u64,
    /// First key of each bucket; the unused tail entries are zero.
    #[br(count = MAX_BUCKET_COUNT)]
    pub bucket_offsets: Vec<u64>,
}

/// Maps a run of virtual RomFS offsets to their source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct RelocationEntry {
    pub virt_offset: u64,
    pub phys_offset: u64,
    /// 1 when the run lives in the patch section, 0 for the base RomFS.
    pub is_patch: u32,
}

impl RelocationEntry {
    pub fn is_patch(&self) -> bool {
        self.is_patch != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct RelocationBucket {
    pub reserved: u32,
    #[br(assert(num_entries as usize <= RELOCATION_BUCKET_CAPACITY))]
    pub num_entries: u32,
    pub end_offset: u64,
    #[br(count = num_entries)]
    #[brw(pad_size_to = 0x3ff0)]
    pub entries: Vec<RelocationEntry>,
}

/// Assigns a run of patch-section physical offsets the 32-bit counter
/// word its AES-CTR decryption must be rebased with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct SubsectionEntry {
    pub offset: u64,
    pub reserved: u32,
    pub ctr_val: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SubsectionBucket {
    pub reserved: u32,
    #[br(assert(num_entries as usize <= SUBSECTION_BUCKET_CAPACITY))]
    pub num_entries: u32,
    pub end_offset: u64,
    #[br(count = num_entries)]
    #[brw(pad_size_to = 0x3ff0)]
    pub entries: Vec<SubsectionEntry>,
}

pub(crate) trait BucketKeyed: Copy {
    fn key(&self) -> u64;
}

impl BucketKeyed for RelocationEntry {
    fn key(&self) -> u64 {
        self.virt_offset
    }
}

impl BucketKeyed for SubsectionEntry {
    fn key(&self) -> u64 {
        self.offset
    }
}

#[derive(Debug)]
struct Bucket<E> {
    start: u64,
    end: u64,
    entries: Vec<E>,
}

/// A validated two-level search structure: binary search over bucket
/// start keys, then over the entries inside the located bucket.
#[derive(Debug)]
pub(crate) struct BucketTree<E> {
    buckets: Vec<Bucket<E>>,
    total_size: u64,
}

impl<E: BucketKeyed> BucketTree<E> {
    fn build(
        header: &BucketTreeHeader,
        raw_buckets: Vec<(u64, Vec<E>)>,
    ) -> Result<Self, BktrError> {
        let mut buckets: Vec<Bucket<E>> = Vec::with_capacity(raw_buckets.len());

        for (index, (end, entries)) in raw_buckets.into_iter().enumerate() {
            if entries.is_empty() {
                return Err(BktrError::EmptyBucket { index });
            }
            if !entries.iter().tuple_windows().all(|(a, b)| a.key() < b.key()) {
                return Err(BktrError::NonMonotonic { index });
            }

            let start = header.bucket_offsets[index];
            if entries[0].key() != start || entries.last().unwrap().key() >= end {
                return Err(BktrError::NonMonotonic { index });
            }

            // bucket k ends exactly where bucket k+1 begins
            let expected_start = match buckets.last() {
                Some(prev) => prev.end,
                None => start,
            };
            if start != expected_start {
                return Err(BktrError::BucketChain { index });
            }

            buckets.push(Bucket {
                start,
                end,
                entries,
            });
        }

        if let Some(last) = buckets.last() {
            if last.end != header.total_size {
                return Err(BktrError::BucketChain {
                    index: buckets.len() - 1,
                });
            }
        }

        Ok(Self {
            buckets,
            total_size: header.total_size,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Finds the entry covering the key and the end of its covered run.
    pub fn lookup(&self, key: u64) -> Option<(&E, u64)> {
        let bucket_index = self.buckets.partition_point(|b| b.start <= key);
        let bucket = &self.buckets[bucket_index.checked_sub(1)?];
        if key >= bucket.end {
            return None;
        }

        let entry_index = bucket.entries.partition_point(|e| e.key() <= key) - 1;
        let entry = &bucket.entries[entry_index];
        let covered_end = bucket
            .entries
            .get(entry_index + 1)
            .map(|e| e.key())
            .unwrap_or(bucket.end);

        Some((entry, covered_end))
    }
}

/// The parsed relocation block: virtual RomFS offset → (base|patch, physical offset).
#[derive(Debug)]
pub struct RelocationTable {
    tree: BucketTree<RelocationEntry>,
}

impl RelocationTable {
    pub fn parse(data: &[u8]) -> Result<Self, BktrError> {
        let mut cur = Cursor::new(data);
        let header = BucketTreeHeader::read(&mut cur).context(ParsingSnafu)?;
        if header.num_buckets as usize > MAX_BUCKET_COUNT {
            return Err(BktrError::TooManyBuckets {
                count: header.num_buckets,
            });
        }

        let mut raw_buckets = Vec::with_capacity(header.num_buckets as usize);
        for bucket in 0..header.num_buckets as usize {
            let raw = RelocationBucket::read(&mut cur).context(ParsingSnafu)?;
            for (entry, e) in raw.entries.iter().enumerate() {
                if e.is_patch > 1 {
                    return Err(BktrError::BadRelocationSource {
                        bucket,
                        entry,
                        source_value: e.is_patch,
                    });
                }
            }
            raw_buckets.push((raw.end_offset, raw.entries));
        }

        Ok(Self {
            tree: BucketTree::build(&header, raw_buckets)?,
        })
    }

    /// The size of the virtual RomFS this table describes.
    pub fn total_size(&self) -> u64 {
        self.tree.total_size()
    }

    pub fn lookup(&self, virt_offset: u64) -> Option<(&RelocationEntry, u64)> {
        self.tree.lookup(virt_offset)
    }
}

/// The parsed subsection block: patch-section physical offset → counter word.
/// Physical offsets past the table (the bucket blocks themselves) use the
/// section's own counter, represented here as a synthetic tail run.
#[derive(Debug)]
pub struct SubsectionTable {
    tree: BucketTree<SubsectionEntry>,
    section_size: u64,
    tail_ctr: u32,
}

impl SubsectionTable {
    pub fn parse(data: &[u8], section_size: u64, tail_ctr: u32) -> Result<Self, BktrError> {
        let mut cur = Cursor::new(data);
        let header = BucketTreeHeader::read(&mut cur).context(ParsingSnafu)?;
        if header.num_buckets as usize > MAX_BUCKET_COUNT {
            return Err(BktrError::TooManyBuckets {
                count: header.num_buckets,
            });
        }

        let mut raw_buckets = Vec::with_capacity(header.num_buckets as usize);
        for _ in 0..header.num_buckets {
            let raw = SubsectionBucket::read(&mut cur).context(ParsingSnafu)?;
            raw_buckets.push((raw.end_offset, raw.entries));
        }

        Ok(Self {
            tree: BucketTree::build(&header, raw_buckets)?,
            section_size,
            tail_ctr,
        })
    }

    /// Returns the counter word covering the physical offset and the end
    /// of the run it is valid for.
    pub fn lookup(&self, phys_offset: u64) -> Option<(u32, u64)> {
        if phys_offset >= self.tree.total_size() {
            if phys_offset < self.section_size {
                return Some((self.tail_ctr, self.section_size));
            }
            return None;
        }
        self.tree
            .lookup(phys_offset)
            .map(|(e, end)| (e.ctr_val, end))
    }
}
