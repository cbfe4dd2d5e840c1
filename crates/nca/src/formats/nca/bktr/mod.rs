mod structs;

use crate::crypto::{section_counter, AesKey, AES_BLOCK_SIZE};
use crate::storage::{ReadStorage, StorageError};

pub use structs::{
    BktrBlockHeader, BktrError, BucketTreeHeader, RelocationBucket, RelocationEntry,
    RelocationTable, SubsectionBucket, SubsectionEntry, SubsectionTable, BUCKET_SIZE,
    MAX_BUCKET_COUNT, RELOCATION_BUCKET_CAPACITY, SUBSECTION_BUCKET_CAPACITY,
};

/// The patch overlay of an update NCA: presents the virtual RomFS
/// assembled from the base RomFS and the patch section.
///
/// Each read walks the relocation table to find the run covering the
/// virtual offset; base runs are delegated to the base storage as-is,
/// patch runs are decrypted here with the AES-CTR counter rebased from
/// the subsection covering their physical offset. Requests are split at
/// every relocation and subsection boundary.
///
/// `P` is the still-encrypted patch section slice; `B` is the decrypted
/// (and usually verified) base RomFS section storage.
#[derive(Debug)]
pub struct BktrStorage<P: ReadStorage, B: ReadStorage> {
    patch: P,
    base: B,
    key: AesKey,
    /// Upper 64 counter bits of the patch section; subsections replace
    /// the low 32 of these.
    section_ctr: u64,
    /// Byte offset of the patch section inside its NCA; the low counter
    /// half counts AES blocks from the start of the NCA.
    section_base: u64,
    relocations: RelocationTable,
    subsections: SubsectionTable,
}

impl<P: ReadStorage, B: ReadStorage> BktrStorage<P, B> {
    pub fn new(
        patch: P,
        base: B,
        key: AesKey,
        section_ctr: u64,
        section_base: u64,
        relocations: RelocationTable,
        subsections: SubsectionTable,
    ) -> Self {
        Self {
            patch,
            base,
            key,
            section_ctr,
            section_base,
            relocations,
            subsections,
        }
    }

    /// Reads a run that lies entirely within one relocation entry.
    fn read_run(
        &self,
        entry: &RelocationEntry,
        virt_offset: u64,
        buf: &mut [u8],
    ) -> Result<(), StorageError> {
        let phys_offset = entry.phys_offset + (virt_offset - entry.virt_offset);
        if entry.is_patch() {
            self.read_patch(phys_offset, buf)
        } else {
            self.base.read_at(phys_offset, buf)
        }
    }

    /// Reads patch bytes, splitting at subsection boundaries; the counter
    /// is re-derived for every subsection, never just incremented across.
    fn read_patch(&self, mut phys_offset: u64, mut buf: &mut [u8]) -> Result<(), StorageError> {
        while !buf.is_empty() {
            let (ctr_val, covered_end) = self.subsections.lookup(phys_offset).ok_or(
                StorageError::out_of_bounds(phys_offset, buf.len(), self.patch.size()),
            )?;
            let run_len = std::cmp::min(buf.len() as u64, covered_end - phys_offset);
            let (chunk, rest) = std::mem::take(&mut buf).split_at_mut(run_len as usize);

            self.read_patch_ciphertext(phys_offset, ctr_val, chunk)?;

            phys_offset += run_len;
            buf = rest;
        }
        Ok(())
    }

    fn read_patch_ciphertext(
        &self,
        phys_offset: u64,
        ctr_val: u32,
        buf: &mut [u8],
    ) -> Result<(), StorageError> {
        let block = AES_BLOCK_SIZE as u64;
        // align out to AES block granularity, the excess is thrown away
        let aligned_start = phys_offset & !(block - 1);
        let aligned_end = (phys_offset + buf.len() as u64 + block - 1) & !(block - 1);

        let mut scratch = vec![0; (aligned_end - aligned_start) as usize];
        self.patch.read_at(aligned_start, &mut scratch)?;

        let upper = (self.section_ctr & 0xffff_ffff_0000_0000) | ctr_val as u64;
        let ctr = section_counter(upper, self.section_base + aligned_start);
        self.key.decrypt_ctr(&mut scratch, &ctr);

        let skip = (phys_offset - aligned_start) as usize;
        buf.copy_from_slice(&scratch[skip..skip + buf.len()]);
        Ok(())
    }
}

impl<P: ReadStorage, B: ReadStorage> ReadStorage for BktrStorage<P, B> {
    fn read_at(&self, offset: u64, mut buf: &mut [u8]) -> Result<(), StorageError> {
        let total_size = self.relocations.total_size();
        if offset + buf.len() as u64 > total_size {
            return Err(StorageError::out_of_bounds(offset, buf.len(), total_size));
        }

        let mut virt_offset = offset;
        while !buf.is_empty() {
            let (entry, covered_end) = self.relocations.lookup(virt_offset).ok_or(
                StorageError::out_of_bounds(virt_offset, buf.len(), total_size),
            )?;
            let run_len = std::cmp::min(buf.len() as u64, covered_end - virt_offset);
            let (chunk, rest) = std::mem::take(&mut buf).split_at_mut(run_len as usize);

            self.read_run(entry, virt_offset, chunk)?;

            virt_offset += run_len;
            buf = rest;
        }

        Ok(())
    }

    fn size(&self) -> u64 {
        self.relocations.total_size()
    }
}

#[cfg(test)]
pub(crate) mod test_tables {
    //! Serializes bucket tree blocks for tests, the same way an update
    //! NCA would carry them.

    use super::structs::{
        BucketTreeHeader, RelocationBucket, RelocationEntry, SubsectionBucket, SubsectionEntry,
        MAX_BUCKET_COUNT,
    };
    use binrw::BinWrite;
    use std::io::Cursor;

    pub fn tree_header(total_size: u64, bucket_starts: &[u64]) -> BucketTreeHeader {
        let mut bucket_offsets = vec![0u64; MAX_BUCKET_COUNT];
        bucket_offsets[..bucket_starts.len()].copy_from_slice(bucket_starts);
        BucketTreeHeader {
            reserved: 0,
            num_buckets: bucket_starts.len() as u32,
            total_size,
            bucket_offsets,
        }
    }

    pub fn write_relocation_block(
        total_size: u64,
        buckets: &[(u64, &[RelocationEntry])],
    ) -> Vec<u8> {
        let starts: Vec<u64> = buckets.iter().map(|(_, e)| e[0].virt_offset).collect();
        let mut cur = Cursor::new(Vec::new());
        tree_header(total_size, &starts).write(&mut cur).unwrap();
        for (end_offset, entries) in buckets {
            RelocationBucket {
                reserved: 0,
                num_entries: entries.len() as u32,
                end_offset: *end_offset,
                entries: entries.to_vec(),
            }
            .write(&mut cur)
            .unwrap();
        }
        cur.into_inner()
    }

    pub fn write_subsection_block(
        total_size: u64,
        buckets: &[(u64, &[SubsectionEntry])],
    ) -> Vec<u8> {
        let starts: Vec<u64> = buckets.iter().map(|(_, e)| e[0].offset).collect();
        let mut cur = Cursor::new(Vec::new());
        tree_header(total_size, &starts).write(&mut cur).unwrap();
        for (end_offset, entries) in buckets {
            SubsectionBucket {
                reserved: 0,
                num_entries: entries.len() as u32,
                end_offset: *end_offset,
                entries: entries.to_vec(),
            }
            .write(&mut cur)
            .unwrap();
        }
        cur.into_inner()
    }

    pub fn relocation(virt_offset: u64, phys_offset: u64, is_patch: bool) -> RelocationEntry {
        RelocationEntry {
            virt_offset,
            phys_offset,
            is_patch: is_patch as u32,
        }
    }

    pub fn subsection(offset: u64, ctr_val: u32) -> SubsectionEntry {
        SubsectionEntry {
            offset,
            reserved: 0,
            ctr_val,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_tables::{
        relocation, subsection, write_relocation_block, write_subsection_block,
    };
    use super::{BktrStorage, RelocationTable, SubsectionTable, BUCKET_SIZE};
    use crate::crypto::{section_counter, AesKey};
    use crate::storage::{ReadStorage, StorageError, VecStorage};

    const SECTION_CTR: u64 = 0x0123456700000007;
    const SECTION_BASE: u64 = 0xc00;
    const PATCH_SIZE: u64 = 0x10000;
    const VIRT_SIZE: u64 = 0x8000;
    const REBASE_CTR: u32 = 0xdeadbeef;
    const REBASE_CTR_2: u32 = 0xfeedface;

    fn key() -> AesKey {
        "2b7e151628aed2a6abf7158809cf4f3c".parse().unwrap()
    }

    /// Base RomFS: 0x4000 bytes of a recognizable pattern.
    fn base_plain() -> Vec<u8> {
        (0..0x4000u32).map(|i| (i % 251) as u8).collect()
    }

    /// Patch data region: 0x8000..0x10000 of the section, a different pattern.
    fn patch_plain() -> Vec<u8> {
        (0..0x8000u32).map(|i| (i % 241) as u8).collect()
    }

    /// The overlay under test:
    ///   virt [0, 0x4000)      -> base  [0, 0x4000)
    ///   virt [0x4000, 0x8000) -> patch [0x8000, 0x10000)
    /// with the patch region split into two subsections at phys 0xa000
    /// (virt 0x6000) carrying different counter words.
    fn overlay() -> BktrStorage<VecStorage, VecStorage> {
        let key = key();

        // encrypt each subsection run with its own rebased counter
        let mut patch_section = vec![0u8; PATCH_SIZE as usize];
        let upper = SECTION_CTR & 0xffff_ffff_0000_0000;
        let data = patch_plain();

        let mut first = data[..0x2000].to_vec();
        key.encrypt_ctr(
            &mut first,
            &section_counter(upper | REBASE_CTR as u64, SECTION_BASE + 0x8000),
        );
        patch_section[0x8000..0xa000].copy_from_slice(&first);

        let mut second = data[0x2000..].to_vec();
        key.encrypt_ctr(
            &mut second,
            &section_counter(upper | REBASE_CTR_2 as u64, SECTION_BASE + 0xa000),
        );
        patch_section[0xa000..].copy_from_slice(&second);

        let relocations = RelocationTable::parse(&write_relocation_block(
            VIRT_SIZE,
            &[(
                VIRT_SIZE,
                &[
                    relocation(0, 0, false),
                    relocation(0x4000, 0x8000, true),
                ][..],
            )],
        ))
        .unwrap();

        let subsections = SubsectionTable::parse(
            &write_subsection_block(
                0x10000,
                &[(
                    0x10000,
                    &[
                        subsection(0, SECTION_CTR as u32),
                        subsection(0x8000, REBASE_CTR),
                        subsection(0xa000, REBASE_CTR_2),
                    ][..],
                )],
            ),
            PATCH_SIZE,
            SECTION_CTR as u32,
        )
        .unwrap();

        BktrStorage::new(
            VecStorage::new(patch_section),
            VecStorage::new(base_plain()),
            key,
            SECTION_CTR,
            SECTION_BASE,
            relocations,
            subsections,
        )
    }

    #[test]
    fn base_runs_pass_through() {
        let overlay = overlay();

        let mut buf = [0; 0x20];
        overlay.read_at(0x100, &mut buf).unwrap();
        assert_eq!(buf[..], base_plain()[0x100..0x120]);
    }

    #[test]
    fn patch_runs_decrypt_with_the_rebased_counter() {
        let overlay = overlay();

        let mut buf = [0; 0x10];
        overlay.read_at(0x4000, &mut buf).unwrap();
        assert_eq!(buf[..], patch_plain()[..0x10]);

        // unaligned inside the patch
        let mut buf = [0; 0x2b];
        overlay.read_at(0x4123, &mut buf).unwrap();
        assert_eq!(buf[..], patch_plain()[0x123..0x123 + 0x2b]);
    }

    #[test]
    fn reads_split_at_relocation_boundaries() {
        let overlay = overlay();

        let mut buf = [0; 0x40];
        overlay.read_at(0x4000 - 0x20, &mut buf).unwrap();
        assert_eq!(buf[..0x20], base_plain()[0x4000 - 0x20..]);
        assert_eq!(buf[0x20..], patch_plain()[..0x20]);
    }

    #[test]
    fn reads_split_at_subsection_boundaries() {
        let overlay = overlay();

        // virt 0x5ff0 maps to phys 0x9ff0; the counter word changes at
        // phys 0xa000, so the read must re-derive it mid-way
        let mut buf = [0; 0x20];
        overlay.read_at(0x5ff0, &mut buf).unwrap();
        assert_eq!(buf[..], patch_plain()[0x1ff0..0x2010]);
    }

    #[test]
    fn split_reads_are_consistent_with_single_byte_reads() {
        let overlay = overlay();

        for &virt in &[0u64, 0x3fff, 0x4000, 0x5fff, 0x7fff] {
            let mut single = [0u8; 1];
            overlay.read_at(virt, &mut single).unwrap();

            for window in [2usize, 7, 0x11] {
                let start = virt.saturating_sub(window as u64 / 2);
                let len = std::cmp::min(window as u64, VIRT_SIZE - start) as usize;
                let mut buf = vec![0; len];
                overlay.read_at(start, &mut buf).unwrap();
                assert_eq!(buf[(virt - start) as usize], single[0]);
            }
        }
    }

    #[test]
    fn edge_policy() {
        let overlay = overlay();
        assert_eq!(overlay.size(), VIRT_SIZE);

        // empty reads succeed anywhere up to the total size
        overlay.read_at(0x123, &mut []).unwrap();
        overlay.read_at(VIRT_SIZE, &mut []).unwrap();

        // reads past the end fail
        let mut buf = [0; 1];
        assert!(matches!(
            overlay.read_at(VIRT_SIZE, &mut buf),
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn malformed_tables_are_rejected_at_parse_time() {
        // non-monotonic entries
        assert!(RelocationTable::parse(&write_relocation_block(
            0x2000,
            &[(
                0x2000,
                &[relocation(0, 0, false), relocation(0, 0x1000, true)][..],
            )],
        ))
        .is_err());

        // bucket end before its last entry
        assert!(RelocationTable::parse(&write_relocation_block(
            0x500,
            &[(
                0x500,
                &[relocation(0, 0, false), relocation(0x1000, 0x1000, true)][..],
            )],
        ))
        .is_err());

        // entry count beyond the bucket capacity
        let mut block = write_relocation_block(
            0x1000,
            &[(0x1000, &[relocation(0, 0, false)][..])],
        );
        block[BUCKET_SIZE + 4..BUCKET_SIZE + 8].copy_from_slice(&10_000u32.to_le_bytes());
        assert!(RelocationTable::parse(&block).is_err());

        // a relocation source that is neither base nor patch
        assert!(RelocationTable::parse(&write_relocation_block(
            0x1000,
            &[(
                0x1000,
                &[super::RelocationEntry {
                    virt_offset: 0,
                    phys_offset: 0,
                    is_patch: 7,
                }][..],
            )],
        ))
        .is_err());
    }

    #[test]
    fn bucket_search_is_monotone() {
        // two buckets; searching increasing keys yields non-decreasing buckets
        let relocations = RelocationTable::parse(&write_relocation_block(
            0x4000,
            &[
                (0x2000, &[relocation(0, 0, false), relocation(0x1000, 0x1000, false)][..]),
                (0x4000, &[relocation(0x2000, 0x2000, false)][..]),
            ],
        ))
        .unwrap();

        let mut last_phys = 0;
        for virt in (0u64..0x4000).step_by(0x100) {
            let (entry, end) = relocations.lookup(virt).unwrap();
            assert!(entry.virt_offset <= virt && virt < end);
            assert!(entry.phys_offset >= last_phys);
            last_phys = entry.phys_offset;
        }
        assert!(relocations.lookup(0x4000).is_none());
    }

    #[test]
    fn tail_subsection_covers_the_bucket_region() {
        let subsections = SubsectionTable::parse(
            &write_subsection_block(0x8000, &[(0x8000, &[subsection(0, 0x11)][..])]),
            0x10000,
            0x99,
        )
        .unwrap();

        assert_eq!(subsections.lookup(0x100), Some((0x11, 0x8000)));
        assert_eq!(subsections.lookup(0x8000), Some((0x99, 0x10000)));
        assert_eq!(subsections.lookup(0xffff), Some((0x99, 0x10000)));
        assert_eq!(subsections.lookup(0x10000), None);
    }
}
