use crate::crypto::AesKey;
use crate::formats::nca::bktr::{BktrBlockHeader, BktrStorage, RelocationTable, SubsectionTable};
use crate::formats::nca::filesystem::NcaFileSystem;
use crate::formats::nca::structs::{
    IntegrityInfo, NcaEncryptionType, NcaFormatType, NcaFsHeader,
};
use crate::formats::nca::{
    BktrSnafu, IntegrityCheckLevel, Nca, NcaContentKeys, NcaError, NcaVerificationStorage,
    RomFsSnafu, SectionCryptStorage, VerificationBuildSnafu,
};
use crate::formats::pfs::PartitionFileSystem;
use crate::formats::romfs::RomFileSystem;
use crate::storage::{
    ReadStorage, ReadStorageExt, SharedStorage, SliceStorage,
};
use snafu::ResultExt;
use tracing::debug;

pub type RawSectionStorage<S> = SliceStorage<SharedStorage<S>>;
pub type DecryptedSectionStorage<S> = SectionCryptStorage<RawSectionStorage<S>>;
pub type SectionStorage<S> = NcaVerificationStorage<DecryptedSectionStorage<S>>;
pub type SectionFileSystem<S> = NcaFileSystem<SectionStorage<S>>;

pub type PatchedSectionStorage<S, B> = NcaVerificationStorage<BktrStorage<RawSectionStorage<S>, B>>;
pub type PatchedSectionFileSystem<S, B> = RomFileSystem<PatchedSectionStorage<S, B>>;

struct SectionInfo<'a> {
    fs_header: &'a NcaFsHeader,
    offset: u64,
    size: u64,
}

impl<S: ReadStorage> Nca<S> {
    fn section_info(&self, index: usize) -> Result<SectionInfo, NcaError> {
        let section_entry = self.headers.nca_header.section_table[index];
        if !section_entry.is_enabled {
            return Err(NcaError::SectionNotPresent { index });
        }

        let fs_header = self.headers.fs_headers[index]
            .as_ref()
            .expect("BUG: an enabled section must have a parsed FS header");

        if fs_header.has_sparse_layer() {
            return Err(NcaError::UnsupportedLayer {
                layer: "sparse",
                index,
            });
        }
        if fs_header.has_compression_layer() {
            return Err(NcaError::UnsupportedLayer {
                layer: "compression",
                index,
            });
        }

        Ok(SectionInfo {
            fs_header,
            offset: section_entry.start.into(),
            size: section_entry.size(),
        })
    }

    fn raw_section_storage(&self, info: &SectionInfo) -> RawSectionStorage<S> {
        self.body
            .clone()
            .slice(info.offset, info.size)
            .expect("BUG: section bounds are validated at open")
    }

    fn ctr_key(&self) -> AesKey {
        match self.content_key {
            NcaContentKeys::Plaintext => {
                unreachable!("BUG: no CTR key is ever needed for a plaintext NCA")
            }
            NcaContentKeys::KeyArea { ctr: key, .. } | NcaContentKeys::RightsId(key) => key,
        }
    }

    /// The decrypted but not yet integrity-verified section bytes.
    pub fn raw_decrypted_section_storage(
        &self,
        index: usize,
    ) -> Result<DecryptedSectionStorage<S>, NcaError> {
        let info = self.section_info(index)?;
        self.decrypted_storage(&info, index)
    }

    fn decrypted_storage(
        &self,
        info: &SectionInfo,
        index: usize,
    ) -> Result<DecryptedSectionStorage<S>, NcaError> {
        let storage = self.raw_section_storage(info);

        if self.is_plaintext() {
            return Ok(SectionCryptStorage::new_plaintext(storage));
        }

        Ok(match info.fs_header.encryption_type {
            NcaEncryptionType::None => SectionCryptStorage::new_plaintext(storage),
            NcaEncryptionType::Xts => {
                let key = match self.content_key {
                    NcaContentKeys::KeyArea { xts, .. } => xts,
                    _ => return Err(NcaError::MissingXtsKey { index }),
                };
                SectionCryptStorage::new_xts(storage, key)
            }
            // AesCtrEx sections decrypt like plain CTR outside the
            // patched runs; this view is what the bucket trees and the
            // BKTR overlay read through
            NcaEncryptionType::AesCtr | NcaEncryptionType::AesCtrEx => SectionCryptStorage::new_ctr(
                storage,
                self.ctr_key(),
                info.fs_header.section_ctr,
                info.offset,
            ),
            NcaEncryptionType::Auto => {
                return Err(NcaError::UnsupportedLayer {
                    layer: "auto encryption",
                    index,
                })
            }
        })
    }

    fn verification_storage<B: ReadStorage>(
        fs_header: &NcaFsHeader,
        storage: B,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<NcaVerificationStorage<B>, NcaError> {
        Ok(match fs_header.integrity_info {
            IntegrityInfo::None => NcaVerificationStorage::new_unverified(storage),
            IntegrityInfo::Sha256(s) => {
                let levels = s.level_info[..2]
                    .try_into()
                    .expect("BUG: slicing two levels out of six");

                NcaVerificationStorage::new_sha256_verification_storage(
                    storage,
                    s.master_hash.0 .0,
                    levels,
                    s.block_size,
                    integrity_level,
                )
                .context(VerificationBuildSnafu)?
            }
            IntegrityInfo::Ivfc(s) => {
                let master_hash = s.master_hash.0[..0x20]
                    .try_into()
                    .expect("BUG: an SHA-256 master hash is 0x20 bytes");

                // the level count includes the master hash, which is not
                // a storage level
                NcaVerificationStorage::new_ivfc_verification_storage(
                    storage,
                    master_hash,
                    s.level_count.saturating_sub(1),
                    s.level_info,
                    integrity_level,
                )
                .context(VerificationBuildSnafu)?
            }
        })
    }

    /// The decrypted and integrity-verified storage of a section.
    ///
    /// Patch (`AesCtrEx`) sections cannot be read standalone; use
    /// [`Nca::patched_section_storage`] with the base RomFS instead.
    pub fn section_storage(
        &self,
        index: usize,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<SectionStorage<S>, NcaError> {
        let info = self.section_info(index)?;
        if info.fs_header.is_patch_section() {
            return Err(NcaError::PatchSectionWithoutBase { index });
        }

        let storage = self.decrypted_storage(&info, index)?;
        Self::verification_storage(info.fs_header, storage, integrity_level)
    }

    /// The virtual RomFS storage of a patch section composed with the
    /// base application's RomFS section storage.
    pub fn patched_section_storage<B: ReadStorage>(
        &self,
        index: usize,
        base: B,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<PatchedSectionStorage<S, B>, NcaError> {
        let info = self.section_info(index)?;
        if !info.fs_header.is_patch_section() {
            return Err(NcaError::NotAPatchSection { index });
        }
        if self.is_plaintext() {
            // the overlay always runs the patch cipher; a pre-decrypted
            // update NCA has nothing for it to work with
            return Err(NcaError::UnsupportedLayer {
                layer: "plaintext patch",
                index,
            });
        }

        let patch_info = &info.fs_header.patch_info;
        BktrBlockHeader::parse(&patch_info.relocation_header).context(BktrSnafu)?;
        BktrBlockHeader::parse(&patch_info.subsection_header).context(BktrSnafu)?;
        debug!(
            "Opening BKTR overlay: relocation block {:#x}+{:#x}, subsection block {:#x}+{:#x}",
            patch_info.relocation_offset,
            patch_info.relocation_size,
            patch_info.subsection_offset,
            patch_info.subsection_size,
        );

        // the bucket trees themselves sit in the plain-CTR part of the
        // section; read them out through the ordinary decrypted view
        let plain_view = self.decrypted_storage(&info, index)?;
        let relocation_data = plain_view
            .read_vec(patch_info.relocation_offset, patch_info.relocation_size)
            .context(crate::formats::nca::StorageSnafu)?;
        let subsection_data = plain_view
            .read_vec(patch_info.subsection_offset, patch_info.subsection_size)
            .context(crate::formats::nca::StorageSnafu)?;

        let relocations = RelocationTable::parse(&relocation_data).context(BktrSnafu)?;
        let subsections = SubsectionTable::parse(
            &subsection_data,
            info.size,
            info.fs_header.section_ctr as u32,
        )
        .context(BktrSnafu)?;

        let overlay = BktrStorage::new(
            self.raw_section_storage(&info),
            base,
            self.ctr_key(),
            info.fs_header.section_ctr,
            info.offset,
            relocations,
            subsections,
        );

        Self::verification_storage(info.fs_header, overlay, integrity_level)
    }

    /// Decodes the file system of a section: PFS0 or RomFS per its FS header.
    pub fn section_fs(
        &self,
        index: usize,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<SectionFileSystem<S>, NcaError> {
        let info = self.section_info(index)?;
        let format_type = info.fs_header.format_type;
        let storage = self.section_storage(index, integrity_level)?;

        Ok(match format_type {
            NcaFormatType::Romfs => NcaFileSystem::Romfs(
                RomFileSystem::new(storage).context(RomFsSnafu { index })?,
            ),
            NcaFormatType::Pfs0 => NcaFileSystem::Pfs(
                PartitionFileSystem::new(storage)
                    .context(crate::formats::nca::PfsSnafu { index })?,
            ),
        })
    }

    /// Decodes the virtual RomFS of a patch section overlaid onto the
    /// base RomFS section storage.
    pub fn patched_section_fs<B: ReadStorage>(
        &self,
        index: usize,
        base: B,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<PatchedSectionFileSystem<S, B>, NcaError> {
        let info = self.section_info(index)?;
        if info.fs_header.format_type != NcaFormatType::Romfs {
            return Err(NcaError::NotAPatchSection { index });
        }

        let storage = self.patched_section_storage(index, base, integrity_level)?;
        RomFileSystem::new(storage).context(RomFsSnafu { index })
    }
}
