use crate::crypto::keyset::KeyAreaKeyIndex;
use crate::crypto::{EncryptedAesKey, EncryptedAesXtsKey};
use crate::hexstring::HexData;
use crate::ids::{RightsId, TitleId};
use binrw::{BinRead, BinWrite};
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcaSectionType {
    Code,
    Data,
    Logo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcaContentType {
    Program,
    Meta,
    Control,
    Manual,
    Data,
    PublicData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum DistributionType {
    Download,
    GameCard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcaEncryptionType {
    Auto,
    None,
    Xts,
    AesCtr,
    /// AES-CTR with per-subsection counter rebasing; only valid for the
    /// patch RomFS section of an update NCA.
    AesCtrEx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcaHashType {
    Auto,
    None,
    Sha256,
    Ivfc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcaFormatType {
    Romfs,
    Pfs0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct NcaSignature(pub HexData<0x100>);

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub enum NcaMagic {
    #[brw(magic = b"NCA0")]
    Nca0,
    #[brw(magic = b"NCA1")]
    Nca1,
    #[brw(magic = b"NCA2")]
    Nca2,
    #[brw(magic = b"NCA3")]
    Nca3,
}

/// Section offsets are stored in 0x200-byte media units.
#[derive(Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct MediaOffset(pub u32);

pub const MEDIA_UNIT_SIZE: u64 = 0x200;

impl From<MediaOffset> for u64 {
    fn from(v: MediaOffset) -> Self {
        v.0 as u64 * MEDIA_UNIT_SIZE
    }
}

impl Debug for MediaOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0 as u64 * MEDIA_UNIT_SIZE)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct SectionTableEntry {
    pub start: MediaOffset,
    pub end: MediaOffset,
    #[brw(pad_after = 0x7)]
    #[br(parse_with = crate::brw_utils::read_bool)]
    #[bw(write_with = crate::brw_utils::write_bool)]
    pub is_enabled: bool,
}

impl SectionTableEntry {
    pub fn size(&self) -> u64 {
        (self.end.0 as u64).saturating_sub(self.start.0 as u64) * MEDIA_UNIT_SIZE
    }
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct Sha256Hash(pub HexData<0x20>);

impl Sha256Hash {
    pub fn matches(&self, data: &[u8]) -> bool {
        use digest::Digest;
        let hash = sha2::Sha256::digest(data);
        hash.as_slice() == self.0 .0
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct NcaKeyArea {
    pub encrypted_xts_key: EncryptedAesXtsKey,
    pub encrypted_ctr_key: EncryptedAesKey,
    pub encrypted_ctr_ex_key: EncryptedAesKey,
    pub encrypted_ctr_hw_key: EncryptedAesKey,
    pub unused: HexData<0xb0>,
}

/// NCA header, corresponding to the first 0x400 bytes of the decrypted NCA
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct NcaHeader {
    pub fixed_key_signature: NcaSignature,
    pub npdm_signature: NcaSignature,
    pub magic: NcaMagic,
    pub distribution_type: DistributionType,
    pub content_type: NcaContentType,
    pub key_generation_1: u8,
    pub key_area_key_index: KeyAreaKeyIndex,
    pub nca_size: u64,
    pub title_id: TitleId,
    pub content_index: u32,
    pub sdk_version: u32,
    #[brw(pad_after = 0xf)]
    pub key_generation_2: u8,
    pub rights_id: RightsId,
    pub section_table: [SectionTableEntry; 4],
    pub fs_header_hashes: [Sha256Hash; 4],
    pub key_area: NcaKeyArea,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct Sha256IntegrityInfoLevel {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct Sha256IntegrityInfo {
    pub master_hash: Sha256Hash,
    pub block_size: u32,
    pub level_count: u32,
    pub level_info: [Sha256IntegrityInfoLevel; 6],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct IvfcIntegrityInfoLevel {
    pub offset: u64,
    pub size: u64,
    /// log2 of the block size in bytes
    #[brw(pad_after = 4)]
    pub block_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(magic = b"IVFC")]
pub struct IvfcIntegrityInfo {
    pub version: u32,
    pub master_hash_size: u32,
    /// Number of levels including the master hash itself.
    pub level_count: u32,
    pub level_info: [IvfcIntegrityInfoLevel; 6],
    pub salt_source: HexData<0x20>,
    pub master_hash: HexData<0x38>, // this is the max size of the hash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[br(import(hash_type: NcaHashType))]
pub enum IntegrityInfo {
    #[br(pre_assert(hash_type == NcaHashType::None))]
    None,
    #[br(pre_assert(hash_type == NcaHashType::Sha256))]
    Sha256(Sha256IntegrityInfo),
    #[br(pre_assert(hash_type == NcaHashType::Ivfc))]
    Ivfc(IvfcIntegrityInfo),
}

/// Locations of the BKTR relocation and subsection blocks inside a patch
/// section. The embedded 0x10-byte headers are kept raw here; they are
/// re-parsed as [`BktrBlockHeader`] when the overlay is opened, since for
/// non-patch sections they are all zeros.
///
/// [`BktrBlockHeader`]: crate::formats::nca::bktr::BktrBlockHeader
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct PatchInfo {
    pub relocation_offset: u64,
    pub relocation_size: u64,
    pub relocation_header: HexData<0x10>,
    pub subsection_offset: u64,
    pub subsection_size: u64,
    pub subsection_header: HexData<0x10>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct SparseInfo {
    pub meta_offset: u64,
    pub meta_size: u64,
    pub meta_header: HexData<0x10>,
    pub physical_offset: u64,
    pub generation: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct CompressionInfo {
    pub table_offset: u64,
    pub table_size: u64,
    pub table_header: HexData<0x10>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct NcaFsHeader {
    pub version: u16,
    pub format_type: NcaFormatType,
    pub hash_type: NcaHashType,
    pub encryption_type: NcaEncryptionType,

    #[brw(pad_before = 0x3)]
    #[br(args(hash_type))]
    #[brw(pad_size_to = 0xf8)]
    pub integrity_info: IntegrityInfo,

    #[brw(pad_size_to = 0x40)]
    pub patch_info: PatchInfo,

    /// Upper 64 bits of the section's AES-CTR counter. The high 32 bits
    /// stay fixed; BKTR subsections replace the low 32 bits.
    pub section_ctr: u64,

    #[brw(pad_size_to = 0x30)]
    pub sparse_info: SparseInfo,

    #[brw(pad_size_to = 0x28)] // this is the allocated size for CompressionInfo
    #[brw(pad_after = 0x60)] // this is unused space after it
    pub compression_info: CompressionInfo,
}

impl NcaFsHeader {
    pub fn is_patch_section(&self) -> bool {
        self.patch_info.relocation_size != 0
    }

    pub fn has_sparse_layer(&self) -> bool {
        self.sparse_info.generation != 0
    }

    pub fn has_compression_layer(&self) -> bool {
        self.compression_info.table_offset != 0 && self.compression_info.table_size != 0
    }
}

#[cfg(test)]
mod tests {
    use super::{
        IntegrityInfo, NcaFsHeader, NcaHeader, Sha256IntegrityInfo, Sha256IntegrityInfoLevel,
    };
    use binrw::{BinRead, BinWrite};
    use std::io::Cursor;

    #[test]
    fn fs_header_is_0x200_bytes() {
        let header = NcaFsHeader {
            version: 2,
            format_type: super::NcaFormatType::Pfs0,
            hash_type: super::NcaHashType::Sha256,
            encryption_type: super::NcaEncryptionType::AesCtr,
            integrity_info: IntegrityInfo::Sha256(Sha256IntegrityInfo {
                master_hash: super::Sha256Hash(crate::hexstring::HexData([0; 0x20])),
                block_size: 0x1000,
                level_count: 2,
                level_info: [Sha256IntegrityInfoLevel { offset: 0, size: 0 }; 6],
            }),
            patch_info: super::PatchInfo {
                relocation_offset: 0,
                relocation_size: 0,
                relocation_header: crate::hexstring::HexData([0; 0x10]),
                subsection_offset: 0,
                subsection_size: 0,
                subsection_header: crate::hexstring::HexData([0; 0x10]),
            },
            section_ctr: 0x0123456789abcdef,
            sparse_info: super::SparseInfo {
                meta_offset: 0,
                meta_size: 0,
                meta_header: crate::hexstring::HexData([0; 0x10]),
                physical_offset: 0,
                generation: 0,
            },
            compression_info: super::CompressionInfo {
                table_offset: 0,
                table_size: 0,
                table_header: crate::hexstring::HexData([0; 0x10]),
            },
        };

        let mut cur = Cursor::new(Vec::new());
        header.write(&mut cur).unwrap();
        let bytes = cur.into_inner();
        assert_eq!(bytes.len(), 0x200);

        // the counter seed lives at +0x140
        assert_eq!(
            u64::from_le_bytes(bytes[0x140..0x148].try_into().unwrap()),
            0x0123456789abcdef
        );

        let mut cur = Cursor::new(&bytes);
        let reparsed = NcaFsHeader::read(&mut cur).unwrap();
        assert_eq!(reparsed, header);
    }

    #[test]
    fn nca_header_is_0x400_bytes() {
        // zeroed section table entries parse as disabled sections with
        // the Sha256 variants defaulting sanely, so a zero buffer is a
        // valid skeleton except for the magic
        let mut bytes = vec![0u8; 0x400];
        bytes[0x200..0x204].copy_from_slice(b"NCA3");

        let header = NcaHeader::read(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.magic, super::NcaMagic::Nca3);
        assert!(!header.section_table[0].is_enabled);

        let mut cur = Cursor::new(Vec::new());
        header.write(&mut cur).unwrap();
        assert_eq!(cur.into_inner().len(), 0x400);
    }
}
