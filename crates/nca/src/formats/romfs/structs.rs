use binrw::{BinRead, BinWrite};

#[derive(Debug, Copy, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct RomFsHeader {
    // NOTE: no support for the pre-release RomFs with 32-bit header fields
    pub header_size: u64,
    pub dir_hash_table_offset: u64,
    pub dir_hash_table_size: u64,
    pub dir_meta_table_offset: u64,
    pub dir_meta_table_size: u64,
    pub file_hash_table_offset: u64,
    pub file_hash_table_size: u64,
    pub file_meta_table_offset: u64,
    pub file_meta_table_size: u64,
    pub data_offset: u64,
}

/// Byte offset of an entry inside a metadata table, or the 0xFFFFFFFF
/// sentinel terminating sibling and hash chains.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, BinRead, BinWrite)]
pub struct RomOffset(pub u32);

impl RomOffset {
    pub const NONE: Self = Self(0xFFFF_FFFF);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn is_some(&self) -> bool {
        !self.is_none()
    }
}

/// Common shape of both metadata tables: the payload differs, the
/// surrounding parent/hash-chain/name plumbing does not.
#[derive(Debug, Copy, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct RomFsEntry<T>
where
    T: for<'a> BinRead<Args<'a> = ()> + for<'a> BinWrite<Args<'a> = ()> + 'static,
{
    pub parent: RomOffset,
    pub value: T,
    pub hash_next: RomOffset,
    pub name_length: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, BinRead, BinWrite)]
pub struct ChildPosition {
    pub next_directory: RomOffset,
    pub next_file: RomOffset,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, BinRead, BinWrite)]
pub struct DirectoryRomEntry {
    pub next_sibling: RomOffset,
    pub position: ChildPosition,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, BinRead, BinWrite)]
pub struct RomFileInfo {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, BinRead, BinWrite)]
pub struct FileRomEntry {
    pub next_sibling: RomOffset,
    pub info: RomFileInfo,
}
