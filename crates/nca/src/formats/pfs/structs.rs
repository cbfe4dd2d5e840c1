use binrw::{BinRead, BinWrite};

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
pub struct PartitionFsEntry {
    pub offset: u64,
    pub size: u64,
    #[brw(pad_after = 4)] // reserved
    pub string_table_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"PFS0")]
pub struct PartitionFsHeader {
    pub num_files: u32,
    pub string_table_size: u32,

    #[brw(pad_before = 4)] // reserved
    #[br(count = num_files)]
    pub file_entries: Vec<PartitionFsEntry>,

    #[br(count = string_table_size)]
    pub string_table: Vec<u8>,
}

/// Reads the NUL-terminated name at the given string table offset.
pub fn get_string(string_table: &[u8], offset: u32) -> Option<&str> {
    let tail = string_table.get(offset as usize..)?;
    let end = tail.iter().position(|&c| c == 0).unwrap_or(tail.len());
    std::str::from_utf8(&tail[..end]).ok()
}
