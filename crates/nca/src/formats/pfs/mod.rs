mod structs;

use crate::filesystem::{Vfs, VfsDir, VfsEntry, VfsFile};
use crate::formats::pfs::structs::{get_string, PartitionFsHeader};
use crate::storage::{
    ReadStorage, ReadStorageExt, SharedStorage, SliceError, SliceStorage,
};
use binrw::BinRead;
use indexmap::IndexMap;
use snafu::{ResultExt, Snafu};
use std::fmt::Debug;
use std::io::Seek;

pub const EXEFS_META_NAME: &str = "main.npdm";

#[derive(Snafu, Debug)]
pub enum PfsParseError {
    #[snafu(display("Failed to parse the PFS0 header"))]
    HeaderParsing { source: binrw::Error },
    #[snafu(display("PFS0 entry {} has a name outside the string table", index))]
    BadEntryName { index: usize },
    #[snafu(display(
        "PFS0 entry {} ({:#x}+{:#x}) overruns the data region of size {:#x}",
        index,
        offset,
        size,
        data_size
    ))]
    EntryOutOfBounds {
        index: usize,
        offset: u64,
        size: u64,
        data_size: u64,
    },
}

#[derive(Snafu, Debug)]
pub struct PfsOpenError {
    source: SliceError,
}

#[derive(Debug, Copy, Clone)]
struct FileInfo {
    offset: u64,
    size: u64,
}

/// The flat Partition File System used for ExeFS partitions (and NSPs).
#[derive(Debug)]
pub struct PartitionFileSystem<S: ReadStorage> {
    storage: SharedStorage<S>,
    // in on-disk order, so enumeration matches the file table
    files: IndexMap<String, FileInfo>,
    data_offset: u64,
}

pub type FileStorage<S> = SliceStorage<SharedStorage<S>>;

// the PFS is flat, so the only directory is the root one
pub struct Directory<'a, S: ReadStorage> {
    fs: &'a PartitionFileSystem<S>,
}

pub struct File<'a, S: ReadStorage> {
    fs: &'a PartitionFileSystem<S>,
    filename: &'a str,
    info: FileInfo,
}

impl<'a, S: ReadStorage> Debug for Directory<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory").finish()
    }
}

impl<'a, S: ReadStorage> Debug for File<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("filename", &self.filename)
            .field("offset", &self.info.offset)
            .field("size", &self.info.size)
            .finish()
    }
}

#[derive(Debug)]
pub struct DirectoryIter<'a, S: ReadStorage> {
    fs: &'a PartitionFileSystem<S>,
    iter: indexmap::map::Iter<'a, String, FileInfo>,
}

impl<'a, S: ReadStorage> Iterator for DirectoryIter<'a, S> {
    type Item = VfsEntry<File<'a, S>, Directory<'a, S>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|(filename, &info)| {
            VfsEntry::File(File {
                fs: self.fs,
                filename: filename.as_str(),
                info,
            })
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<S: ReadStorage> PartitionFileSystem<S> {
    pub fn new(storage: S) -> Result<Self, PfsParseError> {
        let mut io = storage.buf_read();

        let PartitionFsHeader {
            file_entries,
            string_table,
            ..
        } = PartitionFsHeader::read(&mut io).context(HeaderParsingSnafu)?;

        let data_offset = io.stream_position().expect("BUG: in-memory seek failed");
        let storage = io.into_inner().into_inner().shared();
        let data_size = storage.size() - data_offset;

        let mut files = IndexMap::with_capacity(file_entries.len());
        for (index, e) in file_entries.into_iter().enumerate() {
            let name = get_string(&string_table, e.string_table_offset)
                .ok_or(PfsParseError::BadEntryName { index })?;
            if e.offset.checked_add(e.size).map_or(true, |end| end > data_size) {
                return Err(PfsParseError::EntryOutOfBounds {
                    index,
                    offset: e.offset,
                    size: e.size,
                    data_size,
                });
            }
            files.insert(
                name.to_string(),
                FileInfo {
                    offset: e.offset,
                    size: e.size,
                },
            );
        }

        Ok(Self {
            storage,
            files,
            data_offset,
        })
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// ExeFS partitions carry the program metadata alongside the NSOs.
    /// This is a hint: nothing stops a data partition from containing
    /// a file of the same name.
    pub fn is_exefs(&self) -> bool {
        self.files.contains_key(EXEFS_META_NAME)
    }
}

impl<S: ReadStorage> Vfs for PartitionFileSystem<S> {
    type File<'a> = File<'a, S> where Self: 'a;
    type Dir<'a> = Directory<'a, S> where Self: 'a;

    fn root(&self) -> Self::Dir<'_> {
        Directory { fs: self }
    }

    fn open_dir(&self, path: &str) -> Option<Self::Dir<'_>> {
        if path == "/" {
            Some(self.root())
        } else {
            None
        }
    }

    fn open_file(&self, path: &str) -> Option<Self::File<'_>> {
        let path = path.strip_prefix('/').unwrap_or(path);
        self.files
            .get_key_value(path)
            .map(|(filename, &info)| File {
                fs: self,
                filename,
                info,
            })
    }
}

impl<'a, S: ReadStorage> VfsDir for Directory<'a, S> {
    type File = File<'a, S>;
    type Iter = DirectoryIter<'a, S>;

    fn name(&self) -> &str {
        ""
    }

    fn entries(&self) -> Self::Iter {
        DirectoryIter {
            fs: self.fs,
            iter: self.fs.files.iter(),
        }
    }
}

impl<'a, S: ReadStorage> VfsFile for File<'a, S> {
    type Storage = FileStorage<S>;
    type Error = PfsOpenError;

    fn name(&self) -> &str {
        self.filename
    }

    fn size(&self) -> u64 {
        self.info.size
    }

    fn storage(&self) -> Result<Self::Storage, Self::Error> {
        let storage = self.fs.storage.clone();
        let offset = self.fs.data_offset + self.info.offset;
        storage.slice(offset, self.info.size).context(PfsOpenSnafu)
    }
}

#[cfg(test)]
pub(crate) mod test_image {
    //! Serializes a PFS0 image for tests.

    use super::structs::{PartitionFsEntry, PartitionFsHeader};
    use binrw::BinWrite;
    use std::io::Cursor;

    pub fn build_pfs0(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut string_table = Vec::new();
        let mut data = Vec::new();
        let mut file_entries = Vec::new();

        for (name, content) in files {
            file_entries.push(PartitionFsEntry {
                offset: data.len() as u64,
                size: content.len() as u64,
                string_table_offset: string_table.len() as u32,
            });
            string_table.extend_from_slice(name.as_bytes());
            string_table.push(0);
            data.extend_from_slice(content);
        }
        // the string table is usually padded to an 0x10 boundary
        while string_table.len() % 0x10 != 0 {
            string_table.push(0);
        }

        let header = PartitionFsHeader {
            num_files: files.len() as u32,
            string_table_size: string_table.len() as u32,
            file_entries,
            string_table,
        };

        let mut cur = Cursor::new(Vec::new());
        header.write(&mut cur).unwrap();
        let mut image = cur.into_inner();
        image.extend_from_slice(&data);
        image
    }
}
