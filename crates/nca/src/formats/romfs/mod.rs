use crate::filesystem::{Vfs, VfsDir, VfsEntry, VfsFile};
use crate::formats::romfs::dictionary::RomDictionary;
use crate::formats::romfs::structs::{
    ChildPosition, DirectoryRomEntry, FileRomEntry, RomFileInfo, RomFsHeader,
};
use crate::formats::romfs::tables::HierarchicalRomTables;
use crate::storage::{
    ReadStorage, ReadStorageExt, SharedStorage, SliceError, SliceStorage, StorageError,
};
use binrw::BinRead;
use snafu::{ResultExt, Snafu};
use std::fmt::Debug;

mod dictionary;
mod structs;
mod tables;

#[derive(Snafu, Debug)]
pub enum RomFsError {
    #[snafu(display("Failed to parse the RomFS header"))]
    Parse { source: binrw::Error },
    #[snafu(display("Failed to read a RomFS table"))]
    TableRead { source: StorageError },
    #[snafu(display("A RomFS table lies outside the section"))]
    Slice { source: SliceError },
    #[snafu(display("The RomFS has no root directory entry"))]
    MissingRoot,
}

/// The hierarchical read-only file system carried by data sections.
#[derive(Debug)]
pub struct RomFileSystem<S: ReadStorage> {
    storage: SharedStorage<S>,
    table: HierarchicalRomTables,
    data_offset: u64,
}

pub type FileStorage<S> = SliceStorage<SharedStorage<S>>;

pub struct Directory<'a, S: ReadStorage> {
    fs: &'a RomFileSystem<S>,
    name: &'a str,
    position: ChildPosition,
}

pub struct File<'a, S: ReadStorage> {
    fs: &'a RomFileSystem<S>,
    name: &'a str,
    info: RomFileInfo,
}

impl<'a, S: ReadStorage> Debug for Directory<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("name", &self.name)
            .field("position", &self.position)
            .finish()
    }
}

impl<'a, S: ReadStorage> Debug for File<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("info", &self.info)
            .finish()
    }
}

pub struct DirectoryIter<'a, S: ReadStorage> {
    fs: &'a RomFileSystem<S>,
    position: ChildPosition,
}

impl<'a, S: ReadStorage> Iterator for DirectoryIter<'a, S> {
    type Item = VfsEntry<File<'a, S>, Directory<'a, S>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((name, position)) = self.fs.table.next_directory(&mut self.position) {
            return Some(VfsEntry::Dir(Directory {
                fs: self.fs,
                name,
                position,
            }));
        }
        if let Some((name, info)) = self.fs.table.next_file(&mut self.position) {
            return Some(VfsEntry::File(File {
                fs: self.fs,
                name,
                info,
            }));
        }

        None
    }
}

impl<S: ReadStorage> RomFileSystem<S> {
    pub fn new(storage: S) -> Result<Self, RomFsError> {
        let storage = storage.shared();
        let mut io = storage.clone().buf_read();

        let header = RomFsHeader::read(&mut io).context(ParseSnafu)?;

        let dir_hash_table = storage
            .clone()
            .slice(header.dir_hash_table_offset, header.dir_hash_table_size)
            .context(SliceSnafu)?;
        let dir_meta_table = storage
            .clone()
            .slice(header.dir_meta_table_offset, header.dir_meta_table_size)
            .context(SliceSnafu)?;
        let file_hash_table = storage
            .clone()
            .slice(header.file_hash_table_offset, header.file_hash_table_size)
            .context(SliceSnafu)?;
        let file_meta_table = storage
            .clone()
            .slice(header.file_meta_table_offset, header.file_meta_table_size)
            .context(SliceSnafu)?;

        let directories = RomDictionary::<DirectoryRomEntry>::from_storage(dir_hash_table, dir_meta_table)
            .context(TableReadSnafu)?;
        let files = RomDictionary::<FileRomEntry>::from_storage(file_hash_table, file_meta_table)
            .context(TableReadSnafu)?;

        let table = HierarchicalRomTables::new(files, directories);
        if table.get_directory("/").is_none() {
            return Err(RomFsError::MissingRoot);
        }

        Ok(Self {
            storage,
            table,
            data_offset: header.data_offset,
        })
    }
}

impl<S: ReadStorage> Vfs for RomFileSystem<S> {
    type File<'a> = File<'a, S> where Self: 'a;
    type Dir<'a> = Directory<'a, S> where Self: 'a;

    fn root(&self) -> Self::Dir<'_> {
        // presence of the root entry is checked when the RomFS is opened
        let (name, position) = self
            .table
            .get_directory("/")
            .expect("BUG: RomFS root entry vanished after open");

        Directory {
            fs: self,
            name,
            position,
        }
    }

    fn open_dir(&self, path: &str) -> Option<Self::Dir<'_>> {
        let (name, position) = self.table.get_directory(path)?;

        Some(Directory {
            fs: self,
            name,
            position,
        })
    }

    fn open_file(&self, path: &str) -> Option<Self::File<'_>> {
        let (name, info) = self.table.get_file(path)?;

        Some(File {
            fs: self,
            name,
            info,
        })
    }
}

impl<'a, S: ReadStorage> VfsDir for Directory<'a, S> {
    type File = File<'a, S>;
    type Iter = DirectoryIter<'a, S>;

    fn name(&self) -> &str {
        self.name
    }

    fn entries(&self) -> Self::Iter {
        DirectoryIter {
            fs: self.fs,
            position: self.position,
        }
    }
}

impl<'a, S: ReadStorage> VfsFile for File<'a, S> {
    type Storage = FileStorage<S>;
    type Error = RomFsError;

    fn name(&self) -> &str {
        self.name
    }

    fn size(&self) -> u64 {
        self.info.size
    }

    fn storage(&self) -> Result<FileStorage<S>, Self::Error> {
        let storage = self.fs.storage.clone();
        let offset = self.fs.data_offset + self.info.offset;
        SliceStorage::new(storage, offset, self.info.size).context(SliceSnafu)
    }
}

#[cfg(test)]
pub(crate) mod test_image {
    //! Builds a small but structurally complete RomFS image for tests.

    use super::dictionary::RomEntryKey;
    use super::structs::{
        ChildPosition, DirectoryRomEntry, FileRomEntry, RomFileInfo, RomFsEntry, RomFsHeader,
        RomOffset,
    };
    use binrw::BinWrite;
    use std::io::Cursor;

    pub struct DirSpec {
        pub name: &'static str,
        pub parent: usize,
    }

    pub struct FileSpec {
        pub name: &'static str,
        pub parent: usize,
        pub data: &'static [u8],
    }

    fn aligned_name_len(name: &str) -> u32 {
        (name.len() as u32 + 3) & !3
    }

    /// Lays out directories and files (parents referenced by index into
    /// `dirs`, index 0 being the root which must come first) into a
    /// serialized RomFS image.
    pub fn build_romfs(dirs: &[DirSpec], files: &[FileSpec], bucket_count: usize) -> Vec<u8> {
        // first pass: table offsets
        let mut dir_offsets = Vec::with_capacity(dirs.len());
        let mut off = 0u32;
        for d in dirs {
            dir_offsets.push(RomOffset(off));
            off += 0x18 + aligned_name_len(d.name);
        }
        let dir_meta_size = off as u64;

        let mut file_offsets = Vec::with_capacity(files.len());
        let mut off = 0u32;
        for f in files {
            file_offsets.push(RomOffset(off));
            off += 0x20 + aligned_name_len(f.name);
        }
        let file_meta_size = off as u64;

        // sibling chains and child positions
        let mut positions = vec![
            ChildPosition {
                next_directory: RomOffset::NONE,
                next_file: RomOffset::NONE,
            };
            dirs.len()
        ];
        let mut dir_siblings = vec![RomOffset::NONE; dirs.len()];
        for (i, d) in dirs.iter().enumerate().skip(1).rev() {
            dir_siblings[i] = positions[d.parent].next_directory;
            positions[d.parent].next_directory = dir_offsets[i];
        }
        let mut file_siblings = vec![RomOffset::NONE; files.len()];
        for (i, f) in files.iter().enumerate().rev() {
            file_siblings[i] = positions[f.parent].next_file;
            positions[f.parent].next_file = file_offsets[i];
        }

        // hash chains
        let mut dir_buckets = vec![RomOffset::NONE; bucket_count];
        let mut dir_hash_next = vec![RomOffset::NONE; dirs.len()];
        for (i, d) in dirs.iter().enumerate() {
            let parent = if i == 0 { RomOffset(0) } else { dir_offsets[d.parent] };
            let key = RomEntryKey {
                name: d.name,
                parent,
            };
            let bucket = key.hash() as usize % bucket_count;
            dir_hash_next[i] = dir_buckets[bucket];
            dir_buckets[bucket] = dir_offsets[i];
        }
        let mut file_buckets = vec![RomOffset::NONE; bucket_count];
        let mut file_hash_next = vec![RomOffset::NONE; files.len()];
        for (i, f) in files.iter().enumerate() {
            let key = RomEntryKey {
                name: f.name,
                parent: dir_offsets[f.parent],
            };
            let bucket = key.hash() as usize % bucket_count;
            file_hash_next[i] = file_buckets[bucket];
            file_buckets[bucket] = file_offsets[i];
        }

        // file data region
        let mut data = Vec::new();
        let mut file_infos = Vec::with_capacity(files.len());
        for f in files {
            while data.len() % 0x10 != 0 {
                data.push(0);
            }
            file_infos.push(RomFileInfo {
                offset: data.len() as u64,
                size: f.data.len() as u64,
            });
            data.extend_from_slice(f.data);
        }

        // serialize the tables
        let mut dir_meta = Cursor::new(Vec::new());
        for (i, d) in dirs.iter().enumerate() {
            let entry = RomFsEntry {
                parent: if i == 0 { RomOffset(0) } else { dir_offsets[d.parent] },
                value: DirectoryRomEntry {
                    next_sibling: dir_siblings[i],
                    position: positions[i],
                },
                hash_next: dir_hash_next[i],
                name_length: d.name.len() as u32,
            };
            entry.write(&mut dir_meta).unwrap();
            dir_meta.get_mut().extend_from_slice(d.name.as_bytes());
            let pos = dir_meta.get_ref().len() as u64;
            dir_meta.set_position(pos);
            while dir_meta.get_ref().len() % 4 != 0 {
                dir_meta.get_mut().push(0);
            }
            let pos = dir_meta.get_ref().len() as u64;
            dir_meta.set_position(pos);
        }
        let dir_meta = dir_meta.into_inner();
        assert_eq!(dir_meta.len() as u64, dir_meta_size);

        let mut file_meta = Cursor::new(Vec::new());
        for (i, f) in files.iter().enumerate() {
            let entry = RomFsEntry {
                parent: dir_offsets[f.parent],
                value: FileRomEntry {
                    next_sibling: file_siblings[i],
                    info: file_infos[i],
                },
                hash_next: file_hash_next[i],
                name_length: f.name.len() as u32,
            };
            entry.write(&mut file_meta).unwrap();
            file_meta.get_mut().extend_from_slice(f.name.as_bytes());
            let pos = file_meta.get_ref().len() as u64;
            file_meta.set_position(pos);
            while file_meta.get_ref().len() % 4 != 0 {
                file_meta.get_mut().push(0);
            }
            let pos = file_meta.get_ref().len() as u64;
            file_meta.set_position(pos);
        }
        let file_meta = file_meta.into_inner();
        assert_eq!(file_meta.len() as u64, file_meta_size);

        // assemble the image
        let header_size = 0x50u64;
        let dir_hash_offset = header_size;
        let dir_hash_size = (bucket_count * 4) as u64;
        let dir_meta_offset = dir_hash_offset + dir_hash_size;
        let file_hash_offset = dir_meta_offset + dir_meta_size;
        let file_hash_size = (bucket_count * 4) as u64;
        let file_meta_offset = file_hash_offset + file_hash_size;
        let data_offset = (file_meta_offset + file_meta_size + 0xf) & !0xf;

        let header = RomFsHeader {
            header_size,
            dir_hash_table_offset: dir_hash_offset,
            dir_hash_table_size: dir_hash_size,
            dir_meta_table_offset: dir_meta_offset,
            dir_meta_table_size: dir_meta_size,
            file_hash_table_offset: file_hash_offset,
            file_hash_table_size: file_hash_size,
            file_meta_table_offset: file_meta_offset,
            file_meta_table_size: file_meta_size,
            data_offset,
        };

        let mut image = Cursor::new(Vec::new());
        header.write(&mut image).unwrap();
        let mut image = image.into_inner();
        for b in &dir_buckets {
            image.extend_from_slice(&b.0.to_le_bytes());
        }
        image.extend_from_slice(&dir_meta);
        for b in &file_buckets {
            image.extend_from_slice(&b.0.to_le_bytes());
        }
        image.extend_from_slice(&file_meta);
        image.resize(data_offset as usize, 0);
        image.extend_from_slice(&data);
        image
    }

    pub fn sample_image() -> Vec<u8> {
        build_romfs(
            &[
                DirSpec {
                    name: "",
                    parent: 0,
                },
                DirSpec {
                    name: "sub",
                    parent: 0,
                },
            ],
            &[
                FileSpec {
                    name: "a.txt",
                    parent: 0,
                    data: b"alpha",
                },
                FileSpec {
                    name: "b.bin",
                    parent: 1,
                    data: &[1, 2, 3, 4],
                },
            ],
            3,
        )
    }
}
