use crate::filesystem::{Vfs, VfsDir, VfsEntry, VfsFile};
use crate::formats::pfs::{self, PartitionFileSystem};
use crate::formats::romfs::{self, RomFileSystem};
use crate::storage::ReadStorage;

type NcaFileStorage<S> = pfs::FileStorage<S>;

/// The decoded file system of a section, PFS0 or RomFS.
#[derive(Debug)]
pub enum NcaFileSystem<S: ReadStorage> {
    Romfs(RomFileSystem<S>),
    Pfs(PartitionFileSystem<S>),
}

#[derive(Debug)]
pub enum NcaFile<'a, S: ReadStorage> {
    Romfs(romfs::File<'a, S>),
    Pfs(pfs::File<'a, S>),
}

#[derive(Debug)]
pub enum NcaDirectory<'a, S: ReadStorage> {
    Romfs(romfs::Directory<'a, S>),
    Pfs(pfs::Directory<'a, S>),
}

pub enum NcaDirectoryIter<'a, S: ReadStorage> {
    Romfs(romfs::DirectoryIter<'a, S>),
    Pfs(pfs::DirectoryIter<'a, S>),
}

#[derive(Debug)]
pub enum NcaOpenError {
    Romfs(romfs::RomFsError),
    Pfs(pfs::PfsOpenError),
}

impl std::fmt::Display for NcaOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NcaOpenError::Romfs(e) => e.fmt(f),
            NcaOpenError::Pfs(e) => e.fmt(f),
        }
    }
}

impl<S: ReadStorage> NcaFileSystem<S> {
    pub fn as_pfs(&self) -> Option<&PartitionFileSystem<S>> {
        match self {
            NcaFileSystem::Pfs(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn as_romfs(&self) -> Option<&RomFileSystem<S>> {
        match self {
            NcaFileSystem::Romfs(fs) => Some(fs),
            _ => None,
        }
    }
}

impl<S: ReadStorage> Vfs for NcaFileSystem<S> {
    type File<'a> = NcaFile<'a, S> where Self: 'a;
    type Dir<'a> = NcaDirectory<'a, S> where Self: 'a;

    fn root(&self) -> Self::Dir<'_> {
        match self {
            NcaFileSystem::Romfs(fs) => NcaDirectory::Romfs(fs.root()),
            NcaFileSystem::Pfs(fs) => NcaDirectory::Pfs(fs.root()),
        }
    }

    fn open_dir(&self, path: &str) -> Option<Self::Dir<'_>> {
        match self {
            NcaFileSystem::Romfs(fs) => fs.open_dir(path).map(NcaDirectory::Romfs),
            NcaFileSystem::Pfs(fs) => fs.open_dir(path).map(NcaDirectory::Pfs),
        }
    }

    fn open_file(&self, path: &str) -> Option<Self::File<'_>> {
        match self {
            NcaFileSystem::Romfs(fs) => fs.open_file(path).map(NcaFile::Romfs),
            NcaFileSystem::Pfs(fs) => fs.open_file(path).map(NcaFile::Pfs),
        }
    }
}

impl<'a, S: ReadStorage> VfsFile for NcaFile<'a, S> {
    type Storage = NcaFileStorage<S>;
    type Error = NcaOpenError;

    fn name(&self) -> &str {
        match self {
            NcaFile::Romfs(file) => file.name(),
            NcaFile::Pfs(file) => file.name(),
        }
    }

    fn size(&self) -> u64 {
        match self {
            NcaFile::Romfs(file) => file.size(),
            NcaFile::Pfs(file) => file.size(),
        }
    }

    fn storage(&self) -> Result<Self::Storage, Self::Error> {
        match self {
            NcaFile::Romfs(file) => file.storage().map_err(NcaOpenError::Romfs),
            NcaFile::Pfs(file) => file.storage().map_err(NcaOpenError::Pfs),
        }
    }
}

impl<'a, S: ReadStorage> VfsDir for NcaDirectory<'a, S> {
    type File = NcaFile<'a, S>;
    type Iter = NcaDirectoryIter<'a, S>;

    fn name(&self) -> &str {
        match self {
            NcaDirectory::Romfs(dir) => dir.name(),
            NcaDirectory::Pfs(dir) => dir.name(),
        }
    }

    fn entries(&self) -> Self::Iter {
        match self {
            NcaDirectory::Romfs(dir) => NcaDirectoryIter::Romfs(dir.entries()),
            NcaDirectory::Pfs(dir) => NcaDirectoryIter::Pfs(dir.entries()),
        }
    }
}

impl<'a, S: ReadStorage> Iterator for NcaDirectoryIter<'a, S> {
    type Item = VfsEntry<NcaFile<'a, S>, NcaDirectory<'a, S>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            NcaDirectoryIter::Romfs(iter) => iter.next().map(|entry| match entry {
                VfsEntry::File(file) => VfsEntry::File(NcaFile::Romfs(file)),
                VfsEntry::Dir(dir) => VfsEntry::Dir(NcaDirectory::Romfs(dir)),
            }),
            NcaDirectoryIter::Pfs(iter) => iter.next().map(|entry| match entry {
                VfsEntry::File(file) => VfsEntry::File(NcaFile::Pfs(file)),
                VfsEntry::Dir(dir) => VfsEntry::Dir(NcaDirectory::Pfs(dir)),
            }),
        }
    }
}
