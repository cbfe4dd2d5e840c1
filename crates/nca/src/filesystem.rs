use crate::storage::ReadStorage;
use std::fmt::{Debug, Display};

/// A single directory entry: either a file or a nested directory.
#[derive(Debug)]
pub enum VfsEntry<F: VfsFile, D: VfsDir> {
    File(F),
    Dir(D),
}

impl<F: VfsFile, D: VfsDir> VfsEntry<F, D> {
    pub fn file(self) -> Option<F> {
        match self {
            VfsEntry::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn dir(self) -> Option<D> {
        match self {
            VfsEntry::Dir(d) => Some(d),
            _ => None,
        }
    }
}

pub trait VfsFile: Sized {
    type Storage: ReadStorage;
    type Error: Debug + Display;

    fn name(&self) -> &str;
    fn size(&self) -> u64;
    fn storage(&self) -> Result<Self::Storage, Self::Error>;
}

pub trait VfsDir: Sized {
    type File: VfsFile;
    type Iter: Iterator<Item = VfsEntry<Self::File, Self>>;

    fn name(&self) -> &str;
    fn entries(&self) -> Self::Iter;
}

/// A read-only file system decoded out of an NCA section: either the flat
/// PFS0 or the hierarchical RomFS, possibly with the patch overlay below.
pub trait Vfs: Sized {
    type File<'a>: VfsFile
    where
        Self: 'a;
    type Dir<'a>: VfsDir<File = Self::File<'a>>
    where
        Self: 'a;

    fn root(&self) -> Self::Dir<'_>;
    fn open_dir(&self, path: &str) -> Option<Self::Dir<'_>>;
    fn open_file(&self, path: &str) -> Option<Self::File<'_>>;
}

pub struct WalkIter<D: VfsDir> {
    inner: Vec<D::Iter>,
    path: String,
}

impl<D: VfsDir> Iterator for WalkIter<D> {
    type Item = (String, VfsEntry<D::File, D>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let it = self.inner.last_mut()?;
            match it.next() {
                None => {
                    self.inner.pop();
                    match self.path.rfind('/') {
                        Some(idx) => self.path.truncate(idx),
                        None => self.path.clear(),
                    }
                }
                Some(VfsEntry::File(f)) => {
                    break Some((format!("{}/{}", self.path, f.name()), VfsEntry::File(f)))
                }
                Some(VfsEntry::Dir(d)) => {
                    self.inner.push(d.entries());
                    self.path.push('/');
                    self.path.push_str(d.name());
                    break Some((self.path.clone(), VfsEntry::Dir(d)));
                }
            }
        }
    }
}

pub trait VfsDirExt: VfsDir {
    /// Depth-first walk over all entries below this directory, yielding
    /// slash-separated paths relative to it.
    fn walk(&self) -> WalkIter<Self> {
        WalkIter {
            inner: vec![self.entries()],
            path: String::new(),
        }
    }
}

impl<T: VfsDir> VfsDirExt for T {}
