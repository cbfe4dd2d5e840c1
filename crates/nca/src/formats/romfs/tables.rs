use crate::formats::romfs::dictionary::{RomDictionary, RomEntryKey};
use crate::formats::romfs::structs::{
    ChildPosition, DirectoryRomEntry, FileRomEntry, RomFileInfo, RomOffset,
};
use tracing::warn;

/// The root directory entry always sits at the start of its table.
const ROOT_DIR: RomOffset = RomOffset(0);

#[derive(Debug)]
pub struct HierarchicalRomTables {
    file_table: RomDictionary<FileRomEntry>,
    directory_table: RomDictionary<DirectoryRomEntry>,
}

impl HierarchicalRomTables {
    pub fn new(
        file_table: RomDictionary<FileRomEntry>,
        directory_table: RomDictionary<DirectoryRomEntry>,
    ) -> Self {
        Self {
            file_table,
            directory_table,
        }
    }

    /// Walks the directory components of a path down from the root,
    /// returning the table offset of the final directory.
    fn resolve_dir(&self, path: &str) -> Option<RomOffset> {
        let mut parent = ROOT_DIR;
        for part in path.split('/') {
            if part.is_empty() {
                continue;
            }
            (_, parent) = self.lookup_dir(RomEntryKey { name: part, parent })?;
        }
        Some(parent)
    }

    /// Hash lookup with a linear fallback over the parent's child chain
    /// for when the hash table is damaged.
    fn lookup_dir(&self, key: RomEntryKey) -> Option<(&str, RomOffset)> {
        self.directory_table.find(key).or_else(|| {
            warn!(
                "RomFS directory hash lookup missed for {:?}, walking siblings",
                key.name
            );
            let (_, parent) = self.directory_table.entry(key.parent)?;
            let mut id = parent.value.position.next_directory;
            while id.is_some() {
                let (name, entry) = self.directory_table.entry(id)?;
                if name == key.name {
                    return Some((name, id));
                }
                id = entry.value.next_sibling;
            }
            None
        })
    }

    fn lookup_file(&self, key: RomEntryKey) -> Option<(&str, FileRomEntry)> {
        if let Some((name, id)) = self.file_table.find(key) {
            let (_, entry) = self.file_table.entry(id)?;
            return Some((name, entry.value));
        }

        warn!(
            "RomFS file hash lookup missed for {:?}, walking siblings",
            key.name
        );
        let (_, parent) = self.directory_table.entry(key.parent)?;
        let mut id = parent.value.position.next_file;
        while id.is_some() {
            let (name, entry) = self.file_table.entry(id)?;
            if name == key.name {
                return Some((name, entry.value));
            }
            id = entry.value.next_sibling;
        }
        None
    }

    pub fn get_file(&self, path: &str) -> Option<(&str, RomFileInfo)> {
        let (dir_path, file_name) = path.rsplit_once('/').unwrap_or(("", path));
        let parent = self.resolve_dir(dir_path)?;

        self.lookup_file(RomEntryKey {
            name: file_name,
            parent,
        })
        .map(|(name, v)| (name, v.info))
    }

    pub fn get_directory(&self, path: &str) -> Option<(&str, ChildPosition)> {
        let id = self.resolve_dir(path)?;
        let (name, entry) = self.directory_table.entry(id)?;
        Some((name, entry.value.position))
    }

    pub fn next_file(&self, position: &mut ChildPosition) -> Option<(&str, RomFileInfo)> {
        if position.next_file.is_none() {
            return None;
        }

        let (name, entry) = self.file_table.entry(position.next_file)?;

        position.next_file = entry.value.next_sibling;

        Some((name, entry.value.info))
    }

    pub fn next_directory(&self, position: &mut ChildPosition) -> Option<(&str, ChildPosition)> {
        if position.next_directory.is_none() {
            return None;
        }

        let (name, entry) = self.directory_table.entry(position.next_directory)?;

        position.next_directory = entry.value.next_sibling;

        Some((name, entry.value.position))
    }
}
