pub mod bktr;
mod contents;
mod crypt_storage;
pub mod filesystem;
mod structs;
mod verification_storage;

use binrw::BinRead;
use snafu::{ResultExt, Snafu};
use std::io::Cursor;
use tracing::debug;

use crate::crypto::keyset::KeySet;
use crate::crypto::{AesKey, AesXtsKey};
use crate::formats::nca::bktr::BktrError;
use crate::formats::pfs::PfsParseError;
use crate::formats::romfs::RomFsError;
use crate::ids::{RightsId, TitleId};
use crate::storage::{ReadStorage, ReadStorageExt, SharedStorage, StorageError};

pub use contents::{
    DecryptedSectionStorage, PatchedSectionFileSystem, PatchedSectionStorage, RawSectionStorage,
    SectionFileSystem, SectionStorage,
};
pub use crypt_storage::SectionCryptStorage;
pub use filesystem::NcaFileSystem;
pub use structs::{
    DistributionType, IntegrityInfo, IvfcIntegrityInfo, IvfcIntegrityInfoLevel, MediaOffset,
    NcaContentType, NcaEncryptionType, NcaFormatType, NcaFsHeader, NcaHashType, NcaHeader,
    NcaKeyArea, NcaMagic, NcaSectionType, PatchInfo, SectionTableEntry, Sha256Hash,
    Sha256IntegrityInfo, Sha256IntegrityInfoLevel, SparseInfo, MEDIA_UNIT_SIZE,
};
pub use verification_storage::{
    IntegrityCheckLevel, NcaVerificationStorage, VerificationBuildError,
};

#[derive(Snafu, Debug)]
pub enum NcaError {
    /// NCA: Failed to read from the storage
    Storage { source: StorageError },
    /// NCA: Missing a crypto key
    MissingKey {
        source: crate::crypto::keyset::MissingKeyError,
    },
    /// NCA: Missing a title key
    MissingTitleKey {
        source: crate::crypto::keyset::MissingTitleKeyError,
    },
    /// NCA: Failed to parse the NCA header
    NcaHeaderParsing { source: binrw::Error },
    /// NCA: Failed to parse the NCA FS header for section {index}
    FsHeaderParsing { index: usize, source: binrw::Error },
    /// NCA: {magic:?} archives are not supported
    UnsupportedArchive { magic: NcaMagic },
    /// NCA: FS header hash mismatch for section {index}
    FsHeaderHashMismatch { index: usize },
    /// NCA: Section {index} lies outside the archive
    SectionOutOfBounds { index: usize },
    /// NCA: Invalid size: expected {expected}, got {actual}
    StorageSizeMismatch { expected: u64, actual: u64 },
    /// NCA: Section {index} is not present
    SectionNotPresent { index: usize },
    /// NCA: No present section has the {ty:?} role
    SectionRoleNotPresent { ty: NcaSectionType },
    /// NCA: Section {index} uses an unsupported {layer} layer
    UnsupportedLayer { layer: &'static str, index: usize },
    /// NCA: Section {index} is XTS-encrypted but no key-area XTS key is available
    MissingXtsKey { index: usize },
    /// NCA: Section {index} is a patch section; compose it with the base RomFS to read it
    PatchSectionWithoutBase { index: usize },
    /// NCA: Section {index} is not a patch section
    NotAPatchSection { index: usize },
    /// NCA: Failed to build the hash verification stack
    VerificationBuild { source: VerificationBuildError },
    /// NCA: Failed to parse the BKTR bucket trees
    Bktr { source: BktrError },
    /// NCA: Failed to parse the RomFS of section {index}
    RomFs { index: usize, source: RomFsError },
    /// NCA: Failed to parse the PFS0 of section {index}
    Pfs { index: usize, source: PfsParseError },
}

#[derive(Debug)]
struct AllNcaHeaders {
    pub nca_header: NcaHeader,
    pub fs_headers: [Option<NcaFsHeader>; 4],
}

impl AllNcaHeaders {
    pub fn has_rights_id(&self) -> bool {
        !self.nca_header.rights_id.is_empty()
    }

    /// Effective key generation with the historical off-by-one applied;
    /// generation 0 stays 0.
    pub fn master_key_revision(&self) -> u8 {
        std::cmp::max(
            self.nca_header.key_generation_1,
            self.nca_header.key_generation_2,
        )
        .saturating_sub(1)
    }
}

#[derive(Debug)]
enum NcaContentKeys {
    /// NCA is decrypted, no keys are needed.
    Plaintext,
    /// Keys that were decrypted from the key area for Normal crypto
    KeyArea { ctr: AesKey, xts: AesXtsKey },
    /// Decrypted key for the RightsId crypto obtained externally
    RightsId(AesKey),
}

/// A decoded NCA: the archive handle owning the body storage, the parsed
/// headers and the content keys. Sections, file systems and the patch
/// overlay are opened off of it.
#[derive(Debug)]
pub struct Nca<S: ReadStorage> {
    body: SharedStorage<S>,
    headers: AllNcaHeaders,
    content_key: NcaContentKeys,
}

const ALL_HEADERS_SIZE: usize = 0xc00;
const NCA_HEADER_SIZE: usize = 0x400;
const HEADER_SECTOR_SIZE: usize = 0x200;

impl<S: ReadStorage> Nca<S> {
    pub fn new(key_set: &KeySet, storage: S) -> Result<Self, NcaError> {
        let (headers, is_decrypted) = Self::parse_headers(key_set, &storage)?;

        let content_key = if is_decrypted {
            NcaContentKeys::Plaintext
        } else if headers.has_rights_id() {
            let title_key = key_set
                .title_key(&headers.nca_header.rights_id)
                .context(MissingTitleKeySnafu)?;

            let title_kek = key_set
                .title_kek(headers.master_key_revision())
                .context(MissingKeySnafu)?;

            NcaContentKeys::RightsId(title_key.decrypt(title_kek))
        } else {
            let kak = key_set
                .key_area_key(
                    headers.master_key_revision(),
                    headers.nca_header.key_area_key_index,
                )
                .context(MissingKeySnafu)?;

            let ctr = kak.decrypt_key(headers.nca_header.key_area.encrypted_ctr_key);
            let xts = kak.decrypt_xts_key(headers.nca_header.key_area.encrypted_xts_key);

            NcaContentKeys::KeyArea { ctr, xts }
        };

        let body = storage.shared();
        if headers.nca_header.nca_size != body.size() {
            return Err(NcaError::StorageSizeMismatch {
                expected: headers.nca_header.nca_size,
                actual: body.size(),
            });
        }

        Ok(Self {
            body,
            headers,
            content_key,
        })
    }

    pub fn is_plaintext(&self) -> bool {
        matches!(self.content_key, NcaContentKeys::Plaintext)
    }

    fn try_parse_nca_header(header: &[u8]) -> Result<NcaHeader, NcaError> {
        assert_eq!(header.len(), NCA_HEADER_SIZE);
        let mut cur = Cursor::new(header);

        let res = NcaHeader::read(&mut cur).context(NcaHeaderParsingSnafu)?;
        assert_eq!(cur.position(), NCA_HEADER_SIZE as u64);
        Ok(res)
    }

    /// Decrypts and parses the 0xC00 header region.
    fn parse_headers(key_set: &KeySet, storage: &S) -> Result<(AllNcaHeaders, bool), NcaError> {
        let mut headers_data = [0; ALL_HEADERS_SIZE];
        storage.read_at(0, &mut headers_data).context(StorageSnafu)?;

        let (nca_header_data, fs_header_data) = headers_data.split_at_mut(NCA_HEADER_SIZE);

        let mut is_decrypted = false;

        let nca_header = if let Ok(nca_header) = Self::try_parse_nca_header(nca_header_data) {
            // if we were able to parse the NCA header, chances are it's not encrypted
            debug!("NCA header parsed without decryption, treating the NCA as plaintext");
            is_decrypted = true;
            nca_header
        } else {
            let key = key_set.header_key().context(MissingKeySnafu)?;

            key.decrypt(nca_header_data, 0, HEADER_SECTOR_SIZE);

            let nca_header = Self::try_parse_nca_header(nca_header_data)?;

            match nca_header.magic {
                NcaMagic::Nca0 | NcaMagic::Nca1 => {
                    return Err(NcaError::UnsupportedArchive {
                        magic: nca_header.magic,
                    })
                }
                NcaMagic::Nca2 => {
                    // Nca2 encrypts each fs header as if it was sector 0
                    for i in 0..4 {
                        key.decrypt(
                            &mut fs_header_data
                                [i * HEADER_SECTOR_SIZE..(i + 1) * HEADER_SECTOR_SIZE],
                            0,
                            HEADER_SECTOR_SIZE,
                        );
                    }
                }
                NcaMagic::Nca3 => {
                    // decrypt the rest with continuing sector numbers
                    key.decrypt(fs_header_data, 2, HEADER_SECTOR_SIZE);
                }
            }

            nca_header
        };

        if matches!(nca_header.magic, NcaMagic::Nca0 | NcaMagic::Nca1) {
            return Err(NcaError::UnsupportedArchive {
                magic: nca_header.magic,
            });
        }

        // the header signatures are not verified, only the fs header hashes

        let mut fs_headers = [None; 4];
        for (index, data) in fs_header_data.chunks_exact(HEADER_SECTOR_SIZE).enumerate() {
            let section_entry = nca_header.section_table[index];

            if !section_entry.is_enabled {
                continue;
            }

            if section_entry.end.0 < section_entry.start.0
                || u64::from(section_entry.end) > nca_header.nca_size
            {
                return Err(NcaError::SectionOutOfBounds { index });
            }

            if !nca_header.fs_header_hashes[index].matches(data) {
                return Err(NcaError::FsHeaderHashMismatch { index });
            }

            let mut cur = Cursor::new(data);
            fs_headers[index] =
                Some(NcaFsHeader::read(&mut cur).context(FsHeaderParsingSnafu { index })?);
            assert_eq!(cur.position(), HEADER_SECTOR_SIZE as u64);
        }

        Ok((
            AllNcaHeaders {
                nca_header,
                fs_headers,
            },
            is_decrypted,
        ))
    }
}

impl<S: ReadStorage> Nca<S> {
    pub fn magic(&self) -> NcaMagic {
        self.headers.nca_header.magic
    }

    pub fn content_type(&self) -> NcaContentType {
        self.headers.nca_header.content_type
    }

    pub fn title_id(&self) -> TitleId {
        self.headers.nca_header.title_id
    }

    pub fn rights_id(&self) -> RightsId {
        self.headers.nca_header.rights_id
    }

    pub fn section_table(&self) -> &[SectionTableEntry; 4] {
        &self.headers.nca_header.section_table
    }

    pub fn section_type(&self, index: usize) -> Option<NcaSectionType> {
        use NcaContentType::Program;
        use NcaSectionType::{Code, Data, Logo};

        if !self.headers.nca_header.section_table[index].is_enabled {
            return None;
        }

        match (index, self.headers.nca_header.content_type) {
            (0, Program) => Some(Code),
            (1, Program) => Some(Data),
            (2, Program) => Some(Logo),
            (0, _) => Some(Data),
            _ => None,
        }
    }

    /// Decodes the file system of the section with the given role.
    pub fn fs(
        &self,
        ty: NcaSectionType,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<SectionFileSystem<S>, NcaError> {
        let index = (0..4)
            .find(|&i| self.section_type(i) == Some(ty))
            .ok_or(NcaError::SectionRoleNotPresent { ty })?;

        self.section_fs(index, integrity_level)
    }
}
