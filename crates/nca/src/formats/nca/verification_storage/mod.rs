use crate::formats::nca::structs::{IvfcIntegrityInfoLevel, Sha256IntegrityInfoLevel};
use crate::storage::{
    BlockCacheStorage, BlockedStorage, LinearStorage, ReadStorage, ReadStorageExt, SharedStorage,
    SliceError, SliceStorage, StorageError, VecStorage,
};
use snafu::Snafu;
use std::time::Duration;

mod hash_level_storage;
pub use hash_level_storage::HashLevelStorage;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IntegrityStorageType {
    Sha256,
    Ivfc,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IntegrityCheckLevel {
    /// No integrity checks will be performed.
    None,
    /// Invalid blocks will be marked as invalid when read, and will not cause an error.
    IgnoreOnInvalid,
    /// An error will be returned when an invalid block is read.
    Full,
}

const DIGEST_SIZE: usize = 0x20;

/// Cache sizing for hash levels; the same upper-level block covers many
/// data blocks, so a handful of entries removes almost all re-reads.
const HASH_BLOCKS_IN_CACHE: u64 = 16;
const HASH_CACHE_TIME_TO_IDLE: Duration = Duration::from_secs(60);

#[derive(Snafu, Debug)]
pub enum VerificationBuildError {
    #[snafu(display("A hash level lies outside its section"))]
    LevelSlice { source: SliceError },
    #[snafu(display("Unsupported hash level count {}", count))]
    LevelCount { count: u32 },
}

type AddLevel<S, H> = LinearStorage<
    HashLevelStorage<BlockCacheStorage<BlockedStorage<SliceStorage<SharedStorage<S>>>>, H>,
>;

type VerificationStorage1<S> = AddLevel<S, VecStorage>;
type VerificationStorage2<S> = AddLevel<S, VerificationStorage1<S>>;
type VerificationStorage3<S> = AddLevel<S, VerificationStorage2<S>>;
type VerificationStorage4<S> = AddLevel<S, VerificationStorage3<S>>;
type VerificationStorage5<S> = AddLevel<S, VerificationStorage4<S>>;
type VerificationStorage6<S> = AddLevel<S, VerificationStorage5<S>>;

/// A section storage with its hash tree stacked on top: reads of the
/// outermost (data) level pull the covering blocks of every upper level
/// in and verify them on the way down.
#[derive(Debug)]
pub enum NcaVerificationStorage<S: ReadStorage> {
    /// Sections whose FS header specifies no hashing.
    Unverified(S),
    Level1(VerificationStorage1<S>),
    Level2(VerificationStorage2<S>),
    Level3(VerificationStorage3<S>),
    Level4(VerificationStorage4<S>),
    Level5(VerificationStorage5<S>),
    Level6(VerificationStorage6<S>),
}

#[derive(Debug, Copy, Clone)]
struct LevelInfo {
    offset: u64,
    size: u64,
    block_size: u32,
}

impl From<IvfcIntegrityInfoLevel> for LevelInfo {
    fn from(v: IvfcIntegrityInfoLevel) -> Self {
        Self {
            offset: v.offset,
            size: v.size,
            block_size: 1 << v.block_size,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct VerificationParams {
    integrity_level: IntegrityCheckLevel,
    ty: IntegrityStorageType,
}

fn add_level<S: ReadStorage, H: ReadStorage>(
    base_storage: SharedStorage<S>,
    hash_storage: H,
    level: LevelInfo,
    level_index: u32,
    params: VerificationParams,
) -> Result<AddLevel<S, H>, VerificationBuildError> {
    let data_storage = BlockCacheStorage::new(
        BlockedStorage::new(
            SliceStorage::new(base_storage, level.offset, level.size)
                .map_err(|source| VerificationBuildError::LevelSlice { source })?,
            level.block_size as u64,
        ),
        HASH_BLOCKS_IN_CACHE,
        HASH_CACHE_TIME_TO_IDLE,
    );

    Ok(LinearStorage::new(HashLevelStorage::new(
        data_storage,
        hash_storage,
        params.integrity_level,
        params.ty,
        level_index,
    )))
}

fn make_level1_storage<S: ReadStorage>(
    storage: SharedStorage<S>,
    master_hash: [u8; DIGEST_SIZE],
    levels: [LevelInfo; 1],
    params: VerificationParams,
) -> Result<VerificationStorage1<S>, VerificationBuildError> {
    let [_levels @ .., level] = levels;
    let hash_storage = VecStorage::new(master_hash.into());
    add_level(storage, hash_storage, level, 1, params)
}

macro_rules! make_level_storage {
    ($name:ident, $level:literal, $res:ident, $prev:ident) => {
        fn $name<S: ReadStorage>(
            storage: SharedStorage<S>,
            master_hash: [u8; DIGEST_SIZE],
            levels: [LevelInfo; $level],
            params: VerificationParams,
        ) -> Result<$res<S>, VerificationBuildError> {
            let [levels @ .., level] = levels;
            let hash_storage = $prev(storage.clone(), master_hash, levels, params)?;
            add_level(storage, hash_storage, level, $level, params)
        }
    };
}

make_level_storage!(
    make_level2_storage,
    2,
    VerificationStorage2,
    make_level1_storage
);
make_level_storage!(
    make_level3_storage,
    3,
    VerificationStorage3,
    make_level2_storage
);
make_level_storage!(
    make_level4_storage,
    4,
    VerificationStorage4,
    make_level3_storage
);
make_level_storage!(
    make_level5_storage,
    5,
    VerificationStorage5,
    make_level4_storage
);
make_level_storage!(
    make_level6_storage,
    6,
    VerificationStorage6,
    make_level5_storage
);

impl<S: ReadStorage> NcaVerificationStorage<S> {
    pub fn new_unverified(storage: S) -> Self {
        Self::Unverified(storage)
    }

    pub fn new_sha256_verification_storage(
        storage: S,
        master_hash: [u8; DIGEST_SIZE],
        levels: [Sha256IntegrityInfoLevel; 2],
        block_size: u32,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<Self, VerificationBuildError> {
        let params = VerificationParams {
            integrity_level,
            ty: IntegrityStorageType::Sha256,
        };

        Ok(Self::Level2(make_level2_storage(
            storage.shared(),
            master_hash,
            [
                LevelInfo {
                    offset: levels[0].offset,
                    size: levels[0].size,
                    // the whole hash table is verified as one block
                    block_size: levels[0].size as u32,
                },
                LevelInfo {
                    offset: levels[1].offset,
                    size: levels[1].size,
                    block_size,
                },
            ],
            params,
        )?))
    }

    pub fn new_ivfc_verification_storage(
        storage: S,
        master_hash: [u8; DIGEST_SIZE],
        level_count: u32,
        levels: [IvfcIntegrityInfoLevel; 6],
        integrity_level: IntegrityCheckLevel,
    ) -> Result<Self, VerificationBuildError> {
        let params = VerificationParams {
            integrity_level,
            ty: IntegrityStorageType::Ivfc,
        };

        let levels: [LevelInfo; 6] = levels.map(Into::into);

        let storage = storage.shared();
        Ok(match level_count {
            1 => Self::Level1(make_level1_storage(
                storage,
                master_hash,
                [levels[0]],
                params,
            )?),
            2 => Self::Level2(make_level2_storage(
                storage,
                master_hash,
                [levels[0], levels[1]],
                params,
            )?),
            3 => Self::Level3(make_level3_storage(
                storage,
                master_hash,
                [levels[0], levels[1], levels[2]],
                params,
            )?),
            4 => Self::Level4(make_level4_storage(
                storage,
                master_hash,
                [levels[0], levels[1], levels[2], levels[3]],
                params,
            )?),
            5 => Self::Level5(make_level5_storage(
                storage,
                master_hash,
                [levels[0], levels[1], levels[2], levels[3], levels[4]],
                params,
            )?),
            6 => Self::Level6(make_level6_storage(
                storage,
                master_hash,
                [
                    levels[0], levels[1], levels[2], levels[3], levels[4], levels[5],
                ],
                params,
            )?),
            count => return Err(VerificationBuildError::LevelCount { count }),
        })
    }
}

impl<S: ReadStorage> ReadStorage for NcaVerificationStorage<S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        match self {
            Self::Unverified(storage) => storage.read_at(offset, buf),
            Self::Level1(storage) => storage.read_at(offset, buf),
            Self::Level2(storage) => storage.read_at(offset, buf),
            Self::Level3(storage) => storage.read_at(offset, buf),
            Self::Level4(storage) => storage.read_at(offset, buf),
            Self::Level5(storage) => storage.read_at(offset, buf),
            Self::Level6(storage) => storage.read_at(offset, buf),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Self::Unverified(storage) => storage.size(),
            Self::Level1(storage) => storage.size(),
            Self::Level2(storage) => storage.size(),
            Self::Level3(storage) => storage.size(),
            Self::Level4(storage) => storage.size(),
            Self::Level5(storage) => storage.size(),
            Self::Level6(storage) => storage.size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IntegrityCheckLevel, NcaVerificationStorage};
    use crate::formats::nca::structs::IvfcIntegrityInfoLevel;
    use crate::storage::{ReadStorage, StorageError, VecStorage};
    use digest::Digest;
    use sha2::Sha256;

    const DATA_BLOCK: usize = 0x10;
    const HASH_BLOCK: usize = 0x40;

    /// Two-level IVFC image: a hash table (one 0x40 block, two hashes
    /// used) followed by two 0x10-byte data blocks.
    fn build_image() -> (Vec<u8>, [u8; 0x20]) {
        let data: Vec<u8> = (0u8..0x20).collect();

        let mut hash_table = Vec::new();
        for block in data.chunks(DATA_BLOCK) {
            hash_table.extend_from_slice(&Sha256::digest(block));
        }
        // level data is hashed zero-padded to the full block
        hash_table.resize(HASH_BLOCK, 0);

        let master_hash: [u8; 0x20] = Sha256::digest(&hash_table).into();

        let mut image = hash_table;
        image.extend_from_slice(&data);
        (image, master_hash)
    }

    fn levels() -> [IvfcIntegrityInfoLevel; 6] {
        let mut levels = [IvfcIntegrityInfoLevel {
            offset: 0,
            size: 0,
            block_size: 0,
        }; 6];
        levels[0] = IvfcIntegrityInfoLevel {
            offset: 0,
            size: HASH_BLOCK as u64,
            block_size: 6, // log2(0x40)
        };
        levels[1] = IvfcIntegrityInfoLevel {
            offset: HASH_BLOCK as u64,
            size: 0x20,
            block_size: 4, // log2(0x10)
        };
        levels
    }

    fn storage(
        image: Vec<u8>,
        master_hash: [u8; 0x20],
        check: IntegrityCheckLevel,
    ) -> NcaVerificationStorage<VecStorage> {
        NcaVerificationStorage::new_ivfc_verification_storage(
            VecStorage::new(image),
            master_hash,
            2,
            levels(),
            check,
        )
        .unwrap()
    }

    #[test]
    fn verifies_valid_data() {
        let (image, master_hash) = build_image();
        let storage = storage(image, master_hash, IntegrityCheckLevel::Full);

        let mut buf = [0; 0x20];
        storage.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, core::array::from_fn(|i| i as u8));

        // verification is idempotent: the second read hits the
        // remembered verdict and returns the same data
        let mut again = [0; 0x20];
        storage.read_at(0, &mut again).unwrap();
        assert_eq!(again, buf);
    }

    #[test]
    fn detects_tampered_data_with_level_and_offset() {
        let (mut image, master_hash) = build_image();
        // flip a bit in the second data block
        image[HASH_BLOCK + DATA_BLOCK] ^= 1;
        let storage = storage(image, master_hash, IntegrityCheckLevel::Full);

        // the first block is untouched
        let mut buf = [0; DATA_BLOCK];
        storage.read_at(0, &mut buf).unwrap();

        let err = storage
            .read_at(DATA_BLOCK as u64, &mut buf)
            .unwrap_err();
        match err {
            StorageError::Integrity { level, offset } => {
                assert_eq!(level, 2);
                assert_eq!(offset, DATA_BLOCK as u64);
            }
            other => panic!("expected an integrity error, got {:?}", other),
        }

        // failing verdicts are remembered too
        assert!(storage.read_at(DATA_BLOCK as u64, &mut buf).is_err());
    }

    #[test]
    fn detects_tampered_hash_level() {
        let (mut image, master_hash) = build_image();
        // corrupt the hash table itself; the master hash catches it
        image[0] ^= 1;
        let storage = storage(image, master_hash, IntegrityCheckLevel::Full);

        let mut buf = [0; DATA_BLOCK];
        let err = storage.read_at(0, &mut buf).unwrap_err();
        match err {
            StorageError::Integrity { level, offset } => {
                assert_eq!(level, 1);
                assert_eq!(offset, 0);
            }
            other => panic!("expected an integrity error, got {:?}", other),
        }
    }

    #[test]
    fn ignore_mode_returns_tampered_data() {
        let (mut image, master_hash) = build_image();
        image[HASH_BLOCK] ^= 1;
        let storage = storage(image, master_hash, IntegrityCheckLevel::IgnoreOnInvalid);

        let mut buf = [0; DATA_BLOCK];
        storage.read_at(0, &mut buf).unwrap();
        assert_eq!(buf[0], 1); // the flipped byte comes through
    }
}
