use crate::crypto::{section_counter, AesKey, AesXtsKey, AES_BLOCK_SIZE, XTS_SECTOR_SIZE};
use crate::storage::{
    BlockedStorage, CtrStorage, CtrTransform, LinearStorage, ReadStorage, StorageError,
    TransformStorage, XtsStorage, XtsTransform,
};

/// The decryption layer of a section: body bytes in, plaintext out.
/// Reads are internally aligned to the cipher granularity (0x10 for CTR,
/// 0x200 for XTS); callers see exact-slice semantics.
#[derive(Debug)]
pub enum SectionCryptStorage<S: ReadStorage> {
    Plaintext(S),
    AesCtr(LinearStorage<CtrStorage<BlockedStorage<S>>>),
    AesXts(LinearStorage<XtsStorage<BlockedStorage<S>>>),
}

impl<S: ReadStorage> SectionCryptStorage<S> {
    pub fn new_plaintext(storage: S) -> Self {
        Self::Plaintext(storage)
    }

    pub fn new_ctr(storage: S, key: AesKey, section_ctr: u64, section_base: u64) -> Self {
        // base nonce: the upper half comes from the FS header, the lower
        // half counts AES blocks from the start of the NCA; the transform
        // adds the in-section block index on top
        let nonce = section_counter(section_ctr, section_base);

        let blocked = BlockedStorage::new(storage, AES_BLOCK_SIZE as u64);
        let transform = CtrTransform::new(key, nonce);

        Self::AesCtr(LinearStorage::new(TransformStorage::new(blocked, transform)))
    }

    pub fn new_xts(storage: S, key: AesXtsKey) -> Self {
        // sector numbering restarts at every section
        let blocked = BlockedStorage::new(storage, XTS_SECTOR_SIZE as u64);
        let transform = XtsTransform::new(key, 0);

        Self::AesXts(LinearStorage::new(TransformStorage::new(blocked, transform)))
    }
}

impl<S: ReadStorage> ReadStorage for SectionCryptStorage<S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        match self {
            SectionCryptStorage::Plaintext(storage) => storage.read_at(offset, buf),
            SectionCryptStorage::AesCtr(storage) => storage.read_at(offset, buf),
            SectionCryptStorage::AesXts(storage) => storage.read_at(offset, buf),
        }
    }

    fn size(&self) -> u64 {
        match self {
            SectionCryptStorage::Plaintext(storage) => storage.size(),
            SectionCryptStorage::AesCtr(storage) => storage.size(),
            SectionCryptStorage::AesXts(storage) => storage.size(),
        }
    }
}
