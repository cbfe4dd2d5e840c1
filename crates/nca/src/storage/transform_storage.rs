use crate::crypto::{AesKey, AesXtsKey, AES_BLOCK_SIZE, XTS_SECTOR_SIZE};
use crate::storage::{ReadBlockStorage, StorageError};

/// A per-block decryption applied when reading through the storage.
/// Transforms may be handed several consecutive blocks at once.
pub trait BlockTransform: Send + Sync {
    const BLOCK_LEN: usize;

    fn decrypt(&self, blocks: &mut [u8], first_block_index: u64);
}

/// AES-128-CTR over 0x10-byte blocks. The counter is the 128-bit
/// big-endian base nonce plus the block index.
#[derive(Debug, Clone)]
pub struct CtrTransform {
    key: AesKey,
    nonce: [u8; 0x10],
}

impl CtrTransform {
    pub fn new(key: AesKey, nonce: [u8; 0x10]) -> Self {
        Self { key, nonce }
    }

    fn counter(&self, block_index: u64) -> [u8; 0x10] {
        (u128::from_be_bytes(self.nonce) + block_index as u128).to_be_bytes()
    }
}

impl BlockTransform for CtrTransform {
    const BLOCK_LEN: usize = AES_BLOCK_SIZE;

    fn decrypt(&self, blocks: &mut [u8], first_block_index: u64) {
        self.key.decrypt_ctr(blocks, &self.counter(first_block_index));
    }
}

/// AES-128-XTS over 0x200-byte sectors with the big-endian sector-index
/// tweak, starting from a base sector.
#[derive(Debug, Clone)]
pub struct XtsTransform {
    key: AesXtsKey,
    sector_base: u64,
}

impl XtsTransform {
    pub fn new(key: AesXtsKey, sector_base: u64) -> Self {
        Self { key, sector_base }
    }
}

impl BlockTransform for XtsTransform {
    const BLOCK_LEN: usize = XTS_SECTOR_SIZE;

    fn decrypt(&self, blocks: &mut [u8], first_block_index: u64) {
        self.key.decrypt(
            blocks,
            self.sector_base + first_block_index,
            XTS_SECTOR_SIZE,
        );
    }
}

#[derive(Debug)]
pub struct TransformStorage<S: ReadBlockStorage, T: BlockTransform> {
    storage: S,
    transform: T,
}

pub type CtrStorage<S> = TransformStorage<S, CtrTransform>;
pub type XtsStorage<S> = TransformStorage<S, XtsTransform>;

impl<S: ReadBlockStorage, T: BlockTransform> TransformStorage<S, T> {
    pub fn new(storage: S, transform: T) -> Self {
        assert_eq!(
            storage.size() % T::BLOCK_LEN as u64,
            0,
            "Storage size must be a multiple of the cipher block size"
        );
        assert_eq!(
            storage.block_len(),
            T::BLOCK_LEN as u64,
            "Storage block size must match the cipher block size"
        );
        Self { storage, transform }
    }
}

impl<S: ReadBlockStorage, T: BlockTransform> ReadBlockStorage for TransformStorage<S, T> {
    fn block_len(&self) -> u64 {
        self.storage.block_len()
    }

    fn read_block(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        assert_eq!(
            buf.len(),
            T::BLOCK_LEN,
            "Only whole blocks can be decrypted"
        );

        self.storage.read_block(block_index, buf)?;
        self.transform.decrypt(buf, block_index);

        Ok(())
    }

    fn size(&self) -> u64 {
        self.storage.size()
    }

    fn read_blocks(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        assert_eq!(
            buf.len() % T::BLOCK_LEN,
            0,
            "Only whole blocks can be decrypted"
        );

        self.storage.read_blocks(block_index, buf)?;
        self.transform.decrypt(buf, block_index);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CtrTransform, TransformStorage};
    use crate::crypto::{section_counter, AesKey};
    use crate::storage::{BlockedStorage, LinearStorage, ReadStorage, VecStorage};

    #[test]
    fn ctr_storage_decrypts_at_any_alignment() {
        let key: AesKey = "101112131415161718191a1b1c1d1e1f".parse().unwrap();
        let nonce = section_counter(0xcafebabe, 0);

        let plain: Vec<u8> = (0u16..0x80).map(|v| v as u8).collect();
        let mut cipher = plain.clone();
        key.encrypt_ctr(&mut cipher, &nonce);

        let storage = LinearStorage::new(TransformStorage::new(
            BlockedStorage::new(VecStorage::new(cipher), 0x10),
            CtrTransform::new(key, nonce),
        ));

        let mut buf = vec![0; 0x80];
        storage.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, plain);

        // cross-block read with unaligned ends
        let mut buf = vec![0; 0x1a];
        storage.read_at(0x0b, &mut buf).unwrap();
        assert_eq!(buf, plain[0x0b..0x25]);
    }
}
