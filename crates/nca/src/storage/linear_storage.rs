use crate::storage::{ReadBlockStorage, ReadStorage, StorageError};

/// Presents a block-granular storage as a byte-granular one, splitting
/// each request into an unaligned head, a bulk body and an unaligned tail.
#[derive(Debug)]
pub struct LinearStorage<S: ReadBlockStorage> {
    storage: S,
}

impl<S: ReadBlockStorage> LinearStorage<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }
}

impl<S: ReadBlockStorage> ReadStorage for LinearStorage<S> {
    fn read_at(&self, mut offset: u64, mut buf: &mut [u8]) -> Result<(), StorageError> {
        let block_len = self.storage.block_len();
        if offset + buf.len() as u64 > self.storage.size() {
            return Err(StorageError::out_of_bounds(
                offset,
                buf.len(),
                self.storage.size(),
            ));
        }

        let mut block_buffer = vec![0u8; block_len as usize];

        // block-unaligned head
        let head_offset = offset % block_len;
        if head_offset != 0 {
            let head_len = std::cmp::min(block_len - head_offset, buf.len() as u64);
            self.storage.read_block(offset / block_len, &mut block_buffer)?;
            buf[..head_len as usize]
                .copy_from_slice(&block_buffer[head_offset as usize..][..head_len as usize]);

            offset += head_len;
            buf = &mut buf[head_len as usize..];
        }

        // aligned body
        let body_len = (buf.len() as u64 / block_len) * block_len;
        if body_len != 0 {
            self.storage
                .read_blocks(offset / block_len, &mut buf[..body_len as usize])?;
            offset += body_len;
            buf = &mut buf[body_len as usize..];
        }

        // block-unaligned tail
        if !buf.is_empty() {
            self.storage.read_block(offset / block_len, &mut block_buffer)?;
            buf.copy_from_slice(&block_buffer[..buf.len()]);
        }

        Ok(())
    }

    fn size(&self) -> u64 {
        self.storage.size()
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{BlockedStorage, LinearStorage, ReadStorage, VecStorage};

    fn storage() -> LinearStorage<BlockedStorage<VecStorage>> {
        let data: Vec<u8> = (0..0x40).collect();
        LinearStorage::new(BlockedStorage::new(VecStorage::new(data), 0x10))
    }

    #[test]
    fn reads_match_the_underlying_bytes() {
        let storage = storage();

        for (offset, len) in [
            (0u64, 0x40usize), // everything
            (0, 0x10),         // exactly one block
            (3, 5),            // inside one block
            (0xc, 8),          // head crossing a block boundary
            (0x10, 0x18),      // aligned start, unaligned end
            (0x3c, 4),         // up to the very end
            (0x40, 0),         // empty read at the end
        ] {
            let mut buf = vec![0; len];
            storage.read_at(offset, &mut buf).unwrap();
            let expected: Vec<u8> = (offset as u8..offset as u8 + len as u8).collect();
            assert_eq!(buf, expected, "read at {:#x}+{:#x}", offset, len);
        }
    }

    #[test]
    fn rejects_reads_past_the_end() {
        let storage = storage();
        let mut buf = [0; 2];
        assert!(storage.read_at(0x3f, &mut buf).is_err());
        assert!(storage.read_at(0x41, &mut []).is_err());
    }
}
