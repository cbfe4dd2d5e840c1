use crate::hexstring::{HexData, HexParseError};
use aes::Aes128;
use binrw::{BinRead, BinWrite};
use cipher::generic_array::GenericArray;
use ctr::Ctr128BE;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use xts_mode::Xts128;

pub mod keyset;

pub const AES_BLOCK_SIZE: usize = 0x10;
pub const XTS_SECTOR_SIZE: usize = 0x200;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, BinRead, BinWrite)]
pub struct EncryptedAesKey(pub HexData<0x10>);
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, BinRead, BinWrite)]
pub struct EncryptedAesXtsKey(pub HexData<0x20>);

/// An AES-128 title key, still encrypted with a title kek.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TitleKey(HexData<0x10>);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AesKey(pub HexData<0x10>);

/// An AES-128-XTS key pair: data key followed by tweak key.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AesXtsKey(pub HexData<0x20>);

impl FromStr for AesKey {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(AesKey)
    }
}

impl FromStr for AesXtsKey {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(AesXtsKey)
    }
}

impl FromStr for TitleKey {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(TitleKey)
    }
}

impl TitleKey {
    pub fn decrypt(&self, title_kek: AesKey) -> AesKey {
        title_kek.derive_key(&self.0 .0)
    }
}

impl From<[u8; 0x10]> for TitleKey {
    fn from(data: [u8; 0x10]) -> Self {
        TitleKey(HexData(data))
    }
}

/// Builds the 128-bit big-endian AES-CTR counter for a section read:
/// the upper half comes from the FS header, the lower half is the
/// absolute byte offset inside the NCA in AES blocks.
pub fn section_counter(upper: u64, byte_offset: u64) -> [u8; 0x10] {
    let mut ctr = [0; 0x10];
    ctr[..8].copy_from_slice(&upper.to_be_bytes());
    ctr[8..].copy_from_slice(&(byte_offset / AES_BLOCK_SIZE as u64).to_be_bytes());
    ctr
}

impl AesKey {
    fn derive_key(&self, source: &[u8; 0x10]) -> AesKey {
        use cipher::{BlockDecrypt, KeyInit};
        let mut newkey = *source;

        let crypter = Aes128::new(GenericArray::from_slice(&self.0 .0));
        crypter.decrypt_block(GenericArray::from_mut_slice(&mut newkey));

        AesKey(HexData(newkey))
    }

    pub fn decrypt_key(&self, source: EncryptedAesKey) -> AesKey {
        self.derive_key(&source.0 .0)
    }

    fn derive_xts_key(&self, source: &[u8; 0x20]) -> AesXtsKey {
        use cipher::{BlockDecrypt, KeyInit};
        let mut newkey = *source;

        let crypter = Aes128::new(GenericArray::from_slice(&self.0 .0));
        crypter.decrypt_block(GenericArray::from_mut_slice(&mut newkey[0x00..0x10]));
        crypter.decrypt_block(GenericArray::from_mut_slice(&mut newkey[0x10..0x20]));

        AesXtsKey(HexData(newkey))
    }

    pub fn decrypt_xts_key(&self, source: EncryptedAesXtsKey) -> AesXtsKey {
        self.derive_xts_key(&source.0 .0)
    }

    /// Applies the CTR keystream starting at the given counter.
    /// Decryption and encryption are the same operation.
    pub fn apply_ctr(&self, buf: &mut [u8], ctr: &[u8; 0x10]) {
        use cipher::{KeyIvInit, StreamCipher};

        assert_eq!(
            buf.len() % AES_BLOCK_SIZE,
            0,
            "CTR buffer must be a multiple of the AES block size"
        );

        let key = GenericArray::from_slice(&self.0 .0);
        let iv = GenericArray::from_slice(ctr);
        let mut crypter = Ctr128BE::<Aes128>::new(key, iv);
        crypter.apply_keystream(buf);
    }

    pub fn decrypt_ctr(&self, buf: &mut [u8], ctr: &[u8; 0x10]) {
        self.apply_ctr(buf, ctr)
    }

    pub fn encrypt_ctr(&self, buf: &mut [u8], ctr: &[u8; 0x10]) {
        self.apply_ctr(buf, ctr)
    }
}

fn get_tweak(mut sector: u64) -> [u8; 0x10] {
    let mut tweak = [0; 0x10];
    for tweak in tweak.iter_mut().rev() {
        /* Nintendo big-endian tweak, unlike the usual XTS little-endian one */
        *tweak = (sector & 0xFF) as u8;
        sector >>= 8;
    }
    tweak
}

impl AesXtsKey {
    #[inline]
    fn to_crypter(&self) -> Xts128<Aes128> {
        use cipher::KeyInit;

        let key1 = Aes128::new(GenericArray::from_slice(&self.0 .0[0x00..0x10]));
        let key2 = Aes128::new(GenericArray::from_slice(&self.0 .0[0x10..0x20]));
        Xts128::<Aes128>::new(key1, key2)
    }

    pub fn decrypt(&self, data: &mut [u8], mut sector: u64, sector_size: usize) {
        assert_eq!(
            data.len() % sector_size,
            0,
            "XTS buffer must be a multiple of the sector size"
        );

        let crypter = self.to_crypter();

        for i in (0..data.len()).step_by(sector_size) {
            crypter.decrypt_sector(&mut data[i..i + sector_size], get_tweak(sector));
            sector += 1;
        }
    }

    pub fn encrypt(&self, data: &mut [u8], mut sector: u64, sector_size: usize) {
        assert_eq!(
            data.len() % sector_size,
            0,
            "XTS buffer must be a multiple of the sector size"
        );

        let crypter = self.to_crypter();

        for i in (0..data.len()).step_by(sector_size) {
            crypter.encrypt_sector(&mut data[i..i + sector_size], get_tweak(sector));
            sector += 1;
        }
    }
}
