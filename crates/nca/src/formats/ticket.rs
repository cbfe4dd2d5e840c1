use crate::crypto::keyset::{KeySet, MissingKeyError};
use crate::crypto::{AesKey, TitleKey};
use crate::filesystem::{Vfs, VfsDirExt, VfsFile};
use crate::hexstring::HexData;
use crate::ids::RightsId;
use crate::storage::{ReadStorageExt, StorageError};
use binrw::{BinRead, BinWrite, NullString};
use bitflags::bitflags;
use snafu::{ResultExt, Snafu};
use tracing::warn;

/// Size of a ticket on disk.
pub const TICKET_SIZE: usize = 0x2c0;

#[derive(Snafu, Debug)]
pub enum TicketError {
    /// Personalized tickets wrap the title key with the console's RSA key;
    /// extracting it is not supported, supply a pre-decrypted key instead.
    #[snafu(display("Cannot extract the title key from a personalized ticket"))]
    PersonalizedTicket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub enum Signature {
    #[brw(magic = 0x10000u32)]
    Rsa4096Sha1(#[brw(pad_after = 0x3c)] HexData<0x200>),
    #[brw(magic = 0x10001u32)]
    Rsa2048Sha1(#[brw(pad_after = 0x3c)] HexData<0x100>),
    #[brw(magic = 0x10002u32)]
    EcdsaSha1(#[brw(pad_after = 0x40)] HexData<0x3c>),
    #[brw(magic = 0x10003u32)]
    Rsa4096Sha256(#[brw(pad_after = 0x3c)] HexData<0x200>),
    #[brw(magic = 0x10004u32)]
    Rsa2048Sha256(#[brw(pad_after = 0x3c)] HexData<0x100>),
    #[brw(magic = 0x10005u32)]
    EcdsaSha256(#[brw(pad_after = 0x40)] HexData<0x3c>),
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum TitleKeyType {
    Common,
    Personalized,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum LicenseType {
    Permanent,
    Demo,
    Trial,
    Rental,
    Subscription,
    Service,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyFlags: u32 {
        const PRE_INSTALL = 1 << 0;
        const SHARED_TITLE = 1 << 1;
        const ALLOW_ALL_CONTENT = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct Ticket {
    pub signature: Signature,
    #[brw(pad_size_to = 0x40)]
    pub issuer: NullString,
    pub title_key_block: HexData<0x100>,
    pub format_version: u8,
    pub title_key_type: TitleKeyType,
    pub ticket_version: u16,
    pub license_type: LicenseType,
    /// Raw key generation; the master-key revision is this minus one.
    pub crypto_type: u8,
    #[br(map = |bits: u32| PropertyFlags::from_bits_retain(bits))]
    #[bw(map = |flags| flags.bits())]
    pub property_flags: PropertyFlags,
    #[brw(pad_before = 0x6)]
    pub ticket_id: u64,
    pub device_id: u64,
    pub rights_id: RightsId,
    pub account_id: u32,
    pub sect_total_size: u32,
    pub sect_header_offset: u32,
    pub sect_num: u16,
    pub sect_entry_size: u16,
}

impl Ticket {
    /// The still-encrypted title key. Only the first 0x10 bytes of the
    /// title key block are meaningful for common tickets.
    pub fn title_key(&self) -> Result<TitleKey, TicketError> {
        match self.title_key_type {
            TitleKeyType::Common => {
                let mut title_key = [0; 0x10];
                title_key.copy_from_slice(&self.title_key_block.0[..0x10]);
                Ok(TitleKey::from(title_key))
            }
            TitleKeyType::Personalized => PersonalizedTicketSnafu.fail(),
        }
    }

    pub fn master_key_revision(&self) -> u8 {
        self.crypto_type.saturating_sub(1)
    }

    /// Resolves the decrypted title key using the title kek for this
    /// ticket's own master-key revision.
    pub fn decrypt_title_key(&self, key_set: &KeySet) -> Result<AesKey, TitleKeyResolveError> {
        let title_key = self.title_key().context(ExtractSnafu)?;
        let title_kek = key_set
            .title_kek(self.master_key_revision())
            .context(KekSnafu)?;
        Ok(title_key.decrypt(title_kek))
    }
}

#[derive(Snafu, Debug)]
pub enum TitleKeyResolveError {
    #[snafu(display("Failed to extract the title key"))]
    Extract { source: TicketError },
    #[snafu(display("Missing the title kek"))]
    Kek { source: MissingKeyError },
}

#[derive(Snafu, Debug)]
pub enum TicketImportError {
    #[snafu(display("Failed to read the ticket file"))]
    ReadTicketFile { source: StorageError },
    #[snafu(display("Failed to parse the ticket file"))]
    ParseTicketFile { source: binrw::Error },
}

/// Feeds every `.tik` file found in the filesystem into the keyset.
/// Personalized tickets are skipped with a warning; their keys have to
/// come from a pre-decrypted source.
pub fn import_tickets<F: Vfs>(key_set: &mut KeySet, fs: &F) -> Result<(), TicketImportError> {
    fs.root()
        .walk()
        .filter(|(n, _)| n.ends_with(".tik"))
        .filter_map(|(_, e)| e.file())
        .try_for_each(|file| {
            // it's hard to report this error, as it depends on the FS implementation
            let data = file
                .storage()
                .expect("Malformed FS")
                .read_all()
                .context(ReadTicketFileSnafu)?;
            let ticket =
                Ticket::read(&mut std::io::Cursor::new(data)).context(ParseTicketFileSnafu)?;
            if key_set.import_ticket(&ticket).is_err() {
                warn!("Skipping personalized ticket for {}", ticket.rights_id);
            }
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::{LicenseType, PropertyFlags, Signature, Ticket};
    use crate::hexstring::HexData;
    use binrw::{BinRead, BinWrite, NullString};
    use std::io::Cursor;

    pub enum TicketType {
        CommonTicket,
        PersonalizedTicket,
    }
    use self::TicketType::*;

    pub fn build_ticket(rights_id: &str, title_key: [u8; 0x10], ty: TicketType) -> Ticket {
        let mut title_key_block = [0; 0x100];
        title_key_block[..0x10].copy_from_slice(&title_key);

        Ticket {
            signature: Signature::Rsa2048Sha256(HexData([0x55; 0x100])),
            issuer: NullString::from("Root-CA00000003-XS00000020"),
            title_key_block: HexData(title_key_block),
            format_version: 2,
            title_key_type: match ty {
                CommonTicket => super::TitleKeyType::Common,
                PersonalizedTicket => super::TitleKeyType::Personalized,
            },
            ticket_version: 0,
            license_type: LicenseType::Permanent,
            crypto_type: 0,
            property_flags: PropertyFlags::empty(),
            ticket_id: 0,
            device_id: 0,
            rights_id: rights_id.parse().unwrap(),
            account_id: 0,
            sect_total_size: 0,
            sect_header_offset: 0x2c0,
            sect_num: 0,
            sect_entry_size: 0,
        }
    }

    #[test]
    fn round_trips_with_the_on_disk_layout() {
        let ticket = build_ticket(
            "01234567890123456789012345678901",
            [0xaa; 0x10],
            CommonTicket,
        );

        let mut cur = Cursor::new(Vec::new());
        ticket.write(&mut cur).unwrap();
        let bytes = cur.into_inner();
        assert_eq!(bytes.len(), super::TICKET_SIZE);

        // rights id lives at +0x2a0
        assert_eq!(
            &bytes[0x2a0..0x2b0],
            ticket.rights_id.0.as_ref(),
        );
        // the encrypted title key starts the title key block at +0x180
        assert_eq!(&bytes[0x180..0x190], &[0xaa; 0x10]);

        let reparsed = Ticket::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(reparsed, ticket);
    }

    #[test]
    fn extracts_common_title_keys_only() {
        let common = build_ticket("00000000000000000000000000000001", [1; 0x10], CommonTicket);
        assert!(common.title_key().is_ok());

        let personalized = build_ticket(
            "00000000000000000000000000000001",
            [1; 0x10],
            PersonalizedTicket,
        );
        assert!(personalized.title_key().is_err());
    }
}
