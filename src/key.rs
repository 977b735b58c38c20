//! Session XOR key.
//!
//! The key obfuscates every program/verify payload byte. It is derived
//! locally from the chip UID and chip id and never leaves the host.

use crate::constants::BTVER_2_7;

pub const KEY_SIZE: usize = 8;

/// Byte sum of the chip unique id
pub fn uid_checksum(uid: &[u8]) -> u8 {
    uid.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XorKey([u8; KEY_SIZE]);

impl XorKey {
    /// Key for an all-zero seed: `[s; 8]` with `key[7] = s + chip_id`, where
    /// `s` is the UID checksum.
    pub fn derive(uid: &[u8], chip_id: u8) -> Self {
        Self::from_uid_checksum(uid_checksum(uid), chip_id)
    }

    pub fn from_uid_checksum(checksum: u8, chip_id: u8) -> Self {
        let mut key = [checksum; KEY_SIZE];
        key[7] = checksum.wrapping_add(chip_id);
        XorKey(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Byte sum of the key
    pub fn checksum(&self) -> u8 {
        uid_checksum(&self.0)
    }

    /// Reply expected from `IspKey` for the given bootloader version.
    ///
    /// BTVER 2.6 and earlier echo the key checksum, 2.7 onwards send zero.
    pub fn expected_reply(&self, bootloader_version: u16) -> u8 {
        if bootloader_version >= BTVER_2_7 {
            0
        } else {
            self.checksum()
        }
    }

    /// XOR `data`, which starts at image offset `offset`.
    pub fn apply(&self, offset: usize, data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, b)| b ^ self.0[(offset + i) % KEY_SIZE])
            .collect()
    }
}
