//! A single ISP device: identity, config registers and key exchange.

use std::fmt;

use crate::constants::{config_mask, RDPR_UNPROTECTED};
use crate::device::{Chip, ChipDB};
use crate::error::{ProtocolError, Result, UserError, ValidationError};
use crate::key::XorKey;
use crate::protocol::{Command, ISP_KEY_SEED_LEN};
use crate::transport::{Baudrate, SerialTransport, Transport};

pub const UID_SIZE: usize = 8;

/// Largest config read the bootloader answers in one frame.
const CONFIG_READ_MAX: usize = 60;
/// RDPR/USER, DATA, WPR words
const CONFIG_GROUP_SIZE: usize = 12;

/// Hyphen separated hex octets, as used to select a device by UID.
pub fn format_uid(uid: &[u8]) -> String {
    uid.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("-")
}

/// Fail unless `reply` is non-empty and all zero.
pub(crate) fn check_ack(command: u8, reply: Vec<u8>) -> Result<()> {
    if reply.is_empty() || reply.iter().any(|&b| b != 0) {
        return Err(ValidationError::Nack { command, reply }.into());
    }
    Ok(())
}

pub struct Session<T: Transport> {
    transport: T,
    chip: Chip,
    /// Chip unique identifier
    uid: [u8; UID_SIZE],
    uid_str: String,
    // BTVER, major << 8 | minor
    bootloader_version: u16,
    key: Option<XorKey>,
}

impl<T: Transport> Session<T> {
    /// Identify the device behind `transport` and read its version and UID.
    ///
    /// No key is exchanged yet, so a listing of several devices never
    /// changes their state.
    pub fn open(transport: T, db: &ChipDB) -> Result<Self> {
        let mut session = Session {
            transport,
            chip: Chip::unknown(0, 0),
            uid: [0; UID_SIZE],
            uid_str: String::new(),
            bootloader_version: 0,
            key: None,
        };

        let (chip_id, device_type) = session.identify()?;
        session.chip = db.lookup(device_type, chip_id);
        log::debug!("found chip: {}", session.chip);

        session.bootloader_version = session.read_bootloader_version()?;
        session.uid = session.read_unique_id()?;
        session.uid_str = format_uid(&session.uid);
        Ok(session)
    }

    pub fn chip(&self) -> &Chip {
        &self.chip
    }

    pub fn uid(&self) -> &[u8; UID_SIZE] {
        &self.uid
    }

    pub fn uid_str(&self) -> &str {
        &self.uid_str
    }

    pub fn bootloader_version(&self) -> u16 {
        self.bootloader_version
    }

    pub fn key(&self) -> Option<&XorKey> {
        self.key.as_ref()
    }

    pub(crate) fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Returns `(chip_id, device_type)`.
    pub fn identify(&mut self) -> Result<(u8, u8)> {
        let cmd = Command::identify(0, 0);
        let opcode = cmd.opcode();
        let ids = self.transport.transfer(cmd, 2)?;
        if ids.len() < 2 {
            return Err(ProtocolError::ShortPayload {
                command: opcode,
                expected: 2,
                got: ids.len(),
            }
            .into());
        }
        Ok((ids[0], ids[1]))
    }

    pub fn read_bootloader_version(&mut self) -> Result<u16> {
        let mut buf = [0u8; 4];
        let raw = self.read_config(config_mask::BTVER, buf.len())?;
        buf[..raw.len()].copy_from_slice(&raw);
        // [0x00, major, minor, 0x00]
        Ok(u16::from_be_bytes([buf[1], buf[2]]))
    }

    /// Chips with a shorter UID leave the tail zeroed.
    pub fn read_unique_id(&mut self) -> Result<[u8; UID_SIZE]> {
        let mut uid = [0u8; UID_SIZE];
        let raw = self.read_config(config_mask::UID, UID_SIZE)?;
        if raw.len() < UID_SIZE {
            log::debug!("short UID: {} bytes", raw.len());
        }
        uid[..raw.len()].copy_from_slice(&raw);
        Ok(uid)
    }

    /// Read the config registers selected by `mask`, at most `max_len` bytes.
    pub fn read_config(&mut self, mask: u16, max_len: usize) -> Result<Vec<u8>> {
        let resp = self
            .transport
            .transfer(Command::read_config(mask), CONFIG_READ_MAX)?;
        if resp.len() < 2 {
            return Err(ValidationError::ShortConfig { got: resp.len() }.into());
        }
        let echoed = u16::from_le_bytes([resp[0], resp[1]]);
        if echoed != mask {
            return Err(ValidationError::ConfigMaskMismatch {
                expected: mask,
                got: echoed,
            }
            .into());
        }
        let len = (resp.len() - 2).min(max_len);
        Ok(resp[2..2 + len].to_vec())
    }

    pub fn write_config(&mut self, mask: u16, data: &[u8]) -> Result<()> {
        let cmd = Command::write_config(mask, data.to_vec());
        let opcode = cmd.opcode();
        let reply = self.transport.transfer(cmd, 2)?;
        check_ack(opcode, reply)
    }

    /// Derive the session key and check the device agrees on it.
    pub fn key_exchange(&mut self) -> Result<()> {
        let key = XorKey::derive(&self.uid, self.chip.chip_id);

        let cmd = Command::isp_key(vec![0; ISP_KEY_SEED_LEN]);
        let opcode = cmd.opcode();
        let reply = self.transport.transfer(cmd, 2)?;
        let got = *reply.first().ok_or(ProtocolError::ShortPayload {
            command: opcode,
            expected: 1,
            got: 0,
        })?;

        let expected = key.expected_reply(self.bootloader_version);
        if got != expected {
            self.key = None;
            return Err(ValidationError::KeyChecksum { expected, got }.into());
        }
        log::debug!("isp key accepted, checksum {:#04x}", got);
        self.key = Some(key);
        Ok(())
    }

    pub(crate) fn require_key(&self) -> Result<XorKey> {
        self.key.ok_or_else(|| ValidationError::KeyNotExchanged.into())
    }

    /// End the ISP session. `reason` 1 resets into the user program.
    pub fn end(&mut self, reason: u8) -> Result<()> {
        self.transport.transfer(Command::isp_end(reason), 2)?;
        log::info!("Device reset");
        Ok(())
    }

    /// Raw RDPR/USER/DATA/WPR words.
    pub fn config_registers(&mut self) -> Result<Vec<u8>> {
        self.read_config(config_mask::RDPR_USER_DATA_WPR, CONFIG_GROUP_SIZE)
    }

    pub fn code_flash_protected(&mut self) -> Result<bool> {
        if !self.chip.supports_code_flash_protect() {
            return Ok(false);
        }
        let config = self.config_registers()?;
        Ok(config.first().is_some_and(|&rdpr| rdpr != RDPR_UNPROTECTED))
    }

    /// Clear read protection, then reset so the new RDPR takes effect.
    pub fn unprotect(&mut self) -> Result<()> {
        if !self.code_flash_protected()? {
            log::info!("Code Flash not protected");
            return Ok(());
        }
        let mut config = self.config_registers()?;
        if config.len() < 2 {
            return Err(ValidationError::ShortConfig { got: config.len() }.into());
        }
        config[0] = RDPR_UNPROTECTED;
        config[1] = !RDPR_UNPROTECTED;
        self.write_config(config_mask::RDPR_USER_DATA_WPR, &config)?;
        log::info!("Code Flash Unprotected");
        self.end(1)
    }

    pub fn read_otp(&mut self, selector: u8) -> Result<Vec<u8>> {
        self.transport.transfer(Command::ReadOtp(selector), CONFIG_READ_MAX)
    }

    pub fn dump_info(&self) {
        log::info!(
            "Chip: {} (CodeFlash: {}KiB, EEPROM: {}KiB, Sector: {}B)",
            self.chip,
            self.chip.flash_size / 1024,
            self.chip.eeprom_size / 1024,
            self.chip.flash_sector_size,
        );
        log::info!("Chip UID: {}", self.uid_str);
        log::info!(
            "BTVER(bootloader version): v{}.{}",
            self.bootloader_version >> 8,
            self.bootloader_version & 0xff
        );
    }
}

impl Session<SerialTransport> {
    /// Ask the bootloader to switch line speed, then follow it.
    pub fn set_baudrate(&mut self, baudrate: Baudrate) -> Result<()> {
        let cmd = Command::SetBaud {
            baudrate: baudrate.into(),
        };
        let opcode = cmd.opcode();
        let reply = self.transport.transfer(cmd, 2)?;
        check_ack(opcode, reply)?;
        self.transport.set_baudrate(baudrate)?;
        log::info!("Switched to {} baud", baudrate);
        Ok(())
    }
}

impl<T: Transport> fmt::Display for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BTVER v{}.{} UID {} {}",
            self.bootloader_version >> 8,
            self.bootloader_version & 0xff,
            self.uid_str,
            self.chip
        )
    }
}

/// Pick a device by UID string, or the first one when no selector is given.
pub fn select<'a, T: Transport>(
    sessions: &'a mut [Session<T>],
    uid: Option<&str>,
) -> Result<&'a mut Session<T>> {
    if sessions.is_empty() {
        return Err(UserError::NoDevice.into());
    }
    match uid {
        Some(uid) => sessions
            .iter_mut()
            .find(|s| s.uid_str == uid)
            .ok_or_else(|| UserError::NoMatchingDevice(uid.to_string()).into()),
        None => Ok(&mut sessions[0]),
    }
}
