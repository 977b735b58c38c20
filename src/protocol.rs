//! The underlying binary protocol of WCH ISP
//!
//! Request frame: `[cmd][len_lo][len_hi][payload..]`
//!
//! Response frame: `[cmd][status][len_lo][len_hi][payload..]`
//!
//! Both directions are limited to a single 64 byte packet.

use scroll::{Pread, Pwrite, LE};

use crate::constants::{commands, MAX_PACKET_SIZE, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE};
use crate::error::{ProtocolError, Result, ValidationError};

const IDENTIFY_MAGIC: &[u8; 16] = b"MCU ISP & WCH.CN";

/// Size of the all-zero key seed sent with `IspKey`.
pub const ISP_KEY_SEED_LEN: usize = 30;

/// WCH ISP Command
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Identify the MCU.
    /// Return the real `device_id`, `device_type`.
    ///
    /// Both fields are sent as zero placeholders.
    Identify { device_id: u8, device_type: u8 },
    /// End ISP session, reboot the device.
    ///
    /// Connection will be lost after the response packet
    IspEnd {
        reason: u8, // 0 for normal, 1 for reset after programming
    },
    /// Send ISP key seed to MCU.
    /// Return checksum of the XOR key(1 byte sum), or zero on BTVER >= 2.7.
    ///
    /// The seed is all zero, which keeps the derived key equal to the one
    /// computed from the UID alone.
    IspKey { key: Vec<u8> },
    /// Erase the Code Flash, `sectors` counted in flash sectors.
    Erase { sectors: u32 },
    /// Program the Code Flash.
    ///
    /// `data` is already xored with the session key.
    Program { address: u32, data: Vec<u8> },
    /// Verify the Code Flash, same layout as `Program`
    Verify { address: u32, data: Vec<u8> },
    /// Read Config Bits.
    ReadConfig { bit_mask: u16 },
    /// Write Config Bits. Can be used to unprotect the device.
    WriteConfig { bit_mask: u16, data: Vec<u8> },
    /// Erase the Data Flash, same layout as `Erase`
    DataErase { sectors: u32 },
    /// Program the Data Flash, same layout as `Program`
    DataProgram { address: u32, data: Vec<u8> },
    /// Read the Data Flash
    DataRead { address: u32, len: u16 },
    WriteOtp(u8),
    ReadOtp(u8),
    SetBaud { baudrate: u32 },
}

impl Command {
    pub fn identify(device_id: u8, device_type: u8) -> Self {
        Command::Identify {
            device_id,
            device_type,
        }
    }

    pub fn isp_end(reason: u8) -> Self {
        Command::IspEnd { reason }
    }

    pub fn isp_key(key: Vec<u8>) -> Self {
        Command::IspKey { key }
    }

    pub fn erase(sectors: u32) -> Self {
        Command::Erase { sectors }
    }

    pub fn program(address: u32, data: Vec<u8>) -> Self {
        Command::Program { address, data }
    }

    pub fn verify(address: u32, data: Vec<u8>) -> Self {
        Command::Verify { address, data }
    }

    pub fn read_config(bit_mask: u16) -> Self {
        Command::ReadConfig { bit_mask }
    }

    pub fn write_config(bit_mask: u16, data: Vec<u8>) -> Self {
        Command::WriteConfig { bit_mask, data }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Command::Identify { .. } => commands::IDENTIFY,
            Command::IspEnd { .. } => commands::ISP_END,
            Command::IspKey { .. } => commands::ISP_KEY,
            Command::Erase { .. } => commands::ERASE,
            Command::Program { .. } => commands::PROGRAM,
            Command::Verify { .. } => commands::VERIFY,
            Command::ReadConfig { .. } => commands::READ_CONFIG,
            Command::WriteConfig { .. } => commands::WRITE_CONFIG,
            Command::DataErase { .. } => commands::DATA_ERASE,
            Command::DataProgram { .. } => commands::DATA_PROGRAM,
            Command::DataRead { .. } => commands::DATA_READ,
            Command::WriteOtp(_) => commands::WRITE_OTP,
            Command::ReadOtp(_) => commands::READ_OTP,
            Command::SetBaud { .. } => commands::SET_BAUD,
        }
    }

    /// Payload bytes, without the frame header.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Command::Identify {
                device_id,
                device_type,
            } => {
                let mut buf = Vec::with_capacity(2 + IDENTIFY_MAGIC.len());
                buf.push(*device_id);
                buf.push(*device_type);
                buf.extend_from_slice(IDENTIFY_MAGIC);
                buf
            }
            Command::IspEnd { reason } => vec![*reason],
            Command::IspKey { key } => key.clone(),
            Command::Erase { sectors } | Command::DataErase { sectors } => {
                sectors.to_le_bytes().to_vec()
            }
            Command::Program { address, data }
            | Command::Verify { address, data }
            | Command::DataProgram { address, data } => {
                // ADDR, RESERVED, DATA
                let mut buf = vec![0u8; 4 + 1 + data.len()];
                buf.pwrite_with(*address, 0, LE)?;
                buf[5..].copy_from_slice(data);
                buf
            }
            Command::ReadConfig { bit_mask } => bit_mask.to_le_bytes().to_vec(),
            Command::WriteConfig { bit_mask, data } => {
                let mut buf = vec![0u8; 2 + data.len()];
                buf.pwrite_with(*bit_mask, 0, LE)?;
                buf[2..].copy_from_slice(data);
                buf
            }
            Command::DataRead { address, len } => {
                let mut buf = [0u8; 6];
                buf.pwrite_with(*address, 0, LE)?;
                buf.pwrite_with(*len, 4, LE)?;
                buf.to_vec()
            }
            Command::WriteOtp(sel) | Command::ReadOtp(sel) => vec![*sel],
            Command::SetBaud { baudrate } => baudrate.to_le_bytes().to_vec(),
        };
        Ok(payload)
    }

    pub fn into_raw(self) -> Result<Vec<u8>> {
        encode_frame(self.opcode(), &self.payload()?)
    }
}

/// Build a request frame, rejecting payloads that would not fit one packet.
pub fn encode_frame(cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let total = REQUEST_HEADER_SIZE + payload.len();
    if total > MAX_PACKET_SIZE {
        return Err(ProtocolError::FrameTooLarge { len: total }.into());
    }
    let mut buf = vec![0u8; total];
    buf[0] = cmd;
    buf.pwrite_with(payload.len() as u16, 1, LE)?;
    buf[REQUEST_HEADER_SIZE..].copy_from_slice(payload);
    Ok(buf)
}

/// Decoded reply to a Command. Only successful replies are ever built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub command: u8,
    payload: Vec<u8>,
}

impl Response {
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Decode a raw response to `expected` command.
    ///
    /// Checks run in wire order: header size, command echo, status, then the
    /// declared length against what actually arrived.
    pub fn parse(expected: u8, raw: &[u8]) -> Result<Self> {
        if raw.len() < RESPONSE_HEADER_SIZE {
            return Err(ProtocolError::ShortResponse { got: raw.len() }.into());
        }
        if raw.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::FrameTooLarge { len: raw.len() }.into());
        }
        if raw[0] != expected {
            return Err(ProtocolError::CommandMismatch {
                expected,
                got: raw[0],
            }
            .into());
        }
        if raw[1] != 0x00 {
            return Err(ValidationError::DeviceStatus {
                command: expected,
                status: raw[1],
            }
            .into());
        }
        let declared = raw.pread_with::<u16>(2, LE)? as usize;
        let remain = &raw[RESPONSE_HEADER_SIZE..];
        if remain.len() != declared {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: remain.len(),
            }
            .into());
        }
        Ok(Response {
            command: raw[0],
            payload: remain.to_vec(),
        })
    }
}
