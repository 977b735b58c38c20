//! Library errors.
//!
//! Nothing in the engine retries or recovers: every error aborts the operation
//! in progress and travels up to the caller.

use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible errors returned by the ISP engine
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Fail to program chunk @ {address:#x} error: {:02x} {:02x}", .status[0], .status[1])]
    Program { address: u32, status: [u8; 2] },

    #[error("Fail to verify chunk @ {address:#x} error: {:02x} {:02x}", .status[0], .status[1])]
    Verify { address: u32, status: [u8; 2] },

    #[error(transparent)]
    User(#[from] UserError),

    #[error("Invalid device database: {0}")]
    Database(#[from] serde_yaml::Error),
}

impl From<rusb::Error> for Error {
    fn from(err: rusb::Error) -> Self {
        Error::Transport(err.into())
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Error::Transport(err.into())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(err.into())
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Self {
        Error::Protocol(ProtocolError::Encoding(err.to_string()))
    }
}

/// Failures at the transport boundary: open, claim, I/O and timeouts
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("USB endpoints not found on device")]
    EndpointsNotFound,
}

/// Malformed frames
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame too large: {len} bytes exceeds the 64 byte packet")]
    FrameTooLarge { len: usize },

    #[error("Not enough data received: {got} bytes")]
    ShortResponse { got: usize },

    #[error("Got wrong command {got:#04x} (expected {expected:#04x})")]
    CommandMismatch { expected: u8, got: u8 },

    #[error("Length mismatch: got {actual:#x} (header {declared:#x})")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Reply to command {command:#04x} too short: {got} bytes, expected {expected}")]
    ShortPayload { command: u8, expected: usize, got: usize },

    #[error("Serial frame checksum mismatch: got {got:#04x} (expected {expected:#04x})")]
    Checksum { expected: u8, got: u8 },

    #[error("Invalid serial frame prefix {0:02x?}")]
    BadPrefix([u8; 2]),

    #[error("Field encoding failed: {0}")]
    Encoding(String),
}

/// Replies that are well formed but carry the wrong content
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Device reported error {status:#04x} for command {command:#04x}")]
    DeviceStatus { command: u8, status: u8 },

    #[error("Received config mask {got:#06x} does not match requested {expected:#06x}")]
    ConfigMaskMismatch { expected: u16, got: u16 },

    #[error("Not enough config bytes received: {got}")]
    ShortConfig { got: usize },

    #[error("Failed set isp key, wrong reply, got {got:#x} (exp {expected:#x})")]
    KeyChecksum { expected: u8, got: u8 },

    #[error("Command {command:#04x} not acknowledged: {reply:02x?}")]
    Nack { command: u8, reply: Vec<u8> },

    #[error("ISP key has not been exchanged with the device")]
    KeyNotExchanged,
}

/// Problems with what the user asked for, detected before touching the device
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UserError {
    #[error("Firmware too big: {size} bytes, flash size is {flash_size}")]
    ImageTooLarge { size: usize, flash_size: u32 },

    #[error("No device detected")]
    NoDevice,

    #[error("No device match for '{0}'")]
    NoMatchingDevice(String),

    #[error("Chip {0} has no data flash")]
    NoDataFlash(String),
}
