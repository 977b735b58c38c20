//! Serial Transportation.
//!
//! UART frames wrap the USB frame: requests as `57 ab <frame> <sum>`,
//! responses as `55 aa <frame> <sum>`, where `<sum>` is the wrapping byte sum
//! of `<frame>`.
use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use super::Transport;
use crate::constants::{MAX_PACKET_SIZE, RESPONSE_HEADER_SIZE};
use crate::error::{ProtocolError, Result};

const SERIAL_TIMEOUT_MS: u64 = 1000;

const REQUEST_PREFIX: [u8; 2] = [0x57, 0xab];
const RESPONSE_PREFIX: [u8; 2] = [0x55, 0xaa];

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum Baudrate {
    #[default]
    #[value(name = "115200")]
    Baud115200,
    #[value(name = "1m", alias = "1000000")]
    Baud1m,
    #[value(name = "2m", alias = "2000000")]
    Baud2m,
}

impl From<Baudrate> for u32 {
    fn from(value: Baudrate) -> Self {
        match value {
            Baudrate::Baud115200 => 115_200,
            Baudrate::Baud1m => 1_000_000,
            Baudrate::Baud2m => 2_000_000,
        }
    }
}

impl fmt::Display for Baudrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

fn checksum(raw: &[u8]) -> u8 {
    raw.iter().fold(0u8, |acc, &val| acc.wrapping_add(val))
}

/// Wrap a request frame for the UART bootloader.
fn wrap_request(raw: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(raw.len() + 3);
    v.extend_from_slice(&REQUEST_PREFIX);
    v.extend_from_slice(raw);
    v.push(checksum(raw));
    v
}

/// Read one wrapped response and return the inner frame.
fn read_frame(r: &mut impl Read) -> Result<Vec<u8>> {
    let mut prefix = [0u8; 2];
    r.read_exact(&mut prefix)?;
    if prefix != RESPONSE_PREFIX {
        return Err(ProtocolError::BadPrefix(prefix).into());
    }

    let mut frame = vec![0u8; RESPONSE_HEADER_SIZE];
    r.read_exact(&mut frame)?;
    let len = u16::from_le_bytes([frame[2], frame[3]]) as usize;
    if RESPONSE_HEADER_SIZE + len > MAX_PACKET_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            len: RESPONSE_HEADER_SIZE + len,
        }
        .into());
    }

    // payload + trailing checksum
    let mut data = vec![0u8; len + 1];
    r.read_exact(&mut data)?;
    let got = data.pop().unwrap_or_default();
    frame.extend_from_slice(&data);

    let expected = checksum(&frame);
    if got != expected {
        return Err(ProtocolError::Checksum { expected, got }.into());
    }
    Ok(frame)
}

pub struct SerialTransport {
    serial_port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(port: &str) -> Result<Self> {
        log::info!("Opening serial port: \"{}\" @ {} baud", port, Baudrate::default());
        let serial_port = serialport::new(port, Baudrate::default().into())
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()?;
        Ok(SerialTransport { serial_port })
    }

    /// Change the local line speed. The device must be told first.
    pub fn set_baudrate(&mut self, baudrate: impl Into<u32>) -> Result<()> {
        self.serial_port.set_baud_rate(baudrate.into())?;
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<usize> {
        self.serial_port.write_all(&wrap_request(raw))?;
        self.serial_port.flush()?;
        Ok(raw.len())
    }

    fn recv_raw(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.serial_port)
    }
}
