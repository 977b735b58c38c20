//! Abstract Device transport interface.
use crate::constants::{MAX_PACKET_SIZE, RESPONSE_HEADER_SIZE};
use crate::error::{ProtocolError, Result};
use crate::protocol::{encode_frame, Command, Response};

pub use self::serial::{Baudrate, SerialTransport};
pub use self::usb::UsbTransport;

mod serial;
mod usb;

/// Abstraction of the transport layer.
/// Might be a USB bulk pipe or a serial port.
///
/// Implementors move one frame per call and enforce their own fixed timeout;
/// a timeout surfaces as an error and is never retried.
pub trait Transport {
    /// Write one request frame, returning the number of bytes accepted.
    fn send_raw(&mut self, raw: &[u8]) -> Result<usize>;
    /// Read one whole response frame.
    fn recv_raw(&mut self) -> Result<Vec<u8>>;

    fn send(&mut self, cmd: u8, payload: &[u8]) -> Result<usize> {
        let req = encode_frame(cmd, payload)?;
        log::debug!("=> {}", hex::encode(&req));
        self.send_raw(&req)
    }

    /// Receive the reply to `cmd`, returning at most `max_len` payload bytes.
    fn receive(&mut self, cmd: u8, max_len: usize) -> Result<Vec<u8>> {
        let want = max_len + RESPONSE_HEADER_SIZE;
        if want > MAX_PACKET_SIZE {
            return Err(ProtocolError::FrameTooLarge { len: want }.into());
        }
        let raw = self.recv_raw()?;
        log::debug!("<= {}", hex::encode(&raw));
        let mut payload = Response::parse(cmd, &raw)?.into_payload();
        payload.truncate(max_len);
        Ok(payload)
    }

    fn transfer(&mut self, cmd: Command, max_len: usize) -> Result<Vec<u8>> {
        let opcode = cmd.opcode();
        self.send(opcode, &cmd.payload()?)?;
        self.receive(opcode, max_len)
    }
}
