//! Chip flashing logic.
//!
//! Erase, then program the image in 56 byte chunks, then one empty program
//! frame at the end of the image, then optionally verify. Every chunk is
//! XOR-obfuscated with the session key at its absolute image offset.

use crate::constants::CHUNK_SIZE;
use crate::error::{Error, ProtocolError, Result, UserError};
use crate::protocol::Command;
use crate::session::{check_ack, Session};
use crate::transport::Transport;

/// Progress update callbacks
pub trait ProgressCallbacks {
    /// Initialize some progress report
    fn init(&mut self, action: &str, total: usize);
    /// Update some progress report
    fn update(&mut self, current: usize);
    /// Finish some progress report
    fn finish(&mut self);
}

/// Reports nothing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NoProgress;

impl ProgressCallbacks for NoProgress {
    fn init(&mut self, _action: &str, _total: usize) {}
    fn update(&mut self, _current: usize) {}
    fn finish(&mut self) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashOptions {
    /// Verify after programming
    pub verify: bool,
}

impl Default for FlashOptions {
    fn default() -> Self {
        FlashOptions { verify: true }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlashState {
    Idle,
    Erased,
    Programming,
    Finalized,
    Verifying,
    Done,
}

/// `(offset, len)` of each program/verify chunk covering `size` bytes.
pub fn chunks(size: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..size)
        .step_by(CHUNK_SIZE)
        .map(move |offset| (offset, CHUNK_SIZE.min(size - offset)))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Pass {
    Program,
    Verify,
    DataProgram,
}

impl Pass {
    fn command(self, address: u32, data: Vec<u8>) -> Command {
        match self {
            Pass::Program => Command::program(address, data),
            Pass::Verify => Command::verify(address, data),
            Pass::DataProgram => Command::DataProgram { address, data },
        }
    }

    fn error(self, address: u32, status: [u8; 2]) -> Error {
        match self {
            Pass::Verify => Error::Verify { address, status },
            Pass::Program | Pass::DataProgram => Error::Program { address, status },
        }
    }
}

pub struct Flashing<'a, T: Transport> {
    session: &'a mut Session<T>,
    options: FlashOptions,
    state: FlashState,
}

impl<'a, T: Transport> Flashing<'a, T> {
    pub fn new(session: &'a mut Session<T>, options: FlashOptions) -> Self {
        Flashing {
            session,
            options,
            state: FlashState::Idle,
        }
    }

    pub fn state(&self) -> FlashState {
        self.state
    }

    fn set_state(&mut self, state: FlashState) {
        log::debug!("flash state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Reject images that do not fit before anything reaches the device.
    fn check_size(&self, image: &[u8]) -> Result<()> {
        let flash_size = self.session.chip().flash_size;
        if image.len() > flash_size as usize {
            return Err(UserError::ImageTooLarge {
                size: image.len(),
                flash_size,
            }
            .into());
        }
        Ok(())
    }

    /// Erase, program, finalize and, unless disabled, verify `image`.
    pub fn flash(&mut self, image: &[u8], progress: &mut dyn ProgressCallbacks) -> Result<()> {
        self.check_size(image)?;
        self.session.require_key()?;

        let sectors = self.session.chip().sectors_for(image.len());
        self.erase_code(sectors)?;

        self.set_state(FlashState::Programming);
        self.run_pass(Pass::Program, image, progress)?;

        // zero-length program at the image end marks completion
        self.program_chunk(Pass::Program, image.len() as u32, &[])?;
        self.set_state(FlashState::Finalized);
        log::info!("Code Flash programmed, {} bytes", image.len());

        if self.options.verify {
            self.verify(image, progress)?;
        } else {
            self.set_state(FlashState::Done);
        }
        Ok(())
    }

    /// Compare `image` against the code flash.
    pub fn verify(&mut self, image: &[u8], progress: &mut dyn ProgressCallbacks) -> Result<()> {
        self.check_size(image)?;
        self.session.require_key()?;

        self.set_state(FlashState::Verifying);
        self.run_pass(Pass::Verify, image, progress)?;
        self.set_state(FlashState::Done);
        log::info!("Verified!");
        Ok(())
    }

    pub fn erase_code(&mut self, sectors: u32) -> Result<()> {
        self.session.require_key()?;

        let cmd = Command::erase(sectors);
        let opcode = cmd.opcode();
        let reply = self.session.transport().transfer(cmd, 2)?;
        check_ack(opcode, reply)?;
        self.set_state(FlashState::Erased);

        log::info!("Code Flash Erased, {} sectors", sectors);
        Ok(())
    }

    pub fn erase_data(&mut self, sectors: u32) -> Result<()> {
        self.require_data_flash()?;
        self.session.require_key()?;

        let cmd = Command::DataErase { sectors };
        let opcode = cmd.opcode();
        let reply = self.session.transport().transfer(cmd, 2)?;
        check_ack(opcode, reply)?;

        log::info!("Data Flash Erased, {} sectors", sectors);
        Ok(())
    }

    /// Program the data flash (EEPROM) starting at offset 0.
    pub fn write_data(&mut self, data: &[u8], progress: &mut dyn ProgressCallbacks) -> Result<()> {
        self.require_data_flash()?;
        let eeprom_size = self.session.chip().eeprom_size;
        if data.len() > eeprom_size as usize {
            return Err(UserError::ImageTooLarge {
                size: data.len(),
                flash_size: eeprom_size,
            }
            .into());
        }
        self.session.require_key()?;

        let sectors = self.session.chip().sectors_for(data.len());
        self.erase_data(sectors)?;
        self.run_pass(Pass::DataProgram, data, progress)?;
        log::info!("Data Flash programmed, {} bytes", data.len());
        Ok(())
    }

    /// Read `len` bytes of data flash starting at `address`.
    pub fn read_data(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.require_data_flash()?;

        let mut out = Vec::with_capacity(len);
        for (offset, chunk_len) in chunks(len) {
            let cmd = Command::DataRead {
                address: address + offset as u32,
                len: chunk_len as u16,
            };
            let opcode = cmd.opcode();
            let data = self.session.transport().transfer(cmd, chunk_len)?;
            if data.len() < chunk_len {
                return Err(ProtocolError::ShortPayload {
                    command: opcode,
                    expected: chunk_len,
                    got: data.len(),
                }
                .into());
            }
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    fn require_data_flash(&self) -> Result<()> {
        let chip = self.session.chip();
        if chip.eeprom_size == 0 {
            return Err(UserError::NoDataFlash(chip.name.clone()).into());
        }
        Ok(())
    }

    fn run_pass(
        &mut self,
        pass: Pass,
        image: &[u8],
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<()> {
        let action = match pass {
            Pass::Verify => "verify",
            Pass::Program | Pass::DataProgram => "write",
        };
        progress.init(action, image.len());
        for (offset, len) in chunks(image.len()) {
            self.program_chunk(pass, offset as u32, &image[offset..offset + len])?;
            progress.update(offset + len);
        }
        progress.finish();
        Ok(())
    }

    /// Send one chunk of plain `data` located at image offset `address`.
    fn program_chunk(&mut self, pass: Pass, address: u32, data: &[u8]) -> Result<()> {
        let key = self.session.require_key()?;
        let cmd = pass.command(address, key.apply(address as usize, data));
        let opcode = cmd.opcode();

        let reply = self.session.transport().transfer(cmd, 2)?;
        if reply.len() < 2 {
            return Err(ProtocolError::ShortPayload {
                command: opcode,
                expected: 2,
                got: reply.len(),
            }
            .into());
        }
        let status = [reply[0], reply[1]];
        if status != [0, 0] {
            return Err(pass.error(address, status));
        }
        Ok(())
    }
}
