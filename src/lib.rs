//! WCH ISP Protocol implementation, USB bootloader flavour.

pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod image;
pub mod key;
pub mod protocol;
pub mod session;
pub mod transport;

pub use self::device::{Chip, ChipDB};
pub use self::error::{Error, Result};
pub use self::flashing::{FlashOptions, Flashing, ProgressCallbacks};
pub use self::protocol::{Command, Response};
pub use self::session::Session;
pub use self::transport::Transport;
