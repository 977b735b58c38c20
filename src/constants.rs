/// Largest frame accepted in either direction, header included.
pub const MAX_PACKET_SIZE: usize = 64;

/// Request header: `[cmd][len_lo][len_hi]`
pub const REQUEST_HEADER_SIZE: usize = 3;
/// Response header: `[cmd][status][len_lo][len_hi]`
pub const RESPONSE_HEADER_SIZE: usize = 4;

/// Plain data bytes carried by a single program/verify frame.
pub const CHUNK_SIZE: usize = 56;

/// Images are zero padded to this boundary before being programmed.
pub const IMAGE_ALIGNMENT: usize = 64;

/// Widest address span a loaded image may cover, above every code flash in
/// the device database.
pub const MAX_IMAGE_SIZE: usize = 1024 * 1024;

/// Bootloader versions from 2.7 onwards answer the key exchange with zero.
pub const BTVER_2_7: u16 = 0x0207;

pub mod commands {
    pub const IDENTIFY: u8 = 0xa1;
    pub const ISP_END: u8 = 0xa2;
    pub const ISP_KEY: u8 = 0xa3;
    pub const ERASE: u8 = 0xa4;
    pub const PROGRAM: u8 = 0xa5;
    pub const VERIFY: u8 = 0xa6;
    pub const READ_CONFIG: u8 = 0xa7;
    pub const WRITE_CONFIG: u8 = 0xa8;
    pub const DATA_ERASE: u8 = 0xa9;
    pub const DATA_PROGRAM: u8 = 0xaa;
    pub const DATA_READ: u8 = 0xab;
    pub const WRITE_OTP: u8 = 0xc3;
    pub const READ_OTP: u8 = 0xc4;
    pub const SET_BAUD: u8 = 0xc5;
}

/// Config register selection bits.
///
/// The `RDPR_USER_DATA_WPR` group is laid out as three little-endian words:
///
/// | BYTE0  | BYTE1  | BYTE2  | BYTE3  |
/// |--------|--------|--------|--------|
/// | RDPR   | nRDPR  | USER   | nUSER  |
/// | DATA0  | nDATA0 | DATA1  | nDATA1 |
/// | WPR0   | WPR1   | WPR2   | WPR3   |
pub mod config_mask {
    pub const RDPR_USER_DATA_WPR: u16 = 0x07;
    /// Bootloader version, `[0x00, major, minor, 0x00]`
    pub const BTVER: u16 = 0x08;
    pub const UID: u16 = 0x10;
    pub const ALL: u16 = 0x1f;
}

/// RDPR value of a chip whose code flash is readable.
pub const RDPR_UNPROTECTED: u8 = 0xa5;
