//! The wire protocol: framing, CRC, options, and packet codecs.

pub mod crc;
pub mod framing;
pub mod options;
pub mod packet;

/// Serial baud rate for both the control protocol and the download console.
pub const BAUD_RATE: u32 = 115200;

/// How many bytes to pull off the transport per poll tick.
pub const READ_CHUNK: usize = 300;

/// Single-byte commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    Disarm = 0,
    Arm = 1,
    Default = 2,
    Reset = 3,
    ClearFaults = 4,
    Pulse = 5,
    TriggerSafe = 6,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Status byte: acknowledge.
pub const ACK: u8 = 0x15;
/// Status byte: refused.
pub const NACK: u8 = 0xff;
/// Status byte: device-side timeout.
pub const TIMEOUT: u8 = 0xfc;
/// Status byte: device saw a malformed frame.
pub const FRAMING_ERROR: u8 = 0xfe;
/// Status byte: bootloader is ready for a download.
pub const BOOT_START: u8 = 0x16;
/// Status byte: alternate boot start, doubles as verification success.
pub const BOOT_START_ALT: u8 = 0x1a;

/// Decoded status byte from a command or set response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Ack,
    Nack,
    Timeout,
    FramingError,
    BootStart,
    BootStartAlt,
    Other(u8),
}

impl Status {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            ACK => Status::Ack,
            NACK => Status::Nack,
            TIMEOUT => Status::Timeout,
            FRAMING_ERROR => Status::FramingError,
            BOOT_START => Status::BootStart,
            BOOT_START_ALT => Status::BootStartAlt,
            other => Status::Other(other),
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Status::Ack => ACK,
            Status::Nack => NACK,
            Status::Timeout => TIMEOUT,
            Status::FramingError => FRAMING_ERROR,
            Status::BootStart => BOOT_START,
            Status::BootStartAlt => BOOT_START_ALT,
            Status::Other(b) => b,
        }
    }

    pub fn is_ack(self) -> bool {
        self == Status::Ack
    }
}
