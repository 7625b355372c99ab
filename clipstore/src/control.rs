//! Control commands
//!
//! Codes follow the ioctl `_IO(type, nr)` encoding with type `'C'`.

use crate::error::StoreError;

pub const CONTROL_MAGIC: u8 = b'C';

const fn io(nr: u8) -> u32 {
    ((CONTROL_MAGIC as u32) << 8) | nr as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reset the identity's buffer to empty, keeping its capacity
    Clear,
    /// Register the session's sink for change notifications
    Subscribe,
    /// Remove the session's sink registration
    Unsubscribe,
}

impl Command {
    pub const CLEAR: u32 = io(1);
    pub const SUBSCRIBE: u32 = io(2);
    pub const UNSUBSCRIBE: u32 = io(3);

    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Command::Clear => Self::CLEAR,
            Command::Subscribe => Self::SUBSCRIBE,
            Command::Unsubscribe => Self::UNSUBSCRIBE,
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = StoreError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            Self::CLEAR => Ok(Command::Clear),
            Self::SUBSCRIBE => Ok(Command::Subscribe),
            Self::UNSUBSCRIBE => Ok(Command::Unsubscribe),
            other => Err(StoreError::Unsupported(format!(
                "control command {other:#06x}"
            ))),
        }
    }
}
