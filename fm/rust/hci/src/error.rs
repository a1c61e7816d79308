//! Defines the Result type and FM HAL errors

use fm_hal::HalError;
use fm_packet::PacketError;
use nix::errno::Errno;
use num_derive::{FromPrimitive, ToPrimitive};
use thiserror::Error;

/// Result type
pub type Result<T> = std::result::Result<T, FmError>;

/// Status codes shared with the transport layer
#[derive(FromPrimitive, ToPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HcStatus {
    Success = 0,
    Fail = 1,
    NotReady = 2,
    NoMem = 3,
    Busy = 4,
    CorruptedBuffer = 5,
    NullPointer = 6,
}

/// Everything that can go wrong between a caller and the controller
#[derive(Error, Debug)]
pub enum FmError {
    /// Generic failure
    #[error("operation failed")]
    Fail,
    /// No live session, or the session is closing
    #[error("command sent before hal init")]
    NotReady,
    /// Allocation failure while framing a command
    #[error("out of memory")]
    NoMemory,
    /// Controller refused because it is busy
    #[error("controller busy")]
    Busy,
    /// A buffer from the wire did not hold what its header claimed
    #[error("corrupted buffer: {0}")]
    CorruptedBuffer(PacketError),
    /// A control value outside its legal range
    #[error("invalid argument")]
    InvalidArgument,
    /// No response within the command timeout
    #[error("timed out waiting for the controller")]
    Timeout,
    /// Non-zero status in a command-complete event
    #[error("controller reported status {0:#04x}")]
    Device(u8),
    /// A blocking wait from the context that delivers the awaited event
    #[error("blocking call from the event delivery context")]
    EventContext,
    /// A previous session never finished closing
    #[error("previous session is stuck closing")]
    SessionStuck,
    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] HalError),
}

impl FmError {
    /// Negative status code in the convention of the C HAL interface
    pub fn code(&self) -> i32 {
        match self {
            FmError::Fail | FmError::Transport(_) => -(HcStatus::Fail as i32),
            FmError::NotReady => -(HcStatus::NotReady as i32),
            FmError::NoMemory => -(HcStatus::NoMem as i32),
            FmError::Busy => -(HcStatus::Busy as i32),
            FmError::CorruptedBuffer(_) => -(HcStatus::CorruptedBuffer as i32),
            FmError::InvalidArgument => -(Errno::EINVAL as i32),
            FmError::Timeout | FmError::SessionStuck => -(Errno::ETIMEDOUT as i32),
            FmError::Device(status) => -(*status as i32),
            FmError::EventContext => -(Errno::EDEADLK as i32),
        }
    }
}

impl From<PacketError> for FmError {
    fn from(e: PacketError) -> FmError {
        match e {
            PacketError::NoMemory(_) => FmError::NoMemory,
            PacketError::ParamsTooLong(_) => FmError::InvalidArgument,
            e => FmError::CorruptedBuffer(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_c_convention() {
        assert_eq!(FmError::NoMemory.code(), -3);
        assert_eq!(FmError::InvalidArgument.code(), -22);
        assert_eq!(FmError::Timeout.code(), -110);
        assert_eq!(FmError::EventContext.code(), -35);
        assert_eq!(FmError::Device(0x0C).code(), -12);
        assert_eq!(FmError::Transport(HalError::Closed).code(), -1);
    }

    #[test]
    fn packet_errors_map() {
        assert!(matches!(FmError::from(PacketError::NoMemory(10)), FmError::NoMemory));
        assert!(matches!(FmError::from(PacketError::ParamsTooLong(300)), FmError::InvalidArgument));
        assert!(matches!(
            FmError::from(PacketError::Truncated { needed: 4, actual: 1 }),
            FmError::CorruptedBuffer(_)
        ));
    }
}
