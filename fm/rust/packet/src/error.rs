use thiserror::Error;

/// Errors raised while framing or parsing FM HCI packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// The command buffer could not be allocated
    #[error("out of memory building a {0} byte command")]
    NoMemory(usize),
    /// Command parameters exceed the one byte length field
    #[error("command parameters too long: {0} bytes")]
    ParamsTooLong(usize),
    /// A buffer is shorter than its header or its declared length
    #[error("corrupted buffer: need {needed} bytes, have {actual}")]
    Truncated {
        /// Bytes required to decode
        needed: usize,
        /// Bytes actually present
        actual: usize,
    },
    /// A length or count field is larger than the protocol allows
    #[error("field {field} out of range: {value}")]
    OutOfRange {
        /// Name of the offending field
        field: &'static str,
        /// Value found on the wire
        value: usize,
    },
}

/// Result type for packet operations
pub type Result<T> = std::result::Result<T, PacketError>;

/// Fails with `Truncated` unless `buf` holds at least `needed` bytes
pub fn ensure_len(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        Err(PacketError::Truncated { needed, actual: buf.len() })
    } else {
        Ok(())
    }
}
