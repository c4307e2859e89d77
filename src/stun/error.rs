/**
 * Errors raised by the STUN codec
 */
use thiserror::Error;

/**
 * Produced when a message cannot be turned into its wire representation
 */
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum EncodeError {
    #[error("attribute 0x{attr_type:04X} declares {declared} bytes but carries {actual}")]
    AttributeLengthMismatch {
        attr_type: u16,
        declared: u16,
        actual: usize,
    },

    #[error("attribute 0x{attr_type:04X} value of {len} bytes does not fit a 16 bit length")]
    AttributeTooLarge { attr_type: u16, len: usize },

    #[error("attribute section of {0} bytes does not fit a 16 bit length")]
    MessageTooLarge(usize),

    #[error("attribute 0x{0:04X} added after FINGERPRINT")]
    AttributeAfterFingerprint(u16),
}

/**
 * Produced when received bytes are not a well formed STUN message
 */
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum DecodeError {
    #[error("message too short: {0} bytes, a header needs 20")]
    TooShort(usize),

    #[error("not a STUN message, type field 0x{0:04X} has the top bits set")]
    NotStun(u16),

    #[error("bad magic cookie 0x{0:08X}")]
    BadMagicCookie(u32),

    #[error("length mismatch, header declares {declared} attribute bytes but {actual} follow")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("declared length {0} is not a multiple of 4")]
    UnalignedLength(u16),

    #[error("malformed attribute 0x{attr_type:04X}: {reason}")]
    MalformedAttribute { attr_type: u16, reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(attr_type: u16, reason: impl Into<String>) -> Self {
        DecodeError::MalformedAttribute {
            attr_type,
            reason: reason.into(),
        }
    }
}
