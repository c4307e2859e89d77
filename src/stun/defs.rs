/**
 * STUN attributes, both as raw TLVs and as the handful of kinds we interpret.
 * See RFC 5389 Section 15 and RFC 5766 Section 14
 */
use std::fmt;

use super::{
    attribute_type::{
        ATTR_ERROR_CODE, ATTR_FINGERPRINT, ATTR_NONCE, ATTR_REALM, ATTR_REQUESTED_TRANSPORT,
        ATTR_SOFTWARE,
    },
    error::{DecodeError, EncodeError},
};

/// size of the type and length fields preceding every attribute value
pub(crate) const ATTR_HEADER_LENGTH: usize = 4;

/// REQUESTED-TRANSPORT is a protocol number followed by 3 RFFU bytes
const REQUESTED_TRANSPORT_SIZE: usize = 4;

const FINGERPRINT_SIZE: usize = 4;

/**
 * Number of zero bytes needed to bring `len` to a 4 byte boundary
 */
pub(crate) fn padding(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/**
 * An attribute as it sits on the wire: type, declared value length and the value bytes
 * (without padding). Decoded messages keep these so that attributes we don't interpret
 * survive a decode/encode cycle untouched.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawAttribute {
    pub attr_type: u16,
    pub length: u16,
    pub value: Vec<u8>,
}

impl RawAttribute {
    /**
     * Build an attribute whose declared length matches its value
     */
    pub fn new(attr_type: u16, value: Vec<u8>) -> Result<Self, EncodeError> {
        let length = u16::try_from(value.len()).map_err(|_| EncodeError::AttributeTooLarge {
            attr_type,
            len: value.len(),
        })?;
        Ok(RawAttribute {
            attr_type,
            length,
            value,
        })
    }

    /**
     * Size of the attribute on the wire, TLV header and padding included
     */
    pub fn encoded_len(&self) -> usize {
        ATTR_HEADER_LENGTH + self.value.len() + padding(self.value.len())
    }

    /**
     * Append the TLV to `out`, zero padded to a 4 byte boundary
     */
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if self.length as usize != self.value.len() {
            return Err(EncodeError::AttributeLengthMismatch {
                attr_type: self.attr_type,
                declared: self.length,
                actual: self.value.len(),
            });
        }
        out.extend_from_slice(&self.attr_type.to_be_bytes());
        out.extend_from_slice(&self.length.to_be_bytes());
        out.extend_from_slice(&self.value);
        out.extend_from_slice(&[0u8; 3][..padding(self.value.len())]);
        Ok(())
    }
}

/**
 * Value of REQUESTED-TRANSPORT
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestedTransport {
    pub protocol: u8,
}

impl RequestedTransport {
    fn to_bytes(self) -> Vec<u8> {
        let mut v = vec![0u8; REQUESTED_TRANSPORT_SIZE];
        v[0] = self.protocol;
        // v[1..4] is RFFU and stays zero
        v
    }
}

/**
 * Value of ERROR-CODE. The code is split on the wire into a class (hundreds digit, 3-6)
 * and a number (0-99).
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ErrorCode {
    pub class: u8,
    pub number: u8,
    pub reason: String,
}

impl ErrorCode {
    /// Only fake servers in tests build error responses
    #[cfg(test)]
    pub fn new(code: u16, reason: &str) -> Self {
        assert!((300..=699).contains(&code), "error code {} out of range", code);
        ErrorCode {
            class: (code / 100) as u8,
            number: (code % 100) as u8,
            reason: reason.to_string(),
        }
    }

    /// The numeric code, e.g. 401
    pub fn code(&self) -> u16 {
        self.class as u16 * 100 + self.number as u16
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(4 + self.reason.len());
        v.extend_from_slice(&[0, 0, self.class & 0x07, self.number]);
        v.extend_from_slice(self.reason.as_bytes());
        v
    }

    fn from_bytes(value: &[u8]) -> Result<Self, DecodeError> {
        if value.len() < 4 {
            return Err(DecodeError::malformed(
                ATTR_ERROR_CODE,
                format!("{} bytes, at least 4 required", value.len()),
            ));
        }
        let class = value[2] & 0x07;
        let number = value[3];
        if !(3..=6).contains(&class) || number > 99 {
            return Err(DecodeError::malformed(
                ATTR_ERROR_CODE,
                format!("invalid code class {} number {}", class, number),
            ));
        }
        Ok(ErrorCode {
            class,
            number,
            reason: String::from_utf8_lossy(&value[4..]).to_string(),
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason)
    }
}

/**
 * The attribute kinds this tool understands. Anything else is kept as `Unknown` with its
 * raw value so it can still be measured and re-encoded.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Attribute {
    RequestedTransport(RequestedTransport),
    ErrorCode(ErrorCode),
    Nonce(Vec<u8>),
    Realm(String),
    Software(String),
    Fingerprint(u32),
    Unknown { attr_type: u16, value: Vec<u8> },
}

impl Attribute {
    pub fn attr_type(&self) -> u16 {
        match self {
            Attribute::RequestedTransport(_) => ATTR_REQUESTED_TRANSPORT,
            Attribute::ErrorCode(_) => ATTR_ERROR_CODE,
            Attribute::Nonce(_) => ATTR_NONCE,
            Attribute::Realm(_) => ATTR_REALM,
            Attribute::Software(_) => ATTR_SOFTWARE,
            Attribute::Fingerprint(_) => ATTR_FINGERPRINT,
            Attribute::Unknown { attr_type, .. } => *attr_type,
        }
    }

    /**
     * Serialize the value into a raw TLV
     */
    pub fn to_raw(&self) -> Result<RawAttribute, EncodeError> {
        let value = match self {
            Attribute::RequestedTransport(rt) => rt.to_bytes(),
            Attribute::ErrorCode(ec) => ec.to_bytes(),
            Attribute::Nonce(nonce) => nonce.clone(),
            Attribute::Realm(s) | Attribute::Software(s) => s.as_bytes().to_vec(),
            Attribute::Fingerprint(crc) => crc.to_be_bytes().to_vec(),
            Attribute::Unknown { value, .. } => value.clone(),
        };
        RawAttribute::new(self.attr_type(), value)
    }

    /**
     * Interpret a raw TLV. Types we don't know come back as `Unknown`, never as an error.
     * RFFU bytes of REQUESTED-TRANSPORT are ignored on reception.
     */
    pub fn from_raw(raw: &RawAttribute) -> Result<Self, DecodeError> {
        let value = raw.value.as_slice();
        let attr = match raw.attr_type {
            ATTR_REQUESTED_TRANSPORT => {
                if value.len() != REQUESTED_TRANSPORT_SIZE {
                    return Err(DecodeError::malformed(
                        raw.attr_type,
                        format!("expected 4 bytes, got {}", value.len()),
                    ));
                }
                Attribute::RequestedTransport(RequestedTransport { protocol: value[0] })
            }
            ATTR_ERROR_CODE => Attribute::ErrorCode(ErrorCode::from_bytes(value)?),
            ATTR_NONCE => Attribute::Nonce(value.to_vec()),
            ATTR_REALM => Attribute::Realm(String::from_utf8_lossy(value).to_string()),
            ATTR_SOFTWARE => Attribute::Software(String::from_utf8_lossy(value).to_string()),
            ATTR_FINGERPRINT => {
                let bytes: [u8; FINGERPRINT_SIZE] = value.try_into().map_err(|_| {
                    DecodeError::malformed(
                        raw.attr_type,
                        format!("expected 4 bytes, got {}", value.len()),
                    )
                })?;
                Attribute::Fingerprint(u32::from_be_bytes(bytes))
            }
            attr_type => Attribute::Unknown {
                attr_type,
                value: value.to_vec(),
            },
        };
        Ok(attr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::PROTO_UDP;

    #[test]
    fn test_padding() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 3);
        assert_eq!(padding(4), 0);
        assert_eq!(padding(5), 3);
        assert_eq!(padding(7), 1);
    }

    #[test]
    fn test_requested_transport_wire_format() {
        let raw = Attribute::RequestedTransport(RequestedTransport {
            protocol: PROTO_UDP,
        })
        .to_raw()
        .unwrap();

        let mut out = Vec::new();
        raw.write_to(&mut out).unwrap();
        assert_eq!(out, [0x00, 0x19, 0x00, 0x04, 17, 0, 0, 0]);
        assert_eq!(raw.encoded_len(), 8);
    }

    #[test]
    fn test_requested_transport_ignores_rffu_on_reception() {
        let raw = RawAttribute::new(ATTR_REQUESTED_TRANSPORT, vec![17, 1, 2, 3]).unwrap();
        assert_eq!(
            Attribute::from_raw(&raw).unwrap(),
            Attribute::RequestedTransport(RequestedTransport { protocol: 17 })
        );
    }

    #[test]
    fn test_error_code_wire_format() {
        let raw = Attribute::ErrorCode(ErrorCode::new(401, "Unauthorized"))
            .to_raw()
            .unwrap();
        assert_eq!(raw.length, 16);
        assert_eq!(&raw.value[..4], &[0, 0, 4, 1]);
        assert_eq!(&raw.value[4..], b"Unauthorized");

        let mut out = Vec::new();
        raw.write_to(&mut out).unwrap();
        assert_eq!(out.len(), 20);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_error_code_out_of_range() {
        ErrorCode::new(25_601, "Too Big");
    }

    #[test]
    fn test_error_code_parse() {
        let raw = RawAttribute::new(ATTR_ERROR_CODE, b"\0\0\x04\x26Stale Nonce".to_vec()).unwrap();
        match Attribute::from_raw(&raw).unwrap() {
            Attribute::ErrorCode(ec) => {
                assert_eq!(ec.code(), 438);
                assert_eq!(ec.reason, "Stale Nonce");
                assert_eq!(ec.to_string(), "438 Stale Nonce");
            }
            other => panic!("unexpected attribute {:?}", other),
        }
    }

    #[test]
    fn test_error_code_rejects_bad_values() {
        let short = RawAttribute::new(ATTR_ERROR_CODE, vec![0, 0, 4]).unwrap();
        assert!(matches!(
            Attribute::from_raw(&short),
            Err(DecodeError::MalformedAttribute { .. })
        ));

        let bad_class = RawAttribute::new(ATTR_ERROR_CODE, vec![0, 0, 2, 0]).unwrap();
        assert!(Attribute::from_raw(&bad_class).is_err());

        let bad_number = RawAttribute::new(ATTR_ERROR_CODE, vec![0, 0, 4, 100]).unwrap();
        assert!(Attribute::from_raw(&bad_number).is_err());
    }

    #[test]
    fn test_unknown_attribute_is_kept() {
        let raw = RawAttribute::new(0x802B, vec![1, 2, 3]).unwrap();
        let attr = Attribute::from_raw(&raw).unwrap();
        assert_eq!(
            attr,
            Attribute::Unknown {
                attr_type: 0x802B,
                value: vec![1, 2, 3]
            }
        );
        assert_eq!(attr.to_raw().unwrap(), raw);
    }

    #[test]
    fn test_declared_length_mismatch() {
        let raw = RawAttribute {
            attr_type: ATTR_NONCE,
            length: 8,
            value: vec![1, 2, 3],
        };
        let mut out = Vec::new();
        assert_eq!(
            raw.write_to(&mut out),
            Err(EncodeError::AttributeLengthMismatch {
                attr_type: ATTR_NONCE,
                declared: 8,
                actual: 3
            })
        );
    }

    #[test]
    fn test_fingerprint_wrong_size() {
        let raw = RawAttribute::new(ATTR_FINGERPRINT, vec![1, 2]).unwrap();
        assert!(Attribute::from_raw(&raw).is_err());
    }
}
