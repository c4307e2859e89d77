/**
 * The STUN-specific module, this file contains various constant definitions
 * shared by the codec and the attribute layer.
 */

pub(crate) mod defs;
pub(crate) mod error;
pub(crate) mod message;
mod util;

/// length of a STUN header is 20 bytes
pub(crate) const HEADER_LENGTH: u16 = 20;

/// This value is included in STUN messages to help differentiate them from other types of network traffic and to
/// ensure that the messages are processed correctly by STUN servers and clients. The Magic Cookie value is 0x2112A442
pub(crate) const MAGIC_COOKIE: u32 = 0x2112A442;

/// The CRC32 of the message is XORed with this value (the ASCII string "STUN") to produce the FINGERPRINT value
pub(crate) const FINGERPRINT_XOR: u32 = 0x5354554E;

/// Protocol number carried by REQUESTED-TRANSPORT for UDP relaying (IANA)
pub(crate) const PROTO_UDP: u8 = 17;

/*
   Comprehension-required range (0x0000-0x7FFF):
     0x0009: ERROR-CODE
     0x0014: REALM
     0x0015: NONCE
     0x0019: REQUESTED-TRANSPORT (RFC 5766)

   Comprehension-optional range (0x8000-0xFFFF)
     0x8022: SOFTWARE
     0x8028: FINGERPRINT
*/

// Attribute Types
pub(crate) mod attribute_type {
    /// This attribute is present in error responses only. It contains a numerical value in the range of 300 to 699
    /// and a textual reason phrase encoded in UTF-8 describing the error code. An unauthenticated Allocate gets
    /// 401 (Unauthorized) back from a correctly configured TURN server.
    pub const ATTR_ERROR_CODE: u16 = 0x0009;

    /// The REALM attribute provides a realm, or domain, within which the username and password are valid.
    /// TURN servers send it together with NONCE in the 401 challenge.
    pub const ATTR_REALM: u16 = 0x0014;

    /// The NONCE attribute is sent by the server in the 401 challenge. A real client would echo it back on an
    /// authenticated retry; we only record how large it is.
    pub const ATTR_NONCE: u16 = 0x0015;

    /// Used by the client in an Allocate request to ask for a specific transport protocol for the relayed
    /// transport address. RFC 5766 only allows 17 (UDP).
    pub const ATTR_REQUESTED_TRANSPORT: u16 = 0x0019;

    /// This attribute provides a human-readable description of the server software.
    pub const ATTR_SOFTWARE: u16 = 0x8022;

    /// This attribute provides a CRC32 (Cyclic Redundancy Check) value of the STUN message, ensuring that the message has not been
    /// altered during transmission. The CRC32 is calculated on the entire STUN message, then the CRC32 value is XORed with the constant
    /// 0x5354554E (the ASCII representation of "STUN"). It must be the last attribute of a message.
    pub const ATTR_FINGERPRINT: u16 = 0x8028;
}

// Error Codes
pub(crate) mod error_code {
    /// Unauthorized (401), what a TURN server answers to an Allocate without credentials
    pub const ERROR_CODE_UNAUTHORIZED: u16 = 401;
}
