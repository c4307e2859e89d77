/**
 * STUN message framing: header, ordered attributes and the FINGERPRINT trailer.
 * See RFC 5389 Section 6 and 15.5
 * https://datatracker.ietf.org/doc/html/rfc5389#section-6
 */
use std::fmt;

use rand::Rng;

use super::{
    attribute_type::ATTR_FINGERPRINT,
    defs::{padding, Attribute, ErrorCode, RawAttribute, RequestedTransport, ATTR_HEADER_LENGTH},
    error::{DecodeError, EncodeError},
    util::calculate_fingerprint,
    HEADER_LENGTH, MAGIC_COOKIE,
};

const TRANSACTION_ID_LENGTH: usize = 12;

/// FINGERPRINT on the wire: 4 byte TLV header plus a 4 byte CRC
const FINGERPRINT_ATTR_LENGTH: usize = ATTR_HEADER_LENGTH + 4;

/**
 * The class of a message, carried in bits C1 and C0 of the type field
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MessageClass {
    Request,
    Indication,
    SuccessResponse,
    ErrorResponse,
}

impl MessageClass {
    fn bits(self) -> u16 {
        match self {
            MessageClass::Request => 0x0000,
            MessageClass::Indication => 0x0010,
            MessageClass::SuccessResponse => 0x0100,
            MessageClass::ErrorResponse => 0x0110,
        }
    }

    fn from_bits(typ: u16) -> Self {
        match typ & 0x0110 {
            0x0000 => MessageClass::Request,
            0x0010 => MessageClass::Indication,
            0x0100 => MessageClass::SuccessResponse,
            _ => MessageClass::ErrorResponse,
        }
    }
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageClass::Request => "Request",
            MessageClass::Indication => "Indication",
            MessageClass::SuccessResponse => "SuccessResponse",
            MessageClass::ErrorResponse => "ErrorResponse",
        };
        f.write_str(name)
    }
}

/**
 * STUN and TURN methods (RFC 5389, RFC 5766). Only Allocate is ever sent by this tool.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Binding,
    Allocate,
    Refresh,
    Send,
    Data,
    CreatePermission,
    ChannelBind,
    Other(u16),
}

impl Method {
    pub fn code(self) -> u16 {
        match self {
            Method::Binding => 0x001,
            Method::Allocate => 0x003,
            Method::Refresh => 0x004,
            Method::Send => 0x006,
            Method::Data => 0x007,
            Method::CreatePermission => 0x008,
            Method::ChannelBind => 0x009,
            Method::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0x001 => Method::Binding,
            0x003 => Method::Allocate,
            0x004 => Method::Refresh,
            0x006 => Method::Send,
            0x007 => Method::Data,
            0x008 => Method::CreatePermission,
            0x009 => Method::ChannelBind,
            other => Method::Other(other),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Other(code) => write!(f, "Method(0x{:03X})", code),
            known => write!(f, "{:?}", known),
        }
    }
}

/**
 * Pack class and method into the 14 bit type field:
 *
 *   0                 1
 *   2  3  4 5 6 7 8 9 0 1 2 3 4 5
 *  +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
 *  |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
 *  |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
 *  +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
 */
fn pack_type(class: MessageClass, method: Method) -> u16 {
    let m = method.code();
    ((m & 0x0F80) << 2) | ((m & 0x0070) << 1) | (m & 0x000F) | class.bits()
}

fn unpack_type(typ: u16) -> (MessageClass, Method) {
    let m = ((typ & 0x3E00) >> 2) | ((typ & 0x00E0) >> 1) | (typ & 0x000F);
    (MessageClass::from_bits(typ), Method::from_code(m))
}

/**
 * The 96 bit transaction ID. Fresh and random for every request, echoed by the server.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TransactionId([u8; TRANSACTION_ID_LENGTH]);

impl TransactionId {
    pub fn random() -> Self {
        let mut id = [0u8; TRANSACTION_ID_LENGTH];
        rand::thread_rng().fill(&mut id);
        TransactionId(id)
    }

    pub fn as_bytes(&self) -> &[u8; TRANSACTION_ID_LENGTH] {
        &self.0
    }
}

impl From<[u8; TRANSACTION_ID_LENGTH]> for TransactionId {
    fn from(id: [u8; TRANSACTION_ID_LENGTH]) -> Self {
        TransactionId(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/**
 * A STUN message. `length` is the size of the attribute section (padding included, header
 * excluded) and is kept in step with `attributes` on every insertion.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StunMessage {
    pub class: MessageClass,
    pub method: Method,
    pub transaction_id: TransactionId,
    attributes: Vec<RawAttribute>,
    length: u16,
}

impl StunMessage {
    pub fn new(class: MessageClass, method: Method, transaction_id: TransactionId) -> Self {
        StunMessage {
            class,
            method,
            transaction_id,
            attributes: Vec::new(),
            length: 0,
        }
    }

    /**
     * The minimal unauthenticated Allocate: REQUESTED-TRANSPORT followed by FINGERPRINT.
     *
     * @param transaction_id ID of the request, normally `TransactionId::random()`
     * @param protocol Protocol number for REQUESTED-TRANSPORT
     */
    pub fn allocate_request(
        transaction_id: TransactionId,
        protocol: u8,
    ) -> Result<Self, EncodeError> {
        let mut msg = StunMessage::new(MessageClass::Request, Method::Allocate, transaction_id);
        msg.add_attribute(&Attribute::RequestedTransport(RequestedTransport { protocol }))?;
        msg.add_fingerprint()?;
        Ok(msg)
    }

    /// Byte length of the attribute section
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Header plus attribute section, i.e. the datagram size
    pub fn encoded_len(&self) -> usize {
        HEADER_LENGTH as usize + self.length() as usize
    }

    #[cfg(test)]
    pub fn attributes(&self) -> &[RawAttribute] {
        &self.attributes
    }

    /**
     * Append a typed attribute. FINGERPRINT is always computed here, whatever value it carries.
     */
    pub fn add_attribute(&mut self, attr: &Attribute) -> Result<(), EncodeError> {
        if let Attribute::Fingerprint(_) = attr {
            return self.add_fingerprint();
        }
        self.add_raw(attr.to_raw()?)
    }

    /**
     * Append an already serialized attribute, recomputing the length
     */
    pub fn add_raw(&mut self, raw: RawAttribute) -> Result<(), EncodeError> {
        self.ensure_open(raw.attr_type)?;
        self.length = self.grown_length(raw.encoded_len())?;
        self.attributes.push(raw);
        Ok(())
    }

    /**
     * Append FINGERPRINT. The CRC covers the header and every attribute added so far, with the
     * header length already counting the FINGERPRINT attribute itself. Nothing can be added
     * afterwards.
     */
    pub fn add_fingerprint(&mut self) -> Result<(), EncodeError> {
        self.ensure_open(ATTR_FINGERPRINT)?;
        let length = self.grown_length(FINGERPRINT_ATTR_LENGTH)?;

        let mut buffer = Vec::with_capacity(HEADER_LENGTH as usize + length as usize);
        self.write_to(&mut buffer, length)?;
        let crc = calculate_fingerprint(&buffer);

        self.length = length;
        self.attributes
            .push(RawAttribute::new(ATTR_FINGERPRINT, crc.to_be_bytes().to_vec())?);
        Ok(())
    }

    fn ensure_open(&self, attr_type: u16) -> Result<(), EncodeError> {
        match self.attributes.last() {
            Some(last) if last.attr_type == ATTR_FINGERPRINT => {
                Err(EncodeError::AttributeAfterFingerprint(attr_type))
            }
            _ => Ok(()),
        }
    }

    fn grown_length(&self, extra: usize) -> Result<u16, EncodeError> {
        let total = self.length as usize + extra;
        u16::try_from(total).map_err(|_| EncodeError::MessageTooLarge(total))
    }

    // header (20 bytes) followed by the attributes
    fn write_to(&self, out: &mut Vec<u8>, length: u16) -> Result<(), EncodeError> {
        out.extend_from_slice(&pack_type(self.class, self.method).to_be_bytes());
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        out.extend_from_slice(self.transaction_id.as_bytes());
        for attr in &self.attributes {
            attr.write_to(out)?;
        }
        Ok(())
    }

    /**
     * Serialize the message into its wire representation
     *
     * @return The encoded bytes, `encoded_len()` long
     */
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut out, self.length)?;
        Ok(out)
    }

    /**
     * Parse a message from a byte slice holding exactly one message
     *
     * @param bytes The received datagram
     * @return The decoded message, or the first framing problem found
     */
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LENGTH as usize {
            return Err(DecodeError::TooShort(bytes.len()));
        }

        let typ = u16::from_be_bytes([bytes[0], bytes[1]]);
        if typ & 0xC000 != 0 {
            return Err(DecodeError::NotStun(typ));
        }
        let length = u16::from_be_bytes([bytes[2], bytes[3]]);
        let magic_cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if magic_cookie != MAGIC_COOKIE {
            return Err(DecodeError::BadMagicCookie(magic_cookie));
        }

        let available = bytes.len() - HEADER_LENGTH as usize;
        if length as usize != available {
            return Err(DecodeError::LengthMismatch {
                declared: length as usize,
                actual: available,
            });
        }
        if length % 4 != 0 {
            return Err(DecodeError::UnalignedLength(length));
        }

        let transaction_id = TransactionId(
            bytes[8..20]
                .try_into()
                .map_err(|_| DecodeError::TooShort(bytes.len()))?,
        );
        let (class, method) = unpack_type(typ);

        let mut attributes = Vec::new();
        let mut offset = HEADER_LENGTH as usize;
        while offset < bytes.len() {
            if offset + ATTR_HEADER_LENGTH > bytes.len() {
                return Err(DecodeError::malformed(0, "attribute header is truncated"));
            }
            let attr_type = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let attr_length = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]);

            let start = offset + ATTR_HEADER_LENGTH;
            let end = start + attr_length as usize;
            if end > bytes.len() {
                return Err(DecodeError::malformed(
                    attr_type,
                    format!(
                        "declares {} bytes but only {} remain",
                        attr_length,
                        bytes.len() - start
                    ),
                ));
            }
            let padded_end = end + padding(attr_length as usize);
            if padded_end > bytes.len() {
                return Err(DecodeError::malformed(attr_type, "padding is truncated"));
            }

            // values are only interpreted by the accessors, a bad one reads as absent there
            attributes.push(RawAttribute {
                attr_type,
                length: attr_length,
                value: bytes[start..end].to_vec(),
            });
            offset = padded_end;
        }

        Ok(StunMessage {
            class,
            method,
            transaction_id,
            attributes,
            length,
        })
    }

    /// First attribute of the given type
    pub fn get(&self, attr_type: u16) -> Option<&RawAttribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    fn get_typed(&self, attr_type: u16) -> Option<Attribute> {
        self.get(attr_type)
            .and_then(|raw| Attribute::from_raw(raw).ok())
    }

    /**
     * ERROR-CODE, if the message carries one. Absence is normal for non-error messages.
     */
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.get_typed(super::attribute_type::ATTR_ERROR_CODE) {
            Some(Attribute::ErrorCode(ec)) => Some(ec),
            _ => None,
        }
    }

    /// Raw NONCE value. Never interpreted.
    pub fn nonce(&self) -> Option<&[u8]> {
        self.get(super::attribute_type::ATTR_NONCE)
            .map(|raw| raw.value.as_slice())
    }

    pub fn realm(&self) -> Option<String> {
        match self.get_typed(super::attribute_type::ATTR_REALM) {
            Some(Attribute::Realm(realm)) => Some(realm),
            _ => None,
        }
    }

    pub fn software(&self) -> Option<String> {
        match self.get_typed(super::attribute_type::ATTR_SOFTWARE) {
            Some(Attribute::Software(sw)) => Some(sw),
            _ => None,
        }
    }

    /**
     * Check FINGERPRINT against the bytes this message was decoded from.
     *
     * @param raw The exact datagram passed to `decode`
     * @return None when there is no FINGERPRINT, otherwise whether it matches. A FINGERPRINT
     *         that isn't the last attribute never matches.
     */
    pub fn verify_fingerprint(&self, raw: &[u8]) -> Option<bool> {
        let position = self
            .attributes
            .iter()
            .position(|a| a.attr_type == ATTR_FINGERPRINT)?;
        if position + 1 != self.attributes.len() || raw.len() < FINGERPRINT_ATTR_LENGTH {
            return Some(false);
        }

        let expected = match Attribute::from_raw(&self.attributes[position]) {
            Ok(Attribute::Fingerprint(crc)) => crc,
            _ => return Some(false),
        };
        let covered = &raw[..raw.len() - FINGERPRINT_ATTR_LENGTH];
        Some(calculate_fingerprint(covered) == expected)
    }
}
