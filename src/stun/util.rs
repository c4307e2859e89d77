/**
 * Checksum helpers for the FINGERPRINT attribute
 */
use super::FINGERPRINT_XOR;

/**
 * Calculate the FINGERPRINT value of a buffer: CRC-32 (ISO HDLC, as used by ethernet and zlib)
 * XORed with 0x5354554E.
 *
 * @param buffer Everything preceding the FINGERPRINT attribute, header included
 * @return The value to place in the attribute
 */
pub(crate) fn calculate_fingerprint(buffer: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(buffer);
    hasher.finalize() ^ FINGERPRINT_XOR
}
