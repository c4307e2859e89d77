/**
 * Various misc. utility functions
 */

/**
 * Hex dump of a datagram for trace logs: bytes separated by spaces, one `|` after every
 * 4 byte word so header fields and attribute TLVs are easy to pick out.
 *
 * @param buffer The bytes to dump
 * @return e.g. "00 03 00 10 | 21 12 a4 42"
 */
pub(crate) fn hex_dump_words(buffer: &[u8]) -> String {
    buffer
        .chunks(4)
        .map(|word| {
            word.iter()
                .map(|byte| format!("{:02x}", byte))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump_words() {
        assert_eq!(hex_dump_words(&[]), "");
        assert_eq!(hex_dump_words(&[0x00, 0x03]), "00 03");
        assert_eq!(
            hex_dump_words(&[0x00, 0x03, 0x00, 0x10, 0x21, 0x12, 0xa4, 0x42, 0xff]),
            "00 03 00 10 | 21 12 a4 42 | ff"
        );
    }
}
