//! Modified UTF-8, as used by `CONSTANT_Utf8_info`
//!
//! It differs from UTF-8 in two ways: `\u{0000}` takes the two byte form, and characters outside
//! the basic multilingual plane are written as a surrogate pair of three byte sequences.
//!
//! See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.4.7>

/// Encode a string the way the JVM expects it in the constant pool
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(string.len());
    for unit in string.encode_utf16() {
        let unit = unit as u32;
        match unit {
            0x01..=0x7F => bytes.push(unit as u8),
            0x00 | 0x80..=0x7FF => {
                bytes.push(0xC0 | (unit >> 6) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                bytes.push(0xE0 | (unit >> 12) as u8);
                bytes.push(0x80 | (unit >> 6 & 0x3F) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    bytes
}

/// Decode the modified UTF-8 of a `CONSTANT_Utf8_info` entry
///
/// Only the shortest form of each character is accepted (except for the two byte null), and
/// surrogates must come in pairs. This makes decoding followed by [`encode_modified_utf8`]
/// reproduce the input exactly.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u32;
        let continuation = |at: usize| -> Result<u32, String> {
            match bytes.get(at) {
                Some(b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u32),
                Some(b) => Err(format!("invalid continuation byte {:#x} at {}", b, at)),
                None => Err(format!("truncated character at {}", i)),
            }
        };
        if b0 == 0 {
            return Err(format!("raw null byte at {}", i));
        } else if b0 < 0x80 {
            units.push(b0 as u16);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let code = (b0 & 0x1F) << 6 | continuation(i + 1)?;
            if code != 0 && code < 0x80 {
                return Err(format!("overlong encoding at {}", i));
            }
            units.push(code as u16);
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let code = (b0 & 0x0F) << 12 | continuation(i + 1)? << 6 | continuation(i + 2)?;
            if code < 0x800 {
                return Err(format!("overlong encoding at {}", i));
            }
            units.push(code as u16);
            i += 3;
        } else {
            return Err(format!("invalid leading byte {:#x} at {}", b0, i));
        }
    }
    String::from_utf16(&units).map_err(|_| String::from("unpaired surrogate"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn null_takes_two_bytes() {
        assert_eq!(encode_modified_utf8("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert_eq!(encode_modified_utf8("plain"), b"plain".to_vec());
    }

    #[test]
    fn multi_byte_characters() {
        assert_eq!(encode_modified_utf8("\u{e9}"), vec![0xC3, 0xA9]);
        assert_eq!(encode_modified_utf8("\u{20ac}"), vec![0xE2, 0x82, 0xAC]);
        // U+1F600 is the pair D83D DE00
        assert_eq!(
            encode_modified_utf8("\u{1F600}"),
            vec![0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]
        );
    }

    #[test]
    fn decoding_inverts_encoding() {
        for sample in ["", "Main.java", "a\0b", "caf\u{e9} \u{20ac}", "\u{1F600}\u{10FFFF}"] {
            let encoded = encode_modified_utf8(sample);
            assert_eq!(decode_modified_utf8(&encoded).unwrap(), sample);
        }
    }

    #[test]
    fn rejected_encodings() {
        // raw null byte
        assert!(decode_modified_utf8(&[97, 0]).is_err());
        // truncated two byte sequence
        assert!(decode_modified_utf8(&[0xC4]).is_err());
        // four byte (standard UTF-8) form
        assert!(decode_modified_utf8(&[0xF0, 0x9F, 0x98, 0x80]).is_err());
        // lone high surrogate
        assert!(decode_modified_utf8(&[0xED, 0xA0, 0xBD]).is_err());
        // overlong encoding of 'a'
        assert!(decode_modified_utf8(&[0xC1, 0xA1]).is_err());
    }
}
