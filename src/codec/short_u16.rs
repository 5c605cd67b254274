//! Variable-length encoding for `u16` lengths ("shortU16").
//!
//! Seven payload bits per byte, least significant group first. The high bit
//! of a byte marks that another byte follows. Values up to 127 take one byte,
//! up to 16383 two bytes, and the rest of the `u16` range three bytes.
//!
//! ```rust
//! use hvergelmir::codec::short_u16;
//!
//! let bytes = short_u16::encode(16384).unwrap();
//! assert_eq!(bytes, [0x80, 0x80, 0x01]);
//! assert_eq!(short_u16::decode(&bytes, 0).unwrap(), (16384, 3));
//! ```

use crate::error::CodecError;

/// Codec name used in error messages.
pub const CODEC_NAME: &str = "shortU16";

/// Smallest encodable value.
pub const MIN: u32 = 0;

/// Largest encodable value.
pub const MAX: u32 = u16::MAX as u32;

/// Largest encoded size in bytes.
pub const MAX_SIZE: usize = 3;

const PAYLOAD_MASK: u8 = 0x7f;
const CONTINUATION: u8 = 0x80;

/// Number of bytes `value` encodes to.
pub fn size_for(value: u16) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        _ => 3,
    }
}

/// Encode `value`, rejecting anything outside `MIN..=MAX`.
pub fn encode(value: u32) -> Result<Vec<u8>, CodecError> {
    let value = u16::try_from(value).map_err(|_| CodecError::OutOfRange {
        codec: CODEC_NAME,
        value: value.into(),
        min: MIN.into(),
        max: MAX.into(),
    })?;
    let mut out = Vec::with_capacity(size_for(value));
    encode_into(value, &mut out);
    Ok(out)
}

/// Append the encoding of `value` to `out`.
pub fn encode_into(value: u16, out: &mut Vec<u8>) {
    let mut rest = value;
    loop {
        let byte = (rest as u8) & PAYLOAD_MASK;
        rest >>= 7;
        if rest == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | CONTINUATION);
    }
}

/// Decode one value starting at `offset`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode(bytes: &[u8], offset: usize) -> Result<(u16, usize), CodecError> {
    let mut value: u32 = 0;
    for index in 0..MAX_SIZE {
        let at = offset + index;
        let byte = *bytes.get(at).ok_or(CodecError::Truncated { offset: at })?;
        value |= u32::from(byte & PAYLOAD_MASK) << (index * 7);
        if byte & CONTINUATION == 0 {
            let value = u16::try_from(value).map_err(|_| CodecError::Overflow {
                codec: CODEC_NAME,
                offset: at,
            })?;
            return Ok((value, index + 1));
        }
    }
    Err(CodecError::Overflow {
        codec: CODEC_NAME,
        offset: offset + MAX_SIZE - 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VECTORS: &[(u16, &[u8])] = &[
        (0, &[0x00]),
        (1, &[0x01]),
        (42, &[0x2a]),
        (127, &[0x7f]),
        (128, &[0x80, 0x01]),
        (16383, &[0xff, 0x7f]),
        (16384, &[0x80, 0x80, 0x01]),
        (65534, &[0xfe, 0xff, 0x03]),
        (65535, &[0xff, 0xff, 0x03]),
    ];

    #[test]
    fn known_vectors() {
        for &(value, bytes) in VECTORS {
            assert_eq!(encode(value.into()).unwrap(), bytes, "encode {value}");
            assert_eq!(
                decode(bytes, 0).unwrap(),
                (value, bytes.len()),
                "decode {value}"
            );
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(size_for(1), 1);
        assert_eq!(size_for(127), 1);
        assert_eq!(size_for(128), 2);
        assert_eq!(size_for(16383), 2);
        assert_eq!(size_for(16384), 3);
        assert_eq!(size_for(u16::MAX), MAX_SIZE);
    }

    #[test]
    fn size_matches_encoded_length() {
        let mut out = Vec::new();
        for value in 0..=u16::MAX {
            out.clear();
            encode_into(value, &mut out);
            assert_eq!(out.len(), size_for(value), "value {value}");
        }
    }

    #[test]
    fn out_of_range_is_rejected() {
        let err = encode(MAX + 1).unwrap_err();
        assert_eq!(
            err,
            CodecError::OutOfRange {
                codec: CODEC_NAME,
                value: 65536,
                min: 0,
                max: 65535,
            }
        );
    }

    #[test]
    fn decode_at_offset() {
        let bytes = [0xaa, 0xbb, 0x80, 0x01, 0xcc];
        assert_eq!(decode(&bytes, 2).unwrap(), (128, 2));
    }

    #[test]
    fn truncated_input() {
        assert_eq!(
            decode(&[0x80], 0).unwrap_err(),
            CodecError::Truncated { offset: 1 }
        );
        assert_eq!(
            decode(&[], 0).unwrap_err(),
            CodecError::Truncated { offset: 0 }
        );
    }

    #[test]
    fn overflowing_input() {
        // Third byte still flags a continuation.
        assert!(matches!(
            decode(&[0xff, 0xff, 0x83], 0),
            Err(CodecError::Overflow { offset: 2, .. })
        ));
        // Third byte carries bits beyond u16.
        assert!(matches!(
            decode(&[0xff, 0xff, 0x04], 0),
            Err(CodecError::Overflow { offset: 2, .. })
        ));
    }
}
