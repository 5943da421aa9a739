//! HDF5 datatype message (type 0x0003).
//!
//! Numeric and string classes are decoded into fields. Every other class
//! (compound, enum, array, opaque, reference, VL sequences, ...) is kept as
//! its raw encoding so it survives a decode/encode cycle untouched.

use byteorder::{ByteOrder, LittleEndian};

use crate::bytes::ensure_len;
use crate::error::FormatError;

/// Byte order of a numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatatypeByteOrder {
    LittleEndian,
    BigEndian,
}

/// Padding of fixed-length strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

/// A decoded datatype description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    /// Class 0: integers.
    FixedPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 1: IEEE floating point.
    FloatingPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        sign_location: u8,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    /// Class 3: fixed-length string of `size` bytes.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Class 9 with the string flag: variable-length string stored in the
    /// global heap.
    VarString {
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Any other class, carried verbatim.
    Other { class: u8, size: u32, raw: Vec<u8> },
}

/// Class ids used by this module.
mod class {
    pub const FIXED_POINT: u8 = 0;
    pub const FLOATING_POINT: u8 = 1;
    pub const STRING: u8 = 3;
    pub const VARIABLE_LENGTH: u8 = 9;
}

/// Encoded size of a variable-length element in files written with 8-byte
/// offsets: length (4) + heap collection address (8) + object index (4).
pub const VL_ELEMENT_SIZE: u32 = 16;

fn padding_from(bits: u8) -> Result<StringPadding, FormatError> {
    match bits {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        other => Err(FormatError::Malformed(format!("string padding {other}"))),
    }
}

fn padding_bits(p: StringPadding) -> u8 {
    match p {
        StringPadding::NullTerminate => 0,
        StringPadding::NullPad => 1,
        StringPadding::SpacePad => 2,
    }
}

fn charset_from(bits: u8) -> Result<CharacterSet, FormatError> {
    match bits {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        other => Err(FormatError::Malformed(format!("character set {other}"))),
    }
}

fn charset_bits(c: CharacterSet) -> u8 {
    match c {
        CharacterSet::Ascii => 0,
        CharacterSet::Utf8 => 1,
    }
}

fn header(class: u8, bits: [u8; 3], size: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(24);
    buf.push(class | (1 << 4));
    buf.extend_from_slice(&bits);
    buf.extend_from_slice(&size.to_le_bytes());
    buf
}

impl Datatype {
    /// Little-endian two's complement or unsigned integer of `size` bytes.
    pub fn integer(size: u32, signed: bool) -> Datatype {
        Datatype::FixedPoint {
            size,
            byte_order: DatatypeByteOrder::LittleEndian,
            signed,
            bit_offset: 0,
            bit_precision: (size * 8) as u16,
        }
    }

    /// Little-endian IEEE 754 binary32.
    pub fn ieee_f32() -> Datatype {
        Datatype::FloatingPoint {
            size: 4,
            byte_order: DatatypeByteOrder::LittleEndian,
            sign_location: 31,
            bit_offset: 0,
            bit_precision: 32,
            exponent_location: 23,
            exponent_size: 8,
            mantissa_location: 0,
            mantissa_size: 23,
            exponent_bias: 127,
        }
    }

    /// Little-endian IEEE 754 binary64.
    pub fn ieee_f64() -> Datatype {
        Datatype::FloatingPoint {
            size: 8,
            byte_order: DatatypeByteOrder::LittleEndian,
            sign_location: 63,
            bit_offset: 0,
            bit_precision: 64,
            exponent_location: 52,
            exponent_size: 11,
            mantissa_location: 0,
            mantissa_size: 52,
            exponent_bias: 1023,
        }
    }

    pub fn fixed_string(size: u32, padding: StringPadding, charset: CharacterSet) -> Datatype {
        Datatype::String {
            size,
            padding,
            charset,
        }
    }

    /// Decode a datatype occupying all of `data`.
    pub fn parse(data: &[u8]) -> Result<Datatype, FormatError> {
        ensure_len(data, 0, 8)?;
        let class = data[0] & 0x0F;
        let bf0 = data[1];
        let bf1 = data[2];
        let size = LittleEndian::read_u32(&data[4..8]);
        let order = if bf0 & 0x01 == 0 {
            DatatypeByteOrder::LittleEndian
        } else {
            DatatypeByteOrder::BigEndian
        };

        match class {
            class::FIXED_POINT => {
                ensure_len(data, 8, 4)?;
                Ok(Datatype::FixedPoint {
                    size,
                    byte_order: order,
                    signed: bf0 & 0x08 != 0,
                    bit_offset: LittleEndian::read_u16(&data[8..10]),
                    bit_precision: LittleEndian::read_u16(&data[10..12]),
                })
            }
            class::FLOATING_POINT if bf0 & 0x40 == 0 => {
                ensure_len(data, 8, 12)?;
                Ok(Datatype::FloatingPoint {
                    size,
                    byte_order: order,
                    sign_location: bf1,
                    bit_offset: LittleEndian::read_u16(&data[8..10]),
                    bit_precision: LittleEndian::read_u16(&data[10..12]),
                    exponent_location: data[12],
                    exponent_size: data[13],
                    mantissa_location: data[14],
                    mantissa_size: data[15],
                    exponent_bias: LittleEndian::read_u32(&data[16..20]),
                })
            }
            class::STRING => Ok(Datatype::String {
                size,
                padding: padding_from(bf0 & 0x0F)?,
                charset: charset_from(bf0 >> 4)?,
            }),
            class::VARIABLE_LENGTH if bf0 & 0x0F == 1 => Ok(Datatype::VarString {
                padding: padding_from(bf0 >> 4)?,
                charset: charset_from(bf1 & 0x0F)?,
            }),
            c if c <= 11 => Ok(Datatype::Other {
                class: c,
                size,
                raw: data.to_vec(),
            }),
            c => Err(FormatError::InvalidDatatypeClass(c)),
        }
    }

    /// Encode as a datatype message body.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Datatype::FixedPoint {
                size,
                byte_order,
                signed,
                bit_offset,
                bit_precision,
            } => {
                let mut bf0 = 0u8;
                if *byte_order == DatatypeByteOrder::BigEndian {
                    bf0 |= 0x01;
                }
                if *signed {
                    bf0 |= 0x08;
                }
                let mut buf = header(class::FIXED_POINT, [bf0, 0, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf
            }
            Datatype::FloatingPoint {
                size,
                byte_order,
                sign_location,
                bit_offset,
                bit_precision,
                exponent_location,
                exponent_size,
                mantissa_location,
                mantissa_size,
                exponent_bias,
            } => {
                // Bits 4-5 = 2: implied leading mantissa bit (IEEE normalization).
                let mut bf0 = 0x20u8;
                if *byte_order == DatatypeByteOrder::BigEndian {
                    bf0 |= 0x01;
                }
                let mut buf = header(class::FLOATING_POINT, [bf0, *sign_location, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf.extend_from_slice(&[
                    *exponent_location,
                    *exponent_size,
                    *mantissa_location,
                    *mantissa_size,
                ]);
                buf.extend_from_slice(&exponent_bias.to_le_bytes());
                buf
            }
            Datatype::String {
                size,
                padding,
                charset,
            } => {
                let bf0 = padding_bits(*padding) | (charset_bits(*charset) << 4);
                header(class::STRING, [bf0, 0, 0], *size)
            }
            Datatype::VarString { padding, charset } => {
                let bf0 = 0x01 | (padding_bits(*padding) << 4);
                let mut buf = header(
                    class::VARIABLE_LENGTH,
                    [bf0, charset_bits(*charset), 0],
                    VL_ELEMENT_SIZE,
                );
                // Base type: one unsigned byte per character.
                buf.extend_from_slice(&Datatype::integer(1, false).serialize());
                buf
            }
            Datatype::Other { raw, .. } => raw.clone(),
        }
    }

    /// Bytes per element as stored in the file.
    pub fn element_size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::String { size, .. }
            | Datatype::Other { size, .. } => *size,
            Datatype::VarString { .. } => VL_ELEMENT_SIZE,
        }
    }

    /// Whether values of this type hold file addresses (references and
    /// variable-length data, possibly nested in compound, array or enum
    /// members), which cannot be copied byte-for-byte into a rewritten file.
    pub fn holds_addresses(&self) -> Result<bool, FormatError> {
        match self {
            Datatype::VarString { .. } => Ok(true),
            Datatype::Other { raw, .. } => Ok(scan_addresses(raw)?.0),
            _ => Ok(false),
        }
    }
}

fn name_len(data: &[u8], pos: usize) -> Result<usize, FormatError> {
    data.get(pos..)
        .and_then(|rest| rest.iter().position(|&b| b == 0))
        .ok_or(FormatError::UnexpectedEof {
            expected: pos + 1,
            available: data.len(),
        })
}

/// Walk a raw datatype encoding. Returns whether any (nested) member holds
/// file addresses, and the number of bytes the encoding occupies.
fn scan_addresses(data: &[u8]) -> Result<(bool, usize), FormatError> {
    ensure_len(data, 0, 8)?;
    let class = data[0] & 0x0F;
    let version = data[0] >> 4;
    let bits = LittleEndian::read_u16(&data[1..3]) as usize;
    let size = LittleEndian::read_u32(&data[4..8]);
    let mut pos = 8;
    let found = match class {
        0 | 4 => {
            pos += 4;
            false
        }
        1 => {
            pos += 12;
            false
        }
        2 => {
            pos += 2;
            false
        }
        3 => false,
        5 => {
            pos += data[1] as usize;
            false
        }
        7 | 9 => {
            if class == 9 {
                pos += scan_addresses(&data[pos..])?.1;
            }
            true
        }
        6 => {
            let mut any = false;
            for _ in 0..bits {
                let n = name_len(data, pos)? + 1;
                pos += if version < 3 { (n + 7) & !7 } else { n };
                pos += match version {
                    1 => 4 + 28,
                    2 => 4,
                    _ => (32 - size.leading_zeros() as usize).div_ceil(8).max(1),
                };
                ensure_len(data, pos, 0)?;
                let (inner, used) = scan_addresses(&data[pos..])?;
                any |= inner;
                pos += used;
            }
            any
        }
        8 => {
            let (inner, used) = scan_addresses(&data[pos..])?;
            let base_size = LittleEndian::read_u32(&data[pos + 4..pos + 8]) as usize;
            pos += used;
            for _ in 0..bits {
                let n = name_len(data, pos)? + 1;
                pos += if version < 3 { (n + 7) & !7 } else { n };
            }
            pos += bits * base_size;
            inner
        }
        10 => {
            ensure_len(data, pos, 1)?;
            let ndims = data[pos] as usize;
            pos += if version < 3 { 4 + 8 * ndims } else { 1 + 4 * ndims };
            ensure_len(data, pos, 0)?;
            let (inner, used) = scan_addresses(&data[pos..])?;
            pos += used;
            inner
        }
        11 => {
            let (inner, used) = scan_addresses(&data[pos..])?;
            pos += used;
            inner
        }
        c => return Err(FormatError::InvalidDatatypeClass(c)),
    };
    ensure_len(data, 0, pos)?;
    Ok((found, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_roundtrip() {
        for (size, signed) in [(1, false), (2, false), (4, true), (8, true)] {
            let dt = Datatype::integer(size, signed);
            let bytes = dt.serialize();
            assert_eq!(bytes.len(), 12);
            assert_eq!(Datatype::parse(&bytes).unwrap(), dt);
        }
    }

    #[test]
    fn float_sign_location_matches_width() {
        let f32_bytes = Datatype::ieee_f32().serialize();
        let f64_bytes = Datatype::ieee_f64().serialize();
        assert_eq!(f32_bytes[1], 0x20);
        assert_eq!(f32_bytes[2], 31);
        assert_eq!(f64_bytes[2], 63);
        assert_eq!(f32_bytes.len(), 20);
        assert_eq!(Datatype::parse(&f64_bytes).unwrap(), Datatype::ieee_f64());
    }

    #[test]
    fn big_endian_integer_is_decoded() {
        let mut bytes = Datatype::integer(4, false).serialize();
        bytes[1] |= 0x01;
        match Datatype::parse(&bytes).unwrap() {
            Datatype::FixedPoint { byte_order, .. } => {
                assert_eq!(byte_order, DatatypeByteOrder::BigEndian)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fixed_string() {
        let dt = Datatype::fixed_string(9, StringPadding::NullTerminate, CharacterSet::Utf8);
        let bytes = dt.serialize();
        assert_eq!(bytes[0], 0x13);
        assert_eq!(bytes[1], 0x10);
        assert_eq!(Datatype::parse(&bytes).unwrap(), dt);
        assert_eq!(dt.element_size(), 9);
    }

    #[test]
    fn variable_length_string() {
        let dt = Datatype::VarString {
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Utf8,
        };
        let bytes = dt.serialize();
        assert_eq!(bytes.len(), 20);
        assert_eq!(Datatype::parse(&bytes).unwrap(), dt);
        assert!(dt.holds_addresses().unwrap());
    }

    #[test]
    fn other_classes_are_preserved_verbatim() {
        // Opaque type with a 8-byte tag.
        let mut raw = vec![0x15, 8, 0, 0, 4, 0, 0, 0];
        raw.extend_from_slice(b"tag\0\0\0\0\0");
        let dt = Datatype::parse(&raw).unwrap();
        assert!(matches!(dt, Datatype::Other { class: 5, size: 4, .. }));
        assert_eq!(dt.serialize(), raw);
        assert!(!dt.holds_addresses().unwrap());
    }

    #[test]
    fn compound_with_reference_member_holds_addresses() {
        // v3 compound, two members, 12 bytes: "a" f32 at 0, "r" reference at 4.
        let mut raw = vec![0x36, 2, 0, 0, 12, 0, 0, 0];
        raw.extend_from_slice(b"a\0");
        raw.push(0);
        raw.extend_from_slice(&Datatype::ieee_f32().serialize());
        raw.extend_from_slice(b"r\0");
        raw.push(4);
        raw.extend_from_slice(&[0x17, 0, 0, 0, 8, 0, 0, 0]);
        let dt = Datatype::parse(&raw).unwrap();
        assert!(dt.holds_addresses().unwrap());

        // Same compound without the reference member.
        let mut plain = vec![0x36, 1, 0, 0, 4, 0, 0, 0];
        plain.extend_from_slice(b"a\0");
        plain.push(0);
        plain.extend_from_slice(&Datatype::ieee_f32().serialize());
        assert!(!Datatype::parse(&plain).unwrap().holds_addresses().unwrap());
    }

    #[test]
    fn rejects_bad_class_and_truncation() {
        let mut bytes = Datatype::integer(4, true).serialize();
        bytes[0] = 0x1F;
        assert_eq!(
            Datatype::parse(&bytes).unwrap_err(),
            FormatError::InvalidDatatypeClass(15)
        );
        assert!(matches!(
            Datatype::parse(&[0x10, 0, 0]),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
