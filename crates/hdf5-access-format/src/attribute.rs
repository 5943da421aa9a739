//! HDF5 attribute message (type 0x000C).

use crate::bytes::{ensure_len, pad8, read_u16};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::FormatError;

/// Value bytes of an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeData {
    /// Elements exactly as laid out in the file.
    Raw(Vec<u8>),
    /// Variable-length strings, already resolved out of the global heap.
    VarStrings(Vec<Vec<u8>>),
}

/// A decoded attribute message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMessage {
    pub name: String,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    pub data: AttributeData,
}

/// Attribute flag bits (v2/v3): datatype or dataspace is shared.
const SHARED_TYPE_OR_SPACE: u8 = 0x03;

impl AttributeMessage {
    /// Decode a version 1, 2 or 3 attribute message.
    ///
    /// Variable-length values are left as raw heap references; resolving
    /// them needs the rest of the file.
    pub fn parse(data: &[u8], length_size: u8) -> Result<AttributeMessage, FormatError> {
        ensure_len(data, 0, 8)?;
        let version = data[0];
        let flags = data[1];
        let name_size = read_u16(data, 2)? as usize;
        let datatype_size = read_u16(data, 4)? as usize;
        let dataspace_size = read_u16(data, 6)? as usize;

        // v1 pads every field to 8 bytes; v3 adds a name-encoding byte.
        let (mut pos, padded) = match version {
            1 => (8, true),
            2 => (8, false),
            3 => (9, false),
            v => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "attribute message",
                    version: v,
                })
            }
        };
        if version > 1 && flags & SHARED_TYPE_OR_SPACE != 0 {
            return Err(FormatError::Unsupported(
                "attribute with a shared datatype or dataspace".into(),
            ));
        }
        let advance = |n: usize| if padded { pad8(n) } else { n };

        ensure_len(data, pos, name_size)?;
        let name_bytes = &data[pos..pos + name_size];
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_size);
        let name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
        pos += advance(name_size);

        ensure_len(data, pos, datatype_size)?;
        let datatype = Datatype::parse(&data[pos..pos + datatype_size])?;
        pos += advance(datatype_size);

        ensure_len(data, pos, dataspace_size)?;
        let dataspace = Dataspace::parse(&data[pos..pos + dataspace_size], length_size)?;
        pos += advance(dataspace_size);

        let needed = dataspace
            .num_elements()?
            .checked_mul(datatype.element_size() as u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| FormatError::Malformed(format!("attribute '{name}' is too large")))?;
        ensure_len(data, pos, needed)?;
        let raw = data[pos..pos + needed].to_vec();

        Ok(AttributeMessage {
            name,
            datatype,
            dataspace,
            data: AttributeData::Raw(raw),
        })
    }

    /// Encode as a version 3 message with a UTF-8 name.
    ///
    /// `raw` supplies the element bytes; for variable-length strings the
    /// caller passes the encoded heap references.
    pub fn serialize_with(&self, raw: &[u8]) -> Vec<u8> {
        let mut name = self.name.as_bytes().to_vec();
        name.push(0);
        let dt = self.datatype.serialize();
        let ds = self.dataspace.serialize();

        let mut buf = Vec::with_capacity(9 + name.len() + dt.len() + ds.len() + raw.len());
        buf.push(3);
        buf.push(0);
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(dt.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(ds.len() as u16).to_le_bytes());
        buf.push(1);
        buf.extend_from_slice(&name);
        buf.extend_from_slice(&dt);
        buf.extend_from_slice(&ds);
        buf.extend_from_slice(raw);
        buf
    }

    /// Encode an attribute that holds raw element bytes.
    pub fn serialize(&self) -> Result<Vec<u8>, FormatError> {
        match &self.data {
            AttributeData::Raw(raw) => Ok(self.serialize_with(raw)),
            AttributeData::VarStrings(_) => Err(FormatError::Malformed(format!(
                "attribute '{}' holds variable-length data that needs heap references",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{CharacterSet, StringPadding};

    fn scalar_u64(name: &str, value: u64) -> AttributeMessage {
        AttributeMessage {
            name: name.into(),
            datatype: Datatype::integer(8, false),
            dataspace: Dataspace::scalar(),
            data: AttributeData::Raw(value.to_le_bytes().to_vec()),
        }
    }

    #[test]
    fn v3_roundtrip() {
        let attr = scalar_u64("uint64_attrib", 73571);
        let bytes = attr.serialize().unwrap();
        assert_eq!(bytes[0], 3);
        assert_eq!(AttributeMessage::parse(&bytes, 8).unwrap(), attr);
    }

    #[test]
    fn array_of_floats_roundtrip() {
        let values = [7357.5f32, 73576.0, 57.476_562_5];
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let attr = AttributeMessage {
            name: "floats".into(),
            datatype: Datatype::ieee_f32(),
            dataspace: Dataspace::simple(&[3], None),
            data: AttributeData::Raw(raw),
        };
        let back = AttributeMessage::parse(&attr.serialize().unwrap(), 8).unwrap();
        assert_eq!(back, attr);
    }

    #[test]
    fn v1_padded_layout() {
        // Name "ab\0" (3 -> 8), u8 datatype (12 -> 16), scalar v1 dataspace (8).
        let mut data = vec![1, 0];
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&12u16.to_le_bytes());
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(b"ab\0\0\0\0\0\0");
        let mut dt = Datatype::integer(1, false).serialize();
        dt.resize(16, 0);
        data.extend_from_slice(&dt);
        data.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);
        data.push(42);

        let attr = AttributeMessage::parse(&data, 8).unwrap();
        assert_eq!(attr.name, "ab");
        assert_eq!(attr.data, AttributeData::Raw(vec![42]));
    }

    #[test]
    fn fixed_string_payload_is_exact() {
        let attr = AttributeMessage {
            name: "s".into(),
            datatype: Datatype::fixed_string(9, StringPadding::NullTerminate, CharacterSet::Utf8),
            dataspace: Dataspace::scalar(),
            data: AttributeData::Raw(b"contents\0".to_vec()),
        };
        let back = AttributeMessage::parse(&attr.serialize().unwrap(), 8).unwrap();
        assert_eq!(back.data, AttributeData::Raw(b"contents\0".to_vec()));
    }

    #[test]
    fn truncated_value_is_an_error() {
        let bytes = scalar_u64("x", 1).serialize().unwrap();
        assert!(matches!(
            AttributeMessage::parse(&bytes[..bytes.len() - 1], 8),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn var_strings_need_references() {
        let attr = AttributeMessage {
            name: "v".into(),
            datatype: Datatype::VarString {
                padding: StringPadding::NullTerminate,
                charset: CharacterSet::Ascii,
            },
            dataspace: Dataspace::scalar(),
            data: AttributeData::VarStrings(vec![b"x".to_vec()]),
        };
        assert!(attr.serialize().is_err());
    }
}
