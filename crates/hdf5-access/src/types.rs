//! Element kinds of datasets and their HDF5 type descriptors.

use std::fmt;

use hdf5_access_format::datatype::{CharacterSet, Datatype, StringPadding};

/// The closed set of dataset element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixDataType {
    Float,
    Double,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    /// One byte of text per element, kept distinct from `Int8`.
    Char,
}

impl MatrixDataType {
    pub const ALL: [MatrixDataType; 11] = [
        MatrixDataType::Float,
        MatrixDataType::Double,
        MatrixDataType::UInt8,
        MatrixDataType::UInt16,
        MatrixDataType::UInt32,
        MatrixDataType::UInt64,
        MatrixDataType::Int8,
        MatrixDataType::Int16,
        MatrixDataType::Int32,
        MatrixDataType::Int64,
        MatrixDataType::Char,
    ];

    /// Bytes per element.
    pub fn element_size(self) -> usize {
        match self {
            MatrixDataType::UInt8 | MatrixDataType::Int8 | MatrixDataType::Char => 1,
            MatrixDataType::UInt16 | MatrixDataType::Int16 => 2,
            MatrixDataType::Float | MatrixDataType::UInt32 | MatrixDataType::Int32 => 4,
            MatrixDataType::Double | MatrixDataType::UInt64 | MatrixDataType::Int64 => 8,
        }
    }

    /// The little-endian HDF5 descriptor written for this kind.
    pub fn datatype(self) -> Datatype {
        match self {
            MatrixDataType::Float => Datatype::ieee_f32(),
            MatrixDataType::Double => Datatype::ieee_f64(),
            MatrixDataType::Char => {
                Datatype::fixed_string(1, StringPadding::NullPad, CharacterSet::Ascii)
            }
            MatrixDataType::UInt8 | MatrixDataType::UInt16 | MatrixDataType::UInt32 | MatrixDataType::UInt64 => {
                Datatype::integer(self.element_size() as u32, false)
            }
            MatrixDataType::Int8 | MatrixDataType::Int16 | MatrixDataType::Int32 | MatrixDataType::Int64 => {
                Datatype::integer(self.element_size() as u32, true)
            }
        }
    }

    /// Recognize a stored descriptor. Byte order is ignored since loaded
    /// data is already little-endian.
    pub fn from_datatype(dt: &Datatype) -> Option<MatrixDataType> {
        Some(match dt {
            Datatype::FloatingPoint { size: 4, .. } => MatrixDataType::Float,
            Datatype::FloatingPoint { size: 8, .. } => MatrixDataType::Double,
            Datatype::FixedPoint { size, signed, .. } => match (size, signed) {
                (1, false) => MatrixDataType::UInt8,
                (2, false) => MatrixDataType::UInt16,
                (4, false) => MatrixDataType::UInt32,
                (8, false) => MatrixDataType::UInt64,
                (1, true) => MatrixDataType::Int8,
                (2, true) => MatrixDataType::Int16,
                (4, true) => MatrixDataType::Int32,
                (8, true) => MatrixDataType::Int64,
                _ => return None,
            },
            Datatype::String { size: 1, .. } => MatrixDataType::Char,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            MatrixDataType::Float => "float",
            MatrixDataType::Double => "double",
            MatrixDataType::UInt8 => "uint8",
            MatrixDataType::UInt16 => "uint16",
            MatrixDataType::UInt32 => "uint32",
            MatrixDataType::UInt64 => "uint64",
            MatrixDataType::Int8 => "int8",
            MatrixDataType::Int16 => "int16",
            MatrixDataType::Int32 => "int32",
            MatrixDataType::Int64 => "int64",
            MatrixDataType::Char => "char",
        }
    }
}

impl fmt::Display for MatrixDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Human-readable description of any stored datatype.
pub(crate) fn describe(dt: &Datatype) -> String {
    match dt {
        Datatype::String { size, .. } => format!("string[{size}]"),
        Datatype::VarString { .. } => "variable-length string".to_string(),
        Datatype::Other { class, size, .. } => format!("class {class} ({size} bytes)"),
        _ => MatrixDataType::from_datatype(dt)
            .map(|t| t.name().to_string())
            .unwrap_or_else(|| format!("{} byte number", dt.element_size())),
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Native numeric types that map one-to-one onto a [`MatrixDataType`].
///
/// Sealed: the set of element kinds is closed.
pub trait MatrixElement: Copy + Default + fmt::Debug + sealed::Sealed + 'static {
    const DATA_TYPE: MatrixDataType;

    /// Append the little-endian encoding of `self`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode from exactly `DATA_TYPE.element_size()` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_matrix_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl MatrixElement for $ty {
                const DATA_TYPE: MatrixDataType = MatrixDataType::$kind;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_matrix_element! {
    f32 => Float,
    f64 => Double,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
}

/// Encode a slice of elements as little-endian bytes.
pub(crate) fn encode_elements<T: MatrixElement>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::DATA_TYPE.element_size());
    for &v in values {
        v.write_le(&mut out);
    }
    out
}

/// Decode little-endian bytes into elements.
pub(crate) fn decode_elements<T: MatrixElement>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::DATA_TYPE.element_size())
        .map(T::read_le)
        .collect()
}
