//! Typed attributes on groups and datasets.
//!
//! Values travel as an [`AttributeValue`], a closed set of scalars and
//! one-dimensional arrays of the ten numeric element kinds plus text. A
//! single dispatch point maps each variant to the datatype and dataspace
//! written to the file, and reading maps a stored attribute back to the
//! variant of exactly its shape and kind.

use hdf5_access_format::attribute::{AttributeData, AttributeMessage};
use hdf5_access_format::dataspace::{Dataspace, DataspaceType};
use hdf5_access_format::datatype::{CharacterSet, Datatype, StringPadding};
use hdf5_access_format::NodeId;
use tracing::debug;

use crate::dataset::DatasetHandle;
use crate::error::{Error, Result};
use crate::file::ContainerFile;
use crate::group::GroupHandle;
use crate::handle::{HandleGuard, HandleKind};
use crate::types::{decode_elements, describe, encode_elements, MatrixDataType};

/// Child name that addresses the group itself.
pub const SELF: &str = ".";

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Double(f64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    UInt8Array(Vec<u8>),
    UInt16Array(Vec<u16>),
    UInt32Array(Vec<u32>),
    UInt64Array(Vec<u64>),
    Int8Array(Vec<i8>),
    Int16Array(Vec<i16>),
    Int32Array(Vec<i32>),
    Int64Array(Vec<i64>),
    String(String),
}

/// Conversion out of an [`AttributeValue`] of exactly one variant.
pub trait FromAttributeValue: Sized {
    /// Name of the accepted variant, for mismatch errors.
    const TYPE_NAME: &'static str;

    fn from_attribute_value(value: AttributeValue) -> Option<Self>;
}

macro_rules! attribute_kinds {
    ($($ty:ty => $kind:ident, $scalar:ident, $array:ident;)*) => {
        impl AttributeValue {
            /// Element kind; `None` for text.
            pub fn data_type(&self) -> Option<MatrixDataType> {
                match self {
                    $(
                        AttributeValue::$scalar(_) | AttributeValue::$array(_) => {
                            Some(MatrixDataType::$kind)
                        }
                    )*
                    AttributeValue::String(_) => None,
                }
            }

            /// Number of elements; 1 for scalars and text.
            pub fn len(&self) -> usize {
                match self {
                    $(AttributeValue::$array(v) => v.len(),)*
                    _ => 1,
                }
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            pub fn is_array(&self) -> bool {
                match self {
                    $(AttributeValue::$array(_) => true,)*
                    _ => false,
                }
            }

            /// Element bytes, little-endian.
            fn element_bytes(&self) -> Vec<u8> {
                match self {
                    $(
                        AttributeValue::$scalar(v) => encode_elements(&[*v]),
                        AttributeValue::$array(v) => encode_elements(v),
                    )*
                    AttributeValue::String(s) => {
                        let mut bytes = s.as_bytes().to_vec();
                        bytes.push(0);
                        bytes
                    }
                }
            }

            fn decode_numeric(kind: MatrixDataType, array: bool, raw: &[u8]) -> Option<AttributeValue> {
                match kind {
                    $(
                        MatrixDataType::$kind if array => {
                            Some(AttributeValue::$array(decode_elements(raw)))
                        }
                        MatrixDataType::$kind => {
                            decode_elements(raw).first().copied().map(AttributeValue::$scalar)
                        }
                    )*
                    MatrixDataType::Char => None,
                }
            }
        }

        $(
            impl From<$ty> for AttributeValue {
                fn from(v: $ty) -> Self {
                    AttributeValue::$scalar(v)
                }
            }

            impl From<Vec<$ty>> for AttributeValue {
                fn from(v: Vec<$ty>) -> Self {
                    AttributeValue::$array(v)
                }
            }

            impl From<&[$ty]> for AttributeValue {
                fn from(v: &[$ty]) -> Self {
                    AttributeValue::$array(v.to_vec())
                }
            }

            impl FromAttributeValue for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);

                fn from_attribute_value(value: AttributeValue) -> Option<Self> {
                    match value {
                        AttributeValue::$scalar(v) => Some(v),
                        _ => None,
                    }
                }
            }

            impl FromAttributeValue for Vec<$ty> {
                const TYPE_NAME: &'static str = concat!("array of ", stringify!($ty));

                fn from_attribute_value(value: AttributeValue) -> Option<Self> {
                    match value {
                        AttributeValue::$array(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

attribute_kinds! {
    f32 => Float, Float, FloatArray;
    f64 => Double, Double, DoubleArray;
    u8 => UInt8, UInt8, UInt8Array;
    u16 => UInt16, UInt16, UInt16Array;
    u32 => UInt32, UInt32, UInt32Array;
    u64 => UInt64, UInt64, UInt64Array;
    i8 => Int8, Int8, Int8Array;
    i16 => Int16, Int16, Int16Array;
    i32 => Int32, Int32, Int32Array;
    i64 => Int64, Int64, Int64Array;
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl FromAttributeValue for String {
    const TYPE_NAME: &'static str = "string";

    fn from_attribute_value(value: AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl FromAttributeValue for AttributeValue {
    const TYPE_NAME: &'static str = "any attribute";

    fn from_attribute_value(value: AttributeValue) -> Option<Self> {
        Some(value)
    }
}

impl AttributeValue {
    /// Short description of kind and shape, such as `uint64` or `float[3]`.
    pub fn type_name(&self) -> String {
        match (self, self.data_type()) {
            (AttributeValue::String(_), _) => "string".to_string(),
            (_, Some(kind)) if self.is_array() => format!("{kind}[{}]", self.len()),
            (_, Some(kind)) => kind.to_string(),
            (_, None) => "unknown".to_string(),
        }
    }

    /// The datatype and dataspace this value is stored with.
    fn layout(&self) -> (Datatype, Dataspace) {
        match self {
            AttributeValue::String(s) => {
                let charset = if s.is_ascii() {
                    CharacterSet::Ascii
                } else {
                    CharacterSet::Utf8
                };
                let size = s.len() as u32 + 1;
                (
                    Datatype::fixed_string(size, StringPadding::NullTerminate, charset),
                    Dataspace::scalar(),
                )
            }
            _ => {
                let datatype = self
                    .data_type()
                    .map(MatrixDataType::datatype)
                    .unwrap_or_else(|| Datatype::integer(1, false));
                let dataspace = if !self.is_array() {
                    Dataspace::scalar()
                } else if self.is_empty() {
                    Dataspace::null()
                } else {
                    Dataspace::simple(&[self.len() as u64], None)
                };
                (datatype, dataspace)
            }
        }
    }

    /// Decode a stored attribute into the variant of its kind and shape.
    fn from_message(msg: &AttributeMessage, object: &str) -> Result<AttributeValue> {
        let what = || format!("attribute '{}' of {object}", msg.name);
        let shape_mismatch = |expected: &str| {
            Error::type_mismatch(
                &what(),
                expected,
                format!("{} in a {:?} dataspace", describe(&msg.datatype), msg.dataspace.space_type),
            )
        };
        let count = msg.dataspace.num_elements()?;

        match (&msg.datatype, &msg.data) {
            (Datatype::String { size, padding, .. }, AttributeData::Raw(raw)) => {
                if count != 1 {
                    return Err(shape_mismatch("a single string"));
                }
                let bytes = &raw[..(*size as usize).min(raw.len())];
                decode_text(bytes, *padding, &what)
            }
            (Datatype::VarString { padding, .. }, AttributeData::VarStrings(strings)) => {
                match strings.as_slice() {
                    [one] => decode_text(one, *padding, &what),
                    _ => Err(shape_mismatch("a single string")),
                }
            }
            (datatype, AttributeData::Raw(raw)) => {
                let kind = MatrixDataType::from_datatype(datatype)
                    .filter(|k| *k != MatrixDataType::Char)
                    .ok_or_else(|| shape_mismatch("a numeric type"))?;
                let array = match msg.dataspace.space_type {
                    DataspaceType::Scalar => false,
                    DataspaceType::Simple | DataspaceType::Null => true,
                };
                AttributeValue::decode_numeric(kind, array, raw)
                    .ok_or_else(|| shape_mismatch("a numeric value"))
            }
            _ => Err(shape_mismatch("a supported attribute type")),
        }
    }
}

/// Strip padding and validate UTF-8.
fn decode_text(bytes: &[u8], padding: StringPadding, what: &dyn Fn() -> String) -> Result<AttributeValue> {
    let end = match padding {
        StringPadding::NullTerminate => bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len()),
        StringPadding::NullPad => bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1),
        StringPadding::SpacePad => bytes
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map_or(0, |p| p + 1),
    };
    String::from_utf8(bytes[..end].to_vec())
        .map(AttributeValue::String)
        .map_err(|_| Error::type_mismatch(&what(), "UTF-8 text", "invalid UTF-8 bytes"))
}

// ---------------------------------------------------------------------------
// Shared attribute operations on one object
// ---------------------------------------------------------------------------

fn write_on(file: &ContainerFile, node: NodeId, object: &str, name: &str, value: AttributeValue) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName(name.to_string()));
    }
    file.check_writable()?;
    if let AttributeValue::String(s) = &value {
        if s.contains('\0') {
            return Err(Error::InvalidValue {
                object: format!("attribute '{name}' of {object}"),
                reason: "text contains a NUL byte".to_string(),
            });
        }
    }
    if has_on(file, node, name) {
        return Err(Error::AlreadyExists(format!("attribute '{name}' of {object}")));
    }

    let target = format!("{object}@{name}");
    let _datatype_guard = HandleGuard::acquire(file, HandleKind::Datatype, &target);
    let _dataspace_guard = HandleGuard::acquire(file, HandleKind::Dataspace, &target);
    let (datatype, dataspace) = value.layout();
    let _attribute_guard = HandleGuard::acquire(file, HandleKind::Attribute, &target);
    let message = AttributeMessage {
        name: name.to_string(),
        datatype,
        dataspace,
        data: AttributeData::Raw(value.element_bytes()),
    };

    file.modify(|tree| {
        let node = tree
            .node_mut(node)
            .ok_or_else(|| Error::ObjectNotFound(object.to_string()))?;
        node.attributes_mut().push(message);
        Ok(())
    })?;
    debug!(object, attribute = name, kind = %value.type_name(), "wrote attribute");
    Ok(())
}

fn read_on(file: &ContainerFile, node: NodeId, object: &str, name: &str) -> Result<AttributeValue> {
    let _attribute_guard = HandleGuard::acquire(file, HandleKind::Attribute, &format!("{object}@{name}"));
    let tree = file.tree();
    let msg = tree
        .node(node)
        .and_then(|n| n.attributes().iter().find(|a| a.name == name))
        .ok_or_else(|| Error::AttributeNotFound {
            object: object.to_string(),
            name: name.to_string(),
        })?;
    AttributeValue::from_message(msg, object)
}

fn read_typed_on<T: FromAttributeValue>(file: &ContainerFile, node: NodeId, object: &str, name: &str) -> Result<T> {
    let value = read_on(file, node, object, name)?;
    let actual = value.type_name();
    T::from_attribute_value(value)
        .ok_or_else(|| Error::type_mismatch(&format!("attribute '{name}' of {object}"), T::TYPE_NAME, actual))
}

fn has_on(file: &ContainerFile, node: NodeId, name: &str) -> bool {
    file.tree()
        .node(node)
        .is_some_and(|n| n.attributes().iter().any(|a| a.name == name))
}

fn names_on(file: &ContainerFile, node: NodeId) -> Vec<String> {
    file.tree()
        .node(node)
        .map(|n| n.attributes().iter().map(|a| a.name.clone()).collect())
        .unwrap_or_default()
}

fn delete_on(file: &ContainerFile, node: NodeId, object: &str, name: &str) -> Result<()> {
    file.check_writable()?;
    if !has_on(file, node, name) {
        return Err(Error::AttributeNotFound {
            object: object.to_string(),
            name: name.to_string(),
        });
    }
    file.modify(|tree| {
        if let Some(n) = tree.node_mut(node) {
            n.attributes_mut().retain(|a| a.name != name);
        }
        Ok(())
    })?;
    debug!(object, attribute = name, "deleted attribute");
    Ok(())
}

// ---------------------------------------------------------------------------
// Group attributes, addressed by child name
// ---------------------------------------------------------------------------

/// A child of a group kept open for the duration of one attribute call.
struct Target<'f> {
    node: NodeId,
    path: String,
    _guard: Option<HandleGuard<'f>>,
}

impl<'f> GroupHandle<'f> {
    fn attribute_target(&self, child: &str) -> Result<Target<'f>> {
        if child == SELF {
            return Ok(Target {
                node: self.node,
                path: self.path.clone(),
                _guard: None,
            });
        }
        let path = self.child_path(child);
        let (node, kind) = {
            let tree = self.file.tree();
            let node = self.resolve_in(&tree, child)?;
            let kind = if tree.dataset(node).is_some() {
                HandleKind::Dataset
            } else {
                HandleKind::Group
            };
            (node, kind)
        };
        let guard = HandleGuard::acquire(self.file, kind, &path);
        Ok(Target {
            node,
            path,
            _guard: Some(guard),
        })
    }

    /// Attach attribute `name` to `child` (a child group or dataset, or
    /// [`SELF`] for this group). Fails with `AlreadyExists` if the name is
    /// taken.
    pub fn write_attribute(&self, child: &str, name: &str, value: impl Into<AttributeValue>) -> Result<()> {
        let target = self.attribute_target(child)?;
        write_on(self.file, target.node, &target.path, name, value.into())
    }

    /// Read attribute `name` of `child` as exactly `T`.
    pub fn read_attribute<T: FromAttributeValue>(&self, child: &str, name: &str) -> Result<T> {
        let target = self.attribute_target(child)?;
        read_typed_on(self.file, target.node, &target.path, name)
    }

    pub fn write_string_attribute(&self, child: &str, name: &str, value: &str) -> Result<()> {
        self.write_attribute(child, name, value)
    }

    pub fn read_string_attribute(&self, child: &str, name: &str) -> Result<String> {
        self.read_attribute(child, name)
    }

    /// Read attribute `name` of `child` in whatever variant it is stored as.
    pub fn read_attribute_value(&self, child: &str, name: &str) -> Result<AttributeValue> {
        self.read_attribute(child, name)
    }

    pub fn has_attribute(&self, child: &str, name: &str) -> Result<bool> {
        let target = self.attribute_target(child)?;
        Ok(has_on(self.file, target.node, name))
    }

    /// Attribute names of `child` in storage order.
    pub fn attribute_names(&self, child: &str) -> Result<Vec<String>> {
        let target = self.attribute_target(child)?;
        Ok(names_on(self.file, target.node))
    }

    pub fn delete_attribute(&self, child: &str, name: &str) -> Result<()> {
        let target = self.attribute_target(child)?;
        delete_on(self.file, target.node, &target.path, name)
    }
}

// ---------------------------------------------------------------------------
// Dataset attributes
// ---------------------------------------------------------------------------

impl DatasetHandle<'_> {
    pub fn write_attribute(&self, name: &str, value: impl Into<AttributeValue>) -> Result<()> {
        write_on(self.file, self.node, &self.path, name, value.into())
    }

    pub fn read_attribute<T: FromAttributeValue>(&self, name: &str) -> Result<T> {
        read_typed_on(self.file, self.node, &self.path, name)
    }

    pub fn write_string_attribute(&self, name: &str, value: &str) -> Result<()> {
        self.write_attribute(name, value)
    }

    pub fn read_string_attribute(&self, name: &str) -> Result<String> {
        self.read_attribute(name)
    }

    pub fn read_attribute_value(&self, name: &str) -> Result<AttributeValue> {
        self.read_attribute(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        has_on(self.file, self.node, name)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        names_on(self.file, self.node)
    }

    pub fn delete_attribute(&self, name: &str) -> Result<()> {
        delete_on(self.file, self.node, &self.path, name)
    }
}
