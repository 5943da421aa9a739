//! HDF5 object header message type identifiers.

macro_rules! message_types {
    ($($(#[$doc:meta])* $name:ident = $id:literal,)*) => {
        /// Header message types this crate decodes or writes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageType {
            $($(#[$doc])* $name,)*
            /// Any other message, carried by raw id.
            Unknown(u16),
        }

        impl MessageType {
            /// Map a raw type id to a `MessageType`.
            pub fn from_u16(val: u16) -> MessageType {
                match val {
                    $($id => MessageType::$name,)*
                    other => MessageType::Unknown(other),
                }
            }

            /// The raw type id.
            pub fn to_u16(self) -> u16 {
                match self {
                    $(MessageType::$name => $id,)*
                    MessageType::Unknown(v) => v,
                }
            }
        }
    };
}

message_types! {
    Nil = 0x0000,
    Dataspace = 0x0001,
    LinkInfo = 0x0002,
    Datatype = 0x0003,
    /// Pre-1.8 fill value message.
    FillValueOld = 0x0004,
    FillValue = 0x0005,
    Link = 0x0006,
    ExternalFiles = 0x0007,
    DataLayout = 0x0008,
    GroupInfo = 0x000A,
    FilterPipeline = 0x000B,
    Attribute = 0x000C,
    ObjectComment = 0x000D,
    SharedMessageTable = 0x000F,
    Continuation = 0x0010,
    /// Old-style group: B-tree and local heap addresses.
    SymbolTable = 0x0011,
    ModificationTime = 0x0012,
    BTreeK = 0x0013,
    AttributeInfo = 0x0015,
    ReferenceCount = 0x0016,
}
