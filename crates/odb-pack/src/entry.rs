use odb_types::{ObjectId, ObjectKind};

/// Serialize an object kind to the pack's type byte.
pub fn type_byte(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::Commit => 1,
        ObjectKind::Tree => 2,
        ObjectKind::Blob => 3,
        ObjectKind::Tag => 4,
    }
}

/// Parse a pack type byte.
pub fn kind_from_type_byte(byte: u8) -> Option<ObjectKind> {
    match byte {
        1 => Some(ObjectKind::Commit),
        2 => Some(ObjectKind::Tree),
        3 => Some(ObjectKind::Blob),
        4 => Some(ObjectKind::Tag),
        _ => None,
    }
}

/// A single entry queued for a pack file.
#[derive(Clone, Debug)]
pub struct PackEntry {
    /// Content-addressed ID of the object.
    pub id: ObjectId,
    /// Kind of the object.
    pub kind: ObjectKind,
    /// Uncompressed data.
    pub data: Vec<u8>,
}

/// An object read back out of a pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

/// Header information of a packed object, available without inflating it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedObjectHeader {
    pub kind: ObjectKind,
    /// Uncompressed size.
    pub size: u64,
    /// Bytes the entry occupies in the pack, header included.
    pub disk_size: u64,
    /// Offset of the entry within the pack.
    pub offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_bytes_follow_object_type_numbers() {
        assert_eq!(type_byte(ObjectKind::Commit), 1);
        assert_eq!(type_byte(ObjectKind::Tree), 2);
        assert_eq!(type_byte(ObjectKind::Blob), 3);
        assert_eq!(type_byte(ObjectKind::Tag), 4);
    }

    #[test]
    fn from_type_byte_known() {
        for kind in ObjectKind::ALL {
            assert_eq!(kind_from_type_byte(type_byte(kind)), Some(kind));
        }
    }

    #[test]
    fn from_type_byte_unknown() {
        assert!(kind_from_type_byte(0).is_none());
        assert!(kind_from_type_byte(5).is_none());
        assert!(kind_from_type_byte(255).is_none());
    }
}
