use super::{Deserialize, Error, Serialize};
use bitflags::bitflags;
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Declares a set of `access_flags` bits along with its class file encoding
///
/// Bits without a meaning for the kind of declaration are dropped when reading.
macro_rules! access_flags {
    ($(#[$meta:meta])* $name:ident { $($flag:ident = $bit:expr,)* }) => {
        bitflags! {
            $(#[$meta])*
            pub struct $name: u16 {
                $(const $flag = $bit;)*
            }
        }

        impl Serialize for $name {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.bits().serialize(writer)
            }
        }

        impl Deserialize for $name {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
                Ok($name::from_bits_truncate(u16::deserialize(reader)?))
            }
        }
    };
}

access_flags! {
    /// Modifiers of a class or interface
    ///
    /// Primitive and array types report `PUBLIC | FINAL | ABSTRACT`.
    ClassAccessFlags {
        PUBLIC = 0x0001,
        FINAL = 0x0010,
        SUPER = 0x0020,
        INTERFACE = 0x0200,
        ABSTRACT = 0x0400,
        SYNTHETIC = 0x1000,
        ANNOTATION = 0x2000,
        ENUM = 0x4000,
        MODULE = 0x8000,
    }
}

access_flags! {
    /// Modifiers of a method or constructor
    MethodAccessFlags {
        PUBLIC = 0x0001,
        PRIVATE = 0x0002,
        PROTECTED = 0x0004,
        STATIC = 0x0008,
        FINAL = 0x0010,
        SYNCHRONIZED = 0x0020,
        BRIDGE = 0x0040,
        VARARGS = 0x0080,
        NATIVE = 0x0100,
        ABSTRACT = 0x0400,
        STRICT = 0x0800,
        SYNTHETIC = 0x1000,
    }
}

access_flags! {
    /// Modifiers of a field
    FieldAccessFlags {
        PUBLIC = 0x0001,
        PRIVATE = 0x0002,
        PROTECTED = 0x0004,
        STATIC = 0x0008,
        FINAL = 0x0010,
        VOLATILE = 0x0040,
        TRANSIENT = 0x0080,
        SYNTHETIC = 0x1000,
        ENUM = 0x4000,
    }
}

impl MethodAccessFlags {
    /// Whether a method with these modifiers has no `Code` attribute
    pub fn is_bodiless(self) -> bool {
        self.intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_bits_are_dropped() {
        let bytes = [0x80u8, 0x0a];
        let flags = FieldAccessFlags::deserialize(&mut &bytes[..]).unwrap();
        assert_eq!(flags, FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC);

        let bytes = [0x01u8, 0x02];
        let flags = MethodAccessFlags::deserialize(&mut &bytes[..]).unwrap();
        assert_eq!(flags, MethodAccessFlags::NATIVE | MethodAccessFlags::PRIVATE);
        assert!(flags.is_bodiless());

        let mut out = vec![];
        (ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER)
            .serialize(&mut out)
            .unwrap();
        assert_eq!(out, vec![0x00, 0x21]);
    }
}
