use super::Error;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{ErrorKind, Result};

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Counterpart of [`Serialize`] for reading class files back in
///
/// Running out of input is reported as a malformed class file, not as an I/O error.
pub trait Deserialize: Sized {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error>;
}

/// Map a read failure into the crate error (EOF means the input was truncated)
pub(crate) fn read_error(err: std::io::Error) -> Error {
    if err.kind() == ErrorKind::UnexpectedEof {
        Error::malformed("unexpected end of input")
    } else {
        Error::IoError(err)
    }
}

macro_rules! big_endian_number {
    ($typ:ty, $write:ident, $read:ident) => {
        impl Serialize for $typ {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                writer.$write::<BigEndian>(*self)
            }
        }

        impl Deserialize for $typ {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
                reader.$read::<BigEndian>().map_err(read_error)
            }
        }
    };
}

big_endian_number!(u16, write_u16, read_u16);
big_endian_number!(u32, write_u32, read_u32);
big_endian_number!(i16, write_i16, read_i16);
big_endian_number!(i32, write_i32, read_i32);
big_endian_number!(i64, write_i64, read_i64);
big_endian_number!(f32, write_f32, read_f32);
big_endian_number!(f64, write_f64, read_f64);

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
        reader.read_u8().map_err(read_error)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
        let len = u16::deserialize(reader)? as usize;
        let mut elems = Vec::with_capacity(len);
        for _ in 0..len {
            elems.push(A::deserialize(reader)?);
        }
        Ok(elems)
    }
}

/// Read exactly `len` raw bytes
pub(crate) fn read_bytes<R: ReadBytesExt>(
    reader: &mut R,
    len: usize,
) -> std::result::Result<Vec<u8>, Error> {
    let mut buffer = vec![0; len];
    reader.read_exact(&mut buffer).map_err(read_error)?;
    Ok(buffer)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_endian_sequences() {
        let mut out = vec![];
        vec![0x0102u16, 0xA0B0].serialize(&mut out).unwrap();
        assert_eq!(out, vec![0, 2, 1, 2, 0xA0, 0xB0]);

        let back = Vec::<u16>::deserialize(&mut out.as_slice()).unwrap();
        assert_eq!(back, vec![0x0102, 0xA0B0]);
    }

    #[test]
    fn truncated_input_is_malformed() {
        let bytes = [0u8, 3, 0, 1];
        match Vec::<u16>::deserialize(&mut &bytes[..]) {
            Err(Error::Malformed(_)) => (),
            other => panic!("expected malformed error, got {:?}", other),
        }
    }
}
