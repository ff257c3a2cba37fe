use super::{find_attribute, Attribute, AttributeLike, Code, ConstantPool, Utf8ConstantIndex};
use crate::jvm::{Deserialize, Error, MethodAccessFlags, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Method declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Method {
    pub fn name<'p>(&self, constants: &'p ConstantPool) -> Result<&'p str, Error> {
        constants.utf8(self.name_index)
    }

    pub fn descriptor<'p>(&self, constants: &'p ConstantPool) -> Result<&'p str, Error> {
        constants.utf8(self.descriptor_index)
    }

    /// Decoded `Code` attribute, if the method has a body
    pub fn code(&self, constants: &ConstantPool) -> Result<Option<Code>, Error> {
        match find_attribute(&self.attributes, constants, Code::NAME)? {
            Some(idx) => Ok(Some(self.attributes[idx].decode()?)),
            None => Ok(None),
        }
    }

    /// Replace (or add) the `Code` attribute
    pub fn set_code(&mut self, constants: &mut ConstantPool, code: &Code) -> Result<(), Error> {
        let attribute = constants.get_attribute(code)?;
        match find_attribute(&self.attributes, constants, Code::NAME)? {
            Some(idx) => self.attributes[idx] = attribute,
            None => self.attributes.push(attribute),
        }
        Ok(())
    }
}

impl Serialize for Method {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Method {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(Method {
            access_flags: MethodAccessFlags::deserialize(reader)?,
            name_index: Utf8ConstantIndex::deserialize(reader)?,
            descriptor_index: Utf8ConstantIndex::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}
