use super::{Attribute, ClassConstantIndex, ConstantIndex, ConstantPool, Field, Method, Version};
use crate::jvm::binary_format::read_bytes;
use crate::jvm::{rename_in_descriptor, ClassAccessFlags, Deserialize, Error, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// Index 0 when there is no superclass (only for `java/lang/Object`)
    pub super_class: ClassConstantIndex,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Empty class with no members
    pub fn new(
        name: &str,
        super_name: Option<&str>,
        access_flags: ClassAccessFlags,
        version: Version,
    ) -> Result<ClassFile, Error> {
        let mut constants = ConstantPool::new();
        let this_class = constants.get_class(name)?;
        let super_class = match super_name {
            Some(super_name) => constants.get_class(super_name)?,
            None => ClassConstantIndex(ConstantIndex(0)),
        };
        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        })
    }

    /// Parse a complete class file
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut reader = bytes;
        let class_file = ClassFile::deserialize(&mut reader)?;
        if !reader.is_empty() {
            return Err(Error::malformed(format!(
                "{} trailing bytes after class file",
                reader.len()
            )));
        }
        Ok(class_file)
    }

    /// Encode the class file
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }

    /// Name of the class, in internal form
    pub fn name(&self) -> Result<&str, Error> {
        self.constants.class_name(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<&str>, Error> {
        if (self.super_class.0).0 == 0 {
            Ok(None)
        } else {
            self.constants.class_name(self.super_class).map(Some)
        }
    }

    pub fn interface_names(&self) -> Result<Vec<&str>, Error> {
        self.interfaces
            .iter()
            .map(|interface| self.constants.class_name(*interface))
            .collect()
    }

    /// Position of the field with this name in `fields`
    pub fn find_field(&self, name: &str) -> Result<Option<usize>, Error> {
        for (idx, field) in self.fields.iter().enumerate() {
            if field.name(&self.constants)? == name {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }

    /// Position of the method with this name and descriptor in `methods`
    pub fn find_method(&self, name: &str, descriptor: &str) -> Result<Option<usize>, Error> {
        for (idx, method) in self.methods.iter().enumerate() {
            if method.name(&self.constants)? == name
                && method.descriptor(&self.constants)? == descriptor
            {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }

    /// Rename the class, along with every reference to it in the pool and member descriptors
    pub fn rename(&mut self, new_name: &str) -> Result<(), Error> {
        let old_name = self.name()?.to_owned();
        self.constants.rename_class(&old_name, new_name)?;

        for field in &mut self.fields {
            let descriptor = self.constants.utf8(field.descriptor_index)?;
            if let Some(renamed) = rename_in_descriptor(descriptor, &old_name, new_name) {
                field.descriptor_index = self.constants.get_utf8(renamed)?;
            }
        }
        for method in &mut self.methods {
            let descriptor = self.constants.utf8(method.descriptor_index)?;
            if let Some(renamed) = rename_in_descriptor(descriptor, &old_name, new_name) {
                method.descriptor_index = self.constants.get_utf8(renamed)?;
            }
        }
        Ok(())
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ClassFile {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let magic = read_bytes(reader, 4)?;
        if magic != ClassFile::MAGIC {
            return Err(Error::malformed(format!("bad magic number {:02X?}", magic)));
        }
        let version = Version::deserialize(reader)?;
        let constants = ConstantPool::deserialize(reader)?;
        let class_file = ClassFile {
            version,
            constants,
            access_flags: ClassAccessFlags::deserialize(reader)?,
            this_class: ClassConstantIndex::deserialize(reader)?,
            super_class: ClassConstantIndex::deserialize(reader)?,
            interfaces: Vec::deserialize(reader)?,
            fields: Vec::deserialize(reader)?,
            methods: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        };
        class_file.name()?;
        class_file.super_name()?;
        Ok(class_file)
    }
}
