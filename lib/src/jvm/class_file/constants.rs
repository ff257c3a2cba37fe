use super::{decode_modified_utf8, encode_modified_utf8, Attribute, AttributeLike};
use crate::jvm::binary_format::read_bytes;
use crate::jvm::{rename_in_descriptor, Deserialize, Error, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::result::Result;

/// Editable constant pool of a class file
///
/// Entries that already exist are reused when asked for again, so that inserting code which
/// mentions the same method many times only grows the pool once. Entries are never removed: the
/// indices of an existing pool stay valid across edits.
#[derive(Clone, Debug)]
pub struct ConstantPool {
    /// Entries by index; index 0 and the slot after each 8-byte constant are unusable
    slots: Vec<Option<Constant>>,

    utf8s: HashMap<String, Utf8ConstantIndex>,
    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    fieldrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    methodrefs:
        HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
    integers: HashMap<i32, ConstantIndex>,
    floats: HashMap<u32, ConstantIndex>,
    longs: HashMap<i64, ConstantIndex>,
    doubles: HashMap<u64, ConstantIndex>,
}

/// Symbolic view of a field or method reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub kind: MemberRefKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberRefKind {
    Field,
    Method,
    InterfaceMethod,
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

impl ConstantPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            slots: vec![None],
            utf8s: HashMap::new(),
            classes: HashMap::new(),
            strings: HashMap::new(),
            name_and_types: HashMap::new(),
            fieldrefs: HashMap::new(),
            methodrefs: HashMap::new(),
            integers: HashMap::new(),
            floats: HashMap::new(),
            longs: HashMap::new(),
            doubles: HashMap::new(),
        }
    }

    /// Number of entries (not indices: `long` and `double` entries count once)
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Value of `constant_pool_count`: one more than the largest index
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over the entries along with their indices
    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref()
                .map(|constant| (ConstantIndex(index as u16), constant))
        })
    }

    /// Append an entry, failing once the indices run out
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let index = self.slots.len();
        let wide = constant.is_wide();
        let needed = if wide { 2 } else { 1 };
        if index + needed > u16::MAX as usize {
            return Err(ConstantPoolOverflow {
                constant,
                offset: index as u16,
            });
        }

        self.slots.push(Some(constant));
        if wide {
            self.slots.push(None);
        }
        Ok(ConstantIndex(index as u16))
    }

    /// Register an entry (already in the pool) in the lookup tables, keeping earlier duplicates
    fn index_constant(&mut self, index: ConstantIndex, constant: &Constant) {
        match constant {
            Constant::Utf8(string) => {
                self.utf8s
                    .entry(string.clone())
                    .or_insert(Utf8ConstantIndex(index));
            }
            Constant::Class(name) => {
                self.classes
                    .entry(*name)
                    .or_insert(ClassConstantIndex(index));
            }
            Constant::String(utf8) => {
                self.strings
                    .entry(*utf8)
                    .or_insert(StringConstantIndex(index));
            }
            Constant::NameAndType { name, descriptor } => {
                self.name_and_types
                    .entry((*name, *descriptor))
                    .or_insert(NameAndTypeConstantIndex(index));
            }
            Constant::FieldRef(class, name_and_type) => {
                self.fieldrefs
                    .entry((*class, *name_and_type))
                    .or_insert(FieldRefConstantIndex(index));
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                self.methodrefs
                    .entry((*class, *name_and_type, *is_interface))
                    .or_insert(MethodRefConstantIndex(index));
            }
            Constant::Integer(integer) => {
                self.integers.entry(*integer).or_insert(index);
            }
            Constant::Float(float) => {
                self.floats.entry(float.to_bits()).or_insert(index);
            }
            Constant::Long(long) => {
                self.longs.entry(*long).or_insert(index);
            }
            Constant::Double(double) => {
                self.doubles.entry(double.to_bits()).or_insert(index);
            }
            _ => (),
        }
    }

    /// Rebuild every lookup table from the entries
    fn reindex(&mut self) {
        self.utf8s.clear();
        self.classes.clear();
        self.strings.clear();
        self.name_and_types.clear();
        self.fieldrefs.clear();
        self.methodrefs.clear();
        self.integers.clear();
        self.floats.clear();
        self.longs.clear();
        self.doubles.clear();

        let entries: Vec<(ConstantIndex, Constant)> = self
            .iter()
            .map(|(index, constant)| (index, constant.clone()))
            .collect();
        for (index, constant) in &entries {
            self.index_constant(*index, constant);
        }
    }

    /// Look up the entry at an index
    pub fn get(&self, index: impl Into<ConstantIndex>) -> Result<&Constant, Error> {
        let index = index.into();
        self.slots
            .get(index.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::malformed(format!("invalid constant pool index {}", index.0)))
    }

    /// Look up a UTF-8 entry
    pub fn utf8(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Utf8(string) => Ok(string),
            other => Err(unexpected("Utf8", index.0 .0, other)),
        }
    }

    /// Name (in internal form, or as an array descriptor) of a class entry
    pub fn class_name(&self, index: ClassConstantIndex) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(unexpected("Class", index.0 .0, other)),
        }
    }

    /// Name and descriptor of a name-and-type entry
    pub fn name_and_type(&self, index: NameAndTypeConstantIndex) -> Result<(&str, &str), Error> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(unexpected("NameAndType", index.0 .0, other)),
        }
    }

    /// Resolve a field, method, or interface method reference
    pub fn member_ref(&self, index: ConstantIndex) -> Result<MemberRef<'_>, Error> {
        let (class, name_and_type, kind) = match self.get(index)? {
            Constant::FieldRef(class, name_and_type) => {
                (*class, *name_and_type, MemberRefKind::Field)
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                let kind = if *is_interface {
                    MemberRefKind::InterfaceMethod
                } else {
                    MemberRefKind::Method
                };
                (*class, *name_and_type, kind)
            }
            other => return Err(unexpected("member reference", index.0, other)),
        };
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            class: self.class_name(class)?,
            name,
            descriptor,
            kind,
        })
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let owned = cow.into_owned();
            let constant = Constant::Utf8(owned.clone());
            let idx = Utf8ConstantIndex(self.push_constant(constant)?);
            self.utf8s.insert(owned, idx);
            Ok(idx)
        }
    }

    /// Get or insert a class constant (name in internal form, or an array descriptor)
    pub fn get_class(&mut self, name: &str) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        let utf8 = self.get_utf8(name)?;
        if let Some(idx) = self.classes.get(&utf8) {
            Ok(*idx)
        } else {
            let idx = ClassConstantIndex(self.push_constant(Constant::Class(utf8))?);
            self.classes.insert(utf8, idx);
            Ok(idx)
        }
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string(&mut self, string: &str) -> Result<StringConstantIndex, ConstantPoolOverflow> {
        let utf8 = self.get_utf8(string)?;
        if let Some(idx) = self.strings.get(&utf8) {
            Ok(*idx)
        } else {
            let idx = StringConstantIndex(self.push_constant(Constant::String(utf8))?);
            self.strings.insert(utf8, idx);
            Ok(idx)
        }
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        if let Some(idx) = self.name_and_types.get(&(name, descriptor)) {
            Ok(*idx)
        } else {
            let constant = Constant::NameAndType { name, descriptor };
            let idx = NameAndTypeConstantIndex(self.push_constant(constant)?);
            self.name_and_types.insert((name, descriptor), idx);
            Ok(idx)
        }
    }

    /// Get or insert a `CONSTANT_Fieldref_info`
    pub fn get_field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        if let Some(idx) = self.fieldrefs.get(&(class, name_and_type)) {
            Ok(*idx)
        } else {
            let constant = Constant::FieldRef(class, name_and_type);
            let idx = FieldRefConstantIndex(self.push_constant(constant)?);
            self.fieldrefs.insert((class, name_and_type), idx);
            Ok(idx)
        }
    }

    /// Get or insert a `CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info`
    pub fn get_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        let key = (class, name_and_type, is_interface);
        if let Some(idx) = self.methodrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            };
            let idx = MethodRefConstantIndex(self.push_constant(constant)?);
            self.methodrefs.insert(key, idx);
            Ok(idx)
        }
    }

    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.integers.get(&integer) {
            return Ok(*idx);
        }
        let idx = self.push_constant(Constant::Integer(integer))?;
        self.integers.insert(integer, idx);
        Ok(idx)
    }

    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.floats.get(&float.to_bits()) {
            return Ok(*idx);
        }
        let idx = self.push_constant(Constant::Float(float))?;
        self.floats.insert(float.to_bits(), idx);
        Ok(idx)
    }

    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.longs.get(&long) {
            return Ok(*idx);
        }
        let idx = self.push_constant(Constant::Long(long))?;
        self.longs.insert(long, idx);
        Ok(idx)
    }

    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.doubles.get(&double.to_bits()) {
            return Ok(*idx);
        }
        let idx = self.push_constant(Constant::Double(double))?;
        self.doubles.insert(double.to_bits(), idx);
        Ok(idx)
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: &A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }

    /// Make every class entry and every name-and-type descriptor that mentions `old` mention
    /// `new` instead
    ///
    /// Existing entries are repointed at fresh UTF-8 entries; the old UTF-8 entries stay in place
    /// since other structures may still refer to them. Returns whether anything changed.
    pub fn rename_class(&mut self, old: &str, new: &str) -> Result<bool, Error> {
        let mut rewrites: Vec<(ConstantIndex, Constant)> = vec![];
        let entries: Vec<(ConstantIndex, Constant)> = self
            .iter()
            .map(|(index, constant)| (index, constant.clone()))
            .collect();

        for (index, constant) in entries {
            match constant {
                Constant::Class(name) => {
                    let current = self.utf8(name)?.to_owned();
                    let renamed = if current == old {
                        Some(new.to_owned())
                    } else if current.starts_with('[') {
                        rename_in_descriptor(&current, old, new)
                    } else {
                        None
                    };
                    if let Some(renamed) = renamed {
                        let utf8 = self.get_utf8(renamed)?;
                        rewrites.push((index, Constant::Class(utf8)));
                    }
                }
                Constant::NameAndType { name, descriptor } => {
                    let current = self.utf8(descriptor)?.to_owned();
                    if let Some(renamed) = rename_in_descriptor(&current, old, new) {
                        let descriptor = self.get_utf8(renamed)?;
                        rewrites.push((index, Constant::NameAndType { name, descriptor }));
                    }
                }
                Constant::MethodType { descriptor } => {
                    let current = self.utf8(descriptor)?.to_owned();
                    if let Some(renamed) = rename_in_descriptor(&current, old, new) {
                        let descriptor = self.get_utf8(renamed)?;
                        rewrites.push((index, Constant::MethodType { descriptor }));
                    }
                }
                _ => (),
            }
        }

        let changed = !rewrites.is_empty();
        for (index, constant) in rewrites {
            if let Some(slot) = self.slots.get_mut(index.0 as usize) {
                *slot = Some(constant);
            }
        }
        if changed {
            self.reindex();
        }
        Ok(changed)
    }
}

fn unexpected(expected: &str, index: u16, found: &Constant) -> Error {
    Error::malformed(format!(
        "expected {} at constant pool index {}, found {:?}",
        expected, index, found
    ))
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.slots.len() as u16).serialize(writer)?;
        for constant in self.slots.iter().flatten() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantPool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let count = u16::deserialize(reader)? as usize;
        let mut pool = ConstantPool::new();
        while pool.slots.len() < count {
            let constant = Constant::deserialize(reader)?;
            let wide = constant.is_wide();
            if wide && pool.slots.len() + 2 > count {
                return Err(Error::malformed("8-byte constant overruns the pool"));
            }
            pool.slots.push(Some(constant));
            if wide {
                pool.slots.push(None);
            }
        }
        pool.reindex();
        Ok(pool)
    }
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),

    Package(Utf8ConstantIndex),
}

impl Constant {
    /// Whether `ldc`/`ldc_w` may push this constant
    pub fn is_loadable(&self) -> bool {
        matches!(
            self,
            Constant::Integer(_)
                | Constant::Float(_)
                | Constant::String(_)
                | Constant::Class(_)
                | Constant::MethodHandle { .. }
                | Constant::MethodType { .. }
                | Constant::Dynamic { .. }
        )
    }

    /// `long` and `double` entries use up the index after their own
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for Constant {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let tag = u8::deserialize(reader)?;
        let constant = match tag {
            1 => {
                let len = u16::deserialize(reader)? as usize;
                let bytes = read_bytes(reader, len)?;
                let string = decode_modified_utf8(&bytes)
                    .map_err(|msg| Error::malformed(format!("bad Utf8 constant: {}", msg)))?;
                Constant::Utf8(string)
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::deserialize(reader)?),
            7 => Constant::Class(Utf8ConstantIndex::deserialize(reader)?),
            8 => Constant::String(Utf8ConstantIndex::deserialize(reader)?),
            9 => Constant::FieldRef(
                ClassConstantIndex::deserialize(reader)?,
                NameAndTypeConstantIndex::deserialize(reader)?,
            ),
            10 | 11 => Constant::MethodRef {
                class: ClassConstantIndex::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex::deserialize(reader)?,
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                handle_kind: HandleKind::deserialize(reader)?,
                member: ConstantIndex::deserialize(reader)?,
            },
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                method_descriptor: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            19 => Constant::Module(Utf8ConstantIndex::deserialize(reader)?),
            20 => Constant::Package(Utf8ConstantIndex::deserialize(reader)?),
            other => return Err(Error::malformed(format!("unknown constant tag {}", other))),
        };
        Ok(constant)
    }
}


#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

macro_rules! typed_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
        pub struct $name(pub ConstantIndex);

        impl From<$name> for ConstantIndex {
            fn from(index: $name) -> ConstantIndex {
                index.0
            }
        }

        impl Serialize for $name {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.0.serialize(writer)
            }
        }

        impl Deserialize for $name {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
                Ok($name(ConstantIndex::deserialize(reader)?))
            }
        }
    };
}

typed_index!(Utf8ConstantIndex);
typed_index!(StringConstantIndex);
typed_index!(NameAndTypeConstantIndex);
typed_index!(
    /// Index of a class entry; index 0 stands for "no class" (eg. `java/lang/Object`'s super)
    ClassConstantIndex
);
typed_index!(FieldRefConstantIndex);
typed_index!(MethodRefConstantIndex);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(ConstantIndex(u16::deserialize(reader)?))
    }
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}

impl Deserialize for HandleKind {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let kind = match u8::deserialize(reader)? {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            other => return Err(Error::malformed(format!("unknown handle kind {}", other))),
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entries_are_shared() {
        let mut pool = ConstantPool::new();
        let first = pool.get_method_ref("a/B", "m", "(I)V", false).unwrap();
        let second = pool.get_method_ref("a/B", "m", "(I)V", false).unwrap();
        assert_eq!(first, second);

        let size = pool.len();
        pool.get_class("a/B").unwrap();
        pool.get_utf8("m").unwrap();
        assert_eq!(pool.len(), size);

        let interface = pool.get_method_ref("a/B", "m", "(I)V", true).unwrap();
        assert_ne!(first, interface);
    }

    #[test]
    fn wide_constants_take_two_indices() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.get_long(7).unwrap(), ConstantIndex(1));
        assert_eq!(pool.get_integer(7).unwrap(), ConstantIndex(3));
        assert_eq!(pool.get_double(0.5).unwrap(), ConstantIndex(4));
        assert_eq!(pool.get_utf8("x").unwrap(), Utf8ConstantIndex(ConstantIndex(6)));
        assert!(pool.get(ConstantIndex(2)).is_err());
        assert!(pool.get(ConstantIndex(0)).is_err());
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.count(), 7);
    }

    #[test]
    fn parse_after_serialize() {
        let mut pool = ConstantPool::new();
        let field = pool.get_field_ref("a/B", "count", "I").unwrap();
        pool.get_string("hello\u{0}world").unwrap();
        pool.get_float(f32::NAN).unwrap();
        pool.get_long(-1).unwrap();

        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();
        let mut parsed = ConstantPool::deserialize(&mut bytes.as_slice()).unwrap();

        let mut reserialized = vec![];
        parsed.serialize(&mut reserialized).unwrap();
        assert_eq!(bytes, reserialized);

        let member = parsed.member_ref(field.into()).unwrap();
        assert_eq!(member.class, "a/B");
        assert_eq!(member.name, "count");
        assert_eq!(member.descriptor, "I");
        assert_eq!(member.kind, MemberRefKind::Field);

        // lookup tables are rebuilt, so nothing new gets added
        let len = parsed.len();
        assert_eq!(parsed.get_field_ref("a/B", "count", "I").unwrap(), field);
        assert_eq!(parsed.len(), len);
    }

    #[test]
    fn renaming_classes() {
        let mut pool = ConstantPool::new();
        let class = pool.get_class("a/B").unwrap();
        let array = pool.get_class("[La/B;").unwrap();
        let method = pool.get_method_ref("c/D", "make", "(La/B;)[La/B;", false).unwrap();

        assert!(pool.rename_class("a/B", "x/Y").unwrap());
        assert_eq!(pool.class_name(class).unwrap(), "x/Y");
        assert_eq!(pool.class_name(array).unwrap(), "[Lx/Y;");
        let member = pool.member_ref(method.into()).unwrap();
        assert_eq!(member.descriptor, "(Lx/Y;)[Lx/Y;");
        assert_eq!(member.class, "c/D");

        assert!(!pool.rename_class("a/B", "x/Y").unwrap());
        assert_eq!(pool.get_class("x/Y").unwrap(), class);
    }

    #[test]
    fn lookups_check_the_entry_kind() {
        let mut pool = ConstantPool::new();
        let name = pool.get_utf8("a/B").unwrap();
        let class = pool.get_class("a/B").unwrap();
        let integer = pool.get_integer(3).unwrap();

        assert_eq!(pool.utf8(name).unwrap(), "a/B");
        assert!(matches!(
            pool.utf8(Utf8ConstantIndex(class.0)),
            Err(Error::Malformed(message)) if message.contains("expected Utf8")
        ));
        assert!(matches!(
            pool.class_name(ClassConstantIndex(name.0)),
            Err(Error::Malformed(message)) if message.contains("expected Class")
        ));
        assert!(matches!(
            pool.name_and_type(NameAndTypeConstantIndex(integer)),
            Err(Error::Malformed(message)) if message.contains("expected NameAndType")
        ));
        assert!(pool.member_ref(integer).is_err());
    }

    #[test]
    fn truncated_pool() {
        let bytes = [0u8, 3, 1, 0, 1, b'a'];
        assert!(matches!(
            ConstantPool::deserialize(&mut &bytes[..]),
            Err(Error::Malformed(_))
        ));
    }
}
