//! Field and method descriptors
//!
//! See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.3>

use super::BinaryName;

/// Things that can be read back from their descriptor string
pub trait ParseDescriptor: Sized {
    /// Parse a complete descriptor, rejecting anything left over
    fn parse(descriptor: &str) -> Result<Self, String> {
        let mut cursor = Cursor {
            bytes: descriptor.as_bytes(),
            at: 0,
        };
        let parsed = Self::read(&mut cursor)?;
        match cursor.peek() {
            None => Ok(parsed),
            Some(c) => Err(format!(
                "unexpected '{}' at position {}",
                c as char, cursor.at
            )),
        }
    }

    /// Read the descriptor at the front of the cursor
    fn read(cursor: &mut Cursor) -> Result<Self, String>;
}

/// Position in a descriptor being parsed
pub struct Cursor<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.at).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.at += 1;
        Some(byte)
    }

    fn expect(&mut self, wanted: u8) -> Result<(), String> {
        match self.next() {
            Some(c) if c == wanted => Ok(()),
            Some(c) => Err(format!("expected '{}', found '{}'", wanted as char, c as char)),
            None => Err(format!("expected '{}', found the end", wanted as char)),
        }
    }
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    pub fn from_char(c: u8) -> Option<BaseType> {
        Some(match c {
            b'B' => BaseType::Byte,
            b'C' => BaseType::Char,
            b'D' => BaseType::Double,
            b'F' => BaseType::Float,
            b'I' => BaseType::Int,
            b'J' => BaseType::Long,
            b'S' => BaseType::Short,
            b'Z' => BaseType::Boolean,
            _ => return None,
        })
    }

    pub fn as_char(self) -> char {
        match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        }
    }

    /// Local variable or operand stack slots taken by a value of this type
    pub fn width(self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

/// Type of a field, parameter, or return value
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),
    Object(BinaryName),

    /// Array with the given element type (itself an array for multi-dimensional arrays)
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn object(class_name: BinaryName) -> FieldType {
        FieldType::Object(class_name)
    }

    pub const fn int() -> FieldType {
        FieldType::Base(BaseType::Int)
    }

    pub fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Object(_) | FieldType::Array(_) => 1,
        }
    }

    /// Descriptor string of the type, eg. `[Ljava/lang/String;`
    pub fn descriptor(&self) -> String {
        match self {
            FieldType::Base(base_type) => base_type.as_char().to_string(),
            FieldType::Object(class_name) => format!("L{};", class_name),
            FieldType::Array(element) => format!("[{}", element.descriptor()),
        }
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            FieldType::Base(BaseType::Long) => ValueKind::Long,
            FieldType::Base(BaseType::Float) => ValueKind::Float,
            FieldType::Base(BaseType::Double) => ValueKind::Double,
            FieldType::Base(_) => ValueKind::Int,
            FieldType::Object(_) | FieldType::Array(_) => ValueKind::Reference,
        }
    }
}

impl ParseDescriptor for FieldType {
    fn read(cursor: &mut Cursor) -> Result<FieldType, String> {
        let c = cursor.next().ok_or("missing field type")?;
        if let Some(base_type) = BaseType::from_char(c) {
            return Ok(FieldType::Base(base_type));
        }
        match c {
            b'[' => Ok(FieldType::Array(Box::new(FieldType::read(cursor)?))),
            b'L' => {
                let start = cursor.at;
                let length = cursor.bytes[start..]
                    .iter()
                    .position(|b| *b == b';')
                    .ok_or("class name is missing its ';'")?;
                cursor.at += length + 1;
                let name = std::str::from_utf8(&cursor.bytes[start..start + length])
                    .map_err(|err| err.to_string())?;
                BinaryName::from_string(name.to_owned()).map(FieldType::Object)
            }
            c => Err(format!("'{}' does not start a field type", c as char)),
        }
    }
}

/// Parameter and return types of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,

    /// `None` for `void`
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    /// Slots taken by the parameters (and `this`, if asked), at most 255 in a valid method
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this = usize::from(has_this_param);
        this + self.parameters.iter().map(FieldType::width).sum::<usize>()
    }

    /// Local variable slot holding each parameter on method entry
    pub fn parameter_slots(&self, has_this_param: bool) -> Vec<u16> {
        let mut slot = u16::from(has_this_param);
        self.parameters
            .iter()
            .map(|parameter| {
                let at = slot;
                slot += parameter.width() as u16;
                at
            })
            .collect()
    }
}

impl ParseDescriptor for MethodDescriptor {
    fn read(cursor: &mut Cursor) -> Result<MethodDescriptor, String> {
        cursor.expect(b'(')?;
        let mut parameters = vec![];
        while cursor.peek() != Some(b')') {
            parameters.push(FieldType::read(cursor)?);
        }
        cursor.expect(b')')?;
        let return_type = if cursor.peek() == Some(b'V') {
            cursor.next();
            None
        } else {
            Some(FieldType::read(cursor)?)
        };
        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

/// Computational category of a value, which picks the load, store, and return opcodes for it
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

/// Replace every mention of class `old` in a field or method descriptor with `new`
///
/// Returns `None` if the descriptor does not mention `old`.
pub fn rename_in_descriptor(descriptor: &str, old: &str, new: &str) -> Option<String> {
    let needle = format!("L{};", old);
    if descriptor.contains(&needle) {
        Some(descriptor.replace(&needle, &format!("L{};", new)))
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn class(name: &str) -> FieldType {
        FieldType::object(BinaryName::from_string(name.to_owned()).unwrap())
    }

    #[test]
    fn field_types() {
        assert_eq!(FieldType::parse("J").unwrap(), FieldType::Base(BaseType::Long));
        assert_eq!(FieldType::parse("Ljava/lang/Object;").unwrap(), class("java/lang/Object"));
        assert_eq!(
            FieldType::parse("[[I").unwrap(),
            FieldType::Array(Box::new(FieldType::Array(Box::new(FieldType::int()))))
        );
        assert!(FieldType::parse("Ljava/lang/String").is_err());
        assert!(FieldType::parse("L;").is_err());
        assert!(FieldType::parse("II").is_err());
        assert!(FieldType::parse("V").is_err());

        for descriptor in ["Z", "[[D", "[Ljava/lang/Object;", "Ljava/util/Map$Entry;"] {
            assert_eq!(FieldType::parse(descriptor).unwrap().descriptor(), descriptor);
        }
    }

    #[test]
    fn method_descriptors() {
        let descriptor = MethodDescriptor::parse("(IJ[Ljava/lang/String;)Ljava/lang/Object;").unwrap();
        assert_eq!(descriptor.parameters.len(), 3);
        assert_eq!(descriptor.return_type, Some(class("java/lang/Object")));
        assert_eq!(descriptor.parameter_length(true), 5);
        assert_eq!(descriptor.parameter_slots(true), vec![1, 2, 4]);
        assert_eq!(descriptor.parameter_slots(false), vec![0, 1, 3]);

        let void = MethodDescriptor::parse("()V").unwrap();
        assert!(void.parameters.is_empty());
        assert_eq!(void.return_type, None);
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("I)V").is_err());
    }

    #[test]
    fn value_kinds() {
        assert_eq!(FieldType::parse("Z").unwrap().value_kind(), ValueKind::Int);
        assert_eq!(FieldType::parse("D").unwrap().value_kind(), ValueKind::Double);
        assert_eq!(FieldType::parse("[I").unwrap().value_kind(), ValueKind::Reference);
        assert_eq!(FieldType::parse("[J").unwrap().width(), 1);
    }

    #[test]
    fn renaming() {
        assert_eq!(
            rename_in_descriptor("(La/B;[La/B;)La/Bc;", "a/B", "x/Y").as_deref(),
            Some("(Lx/Y;[Lx/Y;)La/Bc;")
        );
        assert_eq!(rename_in_descriptor("(I)V", "a/B", "x/Y"), None);
    }
}
