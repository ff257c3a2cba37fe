use super::class_file::{Constant, ConstantPoolOverflow};
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum Error {
    /// No class (or member) of this name is known, and no byte source could supply one
    NotFound(String),

    /// A requested edit cannot be carried out (bad fragment, wrong descriptor, missing body...)
    CannotCompile(String),

    /// The class has been frozen and must be defrosted before further edits
    Frozen(String),

    /// The class has been pruned, so its structure is gone for good
    Pruned(String),

    /// Class file bytes or an instruction stream are inconsistent
    Malformed(String),

    IoError(std::io::Error),

    ConstantPoolOverflow {
        constant: Constant,
        offset: u16,
    },

    /// Method code exceeds the 65535 byte limit
    MethodCodeOverflow(usize),
    MaxStackOverflow(usize),
    MaxLocalsOverflow(usize),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Error {
        Error::Malformed(msg.into())
    }

    pub(crate) fn cannot_compile(msg: impl Into<String>) -> Error {
        Error::CannotCompile(msg.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound(name) => write!(f, "not found: {}", name),
            Error::CannotCompile(msg) => write!(f, "cannot compile: {}", msg),
            Error::Frozen(name) => write!(f, "{} is frozen", name),
            Error::Pruned(name) => write!(f, "{} is pruned", name),
            Error::Malformed(msg) => write!(f, "malformed class file: {}", msg),
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::ConstantPoolOverflow { constant, offset } => write!(
                f,
                "constant pool is full (inserting {:?} at {})",
                constant, offset
            ),
            Error::MethodCodeOverflow(len) => write!(f, "method code is too long ({} bytes)", len),
            Error::MaxStackOverflow(depth) => write!(f, "operand stack too deep ({})", depth),
            Error::MaxLocalsOverflow(count) => write!(f, "too many locals ({})", count),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<ConstantPoolOverflow> for Error {
    fn from(overflow: ConstantPoolOverflow) -> Error {
        Error::ConstantPoolOverflow {
            constant: overflow.constant,
            offset: overflow.offset,
        }
    }
}
