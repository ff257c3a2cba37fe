//! Manipulate JVM class files
//!
//! The layers, from the bytes up:
//!
//!   - [`class_file`] mirrors the binary format (constant pool, members, attributes) and can be
//!     parsed and serialized without loss
//!   - [`code`] works on method bodies: opcodes, a label based editor for existing code, and a
//!     builder for emitting new code
//!
//! ### Simple example
//!
//! Reading a class, listing its methods, and writing it back out unchanged:
//!
//! ```
//! use classweave::jvm::class_file::ClassFile;
//! use classweave::jvm::{ClassAccessFlags, Error, Version};
//!
//! # fn main() -> Result<(), Error> {
//! let class = ClassFile::new("me/alec/Point", Some("java/lang/Object"), ClassAccessFlags::PUBLIC, Version::JAVA8)?;
//! let bytes = class.to_bytes()?;
//!
//! let parsed = ClassFile::parse(&bytes)?;
//! assert_eq!(parsed.name()?, "me/alec/Point");
//! for method in &parsed.methods {
//!     println!("{}{}", method.name(&parsed.constants)?, method.descriptor(&parsed.constants)?);
//! }
//! assert_eq!(parsed.to_bytes()?, bytes);
//! # Ok(())
//! # }
//! ```

mod access_flags;
mod binary_format;
pub mod class_file;
pub mod code;
mod descriptors;
mod errors;
mod names;

pub use access_flags::*;
pub use binary_format::{Deserialize, Serialize};
pub use class_file::Version;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
