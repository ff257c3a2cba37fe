//! Load, edit, and re-emit JVM class files
//!
//! Classes are looked up through a [`model::ClassRegistry`], which hands out exactly one
//! [`model::ClassEntity`] per name. Entities are decoded lazily, edited through their members, and
//! frozen into bytes once editing is over.
//!
//! ```
//! use classweave::compile::Assembler;
//! use classweave::jvm::{MethodAccessFlags, Version};
//! use classweave::model::ClassRegistry;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), classweave::jvm::Error> {
//! let registry = ClassRegistry::new();
//! registry.set_compiler(Arc::new(Assembler::new()));
//!
//! let class = registry.make_class("me/alec/Counter", None)?;
//! class.set_version(Version::JAVA6)?;
//! let count = class.add_method(
//!     "count",
//!     "(I)I",
//!     MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//!     Some("load $1; ireturn"),
//! )?;
//! count.insert_before("iinc $1 1")?;
//! count.insert_after("getstatic java/lang/System.out:Ljava/io/PrintStream;; pop", true)?;
//!
//! let bytes = class.to_bytes()?;
//! assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
//! # Ok(())
//! # }
//! ```

pub mod compile;
pub mod convert;
pub mod jvm;
pub mod model;
pub mod splice;
