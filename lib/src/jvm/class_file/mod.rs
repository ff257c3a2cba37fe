//! Representation of the class file format, close to the bytes
//!
//! Everything here can be parsed with [`Deserialize`] and written back with [`Serialize`].
//! Anything that isn't modified round-trips exactly.
//!
//! [`Deserialize`]: crate::jvm::Deserialize
//! [`Serialize`]: crate::jvm::Serialize

mod attribute;
mod class;
mod constants;
mod field;
mod method;
mod mutf8;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use mutf8::*;
pub use version::*;
