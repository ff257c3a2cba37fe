//! Registries of class entities, and the entities themselves
//!
//! A [`ClassRegistry`] hands out one [`ClassEntity`] per class name. Entities decode their class
//! file lazily, track whether they have been edited, frozen into bytes, or pruned, and give access
//! to their fields and methods as [`Member`] handles. Bytes of classes come from [`ByteSource`]s,
//! and finished classes can be handed to a [`ClassDefiner`].

mod entity;
mod member;
mod registry;
mod source;

pub use entity::{ClassEntity, EntityKind, FieldInitializer};
pub use member::{Member, MemberKind};
pub use registry::{ClassRegistry, DEFAULT_COMPACT_THRESHOLD};
pub use source::{ByteSource, ClassDefiner, DirectorySource, MemorySource};
