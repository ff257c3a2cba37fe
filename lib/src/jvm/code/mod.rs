//! Bytecode representation and editing
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::jvm::class_file::Code),
//! the bytecode is arguably the most important part of the class file - it contains the actual
//! executable instructions. We split up the [list of bytecode instructions][0] into two groups:
//!
//!   - [`Instruction`] for straight-line instructions
//!   - [`BranchInstruction`] for instructions that may jump or that end the flow of control
//!
//! ### Editing
//!
//! Existing method bodies are edited through a [`CodeEditor`], which decodes the code array into a
//! flat list of [`Item`]s. Every branch target, exception range, line number, local variable range,
//! and stack map frame refers to a [`Label`] instead of a byte offset, so that splicing new code in
//! anywhere does not invalidate anything. Offsets are only computed again once editing is done, in
//! a single layout pass (see [`layout`]) that also widens jumps which no longer fit.
//!
//! New code is generated with a [`CodeBuilder`], which produces a [`Fragment`] ready to be
//! spliced into a [`CodeEditor`].
//!
//! Edits can add jump targets and handlers which the original `StackMapTable` has no frame for.
//! [`CodeEditor::compute_frames`] fills those in (see [`Frame`]).
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod builder;
mod bytecode;
mod disassemble;
mod editor;
mod fragment;
mod frames;
mod label;
pub mod layout;
pub mod opcodes;
mod stack;

pub use builder::*;
pub use bytecode::*;
pub use disassemble::*;
pub use editor::*;
pub use fragment::*;
pub use frames::*;
pub use label::*;
pub use stack::*;
