//! Turning snippets of source into fragments of bytecode
//!
//! The splicer never looks at source text itself: it hands the text to a [`FragmentCompiler`]
//! along with a [`CompileContext`] describing where the code is going to end up, and gets back a
//! [`Fragment`]. Any constants the fragment needs are added to the pool it is given, which is a
//! scratch copy of the class pool: if the edit fails, nothing leaks into the class.
//!
//! The crate ships one compiler, the [`Assembler`], which accepts plain bytecode mnemonics with a
//! few conveniences for referring to the method's parameters and locals.

mod assembler;

pub use crate::jvm::code::Fragment;
pub use assembler::Assembler;

use crate::jvm::class_file::ConstantPool;
use crate::jvm::{BinaryName, Error, FieldType, MethodDescriptor, ParseDescriptor};

/// Compiler of source snippets into bytecode fragments
pub trait FragmentCompiler: Send + Sync {
    /// Compile `source` for the method described by `context`
    ///
    /// Failures should be reported as [`Error::CannotCompile`].
    fn compile(
        &self,
        source: &str,
        context: &CompileContext,
        constants: &mut ConstantPool,
    ) -> Result<Fragment, Error>;
}

/// Where a fragment is going to be spliced in
#[derive(Clone, Debug)]
pub struct CompileContext {
    /// Class declaring the method, in internal form
    pub class_name: String,

    pub method_name: String,

    /// Method descriptor, eg. `(I)I`
    pub descriptor: String,

    pub is_static: bool,

    /// First local variable slot the fragment may use for itself
    pub max_locals: u16,

    /// Slot and type of the value about to be returned (only inside return instrumentation of
    /// non-`void` methods)
    pub result: Option<(u16, FieldType)>,

    /// Slot holding the exception being handled (only inside catch handlers and finally code)
    pub exception: Option<u16>,

    parsed: MethodDescriptor,
}

impl CompileContext {
    /// Context for code going into the given method, before any locals have been reserved
    pub fn new(
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> Result<CompileContext, Error> {
        let parsed = MethodDescriptor::parse(descriptor).map_err(|err| {
            Error::malformed(format!("bad method descriptor {}: {}", descriptor, err))
        })?;
        let max_locals = parsed.parameter_length(!is_static) as u16;
        Ok(CompileContext {
            class_name: class_name.to_owned(),
            method_name: method_name.to_owned(),
            descriptor: descriptor.to_owned(),
            is_static,
            max_locals,
            result: None,
            exception: None,
            parsed,
        })
    }

    /// Parameter types, in order
    pub fn parameters(&self) -> &[FieldType] {
        &self.parsed.parameters
    }

    /// Return type (`None` for `void`)
    pub fn return_type(&self) -> Option<&FieldType> {
        self.parsed.return_type.as_ref()
    }

    /// Local slot and type of parameter `$n` (`$0` being `this`)
    pub fn parameter(&self, n: usize) -> Result<(u16, FieldType), Error> {
        if n == 0 {
            if self.is_static {
                return Err(Error::cannot_compile(format!(
                    "$0 used in static method {}",
                    self.method_name
                )));
            }
            let this = BinaryName::from_string(self.class_name.clone())
                .map_err(Error::CannotCompile)?;
            return Ok((0, FieldType::object(this)));
        }
        let slots = self.parsed.parameter_slots(!self.is_static);
        match (slots.get(n - 1), self.parsed.parameters.get(n - 1)) {
            (Some(slot), Some(typ)) => Ok((*slot, typ.clone())),
            _ => Err(Error::cannot_compile(format!(
                "${} is out of range for {}{}",
                n, self.method_name, self.descriptor
            ))),
        }
    }
}
