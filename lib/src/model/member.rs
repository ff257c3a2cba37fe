use super::entity::MemberSlot;
use super::ClassEntity;
use crate::jvm::class_file::ClassFile;
use crate::jvm::code::disassemble;
use crate::jvm::{Error, FieldAccessFlags, MethodAccessFlags};
use crate::splice::{self, ReturnStrategy};
use std::fmt;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Method,
    Constructor,

    /// `<clinit>`
    ClassInitializer,
}

/// Handle on a field or method of a class entity
///
/// Members are identified by name and descriptor, so a handle stays usable across edits of the
/// class (as long as the member itself is not removed).
#[derive(Clone)]
pub struct Member {
    entity: Arc<ClassEntity>,
    kind: MemberKind,
    name: String,
    descriptor: String,
}

impl Member {
    pub(crate) fn new(
        entity: Arc<ClassEntity>,
        kind: MemberKind,
        name: &str,
        descriptor: &str,
    ) -> Member {
        Member {
            entity,
            kind,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    pub fn declaring_class(&self) -> &Arc<ClassEntity> {
        &self.entity
    }

    fn field_slot(&self, slot: MemberSlot) -> Result<usize, Error> {
        match slot {
            MemberSlot::Field(idx) => Ok(idx),
            MemberSlot::Method(_) => Err(self.wrong_kind("field")),
        }
    }

    fn method_slot(&self, slot: MemberSlot) -> Result<usize, Error> {
        match slot {
            MemberSlot::Method(idx) => Ok(idx),
            MemberSlot::Field(_) => Err(self.wrong_kind("method")),
        }
    }

    fn wrong_kind(&self, expected: &str) -> Error {
        Error::cannot_compile(format!(
            "{}:{} is not a {}",
            self.name, self.descriptor, expected
        ))
    }

    pub fn is_static(&self) -> Result<bool, Error> {
        match self.kind {
            MemberKind::Field => Ok(self.field_flags()?.contains(FieldAccessFlags::STATIC)),
            _ => Ok(self.method_flags()?.contains(MethodAccessFlags::STATIC)),
        }
    }

    pub fn field_flags(&self) -> Result<FieldAccessFlags, Error> {
        self.entity
            .read_member(&self.name, &self.descriptor, |class, slot| {
                Ok(class.fields[self.field_slot(slot)?].access_flags)
            })
    }

    pub fn set_field_flags(&self, access_flags: FieldAccessFlags) -> Result<(), Error> {
        self.entity
            .edit_member(&self.name, &self.descriptor, |class, slot| {
                class.fields[self.field_slot(slot)?].access_flags = access_flags;
                Ok(())
            })
    }

    pub fn method_flags(&self) -> Result<MethodAccessFlags, Error> {
        self.entity
            .read_member(&self.name, &self.descriptor, |class, slot| {
                Ok(class.methods[self.method_slot(slot)?].access_flags)
            })
    }

    pub fn set_method_flags(&self, access_flags: MethodAccessFlags) -> Result<(), Error> {
        self.entity
            .edit_member(&self.name, &self.descriptor, |class, slot| {
                class.methods[self.method_slot(slot)?].access_flags = access_flags;
                Ok(())
            })
    }

    /// Whether the method has a `Code` attribute
    pub fn has_body(&self) -> Result<bool, Error> {
        self.entity
            .read_member(&self.name, &self.descriptor, |class, slot| {
                let method = &class.methods[self.method_slot(slot)?];
                Ok(method.code(&class.constants)?.is_some())
            })
    }

    /// Textual listing of the method body (`None` for methods without one)
    pub fn disassemble(&self) -> Result<Option<String>, Error> {
        self.entity
            .read_member(&self.name, &self.descriptor, |class, slot| {
                let method = &class.methods[self.method_slot(slot)?];
                match method.code(&class.constants)? {
                    Some(code) => Ok(Some(disassemble(&code, &class.constants)?)),
                    None => Ok(None),
                }
            })
    }

    /// Compile `source` and run an edit of the method body with the result
    fn splice<R>(
        &self,
        edit: impl FnOnce(
            &mut ClassFile,
            usize,
            &dyn crate::compile::FragmentCompiler,
        ) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let compiler = self.entity.compiler()?;
        self.entity
            .edit_member(&self.name, &self.descriptor, |class, slot| {
                let idx = self.method_slot(slot)?;
                edit(class, idx, compiler.as_ref())
            })
    }

    /// Run `source` on entry to the method
    ///
    /// In constructors the code goes right after the `super(...)` or `this(...)` call.
    pub fn insert_before(&self, source: &str) -> Result<(), Error> {
        self.splice(|class, idx, compiler| splice::insert_before(class, idx, compiler, source))
    }

    /// Run `source` whenever the method returns, and also when it throws if `as_finally` is set
    ///
    /// The return value (if any) is available to the code as `$result`, and may be replaced by
    /// storing into it. The code is shared through a subroutine in class files old enough to
    /// allow `jsr`, and copied to every exit otherwise.
    pub fn insert_after(&self, source: &str, as_finally: bool) -> Result<(), Error> {
        self.insert_after_with(source, as_finally, ReturnStrategy::Auto)
    }

    pub fn insert_after_with(
        &self,
        source: &str,
        as_finally: bool,
        strategy: ReturnStrategy,
    ) -> Result<(), Error> {
        self.splice(|class, idx, compiler| {
            splice::insert_after(class, idx, compiler, source, as_finally, strategy)
        })
    }

    /// Wrap the whole method body in a handler for `exception_type`
    ///
    /// The handler code sees the exception as `$exception`, and must end by returning or
    /// throwing.
    pub fn add_catch(&self, source: &str, exception_type: &str) -> Result<(), Error> {
        let exception_type = exception_type.replace('.', "/");
        self.splice(|class, idx, compiler| {
            splice::add_catch(class, idx, compiler, source, &exception_type)
        })
    }

    /// Insert `source` at the start of a source line, returning the line actually used (the
    /// first line at or after `line` that has code)
    pub fn insert_at_line(&self, line: u16, source: &str) -> Result<u16, Error> {
        self.splice(|class, idx, compiler| {
            splice::insert_at_line(class, idx, compiler, line, source)
        })
    }

    /// Replace the method body (turning `abstract` and `native` methods into ordinary ones)
    pub fn set_body(&self, source: &str) -> Result<(), Error> {
        self.splice(|class, idx, compiler| splice::set_body(class, idx, compiler, source))
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Member) -> bool {
        Arc::ptr_eq(&self.entity, &other.entity)
            && self.name == other.name
            && self.descriptor == other.descriptor
    }
}

impl Eq for Member {}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.entity.name(), self.name, self.descriptor)
    }
}
