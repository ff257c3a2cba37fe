//! Rewriting instructions that refer to particular classes, fields, or methods
//!
//! A [`TransformerChain`] walks every method body of a class exactly once. Each instruction is
//! offered to every [`Transformer`] in the order they were added, and each transformer passes on
//! the index of the instruction the next one should look at (which moves when a transformer
//! inserts code in front of it). Nothing is ever revisited: code inserted by a transformer is not
//! seen by any transformer, including itself.
//!
//! Either the whole class is transformed or none of it is. Method bodies without a matching
//! instruction are left byte-for-byte alone.

mod calls;
mod fields;
mod instantiation;

pub use calls::{InsertBeforeCall, RedirectMethodCall};
pub use fields::{RedirectFieldAccess, ReplaceFieldRead, ReplaceFieldWrite};
pub use instantiation::ReplaceNew;

use crate::jvm::class_file::{ClassFile, ConstantIndex, ConstantPool, MemberRef};
use crate::jvm::code::opcodes::{self, operand_u16};
use crate::jvm::code::{CodeEditor, Frame, Item};
use crate::jvm::{Error, MethodAccessFlags};
use crate::model::ClassEntity;
use log::debug;

/// Rewrite rule for instructions of one family, aimed at one class or member
pub trait Transformer: Send + Sync {
    /// Called before the chain moves on to the next method body
    fn start_method(&mut self) {}

    /// Inspect the item at `index`, possibly rewriting it
    ///
    /// Returns the index at which the (possibly rewritten) instruction now sits. Transformers
    /// later in the chain look at that index, and the pass continues right after it.
    fn transform(
        &mut self,
        editor: &mut CodeEditor,
        index: usize,
        context: &mut TransformContext,
    ) -> Result<usize, Error>;

    /// Local variable slots needed on top of those of the original body
    fn extra_locals(&self) -> u16 {
        0
    }

    /// Operand stack slots needed on top of the original maximum
    fn extra_stack(&self) -> u16 {
        0
    }
}

/// State shared by the transformers working on one method body
pub struct TransformContext<'a> {
    /// Class being transformed, in internal form
    pub class_name: &'a str,

    /// Scratch copy of the class constant pool
    pub constants: &'a mut ConstantPool,

    /// First local slot the transformers may use for themselves
    pub free_local: u16,

    changed: bool,
}

impl TransformContext<'_> {
    /// Record that the body needs to be laid out again
    pub fn mark_changed(&mut self) {
        self.changed = true;
    }
}

/// Transformers applied together, in one pass per method
#[derive(Default)]
pub struct TransformerChain {
    transformers: Vec<Box<dyn Transformer>>,
}

impl TransformerChain {
    pub fn new() -> TransformerChain {
        TransformerChain::default()
    }

    /// Add a transformer at the end of the chain
    pub fn push(&mut self, transformer: impl Transformer + 'static) -> &mut TransformerChain {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Largest number of extra locals any transformer asks for
    pub fn extra_locals(&self) -> u16 {
        self.transformers
            .iter()
            .map(|transformer| transformer.extra_locals())
            .max()
            .unwrap_or(0)
    }

    /// Largest number of extra stack slots any transformer asks for
    pub fn extra_stack(&self) -> u16 {
        self.transformers
            .iter()
            .map(|transformer| transformer.extra_stack())
            .max()
            .unwrap_or(0)
    }

    /// Transform every method of a class entity, returning how many methods were rewritten
    pub fn apply(&mut self, entity: &ClassEntity) -> Result<usize, Error> {
        entity.edit_class(|class| self.apply_to_class(class))
    }

    /// Transform every method of a class file, returning how many methods were rewritten
    ///
    /// On failure the class file is left untouched.
    pub fn apply_to_class(&mut self, class: &mut ClassFile) -> Result<usize, Error> {
        let class_name = class.name()?.to_owned();
        let extra_locals = self.extra_locals();
        let extra_stack = self.extra_stack();
        let mut constants = class.constants.clone();
        let mut rewritten = vec![];

        for (idx, method) in class.methods.iter().enumerate() {
            let code = match method.code(&constants)? {
                Some(code) => code,
                None => continue,
            };
            let mut editor = CodeEditor::decode(&code, &constants)?;
            let mut context = TransformContext {
                class_name: &class_name,
                constants: &mut constants,
                free_local: code.max_locals,
                changed: false,
            };

            for transformer in &mut self.transformers {
                transformer.start_method();
            }
            let mut index = 0;
            while index < editor.items.len() {
                if !matches!(editor.items[index], Item::Mark(_)) {
                    for transformer in &mut self.transformers {
                        index = transformer.transform(&mut editor, index, &mut context)?;
                    }
                }
                index += 1;
            }
            if !context.changed {
                continue;
            }

            let locals = editor.max_locals as usize + extra_locals as usize;
            editor.max_locals =
                u16::try_from(locals).map_err(|_| Error::MaxLocalsOverflow(locals))?;
            let stack = editor.max_stack as usize + extra_stack as usize;
            editor.max_stack = u16::try_from(stack).map_err(|_| Error::MaxStackOverflow(stack))?;

            if class.version.requires_stack_maps() {
                let entry = Frame::method_entry(
                    &class_name,
                    method.name(&constants)?,
                    method.descriptor(&constants)?,
                    method.access_flags.contains(MethodAccessFlags::STATIC),
                )?;
                editor.compute_frames(&entry, &class_name, &constants)?;
            }
            let code = editor.assemble(&mut constants)?;
            let mut edited = method.clone();
            edited.set_code(&mut constants, &code)?;
            debug!(
                "transformed {}.{}{}",
                class_name,
                method.name(&constants)?,
                method.descriptor(&constants)?
            );
            rewritten.push((idx, edited));
        }

        let count = rewritten.len();
        if count > 0 {
            class.constants = constants;
            for (idx, method) in rewritten {
                class.methods[idx] = method;
            }
        }
        Ok(count)
    }
}

/// Opcode and referenced member of a field access or method invocation
fn referenced_member<'c>(
    item: &Item,
    constants: &'c ConstantPool,
) -> Result<Option<(u8, MemberRef<'c>)>, Error> {
    let bytes = match item {
        Item::Op(bytes) => bytes,
        _ => return Ok(None),
    };
    match bytes.first().copied() {
        Some(
            opcode @ (opcodes::GETSTATIC
            | opcodes::PUTSTATIC
            | opcodes::GETFIELD
            | opcodes::PUTFIELD
            | opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC
            | opcodes::INVOKEINTERFACE),
        ) => {
            let index = operand_u16(bytes)
                .ok_or_else(|| Error::malformed(format!("truncated instruction {:#04x}", opcode)))?;
            Ok(Some((opcode, constants.member_ref(ConstantIndex(index))?)))
        }
        _ => Ok(None),
    }
}

/// Point the constant pool operand of an instruction at another entry
fn set_operand(item: &mut Item, index: u16) {
    if let Item::Op(bytes) = item {
        if bytes.len() >= 3 {
            bytes[1..3].copy_from_slice(&index.to_be_bytes());
        }
    }
}

/// Class name in internal form
fn internal(name: &str) -> String {
    name.replace('.', "/")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Version;
    use crate::jvm::MethodAccessFlags;
    use crate::splice::test::{class_with, listing};

    const STATIC: MethodAccessFlags = MethodAccessFlags::STATIC;

    #[test]
    fn untouched_methods_keep_their_code() {
        let mut class = class_with(
            Version::JAVA8,
            &[
                ("read", "()I", STATIC, "getstatic a/A.count:I; ireturn"),
                ("other", "()I", STATIC, "iconst_3; ireturn"),
            ],
        );
        let before = class.methods[1].clone();

        let mut chain = TransformerChain::new();
        chain.push(ReplaceFieldRead::new("a/A", "count", "a/Hooks", "readCount"));
        assert_eq!(chain.apply_to_class(&mut class).unwrap(), 1);
        assert_eq!(class.methods[1], before);

        // Nothing left to match the second time around
        assert_eq!(chain.apply_to_class(&mut class).unwrap(), 0);
    }

    #[test]
    fn later_transformers_see_rewritten_instructions() {
        let mut class = class_with(
            Version::JAVA8,
            &[("read", "()I", STATIC, "getstatic a/A.count:I; ireturn")],
        );
        let mut chain = TransformerChain::new();
        chain
            .push(ReplaceFieldRead::new("a/A", "count", "a/Hooks", "readCount"))
            .push(RedirectMethodCall::new(
                "a/Hooks",
                "readCount",
                "(Ljava/lang/Object;)I",
                "a/Tracing",
                "readCount",
            ));
        assert_eq!(chain.len(), 2);
        chain.apply_to_class(&mut class).unwrap();

        let lines: Vec<String> = listing(&class, 0)
            .lines()
            .map(|line| line.trim().to_owned())
            .collect();
        assert_eq!(
            lines,
            vec![
                "0: aconst_null",
                "1: invokestatic a/Tracing.readCount:(Ljava/lang/Object;)I",
                "4: ireturn",
            ]
        );
    }

    #[test]
    fn extra_locals_are_added_once() {
        let mut class = class_with(
            Version::JAVA8,
            &[(
                "run",
                "(La/Service;J)V",
                STATIC,
                "aload_0; lload_1; invokevirtual a/Service.submit:(J)V; return",
            )],
        );
        let mut chain = TransformerChain::new();
        chain
            .push(
                InsertBeforeCall::new("a/Service", "submit", "(J)V", "a/Hooks", "first").unwrap(),
            )
            .push(
                InsertBeforeCall::new("a/Service", "submit", "(J)V", "a/Hooks", "second").unwrap(),
            )
            .push(ReplaceFieldWrite::new("a/A", "total", "a/Hooks", "writeTotal"));
        assert_eq!(chain.extra_locals(), 3);
        assert_eq!(chain.extra_stack(), 2);
        chain.apply_to_class(&mut class).unwrap();

        let code = class.methods[0].code(&class.constants).unwrap().unwrap();
        assert_eq!(code.max_locals, 3 + 3);
        assert_eq!(code.max_stack, 3 + 2);
        let text = listing(&class, 0);
        assert_eq!(text.matches("invokestatic a/Hooks.first:(La/Service;J)V").count(), 1);
        assert_eq!(text.matches("invokestatic a/Hooks.second:(La/Service;J)V").count(), 1);
    }

    #[test]
    fn failure_leaves_class_alone() {
        let mut class = class_with(
            Version::JAVA8,
            &[
                ("read", "()I", STATIC, "getstatic a/A.count:I; ireturn"),
                (
                    "make",
                    "()Ljava/lang/Object;",
                    STATIC,
                    "new java/lang/Object; areturn",
                ),
            ],
        );
        let before = class.to_bytes().unwrap();

        let mut chain = TransformerChain::new();
        chain
            .push(ReplaceFieldRead::new("a/A", "count", "a/Hooks", "readCount"))
            .push(ReplaceNew::new("java.lang.Object", "a/Factory", "object"));
        assert!(matches!(
            chain.apply_to_class(&mut class),
            Err(Error::CannotCompile(_))
        ));
        assert_eq!(class.to_bytes().unwrap(), before);
    }
}
