use super::{internal, referenced_member, set_operand, TransformContext, Transformer};
use crate::jvm::class_file::{MemberRef, MemberRefKind};
use crate::jvm::code::opcodes;
use crate::jvm::code::{CodeEditor, Instruction, InvokeType, Item};
use crate::jvm::Error;

/// Field picked out by its declaring class and name
#[derive(Clone, Debug)]
struct FieldTarget {
    class: String,
    name: String,
}

impl FieldTarget {
    fn new(class: &str, name: &str) -> FieldTarget {
        FieldTarget {
            class: internal(class),
            name: name.to_owned(),
        }
    }

    fn matches(&self, member: &MemberRef) -> bool {
        member.kind == MemberRefKind::Field && member.class == self.class && member.name == self.name
    }

    /// Opcode and descriptor of the instruction at `index`, if it accesses this field
    fn accessed_by(
        &self,
        item: &Item,
        context: &TransformContext,
    ) -> Result<Option<(u8, String)>, Error> {
        Ok(match referenced_member(item, &*context.constants)? {
            Some((opcode, member)) if self.matches(&member) => {
                Some((opcode, member.descriptor.to_owned()))
            }
            _ => None,
        })
    }
}

fn is_wide(descriptor: &str) -> bool {
    matches!(descriptor.as_bytes().first(), Some(b'J' | b'D'))
}

/// Make every access to a field go to another field of the same type instead
#[derive(Clone, Debug)]
pub struct RedirectFieldAccess {
    target: FieldTarget,
    new_class: String,
    new_name: String,
}

impl RedirectFieldAccess {
    pub fn new(class: &str, name: &str, new_class: &str, new_name: &str) -> RedirectFieldAccess {
        RedirectFieldAccess {
            target: FieldTarget::new(class, name),
            new_class: internal(new_class),
            new_name: new_name.to_owned(),
        }
    }
}

impl Transformer for RedirectFieldAccess {
    fn transform(
        &mut self,
        editor: &mut CodeEditor,
        index: usize,
        context: &mut TransformContext,
    ) -> Result<usize, Error> {
        if let Some((_, descriptor)) = self.target.accessed_by(&editor.items[index], context)? {
            let field = context
                .constants
                .get_field_ref(&self.new_class, &self.new_name, &descriptor)?;
            set_operand(&mut editor.items[index], field.0 .0);
            context.mark_changed();
        }
        Ok(index)
    }
}

/// Replace reads of a field with calls to a static reader method
///
/// The reader takes the object whose field is read (`null` for static fields) and returns the
/// value: `static T reader(Object target)`.
#[derive(Clone, Debug)]
pub struct ReplaceFieldRead {
    target: FieldTarget,
    reader_class: String,
    reader_method: String,
}

impl ReplaceFieldRead {
    pub fn new(class: &str, name: &str, reader_class: &str, reader_method: &str) -> ReplaceFieldRead {
        ReplaceFieldRead {
            target: FieldTarget::new(class, name),
            reader_class: internal(reader_class),
            reader_method: reader_method.to_owned(),
        }
    }
}

impl Transformer for ReplaceFieldRead {
    fn transform(
        &mut self,
        editor: &mut CodeEditor,
        index: usize,
        context: &mut TransformContext,
    ) -> Result<usize, Error> {
        let (opcode, descriptor) = match self.target.accessed_by(&editor.items[index], context)? {
            Some((opcode @ (opcodes::GETFIELD | opcodes::GETSTATIC), descriptor)) => {
                (opcode, descriptor)
            }
            _ => return Ok(index),
        };
        let reader = context.constants.get_method_ref(
            &self.reader_class,
            &self.reader_method,
            &format!("(Ljava/lang/Object;){}", descriptor),
            false,
        )?;
        let call = Item::from(Instruction::Invoke(InvokeType::Static, reader));
        context.mark_changed();

        if opcode == opcodes::GETFIELD {
            editor.items[index] = call;
            Ok(index)
        } else {
            editor
                .items
                .splice(index..index + 1, [Item::from(Instruction::AConstNull), call]);
            Ok(index + 1)
        }
    }

    fn extra_stack(&self) -> u16 {
        1
    }
}

/// Replace writes to a field with calls to a static writer method
///
/// The writer takes the object whose field is written (`null` for static fields) and the new
/// value: `static void writer(Object target, T value)`.
#[derive(Clone, Debug)]
pub struct ReplaceFieldWrite {
    target: FieldTarget,
    writer_class: String,
    writer_method: String,
}

impl ReplaceFieldWrite {
    pub fn new(
        class: &str,
        name: &str,
        writer_class: &str,
        writer_method: &str,
    ) -> ReplaceFieldWrite {
        ReplaceFieldWrite {
            target: FieldTarget::new(class, name),
            writer_class: internal(writer_class),
            writer_method: writer_method.to_owned(),
        }
    }
}

impl Transformer for ReplaceFieldWrite {
    fn transform(
        &mut self,
        editor: &mut CodeEditor,
        index: usize,
        context: &mut TransformContext,
    ) -> Result<usize, Error> {
        let (opcode, descriptor) = match self.target.accessed_by(&editor.items[index], context)? {
            Some((opcode @ (opcodes::PUTFIELD | opcodes::PUTSTATIC), descriptor)) => {
                (opcode, descriptor)
            }
            _ => return Ok(index),
        };
        let writer = context.constants.get_method_ref(
            &self.writer_class,
            &self.writer_method,
            &format!("(Ljava/lang/Object;{})V", descriptor),
            false,
        )?;
        let call = Item::from(Instruction::Invoke(InvokeType::Static, writer));
        context.mark_changed();

        if opcode == opcodes::PUTFIELD {
            editor.items[index] = call;
            return Ok(index);
        }

        // Slide a `null` target in under the value
        let mut replacement: Vec<Item> = vec![Instruction::AConstNull.into()];
        if is_wide(&descriptor) {
            replacement.push(Instruction::DupX2.into());
            replacement.push(Instruction::Pop.into());
        } else {
            replacement.push(Instruction::Swap.into());
        }
        replacement.push(call);
        let last = index + replacement.len() - 1;
        editor.items.splice(index..index + 1, replacement);
        Ok(last)
    }

    fn extra_stack(&self) -> u16 {
        2
    }
}

#[cfg(test)]
mod test {
    use super::super::TransformerChain;
    use super::*;
    use crate::jvm::class_file::Version;
    use crate::jvm::MethodAccessFlags;
    use crate::splice::test::{class_with, listing};

    const STATIC: MethodAccessFlags = MethodAccessFlags::STATIC;

    fn lines(text: String) -> Vec<String> {
        text.lines().map(|line| line.trim().to_owned()).collect()
    }

    #[test]
    fn redirected_accesses() {
        let mut class = class_with(
            Version::JAVA8,
            &[(
                "bump",
                "(La/A;)V",
                STATIC,
                "aload_0; aload_0; getfield a/A.count:I; iconst_1; iadd
                 putfield a/A.count:I; return",
            )],
        );
        let mut chain = TransformerChain::new();
        chain.push(RedirectFieldAccess::new("a.A", "count", "a/B", "total"));
        chain.apply_to_class(&mut class).unwrap();

        let text = listing(&class, 0);
        assert!(text.contains("2: getfield a/B.total:I"));
        assert!(text.contains("7: putfield a/B.total:I"));
        assert!(!text.contains("a/A.count"));
    }

    #[test]
    fn reads_become_reader_calls() {
        let mut class = class_with(
            Version::JAVA8,
            &[
                ("get", "(La/A;)I", STATIC, "aload_0; getfield a/A.count:I; ireturn"),
                ("peek", "()I", STATIC, "getstatic a/A.count:I; ireturn"),
            ],
        );
        let mut chain = TransformerChain::new();
        chain.push(ReplaceFieldRead::new("a/A", "count", "a/Hooks", "readCount"));
        assert_eq!(chain.apply_to_class(&mut class).unwrap(), 2);

        assert_eq!(
            lines(listing(&class, 0)),
            vec![
                "0: aload_0",
                "1: invokestatic a/Hooks.readCount:(Ljava/lang/Object;)I",
                "4: ireturn",
            ]
        );
        assert_eq!(
            lines(listing(&class, 1)),
            vec![
                "0: aconst_null",
                "1: invokestatic a/Hooks.readCount:(Ljava/lang/Object;)I",
                "4: ireturn",
            ]
        );
    }

    #[test]
    fn writes_become_writer_calls() {
        let mut class = class_with(
            Version::JAVA8,
            &[
                ("put", "(J)V", STATIC, "lload_0; putstatic a/A.total:J; return"),
                ("set", "(La/A;I)V", STATIC, "aload_0; iload_1; putfield a/A.count:I; return"),
                ("flag", "(I)V", STATIC, "iload_0; putstatic a/A.count:I; return"),
            ],
        );
        let mut chain = TransformerChain::new();
        chain
            .push(ReplaceFieldWrite::new("a/A", "total", "a/Hooks", "writeTotal"))
            .push(ReplaceFieldWrite::new("a/A", "count", "a/Hooks", "writeCount"));
        assert_eq!(chain.apply_to_class(&mut class).unwrap(), 3);

        assert_eq!(
            lines(listing(&class, 0)),
            vec![
                "0: lload_0",
                "1: aconst_null",
                "2: dup_x2",
                "3: pop",
                "4: invokestatic a/Hooks.writeTotal:(Ljava/lang/Object;J)V",
                "7: return",
            ]
        );
        let code = class.methods[0].code(&class.constants).unwrap().unwrap();
        assert_eq!(code.max_stack, 4);

        assert!(listing(&class, 1).contains("2: invokestatic a/Hooks.writeCount:(Ljava/lang/Object;I)V"));
        assert_eq!(
            lines(listing(&class, 2)),
            vec![
                "0: iload_0",
                "1: aconst_null",
                "2: swap",
                "3: invokestatic a/Hooks.writeCount:(Ljava/lang/Object;I)V",
                "6: return",
            ]
        );
    }
}
