use super::{internal, referenced_member, TransformContext, Transformer};
use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex};
use crate::jvm::code::opcodes::{self, operand_u16};
use crate::jvm::code::{CodeEditor, Instruction, InvokeType, Item};
use crate::jvm::Error;

/// Replace instantiations of a class with calls to a static factory method
///
/// `new T; dup; <arguments>; invokespecial T.<init>(A)V` becomes
/// `<arguments>; invokestatic F.m(A)T`, so the factory must take exactly the constructor's
/// parameters. Instantiations not immediately followed by `dup` cannot be rewritten.
#[derive(Clone, Debug)]
pub struct ReplaceNew {
    class: String,
    factory_class: String,
    factory_method: String,

    /// Instantiations seen whose constructor call has not been reached yet
    pending: usize,
}

impl ReplaceNew {
    pub fn new(class: &str, factory_class: &str, factory_method: &str) -> ReplaceNew {
        ReplaceNew {
            class: internal(class),
            factory_class: internal(factory_class),
            factory_method: factory_method.to_owned(),
            pending: 0,
        }
    }
}

impl Transformer for ReplaceNew {
    fn start_method(&mut self) {
        self.pending = 0;
    }

    fn transform(
        &mut self,
        editor: &mut CodeEditor,
        index: usize,
        context: &mut TransformContext,
    ) -> Result<usize, Error> {
        let (opcode, operand) = match &editor.items[index] {
            Item::Op(bytes) => (bytes.first().copied(), operand_u16(bytes)),
            _ => return Ok(index),
        };
        match opcode {
            Some(opcodes::NEW) => {
                let class_index = operand.ok_or_else(|| Error::malformed("truncated new"))?;
                let class = context
                    .constants
                    .class_name(ClassConstantIndex(ConstantIndex(class_index)))?;
                if class != self.class {
                    return Ok(index);
                }

                let dup = editor.items[index + 1..]
                    .iter()
                    .position(|item| !matches!(item, Item::Mark(_)))
                    .map(|offset| index + 1 + offset)
                    .filter(|dup| editor.items[*dup].opcode() == Some(opcodes::DUP))
                    .ok_or_else(|| {
                        Error::cannot_compile(format!(
                            "`new {}` in {} is not followed by `dup`",
                            self.class, context.class_name
                        ))
                    })?;

                // Both instructions go, leaving only their positions behind
                let gone = editor.fresh_label();
                editor.items[dup] = Item::Mark(gone);
                let gone = editor.fresh_label();
                editor.items[index] = Item::Mark(gone);
                self.pending += 1;
                context.mark_changed();
                Ok(index)
            }
            Some(opcodes::INVOKESPECIAL) if self.pending > 0 => {
                let descriptor = match referenced_member(&editor.items[index], &*context.constants)? {
                    Some((_, member)) if member.class == self.class && member.name == "<init>" => {
                        member.descriptor.to_owned()
                    }
                    _ => return Ok(index),
                };
                let parameters = descriptor.strip_suffix('V').ok_or_else(|| {
                    Error::malformed(format!("constructor descriptor {} is not void", descriptor))
                })?;
                let factory_descriptor = format!("{}L{};", parameters, self.class);
                let factory = context.constants.get_method_ref(
                    &self.factory_class,
                    &self.factory_method,
                    &factory_descriptor,
                    false,
                )?;
                editor.items[index] = Instruction::Invoke(InvokeType::Static, factory).into();
                self.pending -= 1;
                context.mark_changed();
                Ok(index)
            }
            _ => Ok(index),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::TransformerChain;
    use super::*;
    use crate::jvm::class_file::Version;
    use crate::jvm::MethodAccessFlags;
    use crate::splice::test::{class_with, listing};

    #[test]
    fn instantiation_becomes_factory_call() {
        let mut class = class_with(
            Version::JAVA8,
            &[(
                "make",
                "()Ljava/lang/Object;",
                MethodAccessFlags::STATIC,
                "new java/lang/StringBuilder; dup; ldc \"x\"
                 invokespecial java/lang/StringBuilder.<init>:(Ljava/lang/String;)V
                 areturn",
            )],
        );
        let mut chain = TransformerChain::new();
        chain.push(ReplaceNew::new("java.lang.StringBuilder", "a/Factory", "builder"));
        assert_eq!(chain.apply_to_class(&mut class).unwrap(), 1);

        let lines: Vec<String> = listing(&class, 0)
            .lines()
            .map(|line| line.trim().to_owned())
            .collect();
        assert_eq!(
            lines,
            vec![
                "0: ldc \"x\"",
                "2: invokestatic a/Factory.builder:(Ljava/lang/String;)Ljava/lang/StringBuilder;",
                "5: areturn",
            ]
        );
    }

    #[test]
    fn nested_instantiations_pair_up() {
        // new T(new T())
        let mut class = class_with(
            Version::JAVA8,
            &[(
                "make",
                "()La/T;",
                MethodAccessFlags::STATIC,
                "new a/T; dup
                 new a/T; dup; invokespecial a/T.<init>:()V
                 invokespecial a/T.<init>:(La/T;)V
                 areturn",
            )],
        );
        let mut chain = TransformerChain::new();
        chain.push(ReplaceNew::new("a/T", "a/Factory", "create"));
        chain.apply_to_class(&mut class).unwrap();

        let lines: Vec<String> = listing(&class, 0)
            .lines()
            .map(|line| line.trim().to_owned())
            .collect();
        assert_eq!(
            lines,
            vec![
                "0: invokestatic a/Factory.create:()La/T;",
                "3: invokestatic a/Factory.create:(La/T;)La/T;",
                "6: areturn",
            ]
        );
    }

    #[test]
    fn other_constructor_calls_are_kept() {
        let mut class = class_with(
            Version::JAVA8,
            &[(
                "<init>",
                "()V",
                MethodAccessFlags::PUBLIC,
                "aload_0; invokespecial a/T.<init>:()V; return",
            )],
        );
        let mut chain = TransformerChain::new();
        chain.push(ReplaceNew::new("a/T", "a/Factory", "create"));
        assert_eq!(chain.apply_to_class(&mut class).unwrap(), 0);
    }
}
