use super::edit_body;
use crate::compile::FragmentCompiler;
use crate::jvm::class_file::{
    find_attribute, AttributeLike, ClassFile, Code, ConstantIndex, ConstantPool, ConstantValue,
    Method,
};
use crate::jvm::code::opcodes;
use crate::jvm::code::{Instruction, Item};
use crate::jvm::{Error, FieldAccessFlags, MethodAccessFlags};
use crate::model::FieldInitializer;
use log::debug;

/// Initializer of a field added since the class was last frozen
#[derive(Clone, Debug, PartialEq)]
pub struct PendingInitializer {
    pub field_name: String,
    pub descriptor: String,
    pub initializer: FieldInitializer,
}

/// Make the class set the initial values of newly added fields
///
/// Constants for `static final` fields become `ConstantValue` attributes. Other static fields are
/// assigned at the start of `<clinit>` (which is created if needed), and instance fields right
/// after the `super(...)` call of each constructor not delegating to `this(...)`. Assignments
/// happen in the order the fields were added.
pub fn weave_initializers(
    class: &mut ClassFile,
    initializers: &[PendingInitializer],
    compiler: Option<&dyn FragmentCompiler>,
) -> Result<(), Error> {
    let mut statics = vec![];
    let mut instance = vec![];
    for pending in initializers {
        let field = find_field(class, pending)?;
        let flags = class.fields[field].access_flags;
        if !flags.contains(FieldAccessFlags::STATIC) {
            instance.push(pending);
        } else if flags.contains(FieldAccessFlags::FINAL) && pending.initializer.is_constant() {
            set_constant_value(class, field, &pending.initializer)?;
        } else {
            statics.push(pending);
        }
    }

    if !statics.is_empty() {
        let clinit = class_initializer(class)?;
        assign_fields(class, clinit, &statics, compiler)?;
    }
    if !instance.is_empty() {
        for idx in 0..class.methods.len() {
            if class.methods[idx].name(&class.constants)? == "<init>" {
                assign_fields(class, idx, &instance, compiler)?;
            }
        }
    }
    debug!(
        "wove {} field initializers into {}",
        initializers.len(),
        class.name()?
    );
    Ok(())
}

fn find_field(class: &ClassFile, pending: &PendingInitializer) -> Result<usize, Error> {
    for (idx, field) in class.fields.iter().enumerate() {
        if field.name(&class.constants)? == pending.field_name
            && field.descriptor(&class.constants)? == pending.descriptor
        {
            return Ok(idx);
        }
    }
    Err(Error::NotFound(format!(
        "{}.{}:{}",
        class.name()?,
        pending.field_name,
        pending.descriptor
    )))
}

fn set_constant_value(
    class: &mut ClassFile,
    field: usize,
    initializer: &FieldInitializer,
) -> Result<(), Error> {
    let constants = &mut class.constants;
    let index: ConstantIndex = match initializer {
        FieldInitializer::Int(int) => constants.get_integer(*int)?,
        FieldInitializer::Long(long) => constants.get_long(*long)?,
        FieldInitializer::Float(float) => constants.get_float(*float)?,
        FieldInitializer::Double(double) => constants.get_double(*double)?,
        FieldInitializer::String(string) => constants.get_string(string)?.0,
        FieldInitializer::Code(_) => {
            return Err(Error::cannot_compile("code cannot be a constant value"))
        }
    };
    let attribute = constants.get_attribute(&ConstantValue(index))?;
    let attributes = &mut class.fields[field].attributes;
    match find_attribute(attributes, &class.constants, ConstantValue::NAME)? {
        Some(existing) => attributes[existing] = attribute,
        None => attributes.push(attribute),
    }
    Ok(())
}

/// Index of `<clinit>`, adding an empty one if the class has none
fn class_initializer(class: &mut ClassFile) -> Result<usize, Error> {
    if let Some(idx) = class.find_method("<clinit>", "()V")? {
        return Ok(idx);
    }
    let name_index = class.constants.get_utf8("<clinit>")?;
    let descriptor_index = class.constants.get_utf8("()V")?;
    let mut method = Method {
        access_flags: MethodAccessFlags::STATIC,
        name_index,
        descriptor_index,
        attributes: vec![],
    };
    let code = Code {
        max_stack: 0,
        max_locals: 0,
        code_array: vec![opcodes::RETURN],
        exception_table: vec![],
        attributes: vec![],
    };
    method.set_code(&mut class.constants, &code)?;
    class.methods.push(method);
    Ok(class.methods.len() - 1)
}

/// Assign every field at the entry point of one method, in order
fn assign_fields(
    class: &mut ClassFile,
    method: usize,
    fields: &[&PendingInitializer],
    compiler: Option<&dyn FragmentCompiler>,
) -> Result<(), Error> {
    edit_body(class, method, |body| {
        let (mut at, delegates) = body.entry_point()?;
        if delegates {
            return Ok(());
        }
        let is_static = body.context.is_static;
        let this_class = body.context.class_name.clone();
        for pending in fields {
            let receiver = if is_static {
                0
            } else {
                body.editor.items.insert(at, Instruction::ALoad(0).into());
                at += 1;
                1
            };

            let value_stack = match &pending.initializer {
                FieldInitializer::Code(source) => {
                    let compiler = compiler.ok_or_else(|| {
                        Error::cannot_compile(format!(
                            "no fragment compiler for the initializer of {}",
                            pending.field_name
                        ))
                    })?;
                    let fragment = body.compile(compiler, source)?;
                    let (_, end) = body.editor.insert_fragment(at, &fragment);
                    at = body
                        .editor
                        .position(end)
                        .ok_or_else(|| Error::malformed("spliced fragment lost its end"))?
                        + 1;
                    body.editor.max_locals = body.editor.max_locals.max(fragment.max_locals);
                    fragment.max_stack
                }
                constant => {
                    let push = push_constant(constant, &mut body.constants)?;
                    body.editor.items.insert(at, push.into());
                    at += 1;
                    if matches!(constant, FieldInitializer::Long(_) | FieldInitializer::Double(_)) {
                        2
                    } else {
                        1
                    }
                }
            };

            let field = body
                .constants
                .get_field_ref(&this_class, &pending.field_name, &pending.descriptor)?;
            let store = if is_static {
                Instruction::PutStatic(field)
            } else {
                Instruction::PutField(field)
            };
            body.editor.items.insert(at, Item::from(store));
            at += 1;

            let needed = receiver + value_stack;
            body.editor.max_stack = body.editor.max_stack.max(needed);
        }
        Ok(())
    })
}

/// Instruction pushing a constant initializer
fn push_constant(
    initializer: &FieldInitializer,
    constants: &mut ConstantPool,
) -> Result<Instruction, Error> {
    let insn = match initializer {
        FieldInitializer::Int(int) => match Instruction::push_int(*int) {
            Some(insn) => insn,
            None => Instruction::Ldc(constants.get_integer(*int)?),
        },
        FieldInitializer::Long(0) => Instruction::LConst0,
        FieldInitializer::Long(1) => Instruction::LConst1,
        FieldInitializer::Long(long) => Instruction::Ldc2(constants.get_long(*long)?),
        FieldInitializer::Float(float) if float.to_bits() == 0 => Instruction::FConst0,
        FieldInitializer::Float(float) if *float == 1.0 => Instruction::FConst1,
        FieldInitializer::Float(float) if *float == 2.0 => Instruction::FConst2,
        FieldInitializer::Float(float) => Instruction::Ldc(constants.get_float(*float)?),
        FieldInitializer::Double(double) if double.to_bits() == 0 => Instruction::DConst0,
        FieldInitializer::Double(double) if *double == 1.0 => Instruction::DConst1,
        FieldInitializer::Double(double) => Instruction::Ldc2(constants.get_double(*double)?),
        FieldInitializer::String(string) => Instruction::Ldc(constants.get_string(string)?.0),
        FieldInitializer::Code(_) => {
            return Err(Error::cannot_compile("code initializers are compiled, not pushed"))
        }
    };
    Ok(insn)
}

#[cfg(test)]
mod test {
    use super::super::test::{class_with, listing};
    use super::*;
    use crate::compile::Assembler;
    use crate::jvm::class_file::{Field, Version};

    fn add_field(class: &mut ClassFile, name: &str, descriptor: &str, flags: FieldAccessFlags) {
        let name_index = class.constants.get_utf8(name).unwrap();
        let descriptor_index = class.constants.get_utf8(descriptor).unwrap();
        class.fields.push(Field {
            access_flags: flags,
            name_index,
            descriptor_index,
            attributes: vec![],
        });
    }

    fn pending(name: &str, descriptor: &str, initializer: FieldInitializer) -> PendingInitializer {
        PendingInitializer {
            field_name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            initializer,
        }
    }

    #[test]
    fn static_constants_and_class_initializer() {
        let mut class = class_with(Version::JAVA8, &[]);
        let constant = FieldAccessFlags::STATIC | FieldAccessFlags::FINAL;
        add_field(&mut class, "MAX", "J", constant);
        add_field(&mut class, "name", "Ljava/lang/String;", FieldAccessFlags::STATIC);
        add_field(&mut class, "count", "I", FieldAccessFlags::STATIC);

        weave_initializers(
            &mut class,
            &[
                pending("MAX", "J", FieldInitializer::Long(1 << 40)),
                pending("name", "Ljava/lang/String;", FieldInitializer::String("x".into())),
                pending("count", "I", FieldInitializer::Code("bipush 42".into())),
            ],
            Some(&Assembler),
        )
        .unwrap();

        assert_eq!(class.fields[0].attributes.len(), 1);
        let clinit = class.find_method("<clinit>", "()V").unwrap().unwrap();
        let lines: Vec<String> = listing(&class, clinit)
            .lines()
            .map(|line| line.trim().to_owned())
            .collect();
        assert_eq!(
            lines,
            vec![
                "0: ldc \"x\"",
                "2: putstatic a/A.name:Ljava/lang/String;",
                "5: bipush 42",
                "7: putstatic a/A.count:I",
                "10: return",
            ]
        );
    }

    #[test]
    fn instance_fields_skip_delegating_constructors() {
        let mut class = class_with(
            Version::JAVA8,
            &[
                (
                    "<init>",
                    "()V",
                    MethodAccessFlags::PUBLIC,
                    "aload_0; invokespecial java/lang/Object.<init>:()V; return",
                ),
                (
                    "<init>",
                    "(I)V",
                    MethodAccessFlags::PUBLIC,
                    "aload_0; invokespecial this.<init>:()V; return",
                ),
            ],
        );
        add_field(&mut class, "d", "D", FieldAccessFlags::PRIVATE);
        weave_initializers(
            &mut class,
            &[pending("d", "D", FieldInitializer::Double(2.5))],
            None,
        )
        .unwrap();

        let first = listing(&class, 0);
        assert!(first.contains("    4: aload_0\n    5: ldc2_w 2.5d\n    8: putfield a/A.d:D\n"));
        let code = class.methods[0].code(&class.constants).unwrap().unwrap();
        assert_eq!(code.max_stack, 3);
        assert!(!listing(&class, 1).contains("putfield"));

        assert!(matches!(
            weave_initializers(
                &mut class,
                &[pending("d", "D", FieldInitializer::Code("dconst_0".into()))],
                None,
            ),
            Err(Error::CannotCompile(_))
        ));
    }
}
