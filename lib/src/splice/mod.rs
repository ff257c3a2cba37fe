//! Splicing compiled fragments into method bodies
//!
//! Every edit here is one transaction on one method: the body is decoded into a [`CodeEditor`]
//! working against a scratch copy of the constant pool, the source is compiled, the fragment is
//! spliced in, and the result is laid out again (with fresh stack map frames from version 51 on).
//! The method and the pool of the class are only replaced once all of that has succeeded, so a
//! failed edit leaves the class as it was.
//!
//! Constructors get special treatment: code "at the start" of a constructor goes right after the
//! call to `super(...)` or `this(...)`, since nothing may touch `this` before that call.

mod initializers;
mod returns;

pub use initializers::{weave_initializers, PendingInitializer};
pub use returns::{insert_after, ReturnStrategy};

use crate::compile::{CompileContext, Fragment, FragmentCompiler};
use crate::jvm::class_file::{ClassFile, Code, ConstantIndex, ConstantPool};
use crate::jvm::code::opcodes::{self, instruction_length, operand_u16};
use crate::jvm::code::{CodeEditor, Frame, Handler, Instruction, Item};
use crate::jvm::{Error, MethodAccessFlags, Version};
use log::debug;

/// Method body being edited, along with everything needed to compile code for it
pub(crate) struct BodyEdit {
    pub editor: CodeEditor,
    pub context: CompileContext,

    /// Scratch copy of the class constant pool
    pub constants: ConstantPool,
    pub version: Version,
    this_class: String,
}

impl BodyEdit {
    pub fn compile(&mut self, compiler: &dyn FragmentCompiler, source: &str) -> Result<Fragment, Error> {
        compiler.compile(source, &self.context, &mut self.constants)
    }

    /// Item index right after the `super(...)`/`this(...)` call of a constructor (`0` for other
    /// methods), and whether the call is to `this(...)`
    pub fn entry_point(&self) -> Result<(usize, bool), Error> {
        if self.context.method_name != "<init>" {
            return Ok((0, false));
        }
        let instructions = self
            .editor
            .items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| match item {
                Item::Op(bytes) => Some((idx, bytes.as_slice())),
                _ => None,
            });
        match constructor_call(instructions, &self.constants, &self.this_class)? {
            Some((idx, delegates)) => Ok((idx + 1, delegates)),
            None => Ok((0, false)),
        }
    }

    /// Raise the stack and local limits to what a fragment needs on top of `stack_below` values
    pub fn grow(&mut self, stack_below: u16, fragment: &Fragment) -> Result<(), Error> {
        let stack = stack_below
            .checked_add(fragment.max_stack)
            .ok_or(Error::MaxStackOverflow(stack_below as usize + fragment.max_stack as usize))?;
        self.editor.max_stack = self.editor.max_stack.max(stack);
        self.editor.max_locals = self.editor.max_locals.max(fragment.max_locals);
        Ok(())
    }
}

/// Run an edit on the body of `class.methods[method]`, committing the result only on success
pub(crate) fn edit_body<R>(
    class: &mut ClassFile,
    method: usize,
    edit: impl FnOnce(&mut BodyEdit) -> Result<R, Error>,
) -> Result<R, Error> {
    let this_class = class.name()?.to_owned();
    let target = class
        .methods
        .get(method)
        .ok_or_else(|| Error::NotFound(format!("method #{} of {}", method, this_class)))?;
    let name = target.name(&class.constants)?.to_owned();
    let descriptor = target.descriptor(&class.constants)?.to_owned();
    let code = target.code(&class.constants)?.ok_or_else(|| {
        Error::cannot_compile(format!(
            "no method body in {}.{}{}",
            this_class, name, descriptor
        ))
    })?;

    let is_static = target.access_flags.contains(MethodAccessFlags::STATIC);
    let mut context = CompileContext::new(&this_class, &name, &descriptor, is_static)?;
    context.max_locals = context.max_locals.max(code.max_locals);

    let constants = class.constants.clone();
    let mut body = BodyEdit {
        editor: CodeEditor::decode(&code, &constants)?,
        context,
        constants,
        version: class.version,
        this_class,
    };
    let result = edit(&mut body)?;

    if body.version.requires_stack_maps() {
        let entry = Frame::method_entry(&body.this_class, &name, &descriptor, is_static)?;
        body.editor
            .compute_frames(&entry, &body.this_class, &body.constants)?;
    }
    let code = body.editor.assemble(&mut body.constants)?;
    let mut edited = class.methods[method].clone();
    edited.set_code(&mut body.constants, &code)?;
    debug!(
        "rewrote {}.{}{} ({} bytes of code)",
        body.this_class,
        name,
        descriptor,
        code.code_array.len()
    );
    class.constants = body.constants;
    class.methods[method] = edited;
    Ok(result)
}

/// Find the call to `super(...)` or `this(...)` among a constructor's instructions
///
/// Calls to `<init>` that pair up with an earlier `new` construct some other object and are
/// skipped. Gives the key of the call, and whether it is to `this(...)`.
fn constructor_call<'a, K>(
    instructions: impl Iterator<Item = (K, &'a [u8])>,
    constants: &ConstantPool,
    this_class: &str,
) -> Result<Option<(K, bool)>, Error> {
    let mut pending_new = 0usize;
    for (key, bytes) in instructions {
        match bytes.first().copied() {
            Some(opcodes::NEW) => pending_new += 1,
            Some(opcodes::INVOKESPECIAL) => {
                let index = operand_u16(bytes)
                    .ok_or_else(|| Error::malformed("truncated invokespecial"))?;
                let member = constants.member_ref(ConstantIndex(index))?;
                if member.name != "<init>" {
                    continue;
                }
                if pending_new == 0 {
                    return Ok(Some((key, member.class == this_class)));
                }
                pending_new -= 1;
            }
            _ => (),
        }
    }
    Ok(None)
}

/// Insert code at the start of a method (after the `super(...)`/`this(...)` call in
/// constructors)
///
/// Jumps back to the first instruction of the original body do not run the new code again.
pub fn insert_before(
    class: &mut ClassFile,
    method: usize,
    compiler: &dyn FragmentCompiler,
    source: &str,
) -> Result<(), Error> {
    edit_body(class, method, |body| {
        let fragment = body.compile(compiler, source)?;
        let (at, _) = body.entry_point()?;
        body.editor.insert_fragment(at, &fragment);
        body.grow(0, &fragment)
    })
}

/// Add a handler for `exception_type` covering the whole body (after the constructor call in
/// constructors)
///
/// The exception is stored in a fresh local, available as `$exception`. The handler code must
/// not fall off its end.
pub fn add_catch(
    class: &mut ClassFile,
    method: usize,
    compiler: &dyn FragmentCompiler,
    source: &str,
    exception_type: &str,
) -> Result<(), Error> {
    edit_body(class, method, |body| {
        let exception_slot = body.context.max_locals;
        body.context.exception = Some(exception_slot);
        body.context.max_locals = exception_slot + 1;
        let fragment = body.compile(compiler, source)?;
        if !fragment.ends_in_jump() {
            return Err(Error::cannot_compile(format!(
                "handler for {} must end in a return, throw, or jump",
                exception_type
            )));
        }

        let (at, _) = body.entry_point()?;
        let start = body.editor.label_at(at);
        let end = body.editor.end_label();
        let catch_type = body.constants.get_class(exception_type)?;

        let handler = body.editor.fresh_label();
        body.editor.items.push(Item::Mark(handler));
        body.editor.items.push(Instruction::AStore(exception_slot).into());
        body.editor.append_fragment(&fragment);
        body.editor.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type,
        });

        body.grow(0, &fragment)?;
        body.editor.max_stack = body.editor.max_stack.max(1);
        body.editor.max_locals = body.editor.max_locals.max(exception_slot + 1);
        Ok(())
    })
}

/// Insert code at the start of a source line, as recorded in the `LineNumberTable`
///
/// The code goes at the first line at or after `line` that has any instructions, and that line
/// is returned. Jumps to the start of the line run the new code too.
pub fn insert_at_line(
    class: &mut ClassFile,
    method: usize,
    compiler: &dyn FragmentCompiler,
    line: u16,
    source: &str,
) -> Result<u16, Error> {
    edit_body(class, method, |body| {
        let mut best: Option<(u16, usize)> = None;
        for (label, number) in body.editor.line_numbers() {
            if number < line {
                continue;
            }
            let position = match body.editor.position(label) {
                Some(position) => position,
                None => continue,
            };
            let better = match best {
                None => true,
                Some((best_number, best_position)) => {
                    (number, position) < (best_number, best_position)
                }
            };
            if better {
                best = Some((number, position));
            }
        }
        let (number, position) = best.ok_or_else(|| {
            Error::cannot_compile(format!(
                "no code at or after line {} of {}{}",
                line, body.context.method_name, body.context.descriptor
            ))
        })?;

        let fragment = body.compile(compiler, source)?;
        body.editor.insert_fragment(position + 1, &fragment);
        body.grow(0, &fragment)?;
        Ok(number)
    })
}

/// Replace the body of a method entirely
///
/// `abstract` and `native` are dropped from the method's flags.
pub fn set_body(
    class: &mut ClassFile,
    method: usize,
    compiler: &dyn FragmentCompiler,
    source: &str,
) -> Result<(), Error> {
    let this_class = class.name()?.to_owned();
    let target = class
        .methods
        .get(method)
        .ok_or_else(|| Error::NotFound(format!("method #{} of {}", method, this_class)))?;
    let name = target.name(&class.constants)?.to_owned();
    let descriptor = target.descriptor(&class.constants)?.to_owned();
    let is_static = target.access_flags.contains(MethodAccessFlags::STATIC);
    let context = CompileContext::new(&this_class, &name, &descriptor, is_static)?;

    let mut constants = class.constants.clone();
    let fragment = compiler.compile(source, &context, &mut constants)?;
    if !fragment.ends_in_jump() {
        return Err(Error::cannot_compile(format!(
            "body of {}{} must end in a return, throw, or jump",
            name, descriptor
        )));
    }
    let mut editor = CodeEditor::from_fragment(&fragment);
    editor.max_locals = editor.max_locals.max(context.max_locals);
    if class.version.requires_stack_maps() {
        let entry = Frame::method_entry(&this_class, &name, &descriptor, is_static)?;
        editor.compute_frames(&entry, &this_class, &constants)?;
    }
    let code = editor.assemble(&mut constants)?;

    let mut edited = target.clone();
    edited
        .access_flags
        .remove(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE);
    edited.set_code(&mut constants, &code)?;
    debug!("set body of {}.{}{}", this_class, name, descriptor);
    class.constants = constants;
    class.methods[method] = edited;
    Ok(())
}

/// Point the `super(...)` call of every constructor at `new_super` instead of `old_super`
///
/// Only the constant pool index of the call changes, so the code is patched in place.
pub fn retarget_super_calls(
    class: &mut ClassFile,
    old_super: &str,
    new_super: &str,
) -> Result<(), Error> {
    let this_class = class.name()?.to_owned();
    for idx in 0..class.methods.len() {
        if class.methods[idx].name(&class.constants)? != "<init>" {
            continue;
        }
        let mut code: Code = match class.methods[idx].code(&class.constants)? {
            Some(code) => code,
            None => continue,
        };

        let mut instructions = vec![];
        let mut pos = 0;
        while pos < code.code_array.len() {
            let length = instruction_length(&code.code_array, pos)?;
            instructions.push((pos, &code.code_array[pos..pos + length]));
            pos += length;
        }
        let call = constructor_call(instructions.into_iter(), &class.constants, &this_class)?;
        let at = match call {
            Some((at, false)) => at,
            _ => continue,
        };

        let index = operand_u16(&code.code_array[at..]).unwrap_or(0);
        let descriptor = {
            let member = class.constants.member_ref(ConstantIndex(index))?;
            if member.class != old_super {
                continue;
            }
            member.descriptor.to_owned()
        };
        let retargeted = class
            .constants
            .get_method_ref(new_super, "<init>", &descriptor, false)?;
        let [hi, lo] = retargeted.0 .0.to_be_bytes();
        code.code_array[at + 1] = hi;
        code.code_array[at + 2] = lo;

        let mut method = class.methods[idx].clone();
        method.set_code(&mut class.constants, &code)?;
        class.methods[idx] = method;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::compile::Assembler;
    use crate::jvm::class_file::{
        LineNumber, LineNumberTable, Method, StackMapFrame, StackMapTable, VerificationType,
        Version,
    };
    use crate::jvm::code::disassemble;
    use crate::jvm::ClassAccessFlags;

    pub(crate) fn class_with(
        version: Version,
        methods: &[(&str, &str, MethodAccessFlags, &str)],
    ) -> ClassFile {
        let mut class = ClassFile::new(
            "a/A",
            Some("java/lang/Object"),
            ClassAccessFlags::PUBLIC,
            version,
        )
        .unwrap();
        for (name, descriptor, flags, body) in methods {
            let name_index = class.constants.get_utf8(*name).unwrap();
            let descriptor_index = class.constants.get_utf8(*descriptor).unwrap();
            class.methods.push(Method {
                access_flags: *flags,
                name_index,
                descriptor_index,
                attributes: vec![],
            });
            let idx = class.methods.len() - 1;
            set_body(&mut class, idx, &Assembler, body).unwrap();
        }
        class
    }

    pub(crate) fn listing(class: &ClassFile, method: usize) -> String {
        let code = class.methods[method].code(&class.constants).unwrap().unwrap();
        disassemble(&code, &class.constants).unwrap()
    }

    #[test]
    fn before_goes_after_super_call() {
        let mut class = class_with(
            Version::JAVA8,
            &[(
                "<init>",
                "()V",
                MethodAccessFlags::PUBLIC,
                "aload_0; invokespecial java/lang/Object.<init>:()V; return",
            )],
        );
        insert_before(&mut class, 0, &Assembler, "iconst_1; pop").unwrap();
        let lines: Vec<String> = listing(&class, 0)
            .lines()
            .map(|line| line.trim().to_owned())
            .collect();
        assert_eq!(
            lines,
            vec![
                "0: aload_0",
                "1: invokespecial java/lang/Object.<init>:()V",
                "4: iconst_1",
                "5: pop",
                "6: return",
            ]
        );
    }

    #[test]
    fn constructor_call_skips_nested_objects() {
        let mut class = class_with(
            Version::JAVA8,
            &[(
                "<init>",
                "()V",
                MethodAccessFlags::PUBLIC,
                "aload_0; new java/lang/Object; dup; invokespecial java/lang/Object.<init>:()V; pop; \
                 iconst_1; invokespecial this.<init>:(I)V; return",
            )],
        );
        let (idx, delegates) = edit_body(&mut class, 0, |body| body.entry_point()).unwrap();
        assert!(delegates);
        assert_eq!(
            class.methods[0].code(&class.constants).unwrap().unwrap().code_array.len(),
            14
        );
        // Marks and instructions alternate, the call being the seventh instruction
        assert_eq!(idx, 14);
    }

    #[test]
    fn failed_edits_leave_class_alone() {
        let mut class = class_with(
            Version::JAVA8,
            &[("f", "(I)I", MethodAccessFlags::STATIC, "iload_0; ireturn")],
        );
        let before = class.to_bytes().unwrap();
        assert!(matches!(
            insert_before(&mut class, 0, &Assembler, "ldc \"unused\"; pop; load $2"),
            Err(Error::CannotCompile(_))
        ));
        assert!(matches!(
            add_catch(&mut class, 0, &Assembler, "iconst_0; pop", "java/lang/Exception"),
            Err(Error::CannotCompile(_))
        ));
        assert_eq!(class.to_bytes().unwrap(), before);

        class.methods[0].attributes.clear();
        assert!(matches!(
            insert_before(&mut class, 0, &Assembler, "nop"),
            Err(Error::CannotCompile(msg)) if msg.starts_with("no method body")
        ));
    }

    #[test]
    fn catch_covers_body() {
        let mut class = class_with(
            Version::JAVA8,
            &[("f", "(I)I", MethodAccessFlags::STATIC, "iload_0; ireturn")],
        );
        add_catch(
            &mut class,
            0,
            &Assembler,
            "aload $exception; athrow",
            "java/lang/RuntimeException",
        )
        .unwrap();
        let text = listing(&class, 0);
        assert!(text.contains("    2: astore_1\n    3: aload_1\n    4: athrow\n"));
        assert!(text.ends_with("      0     2     2  java/lang/RuntimeException\n"));
        let code = class.methods[0].code(&class.constants).unwrap().unwrap();
        assert_eq!(code.max_locals, 2);

        let StackMapTable(frames) = code.attributes[0].decode::<StackMapTable>().unwrap();
        match frames.as_slice() {
            [StackMapFrame::SameLocalsOneStack {
                offset_delta: 2,
                stack: VerificationType::Object(caught),
            }] => assert_eq!(
                class.constants.class_name(*caught).unwrap(),
                "java/lang/RuntimeException"
            ),
            other => panic!("unexpected frames {:?}", other),
        }
    }

    #[test]
    fn line_insertion_goes_to_the_next_line_with_code() {
        // 0: iload_0 (line 10); 1: iinc 0 -1 (line 12); 4: iload_0; 5: ifgt 1; 8: iload_0 (line 14)
        let mut class = class_with(
            Version::JAVA8,
            &[(
                "f",
                "(I)I",
                MethodAccessFlags::STATIC,
                "iload_0; top: iinc 0 -1; iload_0; ifgt top; iload_0; ireturn",
            )],
        );
        let mut code = class.methods[0].code(&class.constants).unwrap().unwrap();
        let lines = LineNumberTable(vec![
            LineNumber { start_pc: 0, line_number: 10 },
            LineNumber { start_pc: 1, line_number: 12 },
            LineNumber { start_pc: 8, line_number: 14 },
        ]);
        code.attributes.push(class.constants.get_attribute(&lines).unwrap());
        let mut method = class.methods[0].clone();
        method.set_code(&mut class.constants, &code).unwrap();
        class.methods[0] = method;

        assert_eq!(insert_at_line(&mut class, 0, &Assembler, 11, "iinc 0 5").unwrap(), 12);
        let listed: Vec<String> = listing(&class, 0)
            .lines()
            .map(|line| line.trim().to_owned())
            .collect();
        // the loop jumps back to the start of line 12, which is now the inserted code
        assert_eq!(
            listed,
            vec![
                "0: iload_0",
                "1: iinc 0 5",
                "4: iinc 0 -1",
                "7: iload_0",
                "8: ifgt 1",
                "11: iload_0",
                "12: ireturn",
            ]
        );

        let code = class.methods[0].code(&class.constants).unwrap().unwrap();
        let table = code
            .attributes
            .iter()
            .find(|attribute| attribute.name(&class.constants).unwrap() == "LineNumberTable")
            .unwrap();
        let LineNumberTable(entries) = table.decode::<LineNumberTable>().unwrap();
        let starts: Vec<(u16, u16)> = entries
            .iter()
            .map(|entry| (entry.start_pc, entry.line_number))
            .collect();
        assert_eq!(starts, vec![(0, 10), (1, 12), (11, 14)]);

        assert_eq!(insert_at_line(&mut class, 0, &Assembler, 14, "nop").unwrap(), 14);
        assert!(matches!(
            insert_at_line(&mut class, 0, &Assembler, 15, "nop"),
            Err(Error::CannotCompile(_))
        ));
    }

    #[test]
    fn super_calls_follow_new_superclass() {
        let mut class = class_with(
            Version::JAVA8,
            &[(
                "<init>",
                "()V",
                MethodAccessFlags::PUBLIC,
                "aload_0; invokespecial java/lang/Object.<init>:()V; return",
            )],
        );
        retarget_super_calls(&mut class, "java/lang/Object", "a/Base").unwrap();
        assert!(listing(&class, 0).contains("invokespecial a/Base.<init>:()V"));
    }
}
