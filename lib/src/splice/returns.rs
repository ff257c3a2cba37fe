use super::{edit_body, BodyEdit};
use crate::compile::{Fragment, FragmentCompiler};
use crate::jvm::class_file::{ClassConstantIndex, ClassFile, ConstantIndex};
use crate::jvm::code::{BranchInstruction, Handler, Instruction, Item, Label};
use crate::jvm::{Error, ValueKind};

/// How code that runs on every exit of a method is laid out
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReturnStrategy {
    /// Subroutine if the class file version allows it, inline copies otherwise
    Auto,

    /// One copy of the code, reached with `jsr` from every exit (class files before Java 7 only)
    Subroutine,

    /// One copy of the code at every exit
    Inline,
}

/// Local variable slots reserved for exit code
#[derive(Copy, Clone, Debug)]
struct ExitSlots {
    /// Kind of the returned value (`None` in `void` methods)
    kind: Option<ValueKind>,
    result: u16,
    exception: u16,
    return_address: u16,
}

/// Run code whenever the method returns, and also when it throws if `as_finally` is set
///
/// The value about to be returned is stored in a fresh local first, available to the code as
/// `$result`, and loaded back once the code is done. On the exceptional path `$result` holds the
/// zero value of its type.
pub fn insert_after(
    class: &mut ClassFile,
    method: usize,
    compiler: &dyn FragmentCompiler,
    source: &str,
    as_finally: bool,
    strategy: ReturnStrategy,
) -> Result<(), Error> {
    let subroutine = match strategy {
        ReturnStrategy::Auto => class.version.allows_subroutines(),
        ReturnStrategy::Subroutine if !class.version.allows_subroutines() => {
            return Err(Error::cannot_compile(format!(
                "class file version {}.{} does not allow subroutines",
                class.version.major, class.version.minor
            )))
        }
        ReturnStrategy::Subroutine => true,
        ReturnStrategy::Inline => false,
    };

    edit_body(class, method, |body| {
        let return_type = body.context.return_type().cloned();
        let width = return_type.as_ref().map_or(0, |typ| typ.width() as u16);
        let base = body.context.max_locals;
        let slots = ExitSlots {
            kind: return_type.as_ref().map(|typ| typ.value_kind()),
            result: base,
            exception: base + width,
            return_address: base + width + 1,
        };
        body.context.result = return_type.map(|typ| (slots.result, typ));
        body.context.exception = None;
        body.context.max_locals = slots.return_address + 1;
        let fragment = body.compile(compiler, source)?;

        // The covered range is taken before any exit code is added
        let (at, _) = body.entry_point()?;
        let start = body.editor.label_at(at);
        let end = body.editor.end_label();

        let returns: Vec<usize> = body
            .editor
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| matches!(item, Item::Branch(insn, _) if insn.is_return()))
            .map(|(idx, _)| idx)
            .collect();

        if subroutine {
            let entry = body.editor.fresh_label();
            for idx in returns.into_iter().rev() {
                call_at_return(body, idx, slots, |_| {
                    vec![Item::branch(BranchInstruction::Jsr(entry))]
                });
            }
            body.editor.items.push(Item::Mark(entry));
            body.editor.items.push(Instruction::AStore(slots.return_address).into());
            body.editor.append_fragment(&fragment);
            body.editor.items.push(Instruction::Ret(slots.return_address).into());
            if as_finally {
                add_finally(body, start, end, slots, |_| {
                    vec![Item::branch(BranchInstruction::Jsr(entry))]
                });
            }
        } else {
            for idx in returns.into_iter().rev() {
                call_at_return(body, idx, slots, |body| inline_copy(body, &fragment));
            }
            if as_finally {
                add_finally(body, start, end, slots, |body| inline_copy(body, &fragment));
            }
        }

        // Room for the return address or a zeroed `long`/`double` result, on top of what the
        // body already needed
        let below = body.editor.max_stack;
        let needed = fragment.max_stack.max(2);
        body.editor.max_stack = below
            .checked_add(needed)
            .ok_or(Error::MaxStackOverflow(below as usize + needed as usize))?;
        body.editor.max_locals = body
            .editor
            .max_locals
            .max(fragment.max_locals)
            .max(slots.return_address + 1);
        Ok(())
    })
}

/// Items of a fresh copy of the fragment
fn inline_copy(body: &mut BodyEdit, fragment: &Fragment) -> Vec<Item> {
    let copy = fragment.relabel(&mut body.editor);
    body.editor.handlers.splice(0..0, copy.handlers);
    copy.items
}

/// Replace the return at `idx` with: store the result, run the exit code, load the result back,
/// return
fn call_at_return(
    body: &mut BodyEdit,
    idx: usize,
    slots: ExitSlots,
    exit_code: impl FnOnce(&mut BodyEdit) -> Vec<Item>,
) {
    let exit = exit_code(body);
    let ret = body.editor.items[idx].clone();
    let mut replacement = Vec::with_capacity(exit.len() + 3);
    if let Some(kind) = slots.kind {
        replacement.push(Instruction::store(kind, slots.result).into());
    }
    replacement.extend(exit);
    if let Some(kind) = slots.kind {
        replacement.push(Instruction::load(kind, slots.result).into());
    }
    replacement.push(ret);
    body.editor.items.splice(idx..idx + 1, replacement);
}

/// Append a catch-everything handler for `start..end` which runs the exit code and rethrows
fn add_finally(
    body: &mut BodyEdit,
    start: Label,
    end: Label,
    slots: ExitSlots,
    exit_code: impl FnOnce(&mut BodyEdit) -> Vec<Item>,
) {
    let handler = body.editor.fresh_label();
    let exit = exit_code(body);
    let items = &mut body.editor.items;
    items.push(Item::Mark(handler));
    items.push(Instruction::AStore(slots.exception).into());
    if let Some(kind) = slots.kind {
        items.push(Instruction::zero(kind).into());
        items.push(Instruction::store(kind, slots.result).into());
    }
    items.extend(exit);
    items.push(Instruction::ALoad(slots.exception).into());
    items.push(Item::branch(BranchInstruction::AThrow));
    body.editor.handlers.push(Handler {
        start,
        end,
        handler,
        catch_type: ClassConstantIndex(ConstantIndex(0)),
    });
}

#[cfg(test)]
mod test {
    use super::super::test::{class_with, listing};
    use super::*;
    use crate::compile::Assembler;
    use crate::jvm::class_file::{StackMapFrame, StackMapTable, VerificationType, Version};
    use crate::jvm::MethodAccessFlags;

    const TWO_RETURNS: &str = "iload_0; ifeq zero; iconst_1; ireturn; zero: iconst_0; ireturn";

    #[test]
    fn subroutine_is_shared() {
        let mut class = class_with(
            Version::JAVA6,
            &[("f", "(I)I", MethodAccessFlags::STATIC, TWO_RETURNS)],
        );
        insert_after(&mut class, 0, &Assembler, "iinc $result 1", true, ReturnStrategy::Auto)
            .unwrap();
        let text = listing(&class, 0);
        assert_eq!(text.matches("jsr ").count(), 3);
        assert_eq!(text.matches("iinc 1 1").count(), 1);
        assert_eq!(text.matches(": ret 3").count(), 1);
        assert_eq!(text.matches(": ireturn").count(), 2);

        let code = class.methods[0].code(&class.constants).unwrap().unwrap();
        assert_eq!(code.exception_table.len(), 1);
        let handler = &code.exception_table[0];
        assert_eq!((handler.start_pc, handler.end_pc), (0, 18));
        assert_eq!(handler.handler_pc, 24);
        assert_eq!(handler.catch_type, ClassConstantIndex(ConstantIndex(0)));
        assert_eq!(code.max_locals, 4);
        assert!(code.attributes.is_empty());
    }

    #[test]
    fn inline_copies_per_exit() {
        let mut class = class_with(
            Version::JAVA8,
            &[("f", "(I)I", MethodAccessFlags::STATIC, TWO_RETURNS)],
        );
        insert_after(&mut class, 0, &Assembler, "iinc $result 1", false, ReturnStrategy::Auto)
            .unwrap();
        let text = listing(&class, 0);
        assert_eq!(text.matches("jsr").count(), 0);
        assert_eq!(text.matches("iinc 1 1").count(), 2);
        assert!(!text.contains("exception table"));

        assert!(matches!(
            insert_after(&mut class, 0, &Assembler, "nop", false, ReturnStrategy::Subroutine),
            Err(Error::CannotCompile(_))
        ));
    }

    #[test]
    fn finally_handler_gets_a_frame() {
        let mut class = class_with(
            Version::JAVA8,
            &[("f", "(I)I", MethodAccessFlags::STATIC, TWO_RETURNS)],
        );
        insert_after(&mut class, 0, &Assembler, "iinc $result 1", true, ReturnStrategy::Auto)
            .unwrap();

        let code = class.methods[0].code(&class.constants).unwrap().unwrap();
        assert_eq!(code.exception_table.len(), 1);
        assert_eq!(code.exception_table[0].handler_pc, 18);
        let table = code
            .attributes
            .iter()
            .find(|attribute| attribute.name(&class.constants).unwrap() == "StackMapTable")
            .unwrap();
        let StackMapTable(frames) = table.decode::<StackMapTable>().unwrap();

        // `zero` keeps its frame, the handler at 18 gets one holding the exception
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], StackMapFrame::SameLocalsNoStack { offset_delta: 11 });
        match &frames[1] {
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 6,
                stack: VerificationType::Object(class_index),
            } => assert_eq!(
                class.constants.class_name(*class_index).unwrap(),
                "java/lang/Throwable"
            ),
            other => panic!("unexpected frame at the handler: {:?}", other),
        }
    }

    #[test]
    fn void_methods_have_no_result() {
        let mut class = class_with(
            Version::JAVA8,
            &[("g", "()V", MethodAccessFlags::STATIC, "return")],
        );
        assert!(matches!(
            insert_after(&mut class, 0, &Assembler, "load $result; pop", false, ReturnStrategy::Auto),
            Err(Error::CannotCompile(_))
        ));
        insert_after(&mut class, 0, &Assembler, "iconst_2; pop", true, ReturnStrategy::Inline)
            .unwrap();
        let lines: Vec<String> = listing(&class, 0)
            .lines()
            .map(|line| line.trim().to_owned())
            .collect();
        assert_eq!(
            lines,
            vec![
                "0: iconst_2",
                "1: pop",
                "2: return",
                "3: astore_0",
                "4: iconst_2",
                "5: pop",
                "6: aload_0",
                "7: athrow",
                "exception table:",
                "0     3     3  any",
            ]
        );
    }
}
