use super::opcodes::{self, stack_effect, StackEffect};
use super::{BranchInstruction, Handler, Item, Label};
use crate::jvm::class_file::ConstantPool;
use crate::jvm::Error;
use std::collections::HashMap;

/// Maximum operand stack depth reached by a sequence of items, entered with an empty stack
///
/// Every path through the items is followed (including exception handlers, which start with the
/// thrown exception on the stack). Two paths reaching the same instruction with different stack
/// depths, or an instruction popping more than is on the stack, make the code uncompilable.
pub fn max_stack_depth(
    items: &[Item],
    handlers: &[Handler],
    constants: &ConstantPool,
) -> Result<u16, Error> {
    let mut marks: HashMap<Label, usize> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        if let Item::Mark(label) = item {
            marks.insert(*label, idx);
        }
    }
    let index_of = |label: &Label| -> Result<usize, Error> {
        marks
            .get(label)
            .copied()
            .ok_or_else(|| Error::cannot_compile(format!("label {:?} is never placed", label)))
    };

    let mut worklist: Vec<(usize, u16)> = vec![(0, 0)];
    for handler in handlers {
        worklist.push((index_of(&handler.handler)?, 1));
    }

    let mut depth_at: Vec<Option<u16>> = vec![None; items.len()];
    let mut max_depth: u16 = 0;
    while let Some((mut idx, mut depth)) = worklist.pop() {
        while idx < items.len() {
            match depth_at[idx] {
                Some(known) if known == depth => break,
                Some(known) => {
                    return Err(Error::cannot_compile(format!(
                        "inconsistent stack depth ({} vs. {}) at item {}",
                        known, depth, idx
                    )))
                }
                None => depth_at[idx] = Some(depth),
            }

            let underflow = || Error::cannot_compile(format!("operand stack underflow at item {}", idx));
            match &items[idx] {
                Item::Mark(_) => (),
                Item::Op(bytes) => {
                    let (pop, push) = stack_effect(bytes, constants)?;
                    depth = depth.checked_sub(pop).ok_or_else(underflow)? + push;
                    max_depth = max_depth.max(depth);
                    if !items[idx].falls_through() {
                        break;
                    }
                }
                Item::Branch(insn, _) => {
                    let pop = match opcodes::info(insn.opcode()).map(|info| info.stack) {
                        Some(StackEffect::Fixed(pop, _)) => pop as u16,
                        _ => 0,
                    };
                    depth = depth.checked_sub(pop).ok_or_else(underflow)?;

                    // The return address is only on the stack inside the subroutine
                    let target_depth = if let BranchInstruction::Jsr(_) = insn {
                        max_depth = max_depth.max(depth + 1);
                        depth + 1
                    } else {
                        depth
                    };
                    for target in insn.jump_targets() {
                        worklist.push((index_of(&target)?, target_depth));
                    }
                    if !insn.falls_through() {
                        break;
                    }
                }
            }
            idx += 1;
        }
    }
    max_depth = max_depth.max(if handlers.is_empty() { 0 } else { 1 });
    Ok(max_depth)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::Fragment;

    fn depth(code: &[u8]) -> Result<u16, Error> {
        let fragment = Fragment::from_bytes(code, 0, 0).unwrap();
        max_stack_depth(&fragment.items, &fragment.handlers, &ConstantPool::new())
    }

    #[test]
    fn straight_line() {
        use crate::jvm::code::opcodes::*;
        assert_eq!(depth(&[ICONST_1, I2L, LCONST_1, LADD, POP2, RETURN]).unwrap(), 4);
        assert_eq!(depth(&[DCONST_0, DUP2, DADD, DRETURN]).unwrap(), 4);
    }

    #[test]
    fn branches_and_subroutines() {
        use crate::jvm::code::opcodes::*;
        // 0: iload_0; 1: ifeq 7; 4: iconst_1; 5: dup; 6: pop2; 7: jsr 11; 10: return; 11: astore_1; 12: ret 1
        let code = [
            ILOAD_0, IFEQ, 0, 6, ICONST_1, DUP, POP2, JSR, 0, 4, RETURN, ASTORE_1, RET, 1,
        ];
        assert_eq!(depth(&code).unwrap(), 2);
    }

    #[test]
    fn underflow_and_mismatch() {
        use crate::jvm::code::opcodes::*;
        assert!(matches!(depth(&[POP, RETURN]), Err(Error::CannotCompile(_))));
        // the two paths reach `return` with different depths
        assert!(matches!(
            depth(&[ILOAD_0, IFEQ, 0, 4, ICONST_1, RETURN]),
            Err(Error::CannotCompile(_))
        ));
    }
}
