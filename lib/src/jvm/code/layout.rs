//! Resolve labels into offsets, widening jumps which do not fit
//!
//! This module is responsible for turning the items of a [`CodeEditor`](super::CodeEditor) back
//! into a code array. Most jumps have a signed 16-bit relative offset; the ones that end up
//! further than that from their target are rewritten:
//!
//! ```text,ignore,no_run
//!     goto L2        =>    goto_w L2
//!     jsr L2         =>    jsr_w L2
//!
//!     if* L2         =>    ifnot* +8
//!                          goto_w L2
//! ```
//!
//! ### Termination
//!
//! Rewrites are themselves longer than the initial jump instruction, so they risk causing other
//! jumps to become oversized and also need to be rewritten. Since a jump is never narrowed again
//! once widened, each round of layout either widens at least one more jump or is the last one,
//! so the process finishes after at most as many rounds as there are jumps. Switch padding is
//! recomputed from scratch in every round, which is why no `nop` padding is needed to keep the
//! switches aligned.

use super::opcodes;
use super::{BranchInstruction, Item, JumpWidth, Label};
use crate::jvm::{Error, Serialize};
use log::trace;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::ops::{RangeBounds, RangeInclusive};

/// Range of relative jump offsets supported by `goto` and `if*` branch instructions
pub const SIGNED_16BIT_JUMP_RANGE: RangeInclusive<isize> =
    RangeInclusive::new(i16::MIN as isize, i16::MAX as isize);

/// Longest code array a method may have
pub const MAX_CODE_LENGTH: usize = u16::MAX as usize;

/// Final position of every item
#[derive(Debug)]
pub struct Layout {
    item_offsets: Vec<usize>,
    wide: Vec<bool>,
    labels: HashMap<Label, usize>,
    code_length: usize,
}

/// Whether the jump can be widened (switches already use 32-bit offsets)
fn is_widenable<Lbl>(insn: &BranchInstruction<Lbl>) -> bool {
    matches!(
        insn,
        BranchInstruction::If(..)
            | BranchInstruction::IfICmp(..)
            | BranchInstruction::IfACmp(..)
            | BranchInstruction::IfNull(..)
            | BranchInstruction::Goto(_)
            | BranchInstruction::Jsr(_)
    )
}

/// Encoded size of a branch instruction starting at `at`
fn branch_size<Lbl>(insn: &BranchInstruction<Lbl>, at: usize, wide: bool) -> usize {
    match insn {
        BranchInstruction::Goto(_) | BranchInstruction::Jsr(_) => {
            if wide {
                5
            } else {
                3
            }
        }
        BranchInstruction::If(..)
        | BranchInstruction::IfICmp(..)
        | BranchInstruction::IfACmp(..)
        | BranchInstruction::IfNull(..) => {
            if wide {
                8
            } else {
                3
            }
        }
        BranchInstruction::TableSwitch { targets, .. } => {
            1 + opcodes::switch_padding(at) + 4 * (3 + targets.len())
        }
        BranchInstruction::LookupSwitch { targets, .. } => {
            1 + opcodes::switch_padding(at) + 8 * (1 + targets.len())
        }
        BranchInstruction::IReturn
        | BranchInstruction::LReturn
        | BranchInstruction::FReturn
        | BranchInstruction::DReturn
        | BranchInstruction::AReturn
        | BranchInstruction::Return
        | BranchInstruction::AThrow => 1,
    }
}

impl Layout {
    /// Lay out items using the usual 16-bit jump range
    pub fn compute(items: &[Item]) -> Result<Layout, Error> {
        Layout::compute_with_range(items, &SIGNED_16BIT_JUMP_RANGE)
    }

    /// Lay out items, widening every jump whose distance falls outside of `small_jump_range`
    ///
    /// The `small_jump_range` parameter should always be `SIGNED_16BIT_JUMP_RANGE` - it is a
    /// parameter only for unit testing purposes.
    pub fn compute_with_range(
        items: &[Item],
        small_jump_range: &impl RangeBounds<isize>,
    ) -> Result<Layout, Error> {
        let mut wide: Vec<bool> = items
            .iter()
            .map(|item| matches!(item, Item::Branch(_, JumpWidth::Wide)))
            .collect();

        let mut rounds = 0;
        loop {
            rounds += 1;

            // Place every item with the current jump widths
            let mut item_offsets = Vec::with_capacity(items.len());
            let mut labels = HashMap::new();
            let mut current_offset: usize = 0;
            for (idx, item) in items.iter().enumerate() {
                item_offsets.push(current_offset);
                match item {
                    Item::Mark(label) => {
                        if labels.insert(*label, current_offset).is_some() {
                            return Err(Error::malformed(format!("label {:?} placed twice", label)));
                        }
                    }
                    Item::Op(bytes) => current_offset += bytes.len(),
                    Item::Branch(insn, _) => {
                        current_offset += branch_size(insn, current_offset, wide[idx])
                    }
                }
            }

            // Find jumps which no longer fit
            let mut widened = 0;
            for (idx, item) in items.iter().enumerate() {
                let insn = match item {
                    Item::Branch(insn, _) if !wide[idx] && is_widenable(insn) => insn,
                    _ => continue,
                };
                for target in insn.jump_targets() {
                    let to = *labels
                        .get(&target)
                        .ok_or_else(|| Error::malformed(format!("unknown label {:?}", target)))?;
                    let jump_distance = to as isize - item_offsets[idx] as isize;
                    if !small_jump_range.contains(&jump_distance) {
                        wide[idx] = true;
                        widened += 1;
                    }
                }
            }

            if widened == 0 {
                if current_offset > MAX_CODE_LENGTH {
                    return Err(Error::MethodCodeOverflow(current_offset));
                }
                trace!("laid out {} bytes of code in {} rounds", current_offset, rounds);
                return Ok(Layout {
                    item_offsets,
                    wide,
                    labels,
                    code_length: current_offset,
                });
            }
            trace!("widening {} jumps", widened);
        }
    }

    /// Offset of a placed label
    pub fn offset(&self, label: Label) -> Result<usize, Error> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| Error::malformed(format!("unknown label {:?}", label)))
    }

    /// Offset of the item at some index
    pub fn item_offset(&self, index: usize) -> usize {
        self.item_offsets.get(index).copied().unwrap_or(self.code_length)
    }

    pub fn code_length(&self) -> usize {
        self.code_length
    }

    /// Produce the code array
    pub fn encode(&self, items: &[Item]) -> Result<Vec<u8>, Error> {
        let mut code = Vec::with_capacity(self.code_length);
        for (idx, item) in items.iter().enumerate() {
            match item {
                Item::Mark(_) => (),
                Item::Op(bytes) => code.extend_from_slice(bytes),
                Item::Branch(insn, _) => {
                    self.encode_branch(insn, self.item_offsets[idx], self.wide[idx], &mut code)?
                }
            }
        }
        debug_assert_eq!(code.len(), self.code_length);
        Ok(code)
    }

    fn encode_branch(
        &self,
        insn: &BranchInstruction<Label>,
        at: usize,
        wide: bool,
        code: &mut Vec<u8>,
    ) -> Result<(), Error> {
        let relative = |label: &Label| -> Result<i32, Error> {
            Ok((self.offset(*label)? as isize - at as isize) as i32)
        };
        let narrow = |distance: i32| -> Result<i16, Error> {
            i16::try_from(distance)
                .map_err(|_| Error::malformed(format!("jump at {} is out of range", at)))
        };

        match insn {
            BranchInstruction::Goto(target) | BranchInstruction::Jsr(target) => {
                let distance = relative(target)?;
                if wide {
                    let opcode = if let BranchInstruction::Goto(_) = insn {
                        opcodes::GOTO_W
                    } else {
                        opcodes::JSR_W
                    };
                    opcode.serialize(code)?;
                    distance.serialize(code)?;
                } else {
                    insn.opcode().serialize(code)?;
                    narrow(distance)?.serialize(code)?;
                }
            }
            BranchInstruction::If(_, target)
            | BranchInstruction::IfICmp(_, target)
            | BranchInstruction::IfACmp(_, target)
            | BranchInstruction::IfNull(_, target) => {
                if wide {
                    // Skip over the `goto_w` when the original condition does not hold
                    let inverted = insn
                        .clone()
                        .negate()
                        .ok_or_else(|| Error::malformed("cannot invert jump"))?;
                    inverted.opcode().serialize(code)?;
                    8i16.serialize(code)?;
                    opcodes::GOTO_W.serialize(code)?;
                    (relative(target)? - 3).serialize(code)?;
                } else {
                    insn.opcode().serialize(code)?;
                    narrow(relative(target)?)?.serialize(code)?;
                }
            }
            BranchInstruction::TableSwitch {
                default,
                low,
                targets,
            } => {
                insn.opcode().serialize(code)?;
                for _ in 0..opcodes::switch_padding(at) {
                    0u8.serialize(code)?;
                }
                relative(default)?.serialize(code)?;
                low.serialize(code)?;
                (low + targets.len() as i32 - 1).serialize(code)?;
                for target in targets {
                    relative(target)?.serialize(code)?;
                }
            }
            BranchInstruction::LookupSwitch { default, targets } => {
                insn.opcode().serialize(code)?;
                for _ in 0..opcodes::switch_padding(at) {
                    0u8.serialize(code)?;
                }
                relative(default)?.serialize(code)?;
                (targets.len() as i32).serialize(code)?;
                for (key, target) in targets {
                    key.serialize(code)?;
                    relative(target)?.serialize(code)?;
                }
            }
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => insn.opcode().serialize(code)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::opcodes::*;
    use crate::jvm::code::{LabelGenerator, OrdComparison, SequentialLabels};

    fn nops(count: usize) -> Item {
        Item::Op(vec![NOP; count])
    }

    #[test]
    fn narrow_jumps_stay_narrow() {
        let mut gen = SequentialLabels::new();
        let (start, end) = (gen.fresh_label(), gen.fresh_label());
        let items = vec![
            Item::Mark(start),
            Item::branch(BranchInstruction::Goto(end)),
            nops(2),
            Item::Mark(end),
            Item::branch(BranchInstruction::Goto(start)),
        ];
        let layout = Layout::compute(&items).unwrap();
        assert_eq!(
            layout.encode(&items).unwrap(),
            vec![GOTO, 0, 5, NOP, NOP, GOTO, 0xff, 0xfb]
        );
    }

    #[test]
    fn oversized_jumps_are_widened() {
        let mut gen = SequentialLabels::new();
        let (top, target) = (gen.fresh_label(), gen.fresh_label());
        let items = vec![
            Item::Mark(top),
            Item::branch(BranchInstruction::If(OrdComparison::LT, target)),
            Item::branch(BranchInstruction::Jsr(target)),
            nops(20),
            Item::Mark(target),
            Item::branch(BranchInstruction::Return),
        ];
        let layout = Layout::compute_with_range(&items, &(-10..=10)).unwrap();
        let code = layout.encode(&items).unwrap();

        // `iflt` becomes `ifge +8; goto_w`, and `jsr` becomes `jsr_w`
        assert_eq!(&code[0..8], &[IFGE, 0, 8, GOTO_W, 0, 0, 0, 30]);
        assert_eq!(&code[8..13], &[JSR_W, 0, 0, 0, 25]);
        assert_eq!(layout.offset(target).unwrap(), 33);
        assert_eq!(layout.code_length(), 34);
    }

    #[test]
    fn widening_cascades() {
        let mut gen = SequentialLabels::new();
        let (a, b) = (gen.fresh_label(), gen.fresh_label());

        // The first jump only stops fitting once the second one is widened
        let items = vec![
            Item::branch(BranchInstruction::Goto(a)),
            Item::branch(BranchInstruction::Goto(b)),
            nops(5),
            Item::Mark(a),
            nops(6),
            Item::Mark(b),
            Item::branch(BranchInstruction::Return),
        ];
        let layout = Layout::compute_with_range(&items, &(-12..=12)).unwrap();
        assert_eq!(layout.offset(a).unwrap(), 15);
        assert_eq!(layout.offset(b).unwrap(), 21);
        let code = layout.encode(&items).unwrap();
        assert_eq!(code[0], GOTO_W);
        assert_eq!(code[5], GOTO_W);
    }

    #[test]
    fn missing_labels_are_errors() {
        let mut gen = SequentialLabels::new();
        let nowhere = gen.fresh_label();
        let items = vec![Item::branch(BranchInstruction::Goto(nowhere))];
        assert!(matches!(Layout::compute(&items), Err(Error::Malformed(_))));
    }
}
