use super::editor::{decode_items, Relabel};
use super::{Handler, Item, Label, LabelGenerator, SequentialLabels};
use crate::jvm::Error;

/// Block of instructions ready to be spliced into a method body
///
/// Labels inside a fragment are private to it: splicing a fragment gives every one of them a
/// fresh label in the target body, so the same fragment can be spliced in many times.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fragment {
    pub items: Vec<Item>,

    /// Handlers local to the fragment
    pub handlers: Vec<Handler>,

    /// Operand stack depth the fragment needs, starting from an empty stack
    pub max_stack: u16,

    /// Number of local variable slots the fragment touches
    pub max_locals: u16,
}

impl Fragment {
    /// Wrap already compiled bytecode
    ///
    /// Jumps inside the code must stay inside of it; a jump to the very end of the code is not
    /// allowed either.
    pub fn from_bytes(code: &[u8], max_stack: u16, max_locals: u16) -> Result<Fragment, Error> {
        if code.is_empty() {
            return Ok(Fragment {
                max_stack,
                max_locals,
                ..Fragment::default()
            });
        }
        let mut labels = SequentialLabels::new();
        let (items, _) = decode_items(code, &mut labels)?;
        Ok(Fragment {
            items,
            handlers: vec![],
            max_stack,
            max_locals,
        })
    }

    /// Whether the fragment has no instructions at all
    pub fn is_empty(&self) -> bool {
        self.items.iter().all(|item| matches!(item, Item::Mark(_)))
    }

    /// Copy of the fragment where every label is replaced by a fresh one from `labels`
    pub fn relabel(&self, labels: &mut impl LabelGenerator<Label>) -> Fragment {
        let mut relabel = Relabel::new(labels);
        let items = self
            .items
            .iter()
            .map(|item| match item {
                Item::Mark(label) => Item::Mark(relabel.map(*label)),
                Item::Op(bytes) => Item::Op(bytes.clone()),
                Item::Branch(insn, width) => {
                    Item::Branch(insn.map_labels(|label| relabel.map(*label)), *width)
                }
            })
            .collect();
        let handlers = self
            .handlers
            .iter()
            .map(|handler| Handler {
                start: relabel.map(handler.start),
                end: relabel.map(handler.end),
                handler: relabel.map(handler.handler),
                catch_type: handler.catch_type,
            })
            .collect();
        Fragment {
            items,
            handlers,
            max_stack: self.max_stack,
            max_locals: self.max_locals,
        }
    }

    /// Whether control never runs off the end of the fragment, ie. the last instruction is a
    /// return, a throw, or an unconditional jump
    pub fn ends_in_jump(&self) -> bool {
        self.items
            .iter()
            .rev()
            .find(|item| !matches!(item, Item::Mark(_)))
            .map_or(false, |item| !item.falls_through())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::opcodes::*;
    use crate::jvm::code::{BranchInstruction, JumpWidth, OrdComparison};

    #[test]
    fn from_bytes_decodes_jumps() {
        let fragment = Fragment::from_bytes(&[ILOAD_0, IFNE, 0, 4, NOP, ICONST_1, IRETURN], 1, 1)
            .unwrap();
        assert!(matches!(
            fragment.items[3],
            Item::Branch(BranchInstruction::If(OrdComparison::NE, _), JumpWidth::Narrow)
        ));
        assert!(fragment.ends_in_jump());
        assert!(!fragment.is_empty());

        assert!(matches!(
            Fragment::from_bytes(&[GOTO, 0, 3], 0, 0),
            Err(Error::Malformed(_))
        ));
        assert!(Fragment::from_bytes(&[], 0, 0).unwrap().is_empty());
    }

    #[test]
    fn relabel_keeps_structure() {
        let fragment = Fragment::from_bytes(&[NOP, GOTO, 0xff, 0xff], 0, 0).unwrap();
        let mut labels = SequentialLabels::new();
        for _ in 0..100 {
            labels.fresh_label();
        }
        let copy = fragment.relabel(&mut labels);
        assert_ne!(copy, fragment);

        // The `goto` still points at the mark right before the `nop`
        let first = match copy.items[0] {
            Item::Mark(label) => label,
            ref other => panic!("expected a mark, got {:?}", other),
        };
        assert!(copy.items.contains(&Item::branch(BranchInstruction::Goto(first))));
        assert!(copy.ends_in_jump());
    }
}
