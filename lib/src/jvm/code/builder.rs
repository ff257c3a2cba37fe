use super::opcodes::local_extent;
use super::{
    max_stack_depth, BranchInstruction, Fragment, Handler, Instruction, Item, Label,
    LabelGenerator, SequentialLabels,
};
use crate::jvm::class_file::{ClassConstantIndex, ConstantPool};
use crate::jvm::Error;
use std::collections::HashSet;

/// Simplified interface for building up a block of new code. It does internal bookkeeping to track
/// labels and the local variables touched.
///
/// ### Stack depth
///
/// The builder does not track the operand stack as instructions are pushed. Instead, the maximum
/// depth is computed once in [`CodeBuilder::result`] by following every path through the code.
/// This means we might reject code with inconsistent stack depths at join points late, but we
/// never accept it.
///
/// ### Labels
///
/// Labels are fresh for every builder and only become meaningful once placed. Jumping to a label
/// that is never placed is an error when the fragment is finished.
#[derive(Debug)]
pub struct CodeBuilder {
    items: Vec<Item>,
    handlers: Vec<Handler>,
    labels: SequentialLabels,
    placed: HashSet<Label>,

    /// One past the highest local variable slot used so far
    max_locals: u16,
}

impl CodeBuilder {
    /// Create a builder whose code may freely use the first `max_locals` slots
    pub fn new(max_locals: u16) -> CodeBuilder {
        CodeBuilder {
            items: vec![],
            handlers: vec![],
            labels: SequentialLabels::new(),
            placed: HashSet::new(),
            max_locals,
        }
    }

    /// Place a label at the current position
    ///
    /// Placing the same label twice is an error.
    pub fn place_label(&mut self, label: Label) -> Result<(), Error> {
        if !self.placed.insert(label) {
            return Err(Error::cannot_compile(format!(
                "label {} is placed twice",
                label
            )));
        }
        self.items.push(Item::Mark(label));
        Ok(())
    }

    /// Push a straight-line instruction
    pub fn push_instruction(&mut self, insn: Instruction) {
        self.push_raw(insn.encode());
    }

    /// Push an already encoded straight-line instruction
    pub fn push_raw(&mut self, bytes: Vec<u8>) {
        if let Some(extent) = local_extent(&bytes) {
            self.max_locals = self.max_locals.max(extent);
        }
        self.items.push(Item::Op(bytes));
    }

    /// Push a jump, switch, return, or throw
    pub fn push_branch_instruction(&mut self, insn: BranchInstruction<Label>) {
        self.items.push(Item::branch(insn));
    }

    /// Register a handler covering the code between `start` (inclusive) and `end` (exclusive)
    ///
    /// Handlers registered first take precedence.
    pub fn add_handler(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: ClassConstantIndex,
    ) {
        self.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type,
        });
    }

    /// Record that the code uses the local slots `slot..slot + width` (only needed for slots not
    /// already visible through a load, store, or `iinc`)
    pub fn use_local(&mut self, slot: u16, width: u16) {
        self.max_locals = self.max_locals.max(slot.saturating_add(width));
    }

    /// Number of local variable slots used so far
    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    /// Finish building, computing the stack depth needed by the code
    pub fn result(self, constants: &ConstantPool) -> Result<Fragment, Error> {
        let max_stack = if self.items.is_empty() {
            0
        } else {
            max_stack_depth(&self.items, &self.handlers, constants)?
        };
        Ok(Fragment {
            items: self.items,
            handlers: self.handlers,
            max_stack,
            max_locals: self.max_locals,
        })
    }
}

impl LabelGenerator<Label> for CodeBuilder {
    fn fresh_label(&mut self) -> Label {
        self.labels.fresh_label()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::OrdComparison;
    use crate::jvm::ValueKind;

    #[test]
    fn builds_a_loop() {
        let constants = ConstantPool::new();
        let mut builder = CodeBuilder::new(1);
        let top = builder.fresh_label();
        let done = builder.fresh_label();

        builder.push_instruction(Instruction::IConst0);
        builder.push_instruction(Instruction::store(ValueKind::Int, 3));
        builder.place_label(top).unwrap();
        builder.push_instruction(Instruction::ILoad(3));
        builder.push_instruction(Instruction::BiPush(10));
        builder.push_branch_instruction(BranchInstruction::IfICmp(OrdComparison::GE, done));
        builder.push_instruction(Instruction::IInc(3, 1));
        builder.push_branch_instruction(BranchInstruction::Goto(top));
        builder.place_label(done).unwrap();

        let fragment = builder.result(&constants).unwrap();
        assert_eq!(fragment.max_stack, 2);
        assert_eq!(fragment.max_locals, 4);
        assert_eq!(
            fragment
                .items
                .iter()
                .filter(|item| matches!(item, Item::Branch(..)))
                .count(),
            2
        );
        assert!(!fragment.ends_in_jump());
    }

    #[test]
    fn wide_locals_and_labels() {
        let constants = ConstantPool::new();
        let mut builder = CodeBuilder::new(0);
        builder.push_instruction(Instruction::LConst1);
        builder.push_instruction(Instruction::store(ValueKind::Long, 6));
        assert_eq!(builder.max_locals(), 8);

        let label = builder.fresh_label();
        builder.place_label(label).unwrap();
        assert!(matches!(
            builder.place_label(label),
            Err(Error::CannotCompile(_))
        ));

        // Jumping to a label nobody placed
        let mut builder = CodeBuilder::new(0);
        let nowhere = builder.fresh_label();
        builder.push_branch_instruction(BranchInstruction::Goto(nowhere));
        assert!(matches!(
            builder.result(&constants),
            Err(Error::CannotCompile(_))
        ));
    }
}
