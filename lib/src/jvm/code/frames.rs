//! Stack map frames for edited code
//!
//! From version 51 on, every jump target, exception handler, and instruction following an
//! unconditional jump needs a frame in the `StackMapTable`. Frames already in the table are kept
//! as they are. Positions which an edit left without a frame get one inferred by running the code
//! forwards from the method entry, taking the existing frames as given wherever execution reaches
//! them.
//!
//! The class hierarchy is not consulted: where two paths meet with different classes on the
//! stack, the inferred frame says `java/lang/Object`, and a local variable holding different
//! classes becomes unusable (`Top`).

use super::opcodes::{self, local_slot, operand_u16, stack_effect, StackEffect};
use super::{array_type_from_code, Handler, Item, Label};
use crate::jvm::class_file::{
    ClassConstantIndex, Constant, ConstantIndex, ConstantPool, StackMapFrame, VerificationType,
};
use crate::jvm::{BaseType, BinaryName, Error, FieldType, MethodDescriptor, ParseDescriptor};
use log::trace;
use std::collections::{HashMap, HashSet};

/// Type of one local variable or operand stack slot
///
/// `long` and `double` values take two slots, the second of which is `Top`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,

    /// Result of the `new` right after this label, before its constructor has run
    Uninitialized(Label),

    /// Class name in internal form, or array descriptor
    Object(String),
}

impl FrameType {
    pub fn from_field_type(field_type: &FieldType) -> FrameType {
        match field_type {
            FieldType::Base(BaseType::Long) => FrameType::Long,
            FieldType::Base(BaseType::Double) => FrameType::Double,
            FieldType::Base(BaseType::Float) => FrameType::Float,
            FieldType::Base(_) => FrameType::Integer,
            FieldType::Object(class_name) => FrameType::Object(class_name.as_str().to_owned()),
            FieldType::Array(_) => FrameType::Object(field_type.descriptor()),
        }
    }

    fn from_descriptor(descriptor: &str) -> Result<FrameType, Error> {
        let field_type = FieldType::parse(descriptor).map_err(|err| {
            Error::malformed(format!("bad descriptor {:?}: {}", descriptor, err))
        })?;
        Ok(FrameType::from_field_type(&field_type))
    }

    fn object() -> FrameType {
        FrameType::Object(BinaryName::OBJECT.as_str().to_owned())
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, FrameType::Long | FrameType::Double)
    }

    /// Type of a slot reached with both `self` and `other`, if the two have anything in common
    fn merge(&self, other: &FrameType) -> Option<FrameType> {
        match (self, other) {
            _ if self == other => Some(self.clone()),
            (FrameType::Null, FrameType::Object(_)) => Some(other.clone()),
            (FrameType::Object(_), FrameType::Null) => Some(self.clone()),
            (FrameType::Object(_), FrameType::Object(_)) => Some(FrameType::object()),
            _ => None,
        }
    }
}

/// Locals and operand stack at one point in the code, one entry per slot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub locals: Vec<FrameType>,
    pub stack: Vec<FrameType>,
}

/// Types listed the way a stack map frame lists them, with one entry for a `long` or `double`
pub fn compact(slots: &[FrameType]) -> Vec<FrameType> {
    let mut listed = Vec::with_capacity(slots.len());
    let mut idx = 0;
    while idx < slots.len() {
        listed.push(slots[idx].clone());
        idx += if slots[idx].is_wide() { 2 } else { 1 };
    }
    listed
}

/// Slots of types listed the way a stack map frame lists them
pub fn expand(listed: Vec<FrameType>) -> Vec<FrameType> {
    let mut slots = Vec::with_capacity(listed.len());
    for typ in listed {
        let wide = typ.is_wide();
        slots.push(typ);
        if wide {
            slots.push(FrameType::Top);
        }
    }
    slots
}

impl Frame {
    /// Frame on entry to a method: `this` and the parameters, with an empty stack
    ///
    /// In constructors (other than the one of `java/lang/Object`) `this` starts out
    /// uninitialized.
    pub fn method_entry(
        this_class: &str,
        method_name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> Result<Frame, Error> {
        let parsed = MethodDescriptor::parse(descriptor).map_err(|err| {
            Error::malformed(format!("bad method descriptor {}: {}", descriptor, err))
        })?;
        let mut listed = vec![];
        if !is_static {
            if method_name == "<init>" && this_class != BinaryName::OBJECT.as_str() {
                listed.push(FrameType::UninitializedThis);
            } else {
                listed.push(FrameType::Object(this_class.to_owned()));
            }
        }
        listed.extend(parsed.parameters.iter().map(FrameType::from_field_type));
        Ok(Frame {
            locals: expand(listed),
            stack: vec![],
        })
    }

    /// Frame described by a stack map entry, given the frame of the entry before it
    ///
    /// `types` are the entry's verification types, locals first, already resolved.
    pub fn following(
        previous: &Frame,
        entry: &StackMapFrame,
        types: Vec<FrameType>,
    ) -> Result<Frame, Error> {
        let mut types = types.into_iter();
        let frame = match entry {
            StackMapFrame::SameLocalsNoStack { .. } => Frame {
                locals: previous.locals.clone(),
                stack: vec![],
            },
            StackMapFrame::SameLocalsOneStack { .. } => Frame {
                locals: previous.locals.clone(),
                stack: expand(types.collect()),
            },
            StackMapFrame::ChopLocalsNoStack { chopped_k, .. } => {
                let mut listed = compact(&previous.locals);
                let kept = listed
                    .len()
                    .checked_sub(*chopped_k as usize)
                    .ok_or_else(|| Error::malformed("stack map frame chops too many locals"))?;
                listed.truncate(kept);
                Frame {
                    locals: expand(listed),
                    stack: vec![],
                }
            }
            StackMapFrame::AppendLocalsNoStack { .. } => {
                let mut listed = compact(&previous.locals);
                listed.extend(types);
                Frame {
                    locals: expand(listed),
                    stack: vec![],
                }
            }
            StackMapFrame::Full { locals, .. } => {
                let locals: Vec<FrameType> = types.by_ref().take(locals.len()).collect();
                Frame {
                    locals: expand(locals),
                    stack: expand(types.collect()),
                }
            }
        };
        Ok(frame)
    }

    fn push(&mut self, typ: FrameType) {
        let wide = typ.is_wide();
        self.stack.push(typ);
        if wide {
            self.stack.push(FrameType::Top);
        }
    }

    fn pop_slots(&mut self, count: usize) -> Result<Vec<FrameType>, Error> {
        let remaining = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| Error::cannot_compile("operand stack underflow"))?;
        Ok(self.stack.split_off(remaining))
    }

    /// Pop one value, taking both slots of a `long` or `double`
    fn pop_value(&mut self) -> Result<FrameType, Error> {
        let top = self
            .stack
            .pop()
            .ok_or_else(|| Error::cannot_compile("operand stack underflow"))?;
        if top == FrameType::Top && self.stack.last().map_or(false, FrameType::is_wide) {
            return self.pop_value();
        }
        Ok(top)
    }

    fn local(&self, slot: usize) -> FrameType {
        self.locals.get(slot).cloned().unwrap_or(FrameType::Top)
    }

    fn set_local(&mut self, slot: usize, typ: FrameType) {
        let width = if typ.is_wide() { 2 } else { 1 };
        if self.locals.len() < slot + width {
            self.locals.resize(slot + width, FrameType::Top);
        }
        if slot > 0 && self.locals[slot - 1].is_wide() {
            self.locals[slot - 1] = FrameType::Top;
        }
        self.locals[slot] = typ;
        if width == 2 {
            self.locals[slot + 1] = FrameType::Top;
        }
    }

    /// Mark every copy of a freshly constructed object as initialized
    fn initialize(&mut self, uninitialized: &FrameType, class_name: &str) {
        for typ in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if typ == uninitialized {
                *typ = FrameType::Object(class_name.to_owned());
            }
        }
    }

    /// Widen this frame so that it also admits `other`, returning whether anything changed
    ///
    /// Locals that disagree become `Top`; stacks that disagree make the code uncompilable.
    fn merge_from(&mut self, other: &Frame) -> Result<bool, Error> {
        if self.stack.len() != other.stack.len() {
            return Err(Error::cannot_compile(format!(
                "inconsistent stack height ({} vs. {}) at a join point",
                self.stack.len(),
                other.stack.len()
            )));
        }
        let mut changed = false;
        for (mine, theirs) in self.stack.iter_mut().zip(&other.stack) {
            let merged = mine.merge(theirs).ok_or_else(|| {
                Error::cannot_compile(format!(
                    "{:?} and {:?} meet on the operand stack",
                    mine, theirs
                ))
            })?;
            changed |= merged != *mine;
            *mine = merged;
        }

        let length = self.locals.len().min(other.locals.len());
        if self.locals.len() > length {
            changed |= self.locals[length..].iter().any(|typ| *typ != FrameType::Top);
            self.locals.truncate(length);
        }
        for (mine, theirs) in self.locals.iter_mut().zip(&other.locals) {
            let merged = mine.merge(theirs).unwrap_or(FrameType::Top);
            changed |= merged != *mine;
            *mine = merged;
        }
        Ok(changed)
    }
}

/// Slots popped from the stack by a `pop`, `dup`, or `swap` variant, and the order in which they
/// get pushed back (by position among the popped slots, deepest first)
fn shuffle(opcode: u8) -> Option<(usize, &'static [usize])> {
    let shuffle: (usize, &'static [usize]) = match opcode {
        opcodes::POP => (1, &[]),
        opcodes::POP2 => (2, &[]),
        opcodes::DUP => (1, &[0, 0]),
        opcodes::DUP_X1 => (2, &[1, 0, 1]),
        opcodes::DUP_X2 => (3, &[2, 0, 1, 2]),
        opcodes::DUP2 => (2, &[0, 1, 0, 1]),
        opcodes::DUP2_X1 => (3, &[1, 2, 0, 1, 2]),
        opcodes::DUP2_X2 => (4, &[2, 3, 0, 1, 2, 3]),
        opcodes::SWAP => (2, &[1, 0]),
        _ => return None,
    };
    Some(shuffle)
}

/// For each item, the index of the first mark in the run of marks right before it (or its own
/// index if there is no such run), along with where each label sits by that measure
pub(super) fn mark_runs(items: &[Item]) -> (Vec<usize>, HashMap<Label, usize>) {
    let mut run_start = Vec::with_capacity(items.len());
    let mut marks = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        let start = match idx.checked_sub(1).map(|prev| &items[prev]) {
            Some(Item::Mark(_)) => run_start[idx - 1],
            _ => idx,
        };
        run_start.push(start);
        if let Item::Mark(label) = item {
            marks.insert(*label, start);
        }
    }
    (run_start, marks)
}

/// Frame inference over one method body
pub(super) struct Inference<'a> {
    pub items: &'a [Item],
    pub handlers: &'a [Handler],
    pub constants: &'a ConstantPool,
    pub this_class: &'a str,
}

impl Inference<'_> {
    /// Frames at each of the `joins` reachable from the method entry
    ///
    /// `joins` holds item indices which each start a run of marks (or are not preceded by a mark
    /// at all). Frames in `fixed` are taken as they are.
    pub(super) fn run(
        &self,
        entry: &Frame,
        fixed: &HashMap<usize, Frame>,
        joins: &HashSet<usize>,
    ) -> Result<HashMap<usize, Frame>, Error> {
        let items = self.items;
        let (run_start, marks) = mark_runs(items);
        let index_of = |label: &Label| -> Result<usize, Error> {
            marks
                .get(label)
                .copied()
                .ok_or_else(|| Error::malformed(format!("label {:?} is never placed", label)))
        };

        let mut handlers = Vec::with_capacity(self.handlers.len());
        for handler in self.handlers {
            let caught = if handler.catch_type.0 .0 == 0 {
                "java/lang/Throwable"
            } else {
                self.constants.class_name(handler.catch_type)?
            };
            handlers.push((
                index_of(&handler.start)?,
                index_of(&handler.end)?,
                index_of(&handler.handler)?,
                FrameType::Object(caught.to_owned()),
            ));
        }

        let mut states: HashMap<usize, Frame> = HashMap::new();
        let mut worklist = vec![0];
        states.insert(0, fixed.get(&0).unwrap_or(entry).clone());
        let flow = |states: &mut HashMap<usize, Frame>,
                        worklist: &mut Vec<usize>,
                        idx: usize,
                        incoming: &Frame|
         -> Result<(), Error> {
            if let Some(frame) = fixed.get(&idx) {
                if !states.contains_key(&idx) {
                    states.insert(idx, frame.clone());
                    worklist.push(idx);
                }
                return Ok(());
            }
            match states.get_mut(&idx) {
                None => {
                    states.insert(idx, incoming.clone());
                    worklist.push(idx);
                }
                Some(known) => {
                    if known.merge_from(incoming)? {
                        worklist.push(idx);
                    }
                }
            }
            Ok(())
        };

        while let Some(start) = worklist.pop() {
            let mut frame = states[&start].clone();
            let mut idx = start;
            while idx < items.len() {
                if idx != start && run_start[idx] == idx && joins.contains(&idx) {
                    flow(&mut states, &mut worklist, idx, &frame)?;
                    break;
                }

                if let Item::Mark(_) = items[idx] {
                    idx += 1;
                    continue;
                }
                let before = frame.locals.clone();
                match &items[idx] {
                    Item::Mark(_) => (),
                    Item::Op(bytes) => {
                        let at = match idx.checked_sub(1).map(|prev| &items[prev]) {
                            Some(Item::Mark(_)) => match &items[run_start[idx - 1]] {
                                Item::Mark(label) => Some(*label),
                                _ => None,
                            },
                            _ => None,
                        };
                        self.execute(&mut frame, bytes, at)
                            .map_err(|err| at_item(err, idx))?;
                    }
                    Item::Branch(insn, _) => {
                        if insn.opcode() == opcodes::JSR {
                            return Err(Error::cannot_compile(
                                "subroutines cannot be described by stack map frames",
                            ));
                        }
                        let pop = match opcodes::info(insn.opcode()).map(|info| info.stack) {
                            Some(StackEffect::Fixed(pop, _)) => pop as usize,
                            _ => 0,
                        };
                        frame.pop_slots(pop).map_err(|err| at_item(err, idx))?;
                        for target in insn.jump_targets() {
                            flow(&mut states, &mut worklist, index_of(&target)?, &frame)?;
                        }
                    }
                }

                // A handler sees the locals from both before and after the instruction
                for (start, end, handler, caught) in &handlers {
                    if *start < idx && idx < *end {
                        let mut thrown = Frame {
                            locals: before.clone(),
                            stack: vec![caught.clone()],
                        };
                        thrown.merge_from(&Frame {
                            locals: frame.locals.clone(),
                            stack: vec![caught.clone()],
                        })?;
                        flow(&mut states, &mut worklist, *handler, &thrown)?;
                    }
                }

                if !items[idx].falls_through() {
                    break;
                }
                idx += 1;
            }
        }
        trace!("inferred frames at {} positions", states.len());
        Ok(states)
    }

    /// Run one straight-line instruction
    ///
    /// `at` is the first label right before the instruction, if there is one.
    fn execute(&self, frame: &mut Frame, bytes: &[u8], at: Option<Label>) -> Result<(), Error> {
        use opcodes::*;

        let opcode = match bytes {
            [WIDE, opcode, ..] | [opcode, ..] => *opcode,
            [] => return Err(Error::malformed("empty instruction")),
        };
        match opcode {
            ILOAD..=ALOAD | ILOAD_0..=ALOAD_3 => {
                let slot = local_slot(bytes).ok_or_else(|| Error::malformed("truncated load"))?;
                let kind = if opcode <= ALOAD {
                    opcode - ILOAD
                } else {
                    (opcode - ILOAD_0) / 4
                };
                let typ = match kind {
                    0 => FrameType::Integer,
                    1 => FrameType::Long,
                    2 => FrameType::Float,
                    3 => FrameType::Double,
                    _ => frame.local(slot as usize),
                };
                frame.push(typ);
            }
            ISTORE..=ASTORE | ISTORE_0..=ASTORE_3 => {
                let slot = local_slot(bytes).ok_or_else(|| Error::malformed("truncated store"))?;
                let typ = frame.pop_value()?;
                frame.set_local(slot as usize, typ);
            }
            AALOAD => {
                frame.pop_slots(1)?;
                let element = match frame.pop_value()? {
                    FrameType::Object(array) if array.starts_with('[') => {
                        FrameType::from_descriptor(&array[1..])?
                    }
                    FrameType::Null => FrameType::Null,
                    _ => FrameType::object(),
                };
                frame.push(element);
            }
            _ => {
                if let Some((count, order)) = shuffle(opcode) {
                    let popped = frame.pop_slots(count)?;
                    frame.stack.extend(order.iter().map(|idx| popped[*idx].clone()));
                    return Ok(());
                }

                let (pop, push) = stack_effect(bytes, self.constants)?;
                let popped = frame.pop_slots(pop as usize)?;
                match self.produced(opcode, bytes, at)? {
                    Some(typ) if push as usize == if typ.is_wide() { 2 } else { 1 } => {
                        frame.push(typ)
                    }
                    None if push == 0 => (),
                    other => {
                        return Err(Error::malformed(format!(
                            "opcode 0x{:02x} pushes {} slots, not {:?}",
                            opcode, push, other
                        )))
                    }
                }

                if opcode == INVOKESPECIAL {
                    let member = self.constants.member_ref(self.operand(bytes)?)?;
                    if member.name == "<init>" {
                        let receiver = popped
                            .first()
                            .ok_or_else(|| Error::malformed("constructor call without receiver"))?;
                        let class_name = match receiver {
                            FrameType::UninitializedThis => self.this_class,
                            FrameType::Uninitialized(_) => member.class,
                            _ => return Ok(()),
                        };
                        frame.initialize(receiver, class_name);
                    }
                }
            }
        }
        Ok(())
    }

    fn operand(&self, bytes: &[u8]) -> Result<ConstantIndex, Error> {
        operand_u16(bytes)
            .map(ConstantIndex)
            .ok_or_else(|| Error::malformed("truncated instruction"))
    }

    fn class_operand(&self, bytes: &[u8]) -> Result<&str, Error> {
        self.constants
            .class_name(ClassConstantIndex(self.operand(bytes)?))
    }

    /// Type of the value pushed by an instruction (other than loads, `aaload`, and stack
    /// shuffles), or `None` if it pushes nothing
    fn produced(
        &self,
        opcode: u8,
        bytes: &[u8],
        at: Option<Label>,
    ) -> Result<Option<FrameType>, Error> {
        use opcodes::*;

        let typ = match opcode {
            ACONST_NULL => FrameType::Null,
            ICONST_M1..=ICONST_5 | BIPUSH | SIPUSH => FrameType::Integer,
            LCONST_0 | LCONST_1 => FrameType::Long,
            FCONST_0..=FCONST_2 => FrameType::Float,
            DCONST_0 | DCONST_1 => FrameType::Double,
            LDC => {
                let index = bytes
                    .get(1)
                    .ok_or_else(|| Error::malformed("truncated ldc"))?;
                self.constant_type(ConstantIndex(*index as u16))?
            }
            LDC_W | LDC2_W => self.constant_type(self.operand(bytes)?)?,
            IALOAD | BALOAD | CALOAD | SALOAD => FrameType::Integer,
            LALOAD => FrameType::Long,
            FALOAD => FrameType::Float,
            DALOAD => FrameType::Double,
            IADD..=DNEG => match (opcode - IADD) % 4 {
                0 => FrameType::Integer,
                1 => FrameType::Long,
                2 => FrameType::Float,
                _ => FrameType::Double,
            },
            ISHL..=LUSHR | IAND..=LXOR => {
                if (opcode - ISHL) % 2 == 0 {
                    FrameType::Integer
                } else {
                    FrameType::Long
                }
            }
            I2L | F2L | D2L => FrameType::Long,
            I2F | L2F | D2F => FrameType::Float,
            I2D | L2D | F2D => FrameType::Double,
            L2I | F2I | D2I | I2B | I2C | I2S | LCMP..=DCMPG | ARRAYLENGTH | INSTANCEOF => {
                FrameType::Integer
            }
            GETSTATIC | GETFIELD => {
                let member = self.constants.member_ref(self.operand(bytes)?)?;
                FrameType::from_descriptor(member.descriptor)?
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                let member = self.constants.member_ref(self.operand(bytes)?)?;
                return returned(member.descriptor);
            }
            INVOKEDYNAMIC => match self.constants.get(self.operand(bytes)?)? {
                Constant::InvokeDynamic {
                    method_descriptor, ..
                } => {
                    let (_, descriptor) = self.constants.name_and_type(*method_descriptor)?;
                    return returned(descriptor);
                }
                other => {
                    return Err(Error::malformed(format!(
                        "invokedynamic refers to {:?}",
                        other
                    )))
                }
            },
            NEW => FrameType::Uninitialized(
                at.ok_or_else(|| Error::malformed("`new` without a label before it"))?,
            ),
            NEWARRAY => {
                let element = bytes
                    .get(1)
                    .and_then(|code| array_type_from_code(*code))
                    .ok_or_else(|| Error::malformed("bad newarray element type"))?;
                FrameType::Object(format!("[{}", element.as_char()))
            }
            ANEWARRAY => {
                let element = self.class_operand(bytes)?;
                if element.starts_with('[') {
                    FrameType::Object(format!("[{}", element))
                } else {
                    FrameType::Object(format!("[L{};", element))
                }
            }
            CHECKCAST | MULTIANEWARRAY => FrameType::Object(self.class_operand(bytes)?.to_owned()),
            _ => return Ok(None),
        };
        Ok(Some(typ))
    }

    /// Type pushed by `ldc` and friends
    fn constant_type(&self, index: ConstantIndex) -> Result<FrameType, Error> {
        let typ = match self.constants.get(index)? {
            Constant::Integer(_) => FrameType::Integer,
            Constant::Float(_) => FrameType::Float,
            Constant::Long(_) => FrameType::Long,
            Constant::Double(_) => FrameType::Double,
            Constant::String(_) => FrameType::Object(String::from("java/lang/String")),
            Constant::Class(_) => FrameType::Object(String::from("java/lang/Class")),
            Constant::MethodType { .. } => {
                FrameType::Object(String::from("java/lang/invoke/MethodType"))
            }
            Constant::MethodHandle { .. } => {
                FrameType::Object(String::from("java/lang/invoke/MethodHandle"))
            }
            Constant::Dynamic { name_and_type, .. } => {
                let (_, descriptor) = self.constants.name_and_type(*name_and_type)?;
                FrameType::from_descriptor(descriptor)?
            }
            other => {
                return Err(Error::malformed(format!(
                    "constant {:?} cannot be loaded",
                    other
                )))
            }
        };
        Ok(typ)
    }
}

fn returned(descriptor: &str) -> Result<Option<FrameType>, Error> {
    let method = MethodDescriptor::parse(descriptor)
        .map_err(|err| Error::malformed(format!("bad descriptor {:?}: {}", descriptor, err)))?;
    Ok(method.return_type.as_ref().map(FrameType::from_field_type))
}

fn at_item(err: Error, idx: usize) -> Error {
    match err {
        Error::CannotCompile(msg) => Error::CannotCompile(format!("{} at item {}", msg, idx)),
        other => other,
    }
}

/// Pick the shortest stack map entry taking `previous` locals to the given ones
///
/// Both the locals and the stack are listed one entry per value.
pub fn compress_frame(
    offset_delta: u16,
    locals: &[VerificationType],
    stack: &[VerificationType],
    previous: &[VerificationType],
) -> StackMapFrame {
    match stack {
        [] if locals == previous => return StackMapFrame::SameLocalsNoStack { offset_delta },
        [] if locals.len() < previous.len()
            && previous.len() - locals.len() < 4
            && previous.starts_with(locals) =>
        {
            return StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k: (previous.len() - locals.len()) as u8,
            }
        }
        [] if locals.len() > previous.len()
            && locals.len() - previous.len() < 4
            && locals.starts_with(previous) =>
        {
            return StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals: locals[previous.len()..].to_vec(),
            }
        }
        [only] if locals == previous => {
            return StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack: *only,
            }
        }
        _ => (),
    }
    StackMapFrame::Full {
        offset_delta,
        locals: locals.to_vec(),
        stack: stack.to_vec(),
    }
}
