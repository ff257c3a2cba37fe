use super::frames::{compact, compress_frame, mark_runs, Inference};
use super::layout::Layout;
use super::opcodes::{self, instruction_length};
use super::{
    BranchInstruction, Fragment, Frame, FrameType, Instruction, Label, LabelGenerator,
    SequentialLabels,
};
use crate::jvm::class_file::{
    Attribute, ClassConstantIndex, Code, ConstantPool, ExceptionHandler,
    LineNumber, LineNumberTable, LocalVariable, LocalVariableTable, LocalVariableTypeTable,
    StackMapFrame, StackMapTable, Utf8ConstantIndex, VerificationType,
};
use crate::jvm::Error;
use log::{trace, warn};
use std::collections::{HashMap, HashSet};

/// One element of a method body being edited
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    /// Position marker, taking up no space in the encoded code
    Mark(Label),

    /// Straight-line instruction, as encoded bytes (including any `wide` prefix)
    Op(Vec<u8>),

    /// Jump, switch, return, or `athrow`
    Branch(BranchInstruction<Label>, JumpWidth),
}

/// Width of the relative offset used by a jump
///
/// Layout only ever widens jumps, so a jump read as `goto_w` is written back as `goto_w`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JumpWidth {
    Narrow,
    Wide,
}

impl Item {
    pub fn branch(insn: BranchInstruction<Label>) -> Item {
        Item::Branch(insn, JumpWidth::Narrow)
    }

    /// Opcode of the instruction (`None` for marks)
    pub fn opcode(&self) -> Option<u8> {
        match self {
            Item::Mark(_) => None,
            Item::Op(bytes) => bytes.first().copied(),
            Item::Branch(insn, _) => Some(insn.opcode()),
        }
    }

    /// Whether execution can continue with the item after this one
    pub fn falls_through(&self) -> bool {
        match self {
            Item::Mark(_) => true,
            Item::Op(bytes) => !matches!(
                bytes.as_slice(),
                [opcodes::RET, ..] | [opcodes::WIDE, opcodes::RET, ..]
            ),
            Item::Branch(insn, _) => insn.falls_through(),
        }
    }
}

impl From<Instruction> for Item {
    fn from(insn: Instruction) -> Item {
        Item::Op(insn.encode())
    }
}

/// Exception handler entry, in terms of labels
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Handler {
    /// Start of the covered range (inclusive)
    pub start: Label,

    /// End of the covered range (exclusive)
    pub end: Label,

    pub handler: Label,

    /// Caught class, or index 0 to catch everything
    pub catch_type: ClassConstantIndex,
}

/// Entry of a `LocalVariableTable` or `LocalVariableTypeTable`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LocalVariableRange {
    pub start: Label,
    pub end: Label,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub index: u16,
}

#[derive(Clone, Debug)]
struct FrameAt {
    label: Label,
    frame: StackMapFrame,

    /// Positions of the `new` instructions of every `Uninitialized` entry in the frame
    uninitialized: Vec<Label>,
}

/// Attributes of the `Code` attribute, kept in their original order
#[derive(Clone, Debug)]
enum CodeAttribute {
    LineNumbers(Vec<(Label, u16)>),
    LocalVariables(Vec<LocalVariableRange>),
    LocalVariableTypes(Vec<LocalVariableRange>),
    StackMap(Vec<FrameAt>),

    /// Stack map rebuilt after an edit, written out from scratch on assembly
    InferredStackMap {
        entry: Frame,
        frames: Vec<(Label, Frame)>,
    },
    Other(Attribute),
}

/// Editable method body
///
/// The code array is decoded into a list of items where every instruction is preceded by a
/// [`Item::Mark`], and a final mark sits at the end of the code. Branches, exception handlers and
/// debugging tables all refer to these marks, so inserting or removing items never requires
/// fixing up offsets by hand: [`CodeEditor::assemble`] recomputes everything in one pass.
#[derive(Clone, Debug)]
pub struct CodeEditor {
    pub items: Vec<Item>,
    pub handlers: Vec<Handler>,
    pub max_stack: u16,
    pub max_locals: u16,
    attributes: Vec<CodeAttribute>,
    labels: SequentialLabels,
}

impl LabelGenerator<Label> for CodeEditor {
    fn fresh_label(&mut self) -> Label {
        self.labels.fresh_label()
    }
}

/// Labels of every instruction boundary in a code array
pub(super) struct OffsetLabels(Vec<Option<Label>>);

impl OffsetLabels {
    fn at(&self, offset: usize) -> Result<Label, Error> {
        self.0.get(offset).copied().flatten().ok_or_else(|| {
            Error::malformed(format!("offset {} is not an instruction boundary", offset))
        })
    }

    /// Label of an instruction (not the end of the code) at a relative offset
    fn relative(&self, from: usize, offset: i64) -> Result<Label, Error> {
        let target = from as i64 + offset;
        if target < 0 || target as usize + 1 >= self.0.len() {
            return Err(Error::malformed(format!(
                "jump at {} leaves the code (offset {})",
                from, offset
            )));
        }
        self.at(target as usize)
    }
}

fn i16_at(bytes: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn i32_at(bytes: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decode a code array into items, giving every instruction boundary a fresh label
pub(super) fn decode_items(
    code: &[u8],
    labels: &mut impl LabelGenerator<Label>,
) -> Result<(Vec<Item>, OffsetLabels), Error> {
    let mut starts = vec![];
    let mut pos = 0;
    while pos < code.len() {
        let len = instruction_length(code, pos)?;
        starts.push((pos, len));
        pos += len;
    }

    let mut at = vec![None; code.len() + 1];
    for (pos, _) in &starts {
        at[*pos] = Some(labels.fresh_label());
    }
    at[code.len()] = Some(labels.fresh_label());
    let offsets = OffsetLabels(at);

    let mut items = Vec::with_capacity(starts.len() * 2 + 1);
    for (pos, len) in starts {
        items.push(Item::Mark(offsets.at(pos)?));
        items.push(decode_instruction(&code[pos..pos + len], pos, &offsets)?);
    }
    items.push(Item::Mark(offsets.at(code.len())?));
    trace!("decoded {} bytes of code into {} items", code.len(), items.len());
    Ok((items, offsets))
}

fn decode_instruction(bytes: &[u8], pos: usize, offsets: &OffsetLabels) -> Result<Item, Error> {
    let opcode = bytes[0];
    let item = match opcode {
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let target = offsets.relative(pos, i16_at(bytes, 1) as i64)?;
            match BranchInstruction::from_jump_opcode(opcode, target) {
                Some(insn) => Item::Branch(insn, JumpWidth::Narrow),
                None => return Err(Error::malformed(format!("bad jump opcode {}", opcode))),
            }
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let target = offsets.relative(pos, i32_at(bytes, 1) as i64)?;
            match BranchInstruction::from_jump_opcode(opcode, target) {
                Some(insn) => Item::Branch(insn, JumpWidth::Wide),
                None => return Err(Error::malformed(format!("bad jump opcode {}", opcode))),
            }
        }
        opcodes::TABLESWITCH => {
            let base = 1 + opcodes::switch_padding(pos);
            let default = offsets.relative(pos, i32_at(bytes, base) as i64)?;
            let low = i32_at(bytes, base + 4);
            let high = i32_at(bytes, base + 8);
            let count = (high as i64 - low as i64 + 1) as usize;
            let targets = (0..count)
                .map(|i| offsets.relative(pos, i32_at(bytes, base + 12 + 4 * i) as i64))
                .collect::<Result<Vec<_>, _>>()?;
            Item::branch(BranchInstruction::TableSwitch {
                default,
                low,
                targets,
            })
        }
        opcodes::LOOKUPSWITCH => {
            let base = 1 + opcodes::switch_padding(pos);
            let default = offsets.relative(pos, i32_at(bytes, base) as i64)?;
            let count = i32_at(bytes, base + 4) as usize;
            let targets = (0..count)
                .map(|i| {
                    let key = i32_at(bytes, base + 8 + 8 * i);
                    let target = offsets.relative(pos, i32_at(bytes, base + 12 + 8 * i) as i64)?;
                    Ok((key, target))
                })
                .collect::<Result<Vec<_>, Error>>()?;
            Item::branch(BranchInstruction::LookupSwitch { default, targets })
        }
        opcodes::IRETURN..=opcodes::RETURN | opcodes::ATHROW => {
            match BranchInstruction::from_exit_opcode(opcode) {
                Some(insn) => Item::branch(insn),
                None => return Err(Error::malformed(format!("bad exit opcode {}", opcode))),
            }
        }
        _ => Item::Op(bytes.to_vec()),
    };
    Ok(item)
}

impl CodeEditor {
    /// Decode a method body
    pub fn decode(code: &Code, constants: &ConstantPool) -> Result<CodeEditor, Error> {
        let mut labels = SequentialLabels::new();
        let (items, offsets) = decode_items(&code.code_array, &mut labels)?;

        let handlers = code
            .exception_table
            .iter()
            .map(|entry| {
                Ok(Handler {
                    start: offsets.at(entry.start_pc as usize)?,
                    end: offsets.at(entry.end_pc as usize)?,
                    handler: offsets.at(entry.handler_pc as usize)?,
                    catch_type: entry.catch_type,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let mut attributes = vec![];
        for attribute in &code.attributes {
            let decoded = match attribute.name(constants)? {
                "LineNumberTable" => {
                    let LineNumberTable(entries) = attribute.decode::<LineNumberTable>()?;
                    let lines = entries
                        .iter()
                        .map(|entry| Ok((offsets.at(entry.start_pc as usize)?, entry.line_number)))
                        .collect::<Result<Vec<_>, Error>>()?;
                    CodeAttribute::LineNumbers(lines)
                }
                "LocalVariableTable" => {
                    let LocalVariableTable(entries) = attribute.decode::<LocalVariableTable>()?;
                    CodeAttribute::LocalVariables(decode_local_variables(&entries, &offsets)?)
                }
                "LocalVariableTypeTable" => {
                    let LocalVariableTypeTable(entries) = attribute.decode::<LocalVariableTypeTable>()?;
                    CodeAttribute::LocalVariableTypes(decode_local_variables(&entries, &offsets)?)
                }
                "StackMapTable" => {
                    let StackMapTable(frames) = attribute.decode::<StackMapTable>()?;
                    CodeAttribute::StackMap(decode_frames(frames, &offsets)?)
                }
                _ => CodeAttribute::Other(attribute.clone()),
            };
            attributes.push(decoded);
        }

        Ok(CodeEditor {
            items,
            handlers,
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            attributes,
            labels,
        })
    }

    /// Fresh method body made out of a single fragment
    pub fn from_fragment(fragment: &Fragment) -> CodeEditor {
        let mut labels = SequentialLabels::new();
        let fragment = fragment.relabel(&mut labels);
        let end = labels.fresh_label();
        let mut items = fragment.items;
        items.push(Item::Mark(end));
        CodeEditor {
            items,
            handlers: fragment.handlers,
            max_stack: fragment.max_stack,
            max_locals: fragment.max_locals,
            attributes: vec![],
            labels,
        }
    }

    pub fn fresh_label(&mut self) -> Label {
        self.labels.fresh_label()
    }

    /// Index of the mark for a label
    pub fn position(&self, label: Label) -> Option<usize> {
        self.items
            .iter()
            .position(|item| matches!(item, Item::Mark(lbl) if *lbl == label))
    }

    /// Label of the final mark in the body, adding one at the very end if there is none
    pub fn end_label(&mut self) -> Label {
        if let Some(Item::Mark(label)) = self.items.last() {
            return *label;
        }
        let label = self.fresh_label();
        self.items.push(Item::Mark(label));
        label
    }

    /// Mark the position before the item at `index`, reusing a mark already there
    pub fn label_at(&mut self, index: usize) -> Label {
        if let Some(Item::Mark(label)) = self.items.get(index) {
            return *label;
        }
        let label = self.fresh_label();
        self.items.insert(index, Item::Mark(label));
        label
    }

    /// Splice a fragment in before the item at `index`
    ///
    /// The fragment is framed by two fresh marks, whose labels are returned. The fragment's own
    /// exception handlers are put in front of the existing ones, so that they take precedence.
    /// `max_stack` and `max_locals` are left for the caller to adjust.
    pub fn insert_fragment(&mut self, index: usize, fragment: &Fragment) -> (Label, Label) {
        let fragment = fragment.relabel(&mut self.labels);
        let start = self.fresh_label();
        let end = self.fresh_label();

        let mut spliced = Vec::with_capacity(fragment.items.len() + 2);
        spliced.push(Item::Mark(start));
        spliced.extend(fragment.items);
        spliced.push(Item::Mark(end));
        self.items.splice(index..index, spliced);

        let mut handlers = fragment.handlers;
        handlers.append(&mut self.handlers);
        self.handlers = handlers;
        trace!("spliced fragment in at item {} ({:?}..{:?})", index, start, end);
        (start, end)
    }

    /// Splice a fragment in at the very end of the body
    pub fn append_fragment(&mut self, fragment: &Fragment) -> (Label, Label) {
        self.insert_fragment(self.items.len(), fragment)
    }

    /// Line numbers, in table order
    pub fn line_numbers(&self) -> Vec<(Label, u16)> {
        self.attributes
            .iter()
            .flat_map(|attribute| match attribute {
                CodeAttribute::LineNumbers(lines) => lines.clone(),
                _ => vec![],
            })
            .collect()
    }

    /// Make sure every position which needs a stack map frame has one
    ///
    /// Those positions are jump targets, handlers, and instructions following an unconditional
    /// jump. If the frames already in the `StackMapTable` still cover all of them, the table is
    /// left alone. Otherwise the missing frames are inferred, starting from `entry` (the frame
    /// on method entry), and the table is written out again in full on assembly. A body with no
    /// table and no position needing a frame gets no table.
    pub fn compute_frames(
        &mut self,
        entry: &Frame,
        this_class: &str,
        constants: &ConstantPool,
    ) -> Result<(), Error> {
        self.mark_frame_positions();
        let (run_start, marks) = mark_runs(&self.items);
        let index_of = |label: Label| -> Result<usize, Error> {
            marks
                .get(&label)
                .copied()
                .ok_or_else(|| Error::malformed(format!("label {:?} is never placed", label)))
        };

        let mut needed = HashSet::new();
        for handler in &self.handlers {
            needed.insert(index_of(handler.handler)?);
        }
        let mut after_jump = false;
        for (idx, item) in self.items.iter().enumerate() {
            match item {
                Item::Mark(_) => continue,
                Item::Branch(insn, _) => {
                    for target in insn.jump_targets() {
                        needed.insert(index_of(target)?);
                    }
                }
                Item::Op(_) => (),
            }
            if after_jump {
                needed.insert(run_start[idx]);
            }
            after_jump = !item.falls_through();
        }

        let table = self
            .attributes
            .iter()
            .position(|attribute| {
                matches!(
                    attribute,
                    CodeAttribute::StackMap(_) | CodeAttribute::InferredStackMap { .. }
                )
            });
        let mut fixed = HashMap::new();
        if let Some(CodeAttribute::InferredStackMap { frames, .. }) =
            table.map(|idx| &self.attributes[idx])
        {
            for (label, frame) in frames {
                fixed.insert(index_of(*label)?, frame.clone());
            }
        }
        if let Some(CodeAttribute::StackMap(frames)) = table.map(|idx| &self.attributes[idx]) {
            let mut previous = entry.clone();
            for frame_at in frames {
                let mut news = frame_at.uninitialized.iter();
                let types = frame_at
                    .frame
                    .verification_types()
                    .into_iter()
                    .map(|typ| {
                        let typ = match typ {
                            VerificationType::Top => FrameType::Top,
                            VerificationType::Integer => FrameType::Integer,
                            VerificationType::Float => FrameType::Float,
                            VerificationType::Long => FrameType::Long,
                            VerificationType::Double => FrameType::Double,
                            VerificationType::Null => FrameType::Null,
                            VerificationType::UninitializedThis => FrameType::UninitializedThis,
                            VerificationType::Object(class) => {
                                FrameType::Object(constants.class_name(*class)?.to_owned())
                            }
                            VerificationType::Uninitialized(_) => {
                                let label = *news.next().ok_or_else(|| {
                                    Error::malformed("stack map frame lost an entry")
                                })?;
                                match self.items[index_of(label)?] {
                                    Item::Mark(first) => FrameType::Uninitialized(first),
                                    _ => FrameType::Uninitialized(label),
                                }
                            }
                        };
                        Ok(typ)
                    })
                    .collect::<Result<Vec<_>, Error>>()?;
                let frame = Frame::following(&previous, &frame_at.frame, types)?;
                fixed.insert(index_of(frame_at.label)?, frame.clone());
                previous = frame;
            }
        }
        if needed.iter().all(|idx| fixed.contains_key(idx)) {
            return Ok(());
        }

        let joins: HashSet<usize> = needed.iter().chain(fixed.keys()).copied().collect();
        let inference = Inference {
            items: &self.items,
            handlers: &self.handlers,
            constants,
            this_class,
        };
        let mut states = inference.run(entry, &fixed, &joins)?;

        let mut positions: Vec<usize> = joins.into_iter().collect();
        positions.sort_unstable();
        let mut frames = Vec::with_capacity(positions.len());
        for idx in positions {
            let frame = fixed
                .remove(&idx)
                .or_else(|| states.remove(&idx))
                .ok_or_else(|| {
                    Error::cannot_compile(format!(
                        "unreachable code at item {} needs a stack map frame",
                        idx
                    ))
                })?;
            match self.items[idx] {
                Item::Mark(label) => frames.push((label, frame)),
                _ => return Err(Error::malformed(format!("no mark at item {}", idx))),
            }
        }
        trace!("rebuilt stack map with {} frames", frames.len());

        let inferred = CodeAttribute::InferredStackMap {
            entry: entry.clone(),
            frames,
        };
        match table {
            Some(idx) => self.attributes[idx] = inferred,
            None => self.attributes.push(inferred),
        }
        Ok(())
    }

    /// Put a mark right before every `new` and every instruction following an unconditional
    /// jump, where there is none yet
    fn mark_frame_positions(&mut self) {
        let mut idx = 0;
        while idx < self.items.len() {
            let previous = idx.checked_sub(1).map(|prev| &self.items[prev]);
            let needs_mark = match (previous, &self.items[idx]) {
                (_, Item::Mark(_)) | (Some(Item::Mark(_)), _) => false,
                (previous, item) => {
                    item.opcode() == Some(opcodes::NEW)
                        || previous.map_or(false, |previous| !previous.falls_through())
                }
            };
            if needs_mark {
                let label = self.fresh_label();
                self.items.insert(idx, Item::Mark(label));
                idx += 1;
            }
            idx += 1;
        }
    }

    /// Lay out the items and encode the result back into a `Code` attribute
    pub fn assemble(&self, constants: &mut ConstantPool) -> Result<Code, Error> {
        if !self.items.iter().any(|item| !matches!(item, Item::Mark(_))) {
            return Err(Error::malformed("method body has no instructions"));
        }
        let layout = Layout::compute(&self.items)?;
        let code_array = layout.encode(&self.items)?;
        let offset = |label: Label| -> Result<u16, Error> { Ok(layout.offset(label)? as u16) };

        let mut exception_table = vec![];
        for handler in &self.handlers {
            let start_pc = offset(handler.start)?;
            let end_pc = offset(handler.end)?;
            if start_pc >= end_pc {
                trace!("dropping empty exception range {:?}..{:?}", handler.start, handler.end);
                continue;
            }
            exception_table.push(ExceptionHandler {
                start_pc,
                end_pc,
                handler_pc: offset(handler.handler)?,
                catch_type: handler.catch_type,
            });
        }

        let mut attributes = vec![];
        for attribute in &self.attributes {
            let encoded = match attribute {
                CodeAttribute::LineNumbers(lines) => {
                    let entries = lines
                        .iter()
                        .map(|(label, line_number)| {
                            Ok(LineNumber {
                                start_pc: offset(*label)?,
                                line_number: *line_number,
                            })
                        })
                        .collect::<Result<Vec<_>, Error>>()?;
                    constants.get_attribute(&LineNumberTable(entries))?
                }
                CodeAttribute::LocalVariables(ranges) => {
                    let entries = encode_local_variables(ranges, &layout)?;
                    constants.get_attribute(&LocalVariableTable(entries))?
                }
                CodeAttribute::LocalVariableTypes(ranges) => {
                    let entries = encode_local_variables(ranges, &layout)?;
                    constants.get_attribute(&LocalVariableTypeTable(entries))?
                }
                CodeAttribute::InferredStackMap { entry, frames } => {
                    let frames = encode_inferred_frames(entry, frames, &layout, constants)?;
                    constants.get_attribute(&StackMapTable(frames))?
                }
                CodeAttribute::StackMap(frames) => match self.encode_frames(frames, &layout)? {
                    Some(frames) => constants.get_attribute(&StackMapTable(frames))?,
                    None => {
                        warn!("dropping StackMapTable: edited code has jump targets without frames");
                        continue;
                    }
                },
                CodeAttribute::Other(attribute) => attribute.clone(),
            };
            attributes.push(encoded);
        }

        Ok(Code {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code_array,
            exception_table,
            attributes,
        })
    }

    /// Re-encode stack map frames, or `None` if the frames no longer cover every position which
    /// needs one (jump targets, handlers, and instructions following an unconditional jump)
    fn encode_frames(
        &self,
        frames: &[FrameAt],
        layout: &Layout,
    ) -> Result<Option<Vec<StackMapFrame>>, Error> {
        let mut framed = HashSet::new();
        for frame in frames {
            framed.insert(layout.offset(frame.label)?);
        }

        let mut needs_frame = HashSet::new();
        for handler in &self.handlers {
            needs_frame.insert(layout.offset(handler.handler)?);
        }
        let mut after_jump = false;
        for (idx, item) in self.items.iter().enumerate() {
            match item {
                Item::Mark(_) => continue,
                Item::Branch(insn, _) => {
                    for target in insn.jump_targets() {
                        needs_frame.insert(layout.offset(target)?);
                    }
                }
                Item::Op(_) => (),
            }
            if after_jump {
                needs_frame.insert(layout.item_offset(idx));
            }
            after_jump = !item.falls_through();
        }
        if !needs_frame.is_subset(&framed) {
            return Ok(None);
        }

        let mut encoded = Vec::with_capacity(frames.len());
        let mut previous: Option<usize> = None;
        for frame_at in frames {
            let at = layout.offset(frame_at.label)?;
            let delta = match previous {
                None => at,
                Some(prev) if at > prev => at - prev - 1,
                Some(_) => return Ok(None),
            };
            previous = Some(at);

            let mut frame = frame_at.frame.clone();
            frame.set_offset_delta(delta as u16);
            let mut uninitialized = frame_at.uninitialized.iter();
            for typ in frame.verification_types_mut() {
                if let VerificationType::Uninitialized(offset) = typ {
                    let label = uninitialized
                        .next()
                        .ok_or_else(|| Error::malformed("stack map frame lost an entry"))?;
                    *offset = layout.offset(*label)? as u16;
                }
            }
            encoded.push(frame);
        }
        Ok(Some(encoded))
    }
}

fn encode_inferred_frames(
    entry: &Frame,
    frames: &[(Label, Frame)],
    layout: &Layout,
    constants: &mut ConstantPool,
) -> Result<Vec<StackMapFrame>, Error> {
    let mut previous = verification_types(&entry.locals, true, layout, constants)?;
    let mut last: Option<usize> = None;
    let mut encoded = Vec::with_capacity(frames.len());
    for (label, frame) in frames {
        let at = layout.offset(*label)?;
        let delta = match last {
            None => at,
            Some(prev) if at > prev => at - prev - 1,
            Some(_) => return Err(Error::malformed("stack map frames out of order")),
        };
        last = Some(at);
        let locals = verification_types(&frame.locals, true, layout, constants)?;
        let stack = verification_types(&frame.stack, false, layout, constants)?;
        encoded.push(compress_frame(delta as u16, &locals, &stack, &previous));
        previous = locals;
    }
    Ok(encoded)
}

/// Verification types of some slots, one per value (leaving off unused trailing locals)
fn verification_types(
    slots: &[FrameType],
    trim: bool,
    layout: &Layout,
    constants: &mut ConstantPool,
) -> Result<Vec<VerificationType>, Error> {
    let mut listed = compact(slots);
    while trim && listed.last() == Some(&FrameType::Top) {
        listed.pop();
    }
    listed
        .iter()
        .map(|typ| {
            let typ = match typ {
                FrameType::Top => VerificationType::Top,
                FrameType::Integer => VerificationType::Integer,
                FrameType::Float => VerificationType::Float,
                FrameType::Long => VerificationType::Long,
                FrameType::Double => VerificationType::Double,
                FrameType::Null => VerificationType::Null,
                FrameType::UninitializedThis => VerificationType::UninitializedThis,
                FrameType::Uninitialized(label) => {
                    VerificationType::Uninitialized(layout.offset(*label)? as u16)
                }
                FrameType::Object(class_name) => {
                    VerificationType::Object(constants.get_class(class_name)?)
                }
            };
            Ok(typ)
        })
        .collect()
}

fn decode_local_variables(
    entries: &[LocalVariable],
    offsets: &OffsetLabels,
) -> Result<Vec<LocalVariableRange>, Error> {
    entries
        .iter()
        .map(|entry| {
            Ok(LocalVariableRange {
                start: offsets.at(entry.start_pc as usize)?,
                end: offsets.at(entry.start_pc as usize + entry.length as usize)?,
                name_index: entry.name_index,
                descriptor_index: entry.descriptor_index,
                index: entry.index,
            })
        })
        .collect()
}

fn encode_local_variables(
    ranges: &[LocalVariableRange],
    layout: &Layout,
) -> Result<Vec<LocalVariable>, Error> {
    ranges
        .iter()
        .map(|range| {
            let start = layout.offset(range.start)?;
            let end = layout.offset(range.end)?;
            Ok(LocalVariable {
                start_pc: start as u16,
                length: end.saturating_sub(start) as u16,
                name_index: range.name_index,
                descriptor_index: range.descriptor_index,
                index: range.index,
            })
        })
        .collect()
}

fn decode_frames(frames: Vec<StackMapFrame>, offsets: &OffsetLabels) -> Result<Vec<FrameAt>, Error> {
    let mut decoded = Vec::with_capacity(frames.len());
    let mut previous: Option<usize> = None;
    for mut frame in frames {
        let delta = frame.offset_delta() as usize;
        let at = match previous {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        previous = Some(at);

        let mut uninitialized = vec![];
        for typ in frame.verification_types_mut() {
            if let VerificationType::Uninitialized(offset) = typ {
                uninitialized.push(offsets.at(*offset as usize)?);
            }
        }
        decoded.push(FrameAt {
            label: offsets.at(at)?,
            frame,
            uninitialized,
        });
    }
    Ok(decoded)
}

/// Labels to use in place of the ones in some items, generated on demand
pub(super) struct Relabel<'g, G> {
    generator: &'g mut G,
    mapping: HashMap<Label, Label>,
}

impl<'g, G: LabelGenerator<Label>> Relabel<'g, G> {
    pub(super) fn new(generator: &'g mut G) -> Self {
        Relabel {
            generator,
            mapping: HashMap::new(),
        }
    }

    pub(super) fn map(&mut self, label: Label) -> Label {
        let generator = &mut self.generator;
        *self
            .mapping
            .entry(label)
            .or_insert_with(|| generator.fresh_label())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::opcodes::*;

    fn code(code_array: Vec<u8>) -> Code {
        Code {
            max_stack: 2,
            max_locals: 2,
            code_array,
            exception_table: vec![],
            attributes: vec![],
        }
    }

    #[test]
    fn untouched_code_reassembles_identically() {
        let mut constants = ConstantPool::new();
        // 0: iload_1; 1: ifeq 8; 4: iconst_1; 5: goto 9; 8: iconst_0; 9: ireturn
        let mut body = code(vec![ILOAD_1, IFEQ, 0, 7, ICONST_1, GOTO, 0, 4, ICONST_0, IRETURN]);
        body.exception_table.push(ExceptionHandler {
            start_pc: 0,
            end_pc: 9,
            handler_pc: 9,
            catch_type: ClassConstantIndex(crate::jvm::class_file::ConstantIndex(0)),
        });
        let lines = LineNumberTable(vec![
            LineNumber { start_pc: 0, line_number: 3 },
            LineNumber { start_pc: 8, line_number: 4 },
        ]);
        body.attributes.push(constants.get_attribute(&lines).unwrap());

        let editor = CodeEditor::decode(&body, &constants).unwrap();
        assert_eq!(editor.line_numbers().len(), 2);
        assert_eq!(editor.assemble(&mut constants).unwrap(), body);
    }

    #[test]
    fn inserting_shifts_everything() {
        let mut constants = ConstantPool::new();
        let mut body = code(vec![ILOAD_1, IFEQ, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN]);
        body.exception_table.push(ExceptionHandler {
            start_pc: 0,
            end_pc: 6,
            handler_pc: 6,
            catch_type: ClassConstantIndex(crate::jvm::class_file::ConstantIndex(0)),
        });
        let mut editor = CodeEditor::decode(&body, &constants).unwrap();

        let fragment = Fragment::from_bytes(&[NOP, NOP, NOP], 0, 0).unwrap();
        editor.insert_fragment(0, &fragment);
        let edited = editor.assemble(&mut constants).unwrap();

        assert_eq!(
            edited.code_array,
            vec![NOP, NOP, NOP, ILOAD_1, IFEQ, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN]
        );
        let handler = edited.exception_table[0];
        assert_eq!((handler.start_pc, handler.end_pc, handler.handler_pc), (3, 9, 9));
    }

    #[test]
    fn switches_are_repadded() {
        let mut constants = ConstantPool::new();
        // 0: iload_1; 1: tableswitch (2 bytes padding) default 21, low 0, high 0, 0 -> 20
        let mut array = vec![ILOAD_1, TABLESWITCH, 0, 0];
        array.extend_from_slice(&[0, 0, 0, 20, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 19]);
        array.extend_from_slice(&[ICONST_0, IRETURN]);
        let body = code(array);
        let mut editor = CodeEditor::decode(&body, &constants).unwrap();

        let fragment = Fragment::from_bytes(&[NOP], 0, 0).unwrap();
        editor.insert_fragment(0, &fragment);
        let edited = editor.assemble(&mut constants).unwrap();

        // the switch now sits at 2, so it needs only one byte of padding
        let mut expected = vec![NOP, ILOAD_1, TABLESWITCH, 0];
        expected.extend_from_slice(&[0, 0, 0, 19, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 18]);
        expected.extend_from_slice(&[ICONST_0, IRETURN]);
        assert_eq!(edited.code_array, expected);
    }

    #[test]
    fn rejects_jumps_into_instructions() {
        let constants = ConstantPool::new();
        let body = code(vec![GOTO, 0, 1, NOP, RETURN]);
        assert!(matches!(
            CodeEditor::decode(&body, &constants),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn stale_stack_map_is_dropped() {
        let mut constants = ConstantPool::new();
        // 0: iload_1; 1: ifeq 5; 4: return; 5: return (frame at 5)
        let mut body = code(vec![ILOAD_1, IFEQ, 0, 4, RETURN, RETURN]);
        let frames = StackMapTable(vec![StackMapFrame::SameLocalsNoStack { offset_delta: 5 }]);
        body.attributes.push(constants.get_attribute(&frames).unwrap());
        let editor = CodeEditor::decode(&body, &constants).unwrap();
        assert_eq!(editor.assemble(&mut constants).unwrap(), body);

        // a fragment with its own loop introduces a jump target with no frame
        let mut editor = CodeEditor::decode(&body, &constants).unwrap();
        let fragment = Fragment::from_bytes(&[NOP, GOTO, 0, 0], 0, 0).unwrap();
        editor.insert_fragment(0, &fragment);
        let edited = editor.assemble(&mut constants).unwrap();
        assert!(edited.attributes.is_empty());
    }

    #[test]
    fn frames_cover_new_jump_targets() {
        let mut constants = ConstantPool::new();
        // static void run(int): 0: iload_0; 1: ifeq 5; 4: return; 5: return (frame at 5)
        let mut body = code(vec![ILOAD_0, IFEQ, 0, 4, RETURN, RETURN]);
        let frames = StackMapTable(vec![StackMapFrame::SameLocalsNoStack { offset_delta: 5 }]);
        body.attributes.push(constants.get_attribute(&frames).unwrap());
        let entry = Frame::method_entry("Test", "run", "(I)V", true).unwrap();

        // straight-line edits keep the table as it was
        let mut editor = CodeEditor::decode(&body, &constants).unwrap();
        editor.compute_frames(&entry, "Test", &constants).unwrap();
        assert_eq!(editor.assemble(&mut constants).unwrap(), body);

        // 0: iconst_3; 1: istore_1; 2: iinc 1 -1; 5: iload_1; 6: ifne 2
        let looping = [ICONST_3, ISTORE_1, IINC, 1, 0xff, ILOAD_1, IFNE, 0xff, 0xfc];
        let fragment = Fragment::from_bytes(&looping, 1, 2).unwrap();
        let mut editor = CodeEditor::decode(&body, &constants).unwrap();
        editor.insert_fragment(0, &fragment);
        editor.compute_frames(&entry, "Test", &constants).unwrap();
        let edited = editor.assemble(&mut constants).unwrap();
        assert_eq!(edited.code_array[6..9], [IFNE, 0xff, 0xfc]);

        let StackMapTable(frames) = edited.attributes[0].decode::<StackMapTable>().unwrap();
        assert_eq!(
            frames,
            vec![
                StackMapFrame::AppendLocalsNoStack {
                    offset_delta: 2,
                    locals: vec![VerificationType::Integer],
                },
                StackMapFrame::ChopLocalsNoStack {
                    offset_delta: 11,
                    chopped_k: 1,
                },
            ]
        );
    }

    #[test]
    fn unreachable_code_cannot_be_framed() {
        let constants = ConstantPool::new();
        let body = code(vec![RETURN]);
        let mut editor = CodeEditor::decode(&body, &constants).unwrap();
        let fragment = Fragment::from_bytes(&[GOTO, 0, 4, NOP, RETURN], 0, 0).unwrap();
        editor.insert_fragment(0, &fragment);
        let entry = Frame::method_entry("Test", "run", "()V", true).unwrap();
        assert!(matches!(
            editor.compute_frames(&entry, "Test", &constants),
            Err(Error::CannotCompile(_))
        ));
    }
}
