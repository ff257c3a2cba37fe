use super::{CompileContext, Fragment, FragmentCompiler};
use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex, ConstantPool};
use crate::jvm::code::opcodes::{self, method_widths, Operands};
use crate::jvm::code::{
    array_type_code, BranchInstruction, CodeBuilder, Instruction, Label, LabelGenerator,
};
use crate::jvm::{BaseType, Error, ValueKind};
use log::trace;
use std::collections::HashMap;

/// Compiler for a small line-oriented bytecode assembly language
///
/// Statements are separated by newlines or `;`, and `#` starts a comment running to the end of
/// the line. A statement is one of:
///
///   - `name:` places a label (the label may be followed by an instruction)
///   - a JVM mnemonic followed by its operands, eg. `iinc $1 1` or `ifeq done`
///   - `load X` / `store X` picks the load or store instruction matching the type of `X`, which
///     may be a parameter (`$0` is `this`, `$1` the first parameter), `$result` or `$exception`
///   - `.catch start end handler [Type]` registers a handler local to the fragment
///   - `.descriptor (..)..` fails unless the enclosing method has exactly this descriptor
///
/// Local variable operands are slot numbers, parameters, `$result`, `$exception`, or `$tmpN`
/// which names a fresh pair of slots past the method's own locals. Field and method references
/// are written `Owner.name:descriptor`, with `this` standing for the current class. A `;` that
/// closes a class name inside a descriptor does not end the statement.
///
/// Switches and `invokedynamic` are not supported.
#[derive(Copy, Clone, Debug, Default)]
pub struct Assembler;

impl Assembler {
    pub fn new() -> Assembler {
        Assembler
    }
}

impl FragmentCompiler for Assembler {
    fn compile(
        &self,
        source: &str,
        context: &CompileContext,
        constants: &mut ConstantPool,
    ) -> Result<Fragment, Error> {
        let statements = tokenize(source)?;
        let mut assembly = Assembly {
            context,
            constants,
            builder: CodeBuilder::new(context.max_locals),
            labels: HashMap::new(),
            temporaries: HashMap::new(),
        };
        for statement in &statements {
            assembly.statement(statement)?;
        }
        trace!(
            "assembled {} statements for {}.{}{}",
            statements.len(),
            context.class_name,
            context.method_name,
            context.descriptor
        );
        let Assembly {
            builder, constants, ..
        } = assembly;
        builder.result(constants)
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),

    /// Contents of a double-quoted string literal, with escapes resolved
    Quoted(String),
}

/// Split source into statements of tokens
fn tokenize(source: &str) -> Result<Vec<Vec<Token>>, Error> {
    let mut statements = vec![];
    let mut statement = vec![];
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '\n' | ';' => {
                chars.next();
                if !statement.is_empty() {
                    statements.push(std::mem::take(&mut statement));
                }
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '"' => {
                chars.next();
                let mut string = String::new();
                loop {
                    match chars.next() {
                        None => return Err(Error::cannot_compile("unterminated string literal")),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => string.push('\n'),
                            Some('t') => string.push('\t'),
                            Some('0') => string.push('\0'),
                            Some(c @ ('\\' | '"')) => string.push(c),
                            other => {
                                return Err(Error::cannot_compile(format!(
                                    "invalid escape {:?} in string literal",
                                    other
                                )))
                            }
                        },
                        Some(c) => string.push(c),
                    }
                }
                statement.push(Token::Quoted(string));
            }
            _ => {
                let mut word = String::new();
                let mut descriptor = DescriptorScan::default();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '#' {
                        break;
                    }
                    if c == ';' && !descriptor.in_class_name() {
                        break;
                    }
                    word.push(c);
                    chars.next();
                    descriptor.advance(&word, c);
                }
                statement.push(Token::Word(word));
            }
        }
    }
    if !statement.is_empty() {
        statements.push(statement);
    }
    Ok(statements)
}

/// Tracks whether a word is in the middle of an `L...;` class name in a descriptor
///
/// Descriptors appear after the `:` of a member reference, or make up the whole word when it
/// starts with `(` or `[`.
#[derive(Default)]
struct DescriptorScan {
    in_descriptor: bool,
    in_class_name: bool,
}

impl DescriptorScan {
    fn advance(&mut self, word: &str, c: char) {
        if !self.in_descriptor {
            self.in_descriptor = c == ':' || (word.len() == 1 && (c == '(' || c == '['));
        } else if self.in_class_name {
            self.in_class_name = c != ';';
        } else {
            self.in_class_name = c == 'L';
        }
    }

    fn in_class_name(&self) -> bool {
        self.in_descriptor && self.in_class_name
    }
}

struct Assembly<'a> {
    context: &'a CompileContext,
    constants: &'a mut ConstantPool,
    builder: CodeBuilder,
    labels: HashMap<String, Label>,

    /// Slots of `$tmpN` locals, by `N`
    temporaries: HashMap<String, u16>,
}

impl<'a> Assembly<'a> {
    fn statement(&mut self, tokens: &[Token]) -> Result<(), Error> {
        let (head, operands) = match tokens.split_first() {
            Some((Token::Word(head), operands)) => (head.as_str(), operands),
            Some((Token::Quoted(string), _)) => {
                return Err(Error::cannot_compile(format!(
                    "statement starts with a string {:?}",
                    string
                )))
            }
            None => return Ok(()),
        };

        // Leading label
        if let Some(name) = head.strip_suffix(':') {
            if !name.is_empty() && !name.contains(':') {
                let label = self.label(name);
                self.builder.place_label(label)?;
                return self.statement(operands);
            }
        }

        match head {
            ".catch" => self.catch(operands),
            ".descriptor" => {
                let expected = self.word(operands, 0)?;
                if expected != self.context.descriptor {
                    return Err(Error::cannot_compile(format!(
                        "fragment is for descriptor {} but {} has descriptor {}",
                        expected, self.context.method_name, self.context.descriptor
                    )));
                }
                Ok(())
            }
            "load" | "store" => {
                let operand = self.word(operands, 0)?;
                let (slot, kind) = self.typed_local(operand)?;
                let insn = if head == "load" {
                    Instruction::load(kind, slot)
                } else {
                    Instruction::store(kind, slot)
                };
                self.builder.push_instruction(insn);
                Ok(())
            }
            mnemonic => {
                let opcode = opcodes::by_mnemonic(mnemonic).ok_or_else(|| {
                    Error::cannot_compile(format!("unknown instruction `{}`", mnemonic))
                })?;
                self.instruction(opcode, mnemonic, operands)
            }
        }
    }

    fn instruction(&mut self, opcode: u8, mnemonic: &str, operands: &[Token]) -> Result<(), Error> {
        let info = opcodes::info(opcode)
            .ok_or_else(|| Error::cannot_compile(format!("unknown instruction `{}`", mnemonic)))?;
        match info.operands {
            Operands::None => match BranchInstruction::from_exit_opcode(opcode) {
                Some(exit) => self.builder.push_branch_instruction(exit),
                None => self.builder.push_raw(vec![opcode]),
            },
            Operands::Byte => {
                let value: i8 = self.number(operands, 0)?;
                self.builder.push_instruction(Instruction::BiPush(value));
            }
            Operands::Short => {
                let value: i16 = self.number(operands, 0)?;
                self.builder.push_instruction(Instruction::SiPush(value));
            }
            Operands::ConstantByte | Operands::Constant => {
                self.constant_instruction(opcode, mnemonic, operands)?
            }
            Operands::Local => {
                let slot = self.slot(self.word(operands, 0)?)?;
                let insn = match opcode {
                    opcodes::ILOAD => Instruction::load(ValueKind::Int, slot),
                    opcodes::LLOAD => Instruction::load(ValueKind::Long, slot),
                    opcodes::FLOAD => Instruction::load(ValueKind::Float, slot),
                    opcodes::DLOAD => Instruction::load(ValueKind::Double, slot),
                    opcodes::ALOAD => Instruction::load(ValueKind::Reference, slot),
                    opcodes::ISTORE => Instruction::store(ValueKind::Int, slot),
                    opcodes::LSTORE => Instruction::store(ValueKind::Long, slot),
                    opcodes::FSTORE => Instruction::store(ValueKind::Float, slot),
                    opcodes::DSTORE => Instruction::store(ValueKind::Double, slot),
                    opcodes::ASTORE => Instruction::store(ValueKind::Reference, slot),
                    _ => Instruction::Ret(slot),
                };
                self.builder.push_instruction(insn);
            }
            Operands::Iinc => {
                let slot = self.slot(self.word(operands, 0)?)?;
                let delta: i16 = self.number(operands, 1)?;
                self.builder.push_instruction(Instruction::IInc(slot, delta));
            }
            Operands::Branch | Operands::WideBranch => {
                let target = self.word(operands, 0)?;
                let label = self.label(target);
                let branch = BranchInstruction::from_jump_opcode(opcode, label).ok_or_else(|| {
                    Error::cannot_compile(format!("`{}` is not a jump", mnemonic))
                })?;
                self.builder.push_branch_instruction(branch);
            }
            Operands::InvokeInterface => {
                let (index, descriptor) = self.member(operands, opcode)?;
                let (arguments, _) = method_widths(&descriptor)?;
                let [hi, lo] = index.0.to_be_bytes();
                self.builder.push_raw(vec![opcode, hi, lo, arguments + 1, 0]);
            }
            Operands::MultiANewArray => {
                let class = self.class(self.word(operands, 0)?)?;
                let dimensions: u8 = self.number(operands, 1)?;
                self.builder
                    .push_instruction(Instruction::MultiANewArray(class, dimensions));
            }
            Operands::NewArray => {
                let base_type = match self.word(operands, 0)? {
                    "boolean" => BaseType::Boolean,
                    "char" => BaseType::Char,
                    "float" => BaseType::Float,
                    "double" => BaseType::Double,
                    "byte" => BaseType::Byte,
                    "short" => BaseType::Short,
                    "int" => BaseType::Int,
                    "long" => BaseType::Long,
                    other => {
                        return Err(Error::cannot_compile(format!(
                            "`{}` is not a primitive type",
                            other
                        )))
                    }
                };
                self.builder
                    .push_raw(vec![opcode, array_type_code(base_type)]);
            }
            Operands::TableSwitch | Operands::LookupSwitch | Operands::InvokeDynamic => {
                return Err(Error::cannot_compile(format!(
                    "`{}` is not supported by the assembler",
                    mnemonic
                )))
            }
            Operands::Wide => {
                return Err(Error::cannot_compile(
                    "`wide` is implied: use the plain instruction with a large slot",
                ))
            }
        }
        Ok(())
    }

    /// Instructions taking a two byte constant pool index (and `ldc`)
    fn constant_instruction(
        &mut self,
        opcode: u8,
        mnemonic: &str,
        operands: &[Token],
    ) -> Result<(), Error> {
        let index: ConstantIndex = match opcode {
            opcodes::LDC | opcodes::LDC_W => {
                let index = self.loadable(operands)?;
                self.builder.push_instruction(Instruction::Ldc(index));
                return Ok(());
            }
            opcodes::LDC2_W => {
                let literal = self.word(operands, 0)?;
                let index = self.wide_loadable(literal)?;
                self.builder.push_instruction(Instruction::Ldc2(index));
                return Ok(());
            }
            opcodes::GETSTATIC
            | opcodes::PUTSTATIC
            | opcodes::GETFIELD
            | opcodes::PUTFIELD
            | opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC => self.member(operands, opcode)?.0,
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
                self.class(self.word(operands, 0)?)?.0
            }
            _ => {
                return Err(Error::cannot_compile(format!(
                    "`{}` is not supported by the assembler",
                    mnemonic
                )))
            }
        };
        let [hi, lo] = index.0.to_be_bytes();
        self.builder.push_raw(vec![opcode, hi, lo]);
        Ok(())
    }

    fn catch(&mut self, operands: &[Token]) -> Result<(), Error> {
        let start = self.label(self.word(operands, 0)?);
        let end = self.label(self.word(operands, 1)?);
        let handler = self.label(self.word(operands, 2)?);
        let catch_type = match operands.get(3) {
            None => ClassConstantIndex(ConstantIndex(0)),
            Some(_) => self.class(self.word(operands, 3)?)?,
        };
        self.builder.add_handler(start, end, handler, catch_type);
        Ok(())
    }

    fn word<'t>(&self, operands: &'t [Token], idx: usize) -> Result<&'t str, Error> {
        match operands.get(idx) {
            Some(Token::Word(word)) => Ok(word),
            Some(Token::Quoted(string)) => Err(Error::cannot_compile(format!(
                "unexpected string {:?} as operand {}",
                string,
                idx + 1
            ))),
            None => Err(Error::cannot_compile(format!(
                "missing operand {}",
                idx + 1
            ))),
        }
    }

    fn number<T: std::str::FromStr>(&self, operands: &[Token], idx: usize) -> Result<T, Error> {
        let word = self.word(operands, idx)?;
        word.parse()
            .map_err(|_| Error::cannot_compile(format!("`{}` is not a valid number here", word)))
    }

    fn label(&mut self, name: &str) -> Label {
        if let Some(label) = self.labels.get(name) {
            return *label;
        }
        let label = self.builder.fresh_label();
        self.labels.insert(name.to_owned(), label);
        label
    }

    fn class_name<'n>(&'n self, name: &'n str) -> &'n str {
        if name == "this" {
            &self.context.class_name
        } else {
            name
        }
    }

    fn class(&mut self, name: &str) -> Result<ClassConstantIndex, Error> {
        let name = self.class_name(name).to_owned();
        Ok(self.constants.get_class(&name)?)
    }

    /// Field or method reference `Owner.name:descriptor`, returning the index and descriptor
    fn member(&mut self, operands: &[Token], opcode: u8) -> Result<(ConstantIndex, String), Error> {
        let word = self.word(operands, 0)?;
        let malformed = || {
            Error::cannot_compile(format!(
                "expected `Owner.name:descriptor`, found `{}`",
                word
            ))
        };
        let (owner_and_name, descriptor) = word.split_once(':').ok_or_else(malformed)?;
        let (owner, name) = owner_and_name.rsplit_once('.').ok_or_else(malformed)?;
        let owner = self.class_name(owner).to_owned();
        let index = match opcode {
            opcodes::GETSTATIC | opcodes::PUTSTATIC | opcodes::GETFIELD | opcodes::PUTFIELD => {
                self.constants
                    .get_field_ref(&owner, name, descriptor)?
                    .0
            }
            _ => {
                self.constants
                    .get_method_ref(
                        &owner,
                        name,
                        descriptor,
                        opcode == opcodes::INVOKEINTERFACE,
                    )?
                    .0
            }
        };
        Ok((index, descriptor.to_owned()))
    }

    /// Operand of `ldc`: an `int`, a `float` (with a `.` or an `f` suffix), a string, or a class
    fn loadable(&mut self, operands: &[Token]) -> Result<ConstantIndex, Error> {
        let word = match operands.first() {
            Some(Token::Quoted(string)) => return Ok(self.constants.get_string(string)?.0),
            Some(Token::Word(word)) => word.as_str(),
            None => return Err(Error::cannot_compile("missing operand 1")),
        };
        if let Ok(int) = word.parse::<i32>() {
            return Ok(self.constants.get_integer(int)?);
        }
        if word.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            let float: f32 = word
                .trim_end_matches('f')
                .parse()
                .map_err(|_| Error::cannot_compile(format!("`{}` is not a number", word)))?;
            return Ok(self.constants.get_float(float)?);
        }
        Ok(self.class(word)?.0)
    }

    /// Operand of `ldc2_w`: a `long` (optionally with an `L` suffix) or a `double`
    fn wide_loadable(&mut self, word: &str) -> Result<ConstantIndex, Error> {
        if let Ok(long) = word.trim_end_matches(|c| c == 'L' || c == 'l').parse::<i64>() {
            return Ok(self.constants.get_long(long)?);
        }
        let double: f64 = word
            .trim_end_matches(|c| c == 'D' || c == 'd')
            .parse()
            .map_err(|_| Error::cannot_compile(format!("`{}` is not a number", word)))?;
        Ok(self.constants.get_double(double)?)
    }

    /// Local variable operand
    fn slot(&mut self, word: &str) -> Result<u16, Error> {
        if let Ok(slot) = word.parse::<u16>() {
            return Ok(slot);
        }
        if let Some(name) = word.strip_prefix("$tmp") {
            if let Some(slot) = self.temporaries.get(name) {
                return Ok(*slot);
            }
            let slot = self
                .context
                .max_locals
                .checked_add(2 * self.temporaries.len() as u16)
                .ok_or(Error::MaxLocalsOverflow(usize::from(u16::MAX) + 1))?;
            self.temporaries.insert(name.to_owned(), slot);
            self.builder.use_local(slot, 2);
            return Ok(slot);
        }
        Ok(self.typed_local(word)?.0)
    }

    /// Slot and kind of a parameter, `$result`, or `$exception`
    fn typed_local(&self, word: &str) -> Result<(u16, ValueKind), Error> {
        match word {
            "$result" => match &self.context.result {
                Some((slot, typ)) => Ok((*slot, typ.value_kind())),
                None => Err(Error::cannot_compile(format!(
                    "$result is not available in {}{}",
                    self.context.method_name, self.context.descriptor
                ))),
            },
            "$exception" => match self.context.exception {
                Some(slot) => Ok((slot, ValueKind::Reference)),
                None => Err(Error::cannot_compile("$exception is only available in handlers")),
            },
            _ => {
                let n = word
                    .strip_prefix('$')
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| {
                        Error::cannot_compile(format!("`{}` is not a local variable", word))
                    })?;
                let (slot, typ) = self.context.parameter(n)?;
                Ok((slot, typ.value_kind()))
            }
        }
    }
}
