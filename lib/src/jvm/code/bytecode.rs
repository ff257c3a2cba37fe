//! Typed JVM bytecode, used when generating new code. The representation is slightly different
//! from the usual presentation to make it more convenient to construct bytecode. For instance:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify
//!
//!   - Some instructions (like the branches) get abstracted into one instruction with a field.
//!     This helps with repetitive pattern matches and also simplifies tasks like inverting a
//!     branch condition.
//!
//! Code decoded from an existing class file is not turned into [`Instruction`]s: it is kept as raw
//! bytes so that untouched instructions are written back exactly as they were read.

use super::opcodes;
use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex, FieldRefConstantIndex, MethodRefConstantIndex};
use crate::jvm::{BaseType, Serialize, ValueKind};
use byteorder::WriteBytesExt;
use std::convert::TryFrom;
use std::io::Result;
use std::ops::Not;

/// Non-branching JVM bytecode instruction
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(ConstantIndex), // covers both `ldc` and `ldc_w`
    Ldc2(ConstantIndex),
    ILoad(u16), // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    Ret(u16),          // covers `ret` and `wide ret`
    GetStatic(FieldRefConstantIndex),
    PutStatic(FieldRefConstantIndex),
    GetField(FieldRefConstantIndex),
    PutField(FieldRefConstantIndex),
    Invoke(InvokeType, MethodRefConstantIndex),
    InvokeDynamic(ConstantIndex),
    New(ClassConstantIndex),
    NewArray(BaseType),
    ANewArray(ClassConstantIndex),
    ArrayLength,
    CheckCast(ClassConstantIndex),
    InstanceOf(ClassConstantIndex),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(ClassConstantIndex, u8),
}

impl Instruction {
    /// Load a local of the given kind
    pub fn load(kind: ValueKind, slot: u16) -> Instruction {
        match kind {
            ValueKind::Int => Instruction::ILoad(slot),
            ValueKind::Long => Instruction::LLoad(slot),
            ValueKind::Float => Instruction::FLoad(slot),
            ValueKind::Double => Instruction::DLoad(slot),
            ValueKind::Reference => Instruction::ALoad(slot),
        }
    }

    /// Store into a local of the given kind
    pub fn store(kind: ValueKind, slot: u16) -> Instruction {
        match kind {
            ValueKind::Int => Instruction::IStore(slot),
            ValueKind::Long => Instruction::LStore(slot),
            ValueKind::Float => Instruction::FStore(slot),
            ValueKind::Double => Instruction::DStore(slot),
            ValueKind::Reference => Instruction::AStore(slot),
        }
    }

    /// Push the zero value of the given kind (`null` for references)
    pub fn zero(kind: ValueKind) -> Instruction {
        match kind {
            ValueKind::Int => Instruction::IConst0,
            ValueKind::Long => Instruction::LConst0,
            ValueKind::Float => Instruction::FConst0,
            ValueKind::Double => Instruction::DConst0,
            ValueKind::Reference => Instruction::AConstNull,
        }
    }

    /// Push an `int` constant with the shortest encoding that does not need the constant pool
    ///
    /// Returns `None` when the value needs an `ldc`.
    pub fn push_int(value: i32) -> Option<Instruction> {
        let insn = match value {
            -1 => Instruction::IConstM1,
            0 => Instruction::IConst0,
            1 => Instruction::IConst1,
            2 => Instruction::IConst2,
            3 => Instruction::IConst3,
            4 => Instruction::IConst4,
            5 => Instruction::IConst5,
            _ => match (i8::try_from(value), i16::try_from(value)) {
                (Ok(byte), _) => Instruction::BiPush(byte),
                (_, Ok(short)) => Instruction::SiPush(short),
                _ => return None,
            },
        };
        Some(insn)
    }

    /// Encoded bytes of the instruction
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![];
        // Writing into a `Vec` cannot fail
        let _ = self.serialize(&mut bytes);
        bytes
    }
}

impl Serialize for Instruction {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        /* The load/store instructions follow the same pattern:
         *
         *   - short form (0-3) have special bytes
         *   - normal form (0-255) use `iload` plus a byte operand
         *   - wide form (255-65535) use `wide iload` plus two byte operands
         */
        fn serialize_load_or_store<W: WriteBytesExt>(
            idx: u16,
            short_form_start: u8,
            normal_form: u8,
            writer: &mut W,
        ) -> Result<()> {
            match u8::try_from(idx) {
                Ok(n @ 0..=3) => (short_form_start + n).serialize(writer),
                Ok(n) => {
                    normal_form.serialize(writer)?;
                    n.serialize(writer)
                }
                Err(_) => {
                    opcodes::WIDE.serialize(writer)?;
                    normal_form.serialize(writer)?;
                    idx.serialize(writer)
                }
            }
        }

        fn with_index<W: WriteBytesExt>(opcode: u8, idx: ConstantIndex, writer: &mut W) -> Result<()> {
            opcode.serialize(writer)?;
            idx.serialize(writer)
        }

        match self {
            Instruction::Nop => opcodes::NOP.serialize(writer)?,
            Instruction::AConstNull => opcodes::ACONST_NULL.serialize(writer)?,
            Instruction::IConstM1 => opcodes::ICONST_M1.serialize(writer)?,
            Instruction::IConst0 => opcodes::ICONST_0.serialize(writer)?,
            Instruction::IConst1 => opcodes::ICONST_1.serialize(writer)?,
            Instruction::IConst2 => opcodes::ICONST_2.serialize(writer)?,
            Instruction::IConst3 => opcodes::ICONST_3.serialize(writer)?,
            Instruction::IConst4 => opcodes::ICONST_4.serialize(writer)?,
            Instruction::IConst5 => opcodes::ICONST_5.serialize(writer)?,
            Instruction::LConst0 => opcodes::LCONST_0.serialize(writer)?,
            Instruction::LConst1 => opcodes::LCONST_1.serialize(writer)?,
            Instruction::FConst0 => opcodes::FCONST_0.serialize(writer)?,
            Instruction::FConst1 => opcodes::FCONST_1.serialize(writer)?,
            Instruction::FConst2 => opcodes::FCONST_2.serialize(writer)?,
            Instruction::DConst0 => opcodes::DCONST_0.serialize(writer)?,
            Instruction::DConst1 => opcodes::DCONST_1.serialize(writer)?,
            Instruction::BiPush(b) => {
                opcodes::BIPUSH.serialize(writer)?;
                b.serialize(writer)?;
            }
            Instruction::SiPush(s) => {
                opcodes::SIPUSH.serialize(writer)?;
                s.serialize(writer)?;
            }
            Instruction::Ldc(ConstantIndex(idx)) => match u8::try_from(*idx) {
                Ok(b) => {
                    opcodes::LDC.serialize(writer)?;
                    b.serialize(writer)?;
                }
                Err(_) => {
                    opcodes::LDC_W.serialize(writer)?;
                    idx.serialize(writer)?;
                }
            },
            Instruction::Ldc2(idx) => with_index(opcodes::LDC2_W, *idx, writer)?,
            Instruction::ILoad(idx) => serialize_load_or_store(*idx, opcodes::ILOAD_0, opcodes::ILOAD, writer)?,
            Instruction::LLoad(idx) => serialize_load_or_store(*idx, opcodes::LLOAD_0, opcodes::LLOAD, writer)?,
            Instruction::FLoad(idx) => serialize_load_or_store(*idx, opcodes::FLOAD_0, opcodes::FLOAD, writer)?,
            Instruction::DLoad(idx) => serialize_load_or_store(*idx, opcodes::DLOAD_0, opcodes::DLOAD, writer)?,
            Instruction::ALoad(idx) => serialize_load_or_store(*idx, opcodes::ALOAD_0, opcodes::ALOAD, writer)?,
            Instruction::IALoad => opcodes::IALOAD.serialize(writer)?,
            Instruction::LALoad => opcodes::LALOAD.serialize(writer)?,
            Instruction::FALoad => opcodes::FALOAD.serialize(writer)?,
            Instruction::DALoad => opcodes::DALOAD.serialize(writer)?,
            Instruction::AALoad => opcodes::AALOAD.serialize(writer)?,
            Instruction::BALoad => opcodes::BALOAD.serialize(writer)?,
            Instruction::CALoad => opcodes::CALOAD.serialize(writer)?,
            Instruction::SALoad => opcodes::SALOAD.serialize(writer)?,
            Instruction::IStore(idx) => serialize_load_or_store(*idx, opcodes::ISTORE_0, opcodes::ISTORE, writer)?,
            Instruction::LStore(idx) => serialize_load_or_store(*idx, opcodes::LSTORE_0, opcodes::LSTORE, writer)?,
            Instruction::FStore(idx) => serialize_load_or_store(*idx, opcodes::FSTORE_0, opcodes::FSTORE, writer)?,
            Instruction::DStore(idx) => serialize_load_or_store(*idx, opcodes::DSTORE_0, opcodes::DSTORE, writer)?,
            Instruction::AStore(idx) => serialize_load_or_store(*idx, opcodes::ASTORE_0, opcodes::ASTORE, writer)?,
            Instruction::IAStore => opcodes::IASTORE.serialize(writer)?,
            Instruction::LAStore => opcodes::LASTORE.serialize(writer)?,
            Instruction::FAStore => opcodes::FASTORE.serialize(writer)?,
            Instruction::DAStore => opcodes::DASTORE.serialize(writer)?,
            Instruction::AAStore => opcodes::AASTORE.serialize(writer)?,
            Instruction::BAStore => opcodes::BASTORE.serialize(writer)?,
            Instruction::CAStore => opcodes::CASTORE.serialize(writer)?,
            Instruction::SAStore => opcodes::SASTORE.serialize(writer)?,
            Instruction::Pop => opcodes::POP.serialize(writer)?,
            Instruction::Pop2 => opcodes::POP2.serialize(writer)?,
            Instruction::Dup => opcodes::DUP.serialize(writer)?,
            Instruction::DupX1 => opcodes::DUP_X1.serialize(writer)?,
            Instruction::DupX2 => opcodes::DUP_X2.serialize(writer)?,
            Instruction::Dup2 => opcodes::DUP2.serialize(writer)?,
            Instruction::Dup2X1 => opcodes::DUP2_X1.serialize(writer)?,
            Instruction::Dup2X2 => opcodes::DUP2_X2.serialize(writer)?,
            Instruction::Swap => opcodes::SWAP.serialize(writer)?,
            Instruction::IAdd => opcodes::IADD.serialize(writer)?,
            Instruction::LAdd => opcodes::LADD.serialize(writer)?,
            Instruction::FAdd => opcodes::FADD.serialize(writer)?,
            Instruction::DAdd => opcodes::DADD.serialize(writer)?,
            Instruction::ISub => opcodes::ISUB.serialize(writer)?,
            Instruction::LSub => opcodes::LSUB.serialize(writer)?,
            Instruction::FSub => opcodes::FSUB.serialize(writer)?,
            Instruction::DSub => opcodes::DSUB.serialize(writer)?,
            Instruction::IMul => opcodes::IMUL.serialize(writer)?,
            Instruction::LMul => opcodes::LMUL.serialize(writer)?,
            Instruction::FMul => opcodes::FMUL.serialize(writer)?,
            Instruction::DMul => opcodes::DMUL.serialize(writer)?,
            Instruction::IDiv => opcodes::IDIV.serialize(writer)?,
            Instruction::LDiv => opcodes::LDIV.serialize(writer)?,
            Instruction::FDiv => opcodes::FDIV.serialize(writer)?,
            Instruction::DDiv => opcodes::DDIV.serialize(writer)?,
            Instruction::IRem => opcodes::IREM.serialize(writer)?,
            Instruction::LRem => opcodes::LREM.serialize(writer)?,
            Instruction::FRem => opcodes::FREM.serialize(writer)?,
            Instruction::DRem => opcodes::DREM.serialize(writer)?,
            Instruction::INeg => opcodes::INEG.serialize(writer)?,
            Instruction::LNeg => opcodes::LNEG.serialize(writer)?,
            Instruction::FNeg => opcodes::FNEG.serialize(writer)?,
            Instruction::DNeg => opcodes::DNEG.serialize(writer)?,
            Instruction::ISh(ShiftType::Left) => opcodes::ISHL.serialize(writer)?,
            Instruction::LSh(ShiftType::Left) => opcodes::LSHL.serialize(writer)?,
            Instruction::ISh(ShiftType::ArithmeticRight) => opcodes::ISHR.serialize(writer)?,
            Instruction::LSh(ShiftType::ArithmeticRight) => opcodes::LSHR.serialize(writer)?,
            Instruction::ISh(ShiftType::LogicalRight) => opcodes::IUSHR.serialize(writer)?,
            Instruction::LSh(ShiftType::LogicalRight) => opcodes::LUSHR.serialize(writer)?,
            Instruction::IAnd => opcodes::IAND.serialize(writer)?,
            Instruction::LAnd => opcodes::LAND.serialize(writer)?,
            Instruction::IOr => opcodes::IOR.serialize(writer)?,
            Instruction::LOr => opcodes::LOR.serialize(writer)?,
            Instruction::IXor => opcodes::IXOR.serialize(writer)?,
            Instruction::LXor => opcodes::LXOR.serialize(writer)?,
            Instruction::IInc(idx, diff) => match (u8::try_from(*idx), i8::try_from(*diff)) {
                (Ok(b), Ok(d)) => {
                    opcodes::IINC.serialize(writer)?;
                    b.serialize(writer)?;
                    d.serialize(writer)?;
                }
                _ => {
                    opcodes::WIDE.serialize(writer)?;
                    opcodes::IINC.serialize(writer)?;
                    idx.serialize(writer)?;
                    diff.serialize(writer)?;
                }
            },
            Instruction::I2L => opcodes::I2L.serialize(writer)?,
            Instruction::I2F => opcodes::I2F.serialize(writer)?,
            Instruction::I2D => opcodes::I2D.serialize(writer)?,
            Instruction::L2I => opcodes::L2I.serialize(writer)?,
            Instruction::L2F => opcodes::L2F.serialize(writer)?,
            Instruction::L2D => opcodes::L2D.serialize(writer)?,
            Instruction::F2I => opcodes::F2I.serialize(writer)?,
            Instruction::F2L => opcodes::F2L.serialize(writer)?,
            Instruction::F2D => opcodes::F2D.serialize(writer)?,
            Instruction::D2I => opcodes::D2I.serialize(writer)?,
            Instruction::D2L => opcodes::D2L.serialize(writer)?,
            Instruction::D2F => opcodes::D2F.serialize(writer)?,
            Instruction::I2B => opcodes::I2B.serialize(writer)?,
            Instruction::I2C => opcodes::I2C.serialize(writer)?,
            Instruction::I2S => opcodes::I2S.serialize(writer)?,
            Instruction::LCmp => opcodes::LCMP.serialize(writer)?,
            Instruction::FCmp(CompareMode::L) => opcodes::FCMPL.serialize(writer)?,
            Instruction::FCmp(CompareMode::G) => opcodes::FCMPG.serialize(writer)?,
            Instruction::DCmp(CompareMode::L) => opcodes::DCMPL.serialize(writer)?,
            Instruction::DCmp(CompareMode::G) => opcodes::DCMPG.serialize(writer)?,
            Instruction::Ret(idx) => match u8::try_from(*idx) {
                Ok(b) => {
                    opcodes::RET.serialize(writer)?;
                    b.serialize(writer)?;
                }
                Err(_) => {
                    opcodes::WIDE.serialize(writer)?;
                    opcodes::RET.serialize(writer)?;
                    idx.serialize(writer)?;
                }
            },
            Instruction::GetStatic(idx) => with_index(opcodes::GETSTATIC, idx.0, writer)?,
            Instruction::PutStatic(idx) => with_index(opcodes::PUTSTATIC, idx.0, writer)?,
            Instruction::GetField(idx) => with_index(opcodes::GETFIELD, idx.0, writer)?,
            Instruction::PutField(idx) => with_index(opcodes::PUTFIELD, idx.0, writer)?,
            Instruction::Invoke(InvokeType::Virtual, idx) => {
                with_index(opcodes::INVOKEVIRTUAL, idx.0, writer)?
            }
            Instruction::Invoke(InvokeType::Special, idx) => {
                with_index(opcodes::INVOKESPECIAL, idx.0, writer)?
            }
            Instruction::Invoke(InvokeType::Static, idx) => {
                with_index(opcodes::INVOKESTATIC, idx.0, writer)?
            }
            Instruction::Invoke(InvokeType::Interface(cnt), idx) => {
                with_index(opcodes::INVOKEINTERFACE, idx.0, writer)?;
                cnt.serialize(writer)?;
                0u8.serialize(writer)?;
            }
            Instruction::InvokeDynamic(idx) => {
                with_index(opcodes::INVOKEDYNAMIC, *idx, writer)?;
                0u16.serialize(writer)?;
            }
            Instruction::New(idx) => with_index(opcodes::NEW, idx.0, writer)?,
            Instruction::NewArray(basetype) => {
                opcodes::NEWARRAY.serialize(writer)?;
                array_type_code(*basetype).serialize(writer)?;
            }
            Instruction::ANewArray(idx) => with_index(opcodes::ANEWARRAY, idx.0, writer)?,
            Instruction::ArrayLength => opcodes::ARRAYLENGTH.serialize(writer)?,
            Instruction::CheckCast(idx) => with_index(opcodes::CHECKCAST, idx.0, writer)?,
            Instruction::InstanceOf(idx) => with_index(opcodes::INSTANCEOF, idx.0, writer)?,
            Instruction::MonitorEnter => opcodes::MONITORENTER.serialize(writer)?,
            Instruction::MonitorExit => opcodes::MONITOREXIT.serialize(writer)?,
            Instruction::MultiANewArray(idx, dimensions) => {
                with_index(opcodes::MULTIANEWARRAY, idx.0, writer)?;
                dimensions.serialize(writer)?;
            }
        }
        Ok(())
    }
}

/// Type code used by `newarray`
pub fn array_type_code(base_type: BaseType) -> u8 {
    match base_type {
        BaseType::Boolean => 4,
        BaseType::Char => 5,
        BaseType::Float => 6,
        BaseType::Double => 7,
        BaseType::Byte => 8,
        BaseType::Short => 9,
        BaseType::Int => 10,
        BaseType::Long => 11,
    }
}

/// Inverse of [`array_type_code`]
pub fn array_type_from_code(code: u8) -> Option<BaseType> {
    let base_type = match code {
        4 => BaseType::Boolean,
        5 => BaseType::Char,
        6 => BaseType::Float,
        7 => BaseType::Double,
        8 => BaseType::Byte,
        9 => BaseType::Short,
        10 => BaseType::Int,
        11 => BaseType::Long,
        _ => return None,
    };
    Some(base_type)
}

/// Branching JVM bytecode instruction, or an instruction which ends the flow of control
///
/// The type parameter abstracts over the representation of jump targets: while editing these are
/// [`Label`](super::Label)s, and only at the very end (see [`layout`](super::layout)) do they
/// become relative byte offsets. The width of the offsets is not part of the instruction: `goto`
/// and `goto_w` are both [`BranchInstruction::Goto`], and the layout picks the encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction<Lbl> {
    If(OrdComparison, Lbl), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, Lbl), // covers `if_icmpeq`, `if_icmpne`, `if_icmplt`, ... `if_icmple`
    IfACmp(EqComparison, Lbl),  // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, Lbl),  // covers `ifnull`, `ifnonnull`
    Goto(Lbl),                  // covers `goto` and `goto_w`
    Jsr(Lbl),                   // covers `jsr` and `jsr_w`
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len()`
        default: Lbl,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<Lbl>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: Lbl,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, Lbl)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
}

impl<Lbl: Copy> BranchInstruction<Lbl> {
    /// Every label the instruction may jump to
    pub fn jump_targets(&self) -> Vec<Lbl> {
        match self {
            BranchInstruction::If(_, lbl)
            | BranchInstruction::IfICmp(_, lbl)
            | BranchInstruction::IfACmp(_, lbl)
            | BranchInstruction::IfNull(_, lbl)
            | BranchInstruction::Goto(lbl)
            | BranchInstruction::Jsr(lbl) => vec![*lbl],
            BranchInstruction::TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().copied());
                ts
            }
            BranchInstruction::LookupSwitch { default, targets } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().map(|(_, target)| *target));
                ts
            }
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => vec![],
        }
    }

    pub fn map_labels<Lbl2>(
        &self,
        mut map_label: impl FnMut(&Lbl) -> Lbl2,
    ) -> BranchInstruction<Lbl2> {
        use BranchInstruction::*;

        match self {
            If(op, lbl) => If(*op, map_label(lbl)),
            IfICmp(op, lbl) => IfICmp(*op, map_label(lbl)),
            IfACmp(op, lbl) => IfACmp(*op, map_label(lbl)),
            IfNull(op, lbl) => IfNull(*op, map_label(lbl)),
            Goto(lbl) => Goto(map_label(lbl)),
            Jsr(lbl) => Jsr(map_label(lbl)),
            TableSwitch {
                default,
                low,
                targets,
            } => TableSwitch {
                default: map_label(default),
                low: *low,
                targets: targets.iter().map(&mut map_label).collect(),
            },
            LookupSwitch { default, targets } => LookupSwitch {
                default: map_label(default),
                targets: targets
                    .iter()
                    .map(|(key, lbl)| (*key, map_label(lbl)))
                    .collect(),
            },
            IReturn => IReturn,
            LReturn => LReturn,
            FReturn => FReturn,
            DReturn => DReturn,
            AReturn => AReturn,
            Return => Return,
            AThrow => AThrow,
        }
    }
}

impl<Lbl> BranchInstruction<Lbl> {
    /// Whether execution may continue with the next instruction
    ///
    /// A `jsr` counts as falling through, since the subroutine returns right after it.
    pub fn falls_through(&self) -> bool {
        matches!(
            self,
            BranchInstruction::If(..)
                | BranchInstruction::IfICmp(..)
                | BranchInstruction::IfACmp(..)
                | BranchInstruction::IfNull(..)
                | BranchInstruction::Jsr(_)
        )
    }

    /// Whether this is one of the return instructions
    pub fn is_return(&self) -> bool {
        matches!(
            self,
            BranchInstruction::IReturn
                | BranchInstruction::LReturn
                | BranchInstruction::FReturn
                | BranchInstruction::DReturn
                | BranchInstruction::AReturn
                | BranchInstruction::Return
        )
    }

    /// Return instruction for a value of the given kind (or `void`)
    pub fn return_of(kind: Option<ValueKind>) -> BranchInstruction<Lbl> {
        match kind {
            None => BranchInstruction::Return,
            Some(ValueKind::Int) => BranchInstruction::IReturn,
            Some(ValueKind::Long) => BranchInstruction::LReturn,
            Some(ValueKind::Float) => BranchInstruction::FReturn,
            Some(ValueKind::Double) => BranchInstruction::DReturn,
            Some(ValueKind::Reference) => BranchInstruction::AReturn,
        }
    }

    /// Opcode of the narrow encoding
    pub fn opcode(&self) -> u8 {
        match self {
            BranchInstruction::If(comp, _) => match comp {
                OrdComparison::EQ => opcodes::IFEQ,
                OrdComparison::NE => opcodes::IFNE,
                OrdComparison::LT => opcodes::IFLT,
                OrdComparison::GE => opcodes::IFGE,
                OrdComparison::GT => opcodes::IFGT,
                OrdComparison::LE => opcodes::IFLE,
            },
            BranchInstruction::IfICmp(comp, _) => match comp {
                OrdComparison::EQ => opcodes::IF_ICMPEQ,
                OrdComparison::NE => opcodes::IF_ICMPNE,
                OrdComparison::LT => opcodes::IF_ICMPLT,
                OrdComparison::GE => opcodes::IF_ICMPGE,
                OrdComparison::GT => opcodes::IF_ICMPGT,
                OrdComparison::LE => opcodes::IF_ICMPLE,
            },
            BranchInstruction::IfACmp(comp, _) => match comp {
                EqComparison::EQ => opcodes::IF_ACMPEQ,
                EqComparison::NE => opcodes::IF_ACMPNE,
            },
            BranchInstruction::IfNull(comp, _) => match comp {
                EqComparison::EQ => opcodes::IFNULL,
                EqComparison::NE => opcodes::IFNONNULL,
            },
            BranchInstruction::Goto(_) => opcodes::GOTO,
            BranchInstruction::Jsr(_) => opcodes::JSR,
            BranchInstruction::TableSwitch { .. } => opcodes::TABLESWITCH,
            BranchInstruction::LookupSwitch { .. } => opcodes::LOOKUPSWITCH,
            BranchInstruction::IReturn => opcodes::IRETURN,
            BranchInstruction::LReturn => opcodes::LRETURN,
            BranchInstruction::FReturn => opcodes::FRETURN,
            BranchInstruction::DReturn => opcodes::DRETURN,
            BranchInstruction::AReturn => opcodes::ARETURN,
            BranchInstruction::Return => opcodes::RETURN,
            BranchInstruction::AThrow => opcodes::ATHROW,
        }
    }

    /// Same conditional jump, with the condition inverted
    pub fn negate(self) -> Option<BranchInstruction<Lbl>> {
        match self {
            BranchInstruction::If(comp, lbl) => Some(BranchInstruction::If(!comp, lbl)),
            BranchInstruction::IfICmp(comp, lbl) => Some(BranchInstruction::IfICmp(!comp, lbl)),
            BranchInstruction::IfACmp(comp, lbl) => Some(BranchInstruction::IfACmp(!comp, lbl)),
            BranchInstruction::IfNull(comp, lbl) => Some(BranchInstruction::IfNull(!comp, lbl)),
            _ => None,
        }
    }

    /// Build a conditional or unconditional jump from its narrow opcode
    pub fn from_jump_opcode(opcode: u8, lbl: Lbl) -> Option<BranchInstruction<Lbl>> {
        let insn = match opcode {
            opcodes::IFEQ => BranchInstruction::If(OrdComparison::EQ, lbl),
            opcodes::IFNE => BranchInstruction::If(OrdComparison::NE, lbl),
            opcodes::IFLT => BranchInstruction::If(OrdComparison::LT, lbl),
            opcodes::IFGE => BranchInstruction::If(OrdComparison::GE, lbl),
            opcodes::IFGT => BranchInstruction::If(OrdComparison::GT, lbl),
            opcodes::IFLE => BranchInstruction::If(OrdComparison::LE, lbl),
            opcodes::IF_ICMPEQ => BranchInstruction::IfICmp(OrdComparison::EQ, lbl),
            opcodes::IF_ICMPNE => BranchInstruction::IfICmp(OrdComparison::NE, lbl),
            opcodes::IF_ICMPLT => BranchInstruction::IfICmp(OrdComparison::LT, lbl),
            opcodes::IF_ICMPGE => BranchInstruction::IfICmp(OrdComparison::GE, lbl),
            opcodes::IF_ICMPGT => BranchInstruction::IfICmp(OrdComparison::GT, lbl),
            opcodes::IF_ICMPLE => BranchInstruction::IfICmp(OrdComparison::LE, lbl),
            opcodes::IF_ACMPEQ => BranchInstruction::IfACmp(EqComparison::EQ, lbl),
            opcodes::IF_ACMPNE => BranchInstruction::IfACmp(EqComparison::NE, lbl),
            opcodes::IFNULL => BranchInstruction::IfNull(EqComparison::EQ, lbl),
            opcodes::IFNONNULL => BranchInstruction::IfNull(EqComparison::NE, lbl),
            opcodes::GOTO | opcodes::GOTO_W => BranchInstruction::Goto(lbl),
            opcodes::JSR | opcodes::JSR_W => BranchInstruction::Jsr(lbl),
            _ => return None,
        };
        Some(insn)
    }

    /// Build a return or `athrow` from its opcode
    pub fn from_exit_opcode(opcode: u8) -> Option<BranchInstruction<Lbl>> {
        let insn = match opcode {
            opcodes::IRETURN => BranchInstruction::IReturn,
            opcodes::LRETURN => BranchInstruction::LReturn,
            opcodes::FRETURN => BranchInstruction::FReturn,
            opcodes::DRETURN => BranchInstruction::DReturn,
            opcodes::ARETURN => BranchInstruction::AReturn,
            opcodes::RETURN => BranchInstruction::Return,
            opcodes::ATHROW => BranchInstruction::AThrow,
            _ => return None,
        };
        Some(insn)
    }
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

impl Not for OrdComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            OrdComparison::EQ => OrdComparison::NE,
            OrdComparison::GE => OrdComparison::LT,
            OrdComparison::GT => OrdComparison::LE,
            OrdComparison::LE => OrdComparison::GT,
            OrdComparison::LT => OrdComparison::GE,
            OrdComparison::NE => OrdComparison::EQ,
        }
    }
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            EqComparison::EQ => EqComparison::NE,
            EqComparison::NE => EqComparison::EQ,
        }
    }
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because the constant argument it expects is not to a
/// `Constant::MethodRef`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface(u8), // `count` is of total arguments, where `long`/`double` count for 2
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn load_store_forms() {
        assert_eq!(Instruction::ILoad(2).encode(), vec![opcodes::ILOAD_2]);
        assert_eq!(Instruction::AStore(9).encode(), vec![opcodes::ASTORE, 9]);
        assert_eq!(
            Instruction::DLoad(300).encode(),
            vec![opcodes::WIDE, opcodes::DLOAD, 1, 44]
        );
        assert_eq!(Instruction::IInc(1, 1).encode(), vec![opcodes::IINC, 1, 1]);
        assert_eq!(
            Instruction::IInc(1, 1000).encode(),
            vec![opcodes::WIDE, opcodes::IINC, 0, 1, 3, 232]
        );
        assert_eq!(Instruction::Ret(4).encode(), vec![opcodes::RET, 4]);
    }

    #[test]
    fn constants_pick_short_forms() {
        assert_eq!(Instruction::push_int(-1), Some(Instruction::IConstM1));
        assert_eq!(Instruction::push_int(100), Some(Instruction::BiPush(100)));
        assert_eq!(Instruction::push_int(-1000), Some(Instruction::SiPush(-1000)));
        assert_eq!(Instruction::push_int(1 << 20), None);
        assert_eq!(
            Instruction::Ldc(ConstantIndex(3)).encode(),
            vec![opcodes::LDC, 3]
        );
        assert_eq!(
            Instruction::Ldc(ConstantIndex(300)).encode(),
            vec![opcodes::LDC_W, 1, 44]
        );
    }

    #[test]
    fn invert_conditions() {
        let branch = BranchInstruction::IfICmp(OrdComparison::LT, 7u32);
        assert_eq!(
            branch.negate(),
            Some(BranchInstruction::IfICmp(OrdComparison::GE, 7))
        );
        assert_eq!(BranchInstruction::<u32>::Return.negate(), None);
        for opcode in opcodes::IFEQ..=opcodes::IF_ACMPNE {
            let insn = BranchInstruction::from_jump_opcode(opcode, ()).unwrap();
            assert_eq!(insn.opcode(), opcode);
            let negated = insn.negate().unwrap();
            assert_eq!(negated.negate().unwrap().opcode(), opcode);
        }
    }

    #[test]
    fn returns() {
        let ret = BranchInstruction::<()>::return_of(Some(ValueKind::Double));
        assert_eq!(ret.opcode(), opcodes::DRETURN);
        assert!(ret.is_return());
        assert!(!BranchInstruction::<()>::AThrow.is_return());
        assert!(BranchInstruction::Jsr(()).falls_through());
        assert!(!BranchInstruction::Goto(()).falls_through());
    }
}
