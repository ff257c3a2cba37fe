//! Opcode constants, mnemonics, operand formats, and stack effects
//!
//! Stack effects are measured in slots, so `long` and `double` values count twice. Instructions
//! whose effect depends on a constant pool entry (field accesses, invocations, ...) are marked as
//! [`StackEffect::Computed`] and resolved through [`stack_effect`].

use crate::jvm::class_file::{Constant, ConstantIndex, ConstantPool};
use crate::jvm::{Error, FieldType, MethodDescriptor, ParseDescriptor};

/// Shape of the operands following an opcode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operands {
    None,
    /// Signed byte (`bipush`)
    Byte,
    /// Signed short (`sipush`)
    Short,
    /// One byte constant pool index (`ldc`)
    ConstantByte,
    /// Two byte constant pool index
    Constant,
    /// One byte local variable index (two bytes under `wide`)
    Local,
    /// Local variable index and signed increment
    Iinc,
    /// Signed 16-bit relative jump
    Branch,
    /// Signed 32-bit relative jump
    WideBranch,
    TableSwitch,
    LookupSwitch,
    InvokeInterface,
    InvokeDynamic,
    MultiANewArray,
    /// Primitive array type code
    NewArray,
    Wide,
}

/// Effect of an instruction on the operand stack
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StackEffect {
    /// Number of slots popped, then pushed
    Fixed(u8, u8),

    /// Effect depends on a referenced descriptor
    Computed,
}

#[derive(Copy, Clone, Debug)]
pub struct OpcodeInfo {
    pub mnemonic: &'static str,
    pub operands: Operands,
    pub stack: StackEffect,
}

macro_rules! stack_effect {
    (_ _) => {
        StackEffect::Computed
    };
    ($pop:literal $push:literal) => {
        StackEffect::Fixed($pop, $push)
    };
}

macro_rules! opcodes {
    ($($code:literal $name:ident $mnemonic:literal $operands:ident $pop:tt $push:tt;)*) => {
        $(pub const $name: u8 = $code;)*

        /// Mnemonic, operand format, and stack effect of an opcode
        pub fn info(opcode: u8) -> Option<OpcodeInfo> {
            match opcode {
                $($code => Some(OpcodeInfo {
                    mnemonic: $mnemonic,
                    operands: Operands::$operands,
                    stack: stack_effect!($pop $push),
                }),)*
                _ => None,
            }
        }

        /// Opcode for a mnemonic
        pub fn by_mnemonic(mnemonic: &str) -> Option<u8> {
            match mnemonic {
                $($mnemonic => Some($code),)*
                _ => None,
            }
        }
    };
}

opcodes! {
    0x00 NOP "nop" None 0 0;
    0x01 ACONST_NULL "aconst_null" None 0 1;
    0x02 ICONST_M1 "iconst_m1" None 0 1;
    0x03 ICONST_0 "iconst_0" None 0 1;
    0x04 ICONST_1 "iconst_1" None 0 1;
    0x05 ICONST_2 "iconst_2" None 0 1;
    0x06 ICONST_3 "iconst_3" None 0 1;
    0x07 ICONST_4 "iconst_4" None 0 1;
    0x08 ICONST_5 "iconst_5" None 0 1;
    0x09 LCONST_0 "lconst_0" None 0 2;
    0x0a LCONST_1 "lconst_1" None 0 2;
    0x0b FCONST_0 "fconst_0" None 0 1;
    0x0c FCONST_1 "fconst_1" None 0 1;
    0x0d FCONST_2 "fconst_2" None 0 1;
    0x0e DCONST_0 "dconst_0" None 0 2;
    0x0f DCONST_1 "dconst_1" None 0 2;
    0x10 BIPUSH "bipush" Byte 0 1;
    0x11 SIPUSH "sipush" Short 0 1;
    0x12 LDC "ldc" ConstantByte 0 1;
    0x13 LDC_W "ldc_w" Constant 0 1;
    0x14 LDC2_W "ldc2_w" Constant 0 2;
    0x15 ILOAD "iload" Local 0 1;
    0x16 LLOAD "lload" Local 0 2;
    0x17 FLOAD "fload" Local 0 1;
    0x18 DLOAD "dload" Local 0 2;
    0x19 ALOAD "aload" Local 0 1;
    0x1a ILOAD_0 "iload_0" None 0 1;
    0x1b ILOAD_1 "iload_1" None 0 1;
    0x1c ILOAD_2 "iload_2" None 0 1;
    0x1d ILOAD_3 "iload_3" None 0 1;
    0x1e LLOAD_0 "lload_0" None 0 2;
    0x1f LLOAD_1 "lload_1" None 0 2;
    0x20 LLOAD_2 "lload_2" None 0 2;
    0x21 LLOAD_3 "lload_3" None 0 2;
    0x22 FLOAD_0 "fload_0" None 0 1;
    0x23 FLOAD_1 "fload_1" None 0 1;
    0x24 FLOAD_2 "fload_2" None 0 1;
    0x25 FLOAD_3 "fload_3" None 0 1;
    0x26 DLOAD_0 "dload_0" None 0 2;
    0x27 DLOAD_1 "dload_1" None 0 2;
    0x28 DLOAD_2 "dload_2" None 0 2;
    0x29 DLOAD_3 "dload_3" None 0 2;
    0x2a ALOAD_0 "aload_0" None 0 1;
    0x2b ALOAD_1 "aload_1" None 0 1;
    0x2c ALOAD_2 "aload_2" None 0 1;
    0x2d ALOAD_3 "aload_3" None 0 1;
    0x2e IALOAD "iaload" None 2 1;
    0x2f LALOAD "laload" None 2 2;
    0x30 FALOAD "faload" None 2 1;
    0x31 DALOAD "daload" None 2 2;
    0x32 AALOAD "aaload" None 2 1;
    0x33 BALOAD "baload" None 2 1;
    0x34 CALOAD "caload" None 2 1;
    0x35 SALOAD "saload" None 2 1;
    0x36 ISTORE "istore" Local 1 0;
    0x37 LSTORE "lstore" Local 2 0;
    0x38 FSTORE "fstore" Local 1 0;
    0x39 DSTORE "dstore" Local 2 0;
    0x3a ASTORE "astore" Local 1 0;
    0x3b ISTORE_0 "istore_0" None 1 0;
    0x3c ISTORE_1 "istore_1" None 1 0;
    0x3d ISTORE_2 "istore_2" None 1 0;
    0x3e ISTORE_3 "istore_3" None 1 0;
    0x3f LSTORE_0 "lstore_0" None 2 0;
    0x40 LSTORE_1 "lstore_1" None 2 0;
    0x41 LSTORE_2 "lstore_2" None 2 0;
    0x42 LSTORE_3 "lstore_3" None 2 0;
    0x43 FSTORE_0 "fstore_0" None 1 0;
    0x44 FSTORE_1 "fstore_1" None 1 0;
    0x45 FSTORE_2 "fstore_2" None 1 0;
    0x46 FSTORE_3 "fstore_3" None 1 0;
    0x47 DSTORE_0 "dstore_0" None 2 0;
    0x48 DSTORE_1 "dstore_1" None 2 0;
    0x49 DSTORE_2 "dstore_2" None 2 0;
    0x4a DSTORE_3 "dstore_3" None 2 0;
    0x4b ASTORE_0 "astore_0" None 1 0;
    0x4c ASTORE_1 "astore_1" None 1 0;
    0x4d ASTORE_2 "astore_2" None 1 0;
    0x4e ASTORE_3 "astore_3" None 1 0;
    0x4f IASTORE "iastore" None 3 0;
    0x50 LASTORE "lastore" None 4 0;
    0x51 FASTORE "fastore" None 3 0;
    0x52 DASTORE "dastore" None 4 0;
    0x53 AASTORE "aastore" None 3 0;
    0x54 BASTORE "bastore" None 3 0;
    0x55 CASTORE "castore" None 3 0;
    0x56 SASTORE "sastore" None 3 0;
    0x57 POP "pop" None 1 0;
    0x58 POP2 "pop2" None 2 0;
    0x59 DUP "dup" None 1 2;
    0x5a DUP_X1 "dup_x1" None 2 3;
    0x5b DUP_X2 "dup_x2" None 3 4;
    0x5c DUP2 "dup2" None 2 4;
    0x5d DUP2_X1 "dup2_x1" None 3 5;
    0x5e DUP2_X2 "dup2_x2" None 4 6;
    0x5f SWAP "swap" None 2 2;
    0x60 IADD "iadd" None 2 1;
    0x61 LADD "ladd" None 4 2;
    0x62 FADD "fadd" None 2 1;
    0x63 DADD "dadd" None 4 2;
    0x64 ISUB "isub" None 2 1;
    0x65 LSUB "lsub" None 4 2;
    0x66 FSUB "fsub" None 2 1;
    0x67 DSUB "dsub" None 4 2;
    0x68 IMUL "imul" None 2 1;
    0x69 LMUL "lmul" None 4 2;
    0x6a FMUL "fmul" None 2 1;
    0x6b DMUL "dmul" None 4 2;
    0x6c IDIV "idiv" None 2 1;
    0x6d LDIV "ldiv" None 4 2;
    0x6e FDIV "fdiv" None 2 1;
    0x6f DDIV "ddiv" None 4 2;
    0x70 IREM "irem" None 2 1;
    0x71 LREM "lrem" None 4 2;
    0x72 FREM "frem" None 2 1;
    0x73 DREM "drem" None 4 2;
    0x74 INEG "ineg" None 1 1;
    0x75 LNEG "lneg" None 2 2;
    0x76 FNEG "fneg" None 1 1;
    0x77 DNEG "dneg" None 2 2;
    0x78 ISHL "ishl" None 2 1;
    0x79 LSHL "lshl" None 3 2;
    0x7a ISHR "ishr" None 2 1;
    0x7b LSHR "lshr" None 3 2;
    0x7c IUSHR "iushr" None 2 1;
    0x7d LUSHR "lushr" None 3 2;
    0x7e IAND "iand" None 2 1;
    0x7f LAND "land" None 4 2;
    0x80 IOR "ior" None 2 1;
    0x81 LOR "lor" None 4 2;
    0x82 IXOR "ixor" None 2 1;
    0x83 LXOR "lxor" None 4 2;
    0x84 IINC "iinc" Iinc 0 0;
    0x85 I2L "i2l" None 1 2;
    0x86 I2F "i2f" None 1 1;
    0x87 I2D "i2d" None 1 2;
    0x88 L2I "l2i" None 2 1;
    0x89 L2F "l2f" None 2 1;
    0x8a L2D "l2d" None 2 2;
    0x8b F2I "f2i" None 1 1;
    0x8c F2L "f2l" None 1 2;
    0x8d F2D "f2d" None 1 2;
    0x8e D2I "d2i" None 2 1;
    0x8f D2L "d2l" None 2 2;
    0x90 D2F "d2f" None 2 1;
    0x91 I2B "i2b" None 1 1;
    0x92 I2C "i2c" None 1 1;
    0x93 I2S "i2s" None 1 1;
    0x94 LCMP "lcmp" None 4 1;
    0x95 FCMPL "fcmpl" None 2 1;
    0x96 FCMPG "fcmpg" None 2 1;
    0x97 DCMPL "dcmpl" None 4 1;
    0x98 DCMPG "dcmpg" None 4 1;
    0x99 IFEQ "ifeq" Branch 1 0;
    0x9a IFNE "ifne" Branch 1 0;
    0x9b IFLT "iflt" Branch 1 0;
    0x9c IFGE "ifge" Branch 1 0;
    0x9d IFGT "ifgt" Branch 1 0;
    0x9e IFLE "ifle" Branch 1 0;
    0x9f IF_ICMPEQ "if_icmpeq" Branch 2 0;
    0xa0 IF_ICMPNE "if_icmpne" Branch 2 0;
    0xa1 IF_ICMPLT "if_icmplt" Branch 2 0;
    0xa2 IF_ICMPGE "if_icmpge" Branch 2 0;
    0xa3 IF_ICMPGT "if_icmpgt" Branch 2 0;
    0xa4 IF_ICMPLE "if_icmple" Branch 2 0;
    0xa5 IF_ACMPEQ "if_acmpeq" Branch 2 0;
    0xa6 IF_ACMPNE "if_acmpne" Branch 2 0;
    0xa7 GOTO "goto" Branch 0 0;
    0xa8 JSR "jsr" Branch 0 1;
    0xa9 RET "ret" Local 0 0;
    0xaa TABLESWITCH "tableswitch" TableSwitch 1 0;
    0xab LOOKUPSWITCH "lookupswitch" LookupSwitch 1 0;
    0xac IRETURN "ireturn" None 1 0;
    0xad LRETURN "lreturn" None 2 0;
    0xae FRETURN "freturn" None 1 0;
    0xaf DRETURN "dreturn" None 2 0;
    0xb0 ARETURN "areturn" None 1 0;
    0xb1 RETURN "return" None 0 0;
    0xb2 GETSTATIC "getstatic" Constant _ _;
    0xb3 PUTSTATIC "putstatic" Constant _ _;
    0xb4 GETFIELD "getfield" Constant _ _;
    0xb5 PUTFIELD "putfield" Constant _ _;
    0xb6 INVOKEVIRTUAL "invokevirtual" Constant _ _;
    0xb7 INVOKESPECIAL "invokespecial" Constant _ _;
    0xb8 INVOKESTATIC "invokestatic" Constant _ _;
    0xb9 INVOKEINTERFACE "invokeinterface" InvokeInterface _ _;
    0xba INVOKEDYNAMIC "invokedynamic" InvokeDynamic _ _;
    0xbb NEW "new" Constant 0 1;
    0xbc NEWARRAY "newarray" NewArray 1 1;
    0xbd ANEWARRAY "anewarray" Constant 1 1;
    0xbe ARRAYLENGTH "arraylength" None 1 1;
    0xbf ATHROW "athrow" None 1 0;
    0xc0 CHECKCAST "checkcast" Constant 1 1;
    0xc1 INSTANCEOF "instanceof" Constant 1 1;
    0xc2 MONITORENTER "monitorenter" None 1 0;
    0xc3 MONITOREXIT "monitorexit" None 1 0;
    0xc4 WIDE "wide" Wide _ _;
    0xc5 MULTIANEWARRAY "multianewarray" MultiANewArray _ _;
    0xc6 IFNULL "ifnull" Branch 1 0;
    0xc7 IFNONNULL "ifnonnull" Branch 1 0;
    0xc8 GOTO_W "goto_w" WideBranch 0 0;
    0xc9 JSR_W "jsr_w" WideBranch 0 1;
}

/// Padding needed after a switch opcode at `pos` so that its operands are 4-byte aligned
pub fn switch_padding(pos: usize) -> usize {
    (4 - (pos + 1) % 4) % 4
}

fn read_i32(code: &[u8], at: usize) -> Result<i32, Error> {
    code.get(at..at + 4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::malformed("instruction runs past the end of the code"))
}

/// Length in bytes of the instruction starting at `pos`
pub fn instruction_length(code: &[u8], pos: usize) -> Result<usize, Error> {
    let opcode = *code
        .get(pos)
        .ok_or_else(|| Error::malformed("instruction starts past the end of the code"))?;
    let info =
        info(opcode).ok_or_else(|| Error::malformed(format!("unknown opcode 0x{:02x}", opcode)))?;
    let length = match info.operands {
        Operands::None => 1,
        Operands::Byte | Operands::ConstantByte | Operands::Local | Operands::NewArray => 2,
        Operands::Short | Operands::Constant | Operands::Branch | Operands::Iinc => 3,
        Operands::MultiANewArray => 4,
        Operands::WideBranch | Operands::InvokeInterface | Operands::InvokeDynamic => 5,
        Operands::Wide => match code.get(pos + 1) {
            Some(&IINC) => 6,
            Some(&(ILOAD..=ALOAD)) | Some(&(ISTORE..=ASTORE)) | Some(&RET) => 4,
            _ => return Err(Error::malformed(format!("invalid wide instruction at {}", pos))),
        },
        Operands::TableSwitch => {
            let base = pos + 1 + switch_padding(pos);
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            if high < low {
                return Err(Error::malformed(format!("tableswitch at {} has high < low", pos)));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            base - pos + 12 + 4 * count
        }
        Operands::LookupSwitch => {
            let base = pos + 1 + switch_padding(pos);
            let pairs = read_i32(code, base + 4)?;
            if pairs < 0 {
                return Err(Error::malformed(format!("lookupswitch at {} has negative size", pos)));
            }
            base - pos + 8 + 8 * pairs as usize
        }
    };
    if pos + length > code.len() {
        return Err(Error::malformed(format!(
            "instruction at {} runs past the end of the code",
            pos
        )));
    }
    Ok(length)
}

/// Two-byte operand right after the opcode (constant pool index, for most instructions)
pub fn operand_u16(instruction: &[u8]) -> Option<u16> {
    instruction.get(1..3).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Local variable slot of a load, store, `iinc`, or `ret` (including the short and wide forms)
pub fn local_slot(instruction: &[u8]) -> Option<u16> {
    let opcode = *instruction.first()?;
    match opcode {
        ILOAD..=ALOAD | ISTORE..=ASTORE | IINC | RET => instruction.get(1).map(|b| *b as u16),
        ILOAD_0..=ALOAD_3 => Some(((opcode - ILOAD_0) % 4) as u16),
        ISTORE_0..=ASTORE_3 => Some(((opcode - ISTORE_0) % 4) as u16),
        WIDE => operand_u16(&instruction[1..]),
        _ => None,
    }
}

/// One past the highest local variable slot touched by a load, store, `iinc`, or `ret`
pub fn local_extent(instruction: &[u8]) -> Option<u16> {
    let slot = local_slot(instruction)?;
    let opcode = match instruction {
        [WIDE, opcode, ..] | [opcode, ..] => *opcode,
        [] => return None,
    };
    let width = match opcode {
        LLOAD | DLOAD | LSTORE | DSTORE => 2,
        LLOAD_0..=LLOAD_3 | DLOAD_0..=DLOAD_3 | LSTORE_0..=LSTORE_3 | DSTORE_0..=DSTORE_3 => 2,
        _ => 1,
    };
    Some(slot.saturating_add(width))
}

fn malformed_descriptor(descriptor: &str) -> impl FnOnce(String) -> Error + '_ {
    move |err| Error::malformed(format!("bad descriptor {:?}: {}", descriptor, err))
}

/// Slots taken by a value of the given field descriptor
pub fn field_width(descriptor: &str) -> Result<u8, Error> {
    let field_type = FieldType::parse(descriptor)
        .map_err(malformed_descriptor(descriptor))?;
    Ok(field_type.width() as u8)
}

/// Slots popped for the arguments and pushed for the result of a method descriptor
pub fn method_widths(descriptor: &str) -> Result<(u8, u8), Error> {
    let method = MethodDescriptor::parse(descriptor)
        .map_err(malformed_descriptor(descriptor))?;
    let arguments = method.parameter_length(false);
    let result = method.return_type.map_or(0, |typ| typ.width());
    Ok((arguments as u8, result as u8))
}

/// Number of slots popped and then pushed by one instruction
pub fn stack_effect(instruction: &[u8], constants: &ConstantPool) -> Result<(u16, u16), Error> {
    let opcode = *instruction
        .first()
        .ok_or_else(|| Error::malformed("empty instruction"))?;
    let opcode_info =
        info(opcode).ok_or_else(|| Error::malformed(format!("unknown opcode 0x{:02x}", opcode)))?;
    if let StackEffect::Fixed(pop, push) = opcode_info.stack {
        return Ok((pop as u16, push as u16));
    }

    let index = || {
        operand_u16(instruction)
            .map(ConstantIndex)
            .ok_or_else(|| Error::malformed("truncated instruction"))
    };
    let effect = match opcode {
        GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => {
            let width = field_width(constants.member_ref(index()?)?.descriptor)? as u16;
            match opcode {
                GETSTATIC => (0, width),
                PUTSTATIC => (width, 0),
                GETFIELD => (1, width),
                _ => (1 + width, 0),
            }
        }
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
            let (arguments, result) = method_widths(constants.member_ref(index()?)?.descriptor)?;
            let receiver = if opcode == INVOKESTATIC { 0 } else { 1 };
            (arguments as u16 + receiver, result as u16)
        }
        INVOKEDYNAMIC => match constants.get(index()?)? {
            Constant::InvokeDynamic {
                method_descriptor, ..
            } => {
                let (_, descriptor) = constants.name_and_type(*method_descriptor)?;
                let (arguments, result) = method_widths(descriptor)?;
                (arguments as u16, result as u16)
            }
            other => {
                return Err(Error::malformed(format!(
                    "invokedynamic refers to {:?}",
                    other
                )))
            }
        },
        MULTIANEWARRAY => {
            let dimensions = *instruction
                .get(3)
                .ok_or_else(|| Error::malformed("truncated multianewarray"))?;
            (dimensions as u16, 1)
        }
        WIDE => {
            let inner = instruction
                .get(1)
                .and_then(|op| info(*op))
                .ok_or_else(|| Error::malformed("truncated wide instruction"))?;
            match inner.stack {
                StackEffect::Fixed(pop, push) => (pop as u16, push as u16),
                StackEffect::Computed => {
                    return Err(Error::malformed("wide applied to a non-local instruction"))
                }
            }
        }
        _ => {
            return Err(Error::malformed(format!(
                "no stack effect for {}",
                opcode_info.mnemonic
            )))
        }
    };
    Ok(effect)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mnemonics_round_trip() {
        for opcode in 0..=JSR_W {
            let info = info(opcode).unwrap();
            assert_eq!(by_mnemonic(info.mnemonic), Some(opcode));
        }
        assert!(info(0xca).is_none());
        assert_eq!(by_mnemonic("invokespecial"), Some(INVOKESPECIAL));
    }

    #[test]
    fn lengths() {
        assert_eq!(instruction_length(&[ILOAD_1], 0).unwrap(), 1);
        assert_eq!(instruction_length(&[SIPUSH, 1, 0], 0).unwrap(), 3);
        assert_eq!(instruction_length(&[WIDE, IINC, 1, 0, 0, 1], 0).unwrap(), 6);
        assert_eq!(instruction_length(&[WIDE, ALOAD, 1, 0], 0).unwrap(), 4);
        assert!(matches!(instruction_length(&[SIPUSH, 1], 0), Err(Error::Malformed(_))));
        assert!(matches!(instruction_length(&[0xfe], 0), Err(Error::Malformed(_))));

        // `tableswitch` at 1 pads by two bytes, then default/low/high and two targets
        let mut code = vec![NOP, TABLESWITCH, 0, 0];
        code.extend_from_slice(&[0, 0, 0, 20, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 20, 0, 0, 0, 20]);
        assert_eq!(instruction_length(&code, 1).unwrap(), 23);
    }

    #[test]
    fn slots() {
        assert_eq!(local_slot(&[ALOAD_2]), Some(2));
        assert_eq!(local_slot(&[DSTORE_3]), Some(3));
        assert_eq!(local_slot(&[ISTORE, 7]), Some(7));
        assert_eq!(local_slot(&[WIDE, LLOAD, 1, 4]), Some(260));
        assert_eq!(local_slot(&[IADD]), None);
        assert_eq!(local_extent(&[DSTORE_3]), Some(5));
        assert_eq!(local_extent(&[WIDE, LLOAD, 1, 4]), Some(262));
        assert_eq!(local_extent(&[IINC, 6, 1]), Some(7));
    }

    #[test]
    fn computed_stack_effects() {
        let mut constants = ConstantPool::new();
        let field = constants.get_field_ref("a/B", "count", "J").unwrap();
        let method = constants
            .get_method_ref("a/B", "mix", "(IJLjava/lang/String;)D", false)
            .unwrap();
        let [f0, f1] = ((field.0).0).to_be_bytes();
        let [m0, m1] = ((method.0).0).to_be_bytes();

        assert_eq!(stack_effect(&[GETFIELD, f0, f1], &constants).unwrap(), (1, 2));
        assert_eq!(stack_effect(&[PUTSTATIC, f0, f1], &constants).unwrap(), (2, 0));
        assert_eq!(stack_effect(&[INVOKEVIRTUAL, m0, m1], &constants).unwrap(), (5, 2));
        assert_eq!(stack_effect(&[INVOKESTATIC, m0, m1], &constants).unwrap(), (4, 2));
        assert_eq!(stack_effect(&[DUP2_X1], &constants).unwrap(), (3, 5));
        assert_eq!(stack_effect(&[WIDE, DSTORE, 1, 0], &constants).unwrap(), (2, 0));
        assert_eq!(stack_effect(&[WIDE, IINC, 0, 1, 0, 5], &constants).unwrap(), (0, 0));
        assert!(matches!(stack_effect(&[WIDE], &constants), Err(Error::Malformed(_))));
        assert!(matches!(
            stack_effect(&[WIDE, GETFIELD, f0, f1], &constants),
            Err(Error::Malformed(_))
        ));
    }
}
