use super::opcodes::{self, instruction_length, operand_u16, switch_padding, Operands};
use super::array_type_from_code;
use crate::jvm::class_file::{ClassConstantIndex, Code, Constant, ConstantIndex, ConstantPool};
use crate::jvm::Error;
use std::fmt::Write;

/// Render a method body as text, one instruction per line
///
/// Jump targets are printed as absolute offsets and constant pool references symbolically (eg.
/// `java/lang/String.length:()I`). The exception table, if any, follows the instructions.
pub fn disassemble(code: &Code, constants: &ConstantPool) -> Result<String, Error> {
    let bytes = &code.code_array;
    let mut out = String::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let length = instruction_length(bytes, pos)?;
        let insn = &bytes[pos..pos + length];
        let info = opcodes::info(insn[0])
            .ok_or_else(|| Error::malformed(format!("unknown opcode 0x{:02x}", insn[0])))?;
        let _ = write!(out, "{:5}: {}", pos, info.mnemonic);

        match info.operands {
            Operands::None => (),
            Operands::Byte => {
                let _ = write!(out, " {}", insn[1] as i8);
            }
            Operands::Short => {
                let _ = write!(out, " {}", i16::from_be_bytes([insn[1], insn[2]]));
            }
            Operands::ConstantByte => {
                let rendered = render_constant(ConstantIndex(insn[1] as u16), constants)?;
                let _ = write!(out, " {}", rendered);
            }
            Operands::Constant | Operands::InvokeInterface | Operands::InvokeDynamic => {
                let index = ConstantIndex(operand_u16(insn).unwrap_or(0));
                let _ = write!(out, " {}", render_constant(index, constants)?);
            }
            Operands::MultiANewArray => {
                let index = ConstantIndex(operand_u16(insn).unwrap_or(0));
                let _ = write!(out, " {} {}", render_constant(index, constants)?, insn[3]);
            }
            Operands::Local => {
                let _ = write!(out, " {}", insn[1]);
            }
            Operands::Iinc => {
                let _ = write!(out, " {} {}", insn[1], insn[2] as i8);
            }
            Operands::NewArray => match array_type_from_code(insn[1]) {
                Some(base_type) => {
                    let _ = write!(out, " {:?}", base_type);
                }
                None => {
                    return Err(Error::malformed(format!(
                        "invalid array type {} at {}",
                        insn[1], pos
                    )))
                }
            },
            Operands::Wide => {
                let inner = opcodes::info(insn[1]).map_or("?", |info| info.mnemonic);
                let slot = u16::from_be_bytes([insn[2], insn[3]]);
                let _ = write!(out, " {} {}", inner, slot);
                if insn[1] == opcodes::IINC {
                    let _ = write!(out, " {}", i16::from_be_bytes([insn[4], insn[5]]));
                }
            }
            Operands::Branch => {
                let delta = i16::from_be_bytes([insn[1], insn[2]]) as isize;
                let _ = write!(out, " {}", pos as isize + delta);
            }
            Operands::WideBranch => {
                let delta = read_i32(insn, 1) as isize;
                let _ = write!(out, " {}", pos as isize + delta);
            }
            Operands::TableSwitch => {
                let base = 1 + switch_padding(pos);
                let default = read_i32(insn, base);
                let low = read_i32(insn, base + 4);
                let high = read_i32(insn, base + 8);
                let _ = write!(out, " {}..{}", low, high);
                for (i, key) in (low..=high).enumerate() {
                    let target = read_i32(insn, base + 12 + 4 * i);
                    let _ = write!(out, "\n{:>12}: {}", key, pos as isize + target as isize);
                }
                let _ = write!(out, "\n{:>12}: {}", "default", pos as isize + default as isize);
            }
            Operands::LookupSwitch => {
                let base = 1 + switch_padding(pos);
                let default = read_i32(insn, base);
                let pairs = read_i32(insn, base + 4) as usize;
                for i in 0..pairs {
                    let key = read_i32(insn, base + 8 + 8 * i);
                    let target = read_i32(insn, base + 12 + 8 * i);
                    let _ = write!(out, "\n{:>12}: {}", key, pos as isize + target as isize);
                }
                let _ = write!(out, "\n{:>12}: {}", "default", pos as isize + default as isize);
            }
        }
        out.push('\n');
        pos += length;
    }

    if !code.exception_table.is_empty() {
        out.push_str("exception table:\n");
        for handler in &code.exception_table {
            let caught = if handler.catch_type == ClassConstantIndex(ConstantIndex(0)) {
                "any"
            } else {
                constants.class_name(handler.catch_type)?
            };
            let _ = writeln!(
                out,
                "{:>7} {:>5} {:>5}  {}",
                handler.start_pc, handler.end_pc, handler.handler_pc, caught
            );
        }
    }
    Ok(out)
}

/// Only called on instructions already checked by `instruction_length`
fn read_i32(insn: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([insn[at], insn[at + 1], insn[at + 2], insn[at + 3]])
}

fn render_constant(index: ConstantIndex, constants: &ConstantPool) -> Result<String, Error> {
    let rendered = match constants.get(index)? {
        Constant::Class(name) => constants.utf8(*name)?.to_owned(),
        Constant::FieldRef(..) | Constant::MethodRef { .. } => {
            let member = constants.member_ref(index)?;
            format!("{}.{}:{}", member.class, member.name, member.descriptor)
        }
        Constant::String(string) => format!("{:?}", constants.utf8(*string)?),
        Constant::Integer(int) => int.to_string(),
        Constant::Float(float) => format!("{}f", float),
        Constant::Long(long) => format!("{}L", long),
        Constant::Double(double) => format!("{}d", double),
        Constant::InvokeDynamic {
            bootstrap_method,
            method_descriptor,
        } => {
            let (name, descriptor) = constants.name_and_type(*method_descriptor)?;
            format!("#{}:{}:{}", bootstrap_method, name, descriptor)
        }
        Constant::MethodType { descriptor } => constants.utf8(*descriptor)?.to_owned(),
        other => format!("{:?}", other),
    };
    Ok(rendered)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ExceptionHandler;
    use crate::jvm::code::opcodes::*;

    #[test]
    fn renders_instructions_and_handlers() {
        let mut constants = ConstantPool::new();
        let out = constants
            .get_field_ref("java/lang/System", "out", "Ljava/io/PrintStream;")
            .unwrap();
        let hello = constants.get_string("hello").unwrap();
        let throwable = constants.get_class("java/lang/Throwable").unwrap();

        let [o1, o2] = out.0 .0.to_be_bytes();
        let code = Code {
            max_stack: 2,
            max_locals: 1,
            code_array: vec![
                GETSTATIC, o1, o2, LDC, hello.0 .0 as u8, POP2, ILOAD_0, IFEQ, 0, 4, RETURN,
                RETURN,
            ],
            exception_table: vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 6,
                handler_pc: 11,
                catch_type: throwable,
            }],
            attributes: vec![],
        };
        let text = disassemble(&code, &constants).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "    0: getstatic java/lang/System.out:Ljava/io/PrintStream;",
                "    3: ldc \"hello\"",
                "    5: pop2",
                "    6: iload_0",
                "    7: ifeq 11",
                "   10: return",
                "   11: return",
                "exception table:",
                "      0     6    11  java/lang/Throwable",
            ]
        );
    }

    #[test]
    fn renders_switches() {
        // 0: iload_0; 1: tableswitch (2 bytes of padding) 0..1
        let mut code_array = vec![ILOAD_0, TABLESWITCH, 0, 0];
        for value in &[26i32, 0, 1, 23, 24] {
            code_array.extend_from_slice(&value.to_be_bytes());
        }
        code_array.extend_from_slice(&[RETURN, RETURN, RETURN, RETURN]);
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            code_array,
            exception_table: vec![],
            attributes: vec![],
        };
        let text = disassemble(&code, &ConstantPool::new()).unwrap();
        assert!(text.contains(
            "    1: tableswitch 0..1\n           0: 24\n           1: 25\n     default: 27\n"
        ));
        assert!(text.ends_with("   27: return\n"));
    }
}
