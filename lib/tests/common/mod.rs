#![allow(dead_code)]

use classweave::compile::Assembler;
use classweave::jvm::class_file::{ClassFile, Code};
use classweave::jvm::code::disassemble;
use classweave::jvm::{ClassAccessFlags, Version};
use classweave::model::ClassRegistry;
use std::sync::Arc;

/// Fresh registry compiling fragments with the assembler
pub fn registry() -> Arc<ClassRegistry> {
    let registry = ClassRegistry::new();
    registry.set_compiler(Arc::new(Assembler::new()));
    registry
}

/// Bytes of an empty public class
pub fn class_bytes(name: &str, version: Version) -> Vec<u8> {
    let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
    ClassFile::new(name, Some("java/lang/Object"), flags, version)
        .unwrap()
        .to_bytes()
        .unwrap()
}

/// Parsed class, and the code of one of its methods
pub fn method_code(bytes: &[u8], name: &str, descriptor: &str) -> (ClassFile, Code) {
    let class = ClassFile::parse(bytes).unwrap();
    let idx = class
        .find_method(name, descriptor)
        .unwrap()
        .unwrap_or_else(|| panic!("no method {}{}", name, descriptor));
    let code = class.methods[idx].code(&class.constants).unwrap().unwrap();
    (class, code)
}

/// Disassembly of a method, one trimmed line per instruction or handler
pub fn listing(bytes: &[u8], name: &str, descriptor: &str) -> Vec<String> {
    let (class, code) = method_code(bytes, name, descriptor);
    disassemble(&code, &class.constants)
        .unwrap()
        .lines()
        .map(|line| line.trim().to_owned())
        .collect()
}

/// Instructions of a listing, without their offsets
pub fn instructions(listing: &[String]) -> Vec<String> {
    listing
        .iter()
        .take_while(|line| !line.starts_with("exception table"))
        .filter_map(|line| line.split_once(": ").map(|(_, insn)| insn.to_owned()))
        .collect()
}
