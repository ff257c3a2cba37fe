mod common;

use classweave::jvm::class_file::ClassFile;
use classweave::jvm::{Error, FieldAccessFlags, MethodAccessFlags, Version};
use classweave::model::FieldInitializer;
use classweave::splice::ReturnStrategy;

const GUARDED: &str = "
    start: iload_0
           ireturn
    end:   pop
           iconst_m1
           ireturn
    .catch start end end java/lang/RuntimeException
";

const TWO_RETURNS: &str = "
    iload_0
    ifeq zero
    iconst_1
    ireturn
    zero: iconst_0
    ireturn
";

#[test]
fn insert_before_shifts_the_body() {
    let registry = common::registry();
    let class = registry.make_class("p/Guarded", None).unwrap();
    let method = class
        .add_method("f", "(I)I", MethodAccessFlags::STATIC, Some(GUARDED))
        .unwrap();
    let (_, before) = common::method_code(&class.freeze().unwrap(), "f", "(I)I");
    class.defrost().unwrap();

    method.insert_before("iinc $1 1; iconst_0; pop").unwrap();
    let (_, after) = common::method_code(&class.freeze().unwrap(), "f", "(I)I");

    let inserted = after.code_array.len() - before.code_array.len();
    assert_eq!(inserted, 5);
    assert_eq!(&after.code_array[inserted..], &before.code_array[..]);
    assert_eq!(after.exception_table.len(), before.exception_table.len());
    for (old, new) in before.exception_table.iter().zip(&after.exception_table) {
        assert_eq!(new.start_pc, old.start_pc + inserted as u16);
        assert_eq!(new.end_pc, old.end_pc + inserted as u16);
        assert_eq!(new.handler_pc, old.handler_pc + inserted as u16);
        assert_eq!(new.catch_type, old.catch_type);
    }
}

#[test]
fn finally_subroutine_is_shared_by_every_exit() {
    let registry = common::registry();
    let class = registry.make_class("p/Exits", None).unwrap();
    class.set_version(Version::JAVA6).unwrap();
    let method = class
        .add_method("f", "(I)I", MethodAccessFlags::STATIC, Some(TWO_RETURNS))
        .unwrap();
    method
        .insert_after_with("iinc $result 7", true, ReturnStrategy::Subroutine)
        .unwrap();

    let bytes = class.freeze().unwrap();
    let listing = common::listing(&bytes, "f", "(I)I");
    let instructions = common::instructions(&listing);

    // One copy of the fragment, inside the one subroutine
    assert_eq!(instructions.iter().filter(|insn| *insn == "iinc 1 7").count(), 1);
    assert_eq!(instructions.iter().filter(|insn| insn.starts_with("ret ")).count(), 1);

    // Every return goes through the subroutine first
    let return_sites: Vec<usize> = instructions
        .iter()
        .enumerate()
        .filter(|(_, insn)| insn.starts_with("jsr "))
        .map(|(idx, _)| idx)
        .filter(|idx| instructions.get(idx + 2).map(String::as_str) == Some("ireturn"))
        .collect();
    assert_eq!(return_sites.len(), 2);
    for idx in return_sites {
        assert_eq!(instructions[idx - 1], "istore_1");
        assert_eq!(instructions[idx + 1], "iload_1");
    }

    let (_, code) = common::method_code(&bytes, "f", "(I)I");
    assert_eq!(code.exception_table.len(), 1);
    let entry = &code.exception_table[0];
    assert_eq!(entry.catch_type.0 .0, 0);
    assert_eq!(entry.start_pc, 0);
    assert!(entry.end_pc <= entry.handler_pc);
}

#[test]
fn subroutines_need_old_class_files() {
    let registry = common::registry();
    let class = registry.make_class("p/Modern", None).unwrap();
    let method = class
        .add_method("f", "(I)I", MethodAccessFlags::STATIC, Some(TWO_RETURNS))
        .unwrap();
    let before = class.freeze().unwrap();
    class.defrost().unwrap();

    assert!(matches!(
        method.insert_after_with("nop", true, ReturnStrategy::Subroutine),
        Err(Error::CannotCompile(_))
    ));
    method.insert_after("iinc $result 7", true).unwrap();
    let bytes = class.freeze().unwrap();
    assert_ne!(bytes, before);
    let instructions = common::instructions(&common::listing(&bytes, "f", "(I)I"));
    assert!(!instructions.iter().any(|insn| insn.starts_with("jsr")));
    assert_eq!(instructions.iter().filter(|insn| *insn == "iinc 1 7").count(), 3);
}

#[test]
fn counter_and_logging_advice() {
    let registry = common::registry();
    let class = registry.make_class("A", None).unwrap();
    class.set_version(Version::JAVA6).unwrap();
    class
        .add_field("counter", "I", FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC)
        .unwrap();
    class
        .add_method(
            "log",
            "(I)V",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            Some("return"),
        )
        .unwrap();
    let f = class
        .add_method("f", "(I)I", MethodAccessFlags::PUBLIC, Some("iload_1; ireturn"))
        .unwrap();
    let (_, original) = common::method_code(&class.freeze().unwrap(), "f", "(I)I");
    class.defrost().unwrap();

    f.insert_before("getstatic this.counter:I; iconst_1; iadd; putstatic this.counter:I")
        .unwrap();
    f.insert_after("load $result; invokestatic this.log:(I)V", true)
        .unwrap();

    let bytes = class.freeze().unwrap();
    let parsed = ClassFile::parse(&bytes).unwrap();
    assert_eq!(parsed.version, Version::JAVA6);
    let (_, code) = common::method_code(&bytes, "f", "(I)I");
    let instructions = common::instructions(&common::listing(&bytes, "f", "(I)I"));

    assert_eq!(instructions.iter().filter(|insn| insn.starts_with("ret ")).count(), 1);
    assert_eq!(
        instructions
            .iter()
            .filter(|insn| insn.starts_with("invokestatic A.log"))
            .count(),
        1
    );
    assert_eq!(code.exception_table.len(), 1);

    // The synthetic entry covers the advice and the original body, up to the subroutine
    let entry = &code.exception_table[0];
    assert_eq!(entry.catch_type.0 .0, 0);
    assert_eq!(entry.start_pc, 0);
    let before_advice = 3 + 1 + 1 + 3;
    let rewritten_return = 1 + 3 + 1 + 1;
    let body = original.code_array.len() - 1 + rewritten_return;
    assert_eq!(entry.end_pc as usize, before_advice + body);
    assert_eq!(
        &code.code_array[before_advice..before_advice + original.code_array.len() - 1],
        &original.code_array[..original.code_array.len() - 1]
    );
}

#[test]
fn catch_and_line_insertion() {
    let registry = common::registry();
    let class = registry.make_class("p/Lines", None).unwrap();
    let method = class
        .add_method(
            "f",
            "(I)I",
            MethodAccessFlags::STATIC,
            Some("iload_0; iconst_2; idiv; ireturn"),
        )
        .unwrap();
    method
        .add_catch("iconst_0; ireturn", "java.lang.ArithmeticException")
        .unwrap();

    let bytes = class.freeze().unwrap();
    let (class_file, code) = common::method_code(&bytes, "f", "(I)I");
    assert_eq!(code.exception_table.len(), 1);
    let entry = &code.exception_table[0];
    assert_eq!((entry.start_pc, entry.end_pc, entry.handler_pc), (0, 4, 4));
    assert_eq!(
        class_file.constants.class_name(entry.catch_type).unwrap(),
        "java/lang/ArithmeticException"
    );

    // Handlers must not fall off their end
    class.defrost().unwrap();
    assert!(matches!(
        method.add_catch("nop", "java/lang/Exception"),
        Err(Error::CannotCompile(_))
    ));

    // Without a line number table there is no line to insert at
    assert!(matches!(
        method.insert_at_line(10, "nop"),
        Err(Error::CannotCompile(_))
    ));
}

#[test]
fn bodiless_methods_cannot_be_spliced() {
    let registry = common::registry();
    let class = registry.make_class("p/Shape", None).unwrap();
    let area = class
        .add_method(
            "area",
            "()D",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            None,
        )
        .unwrap();
    assert!(!area.has_body().unwrap());
    assert!(matches!(area.insert_before("nop"), Err(Error::CannotCompile(_))));
    assert!(matches!(area.insert_before("load $3"), Err(Error::CannotCompile(_))));

    area.set_body("dconst_1; dreturn").unwrap();
    assert!(area.has_body().unwrap());
    assert!(!area.method_flags().unwrap().contains(MethodAccessFlags::ABSTRACT));
    assert!(matches!(area.insert_before("load $3; pop"), Err(Error::CannotCompile(_))));
}

#[test]
fn initializers_run_in_constructors_and_class_initializer() {
    let registry = common::registry();
    let class = registry.make_class("p/Init", None).unwrap();
    class
        .add_method(
            "<init>",
            "()V",
            MethodAccessFlags::PUBLIC,
            Some("aload_0; invokespecial java/lang/Object.<init>:()V; return"),
        )
        .unwrap();
    class
        .add_field_with_initializer(
            "size",
            "I",
            FieldAccessFlags::PRIVATE,
            FieldInitializer::Int(1000),
        )
        .unwrap();
    class
        .add_field_with_initializer(
            "created",
            "J",
            FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC,
            FieldInitializer::Code("invokestatic java/lang/System.nanoTime:()J".to_owned()),
        )
        .unwrap();
    assert!(matches!(
        class.add_field_with_initializer(
            "bad",
            "I",
            FieldAccessFlags::PRIVATE,
            FieldInitializer::String("no".to_owned()),
        ),
        Err(Error::CannotCompile(_))
    ));

    let bytes = class.freeze().unwrap();
    let init = common::instructions(&common::listing(&bytes, "<init>", "()V"));
    assert_eq!(
        init,
        vec![
            "aload_0",
            "invokespecial java/lang/Object.<init>:()V",
            "aload_0",
            "sipush 1000",
            "putfield p/Init.size:I",
            "return",
        ]
    );
    let clinit = common::instructions(&common::listing(&bytes, "<clinit>", "()V"));
    assert_eq!(
        clinit,
        vec![
            "invokestatic java/lang/System.nanoTime:()J",
            "putstatic p/Init.created:J",
            "return",
        ]
    );
}
