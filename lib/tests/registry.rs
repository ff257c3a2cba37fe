mod common;

use classweave::jvm::class_file::ClassFile;
use classweave::jvm::{Error, FieldAccessFlags, MethodAccessFlags, Version};
use classweave::model::{ClassDefiner, ClassRegistry, MemberKind, MemorySource};
use std::cell::RefCell;
use std::sync::Arc;

#[test]
fn resolve_is_stable() {
    let source = Arc::new(MemorySource::new());
    source.insert("p/Q", common::class_bytes("p/Q", Version::JAVA8));
    let registry = ClassRegistry::new();
    registry.append_source(source);

    let first = registry.resolve("p.Q").unwrap();
    let second = registry.resolve("p/Q").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "p/Q");

    assert!(matches!(registry.resolve("p/Missing"), Err(Error::NotFound(_))));
    assert!(registry.find("p/Missing").unwrap().is_none());
}

#[test]
fn children_share_parent_entities() {
    let source = Arc::new(MemorySource::new());
    source.insert("p/Shared", common::class_bytes("p/Shared", Version::JAVA8));
    let parent = ClassRegistry::new();
    parent.append_source(source);
    let child = ClassRegistry::with_parent(&parent, false);

    let through_child = child.resolve("p/Shared").unwrap();
    let through_parent = parent.resolve("p/Shared").unwrap();
    assert!(Arc::ptr_eq(&through_child, &through_parent));

    let local = child.make_class("p/Local", None).unwrap();
    assert!(Arc::ptr_eq(&child.resolve("p/Local").unwrap(), &local));
    assert!(parent.find("p/Local").unwrap().is_none());
}

#[test]
fn unmodified_classes_keep_their_bytes() {
    let bytes = common::class_bytes("p/Plain", Version::JAVA6);
    let registry = ClassRegistry::new();
    let entity = registry.register_bytes("p/Plain", bytes.clone(), false).unwrap();
    assert_eq!(entity.version().unwrap(), Version::JAVA6);
    assert!(!entity.is_modified());
    assert_eq!(entity.to_bytes().unwrap(), bytes);
}

#[test]
fn serialized_structure_parses_back() {
    let registry = common::registry();
    let class = registry.make_class("p/Shape", Some("p.Base")).unwrap();
    class.add_interface("java/io/Serializable").unwrap();
    class
        .add_field("sides", "I", FieldAccessFlags::PRIVATE)
        .unwrap();
    class
        .add_field("NAME", "Ljava/lang/String;", FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC)
        .unwrap();
    class
        .add_method(
            "area",
            "()D",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            None,
        )
        .unwrap();
    class
        .add_method(
            "sides",
            "()I",
            MethodAccessFlags::PUBLIC,
            Some("aload_0; getfield this.sides:I; ireturn"),
        )
        .unwrap();

    let bytes = class.freeze().unwrap();
    let parsed = ClassFile::parse(&bytes).unwrap();
    assert_eq!(parsed.name().unwrap(), "p/Shape");
    assert_eq!(parsed.super_name().unwrap(), Some("p/Base"));
    assert_eq!(parsed.interface_names().unwrap(), vec!["java/io/Serializable"]);

    let fields: Vec<(String, String, FieldAccessFlags)> = parsed
        .fields
        .iter()
        .map(|field| {
            (
                field.name(&parsed.constants).unwrap().to_owned(),
                field.descriptor(&parsed.constants).unwrap().to_owned(),
                field.access_flags,
            )
        })
        .collect();
    assert_eq!(
        fields,
        vec![
            ("sides".to_owned(), "I".to_owned(), FieldAccessFlags::PRIVATE),
            (
                "NAME".to_owned(),
                "Ljava/lang/String;".to_owned(),
                FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC
            ),
        ]
    );

    let methods: Vec<(String, String, MethodAccessFlags)> = parsed
        .methods
        .iter()
        .map(|method| {
            (
                method.name(&parsed.constants).unwrap().to_owned(),
                method.descriptor(&parsed.constants).unwrap().to_owned(),
                method.access_flags,
            )
        })
        .collect();
    assert_eq!(
        methods,
        vec![
            (
                "area".to_owned(),
                "()D".to_owned(),
                MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT
            ),
            ("sides".to_owned(), "()I".to_owned(), MethodAccessFlags::PUBLIC),
        ]
    );

    // Bytes of an unchanged class survive a trip through a registry as they are
    let registry = ClassRegistry::new();
    let reloaded = registry.register_bytes("p/Shape", bytes.clone(), false).unwrap();
    assert_eq!(reloaded.to_bytes().unwrap(), bytes);
    let names: Vec<(MemberKind, String)> = reloaded
        .members()
        .unwrap()
        .map(|member| (member.kind(), member.name().to_owned()))
        .collect();
    assert_eq!(
        names,
        vec![
            (MemberKind::Field, "sides".to_owned()),
            (MemberKind::Field, "NAME".to_owned()),
            (MemberKind::Method, "area".to_owned()),
            (MemberKind::Method, "sides".to_owned()),
        ]
    );
}

#[test]
fn freeze_prune_and_defrost() {
    let registry = common::registry();
    let class = registry.make_class("p/Life", None).unwrap();
    class.add_field("x", "I", FieldAccessFlags::PUBLIC).unwrap();

    let first = class.freeze().unwrap();
    let second = class.freeze().unwrap();
    assert_eq!(first, second);
    assert!(matches!(
        class.add_field("y", "I", FieldAccessFlags::PUBLIC),
        Err(Error::Frozen(_))
    ));

    class.defrost().unwrap();
    class.add_field("y", "I", FieldAccessFlags::PUBLIC).unwrap();
    assert_ne!(class.freeze().unwrap(), first);

    assert!(class.prune().unwrap());
    assert!(class.is_pruned());
    assert!(!class.prune().unwrap());
    assert!(matches!(class.defrost(), Err(Error::Pruned(_))));
    assert!(matches!(class.access_flags(), Err(Error::Pruned(_))));
    assert!(matches!(
        class.add_field("z", "I", FieldAccessFlags::PUBLIC),
        Err(Error::Pruned(_))
    ));
    assert_eq!(class.name(), "p/Life");
}

#[test]
fn stopped_pruning_keeps_classes_editable() {
    let registry = common::registry();
    registry.set_auto_prune(true);

    let kept = registry.make_class("p/Kept", None).unwrap();
    kept.stop_pruning(true);
    kept.to_bytes().unwrap();
    assert!(!kept.is_pruned());
    kept.defrost().unwrap();
    kept.add_field("more", "J", FieldAccessFlags::PRIVATE).unwrap();

    let dropped = registry.make_class("p/Dropped", None).unwrap();
    dropped.to_bytes().unwrap();
    assert!(dropped.is_pruned());
}

#[derive(Default)]
struct RecordingDefiner {
    defined: RefCell<Vec<(String, Vec<u8>)>>,
}

impl ClassDefiner for RecordingDefiner {
    fn define(&self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        self.defined.borrow_mut().push((name.to_owned(), bytes.to_vec()));
        Ok(())
    }
}

#[test]
fn registered_classes_reach_the_definer() {
    let registry = common::registry();
    let class = registry.make_class("p/Defined", None).unwrap();
    let definer = RecordingDefiner::default();
    class.register(&definer).unwrap();

    let defined = definer.defined.borrow();
    assert_eq!(defined.len(), 1);
    assert_eq!(defined[0].0, "p/Defined");
    assert_eq!(defined[0].1, class.freeze().unwrap());
    assert!(class.is_frozen());
}

#[test]
fn renamed_classes_move_in_the_registry() {
    let registry = common::registry();
    let class = registry.make_class("p/Old", None).unwrap();
    class.set_name("p/New").unwrap();

    assert_eq!(class.name(), "p/New");
    assert!(registry.find("p/Old").unwrap().is_none());
    assert!(Arc::ptr_eq(&registry.resolve("p/New").unwrap(), &class));

    let parsed = ClassFile::parse(&class.freeze().unwrap()).unwrap();
    assert_eq!(parsed.name().unwrap(), "p/New");
}
