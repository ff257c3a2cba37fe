mod common;

use classweave::convert::{
    InsertBeforeCall, RedirectMethodCall, ReplaceFieldRead, ReplaceNew, TransformerChain,
};
use classweave::jvm::{Error, MethodAccessFlags};

#[test]
fn chain_rewrites_an_entity() {
    let registry = common::registry();
    let class = registry.make_class("p/Client", None).unwrap();
    class
        .add_method(
            "make",
            "()Ljava/lang/Object;",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            Some(
                "new java/util/ArrayList; dup; bipush 10
                 invokespecial java/util/ArrayList.<init>:(I)V
                 areturn",
            ),
        )
        .unwrap();
    class
        .add_method(
            "send",
            "(Lp/Channel;Ljava/lang/String;)V",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            Some(
                "aload_0; aload_1
                 invokevirtual p/Channel.write:(Ljava/lang/String;)V
                 return",
            ),
        )
        .unwrap();
    class
        .add_method(
            "untouched",
            "()I",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            Some("iconst_5; ireturn"),
        )
        .unwrap();
    let before = class.freeze().unwrap();
    class.defrost().unwrap();

    let mut chain = TransformerChain::new();
    chain
        .push(ReplaceNew::new("java/util/ArrayList", "p/Lists", "sized"))
        .push(InsertBeforeCall::new(
            "p.Channel",
            "write",
            "(Ljava/lang/String;)V",
            "p/Audit",
            "beforeWrite",
        )
        .unwrap())
        .push(RedirectMethodCall::new(
            "p/Channel",
            "write",
            "(Ljava/lang/String;)V",
            "p/BufferedChannel",
            "write",
        ));
    assert_eq!(chain.apply(&class).unwrap(), 2);
    let after = class.freeze().unwrap();

    assert_eq!(
        common::instructions(&common::listing(&after, "make", "()Ljava/lang/Object;")),
        vec!["bipush 10", "invokestatic p/Lists.sized:(I)Ljava/util/ArrayList;", "areturn"]
    );
    assert_eq!(
        common::instructions(&common::listing(
            &after,
            "send",
            "(Lp/Channel;Ljava/lang/String;)V"
        )),
        vec![
            "aload_0",
            "aload_1",
            "astore_3",
            "astore_2",
            "aload_2",
            "aload_3",
            "invokestatic p/Audit.beforeWrite:(Lp/Channel;Ljava/lang/String;)V",
            "aload_2",
            "aload_3",
            "invokevirtual p/BufferedChannel.write:(Ljava/lang/String;)V",
            "return",
        ]
    );
    let (_, send) = common::method_code(&after, "send", "(Lp/Channel;Ljava/lang/String;)V");
    assert_eq!(send.max_locals, 2 + 2);

    let (_, old) = common::method_code(&before, "untouched", "()I");
    let (_, new) = common::method_code(&after, "untouched", "()I");
    assert_eq!(old.code_array, new.code_array);
    assert_eq!((old.max_stack, old.max_locals), (new.max_stack, new.max_locals));
}

#[test]
fn failed_chain_changes_nothing() {
    let registry = common::registry();
    let class = registry.make_class("p/Broken", None).unwrap();
    class
        .add_method(
            "count",
            "()I",
            MethodAccessFlags::STATIC,
            Some("getstatic p/Broken.hits:I; ireturn"),
        )
        .unwrap();
    class
        .add_method(
            "make",
            "()Ljava/lang/Object;",
            MethodAccessFlags::STATIC,
            Some("new java/lang/Object; areturn"),
        )
        .unwrap();
    let before = class.freeze().unwrap();

    let mut chain = TransformerChain::new();
    chain
        .push(ReplaceFieldRead::new("p/Broken", "hits", "p/Hooks", "hits"))
        .push(ReplaceNew::new("java/lang/Object", "p/Hooks", "object"));

    // Frozen classes are not transformed at all
    assert!(matches!(chain.apply(&class), Err(Error::Frozen(_))));

    class.defrost().unwrap();
    assert!(matches!(chain.apply(&class), Err(Error::CannotCompile(_))));
    assert_eq!(class.freeze().unwrap(), before);
}
