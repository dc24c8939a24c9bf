//! Class declarations checked against what is already on disk.

use crate::common::*;

fn versioned(extra: bool) -> std::sync::Arc<Class> {
    let builder = Class::builder("itest.Versioned").field("a", FieldType::Int);
    let builder = if extra {
        builder.field("b", FieldType::Float)
    } else {
        builder
    };
    builder.build().unwrap()
}

#[test]
fn changed_layout_after_reopen_is_rejected() {
    let mut t = TestDb::new();
    t.db()
        .insert(&Object::new(&versioned(false)).with("a", 1).unwrap())
        .unwrap();
    let db = t.reopen();
    let err = db.register_class(&versioned(true)).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }), "{err}");
    db.register_class(&versioned(false)).unwrap();
}

#[test]
fn redeclaring_the_same_layout_is_accepted() {
    let t = TestDb::new();
    let db = t.db();
    db.register_class(&versioned(false)).unwrap();
    db.register_class(&versioned(false)).unwrap();
    assert!(matches!(
        db.register_class(&versioned(true)),
        Err(Error::SchemaMismatch { .. })
    ));
}

#[test]
fn subclass_satisfies_constrained_reference() {
    let t = TestDb::new();
    let db = t.db();
    let base = node_class();
    let special = Class::builder("itest.SpecialNode")
        .extends(&base)
        .field("rank", FieldType::Int)
        .build()
        .unwrap();
    assert!(special.is_a("itest.Node"));
    assert!(special.field("name").is_some());

    let holder = Class::builder("itest.NodeHolder")
        .field("node", FieldType::reference_to(&base))
        .build()
        .unwrap();
    let child = Object::new(&special)
        .with("name", "s")
        .unwrap()
        .with("rank", 2)
        .unwrap();
    let obj = Object::new(&holder).with("node", &child).unwrap();
    db.insert(&obj).unwrap();
    let back = db.get(&obj, "node").unwrap();
    assert!(back.as_object().unwrap().ptr_eq(&child));
    assert_eq!(db.get(&child, "rank").unwrap(), Value::Int(2));
}

#[test]
fn invalid_declarations_fail_to_build() {
    assert!(Class::builder("").build().is_err());
    assert!(Class::builder("a/b").build().is_err());
    assert!(Class::builder("itest.Bad")
        .field("x", FieldType::FixedString(0))
        .build()
        .is_err());
    assert!(Class::builder("itest.Bad")
        .field("x", FieldType::dict_of(FieldType::list_of(FieldType::Int), FieldType::Int))
        .build()
        .is_err());
    assert!(Class::builder("itest.Bad")
        .field("x", FieldType::Int)
        .field("x", FieldType::Float)
        .build()
        .is_err());
}
