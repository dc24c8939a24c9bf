//! Insert/retrieve round trips, identity preservation and stale references.

use crate::common::*;
use worlddb::Uid;

#[test]
fn insert_then_retrieve_primitives_and_null_ref() {
    let t = TestDb::new();
    let db = t.db();
    let class = simple_class();
    let obj = Object::new(&class)
        .with("count", 1)
        .unwrap()
        .with("ratio", 2.0)
        .unwrap();
    let uid = db.insert(&obj).unwrap();
    drop(obj);

    let back = db.retrieve(&uid).unwrap().unwrap();
    assert_eq!(db.get(&back, "count").unwrap(), Value::Int(1));
    assert_eq!(db.get(&back, "ratio").unwrap(), Value::Float(2.0));
    assert_eq!(db.get(&back, "other").unwrap(), Value::Null);
}

#[test]
fn insert_is_idempotent() {
    let t = TestDb::new();
    let db = t.db();
    let obj = Object::new(&simple_class());
    let first = db.insert(&obj).unwrap();
    let before = db.stats().unwrap().objects;
    assert_eq!(db.insert(&obj).unwrap(), first);
    assert_eq!(db.stats().unwrap().objects, before);
    assert_eq!(db.uid_of(&obj), Some(first));
}

#[test]
fn cycle_resolves_to_same_instances() {
    let t = TestDb::new();
    let db = t.db();
    let class = node_class();
    let a = Object::new(&class).with("name", "a").unwrap();
    let b = Object::new(&class).with("name", "b").unwrap();
    a.set("next", &b).unwrap();
    b.set("next", &a).unwrap();
    let uid = db.insert(&a).unwrap();
    assert!(b.is_stored());

    let a2 = db.retrieve(&uid).unwrap().unwrap();
    assert!(a2.ptr_eq(&a));
    let b2 = db.get(&a2, "next").unwrap();
    let b2 = b2.as_object().unwrap();
    assert!(b2.ptr_eq(&b));
    let a3 = db.get(b2, "next").unwrap();
    assert!(a3.as_object().unwrap().ptr_eq(&a2));
}

#[test]
fn cycle_survives_reopen() {
    let mut t = TestDb::new();
    let uid = {
        let db = t.db();
        let class = node_class();
        let a = Object::new(&class).with("name", "a").unwrap();
        let b = Object::new(&class).with("name", "b").unwrap();
        a.set("next", &b).unwrap();
        b.set("next", &a).unwrap();
        db.insert(&a).unwrap()
    };
    let db = t.reopen();
    db.register_class(&node_class()).unwrap();
    let a = db.retrieve(&uid).unwrap().unwrap();
    let b = db.get(&a, "next").unwrap();
    let b = b.as_object().unwrap().clone();
    assert_eq!(db.get(&b, "name").unwrap(), Value::from("b"));
    let back = db.get(&b, "next").unwrap();
    assert!(back.as_object().unwrap().ptr_eq(&a));
}

#[test]
fn walked_cycle_is_released_when_handles_drop() {
    let mut t = TestDb::new();
    let uid = {
        let db = t.db();
        let class = node_class();
        let a = Object::new(&class).with("name", "a").unwrap();
        let b = Object::new(&class).with("name", "b").unwrap();
        a.set("next", &b).unwrap();
        b.set("next", &a).unwrap();
        db.insert(&a).unwrap()
    };
    let db = t.reopen();
    db.register_class(&node_class()).unwrap();
    let baseline = db.stats().unwrap().cached_objects;
    {
        let a = db.retrieve(&uid).unwrap().unwrap();
        let b = db.get(&a, "next").unwrap().as_object().unwrap().clone();
        let back = db.get(&b, "next").unwrap();
        assert!(back.as_object().unwrap().ptr_eq(&a));
        assert_eq!(db.stats().unwrap().cached_objects, baseline + 2);
    }
    assert_eq!(db.stats().unwrap().cached_objects, baseline);

    let a = db.retrieve(&uid).unwrap().unwrap();
    let b = db.get(&a, "next").unwrap();
    assert_eq!(
        db.get(b.as_object().unwrap(), "name").unwrap(),
        Value::from("b")
    );
}

#[test]
fn mismatched_genhash_is_rejected() {
    let t = TestDb::new();
    let db = t.db();
    let uid: Uid = db
        .insert(&Object::new(&simple_class()))
        .unwrap()
        .parse()
        .unwrap();
    let forged = Uid::new(uid.oid, uid.genhash.wrapping_add(1));
    let err = db.retrieve(&forged.to_string()).unwrap_err();
    assert!(matches!(err, Error::StaleReference { .. }), "{err}");
    assert!(err.is_not_found());
}

#[test]
fn mismatched_genhash_without_live_handle_is_rejected() {
    let mut t = TestDb::new();
    let uid: Uid = t
        .db()
        .insert(&Object::new(&simple_class()))
        .unwrap()
        .parse()
        .unwrap();
    let db = t.reopen();
    db.register_class(&simple_class()).unwrap();
    let forged = Uid::new(uid.oid, uid.genhash ^ 0x5555);
    assert!(db.retrieve_uid(forged).unwrap_err().is_not_found());
    assert!(db.retrieve_uid(uid).unwrap().is_some());
}

#[test]
fn malformed_uids() {
    let t = TestDb::new();
    let db = t.db();
    assert!(matches!(db.retrieve("not hex"), Err(Error::InvalidUid(_))));
    assert!(matches!(db.retrieve("00"), Err(Error::InvalidUid(_))));
    assert!(db.retrieve(&Uid::NULL.to_string()).unwrap().is_none());
    assert!(matches!(
        db.retrieve(&Uid::new(4096, 1).to_string()),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn writes_through_stored_handles() {
    let t = TestDb::new();
    let db = t.db();
    let class = simple_class();
    let target = Object::new(&class).with("count", 9).unwrap();
    let obj = Object::new(&class);
    db.insert(&obj).unwrap();
    db.set(&obj, "other", &target).unwrap();
    assert!(target.is_stored());
    let other = db.get(&obj, "other").unwrap();
    assert!(other.as_object().unwrap().ptr_eq(&target));
    db.set(&obj, "other", Value::Null).unwrap();
    assert_eq!(db.get(&obj, "other").unwrap(), Value::Null);
    assert!(matches!(
        db.set(&obj, "count", "text"),
        Err(Error::UnsupportedValue { .. })
    ));
}

#[test]
fn ephemeral_fields_stay_in_memory() {
    let mut t = TestDb::new();
    let class = || {
        Class::builder("itest.Session")
            .field("user", FieldType::string())
            .ephemeral("socket")
            .build()
            .unwrap()
    };
    let uid = {
        let db = t.db();
        let obj = Object::new(&class())
            .with("user", "ann")
            .unwrap()
            .with("socket", 42)
            .unwrap();
        let uid = db.insert(&obj).unwrap();
        assert_eq!(db.get(&obj, "socket").unwrap(), Value::Int(42));
        db.set(&obj, "socket", 43).unwrap();
        assert_eq!(db.get(&obj, "socket").unwrap(), Value::Int(43));
        uid
    };
    let db = t.reopen();
    db.register_class(&class()).unwrap();
    let obj = db.retrieve(&uid).unwrap().unwrap();
    assert_eq!(db.get(&obj, "user").unwrap(), Value::from("ann"));
    assert_eq!(db.get(&obj, "socket").unwrap(), Value::Null);
}

#[test]
fn constrained_reference() {
    let t = TestDb::new();
    let db = t.db();
    let node = node_class();
    let holder = Class::builder("itest.Holder")
        .field("node", FieldType::reference_to(&node))
        .build()
        .unwrap();
    let ok = Object::new(&holder).with("node", Object::new(&node)).unwrap();
    db.insert(&ok).unwrap();
    let bad = Object::new(&holder)
        .with("node", Object::new(&simple_class()))
        .unwrap();
    assert!(matches!(db.insert(&bad), Err(Error::UnsupportedValue { .. })));
}
