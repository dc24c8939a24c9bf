//! Reopen behaviour, external strings, allocator health and directory lock.

use crate::common::*;

#[test]
fn long_string_goes_to_allocator_short_stays_inline() {
    let t = TestDb::new();
    let db = t.db();
    let class = document_class();

    let short = Object::new(&class).with("body", "0123456789").unwrap();
    db.insert(&short).unwrap();
    assert_eq!(db.stats().unwrap().fragment_files, 0);

    let text = "z".repeat(500);
    let long = Object::new(&class).with("body", text.as_str()).unwrap();
    let uid = db.insert(&long).unwrap();
    assert_eq!(db.stats().unwrap().fragment_files, 1);
    drop(long);

    let back = db.retrieve(&uid).unwrap().unwrap();
    assert_eq!(db.get(&back, "body").unwrap(), Value::from(text));
    assert_eq!(db.get(&short, "body").unwrap(), Value::from("0123456789"));
}

#[test]
fn data_survives_reopen() {
    let mut t = TestDb::new();
    let text = "long ".repeat(60);
    let (small, big) = {
        let db = t.db();
        let class = document_class();
        let small = db
            .insert(&Object::new(&class).with("body", "tiny").unwrap())
            .unwrap();
        let big = db
            .insert(&Object::new(&class).with("body", text.as_str()).unwrap())
            .unwrap();
        (small, big)
    };

    let db = t.reopen();
    db.register_class(&document_class()).unwrap();
    let small = db.retrieve(&small).unwrap().unwrap();
    let big = db.retrieve(&big).unwrap().unwrap();
    assert_eq!(db.get(&small, "body").unwrap(), Value::from("tiny"));
    assert_eq!(db.get(&big, "body").unwrap(), Value::from(text));
    assert!(db.sanity_check().unwrap());
}

#[test]
fn many_strings_rotate_fragment_files() {
    let t = TestDb::with_config(WorldConfig {
        max_allocs: 8,
        ..WorldConfig::default()
    });
    let db = t.db();
    let class = document_class();
    let mut stored = Vec::new();
    for i in 0..40 {
        let body = format!("{:0>200}", i);
        let uid = db
            .insert(&Object::new(&class).with("body", body.as_str()).unwrap())
            .unwrap();
        stored.push((uid, body));
    }
    assert!(db.stats().unwrap().fragment_files >= 5);
    for (uid, body) in &stored {
        let obj = db.retrieve(uid).unwrap().unwrap();
        assert_eq!(db.get(&obj, "body").unwrap(), Value::from(body.as_str()));
    }
    assert!(db.sanity_check().unwrap());
}

#[test]
fn overwriting_strings_keeps_allocator_sound() {
    let t = TestDb::new();
    let db = t.db();
    let doc = Object::new(&document_class());
    db.insert(&doc).unwrap();
    for n in [300, 10, 700, 129, 128] {
        let body = "q".repeat(n);
        db.set(&doc, "body", body.as_str()).unwrap();
        assert_eq!(db.get(&doc, "body").unwrap(), Value::from(body));
    }
    db.set(&doc, "body", Value::Null).unwrap();
    assert_eq!(db.get(&doc, "body").unwrap(), Value::Null);
    assert!(db.sanity_check().unwrap());
}

#[test]
fn query_scans_every_row() {
    let mut t = TestDb::new();
    {
        let db = t.db();
        let class = simple_class();
        for i in 0..20 {
            let obj = Object::new(&class)
                .with("count", i % 4)
                .unwrap()
                .with("ratio", i as f64 / 2.0)
                .unwrap();
            db.insert(&obj).unwrap();
        }
    }
    let db = t.reopen();
    let class = simple_class();
    let threes = db
        .query_class_select(&class, &Query::all().field_eq("count", 3))
        .unwrap();
    assert_eq!(threes.len(), 5);
    let mixed = db
        .query_class_select(
            &class,
            &Query::all()
                .field_eq("count", 1)
                .filter(|db, obj| Ok(db.get(obj, "ratio")?.as_float() > Some(4.0))),
        )
        .unwrap();
    assert_eq!(mixed.len(), 3);
    assert_eq!(
        db.query_class_select(&class, &Query::all()).unwrap().len(),
        20
    );
}

#[test]
fn second_handle_is_locked_out() {
    let t = TestDb::new();
    let err = Database::open(t.dir.path()).unwrap_err();
    assert!(matches!(err, Error::Locked(_)));
}

#[test]
fn config_file_is_written_and_read_back() {
    let mut t = TestDb::with_config(WorldConfig {
        string_inline: 48,
        ..WorldConfig::default()
    });
    let path = t.dir.path().join(worlddb::CONFIG_FILE_NAME);
    assert!(path.exists());
    t.db.take().unwrap().close().unwrap();

    let db = Database::open(t.dir.path()).unwrap();
    assert_eq!(db.config().string_inline, 48);
    assert_eq!(db.string_type(), FieldType::FixedString(48));
}

#[test]
fn class_registry_survives_reopen() {
    let mut t = TestDb::new();
    t.db().register_class(&node_class()).unwrap();
    let db = t.reopen();
    assert!(db.class_names().contains(&"itest.Node".to_string()));
    assert!(db.class_names().contains(&worlddb::BLOB_CLASS.to_string()));
}
