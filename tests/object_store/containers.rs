//! Lists and dictionaries held in object fields.

use crate::common::*;

fn strings(items: &[&str]) -> Vec<Value> {
    items.iter().map(|s| Value::from(*s)).collect()
}

#[test]
fn list_and_dict_fields_are_created_from_plain_values() {
    let t = TestDb::new();
    let db = t.db();
    let inv = Object::new(&inventory_class())
        .with("tags", Value::Seq(strings(&["red", "blue"])))
        .unwrap()
        .with(
            "counts",
            Value::Map(vec![
                (Value::from("apples"), Value::Int(3)),
                (Value::from("pears"), Value::Int(0)),
            ]),
        )
        .unwrap();
    db.insert(&inv).unwrap();

    let tags = db.get(&inv, "tags").unwrap();
    let tags = db.list(tags.as_list().unwrap()).unwrap();
    assert_eq!(tags.to_vec().unwrap(), strings(&["red", "blue"]));

    let counts = db.get(&inv, "counts").unwrap();
    let counts = db.dict(counts.as_dict().unwrap()).unwrap();
    assert_eq!(counts.len().unwrap(), 2);
    assert_eq!(counts.get("apples").unwrap(), Some(Value::Int(3)));
    assert_eq!(counts.get("plums").unwrap(), None);

    assert_eq!(db.get(&inv, "items").unwrap(), Value::Null);
}

#[test]
fn list_grows_and_keeps_order() {
    let t = TestDb::new();
    let db = t.db();
    let list = db.new_list(FieldType::Int, &[]).unwrap();
    let list = db.list(&list).unwrap();
    for i in 0..100 {
        list.push(i).unwrap();
        let alloc = list.allocation().unwrap();
        assert!(alloc.length >= alloc.content);
    }
    assert_eq!(list.len().unwrap(), 100);
    assert_eq!(list.get(57).unwrap(), Value::Int(57));
    assert!(matches!(list.get(100), Err(Error::Bounds { .. })));

    list.insert(0, -1).unwrap();
    assert_eq!(list.remove(50).unwrap(), Value::Int(49));
    assert_eq!(list.pop().unwrap(), Some(Value::Int(99)));
    assert_eq!(list.len().unwrap(), 99);
    assert_eq!(list.index_of(&Value::Int(-1)).unwrap(), Some(0));
    assert!(db.sanity_check().unwrap());
}

#[test]
fn list_of_references_keeps_identity() {
    let t = TestDb::new();
    let db = t.db();
    let nodes: Vec<Object> = (0..5)
        .map(|i| Object::new(&node_class()).with("name", format!("n{i}")).unwrap())
        .collect();
    let inv = Object::new(&inventory_class())
        .with("items", Value::Seq(nodes.iter().map(Value::from).collect()))
        .unwrap();
    db.insert(&inv).unwrap();
    assert!(nodes.iter().all(Object::is_stored));

    let items = db.get(&inv, "items").unwrap();
    let items = db.list(items.as_list().unwrap()).unwrap();
    for (i, node) in nodes.iter().enumerate() {
        assert!(items.get(i).unwrap().as_object().unwrap().ptr_eq(node));
    }
}

#[test]
fn dict_grows_past_initial_capacity() {
    let t = TestDb::with_config(WorldConfig {
        dict_initial_capacity: 4,
        ..WorldConfig::default()
    });
    let db = t.db();
    let dict = db.new_dict(FieldType::string(), FieldType::Int, &[]).unwrap();
    let dict = db.dict(&dict).unwrap();
    for i in 0..200 {
        assert_eq!(dict.insert(format!("k{i}"), i).unwrap(), None);
    }
    assert!(dict.capacity().unwrap() >= 200);
    assert_eq!(dict.len().unwrap(), 200);
    for i in (0..200).step_by(2) {
        assert_eq!(dict.remove(format!("k{i}")).unwrap(), Some(Value::Int(i)));
    }
    assert_eq!(dict.len().unwrap(), 100);
    assert_eq!(dict.get("k7").unwrap(), Some(Value::Int(7)));
    assert_eq!(dict.get("k8").unwrap(), None);
    assert_eq!(dict.insert("k7", 70).unwrap(), Some(Value::Int(7)));
    assert_eq!(dict.get("k7").unwrap(), Some(Value::Int(70)));
    assert!(db.sanity_check().unwrap());
}

#[test]
fn containers_survive_reopen() {
    let mut t = TestDb::new();
    let uid = {
        let db = t.db();
        let inv = Object::new(&inventory_class())
            .with("tags", Value::Seq(strings(&["a"])))
            .unwrap()
            .with("counts", Value::Map(Vec::new()))
            .unwrap();
        let uid = db.insert(&inv).unwrap();
        let tags = db.get(&inv, "tags").unwrap();
        let tags = db.list(tags.as_list().unwrap()).unwrap();
        for tag in ["b", "c", "d"] {
            tags.push(tag).unwrap();
        }
        let counts = db.get(&inv, "counts").unwrap();
        let counts = db.dict(counts.as_dict().unwrap()).unwrap();
        for (i, tag) in ["a", "b", "c", "d"].iter().enumerate() {
            counts.insert(*tag, i as i64).unwrap();
        }
        uid
    };

    let db = t.reopen();
    db.register_class(&inventory_class()).unwrap();
    let inv = db.retrieve(&uid).unwrap().unwrap();
    let tags = db.get(&inv, "tags").unwrap();
    let tags = db.list(tags.as_list().unwrap()).unwrap();
    assert_eq!(tags.to_vec().unwrap(), strings(&["a", "b", "c", "d"]));
    let counts = db.get(&inv, "counts").unwrap();
    let counts = db.dict(counts.as_dict().unwrap()).unwrap();
    let mut keys = counts.keys().unwrap();
    keys.sort_by(|a, b| a.as_bytes().cmp(&b.as_bytes()));
    assert_eq!(keys, strings(&["a", "b", "c", "d"]));
    assert_eq!(counts.get("d").unwrap(), Some(Value::Int(3)));
    assert!(db.sanity_check().unwrap());
}

#[test]
fn container_element_type_is_checked() {
    let t = TestDb::new();
    let db = t.db();
    let ints = db.new_list(FieldType::Int, &[Value::Int(1)]).unwrap();
    let inv = Object::new(&inventory_class());
    db.insert(&inv).unwrap();
    assert!(matches!(
        db.set(&inv, "tags", ints),
        Err(Error::UnsupportedValue { .. })
    ));
    let list = db.list(&db.new_list(FieldType::Int, &[]).unwrap()).unwrap();
    assert!(list.push("nope").is_err());
    assert!(list.is_empty().unwrap());
}
