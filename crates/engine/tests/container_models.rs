//! Persistent containers checked against in-memory models.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tempfile::TempDir;
use worlddb_engine::{Database, FieldType, Value, WorldConfig};

fn small_db(dir: &TempDir) -> Database {
    Database::open_with_config(
        dir.path(),
        WorldConfig {
            max_allocs: 6,
            list_initial_capacity: 2,
            dict_initial_capacity: 2,
            ..WorldConfig::default()
        },
    )
    .unwrap()
}

#[derive(Debug, Clone)]
enum DictOp {
    Insert(u8, i32),
    Remove(u8),
}

fn dict_op() -> impl Strategy<Value = DictOp> {
    prop_oneof![
        3 => (0u8..40, any::<i32>()).prop_map(|(k, v)| DictOp::Insert(k, v)),
        1 => (0u8..40).prop_map(DictOp::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn dict_matches_hashmap(ops in prop::collection::vec(dict_op(), 1..120)) {
        let dir = TempDir::new().unwrap();
        let db = small_db(&dir);
        let dict = db.new_dict(FieldType::Long, FieldType::Int, &[]).unwrap();
        let dict = db.dict(&dict).unwrap();
        let mut model: HashMap<u8, i32> = HashMap::new();

        for op in ops {
            match op {
                DictOp::Insert(k, v) => {
                    let prev = dict.insert(k as i64, v).unwrap();
                    prop_assert_eq!(prev, model.insert(k, v).map(Value::from));
                }
                DictOp::Remove(k) => {
                    let prev = dict.remove(k as i64).unwrap();
                    prop_assert_eq!(prev, model.remove(&k).map(Value::from));
                }
            }
        }

        prop_assert_eq!(dict.len().unwrap(), model.len());
        for k in 0u8..40 {
            let got = dict.get(k as i64).unwrap();
            prop_assert_eq!(got, model.get(&k).copied().map(Value::from));
        }
        prop_assert!(db.sanity_check().unwrap());
    }
}

#[test]
fn list_matches_vec_under_random_edits() {
    let dir = TempDir::new().unwrap();
    let db = small_db(&dir);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let list = db.new_list(FieldType::Long, &[]).unwrap();
    let list = db.list(&list).unwrap();
    let mut model: Vec<i64> = Vec::new();

    for _ in 0..400 {
        let value: i64 = rng.gen_range(-1000..1000);
        match rng.gen_range(0..6) {
            0 | 1 => {
                list.push(value).unwrap();
                model.push(value);
            }
            2 => {
                let at = rng.gen_range(0..=model.len());
                list.insert(at, value).unwrap();
                model.insert(at, value);
            }
            3 if !model.is_empty() => {
                let at = rng.gen_range(0..model.len());
                assert_eq!(list.remove(at).unwrap(), Value::Int(model.remove(at)));
            }
            4 if !model.is_empty() => {
                let at = rng.gen_range(0..model.len());
                list.set(at, value).unwrap();
                model[at] = value;
            }
            _ => {
                assert_eq!(list.pop().unwrap(), model.pop().map(Value::Int));
            }
        }
    }

    let expected: Vec<Value> = model.into_iter().map(Value::Int).collect();
    assert_eq!(list.to_vec().unwrap(), expected);
    assert!(db.sanity_check().unwrap());
}

#[test]
fn many_containers_share_fragment_files() {
    let dir = TempDir::new().unwrap();
    let db = small_db(&dir);
    let mut rng = StdRng::seed_from_u64(7);
    let lists: Vec<_> = (0..12)
        .map(|_| db.new_list(FieldType::Int, &[]).unwrap())
        .collect();
    let mut models = vec![Vec::new(); lists.len()];

    for _ in 0..300 {
        let which = rng.gen_range(0..lists.len());
        let value: i32 = rng.gen();
        db.list(&lists[which]).unwrap().push(value).unwrap();
        models[which].push(Value::from(value));
    }

    for (list, model) in lists.iter().zip(&models) {
        assert_eq!(&db.list(list).unwrap().to_vec().unwrap(), model);
    }
    assert!(db.stats().unwrap().fragment_files > 1);
    assert!(db.sanity_check().unwrap());
}
