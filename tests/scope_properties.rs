//! Property tests for the scope hierarchy: ancestry, aggregate state and list
//! removal against a plain `Vec` model.

use calmform::form::{FormController, FormOptions, PATH_SEPARATOR, ScopeHandle};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

fn form(initial: Value) -> FormController {
    FormController::new(initial, FormOptions::default()).expect("object root")
}

fn nested_chain(form: &FormController, names: &[String]) -> Vec<ScopeHandle> {
    let mut chain = vec![form.root()];
    for name in names {
        let next = chain
            .last()
            .expect("chain starts at root")
            .scope(name)
            .expect("nested scope");
        chain.push(next);
    }
    chain
}

proptest! {
    #[test]
    fn ancestors_prefix_descendant_paths(names in prop::collection::vec("[a-z]{1,6}", 1..6)) {
        let form = form(json!({}));
        let chain = nested_chain(&form, &names);

        for (i, ancestor) in chain.iter().enumerate() {
            let ancestor_path = ancestor.path().expect("path");
            for descendant in &chain[i + 1..] {
                let path = descendant.path().expect("path");
                let prefix = format!("{ancestor_path}{PATH_SEPARATOR}");
                prop_assert!(path.starts_with(&prefix));
                prop_assert!(ancestor.is_ancestor_of(descendant.id()).expect("ancestry"));
                prop_assert!(descendant.is_descendant_of(ancestor.id()).expect("ancestry"));
                prop_assert!(!descendant.is_ancestor_of(ancestor.id()).expect("ancestry"));
            }
            prop_assert!(!ancestor.is_ancestor_of(ancestor.id()).expect("ancestry"));
        }
    }

    #[test]
    fn aggregates_follow_their_fields(flags in prop::collection::vec((any::<bool>(), any::<bool>()), 0..10)) {
        let mut root_seed = Map::new();
        let mut item_seed = Map::new();
        for i in 0..flags.len() {
            let seed = if i % 2 == 0 { &mut root_seed } else { &mut item_seed };
            seed.insert(format!("f{i}"), json!(0));
        }
        root_seed.insert("items".to_owned(), json!([Value::Object(item_seed)]));

        let form = form(Value::Object(root_seed));
        let root = form.root();
        let items = root.list_scope("items").expect("items");
        let item = items.get(0).expect("lookup").expect("item");

        for (i, (has_error, is_changed)) in flags.iter().enumerate() {
            let scope = if i % 2 == 0 { &root } else { &item };
            let field = scope.field(&format!("f{i}")).expect("field");
            if *has_error {
                field.set_error(Some(format!("f{i} is invalid"))).expect("set error");
            }
            if *is_changed {
                field.set_value(json!(1)).expect("set value");
            }
        }

        let expect_valid = flags.iter().all(|(has_error, _)| !has_error);
        let expect_changed = flags.iter().any(|(_, is_changed)| *is_changed);
        prop_assert_eq!(root.valid().expect("valid"), expect_valid);
        prop_assert_eq!(root.changed().expect("changed"), expect_changed);

        let item_flags = flags.iter().skip(1).step_by(2);
        prop_assert_eq!(
            items.valid().expect("list valid"),
            item_flags.clone().all(|(has_error, _)| !has_error)
        );
        prop_assert_eq!(
            items.changed().expect("list changed"),
            item_flags.clone().any(|(_, is_changed)| *is_changed)
        );
    }

    #[test]
    fn list_removal_matches_vec_model(
        len in 0usize..8,
        removals in prop::collection::vec(0usize..10, 0..12),
    ) {
        let seed: Vec<Value> = (0..len).map(|n| json!({"n": n})).collect();
        let form = form(json!({"items": seed}));
        let items = form.root().list_scope("items").expect("items");
        let mut model: Vec<usize> = (0..len).collect();

        for index in removals {
            let removed = items.remove_child_scope(index).expect("remove");
            prop_assert_eq!(removed, index < model.len());
            if removed {
                model.remove(index);
            }
        }

        let expected: Vec<Value> = model.iter().map(|n| json!({"n": n})).collect();
        prop_assert_eq!(items.value().expect("value"), Value::Array(expected));
        prop_assert_eq!(items.len().expect("len"), model.len());
    }
}
