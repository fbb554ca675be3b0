use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use calmform::form::{
    ErrorDisclosure, FieldWatch, FormController, FormEvent, FormOptions, FormSignal, Subscriber,
};
use serde_json::json;

#[test]
fn username_and_friends_flow() {
    let form = FormController::new(json!({"username": "", "friends": []}), FormOptions::default())
        .expect("object root");
    let root = form.root();

    let seen = Arc::new(AtomicUsize::new(0));
    let _watch = {
        let seen = seen.clone();
        root.watch_fields(FieldWatch::field("username"), move |event| {
            assert_eq!(event.signal, FormSignal::FieldUpdate);
            seen.fetch_add(1, Ordering::SeqCst);
        })
    };

    let username = root.field("username").expect("username");
    username.set_value(json!("Leela")).expect("set username");
    root.broadcast(FormSignal::FieldUpdate, Some("username"));
    root.broadcast(FormSignal::FieldUpdate, Some("password"));

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(root.value().expect("value")["username"], json!("Leela"));

    let friends = root.list_scope("friends").expect("friends");
    assert!(friends.is_empty().expect("empty list"));
    friends
        .add_child_scope(json!({"name": "Bender"}))
        .expect("add friend");
    assert_eq!(
        root.value().expect("value")["friends"],
        json!([{"name": "Bender"}])
    );
}

#[test]
fn panicking_subscriber_does_not_block_delivery() {
    let form = FormController::new(json!({}), FormOptions::default()).expect("object root");
    let root = form.root();
    let delivered = Arc::new(AtomicUsize::new(0));

    let _boom = root.subscribe(|_event| panic!("subscriber failure"));
    let _after = {
        let delivered = delivered.clone();
        root.subscribe(move |_event| {
            delivered.fetch_add(1, Ordering::SeqCst);
        })
    };

    root.broadcast(FormSignal::ScopeUpdate, None);
    root.broadcast(FormSignal::ScopeUpdate, None);
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
}

#[test]
fn subscriptions_end_when_dropped_or_unsubscribed() {
    let form = FormController::new(json!({}), FormOptions::default()).expect("object root");
    let root = form.root();
    let baseline = form.events().subscriber_count();
    let log = Arc::new(Mutex::new(Vec::new()));

    let subscriber: Subscriber = {
        let log = log.clone();
        Arc::new(move |event: &FormEvent| log.lock().expect("log lock").push(event.clone()))
    };
    let first = root.listen(subscriber.clone());
    let duplicate = root.listen(subscriber);
    assert_eq!(form.events().subscriber_count(), baseline + 1);

    root.broadcast(FormSignal::FieldCreated, Some("name"));
    assert_eq!(log.lock().expect("log lock").len(), 1);

    first.unsubscribe();
    drop(duplicate);
    assert_eq!(form.events().subscriber_count(), baseline);
    root.broadcast(FormSignal::FieldCreated, Some("name"));
    assert_eq!(log.lock().expect("log lock").len(), 1);

    {
        let _scoped = root.subscribe(|_event| {});
        assert_eq!(form.events().subscriber_count(), baseline + 1);
    }
    assert_eq!(form.events().subscriber_count(), baseline);
}

#[test]
fn nested_list_scope_reacts_to_parent_broadcasts() {
    let form = FormController::new(
        json!({"crew": [{"name": "Fry", "pets": [{"name": "Seymour"}]}]}),
        FormOptions::default(),
    )
    .expect("object root");
    let root = form.root();
    let fry = root
        .list_scope("crew")
        .expect("crew")
        .get(0)
        .expect("lookup")
        .expect("fry");
    let pets = fry.list_scope("pets").expect("pets");

    let hits = Arc::new(Mutex::new(Vec::new()));
    let _watch = {
        let hits = hits.clone();
        fry.watch_structure(Some("pets"), move |event| {
            hits.lock().expect("hits lock").push(event.field.clone());
        })
    };

    pets.add_child_scope(json!({"name": "Nibbler"}))
        .expect("add pet");
    pets.broadcast(FormSignal::ScopeUpdate);
    root.broadcast(FormSignal::ScopeUpdate, None);
    root.broadcast(FormSignal::ScopeUpdate, Some("crew"));
    fry.field("name")
        .expect("name")
        .broadcast(FormSignal::FieldUpdate);

    assert_eq!(
        *hits.lock().expect("hits lock"),
        vec![Some("pets".to_owned()), None]
    );
    assert_eq!(
        root.value().expect("value"),
        json!({"crew": [{"name": "Fry", "pets": [{"name": "Seymour"}, {"name": "Nibbler"}]}]})
    );
    assert_eq!(
        root.resolve("crew.0.pets.1.name")
            .expect("resolve")
            .value()
            .expect("value"),
        json!("Nibbler")
    );
}

#[test]
fn touched_gates_error_visibility() {
    let form = FormController::new(json!({"email": ""}), FormOptions::default())
        .expect("object root");
    let email = form.root().field("email").expect("email");
    email
        .set_error(Some("email is required".into()))
        .expect("set error");

    let disclosure = ErrorDisclosure::new().reveal_after_submit(false);
    let hidden = email.snapshot().expect("snapshot");
    assert_eq!(disclosure.visible_error(&hidden, 0), None);
    assert_eq!(
        disclosure.always_show(true).visible_error(&hidden, 0),
        Some("email is required")
    );

    email.set_touched(true).expect("touch");
    let touched = email.snapshot().expect("snapshot");
    assert_eq!(
        disclosure.visible_error(&touched, 0),
        Some("email is required")
    );
}
