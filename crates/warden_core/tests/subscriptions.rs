use parking_lot::Mutex;
use std::sync::Arc;
use warden_core::{
    generate_random_id, on_changed, AccessStorage, EntityId, EntityType, MemoryAccessStorage,
    OnChangedHandler, Role, SqliteAccessStorage, User,
};

type Seen = Arc<Mutex<Vec<(EntityId, Option<String>)>>>;

fn recorder() -> (OnChangedHandler, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = on_changed(move |id, entity| {
        sink.lock()
            .push((id, entity.map(|entity| entity.name().to_string())));
    });
    (handler, seen)
}

fn backends() -> Vec<Box<dyn AccessStorage>> {
    vec![
        Box::new(MemoryAccessStorage::new("memory")),
        Box::new(SqliteAccessStorage::open_in_memory("memory").unwrap()),
    ]
}

#[test]
fn type_subscription_sees_insert_update_and_remove() {
    for storage in backends() {
        let (handler, seen) = recorder();
        let _guard = storage.subscribe_for_changes(EntityType::Role, handler);
        assert!(storage.has_subscription(EntityType::Role));
        assert!(!storage.has_subscription(EntityType::User));

        let id = storage.insert(Role::new("r").into()).unwrap();
        storage.insert(User::new("u").into()).unwrap();
        storage
            .update(id, &|entity| Ok(entity.with_name("r2")))
            .unwrap();
        storage.remove(id).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (id, Some("r".to_string())),
                (id, Some("r2".to_string())),
                (id, None),
            ]
        );
    }
}

#[test]
fn unchanged_update_does_not_notify() {
    for storage in backends() {
        let id = storage.insert(Role::new("r").into()).unwrap();
        let (handler, seen) = recorder();
        let _guard = storage.subscribe_for_changes_id(id, handler);

        storage.update(id, &|entity| Ok(entity.clone())).unwrap();
        assert!(seen.lock().is_empty());
    }
}

#[test]
fn id_subscription_outlives_the_entity() {
    for storage in backends() {
        let id = generate_random_id();
        let (handler, seen) = recorder();
        let _guard = storage.subscribe_for_changes_id(id, handler);
        assert!(storage.has_subscription_id(id));

        storage
            .insert_with_id(id, Role::new("first").into(), false)
            .unwrap();
        storage.remove(id).unwrap();
        storage
            .insert_with_id(id, Role::new("second").into(), false)
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (id, Some("first".to_string())),
                (id, None),
                (id, Some("second".to_string())),
            ]
        );
    }
}

#[test]
fn released_guard_stops_delivery() {
    for storage in backends() {
        let (handler, seen) = recorder();
        let mut guard = storage.subscribe_for_changes(EntityType::Role, handler);
        storage.insert(Role::new("before").into()).unwrap();

        guard.release();
        assert!(!storage.has_subscription(EntityType::Role));
        storage.insert(Role::new("after").into()).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1.as_deref(), Some("before"));
    }
}

#[test]
fn dropping_the_guard_unsubscribes() {
    let storage = MemoryAccessStorage::new("memory");
    let (handler, seen) = recorder();
    {
        let _guard = storage.subscribe_for_changes(EntityType::Role, handler);
    }
    storage.insert(Role::new("r").into()).unwrap();
    assert!(seen.lock().is_empty());
    assert!(!storage.has_subscription(EntityType::Role));
}

#[test]
fn plural_subscription_returns_one_guard_for_all_ids() {
    for storage in backends() {
        let a = storage.insert(Role::new("a").into()).unwrap();
        let b = storage.insert(Role::new("b").into()).unwrap();
        let c = storage.insert(Role::new("c").into()).unwrap();
        let (handler, seen) = recorder();

        let mut guard = storage.subscribe_for_changes_ids(&[a, b], handler);
        assert!(!guard.is_empty());
        assert!(storage.has_subscription_id(a));
        assert!(storage.has_subscription_id(b));
        assert!(!storage.has_subscription_id(c));

        storage.remove_many(&[a, c]).unwrap();
        assert_eq!(*seen.lock(), vec![(a, None)]);

        guard.release();
        assert!(!storage.has_subscription_id(b));
        storage.remove(b).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }
}

#[test]
fn replacing_by_name_notifies_removal_of_the_previous_entity() {
    for storage in backends() {
        let old = storage.insert(Role::new("r").into()).unwrap();
        let (handler, seen) = recorder();
        let _guard = storage.subscribe_for_changes(EntityType::Role, handler);

        let new = storage.insert_or_replace(Role::new("r").into()).unwrap();
        assert_eq!(
            *seen.lock(),
            vec![(old, None), (new, Some("r".to_string()))]
        );
    }
}

#[test]
fn handlers_may_read_the_storage() {
    let storage = Arc::new(MemoryAccessStorage::new("memory"));
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    let reader = Arc::clone(&storage);
    let _guard = storage.subscribe_for_changes(
        EntityType::Role,
        on_changed(move |id, _| sink.lock().push(reader.exists(id))),
    );

    let id = storage.insert(Role::new("r").into()).unwrap();
    storage.remove(id).unwrap();
    assert_eq!(*observed.lock(), vec![true, false]);
}

#[test]
fn failed_mutation_does_not_notify() {
    for storage in backends() {
        storage.insert(Role::new("r").into()).unwrap();
        let (handler, seen) = recorder();
        let _guard = storage.subscribe_for_changes(EntityType::Role, handler);

        assert!(storage.insert(Role::new("r").into()).is_err());
        assert!(storage.remove(generate_random_id()).is_err());
        assert!(seen.lock().is_empty());
    }
}

#[test]
fn plural_subscription_with_no_ids_holds_nothing() {
    for storage in backends() {
        let (handler, seen) = recorder();
        let guard = storage.subscribe_for_changes_ids(&[], handler);
        assert!(guard.is_empty());

        storage.insert(Role::new("r").into()).unwrap();
        assert!(seen.lock().is_empty());
    }
}
