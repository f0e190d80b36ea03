use warden_core::{
    AccessEntity, AccessStorage, AccessStorageExt, ErrorKind, MemoryAccessStorage, Quota, Role,
    RowPolicy, SettingsProfile, SqliteAccessStorage, User,
};
use warden_core::{generate_random_id, EntityType};

fn backends() -> Vec<Box<dyn AccessStorage>> {
    vec![
        Box::new(MemoryAccessStorage::new("memory")),
        Box::new(SqliteAccessStorage::open_in_memory("memory").unwrap()),
    ]
}

#[test]
fn find_then_read_round_trip() {
    for storage in backends() {
        let entities: Vec<AccessEntity> = vec![
            User::new("alice").into(),
            Role::new("admin").into(),
            RowPolicy::new("filter").into(),
            Quota::new("hourly").into(),
            SettingsProfile::new("default").into(),
        ];
        for entity in entities {
            let id = storage.insert(entity.clone()).unwrap();
            let found = storage
                .find(entity.entity_type(), entity.name())
                .unwrap()
                .expect("inserted entity should be found");
            assert_eq!(found, id, "{}", storage.storage_type());
            assert_eq!(storage.read(found).unwrap(), entity);
        }
    }
}

#[test]
fn names_are_unique_per_type_only() {
    for storage in backends() {
        storage.insert(User::new("same").into()).unwrap();
        storage.insert(Role::new("same").into()).unwrap();

        let err = storage.insert(Role::new("same").into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(
            err.to_string(),
            "role `same`: cannot insert because role `same` already exists in memory"
        );
        assert_eq!(storage.find_all(EntityType::Role).unwrap().len(), 1);
    }
}

#[test]
fn lookups_report_missing_entities() {
    for storage in backends() {
        let a = storage.insert(Role::new("a").into()).unwrap();
        let b = storage.insert(Role::new("b").into()).unwrap();
        let missing = generate_random_id();

        assert_eq!(
            storage.find_many(EntityType::Role, &["a", "nope", "b"]).unwrap(),
            vec![a, b]
        );
        let err = storage
            .get_ids(EntityType::Role, &["a", "nope", "b"])
            .unwrap_err();
        assert_eq!(err.to_string(), "There is no role `nope` in memory");

        assert!(!storage.exists(missing));
        assert!(storage.try_read(missing).is_none());
        assert_eq!(
            storage.read(missing).unwrap_err().to_string(),
            format!("ID({missing}) not found in memory")
        );
        assert_eq!(storage.try_read_names(&[a, missing, b]), vec!["a", "b"]);
        assert_eq!(storage.read_names(&[a, missing]).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(storage.format_type_with_name_or_id(a), "role `a`");
        assert_eq!(
            storage.format_type_with_name_or_id(missing),
            format!("ID({missing})")
        );
    }
}

#[test]
fn typed_reads_reject_other_types() {
    for storage in backends() {
        let id = storage.insert(Role::new("reader").into()).unwrap();

        assert_eq!(storage.read_as::<Role>(id).unwrap().name, "reader");
        let err = storage.read_as::<User>(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadCast);
        assert_eq!(
            err.to_string(),
            format!("ID({id}): role `reader` expected to be of type USER")
        );
        assert!(storage.try_read_as::<User>(id).is_none());

        assert_eq!(storage.find_as::<Role>("reader").unwrap(), Some(id));
        assert_eq!(storage.find_as::<User>("reader").unwrap(), None);
        assert_eq!(storage.get_id_as::<Role>("reader").unwrap(), id);
        assert_eq!(storage.find_all_as::<Role>().unwrap(), vec![id]);
    }
}

#[test]
fn update_renames_and_rejects_collisions() {
    for storage in backends() {
        let a = storage.insert(Role::new("a").into()).unwrap();
        storage.insert(Role::new("b").into()).unwrap();

        storage
            .update(a, &|entity| Ok(entity.with_name("c")))
            .unwrap();
        assert_eq!(storage.read_name(a).unwrap(), "c");
        assert_eq!(storage.find(EntityType::Role, "a").unwrap(), None);
        assert_eq!(storage.find(EntityType::Role, "c").unwrap(), Some(a));

        let err = storage
            .update(a, &|entity| Ok(entity.with_name("b")))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "role `c`: cannot rename to `b` because role `b` already exists in memory"
        );
        assert_eq!(storage.read_name(a).unwrap(), "c");
    }
}

#[test]
fn update_cannot_change_the_entity_type() {
    for storage in backends() {
        let id = storage.insert(Role::new("r").into()).unwrap();
        let err = storage
            .update(id, &|entity| Ok(User::new(entity.name()).into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logical);
        assert_eq!(storage.read(id).unwrap().entity_type(), EntityType::Role);
    }
}

#[test]
fn update_function_errors_propagate() {
    for storage in backends() {
        let id = storage.insert(Quota::new("q").into()).unwrap();
        let err = storage
            .update(id, &|_| Err(warden_core::AccessError::Logical("refused".to_string())))
            .unwrap_err();
        assert_eq!(err.to_string(), "refused");
    }
}

#[test]
fn remove_then_lookups_miss() {
    for storage in backends() {
        let id = storage.insert(User::new("gone").into()).unwrap();
        storage.remove(id).unwrap();

        assert!(!storage.exists(id));
        assert_eq!(storage.find(EntityType::User, "gone").unwrap(), None);
        assert_eq!(storage.remove(id).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(!storage.try_remove(id));
    }
}

#[test]
fn insert_or_replace_keeps_one_entity_per_name() {
    for storage in backends() {
        let first = storage.insert(Role::new("r").into()).unwrap();
        let second = storage.insert_or_replace(Role::new("r").into()).unwrap();

        assert_ne!(first, second);
        assert!(!storage.exists(first));
        assert_eq!(storage.find_all(EntityType::Role).unwrap(), vec![second]);
    }
}

#[test]
fn insert_with_existing_id_is_an_id_collision() {
    for storage in backends() {
        let id = generate_random_id();
        storage
            .insert_with_id(id, Role::new("a").into(), false)
            .unwrap();
        let err = storage
            .insert_with_id(id, Role::new("b").into(), false)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("role `b`: cannot insert because the ID({id}) is already used by role `a` in memory")
        );

        storage
            .insert_with_id(id, Role::new("b").into(), true)
            .unwrap();
        assert_eq!(storage.read_name(id).unwrap(), "b");
        assert_eq!(storage.find(EntityType::Role, "a").unwrap(), None);
    }
}

#[test]
fn readonly_storage_rejects_every_mutation() {
    let storage = MemoryAccessStorage::new("users.xml");
    let id = storage.insert(Role::new("r").into()).unwrap();
    storage.set_readonly(true);

    let insert = storage.insert(Role::new("new").into()).unwrap_err();
    assert_eq!(
        insert.to_string(),
        "Cannot insert role `new` to users.xml because this storage is readonly"
    );
    let update = storage
        .update(id, &|entity| Ok(entity.with_name("x")))
        .unwrap_err();
    assert_eq!(
        update.to_string(),
        "Cannot update role `r` in users.xml because this storage is readonly"
    );
    let remove = storage.remove(id).unwrap_err();
    assert_eq!(
        remove.to_string(),
        "Cannot remove role `r` from users.xml because this storage is readonly"
    );

    assert_eq!(storage.remove(generate_random_id()).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(storage.read_name(id).unwrap(), "r");
    assert_eq!(storage.find_all(EntityType::Role).unwrap(), vec![id]);
}

#[test]
fn logged_user_id_is_looked_up_by_name() {
    for storage in backends() {
        let id = storage.insert(User::new("alice").into()).unwrap();
        assert_eq!(storage.get_id_of_logged_user("alice").unwrap(), id);
        assert_eq!(
            storage.get_id_of_logged_user("bob").unwrap_err().to_string(),
            "There is no user `bob` in memory"
        );
    }
}

#[test]
fn concurrent_inserts_of_one_name_keep_a_single_entity() {
    const THREADS: usize = 8;
    for storage in backends() {
        let storage = &*storage;
        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| scope.spawn(move || storage.insert(Role::new("same").into())))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .map(|result| match result {
                    Ok(_) => true,
                    Err(err) => {
                        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
                        false
                    }
                })
                .collect()
        });

        let inserted = results.iter().filter(|ok| **ok).count();
        assert_eq!(inserted, 1, "{}", storage.storage_type());
        assert_eq!(storage.find_all(EntityType::Role).unwrap().len(), 1);
    }
}
