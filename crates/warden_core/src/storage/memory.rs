//! In-memory access storage.
//!
//! # Responsibility
//! - Keep `id -> entity` and the per-type name index in one locked state.
//! - Queue change notifications under the lock and dispatch them after it
//!   is released.
//!
//! # Invariants
//! - The name index always mirrors `entries_by_id`.
//! - `set_all` is the only way to populate a readonly instance.

use crate::error::{AccessError, AccessResult, MutationKind};
use crate::model::entity::{AccessEntity, EntityId, EntityType};
use crate::storage::notification::{notify, Notifications, OnChangedHandler, SubscriptionHub};
use crate::storage::scope_guard::ScopeGuard;
use crate::storage::{AccessStorage, UpdateFunc};
use log::info;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

pub const STORAGE_TYPE: &str = "memory";

#[derive(Default)]
struct MemoryState {
    entries_by_id: HashMap<EntityId, AccessEntity>,
    names: HashMap<EntityType, BTreeMap<String, EntityId>>,
}

impl MemoryState {
    fn id_by_name(&self, entity_type: EntityType, name: &str) -> Option<EntityId> {
        self.names.get(&entity_type)?.get(name).copied()
    }

    fn put(&mut self, id: EntityId, entity: AccessEntity) {
        if let Some(previous) = self.entries_by_id.insert(id, entity.clone()) {
            self.unindex(id, &previous);
        }
        self.names
            .entry(entity.entity_type())
            .or_default()
            .insert(entity.name().to_string(), id);
    }

    fn take(&mut self, id: EntityId) -> Option<AccessEntity> {
        let entity = self.entries_by_id.remove(&id)?;
        self.unindex(id, &entity);
        Some(entity)
    }

    fn unindex(&mut self, id: EntityId, entity: &AccessEntity) {
        if let Some(names) = self.names.get_mut(&entity.entity_type()) {
            if names.get(entity.name()) == Some(&id) {
                names.remove(entity.name());
            }
        }
    }
}

/// Access storage that keeps every entity in process memory.
pub struct MemoryAccessStorage {
    storage_name: String,
    readonly: AtomicBool,
    state: RwLock<MemoryState>,
    hub: SubscriptionHub,
}

impl MemoryAccessStorage {
    pub fn new(storage_name: impl Into<String>) -> Self {
        Self {
            storage_name: storage_name.into(),
            readonly: AtomicBool::new(false),
            state: RwLock::new(MemoryState::default()),
            hub: SubscriptionHub::new(),
        }
    }

    pub fn set_readonly(&self, readonly: bool) {
        self.readonly.store(readonly, Ordering::SeqCst);
    }

    /// Replaces the whole content with `entities`.
    ///
    /// Works on readonly instances. Subscribers see one removal per dropped
    /// entity and one change per added or modified entity; untouched entities
    /// are not reported.
    ///
    /// # Errors
    /// - `Logical` when `entities` repeats an id or a `(type, name)` pair.
    pub fn set_all(&self, entities: Vec<(EntityId, AccessEntity)>) -> AccessResult<()> {
        let mut seen_ids = HashSet::with_capacity(entities.len());
        let mut seen_names = HashSet::with_capacity(entities.len());
        for (id, entity) in &entities {
            if !seen_ids.insert(*id) {
                return Err(AccessError::Logical(format!(
                    "{}: duplicate ID({id}) in the new content of {}",
                    entity.format_type_with_name(),
                    self.storage_name
                )));
            }
            if !seen_names.insert((entity.entity_type(), entity.name().to_string())) {
                return Err(AccessError::Logical(format!(
                    "{}: duplicate name in the new content of {}",
                    entity.format_type_with_name(),
                    self.storage_name
                )));
            }
        }

        let mut notifications = Notifications::new();
        let count = entities.len();
        {
            let mut state = self.state.write();
            let mut next = MemoryState::default();
            for (id, entity) in entities {
                next.put(id, entity);
            }

            for (id, old) in &state.entries_by_id {
                match next.entries_by_id.get(id) {
                    Some(new) if new.entity_type() == old.entity_type() => {}
                    _ => self
                        .hub
                        .prepare(*id, old.entity_type(), None, &mut notifications),
                }
            }
            for (id, new) in &next.entries_by_id {
                if state.entries_by_id.get(id) != Some(new) {
                    self.hub
                        .prepare(*id, new.entity_type(), Some(new), &mut notifications);
                }
            }
            *state = next;
        }
        info!(
            target: self.log_target(),
            "event=set_all module=storage status=ok entities={count} notifications={}",
            notifications.len()
        );
        notify(notifications);
        Ok(())
    }

    fn insert_locked(
        &self,
        state: &mut MemoryState,
        id: EntityId,
        entity: AccessEntity,
        replace_if_exists: bool,
        notifications: &mut Notifications,
    ) -> AccessResult<()> {
        let entity_type = entity.entity_type();
        if self.is_readonly() {
            return Err(AccessError::readonly(
                MutationKind::Insert,
                entity_type,
                entity.name(),
                &self.storage_name,
            ));
        }

        let name_owner = state
            .id_by_name(entity_type, entity.name())
            .filter(|owner| *owner != id);
        if name_owner.is_some() && !replace_if_exists {
            return Err(AccessError::name_collision(
                entity_type,
                entity.name(),
                &self.storage_name,
            ));
        }

        if let Some(existing) = state.entries_by_id.get(&id) {
            if !replace_if_exists || existing.entity_type() != entity_type {
                return Err(AccessError::IdCollision {
                    id,
                    entity_type,
                    name: entity.name().to_string(),
                    existing_type: existing.entity_type(),
                    existing_name: existing.name().to_string(),
                    storage: self.storage_name.clone(),
                });
            }
            if *existing == entity {
                return Ok(());
            }
        }

        if let Some(owner) = name_owner {
            state.take(owner);
            self.hub.prepare(owner, entity_type, None, notifications);
        }
        self.hub.prepare(id, entity_type, Some(&entity), notifications);
        state.put(id, entity);
        Ok(())
    }

    fn remove_locked(
        &self,
        state: &mut MemoryState,
        id: EntityId,
        notifications: &mut Notifications,
    ) -> AccessResult<()> {
        let Some(entity) = state.entries_by_id.get(&id) else {
            return Err(AccessError::not_found_id(id, &self.storage_name));
        };
        let entity_type = entity.entity_type();
        if self.is_readonly() {
            return Err(AccessError::readonly(
                MutationKind::Remove,
                entity_type,
                entity.name(),
                &self.storage_name,
            ));
        }

        state.take(id);
        self.hub.prepare(id, entity_type, None, notifications);
        Ok(())
    }

    fn update_locked(
        &self,
        state: &mut MemoryState,
        id: EntityId,
        update_func: &UpdateFunc<'_>,
        notifications: &mut Notifications,
    ) -> AccessResult<()> {
        let Some(old) = state.entries_by_id.get(&id).cloned() else {
            return Err(AccessError::not_found_id(id, &self.storage_name));
        };
        if self.is_readonly() {
            return Err(AccessError::readonly(
                MutationKind::Update,
                old.entity_type(),
                old.name(),
                &self.storage_name,
            ));
        }

        let new = update_func(&old)?;
        check_update(&old, &new)?;
        if new == old {
            return Ok(());
        }
        if new.name() != old.name()
            && state
                .id_by_name(new.entity_type(), new.name())
                .is_some_and(|owner| owner != id)
        {
            return Err(AccessError::rename_collision(
                old.entity_type(),
                old.name(),
                new.name(),
                &self.storage_name,
            ));
        }

        self.hub
            .prepare(id, new.entity_type(), Some(&new), notifications);
        state.put(id, new);
        Ok(())
    }
}

/// Rejects transformations that change the entity type.
pub(crate) fn check_update(old: &AccessEntity, new: &AccessEntity) -> AccessResult<()> {
    if new.entity_type() == old.entity_type() {
        return Ok(());
    }
    Err(AccessError::Logical(format!(
        "{}: update must not change the entity type to {}",
        old.format_type_with_name(),
        new.entity_type()
    )))
}

impl AccessStorage for MemoryAccessStorage {
    fn storage_name(&self) -> &str {
        &self.storage_name
    }

    fn storage_type(&self) -> &'static str {
        STORAGE_TYPE
    }

    fn is_readonly(&self) -> bool {
        self.readonly.load(Ordering::SeqCst)
    }

    fn find_all_impl(&self, entity_type: EntityType) -> AccessResult<Vec<EntityId>> {
        let state = self.state.read();
        Ok(state
            .names
            .get(&entity_type)
            .map(|names| names.values().copied().collect())
            .unwrap_or_default())
    }

    fn find_impl(&self, entity_type: EntityType, name: &str) -> AccessResult<Option<EntityId>> {
        Ok(self.state.read().id_by_name(entity_type, name))
    }

    fn exists_impl(&self, id: EntityId) -> AccessResult<bool> {
        Ok(self.state.read().entries_by_id.contains_key(&id))
    }

    fn read_impl(&self, id: EntityId) -> AccessResult<Option<AccessEntity>> {
        Ok(self.state.read().entries_by_id.get(&id).cloned())
    }

    fn insert_impl(
        &self,
        id: EntityId,
        entity: AccessEntity,
        replace_if_exists: bool,
    ) -> AccessResult<()> {
        let mut notifications = Notifications::new();
        {
            let mut state = self.state.write();
            self.insert_locked(&mut state, id, entity, replace_if_exists, &mut notifications)?;
        }
        notify(notifications);
        Ok(())
    }

    fn remove_impl(&self, id: EntityId) -> AccessResult<()> {
        let mut notifications = Notifications::new();
        {
            let mut state = self.state.write();
            self.remove_locked(&mut state, id, &mut notifications)?;
        }
        notify(notifications);
        Ok(())
    }

    fn update_impl(&self, id: EntityId, update_func: &UpdateFunc<'_>) -> AccessResult<()> {
        let mut notifications = Notifications::new();
        {
            let mut state = self.state.write();
            self.update_locked(&mut state, id, update_func, &mut notifications)?;
        }
        notify(notifications);
        Ok(())
    }

    fn subscribe_for_changes_impl(
        &self,
        entity_type: EntityType,
        handler: OnChangedHandler,
    ) -> ScopeGuard {
        self.hub.subscribe_type(entity_type, handler)
    }

    fn subscribe_for_changes_id_impl(&self, id: EntityId, handler: OnChangedHandler) -> ScopeGuard {
        self.hub.subscribe_id(id, handler)
    }

    fn has_subscription_impl(&self, entity_type: EntityType) -> bool {
        self.hub.has_type(entity_type)
    }

    fn has_subscription_id_impl(&self, id: EntityId) -> bool {
        self.hub.has_id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::entity::generate_random_id;
    use crate::model::role::Role;
    use crate::model::user::User;
    use crate::storage::notification::on_changed;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn insert_then_find_and_read() {
        let storage = MemoryAccessStorage::new("memory");
        let id = storage.insert(Role::new("reader").into()).unwrap();

        assert_eq!(storage.find(EntityType::Role, "reader").unwrap(), Some(id));
        assert_eq!(storage.find(EntityType::User, "reader").unwrap(), None);
        assert_eq!(storage.read(id).unwrap().name(), "reader");
    }

    #[test]
    fn replace_by_name_removes_the_previous_owner() {
        let storage = MemoryAccessStorage::new("memory");
        let first = storage.insert(Role::new("r").into()).unwrap();
        let second = storage.insert_or_replace(Role::new("r").into()).unwrap();

        assert_ne!(first, second);
        assert!(!storage.exists(first));
        assert_eq!(storage.find(EntityType::Role, "r").unwrap(), Some(second));
    }

    #[test]
    fn replace_across_types_is_an_id_collision() {
        let storage = MemoryAccessStorage::new("memory");
        let id = generate_random_id();
        storage
            .insert_with_id(id, User::new("u").into(), false)
            .unwrap();
        let err = storage
            .insert_with_id(id, Role::new("r").into(), true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(
            err.to_string(),
            format!("role `r`: cannot insert because the ID({id}) is already used by user `u` in memory")
        );
    }

    #[test]
    fn set_all_reports_only_differences() {
        let storage = MemoryAccessStorage::new("users.xml");
        storage.set_readonly(true);
        let kept = generate_random_id();
        let dropped = generate_random_id();
        storage
            .set_all(vec![
                (kept, Role::new("kept").into()),
                (dropped, Role::new("dropped").into()),
            ])
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _guard = storage.subscribe_for_changes(
            EntityType::Role,
            on_changed(move |id, entity| sink.lock().push((id, entity.is_some()))),
        );

        let added = generate_random_id();
        storage
            .set_all(vec![
                (kept, Role::new("kept").into()),
                (added, Role::new("added").into()),
            ])
            .unwrap();

        let mut seen = seen.lock().clone();
        seen.sort();
        let mut expected = vec![(dropped, false), (added, true)];
        expected.sort();
        assert_eq!(seen, expected);
        assert!(storage.is_readonly());
        assert_eq!(storage.find(EntityType::Role, "dropped").unwrap(), None);
    }

    #[test]
    fn set_all_rejects_duplicate_names() {
        let storage = MemoryAccessStorage::new("memory");
        let err = storage
            .set_all(vec![
                (generate_random_id(), Role::new("r").into()),
                (generate_random_id(), Role::new("r").into()),
            ])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logical);
    }
}
