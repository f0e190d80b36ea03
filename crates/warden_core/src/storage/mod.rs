//! Access storage contract shared by every backend.
//!
//! # Responsibility
//! - Define the single-item primitives a backend implements (`*_impl`).
//! - Derive lookups, batch mutations, try-variants, subscriptions and login
//!   once, on top of those primitives.
//!
//! # Invariants
//! - Each primitive is atomic on its own; batches run items in input order
//!   without isolation.
//! - Batch mutations never stop at the first failure; they report one
//!   aggregated error and keep what was committed.
//! - Try-variants never return an error.
//! - A readonly storage fails every mutation before changing anything.

use crate::auth::authentication;
use crate::auth::credentials::Credentials;
use crate::auth::external::ExternalAuthenticators;
use crate::error::{AccessError, AccessResult, MutationKind};
use crate::logging::storage_log_target;
use crate::model::entity::{
    format_id, generate_random_id, AccessEntity, EntityId, EntityType, EntityVariant,
};
use crate::model::user::User;
use errors_tracker::{BatchError, ErrorsTracker};
use log::{debug, info, warn};
use notification::OnChangedHandler;
use scope_guard::ScopeGuard;
use std::net::IpAddr;
use std::sync::Arc;

pub mod errors_tracker;
pub mod memory;
pub mod notification;
pub mod scope_guard;
pub mod sqlite;

/// Pure `entity -> entity` transformation applied by `update`.
///
/// Backends run it while holding their write lock, so it must not call back
/// into the storage.
pub type UpdateFunc<'a> = dyn Fn(&AccessEntity) -> AccessResult<AccessEntity> + 'a;

/// Operation set of an access entity storage.
///
/// Backends implement the `*_impl` primitives plus the naming accessors;
/// every other method is provided.
pub trait AccessStorage: Send + Sync {
    /// Display name used in diagnostics and as the log target suffix.
    fn storage_name(&self) -> &str;

    /// Short backend kind, e.g. `memory`.
    fn storage_type(&self) -> &'static str;

    fn is_readonly(&self) -> bool;

    fn find_all_impl(&self, entity_type: EntityType) -> AccessResult<Vec<EntityId>>;

    fn find_impl(&self, entity_type: EntityType, name: &str) -> AccessResult<Option<EntityId>>;

    fn exists_impl(&self, id: EntityId) -> AccessResult<bool>;

    fn read_impl(&self, id: EntityId) -> AccessResult<Option<AccessEntity>>;

    fn read_name_impl(&self, id: EntityId) -> AccessResult<Option<String>> {
        Ok(self
            .read_impl(id)?
            .map(|entity| entity.name().to_string()))
    }

    /// Stores `entity` under `id`.
    ///
    /// # Errors
    /// - `Readonly` before anything else.
    /// - `IdCollision` / `NameCollision` unless `replace_if_exists`.
    fn insert_impl(
        &self,
        id: EntityId,
        entity: AccessEntity,
        replace_if_exists: bool,
    ) -> AccessResult<()>;

    /// # Errors
    /// - `NotFoundId`, then `Readonly`.
    fn remove_impl(&self, id: EntityId) -> AccessResult<()>;

    /// # Errors
    /// - `NotFoundId`, then `Readonly`.
    /// - `Logical` when the transformation changed the entity type.
    /// - `RenameCollision` when the new name is taken.
    fn update_impl(&self, id: EntityId, update_func: &UpdateFunc<'_>) -> AccessResult<()>;

    fn subscribe_for_changes_impl(
        &self,
        entity_type: EntityType,
        handler: OnChangedHandler,
    ) -> ScopeGuard;

    fn subscribe_for_changes_id_impl(&self, id: EntityId, handler: OnChangedHandler) -> ScopeGuard;

    fn has_subscription_impl(&self, entity_type: EntityType) -> bool;

    fn has_subscription_id_impl(&self, id: EntityId) -> bool;

    fn is_address_allowed_impl(&self, user: &User, address: IpAddr) -> bool {
        user.allowed_client_hosts.contains(address)
    }

    fn are_credentials_valid_impl(
        &self,
        user: &User,
        credentials: &Credentials,
        external_authenticators: &ExternalAuthenticators,
    ) -> bool {
        if !credentials.is_ready() || credentials.user_name() != user.name {
            return false;
        }
        authentication::are_credentials_valid(credentials, &user.auth_data, external_authenticators)
    }

    /// Login steps without error replacement.
    fn login_impl(
        &self,
        credentials: &Credentials,
        address: IpAddr,
        external_authenticators: &ExternalAuthenticators,
    ) -> AccessResult<EntityId> {
        let user_name = credentials.user_name();
        let not_found =
            || AccessError::not_found_name(EntityType::User, user_name, self.storage_name());

        let id = self.find(EntityType::User, user_name)?.ok_or_else(not_found)?;
        let user = self.try_read_as::<User>(id).ok_or_else(not_found)?;

        if !self.is_address_allowed_impl(&user, address) {
            return Err(AccessError::AddressNotAllowed(address));
        }
        if !self.are_credentials_valid_impl(&user, credentials, external_authenticators) {
            return Err(AccessError::WrongPassword);
        }
        Ok(id)
    }

    fn get_id_of_logged_user_impl(&self, user_name: &str) -> AccessResult<EntityId> {
        self.get_id(EntityType::User, user_name)
    }

    /// Log target of this storage, `Access(<storage name>)`.
    fn log_target(&self) -> &'static str {
        storage_log_target(self.storage_name())
    }

    /// Ids of every entity of `entity_type`.
    fn find_all(&self, entity_type: EntityType) -> AccessResult<Vec<EntityId>> {
        self.find_all_impl(entity_type)
    }

    fn find(&self, entity_type: EntityType, name: &str) -> AccessResult<Option<EntityId>> {
        self.find_impl(entity_type, name)
    }

    /// Ids of the names that exist; missing names are skipped.
    fn find_many(&self, entity_type: EntityType, names: &[&str]) -> AccessResult<Vec<EntityId>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            if let Some(id) = self.find_impl(entity_type, name)? {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn get_id(&self, entity_type: EntityType, name: &str) -> AccessResult<EntityId> {
        self.find_impl(entity_type, name)?
            .ok_or_else(|| AccessError::not_found_name(entity_type, name, self.storage_name()))
    }

    /// Fails on the first missing name.
    fn get_ids(&self, entity_type: EntityType, names: &[&str]) -> AccessResult<Vec<EntityId>> {
        names
            .iter()
            .map(|name| self.get_id(entity_type, name))
            .collect()
    }

    /// Backend failures are logged and reported as absent.
    fn exists(&self, id: EntityId) -> bool {
        match self.exists_impl(id) {
            Ok(exists) => exists,
            Err(err) => {
                warn!(
                    target: self.log_target(),
                    "event=exists module=storage status=error id={id} error={err}"
                );
                false
            }
        }
    }

    fn read(&self, id: EntityId) -> AccessResult<AccessEntity> {
        self.read_impl(id)?
            .ok_or_else(|| AccessError::not_found_id(id, self.storage_name()))
    }

    /// Reads `id`, turning every failure into `None`.
    fn try_read_base(&self, id: EntityId) -> Option<AccessEntity> {
        match self.read_impl(id) {
            Ok(entity) => entity,
            Err(err) => {
                debug!(
                    target: self.log_target(),
                    "event=try_read module=storage status=error id={id} error={err}"
                );
                None
            }
        }
    }

    fn try_read(&self, id: EntityId) -> Option<AccessEntity> {
        self.try_read_base(id)
    }

    fn read_name(&self, id: EntityId) -> AccessResult<String> {
        self.read_name_impl(id)?
            .ok_or_else(|| AccessError::not_found_id(id, self.storage_name()))
    }

    /// Fails on the first missing id.
    fn read_names(&self, ids: &[EntityId]) -> AccessResult<Vec<String>> {
        ids.iter().map(|id| self.read_name(*id)).collect()
    }

    fn try_read_name(&self, id: EntityId) -> Option<String> {
        self.read_name_impl(id).ok().flatten()
    }

    /// Names of the ids that can be read; the rest are skipped.
    fn try_read_names(&self, ids: &[EntityId]) -> Vec<String> {
        ids.iter().filter_map(|id| self.try_read_name(*id)).collect()
    }

    /// Returns ``<type> `<name>` `` when `id` is readable, `ID(<uuid>)` otherwise.
    fn format_type_with_name_or_id(&self, id: EntityId) -> String {
        self.try_read_base(id)
            .map(|entity| entity.format_type_with_name())
            .unwrap_or_else(|| format_id(&id))
    }

    /// Inserts under a freshly generated id.
    fn insert(&self, entity: AccessEntity) -> AccessResult<EntityId> {
        insert_one(self, entity, false)
    }

    /// Inserts under a caller-chosen id.
    fn insert_with_id(
        &self,
        id: EntityId,
        entity: AccessEntity,
        replace_if_exists: bool,
    ) -> AccessResult<()> {
        self.insert_impl(id, entity, replace_if_exists)
    }

    /// Inserts, replacing an entity of the same type and name.
    fn insert_or_replace(&self, entity: AccessEntity) -> AccessResult<EntityId> {
        insert_one(self, entity, true)
    }

    fn insert_many(&self, entities: Vec<AccessEntity>) -> AccessResult<Vec<EntityId>> {
        Ok(insert_batch(self, entities, false)?)
    }

    fn insert_or_replace_many(&self, entities: Vec<AccessEntity>) -> AccessResult<Vec<EntityId>> {
        Ok(insert_batch(self, entities, true)?)
    }

    fn try_insert(&self, entity: AccessEntity) -> Option<EntityId> {
        match insert_one(self, entity, false) {
            Ok(id) => Some(id),
            Err(err) => {
                log_swallowed(self, MutationKind::Insert, &err);
                None
            }
        }
    }

    /// Ids of the inserted entities, in input order.
    fn try_insert_many(&self, entities: Vec<AccessEntity>) -> Vec<EntityId> {
        succeeded_or_log(self, insert_batch(self, entities, false))
    }

    fn remove(&self, id: EntityId) -> AccessResult<()> {
        self.remove_impl(id)
    }

    fn remove_many(&self, ids: &[EntityId]) -> AccessResult<()> {
        remove_batch(self, ids)?;
        Ok(())
    }

    fn try_remove(&self, id: EntityId) -> bool {
        match self.remove_impl(id) {
            Ok(()) => true,
            Err(err) => {
                log_swallowed(self, MutationKind::Remove, &err);
                false
            }
        }
    }

    /// Ids that were removed, in input order.
    fn try_remove_many(&self, ids: &[EntityId]) -> Vec<EntityId> {
        succeeded_or_log(self, remove_batch(self, ids))
    }

    fn update(&self, id: EntityId, update_func: &UpdateFunc<'_>) -> AccessResult<()> {
        self.update_impl(id, update_func)
    }

    fn update_many(&self, ids: &[EntityId], update_func: &UpdateFunc<'_>) -> AccessResult<()> {
        update_batch(self, ids, update_func)?;
        Ok(())
    }

    fn try_update(&self, id: EntityId, update_func: &UpdateFunc<'_>) -> bool {
        match self.update_impl(id, update_func) {
            Ok(()) => true,
            Err(err) => {
                log_swallowed(self, MutationKind::Update, &err);
                false
            }
        }
    }

    /// Ids that were updated, in input order.
    fn try_update_many(&self, ids: &[EntityId], update_func: &UpdateFunc<'_>) -> Vec<EntityId> {
        succeeded_or_log(self, update_batch(self, ids, update_func))
    }

    /// Subscribes to every change of entities of `entity_type`.
    fn subscribe_for_changes(
        &self,
        entity_type: EntityType,
        handler: OnChangedHandler,
    ) -> ScopeGuard {
        self.subscribe_for_changes_impl(entity_type, handler)
    }

    /// Subscribes to one id, whether or not it exists yet.
    fn subscribe_for_changes_id(&self, id: EntityId, handler: OnChangedHandler) -> ScopeGuard {
        self.subscribe_for_changes_id_impl(id, handler)
    }

    /// One guard releasing the subscriptions of every id.
    fn subscribe_for_changes_ids(&self, ids: &[EntityId], handler: OnChangedHandler) -> ScopeGuard {
        let mut guard = ScopeGuard::empty();
        for id in ids {
            guard.join(self.subscribe_for_changes_id_impl(*id, Arc::clone(&handler)));
        }
        guard
    }

    fn has_subscription(&self, entity_type: EntityType) -> bool {
        self.has_subscription_impl(entity_type)
    }

    fn has_subscription_id(&self, id: EntityId) -> bool {
        self.has_subscription_id_impl(id)
    }

    /// Authenticates `credentials` coming from `address`.
    ///
    /// Failures are logged with their cause. With
    /// `replace_failure_with_generic_error` the caller only ever sees
    /// `AuthenticationFailed`, whichever step failed.
    fn login(
        &self,
        credentials: &Credentials,
        address: IpAddr,
        external_authenticators: &ExternalAuthenticators,
        replace_failure_with_generic_error: bool,
    ) -> AccessResult<EntityId> {
        let user_name = credentials.user_name();
        match self.login_impl(credentials, address, external_authenticators) {
            Ok(id) => {
                info!(
                    target: self.log_target(),
                    "event=login module=storage status=ok from={address} user={user_name} id={id}"
                );
                Ok(id)
            }
            Err(err) => {
                warn!(
                    target: self.log_target(),
                    "event=login module=storage status=error from={address} user={user_name} error={err}"
                );
                if replace_failure_with_generic_error {
                    return Err(AccessError::AuthenticationFailed {
                        user_name: user_name.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    /// Id of an already authenticated user.
    fn get_id_of_logged_user(&self, user_name: &str) -> AccessResult<EntityId> {
        self.get_id_of_logged_user_impl(user_name)
    }
}

/// Typed helpers over `AccessStorage`.
pub trait AccessStorageExt: AccessStorage {
    /// # Errors
    /// - `NotFoundId` when absent, `BadCast` when of another type.
    fn read_as<T: EntityVariant>(&self, id: EntityId) -> AccessResult<Arc<T>> {
        self.read(id)?.cast::<T>(id)
    }

    /// `None` when absent, unreadable or of another type.
    fn try_read_as<T: EntityVariant>(&self, id: EntityId) -> Option<Arc<T>> {
        self.try_read_base(id)?.cast::<T>(id).ok()
    }

    fn find_as<T: EntityVariant>(&self, name: &str) -> AccessResult<Option<EntityId>> {
        self.find(T::TYPE, name)
    }

    fn get_id_as<T: EntityVariant>(&self, name: &str) -> AccessResult<EntityId> {
        self.get_id(T::TYPE, name)
    }

    fn find_all_as<T: EntityVariant>(&self) -> AccessResult<Vec<EntityId>> {
        self.find_all(T::TYPE)
    }
}

impl<S: AccessStorage + ?Sized> AccessStorageExt for S {}

fn insert_one<S: AccessStorage + ?Sized>(
    storage: &S,
    entity: AccessEntity,
    replace_if_exists: bool,
) -> AccessResult<EntityId> {
    if storage.is_readonly() {
        return Err(AccessError::readonly(
            MutationKind::Insert,
            entity.entity_type(),
            entity.name(),
            storage.storage_name(),
        ));
    }
    let id = generate_random_id();
    storage.insert_impl(id, entity, replace_if_exists)?;
    Ok(id)
}

fn insert_batch<S: AccessStorage + ?Sized>(
    storage: &S,
    entities: Vec<AccessEntity>,
    replace_if_exists: bool,
) -> Result<Vec<EntityId>, BatchError> {
    let labels: Vec<String> = entities
        .iter()
        .map(AccessEntity::format_type_with_name)
        .collect();
    let mut tracker = ErrorsTracker::new(MutationKind::Insert, entities.len());
    let ids = entities
        .into_iter()
        .filter_map(|entity| tracker.try_call(|| insert_one(storage, entity, replace_if_exists)))
        .collect();
    tracker.finish(ids, |index| labels[index].clone())
}

fn remove_batch<S: AccessStorage + ?Sized>(
    storage: &S,
    ids: &[EntityId],
) -> Result<Vec<EntityId>, BatchError> {
    let mut labels = Vec::with_capacity(ids.len());
    let mut removed = Vec::with_capacity(ids.len());
    let mut tracker = ErrorsTracker::new(MutationKind::Remove, ids.len());
    for id in ids {
        labels.push(storage.format_type_with_name_or_id(*id));
        if let Some(id) = tracker.try_call(|| storage.remove_impl(*id).map(|()| *id)) {
            removed.push(id);
        }
    }
    tracker.finish(removed, |index| labels[index].clone())
}

fn update_batch<S: AccessStorage + ?Sized>(
    storage: &S,
    ids: &[EntityId],
    update_func: &UpdateFunc<'_>,
) -> Result<Vec<EntityId>, BatchError> {
    let mut labels = Vec::with_capacity(ids.len());
    let mut updated = Vec::with_capacity(ids.len());
    let mut tracker = ErrorsTracker::new(MutationKind::Update, ids.len());
    for id in ids {
        labels.push(storage.format_type_with_name_or_id(*id));
        if let Some(id) = tracker.try_call(|| storage.update_impl(*id, update_func).map(|()| *id)) {
            updated.push(id);
        }
    }
    tracker.finish(updated, |index| labels[index].clone())
}

fn succeeded_or_log<S: AccessStorage + ?Sized>(
    storage: &S,
    result: Result<Vec<EntityId>, BatchError>,
) -> Vec<EntityId> {
    match result {
        Ok(ids) => ids,
        Err(err) => {
            log_swallowed(storage, err.mutation(), &err);
            err.succeeded_ids().to_vec()
        }
    }
}

fn log_swallowed<S: AccessStorage + ?Sized>(
    storage: &S,
    mutation: MutationKind,
    err: &dyn std::fmt::Display,
) {
    debug!(
        target: storage.log_target(),
        "event=try_{} module=storage status=error error={err}",
        mutation.verb()
    );
}
