//! SQLite-backed access storage.
//!
//! # Responsibility
//! - Persist access entities in `access_entities`, one row per entity with a
//!   JSON body.
//! - Run every mutation in one transaction and notify only after commit.
//!
//! # Invariants
//! - Read paths reject rows whose stored type disagrees with the body.
//! - `(entity_type, name)` uniqueness is checked before writing and enforced
//!   again by the table constraint.

use crate::db::{open_db, open_db_in_memory, open_db_readonly};
use crate::error::{AccessError, AccessResult, MutationKind};
use crate::model::entity::{AccessEntity, EntityId, EntityType};
use crate::storage::memory::check_update;
use crate::storage::notification::{notify, Notifications, OnChangedHandler, SubscriptionHub};
use crate::storage::scope_guard::ScopeGuard;
use crate::storage::{AccessStorage, UpdateFunc};
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

pub const STORAGE_TYPE: &str = "sqlite";

/// Access storage persisted in one SQLite database.
pub struct SqliteAccessStorage {
    storage_name: String,
    readonly: bool,
    conn: Mutex<Connection>,
    hub: SubscriptionHub,
}

impl SqliteAccessStorage {
    /// Opens (creating when missing) a writable database file.
    pub fn open(storage_name: impl Into<String>, path: impl AsRef<Path>) -> AccessResult<Self> {
        let conn = open_db(path)?;
        Ok(Self::from_connection(storage_name, conn, false))
    }

    /// Opens an existing database file; every mutation fails with `Readonly`.
    pub fn open_readonly(
        storage_name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> AccessResult<Self> {
        let conn = open_db_readonly(path)?;
        Ok(Self::from_connection(storage_name, conn, true))
    }

    pub fn open_in_memory(storage_name: impl Into<String>) -> AccessResult<Self> {
        let conn = open_db_in_memory()?;
        Ok(Self::from_connection(storage_name, conn, false))
    }

    /// Wraps a connection that already went through `db::open_*`.
    pub fn from_connection(
        storage_name: impl Into<String>,
        conn: Connection,
        readonly: bool,
    ) -> Self {
        let storage = Self {
            storage_name: storage_name.into(),
            readonly,
            conn: Mutex::new(conn),
            hub: SubscriptionHub::new(),
        };
        info!(
            target: storage.log_target(),
            "event=storage_open module=storage status=ok type={STORAGE_TYPE} readonly={readonly}"
        );
        storage
    }

    /// Runs `mutation` in one transaction, then dispatches what it queued.
    fn mutate(
        &self,
        mutation: impl FnOnce(&Connection, &mut Notifications) -> AccessResult<()>,
    ) -> AccessResult<()> {
        let mut notifications = Notifications::new();
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            mutation(&*tx, &mut notifications)?;
            tx.commit()?;
        }
        notify(notifications);
        Ok(())
    }

    fn insert_in_tx(
        &self,
        conn: &Connection,
        id: EntityId,
        entity: AccessEntity,
        replace_if_exists: bool,
        notifications: &mut Notifications,
    ) -> AccessResult<()> {
        let entity_type = entity.entity_type();
        if self.readonly {
            return Err(AccessError::readonly(
                MutationKind::Insert,
                entity_type,
                entity.name(),
                &self.storage_name,
            ));
        }

        let name_owner = select_id_by_name(conn, entity_type, entity.name())?
            .filter(|owner| *owner != id);
        if name_owner.is_some() && !replace_if_exists {
            return Err(AccessError::name_collision(
                entity_type,
                entity.name(),
                &self.storage_name,
            ));
        }

        if let Some(existing) = select_entity(conn, id)? {
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
            if existing == entity {
                return Ok(());
            }
        }

        if let Some(owner) = name_owner {
            delete_row(conn, owner)?;
            self.hub.prepare(owner, entity_type, None, notifications);
        }
        upsert_row(conn, id, &entity)?;
        self.hub.prepare(id, entity_type, Some(&entity), notifications);
        Ok(())
    }

    fn remove_in_tx(
        &self,
        conn: &Connection,
        id: EntityId,
        notifications: &mut Notifications,
    ) -> AccessResult<()> {
        let Some(entity) = select_entity(conn, id)? else {
            return Err(AccessError::not_found_id(id, &self.storage_name));
        };
        if self.readonly {
            return Err(AccessError::readonly(
                MutationKind::Remove,
                entity.entity_type(),
                entity.name(),
                &self.storage_name,
            ));
        }

        delete_row(conn, id)?;
        self.hub
            .prepare(id, entity.entity_type(), None, notifications);
        Ok(())
    }

    fn update_in_tx(
        &self,
        conn: &Connection,
        id: EntityId,
        update_func: &UpdateFunc<'_>,
        notifications: &mut Notifications,
    ) -> AccessResult<()> {
        let Some(old) = select_entity(conn, id)? else {
            return Err(AccessError::not_found_id(id, &self.storage_name));
        };
        if self.readonly {
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
            && select_id_by_name(conn, new.entity_type(), new.name())?
                .is_some_and(|owner| owner != id)
        {
            return Err(AccessError::rename_collision(
                old.entity_type(),
                old.name(),
                new.name(),
                &self.storage_name,
            ));
        }

        upsert_row(conn, id, &new)?;
        self.hub
            .prepare(id, new.entity_type(), Some(&new), notifications);
        Ok(())
    }
}

impl AccessStorage for SqliteAccessStorage {
    fn storage_name(&self) -> &str {
        &self.storage_name
    }

    fn storage_type(&self) -> &'static str {
        STORAGE_TYPE
    }

    fn is_readonly(&self) -> bool {
        self.readonly
    }

    fn find_all_impl(&self, entity_type: EntityType) -> AccessResult<Vec<EntityId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM access_entities
             WHERE entity_type = ?1
             ORDER BY name ASC;",
        )?;
        let mut rows = stmt.query([entity_type.as_str()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            ids.push(parse_id(&raw)?);
        }
        Ok(ids)
    }

    fn find_impl(&self, entity_type: EntityType, name: &str) -> AccessResult<Option<EntityId>> {
        select_id_by_name(&self.conn.lock(), entity_type, name)
    }

    fn exists_impl(&self, id: EntityId) -> AccessResult<bool> {
        let found = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM access_entities WHERE id = ?1;",
                [id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn read_impl(&self, id: EntityId) -> AccessResult<Option<AccessEntity>> {
        select_entity(&self.conn.lock(), id)
    }

    fn read_name_impl(&self, id: EntityId) -> AccessResult<Option<String>> {
        let name = self
            .conn
            .lock()
            .query_row(
                "SELECT name FROM access_entities WHERE id = ?1;",
                [id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(name)
    }

    fn insert_impl(
        &self,
        id: EntityId,
        entity: AccessEntity,
        replace_if_exists: bool,
    ) -> AccessResult<()> {
        self.mutate(|conn, notifications| {
            self.insert_in_tx(conn, id, entity, replace_if_exists, notifications)
        })
    }

    fn remove_impl(&self, id: EntityId) -> AccessResult<()> {
        self.mutate(|conn, notifications| self.remove_in_tx(conn, id, notifications))
    }

    fn update_impl(&self, id: EntityId, update_func: &UpdateFunc<'_>) -> AccessResult<()> {
        self.mutate(|conn, notifications| self.update_in_tx(conn, id, update_func, notifications))
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

fn select_entity(conn: &Connection, id: EntityId) -> AccessResult<Option<AccessEntity>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_type, body FROM access_entities
         WHERE id = ?1;",
    )?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_entity_row(row)?));
    }
    Ok(None)
}

fn select_id_by_name(
    conn: &Connection,
    entity_type: EntityType,
    name: &str,
) -> AccessResult<Option<EntityId>> {
    let raw = conn
        .query_row(
            "SELECT id FROM access_entities
             WHERE entity_type = ?1 AND name = ?2;",
            params![entity_type.as_str(), name],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    raw.as_deref().map(parse_id).transpose()
}

fn upsert_row(conn: &Connection, id: EntityId, entity: &AccessEntity) -> AccessResult<()> {
    let body = serde_json::to_string(entity)?;
    conn.execute(
        "INSERT INTO access_entities (id, entity_type, name, body)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (id) DO UPDATE SET
            entity_type = excluded.entity_type,
            name = excluded.name,
            body = excluded.body,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            id.to_string(),
            entity.entity_type().as_str(),
            entity.name(),
            body
        ],
    )?;
    Ok(())
}

fn delete_row(conn: &Connection, id: EntityId) -> AccessResult<()> {
    conn.execute(
        "DELETE FROM access_entities WHERE id = ?1;",
        [id.to_string()],
    )?;
    Ok(())
}

fn parse_entity_row(row: &Row<'_>) -> AccessResult<AccessEntity> {
    let id_text: String = row.get("id")?;
    let type_text: String = row.get("entity_type")?;
    let entity_type = parse_entity_type(&type_text).ok_or_else(|| {
        AccessError::InvalidData(format!(
            "invalid entity type `{type_text}` in access_entities.entity_type"
        ))
    })?;

    let body: String = row.get("body")?;
    let entity: AccessEntity = serde_json::from_str(&body)?;
    if entity.entity_type() != entity_type {
        return Err(AccessError::InvalidData(format!(
            "row `{id_text}` is stored as {} but its body is a {}",
            entity_type.output_name(),
            entity.entity_type().output_name()
        )));
    }
    Ok(entity)
}

fn parse_id(value: &str) -> AccessResult<EntityId> {
    Uuid::parse_str(value).map_err(|_| {
        AccessError::InvalidData(format!("invalid uuid value `{value}` in access_entities.id"))
    })
}

fn parse_entity_type(value: &str) -> Option<EntityType> {
    EntityType::ALL
        .into_iter()
        .find(|entity_type| entity_type.as_str() == value)
}
