//! Change notifications and the subscription registry backends embed.
//!
//! # Responsibility
//! - Register handlers per entity type or per entity id.
//! - Turn one committed mutation into queued notifications.
//! - Dispatch queued notifications in queue order.
//!
//! # Invariants
//! - Notifications are collected under the backend's lock but dispatched only
//!   after the backend released it and the mutation is committed.
//! - A handler whose guard was released before dispatch reaches it is never
//!   called. A dispatch that already passed that check when the guard is
//!   released may still deliver once.
//! - No hub lock is held while a handler runs, so handlers may subscribe,
//!   unsubscribe or read the storage.

use crate::model::entity::{AccessEntity, EntityId, EntityType};
use crate::storage::scope_guard::ScopeGuard;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked with the changed id and the new entity, or `None` when
/// the entity was removed.
pub type OnChangedHandler = Arc<dyn Fn(EntityId, Option<AccessEntity>) + Send + Sync>;

/// Wraps a closure as an `OnChangedHandler`.
pub fn on_changed<F>(handler: F) -> OnChangedHandler
where
    F: Fn(EntityId, Option<AccessEntity>) + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// One pending `(handler, id, new entity or absent)` delivery.
#[derive(Clone)]
pub struct Notification {
    pub handler: OnChangedHandler,
    pub id: EntityId,
    pub entity: Option<AccessEntity>,
    active: Arc<AtomicBool>,
}

impl Notification {
    fn is_live(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Debug for Notification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("id", &self.id)
            .field("entity", &self.entity.as_ref().map(AccessEntity::format_type_with_name))
            .finish()
    }
}

pub type Notifications = Vec<Notification>;

/// Dispatches queued notifications in order.
///
/// Must be called by backends after the mutation is committed and outside
/// any storage lock.
pub fn notify(notifications: Notifications) {
    for notification in notifications {
        if !notification.is_live() {
            continue;
        }
        (notification.handler)(notification.id, notification.entity);
    }
}

struct Subscriber {
    key: u64,
    active: Arc<AtomicBool>,
    handler: OnChangedHandler,
}

#[derive(Default)]
struct HubState {
    next_key: u64,
    by_type: HashMap<EntityType, Vec<Subscriber>>,
    by_id: HashMap<EntityId, Vec<Subscriber>>,
}

#[derive(Clone, Copy)]
enum Scope {
    Type(EntityType),
    Id(EntityId),
}

/// Subscription registry shared by a backend and the guards it hands out.
#[derive(Default)]
pub struct SubscriptionHub {
    state: Arc<Mutex<HubState>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_type(&self, entity_type: EntityType, handler: OnChangedHandler) -> ScopeGuard {
        self.subscribe(Scope::Type(entity_type), handler)
    }

    /// Subscribes to one id. The id does not need to exist yet; the
    /// subscription outlives removal and re-insertion of the entity.
    pub fn subscribe_id(&self, id: EntityId, handler: OnChangedHandler) -> ScopeGuard {
        self.subscribe(Scope::Id(id), handler)
    }

    pub fn has_type(&self, entity_type: EntityType) -> bool {
        self.state
            .lock()
            .by_type
            .get(&entity_type)
            .is_some_and(|subscribers| !subscribers.is_empty())
    }

    pub fn has_id(&self, id: EntityId) -> bool {
        self.state
            .lock()
            .by_id
            .get(&id)
            .is_some_and(|subscribers| !subscribers.is_empty())
    }

    /// Queues one notification per live subscriber interested in `id` or in
    /// `entity_type`. Type subscribers come first.
    pub fn prepare(
        &self,
        id: EntityId,
        entity_type: EntityType,
        entity: Option<&AccessEntity>,
        notifications: &mut Notifications,
    ) {
        let state = self.state.lock();
        let type_subscribers = state.by_type.get(&entity_type).into_iter().flatten();
        let id_subscribers = state.by_id.get(&id).into_iter().flatten();
        for subscriber in type_subscribers.chain(id_subscribers) {
            notifications.push(Notification {
                handler: Arc::clone(&subscriber.handler),
                id,
                entity: entity.cloned(),
                active: Arc::clone(&subscriber.active),
            });
        }
    }

    fn subscribe(&self, scope: Scope, handler: OnChangedHandler) -> ScopeGuard {
        let active = Arc::new(AtomicBool::new(true));
        let key = {
            let mut state = self.state.lock();
            let key = state.next_key;
            state.next_key += 1;
            let subscriber = Subscriber {
                key,
                active: Arc::clone(&active),
                handler,
            };
            match scope {
                Scope::Type(entity_type) => state.by_type.entry(entity_type).or_default().push(subscriber),
                Scope::Id(id) => state.by_id.entry(id).or_default().push(subscriber),
            }
            key
        };

        let state: Weak<Mutex<HubState>> = Arc::downgrade(&self.state);
        ScopeGuard::new(move || {
            active.store(false, Ordering::SeqCst);
            if let Some(state) = state.upgrade() {
                state.lock().remove(scope, key);
            }
        })
    }
}

impl HubState {
    fn remove(&mut self, scope: Scope, key: u64) {
        match scope {
            Scope::Type(entity_type) => {
                if let Some(subscribers) = self.by_type.get_mut(&entity_type) {
                    subscribers.retain(|subscriber| subscriber.key != key);
                    if subscribers.is_empty() {
                        self.by_type.remove(&entity_type);
                    }
                }
            }
            Scope::Id(id) => {
                if let Some(subscribers) = self.by_id.get_mut(&id) {
                    subscribers.retain(|subscriber| subscriber.key != key);
                    if subscribers.is_empty() {
                        self.by_id.remove(&id);
                    }
                }
            }
        }
    }
}
