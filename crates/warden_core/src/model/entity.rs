//! Access entity identity, typing and naming.
//!
//! # Responsibility
//! - Define the closed set of entity types stored by every access storage.
//! - Provide the tagged `AccessEntity` value and fallible narrowing to one
//!   concrete variant.
//!
//! # Invariants
//! - An `EntityId` is assigned once at insertion and never reused for another
//!   entity of the same storage.
//! - `AccessEntity` values are shared snapshots: they are never mutated in
//!   place, updates build a new value.
//! - Names are unique per `EntityType`, not across types.

use crate::error::{AccessError, AccessResult};
use crate::model::policy::{Quota, RowPolicy, SettingsProfile};
use crate::model::role::Role;
use crate::model::user::User;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Stable storage-wide identifier of an access entity.
pub type EntityId = Uuid;

/// Generates a fresh random entity id.
///
/// Ids are not derived from entity content, so two equal entities inserted
/// twice get two different ids.
pub fn generate_random_id() -> EntityId {
    Uuid::new_v4()
}

/// Closed enumeration of storable entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Role,
    RowPolicy,
    Quota,
    SettingsProfile,
}

impl EntityType {
    /// Every entity type, in declaration order.
    pub const ALL: [EntityType; 5] = [
        EntityType::User,
        EntityType::Role,
        EntityType::RowPolicy,
        EntityType::Quota,
        EntityType::SettingsProfile,
    ];

    /// Stable identifier used in persisted rows and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Role => "role",
            Self::RowPolicy => "row_policy",
            Self::Quota => "quota",
            Self::SettingsProfile => "settings_profile",
        }
    }

    /// Keyword form, e.g. `ROW POLICY`. Used by `Display`.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Role => "ROLE",
            Self::RowPolicy => "ROW POLICY",
            Self::Quota => "QUOTA",
            Self::SettingsProfile => "SETTINGS PROFILE",
        }
    }

    /// Lower-case name placed in front of an entity name in diagnostics.
    pub fn output_name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Role => "role",
            Self::RowPolicy => "row policy",
            Self::Quota => "quota",
            Self::SettingsProfile => "settings profile",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Role => "roles",
            Self::RowPolicy => "row policies",
            Self::Quota => "quotas",
            Self::SettingsProfile => "settings profiles",
        }
    }

    /// Parses a type from its stable id, keyword or plural form.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|entity_type| {
            normalized == entity_type.as_str()
                || normalized == entity_type.plural().replace(' ', "_")
        })
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Formats `<type> `<name>``, the shape used by every access diagnostic.
pub fn format_entity_type_with_name(entity_type: EntityType, name: &str) -> String {
    format!("{} {}", entity_type.output_name(), back_quote(name))
}

/// Formats the id fallback used when an entity cannot be read.
pub fn format_id(id: &EntityId) -> String {
    format!("ID({id})")
}

pub(crate) fn back_quote(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// One stored access entity.
///
/// Every variant holds an `Arc` so clones are cheap and always observe the
/// same immutable snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessEntity {
    User(Arc<User>),
    Role(Arc<Role>),
    RowPolicy(Arc<RowPolicy>),
    Quota(Arc<Quota>),
    SettingsProfile(Arc<SettingsProfile>),
}

impl AccessEntity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::User(_) => EntityType::User,
            Self::Role(_) => EntityType::Role,
            Self::RowPolicy(_) => EntityType::RowPolicy,
            Self::Quota(_) => EntityType::Quota,
            Self::SettingsProfile(_) => EntityType::SettingsProfile,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::User(user) => &user.name,
            Self::Role(role) => &role.name,
            Self::RowPolicy(policy) => &policy.name,
            Self::Quota(quota) => &quota.name,
            Self::SettingsProfile(profile) => &profile.name,
        }
    }

    /// Returns e.g. ``user `alice` ``.
    pub fn format_type_with_name(&self) -> String {
        format_entity_type_with_name(self.entity_type(), self.name())
    }

    /// Builds a renamed copy; `self` is left untouched.
    pub fn with_name(&self, name: impl Into<String>) -> AccessEntity {
        let name = name.into();
        match self {
            Self::User(user) => {
                let mut user = User::clone(user);
                user.name = name;
                user.into()
            }
            Self::Role(role) => {
                let mut role = Role::clone(role);
                role.name = name;
                role.into()
            }
            Self::RowPolicy(policy) => {
                let mut policy = RowPolicy::clone(policy);
                policy.name = name;
                policy.into()
            }
            Self::Quota(quota) => {
                let mut quota = Quota::clone(quota);
                quota.name = name;
                quota.into()
            }
            Self::SettingsProfile(profile) => {
                let mut profile = SettingsProfile::clone(profile);
                profile.name = name;
                profile.into()
            }
        }
    }

    /// Returns true when both values share the same snapshot allocation.
    pub fn ptr_eq(&self, other: &AccessEntity) -> bool {
        match (self, other) {
            (Self::User(a), Self::User(b)) => Arc::ptr_eq(a, b),
            (Self::Role(a), Self::Role(b)) => Arc::ptr_eq(a, b),
            (Self::RowPolicy(a), Self::RowPolicy(b)) => Arc::ptr_eq(a, b),
            (Self::Quota(a), Self::Quota(b)) => Arc::ptr_eq(a, b),
            (Self::SettingsProfile(a), Self::SettingsProfile(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Narrows to the concrete variant `T`.
    ///
    /// # Errors
    /// - `AccessError::BadCast` carrying `(id, actual type, actual name, T::TYPE)`.
    pub fn cast<T: EntityVariant>(&self, id: EntityId) -> AccessResult<Arc<T>> {
        match T::narrow(self) {
            Some(value) => Ok(Arc::clone(value)),
            None => Err(AccessError::BadCast {
                id,
                actual_type: self.entity_type(),
                actual_name: self.name().to_string(),
                required_type: T::TYPE,
            }),
        }
    }
}

/// Concrete entity type that can be narrowed out of an `AccessEntity`.
pub trait EntityVariant: Sized + Send + Sync + 'static {
    const TYPE: EntityType;

    fn narrow(entity: &AccessEntity) -> Option<&Arc<Self>>;
}

macro_rules! entity_variant {
    ($variant:ident) => {
        impl EntityVariant for $variant {
            const TYPE: EntityType = EntityType::$variant;

            fn narrow(entity: &AccessEntity) -> Option<&Arc<Self>> {
                match entity {
                    AccessEntity::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }

        impl From<$variant> for AccessEntity {
            fn from(value: $variant) -> Self {
                AccessEntity::$variant(Arc::new(value))
            }
        }

        impl From<Arc<$variant>> for AccessEntity {
            fn from(value: Arc<$variant>) -> Self {
                AccessEntity::$variant(value)
            }
        }
    };
}

entity_variant!(User);
entity_variant!(Role);
entity_variant!(RowPolicy);
entity_variant!(Quota);
entity_variant!(SettingsProfile);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn formats_type_with_back_quoted_name() {
        let entity: AccessEntity = Role::new("admin").into();
        assert_eq!(entity.format_type_with_name(), "role `admin`");
        assert_eq!(
            format_entity_type_with_name(EntityType::RowPolicy, "we`ird"),
            "row policy `we\\`ird`"
        );
    }

    #[test]
    fn parse_accepts_ids_keywords_and_plurals() {
        assert_eq!(EntityType::parse("user"), Some(EntityType::User));
        assert_eq!(EntityType::parse("ROW POLICY"), Some(EntityType::RowPolicy));
        assert_eq!(
            EntityType::parse("settings-profiles"),
            Some(EntityType::SettingsProfile)
        );
        assert_eq!(EntityType::parse("group"), None);
    }

    #[test]
    fn cast_to_wrong_variant_is_bad_cast() {
        let id = generate_random_id();
        let entity: AccessEntity = Role::new("reader").into();

        let role = entity.cast::<Role>(id).expect("role cast");
        assert_eq!(role.name, "reader");

        let err = entity.cast::<User>(id).expect_err("role is not a user");
        assert_eq!(err.kind(), ErrorKind::BadCast);
        assert_eq!(
            err.to_string(),
            format!("ID({id}): role `reader` expected to be of type USER")
        );
    }

    #[test]
    fn with_name_builds_a_new_snapshot() {
        let original: AccessEntity = User::new("alice").into();
        let renamed = original.with_name("bob");

        assert_eq!(original.name(), "alice");
        assert_eq!(renamed.name(), "bob");
        assert_eq!(renamed.entity_type(), EntityType::User);
        assert!(!original.ptr_eq(&renamed));
        assert!(original.ptr_eq(&original.clone()));
    }

    #[test]
    fn serde_roundtrip_keeps_variant_tag() {
        let entity: AccessEntity = SettingsProfile::new("readonly_profile").into();
        let json = serde_json::to_string(&entity).unwrap();
        assert!(json.contains("\"type\":\"settings_profile\""));

        let decoded: AccessEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, entity);
    }
}
