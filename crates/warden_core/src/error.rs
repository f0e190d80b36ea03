//! Access storage error model.
//!
//! # Responsibility
//! - Carry every failure of the storage contract with enough data to render
//!   the exact diagnostic message.
//! - Classify failures into stable `ErrorKind`s that callers branch on.
//!
//! # Invariants
//! - A batch error always reports the kind of its first captured failure.
//! - `AuthenticationFailed` never reveals which login step failed.

use crate::db::DbError;
use crate::model::entity::{back_quote, format_entity_type_with_name, format_id, EntityId, EntityType};
use crate::storage::errors_tracker::BatchError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

pub type AccessResult<T> = Result<T, AccessError>;

/// Stable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Readonly,
    BadCast,
    WrongPassword,
    AddressNotAllowed,
    AuthenticationFailed,
    /// Contract violation, e.g. an update that changed the entity type.
    Logical,
    /// Backend transport or persisted-data failure.
    Storage,
}

/// Mutating operation named in readonly and batch diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Insert,
    Update,
    Remove,
}

impl MutationKind {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Insert => "inserted",
            Self::Update => "updated",
            Self::Remove => "removed",
        }
    }

    fn storage_preposition(self) -> &'static str {
        match self {
            Self::Insert => "to",
            Self::Update => "in",
            Self::Remove => "from",
        }
    }
}

#[derive(Debug)]
pub enum AccessError {
    NotFoundId {
        id: EntityId,
        storage: String,
    },
    NotFoundName {
        entity_type: EntityType,
        name: String,
        storage: String,
    },
    IdCollision {
        id: EntityId,
        entity_type: EntityType,
        name: String,
        existing_type: EntityType,
        existing_name: String,
        storage: String,
    },
    NameCollision {
        entity_type: EntityType,
        name: String,
        storage: String,
    },
    RenameCollision {
        entity_type: EntityType,
        old_name: String,
        new_name: String,
        storage: String,
    },
    Readonly {
        mutation: MutationKind,
        entity_type: EntityType,
        name: String,
        storage: String,
    },
    BadCast {
        id: EntityId,
        actual_type: EntityType,
        actual_name: String,
        required_type: EntityType,
    },
    AddressNotAllowed(IpAddr),
    WrongPassword,
    AuthenticationFailed {
        user_name: String,
    },
    Logical(String),
    Db(DbError),
    InvalidData(String),
    Batch(Box<BatchError>),
}

impl AccessError {
    pub fn not_found_id(id: EntityId, storage: &str) -> Self {
        Self::NotFoundId {
            id,
            storage: storage.to_string(),
        }
    }

    pub fn not_found_name(entity_type: EntityType, name: &str, storage: &str) -> Self {
        Self::NotFoundName {
            entity_type,
            name: name.to_string(),
            storage: storage.to_string(),
        }
    }

    pub fn readonly(mutation: MutationKind, entity_type: EntityType, name: &str, storage: &str) -> Self {
        Self::Readonly {
            mutation,
            entity_type,
            name: name.to_string(),
            storage: storage.to_string(),
        }
    }

    pub fn name_collision(entity_type: EntityType, name: &str, storage: &str) -> Self {
        Self::NameCollision {
            entity_type,
            name: name.to_string(),
            storage: storage.to_string(),
        }
    }

    pub fn rename_collision(
        entity_type: EntityType,
        old_name: &str,
        new_name: &str,
        storage: &str,
    ) -> Self {
        Self::RenameCollision {
            entity_type,
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
            storage: storage.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFoundId { .. } | Self::NotFoundName { .. } => ErrorKind::NotFound,
            Self::IdCollision { .. } | Self::NameCollision { .. } | Self::RenameCollision { .. } => {
                ErrorKind::AlreadyExists
            }
            Self::Readonly { .. } => ErrorKind::Readonly,
            Self::BadCast { .. } => ErrorKind::BadCast,
            Self::AddressNotAllowed(_) => ErrorKind::AddressNotAllowed,
            Self::WrongPassword => ErrorKind::WrongPassword,
            Self::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            Self::Logical(_) => ErrorKind::Logical,
            Self::Db(_) | Self::InvalidData(_) => ErrorKind::Storage,
            Self::Batch(batch) => batch.kind(),
        }
    }
}

impl Display for AccessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFoundId { id, storage } => {
                write!(f, "{} not found in {storage}", format_id(id))
            }
            Self::NotFoundName {
                entity_type,
                name,
                storage,
            } => write!(
                f,
                "There is no {} in {storage}",
                format_entity_type_with_name(*entity_type, name)
            ),
            Self::IdCollision {
                id,
                entity_type,
                name,
                existing_type,
                existing_name,
                storage,
            } => write!(
                f,
                "{}: cannot insert because the {} is already used by {} in {storage}",
                format_entity_type_with_name(*entity_type, name),
                format_id(id),
                format_entity_type_with_name(*existing_type, existing_name)
            ),
            Self::NameCollision {
                entity_type,
                name,
                storage,
            } => {
                let formatted = format_entity_type_with_name(*entity_type, name);
                write!(
                    f,
                    "{formatted}: cannot insert because {formatted} already exists in {storage}"
                )
            }
            Self::RenameCollision {
                entity_type,
                old_name,
                new_name,
                storage,
            } => write!(
                f,
                "{}: cannot rename to {} because {} already exists in {storage}",
                format_entity_type_with_name(*entity_type, old_name),
                back_quote(new_name),
                format_entity_type_with_name(*entity_type, new_name)
            ),
            Self::Readonly {
                mutation,
                entity_type,
                name,
                storage,
            } => {
                let verb = mutation.verb();
                let verb = format!("{}{}", verb[..1].to_ascii_uppercase(), &verb[1..]);
                write!(
                    f,
                    "{verb} {} {} {storage} because this storage is readonly",
                    format_entity_type_with_name(*entity_type, name),
                    mutation.storage_preposition()
                )
            }
            Self::BadCast {
                id,
                actual_type,
                actual_name,
                required_type,
            } => write!(
                f,
                "{}: {} expected to be of type {required_type}",
                format_id(id),
                format_entity_type_with_name(*actual_type, actual_name)
            ),
            Self::AddressNotAllowed(address) => {
                write!(f, "Connections from {address} are not allowed")
            }
            Self::WrongPassword => write!(f, "Invalid credentials"),
            Self::AuthenticationFailed { user_name } => write!(
                f,
                "{user_name}: Authentication failed: password is incorrect or there is no user with such name"
            ),
            Self::Logical(message) => write!(f, "{message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted access entity: {message}"),
            Self::Batch(batch) => write!(f, "{batch}"),
        }
    }
}

impl Error for AccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Batch(batch) => Some(batch.first_error()),
            _ => None,
        }
    }
}

impl From<DbError> for AccessError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for AccessError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for AccessError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}

impl From<BatchError> for AccessError {
    fn from(value: BatchError) -> Self {
        Self::Batch(Box::new(value))
    }
}
