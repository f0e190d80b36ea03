//! Access-control entity storage.
//! Backends implement single-item primitives; batches, try-variants,
//! change notifications and login are provided once on top of them.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod storage;

pub use auth::credentials::Credentials;
pub use auth::external::{ExternalAuthenticators, KerberosVerifier, LdapVerifier};
pub use config::{open_storage, ConfigError, LoggingConfig, StorageConfig, StorageKind};
pub use error::{AccessError, AccessResult, ErrorKind, MutationKind};
pub use logging::{default_log_level, init_logging, logging_status, storage_log_target};
pub use model::allowed_hosts::{AllowedClientHosts, HostPatternError, IpSubnet};
pub use model::entity::{generate_random_id, AccessEntity, EntityId, EntityType, EntityVariant};
pub use model::policy::{Quota, RowPolicy, SettingsProfile};
pub use model::role::Role;
pub use model::user::{AuthenticationData, User};
pub use storage::errors_tracker::BatchError;
pub use storage::memory::MemoryAccessStorage;
pub use storage::notification::{on_changed, OnChangedHandler};
pub use storage::scope_guard::ScopeGuard;
pub use storage::sqlite::SqliteAccessStorage;
pub use storage::{AccessStorage, AccessStorageExt, UpdateFunc};
