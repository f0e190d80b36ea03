//! Access entity model.
//!
//! # Responsibility
//! - Define the entity identity, typing and naming contract shared by every
//!   storage backend.
//! - Define the concrete entity variants (user, role, row policy, quota,
//!   settings profile).
//!
//! # Invariants
//! - Every entity is identified by a stable `EntityId`.
//! - Entities are immutable snapshots shared through `Arc`.

pub mod allowed_hosts;
pub mod entity;
pub mod policy;
pub mod role;
pub mod user;
