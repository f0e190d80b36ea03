//! Role entity.

use crate::model::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Named bundle of grants that can itself be granted to users or roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub granted_roles: BTreeSet<EntityId>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            granted_roles: BTreeSet::new(),
        }
    }
}
