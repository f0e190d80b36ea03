//! User entity.
//!
//! # Responsibility
//! - Carry the fields the login flow needs: authentication data and the
//!   client host allow-list.
//!
//! # Invariants
//! - `name` is unique among users of one storage.
//! - A freshly built user accepts connections from any host and has no
//!   password.

use crate::model::allowed_hosts::AllowedClientHosts;
use crate::model::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};

/// How a user proves identity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthenticationData {
    /// Any basic credentials with the right user name are accepted.
    #[default]
    NoPassword,
    /// Password compared against basic credentials.
    PlaintextPassword { password: String },
    /// Password checked by a named LDAP server registered in
    /// `ExternalAuthenticators`.
    Ldap { server: String },
    /// Kerberos principal, optionally restricted to one realm.
    Kerberos { realm: Option<String> },
    /// Client certificate whose common name must be in the set.
    SslCertificate { common_names: BTreeSet<String> },
}

impl Debug for AuthenticationData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPassword => f.write_str("NoPassword"),
            Self::PlaintextPassword { .. } => f.write_str("PlaintextPassword { .. }"),
            Self::Ldap { server } => f.debug_struct("Ldap").field("server", server).finish(),
            Self::Kerberos { realm } => f.debug_struct("Kerberos").field("realm", realm).finish(),
            Self::SslCertificate { common_names } => f
                .debug_struct("SslCertificate")
                .field("common_names", common_names)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub auth_data: AuthenticationData,
    #[serde(default = "AllowedClientHosts::any")]
    pub allowed_client_hosts: AllowedClientHosts,
    /// Roles granted to this user, by role id.
    #[serde(default)]
    pub granted_roles: BTreeSet<EntityId>,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth_data: AuthenticationData::NoPassword,
            allowed_client_hosts: AllowedClientHosts::any(),
            granted_roles: BTreeSet::new(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.auth_data = AuthenticationData::PlaintextPassword {
            password: password.into(),
        };
        self
    }

    pub fn with_auth_data(mut self, auth_data: AuthenticationData) -> Self {
        self.auth_data = auth_data;
        self
    }

    pub fn with_allowed_hosts(mut self, hosts: AllowedClientHosts) -> Self {
        self.allowed_client_hosts = hosts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_never_contains_password() {
        let user = User::new("alice").with_password("hunter2");
        let rendered = format!("{user:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn deserialize_fills_defaults() {
        let user: User = serde_json::from_str(r#"{"name":"bob"}"#).unwrap();
        assert_eq!(user.auth_data, AuthenticationData::NoPassword);
        assert!(user.allowed_client_hosts.contains_any_host());
        assert!(user.granted_roles.is_empty());
    }
}
