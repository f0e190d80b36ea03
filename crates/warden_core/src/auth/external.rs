//! Registry of external authenticators consulted during login.
//!
//! The storage never speaks LDAP or Kerberos itself; it only asks the
//! verifiers registered here.

use log::warn;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Checks a user name/password pair against one directory server.
pub trait LdapVerifier: Send + Sync {
    fn verify(&self, user_name: &str, password: &str) -> bool;
}

impl<F> LdapVerifier for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn verify(&self, user_name: &str, password: &str) -> bool {
        self(user_name, password)
    }
}

/// Checks an accepted Kerberos principal, optionally against a realm.
pub trait KerberosVerifier: Send + Sync {
    fn verify(&self, principal: &str, realm: Option<&str>) -> bool;
}

impl<F> KerberosVerifier for F
where
    F: Fn(&str, Option<&str>) -> bool + Send + Sync,
{
    fn verify(&self, principal: &str, realm: Option<&str>) -> bool {
        self(principal, realm)
    }
}

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalAuthenticatorError {
    InvalidServerName(String),
    DuplicateServerName(String),
}

impl Display for ExternalAuthenticatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidServerName(value) => write!(f, "LDAP server name is invalid: {value}"),
            Self::DuplicateServerName(value) => {
                write!(f, "LDAP server already registered: {value}")
            }
        }
    }
}

impl Error for ExternalAuthenticatorError {}

#[derive(Default)]
pub struct ExternalAuthenticators {
    ldap_servers: BTreeMap<String, Arc<dyn LdapVerifier>>,
    kerberos: Option<Arc<dyn KerberosVerifier>>,
}

impl ExternalAuthenticators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one named LDAP server.
    pub fn register_ldap_server(
        &mut self,
        name: &str,
        verifier: Arc<dyn LdapVerifier>,
    ) -> Result<(), ExternalAuthenticatorError> {
        let name = name.trim().to_string();
        if !is_valid_server_name(&name) {
            return Err(ExternalAuthenticatorError::InvalidServerName(name));
        }
        if self.ldap_servers.contains_key(name.as_str()) {
            return Err(ExternalAuthenticatorError::DuplicateServerName(name));
        }
        self.ldap_servers.insert(name, verifier);
        Ok(())
    }

    pub fn set_kerberos(&mut self, verifier: Arc<dyn KerberosVerifier>) {
        self.kerberos = Some(verifier);
    }

    /// Returns sorted LDAP server names.
    pub fn ldap_server_names(&self) -> Vec<String> {
        self.ldap_servers.keys().cloned().collect()
    }

    /// Unknown servers never validate.
    pub fn check_ldap_credentials(&self, server: &str, user_name: &str, password: &str) -> bool {
        match self.ldap_servers.get(server.trim()) {
            Some(verifier) => verifier.verify(user_name, password),
            None => {
                warn!("event=ldap_check module=auth status=error error_code=unknown_server server={server}");
                false
            }
        }
    }

    /// False when no Kerberos acceptor is configured.
    pub fn check_kerberos_credentials(&self, principal: &str, realm: Option<&str>) -> bool {
        match &self.kerberos {
            Some(verifier) => verifier.verify(principal, realm),
            None => {
                warn!("event=kerberos_check module=auth status=error error_code=not_configured");
                false
            }
        }
    }
}

impl Debug for ExternalAuthenticators {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAuthenticators")
            .field("ldap_servers", &self.ldap_server_names())
            .field("kerberos", &self.kerberos.is_some())
            .finish()
    }
}

fn is_valid_server_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
}
