//! Login credentials presented by a client.

use std::fmt::{Debug, Formatter};

/// Claimed user name plus proof material.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// User name and password. Ready once a password was supplied.
    Basic {
        user_name: String,
        password: Option<String>,
    },
    /// Client certificate already verified by the transport layer.
    SslCertificate {
        user_name: String,
        common_name: String,
    },
    /// Principal accepted by the Kerberos acceptor. Ready once non-empty.
    Kerberos { user_name: String, principal: String },
    /// Trusted internal caller; always valid for the claimed user.
    AlwaysAllow { user_name: String },
}

impl Credentials {
    pub fn basic(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            user_name: user_name.into(),
            password: Some(password.into()),
        }
    }

    /// Basic credentials with no password supplied yet.
    pub fn incomplete(user_name: impl Into<String>) -> Self {
        Self::Basic {
            user_name: user_name.into(),
            password: None,
        }
    }

    pub fn user_name(&self) -> &str {
        match self {
            Self::Basic { user_name, .. }
            | Self::SslCertificate { user_name, .. }
            | Self::Kerberos { user_name, .. }
            | Self::AlwaysAllow { user_name } => user_name,
        }
    }

    /// Whether enough material was supplied to attempt validation.
    pub fn is_ready(&self) -> bool {
        match self {
            Self::Basic { password, .. } => password.is_some(),
            Self::Kerberos { principal, .. } => !principal.is_empty(),
            Self::SslCertificate { .. } | Self::AlwaysAllow { .. } => true,
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic {
                user_name,
                password,
            } => f
                .debug_struct("Basic")
                .field("user_name", user_name)
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::SslCertificate {
                user_name,
                common_name,
            } => f
                .debug_struct("SslCertificate")
                .field("user_name", user_name)
                .field("common_name", common_name)
                .finish(),
            Self::Kerberos {
                user_name,
                principal,
            } => f
                .debug_struct("Kerberos")
                .field("user_name", user_name)
                .field("principal", principal)
                .finish(),
            Self::AlwaysAllow { user_name } => f
                .debug_struct("AlwaysAllow")
                .field("user_name", user_name)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Credentials;

    #[test]
    fn readiness_depends_on_supplied_material() {
        assert!(Credentials::basic("alice", "pw").is_ready());
        assert!(!Credentials::incomplete("alice").is_ready());
        assert!(!Credentials::Kerberos {
            user_name: "alice".to_string(),
            principal: String::new(),
        }
        .is_ready());
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::basic("alice", "s3cret"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("s3cret"));
    }
}
