//! Authentication collaborators used by `AccessStorage::login`.
//!
//! # Responsibility
//! - Model the credentials a client presents.
//! - Validate credentials against a user's authentication data, delegating
//!   directory and Kerberos checks to registered external authenticators.

pub mod authentication;
pub mod credentials;
pub mod external;
