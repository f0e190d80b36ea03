//! Credential validation against a user's authentication data.

use crate::auth::credentials::Credentials;
use crate::auth::external::ExternalAuthenticators;
use crate::model::user::AuthenticationData;
use subtle::ConstantTimeEq;

/// Returns whether `credentials` prove the identity described by `auth_data`.
///
/// Readiness and user-name matching are checked by the caller; this only
/// compares proof material.
pub fn are_credentials_valid(
    credentials: &Credentials,
    auth_data: &AuthenticationData,
    external_authenticators: &ExternalAuthenticators,
) -> bool {
    match (credentials, auth_data) {
        (Credentials::AlwaysAllow { .. }, _) => true,
        (Credentials::Basic { .. }, AuthenticationData::NoPassword) => true,
        (
            Credentials::Basic {
                password: Some(password),
                ..
            },
            AuthenticationData::PlaintextPassword { password: expected },
        ) => password.as_bytes().ct_eq(expected.as_bytes()).into(),
        (
            Credentials::Basic {
                user_name,
                password: Some(password),
            },
            AuthenticationData::Ldap { server },
        ) => external_authenticators.check_ldap_credentials(server, user_name, password),
        (Credentials::Kerberos { principal, .. }, AuthenticationData::Kerberos { realm }) => {
            external_authenticators.check_kerberos_credentials(principal, realm.as_deref())
        }
        (
            Credentials::SslCertificate { common_name, .. },
            AuthenticationData::SslCertificate { common_names },
        ) => common_names.contains(common_name),
        _ => false,
    }
}
