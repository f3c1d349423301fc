//! Local persistence. The only user data kept on disk is the credentials
//! cache.

pub mod credentials;

pub use credentials::{Credentials, CredentialsFile, CredentialsStore};

/// Default location of the credentials cache.
pub fn default_credentials_store() -> Option<CredentialsStore> {
    crate::config::default_config_dir().map(|dir| CredentialsStore::in_dir(&dir))
}
