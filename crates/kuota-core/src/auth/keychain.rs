use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "kuota-sso";

/// OS keychain storage for the SSO account password, so it doesn't have to
/// live in the config file.
pub struct Keychain;

impl Keychain {
    /// Store the SSO password for `username` in the OS keychain
    pub fn store(username: &str, password: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, username)
            .context("Failed to create keyring entry")?;
        entry
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    pub fn get_password(username: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, username)
            .context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve password from keychain")
    }

    pub fn delete(username: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, username)
            .context("Failed to create keyring entry")?;
        entry
            .delete_credential()
            .context("Failed to delete credential from keychain")?;
        Ok(())
    }

    /// Resolve the account password: the configured value wins, the keychain
    /// is the fallback.
    pub fn resolve_password(username: &str, configured: Option<&str>) -> Result<String> {
        match configured {
            Some(password) if !password.is_empty() => Ok(password.to_string()),
            _ => Self::get_password(username).with_context(|| {
                format!("No password configured for {} and none in keychain", username)
            }),
        }
    }
}
