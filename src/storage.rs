//! Terminal credential storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the kernel keyring. The engine only reads these as a
//! fallback when the environment does not supply credentials.

use keyring::Entry;
use tracing::{info, warn};

use crate::api::{normalize_admin_url, ConnectionString};

const SERVICE_NAME: &str = "the-small-pos";

pub const KEY_ADMIN_URL: &str = "admin_dashboard_url";
pub const KEY_API_KEY: &str = "pos_api_key";
pub const KEY_TERMINAL_ID: &str = "terminal_id";

const ALL_KEYS: &[&str] = &[KEY_ADMIN_URL, KEY_API_KEY, KEY_TERMINAL_ID];

/// Retrieve a single credential. Returns `None` when the entry does not
/// exist or the platform store fails.
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) if !pw.trim().is_empty() => Some(pw),
        Ok(_) | Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential. Silently succeeds if the entry does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Admin URL and API key are both present.
pub fn is_configured() -> bool {
    get_credential(KEY_ADMIN_URL).is_some() && get_credential(KEY_API_KEY).is_some()
}

/// Store terminal credentials from an onboarding connection string (or a
/// plain API key plus explicit URL).
pub fn store_terminal_credentials(
    raw_api_key: &str,
    admin_url: Option<&str>,
    terminal_id: Option<&str>,
) -> Result<(), String> {
    let decoded = ConnectionString::parse(raw_api_key).unwrap_or_default();
    let api_key = decoded
        .api_key
        .unwrap_or_else(|| raw_api_key.trim().to_string());
    if api_key.is_empty() {
        return Err("Missing required field: apiKey".into());
    }
    let admin_url = decoded
        .admin_url
        .or_else(|| admin_url.map(normalize_admin_url))
        .filter(|u| !u.is_empty())
        .ok_or("Missing required field: adminUrl")?;

    set_credential(KEY_API_KEY, &api_key)?;
    set_credential(KEY_ADMIN_URL, &admin_url)?;
    if let Some(tid) = decoded
        .terminal_id
        .or_else(|| terminal_id.map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
    {
        set_credential(KEY_TERMINAL_ID, &tid)?;
    }
    info!(admin_url = %admin_url, "terminal credentials stored");
    Ok(())
}

/// Delete every stored credential.
pub fn clear_terminal_credentials() -> Result<(), String> {
    info!("deleting stored terminal credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}
