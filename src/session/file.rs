//! JSON-file session store.
//!
//! State is written to `$XDG_CONFIG_HOME/commons-mwapi/session.json` (or
//! `~/.config/commons-mwapi/session.json`) by default. Every write replaces
//! the file atomically via a temp file and rename.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use super::{SessionStore, SessionStoreError};

const SESSION_FILE_NAME: &str = "session.json";
const CONFIG_DIR_NAME: &str = "commons-mwapi";

/// Returns the default session file path.
///
/// # Errors
///
/// Returns [`SessionStoreError::ConfigDirUnavailable`] if no usable config dir is found.
pub fn default_session_path() -> Result<PathBuf, SessionStoreError> {
    resolve_config_dir(
        sanitize_env_path(env::var_os("XDG_CONFIG_HOME")),
        sanitize_env_path(env::var_os("HOME")),
        sanitize_env_path(env::var_os("APPDATA")),
    )
    .map(|dir| dir.join(SESSION_FILE_NAME))
}

/// Durable [`SessionStore`] backed by a JSON document.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl FileSessionStore {
    /// Opens the store at the default location.
    ///
    /// # Errors
    ///
    /// See [`FileSessionStore::open`].
    pub fn open_default() -> Result<Self, SessionStoreError> {
        Self::open(default_session_path()?)
    }

    /// Opens (or lazily creates) the store at `path`.
    ///
    /// A corrupt document is logged and treated as empty so a damaged file
    /// cannot lock the user out; it is overwritten by the next write.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError::Io`] when an existing file cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionStoreError> {
        let path = path.into();
        let values: BTreeMap<String, Value> = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str(&raw) {
                Ok(values) => values,
                Err(error) => {
                    warn!(path = %path.display(), %error, "Session file is corrupt; starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), keys = values.len(), "Opened session store");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, Value>),
    ) -> Result<(), SessionStoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut values);
        write_atomically(&self.path, &serde_json::to_vec_pretty(&*values)?)
    }

    fn read(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl SessionStore for FileSessionStore {
    fn get_bool(&self, key: &str) -> bool {
        self.read(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<(), SessionStoreError> {
        self.update(|values| {
            values.insert(key.to_string(), Value::Bool(value));
        })
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.read(key).and_then(|v| v.as_str().map(str::to_string))
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        self.update(|values| {
            values.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> Result<(), SessionStoreError> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), SessionStoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut temp_name = path.file_name().map(OsString::from).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    fs::write(&temp_path, bytes)?;
    // The document holds a live session cookie
    set_owner_only_permissions(&temp_path)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), SessionStoreError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), SessionStoreError> {
    Ok(())
}

fn sanitize_env_path(value: Option<OsString>) -> Option<PathBuf> {
    let value = value?;
    if value.to_string_lossy().trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(value))
}

fn resolve_config_dir(
    xdg_config_home: Option<PathBuf>,
    home: Option<PathBuf>,
    app_data: Option<PathBuf>,
) -> Result<PathBuf, SessionStoreError> {
    if let Some(xdg) = xdg_config_home {
        return Ok(xdg.join(CONFIG_DIR_NAME));
    }
    if let Some(home) = home {
        return Ok(home.join(".config").join(CONFIG_DIR_NAME));
    }
    if let Some(app_data) = app_data {
        return Ok(app_data.join(CONFIG_DIR_NAME));
    }
    Err(SessionStoreError::ConfigDirUnavailable)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::{KEY_AUTH_COOKIE, KEY_IS_USER_LOGGED_IN, SessionState};
    use tempfile::TempDir;

    #[test]
    fn test_state_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("session.json");

        let store = FileSessionStore::open(&path).unwrap();
        store.put_bool(KEY_IS_USER_LOGGED_IN, true).unwrap();
        store.put_string(KEY_AUTH_COOKIE, "session=abc").unwrap();
        drop(store);

        let reopened = FileSessionStore::open(&path).unwrap();
        assert_eq!(
            SessionState::load(&reopened),
            SessionState {
                is_logged_in: true,
                auth_cookie: Some("session=abc".to_string()),
            }
        );
    }

    #[test]
    fn test_remove_is_persisted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("session.json");
        let store = FileSessionStore::open(&path).unwrap();
        store.put_string(KEY_AUTH_COOKIE, "session=abc").unwrap();
        store.remove(KEY_AUTH_COOKIE).unwrap();

        let reopened = FileSessionStore::open(&path).unwrap();
        assert_eq!(reopened.get_string(KEY_AUTH_COOKIE), None);
        assert!(!path.with_file_name("session.json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_store_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("session.json");
        fs::write(&path, b"{}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileSessionStore::open(&path).unwrap();
        store
            .put_string(KEY_AUTH_COOKIE, "commonswikiSession=secret")
            .unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_corrupt_file_opens_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("session.json");
        fs::write(&path, b"{not json").unwrap();

        let store = FileSessionStore::open(&path).unwrap();
        assert!(!store.get_bool(KEY_IS_USER_LOGGED_IN));
        store.put_bool(KEY_IS_USER_LOGGED_IN, true).unwrap();
        assert!(FileSessionStore::open(&path).unwrap().get_bool(KEY_IS_USER_LOGGED_IN));
    }

    #[test]
    fn test_resolve_config_dir_precedence() {
        let dir = resolve_config_dir(
            Some(PathBuf::from("/xdg")),
            Some(PathBuf::from("/home/u")),
            None,
        )
        .unwrap();
        assert_eq!(dir, PathBuf::from("/xdg/commons-mwapi"));

        let dir = resolve_config_dir(None, Some(PathBuf::from("/home/u")), None).unwrap();
        assert_eq!(dir, PathBuf::from("/home/u/.config/commons-mwapi"));

        assert!(matches!(
            resolve_config_dir(None, None, None),
            Err(SessionStoreError::ConfigDirUnavailable)
        ));
    }
}
