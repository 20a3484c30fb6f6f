use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::errors::TouristError;

/// Key the access token is persisted under.
pub const TOKEN_STORAGE_KEY: &str = "access_token";

/// Persistence for the session's bearer token.
///
/// Read once by `Session::initialize()` and written by `login()` / `logout()`.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, TouristError>;
    fn save(&self, token: &str) -> Result<(), TouristError>;
    fn clear(&self) -> Result<(), TouristError>;
}

impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    fn load(&self) -> Result<Option<String>, TouristError> {
        (**self).load()
    }

    fn save(&self, token: &str) -> Result<(), TouristError> {
        (**self).save(token)
    }

    fn clear(&self) -> Result<(), TouristError> {
        (**self).clear()
    }
}

/// Keeps the token in memory only. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `token`, as if a previous run had logged in.
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>, TouristError> {
        Ok(self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, token: &str) -> Result<(), TouristError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), TouristError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Persists keys as a JSON object in a single file, the way a browser keeps
/// `localStorage`. Only `TOKEN_STORAGE_KEY` is touched; other keys are kept.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read_contents(&self) -> Result<Option<String>, TouristError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(None),
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(TouristError::Storage(err.to_string())),
        }
    }

    fn read_entries(&self) -> Result<Map<String, Value>, TouristError> {
        match self.read_contents()? {
            Some(contents) => {
                serde_json::from_str(&contents).map_err(|err| TouristError::Storage(err.to_string()))
            }
            None => Ok(Map::new()),
        }
    }

    /// Like `read_entries`, but a file that is not a JSON object counts as empty
    /// so the next write replaces it.
    fn writable_entries(&self, contents: &str) -> Map<String, Value> {
        serde_json::from_str(contents).unwrap_or_else(|err| {
            log::warn!("replacing unreadable token file {:?}: {}", self.path, err);
            Map::new()
        })
    }

    fn write_entries(&self, entries: &Map<String, Value>) -> Result<(), TouristError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| TouristError::Storage(err.to_string()))?;
            }
        }

        let json = serde_json::to_string_pretty(entries)
            .map_err(|err| TouristError::Storage(err.to_string()))?;

        fs::write(&self.path, json).map_err(|err| TouristError::Storage(err.to_string()))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>, TouristError> {
        let token = match self.read_entries()?.remove(TOKEN_STORAGE_KEY) {
            Some(Value::String(token)) => Some(token),
            Some(other) => {
                log::warn!("ignoring non-string {} entry: {}", TOKEN_STORAGE_KEY, other);
                None
            }
            None => None,
        };

        Ok(token)
    }

    fn save(&self, token: &str) -> Result<(), TouristError> {
        let mut entries = match self.read_contents()? {
            Some(contents) => self.writable_entries(&contents),
            None => Map::new(),
        };

        entries.insert(TOKEN_STORAGE_KEY.to_string(), Value::String(token.to_string()));
        self.write_entries(&entries)
    }

    fn clear(&self) -> Result<(), TouristError> {
        let contents = match self.read_contents()? {
            Some(contents) => contents,
            None => return Ok(()),
        };

        let mut entries = self.writable_entries(&contents);
        entries.remove(TOKEN_STORAGE_KEY);
        self.write_entries(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("tourist-client-{}-{}-{}", name, std::process::id(), nanos))
            .join("storage.json")
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load().unwrap(), None);

        store.save("abc").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("abc"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let store = FileTokenStore::new(scratch_path("missing"));
        assert_eq!(store.load().unwrap(), None);
        assert!(store.clear().is_ok());
    }

    #[test]
    fn file_store_keeps_unrelated_keys() {
        let path = scratch_path("keys");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"theme":"dark"}"#).unwrap();

        let store = FileTokenStore::new(&path);
        store.save("abc").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("abc"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("theme"));
        assert!(!contents.contains(TOKEN_STORAGE_KEY));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn file_store_rejects_garbage() {
        let path = scratch_path("garbage");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        let store = FileTokenStore::new(&path);
        assert!(matches!(store.load(), Err(TouristError::Storage(_))));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn file_store_tolerates_non_string_values() {
        let path = scratch_path("values");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"theme":"dark","visits":3,"access_token":null}"#).unwrap();

        let store = FileTokenStore::new(&path);
        assert_eq!(store.load().unwrap(), None);

        store.save("abc").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("abc"));

        let contents: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(contents["visits"], 3);
        assert_eq!(contents["theme"], "dark");

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn file_store_replaces_garbage_on_write() {
        let path = scratch_path("replace");
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        fs::write(&path, "not json").unwrap();
        let store = FileTokenStore::new(&path);
        store.save("abc").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("abc"));

        fs::write(&path, r#"["access_token"]"#).unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
