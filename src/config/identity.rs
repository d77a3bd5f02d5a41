use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::warn;

use crate::error::IdentityError;

const IDENTITY_FILE_NAME: &str = "user-id";

/// Supplies the user identifier of the current caller, if any.
pub trait IdentityProvider: std::fmt::Debug + Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Identity provider returning a fixed value.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
    #[must_use]
    pub fn new(user_id: Option<String>) -> Self {
        Self(user_id)
    }

    /// Identity provider for a caller that is not signed in.
    #[must_use]
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Caller identity persisted as a single line in the user's config directory.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    /// Opens the store at `path`, or at the platform default location.
    ///
    /// # Errors
    ///
    /// Returns an error when no path is given and the platform has no
    /// configuration directory.
    pub fn open(path: Option<PathBuf>) -> Result<Self, IdentityError> {
        let path = match path {
            Some(path) => path,
            None => default_identity_path().ok_or(IdentityError::NoConfigDirectory)?,
        };
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored user identifier.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or holds an invalid record.
    pub fn load(&self) -> Result<Option<String>, IdentityError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(IdentityError::Io { source }),
        };

        let value = raw.trim();
        if value.is_empty() {
            return Ok(None);
        }
        validate_user_id(value).map(Some)
    }

    /// Persists `user_id`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error when the identifier is invalid or cannot be written.
    pub fn save(&self, user_id: &str) -> Result<String, IdentityError> {
        let user_id = validate_user_id(user_id.trim())?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| IdentityError::Io { source })?;
        }
        fs::write(&self.path, format!("{user_id}\n"))
            .map_err(|source| IdentityError::Io { source })?;
        Ok(user_id)
    }

    /// Removes the stored identifier. Returns `false` when nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be removed.
    pub fn clear(&self) -> Result<bool, IdentityError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(IdentityError::Io { source }),
        }
    }
}

impl IdentityProvider for IdentityStore {
    fn current_user_id(&self) -> Option<String> {
        match self.load() {
            Ok(user_id) => user_id,
            Err(error) => {
                warn!(%error, path = %self.path.display(), "ignoring unreadable identity file");
                None
            }
        }
    }
}

fn validate_user_id(value: &str) -> Result<String, IdentityError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(IdentityError::InvalidUserId {
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

fn default_identity_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "devinfo", "devinfo")
        .map(|project_dirs| project_dirs.config_dir().join(IDENTITY_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn unique_temp_path(name: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after unix epoch")
            .as_nanos();
        std::env::temp_dir()
            .join(format!("devinfo-{name}-{suffix}"))
            .join(IDENTITY_FILE_NAME)
    }

    #[test]
    fn store_round_trips_user_id() {
        let store = IdentityStore::open(Some(unique_temp_path("identity")))
            .expect("explicit path should open");

        assert_eq!(None, store.load().expect("missing file reads as empty"));
        assert_eq!(
            "U2",
            store.save("  U2\n").expect("valid id should be stored")
        );
        assert_eq!(Some("U2".to_string()), store.current_user_id());

        assert!(store.clear().expect("stored file should be removable"));
        assert!(!store.clear().expect("second clear should be a no-op"));
        assert_eq!(None, store.current_user_id());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("U 1")]
    fn store_rejects_invalid_user_ids(#[case] value: &str) {
        let store = IdentityStore::open(Some(unique_temp_path("identity-invalid")))
            .expect("explicit path should open");

        assert_matches!(store.save(value), Err(IdentityError::InvalidUserId { .. }));
    }

    #[test]
    fn unreadable_record_is_treated_as_anonymous() {
        let path = unique_temp_path("identity-corrupt");
        let parent = path.parent().expect("temp path should have a parent");
        fs::create_dir_all(parent).expect("temp dir should be creatable");
        fs::write(&path, "U1 U2\n").expect("fixture should write");
        let store = IdentityStore::open(Some(path.clone())).expect("explicit path should open");

        assert_matches!(store.load(), Err(IdentityError::InvalidUserId { .. }));
        assert_eq!(None, store.current_user_id());

        fs::remove_dir_all(parent).expect("temp dir should be removable");
    }

    #[test]
    fn static_identity_returns_its_value() {
        assert_eq!(
            Some("U1".to_string()),
            StaticIdentity::new(Some("U1".to_string())).current_user_id()
        );
        assert_eq!(None, StaticIdentity::anonymous().current_user_id());
    }
}
