//! Manages the credentials the helper authenticates with.
//!
//! Credentials are a single JSON object mapping login names to long-lived
//! bearer tokens, with `default` as the fallback key. The file is searched
//! in canonical locations, loaded once at startup, and written back with
//! owner-only permissions since it holds secrets.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use etcetera::BaseStrategy;
use thiserror::Error;

/// The login used when a URL names none.
pub const DEFAULT_LOGIN: &str = "default";

/// The credentials file name under the git config directory.
const CONFIG_FILE: &str = "git-remote-dropbox.json";

/// The legacy dotfile fallback in the home directory.
const LEGACY_FILE: &str = ".git-remote-dropbox.json";

//================================================================================================
// Types
//================================================================================================

/// The token map backing one user's logins.
#[derive(Debug, Default)]
pub struct Credentials {
    tokens: BTreeMap<String, String>,
    path: PathBuf,
}

/// An error encountered while loading or storing credentials.
#[derive(Error, Debug)]
pub enum CredentialsError {
    /// A transparent wrapper for a [`std::io::Error`]
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// No home directory to resolve the credentials file against.
    #[error(transparent)]
    NoHome(#[from] etcetera::HomeDirError),
    /// No token stored under the requested login.
    #[error("no token for login `{0}`; run `git-dropbox-manage login` first")]
    NoToken(String),
    /// The credentials file is not a JSON object of strings.
    #[error("malformed credentials file: {0}")]
    Parse(#[from] serde_json::Error),
}

//================================================================================================
// Impls
//================================================================================================

impl Credentials {
    /// Load the first credentials file found in the canonical locations,
    /// or an empty map bound to the preferred location.
    pub fn load() -> Result<Self, CredentialsError> {
        let candidates = Self::candidates()?;
        for path in &candidates {
            if path.exists() {
                return Self::load_from(path.clone());
            }
        }
        let path = candidates
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from(LEGACY_FILE));
        Ok(Credentials {
            tokens: BTreeMap::new(),
            path,
        })
    }

    /// Load a specific credentials file.
    pub fn load_from(path: PathBuf) -> Result<Self, CredentialsError> {
        let raw = fs::read_to_string(&path)?;
        let tokens = serde_json::from_str(&raw)?;
        Ok(Credentials { tokens, path })
    }

    /// The search order: the git config directory (honoring
    /// `XDG_CONFIG_HOME`), then the legacy dotfile in the home directory.
    pub fn candidates() -> Result<Vec<PathBuf>, CredentialsError> {
        let strategy = etcetera::choose_base_strategy()?;
        Ok(vec![
            strategy.config_dir().join("git").join(CONFIG_FILE),
            strategy.home_dir().join(LEGACY_FILE),
        ])
    }

    /// The token for a login, `None` meaning the default login.
    pub fn token(&self, login: Option<&str>) -> Result<&str, CredentialsError> {
        let login = login.unwrap_or(DEFAULT_LOGIN);
        self.tokens
            .get(login)
            .map(String::as_str)
            .ok_or_else(|| CredentialsError::NoToken(login.to_owned()))
    }

    /// Store (or replace) a login's token. Call [`Credentials::save`] to
    /// persist.
    pub fn set(&mut self, login: impl Into<String>, token: impl Into<String>) {
        self.tokens.insert(login.into(), token.into());
    }

    /// Forget a login's token, reporting whether it existed.
    pub fn remove(&mut self, login: &str) -> bool {
        self.tokens.remove(login).is_some()
    }

    /// The stored login names, without their tokens.
    pub fn logins(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }

    /// Where this map is (or will be) stored.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Write the map back to its file with permissions 0600.
    pub fn save(&self) -> Result<(), CredentialsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = open_private(&self.path)?;
        let raw = serde_json::to_string_pretty(&self.tokens)?;
        file.write_all(raw.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

//================================================================================================
// Functions
//================================================================================================

#[cfg(unix)]
fn open_private(path: &std::path::Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &std::path::Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_default_lookup() -> Result<(), CredentialsError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("creds.json");

        let mut creds = Credentials {
            tokens: BTreeMap::new(),
            path: path.clone(),
        };
        creds.set(DEFAULT_LOGIN, "tok-default");
        creds.set("work", "tok-work");
        creds.save()?;

        let loaded = Credentials::load_from(path)?;
        assert_eq!(loaded.token(None)?, "tok-default");
        assert_eq!(loaded.token(Some("work"))?, "tok-work");
        assert!(matches!(
            loaded.token(Some("nope")),
            Err(CredentialsError::NoToken(_))
        ));
        assert_eq!(loaded.logins().collect::<Vec<_>>(), vec!["default", "work"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() -> Result<(), CredentialsError> {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("creds.json");
        let mut creds = Credentials {
            tokens: BTreeMap::new(),
            path: path.clone(),
        };
        creds.set(DEFAULT_LOGIN, "secret");
        creds.save()?;

        let mode = std::fs::metadata(path)?.mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }

    #[test]
    fn malformed_files_are_rejected() -> Result<(), CredentialsError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("creds.json");
        std::fs::write(&path, "[1, 2, 3]")?;
        assert!(matches!(
            Credentials::load_from(path),
            Err(CredentialsError::Parse(_))
        ));
        Ok(())
    }
}
