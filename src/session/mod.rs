//! Authenticated session state and its durable store.
//!
//! The state is an opaque credential bundle (browser cookies) captured after
//! the operator completes the interactive login. It is written atomically to
//! a user-scoped dot-directory and restored on later runs. Cookie values are
//! credential material: the `Debug` impl redacts them and nothing in this
//! crate ever logs them.

pub mod acquirer;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use acquirer::{AcquirerConfig, SessionAcquirer};

const STATE_FILE: &str = "auth_state.json";
const DEFAULT_SESSION_DIR: &str = ".callscraper";

/// One persisted cookie. Expiry is kept as a unix timestamp so the state
/// file stays a plain serde document.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub expires_unix: Option<i64>,
}

impl fmt::Debug for StoredCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCookie")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// Serialized credential bundle produced by the session acquirer.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub cookies: Vec<StoredCookie>,
    pub created_at: DateTime<Utc>,
    /// Best effort only; the site does not declare a reliable expiry.
    pub expiry_hint: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(cookies: Vec<StoredCookie>) -> Self {
        let expiry_hint = cookies
            .iter()
            .filter_map(|c| c.expires_unix)
            .min()
            .and_then(|ts| DateTime::from_timestamp(ts, 0));
        Self {
            cookies,
            created_at: Utc::now(),
            expiry_hint,
        }
    }

    /// `Set-Cookie`-shaped strings for seeding an HTTP cookie jar.
    pub fn cookie_strings(&self) -> Vec<String> {
        self.cookies
            .iter()
            .map(|c| {
                let mut s = format!("{}={}", c.name, c.value);
                if let Some(ref domain) = c.domain {
                    s.push_str("; Domain=");
                    s.push_str(domain);
                }
                s.push_str("; Path=");
                s.push_str(c.path.as_deref().unwrap_or("/"));
                if c.secure {
                    s.push_str("; Secure");
                }
                if c.http_only {
                    s.push_str("; HttpOnly");
                }
                s
            })
            .collect()
    }

    /// Whether the expiry hint (when present) has passed.
    pub fn looks_expired(&self) -> bool {
        self.expiry_hint.is_some_and(|hint| hint <= Utc::now())
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("cookies", &self.cookies.len())
            .field("created_at", &self.created_at)
            .field("expiry_hint", &self.expiry_hint)
            .finish()
    }
}

/// Durable store for [`SessionState`].
///
/// `save` is temp-then-rename so a failed write can never clobber existing
/// valid state; `load` treats a corrupt or partial file as absent.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under `~/.callscraper`, falling back to the working directory
    /// when no home is available.
    pub fn default_location() -> Self {
        let base = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(DEFAULT_SESSION_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn save(&self, state: &SessionState) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        restrict_permissions(&self.dir, 0o700)?;

        let tmp = self.dir.join(format!("{STATE_FILE}.tmp"));
        let payload = serde_json::to_vec_pretty(state)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&tmp, payload)?;
        restrict_permissions(&tmp, 0o600)?;
        fs::rename(&tmp, self.state_path())?;

        log::info!("session state saved ({} cookies)", state.cookies.len());
        Ok(())
    }

    pub fn load(&self) -> io::Result<Option<SessionState>> {
        let path = self.state_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        match serde_json::from_str::<SessionState>(&contents) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                log::warn!("session state at {path:?} unreadable, treating as absent: {err}");
                Ok(None)
            }
        }
    }

    pub fn clear(&self) -> io::Result<()> {
        for path in [self.state_path(), self.dir.join(format!("{STATE_FILE}.tmp"))] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> SessionState {
        SessionState::new(vec![StoredCookie {
            name: "machine_cookie".into(),
            value: "abc123secret".into(),
            domain: Some(".example.com".into()),
            path: Some("/".into()),
            secure: true,
            http_only: true,
            expires_unix: Some(4_102_444_800),
        }])
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session"));
        let state = sample_state();
        store.save(&state).unwrap();

        // A fresh store over the same directory simulates a process restart.
        let reloaded = SessionStore::new(dir.path().join("session"))
            .load()
            .unwrap()
            .expect("state present");
        assert_eq!(reloaded.cookies.len(), 1);
        assert_eq!(reloaded.cookies[0].value, "abc123secret");
        assert_eq!(reloaded.created_at, state.created_at);
    }

    #[test]
    fn missing_state_loads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_state_loads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join(STATE_FILE), b"{\"cookies\": [tr").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn clear_removes_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&sample_state()).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn debug_output_redacts_cookie_values() {
        let state = sample_state();
        let rendered = format!("{state:?}");
        assert!(!rendered.contains("abc123secret"));
        let cookie = format!("{:?}", state.cookies[0]);
        assert!(!cookie.contains("abc123secret"));
    }

    #[test]
    fn cookie_strings_include_attributes() {
        let strings = sample_state().cookie_strings();
        assert_eq!(strings.len(), 1);
        assert!(strings[0].starts_with("machine_cookie=abc123secret"));
        assert!(strings[0].contains("Domain=.example.com"));
        assert!(strings[0].contains("Secure"));
    }

    #[test]
    fn expiry_hint_is_earliest_cookie_expiry() {
        let mut cookies = sample_state().cookies;
        cookies.push(StoredCookie {
            name: "short".into(),
            value: "v".into(),
            domain: None,
            path: None,
            secure: false,
            http_only: false,
            expires_unix: Some(1_000),
        });
        let state = SessionState::new(cookies);
        assert_eq!(state.expiry_hint.unwrap().timestamp(), 1_000);
        assert!(state.looks_expired());
    }
}
