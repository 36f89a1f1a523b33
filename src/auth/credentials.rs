// Durable credential stores (dotenv file or SQLite)

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::types::{Credential, StoredTokens};

const ACCESS_TOKEN_KEY: &str = "ACCESS_TOKEN";
const REFRESH_TOKEN_KEY: &str = "REFRESH_TOKEN";

/// SQLite key holding the token JSON
pub const SQLITE_TOKEN_KEY: &str = "qbo:oauth:token";

/// Persisted copy of the live credential
///
/// Read once at startup and written after every successful exchange.
/// Writes are synchronous; callers treat failures as best-effort.
pub trait CredentialStore: Send + Sync {
    /// Read stored tokens, `None` when nothing has been stored yet
    fn load(&self) -> Result<Option<StoredTokens>>;

    /// Persist the tokens of `creds`
    fn save(&self, creds: &Credential) -> Result<()>;

    /// Human readable location for logs
    fn describe(&self) -> String;
}

/// Dotenv file store
///
/// Rewrites the `ACCESS_TOKEN=` and `REFRESH_TOKEN=` lines in place and keeps
/// every other line untouched. A missing file is never created.
pub struct EnvFileStore {
    path: PathBuf,
}

impl EnvFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for EnvFileStore {
    fn load(&self) -> Result<Option<StoredTokens>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut stored = StoredTokens::default();
        let iter = dotenvy::from_path_iter(&self.path)
            .with_context(|| format!("Failed to open env file: {}", self.path.display()))?;
        for item in iter {
            let (key, value) = item
                .with_context(|| format!("Failed to parse env file: {}", self.path.display()))?;
            match key.as_str() {
                ACCESS_TOKEN_KEY => stored.access_token = value,
                REFRESH_TOKEN_KEY => stored.refresh_token = value,
                _ => {}
            }
        }

        if stored.access_token.is_empty() && stored.refresh_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(stored))
    }

    fn save(&self, creds: &Credential) -> Result<()> {
        if !self.path.exists() {
            tracing::info!(
                "Env file {} does not exist, skipping token write-back",
                self.path.display()
            );
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read env file: {}", self.path.display()))?;
        let updated = rewrite_env(&content, &creds.access_token, &creds.refresh_token);
        std::fs::write(&self.path, updated)
            .with_context(|| format!("Failed to write env file: {}", self.path.display()))?;

        tracing::info!("Wrote new tokens to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("env file {}", self.path.display())
    }
}

/// Replace token lines, appending keys that were not present
fn rewrite_env(content: &str, access_token: &str, refresh_token: &str) -> String {
    let mut out = String::with_capacity(content.len() + 64);
    let mut wrote_access = false;
    let mut wrote_refresh = false;

    for line in content.lines() {
        if line.starts_with("ACCESS_TOKEN=") {
            out.push_str(&format!("{}={}\n", ACCESS_TOKEN_KEY, access_token));
            wrote_access = true;
        } else if line.starts_with("REFRESH_TOKEN=") {
            out.push_str(&format!("{}={}\n", REFRESH_TOKEN_KEY, refresh_token));
            wrote_refresh = true;
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    if !wrote_access {
        out.push_str(&format!("{}={}\n", ACCESS_TOKEN_KEY, access_token));
    }
    if !wrote_refresh {
        out.push_str(&format!("{}={}\n", REFRESH_TOKEN_KEY, refresh_token));
    }
    out
}

/// SQLite store using an `auth_kv` key/value table
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(path: &Path) -> Result<rusqlite::Connection> {
        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;
        Ok(conn)
    }
}

impl CredentialStore for SqliteStore {
    fn load(&self) -> Result<Option<StoredTokens>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let conn = Self::open(&self.path)?;
        let token_json: Option<String> = match conn.query_row(
            "SELECT value FROM auth_kv WHERE key = ?",
            [SQLITE_TOKEN_KEY],
            |row| row.get(0),
        ) {
            Ok(value) => Some(value),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e).context("Failed to load token data from SQLite"),
        };

        token_json
            .map(|json| {
                serde_json::from_str::<StoredTokens>(&json)
                    .context("Failed to parse token data from SQLite")
            })
            .transpose()
    }

    fn save(&self, creds: &Credential) -> Result<()> {
        let conn = Self::open(&self.path)?;
        let json = serde_json::to_string(&StoredTokens::from(creds))
            .context("Failed to serialize token data")?;

        conn.execute(
            "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![SQLITE_TOKEN_KEY, json],
        )
        .context("Failed to write token data to SQLite")?;

        tracing::debug!("Wrote new tokens to SQLite: {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite {}", self.path.display())
    }
}

/// In-memory store for tests
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct MemoryStore {
    saved: std::sync::Mutex<Option<StoredTokens>>,
    fail_saves: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds `tokens`
    pub fn with_tokens(tokens: StoredTokens) -> Self {
        let store = Self::default();
        *store.saved.lock().unwrap() = Some(tokens);
        store
    }

    /// Make every subsequent save fail
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn saved(&self) -> Option<StoredTokens> {
        self.saved.lock().unwrap().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<Option<StoredTokens>> {
        Ok(self.saved())
    }

    fn save(&self, creds: &Credential) -> Result<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("memory store configured to fail");
        }
        *self.saved.lock().unwrap() = Some(StoredTokens::from(creds));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
