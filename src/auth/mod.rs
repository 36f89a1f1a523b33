// Authentication module
// Manages the credential lifecycle and its durable store

mod credentials;
mod manager;
mod refresh;
mod types;

pub use credentials::{CredentialStore, EnvFileStore, SqliteStore, SQLITE_TOKEN_KEY};
pub use manager::{AccessToken, AuthManager};
pub use types::{Credential, Grant, StoredTokens, TokenData};

#[cfg(any(test, feature = "test-utils"))]
pub use credentials::MemoryStore;
