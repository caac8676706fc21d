//! Connection strings
//!
//! Accepts either a bare path (`/var/lib/wolfmembership/membership.db`,
//! `:memory:`) or `key=value` pairs separated by `;`:
//!
//! - `Filename` / `Data Source`: database file path
//! - `Timeout`: busy timeout in milliseconds while another connection holds the file lock
//! - `ReadOnly`: open without write access (`true` / `false`)

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

const MEMORY_LOCATION: &str = ":memory:";

const FILENAME_KEYS: &[&str] = &["filename", "data source", "datasource"];
const TIMEOUT_KEYS: &[&str] = &["timeout", "busy timeout"];
const READ_ONLY_KEYS: &[&str] = &["readonly", "read only"];

/// Default busy timeout
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// On-disk file
    File(PathBuf),
    /// Private in-memory database
    Memory,
}

impl std::fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreLocation::File(path) => write!(f, "{}", path.display()),
            StoreLocation::Memory => write!(f, "{}", MEMORY_LOCATION),
        }
    }
}

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub location: StoreLocation,
    pub busy_timeout: Duration,
    pub read_only: bool,
}

impl ConnectionString {
    /// Parse a connection string
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("connection string is required".into()));
        }

        if !has_known_key(s) {
            return Ok(Self {
                location: location_from(s),
                busy_timeout: DEFAULT_BUSY_TIMEOUT,
                read_only: false,
            });
        }

        let mut location = None;
        let mut busy_timeout = DEFAULT_BUSY_TIMEOUT;
        let mut read_only = false;

        for pair in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("connection string segment '{}' is not key=value", pair)))?;
            let value = value.trim();

            match normalize_key(key).as_str() {
                k if FILENAME_KEYS.contains(&k) => {
                    if value.is_empty() {
                        return Err(Error::Config("connection string Filename cannot be empty".into()));
                    }
                    location = Some(location_from(value));
                }
                k if TIMEOUT_KEYS.contains(&k) => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid Timeout '{}': expected milliseconds", value)))?;
                    busy_timeout = Duration::from_millis(ms);
                }
                k if READ_ONLY_KEYS.contains(&k) => {
                    read_only = value
                        .to_ascii_lowercase()
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid ReadOnly '{}': expected true or false", value)))?;
                }
                other => {
                    tracing::warn!("Ignoring unsupported connection string key '{}'", other);
                }
            }
        }

        let location = location
            .ok_or_else(|| Error::Config("connection string has no Filename".into()))?;

        // A fresh in-memory database has no tables for a reader to see
        if read_only && location == StoreLocation::Memory {
            return Err(Error::Config("ReadOnly cannot be used with :memory:".into()));
        }

        Ok(Self {
            location,
            busy_timeout,
            read_only,
        })
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

// Bare paths may contain '=' themselves; only a recognised key switches to pairs
fn has_known_key(s: &str) -> bool {
    s.split(';').any(|segment| {
        segment.split_once('=').map_or(false, |(key, _)| {
            let key = normalize_key(key);
            [FILENAME_KEYS, TIMEOUT_KEYS, READ_ONLY_KEYS]
                .iter()
                .any(|keys| keys.contains(&key.as_str()))
        })
    })
}

fn location_from(value: &str) -> StoreLocation {
    if value == MEMORY_LOCATION {
        StoreLocation::Memory
    } else {
        StoreLocation::File(PathBuf::from(value))
    }
}
