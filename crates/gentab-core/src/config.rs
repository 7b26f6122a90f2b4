use std::time::Duration;

use gentab_types::IntegerMode;
use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};

/// Options for [`Session::open`](crate::Session::open).
///
/// Deserializable from any serde format; omitted fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Open the database read-only.
    pub readonly: bool,
    /// Fail instead of creating the database file.
    pub must_exist: bool,
    /// How long to wait on a locked database, in milliseconds.
    pub timeout_ms: u64,
    /// Default integer presentation for statements and tables.
    pub integer_mode: IntegerMode,
    /// Allow writes while iterators are open and disable defensive mode.
    pub unsafe_mode: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            readonly: false,
            must_exist: false,
            timeout_ms: 5000,
            integer_mode: IntegerMode::Loose,
            unsafe_mode: false,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn open_flags(&self) -> OpenFlags {
        let access = if self.readonly {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else if self.must_exist {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };
        access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
    }
}
