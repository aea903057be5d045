//! Thread-safe status storage.
//!
//! Two shared structures live here:
//!
//! - [`StatusStore`]: a general name → value mapping shared by the periodic jobs, the
//!   command dispatcher and command handlers. Every operation takes one
//!   `parking_lot::Mutex`, so single-field reads and writes are atomic and
//!   [`StatusStore::increment`] is a true read-modify-write.
//! - [`StatusDictionary`]: the alias → value mapping feeding one header-definition
//!   table. Refreshes and header builds go through the same lock discipline, so a
//!   build sees either the state before a refresh or after it, never a mix.
//!
//! No I/O and no `.await` ever happens while either lock is held.
//!
//! # Progress reporting
//!
//! Long-running commands report on a sub-tag (`"<tag>.1"`) through
//! [`SubTagProgress`]. Fields are stored under `"<tag>:<field>"` keys:
//!
//! | field        | type   | meaning                              |
//! |--------------|--------|--------------------------------------|
//! | `subpath`    | string | set on the parent tag, names sub-tag |
//! | `task_start` | float  | unix time the sub-command started    |
//! | `task_end`   | float  | unix time the sub-command finished   |
//! | `cmd_str`    | string | human-readable progress text         |
//! | `task_error` | string | failure text                         |

use crate::header::definition::HeaderDefinitionTable;
use crate::value::{StatusMap, StatusValue};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Param store key holding the status export interval in seconds.
pub const STATUS_INTERVAL: &str = "status_interval";
/// Param store key counting completed header refreshes.
pub const HEADER_REFRESH_COUNT: &str = "header_refresh_count";
/// Param store key holding the card count of the last refreshed header.
pub const HEADER_CARDS: &str = "header_cards";

/// Exported status table: liveness.
pub const EXPORT_STATUS: &str = "status";
/// Exported status table: operating mode.
pub const EXPORT_MODE: &str = "mode";
/// Exported status table: number of exports so far.
pub const EXPORT_COUNT: &str = "count";
/// Exported status table: local time of the last export.
pub const EXPORT_TIME: &str = "time";

/// Mutex-guarded name → value store.
#[derive(Debug, Default)]
pub struct StatusStore {
    inner: Mutex<StatusMap>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `values`.
    pub fn with_values(values: StatusMap) -> Self {
        Self {
            inner: Mutex::new(values),
        }
    }

    pub fn get(&self, name: &str) -> Option<StatusValue> {
        self.inner.lock().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<StatusValue>) {
        self.inner.lock().insert(name.into(), value.into());
    }

    /// Apply several fields under a single lock acquisition.
    pub fn set_many<I, K>(&self, values: I)
    where
        I: IntoIterator<Item = (K, StatusValue)>,
        K: Into<String>,
    {
        let mut guard = self.inner.lock();
        for (name, value) in values {
            guard.insert(name.into(), value);
        }
    }

    /// Atomically add `delta` to a numeric field and return the new value.
    ///
    /// An absent field starts at zero. Integer fields stay integers when `delta` is
    /// integral; anything else becomes a float. A string field that does not parse as
    /// a number is treated as zero.
    pub fn increment(&self, name: &str, delta: impl Into<StatusValue>) -> StatusValue {
        let delta = delta.into();
        let mut guard = self.inner.lock();
        let current = guard.get(name).cloned().unwrap_or(StatusValue::Int(0));
        let next = match (&current, &delta) {
            (StatusValue::Int(a), StatusValue::Int(b)) => StatusValue::Int(a.wrapping_add(*b)),
            _ => StatusValue::Float(
                current.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0),
            ),
        };
        guard.insert(name.to_string(), next.clone());
        next
    }

    pub fn remove(&self, name: &str) -> Option<StatusValue> {
        self.inner.lock().remove(name)
    }

    /// Copy of every field, taken under one lock acquisition.
    pub fn snapshot(&self) -> StatusMap {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Read one progress field reported for `tag`.
    pub fn get_tagged(&self, tag: &str, field: ProgressField) -> Option<StatusValue> {
        self.get(&field.key(tag))
    }

    /// Write several progress fields for `tag` at once.
    pub fn set_tagged<I>(&self, tag: &str, fields: I)
    where
        I: IntoIterator<Item = (ProgressField, StatusValue)>,
    {
        self.set_many(fields.into_iter().map(|(f, v)| (f.key(tag), v)));
    }
}

/// Well-known progress fields written for a (sub-)tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgressField {
    TaskStart,
    TaskEnd,
    CmdStr,
    TaskError,
    Subpath,
}

impl ProgressField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskStart => "task_start",
            Self::TaskEnd => "task_end",
            Self::CmdStr => "cmd_str",
            Self::TaskError => "task_error",
            Self::Subpath => "subpath",
        }
    }

    /// Store key for this field under `tag`.
    pub fn key(self, tag: &str) -> String {
        format!("{}:{}", tag, self.as_str())
    }
}

/// Current unix time as fractional seconds.
pub fn unix_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6
}

/// Progress reporter for one long-running command.
///
/// Creating it links the parent tag to the derived sub-tag via `subpath`; all further
/// reporting happens on the sub-tag only.
#[derive(Debug, Clone)]
pub struct SubTagProgress {
    store: Arc<StatusStore>,
    subtag: String,
}

impl SubTagProgress {
    pub fn new(store: Arc<StatusStore>, tag: &str) -> Self {
        let subtag = format!("{}.1", tag);
        store.set_tagged(
            tag,
            [(ProgressField::Subpath, StatusValue::Str(subtag.clone()))],
        );
        Self { store, subtag }
    }

    pub fn subtag(&self) -> &str {
        &self.subtag
    }

    /// Record `task_start` together with the opening progress text.
    pub fn begin(&self, cmd_str: impl Into<String>) {
        self.store.set_tagged(
            &self.subtag,
            [
                (ProgressField::TaskStart, StatusValue::Float(unix_now())),
                (ProgressField::CmdStr, StatusValue::Str(cmd_str.into())),
            ],
        );
    }

    pub fn message(&self, cmd_str: impl Into<String>) {
        self.store.set_tagged(
            &self.subtag,
            [(ProgressField::CmdStr, StatusValue::Str(cmd_str.into()))],
        );
    }

    pub fn fail(&self, error: impl Into<String>) {
        self.store.set_tagged(
            &self.subtag,
            [(ProgressField::TaskError, StatusValue::Str(error.into()))],
        );
    }

    /// Record `task_end`, optionally with closing progress text.
    pub fn finish(&self, cmd_str: Option<&str>) {
        let mut fields = vec![(ProgressField::TaskEnd, StatusValue::Float(unix_now()))];
        if let Some(text) = cmd_str {
            fields.push((ProgressField::CmdStr, StatusValue::Str(text.to_string())));
        }
        self.store.set_tagged(&self.subtag, fields);
    }
}

/// Alias → value mapping paired with one header-definition table.
#[derive(Debug, Default)]
pub struct StatusDictionary {
    inner: RwLock<StatusMap>,
}

impl StatusDictionary {
    /// One entry per non-`NA` alias of `table`, holding that entry's default.
    pub fn from_table(table: &HeaderDefinitionTable) -> Self {
        Self {
            inner: RwLock::new(table.init_status_dictionary()),
        }
    }

    pub fn get(&self, alias: &str) -> Option<StatusValue> {
        self.inner.read().get(alias).cloned()
    }

    /// Consistent copy used as the input of one header build.
    pub fn snapshot(&self) -> StatusMap {
        self.inner.read().clone()
    }

    /// Apply refreshed values. Aliases the table does not know about are ignored.
    pub fn apply(&self, refreshed: StatusMap) -> usize {
        let mut guard = self.inner.write();
        let mut applied = 0;
        for (alias, value) in refreshed {
            if let Some(slot) = guard.get_mut(&alias) {
                *slot = value;
                applied += 1;
            }
        }
        applied
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
