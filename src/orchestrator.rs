//! Boundary to the external orchestration layer.
//!
//! The personality never talks to the observatory control system directly; it goes
//! through [`Orchestrator`], which supplies live status values and frame identifiers,
//! receives exported status and can be asked to shut the process down.
//!
//! [`LocalOrchestrator`] is an in-process stand-in used by the binary when no control
//! system is attached, and by the tests.

use crate::error::{AppResult, PersonalityError};
use crate::value::{StatusMap, StatusValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::info;

/// Services the personality requires from the orchestration layer.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Return `request` with every key the status source knows refreshed to its live
    /// value. Unknown keys keep the value they were sent with.
    async fn request_status(&self, request: StatusMap) -> AppResult<StatusMap>;

    /// Publish the personality's own status table.
    async fn export_status(&self, table: &StatusMap) -> AppResult<()>;

    /// Allocate `count` frame identifiers of `frame_type`.
    async fn get_frames(&self, count: u32, frame_type: &str) -> AppResult<Vec<String>>;

    /// Ask the orchestration layer to terminate the process with `code`.
    fn shutdown(&self, code: i32);
}

/// Largest frame number that fits the 8-digit field of a frame id.
pub const MAX_FRAME_NUMBER: u64 = 99_999_999;

/// In-memory orchestrator.
pub struct LocalOrchestrator {
    instrument_code: String,
    live: Mutex<StatusMap>,
    last_export: Mutex<Option<StatusMap>>,
    export_count: AtomicU64,
    next_frame: AtomicU64,
    shutdown_tx: watch::Sender<Option<i32>>,
}

impl LocalOrchestrator {
    /// `instrument_code` prefixes frame identifiers (e.g. `CRS`).
    pub fn new(instrument_code: impl Into<String>) -> Self {
        let (shutdown_tx, _) = watch::channel(None);
        Self {
            instrument_code: instrument_code.into(),
            live: Mutex::new(StatusMap::new()),
            last_export: Mutex::new(None),
            export_count: AtomicU64::new(0),
            next_frame: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Continue frame numbering at `next` instead of 1.
    pub fn starting_at_frame(self, next: u64) -> Self {
        self.next_frame.store(next, Ordering::SeqCst);
        self
    }

    /// Set the live value reported for `alias`.
    pub fn set_live(&self, alias: impl Into<String>, value: impl Into<StatusValue>) {
        self.live.lock().insert(alias.into(), value.into());
    }

    pub fn export_count(&self) -> u64 {
        self.export_count.load(Ordering::SeqCst)
    }

    pub fn last_export(&self) -> Option<StatusMap> {
        self.last_export.lock().clone()
    }

    /// Receiver that observes the exit code once shutdown has been requested.
    pub fn shutdown_requested(&self) -> watch::Receiver<Option<i32>> {
        self.shutdown_tx.subscribe()
    }
}

#[async_trait]
impl Orchestrator for LocalOrchestrator {
    async fn request_status(&self, mut request: StatusMap) -> AppResult<StatusMap> {
        let live = self.live.lock();
        for (alias, value) in request.iter_mut() {
            if let Some(current) = live.get(alias) {
                *value = current.clone();
            }
        }
        Ok(request)
    }

    async fn export_status(&self, table: &StatusMap) -> AppResult<()> {
        *self.last_export.lock() = Some(table.clone());
        self.export_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_frames(&self, count: u32, frame_type: &str) -> AppResult<Vec<String>> {
        if count == 0 {
            return Err(PersonalityError::invalid_argument("num", "must be at least 1"));
        }
        let kind = frame_type.chars().next().unwrap_or('A');
        let first = self
            .next_frame
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                next.checked_add(u64::from(count))
                    .filter(|end| *end - 1 <= MAX_FRAME_NUMBER)
            })
            .map_err(|next| {
                PersonalityError::Orchestrator(format!(
                    "frame counter exhausted: {} frames from {} exceed {}",
                    count, next, MAX_FRAME_NUMBER
                ))
            })?;
        Ok((first..first + u64::from(count))
            .map(|n| format!("{:.3}{}{:08}", self.instrument_code, kind, n))
            .collect())
    }

    fn shutdown(&self, code: i32) {
        info!("Shutdown requested with code {}", code);
        self.shutdown_tx.send_replace(Some(code));
    }
}
