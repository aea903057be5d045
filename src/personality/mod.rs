//! The instrument personality façade.
//!
//! [`Personality`] is constructed once at startup and owns every piece of shared
//! state: the three status stores, both header-definition tables with their status
//! dictionaries, the orchestrator handle and the background task scheduler. Commands
//! reach it through the [`CommandDispatcher`] built in [`Personality::new`]; header
//! queries reach it through the [`QueryServer`] started by [`Personality::start`].
//!
//! ## Background jobs
//!
//! | job              | interval                         | effect                           |
//! |------------------|----------------------------------|----------------------------------|
//! | `putstatus`      | `status.interval`                | bump `count`/`time`, export      |
//! | `header_refresh` | `status.header_refresh_interval` | refresh dictionaries, build      |
//! | `query_server`   | accept poll                      | answer `hdr`/`seqno` requests    |

mod commands;

use crate::config::Settings;
use crate::dispatch::{CommandDispatcher, Reply};
use crate::error::{AppResult, PersonalityError};
use crate::header::{
    build, AssembledHeader, BuildOptions, HeaderDefinitionTable, HeaderSource, RequestContext,
};
use crate::orchestrator::Orchestrator;
use crate::scheduler::{task_action, PeriodicTaskScheduler};
use crate::server::{unsupported_reply, QueryHandler, QueryRequest, QueryServer};
use crate::status::{
    StatusDictionary, StatusStore, EXPORT_COUNT, EXPORT_MODE, EXPORT_STATUS, EXPORT_TIME,
    HEADER_CARDS, HEADER_REFRESH_COUNT, STATUS_INTERVAL,
};
use crate::value::{StatusMap, StatusValue};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Frame id, mode and exposure used by the periodic header refresh.
const REFRESH_FRAME_ID: i64 = 9999;
const REFRESH_MODE: &str = "1";
const REFRESH_EXPOSURE_SECONDS: f64 = 4.5;

/// State shared by the façade, its command handlers and its background jobs.
pub struct PersonalityState {
    settings: Settings,
    params: StatusStore,
    status_table: StatusStore,
    progress: Arc<StatusStore>,
    telescope: HeaderDefinitionTable,
    auxiliary: HeaderDefinitionTable,
    telescope_status: StatusDictionary,
    auxiliary_status: StatusDictionary,
    orchestrator: Arc<dyn Orchestrator>,
    scheduler: PeriodicTaskScheduler,
    running: AtomicBool,
    query_addr: Mutex<Option<SocketAddr>>,
}

pub struct Personality {
    state: Arc<PersonalityState>,
    dispatcher: CommandDispatcher,
}

impl Personality {
    /// Load both header-definition tables named in `settings` and build the façade.
    ///
    /// A missing or malformed definition file is fatal.
    pub fn new(settings: Settings, orchestrator: Arc<dyn Orchestrator>) -> AppResult<Self> {
        let telescope = HeaderDefinitionTable::load(&settings.header.telescope_definitions)?;
        let auxiliary = HeaderDefinitionTable::load(&settings.header.auxiliary_definitions)?;
        Ok(Self::with_tables(settings, telescope, auxiliary, orchestrator))
    }

    /// Build the façade from already loaded tables.
    pub fn with_tables(
        settings: Settings,
        telescope: HeaderDefinitionTable,
        auxiliary: HeaderDefinitionTable,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        let params = StatusStore::new();
        params.set(STATUS_INTERVAL, settings.status.interval.as_secs_f64());
        params.set(HEADER_REFRESH_COUNT, 0i64);

        let status_table = StatusStore::new();
        status_table.set_many([
            (EXPORT_STATUS, StatusValue::from("ALIVE")),
            (EXPORT_MODE, StatusValue::from("LOCAL")),
            (EXPORT_COUNT, StatusValue::Int(0)),
        ]);

        info!(
            "{}: {} telescope and {} auxiliary header fields",
            settings.application.name,
            telescope.len(),
            auxiliary.len()
        );

        let state = Arc::new(PersonalityState {
            telescope_status: StatusDictionary::from_table(&telescope),
            auxiliary_status: StatusDictionary::from_table(&auxiliary),
            settings,
            params,
            status_table,
            progress: Arc::new(StatusStore::new()),
            telescope,
            auxiliary,
            orchestrator,
            scheduler: PeriodicTaskScheduler::new(),
            running: AtomicBool::new(false),
            query_addr: Mutex::new(None),
        });

        let mut dispatcher = CommandDispatcher::new();
        commands::register_all(&mut dispatcher, &state);

        Self { state, dispatcher }
    }

    pub fn state(&self) -> &Arc<PersonalityState> {
        &self.state
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Invoke the command registered under `name` on behalf of `tag`.
    pub async fn dispatch(
        &self,
        tag: &str,
        name: &str,
        args: Vec<StatusValue>,
        kwargs: StatusMap,
    ) -> AppResult<Reply> {
        self.dispatcher.dispatch(tag, name, args, kwargs).await
    }

    pub async fn start(&self) -> AppResult<()> {
        self.state.start().await
    }

    pub async fn stop(&self) -> AppResult<()> {
        self.state.stop().await
    }

    pub async fn power_loss_shutdown(&self) -> AppResult<()> {
        self.state.power_loss_shutdown().await
    }
}

impl PersonalityState {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Operational parameters (`status_interval`, header refresh counters).
    pub fn params(&self) -> &StatusStore {
        &self.params
    }

    /// The exported status table (`status`, `mode`, `count`, `time`).
    pub fn status_table(&self) -> &StatusStore {
        &self.status_table
    }

    /// Per-tag command progress read by the orchestration layer.
    pub fn progress(&self) -> &Arc<StatusStore> {
        &self.progress
    }

    pub fn telescope_status(&self) -> &StatusDictionary {
        &self.telescope_status
    }

    pub fn auxiliary_status(&self) -> &StatusDictionary {
        &self.auxiliary_status
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the query server is bound to while running.
    pub fn query_addr(&self) -> Option<SocketAddr> {
        *self.query_addr.lock()
    }

    /// Start the periodic jobs and the query server. Calling it while running is a no-op.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let interval = self
            .params
            .get(STATUS_INTERVAL)
            .and_then(|v| v.as_f64())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map_or(self.settings.status.interval, Duration::from_secs_f64);
        let state = Arc::clone(self);
        let putstatus = task_action(move || {
            let state = Arc::clone(&state);
            async move { state.putstatus().await.map_err(anyhow::Error::from) }
        });
        self.scheduler.schedule("putstatus", interval, putstatus);

        let refresh_interval = self.settings.status.header_refresh_interval;
        if refresh_interval.is_zero() {
            info!("Header refresh disabled");
        } else {
            let state = Arc::clone(self);
            let refresh = task_action(move || {
                let state = Arc::clone(&state);
                async move { state.update_header_stat().await.map_err(anyhow::Error::from) }
            });
            self.scheduler.schedule("header_refresh", refresh_interval, refresh);
        }

        if self.settings.query_server.enabled {
            let handler: Arc<dyn QueryHandler> = Arc::clone(self) as Arc<dyn QueryHandler>;
            let server = match QueryServer::bind(&self.settings.query_server, handler).await {
                Ok(server) => server,
                Err(e) => {
                    self.stop().await.ok();
                    return Err(e);
                }
            };
            *self.query_addr.lock() = Some(server.local_addr()?);
            self.scheduler
                .spawn("query_server", move |stop_rx| server.serve(stop_rx));
        }

        info!("{} started", self.settings.application.name);
        Ok(())
    }

    /// Stop every background job. Idempotent.
    pub async fn stop(&self) -> AppResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self
            .scheduler
            .shutdown(self.settings.application.shutdown_timeout)
            .await;
        *self.query_addr.lock() = None;
        info!("{} stopped", self.settings.application.name);
        result
    }

    /// Stop, then ask the orchestration layer to end the process.
    pub async fn power_loss_shutdown(&self) -> AppResult<()> {
        info!("!!! POWERING DOWN !!!");
        let result = self.stop().await;
        self.orchestrator.shutdown(1);
        result
    }

    /// Bump the export counter and timestamp, then publish the status table.
    pub async fn putstatus(&self) -> AppResult<()> {
        self.status_table.increment(EXPORT_COUNT, 1i64);
        self.status_table.set(
            EXPORT_TIME,
            chrono::Local::now().format("%Y%m%d %H%M%S").to_string(),
        );
        let snapshot = self.status_table.snapshot();
        self.orchestrator.export_status(&snapshot).await
    }

    /// Refresh the status dictionaries from the orchestrator.
    pub async fn refresh_header_status(&self) -> AppResult<()> {
        let refreshed = self
            .orchestrator
            .request_status(self.telescope_status.snapshot())
            .await?;
        self.telescope_status.apply(refreshed);

        if self.settings.header.auxiliary_enabled {
            let refreshed = self
                .orchestrator
                .request_status(self.auxiliary_status.snapshot())
                .await?;
            self.auxiliary_status.apply(refreshed);
        }
        Ok(())
    }

    /// Refresh the dictionaries and assemble a header for one exposure starting now.
    pub async fn return_new_header(
        &self,
        frame_id: StatusValue,
        mode: &str,
        exposure_seconds: f64,
        full_header: bool,
    ) -> AppResult<AssembledHeader> {
        self.refresh_header_status().await?;

        let telescope = self.telescope_status.snapshot();
        let auxiliary = self.auxiliary_status.snapshot();
        let sources = [
            HeaderSource::new(&self.telescope, &telescope),
            HeaderSource::new(&self.auxiliary, &auxiliary),
        ];
        let context = RequestContext {
            frame_id,
            mode: mode.to_string(),
            exposure_seconds,
            object: self.settings.header.default_object.clone(),
            exposure_start: Utc::now(),
        };
        let options = BuildOptions {
            full_header,
            missing_key_policy: self.settings.header.missing_key_policy,
            auxiliary_title: self.settings.header.auxiliary_title.clone(),
        };

        let header = build(&sources, &context, &options)?;
        if !header.missing.is_empty() {
            warn!("Header built with {} unresolved aliases", header.missing.len());
        }
        Ok(header)
    }

    /// Periodic refresh: rebuild a full header and record its size.
    pub async fn update_header_stat(&self) -> AppResult<()> {
        let header = self
            .return_new_header(
                StatusValue::Int(REFRESH_FRAME_ID),
                REFRESH_MODE,
                REFRESH_EXPOSURE_SECONDS,
                true,
            )
            .await?;
        self.params.set(HEADER_CARDS, header.len() as i64);
        let count = self.params.increment(HEADER_REFRESH_COUNT, 1i64);
        info!("Header refresh #{}: {} cards", count, header.len());
        Ok(())
    }

    /// Allocate `count` frame ids, at most `query_server.max_frames_per_request`.
    pub async fn reqframes(&self, count: u32, frame_type: &str) -> AppResult<Vec<String>> {
        let limit = self.settings.query_server.max_frames_per_request;
        if count == 0 || count > limit {
            return Err(PersonalityError::invalid_argument(
                "num",
                format!("{} frames requested, allowed 1..={}", count, limit),
            ));
        }
        let frames = self.orchestrator.get_frames(count, frame_type).await?;
        info!("framelist: {:?}", frames);
        Ok(frames)
    }
}

#[async_trait]
impl QueryHandler for PersonalityState {
    async fn handle(&self, request: &str) -> AppResult<Reply> {
        match QueryRequest::parse(request)? {
            QueryRequest::Header {
                frame_id,
                mode,
                exposure_seconds,
                full_header,
            } => Ok(Reply::Header(
                self.return_new_header(frame_id, &mode, exposure_seconds, full_header)
                    .await?,
            )),
            QueryRequest::FrameIds { count, frame_type } => {
                Ok(Reply::Frames(self.reqframes(count, &frame_type).await?))
            }
            QueryRequest::Unsupported(command) => {
                warn!("Unsupported query command '{}'", command);
                Ok(unsupported_reply(&command))
            }
        }
    }
}
