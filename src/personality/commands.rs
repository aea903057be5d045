//! Commands the orchestration layer can invoke on the personality.
//!
//! Every long-running command reports on its sub-tag through [`SubTagProgress`] and
//! never on the caller's own tag.

use super::PersonalityState;
use crate::dispatch::{CommandDispatcher, CommandRequest, Reply};
use crate::error::{AppResult, PersonalityError};
use crate::exec::{run_actor_command, ActorCommand};
use crate::status::{SubTagProgress, EXPORT_MODE};
use crate::value::StatusValue;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Settling time of the (simulated) grism stage.
const GRISM_MOVE_TIME: Duration = Duration::from_secs(2);
const FILTER_TIME_LIMIT: Duration = Duration::from_secs(90);
/// Seconds allowed per detector reset or read.
const RAMP_SECONDS_PER_READ: f64 = 1.5;
/// Fixed overhead added to every ramp time limit.
const RAMP_OVERHEAD_SECONDS: f64 = 20.0;

pub(super) fn register_all(dispatcher: &mut CommandDispatcher, state: &Arc<PersonalityState>) {
    route(dispatcher, state, "sleep", sleep);
    route(dispatcher, state, "obcp_mode", obcp_mode);
    route(dispatcher, state, "shutter", shutter);
    route(dispatcher, state, "grism", grism);
    route(dispatcher, state, "filter", filter);
    route(dispatcher, state, "ramp", ramp);
    route(dispatcher, state, "putstatus", putstatus);
    route(dispatcher, state, "getstatus", getstatus);
    route(dispatcher, state, "reqframes", reqframes);
    route(dispatcher, state, "return_new_header", return_new_header);
    route(dispatcher, state, "power_off", power_off);
}

fn route<F, Fut>(
    dispatcher: &mut CommandDispatcher,
    state: &Arc<PersonalityState>,
    name: &str,
    command: F,
) where
    F: Fn(Arc<PersonalityState>, CommandRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<Reply>> + Send + 'static,
{
    let state = Arc::clone(state);
    dispatcher.register(name, move |request| command(Arc::clone(&state), request).boxed());
}

fn progress(state: &PersonalityState, request: &CommandRequest) -> SubTagProgress {
    SubTagProgress::new(Arc::clone(state.progress()), &request.tag)
}

async fn sleep(state: Arc<PersonalityState>, request: CommandRequest) -> AppResult<Reply> {
    let total = request.f64_or(0, "sleep_time", 0.0)?;
    if !total.is_finite() || total < 0.0 {
        return Err(PersonalityError::invalid_argument(
            "sleep_time",
            format!("{} is not a duration", total),
        ));
    }

    let progress = progress(&state, &request);
    progress.begin(format!("Sleep {:.6} ...", total));
    info!("Sleeping for {} sec...", total);

    let mut remaining = total;
    while remaining > 0.0 {
        progress.message(format!("Sleep {:.6} ...", remaining));
        let step = remaining.min(1.0);
        tokio::time::sleep(Duration::from_secs_f64(step)).await;
        remaining -= step;
    }

    progress.message("Awake!");
    info!("Woke up refreshed!");
    progress.finish(None);
    Ok(Reply::None)
}

async fn obcp_mode(state: Arc<PersonalityState>, request: CommandRequest) -> AppResult<Reply> {
    if let Some(mode) = request.string(1, "mode") {
        info!("OBCP mode set to {}", mode);
        state.status_table().set(EXPORT_MODE, mode);
    }
    Ok(Reply::None)
}

/// Stage position argument; an omitted position is reported as `None`.
fn position(request: &CommandRequest) -> String {
    request.string(0, "pos").unwrap_or_else(|| "None".to_string())
}

async fn shutter(state: Arc<PersonalityState>, request: CommandRequest) -> AppResult<Reply> {
    let pos = position(&request);
    let progress = progress(&state, &request);
    progress.begin(format!("moving shutter to {}", pos));
    progress.message("Moved! ");
    progress.finish(None);
    info!("Shutter position set to {}", pos);
    Ok(Reply::None)
}

async fn grism(state: Arc<PersonalityState>, request: CommandRequest) -> AppResult<Reply> {
    let pos = position(&request);
    let progress = progress(&state, &request);
    progress.begin(format!("moving grism stage to {}", pos));
    tokio::time::sleep(GRISM_MOVE_TIME).await;
    progress.message("Moved!");
    progress.finish(Some("Done."));
    info!("Grism position set to {}", pos);
    Ok(Reply::None)
}

async fn filter(state: Arc<PersonalityState>, request: CommandRequest) -> AppResult<Reply> {
    let name = request.require_string(0, "name")?;
    let progress = progress(&state, &request);
    progress.begin(format!("moving filter to {}", name));

    let command = ActorCommand::new("charis", format!("filter {}", name), FILTER_TIME_LIMIT);
    if let Err(e) = run_actor_command(&state.settings().exec, &command, |_| {}).await {
        progress.fail(e.to_string());
        return Err(e);
    }

    progress.message("Moved! ");
    progress.finish(None);
    info!("Filter set to {}", name);
    Ok(Reply::None)
}

/// Ramp arguments in detector terms.
#[derive(Debug, PartialEq)]
struct RampPlan {
    read_arg: String,
    time_limit: Duration,
}

/// `nread` (count-based) and `exptime` (duration-based) are mutually exclusive.
fn plan_ramp(exptime: f64, nreset: i64, nread: i64) -> AppResult<RampPlan> {
    if nread > 0 && exptime > 0.0 {
        return Err(PersonalityError::AmbiguousParameters(
            "Either exptime OR nread can be set. Not both.".to_string(),
        ));
    }
    if nreset < 0 || nread < 0 || !exptime.is_finite() || exptime < 0.0 {
        return Err(PersonalityError::invalid_argument(
            "ramp",
            format!("nreset={} nread={} exptime={} must be non-negative", nreset, nread, exptime),
        ));
    }

    let (read_arg, limit) = if nread > 0 {
        let reads = nread.checked_add(nreset).ok_or_else(|| {
            PersonalityError::invalid_argument("nread", format!("{} + {} reads overflow", nread, nreset))
        })?;
        (
            format!("nread={}", nread),
            reads as f64 * RAMP_SECONDS_PER_READ + RAMP_OVERHEAD_SECONDS,
        )
    } else {
        (
            format!("itime={:.1}", exptime),
            nreset as f64 * RAMP_SECONDS_PER_READ + exptime + RAMP_OVERHEAD_SECONDS,
        )
    };
    let time_limit = Duration::try_from_secs_f64(limit).map_err(|e| {
        PersonalityError::invalid_argument("ramp", format!("time limit {} s: {}", limit, e))
    })?;
    Ok(RampPlan { read_arg, time_limit })
}

async fn ramp(state: Arc<PersonalityState>, request: CommandRequest) -> AppResult<Reply> {
    let exptype = request.string(0, "exptype").unwrap_or_else(|| "TEST".to_string());
    let exptime = request.f64_or(1, "exptime", 0.0)?;
    let nreset = request.i64_or(2, "nreset", 1)?;
    let nread = request.i64_or(3, "nread", 2)?;

    let progress = progress(&state, &request);
    let plan = match plan_ramp(exptime, nreset, nread) {
        Ok(plan) => plan,
        Err(e) => {
            progress.fail(e.to_string());
            return Err(e);
        }
    };

    progress.begin(format!("Taking a {} ramp({}, {})", exptype, nreset, nread));
    let command = ActorCommand::new(
        "hx",
        format!("ramp nreset={} {}", nreset, plan.read_arg),
        plan.time_limit,
    );
    let reporter = progress.clone();
    let result = run_actor_command(&state.settings().exec, &command, move |line| {
        reporter.message(line.trim().to_string())
    })
    .await;
    if let Err(e) = result {
        progress.fail(e.to_string());
        return Err(e);
    }

    info!("Took a {} ramp({}, {})", exptype, nreset, nread);
    progress.finish(Some("Done with ramp"));
    Ok(Reply::None)
}

async fn putstatus(state: Arc<PersonalityState>, _request: CommandRequest) -> AppResult<Reply> {
    state.putstatus().await?;
    Ok(Reply::None)
}

/// Aliases fetched by a forced status import.
const GETSTATUS_ALIASES: [&str; 4] = ["STATS.RA", "STATS.DEC", "TSCV.FOCUSINFO", "TSCV.FOCUSINFO2"];

async fn getstatus(state: Arc<PersonalityState>, _request: CommandRequest) -> AppResult<Reply> {
    let request = GETSTATUS_ALIASES
        .iter()
        .map(|alias| (alias.to_string(), StatusValue::from("")))
        .collect();
    let status = state.orchestrator.request_status(request).await?;
    let fields: Vec<String> = GETSTATUS_ALIASES
        .iter()
        .map(|alias| {
            let value = status.get(*alias).map(ToString::to_string).unwrap_or_default();
            format!("{}={}", alias, value)
        })
        .collect();
    info!("Status returned: {}", fields.join(" "));
    Ok(Reply::None)
}

async fn reqframes(state: Arc<PersonalityState>, request: CommandRequest) -> AppResult<Reply> {
    let num = request.i64_or(0, "num", 1)?;
    let count = u32::try_from(num)
        .map_err(|_| PersonalityError::invalid_argument("num", format!("{} is not a count", num)))?;
    let frame_type = request.string(1, "type").unwrap_or_else(|| "A".to_string());
    Ok(Reply::Frames(state.reqframes(count, &frame_type).await?))
}

async fn return_new_header(state: Arc<PersonalityState>, request: CommandRequest) -> AppResult<Reply> {
    let frame_id = match request.param(0, "frameid") {
        Some(StatusValue::Str(text)) => text
            .parse::<i64>()
            .map_or_else(|_| StatusValue::Str(text.clone()), StatusValue::Int),
        Some(value) => value.clone(),
        None => return Err(PersonalityError::invalid_argument("frameid", "required")),
    };
    let mode = request.require_string(1, "mode")?;
    let itime = request.f64_or(2, "itime", 0.0)?;
    let full_header = request.bool_or(3, "fullHeader", true)?;

    let header = state
        .return_new_header(frame_id, &mode, itime, full_header)
        .await?;
    Ok(Reply::Header(header))
}

async fn power_off(state: Arc<PersonalityState>, _request: CommandRequest) -> AppResult<Reply> {
    state.power_loss_shutdown().await?;
    Ok(Reply::None)
}
