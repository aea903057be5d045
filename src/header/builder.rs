//! Header assembly.
//!
//! [`build`] merges header-definition tables with status snapshots into an
//! [`AssembledHeader`]. It is a pure function of its inputs: callers take the status
//! snapshots (see [`crate::status::StatusDictionary::snapshot`]) and supply the exposure
//! context, so it can be exercised without any live status source.
//!
//! # Emission order
//!
//! ```text
//! DATE-OBS UT UT-STR UT-END HST HST-STR HST-END MJD MJD-STR MJD-END FRAMEID EXPTIME
//!   └── short form stops here
//! OBJECT  <primary table>  CRVAL1 CRVAL2  COMMENT x3  <auxiliary table>
//! ```

use super::card::AssembledHeader;
use super::definition::HeaderDefinitionTable;
use crate::error::{AppResult, PersonalityError};
use crate::value::{StatusMap, StatusValue};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Status alias holding the pointing right ascension (`HH:MM:SS.sss`).
pub const RA_ALIAS: &str = "FITS.SBR.RA";
/// Status alias holding the pointing declination (`[+-]DD:MM:SS.ss`).
pub const DEC_ALIAS: &str = "FITS.SBR.DEC";

/// Offset of the observatory's local time (HST) from UTC, in hours.
const HST_OFFSET_HOURS: i32 = -10;
/// MJD of the unix epoch.
const MJD_UNIX_EPOCH: f64 = 40587.0;
const SECONDS_PER_DAY: f64 = 86_400.0;
const BANNER_RULE_WIDTH: usize = 72;

/// What to do when a status alias required by a field is absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// Emit the entry's default value and record the alias in `missing`.
    #[default]
    Substitute,
    /// Fail the whole build with `MissingStatusKey`.
    Abort,
}

/// Per-request inputs of a header build.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub frame_id: StatusValue,
    pub mode: String,
    pub exposure_seconds: f64,
    pub object: String,
    pub exposure_start: DateTime<Utc>,
}

/// Knobs that shape the assembled header.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub full_header: bool,
    pub missing_key_policy: MissingKeyPolicy,
    /// Title printed in the banner preceding the auxiliary table.
    pub auxiliary_title: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            full_header: true,
            missing_key_policy: MissingKeyPolicy::default(),
            auxiliary_title: "Parameters for AO188/LGS".to_string(),
        }
    }
}

/// A definition table paired with the status snapshot it is resolved against.
#[derive(Clone, Copy, Debug)]
pub struct HeaderSource<'a> {
    pub table: &'a HeaderDefinitionTable,
    pub status: &'a StatusMap,
}

impl<'a> HeaderSource<'a> {
    pub fn new(table: &'a HeaderDefinitionTable, status: &'a StatusMap) -> Self {
        Self { table, status }
    }
}

/// Start/end instants of one exposure in UTC and HST.
#[derive(Clone, Debug, PartialEq)]
pub struct ExposureTiming {
    pub utc_start: DateTime<Utc>,
    pub utc_end: DateTime<Utc>,
    pub hst_start: DateTime<FixedOffset>,
    pub hst_end: DateTime<FixedOffset>,
    pub mjd_start: f64,
    pub mjd_end: f64,
}

impl ExposureTiming {
    pub fn new(utc_start: DateTime<Utc>, exposure_seconds: f64) -> AppResult<Self> {
        if !exposure_seconds.is_finite() || exposure_seconds < 0.0 {
            return Err(PersonalityError::InvalidRequest(format!(
                "exposure time must be a non-negative number, got {}",
                exposure_seconds
            )));
        }
        let exposure = Duration::microseconds((exposure_seconds * 1e6).round() as i64);
        let utc_end = utc_start.checked_add_signed(exposure).ok_or_else(|| {
            PersonalityError::InvalidRequest(format!(
                "exposure time {} s runs past the representable calendar",
                exposure_seconds
            ))
        })?;
        let hst = FixedOffset::east_opt(HST_OFFSET_HOURS * 3600)
            .ok_or_else(|| PersonalityError::InvalidRequest("invalid HST offset".into()))?;

        Ok(Self {
            utc_start,
            utc_end,
            hst_start: utc_start.with_timezone(&hst),
            hst_end: utc_end.with_timezone(&hst),
            mjd_start: modified_julian_date(utc_start),
            mjd_end: modified_julian_date(utc_end),
        })
    }
}

/// Modified Julian Date of a UTC instant.
pub fn modified_julian_date(instant: DateTime<Utc>) -> f64 {
    let seconds =
        instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_nanos()) / 1e9;
    seconds / SECONDS_PER_DAY + MJD_UNIX_EPOCH
}

fn clock<Tz>(instant: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    instant.format("%H:%M:%S%.3f").to_string()
}

fn sexagesimal_parts(text: &str) -> Option<(&str, f64, f64)> {
    let mut parts = text.trim().split(':');
    let first = parts.next()?.trim();
    let minutes = parts.next()?.trim().parse::<f64>().ok()?;
    let seconds = parts.next()?.trim().parse::<f64>().ok()?;
    Some((first, minutes, seconds))
}

/// Right ascension `HH:MM:SS.sss` in decimal degrees.
pub fn ra_to_degrees(text: &str) -> Option<f64> {
    let (hours, minutes, seconds) = sexagesimal_parts(text)?;
    let hours = hours.parse::<f64>().ok()?;
    Some(15.0 * (hours + minutes / 60.0 + seconds / 3600.0))
}

/// Declination `[+-]DD:MM:SS.ss` in decimal degrees.
///
/// The sign is taken from the degree token and applied to the whole value, so
/// `-0:30:00` is `-0.5`.
pub fn dec_to_degrees(text: &str) -> Option<f64> {
    let (degrees_text, minutes, seconds) = sexagesimal_parts(text)?;
    let degrees = degrees_text.parse::<f64>().ok()?;
    if degrees_text.contains('-') {
        Some(degrees - minutes / 60.0 - seconds / 3600.0)
    } else {
        Some(degrees + minutes / 60.0 + seconds / 3600.0)
    }
}

/// Assemble a header for one request.
///
/// The first source is the primary (telescope) table; its snapshot also provides the
/// pointing used for `CRVAL1`/`CRVAL2`. The second, if present, is emitted after a
/// comment banner. Further sources are appended the same way as the second.
pub fn build(
    sources: &[HeaderSource<'_>],
    context: &RequestContext,
    options: &BuildOptions,
) -> AppResult<AssembledHeader> {
    let timing = ExposureTiming::new(context.exposure_start, context.exposure_seconds)?;
    let mut hdr = AssembledHeader::new();

    let ut_start = clock(&timing.utc_start);
    let hst_start = clock(&timing.hst_start);

    hdr.set(
        "DATE-OBS",
        timing.utc_start.format("%Y-%m-%d").to_string().into(),
        "Observation start date (yyyy-mm-dd)",
    );
    hdr.set("UT", ut_start.clone().into(), "HH:MM:SS.SS typical UTC at exposure");
    hdr.set("UT-STR", ut_start.into(), "HH:MM:SS.SS UTC at exposure start");
    hdr.set("UT-END", clock(&timing.utc_end).into(), "HH:MM:SS.SS UTC at exposure end");
    hdr.set("HST", hst_start.clone().into(), "HH:MM:SS.SS typical HST at exposure");
    hdr.set("HST-STR", hst_start.into(), "HH:MM:SS.SS HST at exposure start");
    hdr.set("HST-END", clock(&timing.hst_end).into(), "HH:MM:SS.SS HST at exposure end");

    hdr.set("MJD", timing.mjd_start.into(), "Modified Julian Day at typical time");
    hdr.set("MJD-STR", timing.mjd_start.into(), "Modified Julian Day at exposure start");
    hdr.set("MJD-END", timing.mjd_end.into(), "Modified Julian Day at exposure end");

    hdr.set("FRAMEID", context.frame_id.clone(), "Image sequential number");
    hdr.set(
        "EXPTIME",
        context.exposure_seconds.into(),
        "Total integration time of the frame (sec)",
    );

    if !options.full_header {
        return Ok(hdr);
    }

    hdr.set("OBJECT", context.object.clone().into(), "Target description");

    let Some((primary, rest)) = sources.split_first() else {
        return Ok(hdr);
    };

    emit_table(&mut hdr, primary, options.missing_key_policy)?;
    emit_pointing(&mut hdr, primary.status, options.missing_key_policy)?;

    for source in rest {
        let rule = "-".repeat(BANNER_RULE_WIDTH);
        hdr.add_comment(rule.clone());
        hdr.add_comment(banner(&options.auxiliary_title));
        hdr.add_comment(rule);
        emit_table(&mut hdr, source, options.missing_key_policy)?;
    }

    Ok(hdr)
}

fn banner(title: &str) -> String {
    let title = format!(" {} ", title.trim());
    let left = 16usize.min(BANNER_RULE_WIDTH.saturating_sub(title.len()));
    let right = BANNER_RULE_WIDTH.saturating_sub(left + title.len());
    format!("{}{}{}", "-".repeat(left), title, "-".repeat(right))
}

fn emit_table(
    hdr: &mut AssembledHeader,
    source: &HeaderSource<'_>,
    policy: MissingKeyPolicy,
) -> AppResult<()> {
    for entry in source.table.entries() {
        let value = if entry.is_constant() {
            entry.default_value.clone()
        } else {
            match source.status.get(&entry.alias) {
                Some(value) => value.clone(),
                None => {
                    record_missing(hdr, &entry.alias, policy)?;
                    entry.default_value.clone()
                }
            }
        };
        hdr.set(entry.output_key.clone(), value, entry.comment.clone());
    }
    Ok(())
}

fn record_missing(hdr: &mut AssembledHeader, alias: &str, policy: MissingKeyPolicy) -> AppResult<()> {
    match policy {
        MissingKeyPolicy::Abort => Err(PersonalityError::MissingStatusKey(alias.to_string())),
        MissingKeyPolicy::Substitute => {
            warn!("Status alias '{}' missing; substituting default", alias);
            hdr.missing.push(alias.to_string());
            Ok(())
        }
    }
}

fn emit_pointing(
    hdr: &mut AssembledHeader,
    status: &StatusMap,
    policy: MissingKeyPolicy,
) -> AppResult<()> {
    let fields: [(&str, &str, fn(&str) -> Option<f64>, &str); 2] = [
        (RA_ALIAS, "CRVAL1", ra_to_degrees, "Physical value of the reference pixel X"),
        (DEC_ALIAS, "CRVAL2", dec_to_degrees, "Physical value of the reference pixel Y"),
    ];

    for (alias, key, convert, comment) in fields {
        let Some(raw) = status.get(alias) else {
            record_missing(hdr, alias, policy)?;
            continue;
        };
        match convert(&raw.to_string()) {
            Some(degrees) => hdr.set(key, degrees.into(), comment),
            None => match policy {
                MissingKeyPolicy::Abort => {
                    return Err(PersonalityError::invalid_argument(
                        alias,
                        format!("'{}' is not sexagesimal", raw),
                    ))
                }
                MissingKeyPolicy::Substitute => {
                    warn!("Status alias '{}' holds unparsable pointing '{}'", alias, raw);
                    hdr.missing.push(alias.to_string());
                }
            },
        }
    }
    Ok(())
}
