//! Snapshot artifact naming and latest-artifact selection.
//!
//! Snapshot files are named `openfoodfacts_export_<YYYYMMDD>_<HHMMSS>.json`
//! with the timestamp in UTC. [`select_latest`] picks the newest one from a
//! stage or bucket listing; [`artifact_name`] produces names in the same
//! layout for the exporter.
//!
//! Listings may contain full locations (`s3://bucket/dir/name.json`); only
//! the last path segment is compared against the pattern.

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

pub const ARTIFACT_PREFIX: &str = "openfoodfacts_export_";
pub const ARTIFACT_SUFFIX: &str = ".json";
/// Human-readable form of the naming pattern, for messages.
pub const ARTIFACT_PATTERN: &str = "openfoodfacts_export_<YYYYMMDD>_<HHMMSS>.json";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no artifact matching '{pattern}' among {candidates} candidate(s)")]
    NoMatchingArtifact {
        pattern: &'static str,
        candidates: usize,
    },
}

/// Name of the artifact written at `ts`.
pub fn artifact_name(ts: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        ARTIFACT_PREFIX,
        ts.format(TIMESTAMP_FORMAT),
        ARTIFACT_SUFFIX
    )
}

/// Last path segment of a listing entry, ignoring anything after `;`.
pub fn short_name(candidate: &str) -> &str {
    let path = candidate.split(';').next().unwrap_or(candidate);
    path.rsplit('/').next().unwrap_or(path)
}

/// The `YYYYMMDD_HHMMSS` part of a well-formed artifact name.
fn embedded_timestamp(name: &str) -> Option<&str> {
    let digits = name
        .strip_prefix(ARTIFACT_PREFIX)?
        .strip_suffix(ARTIFACT_SUFFIX)?;

    let well_formed = digits.len() == 15
        && digits.bytes().enumerate().all(|(i, b)| {
            if i == 8 {
                b == b'_'
            } else {
                b.is_ascii_digit()
            }
        });

    well_formed.then_some(digits)
}

/// Parse the timestamp of an artifact name.
///
/// Returns `None` when the name does not follow the pattern or its digits
/// are not a real calendar date and time.
pub fn parse_artifact_timestamp(name: &str) -> Option<NaiveDateTime> {
    let digits = embedded_timestamp(short_name(name))?;
    NaiveDateTime::parse_from_str(digits, TIMESTAMP_FORMAT).ok()
}

/// Pick the newest artifact from a listing.
///
/// Non-matching names are dropped silently. Among equal timestamps the
/// entry appearing last in `candidates` wins. The short name is returned.
pub fn select_latest<S: AsRef<str>>(candidates: &[S]) -> Result<String, SelectError> {
    candidates
        .iter()
        .map(AsRef::as_ref)
        .filter_map(|candidate| {
            let name = short_name(candidate);
            let digits = embedded_timestamp(name)?;
            match NaiveDateTime::parse_from_str(digits, TIMESTAMP_FORMAT) {
                Ok(ts) => Some((ts, name)),
                Err(e) => {
                    warn!(artifact = name, error = %e, "Ignoring artifact with invalid timestamp");
                    None
                }
            }
        })
        .max_by_key(|(ts, _)| *ts)
        .map(|(ts, name)| {
            debug!(artifact = name, timestamp = %ts, "Latest artifact determined");
            name.to_string()
        })
        .ok_or(SelectError::NoMatchingArtifact {
            pattern: ARTIFACT_PATTERN,
            candidates: candidates.len(),
        })
}
