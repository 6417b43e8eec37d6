//! Parsers for the per-tag attribute strings: error distances, positional
//! windows, and trim markers.

use crate::errors::DemuxError;

/// The edit budget for a tag: at most `mismatch` substitutions, at most
/// `indel` insertions/deletions, and at most `total` edits overall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Distance {
    pub mismatch: u16,
    pub indel:    u16,
    pub total:    u16,
}

/// The positional window for a tag: a stream index (`-1` meaning any stream)
/// and a half-open `[start, end)` range within the read, where `end == 0`
/// denotes "to end of read".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file:  i32,
    pub start: usize,
    pub end:   usize,
}

impl Default for Location {
    #[inline]
    fn default() -> Self {
        Location {
            file:  -1,
            start: 0,
            end:   0,
        }
    }
}

/// Parses a `mismatch[:indel[:total]]` distance string. Empty fields keep
/// their default of zero. When `total` is zero it is set to
/// `mismatch + indel`.
///
/// ## Errors
///
/// [`InvalidDistance`] if there are more than three fields, a field is not a
/// non-negative integer, or the budgets are inconsistent (`total` nonzero
/// while `mismatch + indel < total`, `mismatch > total`, or `indel > total`).
///
/// [`InvalidDistance`]: DemuxError::InvalidDistance
pub fn parse_distance(distance: &str) -> Result<Distance, DemuxError> {
    let mut parsed = Distance::default();
    if distance.is_empty() {
        return Ok(parsed);
    }

    let invalid = || DemuxError::InvalidDistance(format!("unable to parse \"{distance}\""));

    let fields: Vec<&str> = distance.split(':').collect();
    if fields.len() > 3 {
        return Err(invalid());
    }
    for (i, field) in fields.iter().enumerate() {
        if field.is_empty() {
            continue;
        }
        let value = field.parse::<u16>().map_err(|_| invalid())?;
        match i {
            0 => parsed.mismatch = value,
            1 => parsed.indel = value,
            _ => parsed.total = value,
        }
    }

    if parsed.total != 0
        && (parsed.mismatch + parsed.indel < parsed.total || parsed.mismatch > parsed.total || parsed.indel > parsed.total)
    {
        return Err(invalid());
    }
    if parsed.total == 0 {
        parsed.total = parsed.mismatch + parsed.indel;
    }

    Ok(parsed)
}

/// Parses a `file[:start[:end]]` location string. Commas are accepted as the
/// delimiter when present. Empty fields keep their defaults of
/// `(-1, 0, 0)`.
///
/// When `n_files` is provided, the stream index is validated against it.
///
/// ## Errors
///
/// [`InvalidLocation`] if there are more than three fields, a field is not an
/// integer, `file < -1`, `file >= n_files`, a position is negative, or
/// `end <= start` while `end != 0`.
///
/// [`InvalidLocation`]: DemuxError::InvalidLocation
pub fn parse_location(location: &str, n_files: Option<usize>) -> Result<Location, DemuxError> {
    let mut parsed = Location::default();
    if location.is_empty() {
        return Ok(parsed);
    }

    let invalid = || DemuxError::InvalidLocation(format!("unable to parse \"{location}\""));

    let delimiter = if location.contains(',') { ',' } else { ':' };
    let fields: Vec<&str> = location.split(delimiter).collect();
    if fields.len() > 3 {
        return Err(invalid());
    }
    for (i, field) in fields.iter().enumerate() {
        if field.is_empty() {
            continue;
        }
        let value = field.parse::<i64>().map_err(|_| invalid())?;
        match i {
            0 => {
                if value < -1 || value > i64::from(i32::MAX) {
                    return Err(invalid());
                }
                parsed.file = value as i32;
            }
            _ => {
                if value < 0 {
                    return Err(invalid());
                }
                let position = value as usize;
                if i == 1 {
                    parsed.start = position;
                } else {
                    parsed.end = position;
                }
            }
        }
    }

    if let Some(n_files) = n_files
        && parsed.file >= 0
        && parsed.file as usize >= n_files
    {
        return Err(invalid());
    }
    if parsed.end <= parsed.start && parsed.end != 0 {
        return Err(invalid());
    }

    Ok(parsed)
}

/// Parses a `0|1[:extra]` trim marker, as used in the `LEFT`/`RIGHT` columns
/// and the `--left`/`--right` options. Returns `Some(extra)` when trimming is
/// enabled, with `extra` the number of additional bases to remove beyond the
/// tag itself.
///
/// ## Errors
///
/// [`InvalidTrim`] if the flag is not `0` or `1`, the extra offset is not a
/// non-negative integer, or there are more than two fields.
///
/// [`InvalidTrim`]: DemuxError::InvalidTrim
pub fn parse_trim(trim: &str) -> Result<Option<usize>, DemuxError> {
    if trim.is_empty() {
        return Ok(None);
    }

    let invalid = || DemuxError::InvalidTrim(format!("unable to parse \"{trim}\""));

    let (flag, extra) = match trim.split_once(':') {
        Some((flag, extra)) => (flag, extra.parse::<usize>().map_err(|_| invalid())?),
        None => (trim, 0),
    };

    match flag {
        "0" => Ok(None),
        "1" => Ok(Some(extra)),
        _ => Err(invalid()),
    }
}
