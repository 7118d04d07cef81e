//! Text format for recorded GPS fixes, used by the replay command.
//!
//! One fix per line, comma-separated:
//!
//! ```text
//! rider,U1,37.00005,127.0,10,90,1700000000
//! bus,B1,37.0,127.0,10,90,1700000000,R7
//! ```
//!
//! Fields after `lon` are optional: speed and heading default to 0, the
//! timestamp defaults to the caller-supplied fallback, and `route_id` is only
//! read for buses. Blank lines and `#` comments are skipped.

use crate::types::{LocationRecord, MatchError, Result};

/// A parsed fix line.
#[derive(Debug, Clone, PartialEq)]
pub enum Fix {
    Rider(LocationRecord),
    Bus(LocationRecord),
}

impl Fix {
    pub fn record(&self) -> &LocationRecord {
        match self {
            Fix::Rider(r) | Fix::Bus(r) => r,
        }
    }
}

/// Parse one line. Returns `Ok(None)` for blank and comment lines.
pub fn parse_fix_line(line: &str, default_ts: f64) -> Result<Option<Fix>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(MatchError::InvalidFix(format!(
            "expected at least 4 fields, got {}: {line}",
            fields.len()
        )));
    }

    let id = fields[1];
    if id.is_empty() {
        return Err(MatchError::InvalidFix(format!("empty identifier: {line}")));
    }

    let lat = parse_number(fields[2], "lat", line)?;
    let lon = parse_number(fields[3], "lon", line)?;
    let speed = optional_number(fields.get(4), "speed", line)?.unwrap_or(0.0);
    let heading = optional_number(fields.get(5), "heading", line)?.unwrap_or(0.0);
    let ts = optional_number(fields.get(6), "ts", line)?.unwrap_or(default_ts);

    let record = LocationRecord::new(id, lat, lon, ts).with_motion(speed, heading);

    match fields[0].to_ascii_lowercase().as_str() {
        "rider" | "user" => Ok(Some(Fix::Rider(record))),
        "bus" => {
            let route = fields
                .get(7)
                .filter(|r| !r.is_empty())
                .map(|r| r.to_string());
            Ok(Some(Fix::Bus(record.with_route(route))))
        }
        other => Err(MatchError::InvalidFix(format!("unknown fix kind {other:?}"))),
    }
}

fn parse_number(val: &str, name: &str, line: &str) -> Result<f64> {
    val.parse()
        .map_err(|_| MatchError::InvalidFix(format!("bad {name} {val:?} in: {line}")))
}

fn optional_number(val: Option<&&str>, name: &str, line: &str) -> Result<Option<f64>> {
    match val {
        Some(v) if !v.is_empty() => parse_number(v, name, line).map(Some),
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
