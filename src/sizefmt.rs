//! Human-readable byte size parsing shared by the executor config and the
//! resource sampler's stats parser.
//!
//! Both need to turn strings like `"256m"`, `"1.5 GB"`, or `"512KiB"` into a
//! byte count, and the sampler additionally needs to turn its own formatted
//! sizes back into numbers for logging, so the two routines live together.

use thiserror::Error;

/// Errors parsing a human-readable size string.
#[derive(Debug, Error)]
pub enum SizeParseError {
    #[error("empty size string")]
    Empty,
    #[error("no numeric component in {0:?}")]
    NoNumber(String),
    #[error("unknown size unit {0:?}")]
    UnknownUnit(String),
}

/// Parse a size string (`"256m"`, `"1.5 GB"`, `"512KiB"`, bare bytes like
/// `"1048576"`) into a byte count. Units are case-insensitive; `B`/`KB`/`MB`/
/// `GB`/`TB` are treated as power-of-1000, `KiB`/`MiB`/`GiB`/`TiB` as
/// power-of-1024, matching `docker stats`' own mixed usage.
pub fn parse_size(input: &str) -> Result<f64, SizeParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SizeParseError::Empty);
    }

    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+')
        .unwrap_or(trimmed.len());
    let (number_part, unit_part) = trimmed.split_at(split_at);
    let number_part = number_part.trim();
    let unit_part = unit_part.trim();

    if number_part.is_empty() {
        return Err(SizeParseError::NoNumber(input.to_string()));
    }
    let value: f64 = number_part
        .parse()
        .map_err(|_| SizeParseError::NoNumber(input.to_string()))?;

    if unit_part.is_empty() {
        return Ok(value);
    }

    let multiplier = match unit_part.to_ascii_lowercase().as_str() {
        "b" => 1.0,
        "kb" => 1_000.0,
        "kib" => 1024.0,
        "mb" | "m" => 1_000_000.0,
        "mib" => 1024.0 * 1024.0,
        "gb" | "g" => 1_000_000_000.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "tb" | "t" => 1_000_000_000_000.0,
        "tib" => 1024_f64.powi(4),
        other => return Err(SizeParseError::UnknownUnit(other.to_string())),
    };

    Ok(value * multiplier)
}

/// Convert a byte count to gigabytes (binary, GiB) as used by the sampler's
/// `memory_gb_hours`/`storage_gb`/`network_gb` counters.
pub fn bytes_to_gib(bytes: f64) -> f64 {
    bytes / (1024.0 * 1024.0 * 1024.0)
}
