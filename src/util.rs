//! Small standalone helpers shared across components.

use crate::error::{Result, SessionError};

const UNITS: [&str; 9] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];

/// Human-readable byte-size formatting, e.g. `convert_size(1536) == "1.5 KiB"`.
///
/// Monotone within a unit: below 10 units the value keeps one decimal place,
/// at or above 10 it rounds to an integer. `convert_size(0) == "0 B"`.
/// Negative sizes are a caller error.
pub fn convert_size(size: i64) -> Result<String> {
    if size < 0 {
        return Err(SessionError::ProtocolParse(format!(
            "negative size: {size}"
        )));
    }
    if size == 0 {
        return Ok("0 B".to_string());
    }

    let size = size as f64;
    let mut unit_index = (size.log(1024.0)).floor() as usize;
    if unit_index >= UNITS.len() {
        unit_index = UNITS.len() - 1;
    }
    let scaled = size / 1024f64.powi(unit_index as i32);

    let formatted = if scaled >= 10.0 {
        format!("{}", scaled.round() as i64)
    } else {
        format!("{:.1}", scaled)
    };

    Ok(format!("{} {}", formatted, UNITS[unit_index]))
}
