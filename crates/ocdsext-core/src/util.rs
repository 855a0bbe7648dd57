//! Small helpers shared across modules

use crate::error::Result;
use serde::Serialize;

/// Serialize JSON with two-space indentation, keeping non-ASCII characters
pub fn json_dump<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
