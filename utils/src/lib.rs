//! Leverage common functionality across the interop harness.
//!
//! Everything here is independent of the nodes under test: bounded retries for
//! eventually consistent checks, flat propagation delays, encoding helpers, and
//! logging setup.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::{
    borrow::Cow,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::debug;

pub mod retry;
pub use retry::Retry;
pub mod telemetry;

/// Longest string the harness will emit in a single log line.
pub const MAX_LOG_LINE_LENGTH: usize = 5000;

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Encodes arbitrary bytes (or text) as standard padded base64.
pub fn to_base64(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

/// Decodes standard padded base64, returning `None` on malformed input.
pub fn from_base64(encoded: &str) -> Option<Vec<u8>> {
    STANDARD.decode(encoded).ok()
}

/// Current wall-clock time as nanoseconds since the unix epoch.
///
/// This is the unit nodes expect in the `timestamp` field of a message.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// Sleep for a fixed duration.
///
/// Used for effects that almost always land quickly (a relayed message reaching
/// a directly connected peer). Uncertain effects should poll with [Retry]
/// instead.
pub async fn delay(duration: Duration) {
    debug!(secs = duration.as_secs_f64(), "sleeping");
    tokio::time::sleep(duration).await;
}

/// Returns `line` unchanged if it fits in a log line, otherwise a notice.
pub fn loggable(line: &str) -> Cow<'_, str> {
    if line.len() > MAX_LOG_LINE_LENGTH {
        Cow::Owned(format!(
            "log line was discarded because it's longer than max_log_line_length={}",
            MAX_LOG_LINE_LENGTH
        ))
    } else {
        Cow::Borrowed(line)
    }
}
