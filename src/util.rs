//! Shared utility functions.

use std::time::Duration;

/// Format an elapsed time for log lines and summaries.
///
/// Under a second prints milliseconds, under a minute seconds with two
/// decimals, otherwise minutes and seconds.
/// 42ms -> "42ms", 1.5s -> "1.50s", 75s -> "1m 15s"
pub fn format_duration(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        return format!("{millis}ms");
    }
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        return format!("{secs:.2}s");
    }
    let whole = elapsed.as_secs();
    format!("{}m {}s", whole / 60, whole % 60)
}
