//! Human-readable training durations.

use std::time::Duration;

/// `"45-seconds to train"` below a minute, `"2-mins to train"` otherwise.
/// Both units are truncated.
pub fn format_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds < 60.0 {
        format!("{}-seconds to train", seconds as u64)
    } else {
        format!("{}-mins to train", (seconds / 60.0) as u64)
    }
}

pub fn format_duration(elapsed: Duration) -> String {
    format_elapsed(elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_and_minutes() {
        assert_eq!(format_elapsed(45.0), "45-seconds to train");
        assert_eq!(format_elapsed(125.0), "2-mins to train");
    }

    #[test]
    fn test_boundaries_truncate() {
        assert_eq!(format_elapsed(0.4), "0-seconds to train");
        assert_eq!(format_elapsed(59.99), "59-seconds to train");
        assert_eq!(format_elapsed(60.0), "1-mins to train");
        assert_eq!(format_elapsed(3599.0), "59-mins to train");
        assert_eq!(format_duration(Duration::from_millis(45_900)), "45-seconds to train");
    }
}
