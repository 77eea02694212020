//! Progress and ETA estimation for a pipeline run.

use std::time::{Duration, Instant};

/// Estimates the remaining seconds of a run.
///
/// Assumes every chunk costs the average observed so far:
/// `max(0, elapsed / completed * total - elapsed)`. Returns `None` when the
/// run has not started, nothing has completed yet, or the result is not a
/// finite number.
pub fn eta_seconds(elapsed: Option<Duration>, completed: usize, total: usize) -> Option<f64> {
    let elapsed = elapsed?.as_secs_f64();
    if completed == 0 {
        return None;
    }
    let projected = elapsed / completed as f64 * total as f64;
    let remaining = (projected - elapsed).max(0.0);
    remaining.is_finite().then_some(remaining)
}

/// Run clock feeding [`eta_seconds`].
#[derive(Debug, Clone, Default)]
pub struct ProgressClock {
    started: Option<Instant>,
}

impl ProgressClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a run.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Forgets the current run.
    pub fn reset(&mut self) {
        self.started = None;
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|started| started.elapsed())
    }

    /// ETA for `completed` terminal chunks out of `total`.
    pub fn eta(&self, completed: usize, total: usize) -> Option<f64> {
        eta_seconds(self.elapsed(), completed, total)
    }
}

/// Formats an ETA for humans (`"1h 02m"`, `"3m 07s"`, `"12s"`, `"--"`).
pub fn format_eta(eta: Option<f64>) -> String {
    let Some(secs) = eta else {
        return "--".to_string();
    };
    let secs = secs.round() as u64;
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_none_before_start() {
        assert_eq!(eta_seconds(None, 3, 10), None);
    }

    #[test]
    fn test_eta_none_when_nothing_completed() {
        assert_eq!(eta_seconds(Some(Duration::from_secs(5)), 0, 10), None);
    }

    #[test]
    fn test_eta_linear_projection() {
        // 2 of 10 done in 4s -> 2s each -> 16s left
        let eta = eta_seconds(Some(Duration::from_secs(4)), 2, 10).unwrap();
        assert!((eta - 16.0).abs() < 1e-9, "eta was {eta}");
    }

    #[test]
    fn test_eta_clamped_at_zero() {
        // completed can exceed total only through misuse; never report negative time
        let eta = eta_seconds(Some(Duration::from_secs(4)), 5, 4).unwrap();
        assert_eq!(eta, 0.0);
    }

    #[test]
    fn test_eta_zero_when_done() {
        let eta = eta_seconds(Some(Duration::from_secs(9)), 3, 3).unwrap();
        assert_eq!(eta, 0.0);
    }

    #[test]
    fn test_eta_zero_elapsed_is_zero() {
        let eta = eta_seconds(Some(Duration::ZERO), 1, 100).unwrap();
        assert_eq!(eta, 0.0);
    }

    #[test]
    fn test_clock_lifecycle() {
        let mut clock = ProgressClock::new();
        assert!(clock.elapsed().is_none());
        assert_eq!(clock.eta(1, 2), None);

        clock.start();
        assert!(clock.elapsed().is_some());
        assert!(clock.eta(1, 2).is_some());

        clock.reset();
        assert!(clock.elapsed().is_none());
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None), "--");
        assert_eq!(format_eta(Some(12.4)), "12s");
        assert_eq!(format_eta(Some(187.0)), "3m 07s");
        assert_eq!(format_eta(Some(3720.0)), "1h 02m");
    }
}
