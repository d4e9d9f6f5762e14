//! One-shot app start timing.
//!
//! Instrumentation hooks record the start (process creation or resume) and
//! the first frame drawn. The interval is handed out exactly once, to the
//! first trace that asks for it.

use parking_lot::Mutex;
use std::time::Duration;
use vigil_core::Timestamp;

#[derive(Debug, Default, Clone)]
struct AppStartTiming {
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    is_cold: Option<bool>,
    consumed: bool,
}

/// A completed app start, handed out once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppStartInterval {
    pub duration: Duration,
    pub is_cold: bool,
}

/// Records cold/warm app start boundaries and yields the interval once.
pub struct AppStartClock {
    timing: Mutex<AppStartTiming>,
    max_duration: Duration,
}

impl AppStartClock {
    /// `max_duration` bounds a believable app start; longer ones are discarded.
    pub fn new(max_duration: Duration) -> Self {
        Self {
            timing: Mutex::new(AppStartTiming::default()),
            max_duration,
        }
    }

    pub fn record_start(&self, at: Timestamp, is_cold: bool) {
        let mut timing = self.timing.lock();
        timing.start = Some(at);
        timing.is_cold = Some(is_cold);
    }

    /// First write wins: racing "first frame drawn" hooks keep the earliest signal.
    pub fn record_end(&self, at: Timestamp) {
        let mut timing = self.timing.lock();
        if timing.end.is_none() {
            timing.end = Some(at);
        } else {
            tracing::trace!(ignored = %at, "App start end already recorded");
        }
    }

    /// The app start interval, at most once per clock lifetime.
    ///
    /// Returns `None` without consuming while start, end or start type are
    /// still missing. An interval that is negative or longer than the
    /// configured maximum is consumed and discarded.
    pub fn take_interval(&self) -> Option<AppStartInterval> {
        let mut timing = self.timing.lock();
        if timing.consumed {
            return None;
        }
        let (Some(start), Some(end), Some(is_cold)) = (timing.start, timing.end, timing.is_cold)
        else {
            return None;
        };
        timing.consumed = true;

        match end.checked_duration_since(start) {
            Some(duration) if duration <= self.max_duration => {
                Some(AppStartInterval { duration, is_cold })
            }
            Some(interval) => {
                tracing::debug!(
                    interval_ms = interval.as_millis() as u64,
                    "App start took too long, discarding measurement"
                );
                None
            }
            None => {
                tracing::debug!(%start, %end, "App start ended before it began, discarding");
                None
            }
        }
    }

    pub fn is_cold(&self) -> Option<bool> {
        self.timing.lock().is_cold
    }

    pub fn is_consumed(&self) -> bool {
        self.timing.lock().consumed
    }

    /// Forget everything, as on a fresh process.
    pub fn reset(&self) {
        *self.timing.lock() = AppStartTiming::default();
    }
}

impl Default for AppStartClock {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(v: u64) -> Timestamp {
        Timestamp::from_millis(v)
    }

    #[test]
    fn interval_is_taken_once() {
        let clock = AppStartClock::default();
        clock.record_start(ms(100), true);
        clock.record_end(ms(1_350));

        assert_eq!(clock.take_interval().map(|i| i.duration), Some(Duration::from_millis(1_250)));
        assert_eq!(clock.take_interval(), None);
        assert_eq!(clock.take_interval(), None);
        assert!(clock.is_consumed());
    }

    #[test]
    fn end_is_first_write_wins() {
        let clock = AppStartClock::default();
        clock.record_start(ms(0), false);
        clock.record_end(ms(400));
        clock.record_end(ms(900));

        let interval = clock.take_interval().unwrap();
        assert_eq!(interval.duration, Duration::from_millis(400));
        assert!(!interval.is_cold);
    }

    #[test]
    fn incomplete_timing_is_not_consumed() {
        let clock = AppStartClock::default();
        assert_eq!(clock.is_cold(), None);
        clock.record_end(ms(500));
        assert_eq!(clock.take_interval(), None);
        assert!(!clock.is_consumed());

        clock.record_start(ms(200), true);
        assert_eq!(clock.take_interval().map(|i| i.duration), Some(Duration::from_millis(300)));
    }

    #[test]
    fn too_long_start_is_discarded() {
        let clock = AppStartClock::new(Duration::from_secs(60));
        clock.record_start(ms(0), true);
        clock.record_end(ms(61_000));

        assert_eq!(clock.take_interval(), None);
        assert!(clock.is_consumed());
    }

    #[test]
    fn reset_allows_a_new_measurement() {
        let clock = AppStartClock::default();
        clock.record_start(ms(0), true);
        clock.record_end(ms(10));
        assert!(clock.take_interval().is_some());

        clock.reset();
        assert!(!clock.is_consumed());
        clock.record_start(ms(100), false);
        clock.record_end(ms(150));
        assert_eq!(clock.take_interval().map(|i| i.duration), Some(Duration::from_millis(50)));
    }

    #[test]
    fn concurrent_takers_get_one_value() {
        let clock = Arc::new(AppStartClock::default());
        clock.record_start(ms(0), true);
        clock.record_end(ms(800));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || clock.take_interval())
            })
            .collect();
        let taken = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(taken, 1);
    }

    #[test]
    fn start_type_stays_paired_with_duration_across_resets() {
        // Cold starts always take 100ms and warm starts 200ms here, so a
        // mismatched pair would show up as the wrong duration.
        let clock = Arc::new(AppStartClock::default());
        let writer = {
            let clock = clock.clone();
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    let cold = i % 2 == 0;
                    clock.reset();
                    clock.record_start(ms(0), cold);
                    clock.record_end(ms(if cold { 100 } else { 200 }));
                }
            })
        };

        let mut seen = 0;
        while !writer.is_finished() {
            if let Some(interval) = clock.take_interval() {
                let expected = if interval.is_cold { 100 } else { 200 };
                assert_eq!(interval.duration, Duration::from_millis(expected));
                seen += 1;
            }
        }
        writer.join().unwrap();
        assert!(seen <= 2_000);
    }
}
