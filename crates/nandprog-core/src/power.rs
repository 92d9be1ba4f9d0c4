//! Supply voltage monitoring

/// Source of supply voltage samples
pub trait VoltageSensor {
    /// Current supply in millivolts, `None` if the conversion failed
    fn read_millivolts(&mut self) -> Option<u32>;
}

impl<S: VoltageSensor + ?Sized> VoltageSensor for &mut S {
    fn read_millivolts(&mut self) -> Option<u32> {
        (**self).read_millivolts()
    }
}

/// Result of one power sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStatus {
    /// Supply at or above threshold
    Ok(u32),
    /// Below threshold, not yet persistent
    Warning(u32),
    /// Below threshold for `limit` consecutive samples
    Critical(u32),
}

impl PowerStatus {
    /// Sampled voltage
    pub fn millivolts(&self) -> u32 {
        match *self {
            Self::Ok(mv) | Self::Warning(mv) | Self::Critical(mv) => mv,
        }
    }

    /// Sample was below threshold
    pub fn is_low(&self) -> bool {
        !matches!(self, Self::Ok(_))
    }
}

/// Default low-voltage threshold (5 V rail)
pub const DEFAULT_THRESHOLD_MV: u32 = 4500;
/// Default consecutive low samples before an operation is stopped
pub const DEFAULT_LOW_LIMIT: u8 = 3;
/// Default minimum spacing between samples
pub const DEFAULT_PERIOD_MS: u64 = 100;

/// Tracks consecutive low-voltage samples
///
/// A failed conversion counts as a low sample at 0 mV. Any sample at or
/// above the threshold resets the counter.
#[derive(Debug)]
pub struct PowerMonitor<V> {
    sensor: V,
    threshold_mv: u32,
    limit: u8,
    period_ms: u64,
    consecutive_low: u8,
    last_sample_ms: Option<u64>,
    last: Option<PowerStatus>,
}

impl<V: VoltageSensor> PowerMonitor<V> {
    /// Monitor with the default threshold, limit and period
    pub fn new(sensor: V) -> Self {
        Self::with_limits(sensor, DEFAULT_THRESHOLD_MV, DEFAULT_LOW_LIMIT, DEFAULT_PERIOD_MS)
    }

    /// Monitor with explicit limits; `limit` is clamped to at least 1
    pub fn with_limits(sensor: V, threshold_mv: u32, limit: u8, period_ms: u64) -> Self {
        Self {
            sensor,
            threshold_mv,
            limit: limit.max(1),
            period_ms,
            consecutive_low: 0,
            last_sample_ms: None,
            last: None,
        }
    }

    /// Take a sample now, regardless of the period
    pub fn sample(&mut self, now_ms: u64) -> PowerStatus {
        let mv = self.sensor.read_millivolts().unwrap_or(0);
        self.last_sample_ms = Some(now_ms);
        let status = if mv >= self.threshold_mv {
            self.consecutive_low = 0;
            PowerStatus::Ok(mv)
        } else {
            self.consecutive_low = self.consecutive_low.saturating_add(1);
            if self.consecutive_low >= self.limit {
                log::error!("power: {} mV, {} low samples in a row", mv, self.consecutive_low);
                PowerStatus::Critical(mv)
            } else {
                log::warn!("power: {} mV below {} mV", mv, self.threshold_mv);
                PowerStatus::Warning(mv)
            }
        };
        self.last = Some(status);
        status
    }

    /// Sample if at least one period has passed since the last sample
    pub fn poll(&mut self, now_ms: u64) -> Option<PowerStatus> {
        match self.last_sample_ms {
            Some(last) if now_ms.saturating_sub(last) < self.period_ms => None,
            _ => Some(self.sample(now_ms)),
        }
    }

    /// Most recent sample
    pub fn last_sample(&self) -> Option<PowerStatus> {
        self.last
    }

    /// Low samples in a row so far
    pub fn consecutive_low(&self) -> u8 {
        self.consecutive_low
    }

    /// Low-voltage threshold
    pub fn threshold_mv(&self) -> u32 {
        self.threshold_mv
    }

    /// Minimum spacing between polled samples
    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Forget the low streak (new operation)
    pub fn reset(&mut self) {
        self.consecutive_low = 0;
        self.last_sample_ms = None;
    }

    /// Sensor access
    pub fn sensor_mut(&mut self) -> &mut V {
        &mut self.sensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;

    struct Script(VecDeque<Option<u32>>);

    impl Script {
        fn new(samples: &[Option<u32>]) -> Self {
            Self(samples.iter().copied().collect())
        }
    }

    impl VoltageSensor for Script {
        fn read_millivolts(&mut self) -> Option<u32> {
            self.0.pop_front().unwrap_or(Some(5000))
        }
    }

    #[test]
    fn test_consecutive_low_reaches_critical() {
        let mut mon = PowerMonitor::new(Script::new(&[Some(4400), Some(4300), Some(4200)]));
        assert_eq!(mon.sample(0), PowerStatus::Warning(4400));
        assert_eq!(mon.sample(1), PowerStatus::Warning(4300));
        assert_eq!(mon.sample(2), PowerStatus::Critical(4200));
        assert_eq!(mon.consecutive_low(), 3);
    }

    #[test]
    fn test_good_sample_resets_streak() {
        let samples = [Some(4000), Some(4000), Some(5000), Some(4000), Some(4000)];
        let mut mon = PowerMonitor::new(Script::new(&samples));
        let got: Vec<_> = (0..5).map(|t| mon.sample(t)).collect();
        assert!(got.iter().all(|s| !matches!(s, PowerStatus::Critical(_))));
        assert_eq!(mon.consecutive_low(), 2);
    }

    #[test]
    fn test_failed_conversion_counts_as_low() {
        let mut mon = PowerMonitor::with_limits(Script::new(&[None]), 4500, 1, 100);
        assert_eq!(mon.sample(0), PowerStatus::Critical(0));
    }

    #[test]
    fn test_poll_respects_period() {
        let mut mon = PowerMonitor::new(Script::new(&[]));
        assert!(mon.poll(0).is_some());
        assert!(mon.poll(50).is_none());
        assert_eq!(mon.poll(100), Some(PowerStatus::Ok(5000)));
        assert_eq!(mon.last_sample(), Some(PowerStatus::Ok(5000)));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut mon = PowerMonitor::new(Script::new(&[Some(4500)]));
        assert!(!mon.sample(0).is_low());
    }
}
