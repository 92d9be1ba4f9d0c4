//! Bus cycle timing

/// NAND asynchronous interface timing, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingParams {
    /// WE# cycle time (tWC)
    pub t_wc_ns: u16,
    /// RE# cycle time (tRC)
    pub t_rc_ns: u16,
    /// RE# access time (tREA)
    pub t_rea_ns: u16,
    /// WE# pulse width (tWP)
    pub t_wp_ns: u16,
    /// RE# pulse width (tRP)
    pub t_rp_ns: u16,
}

impl TimingParams {
    /// Conservative timing every supported part meets
    pub const SAFE: Self = Self {
        t_wc_ns: 30,
        t_rc_ns: 30,
        t_rea_ns: 20,
        t_wp_ns: 15,
        t_rp_ns: 15,
    };

    /// Lower bound autotune never goes below
    pub const FLOOR: Self = Self {
        t_wc_ns: 10,
        t_rc_ns: 10,
        t_rea_ns: 5,
        t_wp_ns: 5,
        t_rp_ns: 5,
    };

    /// Shorten every parameter by `step_ns`, clamped to [`Self::FLOOR`]
    ///
    /// Returns `None` once nothing can shrink any further.
    pub fn faster(&self, step_ns: u16) -> Option<Self> {
        let f = Self::FLOOR;
        let next = Self {
            t_wc_ns: self.t_wc_ns.saturating_sub(step_ns).max(f.t_wc_ns),
            t_rc_ns: self.t_rc_ns.saturating_sub(step_ns).max(f.t_rc_ns),
            t_rea_ns: self.t_rea_ns.saturating_sub(step_ns).max(f.t_rea_ns),
            t_wp_ns: self.t_wp_ns.saturating_sub(step_ns).max(f.t_wp_ns),
            t_rp_ns: self.t_rp_ns.saturating_sub(step_ns).max(f.t_rp_ns),
        };
        (next != *self).then_some(next)
    }

    /// Time RE# stays low before data is sampled
    pub fn read_strobe_ns(&self) -> u16 {
        self.t_rea_ns.max(self.t_rp_ns)
    }
}

impl Default for TimingParams {
    fn default() -> Self {
        Self::SAFE
    }
}

/// Bounds for the timing autotune pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutotuneConfig {
    /// Amount each trial shortens the cycle times by
    pub step_ns: u16,
    /// Maximum number of trial settings
    pub max_trials: u8,
    /// Page read back at every trial
    pub probe_page: u32,
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            step_ns: 5,
            max_trials: 6,
            probe_page: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faster_steps_to_floor() {
        let mut t = TimingParams::SAFE;
        let mut steps = 0;
        while let Some(next) = t.faster(5) {
            assert!(next.t_wc_ns >= TimingParams::FLOOR.t_wc_ns);
            assert!(next.t_rea_ns >= TimingParams::FLOOR.t_rea_ns);
            t = next;
            steps += 1;
        }
        assert_eq!(t, TimingParams::FLOOR);
        assert_eq!(steps, 4);
    }

    #[test]
    fn test_read_strobe() {
        assert_eq!(TimingParams::SAFE.read_strobe_ns(), 20);
    }
}
