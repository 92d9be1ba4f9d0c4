//! Monotonic time source for the session loop

/// Monotonic millisecond clock with a blocking delay
///
/// The session uses this for the inactivity timeout and for spacing power
/// samples. On hardware it wraps the system timer; tests drive it by hand.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> u64;

    /// Block for at least `us` microseconds
    fn delay_us(&mut self, us: u32);
}

impl<C: Clock + ?Sized> Clock for &mut C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}
