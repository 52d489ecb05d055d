//! MAC Timer API
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

/// Monotonic clock used to timestamp MAC events.
///
/// All methods are monotonic and relative to the same unknown epoc,
/// the MAC schedules in microseconds.
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoc
    fn ticks_ms(&self) -> u64;

    /// Returns the number of microsecond ticks since some unknown epoc
    fn ticks_us(&self) -> u64;
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    /// Mock timer in microseconds to assist with testing,
    /// clones share the same underlying time
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<u64>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(0)))
        }

        pub fn set_us(&mut self, val: u64) {
            *self.0.lock().unwrap() = val;
        }

        /// Advance by the provided number of microseconds
        pub fn advance(&mut self, us: u64) {
            let mut v  = self.0.lock().unwrap();
            *v += us;
        }

        pub fn val(&self) -> u64 {
            *self.0.lock().unwrap()
        }
    }

    impl super::Timer for MockTimer {
        fn ticks_ms(&self) -> u64 {
            *self.0.lock().unwrap() / 1000
        }

        fn ticks_us(&self) -> u64 {
            *self.0.lock().unwrap()
        }
    }
}
