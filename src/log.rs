//! Logging facade
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

pub use ::log::{trace, debug, info, warn, error};

/// Log at `debug` level when `$enabled`, otherwise at `trace`
macro_rules! verbose {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            $crate::log::debug!($($arg)+)
        } else {
            $crate::log::trace!($($arg)+)
        }
    };
}

pub(crate) use verbose;
