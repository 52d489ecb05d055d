
use crate::speck::config::ConfigError;

/// MAC errors, generic over the underlying radio error
///
/// Protocol-level failures (oversize frames, full buffers, rejected
/// state transitions) are handled within the MAC and never surface here.
#[derive(Debug, Clone, PartialEq)]
pub enum MacError<E> {
    /// Invalid MAC configuration
    Config(ConfigError),

    /// Local event scheduler is out of slots
    SchedulerFull,

    /// Wrapper for unhandled / underlying radio errors
    Radio(E),
}

impl <E> From<ConfigError> for MacError<E> {
    fn from(e: ConfigError) -> Self {
        MacError::Config(e)
    }
}
