

use crate::{Ts, MAX_PAYLOAD_LEN};

use super::queue::TX_QUEUE_SLOTS;

/// Handling of a pending transmission when the carrier is sensed busy
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusyPolicy {
    /// Retain the frame and retry after the next wakeup
    Blocking,
    /// Discard the frame at the head of the TX queue
    NonBlocking,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Duration of the radio sleep period in us
    pub sleep_interval: Ts,

    /// Duration of the radio listen period in us
    pub listen_interval: Ts,

    /// Upper bound of the random delay from frame arrival to transmit attempt in us
    pub random_tx_offset: Ts,

    /// Upper bound of the random delay before entering listen mode
    /// when a transmit attempt starts in us
    pub tx_jitter: Ts,

    /// Maximum MAC frame size (network payload + MAC overhead) in bytes
    pub max_frame_size: usize,

    /// Number of frames held in the TX queue
    pub buffer_size: usize,

    /// MAC header overhead in bytes
    pub frame_overhead: usize,

    /// Routing address treated as broadcast
    pub broadcast_address: i32,

    /// Handling of pending transmissions on carrier busy
    pub busy_policy: BusyPolicy,

    /// Apply clock drift to the wakeup scheduled after a transmission,
    /// when unset the raw sleep interval is used
    pub drift_post_tx_wakeup: bool,

    /// Log protocol debug information at `debug` rather than `trace` level
    pub print_debug_info: bool,

    /// Log state transitions at `debug` rather than `trace` level
    pub print_state_transitions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sleep_interval: 100_000,
            listen_interval: 10_000,
            random_tx_offset: 10_000,
            tx_jitter: 1_000,

            max_frame_size: 128,
            buffer_size: 32,
            frame_overhead: 11,

            broadcast_address: -1,
            busy_policy: BusyPolicy::Blocking,
            drift_post_tx_wakeup: false,

            print_debug_info: false,
            print_state_transitions: false,
        }
    }
}

/// Invalid MAC configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Sleep or listen interval is zero
    ZeroInterval,
    /// Buffer size is zero or exceeds the TX queue storage
    BufferSize(usize),
    /// Frame overhead leaves no room for a payload or exceeds 255 bytes
    FrameOverhead(usize),
    /// Maximum frame size exceeds the frame storage
    MaxFrameSize(usize),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sleep_interval == 0 || self.listen_interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        if self.buffer_size == 0 || self.buffer_size > TX_QUEUE_SLOTS {
            return Err(ConfigError::BufferSize(self.buffer_size));
        }

        // Carried in a single byte on the wire
        if self.frame_overhead > u8::MAX as usize || self.frame_overhead >= self.max_frame_size {
            return Err(ConfigError::FrameOverhead(self.frame_overhead));
        }

        if self.max_frame_size > MAX_PAYLOAD_LEN + self.frame_overhead {
            return Err(ConfigError::MaxFrameSize(self.max_frame_size));
        }

        Ok(())
    }
}
