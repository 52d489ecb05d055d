//! Redundant transmission, a train of back to back frame copies spanning a sleep interval

use core::fmt::Debug;

use rand_core::RngCore;

use crate::log::{trace, debug, warn, verbose};
use crate::{Ts, error::MacError, timer::Timer};
use crate::phy::{Radio, RadioInfo};
use crate::net::Network;

use super::{Mac, MacState, LocalEvent, TimerKind, EPSILON, drifted};

/// Frame train timing
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Train {
    /// Time on air of a single copy in us
    pub tx_time: Ts,

    /// Number of additional copies following the first
    pub redundancy: u32,

    /// Clock drift applied to copy offsets
    pub drift: f32,
}

impl Train {
    /// Compute the train for a frame of `len` bytes, the train covers
    /// `sleep_interval` (rounded to the nearest copy, ties up)
    pub fn compute(len: usize, info: &RadioInfo, sleep_interval: Ts) -> Self {
        let tx_time = info.tx_time(len);

        let redundancy = match tx_time {
            0 => 0,
            t => (2 * sleep_interval + t) / (2 * t),
        };

        Self {
            tx_time,
            redundancy: redundancy as u32,
            drift: 1.0,
        }
    }

    /// Apply a clock drift factor to copy offsets
    pub fn with_drift(self, drift: f32) -> Self {
        Self{ drift, ..self }
    }

    /// Total number of copies sent
    pub fn copies(&self) -> u32 {
        self.redundancy + 1
    }

    /// Start of copy `i` relative to the start of the train
    pub fn offset(&self, i: u32) -> Ts {
        drifted(i as Ts * self.tx_time, self.drift)
    }
}

impl <R, N, T, G> Mac<R, N, T, G>
where
    R: Radio,
    R::Error: Debug,
    N: Network,
    T: Timer,
    G: RngCore,
{
    /// Send the frame at the head of the TX queue as a train of copies
    pub(super) fn send_data(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        if self.tx_queue.is_empty() {
            trace!("TX queue empty, nothing to send");
            return Ok(())
        }

        match self.state {
            MacState::Transmitting | MacState::Default => (),
            state => {
                warn!("Send rejected in state {}, sleeping", state.name());
                self.set_state(MacState::Default, "send rejected");
                return self.enter_sleep(now);
            },
        }

        let frame = match self.tx_queue.peek() {
            Some(f) => f,
            None => return Ok(()),
        };

        let train = Train::compute(frame.len(), &self.info, self.config.sleep_interval)
            .with_drift(self.drift);

        verbose!(self.config.print_debug_info, "Sending {} copies of {} byte frame to {:?} ({} us each)",
            train.copies(), frame.len(), frame.header.destination, train.tx_time);

        // Frame leaves the queue only once the radio has accepted the train
        self.radio.enter_transmit_train(frame, &train).map_err(MacError::Radio)?;
        let _ = self.tx_queue.pop();

        self.train = Some(train);

        self.stats.frames_sent = self.stats.frames_sent.saturating_add(1);
        self.stats.copies_sent = self.stats.copies_sent.saturating_add(train.copies());

        Ok(())
    }

    /// Radio has drained the frame train
    pub(super) fn finish_data_transmission(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        if self.state == MacState::Transmitting {
            self.set_state(MacState::Default, "transmission complete");
        }

        if self.tx_queue.is_empty() {
            self.tx_pending = false;

        } else {
            let tx_time = self.train.map(|t| t.tx_time).unwrap_or(0);
            debug!("{} frames remaining, next attempt in {} us", self.tx_queue.len(), tx_time + EPSILON);

            self.schedule_in(now, self.drifted(tx_time + EPSILON), LocalEvent::InitiateTransmission)?;
        }

        self.radio.enter_sleep(0).map_err(MacError::Radio)?;

        let sleep = match self.config.drift_post_tx_wakeup {
            true => self.drifted(self.config.sleep_interval),
            false => self.config.sleep_interval,
        };

        self.reschedule(now, TimerKind::Wakeup, sleep)
    }
}
