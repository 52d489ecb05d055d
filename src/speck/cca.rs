//! Carrier sensing, used both for periodic channel peeks and before transmission

use core::fmt::Debug;

use rand_core::RngCore;

use crate::log::{trace, debug, warn, verbose};
use crate::{Ts, error::MacError, timer::Timer};
use crate::phy::{CarrierSense, Radio};
use crate::net::Network;

use super::{Mac, MacState, LocalEvent, TimerKind, BusyPolicy, CARRIER_SENSE_INTERVAL, EPSILON};

impl <R, N, T, G> Mac<R, N, T, G>
where
    R: Radio,
    R::Error: Debug,
    N: Network,
    T: Timer,
    G: RngCore,
{
    pub(super) fn initiate_carrier_sense(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        match self.state {
            MacState::Default | MacState::AttemptingTransmit => (),
            state => {
                debug!("Carrier sense rejected in state {}", state.name());
                return Ok(())
            },
        }

        if self.tx_pending && self.tx_queue.is_empty() {
            warn!("Transmission pending with empty TX queue");

            self.set_state(MacState::Default, "nothing to send");
            return self.reschedule(now, TimerKind::Sleep, self.drifted(self.config.listen_interval));
        }

        self.schedule_in(now, 0, LocalEvent::PerformCarrierSense)?;

        Ok(())
    }

    pub(super) fn perform_carrier_sense(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        match self.state {
            MacState::Default | MacState::AttemptingTransmit => (),
            state => {
                trace!("Skipping carrier sense in state {}", state.name());
                return Ok(())
            },
        }

        let cs = self.radio.carrier_sense_valid().map_err(MacError::Radio)?;

        let retry = match cs {
            CarrierSense::Valid => {
                self.radio.sense_carrier(CARRIER_SENSE_INTERVAL).map_err(MacError::Radio)?;
                self.reschedule(now, TimerKind::CarrierSenseExit, CARRIER_SENSE_INTERVAL + EPSILON)?;
                self.set_state(MacState::CarrierSensing, "carrier sense");
                None
            },
            CarrierSense::InTransmit => {
                verbose!(self.config.print_debug_info, "Carrier sense while transmitting, checking TX buffer");
                self.schedule_in(now, 0, LocalEvent::CheckTxBuffer)?;
                None
            },
            CarrierSense::Sleeping => {
                self.radio.enter_listen(0).map_err(MacError::Radio)?;
                Some(self.drifted(self.info.cs_valid_delay) + EPSILON)
            },
            CarrierSense::NotReady => {
                Some(self.drifted(self.info.cs_valid_delay).max(EPSILON))
            },
            CarrierSense::Unknown(code) => {
                warn!("Carrier sense invalid for unknown reason: {}", code);
                None
            },
        };

        if let Some(delay) = retry {
            trace!("Carrier sense {:?}, retry in {} us", cs, delay);
            self.stats.cs_retries = self.stats.cs_retries.saturating_add(1);
            self.schedule_in(now, delay, LocalEvent::PerformCarrierSense)?;
        }

        Ok(())
    }

    /// Energy was detected on the channel
    pub(super) fn carrier_busy(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        self.cancel_timer(TimerKind::CarrierSenseExit);

        match self.state {
            MacState::CarrierSensing | MacState::Default => (),
            state => {
                trace!("Ignoring carrier busy in state {}", state.name());
                return Ok(())
            },
        }

        self.stats.carrier_busy = self.stats.carrier_busy.saturating_add(1);

        if self.tx_pending && self.config.busy_policy == BusyPolicy::NonBlocking {
            if let Some(f) = self.tx_queue.pop() {
                warn!("Carrier busy, dropped {} byte frame for {:?}", f.len(), f.header.destination);
                self.stats.busy_dropped = self.stats.busy_dropped.saturating_add(1);
            }
            if self.tx_queue.is_empty() {
                self.tx_pending = false;
            }
        }

        // Stay awake long enough to catch a frame from the train in progress
        self.cancel_duty_timers();
        self.set_state(MacState::ExpectingReceive, "carrier busy");

        self.reschedule(now, TimerKind::Sleep, self.drifted(self.guard_period()))
    }

    /// Carrier sense completed without energy on the channel
    pub(super) fn carrier_free(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        if self.state != MacState::CarrierSensing {
            trace!("Ignoring carrier sense exit in state {}", self.state.name());
            return Ok(())
        }

        self.set_state(MacState::Default, "carrier free");

        if self.tx_pending {
            self.cancel_duty_timers();
            self.schedule_in(now, 0, LocalEvent::CheckTxBuffer)?;
            return Ok(())
        }

        let awake = now.saturating_sub(self.last_wakeup);
        let remaining = self.config.listen_interval.saturating_sub(awake);

        if remaining > self.info.cs_valid_delay + CARRIER_SENSE_INTERVAL {
            self.initiate_carrier_sense(now)

        } else if self.timers.get(TimerKind::Sleep).is_none() {
            // Sleep timer fired during the last peek
            debug!("Listen period over, sleeping at {} us", now);
            self.reschedule(now, TimerKind::Sleep, 0)

        } else {
            Ok(())
        }
    }

    /// Time to receive two maximum size frames, without phy overhead
    pub(super) fn guard_period(&self) -> Ts {
        let bits = self.config.max_frame_size as Ts * 8;
        2 * (bits * 1000 / self.info.data_rate_kbps.max(1) as Ts)
    }
}
