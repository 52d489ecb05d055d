//! Duty cycling, alternating radio sleep and listen periods

use core::fmt::Debug;

use rand_core::RngCore;

use crate::log::debug;
use crate::{Ts, error::MacError, timer::Timer};
use crate::phy::Radio;
use crate::net::Network;

use super::{Mac, MacState, TimerKind};

impl <R, N, T, G> Mac<R, N, T, G>
where
    R: Radio,
    R::Error: Debug,
    N: Network,
    T: Timer,
    G: RngCore,
{
    /// Put the radio to sleep and schedule the next wakeup
    pub(super) fn enter_sleep(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        if self.state == MacState::ExpectingReceive {
            self.set_state(MacState::Default, "expected receive timed out");
        }

        if self.state != MacState::Default {
            debug!("Radio sleep rejected in state {}", self.state.name());
            self.stats.sleep_rejected = self.stats.sleep_rejected.saturating_add(1);
            return Ok(())
        }

        self.radio.enter_sleep(0).map_err(MacError::Radio)?;

        self.reschedule(now, TimerKind::Wakeup, self.drifted(self.config.sleep_interval))
    }

    /// Wake the radio to listen, and peek the channel
    pub(super) fn enter_listen(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        if self.state != MacState::Default {
            debug!("Radio listen rejected in state {}", self.state.name());
            self.stats.wakeup_rejected = self.stats.wakeup_rejected.saturating_add(1);
            return Ok(())
        }

        self.radio.enter_listen(0).map_err(MacError::Radio)?;
        self.last_wakeup = now;

        self.reschedule(now, TimerKind::Sleep, self.drifted(self.config.listen_interval))?;

        self.initiate_carrier_sense(now)
    }
}

#[cfg(test)]
mod test {
    use crate::phy::{CarrierSense, mock::Op};
    use crate::speck::MacEvent;
    use crate::speck::fixture::*;
    use super::*;

    #[test]
    fn listen_then_peek() {
        let mut h = Harness::with_drift(config(), 1.5);
        h.handle(MacEvent::Startup);
        h.radio.take();

        h.tick();

        assert_eq!(h.radio.take(), &[
            Op::Listen(0),
            Op::SenseValid(CarrierSense::Valid),
            Op::Sense(100),
        ]);
        assert_eq!(h.mac.state(), MacState::CarrierSensing);
        assert_eq!(h.mac.last_wakeup, 0);

        // Listen period is drift scaled
        assert_eq!(h.mac.timer_deadline(TimerKind::Sleep), Some(150_000));
    }

    #[test]
    fn listen_rejected_leaves_state() {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);
        h.tick();
        h.radio.take();

        h.set_now(10);
        h.mac.enter_listen(10).unwrap();

        assert_eq!(h.mac.state(), MacState::CarrierSensing);
        assert_eq!(h.mac.last_wakeup, 0);
        assert_eq!(h.mac.stats().wakeup_rejected, 1);
        assert!(h.radio.take().is_empty());
    }

    #[test]
    fn sleep_rejected_leaves_state() {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);
        h.tick();
        h.radio.take();

        let wakeup = h.mac.timer_deadline(TimerKind::Wakeup);

        h.mac.enter_sleep(20).unwrap();

        assert_eq!(h.mac.state(), MacState::CarrierSensing);
        assert_eq!(h.mac.stats().sleep_rejected, 1);
        assert_eq!(h.mac.timer_deadline(TimerKind::Wakeup), wakeup);
        assert!(h.radio.take().is_empty());
    }

    #[test]
    fn sleep_after_expected_receive() {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);
        h.radio.take();

        h.mac.state = MacState::ExpectingReceive;
        h.set_now(5_000);
        h.mac.enter_sleep(5_000).unwrap();

        assert_eq!(h.mac.state(), MacState::Default);
        assert_eq!(h.radio.take(), &[Op::Sleep(0)]);

        // Existing wakeup replaced
        assert_eq!(h.mac.timer_deadline(TimerKind::Wakeup), Some(1_005_000));
        assert_eq!(h.mac.next_deadline(), Some(1_005_000));
    }

    #[test]
    fn duty_cycle() {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);

        h.run_until(100_000);

        assert_eq!(h.mac.state(), MacState::Default);
        assert_eq!(h.radio.ops().last(), Some(&Op::Sleep(0)));
        assert_eq!(h.mac.timer_deadline(TimerKind::Wakeup), Some(1_100_000));
        assert_eq!(h.mac.timer_deadline(TimerKind::Sleep), None);

        // Next listen period starts on wakeup
        h.run_until(1_100_000);
        assert_eq!(h.mac.last_wakeup, 1_100_000);
        assert_eq!(h.mac.timer_deadline(TimerKind::Sleep), Some(1_200_000));
    }
}
