//! Radio (physical layer) interface used by the MAC
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use crate::{Ts, speck::{packet::Frame, train::Train}};

/// Result of querying whether the radio can produce a valid carrier sense reading
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CarrierSense {
    /// Carrier sense reading is valid
    Valid,
    /// Radio is currently transmitting
    InTransmit,
    /// Radio is asleep and must be woken first
    Sleeping,
    /// Radio is listening but not yet settled
    NotReady,
    /// Radio specific reason code the MAC does not know how to handle
    Unknown(u8),
}

/// Static radio characteristics
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioInfo {
    /// Data rate in kbit/s
    pub data_rate_kbps: u32,

    /// Physical layer overhead (preamble, sync, length) in bytes
    pub phy_overhead: usize,

    /// Delay from entering listen mode until carrier sense is valid
    pub cs_valid_delay: Ts,
}

impl RadioInfo {
    /// Time in microseconds to transmit `len` bytes of MAC frame
    pub fn tx_time(&self, len: usize) -> Ts {
        let bits = (len + self.phy_overhead) as u64 * 8;
        bits * 1000 / self.data_rate_kbps.max(1) as u64
    }
}

/// Radio commands issued by the MAC.
///
/// Commands are one-way and must not block, delays are relative to the time
/// of the call. Asynchronous reports (carrier busy, transmit started / stopped,
/// frame received) are delivered back to the MAC via [`crate::speck::Mac::handle`].
///
/// A radio queues frames passed to `enter_transmit` and sends them back to back,
/// reporting `RadioStartedTx` on the first and `RadioStoppedTx` once the queue
/// has drained.
pub trait Radio {
    type Error: Debug;

    /// Enter low power mode after `delay`
    fn enter_sleep(&mut self, delay: Ts) -> Result<(), Self::Error>;

    /// Enter listen mode after `delay`
    fn enter_listen(&mut self, delay: Ts) -> Result<(), Self::Error>;

    /// Transmit a copy of the provided frame after `delay`
    fn enter_transmit(&mut self, frame: &Frame, delay: Ts) -> Result<(), Self::Error>;

    /// Transmit a train of copies of the provided frame, copy `i` starting
    /// `train.offset(i)` after the call.
    ///
    /// Radios with bounded command storage should override this to hold the
    /// train as a single entry.
    fn enter_transmit_train(&mut self, frame: &Frame, train: &Train) -> Result<(), Self::Error> {
        for i in 0..train.copies() {
            self.enter_transmit(frame, train.offset(i))?;
        }
        Ok(())
    }

    /// Sense the carrier for `interval`, reporting energy on the channel
    fn sense_carrier(&mut self, interval: Ts) -> Result<(), Self::Error>;

    /// Check whether a carrier sense reading would currently be valid
    fn carrier_sense_valid(&mut self) -> Result<CarrierSense, Self::Error>;

    /// Fetch static radio characteristics
    fn info(&self) -> RadioInfo;
}


#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;
    use std::collections::VecDeque;

    use super::*;

    /// Operations recorded by the [`MockRadio`]
    #[derive(Debug, Clone, PartialEq)]
    pub enum Op {
        Sleep(Ts),
        Listen(Ts),
        Transmit(Frame, Ts),
        Sense(Ts),
        SenseValid(CarrierSense),
    }

    #[derive(Debug, Default)]
    struct Inner {
        ops: Vec<Op>,
        cs: VecDeque<CarrierSense>,
        fail_transmit: bool,
    }

    /// Mock radio recording issued commands, clones share the same log
    #[derive(Clone, Debug)]
    pub struct MockRadio {
        info: RadioInfo,
        inner: Arc<Mutex<Inner>>,
    }

    impl MockRadio {
        pub fn new(info: RadioInfo) -> Self {
            Self {
                info,
                inner: Arc::new(Mutex::new(Inner::default())),
            }
        }

        /// Queue responses for upcoming `carrier_sense_valid` calls,
        /// once exhausted the radio reports `Valid`
        pub fn carrier_sense(&mut self, responses: &[CarrierSense]) {
            self.inner.lock().unwrap().cs.extend(responses.iter().cloned());
        }

        /// Reject subsequent transmit commands
        pub fn fail_transmit(&mut self, fail: bool) {
            self.inner.lock().unwrap().fail_transmit = fail;
        }

        /// Fetch and clear recorded operations
        pub fn take(&mut self) -> Vec<Op> {
            core::mem::take(&mut self.inner.lock().unwrap().ops)
        }

        /// Fetch recorded operations without clearing
        pub fn ops(&self) -> Vec<Op> {
            self.inner.lock().unwrap().ops.clone()
        }

        /// Fetch recorded transmissions
        pub fn transmissions(&self) -> Vec<(Frame, Ts)> {
            self.inner.lock().unwrap().ops.iter().filter_map(|o| match o {
                Op::Transmit(f, d) => Some((f.clone(), *d)),
                _ => None,
            }).collect()
        }

        fn push(&self, op: Op) {
            self.inner.lock().unwrap().ops.push(op);
        }
    }

    impl Radio for MockRadio {
        type Error = ();

        fn enter_sleep(&mut self, delay: Ts) -> Result<(), Self::Error> {
            self.push(Op::Sleep(delay));
            Ok(())
        }

        fn enter_listen(&mut self, delay: Ts) -> Result<(), Self::Error> {
            self.push(Op::Listen(delay));
            Ok(())
        }

        fn enter_transmit(&mut self, frame: &Frame, delay: Ts) -> Result<(), Self::Error> {
            if self.inner.lock().unwrap().fail_transmit {
                return Err(())
            }
            self.push(Op::Transmit(frame.clone(), delay));
            Ok(())
        }

        fn sense_carrier(&mut self, interval: Ts) -> Result<(), Self::Error> {
            self.push(Op::Sense(interval));
            Ok(())
        }

        fn carrier_sense_valid(&mut self) -> Result<CarrierSense, Self::Error> {
            let r = self.inner.lock().unwrap().cs.pop_front().unwrap_or(CarrierSense::Valid);
            self.push(Op::SenseValid(r));
            Ok(r)
        }

        fn info(&self) -> RadioInfo {
            self.info.clone()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tx_time_includes_phy_overhead() {
        let info = RadioInfo{ data_rate_kbps: 250, phy_overhead: 6, cs_valid_delay: 128 };

        // (25 + 6) bytes at 250 kbit/s
        assert_eq!(info.tx_time(25), 992);

        let slow = RadioInfo{ data_rate_kbps: 2, ..info };
        assert_eq!(slow.tx_time(69), 300_000);
    }
}
