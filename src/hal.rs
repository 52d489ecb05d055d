//! Adaptor driving [`radio`] HAL devices as a SpeckMAC [`Radio`]
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte
//
// MAC radio commands carry delays, these are held as pending operations and
// applied by `HalRadio::poll`, which also reports asynchronous radio events
// to be passed on to `Mac::handle`.

use core::fmt::Debug;

use heapless::Vec;
use radio::{State, Busy, Transmit, Receive, Rssi, ReceiveInfo, RadioState};

use crate::log::{trace, debug, warn};
use crate::{Ts, MAX_PAYLOAD_LEN, MAX_ROUTE_LEN, timer::Timer};
use crate::phy::{CarrierSense, Radio, RadioInfo};
use crate::speck::{MacEvent, Train, packet::{Frame, FrameError, HEADER_LEN}};

/// Maximum encoded frame length
pub const MAX_ENCODED_LEN: usize = HEADER_LEN + MAX_ROUTE_LEN + MAX_PAYLOAD_LEN;

/// Maximum number of delayed sleep and listen operations
pub const MAX_PENDING_OPS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct HalConfig {
    /// Radio characteristics reported to the MAC
    pub info: RadioInfo,

    /// RSSI above which the carrier is considered busy
    pub busy_threshold: i16,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            // 2.4 GHz O-QPSK, 12 symbol RX turnaround
            info: RadioInfo {
                data_rate_kbps: 250,
                phy_overhead: 6,
                cs_valid_delay: 192,
            },
            busy_threshold: -85,
        }
    }
}

/// Radio adaptor errors
#[derive(Debug, Clone, PartialEq)]
pub enum HalError<E> {
    /// Frame encoding or decoding failed
    Frame(FrameError),

    /// Delayed operation storage exhausted
    QueueFull,

    /// A different frame is already scheduled for transmission
    Busy,

    /// Underlying radio error
    Radio(E),
}

impl <E> From<FrameError> for HalError<E> {
    fn from(e: FrameError) -> Self {
        HalError::Frame(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Idle,
    Sleeping,
    Listening{ since: Ts },
    Sensing{ since: Ts, until: Ts },
    Transmitting,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    Sleep,
    Listen,
    Transmit,
}

/// Copies of the current frame awaiting transmission
#[derive(Debug, Clone, Copy, PartialEq)]
struct TxTrain {
    start: Ts,
    train: Train,
    next: u32,
}

impl TxTrain {
    /// Start time of the next copy
    fn next_at(&self) -> Option<Ts> {
        match self.next < self.train.copies() {
            true => Some(self.start + self.train.offset(self.next)),
            false => None,
        }
    }
}

/// Adaptor over a `radio` device implementing the MAC radio interface
pub struct HalRadio<R, T> {
    radio: R,
    timer: T,
    config: HalConfig,

    mode: Mode,
    in_train: bool,

    seq: u32,
    pending: Vec<(Ts, u32, Pending), MAX_PENDING_OPS>,

    tx_train: Option<TxTrain>,

    /// Encoded frame for the current train
    tx_frame: Vec<u8, MAX_ENCODED_LEN>,

    rx_buff: [u8; MAX_ENCODED_LEN],
}

impl <R, I, E, T> HalRadio<R, T>
where
    R: State<Error=E> + Busy<Error=E> + Transmit<Error=E> + Receive<Info=I, Error=E> + Rssi<Error=E>,
    I: ReceiveInfo + Default + Debug,
    E: Debug,
    T: Timer,
{
    pub fn new(radio: R, timer: T, config: HalConfig) -> Self {
        Self {
            radio,
            timer,
            config,
            mode: Mode::Idle,
            in_train: false,
            seq: 0,
            pending: Vec::new(),
            tx_train: None,
            tx_frame: Vec::new(),
            rx_buff: [0u8; MAX_ENCODED_LEN],
        }
    }

    /// Apply due radio operations and poll for radio events
    pub fn poll(&mut self) -> Result<Option<MacEvent>, HalError<E>> {
        let now = self.timer.ticks_us();

        if self.mode == Mode::Transmitting {
            if !self.radio.check_transmit().map_err(HalError::Radio)? {
                return Ok(None)
            }

            self.mode = Mode::Idle;

            if !self.tx_pending() {
                debug!("Frame train complete at {} us", now);
                self.in_train = false;
                self.tx_train = None;
                return Ok(Some(MacEvent::RadioStoppedTx))
            }
        }

        if let Some(op) = self.pop_due(now) {
            trace!("Apply {:?} at {} us", op, now);

            match op {
                Pending::Sleep => {
                    self.radio.set_state(<R as State>::State::sleep()).map_err(HalError::Radio)?;
                    self.mode = Mode::Sleeping;
                },
                Pending::Listen => {
                    self.radio.start_receive().map_err(HalError::Radio)?;
                    self.mode = Mode::Listening{ since: now };
                },
                Pending::Transmit => {
                    self.radio.start_transmit(&self.tx_frame).map_err(HalError::Radio)?;
                    self.mode = Mode::Transmitting;

                    if !self.in_train {
                        self.in_train = true;
                        return Ok(Some(MacEvent::RadioStartedTx))
                    }
                },
            }

            return Ok(None)
        }

        let since = match self.mode {
            Mode::Listening{ since } | Mode::Sensing{ since, .. } => since,
            _ => return Ok(None),
        };

        if self.radio.check_receive(true).map_err(HalError::Radio)? {
            let (n, info) = self.radio.get_received(&mut self.rx_buff).map_err(HalError::Radio)?;
            self.radio.start_receive().map_err(HalError::Radio)?;

            match Frame::decode(&self.rx_buff[..n]) {
                Ok(f) => {
                    debug!("Received {} bytes ({:?})", n, info);
                    self.mode = Mode::Listening{ since };
                    return Ok(Some(MacEvent::FrameReceived(f)))
                },
                Err(e) => warn!("Discarding {} byte frame: {:?}", n, e),
            }
        }

        if let Mode::Sensing{ until, .. } = self.mode {
            let rssi = self.radio.poll_rssi().map_err(HalError::Radio)?;

            if rssi > self.config.busy_threshold {
                debug!("Carrier busy (rssi: {})", rssi);
                self.mode = Mode::Listening{ since };
                return Ok(Some(MacEvent::CarrierBusy))
            }

            if now >= until {
                self.mode = Mode::Listening{ since };
            }
        }

        Ok(None)
    }

    /// Time of the next pending radio operation
    pub fn next_deadline(&self) -> Option<Ts> {
        let op = self.pending.iter().map(|p| p.0).min();
        let tx = self.tx_train.and_then(|t| t.next_at());

        match (op, tx) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn tx_pending(&self) -> bool {
        self.tx_train.and_then(|t| t.next_at()).is_some()
    }

    /// Load a frame and its copy schedule, starting `delay` from now
    fn load_train(&mut self, frame: &Frame, train: Train, delay: Ts) -> Result<(), HalError<E>> {
        if self.tx_pending() || self.mode == Mode::Transmitting {
            return Err(HalError::Busy)
        }

        let mut buff = [0u8; MAX_ENCODED_LEN];
        let n = frame.encode(&mut buff)?;

        self.tx_frame.clear();
        self.tx_frame.extend_from_slice(&buff[..n]).map_err(|_| HalError::Frame(FrameError::BufferLength))?;

        let start = self.timer.ticks_us() + delay;
        trace!("Loaded train of {} copies at {} us", train.copies(), start);

        self.tx_train = Some(TxTrain{ start, train, next: 0 });

        Ok(())
    }

    fn schedule(&mut self, delay: Ts, op: Pending) -> Result<(), HalError<E>> {
        let at = self.timer.ticks_us() + delay;
        let seq = self.seq;

        self.pending.push((at, seq, op)).map_err(|_| HalError::QueueFull)?;
        self.seq = self.seq.wrapping_add(1);

        Ok(())
    }

    fn pop_due(&mut self, now: Ts) -> Option<Pending> {
        let op = self.pending.iter()
            .enumerate()
            .filter(|(_, p)| p.0 <= now)
            .min_by_key(|(_, p)| (p.0, p.1))
            .map(|(i, p)| (i, p.0));

        let tx = self.tx_train.and_then(|t| t.next_at()).filter(|at| *at <= now);

        match (op, tx) {
            // Sleep and listen operations win ties
            (Some((i, at)), Some(tx)) if at <= tx => Some(self.pending.swap_remove(i).2),
            (Some((i, _)), None) => Some(self.pending.swap_remove(i).2),
            (_, Some(_)) => {
                if let Some(t) = self.tx_train.as_mut() {
                    t.next += 1;
                }
                Some(Pending::Transmit)
            },
            (None, None) => None,
        }
    }
}

impl <R, I, E, T> Radio for HalRadio<R, T>
where
    R: State<Error=E> + Busy<Error=E> + Transmit<Error=E> + Receive<Info=I, Error=E> + Rssi<Error=E>,
    I: ReceiveInfo + Default + Debug,
    E: Debug,
    T: Timer,
{
    type Error = HalError<E>;

    fn enter_sleep(&mut self, delay: Ts) -> Result<(), Self::Error> {
        self.schedule(delay, Pending::Sleep)
    }

    fn enter_listen(&mut self, delay: Ts) -> Result<(), Self::Error> {
        self.schedule(delay, Pending::Listen)
    }

    fn enter_transmit(&mut self, frame: &Frame, delay: Ts) -> Result<(), Self::Error> {
        let single = Train{ tx_time: 0, redundancy: 0, drift: 1.0 };
        self.load_train(frame, single, delay)
    }

    fn enter_transmit_train(&mut self, frame: &Frame, train: &Train) -> Result<(), Self::Error> {
        self.load_train(frame, *train, 0)
    }

    fn sense_carrier(&mut self, interval: Ts) -> Result<(), Self::Error> {
        let now = self.timer.ticks_us();

        match self.mode {
            Mode::Listening{ since } | Mode::Sensing{ since, .. } => {
                self.mode = Mode::Sensing{ since, until: now + interval };
            },
            m => warn!("Carrier sense requested in mode {:?}", m),
        }

        Ok(())
    }

    fn carrier_sense_valid(&mut self) -> Result<CarrierSense, Self::Error> {
        let now = self.timer.ticks_us();

        if self.in_train || self.mode == Mode::Transmitting {
            return Ok(CarrierSense::InTransmit)
        }

        let cs = match self.mode {
            Mode::Sleeping | Mode::Idle => CarrierSense::Sleeping,
            Mode::Listening{ since } | Mode::Sensing{ since, .. } if now < since + self.config.info.cs_valid_delay => CarrierSense::NotReady,
            _ => CarrierSense::Valid,
        };

        Ok(cs)
    }

    fn info(&self) -> RadioInfo {
        self.config.info.clone()
    }
}
