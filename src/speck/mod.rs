//! SpeckMAC-D MAC Implementation
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte
//
// The MAC is purely reactive: external components deliver `MacEvent`s via
// `Mac::handle`, and events the MAC schedules for itself are delivered in
// time order by `Mac::tick`. Each event is processed to completion before
// the next, no call ever blocks.

use core::fmt::Debug;

use ieee802154::mac::ShortAddress;
use rand_core::RngCore;
use strum::IntoStaticStr;

use crate::log::{trace, debug, info, warn, verbose};
use crate::{Ts, error::MacError, timer::Timer};
use crate::phy::{Radio, RadioInfo};
use crate::net::{NetFrame, Network, Resources};

pub mod config;
pub use config::{Config, BusyPolicy, ConfigError};

pub mod packet;
pub use packet::{Frame, FrameError};

pub mod queue;
use queue::TxQueue;

pub mod sched;
use sched::{Scheduler, TimerSlots, RESERVED_SLOTS};
pub use sched::TimerKind;

pub mod train;
pub use train::Train;

mod duty;

mod cca;

#[cfg(test)]
mod fixture;


/// Duration of a single carrier sense in us
pub const CARRIER_SENSE_INTERVAL: Ts = 100;

/// Guard added to scheduled events that must follow a radio operation
pub const EPSILON: Ts = 1;

/// Scale a delay by a clock drift factor, rounding to the nearest us
pub fn drifted(t: Ts, drift: f32) -> Ts {
    (t as f64 * drift as f64 + 0.5) as Ts
}

/// MAC protocol states
#[derive(Debug, Clone, Copy, PartialEq, IntoStaticStr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacState {
    /// Idle, either listening or asleep under the duty cycle
    Default,
    /// Radio is transmitting a frame train
    Transmitting,
    /// Awaiting the outcome of a carrier sense
    CarrierSensing,
    /// Carrier was busy, awaiting an incoming frame train
    ExpectingReceive,
    /// Duty cycle suspended to attempt a transmission
    AttemptingTransmit,
}

impl MacState {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Node enable state
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// Awaiting startup, all other events are dropped
    Disabled,
    Enabled,
    /// Out of energy, all events are dropped
    Depleted,
}

/// Events delivered to the MAC by the radio, network layer and resource manager
#[derive(Debug, Clone, PartialEq)]
pub enum MacEvent {
    /// Start the MAC (from the network layer)
    Startup,
    /// Frame for transmission (from the network layer)
    NetworkFrame(NetFrame),
    /// Energy detected on the channel during carrier sense (from the radio)
    CarrierBusy,
    /// Radio started transmitting
    RadioStartedTx,
    /// Radio finished transmitting queued frames
    RadioStoppedTx,
    /// Frame received by the radio
    FrameReceived(Frame),
    /// Node has run out of energy (from the resource manager)
    OutOfEnergy,
}

/// Events scheduled by the MAC for itself
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    /// Duty cycle or carrier sense timer expiry
    Timer(TimerKind),
    /// Deferred push of an encapsulated frame into the TX queue
    PushTxBuffer(Frame),
    /// Suspend duty cycling and start a transmit attempt
    InitiateTransmission,
    PerformCarrierSense,
    /// Send the frame at the head of the TX queue
    CheckTxBuffer,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacStats {
    pub frames_received: u32,
    pub frames_sent: u32,
    pub copies_sent: u32,
    pub oversize_dropped: u32,
    pub invalid_dropped: u32,
    pub buffer_full_dropped: u32,
    pub busy_dropped: u32,
    pub cs_retries: u32,
    pub carrier_busy: u32,
    pub sleep_rejected: u32,
    pub wakeup_rejected: u32,
}

impl MacStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// SpeckMAC-D MAC
/// Generic over a Radio (R), Network layer (N), Timer (T) and random source (G)
pub struct Mac<R, N, T, G> {
    pub address: ShortAddress,

    config: Config,
    radio: R,
    info: RadioInfo,
    network: N,
    timer: T,
    rng: G,
    drift: f32,

    status: Status,
    state: MacState,
    tx_pending: bool,
    last_wakeup: Ts,
    train: Option<Train>,

    tx_queue: TxQueue,
    events: Scheduler<LocalEvent>,
    timers: TimerSlots,

    stats: MacStats,
}

impl <R, N, T, G> Mac<R, N, T, G>
where
    R: Radio,
    R::Error: Debug,
    N: Network,
    T: Timer,
    G: RngCore,
{
    /// Create a new (disabled) MAC, the radio is put to sleep until [`MacEvent::Startup`]
    pub fn new<S: Resources>(address: ShortAddress, config: Config, mut radio: R, network: N, resources: &S, timer: T, rng: G) -> Result<Self, MacError<R::Error>> {
        config.validate()?;

        let info = radio.info();
        let drift = resources.clock_drift();

        radio.enter_sleep(0).map_err(MacError::Radio)?;

        debug!("Setup MAC {:?} with drift {} at {} us", address, drift, timer.ticks_us());

        Ok(Self {
            address,
            tx_queue: TxQueue::new(config.buffer_size),
            config,
            radio,
            info,
            network,
            timer,
            rng,
            drift,

            status: Status::Disabled,
            state: MacState::Default,
            tx_pending: false,
            last_wakeup: 0,
            train: None,

            events: Scheduler::new(),
            timers: TimerSlots::default(),

            stats: MacStats::new(),
        })
    }

    /// Handle an event from the radio, network layer or resource manager
    pub fn handle(&mut self, event: MacEvent) -> Result<(), MacError<R::Error>> {
        let now = self.timer.ticks_us();

        match (self.status, &event) {
            (Status::Enabled, _) | (Status::Disabled, MacEvent::Startup) => (),
            (status, _) => {
                trace!("Dropped {:?} while {:?}", event, status);
                return Ok(())
            },
        }

        match event {
            MacEvent::Startup => self.startup(now),
            MacEvent::NetworkFrame(f) => self.network_frame(now, f),
            MacEvent::CarrierBusy => self.carrier_busy(now),
            MacEvent::RadioStartedTx => self.transmit_started(now),
            MacEvent::RadioStoppedTx => self.finish_data_transmission(now),
            MacEvent::FrameReceived(f) => self.frame_received(now, f),
            MacEvent::OutOfEnergy => {
                self.deplete();
                Ok(())
            },
        }
    }

    /// Process all local events due at the current time
    pub fn tick(&mut self) -> Result<(), MacError<R::Error>> {
        loop {
            let now = self.timer.ticks_us();

            let (handle, at, event) = match self.events.pop_due(now) {
                Some(e) => e,
                None => return Ok(()),
            };

            if let LocalEvent::Timer(kind) = &event {
                self.timers.release(*kind, handle);
            }

            if self.status != Status::Enabled {
                trace!("Dropped {:?} while {:?}", event, self.status);
                continue;
            }

            trace!("Fire {:?} (due {} us) at {} us", event, at, now);

            self.fire(now, event)?;
        }
    }

    fn fire(&mut self, now: Ts, event: LocalEvent) -> Result<(), MacError<R::Error>> {
        match event {
            LocalEvent::Timer(TimerKind::Sleep) => self.enter_sleep(now),
            LocalEvent::Timer(TimerKind::Wakeup) => self.enter_listen(now),
            LocalEvent::Timer(TimerKind::CarrierSenseExit) => self.carrier_free(now),
            LocalEvent::PushTxBuffer(f) => {
                self.push_tx_buffer(f);
                Ok(())
            },
            LocalEvent::InitiateTransmission => self.initiate_transmission(now),
            LocalEvent::PerformCarrierSense => self.perform_carrier_sense(now),
            LocalEvent::CheckTxBuffer => self.send_data(now),
        }
    }

    /// Time of the next pending local event
    pub fn next_deadline(&self) -> Option<Ts> {
        self.events.next_deadline()
    }

    pub fn state(&self) -> MacState {
        self.state
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch MAC layer statistics
    pub fn stats(&self) -> MacStats {
        self.stats.clone()
    }

    /// Whether the MAC holds frames it intends to transmit
    pub fn tx_pending(&self) -> bool {
        self.tx_pending
    }

    pub fn queue_len(&self) -> usize {
        self.tx_queue.len()
    }

    /// Expiry time of the outstanding timer of the provided kind
    pub fn timer_deadline(&self, kind: TimerKind) -> Option<Ts> {
        self.timers.get(kind).and_then(|h| self.events.deadline(h))
    }

    /// Stop the MAC, discarding queued frames and pending events.
    /// Returns the number of frames discarded.
    pub fn shutdown(&mut self) -> usize {
        let n = self.tx_queue.clear();
        self.events.clear();
        self.timers = TimerSlots::default();
        self.tx_pending = false;

        // Depletion is permanent
        if self.status != Status::Depleted {
            self.status = Status::Disabled;
        }

        info!("MAC {:?} shutdown, discarded {} queued frames", self.address, n);

        n
    }

    fn startup(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        if self.status == Status::Enabled {
            debug!("Ignoring startup, MAC already running");
            return Ok(())
        }

        info!("MAC {:?} startup at {} us", self.address, now);

        self.status = Status::Enabled;
        self.set_state(MacState::Default, "startup");

        // Wake now, sleep is scheduled on wakeup
        self.reschedule(now, TimerKind::Wakeup, 0)
    }

    fn deplete(&mut self) {
        warn!("MAC {:?} out of energy, disabling", self.address);

        self.status = Status::Depleted;
        self.events.clear();
        self.timers = TimerSlots::default();
    }

    fn network_frame(&mut self, now: Ts, inner: NetFrame) -> Result<(), MacError<R::Error>> {
        let frame = match Frame::encapsulate(self.address, inner, &self.config) {
            Ok(f) => f,
            Err(e @ FrameError::Oversize(_)) => {
                warn!("Dropped network frame: {:?} (max {})", e, self.config.max_frame_size);
                self.stats.oversize_dropped = self.stats.oversize_dropped.saturating_add(1);
                return Ok(())
            },
            Err(e) => {
                warn!("Dropped network frame: {:?}", e);
                self.stats.invalid_dropped = self.stats.invalid_dropped.saturating_add(1);
                return Ok(())
            },
        };

        // Frames awaiting their push and transmit attempt may not starve the duty cycle
        if self.events.available() < 2 + RESERVED_SLOTS {
            warn!("Scheduler full ({} events), frame dropped", self.events.len());
            self.buffer_full();
            return Ok(())
        }

        verbose!(self.config.print_debug_info, "Queueing {} byte frame for {:?}", frame.len(), frame.header.destination);

        let offset = self.random_below(self.config.random_tx_offset);

        self.schedule_in(now, 0, LocalEvent::PushTxBuffer(frame))?;
        self.schedule_in(now, self.drifted(offset), LocalEvent::InitiateTransmission)?;

        self.tx_pending = true;

        Ok(())
    }

    fn push_tx_buffer(&mut self, frame: Frame) {
        if let Err(_f) = self.tx_queue.push(frame) {
            warn!("TX queue full ({} frames), frame dropped", self.tx_queue.capacity());
            self.buffer_full();
        }
    }

    fn buffer_full(&mut self) {
        self.stats.buffer_full_dropped = self.stats.buffer_full_dropped.saturating_add(1);
        self.network.buffer_full();
    }

    fn initiate_transmission(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        if self.state != MacState::Default {
            verbose!(self.config.print_debug_info, "Deferring transmit attempt in state {}", self.state.name());
            return Ok(())
        }

        self.set_state(MacState::AttemptingTransmit, "initiate transmission");
        self.cancel_duty_timers();

        let jitter = self.random_below(self.config.tx_jitter);
        self.radio.enter_listen(jitter).map_err(MacError::Radio)?;

        self.initiate_carrier_sense(now)
    }

    fn transmit_started(&mut self, now: Ts) -> Result<(), MacError<R::Error>> {
        match self.state {
            MacState::CarrierSensing => {
                // Channel was taken by the radio while sensing
                self.set_state(MacState::Default, "radio started tx while sensing");
                self.schedule_in(now, 0, LocalEvent::CheckTxBuffer)?;
            },
            MacState::Default => {
                self.set_state(MacState::Transmitting, "radio started tx");
            },
            _ => (),
        }

        Ok(())
    }

    fn frame_received(&mut self, now: Ts, frame: Frame) -> Result<(), MacError<R::Error>> {
        self.stats.frames_received = self.stats.frames_received.saturating_add(1);

        debug!("Received {} byte frame from {:?} at {} us", frame.len(), frame.header.source, now);

        self.set_state(MacState::Default, "frame received");

        // Reception is complete, sleep now
        self.cancel_duty_timers();
        self.reschedule(now, TimerKind::Sleep, 0)?;

        self.network.deliver(frame.decapsulate());

        Ok(())
    }

    fn set_state(&mut self, next: MacState, reason: &str) {
        if self.state != next {
            verbose!(self.config.print_state_transitions, "MAC {:?} state {} -> {} ({})",
                self.address.0, self.state.name(), next.name(), reason);
        }
        self.state = next;
    }

    fn drifted(&self, t: Ts) -> Ts {
        drifted(t, self.drift)
    }

    /// Uniform random value in `[0, max)`
    fn random_below(&mut self, max: Ts) -> Ts {
        match max {
            0 => 0,
            _ => self.rng.next_u64() % max,
        }
    }

    fn schedule_in(&mut self, now: Ts, delay: Ts, event: LocalEvent) -> Result<sched::Handle, MacError<R::Error>> {
        self.events.schedule(now + delay, event).map_err(|e| {
            warn!("Scheduler full, dropped {:?}", e);
            MacError::SchedulerFull
        })
    }

    /// Cancel any outstanding timer of the provided kind and schedule a new one
    fn reschedule(&mut self, now: Ts, kind: TimerKind, delay: Ts) -> Result<(), MacError<R::Error>> {
        self.cancel_timer(kind);

        let h = self.schedule_in(now, delay, LocalEvent::Timer(kind))?;
        self.timers.replace(kind, Some(h));

        Ok(())
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        if let Some(h) = self.timers.replace(kind, None) {
            self.events.cancel(h);
        }
    }

    fn cancel_duty_timers(&mut self) {
        self.cancel_timer(TimerKind::Sleep);
        self.cancel_timer(TimerKind::Wakeup);
    }
}

#[cfg(test)]
mod test {
    use ieee802154::mac::ShortAddress;

    use crate::phy::mock::Op;
    use super::fixture::*;
    use super::*;

    #[test]
    fn end_to_end_transmit() {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);
        h.handle(MacEvent::NetworkFrame(net_frame("2", 58)));

        assert!(h.mac.tx_pending());

        // Peek at 0 us, channel free at 101 us
        h.run_until(101);

        let tx = h.radio.transmissions();
        assert_eq!(tx.len(), 4);
        for (f, _) in &tx {
            assert_eq!(f.len(), 69);
            assert_eq!(f.header.source, ShortAddress(1));
            assert_eq!(f.header.destination, ShortAddress(2));
        }
        assert_eq!(h.tx_delays(), &[0, 300_000, 600_000, 900_000]);
        assert_eq!(h.mac.queue_len(), 0);

        h.handle(MacEvent::RadioStartedTx);
        assert_eq!(h.mac.state(), MacState::Transmitting);

        h.set_now(1_200_101);
        h.handle(MacEvent::RadioStoppedTx);

        assert_eq!(h.mac.state(), MacState::Default);
        assert!(!h.mac.tx_pending());
        assert_eq!(h.radio.ops().last(), Some(&Op::Sleep(0)));
        assert_eq!(h.mac.timer_deadline(TimerKind::Wakeup), Some(1_200_101 + 1_000_000));
        assert_eq!(h.mac.next_deadline(), Some(2_200_101));

        let s = h.mac.stats();
        assert_eq!(s.frames_sent, 1);
        assert_eq!(s.copies_sent, 4);
    }

    #[test]
    fn events_dropped_before_startup() {
        let mut h = Harness::new(config());
        assert_eq!(h.radio.take(), &[Op::Sleep(0)]);

        h.handle(MacEvent::NetworkFrame(net_frame("2", 10)));
        h.handle(MacEvent::CarrierBusy);
        h.handle(MacEvent::RadioStartedTx);
        h.handle(MacEvent::RadioStoppedTx);
        h.handle(MacEvent::FrameReceived(rx_frame(4, 10)));
        h.tick();

        assert_eq!(h.mac.status(), Status::Disabled);
        assert_eq!(h.mac.state(), MacState::Default);
        assert_eq!(h.mac.queue_len(), 0);
        assert!(!h.mac.tx_pending());
        assert_eq!(h.mac.next_deadline(), None);
        assert_eq!(h.mac.stats(), MacStats::new());
        assert!(h.radio.take().is_empty());
        assert!(h.net.take().is_empty());
    }

    #[test]
    fn startup_once() {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);
        assert_eq!(h.mac.status(), Status::Enabled);
        assert_eq!(h.mac.timer_deadline(TimerKind::Wakeup), Some(0));

        h.set_now(10);
        h.handle(MacEvent::Startup);
        assert_eq!(h.mac.timer_deadline(TimerKind::Wakeup), Some(0));
    }

    #[test]
    fn oversize_dropped() {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);

        // 118 + 11 > 128
        h.handle(MacEvent::NetworkFrame(net_frame("2", 118)));
        h.handle(MacEvent::NetworkFrame(net_frame("sink", 10)));
        h.tick();

        assert_eq!(h.mac.queue_len(), 0);
        assert!(!h.mac.tx_pending());
        assert_eq!(h.mac.stats().oversize_dropped, 1);
        assert_eq!(h.mac.stats().invalid_dropped, 1);

        // A maximum size frame is accepted
        h.handle(MacEvent::NetworkFrame(net_frame("-1", 117)));
        h.tick();
        assert_eq!(h.mac.queue_len(), 1);
    }

    #[test]
    fn buffer_full_notifies_network() {
        let c = Config{ buffer_size: 1, ..config() };
        let mut h = Harness::new(c);
        h.handle(MacEvent::Startup);
        h.handle(MacEvent::NetworkFrame(net_frame("2", 10)));
        h.handle(MacEvent::NetworkFrame(net_frame("3", 10)));
        h.tick();

        assert_eq!(h.mac.queue_len(), 1);
        assert_eq!(h.net.buffer_full_count(), 1);
        assert_eq!(h.mac.stats().buffer_full_dropped, 1);

        // Second attempt deferred while the first is in progress
        assert_eq!(h.mac.state(), MacState::CarrierSensing);
    }

    #[test]
    fn burst_fills_queue() {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);
        h.tick();
        assert_eq!(h.mac.state(), MacState::CarrierSensing);

        let n = h.mac.config().buffer_size;
        for _ in 0..n {
            h.handle(MacEvent::NetworkFrame(net_frame("2", 10)));
        }
        h.tick();

        assert_eq!(h.mac.queue_len(), n);
        assert_eq!(h.net.buffer_full_count(), 0);
        assert_eq!(h.mac.stats(), MacStats::new());

        // Excess frames are dropped with a notification, whether the
        // queue or the event scheduler runs out of room first
        for _ in 0..40 {
            h.handle(MacEvent::NetworkFrame(net_frame("3", 10)));
        }
        h.tick();

        assert_eq!(h.mac.queue_len(), n);
        assert_eq!(h.net.buffer_full_count(), 40);
        assert_eq!(h.mac.stats().buffer_full_dropped, 40);

        // Duty cycle and transmission continue
        h.run_until(101);
        assert_eq!(h.radio.transmissions().len(), 10);
        assert_eq!(h.mac.queue_len(), n - 1);
        assert!(h.mac.tx_pending());
    }

    #[test]
    fn started_tx_while_sensing() {
        let mut h = transmit_pending();
        assert_eq!(h.mac.state(), MacState::CarrierSensing);
        assert_eq!(h.mac.timer_deadline(TimerKind::CarrierSenseExit), Some(101));
        h.radio.take();

        h.set_now(40);
        h.handle(MacEvent::RadioStartedTx);
        assert_eq!(h.mac.state(), MacState::Default);
        assert_eq!(h.mac.next_deadline(), Some(40));

        // Train issued at the same instant
        h.tick();
        assert_eq!(h.tx_delays().len(), 10);
        assert_eq!(h.tx_delays()[..2], [0, 108_000]);
        assert_eq!(h.mac.queue_len(), 0);

        // Late carrier sense exit is ignored
        h.run_until(101);
        assert_eq!(h.mac.state(), MacState::Default);
        assert_eq!(h.radio.transmissions().len(), 10);
        assert_eq!(h.mac.next_deadline(), None);
        assert_eq!(h.mac.stats().frames_sent, 1);
    }

    #[test]
    fn frame_received() {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);
        h.tick();

        let f = rx_frame(9, 20);
        let inner = f.inner().clone();

        h.set_now(500);
        h.handle(MacEvent::FrameReceived(f));

        assert_eq!(h.mac.state(), MacState::Default);
        assert_eq!(h.net.take(), &[inner]);
        assert_eq!(h.mac.stats().frames_received, 1);
        assert_eq!(h.mac.timer_deadline(TimerKind::Sleep), Some(500));

        h.run_until(500);
        assert_eq!(h.radio.ops().last(), Some(&Op::Sleep(0)));
        assert_eq!(h.mac.timer_deadline(TimerKind::Wakeup), Some(1_000_500));
    }

    #[test]
    fn out_of_energy() {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);
        h.handle(MacEvent::NetworkFrame(net_frame("2", 10)));
        h.radio.take();

        h.handle(MacEvent::OutOfEnergy);
        assert_eq!(h.mac.status(), Status::Depleted);
        assert_eq!(h.mac.next_deadline(), None);

        h.handle(MacEvent::Startup);
        h.run_until(2_000_000);

        assert_eq!(h.mac.status(), Status::Depleted);
        assert_eq!(h.mac.next_deadline(), None);
        assert!(h.radio.take().is_empty());
    }

    #[test]
    fn shutdown_discards_frames() {
        let mut h = transmit_pending();

        assert_eq!(h.mac.shutdown(), 1);
        assert_eq!(h.mac.status(), Status::Disabled);
        assert_eq!(h.mac.queue_len(), 0);
        assert_eq!(h.mac.next_deadline(), None);

        // May be restarted
        h.handle(MacEvent::Startup);
        assert_eq!(h.mac.status(), Status::Enabled);
        assert_eq!(h.mac.next_deadline(), Some(h.now()));
    }

    #[test]
    fn shutdown_keeps_depleted() {
        let mut h = transmit_pending();
        h.handle(MacEvent::OutOfEnergy);

        assert_eq!(h.mac.shutdown(), 1);
        assert_eq!(h.mac.status(), Status::Depleted);

        h.handle(MacEvent::Startup);
        assert_eq!(h.mac.status(), Status::Depleted);
        assert_eq!(h.mac.next_deadline(), None);
    }

    fn transmit_pending() -> Harness {
        let mut h = Harness::new(config());
        h.handle(MacEvent::Startup);
        h.handle(MacEvent::NetworkFrame(net_frame("2", 10)));
        h.tick();
        h
    }

    #[test]
    fn state_names() {
        assert_eq!(MacState::ExpectingReceive.name(), "ExpectingReceive");
        assert_eq!(MacState::Default.name(), "Default");
    }
}
