//! Shared MAC test harness

use std::vec::Vec;

use ieee802154::mac::ShortAddress;
use rand::rngs::mock::StepRng;

use crate::Ts;
use crate::timer::mock::MockTimer;
use crate::phy::{RadioInfo, mock::{MockRadio, Op}};
use crate::net::{FixedDrift, NetFrame, mock::MockNetwork};

use super::{Config, Frame, Mac, MacEvent};

pub type TestMac = Mac<MockRadio, MockNetwork, MockTimer, StepRng>;

/// 2 kbit/s radio, a 69 byte frame spends 300 ms on air
pub fn slow_radio() -> RadioInfo {
    RadioInfo {
        data_rate_kbps: 2,
        phy_overhead: 6,
        cs_valid_delay: 500,
    }
}

/// 1 s sleep, 100 ms listen
pub fn config() -> Config {
    Config {
        sleep_interval: 1_000_000,
        listen_interval: 100_000,
        ..Default::default()
    }
}

/// Network frame with `len` bytes of payload
pub fn net_frame(destination: &str, len: usize) -> NetFrame {
    let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
    NetFrame::new(destination, &payload).unwrap()
}

/// Data frame from `source` as received over the air
pub fn rx_frame(source: u16, len: usize) -> Frame {
    Frame::encapsulate(ShortAddress(source), net_frame("1", len), &config()).unwrap()
}

pub struct Harness {
    pub mac: TestMac,
    pub radio: MockRadio,
    pub net: MockNetwork,
    pub timer: MockTimer,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self::with_drift(config, 1.0)
    }

    pub fn with_drift(config: Config, drift: f32) -> Self {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let radio = MockRadio::new(slow_radio());
        let net = MockNetwork::new();
        let timer = MockTimer::new();

        let mac = Mac::new(ShortAddress(1), config, radio.clone(), net.clone(),
            &FixedDrift(drift), timer.clone(), StepRng::new(0, 0)).unwrap();

        Self { mac, radio, net, timer }
    }

    pub fn handle(&mut self, event: MacEvent) {
        self.mac.handle(event).unwrap();
    }

    pub fn tick(&mut self) {
        self.mac.tick().unwrap();
    }

    pub fn now(&self) -> Ts {
        self.timer.val()
    }

    pub fn set_now(&mut self, t: Ts) {
        self.timer.set_us(t);
    }

    /// Deliver every local event due up to and including `t`, leaving the clock at `t`
    pub fn run_until(&mut self, t: Ts) {
        while let Some(d) = self.mac.next_deadline() {
            if d > t {
                break;
            }
            if d > self.timer.val() {
                self.timer.set_us(d);
            }
            self.mac.tick().unwrap();
        }

        if t > self.timer.val() {
            self.timer.set_us(t);
        }
    }

    /// Transmit delays issued since the last `take`
    pub fn tx_delays(&self) -> Vec<Ts> {
        self.radio.transmissions().iter().map(|(_, d)| *d).collect()
    }

    /// Number of carrier sense operations issued
    pub fn senses(&self) -> usize {
        self.radio.ops().iter().filter(|o| matches!(o, Op::Sense(_))).count()
    }
}
