//! SpeckMAC-D Network Simulation
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte
//
// Runs a fully connected network of SpeckMAC nodes over an ideal shared
// channel in simulated time. Transmissions overlapping at a receiver collide
// and are lost, receivers must be listening for the whole frame.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::convert::Infallible;

use log::{debug, info, warn};
use rand::{Rng, SeedableRng, rngs::StdRng};
use structopt::StructOpt;

use speckmac::prelude::*;


#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "3")]
    /// Number of nodes
    pub nodes: u16,

    #[structopt(long, default_value = "100ms", parse(try_from_str = humantime::parse_duration))]
    /// Radio sleep interval
    pub sleep: Duration,

    #[structopt(long, default_value = "10ms", parse(try_from_str = humantime::parse_duration))]
    /// Radio listen interval
    pub listen: Duration,

    #[structopt(long, default_value = "2s", parse(try_from_str = humantime::parse_duration))]
    /// Interval between frames generated by each node
    pub period: Duration,

    #[structopt(long, default_value = "20s", parse(try_from_str = humantime::parse_duration))]
    /// Simulated duration
    pub duration: Duration,

    #[structopt(long, default_value = "250")]
    /// Radio data rate in kbit/s
    pub data_rate: u32,

    #[structopt(long, default_value = "20")]
    /// Payload length in bytes
    pub payload: usize,

    #[structopt(long, default_value = "0.0001")]
    /// Maximum node clock drift (as a fraction)
    pub drift: f32,

    #[structopt(long)]
    /// Send to the broadcast address rather than a random neighbour
    pub broadcast: bool,

    #[structopt(long)]
    /// Drop frames when the carrier is busy rather than retrying
    pub non_blocking: bool,

    #[structopt(long, default_value = "1")]
    /// Random seed
    pub seed: u64,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

/// Maximum event rounds processed at a single instant
const MAX_ROUNDS: usize = 1000;


/// Simulation clock shared by all nodes
#[derive(Clone, Debug, Default)]
pub struct SimClock(Arc<Mutex<Ts>>);

impl SimClock {
    fn set(&self, t: Ts) {
        *self.0.lock().unwrap() = t;
    }
}

impl MacTimer for SimClock {
    fn ticks_ms(&self) -> u64 {
        *self.0.lock().unwrap() / 1000
    }

    fn ticks_us(&self) -> u64 {
        *self.0.lock().unwrap()
    }
}


#[derive(Clone, Debug)]
struct Transmission {
    source: u16,
    start: Ts,
    end: Ts,
    frame: Frame,
    delivered: bool,
}

#[derive(Debug, Default)]
struct Channel {
    transmissions: Vec<Transmission>,
}

impl Channel {
    /// Check for transmissions from other nodes in progress at `now`
    fn busy(&self, node: u16, now: Ts) -> bool {
        self.transmissions.iter().any(|t| t.source != node && t.start <= now && now < t.end)
    }

    /// Check whether a transmission overlapped any other
    fn collided(&self, t: &Transmission) -> bool {
        self.transmissions.iter().any(|o| o.source != t.source && o.start < t.end && t.start < o.end)
    }

    fn next_deadline(&self, now: Ts) -> Option<Ts> {
        self.transmissions.iter().filter(|t| !t.delivered && t.end > now).map(|t| t.end).min()
    }
}


#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Sleep,
    Listen{ since: Ts },
    Transmit{ end: Ts },
}

#[derive(Debug)]
enum Op {
    Sleep,
    Listen,
    Transmit(Frame),
}

#[derive(Debug)]
struct RadioState {
    mode: Mode,
    pending: Vec<(Ts, Op)>,
    sensing: Option<Ts>,
    in_train: bool,
    events: Vec<MacEvent>,
}

/// Simulated radio, clones share the same state
#[derive(Clone, Debug)]
struct SimRadio {
    id: u16,
    info: RadioInfo,
    clock: SimClock,
    state: Arc<Mutex<RadioState>>,
    channel: Arc<Mutex<Channel>>,
}

impl SimRadio {
    fn new(id: u16, info: RadioInfo, clock: SimClock, channel: Arc<Mutex<Channel>>) -> Self {
        let state = RadioState {
            mode: Mode::Sleep,
            pending: Vec::new(),
            sensing: None,
            in_train: false,
            events: Vec::new(),
        };

        Self { id, info, clock, state: Arc::new(Mutex::new(state)), channel }
    }

    fn schedule(&self, delay: Ts, op: Op) {
        let at = self.clock.ticks_us() + delay;
        self.state.lock().unwrap().pending.push((at, op));
    }

    /// Apply operations due at `now`, returning events for the MAC
    fn advance(&self, now: Ts) -> Vec<MacEvent> {
        let mut s = self.state.lock().unwrap();
        let mut ch = self.channel.lock().unwrap();

        if let Mode::Transmit{ end } = s.mode {
            if now >= end {
                s.mode = Mode::Listen{ since: now };

                if !s.pending.iter().any(|p| matches!(p.1, Op::Transmit(_))) {
                    s.in_train = false;
                    s.events.push(MacEvent::RadioStoppedTx);
                }
            }
        }

        // Stable sort, operations due together apply in issue order
        s.pending.sort_by_key(|p| p.0);

        let mut deferred = Vec::new();
        while s.pending.first().map(|p| p.0 <= now).unwrap_or(false) {
            let (_at, op) = s.pending.remove(0);

            let transmitting = match s.mode {
                Mode::Transmit{ end } => Some(end),
                _ => None,
            };

            match (op, transmitting) {
                (Op::Transmit(frame), Some(end)) => deferred.push((end, Op::Transmit(frame))),
                (Op::Transmit(frame), None) => {
                    let end = now + self.info.tx_time(frame.len());

                    debug!("Node {} TX {} bytes until {} us", self.id, frame.len(), end);

                    ch.transmissions.push(Transmission{ source: self.id, start: now, end, frame, delivered: false });
                    s.mode = Mode::Transmit{ end };
                    s.sensing = None;

                    if !s.in_train {
                        s.in_train = true;
                        s.events.push(MacEvent::RadioStartedTx);
                    }
                },
                (op, Some(_)) => warn!("Node {} dropped {:?} while transmitting", self.id, op),
                (Op::Sleep, None) => {
                    s.mode = Mode::Sleep;
                    s.sensing = None;
                },
                (Op::Listen, None) => {
                    if let Mode::Sleep = s.mode {
                        s.mode = Mode::Listen{ since: now };
                    }
                },
            }
        }
        s.pending.extend(deferred);

        if let Some(until) = s.sensing {
            if ch.busy(self.id, now) {
                s.sensing = None;
                s.events.push(MacEvent::CarrierBusy);
            } else if now >= until {
                s.sensing = None;
            }
        }

        std::mem::take(&mut s.events)
    }

    /// Deliver a completed transmission if the radio heard all of it
    fn receive(&self, t: &Transmission) {
        let mut s = self.state.lock().unwrap();

        match s.mode {
            Mode::Listen{ since } if since <= t.start => {
                s.events.push(MacEvent::FrameReceived(t.frame.clone()));
            },
            _ => (),
        }
    }

    fn next_deadline(&self) -> Option<Ts> {
        let s = self.state.lock().unwrap();

        let transmit = match s.mode {
            Mode::Transmit{ end } => Some(end),
            _ => None,
        };

        s.pending.iter().map(|p| p.0)
            .chain(transmit)
            .chain(s.sensing)
            .min()
    }
}

impl Radio for SimRadio {
    type Error = Infallible;

    fn enter_sleep(&mut self, delay: Ts) -> Result<(), Self::Error> {
        self.schedule(delay, Op::Sleep);
        Ok(())
    }

    fn enter_listen(&mut self, delay: Ts) -> Result<(), Self::Error> {
        self.schedule(delay, Op::Listen);
        Ok(())
    }

    fn enter_transmit(&mut self, frame: &Frame, delay: Ts) -> Result<(), Self::Error> {
        self.schedule(delay, Op::Transmit(frame.clone()));
        Ok(())
    }

    fn sense_carrier(&mut self, interval: Ts) -> Result<(), Self::Error> {
        let now = self.clock.ticks_us();
        self.state.lock().unwrap().sensing = Some(now + interval);
        Ok(())
    }

    fn carrier_sense_valid(&mut self) -> Result<CarrierSense, Self::Error> {
        let now = self.clock.ticks_us();
        let s = self.state.lock().unwrap();

        let cs = match s.mode {
            _ if s.in_train => CarrierSense::InTransmit,
            Mode::Transmit{ .. } => CarrierSense::InTransmit,
            Mode::Sleep => CarrierSense::Sleeping,
            Mode::Listen{ since } if now < since + self.info.cs_valid_delay => CarrierSense::NotReady,
            Mode::Listen{ .. } => CarrierSense::Valid,
        };

        Ok(cs)
    }

    fn info(&self) -> RadioInfo {
        self.info.clone()
    }
}


#[derive(Clone, Debug, Default)]
struct SimNetwork(Arc<Mutex<(usize, usize)>>);

impl Network for SimNetwork {
    fn deliver(&mut self, frame: NetFrame) {
        debug!("Delivered {} bytes for {}", frame.len(), frame.destination());
        self.0.lock().unwrap().0 += 1;
    }

    fn buffer_full(&mut self) {
        self.0.lock().unwrap().1 += 1;
    }
}


struct Node {
    id: u16,
    mac: Mac<SimRadio, SimNetwork, SimClock, StdRng>,
    radio: SimRadio,
    net: SimNetwork,
    next_tx: Ts,
    generated: usize,
}


fn main() -> anyhow::Result<()> {
    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    info!("Starting speck-sim with {} nodes", opts.nodes);

    let mut rng = StdRng::seed_from_u64(opts.seed);

    let clock = SimClock::default();
    let channel = Arc::new(Mutex::new(Channel::default()));

    let info = RadioInfo {
        data_rate_kbps: opts.data_rate,
        phy_overhead: 6,
        cs_valid_delay: 192,
    };

    let config = Config {
        sleep_interval: opts.sleep.as_micros() as Ts,
        listen_interval: opts.listen.as_micros() as Ts,
        busy_policy: match opts.non_blocking {
            true => BusyPolicy::NonBlocking,
            false => BusyPolicy::Blocking,
        },
        ..Default::default()
    };

    let period = opts.period.as_micros() as Ts;
    let duration = opts.duration.as_micros() as Ts;

    debug!("Initialising nodes");

    let mut nodes = Vec::new();
    for id in 0..opts.nodes {
        let radio = SimRadio::new(id, info.clone(), clock.clone(), channel.clone());
        let net = SimNetwork::default();

        let drift = match opts.drift {
            d if d > 0.0 => FixedDrift(1.0 + rng.gen_range(-d..d)),
            _ => FixedDrift(1.0),
        };

        let mac = Mac::new(ShortAddress(id), config.clone(), radio.clone(), net.clone(),
                &drift, clock.clone(), StdRng::seed_from_u64(rng.gen()))
            .map_err(|e| anyhow::anyhow!("Error initialising MAC {}: {:?}", id, e))?;

        nodes.push(Node{ id, mac, radio, net, next_tx: rng.gen_range(0..period.max(1)), generated: 0 });
    }

    for n in nodes.iter_mut() {
        n.mac.handle(MacEvent::Startup).map_err(|e| anyhow::anyhow!("Startup error: {:?}", e))?;
    }

    debug!("Starting simulation");

    let mut now = 0;
    let payload: Vec<u8> = (0..opts.payload).map(|i| i as u8).collect();

    loop {
        clock.set(now);

        // Generate application traffic
        for i in 0..nodes.len() {
            if nodes[i].next_tx > now {
                continue;
            }

            let dest = match opts.broadcast || nodes.len() < 2 {
                true => format!("{}", config.broadcast_address),
                false => {
                    let d = (nodes[i].id as usize + rng.gen_range(1..nodes.len())) % nodes.len();
                    format!("{}", nodes[d].id)
                },
            };

            let frame = NetFrame::new(&dest, &payload)
                .map_err(|e| anyhow::anyhow!("Invalid frame: {:?}", e))?;

            debug!("Node {} generated frame for {} at {} us", nodes[i].id, dest, now);

            let n = &mut nodes[i];
            n.mac.handle(MacEvent::NetworkFrame(frame)).map_err(|e| anyhow::anyhow!("MAC error: {:?}", e))?;
            n.next_tx += period;
            n.generated += 1;
        }

        // Process events until quiescent at this instant
        let mut rounds = 0;
        loop {
            let mut progressed = false;

            {
                let mut ch = channel.lock().unwrap();
                let complete: Vec<Transmission> = ch.transmissions.iter()
                    .filter(|t| !t.delivered && t.end <= now)
                    .filter(|t| !ch.collided(t))
                    .cloned()
                    .collect();

                for t in ch.transmissions.iter_mut().filter(|t| t.end <= now) {
                    t.delivered = true;
                }
                ch.transmissions.retain(|t| t.end + period.max(1) > now);
                drop(ch);

                for t in &complete {
                    for n in nodes.iter().filter(|n| n.id != t.source) {
                        n.radio.receive(t);
                    }
                }
            }

            for n in nodes.iter_mut() {
                for e in n.radio.advance(now) {
                    progressed = true;
                    n.mac.handle(e).map_err(|e| anyhow::anyhow!("MAC error: {:?}", e))?;
                }

                if n.mac.next_deadline().map(|d| d <= now).unwrap_or(false) {
                    progressed = true;
                    n.mac.tick().map_err(|e| anyhow::anyhow!("MAC tick error: {:?}", e))?;
                }
            }

            rounds += 1;
            if !progressed {
                break;
            }
            if rounds > MAX_ROUNDS {
                warn!("Event storm at {} us, advancing time", now);
                break;
            }
        }

        // Advance to the next event
        let next = nodes.iter()
            .flat_map(|n| [n.mac.next_deadline(), n.radio.next_deadline(), Some(n.next_tx)])
            .flatten()
            .chain(channel.lock().unwrap().next_deadline(now))
            .filter(|t| *t > now)
            .min();

        match next {
            Some(t) if t <= duration => now = t,
            _ => break,
        }
    }

    info!("Simulation complete at {} us", now);

    for n in &nodes {
        let s = n.mac.stats();
        let (delivered, buffer_full) = *n.net.0.lock().unwrap();

        info!("Node {}: generated {} sent {} ({} copies) received {} delivered {} buffer full {} busy {} dropped {}",
            n.id, n.generated, s.frames_sent, s.copies_sent, s.frames_received,
            delivered, buffer_full, s.carrier_busy, s.busy_dropped + s.oversize_dropped + s.buffer_full_dropped);
    }

    Ok(())
}
