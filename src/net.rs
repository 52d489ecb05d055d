//! Network layer and node resource interfaces used by the MAC
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use heapless::{String, Vec};

use crate::{MAX_PAYLOAD_LEN, MAX_ROUTE_LEN};

/// Network layer unit, carried opaquely by MAC frames
#[derive(Debug, Clone, PartialEq)]
pub struct NetFrame {
    /// Routing destination, a decimal node id or the broadcast address
    destination: String<MAX_ROUTE_LEN>,

    payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

/// Error building a network frame
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetFrameError {
    /// Destination exceeds `MAX_ROUTE_LEN`
    RouteTooLong,
    /// Payload exceeds `MAX_PAYLOAD_LEN`
    PayloadTooLong,
}

impl NetFrame {
    pub fn new(destination: &str, payload: &[u8]) -> Result<Self, NetFrameError> {
        let mut d = String::new();
        d.push_str(destination).map_err(|_| NetFrameError::RouteTooLong)?;

        let p = Vec::from_slice(payload).map_err(|_| NetFrameError::PayloadTooLong)?;

        Ok(Self{ destination: d, payload: p })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Network unit length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Network layer (upper layer) interface
pub trait Network {
    /// Deliver a decapsulated frame received from the radio
    fn deliver(&mut self, frame: NetFrame);

    /// Notify that the MAC TX buffer rejected a frame
    fn buffer_full(&mut self);
}

/// Node resource manager interface
pub trait Resources {
    /// Multiplicative CPU clock drift applied to scheduled delays
    fn clock_drift(&self) -> f32;
}

/// Fixed clock drift resource manager
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedDrift(pub f32);

impl Resources for FixedDrift {
    fn clock_drift(&self) -> f32 {
        self.0
    }
}


#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    use super::*;

    #[derive(Debug, Default)]
    struct Inner {
        delivered: Vec<NetFrame>,
        buffer_full: usize,
    }

    /// Mock network layer recording deliveries, clones share the same log
    #[derive(Clone, Debug, Default)]
    pub struct MockNetwork(Arc<Mutex<Inner>>);

    impl MockNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fetch and clear delivered frames
        pub fn take(&mut self) -> Vec<NetFrame> {
            core::mem::take(&mut self.0.lock().unwrap().delivered)
        }

        /// Number of buffer full notifications received
        pub fn buffer_full_count(&self) -> usize {
            self.0.lock().unwrap().buffer_full
        }
    }

    impl Network for MockNetwork {
        fn deliver(&mut self, frame: NetFrame) {
            self.0.lock().unwrap().delivered.push(frame);
        }

        fn buffer_full(&mut self) {
            self.0.lock().unwrap().buffer_full += 1;
        }
    }
}
