//! SpeckMAC-D: a duty-cycled MAC for low power sensor nodes
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte
//
// Nodes sleep for most of their lives, waking briefly to peek the channel.
// Senders make up for this by transmitting a back-to-back train of frame
// copies that spans a whole sleep interval, so any neighbour waking during
// that interval hears at least one copy.

#![no_std]

#[cfg(any(test, feature="std"))]
extern crate std;

pub(crate) mod log;

pub mod timer;

pub mod error;

pub mod phy;

pub mod net;

pub mod speck;

#[cfg(feature = "hal")]
pub mod hal;

pub mod prelude;


/// Timestamps are 64-bit in microseconds
pub type Ts = u64;

/// Maximum network payload carried by a single frame
pub const MAX_PAYLOAD_LEN: usize = 256;

/// Maximum length of a network routing destination string
pub const MAX_ROUTE_LEN: usize = 16;
