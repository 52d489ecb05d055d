//! SpeckMAC crate prelude
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

pub use crate::Ts;

pub use crate::error::MacError;
pub use crate::timer::{Timer as MacTimer};

pub use crate::phy::{Radio, RadioInfo, CarrierSense};
pub use crate::net::{NetFrame, Network, Resources, FixedDrift};

pub use crate::speck::{Mac, MacEvent, MacState, MacStats, Status, Config, BusyPolicy, Frame, Train};

#[cfg(feature = "hal")]
pub use crate::hal::{HalRadio, HalConfig, HalError};

pub use ieee802154::mac::ShortAddress;
