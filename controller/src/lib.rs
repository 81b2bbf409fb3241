// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

//! # Controller runtime
//!
//! The controller side of the OpenFlow control channel. A [`Controller`]
//! multiplexes any number of switch connections over one cooperative
//! scheduler, owns the per-datapath handshake state machine, and delivers
//! decoded asynchronous events to the methods of a user-supplied
//! [`ControllerApp`].
//!
//! Handlers are trait methods with default (ignore) bodies, so an
//! application implements exactly the events it cares about:
//!
//! ```no_run
//! use ofstack_controller::{AppCtx, Controller, ControllerApp, DatapathId};
//! use wire::messages::PacketIn;
//!
//! struct Dumper;
//!
//! impl ControllerApp for Dumper {
//!     fn switch_ready(&mut self, _ctx: &mut AppCtx<'_>, dpid: DatapathId) {
//!         println!("switch {dpid:#018x} ready");
//!     }
//!
//!     fn packet_in(&mut self, _ctx: &mut AppCtx<'_>, dpid: DatapathId, msg: PacketIn) {
//!         println!("packet_in from {dpid:#018x}: {} bytes", msg.data.len());
//!     }
//! }
//!
//! let mut controller = Controller::new(Dumper).unwrap();
//! controller.bind("0.0.0.0:6653".parse().unwrap()).unwrap();
//! controller.run().unwrap();
//! ```
//!
//! Two behaviors are built in and independent of handler registration:
//! every `echo_request` is answered on the wire before any user dispatch,
//! and `error` messages are always logged.

mod connection;
mod controller;

pub use connection::{Connection, HandshakeStage, RequestError};
pub use controller::{AppCtx, Controller, ControllerApp, ControllerConfig, StopHandle};

/// 64-bit opaque datapath identity, the key of all per-switch state.
pub type DatapathId = u64;

/// IANA-assigned OpenFlow port.
pub const DEFAULT_PORT: u16 = 6653;

/// Pre-IANA port many switches still default to.
pub const LEGACY_PORT: u16 = 6633;

/// Error surfaced by controller operations.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Scheduler(#[from] event::SchedulerError),
    #[error("no connected datapath {0:#018x}")]
    UnknownDatapath(DatapathId),
    #[error("send queue full ({0} messages)")]
    SendQueueFull(usize),
    #[error("connection is closing")]
    Closing,
}
