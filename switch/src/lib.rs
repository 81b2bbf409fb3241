// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

//! # Software datapath
//!
//! An OpenFlow 1.3 switch in software: it opens a TCP connection to a
//! controller, applies the OpenFlow pipeline to frames received on its
//! ports, and emits reply messages.
//!
//! The pieces, leaves first:
//!
//! - [`frame`]: a parsed, mutable view of one Ethernet frame, the thing
//!   matches read and set-field actions rewrite.
//! - [`flow_table`]: ordered flow-entry stores with lookup, strict/loose
//!   modification, counters, and timeout eviction.
//! - [`group_table`]: group entries and their buckets.
//! - [`pipeline`]: the table 0 → goto-table walk, instruction-set
//!   evaluation, the action executor, and packet-in emission.
//! - [`datapath`]: the switch object owning all of the above plus the
//!   controller channel and the ports.
//! - [`frame_io`]: the port backend abstraction; tests use
//!   [`frame_io::MockPort`], production backends live outside this crate.

pub mod datapath;
pub mod flow_table;
pub mod frame;
pub mod frame_io;
pub mod group_table;
pub mod pipeline;

pub use datapath::{Datapath, DatapathConfig, DatapathError, DatapathStopHandle};
pub use frame::{FrameError, PacketContext, ParsedFrame};
pub use frame_io::{FrameIO, FrameIoError, MockPort};
