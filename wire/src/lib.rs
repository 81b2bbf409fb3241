// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

//! # OpenFlow 1.3 wire codec
//!
//! Bit-exact encoding and decoding of OpenFlow 1.3 messages, built from four
//! layers (leaves first):
//!
//! - [`buffer::Buffer`]: an owned octet buffer with head and tail
//!   reservations, shared by every codec path.
//! - [`oxm`]: the OpenFlow Extensible Match TLV codec, including the loose
//!   and strict match comparison used by flow tables.
//! - [`actions`] and [`instructions`]: 64-bit-aligned TLV codecs for action
//!   lists and instruction sets.
//! - [`messages`]: builders and parsers for every message the controller
//!   runtime and the software datapath exchange.
//!
//! All multi-byte fields are big-endian on the wire and host-endian in
//! memory; conversion happens exactly once, at the encode/decode boundary.
//!
//! The codec is purely functional over caller-provided buffers: builders
//! allocate and return a fresh [`buffer::Buffer`], parsers borrow the input
//! bytes and return owned message values. Nothing in this crate performs
//! I/O.

pub mod actions;
pub mod buffer;
pub mod error;
pub mod header;
pub mod instructions;
pub mod messages;
pub mod oxm;
pub mod port;
pub mod xid;

pub use buffer::Buffer;
pub use error::{ErrorKind, WireError};
pub use header::{Header, MsgType, OFP_HEADER_LEN, OFP_VERSION};
pub use messages::Message;
pub use oxm::{Match, MatchField};
pub use xid::XidGen;
