// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The 8-byte message header shared by every OpenFlow message.

use crate::buffer::Buffer;
use crate::error::WireError;
use byteorder::{ByteOrder, NetworkEndian};

/// The protocol version this crate speaks (OpenFlow 1.3).
pub const OFP_VERSION: u8 = 0x04;

/// Serialized size of [`Header`].
pub const OFP_HEADER_LEN: usize = 8;

/// Message type discriminant of the OpenFlow header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Hello = 0,
    Error = 1,
    EchoRequest = 2,
    EchoReply = 3,
    Experimenter = 4,
    FeaturesRequest = 5,
    FeaturesReply = 6,
    GetConfigRequest = 7,
    GetConfigReply = 8,
    SetConfig = 9,
    PacketIn = 10,
    FlowRemoved = 11,
    PortStatus = 12,
    PacketOut = 13,
    FlowMod = 14,
    GroupMod = 15,
    PortMod = 16,
    TableMod = 17,
    MultipartRequest = 18,
    MultipartReply = 19,
    BarrierRequest = 20,
    BarrierReply = 21,
    QueueGetConfigRequest = 22,
    QueueGetConfigReply = 23,
    RoleRequest = 24,
    RoleReply = 25,
    GetAsyncRequest = 26,
    GetAsyncReply = 27,
    SetAsync = 28,
    MeterMod = 29,
}

impl MsgType {
    /// Map a wire discriminant back to a known message type.
    pub fn from_wire(raw: u8) -> Result<MsgType, WireError> {
        use MsgType::*;
        Ok(match raw {
            0 => Hello,
            1 => Error,
            2 => EchoRequest,
            3 => EchoReply,
            4 => Experimenter,
            5 => FeaturesRequest,
            6 => FeaturesReply,
            7 => GetConfigRequest,
            8 => GetConfigReply,
            9 => SetConfig,
            10 => PacketIn,
            11 => FlowRemoved,
            12 => PortStatus,
            13 => PacketOut,
            14 => FlowMod,
            15 => GroupMod,
            16 => PortMod,
            17 => TableMod,
            18 => MultipartRequest,
            19 => MultipartReply,
            20 => BarrierRequest,
            21 => BarrierReply,
            22 => QueueGetConfigRequest,
            23 => QueueGetConfigReply,
            24 => RoleRequest,
            25 => RoleReply,
            26 => GetAsyncRequest,
            27 => GetAsyncReply,
            28 => SetAsync,
            29 => MeterMod,
            other => return Err(WireError::UnknownMsgType(other)),
        })
    }
}

/// Decoded `ofp_header`: version, type, total message length, xid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub msg_type: MsgType,
    /// Length of the whole message, header included.
    pub length: u16,
    pub xid: u32,
}

impl Header {
    /// Decode a header from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Fails on truncated input, an unknown message type, or a length field
    /// smaller than the header itself. The version byte is *not* checked
    /// here: hello negotiation needs to read headers from peers speaking
    /// other versions.
    pub fn decode(buf: &[u8]) -> Result<Header, WireError> {
        if buf.len() < OFP_HEADER_LEN {
            return Err(WireError::Truncated {
                what: "ofp_header",
                needed: OFP_HEADER_LEN,
                got: buf.len(),
            });
        }
        let length = NetworkEndian::read_u16(&buf[2..4]);
        if usize::from(length) < OFP_HEADER_LEN {
            return Err(WireError::BadMsgLength { length });
        }
        Ok(Header {
            version: buf[0],
            msg_type: MsgType::from_wire(buf[1])?,
            length,
            xid: NetworkEndian::read_u32(&buf[4..8]),
        })
    }

    /// Peek only the length field of a possibly-partial header.
    ///
    /// Returns `None` when fewer than 4 bytes are available. Used by the
    /// connection read loop to decide whether a full message has arrived.
    #[must_use]
    pub fn peek_length(buf: &[u8]) -> Option<u16> {
        if buf.len() < 4 {
            return None;
        }
        Some(NetworkEndian::read_u16(&buf[2..4]))
    }
}

/// Append a message header for `msg_type` to `buf`, with a placeholder
/// length. Call [`finish_message`] once the body is complete.
pub(crate) fn begin_message(buf: &mut Buffer, msg_type: MsgType, xid: u32) {
    let hdr = buf.append_zeroed(OFP_HEADER_LEN);
    hdr[0] = OFP_VERSION;
    hdr[1] = msg_type as u8;
    NetworkEndian::write_u32(&mut hdr[4..8], xid);
}

/// Patch the length field of the message started by [`begin_message`].
///
/// The length written is the full current buffer length; builders compose a
/// single message per buffer.
pub(crate) fn finish_message(buf: &mut Buffer) {
    let len = buf.len();
    debug_assert!(len <= usize::from(u16::MAX));
    #[allow(clippy::cast_possible_truncation)] // bounded by debug_assert
    NetworkEndian::write_u16(&mut buf.as_mut()[2..4], len as u16);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut buf = Buffer::new();
        begin_message(&mut buf, MsgType::EchoRequest, 0x01020304);
        buf.append(b"ping");
        finish_message(&mut buf);

        let hdr = Header::decode(buf.as_ref()).unwrap();
        assert_eq!(hdr.version, OFP_VERSION);
        assert_eq!(hdr.msg_type, MsgType::EchoRequest);
        assert_eq!(usize::from(hdr.length), buf.len());
        assert_eq!(hdr.xid, 0x01020304);
    }

    #[test]
    fn rejects_short_length_field() {
        let raw = [4u8, 0, 0, 7, 0, 0, 0, 1];
        assert!(matches!(
            Header::decode(&raw),
            Err(WireError::BadMsgLength { length: 7 })
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        let raw = [4u8, 77, 0, 8, 0, 0, 0, 1];
        assert!(matches!(
            Header::decode(&raw),
            Err(WireError::UnknownMsgType(77))
        ));
    }

    #[test]
    fn peek_length_needs_four_bytes() {
        assert_eq!(Header::peek_length(&[4, 0, 0]), None);
        assert_eq!(Header::peek_length(&[4, 0, 0, 16]), Some(16));
    }
}
