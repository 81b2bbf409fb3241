// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `port_status` build and parse.

use crate::buffer::Buffer;
use crate::error::WireError;
use crate::header::{MsgType, begin_message, finish_message};
use crate::port::{PORT_DESC_LEN, PortDesc};
use crate::xid::XidGen;

/// `ofp_port_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PortStatusReason {
    #[default]
    Add = 0,
    Delete = 1,
    Modify = 2,
}

impl PortStatusReason {
    fn from_wire(raw: u8) -> PortStatusReason {
        match raw {
            1 => PortStatusReason::Delete,
            2 => PortStatusReason::Modify,
            _ => PortStatusReason::Add,
        }
    }
}

/// `port_status` options and decoded form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortStatus {
    pub xid: Option<u32>,
    pub reason: PortStatusReason,
    pub desc: PortDesc,
}

impl PortStatus {
    pub(crate) fn decode_body(xid: Option<u32>, body: &[u8]) -> Result<PortStatus, WireError> {
        if body.len() < 8 + PORT_DESC_LEN {
            return Err(WireError::Truncated {
                what: "ofp_port_status",
                needed: 8 + PORT_DESC_LEN,
                got: body.len(),
            });
        }
        Ok(PortStatus {
            xid,
            reason: PortStatusReason::from_wire(body[0]),
            desc: PortDesc::decode(&body[8..])?,
        })
    }
}

/// Build a `port_status`.
pub fn pack_port_status(options: &PortStatus, xids: &mut XidGen) -> Buffer {
    let mut buf = Buffer::new();
    begin_message(&mut buf, MsgType::PortStatus, xids.resolve(options.xid));
    {
        let out = buf.append_zeroed(8 + PORT_DESC_LEN);
        out[0] = options.reason as u8;
        // 7 pad bytes
        options.desc.encode_into(&mut out[8..]);
    }
    finish_message(&mut buf);
    buf
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::messages::Message;
    use crate::port::PortState;
    use pretty_assertions::assert_eq;

    #[test]
    fn roundtrip() {
        let options = PortStatus {
            xid: Some(4),
            reason: PortStatusReason::Modify,
            desc: PortDesc {
                port_no: 3,
                hw_addr: [0, 1, 2, 3, 4, 5],
                name: "eth3".to_string(),
                state: PortState::LINK_DOWN,
                ..PortDesc::default()
            },
        };
        let mut xids = XidGen::new();
        let buf = pack_port_status(&options, &mut xids);
        assert_eq!(buf.len(), 80);
        let (message, consumed) = Message::decode(buf.as_ref()).unwrap();
        assert_eq!(consumed, buf.len());
        let Message::PortStatus(back) = message else {
            panic!("expected port status");
        };
        assert_eq!(back, options);
    }
}
