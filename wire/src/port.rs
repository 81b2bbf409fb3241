// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port numbering, the `ofp_port` description structure, and its bitmasks.

use crate::error::WireError;
use byteorder::{ByteOrder, NetworkEndian};

/// Reserved port numbers (`OFPP_*`).
pub mod port_no {
    /// Highest number a physical port may have.
    pub const MAX: u32 = 0xffff_ff00;
    /// Send the packet out its ingress port.
    pub const IN_PORT: u32 = 0xffff_fff8;
    /// Submit the packet to the first flow table.
    pub const TABLE: u32 = 0xffff_fff9;
    /// Forward using non-OpenFlow pipeline of the switch.
    pub const NORMAL: u32 = 0xffff_fffa;
    /// All physical ports except input port and flood-disabled ports.
    pub const FLOOD: u32 = 0xffff_fffb;
    /// All physical ports except the input port.
    pub const ALL: u32 = 0xffff_fffc;
    /// Send to the controller as a packet-in.
    pub const CONTROLLER: u32 = 0xffff_fffd;
    /// Local openflow "port" of the switch.
    pub const LOCAL: u32 = 0xffff_fffe;
    /// Wildcard in flow-mod and flow-stats filters; never a real port.
    pub const ANY: u32 = 0xffff_ffff;
}

/// `OFPCML_NO_BUFFER`: an output-to-controller `max_len` asking for the
/// whole packet, unbuffered.
pub const CONTROLLER_MAX_LEN_NO_BUFFER: u16 = 0xffff;

/// `OFP_NO_BUFFER`: buffer-id meaning "no packet buffered".
pub const NO_BUFFER: u32 = 0xffff_ffff;

bitflags::bitflags! {
    /// `ofp_port_config` administrative flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortConfig: u32 {
        const PORT_DOWN = 1 << 0;
        const NO_RECV = 1 << 2;
        const NO_FWD = 1 << 5;
        const NO_PACKET_IN = 1 << 6;
    }
}

bitflags::bitflags! {
    /// `ofp_port_state` link flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortState: u32 {
        const LINK_DOWN = 1 << 0;
        const BLOCKED = 1 << 1;
        const LIVE = 1 << 2;
    }
}

bitflags::bitflags! {
    /// `ofp_port_features` link-mode bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortFeatures: u32 {
        const RATE_10MB_HD = 1 << 0;
        const RATE_10MB_FD = 1 << 1;
        const RATE_100MB_HD = 1 << 2;
        const RATE_100MB_FD = 1 << 3;
        const RATE_1GB_HD = 1 << 4;
        const RATE_1GB_FD = 1 << 5;
        const RATE_10GB_FD = 1 << 6;
        const RATE_40GB_FD = 1 << 7;
        const RATE_100GB_FD = 1 << 8;
        const RATE_1TB_FD = 1 << 9;
        const OTHER = 1 << 10;
        const COPPER = 1 << 11;
        const FIBER = 1 << 12;
        const AUTONEG = 1 << 13;
        const PAUSE = 1 << 14;
        const PAUSE_ASYM = 1 << 15;
    }
}

/// Serialized size of [`PortDesc`] (`ofp_port`).
pub const PORT_DESC_LEN: usize = 64;

/// Length of the NUL-padded interface name in `ofp_port`.
pub const PORT_NAME_LEN: usize = 16;

/// The 64-byte `ofp_port` description carried by features/port-status/
/// port-desc messages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortDesc {
    pub port_no: u32,
    pub hw_addr: [u8; 6],
    pub name: String,
    pub config: PortConfig,
    pub state: PortState,
    pub curr: PortFeatures,
    pub advertised: PortFeatures,
    pub supported: PortFeatures,
    pub peer: PortFeatures,
    pub curr_speed: u32,
    pub max_speed: u32,
}

impl PortDesc {
    pub(crate) fn encode_into(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= PORT_DESC_LEN);
        NetworkEndian::write_u32(&mut out[0..4], self.port_no);
        // 4 pad bytes
        out[8..14].copy_from_slice(&self.hw_addr);
        // 2 pad bytes
        let name = self.name.as_bytes();
        let n = name.len().min(PORT_NAME_LEN - 1);
        out[16..16 + n].copy_from_slice(&name[..n]);
        NetworkEndian::write_u32(&mut out[32..36], self.config.bits());
        NetworkEndian::write_u32(&mut out[36..40], self.state.bits());
        NetworkEndian::write_u32(&mut out[40..44], self.curr.bits());
        NetworkEndian::write_u32(&mut out[44..48], self.advertised.bits());
        NetworkEndian::write_u32(&mut out[48..52], self.supported.bits());
        NetworkEndian::write_u32(&mut out[52..56], self.peer.bits());
        NetworkEndian::write_u32(&mut out[56..60], self.curr_speed);
        NetworkEndian::write_u32(&mut out[60..64], self.max_speed);
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<PortDesc, WireError> {
        if buf.len() < PORT_DESC_LEN {
            return Err(WireError::Truncated {
                what: "ofp_port",
                needed: PORT_DESC_LEN,
                got: buf.len(),
            });
        }
        let mut hw_addr = [0u8; 6];
        hw_addr.copy_from_slice(&buf[8..14]);
        let name_raw = &buf[16..16 + PORT_NAME_LEN];
        let name_end = name_raw.iter().position(|&b| b == 0).unwrap_or(PORT_NAME_LEN);
        let name = String::from_utf8_lossy(&name_raw[..name_end]).into_owned();
        Ok(PortDesc {
            port_no: NetworkEndian::read_u32(&buf[0..4]),
            hw_addr,
            name,
            config: PortConfig::from_bits_truncate(NetworkEndian::read_u32(&buf[32..36])),
            state: PortState::from_bits_truncate(NetworkEndian::read_u32(&buf[36..40])),
            curr: PortFeatures::from_bits_truncate(NetworkEndian::read_u32(&buf[40..44])),
            advertised: PortFeatures::from_bits_truncate(NetworkEndian::read_u32(&buf[44..48])),
            supported: PortFeatures::from_bits_truncate(NetworkEndian::read_u32(&buf[48..52])),
            peer: PortFeatures::from_bits_truncate(NetworkEndian::read_u32(&buf[52..56])),
            curr_speed: NetworkEndian::read_u32(&buf[56..60]),
            max_speed: NetworkEndian::read_u32(&buf[60..64]),
        })
    }
}
