// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Parsed, mutable view of one Ethernet frame.
//!
//! [`ParsedFrame`] keeps the raw octets plus offsets of the recognized
//! layers; etherparse validates and extracts the L3/L4 headers, while the
//! MPLS and PBB shims (which etherparse does not model) are parsed here.
//! Match evaluation reads field values through
//! [`PacketContext::field_bits`]; set-field actions and the TTL/push/pop
//! action family rewrite the octets in place, keeping IPv4/TCP/UDP/ICMP
//! checksums correct. Structural edits re-parse the frame to refresh the
//! offsets.

use arrayvec::ArrayVec;
use byteorder::{ByteOrder, NetworkEndian};
use etherparse::{Ipv4Header, Ipv6Header, TcpHeader, UdpHeader};
use tracing::{debug, trace};
use wire::oxm::field::MAX_FIELD_WIDTH;
use wire::oxm::{Match, MatchField, VLAN_VID_PRESENT};

pub const ETH_TYPE_VLAN: u16 = 0x8100;
pub const ETH_TYPE_QINQ: u16 = 0x88a8;
pub const ETH_TYPE_IPV4: u16 = 0x0800;
pub const ETH_TYPE_IPV6: u16 = 0x86dd;
pub const ETH_TYPE_ARP: u16 = 0x0806;
pub const ETH_TYPE_MPLS: u16 = 0x8847;
pub const ETH_TYPE_MPLS_MCAST: u16 = 0x8848;
pub const ETH_TYPE_PBB: u16 = 0x88e7;

const ETH_HEADER_LEN: usize = 14;
const MAX_VLANS: usize = 4;
const MAX_MPLS: usize = 8;

const IP_PROTO_ICMP: u8 = 1;
const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;
const IP_PROTO_ICMP6: u8 = 58;
const IP_PROTO_SCTP: u8 = 132;

/// Error produced when a frame cannot form a [`ParsedFrame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes is shorter than an Ethernet header")]
    TooShort(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum L3 {
    Ipv4 { offset: usize, header_len: usize },
    Ipv6 { offset: usize },
    Arp { offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum L4 {
    Tcp { offset: usize },
    Udp { offset: usize },
    Sctp { offset: usize },
    Icmp4 { offset: usize },
    Icmp6 { offset: usize },
}

/// One Ethernet frame with parsed layer offsets.
#[derive(Debug, Clone)]
pub struct ParsedFrame {
    bytes: Vec<u8>,
    /// Offset of each 802.1Q tag's TPID, outermost first.
    vlan_offsets: ArrayVec<usize, MAX_VLANS>,
    /// Offset of each MPLS shim, outermost first.
    mpls_offsets: ArrayVec<usize, MAX_MPLS>,
    /// Offset of the PBB I-TAG TPID, when present.
    pbb_offset: Option<usize>,
    /// The ethertype seen after all VLAN tags.
    eth_type: u16,
    l3: Option<L3>,
    l4: Option<L4>,
}

impl ParsedFrame {
    /// Parse a frame. Unknown or truncated upper layers leave the
    /// corresponding view absent; only a frame shorter than an Ethernet
    /// header is an error.
    pub fn parse(bytes: Vec<u8>) -> Result<ParsedFrame, FrameError> {
        if bytes.len() < ETH_HEADER_LEN {
            return Err(FrameError::TooShort(bytes.len()));
        }
        let mut frame = ParsedFrame {
            bytes,
            vlan_offsets: ArrayVec::new(),
            mpls_offsets: ArrayVec::new(),
            pbb_offset: None,
            eth_type: 0,
            l3: None,
            l4: None,
        };
        frame.scan();
        Ok(frame)
    }

    /// The raw octets.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the frame, returning the raw octets.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Frame length in octets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True only for a zero-length frame, which cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The ethertype after all VLAN tags.
    #[must_use]
    pub fn eth_type(&self) -> u16 {
        self.eth_type
    }

    fn scan(&mut self) {
        self.vlan_offsets.clear();
        self.mpls_offsets.clear();
        self.pbb_offset = None;
        self.l3 = None;
        self.l4 = None;

        let bytes = &self.bytes;
        let mut at = 12;
        let mut eth_type = NetworkEndian::read_u16(&bytes[at..at + 2]);
        while (eth_type == ETH_TYPE_VLAN || eth_type == ETH_TYPE_QINQ)
            && self.vlan_offsets.len() < MAX_VLANS
            && bytes.len() >= at + 8
        {
            self.vlan_offsets.push(at);
            at += 4;
            eth_type = NetworkEndian::read_u16(&bytes[at..at + 2]);
        }
        self.eth_type = eth_type;
        let mut payload = at + 2;

        match eth_type {
            ETH_TYPE_PBB if bytes.len() >= payload + 4 => {
                self.pbb_offset = Some(at);
                // simplified service tag: TPID + 4-byte I-TCI, then the
                // encapsulated payload is left opaque
            }
            ETH_TYPE_MPLS | ETH_TYPE_MPLS_MCAST => {
                while bytes.len() >= payload + 4 && self.mpls_offsets.len() < MAX_MPLS {
                    self.mpls_offsets.push(payload);
                    let shim = NetworkEndian::read_u32(&bytes[payload..payload + 4]);
                    payload += 4;
                    if shim & 0x100 != 0 {
                        break; // bottom of stack
                    }
                }
                // the payload under an MPLS stack is opaque to the pipeline
            }
            ETH_TYPE_ARP if bytes.len() >= payload + 28 => {
                self.l3 = Some(L3::Arp { offset: payload });
            }
            ETH_TYPE_IPV4 => self.scan_ipv4(payload),
            ETH_TYPE_IPV6 => self.scan_ipv6(payload),
            other => {
                trace!(eth_type = other, "unparsed ethertype");
            }
        }
    }

    fn scan_ipv4(&mut self, offset: usize) {
        match Ipv4Header::from_slice(&self.bytes[offset..]) {
            Ok((header, _rest)) => {
                let header_len = header.header_len();
                self.l3 = Some(L3::Ipv4 { offset, header_len });
                self.scan_l4(header.protocol.0, offset + header_len);
            }
            Err(err) => debug!(%err, "bad ipv4 header"),
        }
    }

    fn scan_ipv6(&mut self, offset: usize) {
        match Ipv6Header::from_slice(&self.bytes[offset..]) {
            Ok((header, _rest)) => {
                self.l3 = Some(L3::Ipv6 { offset });
                // extension headers are not walked; matches on transport
                // fields behind them simply see no transport layer
                self.scan_l4(header.next_header.0, offset + 40);
            }
            Err(err) => debug!(%err, "bad ipv6 header"),
        }
    }

    fn scan_l4(&mut self, protocol: u8, offset: usize) {
        let rest = &self.bytes[offset.min(self.bytes.len())..];
        self.l4 = match protocol {
            IP_PROTO_TCP => TcpHeader::from_slice(rest)
                .ok()
                .map(|_| L4::Tcp { offset }),
            IP_PROTO_UDP => UdpHeader::from_slice(rest)
                .ok()
                .map(|_| L4::Udp { offset }),
            IP_PROTO_SCTP => (rest.len() >= 12).then_some(L4::Sctp { offset }),
            IP_PROTO_ICMP => (rest.len() >= 4).then_some(L4::Icmp4 { offset }),
            IP_PROTO_ICMP6 => (rest.len() >= 4).then_some(L4::Icmp6 { offset }),
            _ => None,
        };
    }

    // --- field reads ---------------------------------------------------

    fn vlan_tci(&self) -> Option<u16> {
        self.vlan_offsets
            .first()
            .map(|&at| NetworkEndian::read_u16(&self.bytes[at + 2..at + 4]))
    }

    fn mpls_shim(&self) -> Option<u32> {
        self.mpls_offsets
            .first()
            .map(|&at| NetworkEndian::read_u32(&self.bytes[at..at + 4]))
    }

    fn ip_dscp_ecn(&self) -> Option<u8> {
        match self.l3? {
            L3::Ipv4 { offset, .. } => Some(self.bytes[offset + 1]),
            L3::Ipv6 { offset } => {
                let word = NetworkEndian::read_u16(&self.bytes[offset..offset + 2]);
                #[allow(clippy::cast_possible_truncation)] // masked to 8 bits
                let tos = ((word >> 4) & 0xff) as u8;
                Some(tos)
            }
            L3::Arp { .. } => None,
        }
    }

    fn ip_proto(&self) -> Option<u8> {
        match self.l3? {
            L3::Ipv4 { offset, .. } => Some(self.bytes[offset + 9]),
            L3::Ipv6 { offset } => Some(self.bytes[offset + 6]),
            L3::Arp { .. } => None,
        }
    }

    // --- structural mutations ------------------------------------------

    /// Push an 802.1Q tag with the given TPID; TCI is copied from the
    /// previous outermost tag when present.
    pub fn push_vlan(&mut self, ethertype: u16) {
        let tci = self.vlan_tci().unwrap_or(0);
        let mut tag = [0u8; 4];
        NetworkEndian::write_u16(&mut tag[0..2], ethertype);
        NetworkEndian::write_u16(&mut tag[2..4], tci);
        insert_at(&mut self.bytes, 12, &tag);
        self.scan();
    }

    /// Pop the outermost 802.1Q tag; a no-op on untagged frames.
    pub fn pop_vlan(&mut self) {
        if self.vlan_offsets.is_empty() {
            trace!("pop_vlan on untagged frame");
            return;
        }
        remove_at(&mut self.bytes, 12, 4);
        self.scan();
    }

    /// Push an MPLS shim. Label/TC/TTL are copied from the previous
    /// outermost shim, or derived from the IP header (TTL) when the stack
    /// was empty.
    pub fn push_mpls(&mut self, ethertype: u16) {
        let shim = match self.mpls_shim() {
            Some(outer) => outer & !0x100, // new shim is not bottom-of-stack
            None => {
                let ttl = self.nw_ttl().unwrap_or(64);
                0x100 | u32::from(ttl)
            }
        };
        let at = ethertype_offset(&self.vlan_offsets) + 2;
        let mut tag = [0u8; 4];
        NetworkEndian::write_u32(&mut tag, shim);
        insert_at(&mut self.bytes, at, &tag);
        self.set_eth_type_raw(ethertype);
        self.scan();
    }

    /// Pop the outermost MPLS shim; `ethertype` names the uncovered
    /// payload.
    pub fn pop_mpls(&mut self, ethertype: u16) {
        let Some(&at) = self.mpls_offsets.first() else {
            trace!("pop_mpls on frame without a label stack");
            return;
        };
        remove_at(&mut self.bytes, at, 4);
        self.set_eth_type_raw(ethertype);
        self.scan();
    }

    /// Push a PBB service tag carrying a zero I-SID.
    pub fn push_pbb(&mut self, ethertype: u16) {
        let isid = match self.pbb_offset {
            Some(at) => NetworkEndian::read_u32(&self.bytes[at + 2..at + 6]) & 0x00ff_ffff,
            None => 0,
        };
        let mut tag = [0u8; 6];
        NetworkEndian::write_u16(&mut tag[0..2], ethertype);
        NetworkEndian::write_u32(&mut tag[2..6], isid);
        insert_at(&mut self.bytes, 12, &tag);
        self.scan();
    }

    /// Pop the PBB service tag; a no-op when absent.
    pub fn pop_pbb(&mut self) {
        let Some(at) = self.pbb_offset else {
            trace!("pop_pbb on frame without a service tag");
            return;
        };
        remove_at(&mut self.bytes, at, 6);
        self.scan();
    }

    fn set_eth_type_raw(&mut self, ethertype: u16) {
        let at = ethertype_offset(&self.vlan_offsets);
        NetworkEndian::write_u16(&mut self.bytes[at..at + 2], ethertype);
        self.eth_type = ethertype;
    }

    // --- TTL family ----------------------------------------------------

    fn nw_ttl(&self) -> Option<u8> {
        match self.l3? {
            L3::Ipv4 { offset, .. } => Some(self.bytes[offset + 8]),
            L3::Ipv6 { offset } => Some(self.bytes[offset + 7]),
            L3::Arp { .. } => None,
        }
    }

    /// Set the IP TTL / hop limit.
    pub fn set_nw_ttl(&mut self, ttl: u8) {
        match self.l3 {
            Some(L3::Ipv4 { offset, header_len }) => {
                self.bytes[offset + 8] = ttl;
                self.fix_ipv4_checksum(offset, header_len);
            }
            Some(L3::Ipv6 { offset }) => self.bytes[offset + 7] = ttl,
            _ => trace!("set_nw_ttl without an IP header"),
        }
    }

    /// Decrement the IP TTL / hop limit; saturates at zero.
    pub fn dec_nw_ttl(&mut self) {
        if let Some(ttl) = self.nw_ttl() {
            self.set_nw_ttl(ttl.saturating_sub(1));
        }
    }

    /// Set the TTL of the outermost MPLS shim.
    pub fn set_mpls_ttl(&mut self, ttl: u8) {
        if let Some(&at) = self.mpls_offsets.first() {
            self.bytes[at + 3] = ttl;
        } else {
            trace!("set_mpls_ttl without a label stack");
        }
    }

    /// Decrement the TTL of the outermost MPLS shim; saturates at zero.
    pub fn dec_mpls_ttl(&mut self) {
        if let Some(&at) = self.mpls_offsets.first() {
            self.bytes[at + 3] = self.bytes[at + 3].saturating_sub(1);
        }
    }

    /// Copy the TTL outwards: from the next-outermost header (second MPLS
    /// shim or IP) to the outermost MPLS shim.
    pub fn copy_ttl_out(&mut self) {
        let inner = match self.mpls_offsets.get(1) {
            Some(&second) => Some(self.bytes[second + 3]),
            None => self.nw_ttl(),
        };
        if let Some(ttl) = inner {
            self.set_mpls_ttl(ttl);
        }
    }

    /// Copy the TTL inwards: from the outermost MPLS shim to the
    /// next-outermost header.
    pub fn copy_ttl_in(&mut self) {
        let Some(&outer) = self.mpls_offsets.first() else {
            return;
        };
        let ttl = self.bytes[outer + 3];
        if let Some(&second) = self.mpls_offsets.get(1) {
            self.bytes[second + 3] = ttl;
        } else {
            self.set_nw_ttl(ttl);
        }
    }

    // --- checksums -----------------------------------------------------

    fn fix_ipv4_checksum(&mut self, offset: usize, header_len: usize) {
        NetworkEndian::write_u16(&mut self.bytes[offset + 10..offset + 12], 0);
        let sum = ones_complement_sum(&[&self.bytes[offset..offset + header_len]]);
        NetworkEndian::write_u16(&mut self.bytes[offset + 10..offset + 12], !sum);
    }

    /// Recompute the transport checksum from scratch, pseudo-header
    /// included. SCTP (CRC32c, not one's-complement) is left alone.
    fn fix_l4_checksum(&mut self) {
        let Some(l4) = self.l4 else { return };
        let Some(l3) = self.l3 else { return };
        let (csum_at, proto, covers_pseudo) = match l4 {
            L4::Tcp { offset } => (offset + 16, IP_PROTO_TCP, true),
            L4::Udp { offset } => (offset + 6, IP_PROTO_UDP, true),
            L4::Icmp4 { offset } => (offset + 2, IP_PROTO_ICMP, false),
            L4::Icmp6 { offset } => (offset + 2, IP_PROTO_ICMP6, true),
            L4::Sctp { .. } => return,
        };
        let seg_start = match l4 {
            L4::Tcp { offset }
            | L4::Udp { offset }
            | L4::Icmp4 { offset }
            | L4::Icmp6 { offset }
            | L4::Sctp { offset } => offset,
        };
        if csum_at + 2 > self.bytes.len() {
            return;
        }
        NetworkEndian::write_u16(&mut self.bytes[csum_at..csum_at + 2], 0);
        let seg_len = self.bytes.len() - seg_start;

        let mut pseudo = [0u8; 40];
        let pseudo_slice: &[u8] = if covers_pseudo {
            match l3 {
                L3::Ipv4 { offset, .. } => {
                    pseudo[0..4].copy_from_slice(&self.bytes[offset + 12..offset + 16]);
                    pseudo[4..8].copy_from_slice(&self.bytes[offset + 16..offset + 20]);
                    pseudo[9] = proto;
                    #[allow(clippy::cast_possible_truncation)] // frame < 64k
                    NetworkEndian::write_u16(&mut pseudo[10..12], seg_len as u16);
                    &pseudo[..12]
                }
                L3::Ipv6 { offset } => {
                    pseudo[0..16].copy_from_slice(&self.bytes[offset + 8..offset + 24]);
                    pseudo[16..32].copy_from_slice(&self.bytes[offset + 24..offset + 40]);
                    #[allow(clippy::cast_possible_truncation)] // frame < 64k
                    NetworkEndian::write_u32(&mut pseudo[32..36], seg_len as u32);
                    pseudo[39] = proto;
                    &pseudo[..40]
                }
                L3::Arp { .. } => &pseudo[..0],
            }
        } else {
            &pseudo[..0]
        };

        let sum = ones_complement_sum(&[pseudo_slice, &self.bytes[seg_start..]]);
        let mut checksum = !sum;
        if matches!(l4, L4::Udp { .. }) && checksum == 0 {
            checksum = 0xffff;
        }
        NetworkEndian::write_u16(&mut self.bytes[csum_at..csum_at + 2], checksum);
    }
}

fn ethertype_offset(vlan_offsets: &ArrayVec<usize, MAX_VLANS>) -> usize {
    vlan_offsets.last().map_or(12, |&at| at + 4)
}

fn insert_at(bytes: &mut Vec<u8>, at: usize, data: &[u8]) {
    bytes.splice(at..at, data.iter().copied());
}

fn remove_at(bytes: &mut Vec<u8>, at: usize, len: usize) {
    bytes.drain(at..at + len);
}

fn ones_complement_sum(parts: &[&[u8]]) -> u16 {
    let mut sum: u32 = 0;
    for part in parts {
        let mut chunks = part.chunks_exact(2);
        for chunk in &mut chunks {
            sum += u32::from(NetworkEndian::read_u16(chunk));
        }
        if let [last] = chunks.remainder() {
            sum += u32::from(*last) << 8;
        }
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    #[allow(clippy::cast_possible_truncation)] // folded to 16 bits
    let folded = sum as u16;
    folded
}

/// A frame traversing the pipeline, together with its pipeline-scoped
/// registers.
#[derive(Debug, Clone)]
pub struct PacketContext {
    pub frame: ParsedFrame,
    pub in_port: u32,
    pub in_phy_port: u32,
    pub metadata: u64,
    pub tunnel_id: u64,
}

impl PacketContext {
    /// Wrap a received frame.
    pub fn new(frame: ParsedFrame, in_port: u32) -> PacketContext {
        PacketContext {
            frame,
            in_port,
            in_phy_port: in_port,
            metadata: 0,
            tunnel_id: 0,
        }
    }

    /// Big-endian value bits of the packet's field `index`, mirroring the
    /// OXM encoding. `None` when the field's layer is absent.
    #[allow(clippy::too_many_lines)]
    pub fn field_bits(&self, index: u8, out: &mut [u8; MAX_FIELD_WIDTH]) -> Option<usize> {
        let frame = &self.frame;
        let bytes = frame.bytes();
        match index {
            0 => {
                NetworkEndian::write_u32(&mut out[..4], self.in_port);
                Some(4)
            }
            1 => {
                NetworkEndian::write_u32(&mut out[..4], self.in_phy_port);
                Some(4)
            }
            2 => {
                NetworkEndian::write_u64(&mut out[..8], self.metadata);
                Some(8)
            }
            3 => {
                out[..6].copy_from_slice(&bytes[0..6]);
                Some(6)
            }
            4 => {
                out[..6].copy_from_slice(&bytes[6..12]);
                Some(6)
            }
            5 => {
                NetworkEndian::write_u16(&mut out[..2], frame.eth_type());
                Some(2)
            }
            6 => {
                // OFPVID_NONE (0) on untagged frames
                let value = frame
                    .vlan_tci()
                    .map_or(0, |tci| VLAN_VID_PRESENT | (tci & 0x0fff));
                NetworkEndian::write_u16(&mut out[..2], value);
                Some(2)
            }
            7 => {
                let tci = frame.vlan_tci()?;
                #[allow(clippy::cast_possible_truncation)] // 3 bits
                {
                    out[0] = (tci >> 13) as u8;
                }
                Some(1)
            }
            8 => {
                out[0] = frame.ip_dscp_ecn()? >> 2;
                Some(1)
            }
            9 => {
                out[0] = frame.ip_dscp_ecn()? & 0x03;
                Some(1)
            }
            10 => {
                out[0] = frame.ip_proto()?;
                Some(1)
            }
            11 | 12 => {
                let L3::Ipv4 { offset, .. } = frame.l3? else {
                    return None;
                };
                let at = if index == 11 { offset + 12 } else { offset + 16 };
                out[..4].copy_from_slice(&bytes[at..at + 4]);
                Some(4)
            }
            13 | 14 => {
                let L4::Tcp { offset } = frame.l4? else {
                    return None;
                };
                let at = if index == 13 { offset } else { offset + 2 };
                out[..2].copy_from_slice(&bytes[at..at + 2]);
                Some(2)
            }
            15 | 16 => {
                let L4::Udp { offset } = frame.l4? else {
                    return None;
                };
                let at = if index == 15 { offset } else { offset + 2 };
                out[..2].copy_from_slice(&bytes[at..at + 2]);
                Some(2)
            }
            17 | 18 => {
                let L4::Sctp { offset } = frame.l4? else {
                    return None;
                };
                let at = if index == 17 { offset } else { offset + 2 };
                out[..2].copy_from_slice(&bytes[at..at + 2]);
                Some(2)
            }
            19 | 20 => {
                let L4::Icmp4 { offset } = frame.l4? else {
                    return None;
                };
                out[0] = bytes[if index == 19 { offset } else { offset + 1 }];
                Some(1)
            }
            21 => {
                let L3::Arp { offset } = frame.l3? else {
                    return None;
                };
                out[..2].copy_from_slice(&bytes[offset + 6..offset + 8]);
                Some(2)
            }
            22 => self.arp_field(8 + 6, 4, out),  // spa
            23 => self.arp_field(8 + 16, 4, out), // tpa
            24 => self.arp_field(8, 6, out),      // sha
            25 => self.arp_field(8 + 10, 6, out), // tha
            26 | 27 => {
                let L3::Ipv6 { offset } = frame.l3? else {
                    return None;
                };
                let at = if index == 26 { offset + 8 } else { offset + 24 };
                out[..16].copy_from_slice(&bytes[at..at + 16]);
                Some(16)
            }
            28 => {
                let L3::Ipv6 { offset } = frame.l3? else {
                    return None;
                };
                let label = NetworkEndian::read_u32(&bytes[offset..offset + 4]) & 0x000f_ffff;
                NetworkEndian::write_u32(&mut out[..4], label);
                Some(4)
            }
            29 | 30 => {
                let L4::Icmp6 { offset } = frame.l4? else {
                    return None;
                };
                out[0] = bytes[if index == 29 { offset } else { offset + 1 }];
                Some(1)
            }
            // ipv6 nd target/sll/tll need option walking; absent for now
            31..=33 => None,
            34 => {
                let shim = frame.mpls_shim()?;
                NetworkEndian::write_u32(&mut out[..4], shim >> 12);
                Some(4)
            }
            35 => {
                let shim = frame.mpls_shim()?;
                #[allow(clippy::cast_possible_truncation)] // 3 bits
                {
                    out[0] = ((shim >> 9) & 0x7) as u8;
                }
                Some(1)
            }
            36 => {
                let shim = frame.mpls_shim()?;
                out[0] = u8::from(shim & 0x100 != 0);
                Some(1)
            }
            37 => {
                let at = frame.pbb_offset?;
                out[..3].copy_from_slice(&bytes[at + 3..at + 6]);
                Some(3)
            }
            38 => {
                NetworkEndian::write_u64(&mut out[..8], self.tunnel_id);
                Some(8)
            }
            // ipv6 exthdr pseudo-field is not computed
            _ => None,
        }
    }

    fn arp_field(&self, rel: usize, width: usize, out: &mut [u8; MAX_FIELD_WIDTH]) -> Option<usize> {
        let L3::Arp { offset } = self.frame.l3? else {
            return None;
        };
        out[..width].copy_from_slice(&self.frame.bytes[offset + rel..offset + rel + width]);
        Some(width)
    }

    /// Does this packet fall within `matches`?
    ///
    /// Non-basic (experimenter) entries cannot be evaluated and are
    /// skipped; a basic field whose layer is absent from the packet is a
    /// mismatch.
    #[must_use]
    pub fn matches(&self, matches: &Match) -> bool {
        let mut want = [0u8; MAX_FIELD_WIDTH];
        let mut mask = [0xffu8; MAX_FIELD_WIDTH];
        let mut have = [0u8; MAX_FIELD_WIDTH];
        for entry in matches.fields() {
            let Some(index) = entry.field_index() else {
                trace!("skipping non-basic match entry");
                continue;
            };
            let Some(width) = self.field_bits(index, &mut have) else {
                return false;
            };
            let entry_width = entry.value_bits(&mut want);
            debug_assert_eq!(entry_width, width);
            mask.fill(0xff);
            entry.mask_bits(&mut mask);
            for i in 0..width {
                if (have[i] ^ want[i]) & mask[i] != 0 {
                    return false;
                }
            }
        }
        true
    }

    /// Apply a set-field action.
    ///
    /// Fields whose layer is absent, and the read-only pseudo fields, are
    /// ignored with a trace. Checksums of rewritten IPv4/TCP/UDP/ICMP
    /// headers are recomputed.
    #[allow(clippy::too_many_lines)]
    pub fn apply_set_field(&mut self, field: &MatchField) {
        use MatchField::*;
        let mut scratch = [0u8; MAX_FIELD_WIDTH];
        match field {
            EthDst { .. } | EthSrc { .. } => {
                let width = field.value_bits(&mut scratch);
                debug_assert_eq!(width, 6);
                let at = if matches!(field, EthDst { .. }) { 0 } else { 6 };
                self.frame.bytes[at..at + 6].copy_from_slice(&scratch[..6]);
            }
            EthType(ethertype) => self.frame.set_eth_type_raw(*ethertype),
            VlanVid { vid, .. } => {
                if let Some(&at) = self.frame.vlan_offsets.first() {
                    let tci = NetworkEndian::read_u16(&self.frame.bytes[at + 2..at + 4]);
                    let tci = (tci & !0x0fff) | (vid & 0x0fff);
                    NetworkEndian::write_u16(&mut self.frame.bytes[at + 2..at + 4], tci);
                } else {
                    trace!("set vlan_vid on untagged frame");
                }
            }
            VlanPcp(pcp) => {
                if let Some(&at) = self.frame.vlan_offsets.first() {
                    let tci = NetworkEndian::read_u16(&self.frame.bytes[at + 2..at + 4]);
                    let tci = (tci & 0x1fff) | (u16::from(pcp & 0x7) << 13);
                    NetworkEndian::write_u16(&mut self.frame.bytes[at + 2..at + 4], tci);
                }
            }
            IpDscp(dscp) => self.rewrite_tos(|tos| (tos & 0x03) | ((dscp & 0x3f) << 2)),
            IpEcn(ecn) => self.rewrite_tos(|tos| (tos & !0x03) | (ecn & 0x03)),
            Ipv4Src { .. } | Ipv4Dst { .. } => {
                if let Some(L3::Ipv4 { offset, header_len }) = self.frame.l3 {
                    field.value_bits(&mut scratch);
                    let at = if matches!(field, Ipv4Src { .. }) {
                        offset + 12
                    } else {
                        offset + 16
                    };
                    self.frame.bytes[at..at + 4].copy_from_slice(&scratch[..4]);
                    self.frame.fix_ipv4_checksum(offset, header_len);
                    self.frame.fix_l4_checksum();
                }
            }
            TcpSrc(_) | TcpDst(_) | UdpSrc(_) | UdpDst(_) | SctpSrc(_) | SctpDst(_) => {
                self.rewrite_l4_port(field, &mut scratch);
            }
            Icmpv4Type(v) | Icmpv4Code(v) => {
                if let Some(L4::Icmp4 { offset }) = self.frame.l4 {
                    let at = if matches!(field, Icmpv4Type(_)) {
                        offset
                    } else {
                        offset + 1
                    };
                    self.frame.bytes[at] = *v;
                    self.frame.fix_l4_checksum();
                }
            }
            Icmpv6Type(v) | Icmpv6Code(v) => {
                if let Some(L4::Icmp6 { offset }) = self.frame.l4 {
                    let at = if matches!(field, Icmpv6Type(_)) {
                        offset
                    } else {
                        offset + 1
                    };
                    self.frame.bytes[at] = *v;
                    self.frame.fix_l4_checksum();
                }
            }
            ArpOp(_) | ArpSpa { .. } | ArpTpa { .. } | ArpSha { .. } | ArpTha { .. } => {
                if let Some(L3::Arp { offset }) = self.frame.l3 {
                    let width = field.value_bits(&mut scratch);
                    let rel = match field {
                        ArpOp(_) => 6,
                        ArpSha { .. } => 8,
                        ArpSpa { .. } => 14,
                        ArpTha { .. } => 18,
                        _ => 24, // tpa
                    };
                    self.frame.bytes[offset + rel..offset + rel + width]
                        .copy_from_slice(&scratch[..width]);
                }
            }
            Ipv6Src { .. } | Ipv6Dst { .. } => {
                if let Some(L3::Ipv6 { offset }) = self.frame.l3 {
                    field.value_bits(&mut scratch);
                    let at = if matches!(field, Ipv6Src { .. }) {
                        offset + 8
                    } else {
                        offset + 24
                    };
                    self.frame.bytes[at..at + 16].copy_from_slice(&scratch[..16]);
                    self.frame.fix_l4_checksum();
                }
            }
            Ipv6Flabel { label, .. } => {
                if let Some(L3::Ipv6 { offset }) = self.frame.l3 {
                    let word = NetworkEndian::read_u32(&self.frame.bytes[offset..offset + 4]);
                    let word = (word & !0x000f_ffff) | (label & 0x000f_ffff);
                    NetworkEndian::write_u32(&mut self.frame.bytes[offset..offset + 4], word);
                }
            }
            MplsLabel(label) => {
                if let Some(&at) = self.frame.mpls_offsets.first() {
                    let shim = NetworkEndian::read_u32(&self.frame.bytes[at..at + 4]);
                    let shim = (shim & 0x0000_0fff) | ((label & 0x000f_ffff) << 12);
                    NetworkEndian::write_u32(&mut self.frame.bytes[at..at + 4], shim);
                }
            }
            MplsTc(tc) => {
                if let Some(&at) = self.frame.mpls_offsets.first() {
                    let shim = NetworkEndian::read_u32(&self.frame.bytes[at..at + 4]);
                    let shim = (shim & !0x0000_0e00) | (u32::from(tc & 0x7) << 9);
                    NetworkEndian::write_u32(&mut self.frame.bytes[at..at + 4], shim);
                }
            }
            MplsBos(bos) => {
                if let Some(&at) = self.frame.mpls_offsets.first() {
                    let shim = NetworkEndian::read_u32(&self.frame.bytes[at..at + 4]);
                    let shim = (shim & !0x100) | (u32::from(bos & 1) << 8);
                    NetworkEndian::write_u32(&mut self.frame.bytes[at..at + 4], shim);
                }
            }
            PbbIsid { isid, .. } => {
                if let Some(at) = self.frame.pbb_offset {
                    let tci = NetworkEndian::read_u32(&self.frame.bytes[at + 2..at + 6]);
                    let tci = (tci & 0xff00_0000) | (isid & 0x00ff_ffff);
                    NetworkEndian::write_u32(&mut self.frame.bytes[at + 2..at + 6], tci);
                }
            }
            TunnelId { id, .. } => self.tunnel_id = *id,
            Metadata { value, .. } => self.metadata = *value,
            other => {
                trace!(?other, "ignoring set_field on unsupported field");
            }
        }
    }

    fn rewrite_tos(&mut self, f: impl Fn(u8) -> u8) {
        match self.frame.l3 {
            Some(L3::Ipv4 { offset, header_len }) => {
                self.frame.bytes[offset + 1] = f(self.frame.bytes[offset + 1]);
                self.frame.fix_ipv4_checksum(offset, header_len);
            }
            Some(L3::Ipv6 { offset }) => {
                let word = NetworkEndian::read_u16(&self.frame.bytes[offset..offset + 2]);
                #[allow(clippy::cast_possible_truncation)] // masked to 8 bits
                let tos = ((word >> 4) & 0xff) as u8;
                let word = (word & 0xf00f) | (u16::from(f(tos)) << 4);
                NetworkEndian::write_u16(&mut self.frame.bytes[offset..offset + 2], word);
            }
            _ => trace!("tos rewrite without an IP header"),
        }
    }

    fn rewrite_l4_port(&mut self, field: &MatchField, scratch: &mut [u8; MAX_FIELD_WIDTH]) {
        use MatchField::*;
        let target = match (field, self.frame.l4) {
            (TcpSrc(_), Some(L4::Tcp { offset })) => Some(offset),
            (TcpDst(_), Some(L4::Tcp { offset })) => Some(offset + 2),
            (UdpSrc(_), Some(L4::Udp { offset })) => Some(offset),
            (UdpDst(_), Some(L4::Udp { offset })) => Some(offset + 2),
            (SctpSrc(_), Some(L4::Sctp { offset })) => Some(offset),
            (SctpDst(_), Some(L4::Sctp { offset })) => Some(offset + 2),
            _ => None,
        };
        let Some(at) = target else {
            trace!("l4 port rewrite without a matching transport header");
            return;
        };
        field.value_bits(scratch);
        self.frame.bytes[at..at + 2].copy_from_slice(&scratch[..2]);
        self.frame.fix_l4_checksum();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    /// eth(dst 02:.., src 04:..) / ipv4(10.0.0.1 -> 10.0.0.2, ttl 64) /
    /// tcp(1234 -> 80), correct checksums.
    fn tcp_frame() -> Vec<u8> {
        let payload = b"hello";
        let tcp_len = 20 + payload.len();
        let total = 20 + tcp_len;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]); // dst
        bytes.extend_from_slice(&[0x04, 0, 0, 0, 0, 2]); // src
        bytes.extend_from_slice(&0x0800u16.to_be_bytes());
        // ipv4
        let ip_start = bytes.len();
        bytes.push(0x45);
        bytes.push(0);
        bytes.extend_from_slice(&(total as u16).to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]); // id, flags
        bytes.push(64); // ttl
        bytes.push(6); // tcp
        bytes.extend_from_slice(&[0, 0]); // checksum placeholder
        bytes.extend_from_slice(&[10, 0, 0, 1]);
        bytes.extend_from_slice(&[10, 0, 0, 2]);
        // tcp
        let tcp_start = bytes.len();
        bytes.extend_from_slice(&1234u16.to_be_bytes());
        bytes.extend_from_slice(&80u16.to_be_bytes());
        bytes.extend_from_slice(&[0; 8]); // seq, ack
        bytes.push(0x50); // data offset 5
        bytes.push(0x02); // syn
        bytes.extend_from_slice(&[0xff, 0xff]); // window
        bytes.extend_from_slice(&[0, 0, 0, 0]); // checksum, urgent
        bytes.extend_from_slice(payload);

        // fix checksums
        let ip_sum = ones_complement_sum(&[&bytes[ip_start..ip_start + 20]]);
        bytes[ip_start + 10..ip_start + 12].copy_from_slice(&(!ip_sum).to_be_bytes());
        let mut pseudo = Vec::new();
        pseudo.extend_from_slice(&bytes[ip_start + 12..ip_start + 20]);
        pseudo.push(0);
        pseudo.push(6);
        pseudo.extend_from_slice(&(tcp_len as u16).to_be_bytes());
        let tcp_sum = ones_complement_sum(&[&pseudo, &bytes[tcp_start..]]);
        bytes[tcp_start + 16..tcp_start + 18].copy_from_slice(&(!tcp_sum).to_be_bytes());
        bytes
    }

    fn context(bytes: Vec<u8>, in_port: u32) -> PacketContext {
        PacketContext::new(ParsedFrame::parse(bytes).unwrap(), in_port)
    }

    fn verify_checksums(ctx: &PacketContext) {
        let bytes = ctx.frame.bytes();
        let ip_sum = ones_complement_sum(&[&bytes[14..34]]);
        assert_eq!(ip_sum, 0xffff, "ipv4 checksum must verify");
        let mut pseudo = Vec::new();
        pseudo.extend_from_slice(&bytes[14 + 12..14 + 20]);
        pseudo.push(0);
        pseudo.push(6);
        pseudo.extend_from_slice(&((bytes.len() - 34) as u16).to_be_bytes());
        let tcp_sum = ones_complement_sum(&[&pseudo, &bytes[34..]]);
        assert_eq!(tcp_sum, 0xffff, "tcp checksum must verify");
    }

    #[test]
    fn parses_ipv4_tcp() {
        let ctx = context(tcp_frame(), 1);
        let mut out = [0u8; MAX_FIELD_WIDTH];
        assert_eq!(ctx.field_bits(0, &mut out), Some(4)); // in_port
        assert_eq!(NetworkEndian::read_u32(&out[..4]), 1);
        assert_eq!(ctx.field_bits(5, &mut out), Some(2)); // eth_type
        assert_eq!(NetworkEndian::read_u16(&out[..2]), 0x0800);
        assert_eq!(ctx.field_bits(10, &mut out), Some(1)); // ip_proto
        assert_eq!(out[0], 6);
        assert_eq!(ctx.field_bits(13, &mut out), Some(2)); // tcp_src
        assert_eq!(NetworkEndian::read_u16(&out[..2]), 1234);
        // no vlan: vid reads OFPVID_NONE
        assert_eq!(ctx.field_bits(6, &mut out), Some(2));
        assert_eq!(NetworkEndian::read_u16(&out[..2]), 0);
        // no udp layer
        assert_eq!(ctx.field_bits(15, &mut out), None);
        verify_checksums(&ctx);
    }

    #[test]
    fn match_evaluation_honors_masks() {
        let ctx = context(tcp_frame(), 1);
        let mut m = Match::new();
        m.append(MatchField::InPort(1)).unwrap();
        m.append(MatchField::EthType(0x0800)).unwrap();
        m.append(MatchField::Ipv4Src {
            addr: Ipv4Addr::new(10, 0, 0, 99),
            mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
        })
        .unwrap();
        assert!(ctx.matches(&m));

        let mut wrong_port = Match::new();
        wrong_port.append(MatchField::InPort(2)).unwrap();
        assert!(!ctx.matches(&wrong_port));

        let mut absent_layer = Match::new();
        absent_layer.append(MatchField::UdpSrc(53)).unwrap();
        assert!(!ctx.matches(&absent_layer));
    }

    #[test]
    fn empty_match_is_all_wildcard() {
        let ctx = context(tcp_frame(), 7);
        assert!(ctx.matches(&Match::new()));
    }

    #[test]
    fn push_and_pop_vlan() {
        let mut ctx = context(tcp_frame(), 1);
        let original_len = ctx.frame.len();
        ctx.frame.push_vlan(ETH_TYPE_VLAN);
        assert_eq!(ctx.frame.len(), original_len + 4);
        assert_eq!(ctx.frame.eth_type(), 0x0800);

        ctx.apply_set_field(&MatchField::VlanVid {
            vid: VLAN_VID_PRESENT | 100,
            mask: None,
        });
        let mut out = [0u8; MAX_FIELD_WIDTH];
        assert_eq!(ctx.field_bits(6, &mut out), Some(2));
        assert_eq!(NetworkEndian::read_u16(&out[..2]), VLAN_VID_PRESENT | 100);

        // ip/tcp still visible behind the tag
        assert_eq!(ctx.field_bits(13, &mut out), Some(2));

        ctx.frame.pop_vlan();
        assert_eq!(ctx.frame.len(), original_len);
        assert_eq!(ctx.field_bits(6, &mut out), Some(2));
        assert_eq!(NetworkEndian::read_u16(&out[..2]), 0);
    }

    #[test]
    fn set_ipv4_src_fixes_checksums() {
        let mut ctx = context(tcp_frame(), 1);
        ctx.apply_set_field(&MatchField::Ipv4Src {
            addr: Ipv4Addr::new(192, 168, 1, 1),
            mask: None,
        });
        let mut out = [0u8; MAX_FIELD_WIDTH];
        ctx.field_bits(11, &mut out).unwrap();
        assert_eq!(out[..4], [192, 168, 1, 1]);
        verify_checksums(&ctx);
    }

    #[test]
    fn set_tcp_port_fixes_checksum() {
        let mut ctx = context(tcp_frame(), 1);
        ctx.apply_set_field(&MatchField::TcpDst(8080));
        let mut out = [0u8; MAX_FIELD_WIDTH];
        ctx.field_bits(14, &mut out).unwrap();
        assert_eq!(NetworkEndian::read_u16(&out[..2]), 8080);
        verify_checksums(&ctx);
    }

    #[test]
    fn ttl_ops() {
        let mut ctx = context(tcp_frame(), 1);
        ctx.frame.dec_nw_ttl();
        let bytes = ctx.frame.bytes();
        assert_eq!(bytes[14 + 8], 63);
        verify_checksums(&ctx);

        ctx.frame.set_nw_ttl(1);
        ctx.frame.dec_nw_ttl();
        ctx.frame.dec_nw_ttl(); // saturates
        assert_eq!(ctx.frame.bytes()[14 + 8], 0);
    }

    #[test]
    fn mpls_push_swap_pop() {
        let mut ctx = context(tcp_frame(), 1);
        let original = ctx.frame.bytes().to_vec();

        ctx.frame.push_mpls(ETH_TYPE_MPLS);
        assert_eq!(ctx.frame.eth_type(), ETH_TYPE_MPLS);
        let mut out = [0u8; MAX_FIELD_WIDTH];
        // bottom-of-stack set, ttl copied from ip
        assert_eq!(ctx.field_bits(36, &mut out), Some(1));
        assert_eq!(out[0], 1);

        ctx.apply_set_field(&MatchField::MplsLabel(0x1abcd));
        assert_eq!(ctx.field_bits(34, &mut out), Some(4));
        assert_eq!(NetworkEndian::read_u32(&out[..4]), 0x1abcd);

        // a second shim is not BoS
        ctx.frame.push_mpls(ETH_TYPE_MPLS);
        assert_eq!(ctx.field_bits(36, &mut out), Some(1));
        assert_eq!(out[0], 0);

        ctx.frame.pop_mpls(ETH_TYPE_MPLS);
        ctx.frame.pop_mpls(ETH_TYPE_IPV4);
        assert_eq!(ctx.frame.bytes(), &original[..]);
        // ip visible again
        assert_eq!(ctx.field_bits(11, &mut out), Some(4));
    }

    #[test]
    fn arp_fields_read_and_write() {
        // gratuitous arp request
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0xff; 6]);
        bytes.extend_from_slice(&[0x04, 0, 0, 0, 0, 2]);
        bytes.extend_from_slice(&0x0806u16.to_be_bytes());
        bytes.extend_from_slice(&[0, 1, 8, 0, 6, 4, 0, 1]); // htype ptype hlen plen op
        bytes.extend_from_slice(&[0x04, 0, 0, 0, 0, 2]); // sha
        bytes.extend_from_slice(&[10, 0, 0, 1]); // spa
        bytes.extend_from_slice(&[0; 6]); // tha
        bytes.extend_from_slice(&[10, 0, 0, 2]); // tpa

        let mut ctx = context(bytes, 3);
        let mut out = [0u8; MAX_FIELD_WIDTH];
        assert_eq!(ctx.field_bits(21, &mut out), Some(2)); // arp_op
        assert_eq!(NetworkEndian::read_u16(&out[..2]), 1);
        assert_eq!(ctx.field_bits(22, &mut out), Some(4)); // spa
        assert_eq!(out[..4], [10, 0, 0, 1]);

        ctx.apply_set_field(&MatchField::ArpTpa {
            addr: Ipv4Addr::new(10, 0, 0, 9),
            mask: None,
        });
        assert_eq!(ctx.field_bits(23, &mut out), Some(4));
        assert_eq!(out[..4], [10, 0, 0, 9]);
    }

    #[test]
    fn runt_frame_is_rejected() {
        assert!(matches!(
            ParsedFrame::parse(vec![0; 10]),
            Err(FrameError::TooShort(10))
        ));
    }
}
