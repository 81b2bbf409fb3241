// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The closed set of OpenFlow-basic match fields.
//!
//! Each variant knows its field index, payload width, and value/mask bit
//! layout; the TLV header is derived, never stored, except for non-basic
//! classes which are preserved verbatim as [`MatchField::Unknown`].

use crate::error::WireError;
use byteorder::{ByteOrder, NetworkEndian};
use std::net::{Ipv4Addr, Ipv6Addr};

/// OXM class of the fields this crate understands.
pub const OXM_CLASS_OPENFLOW_BASIC: u16 = 0x8000;

/// Number of OpenFlow-basic field indexes (0..=39); also the width of the
/// presence bitmask used by match comparison.
pub const MATCH_FIELD_COUNT: usize = 40;

/// Largest value/mask width of any basic field (IPv6 addresses).
pub const MAX_FIELD_WIDTH: usize = 16;

/// `OFPVID_PRESENT`: set in `VLAN_VID` values to match frames with an
/// 802.1Q tag.
pub const VLAN_VID_PRESENT: u16 = 0x1000;

bitflags::bitflags! {
    /// `OFPIEH_*` flags of the `IPV6_EXTHDR` pseudo-field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Ipv6ExthdrFlags: u16 {
        const NONEXT = 1 << 0;
        const ESP = 1 << 1;
        const AUTH = 1 << 2;
        const DEST = 1 << 3;
        const FRAG = 1 << 4;
        const ROUTER = 1 << 5;
        const HOP = 1 << 6;
        const UNREP = 1 << 7;
        const UNSEQ = 1 << 8;
    }
}

/// One OXM match entry.
///
/// Maskable fields carry `Option<mask>`; `None` is the exact-match
/// encoding. An all-ones mask is normalized to `None` when appended to a
/// [`crate::oxm::Match`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchField {
    InPort(u32),
    InPhyPort(u32),
    Metadata { value: u64, mask: Option<u64> },
    EthDst { addr: [u8; 6], mask: Option<[u8; 6]> },
    EthSrc { addr: [u8; 6], mask: Option<[u8; 6]> },
    EthType(u16),
    /// 12-bit VLAN id plus the [`VLAN_VID_PRESENT`] bit.
    VlanVid { vid: u16, mask: Option<u16> },
    VlanPcp(u8),
    IpDscp(u8),
    IpEcn(u8),
    IpProto(u8),
    Ipv4Src { addr: Ipv4Addr, mask: Option<Ipv4Addr> },
    Ipv4Dst { addr: Ipv4Addr, mask: Option<Ipv4Addr> },
    TcpSrc(u16),
    TcpDst(u16),
    UdpSrc(u16),
    UdpDst(u16),
    SctpSrc(u16),
    SctpDst(u16),
    Icmpv4Type(u8),
    Icmpv4Code(u8),
    ArpOp(u16),
    ArpSpa { addr: Ipv4Addr, mask: Option<Ipv4Addr> },
    ArpTpa { addr: Ipv4Addr, mask: Option<Ipv4Addr> },
    ArpSha { addr: [u8; 6], mask: Option<[u8; 6]> },
    ArpTha { addr: [u8; 6], mask: Option<[u8; 6]> },
    Ipv6Src { addr: Ipv6Addr, mask: Option<Ipv6Addr> },
    Ipv6Dst { addr: Ipv6Addr, mask: Option<Ipv6Addr> },
    /// 20-bit IPv6 flow label.
    Ipv6Flabel { label: u32, mask: Option<u32> },
    Icmpv6Type(u8),
    Icmpv6Code(u8),
    Ipv6NdTarget(Ipv6Addr),
    Ipv6NdSll([u8; 6]),
    Ipv6NdTll([u8; 6]),
    /// 20-bit MPLS label.
    MplsLabel(u32),
    MplsTc(u8),
    MplsBos(u8),
    /// 24-bit PBB service id.
    PbbIsid { isid: u32, mask: Option<u32> },
    TunnelId { id: u64, mask: Option<u64> },
    Ipv6Exthdr {
        flags: Ipv6ExthdrFlags,
        mask: Option<Ipv6ExthdrFlags>,
    },
    /// Entry of a class other than OpenFlow-basic, carried through opaque
    /// and re-emitted verbatim.
    Unknown { header: u32, body: Vec<u8> },
}

/// Unmasked payload width and maskability of a basic field index.
pub(crate) fn basic_field_layout(index: u8) -> Option<(usize, bool)> {
    Some(match index {
        0 | 1 => (4, false),         // in_port, in_phy_port
        2 => (8, true),              // metadata
        3 | 4 => (6, true),          // eth_dst, eth_src
        5 => (2, false),             // eth_type
        6 => (2, true),              // vlan_vid
        7..=10 => (1, false),        // vlan_pcp, ip_dscp, ip_ecn, ip_proto
        11 | 12 => (4, true),        // ipv4_src, ipv4_dst
        13..=18 => (2, false),       // tcp/udp/sctp src/dst
        19 | 20 => (1, false),       // icmpv4 type/code
        21 => (2, false),            // arp_op
        22 | 23 => (4, true),        // arp_spa, arp_tpa
        24 | 25 => (6, true),        // arp_sha, arp_tha
        26 | 27 => (16, true),       // ipv6_src, ipv6_dst
        28 => (4, true),             // ipv6_flabel
        29 | 30 => (1, false),       // icmpv6 type/code
        31 => (16, false),           // ipv6_nd_target
        32 | 33 => (6, false),       // ipv6_nd_sll, ipv6_nd_tll
        34 => (4, false),            // mpls_label
        35 | 36 => (1, false),       // mpls_tc, mpls_bos
        37 => (3, true),             // pbb_isid
        38 => (8, true),             // tunnel_id
        39 => (2, true),             // ipv6_exthdr
        _ => return None,
    })
}

impl MatchField {
    /// OpenFlow-basic field index, `None` for non-basic entries.
    #[must_use]
    pub fn field_index(&self) -> Option<u8> {
        use MatchField::*;
        Some(match self {
            InPort(_) => 0,
            InPhyPort(_) => 1,
            Metadata { .. } => 2,
            EthDst { .. } => 3,
            EthSrc { .. } => 4,
            EthType(_) => 5,
            VlanVid { .. } => 6,
            VlanPcp(_) => 7,
            IpDscp(_) => 8,
            IpEcn(_) => 9,
            IpProto(_) => 10,
            Ipv4Src { .. } => 11,
            Ipv4Dst { .. } => 12,
            TcpSrc(_) => 13,
            TcpDst(_) => 14,
            UdpSrc(_) => 15,
            UdpDst(_) => 16,
            SctpSrc(_) => 17,
            SctpDst(_) => 18,
            Icmpv4Type(_) => 19,
            Icmpv4Code(_) => 20,
            ArpOp(_) => 21,
            ArpSpa { .. } => 22,
            ArpTpa { .. } => 23,
            ArpSha { .. } => 24,
            ArpTha { .. } => 25,
            Ipv6Src { .. } => 26,
            Ipv6Dst { .. } => 27,
            Ipv6Flabel { .. } => 28,
            Icmpv6Type(_) => 29,
            Icmpv6Code(_) => 30,
            Ipv6NdTarget(_) => 31,
            Ipv6NdSll(_) => 32,
            Ipv6NdTll(_) => 33,
            MplsLabel(_) => 34,
            MplsTc(_) => 35,
            MplsBos(_) => 36,
            PbbIsid { .. } => 37,
            TunnelId { .. } => 38,
            Ipv6Exthdr { .. } => 39,
            Unknown { .. } => return None,
        })
    }

    /// Whether the entry carries a mask.
    #[must_use]
    pub fn has_mask(&self) -> bool {
        use MatchField::*;
        match self {
            Metadata { mask, .. } | TunnelId { id: _, mask } => mask.is_some(),
            EthDst { mask, .. }
            | EthSrc { mask, .. }
            | ArpSha { mask, .. }
            | ArpTha { mask, .. } => mask.is_some(),
            VlanVid { mask, .. } => mask.is_some(),
            Ipv4Src { mask, .. }
            | Ipv4Dst { mask, .. }
            | ArpSpa { mask, .. }
            | ArpTpa { mask, .. } => mask.is_some(),
            Ipv6Src { mask, .. } | Ipv6Dst { mask, .. } => mask.is_some(),
            Ipv6Flabel { mask, .. } | PbbIsid { mask, .. } => mask.is_some(),
            Ipv6Exthdr { mask, .. } => mask.is_some(),
            Unknown { header, .. } => (header >> 8) & 1 == 1,
            _ => false,
        }
    }

    /// Unmasked value width in bytes.
    #[must_use]
    pub fn value_width(&self) -> usize {
        match self {
            MatchField::Unknown { header, body } => {
                if (header >> 8) & 1 == 1 {
                    body.len() / 2
                } else {
                    body.len()
                }
            }
            #[allow(clippy::unwrap_used)] // every non-Unknown variant has an index
            _ => basic_field_layout(self.field_index().unwrap()).map_or(0, |(w, _)| w),
        }
    }

    /// Serialized payload length (value plus mask when present).
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            MatchField::Unknown { body, .. } => body.len(),
            _ if self.has_mask() => self.value_width() * 2,
            _ => self.value_width(),
        }
    }

    /// Serialized entry length, TLV header included.
    #[must_use]
    pub fn entry_len(&self) -> usize {
        4 + self.payload_len()
    }

    /// The 32-bit OXM header of this entry.
    #[must_use]
    pub fn header(&self) -> u32 {
        match self {
            MatchField::Unknown { header, .. } => *header,
            _ => {
                #[allow(clippy::unwrap_used)] // every non-Unknown variant has an index
                let index = u32::from(self.field_index().unwrap());
                let hasmask = u32::from(self.has_mask());
                #[allow(clippy::cast_possible_truncation)] // widths are < 33
                let len = self.payload_len() as u32;
                (u32::from(OXM_CLASS_OPENFLOW_BASIC) << 16) | (index << 9) | (hasmask << 8) | len
            }
        }
    }

    /// Write the big-endian value bits into `out`, returning the width.
    ///
    /// `out` must hold [`MAX_FIELD_WIDTH`] bytes. For [`MatchField::Unknown`]
    /// the raw body (value and mask alike) is handled by the encoder
    /// directly and this returns 0.
    pub fn value_bits(&self, out: &mut [u8; MAX_FIELD_WIDTH]) -> usize {
        use MatchField::*;
        match self {
            InPort(v) | InPhyPort(v) => NetworkEndian::write_u32(&mut out[..4], *v),
            Metadata { value, .. } => NetworkEndian::write_u64(&mut out[..8], *value),
            EthDst { addr, .. } | EthSrc { addr, .. } | ArpSha { addr, .. }
            | ArpTha { addr, .. } => out[..6].copy_from_slice(addr),
            EthType(v) | ArpOp(v) => NetworkEndian::write_u16(&mut out[..2], *v),
            VlanVid { vid, .. } => NetworkEndian::write_u16(&mut out[..2], *vid),
            VlanPcp(v) | IpDscp(v) | IpEcn(v) | IpProto(v) | Icmpv4Type(v) | Icmpv4Code(v)
            | Icmpv6Type(v) | Icmpv6Code(v) | MplsTc(v) | MplsBos(v) => out[0] = *v,
            Ipv4Src { addr, .. } | Ipv4Dst { addr, .. } | ArpSpa { addr, .. }
            | ArpTpa { addr, .. } => out[..4].copy_from_slice(&addr.octets()),
            TcpSrc(v) | TcpDst(v) | UdpSrc(v) | UdpDst(v) | SctpSrc(v) | SctpDst(v) => {
                NetworkEndian::write_u16(&mut out[..2], *v);
            }
            Ipv6Src { addr, .. } | Ipv6Dst { addr, .. } => {
                out[..16].copy_from_slice(&addr.octets());
            }
            Ipv6Flabel { label, .. } | MplsLabel(label) => {
                NetworkEndian::write_u32(&mut out[..4], *label);
            }
            Ipv6NdTarget(addr) => out[..16].copy_from_slice(&addr.octets()),
            Ipv6NdSll(addr) | Ipv6NdTll(addr) => out[..6].copy_from_slice(addr),
            PbbIsid { isid, .. } => {
                out[0] = ((isid >> 16) & 0xff) as u8;
                out[1] = ((isid >> 8) & 0xff) as u8;
                out[2] = (isid & 0xff) as u8;
            }
            TunnelId { id, .. } => NetworkEndian::write_u64(&mut out[..8], *id),
            Ipv6Exthdr { flags, .. } => NetworkEndian::write_u16(&mut out[..2], flags.bits()),
            Unknown { .. } => return 0,
        }
        self.value_width()
    }

    /// Write the big-endian mask bits into `out` when a mask is present.
    ///
    /// Returns `false` and leaves `out` untouched for exact-match entries,
    /// so a caller that pre-fills `out` with ones gets the effective mask
    /// either way.
    pub fn mask_bits(&self, out: &mut [u8; MAX_FIELD_WIDTH]) -> bool {
        use MatchField::*;
        match self {
            Metadata { mask: Some(m), .. } | TunnelId { mask: Some(m), .. } => {
                NetworkEndian::write_u64(&mut out[..8], *m);
            }
            EthDst { mask: Some(m), .. }
            | EthSrc { mask: Some(m), .. }
            | ArpSha { mask: Some(m), .. }
            | ArpTha { mask: Some(m), .. } => out[..6].copy_from_slice(m),
            VlanVid { mask: Some(m), .. } => NetworkEndian::write_u16(&mut out[..2], *m),
            Ipv4Src { mask: Some(m), .. }
            | Ipv4Dst { mask: Some(m), .. }
            | ArpSpa { mask: Some(m), .. }
            | ArpTpa { mask: Some(m), .. } => out[..4].copy_from_slice(&m.octets()),
            Ipv6Src { mask: Some(m), .. } | Ipv6Dst { mask: Some(m), .. } => {
                out[..16].copy_from_slice(&m.octets());
            }
            Ipv6Flabel { mask: Some(m), .. } => NetworkEndian::write_u32(&mut out[..4], *m),
            PbbIsid { mask: Some(m), .. } => {
                out[0] = ((m >> 16) & 0xff) as u8;
                out[1] = ((m >> 8) & 0xff) as u8;
                out[2] = (m & 0xff) as u8;
            }
            Ipv6Exthdr { mask: Some(m), .. } => {
                NetworkEndian::write_u16(&mut out[..2], m.bits());
            }
            _ => return false,
        }
        true
    }

    /// Collapse an all-ones mask to the exact-match encoding.
    #[must_use]
    pub(crate) fn normalized(self) -> MatchField {
        use MatchField::*;
        match self {
            Metadata {
                value,
                mask: Some(u64::MAX),
            } => Metadata { value, mask: None },
            TunnelId {
                id,
                mask: Some(u64::MAX),
            } => TunnelId { id, mask: None },
            EthDst { addr, mask: Some(m) } if m == [0xff; 6] => EthDst { addr, mask: None },
            EthSrc { addr, mask: Some(m) } if m == [0xff; 6] => EthSrc { addr, mask: None },
            ArpSha { addr, mask: Some(m) } if m == [0xff; 6] => ArpSha { addr, mask: None },
            ArpTha { addr, mask: Some(m) } if m == [0xff; 6] => ArpTha { addr, mask: None },
            VlanVid {
                vid,
                mask: Some(0xffff),
            } => VlanVid { vid, mask: None },
            Ipv4Src { addr, mask: Some(m) } if m == Ipv4Addr::BROADCAST => {
                Ipv4Src { addr, mask: None }
            }
            Ipv4Dst { addr, mask: Some(m) } if m == Ipv4Addr::BROADCAST => {
                Ipv4Dst { addr, mask: None }
            }
            ArpSpa { addr, mask: Some(m) } if m == Ipv4Addr::BROADCAST => {
                ArpSpa { addr, mask: None }
            }
            ArpTpa { addr, mask: Some(m) } if m == Ipv4Addr::BROADCAST => {
                ArpTpa { addr, mask: None }
            }
            Ipv6Src { addr, mask: Some(m) } if m.octets() == [0xff; 16] => {
                Ipv6Src { addr, mask: None }
            }
            Ipv6Dst { addr, mask: Some(m) } if m.octets() == [0xff; 16] => {
                Ipv6Dst { addr, mask: None }
            }
            Ipv6Flabel {
                label,
                mask: Some(0xffff_ffff),
            } => Ipv6Flabel { label, mask: None },
            PbbIsid {
                isid,
                mask: Some(m),
            } if m & 0x00ff_ffff == 0x00ff_ffff => PbbIsid { isid, mask: None },
            Ipv6Exthdr {
                flags,
                mask: Some(m),
            } if m == Ipv6ExthdrFlags::all() => Ipv6Exthdr { flags, mask: None },
            other => other,
        }
    }

    /// Decode one entry from its header and payload bytes.
    pub(crate) fn decode(header: u32, payload: &[u8]) -> Result<MatchField, WireError> {
        #[allow(clippy::cast_possible_truncation)] // masked to 16 bits
        let class = (header >> 16) as u16;
        if class != OXM_CLASS_OPENFLOW_BASIC {
            return Ok(MatchField::Unknown {
                header,
                body: payload.to_vec(),
            });
        }
        #[allow(clippy::cast_possible_truncation)] // masked to 7 bits
        let index = ((header >> 9) & 0x7f) as u8;
        let hasmask = (header >> 8) & 1 == 1;
        let Some((width, maskable)) = basic_field_layout(index) else {
            return Err(WireError::UnknownOxmField(index));
        };
        let expected = if hasmask { width * 2 } else { width };
        if payload.len() != expected || (hasmask && !maskable) {
            return Err(WireError::BadOxmLength {
                field: index,
                expected,
                got: payload.len(),
            });
        }
        let value = &payload[..width];
        let mask = if hasmask { Some(&payload[width..]) } else { None };

        let mac = |b: &[u8]| -> [u8; 6] {
            let mut out = [0u8; 6];
            out.copy_from_slice(b);
            out
        };
        let v4 = |b: &[u8]| -> Ipv4Addr {
            let mut out = [0u8; 4];
            out.copy_from_slice(b);
            Ipv4Addr::from(out)
        };
        let v6 = |b: &[u8]| -> Ipv6Addr {
            let mut out = [0u8; 16];
            out.copy_from_slice(b);
            Ipv6Addr::from(out)
        };
        let u24 = |b: &[u8]| -> u32 {
            (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
        };

        use MatchField::*;
        Ok(match index {
            0 => InPort(NetworkEndian::read_u32(value)),
            1 => InPhyPort(NetworkEndian::read_u32(value)),
            2 => Metadata {
                value: NetworkEndian::read_u64(value),
                mask: mask.map(NetworkEndian::read_u64),
            },
            3 => EthDst {
                addr: mac(value),
                mask: mask.map(mac),
            },
            4 => EthSrc {
                addr: mac(value),
                mask: mask.map(mac),
            },
            5 => EthType(NetworkEndian::read_u16(value)),
            6 => VlanVid {
                vid: NetworkEndian::read_u16(value),
                mask: mask.map(NetworkEndian::read_u16),
            },
            7 => VlanPcp(value[0]),
            8 => IpDscp(value[0]),
            9 => IpEcn(value[0]),
            10 => IpProto(value[0]),
            11 => Ipv4Src {
                addr: v4(value),
                mask: mask.map(v4),
            },
            12 => Ipv4Dst {
                addr: v4(value),
                mask: mask.map(v4),
            },
            13 => TcpSrc(NetworkEndian::read_u16(value)),
            14 => TcpDst(NetworkEndian::read_u16(value)),
            15 => UdpSrc(NetworkEndian::read_u16(value)),
            16 => UdpDst(NetworkEndian::read_u16(value)),
            17 => SctpSrc(NetworkEndian::read_u16(value)),
            18 => SctpDst(NetworkEndian::read_u16(value)),
            19 => Icmpv4Type(value[0]),
            20 => Icmpv4Code(value[0]),
            21 => ArpOp(NetworkEndian::read_u16(value)),
            22 => ArpSpa {
                addr: v4(value),
                mask: mask.map(v4),
            },
            23 => ArpTpa {
                addr: v4(value),
                mask: mask.map(v4),
            },
            24 => ArpSha {
                addr: mac(value),
                mask: mask.map(mac),
            },
            25 => ArpTha {
                addr: mac(value),
                mask: mask.map(mac),
            },
            26 => Ipv6Src {
                addr: v6(value),
                mask: mask.map(v6),
            },
            27 => Ipv6Dst {
                addr: v6(value),
                mask: mask.map(v6),
            },
            28 => Ipv6Flabel {
                label: NetworkEndian::read_u32(value),
                mask: mask.map(NetworkEndian::read_u32),
            },
            29 => Icmpv6Type(value[0]),
            30 => Icmpv6Code(value[0]),
            31 => Ipv6NdTarget(v6(value)),
            32 => Ipv6NdSll(mac(value)),
            33 => Ipv6NdTll(mac(value)),
            34 => MplsLabel(NetworkEndian::read_u32(value)),
            35 => MplsTc(value[0]),
            36 => MplsBos(value[0]),
            37 => PbbIsid {
                isid: u24(value),
                mask: mask.map(u24),
            },
            38 => TunnelId {
                id: NetworkEndian::read_u64(value),
                mask: mask.map(NetworkEndian::read_u64),
            },
            39 => Ipv6Exthdr {
                flags: Ipv6ExthdrFlags::from_bits_truncate(NetworkEndian::read_u16(value)),
                mask: mask.map(|m| {
                    Ipv6ExthdrFlags::from_bits_truncate(NetworkEndian::read_u16(m))
                }),
            },
            _ => return Err(WireError::UnknownOxmField(index)),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_packs_class_field_mask_and_length() {
        let field = MatchField::Ipv4Src {
            addr: Ipv4Addr::new(10, 0, 0, 1),
            mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
        };
        // class 0x8000, field 11, hasmask, length 8
        assert_eq!(field.header(), 0x8000_1708);

        let exact = MatchField::InPort(3);
        // class 0x8000, field 0, no mask, length 4
        assert_eq!(exact.header(), 0x8000_0004);
    }

    #[test]
    fn all_ones_mask_normalizes_away() {
        let field = MatchField::EthSrc {
            addr: [1, 2, 3, 4, 5, 6],
            mask: Some([0xff; 6]),
        };
        assert_eq!(
            field.normalized(),
            MatchField::EthSrc {
                addr: [1, 2, 3, 4, 5, 6],
                mask: None,
            }
        );
        // a partial mask survives
        let field = MatchField::EthSrc {
            addr: [1, 2, 3, 4, 5, 6],
            mask: Some([0xff, 0xff, 0xff, 0, 0, 0]),
        };
        assert!(field.clone().normalized() == field);
    }

    #[test]
    fn masked_width_doubles_payload() {
        let exact = MatchField::Metadata {
            value: 1,
            mask: None,
        };
        let masked = MatchField::Metadata {
            value: 1,
            mask: Some(0xff),
        };
        assert_eq!(exact.payload_len(), 8);
        assert_eq!(masked.payload_len(), 16);
        assert_eq!(masked.value_width(), 8);
    }

    #[test]
    fn mask_on_unmaskable_field_is_rejected() {
        // eth_type (index 5) with the hasmask bit set
        let header = (0x8000u32 << 16) | (5 << 9) | (1 << 8) | 4;
        assert!(matches!(
            MatchField::decode(header, &[0x08, 0x00, 0xff, 0xff]),
            Err(WireError::BadOxmLength { field: 5, .. })
        ));
    }

    #[test]
    fn unknown_class_is_preserved() {
        let header = (0xffffu32 << 16) | (9 << 9) | 6;
        let field = MatchField::decode(header, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(
            field,
            MatchField::Unknown {
                header,
                body: vec![1, 2, 3, 4, 5, 6],
            }
        );
        assert_eq!(field.header(), header);
        assert_eq!(field.field_index(), None);
    }

    #[test]
    fn unknown_basic_index_is_an_error() {
        let header = (0x8000u32 << 16) | (55 << 9) | 4;
        assert!(matches!(
            MatchField::decode(header, &[0; 4]),
            Err(WireError::UnknownOxmField(55))
        ));
    }
}
