// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! OXM match sequences: build, measure, encode, decode, compare.
//!
//! A [`Match`] is an ordered sequence of TLV entries wrapped on the wire in
//! an `ofp_match` header and zero-padded to an 8-byte boundary. Within one
//! match, each OpenFlow-basic field may appear at most once; a wildcarded
//! field is simply absent.

pub mod field;

pub use field::{Ipv6ExthdrFlags, MatchField, VLAN_VID_PRESENT};

use crate::buffer::Buffer;
use crate::error::WireError;
use byteorder::{ByteOrder, NetworkEndian};
use field::{MATCH_FIELD_COUNT, MAX_FIELD_WIDTH};

/// `ofp_match.type` for OXM-encoded matches.
const OFPMT_OXM: u16 = 1;

fn pad_to_8(len: usize) -> usize {
    len.div_ceil(8) * 8
}

/// Ordered sequence of OXM match entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Match {
    fields: Vec<MatchField>,
}

impl Match {
    /// The empty (all-wildcard) match.
    #[must_use]
    pub fn new() -> Match {
        Match { fields: Vec::new() }
    }

    /// Append one entry.
    ///
    /// An all-ones mask collapses to the exact-match encoding before the
    /// entry is stored.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::DuplicateOxmField`] when an OpenFlow-basic field
    /// of the same index is already present.
    pub fn append(&mut self, entry: MatchField) -> Result<(), WireError> {
        if let Some(index) = entry.field_index() {
            if self.basic_bitmask() & (1u64 << index) != 0 {
                return Err(WireError::DuplicateOxmField(index));
            }
        }
        self.fields.push(entry.normalized());
        Ok(())
    }

    /// The entries, in append/wire order.
    #[must_use]
    pub fn fields(&self) -> &[MatchField] {
        &self.fields
    }

    /// Number of entries.
    #[must_use]
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// True when every field is wildcarded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialized length of the `ofp_match` (header and entries), without
    /// the trailing pad. This is the value of the wire `length` field.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        4 + self.fields.iter().map(MatchField::entry_len).sum::<usize>()
    }

    /// Serialized length including the pad to the next 8-byte boundary.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        pad_to_8(self.serialized_len())
    }

    /// Append the wire form to `buf`: `ofp_match` header, entries in
    /// network byte order, zero pad to 8 bytes.
    pub fn encode(&self, buf: &mut Buffer) {
        let body_len = self.serialized_len();
        let out = buf.append_zeroed(pad_to_8(body_len));
        NetworkEndian::write_u16(&mut out[0..2], OFPMT_OXM);
        debug_assert!(body_len <= usize::from(u16::MAX));
        #[allow(clippy::cast_possible_truncation)] // bounded by debug_assert
        NetworkEndian::write_u16(&mut out[2..4], body_len as u16);

        let mut at = 4;
        let mut scratch = [0u8; MAX_FIELD_WIDTH];
        for entry in &self.fields {
            NetworkEndian::write_u32(&mut out[at..at + 4], entry.header());
            at += 4;
            if let MatchField::Unknown { body, .. } = entry {
                out[at..at + body.len()].copy_from_slice(body);
                at += body.len();
                continue;
            }
            let width = entry.value_bits(&mut scratch);
            out[at..at + width].copy_from_slice(&scratch[..width]);
            at += width;
            if entry.mask_bits(&mut scratch) {
                out[at..at + width].copy_from_slice(&scratch[..width]);
                at += width;
            }
        }
        debug_assert_eq!(at, body_len);
    }

    /// Decode an `ofp_match` from the front of `buf`.
    ///
    /// Returns the match and the number of bytes consumed (padding
    /// included).
    ///
    /// # Errors
    ///
    /// Fails on a non-OXM match type, truncation, a bad per-entry length,
    /// an unknown basic field index, or a repeated basic field.
    pub fn decode(buf: &[u8]) -> Result<(Match, usize), WireError> {
        if buf.len() < 4 {
            return Err(WireError::Truncated {
                what: "ofp_match",
                needed: 4,
                got: buf.len(),
            });
        }
        let match_type = NetworkEndian::read_u16(&buf[0..2]);
        if match_type != OFPMT_OXM {
            return Err(WireError::BadMatchType(match_type));
        }
        let body_len = usize::from(NetworkEndian::read_u16(&buf[2..4]));
        let padded = pad_to_8(body_len);
        if body_len < 4 || buf.len() < padded {
            return Err(WireError::Truncated {
                what: "ofp_match body",
                needed: padded.max(4),
                got: buf.len(),
            });
        }

        let mut matches = Match::new();
        let mut at = 4;
        while at < body_len {
            if body_len - at < 4 {
                return Err(WireError::Truncated {
                    what: "oxm_tlv header",
                    needed: 4,
                    got: body_len - at,
                });
            }
            let header = NetworkEndian::read_u32(&buf[at..at + 4]);
            let payload_len = (header & 0xff) as usize;
            at += 4;
            if body_len - at < payload_len {
                return Err(WireError::Truncated {
                    what: "oxm_tlv payload",
                    needed: payload_len,
                    got: body_len - at,
                });
            }
            let entry = MatchField::decode(header, &buf[at..at + payload_len])?;
            at += payload_len;
            matches.append(entry)?;
        }
        Ok((matches, padded))
    }

    /// Bitmask of present OpenFlow-basic field indexes.
    fn basic_bitmask(&self) -> u64 {
        let mut bitmask = 0u64;
        for entry in &self.fields {
            if let Some(index) = entry.field_index() {
                bitmask |= 1u64 << index;
            }
        }
        bitmask
    }

    /// Per-index table of present basic fields.
    fn basic_table(&self) -> [Option<&MatchField>; MATCH_FIELD_COUNT] {
        let mut table: [Option<&MatchField>; MATCH_FIELD_COUNT] = [None; MATCH_FIELD_COUNT];
        for entry in &self.fields {
            if let Some(index) = entry.field_index() {
                table[usize::from(index)] = Some(entry);
            }
        }
        table
    }

    /// Loose comparison: does `other` fall within this match?
    ///
    /// Every basic field present here must be present in `other`, `other`'s
    /// mask must not be wider than ours, and the values must agree under our
    /// mask. Not symmetric: a narrower match compares loosely against a
    /// more specific one, never the reverse.
    #[must_use]
    pub fn compare_loose(&self, other: &Match) -> bool {
        let x_bits = self.basic_bitmask();
        let y_bits = other.basic_bitmask();
        if (!x_bits | !y_bits) != !x_bits {
            return false;
        }
        self.compare_fields(other, false)
    }

    /// Strict comparison: identical field sets, bit-equal masks, values
    /// equal under the mask.
    #[must_use]
    pub fn compare_strict(&self, other: &Match) -> bool {
        if self.basic_bitmask() != other.basic_bitmask() {
            return false;
        }
        self.compare_fields(other, true)
    }

    fn compare_fields(&self, other: &Match, strict: bool) -> bool {
        let x_table = self.basic_table();
        let y_table = other.basic_table();
        for index in 0..MATCH_FIELD_COUNT {
            let (Some(x), Some(y)) = (x_table[index], y_table[index]) else {
                continue;
            };
            if !compare_field(x, y, strict) {
                return false;
            }
        }
        true
    }
}

/// Per-octet comparison of one field pair.
///
/// An absent mask counts as all-ones. Value bits outside the mask are
/// ignored on both sides.
fn compare_field(x: &MatchField, y: &MatchField, strict: bool) -> bool {
    let mut x_val = [0u8; MAX_FIELD_WIDTH];
    let mut y_val = [0u8; MAX_FIELD_WIDTH];
    let mut x_mask = [0xffu8; MAX_FIELD_WIDTH];
    let mut y_mask = [0xffu8; MAX_FIELD_WIDTH];

    let width = x.value_bits(&mut x_val);
    y.value_bits(&mut y_val);
    x.mask_bits(&mut x_mask);
    y.mask_bits(&mut y_mask);

    for i in 0..width {
        if strict {
            if x_mask[i] != y_mask[i] {
                return false;
            }
        } else if (!x_mask[i] | !y_mask[i]) != !x_mask[i] {
            return false;
        }
        if x_val[i] & x_mask[i] != y_val[i] & x_mask[i] {
            return false;
        }
    }
    true
}
