// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Group entries and bucket selection.
//!
//! Bucket *execution* lives in the pipeline's action executor; this module
//! owns the entry store, the GROUP_MOD command handling, the per-bucket
//! counters, and SELECT's deterministic weight-proportional choice.

use crate::frame::PacketContext;
use ahash::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::Instant;
use tracing::debug;
use wire::error::{ErrorKind, GroupModFailedCode};
use wire::messages::{Bucket, GroupDescEntry, GroupMod, GroupModCommand, GroupStats, GroupType};
use wire::oxm::field::MAX_FIELD_WIDTH;

/// `OFPG_MAX`: highest group id usable for actual groups.
pub const GROUP_MAX: u32 = 0xffff_ff00;

/// `OFPG_ALL`: wildcard meaning "all groups" in a GROUP_MOD DELETE.
pub const GROUP_ALL: u32 = 0xffff_fffc;

/// `OFPG_ANY`: the "not watching any group" sentinel in buckets and
/// filters.
pub const GROUP_ANY: u32 = 0xffff_ffff;

/// One group entry with its counters.
#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub group_id: u32,
    pub group_type: GroupType,
    pub buckets: Vec<Bucket>,
    pub(crate) packet_count: u64,
    pub(crate) byte_count: u64,
    pub(crate) bucket_packets: Vec<u64>,
    pub(crate) bucket_bytes: Vec<u64>,
    installed_at: Instant,
}

impl GroupEntry {
    fn new(group_id: u32, group_type: GroupType, buckets: Vec<Bucket>, now: Instant) -> GroupEntry {
        let n = buckets.len();
        GroupEntry {
            group_id,
            group_type,
            buckets,
            packet_count: 0,
            byte_count: 0,
            bucket_packets: vec![0; n],
            bucket_bytes: vec![0; n],
            installed_at: now,
        }
    }
}

/// The per-datapath group store.
///
/// The hasher state is fixed at construction so SELECT's choice is
/// deterministic for a given packet within one datapath run.
pub struct GroupTable {
    groups: ahash::AHashMap<u32, GroupEntry>,
    select_hasher: RandomState,
}

impl GroupTable {
    #[must_use]
    pub fn new() -> GroupTable {
        GroupTable {
            groups: ahash::AHashMap::new(),
            select_hasher: RandomState::with_seeds(0x6f66, 0x7374, 0x6163, 0x6b00),
        }
    }

    #[must_use]
    pub fn get(&self, group_id: u32) -> Option<&GroupEntry> {
        self.groups.get(&group_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Apply a GROUP_MOD. For DELETE, the ids of the removed groups are
    /// returned so the datapath can purge flows referencing them.
    ///
    /// # Errors
    ///
    /// The `GROUP_MOD_FAILED` taxonomy: `GROUP_EXISTS` on duplicate ADD,
    /// `UNKNOWN_GROUP` on MODIFY of an absent group, `INVALID_GROUP` on a
    /// reserved id.
    pub fn apply(&mut self, group_mod: &GroupMod, now: Instant) -> Result<Vec<u32>, ErrorKind> {
        match group_mod.command {
            GroupModCommand::Add => {
                if group_mod.group_id > GROUP_MAX {
                    return Err(ErrorKind::GroupModFailed(GroupModFailedCode::InvalidGroup));
                }
                if self.groups.contains_key(&group_mod.group_id) {
                    return Err(ErrorKind::GroupModFailed(GroupModFailedCode::GroupExists));
                }
                self.groups.insert(
                    group_mod.group_id,
                    GroupEntry::new(
                        group_mod.group_id,
                        group_mod.group_type,
                        group_mod.buckets.clone(),
                        now,
                    ),
                );
                Ok(Vec::new())
            }
            GroupModCommand::Modify => {
                let entry = self
                    .groups
                    .get_mut(&group_mod.group_id)
                    .ok_or(ErrorKind::GroupModFailed(GroupModFailedCode::UnknownGroup))?;
                *entry = GroupEntry::new(
                    group_mod.group_id,
                    group_mod.group_type,
                    group_mod.buckets.clone(),
                    now,
                );
                Ok(Vec::new())
            }
            GroupModCommand::Delete => {
                if group_mod.group_id == GROUP_ALL {
                    let ids: Vec<u32> = self.groups.keys().copied().collect();
                    self.groups.clear();
                    return Ok(ids);
                }
                // OpenFlow 1.3: deleting a nonexistent group is not an error
                debug!(group_id = group_mod.group_id, "group delete");
                Ok(self
                    .groups
                    .remove(&group_mod.group_id)
                    .map(|e| e.group_id)
                    .into_iter()
                    .collect())
            }
        }
    }

    /// Charge the group (and one bucket) for a packet.
    pub(crate) fn record_hit(&mut self, group_id: u32, bucket: Option<usize>, bytes: usize) {
        if let Some(entry) = self.groups.get_mut(&group_id) {
            entry.packet_count += 1;
            entry.byte_count += bytes as u64;
            if let Some(index) = bucket {
                if let Some(count) = entry.bucket_packets.get_mut(index) {
                    *count += 1;
                }
                if let Some(count) = entry.bucket_bytes.get_mut(index) {
                    *count += bytes as u64;
                }
            }
        }
    }

    /// SELECT bucket choice: weight-proportional, deterministic by a hash
    /// of the packet's flow-identifying fields.
    ///
    /// Returns the bucket index, or `None` when no bucket has weight.
    #[must_use]
    pub fn select_bucket(&self, entry: &GroupEntry, ctx: &PacketContext) -> Option<usize> {
        let total: u32 = entry.buckets.iter().map(|b| u32::from(b.weight)).sum();
        if total == 0 {
            return None;
        }
        let mut hasher = self.select_hasher.build_hasher();
        let mut scratch = [0u8; MAX_FIELD_WIDTH];
        // eth src/dst/type, ip proto, ip src/dst, l4 ports
        for index in [3u8, 4, 5, 10, 11, 12, 26, 27, 13, 14, 15, 16] {
            if let Some(width) = ctx.field_bits(index, &mut scratch) {
                hasher.write(&scratch[..width]);
            }
        }
        let mut point = (hasher.finish() % u64::from(total)) as u32;
        for (index, bucket) in entry.buckets.iter().enumerate() {
            let weight = u32::from(bucket.weight);
            if point < weight {
                return Some(index);
            }
            point -= weight;
        }
        None
    }

    /// GROUP multipart reply entries.
    #[must_use]
    pub fn stats(&self, filter_id: Option<u32>, now: Instant) -> Vec<GroupStats> {
        let mut entries: Vec<&GroupEntry> = self
            .groups
            .values()
            .filter(|e| filter_id.is_none_or(|id| e.group_id == id))
            .collect();
        entries.sort_by_key(|e| e.group_id);
        entries
            .into_iter()
            .map(|e| {
                let duration = now.duration_since(e.installed_at);
                GroupStats {
                    group_id: e.group_id,
                    ref_count: 0,
                    packet_count: e.packet_count,
                    byte_count: e.byte_count,
                    #[allow(clippy::cast_possible_truncation)] // stats wrap by contract
                    duration_sec: duration.as_secs() as u32,
                    duration_nsec: duration.subsec_nanos(),
                    bucket_stats: e
                        .bucket_packets
                        .iter()
                        .zip(&e.bucket_bytes)
                        .map(|(&p, &b)| (p, b))
                        .collect(),
                }
            })
            .collect()
    }

    /// GROUP_DESC multipart reply entries.
    #[must_use]
    pub fn descriptions(&self) -> Vec<GroupDescEntry> {
        let mut entries: Vec<&GroupEntry> = self.groups.values().collect();
        entries.sort_by_key(|e| e.group_id);
        entries
            .into_iter()
            .map(|e| GroupDescEntry {
                group_type: e.group_type,
                group_id: e.group_id,
                buckets: e.buckets.clone(),
            })
            .collect()
    }
}

impl Default for GroupTable {
    fn default() -> GroupTable {
        GroupTable::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::ParsedFrame;
    use pretty_assertions::assert_eq;
    use wire::actions::Action;

    fn bucket(weight: u16, port: u32) -> Bucket {
        Bucket {
            weight,
            watch_port: wire::port::port_no::ANY,
            watch_group: GROUP_ANY,
            actions: vec![Action::Output { port, max_len: 0 }],
        }
    }

    fn group_mod(command: GroupModCommand, group_id: u32, buckets: Vec<Bucket>) -> GroupMod {
        GroupMod {
            command,
            group_type: GroupType::Select,
            group_id,
            buckets,
            ..GroupMod::default()
        }
    }

    fn ctx(src_port: u16) -> PacketContext {
        let mut bytes = vec![0u8; 54];
        bytes[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        bytes[14] = 0x45;
        bytes[14 + 8] = 64;
        bytes[14 + 9] = 6; // tcp
        bytes[16..18].copy_from_slice(&40u16.to_be_bytes());
        bytes[34..36].copy_from_slice(&src_port.to_be_bytes());
        bytes[36..38].copy_from_slice(&80u16.to_be_bytes());
        bytes[46] = 0x50; // tcp data offset

        PacketContext::new(ParsedFrame::parse(bytes).unwrap(), 1)
    }

    #[test]
    fn add_modify_delete_lifecycle() {
        let now = Instant::now();
        let mut table = GroupTable::new();
        let add = group_mod(GroupModCommand::Add, 5, vec![bucket(1, 1)]);
        table.apply(&add, now).unwrap();
        assert_eq!(
            table.apply(&add, now),
            Err(ErrorKind::GroupModFailed(GroupModFailedCode::GroupExists))
        );

        let modify = group_mod(GroupModCommand::Modify, 5, vec![bucket(1, 1), bucket(1, 2)]);
        table.apply(&modify, now).unwrap();
        assert_eq!(table.get(5).unwrap().buckets.len(), 2);

        let modify_missing = group_mod(GroupModCommand::Modify, 6, vec![]);
        assert_eq!(
            table.apply(&modify_missing, now),
            Err(ErrorKind::GroupModFailed(GroupModFailedCode::UnknownGroup))
        );

        let delete = group_mod(GroupModCommand::Delete, 5, vec![]);
        assert_eq!(table.apply(&delete, now).unwrap(), vec![5]);
        assert!(table.is_empty());
    }

    #[test]
    fn reserved_group_id_is_invalid() {
        let now = Instant::now();
        let mut table = GroupTable::new();
        let add = group_mod(GroupModCommand::Add, GROUP_ALL, vec![]);
        assert_eq!(
            table.apply(&add, now),
            Err(ErrorKind::GroupModFailed(GroupModFailedCode::InvalidGroup))
        );
    }

    #[test]
    fn delete_all_returns_every_id() {
        let now = Instant::now();
        let mut table = GroupTable::new();
        for id in [1, 2, 3] {
            table
                .apply(&group_mod(GroupModCommand::Add, id, vec![]), now)
                .unwrap();
        }
        let delete_all = group_mod(GroupModCommand::Delete, GROUP_ALL, vec![]);
        let mut ids = table.apply(&delete_all, now).unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(table.is_empty());
    }

    #[test]
    fn select_is_deterministic_and_weighted() {
        let now = Instant::now();
        let mut table = GroupTable::new();
        let add = group_mod(
            GroupModCommand::Add,
            1,
            vec![bucket(3, 1), bucket(1, 2)],
        );
        table.apply(&add, now).unwrap();
        let entry = table.get(1).unwrap();

        // same packet, same bucket, every time
        let first = table.select_bucket(entry, &ctx(1000));
        for _ in 0..8 {
            assert_eq!(table.select_bucket(entry, &ctx(1000)), first);
        }

        // across many flows both buckets are used
        let mut seen = [0u32; 2];
        for port in 0..256 {
            let index = table.select_bucket(entry, &ctx(port)).unwrap();
            seen[index] += 1;
        }
        assert!(seen[0] > 0 && seen[1] > 0);
        // weight 3:1 should skew clearly toward bucket 0
        assert!(seen[0] > seen[1]);
    }

    #[test]
    fn zero_weight_select_has_no_bucket() {
        let now = Instant::now();
        let mut table = GroupTable::new();
        table
            .apply(&group_mod(GroupModCommand::Add, 1, vec![bucket(0, 1)]), now)
            .unwrap();
        let entry = table.get(1).unwrap();
        assert_eq!(table.select_bucket(entry, &ctx(1)), None);
    }

    #[test]
    fn hit_recording_feeds_stats() {
        let now = Instant::now();
        let mut table = GroupTable::new();
        table
            .apply(
                &group_mod(GroupModCommand::Add, 9, vec![bucket(1, 1), bucket(1, 2)]),
                now,
            )
            .unwrap();
        table.record_hit(9, Some(1), 100);
        table.record_hit(9, Some(1), 50);
        let stats = table.stats(Some(9), now);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].packet_count, 2);
        assert_eq!(stats[0].byte_count, 150);
        assert_eq!(stats[0].bucket_stats, vec![(0, 0), (2, 150)]);
    }
}
