// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ordered flow-entry stores.
//!
//! Entries are kept sorted by `(priority DESC, insertion ASC)`; lookup is
//! first-match in that order, so ties resolve to the older entry. Exact
//! identity for ADD/strict operations is `(priority, match)` under strict
//! comparison; loose operations use the loose comparison plus the
//! `out_port`/`out_group` action filters.

use crate::frame::PacketContext;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use wire::actions::Action;
use wire::error::{ErrorKind, FlowModFailedCode};
use wire::instructions::Instruction;
use wire::messages::{FlowMod, FlowModFlags, FlowRemovedReason, FlowStatsEntry};
use wire::oxm::Match;
use wire::port::port_no;

/// `OFPG_ANY`: the group wildcard of flow-mod/flow-stats filters.
pub const GROUP_ANY: u32 = 0xffff_ffff;

/// One row of a flow table.
#[derive(Debug, Clone)]
pub struct FlowEntry {
    pub priority: u16,
    pub matches: Match,
    pub instructions: Vec<Instruction>,
    pub cookie: u64,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub flags: FlowModFlags,
    seq: u64,
    inserted_at: Instant,
    last_hit: Instant,
    packet_count: u64,
    byte_count: u64,
}

impl FlowEntry {
    fn from_mod(flow_mod: &FlowMod, seq: u64, now: Instant) -> FlowEntry {
        FlowEntry {
            priority: flow_mod.priority,
            matches: flow_mod.matches.clone(),
            instructions: flow_mod.instructions.clone(),
            cookie: flow_mod.cookie,
            idle_timeout: flow_mod.idle_timeout,
            hard_timeout: flow_mod.hard_timeout,
            flags: flow_mod.flags,
            seq,
            inserted_at: now,
            last_hit: now,
            packet_count: 0,
            byte_count: 0,
        }
    }

    /// Packets that hit this entry.
    #[must_use]
    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    /// Octets of packets that hit this entry.
    #[must_use]
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Time since installation.
    #[must_use]
    pub fn duration(&self, now: Instant) -> Duration {
        now.duration_since(self.inserted_at)
    }

    fn record_hit(&mut self, bytes: usize, now: Instant) {
        self.packet_count += 1;
        self.byte_count += bytes as u64;
        self.last_hit = now;
    }

    /// Does the entry's action surface mention `out_port` / `out_group`?
    /// Both filters wildcard with `ANY`.
    fn passes_output_filter(&self, out_port: u32, out_group: u32) -> bool {
        if out_port == port_no::ANY && out_group == GROUP_ANY {
            return true;
        }
        let mut port_seen = false;
        let mut group_seen = false;
        for instruction in &self.instructions {
            let (Instruction::WriteActions(actions) | Instruction::ApplyActions(actions)) =
                instruction
            else {
                continue;
            };
            for action in actions {
                match action {
                    Action::Output { port, .. } if *port == out_port => port_seen = true,
                    Action::Group(id) if *id == out_group => group_seen = true,
                    _ => {}
                }
            }
        }
        (out_port == port_no::ANY || port_seen) && (out_group == GROUP_ANY || group_seen)
    }

    fn cookie_matches(&self, cookie: u64, cookie_mask: u64) -> bool {
        cookie_mask == 0 || (self.cookie & cookie_mask) == (cookie & cookie_mask)
    }
}

/// An entry evicted by a timeout, with the reason to report.
#[derive(Debug)]
pub struct Evicted {
    pub entry: FlowEntry,
    pub reason: FlowRemovedReason,
}

/// One flow table: an ordered list of entries plus table counters.
#[derive(Debug)]
pub struct FlowTable {
    table_id: u8,
    entries: Vec<FlowEntry>,
    max_entries: usize,
    next_seq: u64,
    lookup_count: u64,
    matched_count: u64,
}

impl FlowTable {
    #[must_use]
    pub fn new(table_id: u8, max_entries: usize) -> FlowTable {
        FlowTable {
            table_id,
            entries: Vec::new(),
            max_entries,
            next_seq: 0,
            lookup_count: 0,
            matched_count: 0,
        }
    }

    #[must_use]
    pub fn table_id(&self) -> u8 {
        self.table_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn lookup_count(&self) -> u64 {
        self.lookup_count
    }

    #[must_use]
    pub fn matched_count(&self) -> u64 {
        self.matched_count
    }

    /// Iterate entries in lookup order.
    pub fn entries(&self) -> impl Iterator<Item = &FlowEntry> {
        self.entries.iter()
    }

    /// Install an entry per the ADD command.
    ///
    /// An existing entry with the same `(priority, match)` is overwritten
    /// (counters reset) unless `CHECK_OVERLAP` demands the `OVERLAP`
    /// error.
    ///
    /// # Errors
    ///
    /// `FLOW_MOD_FAILED/OVERLAP` under `CHECK_OVERLAP`, and
    /// `FLOW_MOD_FAILED/TABLE_FULL` when the table is at capacity.
    pub fn add(&mut self, flow_mod: &FlowMod, now: Instant) -> Result<(), ErrorKind> {
        let existing = self
            .entries
            .iter()
            .position(|e| e.priority == flow_mod.priority && e.matches.compare_strict(&flow_mod.matches));
        if let Some(at) = existing {
            if flow_mod.flags.contains(FlowModFlags::CHECK_OVERLAP) {
                return Err(ErrorKind::FlowModFailed(FlowModFailedCode::Overlap));
            }
            let seq = self.entries[at].seq;
            let mut replacement = FlowEntry::from_mod(flow_mod, seq, now);
            if !flow_mod.flags.contains(FlowModFlags::RESET_COUNTS) {
                replacement.packet_count = self.entries[at].packet_count;
                replacement.byte_count = self.entries[at].byte_count;
            }
            self.entries[at] = replacement;
            return Ok(());
        }
        if self.entries.len() >= self.max_entries {
            debug!(table_id = self.table_id, "table full");
            return Err(ErrorKind::FlowModFailed(FlowModFailedCode::TableFull));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = FlowEntry::from_mod(flow_mod, seq, now);
        let at = self
            .entries
            .partition_point(|e| e.priority > entry.priority);
        // same-priority entries keep insertion order: new ones go last
        let at = self.entries[at..]
            .iter()
            .take_while(|e| e.priority == entry.priority)
            .count()
            + at;
        self.entries.insert(at, entry);
        Ok(())
    }

    /// MODIFY / MODIFY_STRICT: update instructions (and cookie) of every
    /// selected entry, preserving counters unless `RESET_COUNTS`.
    pub fn modify(&mut self, flow_mod: &FlowMod, strict: bool) -> usize {
        let mut touched = 0;
        for entry in &mut self.entries {
            if !selected(entry, flow_mod, strict) {
                continue;
            }
            entry.instructions = flow_mod.instructions.clone();
            entry.cookie = flow_mod.cookie;
            if flow_mod.flags.contains(FlowModFlags::RESET_COUNTS) {
                entry.packet_count = 0;
                entry.byte_count = 0;
            }
            touched += 1;
        }
        trace!(table_id = self.table_id, touched, "modify");
        touched
    }

    /// DELETE / DELETE_STRICT: remove every selected entry. Removed
    /// entries flagged `SEND_FLOW_REM` are returned for `flow_removed`
    /// emission.
    pub fn delete(&mut self, flow_mod: &FlowMod, strict: bool) -> Vec<Evicted> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if selected(&entry, flow_mod, strict) {
                if entry.flags.contains(FlowModFlags::SEND_FLOW_REM) {
                    removed.push(Evicted {
                        entry,
                        reason: FlowRemovedReason::Delete,
                    });
                }
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        removed
    }

    /// Remove entries whose action surface references `group_id`; used
    /// when a group is deleted.
    pub fn delete_referencing_group(&mut self, group_id: u32) -> Vec<Evicted> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.passes_output_filter(port_no::ANY, group_id) {
                if entry.flags.contains(FlowModFlags::SEND_FLOW_REM) {
                    removed.push(Evicted {
                        entry,
                        reason: FlowRemovedReason::GroupDelete,
                    });
                }
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        removed
    }

    /// Find the highest-priority entry matching the packet and charge its
    /// counters.
    pub fn lookup(&mut self, ctx: &PacketContext, now: Instant) -> Option<&FlowEntry> {
        self.lookup_count += 1;
        let bytes = ctx.frame.len();
        let hit = self.entries.iter_mut().find(|e| ctx.matches(&e.matches))?;
        hit.record_hit(bytes, now);
        self.matched_count += 1;
        Some(hit)
    }

    /// Evict entries whose idle or hard timeout has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<Evicted> {
        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            let hard = entry.hard_timeout > 0
                && now.duration_since(entry.inserted_at)
                    >= Duration::from_secs(u64::from(entry.hard_timeout));
            let idle = entry.idle_timeout > 0
                && now.duration_since(entry.last_hit)
                    >= Duration::from_secs(u64::from(entry.idle_timeout));
            if hard || idle {
                let reason = if hard {
                    FlowRemovedReason::HardTimeout
                } else {
                    FlowRemovedReason::IdleTimeout
                };
                debug!(table_id = self.table_id, ?reason, "flow expired");
                evicted.push(Evicted { entry, reason });
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        evicted
    }

    /// Flow-stats entries for the FLOW multipart reply, after filtering.
    #[must_use]
    pub fn stats(
        &self,
        filter: &wire::messages::FlowStatsRequest,
        now: Instant,
    ) -> Vec<FlowStatsEntry> {
        self.entries
            .iter()
            .filter(|e| {
                filter.matches.compare_loose(&e.matches)
                    && e.passes_output_filter(filter.out_port, filter.out_group)
                    && e.cookie_matches(filter.cookie, filter.cookie_mask)
            })
            .map(|e| {
                let duration = e.duration(now);
                FlowStatsEntry {
                    table_id: self.table_id,
                    #[allow(clippy::cast_possible_truncation)] // stats wrap by contract
                    duration_sec: duration.as_secs() as u32,
                    duration_nsec: duration.subsec_nanos(),
                    priority: e.priority,
                    idle_timeout: e.idle_timeout,
                    hard_timeout: e.hard_timeout,
                    flags: e.flags,
                    cookie: e.cookie,
                    packet_count: e.packet_count,
                    byte_count: e.byte_count,
                    matches: e.matches.clone(),
                    instructions: e.instructions.clone(),
                }
            })
            .collect()
    }
}

/// Is `entry` selected by a loose or strict MODIFY/DELETE?
fn selected(entry: &FlowEntry, flow_mod: &FlowMod, strict: bool) -> bool {
    let matched = if strict {
        entry.priority == flow_mod.priority && flow_mod.matches.compare_strict(&entry.matches)
    } else {
        flow_mod.matches.compare_loose(&entry.matches)
    };
    matched
        && entry.cookie_matches(flow_mod.cookie, flow_mod.cookie_mask)
        && entry.passes_output_filter(flow_mod.out_port, flow_mod.out_group)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::ParsedFrame;
    use pretty_assertions::assert_eq;
    use wire::oxm::MatchField;

    fn eth_frame(eth_type: u16) -> PacketContext {
        let mut bytes = vec![0u8; 14];
        bytes[12..14].copy_from_slice(&eth_type.to_be_bytes());
        bytes.resize(64, 0);
        PacketContext::new(ParsedFrame::parse(bytes).unwrap(), 1)
    }

    fn flow(priority: u16, eth_type: Option<u16>) -> FlowMod {
        let mut matches = Match::new();
        if let Some(t) = eth_type {
            matches.append(MatchField::EthType(t)).unwrap();
        }
        FlowMod {
            priority,
            matches,
            instructions: vec![Instruction::ApplyActions(vec![Action::Output {
                port: 2,
                max_len: 0,
            }])],
            ..FlowMod::default()
        }
    }

    #[test]
    fn lookup_prefers_higher_priority() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 16);
        table.add(&flow(10, Some(0x0800)), now).unwrap();
        table.add(&flow(200, Some(0x0800)), now).unwrap();
        table.add(&flow(100, None), now).unwrap();

        let ctx = eth_frame(0x0800);
        let hit = table.lookup(&ctx, now).unwrap();
        assert_eq!(hit.priority, 200);
        assert_eq!(hit.packet_count(), 1);
        assert_eq!(table.matched_count(), 1);
    }

    #[test]
    fn priority_ties_resolve_by_insertion_order() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 16);
        let mut first = flow(50, Some(0x0800));
        first.cookie = 1;
        let mut second = flow(50, None);
        second.cookie = 2;
        table.add(&first, now).unwrap();
        table.add(&second, now).unwrap();

        let ctx = eth_frame(0x0800);
        let hit = table.lookup(&ctx, now).unwrap();
        assert_eq!(hit.cookie, 1);
    }

    #[test]
    fn add_overwrites_identical_entry() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 16);
        table.add(&flow(10, Some(0x0800)), now).unwrap();
        let mut replacement = flow(10, Some(0x0800));
        replacement.cookie = 77;
        table.add(&replacement, now).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries().next().unwrap().cookie, 77);
    }

    #[test]
    fn check_overlap_rejects_identical_entry() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 16);
        table.add(&flow(10, Some(0x0800)), now).unwrap();
        let mut dup = flow(10, Some(0x0800));
        dup.flags = FlowModFlags::CHECK_OVERLAP;
        assert_eq!(
            table.add(&dup, now),
            Err(ErrorKind::FlowModFailed(FlowModFailedCode::Overlap))
        );
    }

    #[test]
    fn table_full_is_reported() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 2);
        table.add(&flow(1, Some(0x0800)), now).unwrap();
        table.add(&flow(2, Some(0x0806)), now).unwrap();
        assert_eq!(
            table.add(&flow(3, Some(0x86dd)), now),
            Err(ErrorKind::FlowModFailed(FlowModFailedCode::TableFull))
        );
    }

    #[test]
    fn strict_delete_requires_priority_and_match() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 16);
        let mut target = flow(10, Some(0x0800));
        target.flags = FlowModFlags::SEND_FLOW_REM;
        table.add(&target, now).unwrap();
        table.add(&flow(20, Some(0x0800)), now).unwrap();

        let mut wrong_priority = flow(11, Some(0x0800));
        wrong_priority.command = wire::messages::FlowModCommand::DeleteStrict;
        assert!(table.delete(&wrong_priority, true).is_empty());
        assert_eq!(table.len(), 2);

        let removed = table.delete(&flow(10, Some(0x0800)), true);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].reason, FlowRemovedReason::Delete);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn loose_delete_sweeps_subsumed_entries() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 16);
        table.add(&flow(10, Some(0x0800)), now).unwrap();
        table.add(&flow(20, Some(0x0806)), now).unwrap();

        // empty match deletes everything, but only SEND_FLOW_REM entries
        // come back
        let all = flow(0, None);
        let removed = table.delete(&all, false);
        assert!(removed.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn delete_honors_out_port_filter() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 16);
        table.add(&flow(10, Some(0x0800)), now).unwrap(); // outputs to 2
        let mut other = flow(20, Some(0x0806));
        other.instructions = vec![Instruction::ApplyActions(vec![Action::Output {
            port: 9,
            max_len: 0,
        }])];
        table.add(&other, now).unwrap();

        let mut filter = flow(0, None);
        filter.out_port = 9;
        table.delete(&filter, false);
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries().next().unwrap().priority, 10);
    }

    #[test]
    fn idle_and_hard_timeouts_evict() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 16);
        let mut idle = flow(1, Some(0x0800));
        idle.idle_timeout = 1;
        idle.flags = FlowModFlags::SEND_FLOW_REM;
        let mut hard = flow(2, Some(0x0806));
        hard.hard_timeout = 3;
        hard.flags = FlowModFlags::SEND_FLOW_REM;
        table.add(&idle, now).unwrap();
        table.add(&hard, now).unwrap();

        let evicted = table.expire(now + Duration::from_secs(2));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].reason, FlowRemovedReason::IdleTimeout);

        let evicted = table.expire(now + Duration::from_secs(4));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].reason, FlowRemovedReason::HardTimeout);
        assert!(table.is_empty());
    }

    #[test]
    fn hits_refresh_the_idle_clock() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 16);
        let mut entry = flow(1, Some(0x0800));
        entry.idle_timeout = 2;
        table.add(&entry, now).unwrap();

        let ctx = eth_frame(0x0800);
        table.lookup(&ctx, now + Duration::from_secs(1));
        // idle clock restarted at t=1s; not yet expired at t=2.5s
        assert!(table.expire(now + Duration::from_millis(2500)).is_empty());
        assert_eq!(table.expire(now + Duration::from_secs(4)).len(), 1);
    }

    #[test]
    fn counters_are_non_decreasing() {
        let now = Instant::now();
        let mut table = FlowTable::new(0, 16);
        table.add(&flow(1, None), now).unwrap();
        let ctx = eth_frame(0x0800);
        let mut last = 0;
        for i in 1..=5 {
            let hit = table.lookup(&ctx, now).unwrap();
            assert_eq!(hit.packet_count(), i);
            assert!(hit.byte_count() >= last);
            last = hit.byte_count();
        }
    }
}
