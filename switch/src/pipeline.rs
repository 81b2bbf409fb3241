// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The OpenFlow pipeline: table walk, instruction-set evaluation, the
//! deferred action set, and the action executor.
//!
//! A frame enters at table 0; each matching entry's instructions are
//! evaluated in the canonical order (apply-actions, clear-actions,
//! write-actions, write-metadata, meter, goto-table). Without a
//! goto-table the accumulated action set executes, reordered per the
//! OpenFlow 1.3 action-set ordering. The pipeline itself produces no I/O:
//! it returns [`Effect`]s that the datapath resolves against real ports.

use crate::flow_table::FlowTable;
use crate::frame::PacketContext;
use crate::group_table::GroupTable;
use std::time::Instant;
use tracing::{debug, trace};
use wire::actions::Action;
use wire::error::{BadActionCode, ErrorKind};
use wire::instructions::Instruction;
use wire::messages::{GroupType, PacketInReason};
use wire::port::port_no;

/// Bound on nested group invocations.
pub const GROUP_RECURSION_LIMIT: usize = 16;

/// What the pipeline asks the datapath to do with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Transmit `frame` out of `port` (possibly a reserved port number
    /// such as FLOOD or ALL, resolved by the datapath).
    Output { port: u32, frame: Vec<u8> },
    /// Send a `packet_in` to the controller.
    PacketIn(PacketInEffect),
}

/// The ingredients of one `packet_in`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketInEffect {
    pub reason: PacketInReason,
    /// Truncation bound: `miss_send_len` for misses, the output action's
    /// `max_len` for `output(CONTROLLER)`.
    pub max_len: u16,
    pub table_id: u8,
    pub cookie: u64,
    pub in_port: u32,
    pub in_phy_port: u32,
    pub metadata: u64,
    pub tunnel_id: u64,
    pub frame: Vec<u8>,
}

/// Execution failure surfaced to the peer as an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("group recursion limit exceeded")]
    GroupRecursion,
    #[error("reference to unknown group {0}")]
    UnknownGroup(u32),
}

impl ExecError {
    #[must_use]
    pub fn to_error_kind(self) -> ErrorKind {
        ErrorKind::BadAction(BadActionCode::BadOutGroup)
    }
}

// canonical action-set execution order, one slot per action kind
fn action_slot(action: &Action) -> u16 {
    use Action::*;
    match action {
        CopyTtlIn => 0,
        PopVlan => 100,
        PopMpls(_) => 101,
        PopPbb => 102,
        PushMpls(_) => 200,
        PushPbb(_) => 201,
        PushVlan(_) => 202,
        CopyTtlOut => 300,
        DecMplsTtl => 400,
        DecNwTtl => 401,
        SetMplsTtl(_) => 500,
        SetNwTtl(_) => 501,
        SetField(field) => 600 + u16::from(field.field_index().unwrap_or(63)),
        SetQueue(_) => 700,
        Group(_) => 800,
        Output { .. } => 900,
        Experimenter(_) => 999,
    }
}

/// The deferred action set a packet accumulates across tables.
///
/// One action per slot (set-field slots are per field); write-actions
/// replaces same-slot actions, clear-actions empties the set.
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    entries: Vec<(u16, Action)>,
}

impl ActionSet {
    fn clear(&mut self) {
        self.entries.clear();
    }

    fn write(&mut self, actions: &[Action]) {
        for action in actions {
            let slot = action_slot(action);
            match self.entries.iter_mut().find(|(s, _)| *s == slot) {
                Some((_, existing)) => *existing = action.clone(),
                None => self.entries.push((slot, action.clone())),
            }
        }
    }

    /// The actions in canonical execution order. A group action
    /// supersedes an output action.
    fn into_ordered(mut self) -> Vec<Action> {
        let has_group = self
            .entries
            .iter()
            .any(|(_, a)| matches!(a, Action::Group(_)));
        if has_group {
            self.entries
                .retain(|(_, a)| !matches!(a, Action::Output { .. }));
        }
        self.entries.sort_by_key(|(slot, _)| *slot);
        self.entries.into_iter().map(|(_, action)| action).collect()
    }
}

/// Executes action lists against a packet, accumulating effects.
pub struct ActionExecutor<'a> {
    groups: &'a mut GroupTable,
    live_ports: &'a ahash::AHashSet<u32>,
    effects: Vec<Effect>,
    table_id: u8,
    cookie: u64,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(
        groups: &'a mut GroupTable,
        live_ports: &'a ahash::AHashSet<u32>,
    ) -> ActionExecutor<'a> {
        ActionExecutor {
            groups,
            live_ports,
            effects: Vec::new(),
            table_id: 0,
            cookie: u64::MAX,
        }
    }

    /// Provenance recorded in packet-in effects.
    pub fn set_provenance(&mut self, table_id: u8, cookie: u64) {
        self.table_id = table_id;
        self.cookie = cookie;
    }

    /// The accumulated effects, consuming the executor.
    #[must_use]
    pub fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}

impl ActionExecutor<'_> {
    /// Apply an action list in order, per OpenFlow 1.3 §5.12.
    ///
    /// # Errors
    ///
    /// Group recursion beyond [`GROUP_RECURSION_LIMIT`] and references to
    /// unknown groups.
    pub fn apply_list(
        &mut self,
        actions: &[Action],
        ctx: &mut PacketContext,
    ) -> Result<(), ExecError> {
        self.apply_list_at(actions, ctx, 0)
    }

    fn apply_list_at(
        &mut self,
        actions: &[Action],
        ctx: &mut PacketContext,
        depth: usize,
    ) -> Result<(), ExecError> {
        use Action::*;
        for action in actions {
            trace!(?action, "apply");
            match action {
                Output { port, max_len } => self.output(*port, *max_len, ctx),
                CopyTtlOut => ctx.frame.copy_ttl_out(),
                CopyTtlIn => ctx.frame.copy_ttl_in(),
                SetMplsTtl(ttl) => ctx.frame.set_mpls_ttl(*ttl),
                DecMplsTtl => ctx.frame.dec_mpls_ttl(),
                PushVlan(ethertype) => ctx.frame.push_vlan(*ethertype),
                PopVlan => ctx.frame.pop_vlan(),
                PushMpls(ethertype) => ctx.frame.push_mpls(*ethertype),
                PopMpls(ethertype) => ctx.frame.pop_mpls(*ethertype),
                SetQueue(id) => trace!(queue = id, "queues are not modeled"),
                Group(id) => self.apply_group(*id, ctx, depth)?,
                SetNwTtl(ttl) => ctx.frame.set_nw_ttl(*ttl),
                DecNwTtl => ctx.frame.dec_nw_ttl(),
                SetField(field) => ctx.apply_set_field(field),
                PushPbb(ethertype) => ctx.frame.push_pbb(*ethertype),
                PopPbb => ctx.frame.pop_pbb(),
                Experimenter(id) => trace!(experimenter = id, "ignoring experimenter action"),
            }
        }
        Ok(())
    }

    fn output(&mut self, port: u32, max_len: u16, ctx: &PacketContext) {
        if port == port_no::CONTROLLER {
            self.effects.push(Effect::PacketIn(PacketInEffect {
                reason: PacketInReason::Action,
                max_len,
                table_id: self.table_id,
                cookie: self.cookie,
                in_port: ctx.in_port,
                in_phy_port: ctx.in_phy_port,
                metadata: ctx.metadata,
                tunnel_id: ctx.tunnel_id,
                frame: ctx.frame.bytes().to_vec(),
            }));
        } else {
            self.effects.push(Effect::Output {
                port,
                frame: ctx.frame.bytes().to_vec(),
            });
        }
    }

    fn apply_group(
        &mut self,
        group_id: u32,
        ctx: &mut PacketContext,
        depth: usize,
    ) -> Result<(), ExecError> {
        if depth >= GROUP_RECURSION_LIMIT {
            debug!(group_id, "group recursion limit");
            return Err(ExecError::GroupRecursion);
        }
        let Some(entry) = self.groups.get(group_id) else {
            return Err(ExecError::UnknownGroup(group_id));
        };
        let group_type = entry.group_type;
        let buckets = entry.buckets.clone();
        let bytes = ctx.frame.len();

        match group_type {
            GroupType::All => {
                for (index, bucket) in buckets.iter().enumerate() {
                    // every bucket runs on its own clone of the packet
                    let mut clone = ctx.clone();
                    self.apply_list_at(&bucket.actions, &mut clone, depth + 1)?;
                    self.groups.record_hit(group_id, Some(index), bytes);
                }
            }
            GroupType::Select => {
                let entry = self
                    .groups
                    .get(group_id)
                    .ok_or(ExecError::UnknownGroup(group_id))?;
                if let Some(index) = self.groups.select_bucket(entry, ctx) {
                    self.apply_list_at(&buckets[index].actions, ctx, depth + 1)?;
                    self.groups.record_hit(group_id, Some(index), bytes);
                }
            }
            GroupType::Indirect => {
                if let Some(bucket) = buckets.first() {
                    self.apply_list_at(&bucket.actions, ctx, depth + 1)?;
                    self.groups.record_hit(group_id, Some(0), bytes);
                }
            }
            GroupType::FastFailover => {
                let live = buckets.iter().enumerate().find(|(_, b)| {
                    let port_live = b.watch_port == port_no::ANY
                        || self.live_ports.contains(&b.watch_port);
                    let group_live = b.watch_group == crate::group_table::GROUP_ANY
                        || self.groups.get(b.watch_group).is_some();
                    port_live && group_live
                });
                if let Some((index, bucket)) = live {
                    self.apply_list_at(&bucket.actions, ctx, depth + 1)?;
                    self.groups.record_hit(group_id, Some(index), bytes);
                } else {
                    trace!(group_id, "no live bucket");
                }
            }
        }
        Ok(())
    }
}

/// Run one frame through the tables.
///
/// Returns the effects to resolve. Misses produce a `packet_in` effect
/// with `reason=NO_MATCH` bounded by `miss_send_len`.
///
/// # Errors
///
/// Propagates action-execution failures; the caller reports them to the
/// controller and drops the frame.
pub fn run(
    tables: &mut [FlowTable],
    groups: &mut GroupTable,
    live_ports: &ahash::AHashSet<u32>,
    mut ctx: PacketContext,
    miss_send_len: u16,
    now: Instant,
) -> Result<Vec<Effect>, ExecError> {
    let mut executor = ActionExecutor::new(groups, live_ports);
    let mut action_set = ActionSet::default();
    let mut table_id = 0usize;

    loop {
        let Some(table) = tables.get_mut(table_id) else {
            debug!(table_id, "goto past the last table");
            break;
        };
        let Some(entry) = table.lookup(&ctx, now) else {
            trace!(table_id, "table miss");
            executor.effects.push(Effect::PacketIn(PacketInEffect {
                reason: PacketInReason::NoMatch,
                max_len: miss_send_len,
                #[allow(clippy::cast_possible_truncation)] // bounded by n_tables <= 64
                table_id: table_id as u8,
                cookie: u64::MAX,
                in_port: ctx.in_port,
                in_phy_port: ctx.in_phy_port,
                metadata: ctx.metadata,
                tunnel_id: ctx.tunnel_id,
                frame: ctx.frame.bytes().to_vec(),
            }));
            break;
        };
        let cookie = entry.cookie;
        let instructions = entry.instructions.clone();
        #[allow(clippy::cast_possible_truncation)] // bounded by n_tables <= 64
        executor.set_provenance(table_id as u8, cookie);

        let mut apply = None;
        let mut clear = false;
        let mut write = None;
        let mut metadata = None;
        let mut goto = None;
        for instruction in &instructions {
            match instruction {
                Instruction::ApplyActions(actions) => apply = Some(actions),
                Instruction::ClearActions => clear = true,
                Instruction::WriteActions(actions) => write = Some(actions),
                Instruction::WriteMetadata { value, mask } => metadata = Some((*value, *mask)),
                Instruction::Meter(id) => trace!(meter = id, "meters are not modeled"),
                Instruction::GotoTable(next) => goto = Some(*next),
                Instruction::Experimenter(id) => {
                    trace!(experimenter = id, "ignoring experimenter instruction");
                }
            }
        }

        if let Some(actions) = apply {
            executor.apply_list(actions, &mut ctx)?;
        }
        if clear {
            action_set.clear();
        }
        if let Some(actions) = write {
            action_set.write(actions);
        }
        if let Some((value, mask)) = metadata {
            ctx.metadata = (ctx.metadata & !mask) | (value & mask);
        }
        match goto {
            Some(next) if usize::from(next) > table_id => {
                table_id = usize::from(next);
            }
            Some(next) => {
                // goto must move strictly forward; installed entries are
                // validated, so this only happens on corrupted state
                debug!(from = table_id, to = next, "non-monotonic goto ignored");
                executor.apply_list(&action_set.into_ordered(), &mut ctx)?;
                break;
            }
            None => {
                executor.apply_list(&action_set.into_ordered(), &mut ctx)?;
                break;
            }
        }
    }
    Ok(executor.into_effects())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::ParsedFrame;
    use pretty_assertions::assert_eq;
    use wire::messages::{Bucket, FlowMod, GroupMod, GroupModCommand};
    use wire::oxm::{Match, MatchField};
    use wire::port::CONTROLLER_MAX_LEN_NO_BUFFER;

    fn ipv4_ctx(in_port: u32) -> PacketContext {
        let mut bytes = vec![0u8; 64];
        bytes[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        bytes[14] = 0x45;
        bytes[16..18].copy_from_slice(&50u16.to_be_bytes());
        bytes[14 + 8] = 64;
        bytes[14 + 9] = 17; // udp
        let udp_len = (64 - 34) as u16;
        bytes[34..36].copy_from_slice(&5353u16.to_be_bytes());
        bytes[36..38].copy_from_slice(&53u16.to_be_bytes());
        bytes[38..40].copy_from_slice(&udp_len.to_be_bytes());
        PacketContext::new(ParsedFrame::parse(bytes).unwrap(), in_port)
    }

    fn install(tables: &mut [FlowTable], table_id: usize, flow_mod: &FlowMod) {
        tables[table_id].add(flow_mod, Instant::now()).unwrap();
    }

    fn flow(priority: u16, matches: Match, instructions: Vec<Instruction>) -> FlowMod {
        FlowMod {
            priority,
            matches,
            instructions,
            ..FlowMod::default()
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn new_tables(n: usize) -> Vec<FlowTable> {
        (0..n).map(|id| FlowTable::new(id as u8, 64)).collect()
    }

    #[test]
    fn hit_applies_output_and_counts() {
        let mut tables = new_tables(1);
        let mut matches = Match::new();
        matches.append(MatchField::InPort(1)).unwrap();
        matches.append(MatchField::EthType(0x0800)).unwrap();
        install(
            &mut tables,
            0,
            &flow(
                100,
                matches,
                vec![Instruction::ApplyActions(vec![Action::Output {
                    port: 2,
                    max_len: CONTROLLER_MAX_LEN_NO_BUFFER,
                }])],
            ),
        );

        let mut groups = GroupTable::new();
        let live = ahash::AHashSet::new();
        let effects = run(
            &mut tables,
            &mut groups,
            &live,
            ipv4_ctx(1),
            128,
            Instant::now(),
        )
        .unwrap();

        assert_eq!(effects.len(), 1);
        let Effect::Output { port, frame } = &effects[0] else {
            panic!("expected an output effect");
        };
        assert_eq!(*port, 2);
        assert_eq!(frame.len(), 64);
        assert_eq!(tables[0].entries().next().unwrap().packet_count(), 1);
    }

    #[test]
    fn miss_produces_packet_in() {
        let mut tables = new_tables(1);
        let mut groups = GroupTable::new();
        let live = ahash::AHashSet::new();
        let effects = run(
            &mut tables,
            &mut groups,
            &live,
            ipv4_ctx(7),
            128,
            Instant::now(),
        )
        .unwrap();

        assert_eq!(effects.len(), 1);
        let Effect::PacketIn(packet_in) = &effects[0] else {
            panic!("expected a packet-in effect");
        };
        assert_eq!(packet_in.reason, PacketInReason::NoMatch);
        assert_eq!(packet_in.max_len, 128);
        assert_eq!(packet_in.in_port, 7);
    }

    #[test]
    fn goto_chains_tables_and_write_actions_accumulate() {
        let mut tables = new_tables(3);
        // table 0: write output(9), goto 2
        install(
            &mut tables,
            0,
            &flow(
                1,
                Match::new(),
                vec![
                    Instruction::WriteActions(vec![Action::Output {
                        port: 9,
                        max_len: 0,
                    }]),
                    Instruction::GotoTable(2),
                ],
            ),
        );
        // table 2: write metadata and replace output with port 5
        install(
            &mut tables,
            2,
            &flow(
                1,
                Match::new(),
                vec![
                    Instruction::WriteMetadata {
                        value: 0xff,
                        mask: 0xff,
                    },
                    Instruction::WriteActions(vec![Action::Output {
                        port: 5,
                        max_len: 0,
                    }]),
                ],
            ),
        );

        let mut groups = GroupTable::new();
        let live = ahash::AHashSet::new();
        let effects = run(
            &mut tables,
            &mut groups,
            &live,
            ipv4_ctx(1),
            128,
            Instant::now(),
        )
        .unwrap();

        // single output: the later write replaced the slot
        assert_eq!(
            effects,
            vec![Effect::Output {
                port: 5,
                frame: ipv4_ctx(1).frame.bytes().to_vec(),
            }]
        );
        // table 1 was skipped
        assert_eq!(tables[1].lookup_count(), 0);
    }

    #[test]
    fn apply_actions_mutate_before_action_set_runs() {
        let mut tables = new_tables(1);
        install(
            &mut tables,
            0,
            &flow(
                1,
                Match::new(),
                vec![
                    Instruction::ApplyActions(vec![Action::SetField(MatchField::UdpDst(9999))]),
                    Instruction::WriteActions(vec![Action::Output {
                        port: 3,
                        max_len: 0,
                    }]),
                ],
            ),
        );

        let mut groups = GroupTable::new();
        let live = ahash::AHashSet::new();
        let effects = run(
            &mut tables,
            &mut groups,
            &live,
            ipv4_ctx(1),
            128,
            Instant::now(),
        )
        .unwrap();

        let Effect::Output { frame, .. } = &effects[0] else {
            panic!("expected output");
        };
        assert_eq!(u16::from_be_bytes([frame[36], frame[37]]), 9999);
    }

    #[test]
    fn all_group_clones_per_bucket() {
        let mut groups = GroupTable::new();
        groups
            .apply(
                &GroupMod {
                    command: GroupModCommand::Add,
                    group_type: GroupType::All,
                    group_id: 1,
                    buckets: vec![
                        Bucket {
                            actions: vec![
                                Action::SetField(MatchField::UdpDst(1111)),
                                Action::Output {
                                    port: 1,
                                    max_len: 0,
                                },
                            ],
                            ..Bucket::default()
                        },
                        Bucket {
                            actions: vec![Action::Output {
                                port: 2,
                                max_len: 0,
                            }],
                            ..Bucket::default()
                        },
                    ],
                    ..GroupMod::default()
                },
                Instant::now(),
            )
            .unwrap();

        let mut tables = new_tables(1);
        install(
            &mut tables,
            0,
            &flow(
                1,
                Match::new(),
                vec![Instruction::ApplyActions(vec![Action::Group(1)])],
            ),
        );

        let live = ahash::AHashSet::new();
        let effects = run(
            &mut tables,
            &mut groups,
            &live,
            ipv4_ctx(1),
            128,
            Instant::now(),
        )
        .unwrap();

        assert_eq!(effects.len(), 2);
        let Effect::Output { port: p1, frame: f1 } = &effects[0] else {
            panic!("expected output");
        };
        let Effect::Output { port: p2, frame: f2 } = &effects[1] else {
            panic!("expected output");
        };
        assert_eq!((*p1, *p2), (1, 2));
        // first bucket saw the rewrite, second bucket got a clean clone
        assert_eq!(u16::from_be_bytes([f1[36], f1[37]]), 1111);
        assert_eq!(u16::from_be_bytes([f2[36], f2[37]]), 53);
    }

    #[test]
    fn group_recursion_is_bounded() {
        let mut groups = GroupTable::new();
        // group 1 invokes itself through an INDIRECT bucket
        groups
            .apply(
                &GroupMod {
                    command: GroupModCommand::Add,
                    group_type: GroupType::Indirect,
                    group_id: 1,
                    buckets: vec![Bucket {
                        actions: vec![Action::Group(1)],
                        ..Bucket::default()
                    }],
                    ..GroupMod::default()
                },
                Instant::now(),
            )
            .unwrap();

        let mut tables = new_tables(1);
        install(
            &mut tables,
            0,
            &flow(
                1,
                Match::new(),
                vec![Instruction::ApplyActions(vec![Action::Group(1)])],
            ),
        );

        let live = ahash::AHashSet::new();
        let result = run(
            &mut tables,
            &mut groups,
            &live,
            ipv4_ctx(1),
            128,
            Instant::now(),
        );
        assert_eq!(result, Err(ExecError::GroupRecursion));
        assert_eq!(
            ExecError::GroupRecursion.to_error_kind(),
            ErrorKind::BadAction(BadActionCode::BadOutGroup)
        );
    }

    #[test]
    fn fast_failover_picks_first_live_bucket() {
        let mut groups = GroupTable::new();
        groups
            .apply(
                &GroupMod {
                    command: GroupModCommand::Add,
                    group_type: GroupType::FastFailover,
                    group_id: 1,
                    buckets: vec![
                        Bucket {
                            watch_port: 1,
                            watch_group: crate::group_table::GROUP_ANY,
                            actions: vec![Action::Output {
                                port: 1,
                                max_len: 0,
                            }],
                            ..Bucket::default()
                        },
                        Bucket {
                            watch_port: 2,
                            watch_group: crate::group_table::GROUP_ANY,
                            actions: vec![Action::Output {
                                port: 2,
                                max_len: 0,
                            }],
                            ..Bucket::default()
                        },
                    ],
                    ..GroupMod::default()
                },
                Instant::now(),
            )
            .unwrap();

        let mut tables = new_tables(1);
        install(
            &mut tables,
            0,
            &flow(
                1,
                Match::new(),
                vec![Instruction::ApplyActions(vec![Action::Group(1)])],
            ),
        );

        // only port 2 is up
        let mut live = ahash::AHashSet::new();
        live.insert(2u32);
        let effects = run(
            &mut tables,
            &mut groups,
            &live,
            ipv4_ctx(3),
            128,
            Instant::now(),
        )
        .unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::Output { port: 2, .. }));
    }

    #[test]
    fn output_to_controller_becomes_packet_in() {
        let mut tables = new_tables(1);
        install(
            &mut tables,
            0,
            &flow(
                1,
                Match::new(),
                vec![Instruction::ApplyActions(vec![Action::Output {
                    port: port_no::CONTROLLER,
                    max_len: 200,
                }])],
            ),
        );
        let mut groups = GroupTable::new();
        let live = ahash::AHashSet::new();
        let effects = run(
            &mut tables,
            &mut groups,
            &live,
            ipv4_ctx(4),
            128,
            Instant::now(),
        )
        .unwrap();
        let Effect::PacketIn(packet_in) = &effects[0] else {
            panic!("expected packet-in");
        };
        assert_eq!(packet_in.reason, PacketInReason::Action);
        assert_eq!(packet_in.max_len, 200);
        assert_eq!(packet_in.table_id, 0);
    }

    #[test]
    fn group_supersedes_output_in_action_set() {
        let mut groups = GroupTable::new();
        groups
            .apply(
                &GroupMod {
                    command: GroupModCommand::Add,
                    group_type: GroupType::Indirect,
                    group_id: 7,
                    buckets: vec![Bucket {
                        actions: vec![Action::Output {
                            port: 42,
                            max_len: 0,
                        }],
                        ..Bucket::default()
                    }],
                    ..GroupMod::default()
                },
                Instant::now(),
            )
            .unwrap();

        let mut tables = new_tables(1);
        install(
            &mut tables,
            0,
            &flow(
                1,
                Match::new(),
                vec![Instruction::WriteActions(vec![
                    Action::Output {
                        port: 9,
                        max_len: 0,
                    },
                    Action::Group(7),
                ])],
            ),
        );

        let live = ahash::AHashSet::new();
        let effects = run(
            &mut tables,
            &mut groups,
            &live,
            ipv4_ctx(1),
            128,
            Instant::now(),
        )
        .unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::Output { port: 42, .. }));
    }
}
