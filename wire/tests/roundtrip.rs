// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Property tests for the codec round-trip and length laws.

use ofstack_wire::actions::{self, Action};
use ofstack_wire::buffer::Buffer;
use ofstack_wire::instructions::{self, Instruction};
use ofstack_wire::messages::{Echo, Message, pack_echo_request};
use ofstack_wire::oxm::{Match, MatchField};
use ofstack_wire::{Header, XidGen};
use std::net::Ipv4Addr;

fn build_match(
    in_port: u32,
    eth_type: u16,
    ip: [u8; 4],
    ip_mask: [u8; 4],
    metadata: u64,
) -> Match {
    let mut m = Match::new();
    m.append(MatchField::InPort(in_port)).unwrap();
    m.append(MatchField::EthType(eth_type)).unwrap();
    m.append(MatchField::Ipv4Src {
        addr: Ipv4Addr::from(ip),
        mask: Some(Ipv4Addr::from(ip_mask)),
    })
    .unwrap();
    m.append(MatchField::Metadata {
        value: metadata,
        mask: None,
    })
    .unwrap();
    m
}

#[test]
fn match_roundtrip_and_length_laws() {
    bolero::check!()
        .with_type::<(u32, u16, [u8; 4], [u8; 4], u64)>()
        .for_each(|&(in_port, eth_type, ip, ip_mask, metadata)| {
            let m = build_match(in_port, eth_type, ip, ip_mask, metadata);
            let mut buf = Buffer::new();
            m.encode(&mut buf);

            assert_eq!(buf.len() % 8, 0);
            assert_eq!(buf.len(), m.encoded_len());
            assert_eq!(m.serialized_len().div_ceil(8) * 8, m.encoded_len());

            let (back, consumed) = Match::decode(buf.as_ref()).unwrap();
            assert_eq!(consumed, buf.len());
            assert_eq!(back, m);
            assert!(back.compare_strict(&m) && m.compare_strict(&back));
            assert!(m.compare_loose(&back));
        });
}

#[test]
fn action_list_roundtrip_law() {
    bolero::check!()
        .with_type::<(u32, u16, u8, u16, u32)>()
        .for_each(|&(port, max_len, ttl, ethertype, group)| {
            let list = vec![
                Action::Output { port, max_len },
                Action::SetNwTtl(ttl),
                Action::PushVlan(ethertype),
                Action::Group(group),
                Action::CopyTtlIn,
                Action::PopVlan,
            ];
            let mut buf = Buffer::new();
            actions::encode_list(&list, &mut buf);
            assert_eq!(buf.len(), actions::list_len(&list));
            assert_eq!(actions::decode_list(buf.as_ref()).unwrap(), list);
        });
}

#[test]
fn instruction_set_roundtrip_law() {
    bolero::check!()
        .with_type::<(u8, u64, u64, u32)>()
        .for_each(|&(table_id, value, mask, port)| {
            let set = vec![
                Instruction::ApplyActions(vec![Action::Output {
                    port,
                    max_len: 0xffff,
                }]),
                Instruction::WriteMetadata { value, mask },
                Instruction::ClearActions,
                Instruction::GotoTable(table_id),
            ];
            let mut buf = Buffer::new();
            instructions::encode_set(&set, &mut buf);
            assert_eq!(buf.len(), instructions::set_len(&set));
            assert_eq!(instructions::decode_set(buf.as_ref()).unwrap(), set);
        });
}

#[test]
fn message_header_length_law() {
    bolero::check!()
        .with_type::<Vec<u8>>()
        .for_each(|data: &Vec<u8>| {
            if data.len() > 1024 {
                return;
            }
            let mut xids = XidGen::new();
            let buf = pack_echo_request(
                &Echo {
                    xid: None,
                    data: data.clone(),
                },
                &mut xids,
            );
            let header = Header::decode(buf.as_ref()).unwrap();
            assert_eq!(usize::from(header.length), buf.len());

            let (message, consumed) = Message::decode(buf.as_ref()).unwrap();
            assert_eq!(consumed, buf.len());
            let Message::EchoRequest(echo) = message else {
                panic!("expected echo request");
            };
            assert_eq!(&echo.data, data);
        });
}

#[test]
fn loose_compare_subset_law() {
    bolero::check!()
        .with_type::<(u16, [u8; 4])>()
        .for_each(|&(eth_type, ip)| {
            // subset: eth_type only. superset: eth_type + exact ipv4 src.
            let mut subset = Match::new();
            subset.append(MatchField::EthType(eth_type)).unwrap();
            let mut superset = Match::new();
            superset.append(MatchField::EthType(eth_type)).unwrap();
            superset
                .append(MatchField::Ipv4Src {
                    addr: Ipv4Addr::from(ip),
                    mask: None,
                })
                .unwrap();

            assert!(subset.compare_loose(&superset));
            assert!(subset.compare_loose(&subset));
            assert!(!superset.compare_loose(&subset));
        });
}
