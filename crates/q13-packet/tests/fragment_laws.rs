use proptest::prelude::*;
use q13_core::Q13Error;
use q13_packet::fragment::{FRAGMENT_ID, FRAGMENT_OFFSET, MAX_PENDING_GROUPS, MORE_FRAGMENTS, REASSEMBLY_COMPLETE};
use q13_packet::{fragment, reassemble, try_reassemble, FragmentBuffer, HeaderValue, Packet, PacketId, ReassemblyError};

fn packet_of(len: usize) -> Packet {
    let payload = (0..len).map(|i| (i % 251) as u8).collect();
    Packet::create(payload, "alice", "bob", "udp", Some("10.0.0.2"))
}

fn offset(p: &Packet) -> u64 {
    p.get_header(FRAGMENT_OFFSET).and_then(HeaderValue::as_u64).unwrap()
}

fn more(p: &Packet) -> bool {
    p.get_header(MORE_FRAGMENTS).and_then(HeaderValue::as_bool).unwrap()
}

#[test]
fn test_small_packet_passes_unchanged() {
    let p = packet_of(10);
    let frags = fragment(&p, 30, None).unwrap();
    assert_eq!(frags, vec![p]);
    assert!(!frags[0].has_header(FRAGMENT_ID));
}

#[test]
fn test_mtu_without_room_rejected() {
    let p = packet_of(10);
    assert_eq!(fragment(&p, 20, None), Err(Q13Error::InvalidMtu(20)));
}

#[test]
fn test_fragment_headers() {
    let p = packet_of(100);
    let frags = fragment(&p, 50, None).unwrap();
    assert_eq!(frags.len(), 4);
    let offsets: Vec<u64> = frags.iter().map(offset).collect();
    assert_eq!(offsets, vec![0, 30, 60, 90]);
    assert_eq!(frags.iter().map(more).collect::<Vec<_>>(), vec![true, true, true, false]);
    assert_eq!(frags[0].size_bytes(), 50);
    assert_eq!(frags[3].size_bytes(), 30);
    for f in &frags {
        assert_eq!(f.get_header(FRAGMENT_ID), Some(&HeaderValue::Int(p.id().raw())));
    }
}

#[test]
fn test_original_id_override() {
    let p = packet_of(100);
    let frags = fragment(&p, 50, Some(PacketId::from_raw(7))).unwrap();
    assert!(frags.iter().all(|f| f.get_header(FRAGMENT_ID) == Some(&HeaderValue::Int(7))));
}

#[test]
fn test_reassembly_cleans_headers() {
    let mut p = packet_of(100);
    p.append_header("type", "payload");
    let mut frags = fragment(&p, 41, None).unwrap();
    frags.reverse();
    let whole = reassemble(&frags).unwrap();
    assert_eq!(whole.payload, p.payload);
    assert_eq!(whole.id(), p.id());
    for name in [FRAGMENT_ID, FRAGMENT_OFFSET, MORE_FRAGMENTS, "size_bytes"] {
        assert!(!whole.has_header(name), "{} left behind", name);
    }
    assert_eq!(whole.get_header(REASSEMBLY_COMPLETE), Some(&HeaderValue::Flag(true)));
    assert_eq!(whole.get_header("type"), Some(&HeaderValue::from("payload")));
    assert_eq!(whole.size_bytes(), 120);
}

#[test]
fn test_reassembly_failures() {
    let p = packet_of(100);
    let frags = fragment(&p, 50, None).unwrap();

    assert_eq!(try_reassemble(&[]), Err(ReassemblyError::Empty));

    let missing_tail = &frags[..3];
    assert_eq!(try_reassemble(missing_tail), Err(ReassemblyError::MissingFinalFragment));

    let gap = vec![frags[0].clone(), frags[2].clone(), frags[3].clone()];
    assert_eq!(
        try_reassemble(&gap),
        Err(ReassemblyError::IncompleteReassembly { expected: 30, found: Some(60) })
    );

    let mut dup = frags.clone();
    dup.push(frags[1].clone());
    assert!(reassemble(&dup).is_none());

    assert!(reassemble(&[p.clone()]).is_none());
}

#[test]
fn test_buffer_collects_out_of_order() {
    let p = packet_of(200);
    let mut frags = fragment(&p, 60, None).unwrap();
    frags.swap(0, 3);
    let mut buf = FragmentBuffer::new();

    let mut done = None;
    let n = frags.len();
    for (i, f) in frags.into_iter().enumerate() {
        let out = buf.ingest(f);
        if i + 1 < n {
            assert!(out.is_none());
        } else {
            done = out;
        }
    }
    assert_eq!(done.unwrap().payload, p.payload);
    assert_eq!(buf.pending_groups(), 0);
}

#[test]
fn test_buffer_ignores_duplicates_and_passes_whole_packets() {
    let p = packet_of(90);
    let frags = fragment(&p, 65, None).unwrap();
    assert_eq!(frags.len(), 2);
    let mut buf = FragmentBuffer::new();
    assert!(buf.ingest(frags[0].clone()).is_none());
    assert!(buf.ingest(frags[0].clone()).is_none());
    assert_eq!(buf.ingest(frags[1].clone()).unwrap().payload, p.payload);

    let small = packet_of(3);
    assert_eq!(buf.ingest(small.clone()), Some(small));

    buf.ingest(frags[0].clone());
    assert_eq!(buf.discard(p.id().raw()), 1);
    assert_eq!(buf.discard(p.id().raw()), 0);
}

#[test]
fn test_full_buffer_evicts_oldest_partial_group() {
    let p = packet_of(90);
    let mut buf = FragmentBuffer::new();
    for id in 0..MAX_PENDING_GROUPS as u64 {
        let frags = fragment(&p, 65, Some(PacketId::from_raw(id))).unwrap();
        assert!(buf.ingest(frags[0].clone()).is_none());
    }
    assert_eq!(buf.pending_groups(), MAX_PENDING_GROUPS);
    assert_eq!(buf.pending_ids().next(), Some(0));

    let fresh = fragment(&p, 65, Some(PacketId::from_raw(1_000))).unwrap();
    assert!(buf.ingest(fresh[0].clone()).is_none());
    assert_eq!(buf.pending_groups(), MAX_PENDING_GROUPS);
    assert_eq!(buf.ingest(fresh[1].clone()).unwrap().payload, p.payload);
    assert_eq!(buf.pending_groups(), MAX_PENDING_GROUPS - 1);

    // Group 0 was evicted, so its tail alone does not complete it.
    let first = fragment(&p, 65, Some(PacketId::from_raw(0))).unwrap();
    assert!(buf.ingest(first[1].clone()).is_none());
    assert_eq!(buf.pending_ids().next(), Some(1));
    assert_eq!(buf.pending_ids().last(), Some(0));

    let second = fragment(&p, 65, Some(PacketId::from_raw(1))).unwrap();
    assert!(buf.ingest(second[1].clone()).is_some());
    assert_eq!(buf.pending_ids().next(), Some(2));
}

proptest! {
    #[test]
    fn prop_fragments_tile_payload(len in 1usize..2000, mtu in 21usize..200) {
        let p = packet_of(len);
        prop_assume!(mtu < len + 20);
        let frags = fragment(&p, mtu, None).unwrap();

        let mut expected = 0u64;
        for f in &frags {
            prop_assert_eq!(offset(f), expected);
            prop_assert!(f.size_bytes() <= mtu);
            expected += f.payload.len() as u64;
        }
        prop_assert_eq!(expected as usize, len);

        let finals: Vec<_> = frags.iter().filter(|f| !more(f)).collect();
        prop_assert_eq!(finals.len(), 1);
        prop_assert_eq!(offset(finals[0]), offset(frags.last().unwrap()));
    }

    #[test]
    fn prop_round_trip(len in 1usize..2000, mtu in 21usize..300, seed in any::<u64>()) {
        let p = packet_of(len);
        prop_assume!(p.size_bytes() > mtu);
        let mut frags = fragment(&p, mtu, None).unwrap();
        let k = frags.len();
        frags.rotate_left((seed as usize) % k);
        let whole = reassemble(&frags).unwrap();
        prop_assert_eq!(whole.payload, p.payload);
    }

    #[test]
    fn prop_any_missing_fragment_fails(len in 100usize..1000, mtu in 21usize..60, pick in any::<usize>()) {
        let p = packet_of(len);
        let mut frags = fragment(&p, mtu, None).unwrap();
        prop_assume!(frags.len() > 1);
        frags.remove(pick % frags.len());
        prop_assert!(reassemble(&frags).is_none());
    }
}
