use q13_core::{Q13Error, DEFAULT_QUBIT_COUNT};
use q13_hal::QubitProvider;
use q13_session::{Phase, Session, SessionConfig};
use q13_sim::{run_exchange, IdealPhotons, Interceptor, MemoryLink, NoisyPhotons, Photon};

type Link = MemoryLink<Photon>;

fn session<P: QubitProvider<Qubit = Photon>>(
    provider: P,
    link: Link,
    local: &str,
    peer: &str,
    seed: u64,
) -> Session<P, Link> {
    Session::new(provider, link, SessionConfig::new(local, peer).with_seed(seed))
}

#[test]
fn test_noiseless_exchange_agrees() {
    let (a, b) = MemoryLink::pair("alice", "bob", 1500);
    let mut alice = session(IdealPhotons::seeded(10), a, "alice", "bob", 1);
    let mut bob = session(IdealPhotons::seeded(20), b, "bob", "alice", 2);

    let report = run_exchange(&mut alice, &mut bob, 200, 20).unwrap();

    assert_eq!(report.error_rate, 0.0);
    assert!(report.keys_match());
    assert_eq!(report.mismatches(), 0);
    assert_eq!(report.sampled, 20);
    assert_eq!(report.initiator_key.len(), report.shared - report.sampled);
    assert!(report.efficiency > 0.3 && report.efficiency < 0.7, "{}", report.efficiency);
    assert_eq!(alice.phase(), Phase::Complete);
    assert_eq!(bob.phase(), Phase::Complete);
    assert_eq!(alice.error_rate(), Some(0.0));
}

#[test]
fn test_control_traffic_survives_small_mtu_and_reordering() {
    let (mut a, mut b) = MemoryLink::pair("alice", "bob", 32);
    a.set_reorder(true);
    b.set_reorder(true);
    let mut alice = session(IdealPhotons::seeded(3), a, "alice", "bob", 3);
    let mut bob = session(IdealPhotons::seeded(4), b, "bob", "alice", 4);

    let report = run_exchange(&mut alice, &mut bob, DEFAULT_QUBIT_COUNT, 5).unwrap();

    assert!(report.keys_match());
    // Every control message is bigger than 12 payload bytes.
    assert!(report.fragments_sent > 4, "{} fragments", report.fragments_sent);
}

#[test]
fn test_full_interception_raises_error_rate() {
    let (a, b) = MemoryLink::pair("alice", "bob", 1500);
    let mut alice = session(IdealPhotons::seeded(5), a, "alice", "bob", 5);
    let eve = Interceptor::new(IdealPhotons::seeded(6), 1.0, Some(7)).unwrap();
    let mut bob = session(eve, b, "bob", "alice", 8);

    let report = run_exchange(&mut alice, &mut bob, 4000, 1000).unwrap();

    assert!(report.error_rate > 0.18 && report.error_rate < 0.32, "qber {}", report.error_rate);
    assert_eq!(alice.error_rate(), Some(report.error_rate));
    assert_eq!(bob.provider_mut().intercepted(), 4000);
}

#[test]
fn test_channel_noise_shows_up_in_sample() {
    let (a, b) = MemoryLink::pair("alice", "bob", 1500);
    let mut alice = session(IdealPhotons::seeded(11), a, "alice", "bob", 11);
    let noisy = NoisyPhotons::new(IdealPhotons::seeded(12), 0.2, Some(13)).unwrap();
    let mut bob = session(noisy, b, "bob", "alice", 14);

    let report = run_exchange(&mut alice, &mut bob, 2000, 400).unwrap();

    assert!(report.error_rate > 0.1 && report.error_rate < 0.3, "qber {}", report.error_rate);
    assert!(!report.keys_match());
}

#[test]
fn test_down_link_refuses_to_send() {
    let (a, b) = MemoryLink::pair("alice", "bob", 1500);
    a.set_up(false);
    assert!(!b.is_up());
    let mut alice = session(IdealPhotons::seeded(1), a, "alice", "bob", 1);
    let mut bob = session(IdealPhotons::seeded(2), b, "bob", "alice", 2);

    let err = run_exchange(&mut alice, &mut bob, 10, 2).unwrap_err();
    assert_eq!(err, Q13Error::NoChannel);
    assert_eq!(alice.sent_bits().len(), 0);
}

#[test]
fn test_reassembled_packets_record_the_receiving_hop() {
    use q13_hal::Transport;
    use q13_packet::Packet;

    let (mut a, mut b): (Link, Link) = MemoryLink::pair("alice", "bob", 40);
    let p = Packet::create(vec![7u8; 100], "alice", "bob", "data", None);
    a.deliver_classical(p.clone()).unwrap();

    let got = b.receive_classical().unwrap();
    assert_eq!(got.payload, p.payload);
    assert_eq!(got.hop_history(), ["alice".to_string(), "bob".to_string()]);
    assert!(matches!(b.receive_classical(), Err(nb::Error::WouldBlock)));
}

#[test]
fn test_qubits_arrive_in_order() {
    use q13_hal::Transport;

    let (mut a, b): (MemoryLink<u8>, MemoryLink<u8>) = MemoryLink::pair("a", "b", 100);
    for q in 0..5u8 {
        a.send_qubit(q).unwrap();
    }
    assert_eq!(b.pending_qubits(), 5);
    assert_eq!(b.take_qubits(), vec![0, 1, 2, 3, 4]);
    assert_eq!(b.pending_qubits(), 0);
}
