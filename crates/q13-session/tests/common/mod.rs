#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use q13_core::{Basis, Bit, Q13Error, Q13Result};
use q13_hal::{LinkProperties, NullProvider, Transport};
use q13_packet::Packet;
use q13_session::{Session, SessionConfig};

pub type Qubit = (Bit, Basis);
type Queue<T> = Rc<RefCell<VecDeque<T>>>;

/// One end of a cross-wired in-memory link.
pub struct End {
    qubits_out: Queue<Qubit>,
    qubits_in: Queue<Qubit>,
    tx: Queue<Packet>,
    rx: Queue<Packet>,
    pub up: bool,
}

impl End {
    pub fn take_qubits(&self) -> Vec<Qubit> {
        self.qubits_in.borrow_mut().drain(..).collect()
    }

    pub fn inject(&self, packet: Packet) {
        self.rx.borrow_mut().push_back(packet);
    }
}

pub fn pair() -> (End, End) {
    let q_ab: Queue<Qubit> = Rc::default();
    let q_ba: Queue<Qubit> = Rc::default();
    let c_ab: Queue<Packet> = Rc::default();
    let c_ba: Queue<Packet> = Rc::default();
    let a = End { qubits_out: q_ab.clone(), qubits_in: q_ba.clone(), tx: c_ab.clone(), rx: c_ba.clone(), up: true };
    let b = End { qubits_out: q_ba, qubits_in: q_ab, tx: c_ba, rx: c_ab, up: true };
    (a, b)
}

impl Transport<Qubit> for End {
    fn properties(&self) -> LinkProperties {
        LinkProperties { mtu: 1500, is_reliable: true }
    }
    fn send_qubit(&mut self, qubit: Qubit) -> Q13Result<()> {
        if !self.up {
            return Err(Q13Error::NoChannel);
        }
        self.qubits_out.borrow_mut().push_back(qubit);
        Ok(())
    }
    fn deliver_classical(&mut self, packet: Packet) -> Q13Result<()> {
        if !self.up {
            return Err(Q13Error::NoChannel);
        }
        self.tx.borrow_mut().push_back(packet);
        Ok(())
    }
    fn receive_classical(&mut self) -> nb::Result<Packet, Q13Error> {
        self.rx.borrow_mut().pop_front().ok_or(nb::Error::WouldBlock)
    }
}

pub type TestSession = Session<NullProvider, End>;

pub fn sessions(expected: usize) -> (TestSession, TestSession) {
    let (a, b) = pair();
    let alice = Session::new(NullProvider, a, SessionConfig::new("alice", "bob").with_seed(1));
    let bob = Session::new(
        NullProvider,
        b,
        SessionConfig::new("bob", "alice").with_seed(2).with_expected_qubits(expected),
    );
    (alice, bob)
}

pub fn bits(raw: &[u8]) -> Vec<Bit> {
    raw.iter().map(|&b| b == 1).collect()
}
