#![forbid(unsafe_code)]

use q13_core::{Basis, Bit, Q13Error, Q13Result};
use q13_packet::Packet;

/// Link metadata a session may consult before emitting control traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkProperties {
    pub mtu: usize,
    pub is_reliable: bool,
}

/// The qubit physics, swappable per session.
/// The session never looks inside a `Qubit`; it only threads handles
/// from `prepare` to the link and from the link to `measure`.
pub trait QubitProvider {
    type Qubit;

    fn prepare(&mut self, bit: Bit, basis: Basis) -> Q13Result<Self::Qubit>;

    fn measure(&mut self, qubit: Self::Qubit, basis: Basis) -> Q13Result<Bit>;
}

/// Both halves of a link: the quantum channel for qubits and the classical
/// channel for control packets. Calls may block; the session waits on them.
pub trait Transport<Q> {
    fn properties(&self) -> LinkProperties;

    /// Fails with `NoChannel` when the link is down.
    fn send_qubit(&mut self, qubit: Q) -> Q13Result<()>;

    /// Routing and MTU handling belong to the implementation.
    fn deliver_classical(&mut self, packet: Packet) -> Q13Result<()>;

    /// `WouldBlock` while no whole packet is waiting.
    fn receive_classical(&mut self) -> nb::Result<Packet, Q13Error>;
}

impl<Q, T: Transport<Q> + ?Sized> Transport<Q> for &mut T {
    fn properties(&self) -> LinkProperties {
        (**self).properties()
    }
    fn send_qubit(&mut self, qubit: Q) -> Q13Result<()> {
        (**self).send_qubit(qubit)
    }
    fn deliver_classical(&mut self, packet: Packet) -> Q13Result<()> {
        (**self).deliver_classical(packet)
    }
    fn receive_classical(&mut self) -> nb::Result<Packet, Q13Error> {
        (**self).receive_classical()
    }
}

/// No-op provider for tests: the handle is the prepared pair and measuring
/// returns the prepared bit whatever basis is chosen.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProvider;

#[cfg(any(test, feature = "test-util"))]
impl QubitProvider for NullProvider {
    type Qubit = (Bit, Basis);

    fn prepare(&mut self, bit: Bit, basis: Basis) -> Q13Result<Self::Qubit> {
        Ok((bit, basis))
    }

    fn measure(&mut self, qubit: Self::Qubit, _basis: Basis) -> Q13Result<Bit> {
        Ok(qubit.0)
    }
}
