use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use spin::Mutex;

use q13_core::{Q13Error, Q13Result};
use q13_hal::{LinkProperties, Transport};
use q13_packet::{fragment, FragmentBuffer, Packet};

struct Wire<Q> {
    qubits: VecDeque<Q>,
    fragments: VecDeque<Packet>,
}

impl<Q> Wire<Q> {
    fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self { qubits: VecDeque::new(), fragments: VecDeque::new() }))
    }
}

/// One end of a point-to-point link held in memory.
///
/// Classical packets are cut to the MTU on the way out and put back together
/// on the way in, so control traffic sees the same limits as payload.
pub struct MemoryLink<Q> {
    name: String,
    mtu: usize,
    up: Arc<AtomicBool>,
    outbound: Arc<Mutex<Wire<Q>>>,
    inbound: Arc<Mutex<Wire<Q>>>,
    buffer: FragmentBuffer,
    reorder: bool,
    fragments_sent: usize,
}

impl<Q> MemoryLink<Q> {
    pub fn pair(a: &str, b: &str, mtu: usize) -> (Self, Self) {
        let up = Arc::new(AtomicBool::new(true));
        let ab = Wire::new();
        let ba = Wire::new();
        let end_a = Self::end(a, mtu, up.clone(), ab.clone(), ba.clone());
        let end_b = Self::end(b, mtu, up, ba, ab);
        (end_a, end_b)
    }

    fn end(
        name: &str,
        mtu: usize,
        up: Arc<AtomicBool>,
        outbound: Arc<Mutex<Wire<Q>>>,
        inbound: Arc<Mutex<Wire<Q>>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            mtu,
            up,
            outbound,
            inbound,
            buffer: FragmentBuffer::new(),
            reorder: false,
            fragments_sent: 0,
        }
    }

    /// Brings the link up or down for both ends.
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    /// Emit each packet's fragments last-to-first.
    pub fn set_reorder(&mut self, reorder: bool) {
        self.reorder = reorder;
    }

    pub fn fragments_sent(&self) -> usize {
        self.fragments_sent
    }

    /// Drains every qubit the peer has sent so far, in order.
    pub fn take_qubits(&self) -> Vec<Q> {
        self.inbound.lock().qubits.drain(..).collect()
    }

    pub fn pending_qubits(&self) -> usize {
        self.inbound.lock().qubits.len()
    }

    fn check_up(&self) -> Q13Result<()> {
        if self.is_up() {
            Ok(())
        } else {
            warn!("[{}] link down", self.name);
            Err(Q13Error::NoChannel)
        }
    }
}

impl<Q> Transport<Q> for MemoryLink<Q> {
    fn properties(&self) -> LinkProperties {
        LinkProperties { mtu: self.mtu, is_reliable: true }
    }

    fn send_qubit(&mut self, qubit: Q) -> Q13Result<()> {
        self.check_up()?;
        self.outbound.lock().qubits.push_back(qubit);
        Ok(())
    }

    fn deliver_classical(&mut self, packet: Packet) -> Q13Result<()> {
        self.check_up()?;
        let mut frags = fragment(&packet, self.mtu, None)?;
        if self.reorder {
            frags.reverse();
        }
        debug!("[{}] {} -> {} in {} fragment(s)", self.name, packet.id(), packet.destination, frags.len());
        self.fragments_sent += frags.len();
        self.outbound.lock().fragments.extend(frags);
        Ok(())
    }

    fn receive_classical(&mut self) -> nb::Result<Packet, Q13Error> {
        loop {
            let next = self.inbound.lock().fragments.pop_front();
            let Some(frag) = next else {
                return Err(nb::Error::WouldBlock);
            };
            if let Some(mut whole) = self.buffer.ingest(frag) {
                whole.append_hop(&self.name);
                return Ok(whole);
            }
        }
    }
}
